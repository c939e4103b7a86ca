use super::SchemaEngine;
use crate::authorization::Authorization;
use crate::catalog::{AttributeType, Collection, Document, Status, Value};
use crate::declarative::validate_key;
use crate::error::{ResourceType, SchemaError};
use crate::permission::Action;
use crate::query::{self, Query};
use crate::resolver::{Resolver, authorize, check_grants};
use crate::storage::DocumentStore;
use tracing::{debug, info};

#[derive(Debug, Clone, PartialEq)]
pub struct DocumentList {
    /// Matching documents the caller may read, capped at the query limit
    /// ceiling.
    pub total: usize,
    pub documents: Vec<Document>,
}

impl<S: DocumentStore> SchemaEngine<S> {
    fn resolver<'a>(&'a self, database_id: &'a str) -> Resolver<'a, S> {
        Resolver::new(
            self.store.as_ref(),
            database_id,
            self.config.max_relationship_depth,
        )
        .with_max_roles(self.config.max_roles)
    }

    /// Creates a document. Needs collection-level create; nested related
    /// documents are checked and persisted along with it.
    pub async fn create_document(
        &self,
        auth: &Authorization,
        database_id: &str,
        collection_id: &str,
        mut document: Document,
    ) -> Result<Document, SchemaError> {
        let collection = self
            .visible_collection(auth, database_id, collection_id)
            .await?;
        auth.check(
            Action::Create,
            collection.permissions.roles_for(Action::Create),
        )?;

        if document.id.is_empty() {
            document.id = uuid::Uuid::new_v4().simple().to_string();
        }
        validate_key("document", &document.id)?;
        check_grants(auth, &document.permissions, self.config.max_roles)?;
        apply_structure(&collection, &mut document)?;
        self.resolver(database_id)
            .prepare_write(auth, &collection, &mut document)
            .await?;

        let id = document.id.clone();
        let mut created = self
            .store
            .create_document(database_id, collection_id, document)
            .await
            .map_err(|e| SchemaError::from_store(e, ResourceType::Document, &id))?;
        self.resolver(database_id)
            .process_document(auth, &collection, &mut created)
            .await?;
        info!(database_id, collection_id, document_id = %id, "document created");
        Ok(created)
    }

    pub async fn get_document(
        &self,
        auth: &Authorization,
        database_id: &str,
        collection_id: &str,
        document_id: &str,
    ) -> Result<Document, SchemaError> {
        let collection = self
            .visible_collection(auth, database_id, collection_id)
            .await?;
        let mut document = self
            .store
            .get_document(database_id, collection_id, document_id)
            .await?
            .ok_or_else(|| SchemaError::not_found(ResourceType::Document, document_id))?;
        authorize(auth, Action::Read, &collection, Some(&document))?;
        self.resolver(database_id)
            .process_document(auth, &collection, &mut document)
            .await?;
        Ok(document)
    }

    /// Lists readable documents. Without collection-level read, a collection
    /// with document security still lists the documents the caller can read.
    pub async fn list_documents(
        &self,
        auth: &Authorization,
        database_id: &str,
        collection_id: &str,
        mut queries: Vec<Query>,
    ) -> Result<DocumentList, SchemaError> {
        let collection = self
            .visible_collection(auth, database_id, collection_id)
            .await?;
        query::validate(&queries, self.config.max_query_limit)?;
        let grouped = query::group_by_type(&queries);
        if grouped.limit.is_none() {
            queries.push(Query::Limit(self.config.default_query_limit));
        }
        let ceiling = Some(self.config.max_query_limit);

        let total = match auth.check(Action::Read, collection.permissions.roles_for(Action::Read))
        {
            Ok(()) => {
                self.store
                    .count_documents(database_id, collection_id, &grouped.filters, ceiling)
                    .await?
            }
            Err(err) if !collection.document_security => return Err(err),
            Err(_) => {
                let readable: Vec<Value> = self
                    .store
                    .find_documents(database_id, collection_id, &grouped.filters)
                    .await?
                    .into_iter()
                    .filter(|doc| authorize(auth, Action::Read, &collection, Some(doc)).is_ok())
                    .map(|doc| Value::from(doc.id))
                    .collect();
                debug!(
                    database_id,
                    collection_id,
                    readable = readable.len(),
                    "listing through document permissions"
                );
                let total = readable.len().min(self.config.max_query_limit);
                queries.push(Query::Equal("$id".to_string(), readable));
                total
            }
        };

        let mut documents = self
            .store
            .find_documents(database_id, collection_id, &queries)
            .await?;
        let mut resolver = self.resolver(database_id);
        for document in &mut documents {
            resolver
                .process_document(auth, &collection, document)
                .await?;
        }
        Ok(DocumentList { total, documents })
    }

    /// Merges `patch` into a stored document. Fields in `patch` replace
    /// stored ones; a non-empty permission set replaces the stored set.
    pub async fn update_document(
        &self,
        auth: &Authorization,
        database_id: &str,
        collection_id: &str,
        document_id: &str,
        mut patch: Document,
    ) -> Result<Document, SchemaError> {
        let collection = self
            .visible_collection(auth, database_id, collection_id)
            .await?;
        let existing = self
            .store
            .get_document(database_id, collection_id, document_id)
            .await?
            .ok_or_else(|| SchemaError::not_found(ResourceType::Document, document_id))?;
        authorize(auth, Action::Update, &collection, Some(&existing))?;

        patch.id = document_id.to_string();
        self.resolver(database_id)
            .prepare_write(auth, &collection, &mut patch)
            .await?;

        let mut next = existing;
        next.fields.extend(patch.fields);
        if !patch.permissions.is_empty() {
            check_grants(auth, &patch.permissions, self.config.max_roles)?;
            next.permissions = patch.permissions;
        }
        apply_structure(&collection, &mut next)?;

        let mut updated = self
            .store
            .update_document(database_id, collection_id, next)
            .await
            .map_err(|e| SchemaError::from_store(e, ResourceType::Document, document_id))?;
        self.store
            .purge_cached_document(database_id, collection_id, document_id)
            .await?;
        self.resolver(database_id)
            .process_document(auth, &collection, &mut updated)
            .await?;
        info!(database_id, collection_id, document_id, "document updated");
        Ok(updated)
    }

    /// Deletes one document. Related documents are left to the store's
    /// on-delete handling.
    pub async fn delete_document(
        &self,
        auth: &Authorization,
        database_id: &str,
        collection_id: &str,
        document_id: &str,
    ) -> Result<(), SchemaError> {
        let collection = self
            .visible_collection(auth, database_id, collection_id)
            .await?;
        let existing = self
            .store
            .get_document(database_id, collection_id, document_id)
            .await?
            .ok_or_else(|| SchemaError::not_found(ResourceType::Document, document_id))?;
        authorize(auth, Action::Delete, &collection, Some(&existing))?;

        self.store
            .delete_document(database_id, collection_id, document_id)
            .await
            .map_err(|e| SchemaError::from_store(e, ResourceType::Document, document_id))?;
        self.store
            .purge_cached_document(database_id, collection_id, document_id)
            .await?;
        info!(database_id, collection_id, document_id, "document deleted");
        Ok(())
    }
}

/// Checks fields against the collection's available attributes and fills in
/// defaults for missing ones.
pub(crate) fn apply_structure(
    collection: &Collection,
    document: &mut Document,
) -> Result<(), SchemaError> {
    for (key, value) in &document.fields {
        let Some(attribute) = collection.attribute(key) else {
            return Err(SchemaError::InvalidValue(format!(
                "unknown attribute '{key}' in collection '{}'",
                collection.id
            )));
        };
        if attribute.status != Status::Available || attribute.is_relationship() {
            continue;
        }
        let items: Vec<&Value> = match (attribute.array, value) {
            (_, Value::Null) => Vec::new(),
            (true, Value::List(items)) => items.iter().collect(),
            (false, Value::List(_)) | (true, _) => {
                return Err(SchemaError::InvalidValue(format!(
                    "attribute '{key}' {} a list",
                    if attribute.array { "must be" } else { "can not be" }
                )));
            }
            (false, single) => vec![single],
        };
        for item in items {
            if !item.fits(attribute.attr_type) || matches!(item, Value::List(_)) {
                return Err(SchemaError::InvalidValue(format!(
                    "attribute '{key}' must be {}, got {}",
                    attribute.attr_type,
                    item.type_name()
                )));
            }
            if attribute.attr_type == AttributeType::String
                && item
                    .as_text()
                    .is_some_and(|text| text.chars().count() as u64 > attribute.size)
            {
                return Err(SchemaError::InvalidValue(format!(
                    "attribute '{key}' is longer than {} characters",
                    attribute.size
                )));
            }
        }
    }

    for attribute in &collection.attributes {
        if attribute.status != Status::Available || attribute.is_relationship() {
            continue;
        }
        let present = document
            .fields
            .get(&attribute.key)
            .is_some_and(|v| !v.is_null());
        if present {
            continue;
        }
        if let Some(default) = &attribute.default {
            document.fields.insert(attribute.key.clone(), default.clone());
        } else if attribute.required {
            return Err(SchemaError::InvalidValue(format!(
                "missing required attribute '{}'",
                attribute.key
            )));
        }
    }
    Ok(())
}
