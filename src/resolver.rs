//! Relationship traversal over documents.
//!
//! Both paths walk the document tree with an explicit work stack, bounded by
//! a depth limit. On the read path each frame carries its ancestor chain, so
//! a document is left as a reference only when it would expand inside itself.

use crate::authorization::Authorization;
use crate::catalog::{Collection, Document, Value};
use crate::engine::apply_structure;
use crate::error::{ResourceType, SchemaError};
use crate::permission::{Action, PermissionSet};
use crate::storage::DocumentStore;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

/// Collection-level grant, or with document security on, a grant on the
/// document itself.
pub fn authorize(
    auth: &Authorization,
    action: Action,
    collection: &Collection,
    document: Option<&Document>,
) -> Result<(), SchemaError> {
    match auth.check(action, collection.permissions.roles_for(action)) {
        Ok(()) => Ok(()),
        Err(_) if collection.document_security && document.is_some() => {
            let document = document.map(|d| d.permissions.roles_for(action));
            auth.check(action, document.into_iter().flatten())
        }
        Err(err) => Err(err),
    }
}

/// Callers can only grant roles they hold themselves.
pub fn check_grants(
    auth: &Authorization,
    permissions: &PermissionSet,
    max_roles: usize,
) -> Result<(), SchemaError> {
    if permissions.len() > max_roles {
        return Err(SchemaError::InvalidValue(format!(
            "{} permissions given, at most {max_roles} allowed",
            permissions.len()
        )));
    }
    if !auth.is_enabled() {
        return Ok(());
    }
    if let Some(foreign) = permissions.iter().find(|p| !auth.is_role(&p.role)) {
        let held: Vec<String> = auth.roles().map(ToString::to_string).collect();
        return Err(SchemaError::Unauthorized(format!(
            "permission '{foreign}' grants a role the caller does not hold, \
             roles held: {held:?}"
        )));
    }
    Ok(())
}

type DocumentKey = (String, String);

struct Frame<'d> {
    document: &'d mut Document,
    collection_id: String,
    depth: usize,
    /// `(collection, id)` of this document and every document above it.
    ancestors: Vec<DocumentKey>,
}

pub struct Resolver<'a, S> {
    store: &'a S,
    database_id: &'a str,
    max_depth: usize,
    max_roles: usize,
    definitions: HashMap<String, Arc<Collection>>,
}

impl<'a, S: DocumentStore> Resolver<'a, S> {
    pub fn new(store: &'a S, database_id: &'a str, max_depth: usize) -> Self {
        Self {
            store,
            database_id,
            max_depth,
            max_roles: usize::MAX,
            definitions: HashMap::new(),
        }
    }

    /// Caps the permissions a nested document may carry.
    pub fn with_max_roles(mut self, max_roles: usize) -> Self {
        self.max_roles = max_roles;
        self
    }

    /// Collection definitions are schema, not data: they load with
    /// authorization bypassed.
    async fn definition(
        &mut self,
        auth: &Authorization,
        collection_id: &str,
    ) -> Result<Arc<Collection>, SchemaError> {
        if let Some(found) = self.definitions.get(collection_id) {
            return Ok(Arc::clone(found));
        }
        let store = self.store;
        let database_id = self.database_id;
        let loaded = auth
            .skip(|| store.get_collection(database_id, collection_id))
            .await?
            .ok_or_else(|| SchemaError::not_found(ResourceType::Collection, collection_id))?;
        let loaded = Arc::new(loaded);
        self.definitions
            .insert(collection_id.to_string(), Arc::clone(&loaded));
        Ok(loaded)
    }

    /// Read path: stamps `document` and replaces relationship references with
    /// the related documents the caller may read. Unreadable or missing
    /// documents are dropped from lists and nulled in single-valued fields.
    /// Past the depth limit, and for documents that are their own ancestor,
    /// references are left as they are.
    pub async fn process_document(
        &mut self,
        auth: &Authorization,
        collection: &Collection,
        document: &mut Document,
    ) -> Result<(), SchemaError> {
        self.definitions
            .entry(collection.id.clone())
            .or_insert_with(|| Arc::new(collection.clone()));
        let root = (collection.id.clone(), document.id.clone());
        let mut stack = vec![Frame {
            document,
            collection_id: collection.id.clone(),
            depth: 0,
            ancestors: vec![root],
        }];
        while let Some(Frame {
            document,
            collection_id,
            depth,
            ancestors,
        }) = stack.pop()
        {
            let collection = self.definition(auth, &collection_id).await?;
            document.database_id = self.database_id.to_string();
            document.collection_id = collection.id.clone();

            let mut related_by_key = HashMap::new();
            for (attribute, options) in collection.relationships() {
                let Some(value) = document.fields.get_mut(&attribute.key) else {
                    continue;
                };
                if value.is_null() {
                    continue;
                }
                if depth >= self.max_depth {
                    debug!(
                        collection_id = %collection.id,
                        document_id = %document.id,
                        key = %attribute.key,
                        depth,
                        "relationship depth limit reached"
                    );
                    continue;
                }
                let related = self.definition(auth, &options.related_collection).await?;
                let items = match std::mem::replace(value, Value::Null) {
                    Value::List(items) => items,
                    single => vec![single],
                };

                let mut resolved = Vec::with_capacity(items.len());
                for item in items {
                    let id = match &item {
                        Value::Reference(id) => id.clone(),
                        Value::Text(id) => id.to_string(),
                        Value::Document(nested) => nested.id.clone(),
                        _ => continue,
                    };
                    if ancestors
                        .iter()
                        .any(|(c, d)| *c == related.id && *d == id)
                    {
                        debug!(collection_id = %related.id, document_id = %id, "relationship cycle");
                        resolved.push(Value::Reference(id));
                        continue;
                    }
                    let loaded = match item {
                        Value::Document(nested) => Some(*nested),
                        _ => {
                            self.store
                                .get_document(self.database_id, &related.id, &id)
                                .await?
                        }
                    };
                    let Some(loaded) = loaded else {
                        continue;
                    };
                    if authorize(auth, Action::Read, &related, Some(&loaded)).is_err() {
                        continue;
                    }
                    resolved.push(Value::from(loaded));
                }

                *value = if options.is_many() {
                    Value::List(resolved)
                } else {
                    resolved.into_iter().next().unwrap_or(Value::Null)
                };
                related_by_key.insert(attribute.key.clone(), related.id.clone());
            }

            push_nested(&mut stack, document, &related_by_key, depth, &ancestors);
        }
        Ok(())
    }

    /// Write path: validates relationship values before the root document is
    /// persisted. Nested documents that do not exist yet get an id and need
    /// create permission on their collection; existing ones carrying fields
    /// need update permission. Either way a nested document is checked
    /// against its collection's attributes and may only grant roles the
    /// caller holds. Bare references must point at existing documents. Root
    /// permissions and structure are the caller's concern.
    pub async fn prepare_write(
        &mut self,
        auth: &Authorization,
        collection: &Collection,
        document: &mut Document,
    ) -> Result<(), SchemaError> {
        self.definitions
            .entry(collection.id.clone())
            .or_insert_with(|| Arc::new(collection.clone()));

        let mut stack = vec![Frame {
            document,
            collection_id: collection.id.clone(),
            depth: 0,
            ancestors: Vec::new(),
        }];
        while let Some(Frame {
            document,
            collection_id,
            depth,
            ancestors,
        }) = stack.pop()
        {
            let collection = self.definition(auth, &collection_id).await?;
            document.database_id = self.database_id.to_string();
            document.collection_id = collection.id.clone();

            let mut related_by_key = HashMap::new();
            for (attribute, options) in collection.relationships() {
                let Some(value) = document.fields.get_mut(&attribute.key) else {
                    continue;
                };
                if value.is_null() {
                    continue;
                }
                if depth >= self.max_depth {
                    return Err(SchemaError::InvalidValue(format!(
                        "relationship '{}' nests deeper than {} levels",
                        attribute.key, self.max_depth
                    )));
                }
                let items: Vec<&mut Value> = match value {
                    Value::List(items) if options.is_many() => items.iter_mut().collect(),
                    Value::List(_) => {
                        return Err(SchemaError::InvalidValue(format!(
                            "relationship '{}' holds a single document, got a list",
                            attribute.key
                        )));
                    }
                    _ if options.is_many() => {
                        return Err(SchemaError::InvalidValue(format!(
                            "relationship '{}' holds a list of documents",
                            attribute.key
                        )));
                    }
                    single => vec![single],
                };

                let related = self.definition(auth, &options.related_collection).await?;
                for item in items {
                    self.prepare_item(auth, &related, &attribute.key, item).await?;
                }
                related_by_key.insert(attribute.key.clone(), related.id.clone());
            }

            push_nested(&mut stack, document, &related_by_key, depth, &ancestors);
        }
        Ok(())
    }

    async fn prepare_item(
        &self,
        auth: &Authorization,
        related: &Collection,
        key: &str,
        item: &mut Value,
    ) -> Result<(), SchemaError> {
        match item {
            Value::Reference(_) | Value::Text(_) => {
                let id = match item {
                    Value::Text(text) => text.to_string(),
                    Value::Reference(id) => id.clone(),
                    _ => return Ok(()),
                };
                self.existing(related, &id)
                    .await?
                    .ok_or_else(|| SchemaError::not_found(ResourceType::Document, &id))?;
                *item = Value::Reference(id);
                Ok(())
            }
            Value::Document(nested) => {
                if nested.id.is_empty() {
                    nested.id = uuid::Uuid::new_v4().simple().to_string();
                }
                nested.collection_id = related.id.clone();
                nested.database_id = self.database_id.to_string();
                match self.existing(related, &nested.id).await? {
                    None => {
                        auth.check(Action::Create, related.permissions.roles_for(Action::Create))?;
                        check_grants(auth, &nested.permissions, self.max_roles)?;
                        apply_structure(related, nested)
                    }
                    Some(_) if nested.fields.is_empty() && nested.permissions.is_empty() => {
                        *item = Value::Reference(nested.id.clone());
                        Ok(())
                    }
                    Some(existing) => {
                        authorize(auth, Action::Update, related, Some(&existing))?;
                        check_grants(auth, &nested.permissions, self.max_roles)?;
                        let mut merged = existing;
                        merged.fields.extend(nested.fields.clone());
                        apply_structure(related, &mut merged)
                    }
                }
            }
            other => Err(SchemaError::InvalidValue(format!(
                "relationship '{key}' expects documents or ids, got {}",
                other.type_name()
            ))),
        }
    }

    async fn existing(
        &self,
        related: &Collection,
        id: &str,
    ) -> Result<Option<Document>, SchemaError> {
        Ok(self
            .store
            .get_document(self.database_id, &related.id, id)
            .await?)
    }
}

/// Queues the nested documents under `document`'s relationship fields.
fn push_nested<'d>(
    stack: &mut Vec<Frame<'d>>,
    document: &'d mut Document,
    related_by_key: &HashMap<String, String>,
    depth: usize,
    ancestors: &[DocumentKey],
) {
    for (key, value) in document.fields.iter_mut() {
        let Some(related) = related_by_key.get(key) else {
            continue;
        };
        let nested: Vec<&'d mut Document> = match value {
            Value::Document(nested) => vec![nested.as_mut()],
            Value::List(items) => items
                .iter_mut()
                .filter_map(|item| match item {
                    Value::Document(nested) => Some(nested.as_mut()),
                    _ => None,
                })
                .collect(),
            _ => Vec::new(),
        };
        stack.extend(nested.into_iter().map(|document| {
            let mut chain = ancestors.to_vec();
            chain.push((related.clone(), document.id.clone()));
            Frame {
                document,
                collection_id: related.clone(),
                depth: depth + 1,
                ancestors: chain,
            }
        }));
    }
}

#[cfg(test)]
mod tests {
    use super::{Resolver, authorize, check_grants};
    use crate::authorization::Authorization;
    use crate::catalog::{Collection, Document, Value};
    use crate::permission::{Action, Permission, PermissionSet};
    use crate::role::Role;
    use crate::storage::MemoryStore;

    fn collection(id: &str, document_security: bool, permissions: &[&str]) -> Collection {
        Collection {
            id: id.into(),
            internal_id: 1,
            database_id: "db".into(),
            name: id.into(),
            enabled: true,
            document_security,
            attributes: Vec::new(),
            indexes: Vec::new(),
            permissions: PermissionSet::new(
                permissions
                    .iter()
                    .map(|p| Permission::parse(p).expect("permission")),
            ),
        }
    }

    #[test]
    fn document_grants_count_only_with_document_security() {
        let auth = Authorization::new([Role::user("u1")]);
        let doc = Document::new("d1").with_permissions(PermissionSet::new([Permission::read(
            Role::user("u1"),
        )]));
        let secured = collection("notes", true, &[]);
        let plain = collection("notes", false, &[]);
        assert!(authorize(&auth, Action::Read, &secured, Some(&doc)).is_ok());
        assert!(authorize(&auth, Action::Read, &plain, Some(&doc)).is_err());
        assert!(authorize(&auth, Action::Read, &secured, None).is_err());
    }

    #[test]
    fn grants_are_limited_to_held_roles() {
        let auth = Authorization::new([Role::Any, Role::user("u1")]);
        let own = PermissionSet::new([Permission::read(Role::user("u1"))]);
        let foreign = PermissionSet::new([Permission::read(Role::user("u2"))]);
        assert!(check_grants(&auth, &own, 10).is_ok());
        assert!(check_grants(&auth, &foreign, 10).is_err());
        assert!(check_grants(&auth, &own, 0).is_err());
        assert!(check_grants(&Authorization::privileged(), &foreign, 10).is_ok());
    }

    #[tokio::test]
    async fn plain_documents_are_only_stamped() {
        let store = MemoryStore::new();
        let notes = collection("notes", false, &["read:any"]);
        let mut resolver = Resolver::new(&store, "db", 3);
        let original = Document::new("n1")
            .with_field("title", "hello")
            .with_field("views", 4i64);
        let mut doc = original.clone();
        resolver
            .process_document(&Authorization::default(), &notes, &mut doc)
            .await
            .expect("process");
        assert_eq!(doc.database_id, "db");
        assert_eq!(doc.collection_id, "notes");
        assert_eq!(doc.fields, original.fields);
        assert_eq!(doc.permissions, original.permissions);
        assert_eq!(doc.field("title"), Some(&Value::from("hello")));
    }
}
