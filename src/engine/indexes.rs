use super::{SchemaEngine, WorkerOutcome, ensure_privileged};
use crate::authorization::Authorization;
use crate::catalog::{
    Attribute, AttributeType, Index, IndexType, Status, StatusEvent, Transition, element_id,
};
use crate::declarative::{IndexSpec, validate_key};
use crate::error::{ResourceType, SchemaError};
use crate::events::{SchemaElement, SchemaEventKind};
use crate::storage::DocumentStore;
use std::collections::BTreeSet;
use tracing::info;

const ID_LENGTH: u64 = 36;

/// Attributes every document carries without being declared.
fn synthetic_attribute(key: &str) -> Option<Attribute> {
    let (attr_type, size) = match key {
        "$id" => (AttributeType::String, ID_LENGTH),
        "$createdAt" | "$updatedAt" => (AttributeType::Datetime, 0),
        _ => return None,
    };
    Some(Attribute {
        id: key.to_string(),
        key: key.to_string(),
        attr_type,
        size,
        required: true,
        array: false,
        default: None,
        format: None,
        format_options: None,
        filters: Vec::new(),
        status: Status::Available,
        error: None,
        options: None,
    })
}

impl<S: DocumentStore> SchemaEngine<S> {
    /// Records a new index in `processing` and queues its physical creation.
    pub async fn create_index(
        &self,
        auth: &Authorization,
        database_id: &str,
        collection_id: &str,
        spec: IndexSpec,
    ) -> Result<Index, SchemaError> {
        ensure_privileged(auth, "create index")?;
        validate_key("index", &spec.key)?;
        let database = self.load_database(database_id).await?;
        let collection = self.load_collection(database_id, collection_id).await?;

        if collection.index(&spec.key).is_some() {
            return Err(SchemaError::AlreadyExists {
                resource_type: ResourceType::Index,
                resource_id: spec.key,
            });
        }
        let limit = self.store.limit_for_indexes();
        if collection.indexes.len() >= limit {
            return Err(SchemaError::LimitExceeded {
                resource_type: ResourceType::Index,
                message: format!("collection '{collection_id}' already has {limit} indexes"),
            });
        }
        if spec.attributes.is_empty() {
            return Err(SchemaError::InvalidValue(format!(
                "index '{}' needs at least one attribute",
                spec.key
            )));
        }
        if spec.orders.len() > spec.attributes.len() {
            return Err(SchemaError::InvalidValue(format!(
                "index '{}' has more orders than attributes",
                spec.key
            )));
        }

        let mut seen = BTreeSet::new();
        let mut lengths = Vec::with_capacity(spec.attributes.len());
        for key in &spec.attributes {
            if !seen.insert(key.as_str()) {
                return Err(SchemaError::InvalidValue(format!(
                    "index '{}' lists attribute '{key}' twice",
                    spec.key
                )));
            }
            let attribute = match synthetic_attribute(key) {
                Some(attribute) => attribute,
                None => collection
                    .attribute(key)
                    .cloned()
                    .ok_or_else(|| SchemaError::not_found(ResourceType::Attribute, key))?,
            };
            if attribute.is_relationship() {
                return Err(SchemaError::InvalidValue(format!(
                    "cannot index relationship attribute '{key}'"
                )));
            }
            if attribute.status != Status::Available {
                return Err(SchemaError::NotAvailable {
                    resource_type: ResourceType::Attribute,
                    resource_id: key.clone(),
                    status: attribute.status,
                });
            }
            if spec.index_type == IndexType::Fulltext && attribute.attr_type != AttributeType::String
            {
                return Err(SchemaError::InvalidValue(format!(
                    "fulltext index '{}' can only cover string attributes, '{key}' is {}",
                    spec.key, attribute.attr_type
                )));
            }
            lengths.push(key_length(&attribute, self.config.array_index_length));
        }

        let combined: u64 = lengths.iter().flatten().sum();
        let max = self.store.max_index_length();
        if combined > max {
            return Err(SchemaError::InvalidValue(format!(
                "index '{}' key length {combined} exceeds the maximum of {max}",
                spec.key
            )));
        }

        let mut orders = spec.orders;
        orders.resize(spec.attributes.len(), None);
        let index = Index {
            id: element_id(database.internal_id, collection.internal_id, &spec.key),
            key: spec.key.clone(),
            index_type: spec.index_type,
            attributes: spec.attributes,
            lengths,
            orders,
            status: Status::Processing,
            error: None,
        };
        let index = self
            .store
            .create_index(database_id, collection_id, index)
            .await
            .map_err(|e| SchemaError::from_store(e, ResourceType::Index, &spec.key))?;

        self.purge(database_id, collection_id).await?;
        self.notify(
            SchemaEventKind::CreateIndex,
            database_id,
            collection_id,
            SchemaElement::Index(index.clone()),
        );
        info!(database_id, collection_id, key = %index.key, "index created");
        Ok(index)
    }

    /// Moves an available index to `deleting`; a failed one is removed at once.
    pub async fn delete_index(
        &self,
        auth: &Authorization,
        database_id: &str,
        collection_id: &str,
        key: &str,
    ) -> Result<Index, SchemaError> {
        ensure_privileged(auth, "delete index")?;
        let collection = self.load_collection(database_id, collection_id).await?;
        let mut index = collection
            .index(key)
            .cloned()
            .ok_or_else(|| SchemaError::not_found(ResourceType::Index, key))?;

        match index.status.transition(StatusEvent::DeleteRequested) {
            Some(Transition::To(status)) => index.status = status,
            _ if index.status == Status::Failed => {
                self.store
                    .delete_index(database_id, collection_id, key)
                    .await
                    .map_err(|e| SchemaError::from_store(e, ResourceType::Index, key))?;
                self.purge(database_id, collection_id).await?;
                return Ok(index);
            }
            _ => {
                return Err(SchemaError::NotAvailable {
                    resource_type: ResourceType::Index,
                    resource_id: key.to_string(),
                    status: index.status,
                });
            }
        }

        let index = self
            .store
            .update_index(database_id, collection_id, index)
            .await
            .map_err(|e| SchemaError::from_store(e, ResourceType::Index, key))?;
        self.purge(database_id, collection_id).await?;
        self.notify(
            SchemaEventKind::DeleteIndex,
            database_id,
            collection_id,
            SchemaElement::Index(index.clone()),
        );
        info!(database_id, collection_id, key, "index marked for deletion");
        Ok(index)
    }

    /// Applies the worker's report for one index. Returns `None` when the
    /// record was removed.
    pub async fn complete_index(
        &self,
        auth: &Authorization,
        database_id: &str,
        collection_id: &str,
        key: &str,
        outcome: WorkerOutcome,
    ) -> Result<Option<Index>, SchemaError> {
        ensure_privileged(auth, "complete index")?;
        let collection = self.load_collection(database_id, collection_id).await?;
        let mut index = collection
            .index(key)
            .cloned()
            .ok_or_else(|| SchemaError::not_found(ResourceType::Index, key))?;

        let from = index.status;
        let result = match from.transition(outcome.event()) {
            Some(Transition::To(status)) => {
                index.status = status;
                index.error = outcome.message();
                Some(
                    self.store
                        .update_index(database_id, collection_id, index)
                        .await
                        .map_err(|e| SchemaError::from_store(e, ResourceType::Index, key))?,
                )
            }
            Some(Transition::Removed) => {
                self.store
                    .delete_index(database_id, collection_id, key)
                    .await
                    .map_err(|e| SchemaError::from_store(e, ResourceType::Index, key))?;
                None
            }
            None => {
                return Err(SchemaError::NotAvailable {
                    resource_type: ResourceType::Index,
                    resource_id: key.to_string(),
                    status: from,
                });
            }
        };
        self.purge(database_id, collection_id).await?;
        info!(
            database_id,
            collection_id,
            key,
            from = %from,
            to = result.as_ref().map_or("removed", |i| i.status.as_str()),
            "index status changed"
        );
        Ok(result)
    }

    pub async fn list_indexes(
        &self,
        auth: &Authorization,
        database_id: &str,
        collection_id: &str,
    ) -> Result<Vec<Index>, SchemaError> {
        let collection = self.readable_collection(auth, database_id, collection_id).await?;
        Ok(collection.indexes)
    }

    pub async fn get_index(
        &self,
        auth: &Authorization,
        database_id: &str,
        collection_id: &str,
        key: &str,
    ) -> Result<Index, SchemaError> {
        let collection = self.readable_collection(auth, database_id, collection_id).await?;
        collection
            .index(key)
            .cloned()
            .ok_or_else(|| SchemaError::not_found(ResourceType::Index, key))
    }
}

/// Array attributes are truncated to a fixed length, strings use their
/// declared size, everything else is unconstrained.
fn key_length(attribute: &Attribute, array_index_length: u64) -> Option<u64> {
    if attribute.array {
        Some(array_index_length)
    } else if attribute.attr_type == AttributeType::String {
        Some(attribute.size)
    } else {
        None
    }
}
