//! Schema mutation engine.
//!
//! Orchestrates database, collection, attribute, index and document changes
//! over a [`DocumentStore`]. Schema elements are persisted as intents in
//! `processing` and a physical-change event is enqueued for the external
//! worker, which later reports back through `complete_attribute` and
//! `complete_index`.

mod attributes;
mod documents;
mod indexes;

pub use attributes::MirrorWrite;
pub use documents::DocumentList;
pub(crate) use documents::apply_structure;

use crate::authorization::Authorization;
use crate::catalog::{Collection, Database, RelationshipOptions, Status, StatusEvent};
use crate::config::EngineConfig;
use crate::declarative::{CollectionSpec, validate_key};
use crate::error::{ResourceType, SchemaError};
use crate::events::{EventSink, SchemaElement, SchemaEvent, SchemaEventKind};
use crate::permission::{Action, PermissionSet};
use crate::storage::DocumentStore;
use std::sync::Arc;
use tracing::{info, warn};

/// What the worker reports after applying a physical change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkerOutcome {
    Succeeded,
    Failed(String),
}

impl WorkerOutcome {
    fn event(&self) -> StatusEvent {
        match self {
            WorkerOutcome::Succeeded => StatusEvent::WorkerSucceeded,
            WorkerOutcome::Failed(_) => StatusEvent::WorkerFailed,
        }
    }

    fn message(&self) -> Option<String> {
        match self {
            WorkerOutcome::Succeeded => None,
            WorkerOutcome::Failed(message) => Some(message.clone()),
        }
    }
}

pub struct SchemaEngine<S> {
    store: Arc<S>,
    events: Arc<dyn EventSink>,
    config: EngineConfig,
}

impl<S: DocumentStore> SchemaEngine<S> {
    pub fn new(store: Arc<S>, events: Arc<dyn EventSink>, config: EngineConfig) -> Self {
        Self {
            store,
            events,
            config,
        }
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub async fn create_database(
        &self,
        auth: &Authorization,
        database_id: &str,
        name: &str,
    ) -> Result<Database, SchemaError> {
        ensure_privileged(auth, "create database")?;
        validate_key("database", database_id)?;
        let database = self
            .store
            .create_database(Database {
                id: database_id.to_string(),
                internal_id: 0,
                name: name.to_string(),
                enabled: true,
            })
            .await
            .map_err(|e| SchemaError::from_store(e, ResourceType::Database, database_id))?;
        info!(database_id, internal_id = database.internal_id, "database created");
        Ok(database)
    }

    pub async fn get_database(
        &self,
        auth: &Authorization,
        database_id: &str,
    ) -> Result<Database, SchemaError> {
        let database = self.load_database(database_id).await?;
        if !database.enabled && auth.is_enabled() {
            return Err(SchemaError::not_found(ResourceType::Database, database_id));
        }
        Ok(database)
    }

    pub async fn create_collection(
        &self,
        auth: &Authorization,
        database_id: &str,
        spec: CollectionSpec,
    ) -> Result<Collection, SchemaError> {
        ensure_privileged(auth, "create collection")?;
        validate_key("collection", &spec.id)?;
        self.load_database(database_id).await?;

        let count = self.store.count_collections(database_id).await?;
        if count >= self.config.max_collections_per_database {
            return Err(SchemaError::LimitExceeded {
                resource_type: ResourceType::Collection,
                message: format!(
                    "database '{database_id}' already has {count} collections, the maximum is {}",
                    self.config.max_collections_per_database
                ),
            });
        }
        let permissions =
            PermissionSet::from_raw(&spec.permissions, &Action::ALL, Some(self.config.max_roles))?;

        let collection = self
            .store
            .create_collection(
                database_id,
                Collection {
                    id: spec.id.clone(),
                    internal_id: 0,
                    database_id: database_id.to_string(),
                    name: spec.name,
                    enabled: spec.enabled,
                    document_security: spec.document_security,
                    attributes: Vec::new(),
                    indexes: Vec::new(),
                    permissions,
                },
            )
            .await
            .map_err(|e| SchemaError::from_store(e, ResourceType::Collection, &spec.id))?;
        info!(
            database_id,
            collection_id = %collection.id,
            internal_id = collection.internal_id,
            "collection created"
        );
        Ok(collection)
    }

    /// Reads a collection definition. Needs collection-level read unless the
    /// context is bypassed; disabled collections are hidden the same way.
    pub async fn get_collection(
        &self,
        auth: &Authorization,
        database_id: &str,
        collection_id: &str,
    ) -> Result<Collection, SchemaError> {
        self.readable_collection(auth, database_id, collection_id)
            .await
    }

    pub async fn list_collections(
        &self,
        auth: &Authorization,
        database_id: &str,
    ) -> Result<Vec<Collection>, SchemaError> {
        ensure_privileged(auth, "list collections")?;
        self.load_database(database_id).await?;
        Ok(self.store.list_collections(database_id).await?)
    }

    pub async fn update_collection(
        &self,
        auth: &Authorization,
        database_id: &str,
        spec: CollectionSpec,
    ) -> Result<Collection, SchemaError> {
        ensure_privileged(auth, "update collection")?;
        let mut collection = self.load_collection(database_id, &spec.id).await?;
        collection.name = spec.name;
        collection.enabled = spec.enabled;
        collection.document_security = spec.document_security;
        collection.permissions =
            PermissionSet::from_raw(&spec.permissions, &Action::ALL, Some(self.config.max_roles))?;

        let updated = self
            .store
            .update_collection(database_id, collection)
            .await
            .map_err(|e| SchemaError::from_store(e, ResourceType::Collection, &spec.id))?;
        self.purge(database_id, &spec.id).await?;
        Ok(updated)
    }

    /// Removes the collection record and queues physical removal. Relationship
    /// attributes on other collections that point at it start deleting too.
    pub async fn delete_collection(
        &self,
        auth: &Authorization,
        database_id: &str,
        collection_id: &str,
    ) -> Result<(), SchemaError> {
        ensure_privileged(auth, "delete collection")?;
        let collection = self.load_collection(database_id, collection_id).await?;
        self.store
            .delete_collection(database_id, collection_id)
            .await
            .map_err(|e| SchemaError::from_store(e, ResourceType::Collection, collection_id))?;

        for other in self.store.list_collections(database_id).await? {
            let pointing: Vec<_> = other
                .attributes
                .iter()
                .filter(|a| {
                    a.relationship()
                        .is_some_and(|o| o.related_collection == collection_id)
                })
                .cloned()
                .collect();
            for mut attribute in pointing {
                if attribute.status != Status::Available {
                    continue;
                }
                attribute.status = Status::Deleting;
                let attribute = self
                    .store
                    .update_attribute(database_id, &other.id, attribute)
                    .await?;
                self.notify(
                    SchemaEventKind::DeleteAttribute,
                    database_id,
                    &other.id,
                    SchemaElement::Attribute(attribute),
                );
            }
            self.purge(database_id, &other.id).await?;
        }

        self.purge(database_id, collection_id).await?;
        self.notify(
            SchemaEventKind::DeleteCollection,
            database_id,
            collection_id,
            SchemaElement::Collection(collection),
        );
        info!(database_id, collection_id, "collection deleted");
        Ok(())
    }

    async fn load_database(&self, database_id: &str) -> Result<Database, SchemaError> {
        self.store
            .get_database(database_id)
            .await?
            .ok_or_else(|| SchemaError::not_found(ResourceType::Database, database_id))
    }

    async fn load_collection(
        &self,
        database_id: &str,
        collection_id: &str,
    ) -> Result<Collection, SchemaError> {
        self.store
            .get_collection(database_id, collection_id)
            .await?
            .ok_or_else(|| SchemaError::not_found(ResourceType::Collection, collection_id))
    }

    /// Collection lookup for caller-facing reads: disabled databases and
    /// collections are not found unless authorization is bypassed.
    async fn visible_collection(
        &self,
        auth: &Authorization,
        database_id: &str,
        collection_id: &str,
    ) -> Result<Collection, SchemaError> {
        self.get_database(auth, database_id).await?;
        let collection = self.load_collection(database_id, collection_id).await?;
        if !collection.enabled && auth.is_enabled() {
            return Err(SchemaError::not_found(
                ResourceType::Collection,
                collection_id,
            ));
        }
        Ok(collection)
    }

    async fn purge(&self, database_id: &str, collection_id: &str) -> Result<(), SchemaError> {
        self.store
            .purge_cached_collection(database_id, collection_id)
            .await?;
        Ok(())
    }

    /// Purge used on recovery paths, where the original error must win.
    async fn purge_quietly(&self, database_id: &str, collection_id: &str) {
        if let Err(err) = self.purge(database_id, collection_id).await {
            warn!(database_id, collection_id, error = %err, "failed to purge cached collection");
        }
    }

    fn notify(
        &self,
        kind: SchemaEventKind,
        database_id: &str,
        collection_id: &str,
        element: SchemaElement,
    ) {
        self.events.enqueue(SchemaEvent {
            kind,
            project_id: self.config.project_id.clone(),
            database_id: database_id.to_string(),
            collection_id: collection_id.to_string(),
            element,
        });
    }

    /// The mirror record of a two-way relationship, if it still exists.
    async fn load_mirror(
        &self,
        database_id: &str,
        options: &RelationshipOptions,
    ) -> Result<Option<(Collection, crate::catalog::Attribute)>, SchemaError> {
        if !options.two_way {
            return Ok(None);
        }
        let Some(related) = self
            .store
            .get_collection(database_id, &options.related_collection)
            .await?
        else {
            return Ok(None);
        };
        let mirror = related.attribute(&options.two_way_key).cloned();
        Ok(mirror.map(|m| (related, m)))
    }
}

/// Schema changes run only in a bypassed (privileged) context.
fn ensure_privileged(auth: &Authorization, operation: &str) -> Result<(), SchemaError> {
    if auth.is_enabled() {
        return Err(SchemaError::Unauthorized(format!(
            "{operation} requires a privileged context"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::{SchemaEngine, ensure_privileged};
    use crate::authorization::Authorization;
    use crate::config::EngineConfig;
    use crate::declarative::CollectionSpec;
    use crate::error::ErrorCode;
    use crate::events::MemorySink;
    use crate::role::Role;
    use crate::storage::MemoryStore;
    use std::sync::Arc;

    #[test]
    fn privileged_operations_need_bypass() {
        let user = Authorization::new([Role::Any]);
        let err = ensure_privileged(&user, "create attribute").expect_err("denied");
        assert_eq!(err.code(), ErrorCode::Unauthorized);
        let _guard = user.bypass();
        assert!(ensure_privileged(&user, "create attribute").is_ok());
    }

    #[tokio::test]
    async fn collection_count_is_capped() {
        let engine = SchemaEngine::new(
            Arc::new(MemoryStore::new()),
            Arc::new(MemorySink::new()),
            EngineConfig::default().with_max_collections(1),
        );
        let admin = Authorization::privileged();
        engine.create_database(&admin, "db", "Main").await.expect("db");
        engine
            .create_collection(&admin, "db", CollectionSpec::new("posts", "Posts"))
            .await
            .expect("first");
        let err = engine
            .create_collection(&admin, "db", CollectionSpec::new("tags", "Tags"))
            .await
            .expect_err("over cap");
        assert_eq!(err.code(), ErrorCode::LimitExceeded);
    }

    #[tokio::test]
    async fn disabled_collections_are_hidden_from_callers() {
        let engine = SchemaEngine::new(
            Arc::new(MemoryStore::new()),
            Arc::new(MemorySink::new()),
            EngineConfig::default(),
        );
        let admin = Authorization::privileged();
        engine.create_database(&admin, "db", "Main").await.expect("db");
        engine
            .create_collection(
                &admin,
                "db",
                CollectionSpec::new("posts", "Posts")
                    .enabled(false)
                    .permissions(&["read:any"]),
            )
            .await
            .expect("collection");

        let caller = Authorization::new([Role::Any]);
        let err = engine
            .get_collection(&caller, "db", "posts")
            .await
            .expect_err("hidden");
        assert_eq!(err.code(), ErrorCode::CollectionNotFound);
        assert!(engine.get_collection(&admin, "db", "posts").await.is_ok());
    }
}
