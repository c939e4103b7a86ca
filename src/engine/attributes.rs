use super::{SchemaEngine, WorkerOutcome, ensure_privileged};
use crate::authorization::Authorization;
use crate::catalog::{
    Attribute, AttributeType, Collection, Database, RelationshipOptions, Side, Status,
    StatusEvent, Transition, element_id,
};
use crate::declarative::{
    AttributeSpec, AttributeUpdate, validate_default, validate_format_options, validate_key,
};
use crate::error::{ResourceType, SchemaError};
use crate::events::{SchemaElement, SchemaEventKind};
use crate::permission::Action;
use crate::storage::DocumentStore;
use tracing::{info, warn};

/// Outcome of writing a relationship attribute and its mirror.
///
/// The two records live on different collections and no transaction spans
/// both, so a failed mirror write is undone by deleting the primary record.
#[derive(Debug)]
pub enum MirrorWrite {
    /// `mirror` is `None` for one-way relationships.
    Created {
        primary: Attribute,
        mirror: Option<Attribute>,
    },
    /// The mirror write failed with `cause`. `compensated` tells whether the
    /// primary record was removed again; when it is false the primary is left
    /// orphaned in `processing`.
    PrimaryOnly {
        primary: Attribute,
        compensated: bool,
        cause: SchemaError,
    },
}

impl<S: DocumentStore> SchemaEngine<S> {
    /// Records a new attribute in `processing` and queues its physical
    /// creation. Relationship attributes go through [`Self::create_relationship`];
    /// a failed mirror write surfaces as its cause.
    pub async fn create_attribute(
        &self,
        auth: &Authorization,
        database_id: &str,
        collection_id: &str,
        spec: AttributeSpec,
    ) -> Result<Attribute, SchemaError> {
        if spec.attr_type == AttributeType::Relationship {
            return match self
                .create_relationship(auth, database_id, collection_id, spec)
                .await?
            {
                MirrorWrite::Created { primary, .. } => Ok(primary),
                MirrorWrite::PrimaryOnly { cause, .. } => Err(cause),
            };
        }

        ensure_privileged(auth, "create attribute")?;
        spec.validate(self.config.max_string_size)?;
        let database = self.load_database(database_id).await?;
        let collection = self.load_collection(database_id, collection_id).await?;

        let attribute = Attribute {
            id: element_id(database.internal_id, collection.internal_id, &spec.key),
            key: spec.key,
            attr_type: spec.attr_type,
            size: spec.size,
            required: spec.required,
            array: spec.array,
            default: spec.default.filter(|d| !d.is_null()),
            format: spec.format,
            format_options: spec.format_options,
            filters: spec.filters,
            status: Status::Processing,
            error: None,
            options: None,
        };
        let attribute = self.insert_attribute(&collection, attribute).await?;
        self.purge(database_id, collection_id).await?;
        self.notify(
            SchemaEventKind::CreateAttribute,
            database_id,
            collection_id,
            SchemaElement::Attribute(attribute.clone()),
        );
        info!(
            database_id,
            collection_id,
            key = %attribute.key,
            attr_type = attribute.attr_type.as_str(),
            "attribute created"
        );
        Ok(attribute)
    }

    /// Creates a relationship attribute on `collection_id`, plus its mirror on
    /// the related collection when the relationship is two-way.
    pub async fn create_relationship(
        &self,
        auth: &Authorization,
        database_id: &str,
        collection_id: &str,
        spec: AttributeSpec,
    ) -> Result<MirrorWrite, SchemaError> {
        ensure_privileged(auth, "create attribute")?;
        spec.validate(self.config.max_string_size)?;
        let Some(relationship) = spec.relationship.clone() else {
            return Err(SchemaError::InvalidValue(format!(
                "attribute '{}' is not a relationship",
                spec.key
            )));
        };
        let database = self.load_database(database_id).await?;
        let collection = self.load_collection(database_id, collection_id).await?;
        let related = self
            .load_collection(database_id, &relationship.related_collection)
            .await?;

        let two_way_key = relationship
            .two_way_key
            .clone()
            .unwrap_or_else(|| collection.id.clone());
        if relationship.two_way {
            if related.id == collection.id && two_way_key == spec.key {
                return Err(SchemaError::InvalidValue(format!(
                    "self relationship '{}' needs a distinct two-way key",
                    spec.key
                )));
            }
            if related.attribute(&two_way_key).is_some() {
                return Err(SchemaError::AlreadyExists {
                    resource_type: ResourceType::Attribute,
                    resource_id: two_way_key,
                });
            }
        }

        let options = RelationshipOptions {
            related_collection: related.id.clone(),
            relation_type: relationship.relation_type,
            two_way: relationship.two_way,
            two_way_key: two_way_key.clone(),
            on_delete: relationship.on_delete,
            side: Side::Parent,
        };
        let self_relationship = related.id == collection.id;
        if relationship.two_way && self_relationship {
            self.ensure_room(&collection, 2)?;
        } else {
            self.ensure_room(&collection, 1)?;
            if relationship.two_way {
                self.ensure_room(&related, 1)?;
            }
        }

        let primary = relationship_record(&database, &collection, &spec.key, options.clone());
        let primary = self.insert_attribute(&collection, primary).await?;

        if !relationship.two_way {
            self.purge(database_id, collection_id).await?;
            self.notify(
                SchemaEventKind::CreateAttribute,
                database_id,
                collection_id,
                SchemaElement::Attribute(primary.clone()),
            );
            info!(database_id, collection_id, key = %primary.key, "relationship created");
            return Ok(MirrorWrite::Created {
                primary,
                mirror: None,
            });
        }

        let mut related = related;
        if self_relationship {
            related.attributes.push(primary.clone());
        }
        let mirror = relationship_record(
            &database,
            &related,
            &two_way_key,
            options.mirrored(&primary.key, &collection.id),
        );
        match self.insert_attribute(&related, mirror).await {
            Ok(mirror) => {
                self.purge(database_id, collection_id).await?;
                self.purge(database_id, &related.id).await?;
                self.notify(
                    SchemaEventKind::CreateAttribute,
                    database_id,
                    collection_id,
                    SchemaElement::Attribute(primary.clone()),
                );
                self.notify(
                    SchemaEventKind::CreateAttribute,
                    database_id,
                    &related.id,
                    SchemaElement::Attribute(mirror.clone()),
                );
                info!(
                    database_id,
                    collection_id,
                    related_collection = %related.id,
                    key = %primary.key,
                    two_way_key = %mirror.key,
                    "two-way relationship created"
                );
                Ok(MirrorWrite::Created {
                    primary,
                    mirror: Some(mirror),
                })
            }
            Err(cause) => {
                let compensated = match self
                    .store
                    .delete_attribute(database_id, collection_id, &primary.key)
                    .await
                {
                    Ok(()) => true,
                    Err(err) => {
                        warn!(
                            database_id,
                            collection_id,
                            key = %primary.key,
                            error = %err,
                            "compensating delete failed, primary relationship left in processing"
                        );
                        false
                    }
                };
                warn!(
                    database_id,
                    collection_id,
                    related_collection = %related.id,
                    key = %primary.key,
                    compensated,
                    error = %cause,
                    "mirror relationship write failed"
                );
                self.purge_quietly(database_id, collection_id).await;
                self.purge_quietly(database_id, &related.id).await;
                Ok(MirrorWrite::PrimaryOnly {
                    primary,
                    compensated,
                    cause,
                })
            }
        }
    }

    /// Changes an available attribute. A rename is a delete of the old record
    /// followed by a create under the new id, rolled back when the create
    /// fails. `on_delete` and renames carry over to a two-way mirror.
    pub async fn update_attribute(
        &self,
        auth: &Authorization,
        database_id: &str,
        collection_id: &str,
        key: &str,
        update: AttributeUpdate,
    ) -> Result<Attribute, SchemaError> {
        ensure_privileged(auth, "update attribute")?;
        let database = self.load_database(database_id).await?;
        let collection = self.load_collection(database_id, collection_id).await?;
        let current = collection
            .attribute(key)
            .cloned()
            .ok_or_else(|| SchemaError::not_found(ResourceType::Attribute, key))?;

        if current.status != Status::Available {
            return Err(SchemaError::NotAvailable {
                resource_type: ResourceType::Attribute,
                resource_id: key.to_string(),
                status: current.status,
            });
        }
        if update.attr_type != current.attr_type {
            return Err(SchemaError::TypeMismatch {
                attribute: key.to_string(),
                expected: current.attr_type.to_string(),
                actual: update.attr_type.to_string(),
            });
        }
        if update.format != current.format {
            let name = |f: Option<crate::catalog::Format>| f.map_or("none", |f| f.as_str());
            return Err(SchemaError::TypeMismatch {
                attribute: key.to_string(),
                expected: name(current.format).to_string(),
                actual: name(update.format).to_string(),
            });
        }

        let next = self.apply_update(&current, &update)?;
        let new_key = update.new_key.as_deref().filter(|k| *k != key);

        let updated = match new_key {
            None => self
                .store
                .update_attribute(database_id, collection_id, next)
                .await
                .map_err(|e| SchemaError::from_store(e, ResourceType::Attribute, key))?,
            Some(new_key) => {
                validate_key("attribute", new_key)?;
                if collection.attribute(new_key).is_some() {
                    return Err(SchemaError::AlreadyExists {
                        resource_type: ResourceType::Attribute,
                        resource_id: new_key.to_string(),
                    });
                }
                let renamed = Attribute {
                    id: element_id(database.internal_id, collection.internal_id, new_key),
                    key: new_key.to_string(),
                    ..next
                };
                self.rename_attribute(database_id, collection_id, &current, renamed)
                    .await?
            }
        };

        if let Some(options) = updated.relationship()
            && let Some((related, mut mirror)) = self.load_mirror(database_id, options).await?
            && let Some(mirror_options) = mirror.options.as_mut()
        {
            mirror_options.on_delete = options.on_delete;
            mirror_options.two_way_key = updated.key.clone();
            if let Err(err) = self
                .store
                .update_attribute(database_id, &related.id, mirror)
                .await
            {
                let cause =
                    SchemaError::from_store(err, ResourceType::Attribute, &options.two_way_key);
                let restored = if updated.key == current.key {
                    self.store
                        .update_attribute(database_id, collection_id, current.clone())
                        .await
                        .map(|_| ())
                        .map_err(SchemaError::from)
                } else {
                    self.rename_attribute(database_id, collection_id, &updated, current.clone())
                        .await
                        .map(|_| ())
                };
                warn!(
                    database_id,
                    collection_id,
                    related_collection = %related.id,
                    key,
                    restored = restored.is_ok(),
                    error = %cause,
                    "mirror relationship update failed"
                );
                self.purge_quietly(database_id, collection_id).await;
                return Err(cause);
            }
            self.purge(database_id, &related.id).await?;
        }

        self.purge(database_id, collection_id).await?;
        self.notify(
            SchemaEventKind::UpdateAttribute,
            database_id,
            collection_id,
            SchemaElement::Attribute(updated.clone()),
        );
        info!(database_id, collection_id, key, new_key = %updated.key, "attribute updated");
        Ok(updated)
    }

    fn apply_update(
        &self,
        current: &Attribute,
        update: &AttributeUpdate,
    ) -> Result<Attribute, SchemaError> {
        let key = current.key.as_str();
        let mut next = current.clone();
        if let Some(required) = update.required {
            next.required = required;
        }
        if let Some(default) = &update.default {
            next.default = Some(default.clone()).filter(|d| !d.is_null());
        }
        if let Some(size) = update.size {
            if current.attr_type != AttributeType::String {
                return Err(SchemaError::InvalidValue(format!(
                    "size can only change on string attributes, '{key}' is {}",
                    current.attr_type
                )));
            }
            if size < current.size {
                return Err(SchemaError::TruncateUnsupported {
                    attribute: key.to_string(),
                    from: current.size,
                    to: size,
                });
            }
            if size > self.config.max_string_size {
                return Err(SchemaError::InvalidValue(format!(
                    "size of string attribute '{key}' must be at most {}",
                    self.config.max_string_size
                )));
            }
            next.size = size;
        }
        if let Some(options) = &update.format_options {
            next.format_options = Some(options.clone());
            validate_format_options(key, next.format, next.format_options.as_ref())?;
        }
        match (update.on_delete, next.options.as_mut()) {
            (Some(on_delete), Some(options)) => options.on_delete = on_delete,
            (Some(_), None) => {
                return Err(SchemaError::InvalidValue(format!(
                    "on-delete behavior only applies to relationships, '{key}' is {}",
                    current.attr_type
                )));
            }
            (None, _) => {}
        }

        if next.default.is_some() && next.required {
            return Err(SchemaError::InvalidValue(format!(
                "cannot set default value for required attribute '{key}'"
            )));
        }
        if next.default.is_some() && next.array {
            return Err(SchemaError::InvalidValue(format!(
                "cannot set default value for array attribute '{key}'"
            )));
        }
        validate_default(
            key,
            next.attr_type,
            next.size,
            next.format_options.as_ref(),
            next.default.as_ref(),
        )?;
        Ok(next)
    }

    async fn rename_attribute(
        &self,
        database_id: &str,
        collection_id: &str,
        original: &Attribute,
        renamed: Attribute,
    ) -> Result<Attribute, SchemaError> {
        self.store
            .delete_attribute(database_id, collection_id, &original.key)
            .await
            .map_err(|e| SchemaError::from_store(e, ResourceType::Attribute, &original.key))?;

        let new_key = renamed.key.clone();
        match self
            .store
            .create_attribute(database_id, collection_id, renamed)
            .await
        {
            Ok(created) => Ok(created),
            Err(err) => {
                if let Err(rollback) = self
                    .store
                    .create_attribute(database_id, collection_id, original.clone())
                    .await
                {
                    warn!(
                        database_id,
                        collection_id,
                        key = %original.key,
                        error = %rollback,
                        "failed to restore attribute after rename failure"
                    );
                } else {
                    warn!(
                        database_id,
                        collection_id,
                        key = %original.key,
                        new_key = %new_key,
                        "attribute rename rolled back"
                    );
                }
                self.purge_quietly(database_id, collection_id).await;
                Err(SchemaError::from_store(err, ResourceType::Attribute, &new_key))
            }
        }
    }

    /// Moves an available attribute to `deleting` and queues its physical
    /// removal; a two-way mirror follows. A failed attribute is removed at
    /// once since nothing physical exists for it.
    pub async fn delete_attribute(
        &self,
        auth: &Authorization,
        database_id: &str,
        collection_id: &str,
        key: &str,
    ) -> Result<Attribute, SchemaError> {
        ensure_privileged(auth, "delete attribute")?;
        let collection = self.load_collection(database_id, collection_id).await?;
        let mut attribute = collection
            .attribute(key)
            .cloned()
            .ok_or_else(|| SchemaError::not_found(ResourceType::Attribute, key))?;

        match attribute.status.transition(StatusEvent::DeleteRequested) {
            Some(Transition::To(status)) => attribute.status = status,
            _ if attribute.status == Status::Failed => {
                self.store
                    .delete_attribute(database_id, collection_id, key)
                    .await
                    .map_err(|e| SchemaError::from_store(e, ResourceType::Attribute, key))?;
                self.purge(database_id, collection_id).await?;
                info!(database_id, collection_id, key, "failed attribute removed");
                return Ok(attribute);
            }
            _ => {
                return Err(SchemaError::NotAvailable {
                    resource_type: ResourceType::Attribute,
                    resource_id: key.to_string(),
                    status: attribute.status,
                });
            }
        }

        let attribute = self
            .store
            .update_attribute(database_id, collection_id, attribute)
            .await
            .map_err(|e| SchemaError::from_store(e, ResourceType::Attribute, key))?;

        if let Some(options) = attribute.relationship()
            && let Some((related, mut mirror)) = self.load_mirror(database_id, options).await?
        {
            match mirror.status.transition(StatusEvent::DeleteRequested) {
                Some(Transition::To(status)) => {
                    mirror.status = status;
                    let mirror = self
                        .store
                        .update_attribute(database_id, &related.id, mirror)
                        .await
                        .map_err(|e| {
                            SchemaError::from_store(e, ResourceType::Attribute, &options.two_way_key)
                        })?;
                    self.purge(database_id, &related.id).await?;
                    self.notify(
                        SchemaEventKind::DeleteAttribute,
                        database_id,
                        &related.id,
                        SchemaElement::Attribute(mirror),
                    );
                }
                _ => warn!(
                    database_id,
                    collection_id = %related.id,
                    key = %mirror.key,
                    status = %mirror.status,
                    "mirror relationship not deletable, left as is"
                ),
            }
        }

        self.purge(database_id, collection_id).await?;
        self.notify(
            SchemaEventKind::DeleteAttribute,
            database_id,
            collection_id,
            SchemaElement::Attribute(attribute.clone()),
        );
        info!(database_id, collection_id, key, "attribute marked for deletion");
        Ok(attribute)
    }

    /// Applies the worker's report for one attribute. Returns `None` when the
    /// record was removed.
    pub async fn complete_attribute(
        &self,
        auth: &Authorization,
        database_id: &str,
        collection_id: &str,
        key: &str,
        outcome: WorkerOutcome,
    ) -> Result<Option<Attribute>, SchemaError> {
        ensure_privileged(auth, "complete attribute")?;
        let collection = self.load_collection(database_id, collection_id).await?;
        let mut attribute = collection
            .attribute(key)
            .cloned()
            .ok_or_else(|| SchemaError::not_found(ResourceType::Attribute, key))?;

        let from = attribute.status;
        let result = match from.transition(outcome.event()) {
            Some(Transition::To(status)) => {
                attribute.status = status;
                attribute.error = outcome.message();
                let updated = self
                    .store
                    .update_attribute(database_id, collection_id, attribute)
                    .await
                    .map_err(|e| SchemaError::from_store(e, ResourceType::Attribute, key))?;
                Some(updated)
            }
            Some(Transition::Removed) => {
                self.store
                    .delete_attribute(database_id, collection_id, key)
                    .await
                    .map_err(|e| SchemaError::from_store(e, ResourceType::Attribute, key))?;
                None
            }
            None => {
                return Err(SchemaError::NotAvailable {
                    resource_type: ResourceType::Attribute,
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
            to = result.as_ref().map_or("removed", |a| a.status.as_str()),
            "attribute status changed"
        );
        Ok(result)
    }

    pub async fn list_attributes(
        &self,
        auth: &Authorization,
        database_id: &str,
        collection_id: &str,
    ) -> Result<Vec<Attribute>, SchemaError> {
        let collection = self.readable_collection(auth, database_id, collection_id).await?;
        Ok(collection.attributes)
    }

    pub async fn get_attribute(
        &self,
        auth: &Authorization,
        database_id: &str,
        collection_id: &str,
        key: &str,
    ) -> Result<Attribute, SchemaError> {
        let collection = self.readable_collection(auth, database_id, collection_id).await?;
        collection
            .attribute(key)
            .cloned()
            .ok_or_else(|| SchemaError::not_found(ResourceType::Attribute, key))
    }

    async fn insert_attribute(
        &self,
        collection: &Collection,
        attribute: Attribute,
    ) -> Result<Attribute, SchemaError> {
        if collection.attribute(&attribute.key).is_some() {
            return Err(SchemaError::AlreadyExists {
                resource_type: ResourceType::Attribute,
                resource_id: attribute.key,
            });
        }
        self.ensure_room(collection, 1)?;
        let key = attribute.key.clone();
        self.store
            .create_attribute(&collection.database_id, &collection.id, attribute)
            .await
            .map_err(|e| SchemaError::from_store(e, ResourceType::Attribute, &key))
    }

    /// Whether `collection` can take `count` more attribute records.
    fn ensure_room(&self, collection: &Collection, count: usize) -> Result<(), SchemaError> {
        let max = self.config.max_attributes_per_collection;
        if collection.attributes.len() + count > max {
            return Err(SchemaError::LimitExceeded {
                resource_type: ResourceType::Attribute,
                message: format!(
                    "collection '{}' has {} of {max} attributes, {count} more requested",
                    collection.id,
                    collection.attributes.len()
                ),
            });
        }
        Ok(())
    }

    pub(super) async fn readable_collection(
        &self,
        auth: &Authorization,
        database_id: &str,
        collection_id: &str,
    ) -> Result<Collection, SchemaError> {
        let collection = self.visible_collection(auth, database_id, collection_id).await?;
        auth.check(Action::Read, collection.permissions.roles_for(Action::Read))?;
        Ok(collection)
    }
}

fn relationship_record(
    database: &Database,
    collection: &Collection,
    key: &str,
    options: RelationshipOptions,
) -> Attribute {
    Attribute {
        id: element_id(database.internal_id, collection.internal_id, key),
        key: key.to_string(),
        attr_type: AttributeType::Relationship,
        size: 0,
        required: false,
        array: false,
        default: None,
        format: None,
        format_options: None,
        filters: Vec::new(),
        status: Status::Processing,
        error: None,
        options: Some(options),
    }
}
