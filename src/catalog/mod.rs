pub mod schema;
pub mod types;

pub use schema::{
    Attribute, Format, FormatOptions, Index, IndexOrder, IndexType, OnDelete, RelationType,
    RelationshipOptions, Side, Status, StatusEvent, Transition,
};
pub use types::{AttributeType, Document, Value};

use crate::permission::PermissionSet;
use serde::{Deserialize, Serialize};

/// Deterministic id for an attribute or index record. Repeated creation of the
/// same key collides on this id instead of producing duplicates.
pub fn element_id(database_internal_id: u64, collection_internal_id: u64, key: &str) -> String {
    format!("{database_internal_id}_{collection_internal_id}_{key}")
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Database {
    pub id: String,
    pub internal_id: u64,
    pub name: String,
    #[serde(default = "default_true")]
    pub enabled: bool,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Collection {
    pub id: String,
    pub internal_id: u64,
    pub database_id: String,
    pub name: String,
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub document_security: bool,
    #[serde(default)]
    pub attributes: Vec<Attribute>,
    #[serde(default)]
    pub indexes: Vec<Index>,
    #[serde(default)]
    pub permissions: PermissionSet,
}

impl Collection {
    pub fn attribute(&self, key: &str) -> Option<&Attribute> {
        self.attributes.iter().find(|a| a.key == key)
    }

    pub fn index(&self, key: &str) -> Option<&Index> {
        self.indexes.iter().find(|i| i.key == key)
    }

    /// Available relationship attributes, the ones traversal follows.
    pub fn relationships(&self) -> impl Iterator<Item = (&Attribute, &RelationshipOptions)> {
        self.attributes
            .iter()
            .filter(|a| a.status == Status::Available)
            .filter_map(|a| a.relationship().map(|options| (a, options)))
    }
}
