use crate::catalog::types::{AttributeType, Value};
use serde::{Deserialize, Serialize};

/// Lifecycle stage of an attribute or index.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum Status {
    Processing,
    Available,
    Failed,
    Deleting,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusEvent {
    WorkerSucceeded,
    WorkerFailed,
    DeleteRequested,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    To(Status),
    Removed,
}

impl Status {
    pub fn as_str(self) -> &'static str {
        match self {
            Status::Processing => "processing",
            Status::Available => "available",
            Status::Failed => "failed",
            Status::Deleting => "deleting",
        }
    }

    /// The only legal moves: `processing -> available | failed`,
    /// `available -> deleting`, `deleting -> removed`.
    pub fn transition(self, event: StatusEvent) -> Option<Transition> {
        match (self, event) {
            (Status::Processing, StatusEvent::WorkerSucceeded) => {
                Some(Transition::To(Status::Available))
            }
            (Status::Processing, StatusEvent::WorkerFailed) => Some(Transition::To(Status::Failed)),
            (Status::Available, StatusEvent::DeleteRequested) => {
                Some(Transition::To(Status::Deleting))
            }
            (Status::Deleting, StatusEvent::WorkerSucceeded) => Some(Transition::Removed),
            _ => None,
        }
    }
}

impl std::fmt::Display for Status {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum Format {
    Email,
    Enum,
    Ip,
    Url,
    IntRange,
    FloatRange,
}

impl Format {
    pub fn as_str(self) -> &'static str {
        match self {
            Format::Email => "email",
            Format::Enum => "enum",
            Format::Ip => "ip",
            Format::Url => "url",
            Format::IntRange => "intRange",
            Format::FloatRange => "floatRange",
        }
    }

    /// The attribute type this format can decorate.
    pub fn attribute_type(self) -> AttributeType {
        match self {
            Format::Email | Format::Enum | Format::Ip | Format::Url => AttributeType::String,
            Format::IntRange => AttributeType::Integer,
            Format::FloatRange => AttributeType::Float,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum FormatOptions {
    IntRange { min: i64, max: i64 },
    FloatRange { min: f64, max: f64 },
    Enum { elements: Vec<String> },
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum RelationType {
    OneToOne,
    OneToMany,
    ManyToOne,
    ManyToMany,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum OnDelete {
    Cascade,
    Restrict,
    SetNull,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum Side {
    Parent,
    Child,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RelationshipOptions {
    pub related_collection: String,
    pub relation_type: RelationType,
    pub two_way: bool,
    pub two_way_key: String,
    pub on_delete: OnDelete,
    pub side: Side,
}

impl RelationshipOptions {
    /// Whether the attribute holding these options stores a list of documents.
    pub fn is_many(&self) -> bool {
        match (self.side, self.relation_type) {
            (_, RelationType::ManyToMany) => true,
            (_, RelationType::OneToOne) => false,
            (Side::Parent, RelationType::OneToMany) | (Side::Child, RelationType::ManyToOne) => {
                true
            }
            (Side::Parent, RelationType::ManyToOne) | (Side::Child, RelationType::OneToMany) => {
                false
            }
        }
    }

    /// Options of the reciprocal attribute stored on the related collection.
    pub fn mirrored(&self, key: &str, collection_id: &str) -> Self {
        Self {
            related_collection: collection_id.to_string(),
            relation_type: self.relation_type,
            two_way: self.two_way,
            two_way_key: key.to_string(),
            on_delete: self.on_delete,
            side: match self.side {
                Side::Parent => Side::Child,
                Side::Child => Side::Parent,
            },
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Attribute {
    pub id: String,
    pub key: String,
    pub attr_type: AttributeType,
    pub size: u64,
    pub required: bool,
    pub array: bool,
    #[serde(default)]
    pub default: Option<Value>,
    #[serde(default)]
    pub format: Option<Format>,
    #[serde(default)]
    pub format_options: Option<FormatOptions>,
    #[serde(default)]
    pub filters: Vec<String>,
    pub status: Status,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub options: Option<RelationshipOptions>,
}

impl Attribute {
    pub fn is_relationship(&self) -> bool {
        self.attr_type == AttributeType::Relationship
    }

    pub fn relationship(&self) -> Option<&RelationshipOptions> {
        self.options
            .as_ref()
            .filter(|_| self.attr_type == AttributeType::Relationship)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum IndexType {
    Key,
    Unique,
    Fulltext,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum IndexOrder {
    Asc,
    Desc,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Index {
    pub id: String,
    pub key: String,
    pub index_type: IndexType,
    pub attributes: Vec<String>,
    pub lengths: Vec<Option<u64>>,
    pub orders: Vec<Option<IndexOrder>>,
    pub status: Status,
    #[serde(default)]
    pub error: Option<String>,
}
