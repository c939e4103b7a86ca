use crate::permission::PermissionSet;
use compact_str::CompactString;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum AttributeType {
    String,
    Integer,
    Float,
    Boolean,
    Datetime,
    Relationship,
}

impl AttributeType {
    pub fn as_str(self) -> &'static str {
        match self {
            AttributeType::String => "string",
            AttributeType::Integer => "integer",
            AttributeType::Float => "double",
            AttributeType::Boolean => "boolean",
            AttributeType::Datetime => "datetime",
            AttributeType::Relationship => "relationship",
        }
    }
}

impl std::fmt::Display for AttributeType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A field value. Relationship fields hold `Reference`s as stored and
/// `Document`s once resolved or when written as nested documents.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum Value {
    Null,
    Boolean(bool),
    Integer(i64),
    Float(f64),
    Text(CompactString),
    /// Microseconds since the unix epoch.
    Datetime(i64),
    List(Vec<Value>),
    Reference(String),
    Document(Box<Document>),
}

impl Value {
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Boolean(_) => "boolean",
            Value::Integer(_) => "integer",
            Value::Float(_) => "double",
            Value::Text(_) => "string",
            Value::Datetime(_) => "datetime",
            Value::List(_) => "list",
            Value::Reference(_) => "reference",
            Value::Document(_) => "document",
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Integer(v) => Some(*v as f64),
            Value::Float(v) => Some(*v),
            _ => None,
        }
    }

    /// Whether this scalar can be stored in an attribute of `attr_type`.
    pub fn fits(&self, attr_type: AttributeType) -> bool {
        matches!(
            (attr_type, self),
            (_, Value::Null)
                | (AttributeType::String, Value::Text(_))
                | (AttributeType::Integer, Value::Integer(_))
                | (AttributeType::Float, Value::Float(_) | Value::Integer(_))
                | (AttributeType::Boolean, Value::Boolean(_))
                | (AttributeType::Datetime, Value::Datetime(_))
                | (
                    AttributeType::Relationship,
                    Value::Reference(_) | Value::Document(_)
                )
        )
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::Text(value.into())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::Text(value.into())
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Value::Integer(value)
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Value::Float(value)
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Value::Boolean(value)
    }
}

impl From<Document> for Value {
    fn from(value: Document) -> Self {
        Value::Document(Box::new(value))
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Document {
    pub id: String,
    #[serde(default)]
    pub collection_id: String,
    #[serde(default)]
    pub database_id: String,
    #[serde(default)]
    pub permissions: PermissionSet,
    #[serde(default)]
    pub fields: BTreeMap<String, Value>,
}

impl Document {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            ..Self::default()
        }
    }

    pub fn with_field(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fields.insert(key.into(), value.into());
        self
    }

    pub fn with_permissions(mut self, permissions: PermissionSet) -> Self {
        self.permissions = permissions;
        self
    }

    pub fn field(&self, key: &str) -> Option<&Value> {
        self.fields.get(key)
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.fields.insert(key.into(), value.into());
    }

    pub fn remove(&mut self, key: &str) -> Option<Value> {
        self.fields.remove(key)
    }
}

#[cfg(test)]
mod tests {
    use super::{AttributeType, Document, Value};

    #[test]
    fn float_attributes_accept_integers() {
        assert!(Value::Integer(3).fits(AttributeType::Float));
        assert!(!Value::Float(3.0).fits(AttributeType::Integer));
        assert!(Value::Null.fits(AttributeType::Boolean));
        assert!(Value::from(Document::new("d1")).fits(AttributeType::Relationship));
        assert!(!Value::from("d1").fits(AttributeType::Relationship));
    }

    #[test]
    fn builder_sets_fields() {
        let doc = Document::new("d1").with_field("title", "hello").with_field("views", 3i64);
        assert_eq!(doc.field("title").and_then(Value::as_text), Some("hello"));
        assert_eq!(doc.field("views").and_then(Value::as_f64), Some(3.0));
    }
}
