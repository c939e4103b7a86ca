use crate::catalog::schema::{
    Format, FormatOptions, IndexOrder, IndexType, OnDelete, RelationType,
};
use crate::catalog::{AttributeType, Value};
use crate::error::SchemaError;

const MAX_KEY_LENGTH: usize = 36;

/// Checks a caller-chosen attribute, index or collection key.
pub(crate) fn validate_key(what: &str, key: &str) -> Result<(), SchemaError> {
    let valid_chars = key
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.'));
    let leading_special = key.starts_with(['_', '-', '.']);
    if key.is_empty() || key.len() > MAX_KEY_LENGTH || !valid_chars || leading_special {
        return Err(SchemaError::InvalidValue(format!(
            "{what} key '{key}' must be 1-{MAX_KEY_LENGTH} characters of a-z, A-Z, 0-9, \
             period, hyphen or underscore, and can't start with a special character"
        )));
    }
    Ok(())
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelationshipSpec {
    pub related_collection: String,
    pub relation_type: RelationType,
    pub two_way: bool,
    /// Defaults to the id of the collection the attribute is created on.
    pub two_way_key: Option<String>,
    pub on_delete: OnDelete,
}

impl RelationshipSpec {
    pub fn new(related_collection: impl Into<String>, relation_type: RelationType) -> Self {
        Self {
            related_collection: related_collection.into(),
            relation_type,
            two_way: false,
            two_way_key: None,
            on_delete: OnDelete::Restrict,
        }
    }

    pub fn two_way(mut self, two_way: bool) -> Self {
        self.two_way = two_way;
        self
    }

    pub fn two_way_key(mut self, key: impl Into<String>) -> Self {
        self.two_way_key = Some(key.into());
        self
    }

    pub fn on_delete(mut self, on_delete: OnDelete) -> Self {
        self.on_delete = on_delete;
        self
    }
}

/// Request to create one attribute.
#[derive(Debug, Clone, PartialEq)]
pub struct AttributeSpec {
    pub key: String,
    pub attr_type: AttributeType,
    pub size: u64,
    pub required: bool,
    pub array: bool,
    pub default: Option<Value>,
    pub format: Option<Format>,
    pub format_options: Option<FormatOptions>,
    pub filters: Vec<String>,
    pub relationship: Option<RelationshipSpec>,
}

impl AttributeSpec {
    fn new(key: impl Into<String>, attr_type: AttributeType) -> Self {
        Self {
            key: key.into(),
            attr_type,
            size: 0,
            required: false,
            array: false,
            default: None,
            format: None,
            format_options: None,
            filters: Vec::new(),
            relationship: None,
        }
    }

    pub fn string(key: impl Into<String>, size: u64) -> Self {
        Self {
            size,
            ..Self::new(key, AttributeType::String)
        }
    }

    pub fn integer(key: impl Into<String>) -> Self {
        Self::new(key, AttributeType::Integer)
    }

    pub fn float(key: impl Into<String>) -> Self {
        Self::new(key, AttributeType::Float)
    }

    pub fn boolean(key: impl Into<String>) -> Self {
        Self::new(key, AttributeType::Boolean)
    }

    pub fn datetime(key: impl Into<String>) -> Self {
        Self {
            filters: vec!["datetime".to_string()],
            ..Self::new(key, AttributeType::Datetime)
        }
    }

    pub fn email(key: impl Into<String>) -> Self {
        Self::string(key, 254).format(Format::Email)
    }

    pub fn enumeration(key: impl Into<String>, elements: &[&str]) -> Self {
        let size = elements.iter().map(|e| e.len() as u64).max().unwrap_or(0);
        Self::string(key, size)
            .format(Format::Enum)
            .format_options(FormatOptions::Enum {
                elements: elements.iter().map(|e| (*e).to_string()).collect(),
            })
    }

    pub fn relationship(key: impl Into<String>, relationship: RelationshipSpec) -> Self {
        Self {
            relationship: Some(relationship),
            ..Self::new(key, AttributeType::Relationship)
        }
    }

    pub fn required(mut self, required: bool) -> Self {
        self.required = required;
        self
    }

    pub fn array(mut self, array: bool) -> Self {
        self.array = array;
        self
    }

    pub fn default(mut self, value: impl Into<Value>) -> Self {
        self.default = Some(value.into());
        self
    }

    pub fn format(mut self, format: Format) -> Self {
        self.format = Some(format);
        self
    }

    pub fn format_options(mut self, options: FormatOptions) -> Self {
        self.format_options = Some(options);
        self
    }

    pub fn filter(mut self, filter: impl Into<String>) -> Self {
        self.filters.push(filter.into());
        self
    }

    pub fn validate(&self, max_string_size: u64) -> Result<(), SchemaError> {
        validate_key("attribute", &self.key)?;

        match (self.attr_type, &self.relationship) {
            (AttributeType::Relationship, None) => {
                return Err(SchemaError::InvalidValue(format!(
                    "relationship attribute '{}' needs relationship options",
                    self.key
                )));
            }
            (AttributeType::Relationship, Some(rel)) => {
                if self.array || self.required || self.default.is_some() {
                    return Err(SchemaError::InvalidValue(format!(
                        "relationship attribute '{}' can not be array, required or defaulted",
                        self.key
                    )));
                }
                if let Some(two_way_key) = &rel.two_way_key {
                    validate_key("attribute", two_way_key)?;
                }
            }
            (_, Some(_)) => {
                return Err(SchemaError::InvalidValue(format!(
                    "relationship options are only valid on relationship attributes, \
                     '{}' is {}",
                    self.key, self.attr_type
                )));
            }
            (_, None) => {}
        }

        if self.attr_type == AttributeType::String && (self.size == 0 || self.size > max_string_size)
        {
            return Err(SchemaError::InvalidValue(format!(
                "size of string attribute '{}' must be between 1 and {max_string_size}",
                self.key
            )));
        }

        if let Some(format) = self.format
            && format.attribute_type() != self.attr_type
        {
            return Err(SchemaError::InvalidValue(format!(
                "format '{}' can not be used with {} attribute '{}'",
                format.as_str(),
                self.attr_type,
                self.key
            )));
        }
        validate_format_options(&self.key, self.format, self.format_options.as_ref())?;

        if self.default.as_ref().is_some_and(|d| !d.is_null()) {
            if self.required {
                return Err(SchemaError::InvalidValue(format!(
                    "cannot set default value for required attribute '{}'",
                    self.key
                )));
            }
            if self.array {
                return Err(SchemaError::InvalidValue(format!(
                    "cannot set default value for array attribute '{}'",
                    self.key
                )));
            }
        }
        validate_default(
            &self.key,
            self.attr_type,
            self.size,
            self.format_options.as_ref(),
            self.default.as_ref(),
        )
    }
}

pub(crate) fn validate_format_options(
    key: &str,
    format: Option<Format>,
    options: Option<&FormatOptions>,
) -> Result<(), SchemaError> {
    let invalid = |message: String| Err(SchemaError::InvalidValue(message));
    match (format, options) {
        (None, None)
        | (Some(Format::Email | Format::Ip | Format::Url), None) => Ok(()),
        (Some(Format::Enum), Some(FormatOptions::Enum { elements })) => {
            if elements.is_empty() || elements.iter().any(String::is_empty) {
                return invalid(format!("enum attribute '{key}' needs non-empty elements"));
            }
            Ok(())
        }
        (Some(Format::IntRange), Some(FormatOptions::IntRange { min, max })) if min > max => {
            invalid(format!("range of attribute '{key}' has min {min} above max {max}"))
        }
        (Some(Format::FloatRange), Some(FormatOptions::FloatRange { min, max })) if min > max => {
            invalid(format!("range of attribute '{key}' has min {min} above max {max}"))
        }
        (Some(Format::IntRange), Some(FormatOptions::IntRange { .. }))
        | (Some(Format::FloatRange), Some(FormatOptions::FloatRange { .. })) => Ok(()),
        (Some(format), _) => invalid(format!(
            "format '{}' of attribute '{key}' has missing or mismatched options",
            format.as_str()
        )),
        (None, Some(_)) => invalid(format!(
            "format options on attribute '{key}' need a matching format"
        )),
    }
}

/// Checks a default against the attribute type, string size and any range
/// or enum options.
pub(crate) fn validate_default(
    key: &str,
    attr_type: AttributeType,
    size: u64,
    options: Option<&FormatOptions>,
    default: Option<&Value>,
) -> Result<(), SchemaError> {
    let Some(default) = default.filter(|d| !d.is_null()) else {
        return Ok(());
    };
    if !default.fits(attr_type) || attr_type == AttributeType::Relationship {
        return Err(SchemaError::InvalidValue(format!(
            "default of attribute '{key}' must be {attr_type}, got {}",
            default.type_name()
        )));
    }
    if let Some(text) = default.as_text()
        && text.chars().count() as u64 > size
    {
        return Err(SchemaError::InvalidValue(format!(
            "default of attribute '{key}' is longer than its size {size}"
        )));
    }
    match (options, default) {
        (Some(FormatOptions::IntRange { min, max }), Value::Integer(v)) if v < min || v > max => {
            Err(SchemaError::InvalidValue(format!(
                "default {v} of attribute '{key}' is outside {min}..={max}"
            )))
        }
        (Some(FormatOptions::FloatRange { min, max }), value)
            if value.as_f64().is_some_and(|v| v < *min || v > *max) =>
        {
            Err(SchemaError::InvalidValue(format!(
                "default of attribute '{key}' is outside {min}..={max}"
            )))
        }
        (Some(FormatOptions::Enum { elements }), Value::Text(text))
            if !elements.iter().any(|e| e == text.as_str()) =>
        {
            Err(SchemaError::InvalidValue(format!(
                "default '{text}' of attribute '{key}' is not one of {elements:?}"
            )))
        }
        _ => Ok(()),
    }
}

/// Request to change an available attribute. `attr_type` and `format` must
/// match the stored attribute.
#[derive(Debug, Clone, PartialEq)]
pub struct AttributeUpdate {
    pub attr_type: AttributeType,
    pub format: Option<Format>,
    pub required: Option<bool>,
    /// `Some(Value::Null)` clears the default.
    pub default: Option<Value>,
    pub size: Option<u64>,
    pub format_options: Option<FormatOptions>,
    pub new_key: Option<String>,
    pub on_delete: Option<OnDelete>,
}

impl AttributeUpdate {
    pub fn new(attr_type: AttributeType) -> Self {
        Self {
            attr_type,
            format: None,
            required: None,
            default: None,
            size: None,
            format_options: None,
            new_key: None,
            on_delete: None,
        }
    }

    pub fn format(mut self, format: Format) -> Self {
        self.format = Some(format);
        self
    }

    pub fn required(mut self, required: bool) -> Self {
        self.required = Some(required);
        self
    }

    pub fn default(mut self, value: impl Into<Value>) -> Self {
        self.default = Some(value.into());
        self
    }

    pub fn size(mut self, size: u64) -> Self {
        self.size = Some(size);
        self
    }

    pub fn format_options(mut self, options: FormatOptions) -> Self {
        self.format_options = Some(options);
        self
    }

    pub fn rename(mut self, new_key: impl Into<String>) -> Self {
        self.new_key = Some(new_key.into());
        self
    }

    pub fn on_delete(mut self, on_delete: OnDelete) -> Self {
        self.on_delete = Some(on_delete);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexSpec {
    pub key: String,
    pub index_type: IndexType,
    pub attributes: Vec<String>,
    pub orders: Vec<Option<IndexOrder>>,
}

impl IndexSpec {
    pub fn new(key: impl Into<String>, index_type: IndexType, attributes: &[&str]) -> Self {
        Self {
            key: key.into(),
            index_type,
            attributes: attributes.iter().map(|a| (*a).to_string()).collect(),
            orders: Vec::new(),
        }
    }

    pub fn orders(mut self, orders: &[Option<IndexOrder>]) -> Self {
        self.orders = orders.to_vec();
        self
    }
}

/// Collection metadata for create and update.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CollectionSpec {
    pub id: String,
    pub name: String,
    pub enabled: bool,
    pub document_security: bool,
    pub permissions: Vec<String>,
}

impl CollectionSpec {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            enabled: true,
            document_security: false,
            permissions: Vec::new(),
        }
    }

    pub fn enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    pub fn document_security(mut self, document_security: bool) -> Self {
        self.document_security = document_security;
        self
    }

    pub fn permissions(mut self, permissions: &[&str]) -> Self {
        self.permissions = permissions.iter().map(|p| (*p).to_string()).collect();
        self
    }
}

#[cfg(test)]
mod tests {
    use super::{AttributeSpec, RelationshipSpec, validate_key};
    use crate::catalog::schema::{Format, FormatOptions, RelationType};
    use crate::error::ErrorCode;

    const MAX: u64 = 1024;

    fn code(spec: &AttributeSpec) -> Option<ErrorCode> {
        spec.validate(MAX).err().map(|e| e.code())
    }

    #[test]
    fn format_must_match_type() {
        let spec = AttributeSpec::integer("age").format(Format::Email);
        assert_eq!(code(&spec), Some(ErrorCode::InvalidValue));
        assert!(AttributeSpec::email("contact").validate(MAX).is_ok());
    }

    #[test]
    fn default_conflicts_with_required_and_array() {
        let required = AttributeSpec::string("title", 64).required(true).default("x");
        let err = required.validate(MAX).expect_err("required default");
        assert!(err.to_string().contains("required"));
        let array = AttributeSpec::string("tags", 64).array(true).default("x");
        let err = array.validate(MAX).expect_err("array default");
        assert!(err.to_string().contains("array"));
    }

    #[test]
    fn default_respects_range_and_enum() {
        let ranged = AttributeSpec::integer("stars")
            .format(Format::IntRange)
            .format_options(FormatOptions::IntRange { min: 1, max: 5 });
        assert!(ranged.clone().default(3i64).validate(MAX).is_ok());
        assert_eq!(code(&ranged.default(9i64)), Some(ErrorCode::InvalidValue));

        let status = AttributeSpec::enumeration("status", &["draft", "live"]);
        assert!(status.clone().default("live").validate(MAX).is_ok());
        assert_eq!(code(&status.default("gone")), Some(ErrorCode::InvalidValue));
    }

    #[test]
    fn string_size_is_bounded() {
        assert!(AttributeSpec::string("a", 0).validate(MAX).is_err());
        assert!(AttributeSpec::string("a", MAX + 1).validate(MAX).is_err());
        assert!(AttributeSpec::string("a", MAX).validate(MAX).is_ok());
    }

    #[test]
    fn relationship_attributes_reject_scalar_flags() {
        let rel = RelationshipSpec::new("authors", RelationType::ManyToOne);
        assert!(AttributeSpec::relationship("author", rel.clone()).validate(MAX).is_ok());
        assert!(
            AttributeSpec::relationship("author", rel)
                .array(true)
                .validate(MAX)
                .is_err()
        );
    }

    #[test]
    fn keys_follow_grammar() {
        assert!(validate_key("attribute", "title_2").is_ok());
        assert!(validate_key("attribute", "_hidden").is_err());
        assert!(validate_key("attribute", "").is_err());
        assert!(validate_key("attribute", &"k".repeat(37)).is_err());
        assert!(validate_key("attribute", "has space").is_err());
    }
}
