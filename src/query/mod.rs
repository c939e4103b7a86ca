use crate::catalog::{Document, Value};
use crate::catalog::schema::IndexOrder;
use crate::error::SchemaError;
use serde::{Deserialize, Serialize};

/// Predicates understood by document listing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Query {
    Equal(String, Vec<Value>),
    NotEqual(String, Value),
    Search(String, String),
    OrderAsc(String),
    OrderDesc(String),
    Limit(usize),
    Offset(usize),
    CursorAfter(String),
    CursorBefore(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CursorDirection {
    After,
    Before,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cursor {
    pub document_id: String,
    pub direction: CursorDirection,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct GroupedQueries {
    pub filters: Vec<Query>,
    pub limit: Option<usize>,
    pub offset: Option<usize>,
    pub orders: Vec<(String, IndexOrder)>,
    pub cursor: Option<Cursor>,
}

impl Query {
    pub fn equal(attribute: impl Into<String>, values: impl IntoIterator<Item = Value>) -> Self {
        Query::Equal(attribute.into(), values.into_iter().collect())
    }

    pub fn not_equal(attribute: impl Into<String>, value: impl Into<Value>) -> Self {
        Query::NotEqual(attribute.into(), value.into())
    }

    pub fn search(attribute: impl Into<String>, term: impl Into<String>) -> Self {
        Query::Search(attribute.into(), term.into())
    }

    pub fn is_filter(&self) -> bool {
        matches!(
            self,
            Query::Equal(..) | Query::NotEqual(..) | Query::Search(..)
        )
    }

    /// The attribute a filter or order refers to.
    pub fn attribute(&self) -> Option<&str> {
        match self {
            Query::Equal(a, _)
            | Query::NotEqual(a, _)
            | Query::Search(a, _)
            | Query::OrderAsc(a)
            | Query::OrderDesc(a) => Some(a),
            _ => None,
        }
    }

    /// Evaluates a filter against `doc`. Non-filter queries always match.
    pub fn matches(&self, doc: &Document) -> bool {
        match self {
            Query::Equal(attribute, values) if attribute == "$id" => values
                .iter()
                .any(|v| v.as_text() == Some(doc.id.as_str())),
            Query::Equal(attribute, values) => doc.field(attribute)
                .is_some_and(|actual| values.iter().any(|v| value_eq(actual, v))),
            Query::NotEqual(attribute, value) if attribute == "$id" => {
                value.as_text() != Some(doc.id.as_str())
            }
            Query::NotEqual(attribute, value) => {
                !doc.field(attribute).is_some_and(|actual| value_eq(actual, value))
            }
            Query::Search(attribute, term) => doc.field(attribute)
                .and_then(Value::as_text)
                .is_some_and(|text| {
                    let text = text.to_lowercase();
                    term.split_whitespace()
                        .any(|word| text.contains(&word.to_lowercase()))
                }),
            _ => true,
        }
    }
}

fn value_eq(actual: &Value, expected: &Value) -> bool {
    match (actual, expected) {
        (Value::List(items), _) => items.iter().any(|item| value_eq(item, expected)),
        (Value::Reference(id), Value::Text(text)) => id == text.as_str(),
        (Value::Document(doc), Value::Text(text)) => doc.id == text.as_str(),
        _ => actual == expected,
    }
}

/// Splits `queries` by role. A later limit, offset or cursor overrides an
/// earlier one; orders accumulate in order of appearance.
pub fn group_by_type(queries: &[Query]) -> GroupedQueries {
    let mut grouped = GroupedQueries::default();
    for query in queries {
        match query {
            Query::Limit(limit) => grouped.limit = Some(*limit),
            Query::Offset(offset) => grouped.offset = Some(*offset),
            Query::CursorAfter(id) => {
                grouped.cursor = Some(Cursor {
                    document_id: id.clone(),
                    direction: CursorDirection::After,
                })
            }
            Query::CursorBefore(id) => {
                grouped.cursor = Some(Cursor {
                    document_id: id.clone(),
                    direction: CursorDirection::Before,
                })
            }
            Query::OrderAsc(attribute) => grouped.orders.push((attribute.clone(), IndexOrder::Asc)),
            Query::OrderDesc(attribute) => {
                grouped.orders.push((attribute.clone(), IndexOrder::Desc))
            }
            filter => grouped.filters.push(filter.clone()),
        }
    }
    grouped
}

/// Rejects limits above `max_limit` and empty equality lists.
pub fn validate(queries: &[Query], max_limit: usize) -> Result<(), SchemaError> {
    for query in queries {
        match query {
            Query::Limit(limit) if *limit > max_limit => {
                return Err(SchemaError::InvalidValue(format!(
                    "limit {limit} exceeds maximum of {max_limit}"
                )));
            }
            Query::Equal(attribute, values) if values.is_empty() => {
                return Err(SchemaError::InvalidValue(format!(
                    "equal query on '{attribute}' needs at least one value"
                )));
            }
            Query::Search(attribute, term) if term.trim().is_empty() => {
                return Err(SchemaError::InvalidValue(format!(
                    "search query on '{attribute}' needs a term"
                )));
            }
            _ => {}
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::{CursorDirection, Query, group_by_type, validate};
    use crate::catalog::schema::IndexOrder;
    use crate::catalog::{Document, Value};

    #[test]
    fn groups_queries_by_role() {
        let grouped = group_by_type(&[
            Query::equal("status", [Value::from("draft")]),
            Query::Limit(10),
            Query::OrderDesc("created".into()),
            Query::CursorAfter("d1".into()),
            Query::Limit(25),
            Query::Offset(5),
            Query::search("title", "rust"),
        ]);
        assert_eq!(grouped.filters.len(), 2);
        assert_eq!(grouped.limit, Some(25));
        assert_eq!(grouped.offset, Some(5));
        assert_eq!(grouped.orders, vec![("created".to_string(), IndexOrder::Desc)]);
        let cursor = grouped.cursor.expect("cursor");
        assert_eq!(cursor.document_id, "d1");
        assert_eq!(cursor.direction, CursorDirection::After);
    }

    #[test]
    fn filters_match_documents() {
        let doc = Document::new("d1")
            .with_field("status", "draft")
            .with_field("title", "Learning Rust Ownership")
            .with_field(
                "tags",
                Value::List(vec![Value::from("a"), Value::from("b")]),
            );
        assert!(Query::equal("status", [Value::from("draft")]).matches(&doc));
        assert!(!Query::equal("status", [Value::from("live")]).matches(&doc));
        assert!(Query::not_equal("status", "live").matches(&doc));
        assert!(Query::search("title", "ownership").matches(&doc));
        assert!(Query::equal("tags", [Value::from("b")]).matches(&doc));
        assert!(Query::equal("$id", [Value::from("d1")]).matches(&doc));
        assert!(!Query::equal("missing", [Value::from("x")]).matches(&doc));
    }

    #[test]
    fn validation_bounds_limit() {
        assert!(validate(&[Query::Limit(100)], 100).is_ok());
        assert!(validate(&[Query::Limit(101)], 100).is_err());
        assert!(validate(&[Query::Equal("a".into(), vec![])], 100).is_err());
    }
}
