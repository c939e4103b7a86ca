use crate::catalog::{Attribute, Collection, Database, Document, Index, Value};
use crate::query::{CursorDirection, Query, group_by_type};
use crate::catalog::schema::IndexOrder;
use crate::storage::{DocumentStore, StoreError, StoreResult};
use im::{HashMap, OrdMap, Vector};
use parking_lot::{Mutex, RwLock};
use std::cmp::Ordering;
use std::collections::HashMap as StdHashMap;

type CollectionKey = (String, String);

const DEFAULT_INDEX_LIMIT: usize = 64;
const DEFAULT_MAX_INDEX_LENGTH: u64 = 768;

/// Injected failure for exercising recovery paths.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Fault {
    /// Attribute record writes on one collection fail with a backend error.
    AttributeWrite {
        database_id: String,
        collection_id: String,
    },
    /// Only writes of the attribute record with `key` fail.
    AttributeKey {
        database_id: String,
        collection_id: String,
        key: String,
    },
}

#[derive(Debug, Clone, Default)]
struct State {
    next_internal_id: u64,
    databases: HashMap<String, Database>,
    /// Collection metadata; attribute and index records live in their own maps.
    collections: HashMap<CollectionKey, Collection>,
    attributes: HashMap<CollectionKey, Vector<Attribute>>,
    indexes: HashMap<CollectionKey, Vector<Index>>,
    documents: HashMap<CollectionKey, OrdMap<String, Document>>,
}

impl State {
    fn next_id(&mut self) -> u64 {
        self.next_internal_id += 1;
        self.next_internal_id
    }

    fn require_collection(&self, key: &CollectionKey) -> StoreResult<()> {
        if self.collections.contains_key(key) {
            Ok(())
        } else {
            Err(StoreError::NotFound {
                id: format!("{}.{}", key.0, key.1),
            })
        }
    }

    fn assemble(&self, key: &CollectionKey) -> Option<Collection> {
        let mut collection = self.collections.get(key)?.clone();
        collection.attributes = self
            .attributes
            .get(key)
            .map(|a| a.iter().cloned().collect())
            .unwrap_or_default();
        collection.indexes = self
            .indexes
            .get(key)
            .map(|i| i.iter().cloned().collect())
            .unwrap_or_default();
        Some(collection)
    }

    /// Moves nested documents into their own collections, leaving references.
    fn persist_nested(&mut self, database_id: &str, mut document: Document) -> StoreResult<Document> {
        for value in document.fields.values_mut() {
            let taken = std::mem::replace(value, Value::Null);
            *value = self.flatten(database_id, taken)?;
        }
        Ok(document)
    }

    fn flatten(&mut self, database_id: &str, value: Value) -> StoreResult<Value> {
        match value {
            Value::Document(nested) => {
                let nested = *nested;
                if nested.collection_id.is_empty() || nested.id.is_empty() {
                    return Err(StoreError::Backend(
                        "nested document is missing its id or collection".to_string(),
                    ));
                }
                let key = (database_id.to_string(), nested.collection_id.clone());
                self.require_collection(&key)?;
                let id = nested.id.clone();
                let nested = self.persist_nested(database_id, nested)?;
                let documents = self.documents.entry(key).or_default();
                let merged = match documents.get(&id) {
                    Some(existing) => {
                        let mut merged = existing.clone();
                        merged.fields.extend(nested.fields);
                        if !nested.permissions.is_empty() {
                            merged.permissions = nested.permissions;
                        }
                        merged
                    }
                    None => nested,
                };
                documents.insert(id.clone(), merged);
                Ok(Value::Reference(id))
            }
            Value::List(items) => Ok(Value::List(
                items
                    .into_iter()
                    .map(|item| self.flatten(database_id, item))
                    .collect::<StoreResult<_>>()?,
            )),
            other => Ok(other),
        }
    }
}

/// In-process `DocumentStore`.
///
/// Collection definitions are cached on first read and only refreshed by
/// `purge_cached_collection`, so a definition read between a schema write and
/// its purge is stale.
#[derive(Debug)]
pub struct MemoryStore {
    state: RwLock<State>,
    collection_cache: Mutex<StdHashMap<CollectionKey, Collection>>,
    fault: Mutex<Option<Fault>>,
    index_limit: usize,
    max_index_length: u64,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::with_limits(DEFAULT_INDEX_LIMIT, DEFAULT_MAX_INDEX_LENGTH)
    }

    pub fn with_limits(index_limit: usize, max_index_length: u64) -> Self {
        Self {
            state: RwLock::new(State::default()),
            collection_cache: Mutex::new(StdHashMap::new()),
            fault: Mutex::new(None),
            index_limit,
            max_index_length,
        }
    }

    pub fn set_fault(&self, fault: Option<Fault>) {
        *self.fault.lock() = fault;
    }

    /// Attribute records as persisted, bypassing the definition cache.
    pub fn attribute_records(&self, database_id: &str, collection_id: &str) -> Vec<Attribute> {
        self.state
            .read()
            .attributes
            .get(&key(database_id, collection_id))
            .map(|a| a.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Documents as persisted, with relationship fields as references.
    pub fn document_records(&self, database_id: &str, collection_id: &str) -> Vec<Document> {
        self.state
            .read()
            .documents
            .get(&key(database_id, collection_id))
            .map(|d| d.values().cloned().collect())
            .unwrap_or_default()
    }

    fn check_attribute_fault(
        &self,
        database_id: &str,
        collection_id: &str,
        attribute_key: &str,
    ) -> StoreResult<()> {
        let failing = match &*self.fault.lock() {
            Some(Fault::AttributeWrite {
                database_id: db,
                collection_id: coll,
            }) => db == database_id && coll == collection_id,
            Some(Fault::AttributeKey {
                database_id: db,
                collection_id: coll,
                key,
            }) => db == database_id && coll == collection_id && key == attribute_key,
            None => false,
        };
        if failing {
            return Err(StoreError::Backend(format!(
                "injected attribute write failure on {database_id}.{collection_id}.{attribute_key}"
            )));
        }
        Ok(())
    }
}

fn key(database_id: &str, collection_id: &str) -> CollectionKey {
    (database_id.to_string(), collection_id.to_string())
}

fn compare_values(a: Option<&Value>, b: Option<&Value>) -> Ordering {
    match (a, b) {
        (None, None) => Ordering::Equal,
        (None, Some(_)) => Ordering::Less,
        (Some(_), None) => Ordering::Greater,
        (Some(a), Some(b)) => match (a, b) {
            (Value::Text(x), Value::Text(y)) => x.cmp(y),
            (Value::Boolean(x), Value::Boolean(y)) => x.cmp(y),
            (Value::Datetime(x), Value::Datetime(y)) => x.cmp(y),
            _ => match (a.as_f64(), b.as_f64()) {
                (Some(x), Some(y)) => x.partial_cmp(&y).unwrap_or(Ordering::Equal),
                _ => Ordering::Equal,
            },
        },
    }
}

impl DocumentStore for MemoryStore {
    async fn get_database(&self, database_id: &str) -> StoreResult<Option<Database>> {
        Ok(self.state.read().databases.get(database_id).cloned())
    }

    async fn create_database(&self, mut database: Database) -> StoreResult<Database> {
        let mut state = self.state.write();
        if state.databases.contains_key(&database.id) {
            return Err(StoreError::Duplicate { id: database.id });
        }
        database.internal_id = state.next_id();
        state.databases.insert(database.id.clone(), database.clone());
        Ok(database)
    }

    async fn get_collection(
        &self,
        database_id: &str,
        collection_id: &str,
    ) -> StoreResult<Option<Collection>> {
        let key = key(database_id, collection_id);
        if let Some(cached) = self.collection_cache.lock().get(&key) {
            return Ok(Some(cached.clone()));
        }
        let assembled = self.state.read().assemble(&key);
        if let Some(collection) = &assembled {
            self.collection_cache.lock().insert(key, collection.clone());
        }
        Ok(assembled)
    }

    async fn list_collections(&self, database_id: &str) -> StoreResult<Vec<Collection>> {
        let state = self.state.read();
        Ok(state
            .collections
            .keys()
            .filter(|(db, _)| db == database_id)
            .filter_map(|key| state.assemble(key))
            .collect())
    }

    async fn count_collections(&self, database_id: &str) -> StoreResult<usize> {
        Ok(self
            .state
            .read()
            .collections
            .keys()
            .filter(|(db, _)| db == database_id)
            .count())
    }

    async fn create_collection(
        &self,
        database_id: &str,
        mut collection: Collection,
    ) -> StoreResult<Collection> {
        let mut state = self.state.write();
        let key = key(database_id, &collection.id);
        if state.collections.contains_key(&key) {
            return Err(StoreError::Duplicate { id: collection.id });
        }
        collection.internal_id = state.next_id();
        collection.database_id = database_id.to_string();
        let attributes = std::mem::take(&mut collection.attributes);
        let indexes = std::mem::take(&mut collection.indexes);
        state.collections.insert(key.clone(), collection.clone());
        state.attributes.insert(key.clone(), attributes.into_iter().collect());
        state.indexes.insert(key.clone(), indexes.into_iter().collect());
        state.documents.insert(key.clone(), OrdMap::new());
        Ok(state.assemble(&key).unwrap_or(collection))
    }

    async fn update_collection(
        &self,
        database_id: &str,
        mut collection: Collection,
    ) -> StoreResult<Collection> {
        let mut state = self.state.write();
        let key = key(database_id, &collection.id);
        let existing = state
            .collections
            .get(&key)
            .ok_or_else(|| StoreError::NotFound {
                id: collection.id.clone(),
            })?;
        collection.internal_id = existing.internal_id;
        collection.attributes.clear();
        collection.indexes.clear();
        state.collections.insert(key.clone(), collection.clone());
        Ok(state.assemble(&key).unwrap_or(collection))
    }

    async fn delete_collection(&self, database_id: &str, collection_id: &str) -> StoreResult<()> {
        let mut state = self.state.write();
        let key = key(database_id, collection_id);
        if state.collections.remove(&key).is_none() {
            return Err(StoreError::NotFound {
                id: collection_id.to_string(),
            });
        }
        state.attributes.remove(&key);
        state.indexes.remove(&key);
        state.documents.remove(&key);
        Ok(())
    }

    async fn create_attribute(
        &self,
        database_id: &str,
        collection_id: &str,
        attribute: Attribute,
    ) -> StoreResult<Attribute> {
        self.check_attribute_fault(database_id, collection_id, &attribute.key)?;
        let mut state = self.state.write();
        let key = key(database_id, collection_id);
        state.require_collection(&key)?;
        let records = state.attributes.entry(key).or_default();
        if records
            .iter()
            .any(|a| a.id == attribute.id || a.key == attribute.key)
        {
            return Err(StoreError::Duplicate { id: attribute.id });
        }
        records.push_back(attribute.clone());
        Ok(attribute)
    }

    async fn update_attribute(
        &self,
        database_id: &str,
        collection_id: &str,
        attribute: Attribute,
    ) -> StoreResult<Attribute> {
        self.check_attribute_fault(database_id, collection_id, &attribute.key)?;
        let mut state = self.state.write();
        let records = state
            .attributes
            .get_mut(&key(database_id, collection_id))
            .ok_or_else(|| StoreError::NotFound {
                id: collection_id.to_string(),
            })?;
        let slot = records
            .iter_mut()
            .find(|a| a.id == attribute.id)
            .ok_or_else(|| StoreError::NotFound {
                id: attribute.id.clone(),
            })?;
        *slot = attribute.clone();
        Ok(attribute)
    }

    async fn delete_attribute(
        &self,
        database_id: &str,
        collection_id: &str,
        attribute_key: &str,
    ) -> StoreResult<()> {
        let mut state = self.state.write();
        let records = state
            .attributes
            .get_mut(&key(database_id, collection_id))
            .ok_or_else(|| StoreError::NotFound {
                id: collection_id.to_string(),
            })?;
        let before = records.len();
        records.retain(|a| a.key != attribute_key);
        if records.len() == before {
            return Err(StoreError::NotFound {
                id: attribute_key.to_string(),
            });
        }
        Ok(())
    }

    async fn create_index(
        &self,
        database_id: &str,
        collection_id: &str,
        index: Index,
    ) -> StoreResult<Index> {
        let mut state = self.state.write();
        let key = key(database_id, collection_id);
        state.require_collection(&key)?;
        let limit = self.index_limit;
        let records = state.indexes.entry(key).or_default();
        if records.iter().any(|i| i.id == index.id || i.key == index.key) {
            return Err(StoreError::Duplicate { id: index.id });
        }
        if records.len() >= limit {
            return Err(StoreError::LimitExceeded {
                message: format!("collection already has {limit} indexes"),
            });
        }
        records.push_back(index.clone());
        Ok(index)
    }

    async fn update_index(
        &self,
        database_id: &str,
        collection_id: &str,
        index: Index,
    ) -> StoreResult<Index> {
        let mut state = self.state.write();
        let records = state
            .indexes
            .get_mut(&key(database_id, collection_id))
            .ok_or_else(|| StoreError::NotFound {
                id: collection_id.to_string(),
            })?;
        let slot = records
            .iter_mut()
            .find(|i| i.id == index.id)
            .ok_or_else(|| StoreError::NotFound {
                id: index.id.clone(),
            })?;
        *slot = index.clone();
        Ok(index)
    }

    async fn delete_index(
        &self,
        database_id: &str,
        collection_id: &str,
        index_key: &str,
    ) -> StoreResult<()> {
        let mut state = self.state.write();
        let records = state
            .indexes
            .get_mut(&key(database_id, collection_id))
            .ok_or_else(|| StoreError::NotFound {
                id: collection_id.to_string(),
            })?;
        let before = records.len();
        records.retain(|i| i.key != index_key);
        if records.len() == before {
            return Err(StoreError::NotFound {
                id: index_key.to_string(),
            });
        }
        Ok(())
    }

    async fn get_document(
        &self,
        database_id: &str,
        collection_id: &str,
        document_id: &str,
    ) -> StoreResult<Option<Document>> {
        Ok(self
            .state
            .read()
            .documents
            .get(&key(database_id, collection_id))
            .and_then(|docs| docs.get(document_id).cloned()))
    }

    async fn find_documents(
        &self,
        database_id: &str,
        collection_id: &str,
        queries: &[Query],
    ) -> StoreResult<Vec<Document>> {
        let grouped = group_by_type(queries);
        let mut matched: Vec<Document> = {
            let state = self.state.read();
            let key = key(database_id, collection_id);
            state.require_collection(&key)?;
            state
                .documents
                .get(&key)
                .map(|docs| {
                    docs.values()
                        .filter(|doc| grouped.filters.iter().all(|q| q.matches(doc)))
                        .cloned()
                        .collect()
                })
                .unwrap_or_default()
        };

        if !grouped.orders.is_empty() {
            matched.sort_by(|a, b| {
                grouped
                    .orders
                    .iter()
                    .map(|(attribute, order)| {
                        let ord = compare_values(a.field(attribute), b.field(attribute));
                        match order {
                            IndexOrder::Asc => ord,
                            IndexOrder::Desc => ord.reverse(),
                        }
                    })
                    .find(|ord| *ord != Ordering::Equal)
                    .unwrap_or_else(|| a.id.cmp(&b.id))
            });
        }

        let offset = grouped.offset.unwrap_or(0);
        let limit = grouped.limit.unwrap_or(usize::MAX);
        let Some(cursor) = grouped.cursor else {
            return Ok(matched.into_iter().skip(offset).take(limit).collect());
        };
        let position = matched
            .iter()
            .position(|doc| doc.id == cursor.document_id)
            .ok_or(StoreError::NotFound {
                id: cursor.document_id.clone(),
            })?;
        Ok(match cursor.direction {
            CursorDirection::After => matched
                .into_iter()
                .skip(position + 1)
                .skip(offset)
                .take(limit)
                .collect(),
            CursorDirection::Before => {
                let mut before: Vec<Document> = matched
                    .into_iter()
                    .take(position)
                    .rev()
                    .skip(offset)
                    .take(limit)
                    .collect();
                before.reverse();
                before
            }
        })
    }

    async fn count_documents(
        &self,
        database_id: &str,
        collection_id: &str,
        queries: &[Query],
        ceiling: Option<usize>,
    ) -> StoreResult<usize> {
        let grouped = group_by_type(queries);
        let state = self.state.read();
        let key = key(database_id, collection_id);
        state.require_collection(&key)?;
        let count = state
            .documents
            .get(&key)
            .map(|docs| {
                docs.values()
                    .filter(|doc| grouped.filters.iter().all(|q| q.matches(doc)))
                    .take(ceiling.unwrap_or(usize::MAX))
                    .count()
            })
            .unwrap_or(0);
        Ok(count)
    }

    async fn create_document(
        &self,
        database_id: &str,
        collection_id: &str,
        document: Document,
    ) -> StoreResult<Document> {
        let mut state = self.state.write();
        let key = key(database_id, collection_id);
        state.require_collection(&key)?;
        if state
            .documents
            .get(&key)
            .is_some_and(|docs| docs.contains_key(&document.id))
        {
            return Err(StoreError::Duplicate { id: document.id });
        }
        let document = state.persist_nested(database_id, document)?;
        state
            .documents
            .entry(key)
            .or_default()
            .insert(document.id.clone(), document.clone());
        Ok(document)
    }

    async fn update_document(
        &self,
        database_id: &str,
        collection_id: &str,
        document: Document,
    ) -> StoreResult<Document> {
        let mut state = self.state.write();
        let key = key(database_id, collection_id);
        state.require_collection(&key)?;
        if !state
            .documents
            .get(&key)
            .is_some_and(|docs| docs.contains_key(&document.id))
        {
            return Err(StoreError::NotFound { id: document.id });
        }
        let document = state.persist_nested(database_id, document)?;
        state
            .documents
            .entry(key)
            .or_default()
            .insert(document.id.clone(), document.clone());
        Ok(document)
    }

    async fn delete_document(
        &self,
        database_id: &str,
        collection_id: &str,
        document_id: &str,
    ) -> StoreResult<()> {
        let mut state = self.state.write();
        let removed = state
            .documents
            .get_mut(&key(database_id, collection_id))
            .and_then(|docs| docs.remove(document_id));
        match removed {
            Some(_) => Ok(()),
            None => Err(StoreError::NotFound {
                id: document_id.to_string(),
            }),
        }
    }

    async fn purge_cached_collection(
        &self,
        database_id: &str,
        collection_id: &str,
    ) -> StoreResult<()> {
        self.collection_cache
            .lock()
            .remove(&key(database_id, collection_id));
        Ok(())
    }

    async fn purge_cached_document(
        &self,
        _database_id: &str,
        _collection_id: &str,
        _document_id: &str,
    ) -> StoreResult<()> {
        // Documents are never cached here.
        Ok(())
    }

    fn limit_for_indexes(&self) -> usize {
        self.index_limit
    }

    fn max_index_length(&self) -> u64 {
        self.max_index_length
    }
}

#[cfg(test)]
mod tests {
    use super::MemoryStore;
    use crate::catalog::{Collection, Database, Document, Value};
    use crate::query::Query;
    use crate::storage::{DocumentStore, StoreError};

    fn collection(id: &str) -> Collection {
        Collection {
            id: id.into(),
            internal_id: 0,
            database_id: String::new(),
            name: id.into(),
            enabled: true,
            document_security: false,
            attributes: Vec::new(),
            indexes: Vec::new(),
            permissions: Default::default(),
        }
    }

    async fn seeded() -> MemoryStore {
        let store = MemoryStore::new();
        store
            .create_database(Database {
                id: "db".into(),
                internal_id: 0,
                name: "db".into(),
                enabled: true,
            })
            .await
            .expect("database");
        store
            .create_collection("db", collection("posts"))
            .await
            .expect("posts");
        store
            .create_collection("db", collection("authors"))
            .await
            .expect("authors");
        store
    }

    #[tokio::test]
    async fn assigns_internal_ids_and_rejects_duplicates() {
        let store = seeded().await;
        let posts = store
            .get_collection("db", "posts")
            .await
            .expect("get")
            .expect("exists");
        assert!(posts.internal_id > 0);
        let err = store
            .create_collection("db", collection("posts"))
            .await
            .expect_err("duplicate");
        assert!(matches!(err, StoreError::Duplicate { .. }));
    }

    #[tokio::test]
    async fn nested_documents_are_stored_as_references() {
        let store = seeded().await;
        let mut author = Document::new("a1").with_field("name", "Ada");
        author.collection_id = "authors".into();
        let post = Document::new("p1")
            .with_field("title", "Hello")
            .with_field("author", author);

        let stored = store
            .create_document("db", "posts", post)
            .await
            .expect("create");
        assert_eq!(stored.field("author"), Some(&Value::Reference("a1".into())));
        let author = store
            .get_document("db", "authors", "a1")
            .await
            .expect("get")
            .expect("nested author persisted");
        assert_eq!(author.field("name").and_then(Value::as_text), Some("Ada"));
    }

    #[tokio::test]
    async fn find_orders_paginates_and_filters() {
        let store = seeded().await;
        for (id, views) in [("p1", 5i64), ("p2", 1), ("p3", 9), ("p4", 3)] {
            store
                .create_document(
                    "db",
                    "posts",
                    Document::new(id)
                        .with_field("views", views)
                        .with_field("kind", "post"),
                )
                .await
                .expect("create");
        }
        let found = store
            .find_documents(
                "db",
                "posts",
                &[
                    Query::equal("kind", [Value::from("post")]),
                    Query::OrderDesc("views".into()),
                    Query::CursorAfter("p3".into()),
                    Query::Limit(2),
                ],
            )
            .await
            .expect("find");
        let ids: Vec<&str> = found.iter().map(|d| d.id.as_str()).collect();
        assert_eq!(ids, vec!["p1", "p4"]);

        let count = store
            .count_documents("db", "posts", &[], Some(3))
            .await
            .expect("count");
        assert_eq!(count, 3);
    }
}
