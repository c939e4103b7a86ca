pub mod memory;

pub use memory::{Fault, MemoryStore};

use crate::catalog::{Attribute, Collection, Database, Document, Index};
use crate::query::Query;
use std::future::Future;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    #[error("duplicate record '{id}'")]
    Duplicate { id: String },
    #[error("store limit exceeded: {message}")]
    LimitExceeded { message: String },
    #[error("record '{id}' not found")]
    NotFound { id: String },
    #[error("store backend error: {0}")]
    Backend(String),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// The document store the engine orchestrates.
///
/// Implementations own physical storage, internal id assignment and caching of
/// collection definitions. Collection definitions returned by
/// `get_collection` carry their attribute and index records; a store may
/// serve them from a cache until `purge_cached_collection` is called.
/// Nested `Document` values inside a written document are persisted into
/// their own collections and stored as references.
pub trait DocumentStore: Send + Sync {
    fn get_database(
        &self,
        database_id: &str,
    ) -> impl Future<Output = StoreResult<Option<Database>>> + Send;

    fn create_database(
        &self,
        database: Database,
    ) -> impl Future<Output = StoreResult<Database>> + Send;

    fn get_collection(
        &self,
        database_id: &str,
        collection_id: &str,
    ) -> impl Future<Output = StoreResult<Option<Collection>>> + Send;

    fn list_collections(
        &self,
        database_id: &str,
    ) -> impl Future<Output = StoreResult<Vec<Collection>>> + Send;

    fn count_collections(
        &self,
        database_id: &str,
    ) -> impl Future<Output = StoreResult<usize>> + Send;

    fn create_collection(
        &self,
        database_id: &str,
        collection: Collection,
    ) -> impl Future<Output = StoreResult<Collection>> + Send;

    /// Updates collection metadata; attribute and index records are untouched.
    fn update_collection(
        &self,
        database_id: &str,
        collection: Collection,
    ) -> impl Future<Output = StoreResult<Collection>> + Send;

    fn delete_collection(
        &self,
        database_id: &str,
        collection_id: &str,
    ) -> impl Future<Output = StoreResult<()>> + Send;

    fn create_attribute(
        &self,
        database_id: &str,
        collection_id: &str,
        attribute: Attribute,
    ) -> impl Future<Output = StoreResult<Attribute>> + Send;

    fn update_attribute(
        &self,
        database_id: &str,
        collection_id: &str,
        attribute: Attribute,
    ) -> impl Future<Output = StoreResult<Attribute>> + Send;

    fn delete_attribute(
        &self,
        database_id: &str,
        collection_id: &str,
        key: &str,
    ) -> impl Future<Output = StoreResult<()>> + Send;

    fn create_index(
        &self,
        database_id: &str,
        collection_id: &str,
        index: Index,
    ) -> impl Future<Output = StoreResult<Index>> + Send;

    fn update_index(
        &self,
        database_id: &str,
        collection_id: &str,
        index: Index,
    ) -> impl Future<Output = StoreResult<Index>> + Send;

    fn delete_index(
        &self,
        database_id: &str,
        collection_id: &str,
        key: &str,
    ) -> impl Future<Output = StoreResult<()>> + Send;

    fn get_document(
        &self,
        database_id: &str,
        collection_id: &str,
        document_id: &str,
    ) -> impl Future<Output = StoreResult<Option<Document>>> + Send;

    fn find_documents(
        &self,
        database_id: &str,
        collection_id: &str,
        queries: &[Query],
    ) -> impl Future<Output = StoreResult<Vec<Document>>> + Send;

    fn count_documents(
        &self,
        database_id: &str,
        collection_id: &str,
        queries: &[Query],
        ceiling: Option<usize>,
    ) -> impl Future<Output = StoreResult<usize>> + Send;

    fn create_document(
        &self,
        database_id: &str,
        collection_id: &str,
        document: Document,
    ) -> impl Future<Output = StoreResult<Document>> + Send;

    fn update_document(
        &self,
        database_id: &str,
        collection_id: &str,
        document: Document,
    ) -> impl Future<Output = StoreResult<Document>> + Send;

    fn delete_document(
        &self,
        database_id: &str,
        collection_id: &str,
        document_id: &str,
    ) -> impl Future<Output = StoreResult<()>> + Send;

    fn purge_cached_collection(
        &self,
        database_id: &str,
        collection_id: &str,
    ) -> impl Future<Output = StoreResult<()>> + Send;

    fn purge_cached_document(
        &self,
        database_id: &str,
        collection_id: &str,
        document_id: &str,
    ) -> impl Future<Output = StoreResult<()>> + Send;

    /// Maximum number of indexes per collection.
    fn limit_for_indexes(&self) -> usize;

    /// Maximum combined key length of one index.
    fn max_index_length(&self) -> u64;
}
