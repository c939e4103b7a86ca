pub mod authorization;
pub mod catalog;
pub mod config;
pub mod declarative;
pub mod engine;
pub mod error;
pub mod events;
pub mod permission;
pub mod query;
pub mod resolver;
pub mod role;
pub mod storage;

pub use authorization::{Authorization, BypassGuard};
pub use catalog::{
    Attribute, AttributeType, Collection, Database, Document, Index, Status, Value,
};
pub use config::EngineConfig;
pub use declarative::{AttributeSpec, AttributeUpdate, CollectionSpec, IndexSpec, RelationshipSpec};
pub use engine::{DocumentList, MirrorWrite, SchemaEngine, WorkerOutcome};
pub use error::{ErrorCode, ResourceType, SchemaError};
pub use events::{ChannelSink, EventSink, MemorySink, SchemaEvent, SchemaEventKind};
pub use permission::{Action, Permission, PermissionSet};
pub use role::Role;
pub use storage::{DocumentStore, MemoryStore, StoreError};
