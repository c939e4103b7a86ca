use crate::catalog::Status;
use crate::permission::PermissionError;
use crate::storage::StoreError;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceType {
    Database,
    Collection,
    Attribute,
    Index,
    Document,
}

impl std::fmt::Display for ResourceType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ResourceType::Database => write!(f, "database"),
            ResourceType::Collection => write!(f, "collection"),
            ResourceType::Attribute => write!(f, "attribute"),
            ResourceType::Index => write!(f, "index"),
            ResourceType::Document => write!(f, "document"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    DatabaseNotFound,
    CollectionNotFound,
    AttributeNotFound,
    IndexNotFound,
    DocumentNotFound,
    DatabaseAlreadyExists,
    CollectionAlreadyExists,
    AttributeAlreadyExists,
    IndexAlreadyExists,
    DocumentAlreadyExists,
    LimitExceeded,
    InvalidValue,
    Unauthorized,
    TypeMismatch,
    TruncateUnsupported,
    NotAvailable,
    Store,
}

impl ErrorCode {
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorCode::DatabaseNotFound => "database_not_found",
            ErrorCode::CollectionNotFound => "collection_not_found",
            ErrorCode::AttributeNotFound => "attribute_not_found",
            ErrorCode::IndexNotFound => "index_not_found",
            ErrorCode::DocumentNotFound => "document_not_found",
            ErrorCode::DatabaseAlreadyExists => "database_already_exists",
            ErrorCode::CollectionAlreadyExists => "collection_already_exists",
            ErrorCode::AttributeAlreadyExists => "attribute_already_exists",
            ErrorCode::IndexAlreadyExists => "index_already_exists",
            ErrorCode::DocumentAlreadyExists => "document_already_exists",
            ErrorCode::LimitExceeded => "limit_exceeded",
            ErrorCode::InvalidValue => "invalid_value",
            ErrorCode::Unauthorized => "unauthorized",
            ErrorCode::TypeMismatch => "type_mismatch",
            ErrorCode::TruncateUnsupported => "truncate_unsupported",
            ErrorCode::NotAvailable => "not_available",
            ErrorCode::Store => "store",
        }
    }

    /// Status code the HTTP boundary should render for this kind.
    pub fn status_code(self) -> u16 {
        match self {
            ErrorCode::DatabaseNotFound
            | ErrorCode::CollectionNotFound
            | ErrorCode::AttributeNotFound
            | ErrorCode::IndexNotFound
            | ErrorCode::DocumentNotFound => 404,
            ErrorCode::DatabaseAlreadyExists
            | ErrorCode::CollectionAlreadyExists
            | ErrorCode::AttributeAlreadyExists
            | ErrorCode::IndexAlreadyExists
            | ErrorCode::DocumentAlreadyExists => 409,
            ErrorCode::LimitExceeded
            | ErrorCode::InvalidValue
            | ErrorCode::TypeMismatch
            | ErrorCode::TruncateUnsupported
            | ErrorCode::NotAvailable => 400,
            ErrorCode::Unauthorized => 401,
            ErrorCode::Store => 500,
        }
    }
}

#[derive(Debug, Error)]
pub enum SchemaError {
    #[error("{resource_type} '{resource_id}' not found")]
    NotFound {
        resource_type: ResourceType,
        resource_id: String,
    },
    #[error("{resource_type} '{resource_id}' already exists")]
    AlreadyExists {
        resource_type: ResourceType,
        resource_id: String,
    },
    #[error("{resource_type} limit exceeded: {message}")]
    LimitExceeded {
        resource_type: ResourceType,
        message: String,
    },
    #[error("invalid value: {0}")]
    InvalidValue(String),
    #[error("unauthorized: {0}")]
    Unauthorized(String),
    #[error("type mismatch on attribute '{attribute}': expected {expected}, got {actual}")]
    TypeMismatch {
        attribute: String,
        expected: String,
        actual: String,
    },
    #[error("resizing attribute '{attribute}' from {from} to {to} would truncate existing data")]
    TruncateUnsupported {
        attribute: String,
        from: u64,
        to: u64,
    },
    #[error("{resource_type} '{resource_id}' is {status}, operation not available")]
    NotAvailable {
        resource_type: ResourceType,
        resource_id: String,
        status: Status,
    },
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl SchemaError {
    pub fn code(&self) -> ErrorCode {
        match self {
            SchemaError::NotFound { resource_type, .. } => match resource_type {
                ResourceType::Database => ErrorCode::DatabaseNotFound,
                ResourceType::Collection => ErrorCode::CollectionNotFound,
                ResourceType::Attribute => ErrorCode::AttributeNotFound,
                ResourceType::Index => ErrorCode::IndexNotFound,
                ResourceType::Document => ErrorCode::DocumentNotFound,
            },
            SchemaError::AlreadyExists { resource_type, .. } => match resource_type {
                ResourceType::Database => ErrorCode::DatabaseAlreadyExists,
                ResourceType::Collection => ErrorCode::CollectionAlreadyExists,
                ResourceType::Attribute => ErrorCode::AttributeAlreadyExists,
                ResourceType::Index => ErrorCode::IndexAlreadyExists,
                ResourceType::Document => ErrorCode::DocumentAlreadyExists,
            },
            SchemaError::LimitExceeded { .. } => ErrorCode::LimitExceeded,
            SchemaError::InvalidValue(_) => ErrorCode::InvalidValue,
            SchemaError::Unauthorized(_) => ErrorCode::Unauthorized,
            SchemaError::TypeMismatch { .. } => ErrorCode::TypeMismatch,
            SchemaError::TruncateUnsupported { .. } => ErrorCode::TruncateUnsupported,
            SchemaError::NotAvailable { .. } => ErrorCode::NotAvailable,
            SchemaError::Store(_) => ErrorCode::Store,
        }
    }

    pub fn code_str(&self) -> &'static str {
        self.code().as_str()
    }

    pub fn status_code(&self) -> u16 {
        self.code().status_code()
    }

    pub(crate) fn not_found(resource_type: ResourceType, resource_id: impl Into<String>) -> Self {
        SchemaError::NotFound {
            resource_type,
            resource_id: resource_id.into(),
        }
    }

    /// Translates a store failure into the typed error for `resource`.
    /// Failures without a typed counterpart pass through as `Store`.
    pub(crate) fn from_store(
        err: StoreError,
        resource_type: ResourceType,
        resource_id: &str,
    ) -> Self {
        match err {
            StoreError::Duplicate { .. } => SchemaError::AlreadyExists {
                resource_type,
                resource_id: resource_id.to_string(),
            },
            StoreError::LimitExceeded { message } => SchemaError::LimitExceeded {
                resource_type,
                message,
            },
            StoreError::NotFound { .. } => SchemaError::NotFound {
                resource_type,
                resource_id: resource_id.to_string(),
            },
            other => SchemaError::Store(other),
        }
    }
}

impl From<PermissionError> for SchemaError {
    fn from(err: PermissionError) -> Self {
        SchemaError::InvalidValue(err.to_string())
    }
}
