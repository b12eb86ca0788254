//! Unified error types for the pipeline engine.
//!
//! Error codes:
//! - CONFIG_001-002: Configuration and resolution errors
//! - TYPE_001: Wrong processor kind or unregistered model
//! - IMPL_001: Default behaviour used without the required declarations
//! - DB_001-004: Store errors
//! - ENDPOINT_001: Alert delivery errors
//! - DECODE_001: Row to model conversion errors

use thiserror::Error;

/// Result type alias using our Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Store error codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DbErrorCode {
    /// DB_001: Could not connect or acquire a connection
    ConnectFailed,
    /// DB_002: A query failed to execute
    QueryFailed,
    /// DB_003: Staged changes could not be written
    FlushFailed,
    /// DB_004: Commit or rollback failed
    TransactionFailed,
}

impl DbErrorCode {
    /// Get the error code string.
    pub fn code(&self) -> &'static str {
        match self {
            Self::ConnectFailed => "DB_001",
            Self::QueryFailed => "DB_002",
            Self::FlushFailed => "DB_003",
            Self::TransactionFailed => "DB_004",
        }
    }
}

/// Unified error type for the pipeline engine.
#[derive(Debug, Error)]
pub enum Error {
    /// A setting references something that exists but has the wrong shape,
    /// or a registration collides with an existing one.
    #[error("improperly configured: {0}")]
    ImproperlyConfigured(String),

    /// A configured path does not resolve to any registration.
    #[error("import error: {0}")]
    Import(String),

    #[error("type error: {0}")]
    Type(String),

    #[error("not implemented: {0}")]
    NotImplemented(String),

    /// Store error with code.
    #[error("[{code}] {message}")]
    Database { code: &'static str, message: String },

    #[error("endpoint error: {0}")]
    Endpoint(String),

    #[error("decode error: {0}")]
    Decode(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    pub fn improperly_configured(msg: impl Into<String>) -> Self {
        Self::ImproperlyConfigured(msg.into())
    }

    pub fn import(msg: impl Into<String>) -> Self {
        Self::Import(msg.into())
    }

    pub fn type_error(msg: impl Into<String>) -> Self {
        Self::Type(msg.into())
    }

    pub fn not_implemented(msg: impl Into<String>) -> Self {
        Self::NotImplemented(msg.into())
    }

    /// Create a store error.
    pub fn database(code: DbErrorCode, msg: impl Into<String>) -> Self {
        Self::Database {
            code: code.code(),
            message: msg.into(),
        }
    }

    pub fn endpoint(msg: impl Into<String>) -> Self {
        Self::Endpoint(msg.into())
    }

    pub fn decode(msg: impl Into<String>) -> Self {
        Self::Decode(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// Get the error code if this is a coded error.
    pub fn error_code(&self) -> Option<&'static str> {
        match self {
            Self::ImproperlyConfigured(_) => Some("CONFIG_001"),
            Self::Import(_) => Some("CONFIG_002"),
            Self::Type(_) => Some("TYPE_001"),
            Self::NotImplemented(_) => Some("IMPL_001"),
            Self::Database { code, .. } => Some(code),
            Self::Endpoint(_) => Some("ENDPOINT_001"),
            Self::Decode(_) => Some("DECODE_001"),
            _ => None,
        }
    }

    /// Whether the error stems from configuration rather than execution.
    pub fn is_configuration(&self) -> bool {
        matches!(self, Self::ImproperlyConfigured(_) | Self::Import(_))
    }
}
