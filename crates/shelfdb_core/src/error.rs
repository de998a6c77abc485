//! Error types for ShelfDB core.

use thiserror::Error;

/// Result type for core operations.
pub type CoreResult<T> = Result<T, CoreError>;

/// Errors that can occur in ShelfDB core operations.
///
/// Each variant corresponds to a named failure condition. The message is
/// informational only; callers should match on the variant (or on
/// [`CoreError::name`]).
///
/// Errors are `Clone` because a single failure is both delivered to the
/// failing request and recorded as the transaction's abort cause.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum CoreError {
    /// A key or derived key failed validation, or a key path and key
    /// generator combination cannot produce a key.
    #[error("DataError: {0}")]
    DataError(String),

    /// A uniqueness constraint was violated.
    #[error("ConstraintError: {0}")]
    ConstraintError(String),

    /// A referenced database, object store or index does not exist.
    #[error("NotFoundError: {0}")]
    NotFoundError(String),

    /// The operation is not allowed in the current lifecycle state.
    #[error("InvalidStateError: {0}")]
    InvalidStateError(String),

    /// A request was made against a transaction that is not active.
    #[error("TransactionInactiveError: {0}")]
    TransactionInactiveError(String),

    /// A mutation was attempted in a read-only transaction.
    #[error("ReadOnlyError: {0}")]
    ReadOnlyError(String),

    /// The call is structurally invalid.
    #[error("InvalidAccessError: {0}")]
    InvalidAccessError(String),

    /// The owning transaction was aborted before the request completed.
    #[error("AbortError: {0}")]
    AbortError(String),

    /// A database was opened with a version lower than its current one.
    #[error("VersionError: {0}")]
    VersionError(String),

    /// A key path is malformed.
    #[error("SyntaxError: {0}")]
    SyntaxError(String),

    /// The storage backend failed.
    #[error("storage error: {message}")]
    Storage {
        /// Description of the failure.
        message: String,
    },

    /// A persisted value could not be encoded or decoded.
    #[error("codec error: {message}")]
    Codec {
        /// Description of the failure.
        message: String,
    },
}

impl CoreError {
    /// Creates a data error.
    pub fn data(message: impl Into<String>) -> Self {
        Self::DataError(message.into())
    }

    /// Creates a constraint error.
    pub fn constraint(message: impl Into<String>) -> Self {
        Self::ConstraintError(message.into())
    }

    /// Creates a not found error.
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::NotFoundError(message.into())
    }

    /// Creates an invalid state error.
    pub fn invalid_state(message: impl Into<String>) -> Self {
        Self::InvalidStateError(message.into())
    }

    /// Creates a transaction inactive error with the standard message.
    pub fn inactive() -> Self {
        Self::TransactionInactiveError("the transaction is not active".into())
    }

    /// Creates a read-only error with the standard message.
    pub fn read_only() -> Self {
        Self::ReadOnlyError("the transaction is read-only".into())
    }

    /// Creates an invalid access error.
    pub fn invalid_access(message: impl Into<String>) -> Self {
        Self::InvalidAccessError(message.into())
    }

    /// Creates an abort error.
    pub fn abort(message: impl Into<String>) -> Self {
        Self::AbortError(message.into())
    }

    /// Creates a version error.
    pub fn version(message: impl Into<String>) -> Self {
        Self::VersionError(message.into())
    }

    /// Creates a syntax error.
    pub fn syntax(message: impl Into<String>) -> Self {
        Self::SyntaxError(message.into())
    }

    /// Creates a codec error.
    pub fn codec(message: impl Into<String>) -> Self {
        Self::Codec {
            message: message.into(),
        }
    }

    /// Returns the condition name, e.g. `"ConstraintError"`.
    ///
    /// Collaborator failures report `"UnknownError"`.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::DataError(_) => "DataError",
            Self::ConstraintError(_) => "ConstraintError",
            Self::NotFoundError(_) => "NotFoundError",
            Self::InvalidStateError(_) => "InvalidStateError",
            Self::TransactionInactiveError(_) => "TransactionInactiveError",
            Self::ReadOnlyError(_) => "ReadOnlyError",
            Self::InvalidAccessError(_) => "InvalidAccessError",
            Self::AbortError(_) => "AbortError",
            Self::VersionError(_) => "VersionError",
            Self::SyntaxError(_) => "SyntaxError",
            Self::Storage { .. } | Self::Codec { .. } => "UnknownError",
        }
    }
}

impl From<shelfdb_storage::StorageError> for CoreError {
    fn from(err: shelfdb_storage::StorageError) -> Self {
        Self::Storage {
            message: err.to_string(),
        }
    }
}

impl From<shelfdb_codec::CodecError> for CoreError {
    fn from(err: shelfdb_codec::CodecError) -> Self {
        Self::codec(err.to_string())
    }
}

impl From<serde_json::Error> for CoreError {
    fn from(err: serde_json::Error) -> Self {
        Self::codec(err.to_string())
    }
}
