//! Error types for idbkit
//!
//! Every failure the engine can report maps onto one of the IndexedDB
//! error names. Errors are `Clone` because a request and its transaction
//! both keep the error that finished them.

use thiserror::Error;

/// Result type alias using IdbError
pub type Result<T> = std::result::Result<T, IdbError>;

/// Tag identifying the kind of an [`IdbError`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Data,
    Constraint,
    InvalidState,
    TransactionInactive,
    ReadOnly,
    Abort,
    NotFound,
    Type,
    Version,
    Syntax,
    InvalidAccess,
}

impl ErrorKind {
    /// DOMException-style name of this kind
    pub fn name(&self) -> &'static str {
        match self {
            ErrorKind::Data => "DataError",
            ErrorKind::Constraint => "ConstraintError",
            ErrorKind::InvalidState => "InvalidStateError",
            ErrorKind::TransactionInactive => "TransactionInactiveError",
            ErrorKind::ReadOnly => "ReadOnlyError",
            ErrorKind::Abort => "AbortError",
            ErrorKind::NotFound => "NotFoundError",
            ErrorKind::Type => "TypeError",
            ErrorKind::Version => "VersionError",
            ErrorKind::Syntax => "SyntaxError",
            ErrorKind::InvalidAccess => "InvalidAccessError",
        }
    }
}

/// Unified error type for engine operations
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum IdbError {
    // -------------------------------------------------------------------------
    // Key / Value Errors
    // -------------------------------------------------------------------------
    #[error("DataError: {0}")]
    Data(String),

    #[error("SyntaxError: {0}")]
    Syntax(String),

    #[error("TypeError: {0}")]
    Type(String),

    // -------------------------------------------------------------------------
    // Storage Errors
    // -------------------------------------------------------------------------
    #[error("ConstraintError: {0}")]
    Constraint(String),

    #[error("NotFoundError: {0}")]
    NotFound(String),

    // -------------------------------------------------------------------------
    // Transaction Errors
    // -------------------------------------------------------------------------
    #[error("InvalidStateError: {0}")]
    InvalidState(String),

    #[error("TransactionInactiveError: {0}")]
    TransactionInactive(String),

    #[error("ReadOnlyError: {0}")]
    ReadOnly(String),

    #[error("AbortError: {0}")]
    Abort(String),

    #[error("InvalidAccessError: {0}")]
    InvalidAccess(String),

    // -------------------------------------------------------------------------
    // Lifecycle Errors
    // -------------------------------------------------------------------------
    #[error("VersionError: {0}")]
    Version(String),
}

impl IdbError {
    /// The kind tag of this error
    pub fn kind(&self) -> ErrorKind {
        match self {
            IdbError::Data(_) => ErrorKind::Data,
            IdbError::Syntax(_) => ErrorKind::Syntax,
            IdbError::Type(_) => ErrorKind::Type,
            IdbError::Constraint(_) => ErrorKind::Constraint,
            IdbError::NotFound(_) => ErrorKind::NotFound,
            IdbError::InvalidState(_) => ErrorKind::InvalidState,
            IdbError::TransactionInactive(_) => ErrorKind::TransactionInactive,
            IdbError::ReadOnly(_) => ErrorKind::ReadOnly,
            IdbError::Abort(_) => ErrorKind::Abort,
            IdbError::InvalidAccess(_) => ErrorKind::InvalidAccess,
            IdbError::Version(_) => ErrorKind::Version,
        }
    }

    /// DOMException-style name ("DataError", "AbortError", ...)
    pub fn name(&self) -> &'static str {
        self.kind().name()
    }

    /// The human-readable message without the name prefix
    pub fn message(&self) -> &str {
        match self {
            IdbError::Data(m)
            | IdbError::Syntax(m)
            | IdbError::Type(m)
            | IdbError::Constraint(m)
            | IdbError::NotFound(m)
            | IdbError::InvalidState(m)
            | IdbError::TransactionInactive(m)
            | IdbError::ReadOnly(m)
            | IdbError::Abort(m)
            | IdbError::InvalidAccess(m)
            | IdbError::Version(m) => m,
        }
    }
}
