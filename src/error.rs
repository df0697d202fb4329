use std::fmt;

use crate::engine::EngineError;

/// Errors surfaced by platform operations. Messages are human readable and
/// returned to API callers as-is.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Error {
    NotFound(String),
    InvalidInput(String),
    Conflict(String),
    /// A dependency outside this process failed: a dedicated database that
    /// cannot be opened, or the provisioner.
    ExternalService(String),
    Internal(String),
    /// Bulk import stopped after `imported` records were committed.
    PartialImport { imported: usize, reason: String },
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    pub fn invalid(msg: impl Into<String>) -> Self {
        Error::InvalidInput(msg.into())
    }

    pub fn not_found(what: impl fmt::Display) -> Self {
        Error::NotFound(format!("{what} not found"))
    }

    /// Short label for logs and metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            Error::NotFound(_) => "not_found",
            Error::InvalidInput(_) => "invalid_input",
            Error::Conflict(_) => "conflict",
            Error::ExternalService(_) => "external_service",
            Error::Internal(_) => "internal",
            Error::PartialImport { .. } => "partial_import",
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::NotFound(msg)
            | Error::InvalidInput(msg)
            | Error::Conflict(msg)
            | Error::ExternalService(msg)
            | Error::Internal(msg) => f.write_str(msg),
            Error::PartialImport { imported, reason } => {
                write!(f, "import stopped after {imported} records: {reason}")
            }
        }
    }
}

impl std::error::Error for Error {}

impl From<EngineError> for Error {
    fn from(e: EngineError) -> Self {
        match e {
            EngineError::NotFound { .. } => Error::NotFound(e.to_string()),
            EngineError::Conflict(msg) => Error::Conflict(msg),
            EngineError::Rejected(msg) => Error::InvalidInput(msg),
            EngineError::LimitExceeded(_) => Error::InvalidInput(e.to_string()),
            EngineError::WalError(_) | EngineError::SchemaTooNew(_) | EngineError::NotADatabase(_) => {
                Error::Internal(e.to_string())
            }
        }
    }
}
