use ulid::Ulid;

#[derive(Debug)]
pub enum EngineError {
    NotFound { entity: &'static str, id: Ulid },
    Conflict(String),
    /// The request is well-formed but not allowed in the current state
    /// (wrong service for a resource, illegal status transition).
    Rejected(String),
    LimitExceeded(&'static str),
    WalError(String),
    SchemaTooNew(u32),
    /// The file exists and has content but holds no valid log entry.
    NotADatabase(String),
}

impl EngineError {
    pub(crate) fn not_found(entity: &'static str, id: Ulid) -> Self {
        EngineError::NotFound { entity, id }
    }
}

impl std::fmt::Display for EngineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineError::NotFound { entity, id } => write!(f, "{entity} not found: {id}"),
            EngineError::Conflict(msg) => write!(f, "conflict: {msg}"),
            EngineError::Rejected(msg) => f.write_str(msg),
            EngineError::LimitExceeded(msg) => write!(f, "limit exceeded: {msg}"),
            EngineError::WalError(e) => write!(f, "WAL error: {e}"),
            EngineError::NotADatabase(path) => write!(f, "{path} is not a zeroq database"),
            EngineError::SchemaTooNew(v) => write!(
                f,
                "database schema version {v} is newer than supported version {}",
                crate::limits::SCHEMA_VERSION
            ),
        }
    }
}

impl std::error::Error for EngineError {}

impl From<std::io::Error> for EngineError {
    fn from(e: std::io::Error) -> Self {
        EngineError::WalError(e.to_string())
    }
}
