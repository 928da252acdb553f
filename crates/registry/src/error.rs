use db::DbError;
use thiserror::Error;

/// Rejected input. Nothing was written.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum RegistryValidationError {
    #[error("Tool id must not be empty")]
    EmptyToolId,

    #[error("Tool name must not be empty")]
    EmptyName,

    #[error("Capability name must not be empty")]
    EmptyCapabilityName,

    #[error("{field} of capability '{capability}' must be within [0, 1], got {value}")]
    OutOfRange {
        capability: String,
        field: &'static str,
        value: f64,
    },

    #[error("Capability '{0}' is listed more than once")]
    DuplicateCapability(String),

    #[error("Tool '{0}' cannot depend on itself")]
    SelfDependency(String),

    #[error("Dependency on '{0}' is listed more than once")]
    DuplicateDependency(String),

    #[error("Tool '{0}' is already registered")]
    DuplicateTool(String),

    #[error("Unknown dependency target '{0}'")]
    UnknownDependency(String),

    #[error("Unknown replacement tool '{0}'")]
    UnknownReplacement(String),

    #[error("Tool '{0}' cannot replace itself")]
    SelfReplacement(String),

    #[error("Duration must be finite and non-negative, got {0}")]
    InvalidDuration(f64),
}

#[derive(Error, Debug)]
pub enum RegistryError {
    #[error("Validation failed: {0}")]
    Validation(#[from] RegistryValidationError),

    #[error("Tool not found: {0}")]
    ToolNotFound(String),

    /// The store refused a write the cache considered valid, usually because
    /// another writer got there first.
    #[error("Integrity conflict: {0}")]
    Integrity(String),

    #[error("Database error: {0}")]
    Database(DbError),
}

impl RegistryError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, RegistryError::Integrity(_))
    }
}

impl From<DbError> for RegistryError {
    fn from(err: DbError) -> Self {
        match err {
            DbError::Constraint(message) => RegistryError::Integrity(message),
            DbError::ToolNotFound(id) => RegistryError::ToolNotFound(id),
            other => RegistryError::Database(other),
        }
    }
}

impl From<sqlx::Error> for RegistryError {
    fn from(err: sqlx::Error) -> Self {
        DbError::from(err).into()
    }
}

pub type Result<T> = std::result::Result<T, RegistryError>;
