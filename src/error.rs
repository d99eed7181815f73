use thiserror::Error;

/// Errors raised by the dialect translation and transaction layers
#[derive(Debug, Error)]
pub enum ShimError {
    #[error("Transaction name is not unique: {0} is already in use")]
    DuplicateName(String),

    #[error("No active transaction: {0}")]
    NoActiveTransaction(String),

    /// Raised after the rollback itself has completed.
    #[error("Rollback discarded other active savepoints out of order")]
    OutOfOrderRollback,

    #[error("Malformed SQL fragment: {0}")]
    MalformedFragment(String),

    #[error("Explicit commit is not allowed for deferred-commit transaction scopes")]
    ExplicitCommitNotAllowed,

    #[error("Cannot commit transaction {0} after it was rolled back")]
    CommitAfterRollback(String),

    #[error("Commit of the root transaction failed")]
    CommitFailed,

    #[error("Invalid condition: {0}")]
    InvalidCondition(String),

    #[error("Unknown condition operator: {0}")]
    UnknownOperator(String),

    #[error("; is not supported in SQL strings. Use only one statement at a time.")]
    MultipleStatements,

    #[error("Placeholder mismatch: {expected} bound values but {found} placeholders in query")]
    PlaceholderMismatch { expected: usize, found: usize },

    #[error("Invalid SQL: {0}")]
    InvalidSql(String),

    #[error("Execution error: {0}")]
    Execution(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl ShimError {
    pub fn malformed(message: impl Into<String>) -> Self {
        Self::MalformedFragment(message.into())
    }

    pub fn no_active(message: impl Into<String>) -> Self {
        Self::NoActiveTransaction(message.into())
    }
}

impl From<config::ConfigError> for ShimError {
    fn from(err: config::ConfigError) -> Self {
        ShimError::Config(err.to_string())
    }
}

/// Result alias used across the crate
pub type ShimResult<T> = Result<T, ShimError>;
