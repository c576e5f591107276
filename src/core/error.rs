use thiserror::Error;

#[derive(Error, Debug)]
pub enum DbError {
    #[error("Table '{0}' already exists")]
    TableExists(String),

    #[error("Table '{0}' not found")]
    TableNotFound(String),

    #[error("Column '{0}' not found in table '{1}'")]
    ColumnNotFound(String, String),

    #[error("Type mismatch: {0}")]
    TypeMismatch(String),

    #[error("Constraint violation: {0}")]
    ConstraintViolation(String),

    #[error("Execution error: {0}")]
    ExecutionError(String),

    #[error("Invalid configuration: {0}")]
    Configuration(String),

    // ------------------------------------------------------------------
    // Transport / driver faults
    // ------------------------------------------------------------------
    #[error("Connection failure: {0}")]
    ConnectionFailure(String),

    /// The commit was sent but its acknowledgement never arrived; the
    /// server may or may not have applied it.
    #[error("Commit outcome unknown: {0}")]
    CommitOutcomeUnknown(String),

    #[error("Timeout: {0}")]
    Timeout(String),

    #[error("Server error {code}: {message}")]
    Server { code: i32, message: String },

    // ------------------------------------------------------------------
    // Execution strategy outcomes
    // ------------------------------------------------------------------
    #[error("Maximum number of retries exceeded after {attempts} transient failure(s)")]
    RetryLimitExceeded {
        attempts: usize,
        #[source]
        source: Box<DbError>,
    },

    #[error("Operation was cancelled")]
    Cancelled,
}

pub type Result<T> = std::result::Result<T, DbError>;

impl DbError {
    /// Returns `true` for the distinguished "gave up after retrying" error.
    pub fn is_retry_limit_exceeded(&self) -> bool {
        matches!(self, DbError::RetryLimitExceeded { .. })
    }

    /// The last transient error seen before the retry budget ran out.
    pub fn last_transient_error(&self) -> Option<&DbError> {
        match self {
            DbError::RetryLimitExceeded { source, .. } => Some(source),
            _ => None,
        }
    }
}
