use crate::core::{DbError, Result};
use crate::storage::TableSchema;
use crate::strategy::{DefaultTransientErrorDetector, ExecutionStrategy, RetryPolicy};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

/// Database configuration
///
/// Declares the tables created when the database is opened and the retry
/// budget of its execution strategy. Built fluently or loaded from JSON:
///
/// ```json
/// {
///   "database": "blogging",
///   "tables": [
///     { "name": "blogs",
///       "columns": [ { "name": "id", "data_type": "integer", "nullable": false },
///                    { "name": "url", "data_type": "text" } ],
///       "primary_key": "id" }
///   ],
///   "retry": { "max_retry_count": 6, "max_retry_delay_ms": 100, "delay_coefficient_ms": 10 }
/// }
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Database name
    #[serde(default = "default_database_name")]
    pub database: String,

    /// Tables created at open
    #[serde(default)]
    pub tables: Vec<TableSchema>,

    /// Retry budget of the execution strategy
    #[serde(default)]
    pub retry: RetrySettings,
}

fn default_database_name() -> String {
    "resilientdb".to_string()
}

impl DatabaseConfig {
    /// Create a new configuration with no tables and the default retry budget
    pub fn new(database: &str) -> Self {
        Self {
            database: database.to_string(),
            tables: Vec::new(),
            retry: RetrySettings::default(),
        }
    }

    /// Declare a table
    pub fn table(mut self, schema: TableSchema) -> Self {
        self.tables.push(schema);
        self
    }

    /// Replace the retry settings
    pub fn retry(mut self, retry: RetrySettings) -> Self {
        self.retry = retry;
        self
    }

    /// Set the maximum number of retries
    pub fn max_retry_count(mut self, count: usize) -> Self {
        self.retry.max_retry_count = count;
        self
    }

    /// Set the per-retry delay ceiling
    pub fn max_retry_delay(mut self, delay: Duration) -> Self {
        self.retry.max_retry_delay_ms = duration_millis(delay);
        self
    }

    /// Set the backoff coefficient
    pub fn delay_coefficient(mut self, coefficient: Duration) -> Self {
        self.retry.delay_coefficient_ms = duration_millis(coefficient);
        self
    }

    /// Set the total elapsed-time ceiling
    pub fn max_elapsed(mut self, max_elapsed: Duration) -> Self {
        self.retry.max_elapsed_ms = Some(duration_millis(max_elapsed));
        self
    }

    /// Treat additional server error numbers as transient
    pub fn transient_error_codes(mut self, codes: impl IntoIterator<Item = i32>) -> Self {
        self.retry.additional_transient_codes.extend(codes);
        self
    }

    /// Parse from a JSON document
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json)
            .map_err(|e| DbError::Configuration(format!("Invalid config JSON: {}", e)))
    }

    /// Load from a JSON file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|e| {
            DbError::Configuration(format!("Cannot read {}: {}", path.display(), e))
        })?;
        Self::from_json(&contents)
    }

    /// Serialize to pretty JSON
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self)
            .map_err(|e| DbError::Configuration(format!("Cannot serialize config: {}", e)))
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.database.trim().is_empty() {
            return Err(DbError::Configuration("Database name cannot be empty".into()));
        }

        let mut names = HashSet::new();
        for table in &self.tables {
            table.validate()?;
            if !names.insert(table.name()) {
                return Err(DbError::Configuration(format!(
                    "Table '{}' is declared more than once",
                    table.name()
                )));
            }
        }

        self.retry.policy().validate()
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self::new(&default_database_name())
    }
}

/// Serializable retry budget
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrySettings {
    pub max_retry_count: usize,
    pub max_retry_delay_ms: u64,
    pub delay_coefficient_ms: u64,
    pub max_elapsed_ms: Option<u64>,
    pub additional_transient_codes: Vec<i32>,
}

impl Default for RetrySettings {
    fn default() -> Self {
        let policy = RetryPolicy::default();
        Self {
            max_retry_count: policy.max_retry_count(),
            max_retry_delay_ms: duration_millis(policy.max_retry_delay()),
            delay_coefficient_ms: duration_millis(policy.delay_coefficient()),
            max_elapsed_ms: None,
            additional_transient_codes: Vec::new(),
        }
    }
}

impl RetrySettings {
    pub fn policy(&self) -> RetryPolicy {
        let policy = RetryPolicy::new(
            self.max_retry_count,
            Duration::from_millis(self.max_retry_delay_ms),
        )
        .with_delay_coefficient(Duration::from_millis(self.delay_coefficient_ms));

        match self.max_elapsed_ms {
            Some(ms) => policy.with_max_elapsed(Duration::from_millis(ms)),
            None => policy,
        }
    }

    /// Build the execution strategy these settings describe
    pub fn strategy(&self) -> ExecutionStrategy {
        let detector = DefaultTransientErrorDetector::with_additional_error_codes(
            self.additional_transient_codes.iter().copied(),
        );
        ExecutionStrategy::new(self.policy(), Arc::new(detector))
    }
}

fn duration_millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}
