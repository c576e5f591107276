// ============================================================================
// ResilientDB Library
// ============================================================================
//
// An in-memory transactional table store and a retrying execution strategy
// that runs units of work against it, retrying transient faults and
// verifying commits whose outcome was lost.
//
// ============================================================================

pub mod connection;
pub mod core;
pub mod facade;
pub mod prelude;
pub mod storage;
pub mod strategy;
pub mod testing;
pub mod transaction;

// Re-export main types for convenience
pub use core::{Column, DataType, DbError, Result, Row, Value};
pub use facade::{ConnectionInterceptor, Database, DatabaseStats, InjectedFault};
pub use storage::TableSchema;

// Re-export connection API
pub use connection::{
    Connection, ConnectionState,
    config::{DatabaseConfig, RetrySettings},
};

// Re-export execution strategy API
pub use strategy::{
    CancellationToken, DefaultTransientErrorDetector, ExecutionResult, ExecutionStrategy,
    FaultKind, RetryPolicy, TransientErrorDetector,
};
