//! Everything needed to run units of work through an execution strategy.
//!
//! ```ignore
//! use resilientdb::prelude::*;
//! ```

pub use crate::{
    CancellationToken, Column, Connection, DataType, Database, DatabaseConfig, DbError,
    ExecutionResult, ExecutionStrategy, Result, RetryPolicy, Row, TableSchema, Value,
};
pub use futures::future::BoxFuture;
