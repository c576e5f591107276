use super::cancel::CancellationToken;
use super::execution::{ExecutionResult, ExecutionStrategy};
use crate::connection::Connection;
use crate::core::{DbError, Result};
use crate::facade::Database;
use futures::future::BoxFuture;
use std::future::Future;

/// Drive `future` to completion on a private current-thread runtime.
///
/// Fails instead of panicking when the caller is already inside a tokio
/// runtime, where blocking the thread would stall its other tasks.
fn block_on<F: Future>(future: F) -> Result<F::Output> {
    if tokio::runtime::Handle::try_current().is_ok() {
        return Err(DbError::ExecutionError(
            "blocking execution called from within an async runtime".into(),
        ));
    }

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .map_err(|e| DbError::ExecutionError(format!("failed to start runtime: {}", e)))?;

    Ok(runtime.block_on(future))
}

impl ExecutionStrategy {
    /// Blocking form of [`execute`](Self::execute).
    pub fn execute_blocking<S, T, Op>(
        &self,
        state: &mut S,
        operation: Op,
        cancel: &CancellationToken,
    ) -> Result<T>
    where
        S: Send,
        T: Send,
        Op: for<'a> FnMut(&'a mut S) -> BoxFuture<'a, Result<T>> + Send,
    {
        block_on(self.execute(state, operation, cancel))?
    }

    /// Blocking form of
    /// [`execute_with_verification`](Self::execute_with_verification).
    pub fn execute_with_verification_blocking<S, T, Op, V>(
        &self,
        state: &mut S,
        operation: Op,
        verify_succeeded: V,
        cancel: &CancellationToken,
    ) -> Result<T>
    where
        S: Send,
        T: Send,
        Op: for<'a> FnMut(&'a mut S) -> BoxFuture<'a, Result<T>> + Send,
        V: for<'a> FnMut(&'a mut S) -> BoxFuture<'a, Result<ExecutionResult<T>>> + Send,
    {
        block_on(self.execute_with_verification(state, operation, verify_succeeded, cancel))?
    }

    /// Blocking form of
    /// [`execute_in_transaction`](Self::execute_in_transaction).
    pub fn execute_in_transaction_blocking<S, T, Op, V>(
        &self,
        db: &Database,
        state: &mut S,
        operation: Op,
        verify_succeeded: V,
        cancel: &CancellationToken,
    ) -> Result<T>
    where
        S: Send,
        T: Send,
        Op: for<'a> FnMut(&'a mut S, &'a mut Connection) -> BoxFuture<'a, Result<T>> + Send,
        V: for<'a> FnMut(&'a mut S, &'a Database) -> BoxFuture<'a, Result<bool>> + Send,
    {
        block_on(self.execute_in_transaction(db, state, operation, verify_succeeded, cancel))?
    }
}
