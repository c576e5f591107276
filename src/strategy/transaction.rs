use super::cancel::CancellationToken;
use super::execution::{ExecutionResult, ExecutionStrategy};
use crate::connection::Connection;
use crate::core::{DbError, Result};
use crate::facade::Database;
use futures::future::BoxFuture;

/// Per-invocation bookkeeping for [`ExecutionStrategy::execute_in_transaction`].
struct TransactionalState<'s, S, T, Op, V> {
    state: &'s mut S,
    db: Database,
    operation: Op,
    verify_succeeded: V,
    commit_failed: bool,
    result: Option<T>,
}

impl ExecutionStrategy {
    /// Run `operation` inside a transaction on a fresh connection, retrying
    /// the whole transaction on transient faults.
    ///
    /// `verify_succeeded` is asked whether the transaction's effect is
    /// persisted only when a fault hit the commit itself; faults raised
    /// earlier are known not to have committed anything and are retried
    /// straight away. It receives the database so it can open its own
    /// connection, and must only read.
    pub async fn execute_in_transaction<S, T, Op, V>(
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
        let mut txn_state = TransactionalState {
            state,
            db: db.clone(),
            operation,
            verify_succeeded,
            commit_failed: false,
            result: None,
        };

        self.execute_with_verification(
            &mut txn_state,
            |s| {
                Box::pin(async move {
                    s.commit_failed = false;
                    s.result = None;

                    let mut conn = s.db.open().await?;
                    conn.begin().await?;
                    let result = (s.operation)(&mut *s.state, &mut conn).await?;
                    s.result = Some(result);

                    s.commit_failed = true;
                    conn.commit().await?;
                    s.commit_failed = false;

                    s.result.take().ok_or_else(|| {
                        DbError::ExecutionError("transaction result was already taken".into())
                    })
                })
            },
            |s| {
                Box::pin(async move {
                    if !s.commit_failed {
                        return Ok::<_, DbError>(ExecutionResult::NotSucceeded);
                    }

                    let db = s.db.clone();
                    if !(s.verify_succeeded)(&mut *s.state, &db).await? {
                        return Ok(ExecutionResult::NotSucceeded);
                    }

                    Ok(match s.result.take() {
                        Some(result) => ExecutionResult::Succeeded(result),
                        None => ExecutionResult::NotSucceeded,
                    })
                })
            },
            cancel,
        )
        .await
    }
}
