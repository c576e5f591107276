pub mod config;

use crate::core::{DbError, Result, Row, Value};
use crate::facade::{Database, InjectedFault};
use crate::storage::Table;
use crate::transaction::{Change, Transaction, TransactionId};
use tracing::debug;

/// Database connection handle
///
/// Owned by exactly one unit of work at a time. Writes issued inside a
/// transaction are staged and reach the store only on [`commit`]; outside a
/// transaction every write is applied immediately.
///
/// A transport fault leaves the connection broken: every later command
/// fails with [`DbError::ConnectionFailure`] and a fresh connection must be
/// opened.
///
/// [`commit`]: Connection::commit
pub struct Connection {
    /// Unique connection ID
    id: u64,
    /// Shared database handle
    db: Database,
    /// Connection state
    state: ConnectionState,
    /// Open transaction (if any)
    transaction: Option<Transaction>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Active,
    InTransaction,
    Broken,
    Closed,
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConnectionState::Active => write!(f, "active"),
            ConnectionState::InTransaction => write!(f, "in transaction"),
            ConnectionState::Broken => write!(f, "broken"),
            ConnectionState::Closed => write!(f, "closed"),
        }
    }
}

impl Connection {
    pub(crate) fn new(id: u64, db: Database) -> Self {
        Self {
            id,
            db,
            state: ConnectionState::Active,
            transaction: None,
        }
    }

    /// Get connection ID
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn transaction_id(&self) -> Option<TransactionId> {
        self.transaction.as_ref().map(|txn| txn.id())
    }

    /// Check if connection is in a transaction
    pub fn is_in_transaction(&self) -> bool {
        self.state == ConnectionState::InTransaction
    }

    /// Check if connection can still run commands
    pub fn is_active(&self) -> bool {
        matches!(
            self.state,
            ConnectionState::Active | ConnectionState::InTransaction
        )
    }

    pub fn is_broken(&self) -> bool {
        self.state == ConnectionState::Broken
    }

    // ------------------------------------------------------------------
    // Writes
    // ------------------------------------------------------------------

    /// Insert one row; returns the number of inserted rows
    pub async fn insert(&mut self, table: &str, row: Row) -> Result<usize> {
        let change = Change::InsertRow {
            table: table.to_string(),
            row,
        };
        self.write("insert", vec![change]).await
    }

    /// Insert many rows in a single round trip
    pub async fn insert_batch(&mut self, table: &str, rows: Vec<Row>) -> Result<usize> {
        let changes = rows
            .into_iter()
            .map(|row| Change::InsertRow {
                table: table.to_string(),
                row,
            })
            .collect();
        self.write("insert_batch", changes).await
    }

    /// Delete every row whose `column` equals `value`
    pub async fn delete_where(
        &mut self,
        table: &str,
        column: &str,
        value: impl Into<Value>,
    ) -> Result<usize> {
        let change = Change::DeleteWhere {
            table: table.to_string(),
            column: column.to_string(),
            value: value.into(),
        };
        self.write("delete", vec![change]).await
    }

    /// Set `set_column` on every row whose `column` equals `value`
    pub async fn update_where(
        &mut self,
        table: &str,
        column: &str,
        value: impl Into<Value>,
        set_column: &str,
        set_value: impl Into<Value>,
    ) -> Result<usize> {
        let change = Change::UpdateWhere {
            table: table.to_string(),
            column: column.to_string(),
            value: value.into(),
            set_column: set_column.to_string(),
            set_value: set_value.into(),
        };
        self.write("update", vec![change]).await
    }

    // ------------------------------------------------------------------
    // Reads
    // ------------------------------------------------------------------

    pub async fn scan(&mut self, table: &str) -> Result<Vec<Row>> {
        self.read("scan", table, |t| Ok(t.rows().to_vec())).await
    }

    pub async fn count(&mut self, table: &str) -> Result<usize> {
        self.read("count", table, |t| Ok(t.row_count())).await
    }

    pub async fn find(
        &mut self,
        table: &str,
        column: &str,
        value: impl Into<Value>,
    ) -> Result<Vec<Row>> {
        let value = value.into();
        self.read("find", table, |t| t.find(column, &value)).await
    }

    // ------------------------------------------------------------------
    // Transaction control
    // ------------------------------------------------------------------

    /// Begin a new transaction
    pub async fn begin(&mut self) -> Result<()> {
        self.ensure_usable()?;

        if self.state == ConnectionState::InTransaction {
            return Err(DbError::ExecutionError("Transaction already active".into()));
        }

        let txn = Transaction::new(TransactionId::new());
        debug!(connection = self.id, transaction = %txn.id(), "transaction started");
        self.transaction = Some(txn);
        self.state = ConnectionState::InTransaction;
        Ok(())
    }

    /// Commit the current transaction
    ///
    /// Fails with [`DbError::CommitOutcomeUnknown`] when the acknowledgement
    /// is lost; the changes may or may not have been applied.
    pub async fn commit(&mut self) -> Result<()> {
        self.ensure_usable()?;

        let mut txn = self
            .transaction
            .take()
            .ok_or_else(|| DbError::ExecutionError("No active transaction".into()))?;
        self.state = ConnectionState::Active;

        let fault = self.db.record_commit();
        if fault == InjectedFault::Before {
            txn.rollback()?;
            return Err(self.lose_commit(txn.id()));
        }

        let changes = txn.commit()?;
        self.db.storage().write().await.apply(&changes)?;

        if fault == InjectedFault::After {
            return Err(self.lose_commit(txn.id()));
        }

        debug!(
            connection = self.id,
            transaction = %txn.id(),
            changes = changes.len(),
            elapsed_ms = txn.duration().as_millis() as u64,
            "transaction committed"
        );
        Ok(())
    }

    /// Rollback the current transaction
    pub async fn rollback(&mut self) -> Result<()> {
        self.ensure_usable()?;

        let mut txn = self
            .transaction
            .take()
            .ok_or_else(|| DbError::ExecutionError("No active transaction".into()))?;
        self.state = ConnectionState::Active;

        txn.rollback()?;
        debug!(connection = self.id, transaction = %txn.id(), "transaction rolled back");
        Ok(())
    }

    /// Close the connection, discarding any open transaction
    pub fn close(&mut self) -> Result<()> {
        self.discard_transaction();
        self.state = ConnectionState::Closed;
        Ok(())
    }

    // ------------------------------------------------------------------
    // Internals
    // ------------------------------------------------------------------

    fn ensure_usable(&self) -> Result<()> {
        match self.state {
            ConnectionState::Closed => Err(DbError::ExecutionError("Connection is closed".into())),
            ConnectionState::Broken => Err(DbError::ConnectionFailure(format!(
                "Connection {} is broken",
                self.id
            ))),
            ConnectionState::Active | ConnectionState::InTransaction => Ok(()),
        }
    }

    async fn write(&mut self, command: &str, changes: Vec<Change>) -> Result<usize> {
        self.ensure_usable()?;

        let fault = self.db.record_execution(command);
        if fault == InjectedFault::Before {
            return Err(self.break_connection(command));
        }

        let affected = match self.transaction.as_mut() {
            Some(txn) => {
                let storage = self.db.storage().read().await;
                let mut pending = txn.changes().to_vec();
                let mut affected = 0;
                for change in &changes {
                    affected += storage.stage(&pending, change)?;
                    pending.push(change.clone());
                }
                for change in changes {
                    txn.record_change(change)?;
                }
                affected
            }
            None => {
                let mut storage = self.db.storage().write().await;
                storage.apply(&changes)?.into_iter().sum()
            }
        };

        if fault == InjectedFault::After {
            return Err(self.break_connection(command));
        }

        Ok(affected)
    }

    async fn read<R>(
        &mut self,
        command: &str,
        table: &str,
        f: impl FnOnce(&Table) -> Result<R>,
    ) -> Result<R> {
        self.ensure_usable()?;

        let fault = self.db.record_execution(command);
        if fault == InjectedFault::Before {
            return Err(self.break_connection(command));
        }

        let result = {
            let storage = self.db.storage().read().await;
            match &self.transaction {
                Some(txn) => f(&storage.preview(table, txn.changes())?),
                None => f(storage.get_table(table)?),
            }
        }?;

        if fault == InjectedFault::After {
            return Err(self.break_connection(command));
        }

        Ok(result)
    }

    fn break_connection(&mut self, command: &str) -> DbError {
        self.discard_transaction();
        self.state = ConnectionState::Broken;
        debug!(connection = self.id, command, "connection broken");
        DbError::ConnectionFailure(format!(
            "Connection {} was dropped during {}",
            self.id, command
        ))
    }

    fn lose_commit(&mut self, id: TransactionId) -> DbError {
        self.state = ConnectionState::Broken;
        debug!(connection = self.id, transaction = %id, "commit acknowledgement lost");
        DbError::CommitOutcomeUnknown(format!(
            "Connection {} was dropped while committing {}",
            self.id, id
        ))
    }

    fn discard_transaction(&mut self) {
        if let Some(mut txn) = self.transaction.take()
            && txn.rollback().is_ok()
        {
            debug!(connection = self.id, transaction = %txn.id(), "transaction discarded");
        }
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        // Ensure any open transaction is rolled back
        self.discard_transaction();
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("state", &self.state)
            .field("transaction", &self.transaction_id())
            .finish()
    }
}
