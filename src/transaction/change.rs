// ============================================================================
// Transaction Change Tracking
// ============================================================================
//
// Writes issued inside a transaction are recorded as Changes and only reach
// storage when the transaction commits. Rollback simply discards them.
//
// ============================================================================

use crate::core::{Row, Value};

/// A single staged write
#[derive(Debug, Clone)]
pub enum Change {
    /// Insert a new row into a table
    InsertRow { table: String, row: Row },

    /// Delete every row whose `column` equals `value`
    DeleteWhere {
        table: String,
        column: String,
        value: Value,
    },

    /// Set `set_column` to `set_value` on every row whose `column` equals `value`
    UpdateWhere {
        table: String,
        column: String,
        value: Value,
        set_column: String,
        set_value: Value,
    },
}

impl Change {
    /// Get the table name affected by this change
    pub fn table_name(&self) -> &str {
        match self {
            Change::InsertRow { table, .. } => table,
            Change::DeleteWhere { table, .. } => table,
            Change::UpdateWhere { table, .. } => table,
        }
    }
}
