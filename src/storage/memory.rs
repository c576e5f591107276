use super::{Table, TableSchema};
use crate::core::{DbError, Result, Row, Value};
use crate::transaction::Change;
use std::collections::HashMap;

#[derive(Debug, Default)]
pub struct InMemoryStorage {
    tables: HashMap<String, Table>,
}

impl InMemoryStorage {
    pub fn new() -> Self {
        Self {
            tables: HashMap::new(),
        }
    }

    pub fn create_table(&mut self, schema: TableSchema) -> Result<()> {
        let name = schema.name().to_string();

        if self.tables.contains_key(&name) {
            return Err(DbError::TableExists(name));
        }

        self.tables.insert(name, Table::new(schema));
        Ok(())
    }

    pub fn get_table(&self, name: &str) -> Result<&Table> {
        self.tables
            .get(name)
            .ok_or_else(|| DbError::TableNotFound(name.to_string()))
    }

    pub fn table_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tables.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn scan(&self, table: &str) -> Result<Vec<Row>> {
        Ok(self.get_table(table)?.rows().to_vec())
    }

    pub fn count(&self, table: &str) -> Result<usize> {
        Ok(self.get_table(table)?.row_count())
    }

    pub fn find(&self, table: &str, column: &str, value: &Value) -> Result<Vec<Row>> {
        self.get_table(table)?.find(column, value)
    }

    /// Returns `table` as it would look after `changes` were applied,
    /// without touching the stored copy.
    pub fn preview(&self, table: &str, changes: &[Change]) -> Result<Table> {
        let mut copy = self.get_table(table)?.clone();
        for change in changes.iter().filter(|c| c.table_name() == table) {
            apply_change(&mut copy, change)?;
        }
        Ok(copy)
    }

    /// Check `change` against the table as seen by a transaction that has
    /// already staged `pending`, and return the rows it would affect.
    pub fn stage(&self, pending: &[Change], change: &Change) -> Result<usize> {
        let mut view = self.preview(change.table_name(), pending)?;
        apply_change(&mut view, change)
    }

    /// Apply a batch of changes all-or-nothing.
    ///
    /// Returns the number of rows affected by each change, in order.
    pub fn apply(&mut self, changes: &[Change]) -> Result<Vec<usize>> {
        let mut staged: HashMap<&str, Table> = HashMap::new();
        let mut affected = Vec::with_capacity(changes.len());

        for change in changes {
            let name = change.table_name();
            if !staged.contains_key(name) {
                staged.insert(name, self.get_table(name)?.clone());
            }
            let table = staged
                .get_mut(name)
                .ok_or_else(|| DbError::TableNotFound(name.to_string()))?;
            affected.push(apply_change(table, change)?);
        }

        for (name, table) in staged {
            self.tables.insert(name.to_string(), table);
        }

        Ok(affected)
    }
}

fn apply_change(table: &mut Table, change: &Change) -> Result<usize> {
    match change {
        Change::InsertRow { row, .. } => {
            table.insert(row.clone())?;
            Ok(1)
        }
        Change::DeleteWhere { column, value, .. } => table.delete_where(column, value),
        Change::UpdateWhere {
            column,
            value,
            set_column,
            set_value,
            ..
        } => table.update_where(column, value, set_column, set_value),
    }
}
