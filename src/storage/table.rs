use crate::core::{Column, DbError, Result, Row, Value};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Declarative description of one table.
///
/// Tables are declared up front in [`DatabaseConfig`](crate::DatabaseConfig)
/// and validated when the database is opened.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TableSchema {
    name: String,
    columns: Vec<Column>,
    #[serde(default)]
    primary_key: Option<String>,
}

impl TableSchema {
    pub fn new(name: impl Into<String>, columns: Vec<Column>) -> Self {
        Self {
            name: name.into(),
            columns,
            primary_key: None,
        }
    }

    pub fn primary_key(mut self, column: impl Into<String>) -> Self {
        self.primary_key = Some(column.into());
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    pub fn find_column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|col| col.name == name)
    }

    pub fn primary_key_index(&self) -> Option<usize> {
        self.primary_key
            .as_deref()
            .and_then(|pk| self.find_column_index(pk))
    }

    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(DbError::Configuration("Table name cannot be empty".into()));
        }

        if self.columns.is_empty() {
            return Err(DbError::Configuration(format!(
                "Table '{}' must declare at least one column",
                self.name
            )));
        }

        let mut seen = HashSet::new();
        for column in &self.columns {
            if column.name.trim().is_empty() {
                return Err(DbError::Configuration(format!(
                    "Table '{}' has a column with an empty name",
                    self.name
                )));
            }
            if !seen.insert(column.name.as_str()) {
                return Err(DbError::Configuration(format!(
                    "Table '{}' declares column '{}' twice",
                    self.name, column.name
                )));
            }
        }

        if let Some(pk) = &self.primary_key
            && self.find_column_index(pk).is_none()
        {
            return Err(DbError::Configuration(format!(
                "Primary key '{}' is not a column of table '{}'",
                pk, self.name
            )));
        }

        Ok(())
    }
}

/// Rows of a single table.
#[derive(Debug, Clone)]
pub struct Table {
    schema: TableSchema,
    rows: Vec<Row>,
}

impl Table {
    pub fn new(schema: TableSchema) -> Self {
        Self {
            schema,
            rows: Vec::new(),
        }
    }

    pub fn rows(&self) -> &[Row] {
        &self.rows
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    pub fn insert(&mut self, row: Row) -> Result<()> {
        let columns = self.schema.columns();
        if row.len() != columns.len() {
            return Err(DbError::ExecutionError(format!(
                "Table '{}' expects {} values, got {}",
                self.schema.name(),
                columns.len(),
                row.len()
            )));
        }

        for (column, value) in columns.iter().zip(row.iter()) {
            column.validate(value)?;
        }

        if let Some(pk) = self.schema.primary_key_index() {
            let key = &row[pk];
            if key.is_null() {
                return Err(DbError::ConstraintViolation(format!(
                    "Primary key of table '{}' cannot be NULL",
                    self.schema.name()
                )));
            }
            if self.rows.iter().any(|existing| &existing[pk] == key) {
                return Err(DbError::ConstraintViolation(format!(
                    "Duplicate primary key {} in table '{}'",
                    key,
                    self.schema.name()
                )));
            }
        }

        self.rows.push(row);
        Ok(())
    }

    pub fn delete_where(&mut self, column: &str, value: &Value) -> Result<usize> {
        let idx = self.column_index(column)?;
        let before = self.rows.len();
        self.rows.retain(|row| &row[idx] != value);
        Ok(before - self.rows.len())
    }

    pub fn update_where(
        &mut self,
        column: &str,
        value: &Value,
        set_column: &str,
        set_value: &Value,
    ) -> Result<usize> {
        let idx = self.column_index(column)?;
        let set_idx = self.column_index(set_column)?;
        self.schema.columns()[set_idx].validate(set_value)?;

        if Some(set_idx) == self.schema.primary_key_index() {
            let targets = self.rows.iter().filter(|row| &row[idx] == value).count();
            let clashes = self
                .rows
                .iter()
                .any(|row| &row[idx] != value && &row[set_idx] == set_value);
            if targets > 1 || (targets == 1 && clashes) {
                return Err(DbError::ConstraintViolation(format!(
                    "Update would duplicate primary key {} in table '{}'",
                    set_value,
                    self.schema.name()
                )));
            }
        }

        let mut updated = 0;
        for row in self.rows.iter_mut().filter(|row| &row[idx] == value) {
            row[set_idx] = set_value.clone();
            updated += 1;
        }
        Ok(updated)
    }

    pub fn find(&self, column: &str, value: &Value) -> Result<Vec<Row>> {
        let idx = self.column_index(column)?;
        Ok(self
            .rows
            .iter()
            .filter(|row| &row[idx] == value)
            .cloned()
            .collect())
    }

    fn column_index(&self, column: &str) -> Result<usize> {
        self.schema.find_column_index(column).ok_or_else(|| {
            DbError::ColumnNotFound(column.to_string(), self.schema.name().to_string())
        })
    }
}
