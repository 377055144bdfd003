//! Backend-independent result rows.

use std::sync::Arc;

use crate::error::{DbError, DbResult};
use crate::value::SqlValue;

/// One decoded result row.
///
/// Column names are shared across all rows of a result set.
#[derive(Debug, Clone)]
pub struct Row {
    columns: Arc<[String]>,
    values: Vec<SqlValue>,
}

impl Row {
    /// Create a row from its column names and values.
    pub fn new(columns: Arc<[String]>, values: Vec<SqlValue>) -> Self {
        Self { columns, values }
    }

    /// The column names of this row.
    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    /// Number of columns.
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Check if the row has no columns.
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Get a value by column index.
    pub fn value_at(&self, index: usize) -> DbResult<&SqlValue> {
        self.values
            .get(index)
            .ok_or_else(|| DbError::decode(format!("no column at index {}", index)))
    }

    /// Get a value by column name.
    pub fn value(&self, column: &str) -> DbResult<&SqlValue> {
        let index = self
            .columns
            .iter()
            .position(|c| c == column)
            .ok_or_else(|| DbError::decode(format!("no column named '{}'", column)))?;
        self.value_at(index)
    }

    /// Get an i64 column, erroring on NULL or a non-integer value.
    pub fn get_int(&self, column: &str) -> DbResult<i64> {
        self.value(column)?
            .as_int()
            .ok_or_else(|| DbError::decode(format!("column '{}' is not an integer", column)))
    }

    /// Get a text column, erroring on NULL or a non-text value.
    pub fn get_text(&self, column: &str) -> DbResult<&str> {
        self.value(column)?
            .as_text()
            .ok_or_else(|| DbError::decode(format!("column '{}' is not text", column)))
    }

    /// Get a bool column, erroring on NULL or a non-boolean value.
    pub fn get_bool(&self, column: &str) -> DbResult<bool> {
        self.value(column)?
            .as_bool()
            .ok_or_else(|| DbError::decode(format!("column '{}' is not a boolean", column)))
    }

    /// Get a column as an optional value, mapping SQL NULL to `None`.
    pub fn get_opt(&self, column: &str) -> DbResult<Option<&SqlValue>> {
        let value = self.value(column)?;
        Ok(if value.is_null() { None } else { Some(value) })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_row() -> Row {
        let columns: Arc<[String]> = vec!["id".to_string(), "name".to_string(), "note".to_string()]
            .into();
        Row::new(
            columns,
            vec![
                SqlValue::Int(7),
                SqlValue::Text("amina".into()),
                SqlValue::Null,
            ],
        )
    }

    #[test]
    fn test_get_by_name() {
        let row = sample_row();
        assert_eq!(row.get_int("id").unwrap(), 7);
        assert_eq!(row.get_text("name").unwrap(), "amina");
    }

    #[test]
    fn test_null_handling() {
        let row = sample_row();
        assert!(row.get_opt("note").unwrap().is_none());
        assert!(row.get_text("note").is_err());
    }

    #[test]
    fn test_missing_column() {
        let row = sample_row();
        assert!(matches!(row.value("missing"), Err(DbError::Decode(_))));
    }
}
