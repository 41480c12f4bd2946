//! Row batches streamed from the source and the name-indexed row view
//! transforms operate on.

use super::value::SqlValue;

/// A batch of rows read from the source, with the column names the
/// SELECT produced them under.
#[derive(Debug, Clone, Default)]
pub struct Batch {
    /// Column names, in SELECT order.
    pub columns: Vec<String>,

    /// Row data; every row has `columns.len()` values.
    pub rows: Vec<Vec<SqlValue>>,
}

impl Batch {
    /// Create a batch with known columns and no rows yet.
    pub fn new(columns: Vec<String>) -> Self {
        Self {
            columns,
            rows: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Iterate rows as name-indexed views.
    pub fn iter(&self) -> impl Iterator<Item = SourceRow<'_>> {
        self.rows.iter().map(move |values| SourceRow {
            columns: &self.columns,
            values,
        })
    }
}

/// One source row, addressable by column name.
#[derive(Debug, Clone, Copy)]
pub struct SourceRow<'a> {
    columns: &'a [String],
    values: &'a [SqlValue],
}

impl<'a> SourceRow<'a> {
    pub fn new(columns: &'a [String], values: &'a [SqlValue]) -> Self {
        Self { columns, values }
    }

    /// Value by column name (case-insensitive, matching SQL Server).
    pub fn get(&self, column: &str) -> Option<&'a SqlValue> {
        self.columns
            .iter()
            .position(|c| c.eq_ignore_ascii_case(column))
            .map(|idx| &self.values[idx])
    }

    /// Value by ordinal position.
    pub fn get_at(&self, idx: usize) -> Option<&'a SqlValue> {
        self.values.get(idx)
    }

    /// Owned copy of all values, in column order.
    pub fn to_values(&self) -> Vec<SqlValue> {
        self.values.to_vec()
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}
