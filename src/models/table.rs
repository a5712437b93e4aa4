//! Buffered result sets and a forward-only cursor over them.

use crate::models::Value;
use serde::{Serialize, Serializer};
use serde::ser::SerializeMap;
use std::collections::HashMap;
use std::sync::OnceLock;

/// One fully materialized result set.
#[derive(Debug, Clone, Default)]
pub struct DataTable {
    pub name: String,
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Value>>,
    /// Upper-cased column names, computed once per table.
    upper: OnceLock<Vec<String>>,
    upper_index: OnceLock<HashMap<String, usize>>,
}

impl DataTable {
    pub fn new(columns: Vec<String>) -> Self {
        Self {
            columns,
            ..Self::default()
        }
    }

    pub fn with_rows(columns: Vec<String>, rows: Vec<Vec<Value>>) -> Self {
        Self {
            columns,
            rows,
            ..Self::default()
        }
    }

    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn push_row(&mut self, row: Vec<Value>) {
        self.rows.push(row);
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Column names, optionally upper-cased. The upper-cased list is cached.
    pub fn column_names(&self, upper: bool) -> &[String] {
        if upper {
            self.upper
                .get_or_init(|| self.columns.iter().map(|c| c.to_uppercase()).collect())
        } else {
            &self.columns
        }
    }

    /// Index of a column whose name is already upper-cased.
    pub fn upper_index_of(&self, upper_name: &str) -> Option<usize> {
        self.upper_index
            .get_or_init(|| {
                let mut index = HashMap::with_capacity(self.columns.len());
                for (i, name) in self.column_names(true).iter().enumerate() {
                    index.entry(name.clone()).or_insert(i);
                }
                index
            })
            .get(upper_name)
            .copied()
    }

    /// Case-insensitive column lookup.
    pub fn index_of(&self, column: &str) -> Option<usize> {
        self.upper_index_of(&column.to_uppercase())
    }

    pub fn value(&self, row: usize, column: usize) -> Option<&Value> {
        self.rows.get(row).and_then(|r| r.get(column))
    }
}

impl Serialize for DataTable {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let rows: Vec<RowView<'_>> = self
            .rows
            .iter()
            .map(|values| RowView {
                columns: &self.columns,
                values,
            })
            .collect();
        let mut map = serializer.serialize_map(Some(3))?;
        map.serialize_entry("name", &self.name)?;
        map.serialize_entry("columns", &self.columns)?;
        map.serialize_entry("rows", &rows)?;
        map.end()
    }
}

struct RowView<'a> {
    columns: &'a [String],
    values: &'a [Value],
}

impl Serialize for RowView<'_> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.columns.len()))?;
        for (column, value) in self.columns.iter().zip(self.values) {
            map.serialize_entry(column, value)?;
        }
        map.end()
    }
}

/// Named result sets of one call.
#[derive(Debug, Clone, Default, Serialize)]
pub struct DataSet {
    pub tables: Vec<DataTable>,
}

impl DataSet {
    pub fn table(&self, name: &str) -> Option<&DataTable> {
        self.tables.iter().find(|t| t.name.eq_ignore_ascii_case(name))
    }

    pub fn len(&self) -> usize {
        self.tables.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }
}

/// Buffered outcome of one call.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ExecuteResult {
    pub result_sets: Vec<DataTable>,
    /// Rows affected as reported by the driver; 0 when unknown.
    pub rows_affected: u64,
}

impl ExecuteResult {
    pub fn new(result_sets: Vec<DataTable>, rows_affected: u64) -> Self {
        Self {
            result_sets,
            rows_affected,
        }
    }
}

/// Forward-only cursor over the result sets of one call.
///
/// Starts before the first row of the first result set; `read` advances one
/// row, `next_result` moves to the following result set.
#[derive(Debug)]
pub struct DataReader {
    tables: Vec<DataTable>,
    table: usize,
    /// Position within the current table; `None` before the first `read`.
    row: Option<usize>,
}

impl DataReader {
    pub fn new(tables: Vec<DataTable>) -> Self {
        Self {
            tables,
            table: 0,
            row: None,
        }
    }

    /// Advance to the next row of the current result set.
    pub fn read(&mut self) -> bool {
        let Some(table) = self.tables.get(self.table) else {
            return false;
        };
        let next = self.row.map_or(0, |r| r + 1);
        if next < table.rows.len() {
            self.row = Some(next);
            true
        } else {
            self.row = Some(table.rows.len());
            false
        }
    }

    /// Move to the next result set.
    pub fn next_result(&mut self) -> bool {
        if self.table + 1 < self.tables.len() {
            self.table += 1;
            self.row = None;
            true
        } else {
            self.table = self.tables.len();
            false
        }
    }

    /// The current result set, if any.
    pub fn current_table(&self) -> Option<&DataTable> {
        self.tables.get(self.table)
    }

    /// Index of the current row, valid after a successful `read`.
    pub fn current_row(&self) -> Option<usize> {
        let table = self.current_table()?;
        self.row.filter(|r| *r < table.rows.len())
    }

    pub fn field_count(&self) -> usize {
        self.current_table().map_or(0, |t| t.columns.len())
    }

    /// Value of a column of the current row.
    pub fn get(&self, column: usize) -> Option<&Value> {
        let row = self.current_row()?;
        self.current_table()?.value(row, column)
    }

    /// Consume the reader, returning the buffered result sets.
    pub fn into_tables(self) -> Vec<DataTable> {
        self.tables
    }
}
