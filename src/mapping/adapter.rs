//! One row shape over buffered tables and forward-only readers.

use crate::models::{DataReader, DataTable, Value};

/// A single current row, either from a buffered table or a reader.
#[derive(Debug, Clone, Copy)]
pub enum RowAdapter<'a> {
    Buffered { table: &'a DataTable, row: usize },
    Cursor(&'a DataReader),
}

impl<'a> RowAdapter<'a> {
    pub fn buffered(table: &'a DataTable, row: usize) -> Self {
        Self::Buffered { table, row }
    }

    pub fn cursor(reader: &'a DataReader) -> Self {
        Self::Cursor(reader)
    }

    fn table(&self) -> Option<&'a DataTable> {
        match *self {
            Self::Buffered { table, .. } => Some(table),
            Self::Cursor(reader) => reader.current_table(),
        }
    }

    fn row(&self) -> Option<usize> {
        match *self {
            Self::Buffered { row, .. } => Some(row),
            Self::Cursor(reader) => reader.current_row(),
        }
    }

    /// Column names of the underlying result set.
    pub fn column_names(&self, upper: bool) -> &'a [String] {
        match self.table() {
            Some(table) => table.column_names(upper),
            None => &[],
        }
    }

    /// Value of a column (case-insensitive); `None` when the column is absent.
    pub fn value_of(&self, column: &str) -> Option<&'a Value> {
        self.value_of_upper(&column.to_uppercase())
    }

    pub(crate) fn value_of_upper(&self, upper_column: &str) -> Option<&'a Value> {
        let table = self.table()?;
        let column = table.upper_index_of(upper_column)?;
        table.value(self.row()?, column)
    }

    /// Point a buffered adapter at another row of the same table.
    /// A cursor has a single current position, so this is a no-op there.
    pub fn rebind(&mut self, new_row: usize) {
        if let Self::Buffered { row, .. } = self {
            *row = new_row;
        }
    }
}
