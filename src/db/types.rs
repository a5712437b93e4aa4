//! Row decoding for the sqlx-backed providers.
//!
//! Decoding uses a two-phase approach:
//! 1. the declared column type is classified into a [`DataType`]
//! 2. a database-specific decoder extracts the value for that category
//!
//! Anything the category decoder cannot read falls back to a dynamic ladder,
//! so columns of computed expressions still produce a value.

use crate::models::{DataTable, DataType, Value};
use sqlx::mysql::{MySqlRow, MySqlTypeInfo, MySqlValueRef};
use sqlx::sqlite::SqliteRow;
use sqlx::{Column, Decode, Row, Type, TypeInfo, ValueRef};

// =============================================================================
// Decimal Type Support
// =============================================================================

/// Raw DECIMAL value as text, preserving the exact database representation.
#[derive(Debug)]
pub struct RawDecimal(pub String);

impl Type<sqlx::MySql> for RawDecimal {
    fn type_info() -> MySqlTypeInfo {
        <String as Type<sqlx::MySql>>::type_info()
    }

    fn compatible(ty: &MySqlTypeInfo) -> bool {
        let name = ty.name().to_lowercase();
        name.contains("decimal") || name.contains("numeric")
    }
}

impl<'r> Decode<'r, sqlx::MySql> for RawDecimal {
    fn decode(value: MySqlValueRef<'r>) -> Result<Self, sqlx::error::BoxDynError> {
        let s = <&str as Decode<sqlx::MySql>>::decode(value)?;
        Ok(RawDecimal(s.to_string()))
    }
}

// =============================================================================
// Row Conversion
// =============================================================================

/// Converts a driver row into provider-neutral values.
pub trait RowToValues {
    fn column_names(&self) -> Vec<String>;
    fn to_values(&self) -> Vec<Value>;
}

impl RowToValues for MySqlRow {
    fn column_names(&self) -> Vec<String> {
        self.columns().iter().map(|c| c.name().to_string()).collect()
    }

    fn to_values(&self) -> Vec<Value> {
        self.columns()
            .iter()
            .enumerate()
            .map(|(idx, col)| {
                let type_name = col.type_info().name();
                mysql::decode_column(self, idx, DataType::from_type_name(type_name))
            })
            .collect()
    }
}

impl RowToValues for SqliteRow {
    fn column_names(&self) -> Vec<String> {
        self.columns().iter().map(|c| c.name().to_string()).collect()
    }

    fn to_values(&self) -> Vec<Value> {
        self.columns()
            .iter()
            .enumerate()
            .map(|(idx, col)| {
                let type_name = col.type_info().name();
                sqlite::decode_column(self, idx, DataType::from_type_name(type_name))
            })
            .collect()
    }
}

/// Build a table from rows of one result set.
///
/// Column names come from the first row, so an empty result set has no columns.
pub fn rows_to_table<R: RowToValues>(rows: &[R]) -> DataTable {
    let columns = rows.first().map(RowToValues::column_names).unwrap_or_default();
    DataTable::with_rows(columns, rows.iter().map(RowToValues::to_values).collect())
}

// =============================================================================
// Database-Specific Decoders
// =============================================================================

mod mysql {
    use super::*;

    pub fn decode_column(row: &MySqlRow, idx: usize, data_type: DataType) -> Value {
        if row.try_get_raw(idx).map_or(true, |raw| raw.is_null()) {
            return Value::Null;
        }
        let decoded = match data_type {
            DataType::Decimal => decode_decimal(row, idx),
            DataType::Integer => decode_integer(row, idx),
            DataType::Boolean => decode_boolean(row, idx),
            DataType::Float => decode_float(row, idx),
            DataType::Binary => decode_binary(row, idx),
            DataType::Json => decode_json(row, idx),
            DataType::DateTime => decode_datetime(row, idx),
            DataType::Date => row.try_get::<chrono::NaiveDate, _>(idx).ok().map(Value::Date),
            DataType::Time => row.try_get::<chrono::NaiveTime, _>(idx).ok().map(Value::Time),
            _ => decode_text(row, idx),
        };
        decoded.unwrap_or_else(|| decode_dynamic(row, idx))
    }

    fn decode_decimal(row: &MySqlRow, idx: usize) -> Option<Value> {
        match row.try_get::<RawDecimal, _>(idx) {
            Ok(v) => Some(Value::Decimal(v.0)),
            Err(e) => {
                tracing::error!("Failed to decode DECIMAL: {:?}", e);
                None
            }
        }
    }

    fn decode_integer(row: &MySqlRow, idx: usize) -> Option<Value> {
        if let Ok(v) = row.try_get::<i64, _>(idx) {
            return Some(Value::Int(v));
        }
        if let Ok(v) = row.try_get::<i32, _>(idx) {
            return Some(Value::Int(v.into()));
        }
        if let Ok(v) = row.try_get::<i16, _>(idx) {
            return Some(Value::Int(v.into()));
        }
        if let Ok(v) = row.try_get::<i8, _>(idx) {
            return Some(Value::Int(v.into()));
        }
        if let Ok(v) = row.try_get::<u64, _>(idx) {
            return Some(
                i64::try_from(v)
                    .map(Value::Int)
                    .unwrap_or_else(|_| Value::Decimal(v.to_string())),
            );
        }
        if let Ok(v) = row.try_get::<u32, _>(idx) {
            return Some(Value::Int(v.into()));
        }
        if let Ok(v) = row.try_get::<u16, _>(idx) {
            return Some(Value::Int(v.into()));
        }
        row.try_get::<u8, _>(idx).ok().map(|v| Value::Int(v.into()))
    }

    fn decode_boolean(row: &MySqlRow, idx: usize) -> Option<Value> {
        row.try_get::<bool, _>(idx)
            .ok()
            .map(Value::Bool)
            .or_else(|| decode_integer(row, idx))
    }

    fn decode_float(row: &MySqlRow, idx: usize) -> Option<Value> {
        if let Ok(v) = row.try_get::<f64, _>(idx) {
            return Some(Value::Float(v));
        }
        row.try_get::<f32, _>(idx)
            .ok()
            .map(|v| Value::Float(f64::from(v)))
    }

    fn decode_binary(row: &MySqlRow, idx: usize) -> Option<Value> {
        row.try_get::<Vec<u8>, _>(idx).ok().map(Value::Bytes)
    }

    fn decode_json(row: &MySqlRow, idx: usize) -> Option<Value> {
        row.try_get::<serde_json::Value, _>(idx).ok().map(Value::Json)
    }

    fn decode_datetime(row: &MySqlRow, idx: usize) -> Option<Value> {
        if let Ok(v) = row.try_get::<chrono::NaiveDateTime, _>(idx) {
            return Some(Value::DateTime(v));
        }
        row.try_get::<chrono::DateTime<chrono::Utc>, _>(idx)
            .ok()
            .map(Value::DateTimeUtc)
    }

    fn decode_text(row: &MySqlRow, idx: usize) -> Option<Value> {
        row.try_get::<String, _>(idx).ok().map(Value::String)
    }

    /// Session variables and expressions report loose types; try the common ones.
    fn decode_dynamic(row: &MySqlRow, idx: usize) -> Value {
        decode_text(row, idx)
            .or_else(|| decode_integer(row, idx))
            .or_else(|| decode_float(row, idx))
            .or_else(|| {
                decode_binary(row, idx).map(|v| match v {
                    Value::Bytes(bytes) => String::from_utf8(bytes)
                        .map(Value::String)
                        .unwrap_or_else(|e| Value::Bytes(e.into_bytes())),
                    other => other,
                })
            })
            .unwrap_or(Value::Null)
    }
}

mod sqlite {
    use super::*;

    pub fn decode_column(row: &SqliteRow, idx: usize, data_type: DataType) -> Value {
        if row.try_get_raw(idx).map_or(true, |raw| raw.is_null()) {
            return Value::Null;
        }
        let decoded = match data_type {
            DataType::Integer => decode_integer(row, idx),
            DataType::Boolean => row.try_get::<bool, _>(idx).ok().map(Value::Bool),
            DataType::Float | DataType::Decimal => decode_float(row, idx),
            DataType::Binary => decode_binary(row, idx),
            DataType::DateTime => row
                .try_get::<chrono::NaiveDateTime, _>(idx)
                .ok()
                .map(Value::DateTime),
            _ => decode_text(row, idx),
        };
        decoded.unwrap_or_else(|| decode_dynamic(row, idx))
    }

    fn decode_integer(row: &SqliteRow, idx: usize) -> Option<Value> {
        row.try_get::<i64, _>(idx).ok().map(Value::Int)
    }

    fn decode_float(row: &SqliteRow, idx: usize) -> Option<Value> {
        row.try_get::<f64, _>(idx).ok().map(Value::Float)
    }

    fn decode_binary(row: &SqliteRow, idx: usize) -> Option<Value> {
        row.try_get::<Vec<u8>, _>(idx).ok().map(Value::Bytes)
    }

    fn decode_text(row: &SqliteRow, idx: usize) -> Option<Value> {
        row.try_get::<String, _>(idx).ok().map(Value::String)
    }

    fn decode_dynamic(row: &SqliteRow, idx: usize) -> Value {
        decode_integer(row, idx)
            .or_else(|| decode_float(row, idx))
            .or_else(|| decode_text(row, idx))
            .or_else(|| decode_binary(row, idx))
            .unwrap_or(Value::Null)
    }
}
