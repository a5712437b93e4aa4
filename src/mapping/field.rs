//! Value conversion for entity members.
//!
//! Every member type that can be mapped to a column implements [`FieldValue`]:
//! it knows how to render itself as a [`Value`] for call parameters and how to
//! coerce a raw column value back into itself.

use crate::models::Value;
use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};

/// Declared category of a member type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueKind {
    Bool,
    Integer,
    Float,
    String,
    Bytes,
    DateTime,
    Date,
    Time,
    Uuid,
    Json,
    Enum,
}

/// A member type that can be loaded from and bound to a column.
pub trait FieldValue: Default + Send + 'static {
    const KIND: ValueKind;
    /// `Option<T>` members accept database NULL as a value.
    const NULLABLE: bool = false;

    fn to_value(&self) -> Value;

    /// Coerce a raw value. `None` means the conversion failed.
    fn from_value(value: &Value) -> Option<Self>;

    /// Parse request/form text.
    fn from_text(text: &str) -> Option<Self> {
        Self::from_value(&Value::String(text.to_string()))
    }

    fn is_null(&self) -> bool {
        false
    }
}

macro_rules! integer_field {
    ($($ty:ty),+ $(,)?) => {
        $(impl FieldValue for $ty {
            const KIND: ValueKind = ValueKind::Integer;

            fn to_value(&self) -> Value {
                i64::try_from(*self)
                    .map(Value::Int)
                    .unwrap_or_else(|_| Value::Decimal(self.to_string()))
            }

            fn from_value(value: &Value) -> Option<Self> {
                match value {
                    Value::Decimal(s) | Value::String(s) => s
                        .trim()
                        .parse()
                        .ok()
                        .or_else(|| value.as_i64().and_then(|v| <$ty>::try_from(v).ok())),
                    other => other.as_i64().and_then(|v| <$ty>::try_from(v).ok()),
                }
            }
        })+
    };
}

integer_field!(i8, i16, i32, i64, u8, u16, u32, isize, usize, u64);

impl FieldValue for f64 {
    const KIND: ValueKind = ValueKind::Float;

    fn to_value(&self) -> Value {
        Value::Float(*self)
    }

    fn from_value(value: &Value) -> Option<Self> {
        value.as_f64()
    }
}

impl FieldValue for f32 {
    const KIND: ValueKind = ValueKind::Float;

    fn to_value(&self) -> Value {
        Value::Float(f64::from(*self))
    }

    fn from_value(value: &Value) -> Option<Self> {
        value.as_f64().map(|v| v as f32)
    }
}

impl FieldValue for bool {
    const KIND: ValueKind = ValueKind::Bool;

    fn to_value(&self) -> Value {
        Value::Bool(*self)
    }

    fn from_value(value: &Value) -> Option<Self> {
        value.as_bool()
    }

    /// Anything but "false", "0" or empty text is true.
    fn from_text(text: &str) -> Option<Self> {
        Some(!(text.is_empty() || text == "0" || text.eq_ignore_ascii_case("false")))
    }
}

impl FieldValue for String {
    const KIND: ValueKind = ValueKind::String;

    fn to_value(&self) -> Value {
        Value::String(self.clone())
    }

    fn from_value(value: &Value) -> Option<Self> {
        value.as_text()
    }

    fn from_text(text: &str) -> Option<Self> {
        Some(text.to_string())
    }
}

impl FieldValue for Vec<u8> {
    const KIND: ValueKind = ValueKind::Bytes;

    fn to_value(&self) -> Value {
        Value::Bytes(self.clone())
    }

    fn from_value(value: &Value) -> Option<Self> {
        value.as_bytes().map(<[u8]>::to_vec)
    }
}

impl FieldValue for NaiveDateTime {
    const KIND: ValueKind = ValueKind::DateTime;

    fn to_value(&self) -> Value {
        Value::DateTime(*self)
    }

    fn from_value(value: &Value) -> Option<Self> {
        value.as_datetime()
    }
}

impl FieldValue for DateTime<Utc> {
    const KIND: ValueKind = ValueKind::DateTime;

    fn to_value(&self) -> Value {
        Value::DateTimeUtc(*self)
    }

    fn from_value(value: &Value) -> Option<Self> {
        value.as_datetime_utc()
    }
}

impl FieldValue for NaiveDate {
    const KIND: ValueKind = ValueKind::Date;

    fn to_value(&self) -> Value {
        Value::Date(*self)
    }

    fn from_value(value: &Value) -> Option<Self> {
        value.as_date()
    }
}

impl FieldValue for NaiveTime {
    const KIND: ValueKind = ValueKind::Time;

    fn to_value(&self) -> Value {
        Value::Time(*self)
    }

    fn from_value(value: &Value) -> Option<Self> {
        value.as_time()
    }
}

impl FieldValue for uuid::Uuid {
    const KIND: ValueKind = ValueKind::Uuid;

    fn to_value(&self) -> Value {
        Value::Uuid(*self)
    }

    fn from_value(value: &Value) -> Option<Self> {
        value.as_uuid()
    }
}

impl FieldValue for serde_json::Value {
    const KIND: ValueKind = ValueKind::Json;

    fn to_value(&self) -> Value {
        Value::Json(self.clone())
    }

    fn from_value(value: &Value) -> Option<Self> {
        value.as_json()
    }
}

impl<T: FieldValue> FieldValue for Option<T> {
    const KIND: ValueKind = T::KIND;
    const NULLABLE: bool = true;

    fn to_value(&self) -> Value {
        self.as_ref().map_or(Value::Null, FieldValue::to_value)
    }

    fn from_value(value: &Value) -> Option<Self> {
        if value.is_null() {
            return Some(None);
        }
        T::from_value(value).map(Some)
    }

    fn from_text(text: &str) -> Option<Self> {
        if text.is_empty() && T::KIND != ValueKind::String {
            return Some(None);
        }
        T::from_text(text).map(Some)
    }

    fn is_null(&self) -> bool {
        self.is_none()
    }
}

/// Implement [`FieldValue`] for a fieldless enum stored as an integer column.
///
/// ```ignore
/// #[derive(Debug, Default, Clone, Copy, PartialEq)]
/// enum OrderStatus { #[default] Pending, Shipped }
/// sproc_mapper::enum_field!(OrderStatus { Pending = 0, Shipped = 1 });
/// ```
#[macro_export]
macro_rules! enum_field {
    ($ty:ident { $($variant:ident = $code:literal),+ $(,)? }) => {
        impl $crate::mapping::FieldValue for $ty {
            const KIND: $crate::mapping::ValueKind = $crate::mapping::ValueKind::Enum;

            fn to_value(&self) -> $crate::models::Value {
                match self {
                    $($ty::$variant => $crate::models::Value::Int($code),)+
                }
            }

            fn from_value(value: &$crate::models::Value) -> Option<Self> {
                match value.as_i64()? {
                    $($code => Some($ty::$variant),)+
                    _ => None,
                }
            }

            fn from_text(text: &str) -> Option<Self> {
                let trimmed = text.trim();
                $(if trimmed.eq_ignore_ascii_case(stringify!($variant)) {
                    return Some($ty::$variant);
                })+
                Self::from_value(&$crate::models::Value::String(trimmed.to_string()))
            }
        }
    };
}
