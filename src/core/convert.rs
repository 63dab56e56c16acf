// ============================================================================
// Null-safe value conversion
// ============================================================================
//
// Converts a raw database value into a requested Rust type. `Option<T>`
// is the nullable form: NULL becomes `None`. Non-optional targets reject
// NULL with a type mismatch instead of inventing a value.
//
// ============================================================================

use super::value::{TIMESTAMP_FORMAT, float_to_i64};
use super::{DbError, Result, Value};
use chrono::{NaiveDate, NaiveDateTime};
use uuid::Uuid;

/// Conversion from a raw [`Value`] into a typed Rust value
pub trait FromValue: Sized {
    fn from_value(value: Value) -> Result<Self>;
}

/// Convert a raw value to `T`
///
/// ```ignore
/// let id: Option<i64> = convert_to(Value::Null)?;   // None
/// let n: i32 = convert_to(Value::Text("42".into()))?;
/// ```
pub fn convert_to<T: FromValue>(value: Value) -> Result<T> {
    T::from_value(value)
}

/// Convert a raw value to `T`, substituting `default` for NULL
pub fn convert_or_default<T: FromValue>(value: Value, default: T) -> Result<T> {
    if value.is_null() {
        Ok(default)
    } else {
        T::from_value(value)
    }
}

fn mismatch(value: &Value, target: &str) -> DbError {
    DbError::TypeMismatch(format!(
        "Cannot convert {} value '{}' to {}",
        value.type_name(),
        value,
        target
    ))
}

impl<T: FromValue> FromValue for Option<T> {
    fn from_value(value: Value) -> Result<Self> {
        match value {
            Value::Null => Ok(None),
            other => T::from_value(other).map(Some),
        }
    }
}

impl FromValue for Value {
    fn from_value(value: Value) -> Result<Self> {
        Ok(value)
    }
}

impl FromValue for i64 {
    fn from_value(value: Value) -> Result<Self> {
        match &value {
            Value::Integer(i) => Ok(*i),
            Value::Boolean(b) => Ok(*b as i64),
            Value::Float(f) => float_to_i64(*f).ok_or_else(|| mismatch(&value, "i64")),
            Value::Text(s) => s.trim().parse().map_err(|_| mismatch(&value, "i64")),
            _ => Err(mismatch(&value, "i64")),
        }
    }
}

macro_rules! narrow_integer {
    ($($ty:ty),*) => {
        $(
            impl FromValue for $ty {
                fn from_value(value: Value) -> Result<Self> {
                    let display = value.clone();
                    let wide = i64::from_value(value)?;
                    <$ty>::try_from(wide).map_err(|_| mismatch(&display, stringify!($ty)))
                }
            }
        )*
    };
}

narrow_integer!(i32, i16, i8, u64, u32, u16, u8);

impl FromValue for f64 {
    fn from_value(value: Value) -> Result<Self> {
        match &value {
            Value::Float(f) => Ok(*f),
            Value::Integer(i) => Ok(*i as f64),
            Value::Boolean(b) => Ok(if *b { 1.0 } else { 0.0 }),
            Value::Text(s) => s.trim().parse().map_err(|_| mismatch(&value, "f64")),
            _ => Err(mismatch(&value, "f64")),
        }
    }
}

impl FromValue for f32 {
    fn from_value(value: Value) -> Result<Self> {
        f64::from_value(value).map(|f| f as f32)
    }
}

impl FromValue for bool {
    fn from_value(value: Value) -> Result<Self> {
        match &value {
            Value::Boolean(b) => Ok(*b),
            Value::Integer(i) => Ok(*i != 0),
            Value::Float(f) => Ok(*f != 0.0),
            Value::Text(s) => match s.trim().to_ascii_lowercase().as_str() {
                "true" | "1" => Ok(true),
                "false" | "0" => Ok(false),
                _ => Err(mismatch(&value, "bool")),
            },
            _ => Err(mismatch(&value, "bool")),
        }
    }
}

impl FromValue for String {
    fn from_value(value: Value) -> Result<Self> {
        match value {
            Value::Text(s) => Ok(s),
            Value::Null => Err(mismatch(&Value::Null, "String")),
            other => Ok(other.to_string()),
        }
    }
}

impl FromValue for Vec<u8> {
    fn from_value(value: Value) -> Result<Self> {
        match value {
            Value::Blob(bytes) => Ok(bytes),
            Value::Text(s) => Ok(s.into_bytes()),
            Value::Uuid(id) => Ok(id.as_bytes().to_vec()),
            other => Err(mismatch(&other, "Vec<u8>")),
        }
    }
}

impl FromValue for NaiveDateTime {
    fn from_value(value: Value) -> Result<Self> {
        match &value {
            Value::Timestamp(ts) => Ok(*ts),
            Value::Text(s) => parse_timestamp(s.trim()).ok_or_else(|| mismatch(&value, "NaiveDateTime")),
            _ => Err(mismatch(&value, "NaiveDateTime")),
        }
    }
}

fn parse_timestamp(text: &str) -> Option<NaiveDateTime> {
    NaiveDateTime::parse_from_str(text, TIMESTAMP_FORMAT)
        .or_else(|_| NaiveDateTime::parse_from_str(text, "%Y-%m-%dT%H:%M:%S%.f"))
        .ok()
        .or_else(|| {
            NaiveDate::parse_from_str(text, "%Y-%m-%d")
                .ok()
                .and_then(|date| date.and_hms_opt(0, 0, 0))
        })
}

impl FromValue for Uuid {
    fn from_value(value: Value) -> Result<Self> {
        match &value {
            Value::Uuid(id) => Ok(*id),
            Value::Text(s) => Uuid::parse_str(s.trim()).map_err(|_| mismatch(&value, "Uuid")),
            Value::Blob(bytes) => Uuid::from_slice(bytes).map_err(|_| mismatch(&value, "Uuid")),
            _ => Err(mismatch(&value, "Uuid")),
        }
    }
}
