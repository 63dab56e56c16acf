use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Text layout used when a timestamp travels as text
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.f";

/// 2^63; `i64::MAX as f64` rounds up to this, so it is an exclusive bound
const I64_UPPER_BOUND: f64 = 9_223_372_036_854_775_808.0;

/// Round to the nearest integer, `None` when the result does not fit `i64`
pub(crate) fn float_to_i64(f: f64) -> Option<i64> {
    let rounded = f.round();
    (rounded.is_finite() && rounded >= -I64_UPPER_BOUND && rounded < I64_UPPER_BOUND)
        .then(|| rounded as i64)
}

/// A raw value read from or bound to the database
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Integer(i64),
    Float(f64),
    Text(String),
    Boolean(bool),
    Blob(Vec<u8>),
    Timestamp(NaiveDateTime),
    Uuid(Uuid),
}

impl Value {
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Null => "NULL",
            Self::Integer(_) => "INTEGER",
            Self::Float(_) => "FLOAT",
            Self::Text(_) => "TEXT",
            Self::Boolean(_) => "BOOLEAN",
            Self::Blob(_) => "BLOB",
            Self::Timestamp(_) => "TIMESTAMP",
            Self::Uuid(_) => "UUID",
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Integer(i) => Some(*i),
            Self::Boolean(b) => Some(*b as i64),
            Self::Float(f) => float_to_i64(*f),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Float(f) => Some(*f),
            Self::Integer(i) => Some(*i as f64),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Text(s) => Some(s),
            _ => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => write!(f, "NULL"),
            Self::Integer(i) => write!(f, "{}", i),
            Self::Float(fl) => write!(f, "{}", fl),
            Self::Text(s) => write!(f, "{}", s),
            Self::Boolean(b) => write!(f, "{}", b),
            Self::Blob(bytes) => {
                for byte in bytes {
                    write!(f, "{:02x}", byte)?;
                }
                Ok(())
            }
            Self::Timestamp(ts) => write!(f, "{}", ts.format(TIMESTAMP_FORMAT)),
            Self::Uuid(id) => write!(f, "{}", id.hyphenated()),
        }
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Self::Integer(i)
    }
}

impl From<i32> for Value {
    fn from(i: i32) -> Self {
        Self::Integer(i as i64)
    }
}

impl From<f64> for Value {
    fn from(f: f64) -> Self {
        Self::Float(f)
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Self::Text(s)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Self::Text(s.to_string())
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Self::Boolean(b)
    }
}

impl From<Vec<u8>> for Value {
    fn from(bytes: Vec<u8>) -> Self {
        Self::Blob(bytes)
    }
}

impl From<&[u8]> for Value {
    fn from(bytes: &[u8]) -> Self {
        Self::Blob(bytes.to_vec())
    }
}

impl From<NaiveDateTime> for Value {
    fn from(ts: NaiveDateTime) -> Self {
        Self::Timestamp(ts)
    }
}

impl From<Uuid> for Value {
    fn from(id: Uuid) -> Self {
        Self::Uuid(id)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(value: Option<T>) -> Self {
        value.map_or(Self::Null, Into::into)
    }
}

/// Semantic type of a command parameter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DbType {
    Integer,
    Float,
    Text,
    Boolean,
    Binary,
    DateTime,
    Guid,
}

impl DbType {
    pub fn is_compatible(&self, value: &Value) -> bool {
        match (self, value) {
            (_, Value::Null) => true,
            (Self::Integer, Value::Integer(_)) => true,
            (Self::Float, Value::Float(_)) => true,
            (Self::Float, Value::Integer(_)) => true,
            (Self::Text, Value::Text(_)) => true,
            (Self::Boolean, Value::Boolean(_)) => true,
            (Self::Binary, Value::Blob(_)) => true,
            (Self::DateTime, Value::Timestamp(_)) => true,
            (Self::Guid, Value::Uuid(_)) => true,
            _ => false,
        }
    }

    /// The natural parameter type for a value; `None` for NULL
    pub fn of(value: &Value) -> Option<Self> {
        match value {
            Value::Null => None,
            Value::Integer(_) => Some(Self::Integer),
            Value::Float(_) => Some(Self::Float),
            Value::Text(_) => Some(Self::Text),
            Value::Boolean(_) => Some(Self::Boolean),
            Value::Blob(_) => Some(Self::Binary),
            Value::Timestamp(_) => Some(Self::DateTime),
            Value::Uuid(_) => Some(Self::Guid),
        }
    }
}

impl fmt::Display for DbType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Integer => write!(f, "INTEGER"),
            Self::Float => write!(f, "FLOAT"),
            Self::Text => write!(f, "TEXT"),
            Self::Boolean => write!(f, "BOOLEAN"),
            Self::Binary => write!(f, "BINARY"),
            Self::DateTime => write!(f, "DATETIME"),
            Self::Guid => write!(f, "GUID"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    #[test]
    fn test_type_compatibility() {
        assert!(DbType::Integer.is_compatible(&Value::Integer(42)));
        assert!(DbType::Integer.is_compatible(&Value::Null));
        assert!(DbType::Float.is_compatible(&Value::Integer(1)));
        assert!(!DbType::Integer.is_compatible(&Value::Text("hello".into())));
        assert!(!DbType::Guid.is_compatible(&Value::Text("not-a-uuid".into())));
    }

    #[test]
    fn test_option_into_value() {
        let none: Option<i64> = None;
        assert_eq!(Value::from(none), Value::Null);
        assert_eq!(Value::from(Some("x")), Value::Text("x".into()));
    }

    #[test]
    fn test_display() {
        let ts = NaiveDate::from_ymd_opt(2024, 3, 1)
            .unwrap()
            .and_hms_opt(12, 30, 0)
            .unwrap();
        assert_eq!(Value::Timestamp(ts).to_string(), "2024-03-01 12:30:00");
        assert_eq!(Value::Blob(vec![0xde, 0xad]).to_string(), "dead");
        assert_eq!(Value::Null.to_string(), "NULL");
    }

    #[test]
    fn test_float_to_i64_bounds() {
        assert_eq!(Value::Float(2.6).as_i64(), Some(3));
        assert_eq!(Value::Float(-2.5).as_i64(), Some(-3));
        assert_eq!(Value::Float(-I64_UPPER_BOUND).as_i64(), Some(i64::MIN));
        assert_eq!(Value::Float(I64_UPPER_BOUND).as_i64(), None);
        assert_eq!(Value::Float(f64::NAN).as_i64(), None);
    }

    #[test]
    fn test_db_type_of() {
        assert_eq!(DbType::of(&Value::Boolean(true)), Some(DbType::Boolean));
        assert_eq!(DbType::of(&Value::Null), None);
    }
}
