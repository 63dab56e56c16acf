pub mod convert;
pub mod error;
pub mod value;

pub use convert::{FromValue, convert_or_default, convert_to};
pub use error::{DbError, FailureKind, Result};
pub use value::{DbType, Value};
