//! The value model bound into statements and returned from the encoder
//! registry.
//!
//! `Value` covers every primitive kind the statement renderer accepts:
//! null, bool, the integer and float widths, strings, temporals,
//! UUID and byte arrays, plus `Array` for collection expansion and `Custom`
//! as the escape hatch the encoder registry resolves.

use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use rust_decimal::Decimal;
use std::any::Any;
use std::fmt;
use std::sync::Arc;
use uuid::Uuid;

/// The SQL dialect a statement is being rendered for.
///
/// Controls native placeholder syntax and blob-literal prefixes; SQLite has
/// no schema concept and no session-level isolation statement, which the
/// migrator and connection modules special-case directly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Dialect {
    Postgres,
    MySql,
    Sqlite,
}

impl Dialect {
    /// Renders a native positional parameter marker for the given 1-based
    /// ordinal (only PostgreSQL needs the ordinal; MySQL and SQLite both use
    /// a bare `?`).
    pub fn native_marker(&self, ordinal: usize) -> String {
        match self {
            Dialect::Postgres => format!("${ordinal}"),
            Dialect::MySql | Dialect::Sqlite => "?".to_string(),
        }
    }

    /// The prefix used for hex blob literals in literal-substitution mode.
    pub fn blob_literal_prefix(&self) -> &'static str {
        match self {
            Dialect::Postgres | Dialect::Sqlite => "\\x",
            Dialect::MySql => "0x",
        }
    }
}

/// How a bound collection value should be expanded inline into the SQL
/// text for collection expansion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CollectionExpansion {
    /// `(?, ?, ?)` — the default, suitable for `x IN ?`.
    #[default]
    Wrapped,
    /// `?, ?, ?` with no surrounding parentheses — for `ARRAY[?]::type[]`.
    NoWrappingTuple,
    /// Rendered as-is without quoting each element; restricted to
    /// identifiers the library itself constructs (migration table/schema
    /// names).
    NoQuotingString,
}

/// A bound parameter value.
///
/// `Custom` carries an opaque value plus a type name used only for error
/// messages; the encoder registry is consulted to turn it into one of the
/// other variants before rendering.
#[derive(Clone)]
pub enum Value {
    Null,
    Bool(bool),
    SmallInt(i16),
    Int(i32),
    BigInt(i64),
    Float(f32),
    Double(f64),
    Decimal(Decimal),
    Str(String),
    Char(char),
    Date(NaiveDate),
    Time(NaiveTime),
    DateTime(NaiveDateTime),
    Instant(DateTime<Utc>),
    Uuid(Uuid),
    Bytes(Vec<u8>),
    /// A bound collection; expanded per `CollectionExpansion`.
    Array(Vec<Value>, CollectionExpansion),
    /// A value whose kind is outside the primitive set; resolved through
    /// the `ValueEncoderRegistry` before rendering.
    Custom(Arc<dyn Any + Send + Sync>, &'static str),
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "Null"),
            Value::Bool(v) => write!(f, "Bool({v})"),
            Value::SmallInt(v) => write!(f, "SmallInt({v})"),
            Value::Int(v) => write!(f, "Int({v})"),
            Value::BigInt(v) => write!(f, "BigInt({v})"),
            Value::Float(v) => write!(f, "Float({v})"),
            Value::Double(v) => write!(f, "Double({v})"),
            Value::Decimal(v) => write!(f, "Decimal({v})"),
            Value::Str(v) => write!(f, "Str({v:?})"),
            Value::Char(v) => write!(f, "Char({v:?})"),
            Value::Date(v) => write!(f, "Date({v})"),
            Value::Time(v) => write!(f, "Time({v})"),
            Value::DateTime(v) => write!(f, "DateTime({v})"),
            Value::Instant(v) => write!(f, "Instant({v})"),
            Value::Uuid(v) => write!(f, "Uuid({v})"),
            Value::Bytes(v) => write!(f, "Bytes({} bytes)", v.len()),
            Value::Array(v, mode) => write!(f, "Array({v:?}, {mode:?})"),
            Value::Custom(_, type_name) => write!(f, "Custom({type_name})"),
        }
    }
}

impl Value {
    /// A human-readable name for error messages (`NamedParameterTypeNotSupported`).
    pub fn kind_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::SmallInt(_) => "smallint",
            Value::Int(_) => "int",
            Value::BigInt(_) => "bigint",
            Value::Float(_) => "float",
            Value::Double(_) => "double",
            Value::Decimal(_) => "decimal",
            Value::Str(_) => "string",
            Value::Char(_) => "char",
            Value::Date(_) => "date",
            Value::Time(_) => "time",
            Value::DateTime(_) => "datetime",
            Value::Instant(_) => "instant",
            Value::Uuid(_) => "uuid",
            Value::Bytes(_) => "bytes",
            Value::Array(..) => "array",
            Value::Custom(_, type_name) => type_name,
        }
    }

    /// True for every variant the renderer can encode without consulting
    /// the encoder registry.
    pub fn is_primitive(&self) -> bool {
        !matches!(self, Value::Custom(..))
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}
impl From<i16> for Value {
    fn from(v: i16) -> Self {
        Value::SmallInt(v)
    }
}
impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Int(v)
    }
}
impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::BigInt(v)
    }
}
impl From<f32> for Value {
    fn from(v: f32) -> Self {
        Value::Float(v)
    }
}
impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Double(v)
    }
}
impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Str(v)
    }
}
impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Str(v.to_string())
    }
}
impl From<Uuid> for Value {
    fn from(v: Uuid) -> Self {
        Value::Uuid(v)
    }
}
impl From<Vec<u8>> for Value {
    fn from(v: Vec<u8>) -> Self {
        Value::Bytes(v)
    }
}
impl From<DateTime<Utc>> for Value {
    fn from(v: DateTime<Utc>) -> Self {
        Value::Instant(v)
    }
}
impl From<Decimal> for Value {
    fn from(v: Decimal) -> Self {
        Value::Decimal(v)
    }
}
impl From<NaiveDate> for Value {
    fn from(v: NaiveDate) -> Self {
        Value::Date(v)
    }
}
impl From<NaiveTime> for Value {
    fn from(v: NaiveTime) -> Self {
        Value::Time(v)
    }
}
impl From<NaiveDateTime> for Value {
    fn from(v: NaiveDateTime) -> Self {
        Value::DateTime(v)
    }
}
impl From<char> for Value {
    fn from(v: char) -> Self {
        Value::Char(v)
    }
}

impl<T: Into<Value>> From<Vec<T>> for Value {
    fn from(values: Vec<T>) -> Self {
        Value::Array(
            values.into_iter().map(Into::into).collect(),
            CollectionExpansion::default(),
        )
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(value: Option<T>) -> Self {
        match value {
            Some(v) => v.into(),
            None => Value::Null,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn native_marker_styles_differ_by_dialect() {
        assert_eq!(Dialect::Postgres.native_marker(3), "$3");
        assert_eq!(Dialect::MySql.native_marker(3), "?");
        assert_eq!(Dialect::Sqlite.native_marker(3), "?");
    }

    #[test]
    fn blob_prefix_styles_differ_by_dialect() {
        assert_eq!(Dialect::Postgres.blob_literal_prefix(), "\\x");
        assert_eq!(Dialect::MySql.blob_literal_prefix(), "0x");
        assert_eq!(Dialect::Sqlite.blob_literal_prefix(), "\\x");
    }

    #[test]
    fn option_none_becomes_null() {
        let v: Value = Option::<i32>::None.into();
        assert!(matches!(v, Value::Null));
    }

    #[test]
    fn vec_becomes_wrapped_array() {
        let v: Value = vec![1i32, 2, 3].into();
        match v {
            Value::Array(items, mode) => {
                assert_eq!(items.len(), 3);
                assert_eq!(mode, CollectionExpansion::Wrapped);
            }
            _ => panic!("expected array"),
        }
    }

    #[test]
    fn kind_name_reports_custom_type_name() {
        let v = Value::Custom(Arc::new(42u8), "MyEnum");
        assert_eq!(v.kind_name(), "MyEnum");
        assert!(!v.is_primitive());
    }
}
