//! Query results: columns, rows, and typed cast accessors.

use crate::value::Value;
use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use riverdb_common::Error;
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::Arc;
use uuid::Uuid;

/// A column's position and name within a [`ResultSet`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Column {
    pub name: String,
    pub ordinal: usize,
}

/// Shared schema for every row in a [`ResultSet`]: column order plus a
/// name-to-ordinal index for by-name lookups.
#[derive(Debug, Clone)]
pub struct Schema {
    columns: Vec<Column>,
    by_name: HashMap<String, usize>,
}

impl Schema {
    pub fn new(names: impl IntoIterator<Item = impl Into<String>>) -> Self {
        let columns: Vec<Column> = names
            .into_iter()
            .enumerate()
            .map(|(ordinal, name)| Column { name: name.into(), ordinal })
            .collect();
        let by_name = columns.iter().map(|c| (c.name.clone(), c.ordinal)).collect();
        Self { columns, by_name }
    }

    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    pub fn ordinal_of(&self, name: &str) -> Option<usize> {
        self.by_name.get(name).copied()
    }
}

/// A single row of a [`ResultSet`], sharing its parent's [`Schema`].
#[derive(Debug, Clone)]
pub struct Row {
    schema: Arc<Schema>,
    values: Vec<Value>,
}

/// The outcome of a query: a shared schema plus zero or more rows, and (for
/// DML) the count of rows affected.
#[derive(Debug, Clone)]
pub struct ResultSet {
    schema: Arc<Schema>,
    rows: Vec<Row>,
    rows_affected: u64,
}

impl ResultSet {
    pub fn new(schema: Schema, rows: Vec<Vec<Value>>, rows_affected: u64) -> Self {
        let schema = Arc::new(schema);
        let rows = rows
            .into_iter()
            .map(|values| Row { schema: schema.clone(), values })
            .collect();
        Self { schema, rows, rows_affected }
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    pub fn rows(&self) -> &[Row] {
        &self.rows
    }

    pub fn rows_affected(&self) -> u64 {
        self.rows_affected
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }
}

fn cannot_decode(column: &str, expected: &str, actual: &Value) -> Error {
    Error::CannotDecode {
        column: column.to_string(),
        reason: format!("expected {expected}, got {}", actual.kind_name()),
    }
}

fn column_is_null(column: &str) -> Error {
    Error::CannotDecode { column: column.to_string(), reason: "value is null".to_string() }
}

impl Row {
    fn ordinal(&self, name: &str) -> Result<usize, Error> {
        self.schema.ordinal_of(name).ok_or_else(|| Error::CannotDecode {
            column: name.to_string(),
            reason: "no such column".to_string(),
        })
    }

    fn value_at(&self, ordinal: usize) -> &Value {
        &self.values[ordinal]
    }

    /// Raw value access by column name.
    pub fn get(&self, name: &str) -> Result<&Value, Error> {
        let ordinal = self.ordinal(name)?;
        Ok(self.value_at(ordinal))
    }

    pub fn as_bool(&self, name: &str) -> Result<bool, Error> {
        self.as_bool_opt(name)?.ok_or_else(|| column_is_null(name))
    }

    pub fn as_bool_opt(&self, name: &str) -> Result<Option<bool>, Error> {
        match self.get(name)? {
            Value::Null => Ok(None),
            Value::Bool(v) => Ok(Some(*v)),
            other => Err(cannot_decode(name, "bool", other)),
        }
    }

    pub fn as_long(&self, name: &str) -> Result<i64, Error> {
        self.as_long_opt(name)?.ok_or_else(|| column_is_null(name))
    }

    pub fn as_long_opt(&self, name: &str) -> Result<Option<i64>, Error> {
        match self.get(name)? {
            Value::Null => Ok(None),
            Value::SmallInt(v) => Ok(Some(*v as i64)),
            Value::Int(v) => Ok(Some(*v as i64)),
            Value::BigInt(v) => Ok(Some(*v)),
            other => Err(cannot_decode(name, "integer", other)),
        }
    }

    pub fn as_double(&self, name: &str) -> Result<f64, Error> {
        self.as_double_opt(name)?.ok_or_else(|| column_is_null(name))
    }

    pub fn as_double_opt(&self, name: &str) -> Result<Option<f64>, Error> {
        match self.get(name)? {
            Value::Null => Ok(None),
            Value::Float(v) => Ok(Some(*v as f64)),
            Value::Double(v) => Ok(Some(*v)),
            other => Err(cannot_decode(name, "float", other)),
        }
    }

    pub fn as_decimal(&self, name: &str) -> Result<Decimal, Error> {
        self.as_decimal_opt(name)?.ok_or_else(|| column_is_null(name))
    }

    pub fn as_decimal_opt(&self, name: &str) -> Result<Option<Decimal>, Error> {
        match self.get(name)? {
            Value::Null => Ok(None),
            Value::Decimal(v) => Ok(Some(*v)),
            other => Err(cannot_decode(name, "decimal", other)),
        }
    }

    pub fn as_str(&self, name: &str) -> Result<&str, Error> {
        self.as_str_opt(name)?.ok_or_else(|| column_is_null(name))
    }

    pub fn as_str_opt(&self, name: &str) -> Result<Option<&str>, Error> {
        match self.get(name)? {
            Value::Null => Ok(None),
            Value::Str(v) => Ok(Some(v.as_str())),
            other => Err(cannot_decode(name, "string", other)),
        }
    }

    pub fn as_bytes(&self, name: &str) -> Result<&[u8], Error> {
        self.as_bytes_opt(name)?.ok_or_else(|| column_is_null(name))
    }

    pub fn as_bytes_opt(&self, name: &str) -> Result<Option<&[u8]>, Error> {
        match self.get(name)? {
            Value::Null => Ok(None),
            Value::Bytes(v) => Ok(Some(v.as_slice())),
            other => Err(cannot_decode(name, "bytes", other)),
        }
    }

    pub fn as_uuid(&self, name: &str) -> Result<Uuid, Error> {
        self.as_uuid_opt(name)?.ok_or_else(|| column_is_null(name))
    }

    pub fn as_uuid_opt(&self, name: &str) -> Result<Option<Uuid>, Error> {
        match self.get(name)? {
            Value::Null => Ok(None),
            Value::Uuid(v) => Ok(Some(*v)),
            other => Err(cannot_decode(name, "uuid", other)),
        }
    }

    pub fn as_date(&self, name: &str) -> Result<NaiveDate, Error> {
        self.as_date_opt(name)?.ok_or_else(|| column_is_null(name))
    }

    pub fn as_date_opt(&self, name: &str) -> Result<Option<NaiveDate>, Error> {
        match self.get(name)? {
            Value::Null => Ok(None),
            Value::Date(v) => Ok(Some(*v)),
            other => Err(cannot_decode(name, "date", other)),
        }
    }

    pub fn as_time(&self, name: &str) -> Result<NaiveTime, Error> {
        self.as_time_opt(name)?.ok_or_else(|| column_is_null(name))
    }

    pub fn as_time_opt(&self, name: &str) -> Result<Option<NaiveTime>, Error> {
        match self.get(name)? {
            Value::Null => Ok(None),
            Value::Time(v) => Ok(Some(*v)),
            other => Err(cannot_decode(name, "time", other)),
        }
    }

    pub fn as_datetime(&self, name: &str) -> Result<NaiveDateTime, Error> {
        self.as_datetime_opt(name)?.ok_or_else(|| column_is_null(name))
    }

    pub fn as_datetime_opt(&self, name: &str) -> Result<Option<NaiveDateTime>, Error> {
        match self.get(name)? {
            Value::Null => Ok(None),
            Value::DateTime(v) => Ok(Some(*v)),
            other => Err(cannot_decode(name, "datetime", other)),
        }
    }

    pub fn as_instant(&self, name: &str) -> Result<DateTime<Utc>, Error> {
        self.as_instant_opt(name)?.ok_or_else(|| column_is_null(name))
    }

    pub fn as_instant_opt(&self, name: &str) -> Result<Option<DateTime<Utc>>, Error> {
        match self.get(name)? {
            Value::Null => Ok(None),
            Value::Instant(v) => Ok(Some(*v)),
            other => Err(cannot_decode(name, "instant", other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> ResultSet {
        let schema = Schema::new(["id", "name", "score"]);
        ResultSet::new(
            schema,
            vec![vec![Value::BigInt(1), Value::Str("alice".into()), Value::Null]],
            1,
        )
    }

    #[test]
    fn column_lookup_by_name_resolves_ordinal() {
        let rs = sample();
        assert_eq!(rs.schema().ordinal_of("name"), Some(1));
        assert_eq!(rs.schema().ordinal_of("missing"), None);
    }

    #[test]
    fn typed_accessors_read_matching_variants() {
        let rs = sample();
        let row = &rs.rows()[0];
        assert_eq!(row.as_long("id").unwrap(), 1);
        assert_eq!(row.as_str("name").unwrap(), "alice");
    }

    #[test]
    fn null_value_returns_none_for_opt_accessor() {
        let rs = sample();
        let row = &rs.rows()[0];
        assert_eq!(row.as_long_opt("score").unwrap(), None);
    }

    #[test]
    fn null_value_errors_for_non_opt_accessor() {
        let rs = sample();
        let row = &rs.rows()[0];
        let err = row.as_long("score").unwrap_err();
        assert!(matches!(err, Error::CannotDecode { .. }));
    }

    #[test]
    fn mismatched_type_errors_with_cannot_decode() {
        let rs = sample();
        let row = &rs.rows()[0];
        let err = row.as_bool("name").unwrap_err();
        assert!(matches!(err, Error::CannotDecode { .. }));
    }

    #[test]
    fn unknown_column_name_errors() {
        let rs = sample();
        let row = &rs.rows()[0];
        let err = row.get("nope").unwrap_err();
        assert!(matches!(err, Error::CannotDecode { .. }));
    }

    #[test]
    fn rows_affected_is_tracked_independently_of_row_count() {
        let schema = Schema::new(["n"]);
        let rs = ResultSet::new(schema, vec![], 5);
        assert_eq!(rs.rows_affected(), 5);
        assert!(rs.is_empty());
    }
}
