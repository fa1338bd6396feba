//! SQL literal encoding.

use crate::value::{Dialect, Value};

/// Single-quotes a string, doubling embedded quotes.
pub(crate) fn quote_sql_string(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 2);
    out.push('\'');
    for c in s.chars() {
        if c == '\'' {
            out.push('\'');
        }
        out.push(c);
    }
    out.push('\'');
    out
}

fn hex_encode(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        out.push_str(&format!("{b:02x}"));
    }
    out
}

/// Encodes a single resolved (non-`Custom`, non-`Array`) value as a SQL
/// literal for the given dialect.
pub(crate) fn encode_scalar_literal(value: &Value, dialect: Dialect) -> String {
    match value {
        Value::Null => "null".to_string(),
        Value::Bool(b) => b.to_string(),
        Value::SmallInt(v) => v.to_string(),
        Value::Int(v) => v.to_string(),
        Value::BigInt(v) => v.to_string(),
        Value::Float(v) => v.to_string(),
        Value::Double(v) => v.to_string(),
        Value::Decimal(v) => v.to_string(),
        Value::Str(s) => quote_sql_string(s),
        Value::Char(c) => quote_sql_string(&c.to_string()),
        Value::Date(d) => quote_sql_string(&d.format("%Y-%m-%d").to_string()),
        Value::Time(t) => quote_sql_string(&t.format("%H:%M:%S%.f").to_string()),
        Value::DateTime(dt) => quote_sql_string(&dt.format("%Y-%m-%d %H:%M:%S%.f").to_string()),
        Value::Instant(instant) => {
            quote_sql_string(&instant.format("%Y-%m-%d %H:%M:%S%.6f").to_string())
        }
        Value::Uuid(u) => quote_sql_string(&u.to_string()),
        Value::Bytes(bytes) => format!("{}{}", dialect.blob_literal_prefix(), hex_encode(bytes)),
        Value::Array(..) => unreachable!("arrays are expanded by the caller before encoding"),
        Value::Custom(..) => unreachable!("custom values must be resolved before encoding"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{NaiveDate, TimeZone, Utc};

    #[test]
    fn strings_are_single_quoted_with_doubled_quotes() {
        assert_eq!(quote_sql_string("hi"), "'hi'");
        assert_eq!(quote_sql_string("it's"), "'it''s'");
    }

    #[test]
    fn null_renders_lowercase() {
        assert_eq!(encode_scalar_literal(&Value::Null, Dialect::Postgres), "null");
    }

    #[test]
    fn instant_renders_space_separated_with_six_digit_micros() {
        let instant = Utc.with_ymd_and_hms(2024, 3, 5, 12, 30, 1).unwrap();
        let rendered = encode_scalar_literal(&Value::Instant(instant), Dialect::Postgres);
        assert_eq!(rendered, "'2024-03-05 12:30:01.000000'");
    }

    #[test]
    fn blob_prefix_follows_dialect() {
        let bytes = Value::Bytes(vec![0xDE, 0xAD, 0xBE, 0xEF]);
        assert_eq!(encode_scalar_literal(&bytes, Dialect::Postgres), "\\xdeadbeef");
        assert_eq!(encode_scalar_literal(&bytes, Dialect::MySql), "0xdeadbeef");
    }

    #[test]
    fn date_renders_iso_form() {
        let date = Value::Date(NaiveDate::from_ymd_opt(2024, 12, 1).unwrap());
        assert_eq!(encode_scalar_literal(&date, Dialect::Postgres), "'2024-12-01'");
    }
}
