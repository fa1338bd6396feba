//! Default [`RawDriver`] backed by `sqlx`'s dialect-agnostic `Any` driver.
//!
//! All wire-protocol work happens inside `sqlx`; this module only adapts
//! `sqlx::any::AnyConnection` to the `RawDriver`/`RawConnection` contract the
//! rest of the crate depends on, and decodes rows through
//! `sqlx::any::AnyValueKind` so a single adapter covers every enabled
//! backend without per-dialect branching on column types.

use super::{Notification, RawConnection, RawDriver};
use crate::result_set::{ResultSet, Schema};
use crate::value::{Dialect, Value};
use async_trait::async_trait;
use riverdb_common::Error;
use sqlx::any::{AnyConnectOptions, AnyConnection, AnyValueKind};
use sqlx::{Column, ConnectOptions, Row};
use std::str::FromStr;
use std::sync::Once;

static INSTALL_DRIVERS: Once = Once::new();

fn ensure_drivers_installed() {
    INSTALL_DRIVERS.call_once(|| {
        sqlx::any::install_default_drivers();
    });
}

fn dialect_from_url(url: &str) -> Result<Dialect, Error> {
    if url.starts_with("postgres://") || url.starts_with("postgresql://") {
        Ok(Dialect::Postgres)
    } else if url.starts_with("mysql://") {
        Ok(Dialect::MySql)
    } else if url.starts_with("sqlite://") || url.starts_with("sqlite:") {
        Ok(Dialect::Sqlite)
    } else {
        Err(Error::Database(format!("unrecognized connection URL scheme: {url}")))
    }
}

/// True for `sqlite::memory:`, `sqlite://:memory:`, a bare `:memory:` path,
/// or an empty path — every spelling `sqlx`/SQLite treat as "no file on
/// disk". A `?mode=memory` query parameter on an otherwise-named URL is a
/// *shared* cache across connections and is intentionally not matched here.
fn is_sqlite_memory_url(url: &str) -> bool {
    let Some(path) = url.strip_prefix("sqlite://").or_else(|| url.strip_prefix("sqlite:")) else {
        return false;
    };
    let path = path.split(['?', '#']).next().unwrap_or("");
    path.is_empty() || path == ":memory:" || path.trim_start_matches('/') == ":memory:"
}

/// A [`RawDriver`] that opens `sqlx::any::AnyConnection`s against one
/// configured database URL.
pub struct SqlxAnyDriver {
    url: String,
    dialect: Dialect,
    sqlite_in_memory: bool,
}

impl SqlxAnyDriver {
    pub fn new(url: impl Into<String>) -> Result<Self, Error> {
        ensure_drivers_installed();
        let url = url.into();
        let dialect = dialect_from_url(&url)?;
        let sqlite_in_memory = dialect == Dialect::Sqlite && is_sqlite_memory_url(&url);
        Ok(Self { url, dialect, sqlite_in_memory })
    }
}

#[async_trait]
impl RawDriver for SqlxAnyDriver {
    async fn connect(&self) -> Result<Box<dyn RawConnection>, Error> {
        let options = AnyConnectOptions::from_str(&self.url)
            .map_err(|e| Error::Database(e.to_string()))?;
        let conn = options.connect().await.map_err(|e| Error::Database(e.to_string()))?;

        Ok(Box::new(SqlxAnyConnection {
            conn,
            dialect: self.dialect,
            #[cfg(feature = "postgres")]
            listener: None,
            #[cfg(feature = "postgres")]
            url: self.url.clone(),
        }))
    }

    fn dialect(&self) -> Dialect {
        self.dialect
    }

    fn is_sqlite_in_memory(&self) -> bool {
        self.sqlite_in_memory
    }
}

/// A raw connection backed by `sqlx::any::AnyConnection`. PostgreSQL LISTEN
/// support is layered on via a lazily-opened `sqlx::postgres::PgListener`
/// held alongside the `Any` connection, since `Any` itself has no LISTEN
/// facility.
pub struct SqlxAnyConnection {
    conn: AnyConnection,
    dialect: Dialect,
    #[cfg(feature = "postgres")]
    listener: Option<sqlx::postgres::PgListener>,
    #[cfg(feature = "postgres")]
    url: String,
}

fn any_value_to_value(kind: AnyValueKind<'_>) -> Value {
    match kind {
        AnyValueKind::Null => Value::Null,
        AnyValueKind::Bool(v) => Value::Bool(v),
        AnyValueKind::SmallInt(v) => Value::SmallInt(v),
        AnyValueKind::Integer(v) => Value::Int(v),
        AnyValueKind::BigInt(v) => Value::BigInt(v),
        AnyValueKind::Real(v) => Value::Float(v),
        AnyValueKind::Double(v) => Value::Double(v),
        AnyValueKind::Text(v) => Value::Str(v.into_owned()),
        AnyValueKind::Blob(v) => Value::Bytes(v.into_owned()),
        _ => Value::Null,
    }
}

fn bind_values<'q>(
    mut query: sqlx::query::Query<'q, sqlx::Any, sqlx::any::AnyArguments<'q>>,
    values: &'q [Value],
) -> sqlx::query::Query<'q, sqlx::Any, sqlx::any::AnyArguments<'q>> {
    for value in values {
        query = match value {
            Value::Null => query.bind(None::<String>),
            Value::Bool(v) => query.bind(*v),
            Value::SmallInt(v) => query.bind(*v),
            Value::Int(v) => query.bind(*v),
            Value::BigInt(v) => query.bind(*v),
            Value::Float(v) => query.bind(*v),
            Value::Double(v) => query.bind(*v),
            Value::Decimal(v) => query.bind(v.to_string()),
            Value::Str(v) => query.bind(v.clone()),
            Value::Char(v) => query.bind(v.to_string()),
            Value::Date(v) => query.bind(v.format("%Y-%m-%d").to_string()),
            Value::Time(v) => query.bind(v.format("%H:%M:%S%.f").to_string()),
            Value::DateTime(v) => query.bind(v.format("%Y-%m-%d %H:%M:%S%.f").to_string()),
            Value::Instant(v) => query.bind(v.format("%Y-%m-%d %H:%M:%S%.6f").to_string()),
            Value::Uuid(v) => query.bind(v.to_string()),
            Value::Bytes(v) => query.bind(v.clone()),
            Value::Array(..) => query,
            Value::Custom(..) => query,
        };
    }
    query
}

#[async_trait]
impl RawConnection for SqlxAnyConnection {
    async fn execute(&mut self, sql: &str, values: &[Value]) -> Result<u64, Error> {
        let query = bind_values(sqlx::query(sql), values);
        let result = query.execute(&mut self.conn).await.map_err(|e| Error::Database(e.to_string()))?;
        Ok(result.rows_affected())
    }

    async fn fetch_all(&mut self, sql: &str, values: &[Value]) -> Result<ResultSet, Error> {
        let query = bind_values(sqlx::query(sql), values);
        let rows = query.fetch_all(&mut self.conn).await.map_err(|e| Error::Database(e.to_string()))?;

        let column_names: Vec<String> = rows
            .first()
            .map(|row| row.columns().iter().map(|c| c.name().to_string()).collect())
            .unwrap_or_default();
        let schema = Schema::new(column_names.clone());

        let mut decoded_rows = Vec::with_capacity(rows.len());
        for row in &rows {
            let mut values = Vec::with_capacity(column_names.len());
            for (i, _) in column_names.iter().enumerate() {
                let kind: AnyValueKind<'_> =
                    row.try_get(i).map_err(|e| Error::Database(e.to_string()))?;
                values.push(any_value_to_value(kind));
            }
            decoded_rows.push(values);
        }

        Ok(ResultSet::new(schema, decoded_rows, rows.len() as u64))
    }

    async fn begin(&mut self) -> Result<(), Error> {
        self.execute("BEGIN", &[]).await.map(|_| ())
    }

    async fn commit(&mut self) -> Result<(), Error> {
        self.execute("COMMIT", &[]).await.map(|_| ())
    }

    async fn rollback(&mut self) -> Result<(), Error> {
        self.execute("ROLLBACK", &[]).await.map(|_| ())
    }

    #[cfg(feature = "postgres")]
    async fn listen(&mut self, channel: &str) -> Result<(), Error> {
        if self.dialect != Dialect::Postgres {
            return Err(Error::Database("LISTEN requires the postgres dialect".to_string()));
        }
        let mut listener =
            sqlx::postgres::PgListener::connect(&self.url).await.map_err(|e| Error::Database(e.to_string()))?;
        listener.listen(channel).await.map_err(|e| Error::Database(e.to_string()))?;
        self.listener = Some(listener);
        Ok(())
    }

    #[cfg(feature = "postgres")]
    async fn recv_notification(&mut self) -> Result<Option<Notification>, Error> {
        match &mut self.listener {
            Some(listener) => {
                let notification = listener.recv().await.map_err(|e| Error::Database(e.to_string()))?;
                Ok(Some(Notification {
                    channel: notification.channel().to_string(),
                    payload: notification.payload().to_string(),
                }))
            }
            None => Ok(None),
        }
    }

    fn dialect(&self) -> Dialect {
        self.dialect
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sqlite_memory_urls_are_detected_in_their_common_spellings() {
        assert!(is_sqlite_memory_url("sqlite::memory:"));
        assert!(is_sqlite_memory_url("sqlite://:memory:"));
        assert!(is_sqlite_memory_url("sqlite://"));
        assert!(!is_sqlite_memory_url("sqlite://./app.db"));
        assert!(!is_sqlite_memory_url("sqlite:app.db"));
    }

    #[test]
    fn dialect_is_inferred_from_url_scheme() {
        assert_eq!(dialect_from_url("postgres://localhost/db").unwrap(), Dialect::Postgres);
        assert_eq!(dialect_from_url("mysql://localhost/db").unwrap(), Dialect::MySql);
        assert_eq!(dialect_from_url("sqlite://file.db").unwrap(), Dialect::Sqlite);
        assert!(dialect_from_url("mongodb://localhost").is_err());
    }

    #[test]
    fn any_value_kinds_map_to_matching_value_variants() {
        assert!(matches!(any_value_to_value(AnyValueKind::Bool(true)), Value::Bool(true)));
        assert!(matches!(any_value_to_value(AnyValueKind::BigInt(7)), Value::BigInt(7)));
        assert!(matches!(
            any_value_to_value(AnyValueKind::Text(std::borrow::Cow::Borrowed("hi"))),
            Value::Str(ref s) if s == "hi"
        ));
    }
}
