//! The file-based schema migrator.

mod splitter;

use crate::connection::Connection;
use crate::value::{Dialect, Value};
use regex::Regex;
use riverdb_common::Error;
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{info, instrument};

/// A migration file parsed from disk.
#[derive(Debug, Clone)]
pub struct MigrationFile {
    pub version: i64,
    pub name: String,
    pub content: String,
}

/// A recorded row of the bookkeeping table.
#[derive(Debug, Clone)]
pub struct Migration {
    pub version: i64,
    pub name: String,
    pub checksum: String,
    pub execution_time_ms: i64,
}

/// Outcome of a migration run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MigrationResult {
    pub total: usize,
    pub applied: usize,
    pub validated: usize,
    pub execution_time: Duration,
}

/// The set of migrations already recorded in the bookkeeping table,
/// read back for introspection.
#[derive(Debug, Clone)]
pub struct MigrationHistory {
    pub migrations: Vec<Migration>,
}

type AfterStatement = Arc<dyn Fn(&str, Duration) + Send + Sync>;
type AfterFile = Arc<dyn Fn(&Migration, Duration) + Send + Sync>;

/// Construction options for a migration run.
#[derive(Clone)]
pub struct MigratorOptions {
    pub directory: Option<PathBuf>,
    pub table: String,
    pub schema: Option<String>,
    pub create_schema: bool,
    pub dialect: Dialect,
    pub after_statement: Option<AfterStatement>,
    pub after_file: Option<AfterFile>,
}

impl MigratorOptions {
    pub fn new(dialect: Dialect) -> Self {
        Self {
            directory: None,
            table: "schema_migrations".to_string(),
            schema: None,
            create_schema: false,
            dialect,
            after_statement: None,
            after_file: None,
        }
    }

    pub fn directory(mut self, dir: impl Into<PathBuf>) -> Self {
        self.directory = Some(dir.into());
        self
    }

    pub fn table(mut self, table: impl Into<String>) -> Self {
        self.table = table.into();
        self
    }

    pub fn schema(mut self, schema: impl Into<String>) -> Self {
        self.schema = Some(schema.into());
        self
    }

    pub fn create_schema(mut self, create: bool) -> Self {
        self.create_schema = create;
        self
    }

    pub fn after_statement<F: Fn(&str, Duration) + Send + Sync + 'static>(mut self, f: F) -> Self {
        self.after_statement = Some(Arc::new(f));
        self
    }

    pub fn after_file<F: Fn(&Migration, Duration) + Send + Sync + 'static>(mut self, f: F) -> Self {
        self.after_file = Some(Arc::new(f));
        self
    }

    fn validate(&self) -> Result<(), Error> {
        static NAME_RE: &str = r"^_?[A-Za-z0-9_]+$";
        let re = Regex::new(NAME_RE).expect("static regex is valid");
        if !re.is_match(&self.table) {
            return Err(Error::Migrate(format!("invalid table name '{}'", self.table)));
        }
        if let Some(schema) = &self.schema {
            if !re.is_match(schema) {
                return Err(Error::Migrate(format!("invalid schema name '{schema}'")));
            }
            if self.dialect == Dialect::Sqlite {
                return Err(Error::Migrate("SQLite does not support schemas".to_string()));
            }
        }
        Ok(())
    }

    fn qualified_table(&self) -> String {
        match &self.schema {
            Some(schema) if self.dialect != Dialect::Sqlite => format!("{schema}.{}", self.table),
            _ => self.table.clone(),
        }
    }
}

fn filename_regex() -> Regex {
    Regex::new(r"^\s*(\d+)_([A-Za-z0-9._-]+)\.sql\s*$").expect("static regex is valid")
}

/// Lists and parses every file in `dir` matching the migration filename
/// convention; non-matching files are ignored.
pub fn discover_migrations(dir: &Path) -> Result<Vec<MigrationFile>, Error> {
    let re = filename_regex();
    let mut files = Vec::new();

    let entries = std::fs::read_dir(dir)
        .map_err(|e| Error::Migrate(format!("cannot read migration directory: {e}")))?;

    for entry in entries {
        let entry = entry.map_err(|e| Error::Migrate(format!("cannot read directory entry: {e}")))?;
        let file_name = entry.file_name();
        let Some(name) = file_name.to_str() else { continue };
        let Some(captures) = re.captures(name) else { continue };

        let version: i64 = captures[1]
            .parse()
            .map_err(|_| Error::Migrate(format!("version does not fit i64 in '{name}'")))?;
        let migration_name = captures[2].to_string();
        let content = std::fs::read_to_string(entry.path())
            .map_err(|e| Error::Migrate(format!("cannot read migration file '{name}': {e}")))?;

        files.push(MigrationFile { version, name: migration_name, content });
    }

    order_migrations(files)
}

/// Sorts migrations by version and enforces the duplicate/monotonic-gap
/// invariants.
pub fn order_migrations(mut files: Vec<MigrationFile>) -> Result<Vec<MigrationFile>, Error> {
    files.sort_by_key(|f| f.version);

    for window in files.windows(2) {
        if window[0].version == window[1].version {
            return Err(Error::Migrate(format!("duplicate migration version {}", window[0].version)));
        }
        if window[1].version - window[0].version > 1 {
            return Err(Error::Migrate(format!(
                "non-monotonic version gap between {} and {}",
                window[0].version, window[1].version
            )));
        }
    }

    Ok(files)
}

fn checksum_of(content: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Applies, in order, every migration file in `options.directory` (or
/// `files` if pre-listed) against `connection`.
pub struct Migrator;

impl Migrator {
    #[instrument(skip(connection, options))]
    pub async fn run(connection: &Connection, options: &MigratorOptions) -> Result<MigrationResult, Error> {
        options.validate()?;

        let files = match &options.directory {
            Some(dir) => discover_migrations(dir)?,
            None => return Err(Error::Migrate("no migration directory configured".to_string())),
        };
        Self::run_files(connection, options, files).await
    }

    pub async fn run_files(
        connection: &Connection,
        options: &MigratorOptions,
        files: Vec<MigrationFile>,
    ) -> Result<MigrationResult, Error> {
        options.validate()?;
        let started = Instant::now();

        if options.create_schema {
            if let Some(schema) = &options.schema {
                if options.dialect != Dialect::Sqlite {
                    connection.execute(&format!("CREATE SCHEMA IF NOT EXISTS {schema}"), &[]).await?;
                }
            }
        }

        let table = options.qualified_table();
        connection.execute(&create_bookkeeping_sql(&table, options.dialect), &[]).await?;

        let mut applied = 0usize;
        let mut validated = 0usize;

        for file in &files {
            let checksum = checksum_of(&file.content);
            match Self::lookup_applied(connection, &table, file.version).await? {
                Some(existing_checksum) if existing_checksum == checksum => {
                    validated += 1;
                    continue;
                }
                Some(_) => {
                    return Err(Error::Migrate(format!(
                        "checksum mismatch for migration version {}",
                        file.version
                    )));
                }
                None => {}
            }

            Self::apply_file(connection, options, &table, file, &checksum).await?;
            applied += 1;
        }

        info!(total = files.len(), applied, validated, "migration run complete");
        Ok(MigrationResult { total: files.len(), applied, validated, execution_time: started.elapsed() })
    }

    async fn lookup_applied(connection: &Connection, table: &str, version: i64) -> Result<Option<String>, Error> {
        let sql = format!("SELECT checksum FROM {table} WHERE version = {version}");
        let result = connection.fetch_all(&sql, &[]).await?;
        match result.rows().first() {
            Some(row) => Ok(Some(row.as_str("checksum")?.to_string())),
            None => Ok(None),
        }
    }

    async fn apply_file(
        connection: &Connection,
        options: &MigratorOptions,
        table: &str,
        file: &MigrationFile,
        checksum: &str,
    ) -> Result<(), Error> {
        let file_started = Instant::now();
        let statements = splitter::split_statements(&file.content);
        if statements.is_empty() {
            return Err(Error::Migrate(format!("migration {} is empty", file.version)));
        }

        connection.execute("BEGIN", &[]).await?;

        let previous_search_path = match &options.schema {
            Some(schema) => match Self::apply_search_path(connection, options.dialect, schema).await {
                Ok(previous) => previous,
                Err(err) => {
                    connection.execute("ROLLBACK", &[]).await.ok();
                    return Err(err);
                }
            },
            None => None,
        };

        for statement in &statements {
            let statement_started = Instant::now();
            if let Err(err) = connection.execute(statement, &[]).await {
                Self::restore_search_path(connection, options.dialect, previous_search_path.as_deref()).await;
                connection.execute("ROLLBACK", &[]).await.ok();
                return Err(Error::Migrate(format!(
                    "migration {} failed on statement: {err}",
                    file.version
                )));
            }
            if let Some(callback) = &options.after_statement {
                callback(statement, statement_started.elapsed());
            }
        }

        Self::restore_search_path(connection, options.dialect, previous_search_path.as_deref()).await;

        let execution_time_ms = file_started.elapsed().as_millis() as i64;
        let insert_sql = insert_bookkeeping_sql(table, options.dialect);
        connection
            .execute(
                &insert_sql,
                &[
                    Value::BigInt(file.version),
                    Value::Str(file.name.clone()),
                    Value::Str(checksum.to_string()),
                    Value::BigInt(execution_time_ms),
                ],
            )
            .await?;

        connection.execute("COMMIT", &[]).await?;

        if let Some(callback) = &options.after_file {
            let migration = Migration {
                version: file.version,
                name: file.name.clone(),
                checksum: checksum.to_string(),
                execution_time_ms,
            };
            callback(&migration, file_started.elapsed());
        }

        Ok(())
    }

    async fn apply_search_path(
        connection: &Connection,
        dialect: Dialect,
        schema: &str,
    ) -> Result<Option<String>, Error> {
        match dialect {
            Dialect::Postgres => {
                let current = connection.fetch_all("SHOW search_path", &[]).await?;
                let previous = current
                    .rows()
                    .first()
                    .and_then(|row| row.as_str("search_path").ok().map(str::to_string));
                connection.execute(&format!("SET search_path TO {schema}, public"), &[]).await?;
                Ok(previous)
            }
            Dialect::MySql => {
                let current = connection.fetch_all("SELECT DATABASE() AS db", &[]).await?;
                let previous =
                    current.rows().first().and_then(|row| row.as_str("db").ok().map(str::to_string));
                connection.execute(&format!("USE {schema}"), &[]).await?;
                Ok(previous)
            }
            Dialect::Sqlite => Ok(None),
        }
    }

    async fn restore_search_path(connection: &Connection, dialect: Dialect, previous: Option<&str>) {
        let Some(previous) = previous else { return };
        let sql = match dialect {
            Dialect::Postgres => format!("SET search_path TO {previous}"),
            Dialect::MySql => format!("USE {previous}"),
            Dialect::Sqlite => return,
        };
        let _ = connection.execute(&sql, &[]).await;
    }

    /// Reads the bookkeeping table without applying anything.
    pub async fn history(connection: &Connection, options: &MigratorOptions) -> Result<MigrationHistory, Error> {
        let table = options.qualified_table();
        let sql = format!("SELECT version, name, checksum, execution_time_ms FROM {table} ORDER BY version");
        let result = connection.fetch_all(&sql, &[]).await?;
        let migrations = result
            .rows()
            .iter()
            .map(|row| {
                Ok(Migration {
                    version: row.as_long("version")?,
                    name: row.as_str("name")?.to_string(),
                    checksum: row.as_str("checksum")?.to_string(),
                    execution_time_ms: row.as_long("execution_time_ms")?,
                })
            })
            .collect::<Result<Vec<_>, Error>>()?;
        Ok(MigrationHistory { migrations })
    }
}

fn create_bookkeeping_sql(table: &str, dialect: Dialect) -> String {
    let (pk_type, timestamp_type) = match dialect {
        Dialect::Postgres => ("BIGINT PRIMARY KEY", "TIMESTAMPTZ NOT NULL DEFAULT now()"),
        Dialect::MySql => ("BIGINT PRIMARY KEY", "TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP"),
        Dialect::Sqlite => ("INTEGER PRIMARY KEY", "TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP"),
    };
    format!(
        "CREATE TABLE IF NOT EXISTS {table} (\
         version {pk_type}, \
         name TEXT NOT NULL, \
         installed_on {timestamp_type}, \
         checksum TEXT NOT NULL, \
         execution_time_ms BIGINT NOT NULL)"
    )
}

fn insert_bookkeeping_sql(table: &str, dialect: Dialect) -> String {
    match dialect {
        Dialect::Postgres => format!(
            "INSERT INTO {table} (version, name, checksum, execution_time_ms) VALUES ($1, $2, $3, $4)"
        ),
        Dialect::MySql | Dialect::Sqlite => format!(
            "INSERT INTO {table} (version, name, checksum, execution_time_ms) VALUES (?, ?, ?, ?)"
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn file(version: i64, name: &str, content: &str) -> MigrationFile {
        MigrationFile { version, name: name.to_string(), content: content.to_string() }
    }

    #[test]
    fn duplicate_version_is_rejected() {
        let files = vec![file(1, "a", "SELECT 1;"), file(1, "b", "SELECT 2;")];
        let err = order_migrations(files).unwrap_err();
        assert!(matches!(err, Error::Migrate(_)));
    }

    #[test]
    fn non_monotonic_gap_is_rejected() {
        let files = vec![file(1, "a", "SELECT 1;"), file(3, "b", "SELECT 2;")];
        let err = order_migrations(files).unwrap_err();
        assert!(matches!(err, Error::Migrate(_)));
    }

    #[test]
    fn adjacent_versions_sort_and_pass() {
        let files = vec![file(2, "b", "SELECT 2;"), file(1, "a", "SELECT 1;")];
        let ordered = order_migrations(files).unwrap();
        assert_eq!(ordered[0].version, 1);
        assert_eq!(ordered[1].version, 2);
    }

    #[test]
    fn filename_regex_extracts_version_and_name() {
        let re = filename_regex();
        let captures = re.captures("12_add_users_table.sql").unwrap();
        assert_eq!(&captures[1], "12");
        assert_eq!(&captures[2], "add_users_table");
    }

    #[test]
    fn filename_regex_rejects_non_matching_names() {
        let re = filename_regex();
        assert!(re.captures("readme.md").is_none());
        assert!(re.captures("create_table.sql").is_none());
    }

    #[test]
    fn sqlite_with_schema_fails_validation() {
        let options = MigratorOptions::new(Dialect::Sqlite).schema("app");
        assert!(options.validate().is_err());
    }

    #[test]
    fn invalid_table_name_fails_validation() {
        let options = MigratorOptions::new(Dialect::Postgres).table("bad name");
        assert!(options.validate().is_err());
    }

    #[test]
    fn qualified_table_includes_schema_except_on_sqlite() {
        let pg = MigratorOptions::new(Dialect::Postgres).schema("app").table("migrations");
        assert_eq!(pg.qualified_table(), "app.migrations");

        let lite = MigratorOptions::new(Dialect::Sqlite).table("migrations");
        assert_eq!(lite.qualified_table(), "migrations");
    }

    #[test]
    fn checksum_is_stable_for_identical_content() {
        assert_eq!(checksum_of("CREATE TABLE t(id INT);"), checksum_of("CREATE TABLE t(id INT);"));
        assert_ne!(checksum_of("a"), checksum_of("b"));
    }
}
