//! The PgMQ client: a thin SQL-driven wrapper over the `pgmq`
//! PostgreSQL extension's functions.

use crate::connection::Connection;
use crate::value::Value;
use chrono::{DateTime, Utc};
use riverdb_common::Error;
use std::collections::HashMap;
use std::time::Duration;
use tracing::{instrument, warn};

/// A message as read back from a queue.
#[derive(Debug, Clone)]
pub struct Message {
    pub msg_id: i64,
    pub read_ct: i32,
    pub enqueued_at: DateTime<Utc>,
    /// Present from `pgmq` ≥ 1.5; absent on older extension versions.
    pub last_read_at: Option<DateTime<Utc>>,
    pub vt: DateTime<Utc>,
    pub payload: String,
    pub headers: HashMap<String, String>,
}

/// A queue as returned by `list_queues`.
#[derive(Debug, Clone)]
pub struct QueueInfo {
    pub name: String,
    pub partitioned: bool,
    pub unlogged: bool,
    pub created_at: DateTime<Utc>,
}

/// Queue-level statistics returned by `metrics`.
#[derive(Debug, Clone)]
pub struct QueueMetrics {
    pub queue_name: String,
    pub queue_length: i64,
    pub newest_msg_age_sec: Option<i64>,
    pub oldest_msg_age_sec: Option<i64>,
    pub total_messages: i64,
}

/// Construction options for a queue create.
#[derive(Debug, Clone, Default)]
pub struct CreateQueueOptions {
    pub unlogged: bool,
    pub enable_notify_insert: bool,
}

/// Client options, including extension-bootstrap behavior.
#[derive(Debug, Clone)]
pub struct PgmqClientOptions {
    pub verify_installation: bool,
    pub auto_install: bool,
}

impl Default for PgmqClientOptions {
    fn default() -> Self {
        Self { verify_installation: true, auto_install: false }
    }
}

/// A SQL-driven client over the `pgmq` extension.
pub struct PgmqClient {
    connection: Connection,
    options: PgmqClientOptions,
}

impl PgmqClient {
    pub fn new(connection: Connection, options: PgmqClientOptions) -> Self {
        Self { connection, options }
    }

    /// Verifies (and, if configured, installs) the `pgmq` extension.
    /// Called implicitly by every other operation the first time it runs
    /// against a fresh connection, but callers may invoke it eagerly too.
    #[instrument(skip(self))]
    pub async fn ensure_installed(&self) -> Result<(), Error> {
        if !self.options.verify_installation {
            return Ok(());
        }
        if self.extension_exists().await? {
            return Ok(());
        }
        if !self.options.auto_install {
            return Err(Error::Database("pgmq extension is not installed".to_string()));
        }
        self.connection.execute("CREATE EXTENSION IF NOT EXISTS pgmq", &[]).await?;
        if !self.extension_exists().await? {
            return Err(Error::Database(
                "pgmq extension installation did not take effect".to_string(),
            ));
        }
        Ok(())
    }

    async fn extension_exists(&self) -> Result<bool, Error> {
        let result = self
            .connection
            .fetch_all("SELECT pgmq._extension_exists('pgmq') AS exists", &[])
            .await?;
        match result.rows().first() {
            Some(row) => row.as_bool("exists"),
            None => Ok(false),
        }
    }

    /// Creates `queue`, optionally unlogged and/or with insert-notify
    /// enabled. Idempotent: an existing queue with a compatible `unlogged`
    /// flag is accepted; a flag mismatch or a partitioned queue is rejected.
    #[instrument(skip(self))]
    pub async fn create(&self, queue: &str, options: &CreateQueueOptions) -> Result<(), Error> {
        self.ensure_installed().await?;

        if let Some(existing) = self.find_queue(queue).await? {
            if existing.partitioned {
                return Err(Error::Database(format!("queue '{queue}' is partitioned")));
            }
            if existing.unlogged != options.unlogged {
                return Err(Error::Database(format!(
                    "queue '{queue}' already exists with unlogged={}",
                    existing.unlogged
                )));
            }
            return Ok(());
        }

        self.connection.execute("BEGIN", &[]).await?;
        let create_fn = if options.unlogged { "pgmq.create_unlogged" } else { "pgmq.create" };
        let result = self
            .connection
            .execute(&format!("SELECT {create_fn}($1)"), &[Value::Str(queue.to_string())])
            .await;
        if let Err(err) = result {
            self.connection.execute("ROLLBACK", &[]).await.ok();
            return Err(err);
        }
        if options.enable_notify_insert {
            let result = self
                .connection
                .execute("SELECT pgmq.enable_notify_insert($1)", &[Value::Str(queue.to_string())])
                .await;
            if let Err(err) = result {
                self.connection.execute("ROLLBACK", &[]).await.ok();
                return Err(err);
            }
        }
        self.connection.execute("COMMIT", &[]).await?;
        Ok(())
    }

    async fn find_queue(&self, queue: &str) -> Result<Option<QueueInfo>, Error> {
        let queues = self.list_queues().await?;
        Ok(queues.into_iter().find(|q| q.name == queue))
    }

    #[instrument(skip(self))]
    pub async fn list_queues(&self) -> Result<Vec<QueueInfo>, Error> {
        let result = self
            .connection
            .fetch_all("SELECT queue_name, is_partitioned, is_unlogged, created_at FROM pgmq.list_queues()", &[])
            .await?;
        result
            .rows()
            .iter()
            .map(|row| {
                Ok(QueueInfo {
                    name: row.as_str("queue_name")?.to_string(),
                    partitioned: row.as_bool("is_partitioned")?,
                    unlogged: row.as_bool("is_unlogged")?,
                    created_at: row.as_instant("created_at")?,
                })
            })
            .collect()
    }

    /// Drops `queue`; returns whether it existed.
    #[instrument(skip(self))]
    pub async fn drop_queue(&self, queue: &str) -> Result<bool, Error> {
        let result = self
            .connection
            .fetch_all("SELECT pgmq.drop_queue($1) AS dropped", &[Value::Str(queue.to_string())])
            .await?;
        match result.rows().first() {
            Some(row) => row.as_bool("dropped"),
            None => Ok(false),
        }
    }

    /// Removes every message from `queue`; returns the count removed.
    #[instrument(skip(self))]
    pub async fn purge(&self, queue: &str) -> Result<i64, Error> {
        let result = self
            .connection
            .fetch_all("SELECT pgmq.purge_queue($1) AS purged", &[Value::Str(queue.to_string())])
            .await?;
        match result.rows().first() {
            Some(row) => row.as_long("purged"),
            None => Ok(0),
        }
    }

    /// Sends one message, returning its new `msg_id`.
    ///
    /// `msg` is an arbitrary string, not necessarily valid JSON on its own,
    /// so it is encoded as a JSON *string* (quoted and escaped) before being
    /// cast to `jsonb` — binding it unquoted would make `pgmq.send` reject
    /// any payload that isn't itself a JSON document, and would make `read`
    /// hand back jsonb's reformatted text instead of the original bytes.
    #[instrument(skip(self, msg, headers))]
    pub async fn send(
        &self,
        queue: &str,
        msg: &str,
        headers: &HashMap<String, String>,
        delay: Duration,
    ) -> Result<i64, Error> {
        let payload_json = serde_json::to_string(msg)
            .map_err(|e| Error::Database(format!("failed to encode payload: {e}")))?;
        let headers_json = serde_json::to_string(headers)
            .map_err(|e| Error::Database(format!("failed to encode headers: {e}")))?;
        let result = self
            .connection
            .fetch_all(
                "SELECT pgmq.send($1, $2::jsonb, $3::jsonb, $4) AS msg_id",
                &[
                    Value::Str(queue.to_string()),
                    Value::Str(payload_json),
                    Value::Str(headers_json),
                    Value::Int(delay.as_secs() as i32),
                ],
            )
            .await?;
        result
            .rows()
            .first()
            .ok_or_else(|| Error::Database("send returned no row".to_string()))?
            .as_long("msg_id")
    }

    /// Sends every message in `msgs`, returning their new `msg_id`s in order.
    #[instrument(skip(self, msgs, headers))]
    pub async fn send_batch(
        &self,
        queue: &str,
        msgs: &[String],
        headers: &HashMap<String, String>,
        delay: Duration,
    ) -> Result<Vec<i64>, Error> {
        let mut ids = Vec::with_capacity(msgs.len());
        for msg in msgs {
            ids.push(self.send(queue, msg, headers, delay).await?);
        }
        Ok(ids)
    }

    /// Removes and returns up to `qty` messages immediately.
    #[instrument(skip(self))]
    pub async fn pop(&self, queue: &str, qty: i32) -> Result<Vec<Message>, Error> {
        let result = self
            .connection
            .fetch_all("SELECT * FROM pgmq.pop($1, $2)", &[Value::Str(queue.to_string()), Value::Int(qty)])
            .await?;
        result.rows().iter().map(row_to_message).collect()
    }

    /// Reads up to `qty` messages, extending their visibility timeout by
    /// `vt` and incrementing their `read_ct`.
    #[instrument(skip(self))]
    pub async fn read(&self, queue: &str, qty: i32, vt: Duration) -> Result<Vec<Message>, Error> {
        let result = self
            .connection
            .fetch_all(
                "SELECT * FROM pgmq.read($1, $2, $3)",
                &[Value::Str(queue.to_string()), Value::Int(vt.as_secs() as i32), Value::Int(qty)],
            )
            .await?;
        result.rows().iter().map(row_to_message).collect()
    }

    /// Moves `ids` to the archive table. Fails unless every id was present.
    #[instrument(skip(self))]
    pub async fn archive(&self, queue: &str, ids: &[i64]) -> Result<(), Error> {
        self.bulk_id_op("pgmq.archive", queue, ids).await
    }

    /// Permanently deletes `ids`. Fails unless every id was present.
    #[instrument(skip(self))]
    pub async fn delete(&self, queue: &str, ids: &[i64]) -> Result<(), Error> {
        self.bulk_id_op("pgmq.delete", queue, ids).await
    }

    async fn bulk_id_op(&self, func: &str, queue: &str, ids: &[i64]) -> Result<(), Error> {
        if ids.is_empty() {
            return Ok(());
        }
        let id_values: Vec<Value> = ids.iter().map(|id| Value::BigInt(*id)).collect();
        let result = self
            .connection
            .fetch_all(
                &format!("SELECT {func}($1, $2) AS affected"),
                &[Value::Str(queue.to_string()), Value::Array(id_values, Default::default())],
            )
            .await?;
        let affected = result
            .rows()
            .iter()
            .filter_map(|row| row.as_bool_opt("affected").ok().flatten())
            .filter(|v| *v)
            .count();
        if affected != ids.len() {
            return Err(Error::Database(format!(
                "{func} affected {affected} of {} requested ids",
                ids.len()
            )));
        }
        Ok(())
    }

    /// Updates a message's visibility timeout; returns its `msg_id`.
    #[instrument(skip(self))]
    pub async fn set_vt(&self, queue: &str, id: i64, vt: Duration) -> Result<i64, Error> {
        let result = self
            .connection
            .fetch_all(
                "SELECT msg_id FROM pgmq.set_vt($1, $2, $3)",
                &[Value::Str(queue.to_string()), Value::BigInt(id), Value::Int(vt.as_secs() as i32)],
            )
            .await?;
        result
            .rows()
            .first()
            .ok_or_else(|| Error::Database(format!("message {id} not found")))?
            .as_long("msg_id")
    }

    /// Returns statistics for `queue`, or every queue when `queue` is `None`.
    #[instrument(skip(self))]
    pub async fn metrics(&self, queue: Option<&str>) -> Result<Vec<QueueMetrics>, Error> {
        let result = match queue {
            Some(queue) => {
                self.connection
                    .fetch_all("SELECT * FROM pgmq.metrics($1)", &[Value::Str(queue.to_string())])
                    .await?
            }
            None => self.connection.fetch_all("SELECT * FROM pgmq.metrics_all()", &[]).await?,
        };
        result
            .rows()
            .iter()
            .map(|row| {
                Ok(QueueMetrics {
                    queue_name: row.as_str("queue_name")?.to_string(),
                    queue_length: row.as_long("queue_length")?,
                    newest_msg_age_sec: row.as_long_opt("newest_msg_age_sec")?,
                    oldest_msg_age_sec: row.as_long_opt("oldest_msg_age_sec")?,
                    total_messages: row.as_long("total_messages")?,
                })
            })
            .collect()
    }

    /// `ack = delete`.
    pub async fn ack(&self, queue: &str, msg_id: i64) -> Result<(), Error> {
        self.delete(queue, &[msg_id]).await
    }

    /// `nack(vt) = set_vt(id, vt)`; `vt = 0` makes the message immediately visible.
    pub async fn nack(&self, queue: &str, msg_id: i64, vt: Duration) -> Result<(), Error> {
        self.set_vt(queue, msg_id, vt).await.map(|_| ())
    }
}

fn row_to_message(row: &crate::result_set::Row) -> Result<Message, Error> {
    let headers_json = row.as_str_opt("headers")?.unwrap_or("{}");
    let headers: HashMap<String, String> = serde_json::from_str(headers_json).unwrap_or_else(|e| {
        warn!(error = %e, "failed to decode message headers, treating as empty");
        HashMap::new()
    });

    let message_json = row.as_str("message")?;
    // `send` always stores the payload as a JSON-encoded string (see its
    // doc comment), so unquoting it here is the exact inverse and recovers
    // the original bytes rather than jsonb's own reformatted text.
    let payload: String = serde_json::from_str(message_json).map_err(|e| Error::Database(format!(
        "failed to decode message payload: {e}"
    )))?;

    Ok(Message {
        msg_id: row.as_long("msg_id")?,
        read_ct: row.as_long("read_ct")? as i32,
        enqueued_at: row.as_instant("enqueued_at")?,
        // absent on pgmq < 1.5; treated as optional
        last_read_at: row.as_instant_opt("last_read_at").unwrap_or(None),
        vt: row.as_instant("vt")?,
        payload,
        headers,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_queue_options_default_to_logged_without_notify() {
        let options = CreateQueueOptions::default();
        assert!(!options.unlogged);
        assert!(!options.enable_notify_insert);
    }

    #[test]
    fn client_options_default_to_verify_without_auto_install() {
        let options = PgmqClientOptions::default();
        assert!(options.verify_installation);
        assert!(!options.auto_install);
    }

    fn message_row(message_json: &str) -> crate::result_set::ResultSet {
        use crate::result_set::Schema;
        let now = Utc::now();
        let schema = Schema::new(["msg_id", "read_ct", "enqueued_at", "vt", "message", "headers"]);
        crate::result_set::ResultSet::new(
            schema,
            vec![vec![
                Value::BigInt(1),
                Value::Int(1),
                Value::Instant(now),
                Value::Instant(now),
                Value::Str(message_json.to_string()),
                Value::Str("{}".to_string()),
            ]],
            1,
        )
    }

    #[test]
    fn plain_string_payload_round_trips_byte_identical() {
        // `"m"` is what `send` would have stored after JSON-encoding the raw
        // payload `m`; `pgmq.send` would reject an unquoted `m` outright.
        let result = message_row("\"m\"");
        let message = row_to_message(&result.rows()[0]).unwrap();
        assert_eq!(message.payload, "m");
    }

    #[test]
    fn payload_containing_quotes_and_escapes_round_trips() {
        let original = "needs \"quoting\" and a backslash \\ too";
        let encoded = serde_json::to_string(original).unwrap();
        let result = message_row(&encoded);
        let message = row_to_message(&result.rows()[0]).unwrap();
        assert_eq!(message.payload, original);
    }
}
