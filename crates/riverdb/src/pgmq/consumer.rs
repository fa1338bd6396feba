//! The PgMQ consumer: an adaptive long-running pull loop with
//! NOTIFY-driven wake-up, bounded prefetch, and visibility-timeout-aware
//! retry.

use crate::connection::Connection;
use crate::pgmq::client::{Message, PgmqClient};
use riverdb_common::Error;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, instrument, warn};

type OnMessage = Arc<dyn Fn(Message) -> std::pin::Pin<Box<dyn std::future::Future<Output = Result<(), Error>> + Send>> + Send + Sync>;
type OnFailCallback = Arc<dyn Fn(&Error) + Send + Sync>;

/// Configuration for a [`Consumer`], validated on construction.
pub struct ConsumerOptions {
    pub queue: String,
    pub prefetch: usize,
    pub vt: Duration,
    pub auto_start: bool,
    pub enable_notify_insert: bool,
    pub queue_min_pull_delay: Duration,
    pub queue_max_pull_delay: Duration,
    pub message_retry_delay_step: Duration,
    pub message_max_retry_delay: Duration,
    pub on_message: OnMessage,
    pub on_fail_to_read: Option<OnFailCallback>,
    pub on_fail_to_ack: Option<OnFailCallback>,
    pub on_fail_to_nack: Option<OnFailCallback>,
    /// A connection dedicated to LISTEN delivery, required when
    /// `enable_notify_insert` is set. It is not used for anything else —
    /// `recv_notification` holds it for the life of the notify task.
    pub listener_connection: Option<Connection>,
}

impl ConsumerOptions {
    fn validate(&self) -> Result<(), Error> {
        if self.prefetch == 0 {
            return Err(Error::Database("prefetch must be > 0".to_string()));
        }
        if self.vt < Duration::from_secs(1) {
            return Err(Error::Database("vt must be >= 1s".to_string()));
        }
        if self.queue_min_pull_delay >= self.queue_max_pull_delay {
            return Err(Error::Database(
                "queue_min_pull_delay must be < queue_max_pull_delay".to_string(),
            ));
        }
        if self.message_retry_delay_step >= self.message_max_retry_delay {
            return Err(Error::Database(
                "message_retry_delay_step must be < message_max_retry_delay".to_string(),
            ));
        }
        if self.enable_notify_insert && self.listener_connection.is_none() {
            return Err(Error::Database(
                "enable_notify_insert requires a listener_connection".to_string(),
            ));
        }
        Ok(())
    }

    fn vt_bias(&self) -> Duration {
        self.vt * 2
    }

    fn listen_channel(&self) -> String {
        format!("pgmq.q_{}.INSERT", self.queue)
    }
}

struct SharedState {
    fetch_delay: std::sync::Mutex<Duration>,
    wake_fetch: Notify,
}

/// An adaptive consumer pulling messages from one `pgmq` queue.
pub struct Consumer {
    client: Arc<PgmqClient>,
    options: Arc<ConsumerOptions>,
    shared: Arc<SharedState>,
    running: Arc<AtomicBool>,
    tasks: Vec<JoinHandle<()>>,
}

impl Consumer {
    pub fn new(client: PgmqClient, options: ConsumerOptions) -> Result<Self, Error> {
        options.validate()?;
        let auto_start = options.auto_start;
        let mut consumer = Self {
            client: Arc::new(client),
            options: Arc::new(options),
            shared: Arc::new(SharedState {
                fetch_delay: std::sync::Mutex::new(Duration::ZERO),
                wake_fetch: Notify::new(),
            }),
            running: Arc::new(AtomicBool::new(false)),
            tasks: Vec::new(),
        };
        if auto_start {
            consumer.start();
        }
        Ok(consumer)
    }

    /// Spawns the fetch, consume, and (if enabled) notify tasks. A no-op if
    /// already running.
    #[instrument(skip(self))]
    pub fn start(&mut self) {
        if self.running.swap(true, Ordering::SeqCst) {
            return;
        }

        let (tx, rx) = mpsc::channel::<Message>(self.options.prefetch);

        let fetch_handle = tokio::spawn(fetch_loop(
            self.client.clone(),
            self.options.clone(),
            self.shared.clone(),
            self.running.clone(),
            tx,
        ));
        let consume_handle = tokio::spawn(consume_loop(
            self.client.clone(),
            self.options.clone(),
            self.running.clone(),
            rx,
        ));
        self.tasks.push(fetch_handle);
        self.tasks.push(consume_handle);

        if self.options.enable_notify_insert {
            let notify_handle = tokio::spawn(notify_loop(
                self.options.clone(),
                self.shared.clone(),
                self.running.clone(),
            ));
            self.tasks.push(notify_handle);
        }
    }

    /// Signals every task to stop, closes the channel to let the consume
    /// task drain, and waits briefly for each task to observe cancellation.
    /// The consumer may be `start`ed again afterward.
    #[instrument(skip(self))]
    pub async fn stop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        self.shared.wake_fetch.notify_waiters();

        for task in self.tasks.drain(..) {
            let _ = tokio::time::timeout(Duration::from_secs(5), task).await;
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }
}

impl Drop for Consumer {
    fn drop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        self.shared.wake_fetch.notify_waiters();
        for task in self.tasks.drain(..) {
            task.abort();
        }
    }
}

async fn fetch_loop(
    client: Arc<PgmqClient>,
    options: Arc<ConsumerOptions>,
    shared: Arc<SharedState>,
    running: Arc<AtomicBool>,
    tx: mpsc::Sender<Message>,
) {
    while running.load(Ordering::SeqCst) {
        let read_result = client.read(&options.queue, options.prefetch as i32, options.vt_bias()).await;

        let messages = match read_result {
            Ok(messages) => messages,
            Err(err) => {
                if let Some(callback) = &options.on_fail_to_read {
                    callback(&err);
                }
                warn!(error = %err, "pgmq read failed, treating as empty");
                Vec::new()
            }
        };

        if messages.is_empty() {
            let delay = {
                let mut current = shared.fetch_delay.lock().unwrap();
                let next = if *current == Duration::ZERO {
                    options.queue_min_pull_delay
                } else {
                    std::cmp::min(*current * 2, options.queue_max_pull_delay)
                };
                *current = next;
                next
            };

            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = shared.wake_fetch.notified() => {}
            }
            continue;
        }

        *shared.fetch_delay.lock().unwrap() = Duration::ZERO;

        for message in messages {
            if tx.send(message).await.is_err() {
                return;
            }
            if !running.load(Ordering::SeqCst) {
                return;
            }
        }
    }
}

async fn consume_loop(
    client: Arc<PgmqClient>,
    options: Arc<ConsumerOptions>,
    running: Arc<AtomicBool>,
    mut rx: mpsc::Receiver<Message>,
) {
    while let Some(message) = rx.recv().await {
        if !running.load(Ordering::SeqCst) {
            return;
        }

        let msg_id = message.msg_id;
        let read_ct = message.read_ct;
        let outcome = tokio::time::timeout(options.vt, (options.on_message)(message)).await;

        match outcome {
            Ok(Ok(())) => {
                if let Err(err) = client.ack(&options.queue, msg_id).await {
                    if let Some(callback) = &options.on_fail_to_ack {
                        callback(&err);
                    }
                    warn!(error = %err, msg_id, "failed to ack message");
                }
            }
            Ok(Err(_)) | Err(_) => {
                let delay = std::cmp::min(
                    options.message_retry_delay_step * read_ct.max(1) as u32,
                    options.message_max_retry_delay,
                );
                if let Err(err) = client.nack(&options.queue, msg_id, delay).await {
                    if let Some(callback) = &options.on_fail_to_nack {
                        callback(&err);
                    }
                    warn!(error = %err, msg_id, "failed to nack message");
                }
            }
        }
    }
}

async fn notify_loop(options: Arc<ConsumerOptions>, shared: Arc<SharedState>, running: Arc<AtomicBool>) {
    let Some(connection) = options.listener_connection.as_ref() else { return };
    let channel = options.listen_channel();

    if let Err(err) = connection.listen(&channel).await {
        warn!(error = %err, channel = %channel, "failed to subscribe to pgmq insert notifications");
        return;
    }
    debug!(channel = %channel, "pgmq notify listener started");

    while running.load(Ordering::SeqCst) {
        match connection.recv_notification().await {
            Ok(Some(_)) => {
                *shared.fetch_delay.lock().unwrap() = Duration::ZERO;
                shared.wake_fetch.notify_waiters();
            }
            Ok(None) => {
                // backend has no LISTEN facility at all; nothing more to do
                return;
            }
            Err(err) => {
                warn!(error = %err, "pgmq notification delivery failed");
                tokio::time::sleep(Duration::from_millis(500)).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_options(on_message: OnMessage) -> ConsumerOptions {
        ConsumerOptions {
            queue: "jobs".to_string(),
            prefetch: 1,
            vt: Duration::from_secs(2),
            auto_start: false,
            enable_notify_insert: false,
            queue_min_pull_delay: Duration::from_millis(100),
            queue_max_pull_delay: Duration::from_secs(1),
            message_retry_delay_step: Duration::from_millis(100),
            message_max_retry_delay: Duration::from_secs(1),
            on_message,
            on_fail_to_read: None,
            on_fail_to_ack: None,
            on_fail_to_nack: None,
            listener_connection: None,
        }
    }

    fn noop_on_message() -> OnMessage {
        Arc::new(|_msg| Box::pin(async { Ok(()) }))
    }

    #[test]
    fn listen_channel_follows_naming_convention() {
        let options = base_options(noop_on_message());
        assert_eq!(options.listen_channel(), "pgmq.q_jobs.INSERT");
    }

    #[test]
    fn vt_bias_is_double_vt() {
        let options = base_options(noop_on_message());
        assert_eq!(options.vt_bias(), Duration::from_secs(4));
    }

    #[test]
    fn zero_prefetch_fails_validation() {
        let mut options = base_options(noop_on_message());
        options.prefetch = 0;
        assert!(options.validate().is_err());
    }

    #[test]
    fn vt_below_one_second_fails_validation() {
        let mut options = base_options(noop_on_message());
        options.vt = Duration::from_millis(500);
        assert!(options.validate().is_err());
    }

    #[test]
    fn pull_delay_bounds_must_be_ordered() {
        let mut options = base_options(noop_on_message());
        options.queue_min_pull_delay = Duration::from_secs(2);
        options.queue_max_pull_delay = Duration::from_secs(1);
        assert!(options.validate().is_err());
    }

    #[test]
    fn retry_delay_bounds_must_be_ordered() {
        let mut options = base_options(noop_on_message());
        options.message_retry_delay_step = Duration::from_secs(2);
        options.message_max_retry_delay = Duration::from_secs(1);
        assert!(options.validate().is_err());
    }

    #[test]
    fn valid_options_pass_validation() {
        let options = base_options(noop_on_message());
        assert!(options.validate().is_ok());
    }
}
