//! The PgMQ client and consumer.

pub mod client;
pub mod consumer;
