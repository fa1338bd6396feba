//! Shared error types for riverdb.
//!
//! This crate provides the stable error taxonomy consumed by every other
//! riverdb crate, plus the conversions from the optional `sqlx` driver
//! backend into that taxonomy.

pub mod error;

pub use error::{Error, Result};
