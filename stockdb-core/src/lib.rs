//! Moves analysis records from a message queue into InfluxDB.
//!
//! A [`source`] consumer (JetStream push or SQS pull) decodes every message into a batch of
//! records, the [`sink::SinkWriter`] converts them into points and writes them with bounded retry,
//! and only a successful write acknowledges the message.

pub use crate::error::{Error, Result};

mod error;

pub mod config;
pub mod message;
pub mod point;
pub mod retry;
pub mod sink;
pub mod source;

mod pipeline;
pub use crate::pipeline::{run_pipeline, shutdown_signal};
