use std::slice;

use stockdb_influx::Point;
use tracing::{error, info, warn};

use crate::Result;
use crate::config::{SinkSettings, WriteMode};
use crate::error::Error;
use crate::message::Batch;
use crate::point::PointBuilder;
use crate::retry::RetryPolicy;
use crate::source::RecordHandler;

/// [InfluxDB] backed [`PointWriter`].
///
/// [InfluxDB]: https://docs.influxdata.com/influxdb/v2/
mod influx;

/// A store session that accepts points.
#[trait_variant::make(PointWriter: Send)]
#[allow(dead_code)]
pub trait LocalPointWriter {
    /// Writes the points in a single request. Any error is considered transient.
    async fn write(&self, points: &[Point]) -> Result<()>;
}

/// Converts batches of records into points and writes them with bounded retry.
///
/// The writer owns the store session, it is created once by the caller and used sequentially.
pub struct SinkWriter<W> {
    writer: W,
    builder: PointBuilder,
    retry: RetryPolicy,
    write_mode: WriteMode,
}

impl<W> SinkWriter<W>
where
    W: PointWriter + Sync,
{
    pub fn new(writer: W, settings: &SinkSettings) -> Self {
        Self {
            writer,
            builder: PointBuilder::new(settings.measurement.as_str()),
            retry: settings.retry,
            write_mode: settings.write_mode,
        }
    }

    /// Builds and writes the points of a batch. Rejected records are logged and skipped; an error
    /// is only returned once a write exhausted its retries.
    pub async fn write(&self, batch: &Batch) -> Result<()> {
        if batch.is_empty() {
            warn!("Received an empty batch, nothing to write");
            return Ok(());
        }
        info!(
            records = batch.len(),
            measurement = self.builder.measurement(),
            "Writing batch"
        );

        let mut points = Vec::with_capacity(batch.len());
        for record in batch {
            match self.builder.build(record) {
                Ok(point) => points.push(point),
                Err(rejected) => {
                    error!(
                        record = ?rejected.record,
                        reason = %rejected.reason,
                        "Skipping record that cannot be converted into a point"
                    );
                }
            }
        }

        if points.is_empty() {
            warn!(
                records = batch.len(),
                "No valid points in batch, nothing to write"
            );
            return Ok(());
        }

        let rejected = batch.len() - points.len();
        match self.write_mode {
            WriteMode::Batch => self.write_with_retry(&points).await?,
            WriteMode::Point => {
                for point in &points {
                    self.write_with_retry(slice::from_ref(point)).await?;
                }
            }
        }

        info!(
            points = points.len(),
            rejected,
            mode = ?self.write_mode,
            "Successfully wrote points"
        );
        Ok(())
    }

    async fn write_with_retry(&self, points: &[Point]) -> Result<()> {
        let writer = &self.writer;
        self.retry
            .retry(move |_attempt| writer.write(points))
            .await
            .map_err(|exhausted| {
                error!(
                    points = points.len(),
                    attempts = exhausted.attempts,
                    error = %exhausted.last_error,
                    "Failed to write points"
                );
                Error::WriteExhausted {
                    attempts: exhausted.attempts,
                    last_error: exhausted.last_error.to_string(),
                }
            })
    }
}

impl<W> RecordHandler for SinkWriter<W>
where
    W: PointWriter + Sync,
{
    async fn handle(&mut self, batch: Batch) -> Result<()> {
        self.write(&batch).await
    }
}
