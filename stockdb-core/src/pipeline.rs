//! Wires a queue consumer to the InfluxDB sink writer.
//!
//! ```text
//! queue -> decode (record | [record]) -> SinkWriter (build points, write with retry) -> ack/delete
//! ```
use stockdb_influx::InfluxClient;
use stockdb_sqs::source::SqsSource;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::Result;
use crate::config::{QueueSettings, Settings};
use crate::sink::SinkWriter;
use crate::source::jetstream::JetstreamQueue;
use crate::source::{PullConsumer, PushConsumer, RecordHandler};

/// The consumer variant, selected once from the configuration.
pub(crate) enum QueueConsumer {
    Push(PushConsumer<JetstreamQueue>),
    Pull(PullConsumer<SqsSource>),
}

impl QueueConsumer {
    pub(crate) async fn new(settings: &Settings) -> Result<Self> {
        match &settings.queue {
            QueueSettings::Jetstream(config) => {
                let queue = JetstreamQueue::connect(config.clone()).await?;
                Ok(QueueConsumer::Push(PushConsumer::new(queue)))
            }
            QueueSettings::Sqs { config, batch_size } => {
                let source = SqsSource::new(config.clone(), *batch_size, None).await?;
                Ok(QueueConsumer::Pull(PullConsumer::new(
                    source,
                    settings.polling_interval,
                )))
            }
        }
    }

    pub(crate) async fn run<H: RecordHandler>(
        &mut self,
        handler: &mut H,
        cancel: CancellationToken,
    ) -> Result<()> {
        match self {
            QueueConsumer::Push(consumer) => consumer.run(handler, cancel).await,
            QueueConsumer::Pull(consumer) => consumer.run(handler, cancel).await,
        }
    }
}

/// Runs the pipeline until `cancel` is cancelled (returns `Ok`) or an unrecovered error happens.
pub async fn run_pipeline(settings: &Settings, cancel: CancellationToken) -> Result<()> {
    info!(
        service = settings.service_name,
        environment = settings.environment,
        queue = settings.queue.kind(),
        polling_interval_secs = settings.polling_interval.as_secs(),
        "Starting pipeline"
    );
    info!(
        dlq = settings.dlq_name,
        "Dead-letter queue is configured, failed messages are not routed to it"
    );

    let client = InfluxClient::new(settings.sink.influx.clone())?;
    info!(
        url = %client.write_url(),
        measurement = settings.sink.measurement,
        write_mode = ?settings.sink.write_mode,
        "Created InfluxDB writer"
    );
    let mut sink = SinkWriter::new(client, &settings.sink);

    let mut consumer = QueueConsumer::new(settings).await?;
    consumer.run(&mut sink, cancel).await?;

    info!("Pipeline stopped");
    Ok(())
}

/// Resolves on SIGINT or SIGTERM.
pub async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
        info!("Received Ctrl+C signal");
    };

    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
        info!("Received terminate signal");
    };

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
