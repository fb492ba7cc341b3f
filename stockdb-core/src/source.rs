//! Queue consumers. Two delivery models are supported:
//!
//! - push: a broker hands out one message at a time over a long-lived subscription, every message
//!   is settled with an ack (success) or a terminate (failure, never redelivered).
//! - pull: the queue is polled for a batch, a message is deleted only after it was handled; what
//!   is left undeleted comes back after the visibility timeout.
//!
//! Both decode the payload into a [`Batch`] and pass it to a [`RecordHandler`].
use std::fmt;
use std::time::Duration;

use bytes::Bytes;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::message::{Batch, decode_batch};
use crate::{Error, Result};

/// Push queue on top of a JetStream durable consumer.
pub(crate) mod jetstream;

/// Pull queue on top of SQS.
pub(crate) mod sqs;

/// Receives the decoded batch of every message.
#[trait_variant::make(RecordHandler: Send)]
#[allow(dead_code)]
pub trait LocalRecordHandler {
    /// An error means the message was not processed and must not be acknowledged.
    async fn handle(&mut self, batch: Batch) -> Result<()>;
}

/// A message as received from a queue, `receipt` is what the queue needs to settle it.
#[derive(Debug, Clone, PartialEq)]
pub struct RawMessage<R> {
    pub id: String,
    pub payload: Bytes,
    pub receipt: R,
}

/// A broker that pushes messages, settled individually by delivery tag.
#[trait_variant::make(PushQueue: Send)]
#[allow(dead_code)]
pub trait LocalPushQueue {
    /// Waits for the next message. `None` means the subscription is gone.
    async fn next(&mut self) -> Option<Result<RawMessage<u64>>>;

    async fn ack(&mut self, tag: u64) -> Result<()>;

    /// Negative acknowledgement without redelivery.
    async fn reject(&mut self, tag: u64) -> Result<()>;

    async fn close(&mut self) -> Result<()>;
}

/// A queue that is polled in batches and settled by deleting with a receipt handle.
#[trait_variant::make(PullQueue: Send)]
#[allow(dead_code)]
pub trait LocalPullQueue {
    async fn receive(&mut self) -> Result<Vec<RawMessage<String>>>;

    async fn delete(&mut self, receipt: String) -> Result<()>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsumerState {
    Disconnected,
    Connected,
    Consuming,
    Stopping,
}

impl fmt::Display for ConsumerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = match self {
            ConsumerState::Disconnected => "disconnected",
            ConsumerState::Connected => "connected",
            ConsumerState::Consuming => "consuming",
            ConsumerState::Stopping => "stopping",
        };
        f.write_str(state)
    }
}

/// Consumes a [`PushQueue`] one message at a time.
pub struct PushConsumer<Q> {
    queue: Q,
    state: ConsumerState,
}

impl<Q: PushQueue> PushConsumer<Q> {
    /// Wraps an already connected queue.
    pub fn new(queue: Q) -> Self {
        Self {
            queue,
            state: ConsumerState::Connected,
        }
    }

    pub fn state(&self) -> ConsumerState {
        self.state
    }

    fn transition(&mut self, state: ConsumerState) {
        debug!(from = %self.state, to = %state, "Push consumer state change");
        self.state = state;
    }

    /// Consumes until cancelled (returns `Ok`) or until the subscription breaks (returns the
    /// error). A message that is being processed when the token is cancelled is settled first.
    pub async fn run<H: RecordHandler>(
        &mut self,
        handler: &mut H,
        cancel: CancellationToken,
    ) -> Result<()> {
        self.transition(ConsumerState::Consuming);
        let result = loop {
            let next = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    info!("Cancellation received, stopping push consumer");
                    break Ok(());
                }
                next = self.queue.next() => next,
            };

            let message = match next {
                Some(Ok(message)) => message,
                Some(Err(e)) => break Err(e),
                None => {
                    break Err(Error::Source(
                        "Message subscription ended unexpectedly".to_string(),
                    ));
                }
            };

            if let Err(e) = self.process(handler, message).await {
                break Err(e);
            }
        };

        self.transition(ConsumerState::Stopping);
        if let Err(e) = self.queue.close().await {
            warn!(?e, "Failed to close push consumer");
        }
        self.transition(ConsumerState::Disconnected);
        result
    }

    /// Handles one message and settles it. Only a failed ack or reject is returned as an error.
    async fn process<H: RecordHandler>(
        &mut self,
        handler: &mut H,
        message: RawMessage<u64>,
    ) -> Result<()> {
        let outcome = match decode_batch(&message.payload) {
            Ok(batch) => handler.handle(batch).await,
            Err(e) => Err(e),
        };

        match outcome {
            Ok(()) => {
                self.queue.ack(message.receipt).await?;
                debug!(id = message.id, "Acknowledged message");
            }
            Err(e) => {
                error!(
                    id = message.id,
                    payload = %String::from_utf8_lossy(&message.payload),
                    ?e,
                    "Failed to process message, terminating it"
                );
                self.queue.reject(message.receipt).await?;
            }
        }
        Ok(())
    }
}

/// Polls a [`PullQueue`] until cancelled.
pub struct PullConsumer<Q> {
    queue: Q,
    polling_interval: Duration,
}

impl<Q: PullQueue> PullConsumer<Q> {
    /// `polling_interval` is the pause after a failed poll.
    pub fn new(queue: Q, polling_interval: Duration) -> Self {
        Self {
            queue,
            polling_interval,
        }
    }

    /// Never gives up on its own, poll errors are logged and retried after the polling interval.
    pub async fn run<H: RecordHandler>(
        &mut self,
        handler: &mut H,
        cancel: CancellationToken,
    ) -> Result<()> {
        'poll: loop {
            let received = tokio::select! {
                biased;
                _ = cancel.cancelled() => break 'poll,
                received = self.queue.receive() => received,
            };

            let messages = match received {
                Ok(messages) => messages,
                Err(e) => {
                    error!(
                        ?e,
                        retry_in_secs = self.polling_interval.as_secs(),
                        "Polling the queue failed"
                    );
                    tokio::select! {
                        _ = cancel.cancelled() => break 'poll,
                        _ = sleep(self.polling_interval) => {}
                    }
                    continue;
                }
            };

            let total = messages.len();
            for (idx, message) in messages.into_iter().enumerate() {
                if cancel.is_cancelled() {
                    info!(
                        left = total - idx,
                        "Cancellation received, leaving the rest of the batch for redelivery"
                    );
                    break 'poll;
                }
                self.process(handler, message).await;
            }
        }

        info!("Stopped polling the queue");
        Ok(())
    }

    /// Handles one message and deletes it on success. Failures leave it in the queue.
    async fn process<H: RecordHandler>(&mut self, handler: &mut H, message: RawMessage<String>) {
        let outcome = match decode_batch(&message.payload) {
            Ok(batch) => handler.handle(batch).await,
            Err(e) => Err(e),
        };

        if let Err(e) = outcome {
            error!(
                id = message.id,
                payload = %String::from_utf8_lossy(&message.payload),
                ?e,
                "Failed to process message, leaving it for redelivery"
            );
            return;
        }

        match self.queue.delete(message.receipt).await {
            Ok(()) => info!(id = message.id, "Deleted message"),
            Err(e) => warn!(
                id = message.id,
                ?e,
                "Failed to delete processed message, it will be redelivered"
            ),
        }
    }
}
