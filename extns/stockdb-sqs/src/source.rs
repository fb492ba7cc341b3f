use std::time::Duration;

use aws_sdk_sqs::Client;
use aws_sdk_sqs::types::MessageSystemAttributeName;
use bytes::Bytes;
use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;

use crate::client::create_sqs_client;
use crate::{Error, Result};

/// SQS caps a single receive at 10 messages.
pub const SQS_MAX_BATCH_SIZE: usize = 10;
/// Longest long-poll wait SQS accepts.
const SQS_MAX_WAIT_TIME: Duration = Duration::from_secs(20);

#[derive(Debug, Clone, PartialEq)]
pub struct SqsSourceConfig {
    pub region: String,
    pub queue_url: String,
    pub endpoint_url: Option<String>,
    /// long-poll wait of each receive request
    pub wait_time: Duration,
}

impl SqsSourceConfig {
    pub fn validate(&self) -> Result<()> {
        if self.region.is_empty() {
            return Err(Error::InvalidConfig("region is required".to_string()));
        }
        if self.queue_url.is_empty() {
            return Err(Error::InvalidConfig("queue url is required".to_string()));
        }
        if self.wait_time > SQS_MAX_WAIT_TIME {
            return Err(Error::InvalidConfig(format!(
                "wait time must be at most {}s, got {}s",
                SQS_MAX_WAIT_TIME.as_secs(),
                self.wait_time.as_secs()
            )));
        }
        Ok(())
    }
}

enum SqsActorMessage {
    Receive {
        respond_to: oneshot::Sender<Result<Vec<SqsMessage>>>,
        count: i32,
    },
    Delete {
        respond_to: oneshot::Sender<Result<()>>,
        receipt_handle: String,
    },
}

#[derive(Debug, Clone)]
pub struct SqsMessage {
    pub id: String,
    pub payload: Bytes,
    /// opaque token required to delete the message
    pub receipt_handle: String,
    pub receive_count: u32,
}

impl From<&aws_sdk_sqs::types::Message> for SqsMessage {
    fn from(msg: &aws_sdk_sqs::types::Message) -> Self {
        let system_attr = |name: &MessageSystemAttributeName| {
            msg.attributes.as_ref().and_then(|attrs| attrs.get(name))
        };
        let receive_count = system_attr(&MessageSystemAttributeName::ApproximateReceiveCount)
            .and_then(|count| count.parse::<u32>().ok())
            .unwrap_or(1);

        SqsMessage {
            id: msg.message_id.clone().unwrap_or_default(),
            payload: Bytes::from(msg.body.clone().unwrap_or_default()),
            receipt_handle: msg.receipt_handle.clone().unwrap_or_default(),
            receive_count,
        }
    }
}

struct SqsActor {
    handler_rx: mpsc::Receiver<SqsActorMessage>,
    client: Client,
    queue_url: String,
    wait_time: Duration,
}

impl SqsActor {
    fn start(handler_rx: mpsc::Receiver<SqsActorMessage>, client: Client, config: SqsSourceConfig) {
        tokio::spawn(async move {
            let mut actor = SqsActor {
                handler_rx,
                client,
                queue_url: config.queue_url,
                wait_time: config.wait_time,
            };
            actor.run().await;
        });
    }

    async fn run(&mut self) {
        while let Some(msg) = self.handler_rx.recv().await {
            self.handle_message(msg).await;
        }
    }

    async fn handle_message(&mut self, msg: SqsActorMessage) {
        match msg {
            SqsActorMessage::Receive { respond_to, count } => {
                let messages = self.get_messages(count).await;
                let _ = respond_to.send(messages);
            }
            SqsActorMessage::Delete {
                respond_to,
                receipt_handle,
            } => {
                let status = self.delete_message(receipt_handle).await;
                let _ = respond_to.send(status);
            }
        }
    }

    async fn get_messages(&mut self, count: i32) -> Result<Vec<SqsMessage>> {
        let sdk_response = self
            .client
            .receive_message()
            .queue_url(self.queue_url.clone())
            .max_number_of_messages(count)
            .message_system_attribute_names(MessageSystemAttributeName::ApproximateReceiveCount)
            .wait_time_seconds(self.wait_time.as_secs() as i32)
            .send()
            .await;

        let output = match sdk_response {
            Ok(output) => output,
            Err(err) => {
                tracing::error!(?err, queue_url = self.queue_url, "Failed to receive messages from SQS");
                return Err(Error::Sqs(err.into()));
            }
        };

        Ok(output
            .messages
            .unwrap_or_default()
            .iter()
            .map(SqsMessage::from)
            .collect())
    }

    async fn delete_message(&mut self, receipt_handle: String) -> Result<()> {
        if let Err(err) = self
            .client
            .delete_message()
            .queue_url(self.queue_url.clone())
            .receipt_handle(receipt_handle)
            .send()
            .await
        {
            tracing::error!(?err, queue_url = self.queue_url, "Error while deleting message from SQS");
            return Err(Error::Sqs(err.into()));
        }
        Ok(())
    }
}

/// Handle to the SQS actor.
#[derive(Clone)]
pub struct SqsSource {
    batch_size: usize,
    actor_tx: mpsc::Sender<SqsActorMessage>,
}

impl SqsSource {
    /// Starts the actor. A pre-built `client` can be passed in (tests use a replay client);
    /// otherwise one is created from the configuration.
    pub async fn new(
        config: SqsSourceConfig,
        batch_size: usize,
        client: Option<Client>,
    ) -> Result<Self> {
        config.validate()?;
        if batch_size == 0 || batch_size > SQS_MAX_BATCH_SIZE {
            return Err(Error::InvalidConfig(format!(
                "batch size must be between 1 and {SQS_MAX_BATCH_SIZE}, got {batch_size}"
            )));
        }

        let client = match client {
            Some(client) => client,
            None => create_sqs_client(&config).await?,
        };

        let (tx, rx) = mpsc::channel(10);
        SqsActor::start(rx, client, config);
        Ok(Self {
            batch_size,
            actor_tx: tx,
        })
    }

    pub async fn read_messages(&self) -> Result<Vec<SqsMessage>> {
        let start = Instant::now();
        let (tx, rx) = oneshot::channel();
        let msg = SqsActorMessage::Receive {
            respond_to: tx,
            count: self.batch_size as i32,
        };
        let _ = self.actor_tx.send(msg).await;
        let messages = rx.await.map_err(Error::ActorTaskTerminated)??;
        tracing::debug!(
            count = messages.len(),
            requested_count = self.batch_size,
            time_taken_ms = start.elapsed().as_millis(),
            "Got messages from sqs"
        );
        Ok(messages)
    }

    /// Deletes a message by its receipt handle. Deleting twice is harmless for SQS.
    pub async fn delete_message(&self, receipt_handle: String) -> Result<()> {
        let (tx, rx) = oneshot::channel();
        let msg = SqsActorMessage::Delete {
            respond_to: tx,
            receipt_handle,
        };
        let _ = self.actor_tx.send(msg).await;
        rx.await.map_err(Error::ActorTaskTerminated)?
    }
}
