use std::time::Duration;

use async_nats::ConnectOptions;
use async_nats::jetstream::consumer::{AckPolicy, pull};
use async_nats::jetstream::stream::{self, StorageType};
use async_nats::jetstream::{self, AckKind};
use bytes::Bytes;
use tokio_stream::StreamExt;

use crate::{Error, JetstreamConfig, NatsAuth, Result};

/// Only one unacknowledged message is handed out at a time, so a failure can always be
/// attributed to exactly one message.
const MAX_ACK_PENDING: i64 = 1;

/// A message delivered by JetStream. It must be settled with [`JetstreamMessage::ack`] or
/// [`JetstreamMessage::term`].
#[derive(Debug)]
pub struct JetstreamMessage {
    pub payload: Bytes,
    pub subject: String,
    pub stream_sequence: u64,
    /// number of times the server delivered this message
    pub delivered: i64,
    inner: jetstream::Message,
}

impl TryFrom<jetstream::Message> for JetstreamMessage {
    type Error = Error;

    fn try_from(msg: jetstream::Message) -> Result<Self> {
        let info = msg.info().map_err(|e| {
            Error::Jetstream(format!("fetching message metadata from Jetstream: {e:?}"))
        })?;
        let (stream_sequence, delivered) = (info.stream_sequence, info.delivered);

        Ok(JetstreamMessage {
            payload: msg.message.payload.clone(),
            subject: msg.message.subject.to_string(),
            stream_sequence,
            delivered,
            inner: msg,
        })
    }
}

impl JetstreamMessage {
    /// Positive acknowledgement, the server removes the message from the consumer.
    pub async fn ack(&self) -> Result<()> {
        self.inner.ack().await.map_err(|e| Error::Ack {
            sequence: self.stream_sequence,
            error: e.to_string(),
        })
    }

    /// Negative acknowledgement without redelivery.
    pub async fn term(&self) -> Result<()> {
        self.inner
            .ack_with(AckKind::Term)
            .await
            .map_err(|e| Error::Ack {
                sequence: self.stream_sequence,
                error: e.to_string(),
            })
    }
}

/// Durable consumer bound to a single stream.
pub struct JetstreamConsumer {
    client: async_nats::Client,
    messages: pull::Stream,
    stream: String,
}

impl JetstreamConsumer {
    /// Connects to NATS, makes sure the (file backed) stream and the durable consumer exist and
    /// starts the message subscription.
    pub async fn connect(config: JetstreamConfig) -> Result<Self> {
        let mut conn_opts = ConnectOptions::new()
            .ping_interval(Duration::from_secs(3))
            .connection_timeout(Duration::from_secs(10));
        if let Some(auth) = config.auth {
            conn_opts = match auth {
                NatsAuth::Basic { username, password } => {
                    conn_opts.user_and_password(username, password)
                }
                NatsAuth::Token(token) => conn_opts.token(token),
            };
        }
        let client = async_nats::connect_with_options(&config.addr, conn_opts)
            .await
            .map_err(|err| Error::Connection {
                server: config.addr.to_string(),
                error: err.to_string(),
            })?;

        let js_ctx = jetstream::new(client.clone());
        let js_stream = js_ctx
            .get_or_create_stream(stream::Config {
                name: config.stream.clone(),
                subjects: vec![config.subject.clone()],
                storage: StorageType::File,
                ..Default::default()
            })
            .await
            .map_err(|err| {
                Error::Jetstream(format!("Declaring stream {}: {err:?}", config.stream))
            })?;

        let consumer: jetstream::consumer::PullConsumer = js_stream
            .get_or_create_consumer(
                &config.consumer,
                pull::Config {
                    durable_name: Some(config.consumer.clone()),
                    filter_subject: config.subject.clone(),
                    ack_policy: AckPolicy::Explicit,
                    max_ack_pending: MAX_ACK_PENDING,
                    ..Default::default()
                },
            )
            .await
            .map_err(|err| {
                Error::Jetstream(format!(
                    "Getting consumer {} from stream {}: {err:?}",
                    config.consumer, config.stream
                ))
            })?;

        let messages = consumer.messages().await.map_err(|err| {
            Error::Jetstream(format!("Subscribing to consumer {}: {err:?}", config.consumer))
        })?;

        tracing::info!(
            stream = config.stream,
            subject = config.subject,
            consumer = config.consumer,
            "Connected to Jetstream consumer"
        );

        Ok(Self {
            client,
            messages,
            stream: config.stream,
        })
    }

    /// Waits for the next message. `None` means the subscription ended.
    pub async fn next_message(&mut self) -> Option<Result<JetstreamMessage>> {
        let message = self.messages.next().await?;
        Some(
            message
                .map_err(|e| Error::Jetstream(format!("Getting next message from the stream: {e:?}")))
                .and_then(JetstreamMessage::try_from),
        )
    }

    /// Flushes pending acknowledgements and closes the connection.
    pub async fn close(self) -> Result<()> {
        let Self {
            client,
            messages,
            stream,
        } = self;
        drop(messages);
        client
            .flush()
            .await
            .map_err(|e| Error::Other(format!("Flushing NATS connection: {e}")))?;
        tracing::info!(stream, "Closed Jetstream consumer");
        Ok(())
    }
}

#[cfg(feature = "nats-tests")]
#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_consume_ack_and_term() {
        let stream_name = "stockdb_consumer_test";
        let subject = "stockdb_consumer_test.records";

        let client = async_nats::connect("localhost:4222").await.unwrap();
        let js = jetstream::new(client);
        let _ = js.delete_stream(stream_name).await;

        let config = JetstreamConfig {
            addr: "localhost:4222".to_string(),
            auth: None,
            stream: stream_name.to_string(),
            subject: subject.to_string(),
            consumer: "stockdb_test_consumer".to_string(),
        };
        let mut consumer = JetstreamConsumer::connect(config.clone()).await.unwrap();

        for i in 0..2 {
            js.publish(subject, format!("message {i}").into())
                .await
                .unwrap()
                .await
                .unwrap();
        }

        let first = consumer.next_message().await.unwrap().unwrap();
        assert_eq!(first.payload, Bytes::from("message 0"));
        assert_eq!(first.delivered, 1);
        first.ack().await.unwrap();

        let second = consumer.next_message().await.unwrap().unwrap();
        assert_eq!(second.payload, Bytes::from("message 1"));
        second.term().await.unwrap();
        consumer.close().await.unwrap();

        // nothing is redelivered to a fresh subscription on the same durable consumer
        let mut consumer = JetstreamConsumer::connect(config).await.unwrap();
        let next = tokio::time::timeout(Duration::from_millis(500), consumer.next_message()).await;
        assert!(next.is_err(), "terminated message must not be redelivered");

        js.delete_stream(stream_name).await.unwrap();
    }
}
