use std::collections::HashMap;

use stockdb_jetstream::{JetstreamConfig, JetstreamConsumer, JetstreamMessage};
use tracing::warn;

use crate::source::{PushQueue, RawMessage};
use crate::{Error, Result};

/// Hands out JetStream messages keyed by their stream sequence and keeps them until they are
/// settled.
pub(crate) struct JetstreamQueue {
    consumer: Option<JetstreamConsumer>,
    in_flight: HashMap<u64, JetstreamMessage>,
}

impl JetstreamQueue {
    pub(crate) async fn connect(config: JetstreamConfig) -> Result<Self> {
        let consumer = JetstreamConsumer::connect(config).await?;
        Ok(Self {
            consumer: Some(consumer),
            in_flight: HashMap::new(),
        })
    }

    fn take(&mut self, tag: u64) -> Result<JetstreamMessage> {
        self.in_flight
            .remove(&tag)
            .ok_or_else(|| Error::Source(format!("Unknown delivery tag {tag}")))
    }
}

impl PushQueue for JetstreamQueue {
    async fn next(&mut self) -> Option<Result<RawMessage<u64>>> {
        let consumer = self.consumer.as_mut()?;
        let message = match consumer.next_message().await? {
            Ok(message) => message,
            Err(e) => return Some(Err(e.into())),
        };
        if message.delivered > 1 {
            warn!(
                sequence = message.stream_sequence,
                delivered = message.delivered,
                "Message is being redelivered"
            );
        }

        let tag = message.stream_sequence;
        let raw = RawMessage {
            id: format!("{}:{tag}", message.subject),
            payload: message.payload.clone(),
            receipt: tag,
        };
        self.in_flight.insert(tag, message);
        Some(Ok(raw))
    }

    async fn ack(&mut self, tag: u64) -> Result<()> {
        self.take(tag)?.ack().await.map_err(Into::into)
    }

    async fn reject(&mut self, tag: u64) -> Result<()> {
        self.take(tag)?.term().await.map_err(Into::into)
    }

    async fn close(&mut self) -> Result<()> {
        self.in_flight.clear();
        match self.consumer.take() {
            Some(consumer) => consumer.close().await.map_err(Into::into),
            None => Ok(()),
        }
    }
}
