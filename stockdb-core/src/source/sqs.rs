use stockdb_sqs::source::SqsSource;

use crate::Result;
use crate::source::{PullQueue, RawMessage};

impl PullQueue for SqsSource {
    async fn receive(&mut self) -> Result<Vec<RawMessage<String>>> {
        let messages = self.read_messages().await?;
        Ok(messages
            .into_iter()
            .map(|message| {
                if message.receive_count > 1 {
                    tracing::debug!(
                        id = message.id,
                        receive_count = message.receive_count,
                        "Message is being redelivered"
                    );
                }
                RawMessage {
                    id: message.id,
                    payload: message.payload,
                    receipt: message.receipt_handle,
                }
            })
            .collect())
    }

    async fn delete(&mut self, receipt: String) -> Result<()> {
        self.delete_message(receipt).await.map_err(Into::into)
    }
}
