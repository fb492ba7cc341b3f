//! Polling access to an Amazon SQS queue using an actor-based architecture.
//!
//! The actor owns the SDK client and serves receive and delete requests one at a time, so the
//! caller only holds a cheap, cloneable handle ([`source::SqsSource`]).
use tokio::sync::oneshot;

pub mod client;
pub mod source;

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("Failed with SQS error - {0}")]
    Sqs(#[from] aws_sdk_sqs::Error),

    #[error("Failed to receive message from channel. Actor task is terminated: {0:?}")]
    ActorTaskTerminated(oneshot::error::RecvError),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("{0}")]
    Other(String),
}

pub type Result<T> = core::result::Result<T, Error>;

impl From<String> for Error {
    fn from(value: String) -> Self {
        Error::Other(value)
    }
}
