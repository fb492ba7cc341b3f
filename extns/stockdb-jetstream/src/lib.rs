//! Durable JetStream consumer with explicit, one-at-a-time acknowledgement.
pub mod consumer;

pub use consumer::{JetstreamConsumer, JetstreamMessage};

pub type Result<T> = core::result::Result<T, Error>;

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("Connecting to NATS {server} - {error}")]
    Connection { server: String, error: String },

    #[error("Jetstream - {0}")]
    Jetstream(String),

    #[error("Acknowledging message {sequence} - {error}")]
    Ack { sequence: u64, error: String },

    #[error("{0}")]
    Other(String),
}

/// Represents the authentication method used to connect to NATS.
#[derive(Clone, PartialEq)]
pub enum NatsAuth {
    Basic { username: String, password: String },
    Token(String),
}

impl std::fmt::Debug for NatsAuth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NatsAuth::Basic { username, .. } => write!(f, "Basic({username}:****)"),
            NatsAuth::Token(_) => write!(f, "Token(****)"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct JetstreamConfig {
    /// NATS server address, `host:port`
    pub addr: String,
    pub auth: Option<NatsAuth>,
    /// stream holding the queue; created (file backed) when missing
    pub stream: String,
    /// subject the producers publish to
    pub subject: String,
    /// durable consumer name
    pub consumer: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_auth_debug_hides_secrets() {
        let basic = NatsAuth::Basic {
            username: "writer".to_string(),
            password: "hunter2".to_string(),
        };
        assert_eq!(format!("{basic:?}"), "Basic(writer:****)");

        let token = NatsAuth::Token("s3cr3t-t0k3n".to_string());
        assert!(!format!("{token:?}").contains("s3cr3t"));
    }

    #[test]
    fn test_error_messages() {
        let err = Error::Ack {
            sequence: 7,
            error: "timed out".to_string(),
        };
        assert_eq!(err.to_string(), "Acknowledging message 7 - timed out");
    }
}
