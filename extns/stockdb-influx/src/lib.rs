//! InfluxDB 2.x write path: line protocol encoding and a thin HTTP write client.
//!
//! ```text
//! Point --> line protocol --> POST /api/v2/write?org=..&bucket=..&precision=ns
//! ```
pub mod client;
pub mod line_protocol;

pub use client::{InfluxClient, InfluxConfig};
pub use line_protocol::{FieldValue, Point};

pub type Result<T> = core::result::Result<T, Error>;

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Sending write request to InfluxDB - {0}")]
    Request(#[from] reqwest::Error),

    #[error("InfluxDB rejected the write. status={status}, body={body}")]
    Rejected { status: u16, body: String },

    #[error("Invalid point: {0}")]
    InvalidPoint(String),
}

impl From<String> for Error {
    fn from(value: String) -> Self {
        Error::InvalidConfig(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_string_error_conversion() {
        let err: Error = "bad url".to_string().into();
        assert!(matches!(err, Error::InvalidConfig(_)));
        assert_eq!(err.to_string(), "Invalid configuration: bad url");
    }

    #[test]
    fn test_rejected_error_message() {
        let err = Error::Rejected {
            status: 401,
            body: "unauthorized access".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "InfluxDB rejected the write. status=401, body=unauthorized access"
        );
    }
}
