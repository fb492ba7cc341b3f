use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug, Clone)]
pub enum Error {
    #[error("Config Error - {0}")]
    Config(String),

    #[error("Source Error - {0}")]
    Source(String),

    #[error("Sink Error - {0}")]
    Sink(String),

    #[error("Record Error - {0}")]
    Record(String),

    #[error("Write failed after {attempts} attempts - {last_error}")]
    WriteExhausted { attempts: u16, last_error: String },

    #[error("OneShot Receiver Error - {0}")]
    ActorPatternRecv(String),
}

impl From<stockdb_sqs::Error> for Error {
    fn from(value: stockdb_sqs::Error) -> Self {
        match value {
            stockdb_sqs::Error::ActorTaskTerminated(_) => Error::ActorPatternRecv(value.to_string()),
            stockdb_sqs::Error::InvalidConfig(e) => Error::Config(format!("SQS: {e}")),
            stockdb_sqs::Error::Sqs(_) | stockdb_sqs::Error::Other(_) => {
                Error::Source(value.to_string())
            }
        }
    }
}

impl From<stockdb_jetstream::Error> for Error {
    fn from(value: stockdb_jetstream::Error) -> Self {
        Error::Source(format!("Jetstream: {value}"))
    }
}

impl From<stockdb_influx::Error> for Error {
    fn from(value: stockdb_influx::Error) -> Self {
        match value {
            stockdb_influx::Error::InvalidConfig(e) => Error::Config(format!("InfluxDB: {e}")),
            _ => Error::Sink(value.to_string()),
        }
    }
}
