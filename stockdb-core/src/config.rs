//! Environment driven configuration. Every knob has a named `ENV_*` variable and, where it is
//! optional, a `DEFAULT_*` value.
use std::collections::HashMap;
use std::fmt::Display;
use std::str::FromStr;
use std::time::Duration;

use stockdb_influx::InfluxConfig;
use stockdb_jetstream::{JetstreamConfig, NatsAuth};
use stockdb_sqs::source::{SQS_MAX_BATCH_SIZE, SqsSourceConfig};

use crate::retry::RetryPolicy;
use crate::{Error, Result};

const ENV_SERVICE_NAME: &str = "STOCKDB_SERVICE_NAME";
const ENV_ENVIRONMENT: &str = "ENVIRONMENT";
const ENV_QUEUE_TYPE: &str = "QUEUE_TYPE";
const ENV_NATS_HOST: &str = "NATS_HOST";
const ENV_NATS_PORT: &str = "NATS_PORT";
const ENV_NATS_USER: &str = "NATS_USER";
const ENV_NATS_PASSWORD: &str = "NATS_PASSWORD";
const ENV_NATS_STREAM: &str = "NATS_STREAM";
const ENV_QUEUE_NAME: &str = "QUEUE_NAME";
const ENV_DLQ_NAME: &str = "DLQ_NAME";
const ENV_SQS_QUEUE_URL: &str = "SQS_QUEUE_URL";
const ENV_SQS_REGION: &str = "SQS_REGION";
const ENV_SQS_ENDPOINT_URL: &str = "SQS_ENDPOINT_URL";
const ENV_BATCH_SIZE: &str = "BATCH_SIZE";
const ENV_POLLING_INTERVAL: &str = "POLLING_INTERVAL";
const ENV_INFLUXDB_URL: &str = "INFLUXDB_URL";
const ENV_INFLUXDB_TOKEN: &str = "INFLUXDB_TOKEN";
const ENV_INFLUXDB_TOKEN_FILE: &str = "INFLUXDB_TOKEN_FILE";
const ENV_INFLUXDB_ORG: &str = "INFLUXDB_ORG";
const ENV_INFLUXDB_BUCKET: &str = "INFLUXDB_BUCKET";
const ENV_INFLUXDB_MEASUREMENT: &str = "INFLUXDB_MEASUREMENT";
const ENV_INFLUXDB_WRITE_MODE: &str = "INFLUXDB_WRITE_MODE";
const ENV_SINK_MAX_RETRY_ATTEMPTS: &str = "SINK_MAX_RETRY_ATTEMPTS";
const ENV_SINK_RETRY_INTERVAL_SECS: &str = "SINK_RETRY_INTERVAL_SECS";
const ENV_MAX_RESTARTS: &str = "MAX_RESTARTS";
const ENV_RESTART_BACKOFF_SECS: &str = "RESTART_BACKOFF_SECS";

const DEFAULT_SERVICE_NAME: &str = "stock_db_influx";
const DEFAULT_ENVIRONMENT: &str = "dev";
const DEFAULT_NATS_HOST: &str = "localhost";
const DEFAULT_NATS_PORT: u16 = 4222;
const DEFAULT_NATS_STREAM: &str = "stock_db_influx";
const DEFAULT_QUEUE_NAME: &str = "stock_db_influx_queue";
const DEFAULT_DLQ_NAME: &str = "stock_db_influx_dlq";
const DEFAULT_SQS_REGION: &str = "us-east-1";
const DEFAULT_BATCH_SIZE: usize = 10;
const DEFAULT_POLLING_INTERVAL_SECS: u64 = 60;
const DEFAULT_INFLUXDB_URL: &str = "http://localhost:8086";
const DEFAULT_INFLUXDB_ORG: &str = "default_org";
const DEFAULT_INFLUXDB_BUCKET: &str = "poller_data";
const DEFAULT_INFLUXDB_MEASUREMENT: &str = "stock_prices";
const DEFAULT_SINK_MAX_RETRY_ATTEMPTS: u16 = 5;
const DEFAULT_SINK_RETRY_INTERVAL_SECS: u64 = 5;
const DEFAULT_MAX_RESTARTS: u16 = 5;
const DEFAULT_RESTART_BACKOFF_SECS: u64 = 5;

/// Long-poll wait of a single SQS receive.
const SQS_RECEIVE_WAIT_TIME: Duration = Duration::from_secs(10);

/// How the sink groups points into write requests.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum WriteMode {
    /// all valid points of a batch in one request
    #[default]
    Batch,
    /// one request per point
    Point,
}

impl FromStr for WriteMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "batch" => Ok(WriteMode::Batch),
            "point" => Ok(WriteMode::Point),
            other => Err(Error::Config(format!(
                "Unsupported write mode {other}, expected one of batch, point"
            ))),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum QueueSettings {
    /// push based message broker
    Jetstream(JetstreamConfig),
    /// pull based polling queue
    Sqs {
        config: SqsSourceConfig,
        batch_size: usize,
    },
}

impl QueueSettings {
    pub fn kind(&self) -> &'static str {
        match self {
            QueueSettings::Jetstream(_) => "jetstream",
            QueueSettings::Sqs { .. } => "sqs",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SinkSettings {
    pub influx: InfluxConfig,
    pub measurement: String,
    pub write_mode: WriteMode,
    pub retry: RetryPolicy,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
    pub service_name: String,
    pub environment: String,
    pub queue: QueueSettings,
    /// referenced in logs only, nothing is routed to it
    pub dlq_name: String,
    /// sleep after a failed poll of the pull queue
    pub polling_interval: Duration,
    pub sink: SinkSettings,
    pub max_restarts: u16,
    pub restart_backoff: Duration,
}

impl Settings {
    /// Loads the settings from the process environment.
    pub fn load() -> Result<Self> {
        let env_vars: HashMap<String, String> = std::env::vars().collect();
        env_vars.try_into()
    }
}

fn get_or<'a>(env_vars: &'a HashMap<String, String>, key: &str, default: &'a str) -> &'a str {
    env_vars
        .get(key)
        .map(String::as_str)
        .filter(|v| !v.is_empty())
        .unwrap_or(default)
}

fn get_optional(env_vars: &HashMap<String, String>, key: &str) -> Option<String> {
    env_vars.get(key).filter(|v| !v.is_empty()).cloned()
}

fn parse_or<T>(env_vars: &HashMap<String, String>, key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: Display,
{
    match env_vars.get(key).filter(|v| !v.is_empty()) {
        None => Ok(default),
        Some(raw) => raw.trim().parse::<T>().map_err(|e| {
            Error::Config(format!(
                "Parsing value {raw} of environment variable {key}: {e}"
            ))
        }),
    }
}

fn queue_settings(env_vars: &HashMap<String, String>) -> Result<QueueSettings> {
    let queue_type = get_or(env_vars, ENV_QUEUE_TYPE, "jetstream").to_ascii_lowercase();
    match queue_type.as_str() {
        "jetstream" | "message-broker" => {
            let host = get_or(env_vars, ENV_NATS_HOST, DEFAULT_NATS_HOST);
            let port: u16 = parse_or(env_vars, ENV_NATS_PORT, DEFAULT_NATS_PORT)?;

            let user = get_optional(env_vars, ENV_NATS_USER);
            let password = get_optional(env_vars, ENV_NATS_PASSWORD);
            let auth = match (user, password) {
                (Some(username), Some(password)) => Some(NatsAuth::Basic { username, password }),
                (None, None) => None,
                (Some(_), None) => {
                    return Err(Error::Config(format!(
                        "Environment variable {ENV_NATS_USER} is set, but {ENV_NATS_PASSWORD} is not set"
                    )));
                }
                (None, Some(_)) => {
                    return Err(Error::Config(format!(
                        "Environment variable {ENV_NATS_PASSWORD} is set, but {ENV_NATS_USER} is not set"
                    )));
                }
            };

            let queue_name = get_or(env_vars, ENV_QUEUE_NAME, DEFAULT_QUEUE_NAME).to_owned();
            Ok(QueueSettings::Jetstream(JetstreamConfig {
                addr: format!("{host}:{port}"),
                auth,
                stream: get_or(env_vars, ENV_NATS_STREAM, DEFAULT_NATS_STREAM).to_owned(),
                subject: queue_name.clone(),
                consumer: queue_name,
            }))
        }
        "sqs" | "polling-queue" => {
            let queue_url = get_optional(env_vars, ENV_SQS_QUEUE_URL).ok_or_else(|| {
                Error::Config(format!(
                    "Environment variable {ENV_SQS_QUEUE_URL} is required for the sqs queue"
                ))
            })?;
            let batch_size: usize = parse_or(env_vars, ENV_BATCH_SIZE, DEFAULT_BATCH_SIZE)?;
            if batch_size == 0 || batch_size > SQS_MAX_BATCH_SIZE {
                return Err(Error::Config(format!(
                    "{ENV_BATCH_SIZE} must be between 1 and {SQS_MAX_BATCH_SIZE}, got {batch_size}"
                )));
            }
            Ok(QueueSettings::Sqs {
                config: SqsSourceConfig {
                    region: get_or(env_vars, ENV_SQS_REGION, DEFAULT_SQS_REGION).to_owned(),
                    queue_url,
                    endpoint_url: get_optional(env_vars, ENV_SQS_ENDPOINT_URL),
                    wait_time: SQS_RECEIVE_WAIT_TIME,
                },
                batch_size,
            })
        }
        other => Err(Error::Config(format!(
            "Unsupported queue type {other}, expected one of jetstream, sqs"
        ))),
    }
}

/// The token is read from the environment, or from a mounted secret file.
fn influx_token(env_vars: &HashMap<String, String>) -> Result<String> {
    if let Some(token) = get_optional(env_vars, ENV_INFLUXDB_TOKEN) {
        return Ok(token);
    }
    let Some(path) = get_optional(env_vars, ENV_INFLUXDB_TOKEN_FILE) else {
        return Err(Error::Config(format!(
            "Either {ENV_INFLUXDB_TOKEN} or {ENV_INFLUXDB_TOKEN_FILE} must be set"
        )));
    };
    let token = std::fs::read_to_string(&path)
        .map_err(|e| Error::Config(format!("Reading InfluxDB token file {path}: {e}")))?;
    let token = token.trim();
    if token.is_empty() {
        return Err(Error::Config(format!("InfluxDB token file {path} is empty")));
    }
    Ok(token.to_owned())
}

impl TryFrom<HashMap<String, String>> for Settings {
    type Error = Error;

    fn try_from(env_vars: HashMap<String, String>) -> Result<Self> {
        let queue = queue_settings(&env_vars)?;

        let influx = InfluxConfig::new(
            get_or(&env_vars, ENV_INFLUXDB_URL, DEFAULT_INFLUXDB_URL),
            influx_token(&env_vars)?,
            get_or(&env_vars, ENV_INFLUXDB_ORG, DEFAULT_INFLUXDB_ORG),
            get_or(&env_vars, ENV_INFLUXDB_BUCKET, DEFAULT_INFLUXDB_BUCKET),
        );

        let max_attempts: u16 = parse_or(
            &env_vars,
            ENV_SINK_MAX_RETRY_ATTEMPTS,
            DEFAULT_SINK_MAX_RETRY_ATTEMPTS,
        )?;
        if max_attempts == 0 {
            return Err(Error::Config(format!(
                "{ENV_SINK_MAX_RETRY_ATTEMPTS} must be at least 1"
            )));
        }
        let retry_interval: u64 = parse_or(
            &env_vars,
            ENV_SINK_RETRY_INTERVAL_SECS,
            DEFAULT_SINK_RETRY_INTERVAL_SECS,
        )?;

        let sink = SinkSettings {
            influx,
            measurement: get_or(
                &env_vars,
                ENV_INFLUXDB_MEASUREMENT,
                DEFAULT_INFLUXDB_MEASUREMENT,
            )
            .to_owned(),
            write_mode: parse_or(&env_vars, ENV_INFLUXDB_WRITE_MODE, WriteMode::default())?,
            retry: RetryPolicy::new(max_attempts, Duration::from_secs(retry_interval)),
        };

        let polling_interval: u64 = parse_or(
            &env_vars,
            ENV_POLLING_INTERVAL,
            DEFAULT_POLLING_INTERVAL_SECS,
        )?;
        let restart_backoff: u64 = parse_or(
            &env_vars,
            ENV_RESTART_BACKOFF_SECS,
            DEFAULT_RESTART_BACKOFF_SECS,
        )?;

        Ok(Settings {
            service_name: get_or(&env_vars, ENV_SERVICE_NAME, DEFAULT_SERVICE_NAME).to_owned(),
            environment: get_or(&env_vars, ENV_ENVIRONMENT, DEFAULT_ENVIRONMENT).to_owned(),
            queue,
            dlq_name: get_or(&env_vars, ENV_DLQ_NAME, DEFAULT_DLQ_NAME).to_owned(),
            polling_interval: Duration::from_secs(polling_interval),
            sink,
            max_restarts: parse_or(&env_vars, ENV_MAX_RESTARTS, DEFAULT_MAX_RESTARTS)?,
            restart_backoff: Duration::from_secs(restart_backoff),
        })
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    fn env(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_defaults() {
        let settings: Settings = env(&[(ENV_INFLUXDB_TOKEN, "my-token")]).try_into().unwrap();

        assert_eq!(settings.service_name, "stock_db_influx");
        assert_eq!(settings.environment, "dev");
        assert_eq!(settings.dlq_name, "stock_db_influx_dlq");
        assert_eq!(settings.polling_interval, Duration::from_secs(60));
        assert_eq!(settings.max_restarts, 5);
        assert_eq!(settings.restart_backoff, Duration::from_secs(5));

        let QueueSettings::Jetstream(js) = settings.queue else {
            panic!("expected the jetstream queue by default");
        };
        assert_eq!(js.addr, "localhost:4222");
        assert_eq!(js.stream, "stock_db_influx");
        assert_eq!(js.subject, "stock_db_influx_queue");
        assert_eq!(js.consumer, "stock_db_influx_queue");
        assert!(js.auth.is_none());

        let sink = settings.sink;
        assert_eq!(sink.influx.url, "http://localhost:8086");
        assert_eq!(sink.influx.token, "my-token");
        assert_eq!(sink.influx.org, "default_org");
        assert_eq!(sink.influx.bucket, "poller_data");
        assert_eq!(sink.measurement, "stock_prices");
        assert_eq!(sink.write_mode, WriteMode::Batch);
        assert_eq!(sink.retry, RetryPolicy::new(5, Duration::from_secs(5)));
    }

    #[test]
    fn test_sqs_settings() {
        let settings: Settings = env(&[
            (ENV_INFLUXDB_TOKEN, "my-token"),
            (ENV_QUEUE_TYPE, "polling-queue"),
            (ENV_SQS_QUEUE_URL, "http://localhost:4566/000000000000/records"),
            (ENV_SQS_ENDPOINT_URL, "http://localhost:4566"),
            (ENV_BATCH_SIZE, "4"),
            (ENV_POLLING_INTERVAL, "15"),
        ])
        .try_into()
        .unwrap();

        assert_eq!(settings.queue.kind(), "sqs");
        let QueueSettings::Sqs { config, batch_size } = settings.queue else {
            panic!("expected the sqs queue");
        };
        assert_eq!(batch_size, 4);
        assert_eq!(config.region, "us-east-1");
        assert_eq!(
            config.endpoint_url.as_deref(),
            Some("http://localhost:4566")
        );
        assert_eq!(config.wait_time, Duration::from_secs(10));
        assert_eq!(settings.polling_interval, Duration::from_secs(15));
    }

    #[test]
    fn test_sqs_requires_queue_url() {
        let result: Result<Settings> =
            env(&[(ENV_INFLUXDB_TOKEN, "t"), (ENV_QUEUE_TYPE, "sqs")]).try_into();
        assert!(matches!(result, Err(Error::Config(msg)) if msg.contains(ENV_SQS_QUEUE_URL)));
    }

    #[test]
    fn test_sqs_batch_size_limit() {
        let result: Result<Settings> = env(&[
            (ENV_INFLUXDB_TOKEN, "t"),
            (ENV_QUEUE_TYPE, "sqs"),
            (ENV_SQS_QUEUE_URL, "https://sqs.us-east-1.amazonaws.com/1/q"),
            (ENV_BATCH_SIZE, "11"),
        ])
        .try_into();
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[test]
    fn test_nats_auth() {
        let settings: Settings = env(&[
            (ENV_INFLUXDB_TOKEN, "t"),
            (ENV_QUEUE_TYPE, "message-broker"),
            (ENV_NATS_HOST, "nats"),
            (ENV_NATS_PORT, "4333"),
            (ENV_NATS_USER, "writer"),
            (ENV_NATS_PASSWORD, "secret"),
        ])
        .try_into()
        .unwrap();
        let QueueSettings::Jetstream(js) = settings.queue else {
            panic!("expected the jetstream queue");
        };
        assert_eq!(js.addr, "nats:4333");
        assert_eq!(
            js.auth,
            Some(NatsAuth::Basic {
                username: "writer".into(),
                password: "secret".into()
            })
        );

        let result: Result<Settings> =
            env(&[(ENV_INFLUXDB_TOKEN, "t"), (ENV_NATS_USER, "writer")]).try_into();
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[test]
    fn test_invalid_values() {
        let cases = [
            (ENV_QUEUE_TYPE, "rabbit"),
            (ENV_NATS_PORT, "not-a-port"),
            (ENV_INFLUXDB_WRITE_MODE, "stream"),
            (ENV_SINK_MAX_RETRY_ATTEMPTS, "0"),
            (ENV_POLLING_INTERVAL, "-1"),
        ];
        for (key, value) in cases {
            let result: Result<Settings> = env(&[(ENV_INFLUXDB_TOKEN, "t"), (key, value)]).try_into();
            assert!(
                matches!(result, Err(Error::Config(_))),
                "{key}={value} should be rejected"
            );
        }
    }

    #[test]
    fn test_missing_token() {
        let result: Result<Settings> = env(&[]).try_into();
        assert!(matches!(result, Err(Error::Config(msg)) if msg.contains(ENV_INFLUXDB_TOKEN)));
    }

    #[test]
    fn test_token_from_file() {
        let path = std::env::temp_dir().join(format!("stockdb-token-{}", std::process::id()));
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(file, "file-token").unwrap();

        let settings: Settings = env(&[
            (ENV_INFLUXDB_TOKEN_FILE, path.to_str().unwrap()),
            (ENV_INFLUXDB_WRITE_MODE, "POINT"),
        ])
        .try_into()
        .unwrap();
        assert_eq!(settings.sink.influx.token, "file-token");
        assert_eq!(settings.sink.write_mode, WriteMode::Point);

        std::fs::remove_file(path).unwrap();
    }
}
