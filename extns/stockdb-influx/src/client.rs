use std::fmt;
use std::time::Duration;

use reqwest::header::{AUTHORIZATION, CONTENT_TYPE};
use reqwest::{Client, Url};

use crate::line_protocol::{self, Point};
use crate::{Error, Result};

const WRITE_PATH: &str = "api/v2/write";
const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Connection details of an InfluxDB 2.x bucket.
#[derive(Clone, PartialEq)]
pub struct InfluxConfig {
    pub url: String,
    pub token: String,
    pub org: String,
    pub bucket: String,
    pub request_timeout: Duration,
}

impl InfluxConfig {
    pub fn new(
        url: impl Into<String>,
        token: impl Into<String>,
        org: impl Into<String>,
        bucket: impl Into<String>,
    ) -> Self {
        Self {
            url: url.into(),
            token: token.into(),
            org: org.into(),
            bucket: bucket.into(),
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }

    fn validate(&self) -> Result<()> {
        if self.token.is_empty() {
            return Err(Error::InvalidConfig("token is required".to_string()));
        }
        if self.org.is_empty() {
            return Err(Error::InvalidConfig("org is required".to_string()));
        }
        if self.bucket.is_empty() {
            return Err(Error::InvalidConfig("bucket is required".to_string()));
        }
        Ok(())
    }
}

impl fmt::Debug for InfluxConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InfluxConfig")
            .field("url", &self.url)
            .field("token", &"****")
            .field("org", &self.org)
            .field("bucket", &self.bucket)
            .field("request_timeout", &self.request_timeout)
            .finish()
    }
}

/// Write session against one bucket. The underlying HTTP client keeps a connection pool, so a
/// single instance is meant to be created at start-up and reused for every write.
#[derive(Clone)]
pub struct InfluxClient {
    client: Client,
    write_url: Url,
    token: String,
}

impl InfluxClient {
    pub fn new(config: InfluxConfig) -> Result<Self> {
        config.validate()?;

        let base = if config.url.ends_with('/') {
            config.url.clone()
        } else {
            format!("{}/", config.url)
        };
        let mut write_url = Url::parse(&base)
            .and_then(|base| base.join(WRITE_PATH))
            .map_err(|e| Error::InvalidConfig(format!("invalid url {}: {e}", config.url)))?;
        write_url
            .query_pairs_mut()
            .append_pair("org", &config.org)
            .append_pair("bucket", &config.bucket)
            .append_pair("precision", "ns");

        let client = Client::builder()
            .timeout(config.request_timeout)
            .build()?;

        tracing::info!(url = %config.url, org = %config.org, bucket = %config.bucket, "Created InfluxDB write client");

        Ok(Self {
            client,
            write_url,
            token: config.token,
        })
    }

    pub fn write_url(&self) -> &Url {
        &self.write_url
    }

    /// Writes all the points in a single request. InfluxDB answers a successful write with
    /// `204 No Content`; anything outside 2xx is returned as [`Error::Rejected`].
    pub async fn write(&self, points: &[Point]) -> Result<()> {
        let body = line_protocol::encode(points)?;

        let response = self
            .client
            .post(self.write_url.clone())
            .header(AUTHORIZATION, format!("Token {}", self.token))
            .header(CONTENT_TYPE, "text/plain; charset=utf-8")
            .body(body)
            .send()
            .await?;

        let status = response.status();
        if status.is_success() {
            tracing::debug!(count = points.len(), status = status.as_u16(), "Wrote points to InfluxDB");
            return Ok(());
        }

        let body = response.text().await.unwrap_or_default();
        Err(Error::Rejected {
            status: status.as_u16(),
            body,
        })
    }
}
