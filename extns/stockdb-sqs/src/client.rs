use aws_config::{BehaviorVersion, Region, meta::region::RegionProviderChain};
use aws_sdk_sqs::Client;

use crate::Result;
use crate::source::SqsSourceConfig;

const FALLBACK_REGION: &str = "us-east-1";

/// Creates and configures an SQS client based on the provided configuration. Credentials come
/// from the default AWS provider chain (environment, profile, instance role).
pub async fn create_sqs_client(config: &SqsSourceConfig) -> Result<Client> {
    config.validate()?;

    tracing::info!(region = config.region.clone(), "Creating SQS client in region");

    let region_provider = RegionProviderChain::first_try(Region::new(config.region.clone()))
        .or_default_provider()
        .or_else(Region::new(FALLBACK_REGION));

    let mut config_builder = aws_config::defaults(BehaviorVersion::latest()).region(region_provider);

    // local stacks (localstack, elasticmq) are addressed through a custom endpoint
    if let Some(endpoint_url) = &config.endpoint_url {
        config_builder = config_builder.endpoint_url(endpoint_url.clone());
    }

    let shared_config = config_builder.load().await;
    Ok(Client::new(&shared_config))
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::Error;

    fn test_config() -> SqsSourceConfig {
        SqsSourceConfig {
            region: "us-west-2".to_string(),
            queue_url: "https://sqs.us-west-2.amazonaws.com/926113353675/test-q".to_string(),
            endpoint_url: None,
            wait_time: Duration::from_secs(10),
        }
    }

    #[tokio::test]
    async fn test_client_creation_with_defaults() {
        let result = create_sqs_client(&test_config()).await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn test_client_creation_with_custom_endpoint() {
        let mut config = test_config();
        config.endpoint_url = Some("http://localhost:4566".to_string());
        assert!(create_sqs_client(&config).await.is_ok());
    }

    #[tokio::test]
    async fn test_client_creation_validation_failures() {
        let mut config = test_config();
        config.region = "".to_string();
        let result = create_sqs_client(&config).await;
        assert!(matches!(result, Err(Error::InvalidConfig(_))));

        let mut config = test_config();
        config.queue_url = "".to_string();
        let result = create_sqs_client(&config).await;
        assert!(matches!(result, Err(Error::InvalidConfig(_))));

        let mut config = test_config();
        config.wait_time = Duration::from_secs(30);
        let result = create_sqs_client(&config).await;
        assert!(matches!(result, Err(Error::InvalidConfig(_))));
    }
}
