//! High-level client interface

use crate::admin::AdminClient;
use crate::config::{ClientConfig, ConsumerConfig, ProducerConfig};
use crate::consumer::ConsumerBuilder;
use crate::error::ClientError;
use crate::producer::ProducerBuilder;

/// Entry point handing out producers, consumers and admin clients that share
/// one [`ClientConfig`]
#[derive(Debug, Clone)]
pub struct KafwireClient {
    config: ClientConfig,
}

impl KafwireClient {
    pub fn new(config: ClientConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Producer builder preloaded with this client's settings
    pub fn producer(&self) -> ProducerBuilder {
        ProducerBuilder::with_config(ProducerConfig {
            client_config: self.config.clone(),
            ..ProducerConfig::default()
        })
    }

    /// Consumer builder preloaded with this client's settings
    pub fn consumer(&self) -> ConsumerBuilder {
        ConsumerBuilder::with_config(ConsumerConfig {
            client_config: self.config.clone(),
            ..ConsumerConfig::default()
        })
    }

    /// Create an admin client
    pub async fn admin(&self) -> Result<AdminClient, ClientError> {
        AdminClient::new(self.config.clone()).await
    }
}

impl KafwireClient {
    /// Client for a broker on localhost
    pub fn localhost() -> Self {
        Self::new(ClientConfig::default())
    }

    /// Client with custom brokers and otherwise default settings
    pub fn with_brokers<I, S>(brokers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::new(ClientConfig {
            brokers: brokers.into_iter().map(Into::into).collect(),
            ..ClientConfig::default()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_with_brokers_keeps_defaults() {
        let client = KafwireClient::with_brokers(["a:9092", "b:9092"]);
        assert_eq!(client.config().brokers, vec!["a:9092", "b:9092"]);
        assert_eq!(client.config().client_id.as_deref(), Some("kafwire"));
    }
}
