//! Configuration types for the kafwire client

use std::time::Duration;

use kafwire::DEFAULT_MAX_FRAME_SIZE;

use crate::error::ClientError;

/// Client configuration
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Bootstrap broker addresses (`host:port`)
    pub brokers: Vec<String>,
    /// Client identifier sent in every request header
    pub client_id: Option<String>,
    /// Connection timeout
    pub connection_timeout: Duration,
    /// Default per-request deadline
    pub request_timeout: Duration,
    /// Largest frame accepted from a broker
    pub max_frame_size: usize,
    /// Send ApiVersions right after connecting and clamp request versions
    pub negotiate_api_versions: bool,
    /// Retry configuration
    pub retry: RetryConfig,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            brokers: vec!["localhost:9092".to_string()],
            client_id: Some("kafwire".to_string()),
            connection_timeout: Duration::from_secs(10),
            request_timeout: Duration::from_secs(30),
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
            negotiate_api_versions: true,
            retry: RetryConfig::default(),
        }
    }
}

impl ClientConfig {
    pub fn validate(&self) -> Result<(), ClientError> {
        if self.brokers.is_empty() {
            return Err(ClientError::invalid_config("at least one broker is required"));
        }
        if self.brokers.iter().any(|b| b.trim().is_empty()) {
            return Err(ClientError::invalid_config("broker address must not be empty"));
        }
        if self.request_timeout.is_zero() {
            return Err(ClientError::invalid_config("request_timeout must be positive"));
        }
        if self.max_frame_size < 8 {
            return Err(ClientError::invalid_config("max_frame_size is too small"));
        }
        self.retry.validate()
    }
}

/// Retry configuration
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of retries
    pub max_retries: u32,
    /// Initial retry delay
    pub initial_delay: Duration,
    /// Maximum retry delay
    pub max_delay: Duration,
    /// Retry delay multiplier
    pub multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 5,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(10),
            multiplier: 2.0,
        }
    }
}

impl RetryConfig {
    /// Delay before retry number `attempt` (0-based), capped at `max_delay`.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = self.multiplier.powi(attempt.min(32) as i32);
        let millis = self.initial_delay.as_millis() as f64 * factor;
        let capped = millis.min(self.max_delay.as_millis() as f64);
        Duration::from_millis(capped as u64)
    }

    fn validate(&self) -> Result<(), ClientError> {
        if self.multiplier < 1.0 {
            return Err(ClientError::invalid_config("retry multiplier must be >= 1.0"));
        }
        if self.initial_delay > self.max_delay {
            return Err(ClientError::invalid_config(
                "retry initial_delay must not exceed max_delay",
            ));
        }
        Ok(())
    }
}

/// Fetch configuration
#[derive(Debug, Clone)]
pub struct FetchConfig {
    /// Minimum fetch size in bytes
    pub min_bytes: i32,
    /// Maximum fetch size in bytes
    pub max_bytes: i32,
    /// Maximum bytes per partition
    pub partition_max_bytes: i32,
    /// Maximum time the broker may hold the fetch
    pub max_wait: Duration,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            min_bytes: 1,
            max_bytes: 50 * 1024 * 1024,
            partition_max_bytes: 1024 * 1024,
            max_wait: Duration::from_millis(500),
        }
    }
}

/// Consumer-specific configuration
#[derive(Debug, Clone)]
pub struct ConsumerConfig {
    /// Base client configuration
    pub client_config: ClientConfig,
    /// Consumer group ID
    pub group_id: String,
    /// Topics to subscribe to
    pub topics: Vec<String>,
    /// Session timeout for the group
    pub session_timeout: Duration,
    /// Time the broker waits for every member to rejoin
    pub rebalance_timeout: Duration,
    /// Heartbeat interval, strictly below `session_timeout`
    pub heartbeat_interval: Duration,
    /// Static membership identity
    pub group_instance_id: Option<String>,
    /// Join/sync attempts before giving up with a rebalance timeout
    pub max_rebalance_retries: u32,
    /// Wall-clock budget for one join/sync round
    pub rebalance_budget: Duration,
    /// Fetch configuration
    pub fetch: FetchConfig,
    /// Commit positions after every poll
    pub auto_commit: bool,
    /// Age after which partition metadata is refreshed on the next poll
    pub metadata_max_age: Duration,
}

impl Default for ConsumerConfig {
    fn default() -> Self {
        Self {
            client_config: ClientConfig::default(),
            group_id: String::new(),
            topics: Vec::new(),
            session_timeout: Duration::from_secs(10),
            rebalance_timeout: Duration::from_secs(60),
            heartbeat_interval: Duration::from_secs(3),
            group_instance_id: None,
            max_rebalance_retries: 10,
            rebalance_budget: Duration::from_secs(120),
            fetch: FetchConfig::default(),
            auto_commit: false,
            metadata_max_age: Duration::from_secs(300),
        }
    }
}

impl ConsumerConfig {
    pub fn validate(&self) -> Result<(), ClientError> {
        self.client_config.validate()?;
        if self.group_id.is_empty() {
            return Err(ClientError::invalid_config("group_id is required"));
        }
        if self.topics.is_empty() {
            return Err(ClientError::invalid_config(
                "at least one topic must be specified",
            ));
        }
        if self.heartbeat_interval.is_zero() || self.heartbeat_interval >= self.session_timeout {
            return Err(ClientError::invalid_config(
                "heartbeat_interval must be positive and below session_timeout",
            ));
        }
        if self.max_rebalance_retries == 0 {
            return Err(ClientError::invalid_config(
                "max_rebalance_retries must be at least 1",
            ));
        }
        Ok(())
    }
}

/// Producer-specific configuration
#[derive(Debug, Clone)]
pub struct ProducerConfig {
    /// Base client configuration
    pub client_config: ClientConfig,
    /// Acknowledgment level (0, 1, -1/all)
    pub acks: i16,
    /// Time the broker may wait for the required acks
    pub timeout: Duration,
    /// Maximum message size
    pub max_message_size: usize,
}

impl Default for ProducerConfig {
    fn default() -> Self {
        Self {
            client_config: ClientConfig::default(),
            acks: -1,
            timeout: Duration::from_secs(30),
            max_message_size: 1024 * 1024,
        }
    }
}

impl ProducerConfig {
    pub fn validate(&self) -> Result<(), ClientError> {
        self.client_config.validate()?;
        if !matches!(self.acks, -1 | 0 | 1) {
            return Err(ClientError::invalid_config("acks must be -1, 0 or 1"));
        }
        if self.max_message_size == 0 {
            return Err(ClientError::invalid_config("max_message_size must be positive"));
        }
        Ok(())
    }
}

/// Builder for ClientConfig
#[derive(Debug, Default)]
pub struct ClientConfigBuilder {
    config: ClientConfig,
}

impl ClientConfigBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn brokers<I, S>(mut self, brokers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.config.brokers = brokers.into_iter().map(|s| s.into()).collect();
        self
    }

    pub fn client_id<S: Into<String>>(mut self, client_id: S) -> Self {
        self.config.client_id = Some(client_id.into());
        self
    }

    pub fn connection_timeout(mut self, timeout: Duration) -> Self {
        self.config.connection_timeout = timeout;
        self
    }

    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.config.request_timeout = timeout;
        self
    }

    pub fn max_frame_size(mut self, size: usize) -> Self {
        self.config.max_frame_size = size;
        self
    }

    pub fn negotiate_api_versions(mut self, enabled: bool) -> Self {
        self.config.negotiate_api_versions = enabled;
        self
    }

    pub fn retry(mut self, retry: RetryConfig) -> Self {
        self.config.retry = retry;
        self
    }

    pub fn build(self) -> Result<ClientConfig, ClientError> {
        self.config.validate()?;
        Ok(self.config)
    }
}

/// Builder for ConsumerConfig
#[derive(Debug, Default)]
pub struct ConsumerConfigBuilder {
    config: ConsumerConfig,
}

impl ConsumerConfigBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_config(config: ConsumerConfig) -> Self {
        Self { config }
    }

    pub fn client_config(mut self, client_config: ClientConfig) -> Self {
        self.config.client_config = client_config;
        self
    }

    pub fn brokers<I, S>(mut self, brokers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.config.client_config.brokers = brokers.into_iter().map(|s| s.into()).collect();
        self
    }

    pub fn group_id<S: Into<String>>(mut self, group_id: S) -> Self {
        self.config.group_id = group_id.into();
        self
    }

    pub fn topics<I, S>(mut self, topics: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.config.topics = topics.into_iter().map(|s| s.into()).collect();
        self
    }

    pub fn session_timeout(mut self, timeout: Duration) -> Self {
        self.config.session_timeout = timeout;
        self
    }

    pub fn rebalance_timeout(mut self, timeout: Duration) -> Self {
        self.config.rebalance_timeout = timeout;
        self
    }

    pub fn heartbeat_interval(mut self, interval: Duration) -> Self {
        self.config.heartbeat_interval = interval;
        self
    }

    pub fn group_instance_id<S: Into<String>>(mut self, id: S) -> Self {
        self.config.group_instance_id = Some(id.into());
        self
    }

    pub fn max_rebalance_retries(mut self, retries: u32) -> Self {
        self.config.max_rebalance_retries = retries;
        self
    }

    pub fn rebalance_budget(mut self, budget: Duration) -> Self {
        self.config.rebalance_budget = budget;
        self
    }

    pub fn fetch(mut self, fetch: FetchConfig) -> Self {
        self.config.fetch = fetch;
        self
    }

    pub fn auto_commit(mut self, enabled: bool) -> Self {
        self.config.auto_commit = enabled;
        self
    }

    pub fn metadata_max_age(mut self, age: Duration) -> Self {
        self.config.metadata_max_age = age;
        self
    }

    pub fn build(self) -> Result<ConsumerConfig, ClientError> {
        self.config.validate()?;
        Ok(self.config)
    }
}

/// Builder for ProducerConfig
#[derive(Debug, Default)]
pub struct ProducerConfigBuilder {
    config: ProducerConfig,
}

impl ProducerConfigBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_config(config: ProducerConfig) -> Self {
        Self { config }
    }

    pub fn client_config(mut self, client_config: ClientConfig) -> Self {
        self.config.client_config = client_config;
        self
    }

    pub fn brokers<I, S>(mut self, brokers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.config.client_config.brokers = brokers.into_iter().map(|s| s.into()).collect();
        self
    }

    pub fn acks(mut self, acks: i16) -> Self {
        self.config.acks = acks;
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.config.timeout = timeout;
        self
    }

    pub fn max_message_size(mut self, size: usize) -> Self {
        self.config.max_message_size = size;
        self
    }

    pub fn build(self) -> Result<ProducerConfig, ClientError> {
        self.config.validate()?;
        Ok(self.config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_config_builder() {
        let config = ClientConfigBuilder::new()
            .brokers(vec!["broker1:9092", "broker2:9092"])
            .connection_timeout(Duration::from_secs(5))
            .client_id("test-client")
            .build()
            .unwrap();

        assert_eq!(config.brokers, vec!["broker1:9092", "broker2:9092"]);
        assert_eq!(config.connection_timeout, Duration::from_secs(5));
        assert_eq!(config.client_id, Some("test-client".to_string()));
    }

    #[test]
    fn test_empty_brokers_rejected() {
        let result = ClientConfigBuilder::new()
            .brokers(Vec::<String>::new())
            .build();
        assert!(matches!(result, Err(ClientError::InvalidConfig { .. })));
    }

    #[test]
    fn test_backoff_grows_and_caps() {
        let retry = RetryConfig {
            max_retries: 10,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(1000),
            multiplier: 2.0,
        };
        assert_eq!(retry.backoff(0), Duration::from_millis(100));
        assert_eq!(retry.backoff(1), Duration::from_millis(200));
        assert_eq!(retry.backoff(3), Duration::from_millis(800));
        assert_eq!(retry.backoff(4), Duration::from_millis(1000));
        assert_eq!(retry.backoff(u32::MAX), Duration::from_millis(1000));
    }

    #[test]
    fn test_consumer_config_builder() {
        let config = ConsumerConfigBuilder::new()
            .brokers(vec!["localhost:9092"])
            .group_id("test-group")
            .topics(vec!["topic1", "topic2"])
            .group_instance_id("instance-1")
            .build()
            .unwrap();

        assert_eq!(config.group_id, "test-group");
        assert_eq!(config.topics, vec!["topic1", "topic2"]);
        assert_eq!(config.group_instance_id.as_deref(), Some("instance-1"));
    }

    #[test]
    fn test_heartbeat_must_be_below_session_timeout() {
        let result = ConsumerConfigBuilder::new()
            .group_id("g")
            .topics(vec!["t"])
            .session_timeout(Duration::from_secs(3))
            .heartbeat_interval(Duration::from_secs(3))
            .build();
        assert!(matches!(result, Err(ClientError::InvalidConfig { .. })));
    }

    #[test]
    fn test_consumer_requires_group_and_topics() {
        assert!(ConsumerConfigBuilder::new().topics(vec!["t"]).build().is_err());
        assert!(ConsumerConfigBuilder::new().group_id("g").build().is_err());
    }

    #[test]
    fn test_producer_config_builder() {
        let config = ProducerConfigBuilder::new()
            .brokers(vec!["localhost:9092"])
            .acks(1)
            .max_message_size(2 * 1024 * 1024)
            .build()
            .unwrap();

        assert_eq!(config.acks, 1);
        assert_eq!(config.max_message_size, 2 * 1024 * 1024);
        assert!(ProducerConfigBuilder::new().acks(2).build().is_err());
    }
}
