//! Cluster metadata client

use crate::config::ClientConfig;
use crate::connection::{ConnectionOptions, ConnectionPool};
use crate::coordinator::CoordinatorNode;
use crate::error::ClientError;
use crate::transport::{Dialer, TcpDialer};
use kafwire::protocol::kafka::messages::{
    FindCoordinatorRequest, MetadataRequest, MetadataResponse,
};
use kafwire::ApiVersionRegistry;
use std::sync::Arc;
use tracing::debug;

/// Metadata and discovery calls against any broker of the cluster
#[derive(Debug)]
pub struct AdminClient {
    pool: Arc<ConnectionPool>,
}

impl AdminClient {
    /// Create a new admin client
    pub async fn new(config: ClientConfig) -> Result<Self, ClientError> {
        let dialer = Arc::new(TcpDialer::new(config.connection_timeout));
        Self::with_dialer(config, dialer).await
    }

    pub async fn with_dialer(
        config: ClientConfig,
        dialer: Arc<dyn Dialer>,
    ) -> Result<Self, ClientError> {
        config.validate()?;
        let pool = Arc::new(ConnectionPool::new(
            config.brokers.clone(),
            dialer,
            ConnectionOptions::from(&config),
        ));
        pool.get_connection().await?;
        Ok(Self { pool })
    }

    /// Metadata for `topics`, or for every topic when empty.
    pub async fn metadata(&self, topics: Vec<String>) -> Result<MetadataResponse, ClientError> {
        let conn = self.pool.get_connection().await?;
        let version = conn.negotiate_version::<MetadataRequest>()?;
        let request = if topics.is_empty() {
            MetadataRequest::all_topics(version)
        } else {
            MetadataRequest::for_topics(version, topics)
        };

        let response = conn.send(&request).await?;
        self.pool.update_nodes(&response.brokers);
        debug!(
            brokers = response.brokers.len(),
            topics = response.topics.len(),
            "fetched metadata"
        );
        Ok(response)
    }

    /// List all topics, internal ones excluded
    pub async fn list_topics(&self) -> Result<Vec<String>, ClientError> {
        let metadata = self.metadata(Vec::new()).await?;
        let mut names: Vec<String> = metadata
            .topics
            .into_iter()
            .filter(|t| !t.is_internal && t.error().is_ok())
            .map(|t| t.name)
            .collect();
        names.sort();
        Ok(names)
    }

    /// Broker coordinating `group_id`
    pub async fn find_coordinator(&self, group_id: &str) -> Result<CoordinatorNode, ClientError> {
        let conn = self.pool.get_connection().await?;
        let version = conn.negotiate_version::<FindCoordinatorRequest>()?;
        let response = conn
            .send(&FindCoordinatorRequest::group(version, group_id))
            .await?;
        if !response.error().is_ok() {
            return Err(ClientError::broker(
                response.error(),
                format!("find coordinator for {}", group_id),
            ));
        }

        self.pool.set_node(response.node_id, response.address());
        Ok(CoordinatorNode {
            node_id: response.node_id,
            address: response.address(),
        })
    }

    /// Version ranges advertised by the broker this client talks to.
    pub async fn api_versions(&self) -> Result<ApiVersionRegistry, ClientError> {
        let conn = self.pool.get_connection().await?;
        match conn.api_versions() {
            Some(registry) => Ok(registry),
            None => conn.load_api_versions().await,
        }
    }

    /// Close the admin client
    pub async fn close(&self) -> Result<(), ClientError> {
        self.pool.close_all().await;
        Ok(())
    }
}
