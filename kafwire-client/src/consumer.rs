//! Consumer client for reading from topics as a member of a consumer group

use crate::assignor::{Assignor, RangeAssignor, RoundRobinAssignor};
use crate::config::{ConsumerConfig, ConsumerConfigBuilder, FetchConfig};
use crate::connection::{ConnectionOptions, ConnectionPool};
use crate::coordinator::{GroupCoordinator, GroupSettings, GroupState};
use crate::error::ClientError;
use crate::protocol::{ConsumeRecord, TopicPartition};
use crate::transport::{Dialer, TcpDialer};
use futures::future::join_all;
use futures::stream::{self, Stream};
use kafwire::protocol::kafka::messages::{
    ConsumerGroupMemberAssignment, FetchRequest, FetchResponse, MetadataRequest,
};
use kafwire::{CodecError, GroupErrorClass, KafkaErrorCode};
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Record batches (magic v2) arrive from Fetch v4 on.
const MIN_FETCH_VERSION: i16 = 4;

#[derive(Debug, Default)]
struct FetchState {
    assigned: Vec<TopicPartition>,
    positions: HashMap<TopicPartition, i64>,
    leaders: HashMap<TopicPartition, i32>,
    refreshed_at: Option<Instant>,
}

/// High-level consumer client for receiving messages
#[derive(Debug)]
pub struct Consumer {
    config: ConsumerConfig,
    pool: Arc<ConnectionPool>,
    coordinator: GroupCoordinator,
    state: Mutex<FetchState>,
}

impl Consumer {
    /// Create a new consumer with the given configuration
    pub async fn new(config: ConsumerConfig) -> Result<Self, ClientError> {
        let dialer = Arc::new(TcpDialer::new(config.client_config.connection_timeout));
        Self::with_dialer(config, dialer).await
    }

    /// Create a consumer that opens broker streams through `dialer`.
    pub async fn with_dialer(
        config: ConsumerConfig,
        dialer: Arc<dyn Dialer>,
    ) -> Result<Self, ClientError> {
        let assignors: Vec<Arc<dyn Assignor>> =
            vec![Arc::new(RangeAssignor), Arc::new(RoundRobinAssignor)];
        Self::with_assignors(config, dialer, assignors).await
    }

    /// Create a consumer proposing `assignors` in order of preference.
    pub async fn with_assignors(
        config: ConsumerConfig,
        dialer: Arc<dyn Dialer>,
        assignors: Vec<Arc<dyn Assignor>>,
    ) -> Result<Self, ClientError> {
        config.validate()?;

        let pool = Arc::new(ConnectionPool::new(
            config.client_config.brokers.clone(),
            dialer,
            ConnectionOptions::from(&config.client_config),
        ));
        let coordinator =
            GroupCoordinator::new(GroupSettings::from(&config), pool.clone(), assignors)?;

        // fail fast on an unreachable cluster
        pool.get_connection().await?;

        info!(
            group_id = %config.group_id,
            topics = ?config.topics,
            "consumer created"
        );
        Ok(Self {
            config,
            pool,
            coordinator,
            state: Mutex::new(FetchState::default()),
        })
    }

    pub fn coordinator(&self) -> &GroupCoordinator {
        &self.coordinator
    }

    /// Partitions currently owned by this member.
    pub async fn assignment(&self) -> Vec<TopicPartition> {
        self.state.lock().await.assigned.clone()
    }

    /// Next offset to be fetched for `tp`.
    pub async fn position(&self, tp: &TopicPartition) -> Option<i64> {
        self.state.lock().await.positions.get(tp).copied()
    }

    /// Move the fetch position of an assigned partition.
    pub async fn seek(&self, tp: &TopicPartition, offset: i64) -> Result<(), ClientError> {
        let mut state = self.state.lock().await;
        match state.positions.get_mut(tp) {
            Some(position) => {
                *position = offset;
                Ok(())
            }
            None => Err(ClientError::invalid_config(format!(
                "partition {} is not assigned",
                tp
            ))),
        }
    }

    /// Make sure the member is active, then fetch once from every assigned
    /// partition.
    pub async fn poll(&self) -> Result<Vec<ConsumeRecord>, ClientError> {
        let assignment = self.coordinator.ensure_active().await?;

        let mut state = self.state.lock().await;
        self.apply_assignment(&mut state, &assignment).await?;
        let stale = state
            .refreshed_at
            .map_or(true, |at| at.elapsed() >= self.config.metadata_max_age);
        if stale || state.assigned.iter().any(|tp| !state.leaders.contains_key(tp)) {
            self.refresh_leaders(&mut state).await?;
        }
        if state.assigned.is_empty() {
            return Ok(Vec::new());
        }

        let mut by_leader: BTreeMap<i32, Vec<(TopicPartition, i64)>> = BTreeMap::new();
        for tp in &state.assigned {
            let (Some(&leader), Some(&position)) = (state.leaders.get(tp), state.positions.get(tp))
            else {
                continue;
            };
            by_leader
                .entry(leader)
                .or_default()
                .push((tp.clone(), position));
        }

        let fetches = by_leader
            .iter()
            .map(|(&leader, partitions)| self.fetch_from(leader, partitions));
        let results = join_all(fetches).await;

        let mut records = Vec::new();
        for ((&leader, _), result) in by_leader.iter().zip(results) {
            match result {
                Ok(response) => self.absorb(&mut state, response, &mut records).await?,
                Err(e) if e.is_retryable() || e.is_connection_error() => {
                    warn!(node_id = leader, error = %e, "fetch failed, refreshing leaders");
                    state.leaders.retain(|_, node| *node != leader);
                }
                Err(e) => return Err(e),
            }
        }
        drop(state);

        if self.config.auto_commit && !records.is_empty() {
            if let Err(e) = self.commit_sync().await {
                if matches!(e, ClientError::GroupFatal { .. }) {
                    return Err(e);
                }
                warn!(group_id = %self.config.group_id, error = %e, "auto commit failed");
            }
        }

        debug!(count = records.len(), "poll returned records");
        Ok(records)
    }

    /// Records as a stream, polling whenever the buffer runs dry.
    pub fn stream(&self) -> impl Stream<Item = Result<ConsumeRecord, ClientError>> + '_ {
        stream::unfold(
            (self, VecDeque::new()),
            |(consumer, mut buffer)| async move {
                loop {
                    if let Some(record) = buffer.pop_front() {
                        return Some((Ok(record), (consumer, buffer)));
                    }
                    match consumer.poll().await {
                        Ok(records) if records.is_empty() => {
                            tokio::time::sleep(consumer.config.fetch.max_wait).await;
                        }
                        Ok(records) => buffer.extend(records),
                        Err(e) => return Some((Err(e), (consumer, buffer))),
                    }
                }
            },
        )
    }

    /// Commit the current position of every assigned partition.
    pub async fn commit_sync(&self) -> Result<(), ClientError> {
        let offsets: BTreeMap<TopicPartition, i64> = {
            let state = self.state.lock().await;
            state
                .positions
                .iter()
                .map(|(tp, offset)| (tp.clone(), *offset))
                .collect()
        };
        self.commit_offsets(offsets).await
    }

    /// Commit specific offsets
    pub async fn commit_offsets(
        &self,
        offsets: BTreeMap<TopicPartition, i64>,
    ) -> Result<(), ClientError> {
        debug!(group_id = %self.config.group_id, partitions = offsets.len(), "committing offsets");
        self.coordinator.commit_offsets(&offsets).await
    }

    /// Leave the group and close every broker connection.
    pub async fn close(&self) -> Result<(), ClientError> {
        if self.config.auto_commit && self.coordinator.state().await == GroupState::Stable {
            if let Err(e) = self.commit_sync().await {
                warn!(group_id = %self.config.group_id, error = %e, "final commit failed");
            }
        }
        let result = self.coordinator.close().await;
        self.pool.close_all().await;
        info!(group_id = %self.config.group_id, "consumer closed");
        result
    }

    async fn apply_assignment(
        &self,
        state: &mut FetchState,
        assignment: &ConsumerGroupMemberAssignment,
    ) -> Result<(), ClientError> {
        let mut assigned: Vec<TopicPartition> = assignment
            .topics
            .iter()
            .flat_map(|(topic, partitions)| {
                partitions.iter().map(move |&p| TopicPartition::new(topic.clone(), p))
            })
            .collect();
        assigned.sort();
        if assigned == state.assigned {
            return Ok(());
        }

        state.positions.retain(|tp, _| assigned.contains(tp));
        let missing: Vec<TopicPartition> = assigned
            .iter()
            .filter(|tp| !state.positions.contains_key(*tp))
            .cloned()
            .collect();
        if !missing.is_empty() {
            let committed = self.coordinator.fetch_committed(&missing).await?;
            for tp in missing {
                let offset = committed.get(&tp).copied().unwrap_or(0);
                state.positions.insert(tp, offset);
            }
        }

        info!(
            group_id = %self.config.group_id,
            partitions = assigned.len(),
            "assignment changed"
        );
        state.assigned = assigned;
        Ok(())
    }

    async fn refresh_leaders(&self, state: &mut FetchState) -> Result<(), ClientError> {
        let conn = self.pool.get_connection().await?;
        let version = conn.negotiate_version::<MetadataRequest>()?;
        let response = conn
            .send(&MetadataRequest::for_topics(version, self.config.topics.clone()))
            .await?;
        self.pool.update_nodes(&response.brokers);

        state.leaders.clear();
        state.refreshed_at = Some(Instant::now());
        let mut counts = BTreeMap::new();
        for topic in &response.topics {
            if topic.error().is_ok() {
                counts.insert(topic.name.clone(), topic.partitions.len());
            }
            for partition in &topic.partitions {
                if partition.leader_id >= 0 {
                    state.leaders.insert(
                        TopicPartition::new(topic.name.clone(), partition.partition_index),
                        partition.leader_id,
                    );
                }
            }
        }
        debug!(partitions = state.leaders.len(), "refreshed partition leaders");
        self.coordinator.observe_partition_counts(&counts).await;
        Ok(())
    }

    async fn fetch_from(
        &self,
        leader: i32,
        partitions: &[(TopicPartition, i64)],
    ) -> Result<FetchResponse, ClientError> {
        let conn = self.pool.get_node(leader).await?;
        let version = conn.negotiate_version::<FetchRequest>()?;
        if version < MIN_FETCH_VERSION {
            return Err(CodecError::UnsupportedVersion {
                api_key: kafwire::protocol::kafka::API_KEY_FETCH,
                version,
            }
            .into());
        }

        let fetch: &FetchConfig = &self.config.fetch;
        let mut request = FetchRequest::new(version);
        request.max_wait_ms = fetch.max_wait.as_millis().min(i32::MAX as u128) as i32;
        request.min_bytes = fetch.min_bytes;
        request.max_bytes = fetch.max_bytes;
        for (tp, position) in partitions {
            request.add_partition(&tp.topic, tp.partition, *position, fetch.partition_max_bytes);
        }

        let timeout = self.config.client_config.request_timeout + fetch.max_wait;
        conn.send_with_timeout(&request, timeout).await
    }

    async fn absorb(
        &self,
        state: &mut FetchState,
        response: FetchResponse,
        records: &mut Vec<ConsumeRecord>,
    ) -> Result<(), ClientError> {
        if !response.error().is_ok() {
            return self.absorb_error(state, None, response.error()).await;
        }

        for topic in &response.responses {
            for partition in &topic.partitions {
                let tp = TopicPartition::new(topic.topic.clone(), partition.partition_index);
                let Some(&position) = state.positions.get(&tp) else {
                    continue;
                };

                match partition.error() {
                    KafkaErrorCode::NoError => {}
                    KafkaErrorCode::OffsetOutOfRange => {
                        let reset = if partition.log_start_offset >= 0 {
                            partition.log_start_offset
                        } else {
                            0
                        };
                        warn!(partition = %tp, position, reset, "offset out of range, resetting");
                        state.positions.insert(tp, reset);
                        continue;
                    }
                    code => {
                        self.absorb_error(state, Some(&tp), code).await?;
                        continue;
                    }
                }

                let mut next = position;
                for batch in partition.record_batches()? {
                    if batch.is_control() {
                        next = next.max(batch.next_offset());
                        continue;
                    }
                    for (offset, timestamp, record) in batch.iter_with_offsets() {
                        if offset < position {
                            continue;
                        }
                        records.push(ConsumeRecord::from_record(&tp, offset, timestamp, record));
                        next = next.max(offset + 1);
                    }
                }
                if next != position {
                    debug!(
                        partition = %tp,
                        from = position,
                        to = next,
                        high_watermark = partition.high_watermark,
                        "advanced position"
                    );
                    state.positions.insert(tp, next);
                }
            }
        }
        Ok(())
    }

    /// Errors that a later poll recovers from are logged and swallowed.
    async fn absorb_error(
        &self,
        state: &mut FetchState,
        tp: Option<&TopicPartition>,
        code: KafkaErrorCode,
    ) -> Result<(), ClientError> {
        if code.is_stale_metadata() {
            debug!(partition = ?tp.map(ToString::to_string), %code, "stale leader, will refresh");
            match tp {
                Some(tp) => {
                    state.leaders.remove(tp);
                }
                None => state.leaders.clear(),
            }
            return Ok(());
        }
        if code.group_error_class().is_some_and(|c| c != GroupErrorClass::Other) {
            return self.coordinator.handle_group_error(code).await;
        }
        if code.is_retriable() {
            debug!(partition = ?tp.map(ToString::to_string), %code, "retriable fetch error");
            return Ok(());
        }
        Err(ClientError::broker(
            code,
            tp.map_or_else(|| "fetch".to_string(), |tp| format!("fetch {}", tp)),
        ))
    }
}

/// Builder for Consumer
#[derive(Debug, Default)]
pub struct ConsumerBuilder {
    config: ConsumerConfigBuilder,
    dialer: Option<Arc<dyn Dialer>>,
}

impl ConsumerBuilder {
    /// Create a new consumer builder
    pub fn new() -> Self {
        Self::default()
    }

    /// Start from an existing configuration
    pub fn with_config(config: ConsumerConfig) -> Self {
        Self {
            config: ConsumerConfigBuilder::from_config(config),
            dialer: None,
        }
    }

    /// Set the broker addresses
    pub fn brokers<I, S>(mut self, brokers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.config = self.config.brokers(brokers);
        self
    }

    /// Set the consumer group ID
    pub fn group_id<S: Into<String>>(mut self, group_id: S) -> Self {
        self.config = self.config.group_id(group_id);
        self
    }

    /// Set the topics to consume from
    pub fn topics<I, S>(mut self, topics: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.config = self.config.topics(topics);
        self
    }

    pub fn session_timeout(mut self, timeout: Duration) -> Self {
        self.config = self.config.session_timeout(timeout);
        self
    }

    pub fn heartbeat_interval(mut self, interval: Duration) -> Self {
        self.config = self.config.heartbeat_interval(interval);
        self
    }

    /// Join as a static member
    pub fn group_instance_id<S: Into<String>>(mut self, id: S) -> Self {
        self.config = self.config.group_instance_id(id);
        self
    }

    pub fn auto_commit(mut self, enabled: bool) -> Self {
        self.config = self.config.auto_commit(enabled);
        self
    }

    pub fn metadata_max_age(mut self, age: Duration) -> Self {
        self.config = self.config.metadata_max_age(age);
        self
    }

    /// Open broker streams through `dialer` instead of plain TCP
    pub fn dialer(mut self, dialer: Arc<dyn Dialer>) -> Self {
        self.dialer = Some(dialer);
        self
    }

    /// Build the consumer
    pub async fn build(self) -> Result<Consumer, ClientError> {
        let config = self.config.build()?;
        match self.dialer {
            Some(dialer) => Consumer::with_dialer(config, dialer).await,
            None => Consumer::new(config).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_consumer_config_validation() {
        // no group id, no topics
        let result = Consumer::new(ConsumerConfig::default()).await;
        assert!(matches!(result, Err(ClientError::InvalidConfig { .. })));
    }

    #[tokio::test]
    async fn test_builder_rejects_heartbeat_above_session() {
        let result = ConsumerBuilder::new()
            .brokers(vec!["localhost:9092"])
            .group_id("g")
            .topics(vec!["t"])
            .session_timeout(Duration::from_secs(3))
            .heartbeat_interval(Duration::from_secs(3))
            .build()
            .await;
        assert!(matches!(result, Err(ClientError::InvalidConfig { .. })));
    }
}
