//! Consumer group membership
//!
//! [`GroupCoordinator`] drives one member through
//! `Unjoined → Joining → Joined → Syncing → Stable`, back through
//! `Rebalancing → Joining` whenever the group rebalances, and into the
//! terminal `Left` on leave or on an error the group cannot recover from.
//!
//! Every transition happens with the membership mutex held, including the
//! ones made by the background heartbeat task, so join, sync, heartbeat and
//! commit never interleave for one member.

use kafwire::protocol::kafka::messages::{
    ApiRequest, ConsumerGroupMemberAssignment, FindCoordinatorRequest, HeartbeatRequest, JoinGroupRequest,
    JoinGroupResponse, LeaveGroupRequest, MetadataRequest, OffsetCommitRequest,
    OffsetFetchRequest, SyncGroupRequest, CONSUMER_PROTOCOL_TYPE,
};
use kafwire::{GroupErrorClass, KafkaErrorCode};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::assignor::{Assignor, GroupAssignment, MemberSubscriptions, PartitionUniverse};
use crate::config::{ConsumerConfig, RetryConfig};
use crate::connection::{Connection, ConnectionPool};
use crate::error::ClientError;
use crate::metrics::{global_metrics, ClientMetrics};
use crate::protocol::TopicPartition;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GroupState {
    Unjoined,
    Joining,
    Joined { leader: bool },
    Syncing,
    Stable,
    Rebalancing,
    Left,
}

/// Broker currently coordinating the group.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoordinatorNode {
    pub node_id: i32,
    pub address: String,
}

/// What this member knows about its place in the group.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupMembership {
    pub member_id: String,
    pub generation_id: i32,
    pub protocol_name: Option<String>,
    pub leader_id: String,
    pub assignment: ConsumerGroupMemberAssignment,
    pub coordinator: Option<CoordinatorNode>,
}

impl Default for GroupMembership {
    fn default() -> Self {
        Self {
            member_id: String::new(),
            generation_id: -1,
            protocol_name: None,
            leader_id: String::new(),
            assignment: ConsumerGroupMemberAssignment::default(),
            coordinator: None,
        }
    }
}

impl GroupMembership {
    fn reset(&mut self) {
        let coordinator = self.coordinator.take();
        *self = Self {
            coordinator,
            ..Self::default()
        };
    }
}

/// Group settings taken from [`ConsumerConfig`].
#[derive(Debug, Clone)]
pub struct GroupSettings {
    pub group_id: String,
    pub topics: Vec<String>,
    pub session_timeout: Duration,
    pub rebalance_timeout: Duration,
    pub heartbeat_interval: Duration,
    pub group_instance_id: Option<String>,
    pub max_rebalance_retries: u32,
    pub rebalance_budget: Duration,
    pub request_timeout: Duration,
    pub retry: RetryConfig,
}

impl From<&ConsumerConfig> for GroupSettings {
    fn from(config: &ConsumerConfig) -> Self {
        Self {
            group_id: config.group_id.clone(),
            topics: config.topics.clone(),
            session_timeout: config.session_timeout,
            rebalance_timeout: config.rebalance_timeout,
            heartbeat_interval: config.heartbeat_interval,
            group_instance_id: config.group_instance_id.clone(),
            max_rebalance_retries: config.max_rebalance_retries,
            rebalance_budget: config.rebalance_budget,
            request_timeout: config.client_config.request_timeout,
            retry: config.client_config.retry.clone(),
        }
    }
}

struct Inner {
    state: GroupState,
    membership: GroupMembership,
    heartbeat: Option<JoinHandle<()>>,
    /// Code that moved the member to `Left`, if it was a fatal group error.
    fatal: Option<KafkaErrorCode>,
    /// Partition count per subscribed topic when this member last led an
    /// assignment. `None` for followers.
    assigned_counts: Option<BTreeMap<String, usize>>,
}

struct Shared {
    settings: GroupSettings,
    pool: Arc<ConnectionPool>,
    assignors: Vec<Arc<dyn Assignor>>,
    inner: Mutex<Inner>,
    metrics: Arc<ClientMetrics>,
}

/// One consumer's membership in one group.
#[derive(Clone)]
pub struct GroupCoordinator {
    shared: Arc<Shared>,
}

impl fmt::Debug for GroupCoordinator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GroupCoordinator")
            .field("group_id", &self.shared.settings.group_id)
            .finish()
    }
}

impl GroupCoordinator {
    pub fn new(
        settings: GroupSettings,
        pool: Arc<ConnectionPool>,
        assignors: Vec<Arc<dyn Assignor>>,
    ) -> Result<Self, ClientError> {
        if assignors.is_empty() {
            return Err(ClientError::invalid_config("at least one assignor is required"));
        }
        if settings.heartbeat_interval.is_zero()
            || settings.heartbeat_interval >= settings.session_timeout
        {
            return Err(ClientError::invalid_config(
                "heartbeat_interval must be positive and below session_timeout",
            ));
        }

        Ok(Self {
            shared: Arc::new(Shared {
                settings,
                pool,
                assignors,
                inner: Mutex::new(Inner {
                    state: GroupState::Unjoined,
                    membership: GroupMembership::default(),
                    heartbeat: None,
                    fatal: None,
                    assigned_counts: None,
                }),
                metrics: global_metrics(),
            }),
        })
    }

    pub fn group_id(&self) -> &str {
        &self.shared.settings.group_id
    }

    pub async fn state(&self) -> GroupState {
        self.shared.inner.lock().await.state
    }

    pub async fn membership(&self) -> GroupMembership {
        self.shared.inner.lock().await.membership.clone()
    }

    /// Join and sync until the member is `Stable`, returning its assignment.
    pub async fn ensure_active(&self) -> Result<ConsumerGroupMemberAssignment, ClientError> {
        let mut inner = self.shared.inner.lock().await;
        match inner.state {
            GroupState::Stable => Ok(inner.membership.assignment.clone()),
            GroupState::Left => Err(self.not_member(&inner)),
            _ => self.rejoin(&mut inner).await,
        }
    }

    /// Send one JoinGroup and record the outcome. The returned response
    /// carries the member list when this member leads.
    pub async fn join_group(&self) -> Result<JoinGroupResponse, ClientError> {
        let mut inner = self.shared.inner.lock().await;
        self.ensure_not_left(&inner)?;
        let conn = self.coordinator(&mut inner).await?;
        self.join(&mut inner, &conn).await
    }

    /// Send SyncGroup for the current generation. A leader passes the
    /// assignment plan; followers pass an empty one.
    pub async fn sync_group(
        &self,
        plan: GroupAssignment,
    ) -> Result<ConsumerGroupMemberAssignment, ClientError> {
        let mut inner = self.shared.inner.lock().await;
        self.ensure_not_left(&inner)?;
        let conn = self.coordinator(&mut inner).await?;
        self.sync(&mut inner, &conn, plan).await
    }

    /// Send one heartbeat now. A rebalance signalled by the broker is not an
    /// error: the member moves to `Rebalancing` and `Ok` is returned.
    pub async fn heartbeat(&self) -> Result<(), ClientError> {
        let mut inner = self.shared.inner.lock().await;
        self.heartbeat_locked(&mut inner).await
    }

    /// Interpret a group error code returned by a commit, fetch or other
    /// group-scoped call. Only fatal codes are returned as errors.
    pub async fn handle_group_error(&self, code: KafkaErrorCode) -> Result<(), ClientError> {
        if code.is_ok() {
            return Ok(());
        }
        let mut inner = self.shared.inner.lock().await;
        match self.apply_group_error(&mut inner, code, "group call") {
            err @ ClientError::GroupFatal { .. } => Err(err),
            _ => Ok(()),
        }
    }

    /// Ask for a rebalance on the next [`ensure_active`](Self::ensure_active).
    pub async fn request_rebalance(&self, reason: &str) {
        let mut inner = self.shared.inner.lock().await;
        self.rebalance_locked(&mut inner, reason);
    }

    /// Compare fresh partition counts against the ones the last assignment
    /// was computed from. A subscribed topic that grew triggers a rebalance;
    /// returns whether one was requested. Only the leader tracks counts.
    pub async fn observe_partition_counts(&self, counts: &BTreeMap<String, usize>) -> bool {
        let mut inner = self.shared.inner.lock().await;
        let Some(assigned) = &inner.assigned_counts else {
            return false;
        };
        let grown = self.shared.settings.topics.iter().find(|topic| {
            let now = counts.get(*topic).copied().unwrap_or(0);
            now > assigned.get(*topic).copied().unwrap_or(0)
        });
        let Some(topic) = grown.cloned() else {
            return false;
        };
        debug!(group_id = %self.group_id(), %topic, "subscribed topic gained partitions");
        self.rebalance_locked(&mut inner, "partitions changed")
    }

    fn rebalance_locked(&self, inner: &mut Inner, reason: &str) -> bool {
        if !matches!(
            inner.state,
            GroupState::Stable | GroupState::Joined { .. } | GroupState::Syncing
        ) {
            return false;
        }
        info!(group_id = %self.group_id(), reason, "rebalance requested");
        self.transition(inner, GroupState::Rebalancing);
        true
    }

    /// Leave the group and stop heartbeating. The member ends in `Left`.
    pub async fn leave_group(&self) -> Result<(), ClientError> {
        let mut inner = self.shared.inner.lock().await;
        self.leave(&mut inner, true).await
    }

    /// Leave on shutdown. Static members keep their slot so that a restart
    /// with the same instance id does not trigger a rebalance.
    pub async fn close(&self) -> Result<(), ClientError> {
        let mut inner = self.shared.inner.lock().await;
        let send_leave = self.shared.settings.group_instance_id.is_none();
        self.leave(&mut inner, send_leave).await
    }

    /// Commit offsets for the current generation.
    pub async fn commit_offsets(
        &self,
        offsets: &BTreeMap<TopicPartition, i64>,
    ) -> Result<(), ClientError> {
        if offsets.is_empty() {
            return Ok(());
        }
        let mut inner = self.shared.inner.lock().await;
        if inner.state != GroupState::Stable {
            return Err(self.not_member(&inner));
        }

        let conn = self.coordinator(&mut inner).await?;
        let version = conn.negotiate_version::<OffsetCommitRequest>()?;
        let mut request = OffsetCommitRequest::new(version);
        request.group_id = self.group_id().to_string();
        request.generation_id = inner.membership.generation_id;
        request.member_id = inner.membership.member_id.clone();
        request.group_instance_id = self.shared.settings.group_instance_id.clone();
        for (tp, offset) in offsets {
            request.add_offset(&tp.topic, tp.partition, *offset, None);
        }

        let response = self.send_to_coordinator(&mut inner, &conn, &request).await?;
        if let Some(code) = response.first_error() {
            return Err(self.apply_group_error(&mut inner, code, "offset commit"));
        }
        debug!(
            group_id = %self.group_id(),
            generation_id = inner.membership.generation_id,
            partitions = offsets.len(),
            "committed offsets"
        );
        Ok(())
    }

    /// Committed offsets for `partitions`. Partitions without a commit are
    /// left out.
    pub async fn fetch_committed(
        &self,
        partitions: &[TopicPartition],
    ) -> Result<HashMap<TopicPartition, i64>, ClientError> {
        let mut inner = self.shared.inner.lock().await;
        self.ensure_not_left(&inner)?;

        let conn = self.coordinator(&mut inner).await?;
        let version = conn.negotiate_version::<OffsetFetchRequest>()?;
        let mut request = OffsetFetchRequest::new(version);
        request.group_id = self.group_id().to_string();
        for tp in partitions {
            request.add_partition(&tp.topic, tp.partition);
        }

        let response = self.send_to_coordinator(&mut inner, &conn, &request).await?;
        if !response.error().is_ok() {
            return Err(self.apply_group_error(&mut inner, response.error(), "offset fetch"));
        }

        let mut committed = HashMap::new();
        for topic in &response.topics {
            for partition in &topic.partitions {
                if !partition.error().is_ok() {
                    return Err(self.apply_group_error(
                        &mut inner,
                        partition.error(),
                        "offset fetch",
                    ));
                }
                if partition.committed_offset >= 0 {
                    committed.insert(
                        TopicPartition::new(topic.name.clone(), partition.partition_index),
                        partition.committed_offset,
                    );
                }
            }
        }
        Ok(committed)
    }

    // ------------------------------------------------------------------------
    // Join / sync
    // ------------------------------------------------------------------------

    async fn rejoin(&self, inner: &mut Inner) -> Result<ConsumerGroupMemberAssignment, ClientError> {
        let settings = &self.shared.settings;
        let started = Instant::now();
        let mut attempts = 0u32;

        loop {
            attempts += 1;
            let err = match self.join_and_sync(inner).await {
                Ok(assignment) => return Ok(assignment),
                Err(err) => err,
            };

            if inner.state == GroupState::Left {
                return Err(err);
            }
            if !self.can_retry(inner, &err) {
                self.transition(inner, GroupState::Rebalancing);
                return Err(err);
            }

            let elapsed = started.elapsed();
            if attempts >= settings.max_rebalance_retries || elapsed >= settings.rebalance_budget {
                warn!(
                    group_id = %settings.group_id,
                    attempts,
                    error = %err,
                    "giving up on rebalance"
                );
                self.transition(inner, GroupState::Rebalancing);
                return Err(ClientError::RebalanceTimeout {
                    attempts,
                    elapsed_ms: elapsed.as_millis() as u64,
                });
            }

            let delay = settings
                .retry
                .backoff(attempts - 1)
                .min(settings.rebalance_budget - elapsed);
            warn!(
                group_id = %settings.group_id,
                attempt = attempts,
                delay_ms = delay.as_millis() as u64,
                error = %err,
                "join/sync failed, retrying"
            );
            self.transition(inner, GroupState::Rebalancing);
            tokio::time::sleep(delay).await;
        }
    }

    async fn join_and_sync(
        &self,
        inner: &mut Inner,
    ) -> Result<ConsumerGroupMemberAssignment, ClientError> {
        let conn = self.coordinator(inner).await?;
        let response = self.join(inner, &conn).await?;

        let plan = if response.is_leader() {
            let (plan, universe) = self.assign(&response).await?;
            inner.assigned_counts = Some(
                universe
                    .iter()
                    .map(|(topic, partitions)| (topic.clone(), partitions.len()))
                    .collect(),
            );
            plan
        } else {
            inner.assigned_counts = None;
            GroupAssignment::new()
        };

        self.sync(inner, &conn, plan).await
    }

    async fn join(&self, inner: &mut Inner, conn: &Connection) -> Result<JoinGroupResponse, ClientError> {
        let settings = &self.shared.settings;
        let version = conn.negotiate_version::<JoinGroupRequest>()?;
        self.transition(inner, GroupState::Joining);
        let mut member_id_assigned = false;

        loop {
            let mut request = JoinGroupRequest::new(version);
            request.group_id = settings.group_id.clone();
            request.session_timeout_ms = millis_i32(settings.session_timeout);
            request.rebalance_timeout_ms = millis_i32(settings.rebalance_timeout);
            request.member_id = inner.membership.member_id.clone();
            request.group_instance_id = settings.group_instance_id.clone();
            request.protocol_type = CONSUMER_PROTOCOL_TYPE.to_string();
            for assignor in &self.shared.assignors {
                request.add_group_protocol(assignor.name(), assignor.metadata(&settings.topics)?);
            }

            self.shared.metrics.record_join();
            // the broker holds JoinGroup until every member has rejoined
            let timeout = settings.rebalance_timeout + settings.request_timeout;
            let response = self
                .send_to_coordinator_with_timeout(inner, conn, &request, timeout)
                .await?;

            match response.error() {
                KafkaErrorCode::NoError => {
                    let membership = &mut inner.membership;
                    membership.member_id = response.member_id.clone();
                    membership.generation_id = response.generation_id;
                    membership.protocol_name = Some(response.protocol_name.clone());
                    membership.leader_id = response.leader.clone();

                    let leader = response.is_leader();
                    info!(
                        group_id = %settings.group_id,
                        member_id = %response.member_id,
                        generation_id = response.generation_id,
                        leader,
                        protocol = %response.protocol_name,
                        "joined group"
                    );
                    self.transition(inner, GroupState::Joined { leader });
                    return Ok(response);
                }
                // one immediate rejoin per call; a repeat counts as a failed attempt
                KafkaErrorCode::MemberIdRequired if !member_id_assigned => {
                    member_id_assigned = true;
                    info!(
                        group_id = %settings.group_id,
                        member_id = %response.member_id,
                        "broker assigned member id, rejoining"
                    );
                    inner.membership.member_id = response.member_id.clone();
                }
                code => {
                    if code == KafkaErrorCode::MemberIdRequired {
                        inner.membership.member_id = response.member_id.clone();
                    }
                    return Err(self.apply_group_error(inner, code, "join group"));
                }
            }
        }
    }

    async fn assign(
        &self,
        response: &JoinGroupResponse,
    ) -> Result<(GroupAssignment, PartitionUniverse), ClientError> {
        let assignor = self
            .shared
            .assignors
            .iter()
            .find(|a| a.name() == response.protocol_name)
            .ok_or_else(|| {
                ClientError::protocol_violation(
                    self.group_id(),
                    format!("broker selected unknown protocol '{}'", response.protocol_name),
                )
            })?;

        let members: MemberSubscriptions = response.members_metadata()?.into_iter().collect();
        let mut topics: Vec<String> = members
            .values()
            .flat_map(|meta| meta.topics.iter().cloned())
            .collect();
        topics.sort();
        topics.dedup();

        let universe = self.partition_universe(topics).await?;
        let plan = assignor.assign(&members, &universe);
        debug!(
            group_id = %self.group_id(),
            assignor = assignor.name(),
            members = members.len(),
            topics = universe.len(),
            "computed group assignment"
        );
        Ok((plan, universe))
    }

    async fn partition_universe(&self, topics: Vec<String>) -> Result<PartitionUniverse, ClientError> {
        let conn = self.shared.pool.get_connection().await?;
        let version = conn.negotiate_version::<MetadataRequest>()?;
        let response = conn.send(&MetadataRequest::for_topics(version, topics)).await?;
        self.shared.pool.update_nodes(&response.brokers);

        let mut universe = PartitionUniverse::new();
        for topic in &response.topics {
            if !topic.error().is_ok() {
                warn!(topic = %topic.name, error = %topic.error(), "skipping topic in assignment");
                continue;
            }
            let partitions = topic.partitions.iter().map(|p| p.partition_index).collect();
            universe.insert(topic.name.clone(), partitions);
        }
        Ok(universe)
    }

    async fn sync(
        &self,
        inner: &mut Inner,
        conn: &Connection,
        plan: GroupAssignment,
    ) -> Result<ConsumerGroupMemberAssignment, ClientError> {
        let settings = &self.shared.settings;
        let version = conn.negotiate_version::<SyncGroupRequest>()?;
        self.transition(inner, GroupState::Syncing);

        let mut request = SyncGroupRequest::new(version);
        request.group_id = settings.group_id.clone();
        request.generation_id = inner.membership.generation_id;
        request.member_id = inner.membership.member_id.clone();
        request.group_instance_id = settings.group_instance_id.clone();
        for (member_id, assignment) in &plan {
            request.add_assignment(member_id.clone(), assignment)?;
        }

        let response = self.send_to_coordinator(inner, conn, &request).await?;
        if !response.error().is_ok() {
            return Err(self.apply_group_error(inner, response.error(), "sync group"));
        }

        let assignment = response.member_assignment()?;
        info!(
            group_id = %settings.group_id,
            member_id = %inner.membership.member_id,
            generation_id = inner.membership.generation_id,
            partitions = assignment.partition_count(),
            "synced group"
        );
        inner.membership.assignment = assignment.clone();
        self.transition(inner, GroupState::Stable);
        self.start_heartbeat(inner);
        Ok(assignment)
    }

    // ------------------------------------------------------------------------
    // Heartbeat / leave
    // ------------------------------------------------------------------------

    async fn heartbeat_locked(&self, inner: &mut Inner) -> Result<(), ClientError> {
        if inner.state != GroupState::Stable {
            return Err(self.not_member(inner));
        }

        let conn = self.coordinator(inner).await?;
        let version = conn.negotiate_version::<HeartbeatRequest>()?;
        let mut request = HeartbeatRequest::new(version);
        request.group_id = self.group_id().to_string();
        request.generation_id = inner.membership.generation_id;
        request.member_id = inner.membership.member_id.clone();
        request.group_instance_id = self.shared.settings.group_instance_id.clone();

        self.shared.metrics.record_heartbeat();
        let response = self.send_to_coordinator(inner, &conn, &request).await?;
        let code = response.error();
        if code.is_ok() {
            return Ok(());
        }

        match self.apply_group_error(inner, code, "heartbeat") {
            err @ ClientError::GroupFatal { .. } => Err(err),
            err => {
                if code.group_error_class() == Some(GroupErrorClass::Other) {
                    return Err(err);
                }
                debug!(group_id = %self.group_id(), %code, "heartbeat requested rejoin");
                self.transition(inner, GroupState::Rebalancing);
                Ok(())
            }
        }
    }

    fn start_heartbeat(&self, inner: &mut Inner) {
        self.stop_heartbeat(inner);

        let shared = Arc::downgrade(&self.shared);
        let interval = self.shared.settings.heartbeat_interval;
        let generation_id = inner.membership.generation_id;
        inner.heartbeat = Some(tokio::spawn(heartbeat_loop(shared, interval, generation_id)));
    }

    fn stop_heartbeat(&self, inner: &mut Inner) {
        if let Some(handle) = inner.heartbeat.take() {
            handle.abort();
        }
    }

    async fn leave(&self, inner: &mut Inner, send_leave: bool) -> Result<(), ClientError> {
        self.stop_heartbeat(inner);
        if inner.state == GroupState::Left {
            return Ok(());
        }

        let result = if send_leave && !inner.membership.member_id.is_empty() {
            self.send_leave(inner).await
        } else {
            Ok(())
        };
        if let Err(e) = &result {
            warn!(group_id = %self.group_id(), error = %e, "leave group failed");
        }

        inner.membership.reset();
        inner.assigned_counts = None;
        self.transition(inner, GroupState::Left);
        result
    }

    async fn send_leave(&self, inner: &mut Inner) -> Result<(), ClientError> {
        let conn = self.coordinator(inner).await?;
        let version = conn.negotiate_version::<LeaveGroupRequest>()?;
        let request = LeaveGroupRequest::for_member(
            version,
            self.group_id(),
            inner.membership.member_id.clone(),
            self.shared.settings.group_instance_id.clone(),
        );

        let response = self.send_to_coordinator(inner, &conn, &request).await?;
        match response.error() {
            KafkaErrorCode::NoError | KafkaErrorCode::UnknownMemberId => {}
            code => return Err(ClientError::broker(code, "leave group")),
        }
        for member in &response.members {
            let code = KafkaErrorCode::from_i16(member.error_code);
            if !code.is_ok() && code != KafkaErrorCode::UnknownMemberId {
                warn!(group_id = %self.group_id(), member_id = %member.member_id, %code, "member leave failed");
            }
        }
        info!(
            group_id = %self.group_id(),
            member_id = %inner.membership.member_id,
            "left group"
        );
        Ok(())
    }

    // ------------------------------------------------------------------------
    // Coordinator plumbing
    // ------------------------------------------------------------------------

    async fn coordinator(&self, inner: &mut Inner) -> Result<Arc<Connection>, ClientError> {
        let pool = &self.shared.pool;
        if let Some(node) = inner.membership.coordinator.clone() {
            match pool.get_connection_to(&node.address).await {
                Ok(conn) => return Ok(conn),
                Err(e) => {
                    debug!(group_id = %self.group_id(), error = %e, "coordinator unreachable");
                    inner.membership.coordinator = None;
                    return Err(e);
                }
            }
        }

        let conn = pool.get_connection().await?;
        let version = conn.negotiate_version::<FindCoordinatorRequest>()?;
        let response = conn
            .send(&FindCoordinatorRequest::group(version, self.group_id()))
            .await?;
        if !response.error().is_ok() {
            return Err(self.apply_group_error(inner, response.error(), "find coordinator"));
        }

        let node = CoordinatorNode {
            node_id: response.node_id,
            address: response.address(),
        };
        info!(
            group_id = %self.group_id(),
            node_id = node.node_id,
            broker = %node.address,
            "found group coordinator"
        );
        pool.set_node(node.node_id, node.address.clone());
        inner.membership.coordinator = Some(node.clone());
        pool.get_connection_to(&node.address).await
    }

    async fn send_to_coordinator<R: ApiRequest>(
        &self,
        inner: &mut Inner,
        conn: &Connection,
        request: &R,
    ) -> Result<R::Response, ClientError> {
        let timeout = self.shared.settings.request_timeout;
        self.send_to_coordinator_with_timeout(inner, conn, request, timeout)
            .await
    }

    /// Send to the coordinator; a transport failure forgets the coordinator
    /// so the next attempt looks it up again.
    async fn send_to_coordinator_with_timeout<R: ApiRequest>(
        &self,
        inner: &mut Inner,
        conn: &Connection,
        request: &R,
        timeout: Duration,
    ) -> Result<R::Response, ClientError> {
        match conn.send_with_timeout(request, timeout).await {
            Ok(response) => Ok(response),
            Err(e) => {
                if e.is_connection_error() || e.is_timeout() {
                    inner.membership.coordinator = None;
                }
                Err(e)
            }
        }
    }

    fn can_retry(&self, inner: &mut Inner, err: &ClientError) -> bool {
        match err.broker_code().and_then(KafkaErrorCode::group_error_class) {
            Some(GroupErrorClass::Retry | GroupErrorClass::Rejoin | GroupErrorClass::ResetMember) => {
                true
            }
            Some(GroupErrorClass::Fatal) => false,
            Some(GroupErrorClass::Other) | None => {
                if err.is_connection_error() || err.is_timeout() || err.is_retryable() {
                    inner.membership.coordinator = None;
                    true
                } else {
                    false
                }
            }
        }
    }

    /// Apply what a group error code means to the membership and return the
    /// error to report.
    fn apply_group_error(&self, inner: &mut Inner, code: KafkaErrorCode, context: &str) -> ClientError {
        let class = code.group_error_class().unwrap_or(GroupErrorClass::Other);
        match class {
            GroupErrorClass::Fatal => {
                warn!(group_id = %self.group_id(), %code, context, "fatal group error");
                self.stop_heartbeat(inner);
                inner.membership.reset();
                inner.assigned_counts = None;
                if inner.state != GroupState::Left {
                    inner.fatal = Some(code);
                }
                self.transition(inner, GroupState::Left);
                return ClientError::GroupFatal {
                    group_id: self.group_id().to_string(),
                    code,
                };
            }
            GroupErrorClass::ResetMember => {
                if code == KafkaErrorCode::UnknownMemberId {
                    inner.membership.member_id.clear();
                }
                inner.membership.generation_id = -1;
                self.transition(inner, GroupState::Rebalancing);
            }
            GroupErrorClass::Rejoin => self.transition(inner, GroupState::Rebalancing),
            GroupErrorClass::Retry => {
                if code.is_coordinator_error() {
                    inner.membership.coordinator = None;
                }
            }
            GroupErrorClass::Other => {}
        }
        debug!(group_id = %self.group_id(), %code, context, "group error");
        ClientError::broker(code, context)
    }

    fn ensure_not_left(&self, inner: &Inner) -> Result<(), ClientError> {
        if inner.state == GroupState::Left {
            Err(self.not_member(inner))
        } else {
            Ok(())
        }
    }

    /// Error for a call that needs membership. A member that left on a fatal
    /// group error keeps reporting that error.
    fn not_member(&self, inner: &Inner) -> ClientError {
        match inner.fatal {
            Some(code) if inner.state == GroupState::Left => ClientError::GroupFatal {
                group_id: self.group_id().to_string(),
                code,
            },
            _ => ClientError::NotMember,
        }
    }

    fn transition(&self, inner: &mut Inner, next: GroupState) {
        let previous = inner.state;
        if previous == next {
            return;
        }
        if previous == GroupState::Left {
            debug!(group_id = %self.group_id(), to = ?next, "ignoring transition out of Left");
            return;
        }
        if next == GroupState::Rebalancing {
            self.shared.metrics.record_rebalance();
        }
        info!(
            group_id = %self.group_id(),
            member_id = %inner.membership.member_id,
            generation_id = inner.membership.generation_id,
            from = ?previous,
            to = ?next,
            "group state transition"
        );
        inner.state = next;
    }
}

async fn heartbeat_loop(shared: Weak<Shared>, interval: Duration, generation_id: i32) {
    let mut ticker = interval_at(Instant::now() + interval, interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        ticker.tick().await;
        let Some(shared) = shared.upgrade() else {
            break;
        };
        let coordinator = GroupCoordinator { shared };
        let mut inner = coordinator.shared.inner.lock().await;
        if inner.state != GroupState::Stable || inner.membership.generation_id != generation_id {
            break;
        }

        match coordinator.heartbeat_locked(&mut inner).await {
            Ok(()) if inner.state == GroupState::Stable => {}
            Ok(()) => {
                debug!(group_id = %coordinator.group_id(), "heartbeat loop stopping for rebalance");
                break;
            }
            Err(e @ ClientError::GroupFatal { .. }) => {
                warn!(group_id = %coordinator.group_id(), error = %e, "heartbeat loop stopping");
                break;
            }
            Err(e) => {
                warn!(group_id = %coordinator.group_id(), error = %e, "heartbeat failed");
            }
        }
    }
}

fn millis_i32(duration: Duration) -> i32 {
    duration.as_millis().min(i32::MAX as u128) as i32
}
