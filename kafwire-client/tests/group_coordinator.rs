mod common;

use common::{client_config, metadata_response, FakeCluster, Received};
use kafwire::protocol::kafka::messages::{
    ConsumerGroupMemberAssignment, ConsumerGroupMemberMetadata, FindCoordinatorRequest,
    FindCoordinatorResponse, HeartbeatResponse, JoinGroupRequest, JoinGroupResponse,
    JoinGroupResponseMember, LeaveGroupRequest, LeaveGroupResponse, MetadataRequest,
    OffsetCommitRequest, OffsetCommitResponse, OffsetCommitResponsePartition,
    OffsetCommitResponseTopic, OffsetFetchRequest, OffsetFetchResponse,
    OffsetFetchResponsePartition, OffsetFetchResponseTopic, SyncGroupRequest, SyncGroupResponse,
};
use kafwire::protocol::kafka::{
    API_KEY_FIND_COORDINATOR, API_KEY_HEARTBEAT, API_KEY_JOIN_GROUP, API_KEY_LEAVE_GROUP,
    API_KEY_METADATA, API_KEY_OFFSET_COMMIT, API_KEY_OFFSET_FETCH, API_KEY_SYNC_GROUP,
};
use kafwire::KafkaErrorCode;
use kafwire_client::assignor::{Assignor, RangeAssignor, RoundRobinAssignor};
use kafwire_client::connection::{ConnectionOptions, ConnectionPool};
use kafwire_client::coordinator::{GroupCoordinator, GroupSettings, GroupState};
use kafwire_client::{ClientError, ConsumerConfig, TopicPartition};
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicI16, AtomicI32, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

const GROUP: &str = "orders-group";
const TOPIC: &str = "orders";

/// Scripted answers for one group. Anything not overridden succeeds.
#[derive(Default)]
struct Script {
    join_errors: Mutex<Vec<KafkaErrorCode>>,
    join_error_always: AtomicI16,
    heartbeat_error: AtomicI16,
    commit_error: AtomicI16,
    generation: AtomicI32,
    follower: AtomicBool,
    joins: AtomicUsize,
    sync_assignments: Mutex<Vec<usize>>,
    committed: Mutex<Vec<(String, i32, i64)>>,
}

impl Script {
    fn handle(&self, request: &Received) -> Option<bytes::Bytes> {
        let version = request.version();
        match request.api_key() {
            API_KEY_FIND_COORDINATOR => {
                let body: FindCoordinatorRequest = request.decode();
                assert_eq!(body.key, GROUP);
                let mut response = FindCoordinatorResponse::new(version);
                response.node_id = 1;
                response.host = "broker".to_string();
                response.port = 9092;
                request.respond(&response)
            }
            API_KEY_JOIN_GROUP => request.respond(&self.join(request.decode(), version)),
            API_KEY_METADATA => {
                let body: MetadataRequest = request.decode();
                assert_eq!(body.topics, Some(vec![TOPIC.to_string()]));
                request.respond(&metadata_response(version, &[(TOPIC, 3)]))
            }
            API_KEY_SYNC_GROUP => request.respond(&self.sync(request.decode(), version)),
            API_KEY_HEARTBEAT => {
                let mut response = HeartbeatResponse::new(version);
                response.error_code = self.heartbeat_error.load(Ordering::SeqCst);
                request.respond(&response)
            }
            API_KEY_LEAVE_GROUP => {
                let body: LeaveGroupRequest = request.decode();
                assert_eq!(body.group_id, GROUP);
                request.respond(&LeaveGroupResponse::new(version))
            }
            API_KEY_OFFSET_COMMIT => {
                let body: OffsetCommitRequest = request.decode();
                let error_code = self.commit_error.load(Ordering::SeqCst);
                let mut response = OffsetCommitResponse::new(version);
                for topic in &body.topics {
                    let mut partitions = Vec::new();
                    for p in &topic.partitions {
                        if error_code == 0 {
                            self.committed.lock().push((
                                topic.name.clone(),
                                p.partition_index,
                                p.committed_offset,
                            ));
                        }
                        partitions.push(OffsetCommitResponsePartition {
                            partition_index: p.partition_index,
                            error_code,
                        });
                    }
                    response.topics.push(OffsetCommitResponseTopic {
                        name: topic.name.clone(),
                        partitions,
                    });
                }
                request.respond(&response)
            }
            API_KEY_OFFSET_FETCH => {
                let body: OffsetFetchRequest = request.decode();
                let committed = self.committed.lock().clone();
                let mut response = OffsetFetchResponse::new(version);
                for topic in body.topics.unwrap_or_default() {
                    let partitions = topic
                        .partition_indexes
                        .iter()
                        .map(|&p| OffsetFetchResponsePartition {
                            partition_index: p,
                            committed_offset: committed
                                .iter()
                                .rev()
                                .find(|(t, cp, _)| *t == topic.name && *cp == p)
                                .map_or(-1, |(_, _, o)| *o),
                            ..OffsetFetchResponsePartition::default()
                        })
                        .collect();
                    response.topics.push(OffsetFetchResponseTopic {
                        name: topic.name,
                        partitions,
                    });
                }
                request.respond(&response)
            }
            other => panic!("unexpected api key {}", other),
        }
    }

    fn join(&self, body: JoinGroupRequest, version: i16) -> JoinGroupResponse {
        self.joins.fetch_add(1, Ordering::SeqCst);
        assert_eq!(body.group_id, GROUP);
        let names: Vec<&str> = body.protocols.iter().map(|p| p.name.as_str()).collect();
        assert_eq!(names, vec!["range", "roundrobin"]);

        let mut response = JoinGroupResponse::new(version);
        let always = self.join_error_always.load(Ordering::SeqCst);
        if always != 0 {
            response.error_code = always;
            return response;
        }
        let scripted = {
            let mut errors = self.join_errors.lock();
            (!errors.is_empty()).then(|| errors.remove(0))
        };
        match scripted {
            Some(KafkaErrorCode::MemberIdRequired) => {
                assert_eq!(body.member_id, "");
                response.error_code = KafkaErrorCode::MemberIdRequired.as_i16();
                response.member_id = "member-1".to_string();
                return response;
            }
            Some(code) => {
                response.error_code = code.as_i16();
                return response;
            }
            None => {}
        }

        let member_id = if body.member_id.is_empty() {
            "member-1".to_string()
        } else {
            body.member_id.clone()
        };
        response.generation_id = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        response.protocol_name = "range".to_string();
        response.member_id = member_id.clone();
        if self.follower.load(Ordering::SeqCst) {
            response.leader = "member-0".to_string();
        } else {
            response.leader = member_id.clone();
            response.members.push(JoinGroupResponseMember {
                member_id,
                group_instance_id: None,
                metadata: ConsumerGroupMemberMetadata::new(vec![TOPIC.to_string()])
                    .encode_to_bytes()
                    .unwrap(),
            });
        }
        response
    }

    fn sync(&self, body: SyncGroupRequest, version: i16) -> SyncGroupResponse {
        self.sync_assignments.lock().push(body.assignments.len());
        let mut response = SyncGroupResponse::new(version);
        let mine = if self.follower.load(Ordering::SeqCst) {
            ConsumerGroupMemberAssignment::new(BTreeMap::from([(TOPIC.to_string(), vec![1])]))
        } else {
            let entry = body
                .assignments
                .iter()
                .find(|a| a.member_id == body.member_id)
                .expect("leader assigns itself");
            ConsumerGroupMemberAssignment::decode_from(&entry.assignment).unwrap()
        };
        response.assignment = mine.encode_to_bytes().unwrap();
        response
    }
}

struct Harness {
    script: Arc<Script>,
    cluster: FakeCluster,
    coordinator: GroupCoordinator,
}

fn settings(configure: impl FnOnce(&mut ConsumerConfig)) -> GroupSettings {
    let mut config = ConsumerConfig {
        client_config: client_config(),
        group_id: GROUP.to_string(),
        topics: vec![TOPIC.to_string()],
        session_timeout: Duration::from_secs(10),
        heartbeat_interval: Duration::from_secs(3),
        rebalance_timeout: Duration::from_secs(1),
        ..ConsumerConfig::default()
    };
    configure(&mut config);
    GroupSettings::from(&config)
}

fn harness(configure: impl FnOnce(&mut ConsumerConfig)) -> Harness {
    let script = Arc::new(Script::default());
    let handler_script = script.clone();
    let cluster = FakeCluster::new(move |_, request| handler_script.handle(request));
    let config = client_config();
    let pool = Arc::new(ConnectionPool::new(
        config.brokers.clone(),
        Arc::new(cluster.clone()),
        ConnectionOptions::from(&config),
    ));
    let assignors: Vec<Arc<dyn Assignor>> =
        vec![Arc::new(RangeAssignor), Arc::new(RoundRobinAssignor)];
    let coordinator = GroupCoordinator::new(settings(configure), pool, assignors).unwrap();
    Harness {
        script,
        cluster,
        coordinator,
    }
}

#[tokio::test]
async fn test_leader_joins_assigns_and_becomes_stable() {
    let h = harness(|_| {});
    assert_eq!(h.coordinator.state().await, GroupState::Unjoined);

    let assignment = h.coordinator.ensure_active().await.unwrap();
    assert_eq!(assignment.topics[TOPIC], vec![0, 1, 2]);
    assert_eq!(h.coordinator.state().await, GroupState::Stable);

    let membership = h.coordinator.membership().await;
    assert_eq!(membership.member_id, "member-1");
    assert_eq!(membership.generation_id, 1);
    assert_eq!(membership.leader_id, "member-1");
    assert_eq!(membership.protocol_name.as_deref(), Some("range"));
    assert_eq!(membership.coordinator.unwrap().address, "broker:9092");

    // leader sent one assignment per member and asked for the topic's metadata
    assert_eq!(*h.script.sync_assignments.lock(), vec![1]);
    assert_eq!(h.cluster.count(API_KEY_METADATA), 1);

    // already stable: no further join
    h.coordinator.ensure_active().await.unwrap();
    assert_eq!(h.cluster.count(API_KEY_JOIN_GROUP), 1);
}

#[tokio::test]
async fn test_follower_receives_assignment_from_sync() {
    let h = harness(|_| {});
    h.script.follower.store(true, Ordering::SeqCst);

    let assignment = h.coordinator.ensure_active().await.unwrap();
    assert_eq!(assignment.topics[TOPIC], vec![1]);
    assert_eq!(*h.script.sync_assignments.lock(), vec![0]);
    assert_eq!(h.cluster.count(API_KEY_METADATA), 0);
    assert_eq!(h.coordinator.membership().await.leader_id, "member-0");
}

#[tokio::test]
async fn test_member_id_required_is_retried_with_assigned_id() {
    let h = harness(|_| {});
    h.script
        .join_errors
        .lock()
        .push(KafkaErrorCode::MemberIdRequired);

    h.coordinator.ensure_active().await.unwrap();

    let joins: Vec<JoinGroupRequest> = h
        .cluster
        .requests()
        .iter()
        .filter(|r| r.api_key() == API_KEY_JOIN_GROUP)
        .map(|r| r.decode())
        .collect();
    assert_eq!(joins.len(), 2);
    assert_eq!(joins[0].member_id, "");
    assert_eq!(joins[1].member_id, "member-1");
    assert_eq!(h.coordinator.state().await, GroupState::Stable);
}

#[tokio::test]
async fn test_heartbeat_rebalance_in_progress_moves_to_rebalancing() {
    let h = harness(|_| {});
    h.coordinator.ensure_active().await.unwrap();

    h.script
        .heartbeat_error
        .store(KafkaErrorCode::RebalanceInProgress.as_i16(), Ordering::SeqCst);
    h.coordinator.heartbeat().await.unwrap();
    assert_eq!(h.coordinator.state().await, GroupState::Rebalancing);

    // member id survives; the next ensure_active rejoins into a new generation
    h.script.heartbeat_error.store(0, Ordering::SeqCst);
    h.coordinator.ensure_active().await.unwrap();
    let membership = h.coordinator.membership().await;
    assert_eq!(membership.member_id, "member-1");
    assert_eq!(membership.generation_id, 2);
    assert_eq!(h.coordinator.state().await, GroupState::Stable);
}

#[tokio::test]
async fn test_heartbeat_unknown_member_resets_identity() {
    let h = harness(|_| {});
    h.coordinator.ensure_active().await.unwrap();

    h.script
        .heartbeat_error
        .store(KafkaErrorCode::UnknownMemberId.as_i16(), Ordering::SeqCst);
    h.coordinator.heartbeat().await.unwrap();

    let membership = h.coordinator.membership().await;
    assert_eq!(h.coordinator.state().await, GroupState::Rebalancing);
    assert_eq!(membership.member_id, "");
    assert_eq!(membership.generation_id, -1);
}

#[tokio::test]
async fn test_heartbeat_outside_stable_is_not_member() {
    let h = harness(|_| {});
    assert!(matches!(
        h.coordinator.heartbeat().await,
        Err(ClientError::NotMember)
    ));
    assert_eq!(h.cluster.count(API_KEY_HEARTBEAT), 0);
}

#[tokio::test]
async fn test_group_authorization_failure_is_fatal() {
    let h = harness(|_| {});
    h.script
        .join_errors
        .lock()
        .push(KafkaErrorCode::GroupAuthorizationFailed);

    let err = h.coordinator.ensure_active().await.unwrap_err();
    assert!(matches!(
        err,
        ClientError::GroupFatal { ref group_id, code: KafkaErrorCode::GroupAuthorizationFailed }
            if group_id == GROUP
    ));
    assert_eq!(h.coordinator.state().await, GroupState::Left);

    // the member stays out and keeps reporting why
    assert!(matches!(
        h.coordinator.ensure_active().await,
        Err(ClientError::GroupFatal { code: KafkaErrorCode::GroupAuthorizationFailed, .. })
    ));
    assert_eq!(h.cluster.count(API_KEY_JOIN_GROUP), 1);
}

#[tokio::test]
async fn test_fatal_heartbeat_error_reaches_the_consumer() {
    let h = harness(|config| {
        config.session_timeout = Duration::from_millis(500);
        config.heartbeat_interval = Duration::from_millis(50);
    });
    h.coordinator.ensure_active().await.unwrap();

    h.script.heartbeat_error.store(
        KafkaErrorCode::GroupAuthorizationFailed.as_i16(),
        Ordering::SeqCst,
    );
    for _ in 0..100 {
        if h.coordinator.state().await == GroupState::Left {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(h.coordinator.state().await, GroupState::Left);

    let err = h.coordinator.ensure_active().await.unwrap_err();
    assert!(matches!(
        err,
        ClientError::GroupFatal { ref group_id, code: KafkaErrorCode::GroupAuthorizationFailed }
            if group_id == GROUP
    ));
    let offsets = BTreeMap::from([(TopicPartition::new(TOPIC, 0), 1)]);
    assert!(matches!(
        h.coordinator.commit_offsets(&offsets).await,
        Err(ClientError::GroupFatal { .. })
    ));
    assert_eq!(h.cluster.count(API_KEY_JOIN_GROUP), 1);
}

#[tokio::test]
async fn test_repeated_member_id_required_is_bounded() {
    let h = harness(|config| {
        config.max_rebalance_retries = 3;
        config.rebalance_budget = Duration::from_millis(500);
    });
    h.script.join_error_always.store(
        KafkaErrorCode::MemberIdRequired.as_i16(),
        Ordering::SeqCst,
    );

    let err = tokio::time::timeout(Duration::from_secs(5), h.coordinator.ensure_active())
        .await
        .expect("join gave up within its budget")
        .unwrap_err();
    assert!(matches!(err, ClientError::RebalanceTimeout { .. }));

    // at most one immediate rejoin per counted attempt
    let joins = h.cluster.count(API_KEY_JOIN_GROUP);
    assert!((2..=6).contains(&joins), "joins sent: {}", joins);
    assert_eq!(h.coordinator.state().await, GroupState::Rebalancing);
}

#[tokio::test]
async fn test_fenced_static_member_rejoins() {
    let h = harness(|config| config.group_instance_id = Some("instance-a".to_string()));
    h.coordinator.ensure_active().await.unwrap();

    h.script
        .heartbeat_error
        .store(KafkaErrorCode::FencedInstanceId.as_i16(), Ordering::SeqCst);
    h.coordinator.heartbeat().await.unwrap();
    assert_eq!(h.coordinator.state().await, GroupState::Rebalancing);
    assert_eq!(h.coordinator.membership().await.member_id, "member-1");

    h.script.heartbeat_error.store(0, Ordering::SeqCst);
    h.script
        .join_errors
        .lock()
        .push(KafkaErrorCode::FencedInstanceId);
    h.coordinator.ensure_active().await.unwrap();
    assert_eq!(h.coordinator.state().await, GroupState::Stable);
    assert_eq!(h.cluster.count(API_KEY_JOIN_GROUP), 3);
}

#[tokio::test]
async fn test_coordinator_errors_exhaust_rebalance_retries() {
    let h = harness(|config| config.max_rebalance_retries = 3);
    h.script.join_error_always.store(
        KafkaErrorCode::CoordinatorLoadInProgress.as_i16(),
        Ordering::SeqCst,
    );

    let err = h.coordinator.ensure_active().await.unwrap_err();
    assert!(matches!(err, ClientError::RebalanceTimeout { attempts: 3, .. }));
    assert_eq!(h.cluster.count(API_KEY_JOIN_GROUP), 3);
    // the coordinator is looked up again after every coordinator error
    assert_eq!(h.cluster.count(API_KEY_FIND_COORDINATOR), 3);
    assert_eq!(h.coordinator.state().await, GroupState::Rebalancing);
}

#[tokio::test]
async fn test_transient_join_error_recovers() {
    let h = harness(|_| {});
    h.script
        .join_errors
        .lock()
        .extend([KafkaErrorCode::NotCoordinator, KafkaErrorCode::RebalanceInProgress]);

    h.coordinator.ensure_active().await.unwrap();
    assert_eq!(h.script.joins.load(Ordering::SeqCst), 3);
    assert_eq!(h.coordinator.state().await, GroupState::Stable);
}

#[tokio::test]
async fn test_handle_group_error_only_surfaces_fatal_codes() {
    let h = harness(|_| {});
    h.coordinator.ensure_active().await.unwrap();

    h.coordinator
        .handle_group_error(KafkaErrorCode::RebalanceInProgress)
        .await
        .unwrap();
    assert_eq!(h.coordinator.state().await, GroupState::Rebalancing);

    let err = h
        .coordinator
        .handle_group_error(KafkaErrorCode::InvalidGroupId)
        .await
        .unwrap_err();
    assert!(matches!(err, ClientError::GroupFatal { .. }));
    assert_eq!(h.coordinator.state().await, GroupState::Left);
}

#[tokio::test]
async fn test_request_rebalance_triggers_rejoin() {
    let h = harness(|_| {});
    h.coordinator.ensure_active().await.unwrap();

    h.coordinator.request_rebalance("new partitions").await;
    assert_eq!(h.coordinator.state().await, GroupState::Rebalancing);

    h.coordinator.ensure_active().await.unwrap();
    assert_eq!(h.cluster.count(API_KEY_JOIN_GROUP), 2);
}

#[tokio::test]
async fn test_leader_rebalances_when_subscribed_topic_grows() {
    let h = harness(|_| {});
    h.coordinator.ensure_active().await.unwrap();

    // same count as the assignment was built from, and unrelated topics
    let unchanged = BTreeMap::from([(TOPIC.to_string(), 3), ("other".to_string(), 8)]);
    assert!(!h.coordinator.observe_partition_counts(&unchanged).await);
    assert_eq!(h.coordinator.state().await, GroupState::Stable);

    let grown = BTreeMap::from([(TOPIC.to_string(), 4)]);
    assert!(h.coordinator.observe_partition_counts(&grown).await);
    assert_eq!(h.coordinator.state().await, GroupState::Rebalancing);

    h.coordinator.ensure_active().await.unwrap();
    assert_eq!(h.cluster.count(API_KEY_JOIN_GROUP), 2);
}

#[tokio::test]
async fn test_follower_ignores_partition_counts() {
    let h = harness(|_| {});
    h.script.follower.store(true, Ordering::SeqCst);
    h.coordinator.ensure_active().await.unwrap();

    let grown = BTreeMap::from([(TOPIC.to_string(), 10)]);
    assert!(!h.coordinator.observe_partition_counts(&grown).await);
    assert_eq!(h.coordinator.state().await, GroupState::Stable);
}

#[tokio::test]
async fn test_commit_and_fetch_committed_offsets() {
    let h = harness(|_| {});
    let tp = TopicPartition::new(TOPIC, 2);
    let offsets = BTreeMap::from([(tp.clone(), 42)]);

    assert!(matches!(
        h.coordinator.commit_offsets(&offsets).await,
        Err(ClientError::NotMember)
    ));

    h.coordinator.ensure_active().await.unwrap();
    h.coordinator.commit_offsets(&offsets).await.unwrap();

    let commit: OffsetCommitRequest = h
        .cluster
        .requests()
        .iter()
        .find(|r| r.api_key() == API_KEY_OFFSET_COMMIT)
        .unwrap()
        .decode();
    assert_eq!(commit.generation_id, 1);
    assert_eq!(commit.member_id, "member-1");

    let committed = h
        .coordinator
        .fetch_committed(&[tp.clone(), TopicPartition::new(TOPIC, 0)])
        .await
        .unwrap();
    assert_eq!(committed.get(&tp), Some(&42));
    assert!(!committed.contains_key(&TopicPartition::new(TOPIC, 0)));
}

#[tokio::test]
async fn test_commit_during_rebalance_marks_rebalancing() {
    let h = harness(|_| {});
    h.coordinator.ensure_active().await.unwrap();
    h.script
        .commit_error
        .store(KafkaErrorCode::RebalanceInProgress.as_i16(), Ordering::SeqCst);

    let offsets = BTreeMap::from([(TopicPartition::new(TOPIC, 0), 1)]);
    let err = h.coordinator.commit_offsets(&offsets).await.unwrap_err();
    assert_eq!(err.broker_code(), Some(KafkaErrorCode::RebalanceInProgress));
    assert_eq!(h.coordinator.state().await, GroupState::Rebalancing);
}

#[tokio::test]
async fn test_leave_group_sends_leave_and_resets() {
    let h = harness(|_| {});
    h.coordinator.ensure_active().await.unwrap();

    h.coordinator.leave_group().await.unwrap();
    assert_eq!(h.coordinator.state().await, GroupState::Left);
    assert_eq!(h.cluster.count(API_KEY_LEAVE_GROUP), 1);

    let membership = h.coordinator.membership().await;
    assert_eq!(membership.member_id, "");
    assert_eq!(membership.generation_id, -1);

    // leaving twice is a no-op
    h.coordinator.leave_group().await.unwrap();
    assert_eq!(h.cluster.count(API_KEY_LEAVE_GROUP), 1);
}

#[tokio::test]
async fn test_static_member_close_skips_leave() {
    let h = harness(|config| config.group_instance_id = Some("instance-a".to_string()));
    h.coordinator.ensure_active().await.unwrap();

    let join: JoinGroupRequest = h
        .cluster
        .requests()
        .iter()
        .find(|r| r.api_key() == API_KEY_JOIN_GROUP)
        .unwrap()
        .decode();
    assert_eq!(join.group_instance_id.as_deref(), Some("instance-a"));

    h.coordinator.close().await.unwrap();
    assert_eq!(h.coordinator.state().await, GroupState::Left);
    assert_eq!(h.cluster.count(API_KEY_LEAVE_GROUP), 0);
}

#[tokio::test]
async fn test_background_heartbeats_keep_member_stable() {
    let h = harness(|config| {
        config.session_timeout = Duration::from_millis(500);
        config.heartbeat_interval = Duration::from_millis(20);
    });
    h.coordinator.ensure_active().await.unwrap();

    let mut beats = 0;
    for _ in 0..50 {
        tokio::time::sleep(Duration::from_millis(20)).await;
        beats = h.cluster.count(API_KEY_HEARTBEAT);
        if beats >= 2 {
            break;
        }
    }
    assert!(beats >= 2);
    assert_eq!(h.coordinator.state().await, GroupState::Stable);

    // a rebalance signalled to the background task stops it
    h.script
        .heartbeat_error
        .store(KafkaErrorCode::RebalanceInProgress.as_i16(), Ordering::SeqCst);
    for _ in 0..50 {
        if h.coordinator.state().await == GroupState::Rebalancing {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert_eq!(h.coordinator.state().await, GroupState::Rebalancing);
}
