//! Partition assignment strategies run by the group leader
//!
//! The leader collects every member's subscription from the JoinGroup
//! response and the partition counts from metadata, and an [`Assignor`] turns
//! them into one assignment per member. Every member gets an entry, possibly
//! empty, so that SyncGroup tells idle members they own nothing.

use bytes::Bytes;
use kafwire::protocol::kafka::messages::{
    ConsumerGroupMemberAssignment, ConsumerGroupMemberMetadata,
};
use std::collections::BTreeMap;
use std::fmt;

use crate::error::ClientError;

/// Member id → subscription.
pub type MemberSubscriptions = BTreeMap<String, ConsumerGroupMemberMetadata>;
/// Topic → partition ids.
pub type PartitionUniverse = BTreeMap<String, Vec<i32>>;
/// Member id → assignment.
pub type GroupAssignment = BTreeMap<String, ConsumerGroupMemberAssignment>;

pub trait Assignor: Send + Sync + fmt::Debug {
    /// Protocol name proposed in JoinGroup.
    fn name(&self) -> &str;

    /// Metadata blob proposed alongside [`name`](Self::name).
    fn metadata(&self, topics: &[String]) -> Result<Bytes, ClientError> {
        Ok(ConsumerGroupMemberMetadata::new(topics.to_vec()).encode_to_bytes()?)
    }

    fn assign(&self, members: &MemberSubscriptions, universe: &PartitionUniverse)
        -> GroupAssignment;
}

fn empty_assignment(members: &MemberSubscriptions) -> GroupAssignment {
    members
        .keys()
        .map(|id| (id.clone(), ConsumerGroupMemberAssignment::default()))
        .collect()
}

fn subscribers<'a>(members: &'a MemberSubscriptions, topic: &str) -> Vec<&'a str> {
    members
        .iter()
        .filter(|(_, meta)| meta.topics.iter().any(|t| t == topic))
        .map(|(id, _)| id.as_str())
        .collect()
}

fn give(plan: &mut GroupAssignment, member: &str, topic: &str, partition: i32) {
    if let Some(assignment) = plan.get_mut(member) {
        assignment
            .topics
            .entry(topic.to_string())
            .or_default()
            .push(partition);
    }
}

/// Contiguous ranges per topic; earlier members (by id) take the remainder.
#[derive(Debug, Default, Clone, Copy)]
pub struct RangeAssignor;

impl Assignor for RangeAssignor {
    fn name(&self) -> &str {
        "range"
    }

    fn assign(&self, members: &MemberSubscriptions, universe: &PartitionUniverse) -> GroupAssignment {
        let mut plan = empty_assignment(members);

        for (topic, partitions) in universe {
            let consumers = subscribers(members, topic);
            if consumers.is_empty() {
                continue;
            }
            let mut partitions = partitions.clone();
            partitions.sort_unstable();

            let per_member = partitions.len() / consumers.len();
            let extra = partitions.len() % consumers.len();
            let mut next = 0;
            for (i, member) in consumers.iter().enumerate() {
                let count = per_member + usize::from(i < extra);
                for &partition in &partitions[next..next + count] {
                    give(&mut plan, member, topic, partition);
                }
                next += count;
            }
        }
        plan
    }
}

/// All partitions of all topics dealt out one at a time, skipping members
/// not subscribed to the partition's topic.
#[derive(Debug, Default, Clone, Copy)]
pub struct RoundRobinAssignor;

impl Assignor for RoundRobinAssignor {
    fn name(&self) -> &str {
        "roundrobin"
    }

    fn assign(&self, members: &MemberSubscriptions, universe: &PartitionUniverse) -> GroupAssignment {
        let mut plan = empty_assignment(members);
        let ids: Vec<&str> = members.keys().map(String::as_str).collect();
        if ids.is_empty() {
            return plan;
        }

        let mut cursor = 0usize;
        for (topic, partitions) in universe {
            if subscribers(members, topic).is_empty() {
                continue;
            }
            let mut partitions = partitions.clone();
            partitions.sort_unstable();

            for partition in partitions {
                // at least one member subscribes, so this terminates
                loop {
                    let member = ids[cursor % ids.len()];
                    cursor += 1;
                    let subscribed = members
                        .get(member)
                        .map_or(false, |meta| meta.topics.iter().any(|t| t == topic));
                    if subscribed {
                        give(&mut plan, member, topic, partition);
                        break;
                    }
                }
            }
        }
        plan
    }
}
