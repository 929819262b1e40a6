//! In-process broker.
//!
//! `MemoryBroker` keeps partitioned topic logs, consumer group membership and
//! committed offsets for the lifetime of the process. It speaks both client
//! shapes the backend adapter understands, so the whole publish / consume path
//! can run without an external cluster.
//!
//! Cloning a `MemoryBroker` yields another handle to the same broker.

mod group;
mod group_client;
mod log_client;
mod topic;

pub use group::AssignmentStrategy;
pub use group_client::{MemoryConsumerGroup, MemorySyncProducer};
pub use log_client::{MemoryReader, MemoryWriter};
pub use topic::partition_for_key;

use crate::backend::{Record, TopicAdmin};
use crate::config::StartOffset;
use crate::error::{Result, StreamError};
use async_trait::async_trait;
use group::Group;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::watch;
use topic::TopicLog;
use tracing::{debug, info};

/// Options of the in-process broker.
#[derive(Debug, Clone)]
pub struct BrokerOptions {
    /// Partition count of auto-created topics.
    pub default_partitions: i32,

    /// Strategy used when a group rebalances.
    pub assignment: AssignmentStrategy,
}

impl Default for BrokerOptions {
    fn default() -> Self {
        Self {
            default_partitions: 3,
            assignment: AssignmentStrategy::default(),
        }
    }
}

impl BrokerOptions {
    pub fn with_default_partitions(mut self, partitions: i32) -> Self {
        self.default_partitions = partitions;
        self
    }

    pub fn with_assignment(mut self, strategy: AssignmentStrategy) -> Self {
        self.assignment = strategy;
        self
    }
}

type GroupKey = (String, String);
type OffsetKey = (String, String, i32);

#[derive(Debug)]
struct BrokerState {
    available: bool,
    topics: HashMap<String, TopicLog>,
    groups: HashMap<GroupKey, Group>,
    offsets: HashMap<OffsetKey, i64>,
    next_member: u64,
}

struct Inner {
    state: Mutex<BrokerState>,
    version: watch::Sender<u64>,
    options: BrokerOptions,
}

/// Handle to an in-process broker.
#[derive(Clone)]
pub struct MemoryBroker {
    inner: Arc<Inner>,
}

impl Default for MemoryBroker {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for MemoryBroker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryBroker")
            .field("options", &self.inner.options)
            .finish()
    }
}

impl MemoryBroker {
    pub fn new() -> Self {
        Self::with_options(BrokerOptions::default())
    }

    pub fn with_options(options: BrokerOptions) -> Self {
        let (version, _) = watch::channel(0);
        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(BrokerState {
                    available: true,
                    topics: HashMap::new(),
                    groups: HashMap::new(),
                    offsets: HashMap::new(),
                    next_member: 0,
                }),
                version,
                options,
            }),
        }
    }

    fn state(&self) -> MutexGuard<'_, BrokerState> {
        self.inner.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn notify(&self) {
        self.inner.version.send_modify(|v| *v = v.wrapping_add(1));
    }

    /// Receiver that changes whenever data, membership or ownership changes.
    pub(crate) fn watch(&self) -> watch::Receiver<u64> {
        self.inner.version.subscribe()
    }

    /// Simulates losing (or regaining) the connection to the broker.
    ///
    /// While unavailable, produce, group joins, commits and admin operations
    /// fail with a transport error.
    pub fn set_available(&self, available: bool) {
        self.state().available = available;
        info!("Memory broker availability set to {}", available);
        self.notify();
    }

    pub fn is_available(&self) -> bool {
        self.state().available
    }

    fn ensure_available(state: &BrokerState) -> Result<()> {
        if state.available {
            Ok(())
        } else {
            Err(StreamError::Transport("broker unavailable".to_string()))
        }
    }

    /// Creates a topic with `partitions` partitions.
    pub fn create_topic(&self, name: &str, partitions: i32) -> Result<()> {
        if partitions < 1 {
            return Err(StreamError::Config(format!(
                "topic '{}' needs at least one partition, got {}",
                name, partitions
            )));
        }
        {
            let mut state = self.state();
            Self::ensure_available(&state)?;
            if state.topics.contains_key(name) {
                return Err(StreamError::TopicExists(name.to_string()));
            }
            self.insert_topic(&mut state, name, partitions);
        }
        self.notify();
        Ok(())
    }

    fn insert_topic(&self, state: &mut BrokerState, name: &str, partitions: i32) {
        info!("Creating topic '{}' with {} partitions", name, partitions);
        state
            .topics
            .insert(name.to_string(), TopicLog::new(name, partitions));
        let strategy = self.inner.options.assignment;
        for ((_, topic), group) in state.groups.iter_mut() {
            if topic == name {
                group.rebalance(partitions, strategy);
            }
        }
    }

    /// Deletes a topic, its data and every committed offset for it.
    pub fn delete_topic(&self, name: &str) -> Result<()> {
        {
            let mut state = self.state();
            Self::ensure_available(&state)?;
            if state.topics.remove(name).is_none() {
                return Err(StreamError::UnknownTopic(name.to_string()));
            }
            state.offsets.retain(|(_, topic, _), _| topic != name);
            let strategy = self.inner.options.assignment;
            for ((_, topic), group) in state.groups.iter_mut() {
                if topic == name {
                    group.rebalance(0, strategy);
                }
            }
        }
        info!("Deleted topic '{}'", name);
        self.notify();
        Ok(())
    }

    pub fn topics(&self) -> Vec<String> {
        let mut names: Vec<String> = self.state().topics.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn partition_count(&self, topic: &str) -> Option<i32> {
        self.state().topics.get(topic).map(TopicLog::partition_count)
    }

    /// Appends a message, creating the topic on first use.
    pub fn produce(&self, topic: &str, key: Option<&str>, value: Vec<u8>) -> Result<(i32, i64)> {
        let (partition, offset) = {
            let mut state = self.state();
            Self::ensure_available(&state)?;
            if !state.topics.contains_key(topic) {
                let partitions = self.inner.options.default_partitions;
                self.insert_topic(&mut state, topic, partitions);
            }
            match state.topics.get_mut(topic) {
                Some(log) => log.append(key, value),
                None => return Err(StreamError::UnknownTopic(topic.to_string())),
            }
        };
        debug!(
            "Appended message to topic '{}' (partition: {}, offset: {})",
            topic, partition, offset
        );
        self.notify();
        Ok((partition, offset))
    }

    pub(crate) fn read(&self, topic: &str, partition: i32, offset: i64) -> Option<Record> {
        self.state().topics.get(topic)?.read(partition, offset)
    }

    /// Offset the next message appended to the partition will get.
    pub fn end_offset(&self, topic: &str, partition: i32) -> Option<i64> {
        self.state().topics.get(topic)?.end_offset(partition)
    }

    /// Last position committed by `group` for the partition.
    pub fn committed_offset(&self, group: &str, topic: &str, partition: i32) -> Option<i64> {
        self.state()
            .offsets
            .get(&(group.to_string(), topic.to_string(), partition))
            .copied()
    }

    /// Records `offset` as the next position `group` reads from. Only the
    /// current owner of the partition may commit.
    pub(crate) fn commit(
        &self,
        group: &str,
        topic: &str,
        member_id: &str,
        partition: i32,
        offset: i64,
    ) -> Result<()> {
        let mut state = self.state();
        Self::ensure_available(&state)?;
        let owns = state
            .groups
            .get(&(group.to_string(), topic.to_string()))
            .is_some_and(|g| g.owns(member_id, partition));
        if !owns {
            return Err(StreamError::Transport(format!(
                "member '{}' does not own partition {} of '{}'",
                member_id, partition, topic
            )));
        }
        let committed = state
            .offsets
            .entry((group.to_string(), topic.to_string(), partition))
            .or_insert(offset);
        *committed = (*committed).max(offset);
        Ok(())
    }

    /// Adds a new member to `group` on `topic` and rebalances the group.
    pub(crate) fn join_group(&self, group: &str, topic: &str) -> Result<Membership> {
        let member_id = {
            let mut state = self.state();
            Self::ensure_available(&state)?;
            if !state.topics.contains_key(topic) {
                let partitions = self.inner.options.default_partitions;
                self.insert_topic(&mut state, topic, partitions);
            }
            let partitions = state
                .topics
                .get(topic)
                .map_or(0, TopicLog::partition_count);

            state.next_member += 1;
            let member_id = format!("{}-{}", group, state.next_member);
            let strategy = self.inner.options.assignment;
            let entry = state
                .groups
                .entry((group.to_string(), topic.to_string()))
                .or_default();
            entry.join(&member_id);
            entry.rebalance(partitions, strategy);
            info!(
                "Member '{}' joined group '{}' on topic '{}' (generation {})",
                member_id,
                group,
                topic,
                entry.generation()
            );
            member_id
        };
        self.notify();

        Ok(Membership {
            broker: self.clone(),
            group: group.to_string(),
            topic: topic.to_string(),
            member_id,
            active: true,
        })
    }

    fn leave_group(&self, group: &str, topic: &str, member_id: &str) {
        {
            let mut state = self.state();
            let partitions = state
                .topics
                .get(topic)
                .map_or(0, TopicLog::partition_count);
            let key = (group.to_string(), topic.to_string());
            let strategy = self.inner.options.assignment;
            let emptied = match state.groups.get_mut(&key) {
                Some(entry) => {
                    entry.leave(member_id);
                    if !entry.is_empty() {
                        entry.rebalance(partitions, strategy);
                    }
                    entry.is_empty()
                }
                None => false,
            };
            if emptied {
                state.groups.remove(&key);
            }
        }
        info!("Member '{}' left group '{}' on topic '{}'", member_id, group, topic);
        self.notify();
    }

    /// Current generation and the member's assigned partitions, or `None` if
    /// the member is not part of the group.
    pub(crate) fn assignment(
        &self,
        group: &str,
        topic: &str,
        member_id: &str,
    ) -> Option<(u64, Vec<i32>)> {
        let state = self.state();
        let entry = state.groups.get(&(group.to_string(), topic.to_string()))?;
        entry
            .assigned(member_id)
            .map(|partitions| (entry.generation(), partitions))
    }

    pub(crate) fn acquire(&self, group: &str, topic: &str, member_id: &str, partition: i32) -> bool {
        self.state()
            .groups
            .get_mut(&(group.to_string(), topic.to_string()))
            .is_some_and(|g| g.acquire(member_id, partition))
    }

    /// Releases every partition the member owns except those in `keep`.
    pub(crate) fn retain_owned(&self, group: &str, topic: &str, member_id: &str, keep: &[i32]) {
        let released = self
            .state()
            .groups
            .get_mut(&(group.to_string(), topic.to_string()))
            .is_some_and(|g| g.retain_owned(member_id, keep));
        if released {
            self.notify();
        }
    }

    /// Members of `group` on `topic`, in join order.
    pub fn group_members(&self, group: &str, topic: &str) -> Vec<String> {
        self.state()
            .groups
            .get(&(group.to_string(), topic.to_string()))
            .map(|g| g.members().to_vec())
            .unwrap_or_default()
    }

    /// Member currently reading the partition on behalf of `group`.
    pub fn partition_owner(&self, group: &str, topic: &str, partition: i32) -> Option<String> {
        self.state()
            .groups
            .get(&(group.to_string(), topic.to_string()))?
            .owner(partition)
            .map(str::to_string)
    }
}

#[async_trait]
impl TopicAdmin for MemoryBroker {
    async fn create_topic(&self, name: &str, partitions: i32) -> Result<()> {
        MemoryBroker::create_topic(self, name, partitions)
    }

    async fn delete_topic(&self, name: &str) -> Result<()> {
        MemoryBroker::delete_topic(self, name)
    }
}

/// A live group membership. Dropping it leaves the group, the way a broker
/// notices a closed client connection.
pub(crate) struct Membership {
    broker: MemoryBroker,
    group: String,
    topic: String,
    member_id: String,
    active: bool,
}

impl Membership {
    pub(crate) fn member_id(&self) -> &str {
        &self.member_id
    }

    pub(crate) fn assignment(&self) -> Option<(u64, Vec<i32>)> {
        self.broker
            .assignment(&self.group, &self.topic, &self.member_id)
    }

    pub(crate) fn acquire(&self, partition: i32) -> bool {
        self.broker
            .acquire(&self.group, &self.topic, &self.member_id, partition)
    }

    pub(crate) fn retain_owned(&self, keep: &[i32]) {
        self.broker
            .retain_owned(&self.group, &self.topic, &self.member_id, keep);
    }

    pub(crate) fn commit(&self, partition: i32, offset: i64) -> Result<()> {
        self.broker
            .commit(&self.group, &self.topic, &self.member_id, partition, offset)
    }

    /// Where reading of a newly owned partition starts.
    pub(crate) fn start_position(&self, partition: i32, start: StartOffset) -> i64 {
        if let Some(offset) = self
            .broker
            .committed_offset(&self.group, &self.topic, partition)
        {
            return offset;
        }
        match start {
            StartOffset::Earliest => 0,
            StartOffset::Latest => self.broker.end_offset(&self.topic, partition).unwrap_or(0),
        }
    }

    pub(crate) fn leave(&mut self) {
        if self.active {
            self.active = false;
            self.broker
                .leave_group(&self.group, &self.topic, &self.member_id);
        }
    }
}

impl Drop for Membership {
    fn drop(&mut self) {
        self.leave();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn produce_auto_creates_topic() {
        let broker = MemoryBroker::with_options(BrokerOptions::default().with_default_partitions(4));
        broker.produce("user-events", Some("1"), b"x".to_vec()).unwrap();
        assert_eq!(broker.partition_count("user-events"), Some(4));
        assert_eq!(broker.topics(), vec!["user-events".to_string()]);
    }

    #[test]
    fn delete_unknown_topic_fails() {
        let broker = MemoryBroker::new();
        let err = broker.delete_topic("missing").unwrap_err();
        assert!(matches!(err, StreamError::UnknownTopic(name) if name == "missing"));
    }

    #[test]
    fn delete_drops_data_and_offsets() {
        let broker = MemoryBroker::new();
        broker.create_topic("t", 1).unwrap();
        broker.produce("t", Some("1"), b"x".to_vec()).unwrap();

        let membership = broker.join_group("g", "t").unwrap();
        assert!(membership.acquire(0));
        membership.commit(0, 1).unwrap();
        assert_eq!(broker.committed_offset("g", "t", 0), Some(1));

        broker.delete_topic("t").unwrap();
        assert!(broker.committed_offset("g", "t", 0).is_none());
        assert!(broker.read("t", 0, 0).is_none());
        assert!(matches!(broker.create_topic("t", 0), Err(StreamError::Config(_))));
    }

    #[test]
    fn unavailable_broker_rejects_writes_and_joins() {
        let broker = MemoryBroker::new();
        broker.set_available(false);
        assert!(matches!(
            broker.produce("t", None, vec![]),
            Err(StreamError::Transport(_))
        ));
        assert!(broker.join_group("g", "t").is_err());

        broker.set_available(true);
        assert!(broker.produce("t", None, vec![]).is_ok());
    }

    #[test]
    fn only_owner_may_commit() {
        let broker = MemoryBroker::new();
        broker.create_topic("t", 1).unwrap();
        let first = broker.join_group("g", "t").unwrap();
        let second = broker.join_group("g", "t").unwrap();

        let (owner, other) = if first.assignment().unwrap().1.contains(&0) {
            (&first, &second)
        } else {
            (&second, &first)
        };
        assert!(owner.acquire(0));
        assert!(!other.acquire(0));
        assert!(other.commit(0, 5).is_err());
        assert!(owner.commit(0, 5).is_ok());
    }

    #[test]
    fn dropping_membership_leaves_group() {
        let broker = MemoryBroker::new();
        let membership = broker.join_group("g", "t").unwrap();
        assert_eq!(broker.group_members("g", "t").len(), 1);
        assert!(membership.acquire(0));

        drop(membership);
        assert!(broker.group_members("g", "t").is_empty());
        assert!(broker.partition_owner("g", "t", 0).is_none());
    }

    #[test]
    fn commits_never_move_backwards() {
        let broker = MemoryBroker::new();
        broker.create_topic("t", 1).unwrap();
        let membership = broker.join_group("g", "t").unwrap();
        assert!(membership.acquire(0));
        membership.commit(0, 4).unwrap();
        membership.commit(0, 2).unwrap();
        assert_eq!(broker.committed_offset("g", "t", 0), Some(4));
    }
}
