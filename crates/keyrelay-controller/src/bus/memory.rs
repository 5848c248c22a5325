#![allow(clippy::disallowed_types, reason = "Synchronous in-memory operations only")]

use std::{
    collections::BTreeMap,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
    time::Duration,
};

use async_trait::async_trait;
use bytes::Bytes;
use regex::Regex;

use super::{BusConsumer, BusProducer, BusRecord, PollBatch, TopicPartition};
use crate::error::BusError;

/// A client call observed by [`MemoryBus`], in the order it happened.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BusCall {
    /// `subscribe(pattern)`
    Subscribe {
        /// Pattern passed by the caller
        pattern: String,
    },
    /// `poll(..)` and how many records it returned
    Poll {
        /// Records handed out
        records: usize,
    },
    /// Successful `send(topic, key, value)`
    Send {
        /// Destination topic
        topic: String,
        /// Record key
        key: Option<Bytes>,
        /// Record value
        value: Option<Bytes>,
    },
    /// Successful `commit()`
    Commit,
}

/// In-memory bus for testing and simulation
///
/// Implements both [`BusConsumer`] and [`BusProducer`]. Clones share one log,
/// so a test can keep a handle to publish requests and inspect the call
/// sequence while the controller owns the others. Consumer settings (group
/// id, auto-commit) are per handle.
///
/// Poll returns immediately when records are available and otherwise waits
/// out its timeout, like a real client with nothing to deliver.
#[derive(Clone)]
pub struct MemoryBus {
    inner: Arc<Mutex<MemoryBusInner>>,
    group_id: Option<String>,
    auto_commit: bool,
}

#[derive(Default)]
struct MemoryBusInner {
    /// Records per partition, index == offset
    log: BTreeMap<TopicPartition, Vec<BusRecord>>,

    /// Next offset to hand out per partition
    positions: BTreeMap<TopicPartition, u64>,

    /// Last committed position per partition
    committed: BTreeMap<TopicPartition, u64>,

    /// Anchored subscription pattern
    subscription: Option<Regex>,

    /// Every client call, in order
    calls: Vec<BusCall>,

    /// When set, every send fails with this reason
    send_failure: Option<String>,
}

impl MemoryBus {
    /// Create an empty bus with group id `keyrelay` and auto-commit off.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(MemoryBusInner::default())),
            group_id: Some("keyrelay".to_string()),
            auto_commit: false,
        }
    }

    /// Use `group_id` for this handle.
    #[must_use]
    pub fn with_group_id(mut self, group_id: Option<&str>) -> Self {
        self.group_id = group_id.map(str::to_string);
        self
    }

    /// Report auto-commit as `enabled` for this handle.
    #[must_use]
    pub fn with_auto_commit(mut self, enabled: bool) -> Self {
        self.auto_commit = enabled;
        self
    }

    /// Append a record as if another client had produced it.
    ///
    /// Not recorded in [`calls`](Self::calls). Returns the record's offset.
    pub fn publish(
        &self,
        topic: &str,
        partition: u32,
        key: Option<&[u8]>,
        value: Option<&[u8]>,
    ) -> u64 {
        self.lock().append(
            TopicPartition::new(topic, partition),
            key.map(Bytes::copy_from_slice),
            value.map(Bytes::copy_from_slice),
        )
    }

    /// Every call made through any handle so far.
    pub fn calls(&self) -> Vec<BusCall> {
        self.lock().calls.clone()
    }

    /// All records on `topic`, across partitions.
    pub fn records(&self, topic: &str) -> Vec<BusRecord> {
        self.lock()
            .log
            .iter()
            .filter(|(tp, _)| tp.topic == topic)
            .flat_map(|(_, records)| records.iter().cloned())
            .collect()
    }

    /// Committed position of one partition.
    pub fn committed(&self, tp: &TopicPartition) -> Option<u64> {
        self.lock().committed.get(tp).copied()
    }

    /// Make every send fail with `reason`, or succeed again with `None`.
    pub fn fail_sends(&self, reason: Option<&str>) {
        self.lock().send_failure = reason.map(str::to_string);
    }

    fn lock(&self) -> MutexGuard<'_, MemoryBusInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for MemoryBus {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryBusInner {
    fn append(&mut self, tp: TopicPartition, key: Option<Bytes>, value: Option<Bytes>) -> u64 {
        let records = self.log.entry(tp.clone()).or_default();
        let offset = records.len() as u64;
        records.push(BusRecord {
            topic: tp.topic,
            partition: tp.partition,
            offset,
            key,
            value,
        });
        offset
    }

    /// Hand out up to `max_records` from subscribed partitions, in order.
    fn take_batch(&mut self, max_records: usize) -> PollBatch {
        let mut batch = PollBatch::new();
        let mut returned = 0;

        if let Some(subscription) = &self.subscription {
            for (tp, records) in &self.log {
                if returned >= max_records {
                    break;
                }
                if !subscription.is_match(&tp.topic) {
                    continue;
                }

                let position = self.positions.entry(tp.clone()).or_insert(0);
                let available = records.get(*position as usize..).unwrap_or_default();
                let taken: Vec<BusRecord> =
                    available.iter().take(max_records - returned).cloned().collect();

                if taken.is_empty() {
                    continue;
                }

                *position += taken.len() as u64;
                returned += taken.len();
                batch.insert(tp.clone(), taken);
            }
        }

        self.calls.push(BusCall::Poll { records: returned });
        batch
    }
}

#[async_trait]
impl BusConsumer for MemoryBus {
    fn auto_commit_enabled(&self) -> bool {
        self.auto_commit
    }

    fn group_id(&self) -> Option<&str> {
        self.group_id.as_deref()
    }

    async fn subscribe(&mut self, pattern: &str) -> Result<(), BusError> {
        // Topic patterns match the whole name
        let regex = Regex::new(&format!("^(?:{pattern})$"))
            .map_err(|e| BusError::Subscribe(e.to_string()))?;

        let mut inner = self.lock();
        inner.subscription = Some(regex);
        inner.calls.push(BusCall::Subscribe { pattern: pattern.to_string() });
        Ok(())
    }

    async fn poll(
        &mut self,
        timeout: Duration,
        max_records: usize,
    ) -> Result<PollBatch, BusError> {
        let batch = self.lock().take_batch(max_records);

        if batch.is_empty() && !timeout.is_zero() {
            tokio::time::sleep(timeout).await;
        }

        Ok(batch)
    }

    async fn commit(&mut self) -> Result<(), BusError> {
        if self.group_id.is_none() {
            return Err(BusError::Commit("no group id configured".to_string()));
        }

        let mut inner = self.lock();
        inner.committed = inner.positions.clone();
        inner.calls.push(BusCall::Commit);
        Ok(())
    }
}

#[async_trait]
impl BusProducer for MemoryBus {
    async fn send(
        &mut self,
        topic: &str,
        key: Option<Bytes>,
        value: Option<Bytes>,
    ) -> Result<(), BusError> {
        let mut inner = self.lock();

        if let Some(reason) = &inner.send_failure {
            return Err(BusError::Send { topic: topic.to_string(), reason: reason.clone() });
        }

        inner.append(TopicPartition::new(topic, 0), key.clone(), value.clone());
        inner.calls.push(BusCall::Send { topic: topic.to_string(), key, value });
        Ok(())
    }
}
