//! Message-bus client abstraction.
//!
//! The controller needs only a handful of client operations: subscribe by
//! pattern, bounded poll, commit, and send. Connection handling, partition
//! assignment and network retries belong to the client implementation.
//!
//! The traits are async and object-safe via `async-trait`. Handles are used
//! by one owner at a time; components sharing a client serialize through a
//! [`SharedLock`](crate::SharedLock).

mod memory;

use std::{collections::BTreeMap, time::Duration};

use async_trait::async_trait;
use bytes::Bytes;
pub use memory::{BusCall, MemoryBus};

use crate::error::BusError;

/// One partition of one topic.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TopicPartition {
    /// Topic name
    pub topic: String,
    /// Partition number
    pub partition: u32,
}

impl TopicPartition {
    /// Create a topic-partition pair.
    pub fn new(topic: impl Into<String>, partition: u32) -> Self {
        Self { topic: topic.into(), partition }
    }
}

/// A consumed record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BusRecord {
    /// Topic the record was published on
    pub topic: String,
    /// Partition within the topic
    pub partition: u32,
    /// Offset within the partition
    pub offset: u64,
    /// Record key, if any
    pub key: Option<Bytes>,
    /// Record value, if any
    pub value: Option<Bytes>,
}

/// Records returned by one poll, ordered per partition.
pub type PollBatch = BTreeMap<TopicPartition, Vec<BusRecord>>;

/// Consumer half of a bus client.
#[async_trait]
pub trait BusConsumer: Send {
    /// Whether the client commits offsets on its own.
    fn auto_commit_enabled(&self) -> bool;

    /// Consumer group used for offset tracking, if configured.
    fn group_id(&self) -> Option<&str>;

    /// Replace the subscription with every topic matching `pattern`.
    async fn subscribe(&mut self, pattern: &str) -> Result<(), BusError>;

    /// Fetch up to `max_records`, waiting at most `timeout`.
    async fn poll(&mut self, timeout: Duration, max_records: usize)
    -> Result<PollBatch, BusError>;

    /// Commit the offsets of everything returned by earlier polls.
    async fn commit(&mut self) -> Result<(), BusError>;
}

/// Producer half of a bus client.
#[async_trait]
pub trait BusProducer: Send {
    /// Publish one record.
    async fn send(
        &mut self,
        topic: &str,
        key: Option<Bytes>,
        value: Option<Bytes>,
    ) -> Result<(), BusError>;
}
