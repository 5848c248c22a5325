//! Controller behavior tests
//!
//! Tests for routing, rejection, unknown topics, commit ordering and
//! resubscribe timing, driven one cycle at a time against `MemoryBus`.

#![allow(clippy::disallowed_types, reason = "Test doubles share state synchronously")]

use std::{
    collections::VecDeque,
    sync::{
        Arc, Mutex,
        atomic::{AtomicU64, Ordering},
    },
    time::Duration,
};

use async_trait::async_trait;
use bytes::Bytes;
use keyrelay_controller::{
    BusCall, BusConsumer, BusError, BusRecord, Controller, ControllerConfig, ControllerError,
    CycleReport, Environment, MemoryBus, PollBatch, Provisioner, ProvisionerSource, Reencrypted,
    SharedLock, TopicPartition, topics,
};
use keyrelay_crypto::{CryptoKey, CryptoKeySource, Ed25519CryptoKey};

// Test environment with a manually advanced clock
#[derive(Clone, Default)]
struct TestEnv {
    millis: Arc<AtomicU64>,
}

impl TestEnv {
    fn advance(&self, by: Duration) {
        self.millis.fetch_add(by.as_millis() as u64, Ordering::SeqCst);
    }
}

impl Environment for TestEnv {
    type Instant = Duration;

    fn now(&self) -> Self::Instant {
        Duration::from_millis(self.millis.load(Ordering::SeqCst))
    }

    fn random_bytes(&self, buffer: &mut [u8]) {
        buffer.fill(0x5A);
    }
}

/// Provisioner stub returning a fixed answer and recording what it saw.
#[derive(Default)]
struct StubProvisioner {
    reply: Reencrypted,
    seen: Mutex<Vec<(String, Option<Vec<u8>>, Option<Vec<u8>>)>>,
}

impl StubProvisioner {
    fn replying(key: Option<&'static [u8]>, value: Option<&'static [u8]>) -> Arc<Self> {
        Arc::new(Self {
            reply: Reencrypted {
                key: key.map(Bytes::from_static),
                value: value.map(Bytes::from_static),
            },
            seen: Mutex::default(),
        })
    }

    fn seen(&self) -> Vec<(String, Option<Vec<u8>>, Option<Vec<u8>>)> {
        self.seen.lock().unwrap().clone()
    }
}

impl Provisioner for StubProvisioner {
    fn reencrypt_request(
        &self,
        resource: &str,
        _cryptokey: &dyn CryptoKey,
        msg_key: Option<&[u8]>,
        msg_value: Option<&[u8]>,
    ) -> Reencrypted {
        self.seen.lock().unwrap().push((
            resource.to_string(),
            msg_key.map(<[u8]>::to_vec),
            msg_value.map(<[u8]>::to_vec),
        ));
        self.reply.clone()
    }
}

/// Consumer returning scripted batches, for topics a pattern would not match.
#[derive(Default)]
struct ScriptedConsumer {
    batches: VecDeque<PollBatch>,
    commits: usize,
}

#[async_trait]
impl BusConsumer for ScriptedConsumer {
    fn auto_commit_enabled(&self) -> bool {
        false
    }

    fn group_id(&self) -> Option<&str> {
        Some("scripted")
    }

    async fn subscribe(&mut self, _pattern: &str) -> Result<(), BusError> {
        Ok(())
    }

    async fn poll(&mut self, _timeout: Duration, _max: usize) -> Result<PollBatch, BusError> {
        Ok(self.batches.pop_front().unwrap_or_default())
    }

    async fn commit(&mut self) -> Result<(), BusError> {
        self.commits += 1;
        Ok(())
    }
}

fn config() -> ControllerConfig {
    ControllerConfig { poll_timeout: Duration::ZERO, ..ControllerConfig::new("node-1") }
}

fn cryptokey() -> CryptoKeySource {
    CryptoKeySource::Object(Arc::new(Ed25519CryptoKey::from_seed(&[7u8; 32]).unwrap()))
}

fn controller(
    bus: &MemoryBus,
    provisioner: Arc<dyn Provisioner>,
    env: &TestEnv,
) -> Controller<MemoryBus, MemoryBus, TestEnv> {
    Controller::new(
        config(),
        bus.clone(),
        bus.clone(),
        cryptokey(),
        Some(ProvisionerSource::Object(provisioner)),
        SharedLock::new(),
        env.clone(),
    )
    .unwrap()
}

fn sends(bus: &MemoryBus) -> Vec<(String, Option<Bytes>, Option<Bytes>)> {
    bus.calls()
        .into_iter()
        .filter_map(|call| match call {
            BusCall::Send { topic, key, value } => Some((topic, key, value)),
            _ => None,
        })
        .collect()
}

#[tokio::test]
async fn accepted_request_is_republished_on_reqs() {
    let bus = MemoryBus::new();
    let stub = StubProvisioner::replying(Some(&b"K"[..]), Some(&b"V"[..]));
    let mut controller = controller(&bus, stub.clone(), &TestEnv::default());

    bus.publish("foo.subs", 0, Some(&b"req-key"[..]), Some(&b"req-value"[..]));
    let report = controller.run_once().await.unwrap();

    assert_eq!(
        sends(&bus),
        vec![(
            "foo.reqs".to_string(),
            Some(Bytes::from_static(b"K")),
            Some(Bytes::from_static(b"V"))
        )]
    );
    assert_eq!(
        stub.seen(),
        vec![("foo".to_string(), Some(b"req-key".to_vec()), Some(b"req-value".to_vec()))]
    );
    assert_eq!(
        report,
        CycleReport {
            subscribed: true,
            polled: 1,
            republished: 1,
            rejected: 0,
            skipped: 0,
            committed: true,
        }
    );
}

#[tokio::test]
async fn rejected_request_is_not_republished() {
    let bus = MemoryBus::new();
    let stub = StubProvisioner::replying(None, None);
    let mut controller = controller(&bus, stub.clone(), &TestEnv::default());

    bus.publish("foo.subs", 0, None, Some(&b"unsigned"[..]));
    let report = controller.run_once().await.unwrap();

    assert!(sends(&bus).is_empty());
    assert_eq!(stub.seen().len(), 1);
    assert_eq!(report.rejected, 1);
    assert!(report.committed);
}

#[tokio::test]
async fn partial_reply_is_published_verbatim() {
    let bus = MemoryBus::new();
    let stub = StubProvisioner::replying(None, Some(&b"V"[..]));
    let mut controller = controller(&bus, stub, &TestEnv::default());

    bus.publish("foo.subs", 0, Some(&b"k"[..]), Some(&b"v"[..]));
    controller.run_once().await.unwrap();

    assert_eq!(sends(&bus), vec![("foo.reqs".to_string(), None, Some(Bytes::from_static(b"V")))]);
}

#[tokio::test]
async fn unknown_topic_is_skipped() {
    let producer = MemoryBus::new();
    let stub = StubProvisioner::replying(Some(&b"K"[..]), Some(&b"V"[..]));

    let record = |topic: &str| BusRecord {
        topic: topic.to_string(),
        partition: 0,
        offset: 0,
        key: None,
        value: Some(Bytes::from_static(b"v")),
    };
    let mut batch = PollBatch::new();
    batch.insert(TopicPartition::new("foo.keys", 0), vec![record("foo.keys")]);
    batch.insert(TopicPartition::new(".subs", 0), vec![record(".subs")]);

    let consumer = ScriptedConsumer { batches: VecDeque::from([batch]), commits: 0 };
    let mut controller = Controller::new(
        config(),
        consumer,
        producer.clone(),
        cryptokey(),
        Some(ProvisionerSource::Object(stub.clone())),
        SharedLock::new(),
        TestEnv::default(),
    )
    .unwrap();

    let report = controller.run_once().await.unwrap();

    assert_eq!(report.polled, 2);
    assert_eq!(report.skipped, 2);
    assert!(report.committed);
    assert!(stub.seen().is_empty());
    assert!(producer.calls().is_empty());
}

#[tokio::test]
async fn commit_follows_every_republish() {
    let bus = MemoryBus::new();
    let stub = StubProvisioner::replying(Some(&b"K"[..]), Some(&b"V"[..]));
    let mut controller = controller(&bus, stub, &TestEnv::default());

    bus.publish("a.subs", 0, None, Some(&b"1"[..]));
    bus.publish("a.subs", 0, None, Some(&b"2"[..]));
    bus.publish("b.subs", 3, None, Some(&b"3"[..]));
    controller.run_once().await.unwrap();

    let calls = bus.calls();
    let kinds: Vec<&str> = calls
        .iter()
        .map(|call| match call {
            BusCall::Subscribe { .. } => "subscribe",
            BusCall::Poll { .. } => "poll",
            BusCall::Send { .. } => "send",
            BusCall::Commit => "commit",
        })
        .collect();

    assert_eq!(kinds, vec!["subscribe", "poll", "send", "send", "send", "commit"]);
    assert_eq!(calls[0], BusCall::Subscribe { pattern: topics::subscription_pattern() });
    assert_eq!(bus.committed(&TopicPartition::new("a.subs", 0)), Some(2));
    assert_eq!(bus.committed(&TopicPartition::new("b.subs", 3)), Some(1));
}

#[tokio::test]
async fn send_failure_stops_before_commit() {
    let bus = MemoryBus::new();
    let stub = StubProvisioner::replying(Some(&b"K"[..]), Some(&b"V"[..]));
    let mut controller = controller(&bus, stub, &TestEnv::default());

    bus.publish("a.subs", 0, None, Some(&b"1"[..]));
    bus.fail_sends(Some("broker down"));

    let result = controller.run_once().await;

    assert!(matches!(result, Err(ControllerError::Bus(BusError::Send { .. }))));
    assert!(!bus.calls().contains(&BusCall::Commit));
    assert_eq!(bus.committed(&TopicPartition::new("a.subs", 0)), None);
}

#[tokio::test]
async fn resubscribes_after_interval() {
    let bus = MemoryBus::new();
    let env = TestEnv::default();
    let stub = StubProvisioner::replying(None, None);
    let mut controller = controller(&bus, stub, &env);

    assert!(controller.run_once().await.unwrap().subscribed);

    env.advance(Duration::from_secs(299));
    assert!(!controller.run_once().await.unwrap().subscribed);

    env.advance(Duration::from_secs(1));
    assert!(controller.run_once().await.unwrap().subscribed);

    let subscribes =
        bus.calls().iter().filter(|call| matches!(call, BusCall::Subscribe { .. })).count();
    assert_eq!(subscribes, 2);
}

#[tokio::test]
async fn missing_group_id_skips_commit() {
    let bus = MemoryBus::new().with_group_id(None).with_auto_commit(true);
    let stub = StubProvisioner::replying(Some(&b"K"[..]), Some(&b"V"[..]));
    let mut controller = controller(&bus, stub, &TestEnv::default());

    bus.publish("a.subs", 0, None, Some(&b"1"[..]));
    let report = controller.run_once().await.unwrap();

    assert_eq!(report.republished, 1);
    assert!(!report.committed);
    assert!(!bus.calls().contains(&BusCall::Commit));
}

#[tokio::test]
async fn batch_waits_for_shared_lock() {
    let bus = MemoryBus::new();
    let lock = SharedLock::new();
    let stub = StubProvisioner::replying(Some(&b"K"[..]), Some(&b"V"[..]));
    let mut controller = Controller::new(
        config(),
        bus.clone(),
        bus.clone(),
        cryptokey(),
        Some(ProvisionerSource::Object(stub)),
        lock.clone(),
        TestEnv::default(),
    )
    .unwrap();

    bus.publish("a.subs", 0, None, Some(&b"1"[..]));

    let guard = lock.lock().await;
    let cycle = tokio::spawn(async move { controller.run_once().await });

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(!cycle.is_finished());
    assert!(sends(&bus).is_empty(), "no send while a sibling holds the lock");

    drop(guard);
    let report = cycle.await.unwrap().unwrap();
    assert_eq!(report.republished, 1);
}

#[tokio::test]
async fn spawned_controller_processes_until_aborted() {
    let bus = MemoryBus::new();
    let stub = StubProvisioner::replying(Some(&b"K"[..]), Some(&b"V"[..]));
    let controller = Controller::new(
        ControllerConfig { poll_timeout: Duration::from_millis(5), ..config() },
        bus.clone(),
        bus.clone(),
        cryptokey(),
        Some(ProvisionerSource::Object(stub)),
        SharedLock::new(),
        TestEnv::default(),
    )
    .unwrap();

    let handle = controller.spawn();
    bus.publish("a.subs", 0, None, Some(&b"1"[..]));

    let republished = tokio::time::timeout(Duration::from_secs(5), async {
        while bus.records("a.reqs").is_empty() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await;
    assert!(republished.is_ok());

    handle.abort();
    assert!(handle.await.unwrap_err().is_cancelled());
}

#[tokio::test]
async fn invalid_provisioner_source_fails_construction() {
    let bus = MemoryBus::new();
    let dir = tempfile::tempdir().unwrap();

    let result = Controller::new(
        config(),
        bus.clone(),
        bus,
        cryptokey(),
        Some(ProvisionerSource::File(dir.path().join("missing.provisioners"))),
        SharedLock::new(),
        TestEnv::default(),
    );

    assert!(matches!(result, Err(ControllerError::Provisioner(_))));
}

#[tokio::test]
async fn default_allowlist_file_authorizes_requests() {
    use keyrelay_controller::provisioner::{encode_value, signed_message};

    let dir = tempfile::tempdir().unwrap();
    let node_id = dir.path().join("node-1").display().to_string();

    let provisioner = Ed25519CryptoKey::from_seed(&[1u8; 32]).unwrap();
    let controller_key = Ed25519CryptoKey::from_seed(&[7u8; 32]).unwrap();
    std::fs::write(
        format!("{node_id}.provisioners"),
        format!("# allowed\n{}\n", hex::encode(provisioner.verifying_key())),
    )
    .unwrap();

    let bus = MemoryBus::new();
    let mut controller = Controller::new(
        ControllerConfig { poll_timeout: Duration::ZERO, ..ControllerConfig::new(node_id) },
        bus.clone(),
        bus.clone(),
        cryptokey(),
        None,
        SharedLock::new(),
        TestEnv::default(),
    )
    .unwrap();

    let message = signed_message("orders", b"node-9", b"ephemeral pk");
    let request = |signer: &Ed25519CryptoKey| {
        encode_value(signer.verifying_key(), signer.sign_spk(&message), b"ephemeral pk")
    };

    bus.publish("orders.subs", 0, Some(&b"node-9"[..]), Some(&request(&provisioner)[..]));
    // Well-formed but signed by a key missing from the allowlist
    bus.publish("orders.subs", 0, Some(&b"node-9"[..]), Some(&request(&controller_key)[..]));

    let report = controller.run_once().await.unwrap();
    assert_eq!(report.republished, 1);
    assert_eq!(report.rejected, 1);

    let republished = bus.records("orders.reqs");
    assert_eq!(republished.len(), 1);
    assert_eq!(republished[0].key.as_deref(), Some(&b"node-9"[..]));

    assert_eq!(republished[0].value.as_ref(), Some(&request(&controller_key)));
}
