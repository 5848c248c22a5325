//! Controller loop: subscribe, poll, re-authorize, republish, commit.
//!
//! Each cycle runs three phases:
//!
//! ```text
//! resubscribe   if subscribe_interval has passed since the last subscribe
//! poll          bounded by poll_timeout and poll_max_records
//! process       under the shared lock, for each record in partition order:
//!                 R.subs   -> provisioner -> send R.reqs (unless rejected)
//!                 other    -> warn and skip
//! commit        if a group id is configured
//! ```
//!
//! Offsets are committed only after every record of the batch has been
//! handed to the provisioner and any republish attempted. A crash between
//! republish and commit replays the batch on restart: at worst a duplicate
//! republish, never a silently skipped request.

use std::sync::Arc;

use keyrelay_crypto::{CryptoKey, CryptoKeySource};
use tokio::task::JoinHandle;

use crate::{
    bus::{BusConsumer, BusProducer, BusRecord, PollBatch},
    config::ControllerConfig,
    env::Environment,
    error::ControllerError,
    lock::SharedLock,
    provisioner::{Provisioner, ProvisionerSource},
    topics,
};

/// What one [`Controller::run_once`] cycle did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CycleReport {
    /// A subscribe was issued this cycle
    pub subscribed: bool,
    /// Records returned by the poll
    pub polled: usize,
    /// Requests republished on a request topic
    pub republished: usize,
    /// Requests the provisioner rejected or ignored
    pub rejected: usize,
    /// Records on topics the controller does not handle
    pub skipped: usize,
    /// Offsets were committed
    pub committed: bool,
}

/// Re-authorizes key requests from allowed provisioners.
///
/// Owns its bus handles. Other components using the same underlying client
/// must share `lock`.
pub struct Controller<C, P, E>
where
    C: BusConsumer,
    P: BusProducer,
    E: Environment,
{
    config: ControllerConfig,
    consumer: C,
    producer: P,
    cryptokey: Arc<dyn CryptoKey>,
    provisioner: Arc<dyn Provisioner>,
    lock: SharedLock,
    env: E,
    pattern: String,
    last_subscribed: Option<E::Instant>,
}

impl<C, P, E> Controller<C, P, E>
where
    C: BusConsumer + 'static,
    P: BusProducer + 'static,
    E: Environment,
{
    /// Build a controller.
    ///
    /// Without a provisioner source, the allowlist file
    /// `<node_id>.provisioners` is used. A consumer with auto-commit enabled
    /// or without a group id is accepted with a warning: the controller
    /// still runs, but may miss or repeat requests.
    pub fn new(
        config: ControllerConfig,
        consumer: C,
        producer: P,
        cryptokey: CryptoKeySource,
        provisioner: Option<ProvisionerSource>,
        lock: SharedLock,
        env: E,
    ) -> Result<Self, ControllerError> {
        if consumer.auto_commit_enabled() {
            tracing::warn!(node_id = %config.node_id, "auto commit not disabled, controller may miss messages");
        }
        if consumer.group_id().is_none() {
            tracing::warn!(node_id = %config.node_id, "group id not set, controller may miss messages");
        }

        let provisioner = provisioner
            .unwrap_or_else(|| ProvisionerSource::File(config.default_provisioners_path().into()))
            .resolve()?;
        let cryptokey = cryptokey.resolve()?;

        tracing::info!(
            node_id = %config.node_id,
            verifying_key = %hex::encode(cryptokey.verifying_key()),
            "controller ready"
        );

        Ok(Self {
            config,
            consumer,
            producer,
            cryptokey,
            provisioner,
            lock,
            env,
            pattern: topics::subscription_pattern(),
            last_subscribed: None,
        })
    }

    /// Run one resubscribe, poll, process and commit cycle.
    ///
    /// Bus errors are returned as-is; there is no retry. Rejected requests
    /// and unknown topics are not errors.
    pub async fn run_once(&mut self) -> Result<CycleReport, ControllerError> {
        let mut report = CycleReport::default();

        if self.subscribe_due() {
            self.consumer.subscribe(&self.pattern).await?;
            self.last_subscribed = Some(self.env.now());
            report.subscribed = true;
            tracing::info!(pattern = %self.pattern, "subscribed");
        }

        let batch = self
            .consumer
            .poll(self.config.poll_timeout, self.config.poll_max_records)
            .await?;
        report.polled = batch.values().map(Vec::len).sum();

        self.process_batch(&batch, &mut report).await?;

        if self.consumer.group_id().is_some() {
            self.consumer.commit().await?;
            report.committed = true;
            tracing::trace!(records = report.polled, "offsets committed");
        }

        Ok(report)
    }

    /// Run cycles until a bus error occurs.
    ///
    /// There is no shutdown path; the loop lives as long as its task.
    pub async fn run(&mut self) -> Result<(), ControllerError> {
        loop {
            let report = self.run_once().await?;
            if report.polled > 0 {
                tracing::debug!(?report, "cycle complete");
            }
        }
    }

    /// Move the controller onto its own task.
    ///
    /// The handle resolves only if the loop fails. Aborting it is the only
    /// way to stop the controller.
    pub fn spawn(mut self) -> JoinHandle<Result<(), ControllerError>> {
        tokio::spawn(async move {
            let result = self.run().await;
            if let Err(e) = &result {
                tracing::error!(error = %e, fatal = e.is_fatal(), "controller stopped");
            }
            result
        })
    }

    /// Configuration in use.
    pub fn config(&self) -> &ControllerConfig {
        &self.config
    }

    fn subscribe_due(&self) -> bool {
        self.last_subscribed
            .is_none_or(|at| self.env.now() - at >= self.config.subscribe_interval)
    }

    async fn process_batch(
        &mut self,
        batch: &PollBatch,
        report: &mut CycleReport,
    ) -> Result<(), ControllerError> {
        if batch.is_empty() {
            return Ok(());
        }

        let lock = self.lock.clone();
        let _guard = lock.lock().await;

        for record in batch.values().flatten() {
            self.process_record(record, report).await?;
        }

        Ok(())
    }

    async fn process_record(
        &mut self,
        record: &BusRecord,
        report: &mut CycleReport,
    ) -> Result<(), ControllerError> {
        let Some(resource) = topics::subscription_resource(&record.topic) else {
            tracing::warn!(
                topic = %record.topic,
                partition = record.partition,
                offset = record.offset,
                "unknown topic type in message, skipping"
            );
            report.skipped += 1;
            return Ok(());
        };

        let reply = self.provisioner.reencrypt_request(
            resource,
            self.cryptokey.as_ref(),
            record.key.as_deref(),
            record.value.as_deref(),
        );

        if reply.is_rejected() {
            tracing::debug!(resource, offset = record.offset, "request rejected");
            report.rejected += 1;
            return Ok(());
        }

        let topic = topics::request_topic(resource);
        self.producer.send(&topic, reply.key, reply.value).await?;
        report.republished += 1;
        tracing::debug!(%topic, offset = record.offset, "request republished");

        Ok(())
    }
}
