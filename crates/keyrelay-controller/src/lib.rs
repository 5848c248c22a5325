//! Keyrelay controller.
//!
//! A controller watches every `<resource>.subs` topic, asks a provisioner
//! oracle whether each key request is authorized, and republishes accepted
//! requests on `<resource>.reqs`, re-signed with the controller's own key, for
//! the resource owner to answer.
//!
//! # Architecture
//!
//! The protocol loop is generic over the bus client and the environment, so
//! the same [`Controller`] runs against a production client with
//! [`SystemEnv`] and against [`MemoryBus`] with a virtual clock in tests.
//!
//! # Components
//!
//! - [`Controller`]: subscribe, poll, re-authorize, republish, commit
//! - [`BusConsumer`] / [`BusProducer`]: the bus operations the loop needs
//! - [`Provisioner`]: request authorization oracle, with the file-backed
//!   [`AllowlistProvisioner`]
//! - [`SharedLock`]: critical section shared by components using one client
//! - [`SystemEnv`]: production environment (real time, crypto RNG)

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod bus;
mod config;
mod controller;
mod env;
mod error;
mod lock;
pub mod provisioner;
mod system_env;
pub mod topics;

pub use bus::{BusCall, BusConsumer, BusProducer, BusRecord, MemoryBus, PollBatch, TopicPartition};
pub use config::{
    ControllerConfig, DEFAULT_POLL_MAX_RECORDS, DEFAULT_POLL_TIMEOUT, DEFAULT_SUBSCRIBE_INTERVAL,
};
pub use controller::{Controller, CycleReport};
pub use env::Environment;
pub use error::{BusError, ControllerError, ProvisionerError};
pub use lock::SharedLock;
pub use provisioner::{AllowlistProvisioner, Provisioner, ProvisionerSource, Reencrypted};
pub use system_env::SystemEnv;
