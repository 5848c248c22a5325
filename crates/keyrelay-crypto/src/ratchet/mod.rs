//! Persisted forward-secure ratchet.
//!
//! The ratchet owns one [`SecretStore`] holding a single `(index, secret)`
//! record. Every [`increment`](Ratchet::increment) consumes the stored
//! secret, derives the next one under [`RATCHET_CONTEXT`], and overwrites the
//! record before returning. The in-memory generator therefore always lags
//! the store by exactly one generation:
//!
//! ```text
//!  store:   (n, s_n) ──increment──▶ (n+1, s_{n+1})      s_{n+1} = KDF(s_n, "ratchet")
//!  memory:  generator(s_{n-1})      generator(s_n), index = n
//! ```
//!
//! Once the write is synced, `s_n` only exists in memory. Reading the store
//! yields `s_{n+1}`, from which `s_n` cannot be recomputed.
//!
//! # Failure model
//!
//! A failed write or sync leaves the instance poisoned: the next secret may
//! or may not be durable, and deriving more keys from the loaded generation
//! could reuse key material a restarted process would also derive. A
//! poisoned ratchet refuses every further call; reopen the store instead.
//!
//! # Key ids
//!
//! A node-bound key id is `SHA256(node || u128be(index))`, the same hash
//! used for topic digests. It is not a BLAKE2b `generichash`, so node key
//! ids are not interchangeable with deployments that derive them that way.

mod record;

use std::{fmt, path::Path};

use sha2::{Digest, Sha256};
use zeroize::Zeroizing;

use crate::{
    error::{RatchetError, StoreError},
    keygen::{CONTEXT_SIZE, KeyGenerator, RATCHET_CONTEXT, SALT_SIZE, SECRET_SIZE, ZERO_SALT},
    store::{FileStore, SecretStore},
};

/// Where the ratchet is in its two-step cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    /// Generator holds the secret of `index`; the store holds `index + 1`.
    Loaded,
    /// Mid-persist. Only observable after a failed write or sync.
    Advancing,
}

/// Key material for one topic at one ratchet generation.
///
/// Never persisted. The topic key is zeroized on drop, and both
/// sub-generators zeroize their own secrets.
pub struct TopicKeys {
    /// Identifies the generation (and optionally the node) to receivers.
    pub key_id: Vec<u8>,
    /// Per-topic symmetric key.
    pub topic_key: Zeroizing<[u8; SECRET_SIZE]>,
    /// Generator for a message's key field.
    pub key_generator: KeyGenerator,
    /// Generator for a message's value field.
    pub value_generator: KeyGenerator,
}

impl fmt::Debug for TopicKeys {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TopicKeys").field("key_id", &self.key_id).finish_non_exhaustive()
    }
}

/// Forward-secure ratchet over a single-record store.
///
/// One instance per store. Concurrent ratchets on the same store, in this
/// process or another, are not detected.
pub struct Ratchet<S: SecretStore> {
    store: S,
    generator: KeyGenerator,
    index: u64,
    phase: Phase,
}

impl<S: SecretStore> Ratchet<S> {
    /// Write the initial `(0, secret)` record into `store`.
    ///
    /// This is the out-of-band seeding step for a fresh store; [`open`] never
    /// invents a first secret. Any existing record is overwritten, and bytes
    /// past the end of the new record are zeroed so no part of a longer,
    /// superseded record survives.
    ///
    /// [`open`]: Self::open
    ///
    /// # Errors
    ///
    /// - `InvalidSecretSource`: `secret` is not [`SECRET_SIZE`] bytes
    /// - `Store`: the read, write or sync failed
    pub fn seed(store: &mut S, secret: &[u8]) -> Result<(), RatchetError> {
        if secret.len() != SECRET_SIZE {
            return Err(RatchetError::InvalidSecretSource(format!(
                "seed secret is {} bytes, expected {SECRET_SIZE}",
                secret.len()
            )));
        }

        let encoded = record::encode(0, secret)?;
        let existing = store.read_record()?.len();

        // Zero padding covers whatever a longer previous record left behind
        let mut padded = Zeroizing::new(vec![0u8; existing.max(encoded.len())]);
        padded[..encoded.len()].copy_from_slice(&encoded);

        store.write_at_start(&padded)?;
        store.sync()?;

        tracing::info!("ratchet store seeded at generation 0");
        Ok(())
    }

    /// Open a seeded store and perform the first increment.
    ///
    /// # Errors
    ///
    /// Anything [`increment`](Self::increment) can return. An empty store
    /// fails with `CorruptRecord`.
    pub fn open(store: S) -> Result<Self, RatchetError> {
        let generator = KeyGenerator::new(&[0u8; SECRET_SIZE])?;
        let mut ratchet = Self { store, generator, index: 0, phase: Phase::Loaded };
        ratchet.increment()?;
        Ok(ratchet)
    }

    /// Advance one generation and return the in-memory index.
    ///
    /// Reads `(index, secret)`, loads `secret`, persists
    /// `(index + 1, KDF(secret))` and returns `index`. The write is synced
    /// before this returns.
    ///
    /// # Errors
    ///
    /// - `Poisoned`: an earlier persist failed
    /// - `Store`: read, write or sync failed (write and sync failures poison)
    /// - `CorruptRecord` / `InvalidSecretSource`: the stored record is unusable
    /// - `IndexOverflow`: the stored index is `u64::MAX`; nothing is written
    pub fn increment(&mut self) -> Result<u64, RatchetError> {
        self.check_loaded()?;

        let bytes = self.store.read_record()?;
        let (index, secret) = record::decode(&bytes)?;
        drop(bytes);

        let next_index =
            index.checked_add(1).ok_or(RatchetError::IndexOverflow { current: index })?;

        self.phase = Phase::Advancing;
        self.generator.rekey(&secret)?;
        drop(secret);

        let (next_secret, _) =
            self.generator.generate(&ZERO_SALT, &RATCHET_CONTEXT, SECRET_SIZE, 0)?;
        let encoded = record::encode(next_index, &next_secret)?;
        drop(next_secret);

        if let Err(e) = self.persist(&encoded) {
            tracing::error!(index, error = %e, "ratchet persist failed, instance poisoned");
            return Err(e.into());
        }

        self.index = index;
        self.phase = Phase::Loaded;
        tracing::debug!(index, "ratchet advanced");

        Ok(index)
    }

    /// Derive key material for `topic` from the loaded generation.
    ///
    /// The topic is hashed with SHA-256; the first [`SALT_SIZE`] bytes are
    /// the KDF salt and the remaining [`CONTEXT_SIZE`] bytes the context.
    /// Without `node`, `key_id` is the big-endian `u64` index. With `node`,
    /// it is `SHA256(node || u128be(index))`, which lets receivers bucket by
    /// node without learning the node identity.
    ///
    /// # Errors
    ///
    /// Any byte string is a valid topic, including the empty one.
    ///
    /// - `Poisoned`: an earlier persist failed
    pub fn get_key_value_generators(
        &self,
        topic: &[u8],
        node: Option<&[u8]>,
    ) -> Result<TopicKeys, RatchetError> {
        self.check_loaded()?;

        let digest = Sha256::digest(topic);
        let (salt, ctx) = digest.split_at(SALT_SIZE);
        debug_assert_eq!(ctx.len(), CONTEXT_SIZE);

        let (derived, _) = self.generator.generate(salt, ctx, SECRET_SIZE, 0)?;
        let mut topic_key = Zeroizing::new([0u8; SECRET_SIZE]);
        topic_key.copy_from_slice(&derived);

        let (key_generator, value_generator) = KeyGenerator::key_value_generators(&*topic_key)?;

        Ok(TopicKeys {
            key_id: key_id(self.index, node),
            topic_key,
            key_generator,
            value_generator,
        })
    }

    /// Generation the loaded generator represents.
    pub fn index(&self) -> u64 {
        self.index
    }

    /// True once a persist has failed.
    pub fn is_poisoned(&self) -> bool {
        self.phase != Phase::Loaded
    }

    /// Backing store.
    pub fn store(&self) -> &S {
        &self.store
    }

    /// Give up the ratchet and return its store.
    pub fn into_store(self) -> S {
        self.store
    }

    fn check_loaded(&self) -> Result<(), RatchetError> {
        match self.phase {
            Phase::Loaded => Ok(()),
            Phase::Advancing => Err(RatchetError::Poisoned),
        }
    }

    fn persist(&mut self, encoded: &[u8]) -> Result<(), StoreError> {
        self.store.write_at_start(encoded)?;
        self.store.sync()
    }
}

impl Ratchet<FileStore> {
    /// Open the ratchet file at `path`. The file must already be seeded.
    pub fn open_path(path: impl AsRef<Path>) -> Result<Self, RatchetError> {
        Self::open(FileStore::open(path)?)
    }
}

impl<S: SecretStore> fmt::Debug for Ratchet<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Ratchet")
            .field("index", &self.index)
            .field("phase", &self.phase)
            .finish_non_exhaustive()
    }
}

fn key_id(index: u64, node: Option<&[u8]>) -> Vec<u8> {
    match node {
        None => index.to_be_bytes().to_vec(),
        Some(node) => Sha256::new()
            .chain_update(node)
            .chain_update(u128::from(index).to_be_bytes())
            .finalize()
            .to_vec(),
    }
}
