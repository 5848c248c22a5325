//! Controller identity: a signing key plus a key-wrapping generator.
//!
//! A controller re-signs provisioner requests and wraps keys for storage.
//! Both capabilities come from one 32-byte seed: the seed is the Ed25519
//! signing key, and the wrapping secret is derived from it under
//! [`WRAP_CONTEXT`], so the two uses never share raw key material.

use std::{
    fmt,
    path::{Path, PathBuf},
    sync::Arc,
};

use ed25519_dalek::{Signer, SigningKey};
use zeroize::Zeroizing;

use crate::{
    error::CryptoKeyError,
    keygen::{CONTEXT_SIZE, KeyGenerator, SALT_SIZE, SECRET_SIZE, ZERO_SALT, pad_context},
    store::{FileStore, SecretStore},
};

/// Context for deriving the key-wrapping secret from the signing seed.
pub const WRAP_CONTEXT: [u8; CONTEXT_SIZE] = pad_context(b"wrap");

/// Ed25519 signature size.
pub const SIGNATURE_SIZE: usize = 64;

/// Ed25519 verifying key size.
pub const VERIFYING_KEY_SIZE: usize = 32;

/// Signing and key-wrapping capabilities a controller needs.
pub trait CryptoKey: Send + Sync {
    /// Sign `msg` with the controller's signing key.
    fn sign_spk(&self, msg: &[u8]) -> [u8; SIGNATURE_SIZE];

    /// Public half of the signing key.
    fn verifying_key(&self) -> [u8; VERIFYING_KEY_SIZE];

    /// Wrap `key` under `salt`, binding `key_index` as associated data.
    ///
    /// Returns `salt || ciphertext`. `salt` must be fresh for every call.
    fn encrypt_key(
        &self,
        key_index: &[u8],
        key: &[u8],
        salt: &[u8],
    ) -> Result<Vec<u8>, CryptoKeyError>;

    /// Unwrap a key produced by [`encrypt_key`](Self::encrypt_key).
    fn decrypt_key(
        &self,
        key_index: &[u8],
        wrapped: &[u8],
    ) -> Result<Zeroizing<Vec<u8>>, CryptoKeyError>;
}

/// [`CryptoKey`] backed by an Ed25519 seed.
pub struct Ed25519CryptoKey {
    signing: SigningKey,
    wrap: KeyGenerator,
}

impl Ed25519CryptoKey {
    /// Build from a raw 32-byte seed.
    pub fn from_seed(seed: &[u8]) -> Result<Self, CryptoKeyError> {
        let seed: &[u8; SECRET_SIZE] = seed.try_into().map_err(|_| {
            CryptoKeyError::InvalidSecretSource(format!(
                "seed is {} bytes, expected {SECRET_SIZE}",
                seed.len()
            ))
        })?;

        let (wrap_secret, _) =
            KeyGenerator::new(seed)?.generate(&ZERO_SALT, &WRAP_CONTEXT, SECRET_SIZE, 0)?;

        Ok(Self { signing: SigningKey::from_bytes(seed), wrap: KeyGenerator::new(&wrap_secret)? })
    }

    /// Load from a file holding exactly the raw seed.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, CryptoKeyError> {
        let path = path.as_ref();
        let seed = FileStore::open(path)
            .and_then(|mut store| store.read_record())
            .map_err(|e| CryptoKeyError::InvalidSecretSource(e.to_string()))?;

        Self::from_seed(&seed).map_err(|e| match e {
            CryptoKeyError::InvalidSecretSource(reason) => {
                CryptoKeyError::InvalidSecretSource(format!("{}: {reason}", path.display()))
            },
            other => other,
        })
    }

    /// Write `seed` to a new file at `path` and load it.
    ///
    /// Fails if the file already exists.
    pub fn create_seed_file(path: impl AsRef<Path>, seed: &[u8]) -> Result<Self, CryptoKeyError> {
        let key = Self::from_seed(seed)?;

        let mut store = FileStore::create_new(path)
            .map_err(|e| CryptoKeyError::InvalidSecretSource(e.to_string()))?;
        store
            .write_at_start(seed)
            .and_then(|()| store.sync())
            .map_err(|e| CryptoKeyError::InvalidSecretSource(e.to_string()))?;

        tracing::info!(path = %store.path().display(), "controller key created");
        Ok(key)
    }
}

impl CryptoKey for Ed25519CryptoKey {
    fn sign_spk(&self, msg: &[u8]) -> [u8; SIGNATURE_SIZE] {
        self.signing.sign(msg).to_bytes()
    }

    fn verifying_key(&self) -> [u8; VERIFYING_KEY_SIZE] {
        self.signing.verifying_key().to_bytes()
    }

    fn encrypt_key(
        &self,
        key_index: &[u8],
        key: &[u8],
        salt: &[u8],
    ) -> Result<Vec<u8>, CryptoKeyError> {
        let ciphertext = self.wrap.seal(salt, key_index, key)?;

        let mut wrapped = Vec::with_capacity(salt.len() + ciphertext.len());
        wrapped.extend_from_slice(salt);
        wrapped.extend_from_slice(&ciphertext);
        Ok(wrapped)
    }

    fn decrypt_key(
        &self,
        key_index: &[u8],
        wrapped: &[u8],
    ) -> Result<Zeroizing<Vec<u8>>, CryptoKeyError> {
        if wrapped.len() < SALT_SIZE {
            return Err(CryptoKeyError::Truncated(wrapped.len()));
        }

        let (salt, ciphertext) = wrapped.split_at(SALT_SIZE);
        Ok(Zeroizing::new(self.wrap.open(salt, key_index, ciphertext)?))
    }
}

impl fmt::Debug for Ed25519CryptoKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Ed25519CryptoKey")
            .field("verifying_key", &self.signing.verifying_key())
            .finish_non_exhaustive()
    }
}

/// Where a controller's [`CryptoKey`] comes from.
#[derive(Clone)]
pub enum CryptoKeySource {
    /// Seed file on disk.
    File(PathBuf),
    /// Already-constructed key object.
    Object(Arc<dyn CryptoKey>),
}

impl CryptoKeySource {
    /// Load or hand back the key.
    pub fn resolve(&self) -> Result<Arc<dyn CryptoKey>, CryptoKeyError> {
        match self {
            Self::File(path) => Ok(Arc::new(Ed25519CryptoKey::load(path)?)),
            Self::Object(key) => Ok(Arc::clone(key)),
        }
    }
}

impl fmt::Debug for CryptoKeySource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::File(path) => f.debug_tuple("File").field(path).finish(),
            Self::Object(_) => f.write_str("Object(..)"),
        }
    }
}
