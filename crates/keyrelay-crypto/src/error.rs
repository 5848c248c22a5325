//! Error types for key derivation, ratchet persistence and controller keys.

use thiserror::Error;

/// Errors from [`crate::KeyGenerator`] operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum KeyError {
    /// Secret material has the wrong length
    #[error("invalid key length: expected {expected}, got {actual}")]
    InvalidKeyLength {
        /// Expected secret length
        expected: usize,
        /// Supplied secret length
        actual: usize,
    },

    /// Salt has the wrong length
    #[error("invalid salt length: expected {expected}, got {actual}")]
    InvalidSalt {
        /// Expected salt length
        expected: usize,
        /// Supplied salt length
        actual: usize,
    },

    /// Domain separation context has the wrong length
    #[error("invalid context length: expected {expected}, got {actual}")]
    InvalidContext {
        /// Expected context length
        expected: usize,
        /// Supplied context length
        actual: usize,
    },

    /// Requested key and nonce exceed what HKDF-SHA256 can produce
    #[error("requested {requested} bytes of output, maximum is {max}")]
    OutputTooLarge {
        /// Bytes requested (keysize + noncesize)
        requested: usize,
        /// HKDF-SHA256 output limit
        max: usize,
    },

    /// AEAD authentication failed (wrong key, salt, aad or tampered data)
    #[error("decryption failed")]
    DecryptionFailed,
}

/// Errors from a ratchet backing store.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// I/O error from the underlying file or object
    #[error("I/O error: {0}")]
    Io(String),

    /// Fault injected by [`crate::ChaoticStore`]
    #[error("injected {stage} failure")]
    Injected {
        /// Which step failed ("write" or "sync")
        stage: &'static str,
    },
}

impl From<std::io::Error> for StoreError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}

/// Errors from [`crate::Ratchet`] operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RatchetError {
    /// Stored record is truncated or not a `[index, secret]` pair
    #[error("corrupt ratchet record: {0}")]
    CorruptRecord(String),

    /// Record decoded but its secret is unusable (wrong length, empty store)
    #[error("invalid secret source: {0}")]
    InvalidSecretSource(String),

    /// Backing store read/write/sync failed
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// Key derivation failed
    #[error("key error: {0}")]
    Key(#[from] KeyError),

    /// Generation counter cannot advance further
    #[error("ratchet index overflow at {current}")]
    IndexOverflow {
        /// Index read from the store
        current: u64,
    },

    /// An earlier persist failed; this instance must not be used again
    #[error("ratchet poisoned by an earlier persistence failure")]
    Poisoned,
}

impl RatchetError {
    /// Returns true if the ratchet instance cannot continue.
    ///
    /// Persistence failures are fatal: the next secret may not be durable, so
    /// continuing risks reusing key material. Input errors only reject the
    /// offending call.
    pub fn is_fatal(&self) -> bool {
        match self {
            Self::Store(_)
            | Self::Poisoned
            | Self::CorruptRecord(_)
            | Self::InvalidSecretSource(_)
            | Self::IndexOverflow { .. } => true,

            Self::Key(_) => false,
        }
    }
}

/// Errors from [`crate::CryptoKey`] implementations and sources.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CryptoKeyError {
    /// Key source could not be loaded or has the wrong shape
    #[error("invalid secret source: {0}")]
    InvalidSecretSource(String),

    /// Wrapped key is too short to contain its salt
    #[error("wrapped key too short: {0} bytes")]
    Truncated(usize),

    /// Key derivation or AEAD failure
    #[error("key error: {0}")]
    Key(#[from] KeyError),
}
