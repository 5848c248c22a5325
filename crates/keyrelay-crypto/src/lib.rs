//! Keyrelay Cryptographic Primitives
//!
//! Key derivation, the persisted forward-secure ratchet, and the controller
//! identity key. Everything here is synchronous and deterministic given its
//! inputs; callers supply random bytes (seeds, salts) so tests can replay
//! exact sequences.
//!
//! # Key Lifecycle
//!
//! Each node seeds a ratchet store once, out of band. Every increment
//! consumes the stored secret and leaves only its successor on disk; the
//! consumed secret stays in memory for one generation and derives that
//! generation's per-topic keys.
//!
//! ```text
//! Ratchet store (index, secret)
//!        │ increment
//!        ▼
//! KeyGenerator(secret)  ──ctx "ratchet"──▶ next secret (persisted)
//!        │
//!        ▼ SHA256(topic) = salt || ctx
//! Topic Key (per generation, per topic)
//!        │
//!        ▼ ctx "key" / "value"
//! Key-field and value-field generators
//!        │
//!        ▼
//! XChaCha20-Poly1305 field encryption
//! ```
//!
//! # Security
//!
//! Forward Secrecy:
//! - The store only ever holds the next secret; the current one cannot be
//!   recomputed from it
//! - Replaced generator secrets are zeroized before the new secret is loaded
//! - A failed persist poisons the ratchet rather than risk deriving keys from
//!   a generation that a restarted node would derive again
//!
//! Domain Separation:
//! - Ratchet, key-field, value-field, field-cipher and key-wrap derivations
//!   each use a distinct fixed context
//! - The requested key and nonce sizes are bound into every derivation

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod cryptokey;
pub mod error;
pub mod keygen;
pub mod ratchet;
pub mod store;

pub use cryptokey::{CryptoKey, CryptoKeySource, Ed25519CryptoKey, SIGNATURE_SIZE, VERIFYING_KEY_SIZE};
pub use error::{CryptoKeyError, KeyError, RatchetError, StoreError};
pub use keygen::{
    CONTEXT_SIZE, KEY_CONTEXT, KeyGenerator, RATCHET_CONTEXT, SALT_SIZE, SECRET_SIZE,
    VALUE_CONTEXT, ZERO_SALT,
};
pub use ratchet::{Ratchet, TopicKeys};
pub use store::{ChaoticStore, FileStore, MemoryStore, SecretStore};
