//! Backing stores for the ratchet record.
//!
//! A store holds exactly one small record, always rewritten in place at
//! offset 0. The trait is synchronous and split into write and sync steps so
//! the ratchet can treat "seek, write, flush" as one logical transaction and
//! fault injection can target either step.
//!
//! Stores never write through a temp file and rename. Superseded secret
//! material must not survive in a leftover file.

mod chaotic;
mod file;
mod memory;

pub use chaotic::ChaoticStore;
pub use file::FileStore;
pub use memory::MemoryStore;
use zeroize::Zeroizing;

use crate::error::StoreError;

/// Single-record storage for ratchet state.
///
/// # Invariants
///
/// - One writer per store. Concurrent writers from other processes are not
///   detected.
/// - `write_at_start` is all-or-nothing: the record is far smaller than a
///   storage sector, and object-backed stores must apply a write as one
///   operation.
/// - After `sync` returns `Ok`, the last written record is durable.
pub trait SecretStore: Send {
    /// Read the whole store contents from offset 0.
    fn read_record(&mut self) -> Result<Zeroizing<Vec<u8>>, StoreError>;

    /// Overwrite the store from offset 0 with `record`.
    fn write_at_start(&mut self, record: &[u8]) -> Result<(), StoreError>;

    /// Flush buffered data and wait for it to reach durable storage.
    fn sync(&mut self) -> Result<(), StoreError>;
}
