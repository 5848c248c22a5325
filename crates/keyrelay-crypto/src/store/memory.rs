#![allow(clippy::disallowed_types, reason = "Synchronous in-memory operations only")]

use std::sync::{Arc, Mutex, MutexGuard};

use zeroize::{Zeroize, Zeroizing};

use super::SecretStore;
use crate::error::StoreError;

/// Object-backed store for tests and embedding.
///
/// Clones share the same buffer, so a test can hand one clone to a ratchet
/// and inspect or corrupt the record through another. Each write is applied
/// under one lock acquisition, which makes it atomic for readers.
#[derive(Clone, Default)]
pub struct MemoryStore {
    inner: Arc<Mutex<Vec<u8>>>,
}

impl MemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store holding `bytes`.
    pub fn with_contents(bytes: &[u8]) -> Self {
        Self { inner: Arc::new(Mutex::new(bytes.to_vec())) }
    }

    /// Copy of the current contents.
    pub fn contents(&self) -> Result<Zeroizing<Vec<u8>>, StoreError> {
        Ok(Zeroizing::new(self.lock()?.clone()))
    }

    /// Replace the contents wholesale, e.g. to simulate a truncated file.
    pub fn replace(&self, bytes: &[u8]) -> Result<(), StoreError> {
        let mut buffer = self.lock()?;
        buffer.zeroize();
        buffer.extend_from_slice(bytes);
        Ok(())
    }

    fn lock(&self) -> Result<MutexGuard<'_, Vec<u8>>, StoreError> {
        self.inner.lock().map_err(|_| StoreError::Io("memory store mutex poisoned".to_string()))
    }
}

impl SecretStore for MemoryStore {
    fn read_record(&mut self) -> Result<Zeroizing<Vec<u8>>, StoreError> {
        self.contents()
    }

    fn write_at_start(&mut self, record: &[u8]) -> Result<(), StoreError> {
        let mut buffer = self.lock()?;
        if buffer.len() < record.len() {
            buffer.resize(record.len(), 0);
        }
        buffer[..record.len()].copy_from_slice(record);
        Ok(())
    }

    fn sync(&mut self) -> Result<(), StoreError> {
        Ok(())
    }
}

impl Drop for MemoryStore {
    fn drop(&mut self) {
        // Last clone out wipes the buffer
        if Arc::strong_count(&self.inner) == 1
            && let Ok(mut buffer) = self.inner.lock()
        {
            buffer.zeroize();
        }
    }
}
