//! Chaotic store wrapper for fault injection testing
//!
//! Wraps another store and randomly fails operations, to verify that a
//! failed persist never leaves a half-advanced ratchet behind. A failed
//! write leaves the inner store untouched; a failed sync happens after the
//! inner write has been applied.

use zeroize::Zeroizing;

use super::SecretStore;
use crate::error::StoreError;

/// Chaotic store wrapper that randomly injects failures
#[derive(Clone)]
pub struct ChaoticStore<S: SecretStore> {
    inner: S,
    /// Failure rate (0.0 = never fail, 1.0 = always fail)
    failure_rate: f64,
    /// RNG state for deterministic chaos
    rng: ChaoticRng,
    /// Operations attempted, including failed ones
    operation_count: usize,
}

/// Simple deterministic RNG for chaos injection
///
/// Linear congruential generator, so chaos runs are reproducible from a seed.
#[derive(Clone)]
struct ChaoticRng {
    state: u64,
}

impl ChaoticRng {
    fn new(seed: u64) -> Self {
        Self { state: seed }
    }

    /// Generate next random value [0.0, 1.0)
    fn next(&mut self) -> f64 {
        // LCG constants from Numerical Recipes
        const A: u64 = 1_664_525;
        const C: u64 = 1_013_904_223;
        const M: u64 = 1u64 << 32;

        self.state = (A.wrapping_mul(self.state).wrapping_add(C)) % M;
        (self.state as f64) / (M as f64)
    }

    fn should_fail(&mut self, failure_rate: f64) -> bool {
        self.next() < failure_rate
    }
}

impl<S: SecretStore> ChaoticStore<S> {
    /// Create a new chaotic store wrapper
    ///
    /// # Panics
    ///
    /// Panics if `failure_rate` is not in [0.0, 1.0]
    pub fn new(inner: S, failure_rate: f64) -> Self {
        Self::with_seed(inner, failure_rate, 0x1234_5678_9ABC_DEF0)
    }

    /// Create with explicit seed for reproducible chaos
    ///
    /// # Panics
    ///
    /// Panics if `failure_rate` is not in [0.0, 1.0]
    #[allow(clippy::panic)]
    pub fn with_seed(inner: S, failure_rate: f64, seed: u64) -> Self {
        assert!(
            (0.0..=1.0).contains(&failure_rate),
            "failure_rate must be between 0.0 and 1.0, got {failure_rate}"
        );

        Self { inner, failure_rate, rng: ChaoticRng::new(seed), operation_count: 0 }
    }

    /// Underlying store (for checking invariants after chaos).
    pub fn inner(&self) -> &S {
        &self.inner
    }

    /// Unwrap into the underlying store, e.g. to reopen without chaos.
    pub fn into_inner(self) -> S {
        self.inner
    }

    /// Total number of store operations attempted.
    pub fn operation_count(&self) -> usize {
        self.operation_count
    }

    fn inject(&mut self, stage: &'static str) -> Result<(), StoreError> {
        self.operation_count += 1;
        if self.rng.should_fail(self.failure_rate) {
            return Err(StoreError::Injected { stage });
        }
        Ok(())
    }
}

impl<S: SecretStore> SecretStore for ChaoticStore<S> {
    fn read_record(&mut self) -> Result<Zeroizing<Vec<u8>>, StoreError> {
        self.inject("read")?;
        self.inner.read_record()
    }

    fn write_at_start(&mut self, record: &[u8]) -> Result<(), StoreError> {
        self.inject("write")?;
        self.inner.write_at_start(record)
    }

    fn sync(&mut self) -> Result<(), StoreError> {
        self.inner.sync()?;
        self.inject("sync")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    #[test]
    fn zero_failure_rate_never_fails() {
        let mut chaotic = ChaoticStore::new(MemoryStore::new(), 0.0);

        for i in 0..100u8 {
            chaotic.write_at_start(&[i]).expect("should not fail with 0% rate");
            chaotic.sync().expect("should not fail with 0% rate");
        }

        assert_eq!(&chaotic.inner().contents().unwrap()[..], &[99]);
        assert_eq!(chaotic.operation_count(), 200);
    }

    #[test]
    fn full_failure_rate_always_fails() {
        let mut chaotic = ChaoticStore::new(MemoryStore::with_contents(b"old"), 1.0);

        assert_eq!(chaotic.write_at_start(b"new"), Err(StoreError::Injected { stage: "write" }));
        assert!(chaotic.read_record().is_err());
        assert_eq!(&chaotic.inner().contents().unwrap()[..], b"old");
    }

    #[test]
    fn sync_failure_keeps_landed_write() {
        let store = MemoryStore::with_contents(b"old");
        let mut writer = store.clone();
        let mut chaotic = ChaoticStore::new(store, 1.0);

        writer.write_at_start(b"new").unwrap();

        assert_eq!(chaotic.sync(), Err(StoreError::Injected { stage: "sync" }));
        assert_eq!(&chaotic.into_inner().contents().unwrap()[..], b"new");
    }

    #[test]
    fn deterministic_with_seed() {
        let mut chaotic1 = ChaoticStore::with_seed(MemoryStore::new(), 0.5, 42);
        let mut chaotic2 = ChaoticStore::with_seed(MemoryStore::new(), 0.5, 42);

        for i in 0..100u8 {
            let result1 = chaotic1.write_at_start(&[i]);
            let result2 = chaotic2.write_at_start(&[i]);
            assert_eq!(result1.is_ok(), result2.is_ok(), "determinism violated at iteration {i}");
        }
    }

    #[test]
    #[should_panic(expected = "failure_rate must be between 0.0 and 1.0")]
    fn rejects_invalid_failure_rate() {
        let _ = ChaoticStore::new(MemoryStore::new(), 1.5);
    }
}
