//! Injectable random-byte source
//!
//! Every key, IV and share the engine generates is drawn from a
//! [`RandomSource`] handed to it at construction, so tests can swap the
//! operating-system generator for a seeded one.

use rand::rngs::{OsRng, StdRng};
use rand::{RngCore, SeedableRng};
use std::fmt;
use std::sync::{Arc, Mutex};

pub trait RandomSource: Send + Sync {
    fn fill_bytes(&self, dest: &mut [u8]);
}

/// Operating-system CSPRNG
#[derive(Debug, Default, Clone, Copy)]
pub struct OsRandom;

impl RandomSource for OsRandom {
    fn fill_bytes(&self, dest: &mut [u8]) {
        OsRng.fill_bytes(dest);
    }
}

/// Deterministic generator for reproducible tests; never use for real data
pub struct SeededRandom {
    rng: Mutex<StdRng>,
}

impl SeededRandom {
    pub fn new(seed: u64) -> Self {
        Self {
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
        }
    }
}

impl fmt::Debug for SeededRandom {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SeededRandom").finish_non_exhaustive()
    }
}

impl RandomSource for SeededRandom {
    fn fill_bytes(&self, dest: &mut [u8]) {
        let mut rng = match self.rng.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        rng.fill_bytes(dest);
    }
}

/// Shared handle used by engine constructors
pub type SharedRandom = Arc<dyn RandomSource>;

/// Default OS-backed handle
pub fn os_random() -> SharedRandom {
    Arc::new(OsRandom)
}

/// Draw `len` fresh bytes
pub fn random_bytes(rng: &dyn RandomSource, len: usize) -> Vec<u8> {
    let mut buf = vec![0u8; len];
    rng.fill_bytes(&mut buf);
    buf
}
