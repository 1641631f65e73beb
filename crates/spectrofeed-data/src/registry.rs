// KeyRegistry: ordered record keys with a reshufflable order

use std::ops::Range;

use log::debug;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};

/// Every record key of a store, in the current epoch order.
///
/// Membership is fixed at construction; only the order changes.
#[derive(Debug, Clone)]
pub struct KeyRegistry {
    keys: Vec<String>,
    rng: StdRng,
}

impl KeyRegistry {
    /// Take ownership of `keys` in store enumeration order.
    ///
    /// With `seed` set, successive shuffles follow a reproducible sequence;
    /// without it the generator is seeded from OS entropy.
    pub fn new(keys: Vec<String>, seed: Option<u64>) -> Self {
        let rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Self { keys, rng }
    }

    /// Number of keys (constant after construction).
    pub fn size(&self) -> usize {
        self.keys.len()
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// Keys in the current order.
    pub fn keys(&self) -> &[String] {
        &self.keys
    }

    /// A window of the current order, clamped to the key count.
    pub fn slice(&self, range: Range<usize>) -> &[String] {
        let end = range.end.min(self.keys.len());
        let start = range.start.min(end);
        &self.keys[start..end]
    }

    /// Replace the order with a fresh permutation from the registry's generator.
    pub fn shuffle(&mut self) {
        self.keys.shuffle(&mut self.rng);
        debug!("reshuffled {} keys", self.keys.len());
    }

    /// Replace the order with a permutation drawn from a caller-supplied generator.
    pub fn shuffle_with<R: Rng + ?Sized>(&mut self, rng: &mut R) {
        self.keys.shuffle(rng);
        debug!("reshuffled {} keys (external rng)", self.keys.len());
    }
}
