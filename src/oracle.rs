//! Probability oracle: the single source of randomness behind fault decisions.

use std::sync::Mutex;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// A source of randomness the fault engine can draw on.
///
/// Abstracted behind a trait so tests can substitute a deterministic stream; production code
/// wraps a seeded PRNG.
pub trait RandomSource: Send + Sync {
    /// `p <= 0` always returns false, `p >= 1` always returns true, otherwise Bernoulli(p).
    fn trigger(&self, p: f32) -> bool;
    /// A uniformly random byte, used to corrupt data in place.
    fn random_byte(&self) -> u8;
    /// A uniformly random index in `[0, len)`. `len` must be nonzero.
    fn random_index(&self, len: usize) -> usize;
}

/// The production oracle: a single `StdRng`, seeded once from the OS at construction and
/// shared across threads behind a mutex rather than a thread-local generator, matching the
/// specification's acceptance of serialization over per-thread state.
pub struct SystemRandomSource {
    rng: Mutex<StdRng>,
}

impl SystemRandomSource {
    pub fn new() -> SystemRandomSource {
        SystemRandomSource {
            rng: Mutex::new(StdRng::from_entropy()),
        }
    }
}

impl Default for SystemRandomSource {
    fn default() -> Self {
        SystemRandomSource::new()
    }
}

impl RandomSource for SystemRandomSource {
    fn trigger(&self, p: f32) -> bool {
        if p <= 0.0 {
            return false;
        }
        if p >= 1.0 {
            return true;
        }
        let mut rng = self.rng.lock().expect("oracle mutex poisoned");
        rng.gen::<f32>() < p
    }

    fn random_byte(&self) -> u8 {
        let mut rng = self.rng.lock().expect("oracle mutex poisoned");
        rng.gen()
    }

    fn random_index(&self, len: usize) -> usize {
        let mut rng = self.rng.lock().expect("oracle mutex poisoned");
        rng.gen_range(0..len)
    }
}

#[cfg(test)]
pub mod test_support {
    use super::RandomSource;
    use std::sync::Mutex;

    /// A deterministic oracle for tests: `trigger` always returns a fixed verdict (subject to
    /// the p<=0/p>=1 contract), and byte/index draws cycle through a fixed sequence.
    pub struct FixedRandomSource {
        pub always_trigger: bool,
        bytes: Mutex<(Vec<u8>, usize)>,
        indices: Mutex<(Vec<usize>, usize)>,
    }

    impl FixedRandomSource {
        pub fn new(always_trigger: bool) -> FixedRandomSource {
            FixedRandomSource {
                always_trigger,
                bytes: Mutex::new((vec![0xAA], 0)),
                indices: Mutex::new((vec![0], 0)),
            }
        }

        pub fn with_bytes(mut self, bytes: Vec<u8>) -> Self {
            self.bytes = Mutex::new((bytes, 0));
            self
        }

        pub fn with_indices(mut self, indices: Vec<usize>) -> Self {
            self.indices = Mutex::new((indices, 0));
            self
        }
    }

    impl RandomSource for FixedRandomSource {
        fn trigger(&self, p: f32) -> bool {
            if p <= 0.0 {
                return false;
            }
            if p >= 1.0 {
                return true;
            }
            self.always_trigger
        }

        fn random_byte(&self) -> u8 {
            let mut guard = self.bytes.lock().unwrap();
            let (seq, idx) = &mut *guard;
            let b = seq[*idx % seq.len()];
            *idx += 1;
            b
        }

        fn random_index(&self, len: usize) -> usize {
            let mut guard = self.indices.lock().unwrap();
            let (seq, idx) = &mut *guard;
            let i = seq[*idx % seq.len()] % len;
            *idx += 1;
            i
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn probability_extremes_are_exact() {
        let src = SystemRandomSource::new();
        assert!(!src.trigger(0.0));
        assert!(!src.trigger(-1.0));
        assert!(src.trigger(1.0));
        assert!(src.trigger(2.0));
    }
}
