use std::sync::Mutex;

use rand::{rngs::StdRng, Rng, SeedableRng};

/// Source of uniform picks for canned replies, outfit variations and photo captions.
pub trait RandomSource: Send + Sync {
    /// Returns an index in `0..len`. `len == 0` yields 0.
    fn pick(&self, len: usize) -> usize;
}

pub struct StdRandom {
    rng: Mutex<StdRng>,
}

impl StdRandom {
    pub fn from_seed(seed: Option<u64>) -> Self {
        let rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Self {
            rng: Mutex::new(rng),
        }
    }
}

impl RandomSource for StdRandom {
    fn pick(&self, len: usize) -> usize {
        if len == 0 {
            return 0;
        }
        match self.rng.lock() {
            Ok(mut rng) => rng.gen_range(0..len),
            Err(poisoned) => poisoned.into_inner().gen_range(0..len),
        }
    }
}
