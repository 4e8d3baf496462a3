//! Probabilistic trigger shared by every fault layer

use std::sync::{Arc, OnceLock};
use std::time::{SystemTime, UNIX_EPOCH};

use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Uniform random source safe to share across concurrently handled requests.
///
/// The generator sits behind a mutex that is held only while one value is
/// drawn, never across a delay or a downstream call.
pub struct RandomSource {
    rng: Mutex<StdRng>,
}

impl RandomSource {
    /// Create a source seeded from the current wall-clock time
    #[must_use]
    pub fn from_time() -> Self {
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_nanos();
        // Fold the high bits in so two sources created in the same second differ.
        #[allow(clippy::cast_possible_truncation)]
        let seed = (nanos as u64) ^ ((nanos >> 64) as u64);
        Self::seeded(seed)
    }

    /// Create a deterministic source
    #[must_use]
    pub fn seeded(seed: u64) -> Self {
        Self {
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
        }
    }

    /// Process-wide source, created on first use and kept for the process lifetime
    #[must_use]
    pub fn shared() -> Arc<Self> {
        static SHARED: OnceLock<Arc<RandomSource>> = OnceLock::new();
        Arc::clone(SHARED.get_or_init(|| Arc::new(Self::from_time())))
    }

    /// Draw one value in `[0, 1)`
    pub fn next_f64(&self) -> f64 {
        self.rng.lock().random::<f64>()
    }

    /// Decide whether a fault with the given ratio fires on this request.
    ///
    /// Ratios are not validated: `<= 0` never fires, `>= 1` always fires,
    /// NaN never fires.
    pub fn decide(&self, ratio: f64) -> bool {
        self.next_f64() < ratio
    }
}

impl std::fmt::Debug for RandomSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RandomSource").finish_non_exhaustive()
    }
}

/// Decide using the process-wide [`RandomSource::shared`] source
pub fn decide(ratio: f64) -> bool {
    RandomSource::shared().decide(ratio)
}

#[cfg(test)]
mod tests {
    use super::*;

    const DRAWS: usize = 10_000;

    #[test]
    fn test_zero_and_negative_ratios_never_fire() {
        let source = RandomSource::seeded(1);
        for ratio in [0.0, -0.5, -1.0, f64::NEG_INFINITY, f64::NAN] {
            assert!((0..DRAWS).all(|_| !source.decide(ratio)), "ratio {ratio} fired");
        }
    }

    #[test]
    fn test_one_and_above_always_fire() {
        let source = RandomSource::seeded(2);
        for ratio in [1.0, 1.5, 100.0, f64::INFINITY] {
            assert!((0..DRAWS).all(|_| source.decide(ratio)), "ratio {ratio} missed");
        }
    }

    #[test]
    fn test_draws_are_in_unit_interval() {
        let source = RandomSource::from_time();
        for _ in 0..DRAWS {
            let v = source.next_f64();
            assert!((0.0..1.0).contains(&v));
        }
    }

    #[test]
    fn test_half_ratio_converges() {
        let source = RandomSource::seeded(7);
        let n = 100_000;
        let fired = (0..n).filter(|_| source.decide(0.5)).count();
        #[allow(clippy::cast_precision_loss)]
        let fraction = fired as f64 / n as f64;
        assert!((fraction - 0.5).abs() < 0.01, "fraction was {fraction}");
    }

    #[test]
    fn test_same_seed_same_sequence() {
        let a = RandomSource::seeded(42);
        let b = RandomSource::seeded(42);
        let seq_a: Vec<bool> = (0..64).map(|_| a.decide(0.3)).collect();
        let seq_b: Vec<bool> = (0..64).map(|_| b.decide(0.3)).collect();
        assert_eq!(seq_a, seq_b);
    }

    #[test]
    fn test_shared_source_is_singleton() {
        assert!(Arc::ptr_eq(&RandomSource::shared(), &RandomSource::shared()));
        assert!(decide(1.0));
        assert!(!decide(0.0));
    }

    #[test]
    fn test_concurrent_draws() {
        let source = Arc::new(RandomSource::seeded(9));
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let source = Arc::clone(&source);
                std::thread::spawn(move || (0..1_000).filter(|_| source.decide(1.0)).count())
            })
            .collect();
        let total: usize = handles.into_iter().map(|h| h.join().unwrap()).sum();
        assert_eq!(total, 8_000);
    }
}
