//! Seeded pseudo-random number generation.
//!
//! Every random draw in the engine (distribution sampling and the
//! expression-level `random()`) flows through one [`SharedRng`] handle so
//! that a run is bit-reproducible from its seed. A process-wide default
//! instance backs the standalone sampling entry points; executors install
//! their own seeded handle per run.

use once_cell::sync::Lazy;
use std::sync::{Arc, Mutex};
use std::time::{SystemTime, UNIX_EPOCH};

/// Linear congruential generator with 32-bit state (Numerical Recipes
/// multiplier/increment).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Lcg {
    state: u32,
}

impl Lcg {
    pub fn new(seed: u64) -> Self {
        Lcg {
            state: (seed ^ (seed >> 32)) as u32,
        }
    }

    /// Seed from wall-clock time, for callers that never set a seed.
    pub fn from_entropy() -> Self {
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos() as u64)
            .unwrap_or(0x5eed);
        Lcg::new(nanos)
    }

    #[inline]
    pub fn next_u32(&mut self) -> u32 {
        self.state = self.state.wrapping_mul(1_664_525).wrapping_add(1_013_904_223);
        self.state
    }

    /// Uniform draw in `[0, 1)`.
    #[inline]
    pub fn next_f64(&mut self) -> f64 {
        self.next_u32() as f64 / 4_294_967_296.0
    }
}

/// Clonable, thread-safe handle to one LCG stream.
///
/// Clones share the underlying state: the executor and the expression
/// evaluator hold clones of the same handle and therefore consume one
/// stream in node-evaluation order.
#[derive(Debug, Clone)]
pub struct SharedRng {
    inner: Arc<Mutex<Lcg>>,
}

impl SharedRng {
    pub fn seeded(seed: u64) -> Self {
        SharedRng {
            inner: Arc::new(Mutex::new(Lcg::new(seed))),
        }
    }

    pub fn from_entropy() -> Self {
        SharedRng {
            inner: Arc::new(Mutex::new(Lcg::from_entropy())),
        }
    }

    pub fn next_f64(&self) -> f64 {
        self.inner.lock().expect("rng lock poisoned").next_f64()
    }

    /// Reset the stream in place. All clones observe the new seed.
    pub fn reseed(&self, seed: u64) {
        *self.inner.lock().expect("rng lock poisoned") = Lcg::new(seed);
    }
}

static DEFAULT_RNG: Lazy<SharedRng> = Lazy::new(SharedRng::from_entropy);

/// The process-wide default stream used by standalone sampling calls.
pub fn default_rng() -> SharedRng {
    DEFAULT_RNG.clone()
}

/// Reseed the process-wide default stream.
pub fn set_seed(seed: u64) {
    DEFAULT_RNG.reseed(seed);
}

/// Derive a per-stream seed from a master seed (splitmix64 finalizer).
/// Used by the parallel Monte Carlo driver: stream `i` gets
/// `derive_seed(master, i)`.
pub fn derive_seed(master: u64, stream: u64) -> u64 {
    let mut z = master ^ stream.wrapping_mul(0x9e37_79b9_7f4a_7c15);
    z = (z ^ (z >> 30)).wrapping_mul(0xbf58_476d_1ce4_e5b9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94d0_49bb_1331_11eb);
    z ^ (z >> 31)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_seed_same_stream() {
        let mut a = Lcg::new(42);
        let mut b = Lcg::new(42);
        for _ in 0..1000 {
            assert_eq!(a.next_u32(), b.next_u32());
        }
    }

    #[test]
    fn draws_are_in_unit_interval() {
        let mut rng = Lcg::new(7);
        for _ in 0..10_000 {
            let u = rng.next_f64();
            assert!((0.0..1.0).contains(&u));
        }
    }

    #[test]
    fn uniform_mean_is_near_half() {
        let mut rng = Lcg::new(123);
        let n = 100_000;
        let mean: f64 = (0..n).map(|_| rng.next_f64()).sum::<f64>() / n as f64;
        assert!((mean - 0.5).abs() < 0.01, "mean {mean}");
    }

    #[test]
    fn shared_handle_clones_share_state() {
        let rng = SharedRng::seeded(1);
        let clone = rng.clone();
        let a = rng.next_f64();
        let b = clone.next_f64();
        // the clone continued the stream, it did not restart it
        let mut reference = Lcg::new(1);
        assert_eq!(a, reference.next_f64());
        assert_eq!(b, reference.next_f64());
    }

    #[test]
    fn derived_seeds_differ_per_stream() {
        let s0 = derive_seed(42, 0);
        let s1 = derive_seed(42, 1);
        let s2 = derive_seed(43, 0);
        assert_ne!(s0, s1);
        assert_ne!(s0, s2);
        assert_eq!(s0, derive_seed(42, 0));
    }
}
