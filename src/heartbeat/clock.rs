//! Time and randomness sources used by the heartbeat schedule

use rand::Rng;

/// Wall clock in seconds since Unix epoch
pub trait Clock: Send + Sync {
    fn now(&self) -> f64;
}

/// Source of uniform random fractions in `[0, 1)`
pub trait JitterSource: Send + Sync {
    fn fraction(&self) -> f64;
}

/// System wall clock
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> f64 {
        metal_shared::now_secs()
    }
}

/// Jitter drawn from the thread-local RNG
#[derive(Debug, Clone, Copy, Default)]
pub struct ThreadRngJitter;

impl JitterSource for ThreadRngJitter {
    fn fraction(&self) -> f64 {
        rand::thread_rng().gen::<f64>()
    }
}
