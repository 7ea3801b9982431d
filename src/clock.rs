//! Clock & nonce generation (`spec.md` §4.7).

use rand::Rng;
use rand::distr::Alphanumeric;
use std::time::{SystemTime, UNIX_EPOCH};

/// Wall-clock access, indirected so tests can substitute a fixed time.
pub trait Clock: Send + Sync {
    fn now(&self) -> i64;
}

/// The real system clock, seconds since the Unix epoch.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> i64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("system clock before Unix epoch")
            .as_secs() as i64
    }
}

/// A fixed clock for deterministic tests.
#[derive(Debug, Clone, Copy)]
pub struct FixedClock(pub i64);

impl Clock for FixedClock {
    fn now(&self) -> i64 {
        self.0
    }
}

/// A clock whose reading can be advanced mid-test, for scenarios that
/// depend on wall time elapsing between two calls.
#[derive(Debug)]
pub struct AdjustableClock(std::sync::atomic::AtomicI64);

impl AdjustableClock {
    pub fn new(start: i64) -> Self {
        AdjustableClock(std::sync::atomic::AtomicI64::new(start))
    }

    pub fn set(&self, value: i64) {
        self.0.store(value, std::sync::atomic::Ordering::SeqCst);
    }
}

impl Clock for AdjustableClock {
    fn now(&self) -> i64 {
        self.0.load(std::sync::atomic::Ordering::SeqCst)
    }
}

/// Generate a server nonce: alphanumeric, length uniformly chosen in
/// `[16, 40]` unless `fixed_len` is configured (`spec.md` §4.7).
pub fn generate_nonce(fixed_len: Option<usize>) -> String {
    let mut rng = rand::rng();
    let len = fixed_len.unwrap_or_else(|| rng.random_range(16..=40));
    (&mut rng)
        .sample_iter(Alphanumeric)
        .take(len)
        .map(char::from)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nonce_respects_fixed_length() {
        let nonce = generate_nonce(Some(20));
        assert_eq!(nonce.len(), 20);
        assert!(nonce.chars().all(|c| c.is_ascii_alphanumeric()));
    }

    #[test]
    fn nonce_default_length_in_range() {
        for _ in 0..50 {
            let nonce = generate_nonce(None);
            assert!(nonce.len() >= 16 && nonce.len() <= 40);
        }
    }

    #[test]
    fn fixed_clock_reports_configured_time() {
        let clock = FixedClock(1_700_000_000);
        assert_eq!(clock.now(), 1_700_000_000);
    }
}
