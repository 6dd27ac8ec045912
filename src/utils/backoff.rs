use std::time::Duration;

use rand::Rng;

use crate::BackoffPolicy;

/// One computed retry delay: the capped exponential part plus its jitter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Backoff {
    pub backoff: Duration,
    pub jitter: Duration,
}

impl Backoff {
    pub fn total(&self) -> Duration {
        self.backoff + self.jitter
    }
}

/// `min(cap, base * 2^(failures - 1))` with a uniform jitter in `[0, backoff)`.
///
/// `failures` counts consecutive failures, starting at 1 for the first retry.
pub fn backoff_delay<R: Rng + ?Sized>(
    policy: &BackoffPolicy,
    failures: usize,
    rng: &mut R,
) -> Backoff {
    let backoff = exponential(policy.base_delay_ms, policy.max_delay_ms, failures);
    let jitter = if backoff == 0 { 0 } else { rng.gen_range(0..backoff) };

    Backoff {
        backoff: Duration::from_millis(backoff),
        jitter: Duration::from_millis(jitter),
    }
}

fn exponential(
    base_ms: u64,
    cap_ms: u64,
    failures: usize,
) -> u64 {
    let shift = failures.saturating_sub(1).min(63) as u32;
    let factor = 1u64.checked_shl(shift).unwrap_or(u64::MAX);
    base_ms.saturating_mul(factor).min(cap_ms)
}
