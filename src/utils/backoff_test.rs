use std::time::Duration;

use rand::rngs::StdRng;
use rand::SeedableRng;

use super::backoff::*;
use crate::BackoffPolicy;

fn policy(
    base_delay_ms: u64,
    max_delay_ms: u64,
) -> BackoffPolicy {
    BackoffPolicy {
        enabled: true,
        max_retries: 0,
        base_delay_ms,
        max_delay_ms,
    }
}

#[test]
fn test_backoff_doubles_until_cap() {
    let policy = policy(100, 1000);
    let mut rng = StdRng::seed_from_u64(7);

    let delays: Vec<Duration> = (1..=6).map(|n| backoff_delay(&policy, n, &mut rng).backoff).collect();

    assert_eq!(
        delays,
        vec![
            Duration::from_millis(100),
            Duration::from_millis(200),
            Duration::from_millis(400),
            Duration::from_millis(800),
            Duration::from_millis(1000),
            Duration::from_millis(1000),
        ]
    );
}

#[test]
fn test_backoff_is_monotonic_and_jitter_is_bounded() {
    let policy = policy(50, 5_000);
    let mut rng = StdRng::seed_from_u64(42);
    let mut previous = Duration::ZERO;

    for failures in 1..200 {
        let delay = backoff_delay(&policy, failures, &mut rng);

        assert!(delay.backoff >= previous);
        assert!(delay.jitter < delay.backoff);
        previous = delay.backoff;
    }
}

#[test]
fn test_after_cap_delay_is_cap_plus_jitter() {
    let policy = policy(10, 80);
    let mut rng = StdRng::seed_from_u64(1);

    for failures in 4..100 {
        let delay = backoff_delay(&policy, failures, &mut rng);
        assert_eq!(delay.backoff, Duration::from_millis(80));
        assert!(delay.total() >= Duration::from_millis(80));
        assert!(delay.total() < Duration::from_millis(160));
    }
}

#[test]
fn test_huge_attempt_counts_do_not_overflow() {
    let policy = policy(1, u64::MAX);
    let mut rng = StdRng::seed_from_u64(3);

    let delay = backoff_delay(&policy, usize::MAX, &mut rng);
    assert_eq!(delay.backoff, Duration::from_millis(u64::MAX));
}

#[test]
fn test_zero_base_yields_zero_delay() {
    let policy = policy(0, 0);
    let mut rng = StdRng::seed_from_u64(9);

    assert_eq!(backoff_delay(&policy, 3, &mut rng).total(), Duration::ZERO);
}
