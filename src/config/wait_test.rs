use std::time::Duration;

use super::*;

#[test]
fn max_defaults_to_four_times_min() {
    let wait = WaitConfig {
        min_ms: 250,
        max_ms: 0,
    };

    assert_eq!(wait.min(), Duration::from_millis(250));
    assert_eq!(wait.max(), Duration::from_millis(1000));
    assert!(!wait.is_disabled());
}

#[test]
fn both_zero_is_disabled() {
    let wait = WaitConfig::default();

    assert!(wait.is_disabled());
    assert_eq!(wait.max(), Duration::ZERO);
}

#[test]
fn validate_rejects_max_below_min() {
    let wait = WaitConfig {
        min_ms: 200,
        max_ms: 100,
    };

    assert!(wait.validate().is_err());
}
