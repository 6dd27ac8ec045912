use std::time::Duration;

use super::*;

#[test]
fn test_error_fatal() {
    let err = Error::Fatal("critical failure".to_string());
    assert_eq!(err.to_string(), "Fatal error: critical failure");
}

#[test]
fn test_stopped_is_classified_as_stopped() {
    let err: Error = QueryError::Stopped.into();
    assert!(err.is_stopped());
    assert!(!err.is_malformed());
}

#[test]
fn test_unexpected_response_is_malformed() {
    let err: Error = QueryError::UnexpectedResponse {
        query: "secret.list(app)".to_string(),
        reason: "non-string in list".to_string(),
    }
    .into();
    assert!(err.is_malformed());
    assert!(!err.is_stopped());
    assert!(err.to_string().contains("secret.list(app)"));
}

#[test]
fn test_store_error_is_transient() {
    let err: Error = StoreError::Unavailable("connection refused".to_string()).into();
    assert!(!err.is_malformed());
    assert!(!err.is_stopped());
    assert_eq!(
        err.to_string(),
        "Remote store error: Remote store unavailable: connection refused"
    );
}

#[test]
fn test_store_error_timeout() {
    let err = StoreError::Timeout(Duration::from_secs(5));
    assert!(err.to_string().contains("5s"));
}

#[test]
fn test_dedup_session_lost() {
    let err: Error = DedupError::SessionLost {
        session: "abc".to_string(),
    }
    .into();
    assert_eq!(err.to_string(), "Dedup session abc lost");
}
