use super::*;

fn create_test_registry() -> Registry {
    let registry = Registry::new_custom(Some("mirror".to_string()), None).unwrap();
    register_custom_metrics(&registry);
    registry
}

#[test]
fn test_custom_registry() {
    let registry = create_test_registry();

    QUERY_FETCH_TOTAL.with_label_values(&["kv.get"]).inc();
    let metrics = registry.gather();
    assert!(!metrics.is_empty());

    let metric_names: Vec<_> = metrics.iter().map(|m| m.get_name()).collect();
    assert!(
        metric_names.contains(&"mirror_query_fetch_total"),
        "Missing mirror_query_fetch_total"
    );
}

#[test]
fn test_counter_increment_per_kind() {
    QUERY_FETCH_ERRORS.with_label_values(&["test.kind"]).reset();

    QUERY_FETCH_ERRORS.with_label_values(&["test.kind"]).inc();
    QUERY_FETCH_ERRORS.with_label_values(&["test.kind"]).inc();

    assert_eq!(QUERY_FETCH_ERRORS.with_label_values(&["test.kind"]).get(), 2);
    assert_eq!(QUERY_FETCH_ERRORS.with_label_values(&["test.other"]).get(), 0);
}

#[test]
fn test_gather_metrics_renders_text_format() {
    DEDUP_PROMOTIONS.inc();

    let body = gather_metrics();

    assert!(body.contains("# TYPE dedup_promotions counter"), "{body}");
}
