use super::*;

#[test]
fn test_custom_registry() {
    let registry = Registry::new_custom(Some("test".to_string()), None).unwrap();
    register_custom_metrics(&registry);

    CHANGE_EVENTS.with_label_values(&["file"]).inc();
    let metrics = registry.gather();
    let names: Vec<_> = metrics.iter().map(|m| m.get_name()).collect();
    assert!(
        names.contains(&"test_meshconf_change_events_total"),
        "Missing test_meshconf_change_events_total"
    );
}

#[test]
fn test_gather_metrics_renders_text() {
    DROPPED_EVENTS.inc();
    let body = gather_metrics();
    assert!(body.contains("meshconf_dropped_events_total"));
}
