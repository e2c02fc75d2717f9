use std::sync::Arc;
use std::thread::sleep;
use std::time::Duration;

use parking_lot::Mutex;

use super::*;
use crate::test_utils::BoundTarget;
use crate::RegistryConfig;
use crate::ReloadableSchema;
use crate::ScopeIndex;

fn registry_with_interval(interval_ms: u64) -> BindingRegistry {
    BindingRegistry::new(
        Arc::new(ScopeIndex::new()),
        &RegistryConfig {
            sweep_interval_in_ms: interval_ms,
        },
    )
}

const OWNER: OwnerId = OwnerId(1);

#[test]
fn test_register_and_lookup() {
    let registry = registry_with_interval(60_000);
    let target = Arc::new(BoundTarget::default());

    let outcome = registry.register(OWNER, "k1", BoundTarget::binding(&target, "${k1}"));
    assert_eq!(outcome, RegisterOutcome::Tracked);

    let found = registry.lookup(OWNER, "k1");
    assert_eq!(found.len(), 1);
    found[0].apply("v1").unwrap();
    assert_eq!(target.value(), "v1");

    assert!(registry.lookup(OwnerId(2), "k1").is_empty());
    assert!(registry.lookup(OWNER, "k2").is_empty());
    registry.shutdown();
}

#[test]
fn test_same_identity_replaces_prior_binding() {
    let registry = registry_with_interval(60_000);
    let target = Arc::new(BoundTarget::default());

    registry.register(OWNER, "k1", BoundTarget::binding(&target, "${k1}"));
    let outcome = registry.register(OWNER, "k1", BoundTarget::binding(&target, "${k1:fallback}"));

    assert_eq!(outcome, RegisterOutcome::Replaced);
    let found = registry.lookup(OWNER, "k1");
    assert_eq!(found.len(), 1);
    assert_eq!(found[0].raw_template(), "${k1:fallback}");

    // a second target on the same key is appended
    let other = Arc::new(BoundTarget::default());
    assert_eq!(
        registry.register(OWNER, "k1", BoundTarget::binding(&other, "${k1}")),
        RegisterOutcome::Tracked
    );
    assert_eq!(registry.lookup(OWNER, "k1").len(), 2);
    registry.shutdown();
}

#[test]
fn test_coarse_keys_are_not_tracked() {
    let scope = Arc::new(ScopeIndex::new());
    scope.register_schema(&ReloadableSchema::new("").collection("servers"));
    let registry = BindingRegistry::new(scope, &RegistryConfig::default());
    let target = Arc::new(BoundTarget::default());

    let outcome = registry.register(OWNER, "servers[0]", BoundTarget::binding(&target, "${servers[0]}"));

    assert_eq!(outcome, RegisterOutcome::Coarse);
    assert!(registry.is_empty());
    assert!(!registry.sweeper_running());
}

#[test]
fn test_lookup_skips_dead_targets_before_sweep() {
    let registry = registry_with_interval(60_000);
    let target = Arc::new(BoundTarget::default());
    registry.register(OWNER, "k1", BoundTarget::binding(&target, "${k1}"));

    drop(target);

    assert!(registry.lookup(OWNER, "k1").is_empty());
    assert_eq!(registry.len(), 1);
    assert_eq!(registry.sweep(), 1);
    assert_eq!(registry.len(), 0);
    registry.shutdown();
}

#[test]
fn test_sweeper_removes_dead_bindings_after_interval() {
    let registry = registry_with_interval(20);
    let alive = Arc::new(BoundTarget::default());
    let doomed = Arc::new(BoundTarget::default());
    registry.register(OWNER, "k1", BoundTarget::binding(&alive, "${k1}"));
    registry.register(OWNER, "k2", BoundTarget::binding(&doomed, "${k2}"));
    assert!(registry.sweeper_running());

    drop(doomed);
    sleep(Duration::from_millis(200));

    assert_eq!(registry.len(), 1);
    assert!(registry.lookup(OWNER, "k2").is_empty());
    assert_eq!(registry.lookup(OWNER, "k1").len(), 1);

    registry.shutdown();
    assert!(!registry.sweeper_running());
}

#[test]
fn test_sweeper_starts_once_under_concurrent_registration() {
    let registry = registry_with_interval(60_000);
    let targets: Vec<Arc<BoundTarget>> = (0..8).map(|_| Arc::new(BoundTarget::default())).collect();

    std::thread::scope(|s| {
        for (i, target) in targets.iter().enumerate() {
            let registry = registry.clone();
            s.spawn(move || {
                registry.register(OWNER, &format!("k{i}"), BoundTarget::binding(target, "${x}"));
            });
        }
    });

    assert!(registry.sweeper_running());
    assert_eq!(registry.len(), 8);
    registry.shutdown();
}

#[test]
fn test_register_template_binds_every_referenced_key() {
    let registry = registry_with_interval(60_000);
    let target = Arc::new(BoundTarget::default());

    let outcomes = registry
        .register_template(OWNER, BoundTarget::binding(&target, "${host}:${port:80}"))
        .unwrap();

    assert_eq!(
        outcomes,
        vec![
            ("host".to_string(), RegisterOutcome::Tracked),
            ("port".to_string(), RegisterOutcome::Tracked)
        ]
    );
    assert_eq!(registry.lookup(OWNER, "port").len(), 1);
    registry.shutdown();
}

#[test]
fn test_remove_and_retire_owner() {
    let registry = registry_with_interval(60_000);
    let target = Arc::new(BoundTarget::default());
    let binding = BoundTarget::binding(&target, "${k1}");
    let identity = binding.identity();
    registry.register(OWNER, "k1", binding);
    registry.register(OWNER, "k2", BoundTarget::binding(&target, "${k2}"));
    registry.register(OwnerId(2), "k1", BoundTarget::binding(&target, "${k1}"));

    assert!(registry.remove(OWNER, "k1", &identity));
    assert!(!registry.remove(OWNER, "k1", &identity));
    assert!(registry.lookup(OWNER, "k1").is_empty());

    assert_eq!(registry.retire_owner(OWNER), 1);
    assert_eq!(registry.len(), 1);
    assert_eq!(registry.lookup(OwnerId(2), "k1").len(), 1);
    registry.shutdown();
}

#[test]
fn test_setter_panic_and_probe_bindings() {
    let alive = Arc::new(Mutex::new(true));
    let seen = Arc::new(Mutex::new(String::new()));
    let probe = alive.clone();
    let sink = seen.clone();
    let binding = Binding::with_probe(
        7,
        "probed",
        "${k}",
        move || *probe.lock(),
        move |v| {
            *sink.lock() = v.to_string();
            Ok(())
        },
    );
    binding.apply("x").unwrap();
    assert_eq!(*seen.lock(), "x");
    *alive.lock() = false;
    assert!(matches!(binding.apply("y"), Err(BindingError::TargetDropped(_))));

    let target = Arc::new(BoundTarget::default());
    let panicking = Binding::new(&target, "boom", "${k}", |_: &BoundTarget, _: &str| -> Result<(), BindingError> {
        panic!("setter exploded")
    });
    assert!(matches!(panicking.apply("v"), Err(BindingError::SetterPanicked(_))));
}

#[test]
fn test_parsed_binding_fails_soft_on_bad_value() {
    let target = Arc::new(BoundTarget::default());
    let binding = Binding::parsed(&target, "port", "${port}", |t: &BoundTarget, v: u16| t.set(v.to_string()));

    binding.apply("8080").unwrap();
    assert_eq!(target.value(), "8080");
    assert!(matches!(binding.apply("not-a-port"), Err(BindingError::Coercion { .. })));
    assert_eq!(target.value(), "8080");
}

#[test]
fn test_sweeper_restarts_after_shutdown() {
    let registry = registry_with_interval(60_000);
    let target = Arc::new(BoundTarget::default());

    registry.register(OWNER, "k1", BoundTarget::binding(&target, "${k1}"));
    assert!(registry.sweeper_running());
    registry.shutdown();
    assert!(!registry.sweeper_running());

    registry.register(OWNER, "k2", BoundTarget::binding(&target, "${k2}"));
    assert!(registry.sweeper_running());
    registry.shutdown();
}

#[test]
fn test_sweep_runs_probes_outside_registry_locks() {
    let registry = registry_with_interval(60_000);
    let observed = Arc::new(Mutex::new(Vec::new()));
    let inner = registry.clone();
    let sink = observed.clone();
    let binding = Binding::with_probe(
        11,
        "reentrant",
        "${k1}",
        move || {
            sink.lock().push(inner.len());
            false
        },
        |_| Ok(()),
    );
    registry.register(OWNER, "k1", binding);

    assert_eq!(registry.sweep(), 1);
    assert!(registry.is_empty());
    assert!(!observed.lock().is_empty());
    registry.shutdown();
}
