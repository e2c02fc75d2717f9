use std::sync::Arc;

use meshconf::ChangeRecord;
use meshconf::EngineConfig;
use meshconf::InMemoryBackend;
use meshconf::RefreshMode;
use serial_test::serial;

use crate::commons::engine;
use crate::commons::identity;
use crate::commons::keys;
use crate::commons::props;
use crate::commons::wait_until;
use crate::commons::Host;
use crate::commons::OrderService;
use crate::enable_logger;

fn seeded_backend() -> Arc<InMemoryBackend> {
    let backend = Arc::new(InMemoryBackend::new());
    backend.put_file(
        identity().internal_file("application.properties"),
        props(&[
            ("db.host", "db1"),
            ("db.port", "6000"),
            ("orders.timeout-ms", "100"),
            ("pool.maxSize", "8"),
        ]),
    );
    backend.put_file(
        identity().internal_file("application-prod.yml"),
        props(&[("db.host", "db-prod")]),
    );
    backend
}

#[tokio::test]
async fn test_profile_precedence_and_fine_grained_patch() {
    enable_logger();
    let backend = seeded_backend();
    let host = Arc::new(Host::default());
    let engine = engine(&backend, &host, EngineConfig::default());
    let snapshot = engine.start(&identity(), &["prod".to_string()]).await.unwrap();
    assert_eq!(snapshot.resolve("db.host").as_deref(), Some("db-prod"));
    assert_eq!(snapshot.resolve("db.port").as_deref(), Some("6000"));

    let service = Arc::new(OrderService::default());
    service.bind(&engine);

    backend.publish_file(
        &identity().internal_file("application-prod.yml"),
        props(&[("db.host", "db-prod-2")]),
    );

    assert!(wait_until(|| service.endpoint() == "db-prod-2:6000").await);
    assert!(wait_until(|| !host.events().is_empty()).await);
    assert_eq!(host.events(), vec![keys(&["db.host"])]);
    assert_eq!(host.reloads(), 0);
    engine.shutdown().await;
}

#[tokio::test]
async fn test_bad_value_is_skipped_and_next_push_applies() {
    let backend = seeded_backend();
    let host = Arc::new(Host::default());
    let engine = engine(&backend, &host, EngineConfig::default());
    engine.start(&identity(), &[]).await.unwrap();
    let service = Arc::new(OrderService::default());
    service.bind(&engine);
    let app = identity().internal_file("application.properties");

    backend.publish_changes(&app, vec![ChangeRecord::modified("orders.timeout-ms", "100", "soon")]);
    assert!(wait_until(|| host.events().len() == 1).await);
    assert_eq!(service.timeout_ms(), 0);
    assert_eq!(engine.resolve("orders.timeout-ms").as_deref(), Some("soon"));

    backend.publish_changes(&app, vec![ChangeRecord::modified("orders.timeout-ms", "soon", "250")]);
    assert!(wait_until(|| service.timeout_ms() == 250).await);
    engine.shutdown().await;
}

#[tokio::test]
async fn test_reloadable_fields_force_whole_reload() {
    let backend = seeded_backend();
    let host = Arc::new(Host::default());
    let engine = engine(&backend, &host, EngineConfig::default());
    engine.start(&identity(), &[]).await.unwrap();
    let service = Arc::new(OrderService::default());
    service.bind(&engine);

    backend.publish_changes(
        &identity().internal_file("application.properties"),
        vec![
            ChangeRecord::added("pool.replicas[0]", "r1"),
            ChangeRecord::modified("db.host", "db1", "db9"),
        ],
    );

    assert!(wait_until(|| host.reloads() == 1).await);
    assert!(host.events().is_empty());
    assert_eq!(service.endpoint(), "");
    engine.shutdown().await;
}

#[tokio::test]
#[serial]
async fn test_environment_selects_whole_reload_mode() {
    let config = temp_env::with_var("MESHCONF__REFRESH__MODE", Some("whole_reload"), || {
        EngineConfig::load(None).unwrap().validate().unwrap()
    });
    assert_eq!(config.refresh.mode, RefreshMode::WholeReload);

    let backend = seeded_backend();
    let host = Arc::new(Host::default());
    let engine = engine(&backend, &host, config);
    engine.start(&identity(), &[]).await.unwrap();

    backend.publish_file(
        &identity().internal_file("application.properties"),
        props(&[("db.host", "db2")]),
    );

    assert!(wait_until(|| host.reloads() == 1).await);
    assert!(host.events().is_empty());
    engine.shutdown().await;
}
