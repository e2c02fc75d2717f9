use std::sync::Arc;

use meshconf::ComposerConfig;
use meshconf::ConfigFileMetadata;
use meshconf::CustomGroupConfig;
use meshconf::EngineConfig;
use meshconf::GroupMetadata;
use meshconf::InMemoryBackend;

use crate::commons::engine;
use crate::commons::identity;
use crate::commons::keys;
use crate::commons::props;
use crate::commons::wait_until;
use crate::commons::Host;

fn groups_config(groups: Vec<CustomGroupConfig>) -> EngineConfig {
    EngineConfig {
        composer: ComposerConfig {
            internal_enabled: false,
            custom_groups: groups,
            ..Default::default()
        },
        ..Default::default()
    }
}

#[tokio::test]
async fn test_explicit_file_list_last_file_wins() {
    let backend = Arc::new(InMemoryBackend::new());
    backend.put_file(
        ConfigFileMetadata::new("prod", "shared", "file1.properties"),
        props(&[("k1", "v1"), ("k2", "v2")]),
    );
    backend.put_file(
        ConfigFileMetadata::new("prod", "shared", "file2.properties"),
        props(&[("k1", "v11"), ("k3", "v3")]),
    );
    let host = Arc::new(Host::default());
    let engine = engine(
        &backend,
        &host,
        groups_config(vec![
            CustomGroupConfig::new("shared").with_files(["file1.properties", "file2.properties"])
        ]),
    );
    engine.start(&identity(), &[]).await.unwrap();

    assert_eq!(engine.resolve("k1").as_deref(), Some("v11"));
    assert_eq!(engine.resolve("k2").as_deref(), Some("v2"));
    assert_eq!(engine.resolve("k3").as_deref(), Some("v3"));

    // dropping k1 from the winning file falls back to file1
    backend.publish_file(
        &ConfigFileMetadata::new("prod", "shared", "file2.properties"),
        props(&[("k3", "v3")]),
    );
    assert!(wait_until(|| engine.resolve("k1").as_deref() == Some("v1")).await);
    assert!(wait_until(|| !host.events().is_empty()).await);
    assert_eq!(host.events(), vec![keys(&["k1"])]);
    engine.shutdown().await;
}

#[tokio::test]
async fn test_group_members_come_and_go() {
    let backend = Arc::new(InMemoryBackend::new());
    let group = GroupMetadata::new("common", "platform");
    backend.create_group(
        group.clone(),
        vec![("file1.properties".to_string(), props(&[("k1", "v1"), ("k2", "v2")]))],
    );
    let host = Arc::new(Host::default());
    let engine = engine(
        &backend,
        &host,
        groups_config(vec![CustomGroupConfig::new("platform").in_namespace("common")]),
    );
    engine.start(&identity(), &[]).await.unwrap();

    let file2 = backend
        .add_group_file(&group, "file2.properties", props(&[("k1", "v1.1"), ("k3.1", "v3.1")]))
        .unwrap();
    assert!(wait_until(|| engine.resolve("k3.1").as_deref() == Some("v3.1")).await);
    assert_eq!(engine.resolve("k1").as_deref(), Some("v1.1"));
    assert_eq!(engine.resolve("k2").as_deref(), Some("v2"));

    assert!(backend.remove_group_file(&group, &file2));
    assert!(wait_until(|| engine.resolve("k3.1").is_none()).await);
    assert!(wait_until(|| engine.resolve("k1").as_deref() == Some("v1")).await);
    assert_eq!(engine.resolve("k2").as_deref(), Some("v2"));

    let source = engine.snapshot().unwrap().source("common/platform").unwrap();
    assert!(wait_until(|| source.provenance() == vec![ConfigFileMetadata::new(
        "common",
        "platform",
        "file1.properties"
    )])
    .await);
    engine.shutdown().await;
}
