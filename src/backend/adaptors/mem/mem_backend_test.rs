use std::sync::Arc;

use parking_lot::Mutex;

use super::InMemoryBackend;
use crate::test_utils::props;
use crate::ChangeRecord;
use crate::ConfigBackend;
use crate::ConfigFileMetadata;
use crate::FileChangeEvent;
use crate::FilePush;
use crate::GroupChangeEvent;
use crate::GroupMetadata;

#[tokio::test]
async fn test_missing_file_resolves_to_empty_watchable_handle() {
    let backend = InMemoryBackend::new();
    let meta = ConfigFileMetadata::new("ns", "svc", "application.properties");

    let handle = backend.get_config_file(&meta).await.unwrap();
    assert!(!handle.exists());
    assert!(handle.content().is_empty());

    let seen: Arc<Mutex<Vec<FileChangeEvent>>> = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    handle.add_change_listener(Arc::new(move |e| sink.lock().push(e)));

    backend.publish_file(&meta, props(&[("k1", "v1")]));

    assert!(handle.exists());
    let events = seen.lock();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].push, FilePush::Content(props(&[("k1", "v1")])));
}

#[tokio::test]
async fn test_publish_changes_updates_stored_content() {
    let backend = InMemoryBackend::new();
    let meta = ConfigFileMetadata::new("ns", "svc", "application.properties");
    backend.put_file(meta.clone(), props(&[("k1", "v1")]));

    backend.publish_changes(&meta, vec![ChangeRecord::modified("k1", "v1", "v2")]);

    let handle = backend.get_config_file(&meta).await.unwrap();
    assert_eq!(handle.content(), props(&[("k1", "v2")]));
    assert_eq!(backend.fetch_count(), 1);
}

#[tokio::test]
async fn test_group_membership_pushes_old_and_new_lists() {
    let backend = InMemoryBackend::new();
    let group = GroupMetadata::new("ns", "shared");
    backend.create_group(group.clone(), vec![("file1.properties".into(), props(&[("k2", "v2")]))]);

    let handle = backend.get_file_group(&group).await.unwrap().unwrap();
    let seen: Arc<Mutex<Vec<GroupChangeEvent>>> = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    handle.add_change_listener(Arc::new(move |e| sink.lock().push(e)));

    let added = backend
        .add_group_file(&group, "file2.properties", props(&[("k1", "v1.1")]))
        .unwrap();

    let events = seen.lock();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].old_files.len(), 1);
    assert_eq!(events[0].new_files.last(), Some(&added));
    assert_eq!(handle.files().len(), 2);
}

#[tokio::test]
async fn test_unknown_group_and_unreachable_backend() {
    let backend = InMemoryBackend::new();
    assert!(backend
        .get_file_group(&GroupMetadata::new("ns", "nope"))
        .await
        .unwrap()
        .is_none());

    assert!(backend.check_connectivity().await.is_ok());
    backend.set_reachable(false);
    assert!(backend.check_connectivity().await.is_err());
}
