use std::fmt;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::RwLock;
use tracing::debug;
use tracing::trace;

use crate::differ;
use crate::BackendError;
use crate::ChangeRecord;
use crate::ConfigBackend;
use crate::ConfigFile;
use crate::ConfigFileMetadata;
use crate::FileChangeEvent;
use crate::FileChangeListener;
use crate::FileGroup;
use crate::FilePush;
use crate::GroupChangeEvent;
use crate::GroupChangeListener;
use crate::GroupMetadata;
use crate::Properties;

/// In-memory file handle
pub struct MemoryConfigFile {
    metadata: ConfigFileMetadata,
    content: RwLock<Option<Properties>>,
    listeners: RwLock<Vec<FileChangeListener>>,
}

impl MemoryConfigFile {
    fn new(
        metadata: ConfigFileMetadata,
        content: Option<Properties>,
    ) -> Self {
        Self {
            metadata,
            content: RwLock::new(content),
            listeners: RwLock::new(Vec::new()),
        }
    }

    fn notify(
        &self,
        push: FilePush,
    ) {
        // Listeners run without holding our locks
        let listeners = self.listeners.read().clone();
        trace!(file = %self.metadata, listeners = listeners.len(), "pushing file change");
        for listener in listeners {
            listener(FileChangeEvent {
                metadata: self.metadata.clone(),
                push: push.clone(),
            });
        }
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.read().len()
    }
}

impl fmt::Debug for MemoryConfigFile {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        f.debug_struct("MemoryConfigFile")
            .field("metadata", &self.metadata)
            .field("content", &self.content)
            .field("listeners", &self.listener_count())
            .finish()
    }
}

impl ConfigFile for MemoryConfigFile {
    fn metadata(&self) -> &ConfigFileMetadata {
        &self.metadata
    }

    fn content(&self) -> Properties {
        self.content.read().clone().unwrap_or_default()
    }

    fn exists(&self) -> bool {
        self.content.read().is_some()
    }

    fn add_change_listener(
        &self,
        listener: FileChangeListener,
    ) {
        self.listeners.write().push(listener);
    }
}

/// In-memory group handle
pub struct MemoryFileGroup {
    metadata: GroupMetadata,
    files: RwLock<Vec<ConfigFileMetadata>>,
    listeners: RwLock<Vec<GroupChangeListener>>,
}

impl MemoryFileGroup {
    fn set_files(
        &self,
        new_files: Vec<ConfigFileMetadata>,
    ) {
        let old_files = std::mem::replace(&mut *self.files.write(), new_files.clone());
        let listeners = self.listeners.read().clone();
        for listener in listeners {
            listener(GroupChangeEvent {
                group: self.metadata.clone(),
                old_files: old_files.clone(),
                new_files: new_files.clone(),
            });
        }
    }
}

impl fmt::Debug for MemoryFileGroup {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        f.debug_struct("MemoryFileGroup")
            .field("metadata", &self.metadata)
            .field("files", &self.files)
            .field("listeners", &self.listeners.read().len())
            .finish()
    }
}

impl FileGroup for MemoryFileGroup {
    fn metadata(&self) -> &GroupMetadata {
        &self.metadata
    }

    fn files(&self) -> Vec<ConfigFileMetadata> {
        self.files.read().clone()
    }

    fn add_change_listener(
        &self,
        listener: GroupChangeListener,
    ) {
        self.listeners.write().push(listener);
    }
}

/// Push-capable backend living inside the process.
///
/// Pushes are delivered synchronously on the calling thread, which plays the
/// role of the backend's callback thread.
#[derive(Debug)]
pub struct InMemoryBackend {
    files: DashMap<ConfigFileMetadata, Arc<MemoryConfigFile>>,
    groups: DashMap<GroupMetadata, Arc<MemoryFileGroup>>,
    reachable: AtomicBool,
    fetches: AtomicU64,
}

impl Default for InMemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryBackend {
    pub fn new() -> Self {
        Self {
            files: DashMap::new(),
            groups: DashMap::new(),
            reachable: AtomicBool::new(true),
            fetches: AtomicU64::new(0),
        }
    }

    fn file(
        &self,
        metadata: &ConfigFileMetadata,
    ) -> Arc<MemoryConfigFile> {
        self.files
            .entry(metadata.clone())
            .or_insert_with(|| Arc::new(MemoryConfigFile::new(metadata.clone(), None)))
            .clone()
    }

    /// Seeds a file without notifying anyone.
    pub fn put_file(
        &self,
        metadata: ConfigFileMetadata,
        content: Properties,
    ) {
        *self.file(&metadata).content.write() = Some(content);
    }

    /// Replaces a file's content and pushes it as a full copy.
    pub fn publish_file(
        &self,
        metadata: &ConfigFileMetadata,
        content: Properties,
    ) {
        let file = self.file(metadata);
        *file.content.write() = Some(content.clone());
        debug!(file = %metadata, "publish file content");
        file.notify(FilePush::Content(content));
    }

    /// Applies per-key records and pushes them as-is.
    pub fn publish_changes(
        &self,
        metadata: &ConfigFileMetadata,
        records: Vec<ChangeRecord>,
    ) {
        let file = self.file(metadata);
        {
            let mut content = file.content.write();
            let entries = content.get_or_insert_with(Properties::new);
            differ::apply_records(entries, &records);
        }
        debug!(file = %metadata, records = records.len(), "publish file changes");
        file.notify(FilePush::Changes(records));
    }

    /// Deletes a file; listeners see an empty content push.
    pub fn delete_file(
        &self,
        metadata: &ConfigFileMetadata,
    ) {
        let file = self.file(metadata);
        *file.content.write() = None;
        file.notify(FilePush::Content(Properties::new()));
    }

    /// Seeds a group with member files, without notifying anyone.
    pub fn create_group(
        &self,
        group: GroupMetadata,
        members: Vec<(String, Properties)>,
    ) {
        let mut files = Vec::with_capacity(members.len());
        for (file_name, content) in members {
            let metadata = ConfigFileMetadata::new(&group.namespace, &group.group, file_name);
            self.put_file(metadata.clone(), content);
            files.push(metadata);
        }
        self.groups.insert(
            group.clone(),
            Arc::new(MemoryFileGroup {
                metadata: group,
                files: RwLock::new(files),
                listeners: RwLock::new(Vec::new()),
            }),
        );
    }

    /// Adds a file to an existing group and pushes the membership change.
    pub fn add_group_file(
        &self,
        group: &GroupMetadata,
        file_name: &str,
        content: Properties,
    ) -> Option<ConfigFileMetadata> {
        let handle = self.groups.get(group)?.clone();
        let metadata = ConfigFileMetadata::new(&group.namespace, &group.group, file_name);
        self.put_file(metadata.clone(), content);
        let mut files = handle.files();
        files.push(metadata.clone());
        handle.set_files(files);
        Some(metadata)
    }

    /// Removes a file from a group: membership push first, then the
    /// file-level push emptying its content.
    pub fn remove_group_file(
        &self,
        group: &GroupMetadata,
        metadata: &ConfigFileMetadata,
    ) -> bool {
        let Some(handle) = self.groups.get(group).map(|g| g.clone()) else {
            return false;
        };
        let mut files = handle.files();
        let before = files.len();
        files.retain(|f| f != metadata);
        if files.len() == before {
            return false;
        }
        handle.set_files(files);
        self.delete_file(metadata);
        true
    }

    pub fn set_reachable(
        &self,
        reachable: bool,
    ) {
        self.reachable.store(reachable, Ordering::SeqCst);
    }

    /// Number of `get_config_file` calls served so far.
    pub fn fetch_count(&self) -> u64 {
        self.fetches.load(Ordering::SeqCst)
    }

    pub fn file_listener_count(
        &self,
        metadata: &ConfigFileMetadata,
    ) -> usize {
        self.files.get(metadata).map(|f| f.listener_count()).unwrap_or(0)
    }

    pub fn group_listener_count(
        &self,
        group: &GroupMetadata,
    ) -> usize {
        self.groups.get(group).map(|g| g.listeners.read().len()).unwrap_or(0)
    }
}

#[async_trait]
impl ConfigBackend for InMemoryBackend {
    async fn check_connectivity(&self) -> Result<(), BackendError> {
        if self.reachable.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(BackendError::Client("in-memory backend marked unreachable".into()))
        }
    }

    async fn get_config_file(
        &self,
        metadata: &ConfigFileMetadata,
    ) -> Result<Arc<dyn ConfigFile>, BackendError> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        Ok(self.file(metadata))
    }

    async fn get_file_group(
        &self,
        group: &GroupMetadata,
    ) -> Result<Option<Arc<dyn FileGroup>>, BackendError> {
        Ok(self.groups.get(group).map(|g| g.clone() as Arc<dyn FileGroup>))
    }
}
