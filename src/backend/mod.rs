//! Config backend client contracts.
//!
//! The engine never speaks the backend's wire protocol. It consumes a client
//! that already parsed remote files into flat string maps and that pushes
//! change notifications on its own threads.
//!
//! Listener callbacks run on backend-managed threads and must return quickly:
//! the engine only enqueues the event and processes it on its own workers.

pub mod adaptors;

use std::fmt::Debug;
use std::sync::Arc;

use async_trait::async_trait;

use crate::BackendError;
use crate::ChangeRecord;
use crate::ConfigFileMetadata;
use crate::GroupMetadata;
use crate::Properties;

/// Payload of a file push.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FilePush {
    /// Full new content of the file; diffed against what the engine holds.
    Content(Properties),
    /// Per-key records computed by the backend.
    Changes(Vec<ChangeRecord>),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileChangeEvent {
    pub metadata: ConfigFileMetadata,
    pub push: FilePush,
}

/// Group membership change: the member list before and after.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupChangeEvent {
    pub group: GroupMetadata,
    pub old_files: Vec<ConfigFileMetadata>,
    pub new_files: Vec<ConfigFileMetadata>,
}

pub type FileChangeListener = Arc<dyn Fn(FileChangeEvent) + Send + Sync>;
pub type GroupChangeListener = Arc<dyn Fn(GroupChangeEvent) + Send + Sync>;

/// Live, push-capable handle on one remote file.
pub trait ConfigFile: Send + Sync + Debug {
    fn metadata(&self) -> &ConfigFileMetadata;

    /// Current content; empty when the file does not exist on the backend.
    fn content(&self) -> Properties;

    fn exists(&self) -> bool;

    fn add_change_listener(
        &self,
        listener: FileChangeListener,
    );
}

/// Live, push-capable handle on a backend file group.
pub trait FileGroup: Send + Sync + Debug {
    fn metadata(&self) -> &GroupMetadata;

    /// Current members in declaration order.
    fn files(&self) -> Vec<ConfigFileMetadata>;

    fn add_change_listener(
        &self,
        listener: GroupChangeListener,
    );
}

#[async_trait]
pub trait ConfigBackend: Send + Sync + 'static {
    /// Used when address checking is enabled; failure aborts startup.
    async fn check_connectivity(&self) -> Result<(), BackendError>;

    /// Returns a live handle. A file absent on the backend still yields a
    /// handle with empty content so it can be watched for creation.
    async fn get_config_file(
        &self,
        metadata: &ConfigFileMetadata,
    ) -> Result<Arc<dyn ConfigFile>, BackendError>;

    /// Returns `None` when the group does not exist.
    async fn get_file_group(
        &self,
        group: &GroupMetadata,
    ) -> Result<Option<Arc<dyn FileGroup>>, BackendError>;
}
