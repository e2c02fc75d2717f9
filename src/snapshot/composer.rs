//! Startup composition of the [`ConfigSnapshot`].
//!
//! Sources are appended in precedence order:
//!
//! ```text
//! 1. extension sources           (may short-circuit the rest)
//! 2. internal files              application-{p}.* .. application.* .. bootstrap-{p}.* .. bootstrap.*
//! 3. custom groups               explicit file list merged into one source, or the whole group
//! 4. deployment bundles          only when both deployment ids are set in the environment
//! ```
//!
//! The first successful result is cached; later calls return it without
//! contacting the backend until [`SnapshotComposer::invalidate`] is called.

use std::env;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use arc_swap::ArcSwapOption;
use tokio::sync::Mutex;
use tracing::debug;
use tracing::info;
use tracing::warn;

use super::ConfigSnapshot;
use super::ExtensionOutcome;
use super::NamedSource;
use super::SourceExtension;
use crate::BackendConfig;
use crate::ComposeError;
use crate::ComposerConfig;
use crate::ConfigBackend;
use crate::ConfigFile;
use crate::ConfigFileMetadata;
use crate::CustomGroupConfig;
use crate::FileFormat;
use crate::FileGroup;
use crate::GroupMetadata;
use crate::Result;
use crate::ServiceIdentity;

/// A backend handle whose pushes must reach one [`NamedSource`].
#[derive(Debug, Clone)]
pub enum Subscription {
    /// Content pushes of one remote file
    File {
        source: Arc<NamedSource>,
        handle: Arc<dyn ConfigFile>,
    },
    /// Membership pushes of one group bundle
    Group {
        source: Arc<NamedSource>,
        handle: Arc<dyn FileGroup>,
    },
}

impl Subscription {
    pub fn source(&self) -> &Arc<NamedSource> {
        match self {
            Subscription::File { source, .. } | Subscription::Group { source, .. } => source,
        }
    }
}

/// Result of one composition: the snapshot plus the handles to watch.
#[derive(Debug)]
pub struct ComposedSnapshot {
    snapshot: Arc<ConfigSnapshot>,
    subscriptions: Vec<Subscription>,
    attached: AtomicBool,
}

impl ComposedSnapshot {
    pub fn snapshot(&self) -> &Arc<ConfigSnapshot> {
        &self.snapshot
    }

    pub fn subscriptions(&self) -> &[Subscription] {
        &self.subscriptions
    }

    /// Claims the right to install listeners. Only the first caller gets `true`.
    pub fn mark_attached(&self) -> bool {
        self.attached
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    pub fn is_attached(&self) -> bool {
        self.attached.load(Ordering::Acquire)
    }
}

/// Accumulates sources and subscriptions while composing.
#[derive(Default)]
pub(super) struct Composition {
    snapshot: ConfigSnapshot,
    subscriptions: Vec<Subscription>,
}

impl Composition {
    fn push(
        &mut self,
        source: Arc<NamedSource>,
    ) -> bool {
        self.snapshot.push_source(source)
    }

    pub(super) fn finish(self) -> ComposedSnapshot {
        ComposedSnapshot {
            snapshot: Arc::new(self.snapshot),
            subscriptions: self.subscriptions,
            attached: AtomicBool::new(false),
        }
    }
}

pub struct SnapshotComposer {
    backend: Arc<dyn ConfigBackend>,
    config: ComposerConfig,
    check_address: bool,
    extensions: Vec<Arc<dyn SourceExtension>>,
    cache: ArcSwapOption<ComposedSnapshot>,
    init_lock: Mutex<()>,
}

impl std::fmt::Debug for SnapshotComposer {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        f.debug_struct("SnapshotComposer")
            .field("config", &self.config)
            .field("check_address", &self.check_address)
            .field("extensions", &self.extensions.len())
            .field("cached", &self.cache.load().is_some())
            .finish()
    }
}

impl SnapshotComposer {
    pub fn new(
        backend: Arc<dyn ConfigBackend>,
        config: ComposerConfig,
        backend_config: &BackendConfig,
    ) -> Self {
        Self {
            backend,
            config,
            check_address: backend_config.check_address,
            extensions: Vec::new(),
            cache: ArcSwapOption::empty(),
            init_lock: Mutex::new(()),
        }
    }

    pub fn with_extension(
        mut self,
        extension: Arc<dyn SourceExtension>,
    ) -> Self {
        self.extensions.push(extension);
        self
    }

    /// Returns the cached composition if there is one.
    pub fn cached(&self) -> Option<Arc<ComposedSnapshot>> {
        self.cache.load_full()
    }

    /// Drops the cached composition so the next call rebuilds it.
    pub fn invalidate(&self) {
        if self.cache.swap(None).is_some() {
            info!("composed snapshot invalidated");
        }
    }

    /// Composes the snapshot, or returns the cached one.
    ///
    /// Concurrent first callers wait for a single composition. `groups` is
    /// appended after the groups declared in [`ComposerConfig`].
    pub async fn compose(
        &self,
        identity: &ServiceIdentity,
        profiles: &[String],
        groups: &[CustomGroupConfig],
    ) -> Result<Arc<ComposedSnapshot>> {
        if let Some(cached) = self.cache.load_full() {
            return Ok(cached);
        }
        let _guard = self.init_lock.lock().await;
        if let Some(cached) = self.cache.load_full() {
            return Ok(cached);
        }

        let composed = Arc::new(self.compose_uncached(identity, profiles, groups).await?);
        info!(
            sources = composed.snapshot.len(),
            subscriptions = composed.subscriptions.len(),
            "config snapshot composed"
        );
        self.cache.store(Some(composed.clone()));
        Ok(composed)
    }

    async fn compose_uncached(
        &self,
        identity: &ServiceIdentity,
        profiles: &[String],
        groups: &[CustomGroupConfig],
    ) -> Result<ComposedSnapshot> {
        // Fail on bad extensions before touching the backend.
        for group in self.config.custom_groups.iter().chain(groups) {
            for file in &group.files {
                FileFormat::from_file_name(file)?;
            }
        }

        if self.check_address {
            self.backend
                .check_connectivity()
                .await
                .map_err(|e| ComposeError::BackendUnreachable(e.to_string()))?;
        }

        let mut composition = Composition::default();

        if self.load_extensions(identity, &mut composition).await? {
            info!("extension short-circuited composition");
            return Ok(composition.finish());
        }

        if self.config.internal_enabled {
            for metadata in self.internal_files(identity, profiles) {
                self.add_single_file(metadata, &mut composition).await?;
            }
        }

        for group in self.config.custom_groups.iter().chain(groups) {
            let namespace = group.namespace.as_deref().unwrap_or(&identity.namespace);
            let metadata = GroupMetadata::new(namespace, &group.name);
            if group.files.is_empty() {
                self.add_group_bundle(metadata, &mut composition).await?;
            } else {
                self.add_file_list(metadata, &group.files, &mut composition).await?;
            }
        }

        for metadata in self.deployment_bundles(identity) {
            self.add_group_bundle(metadata, &mut composition).await?;
        }

        Ok(composition.finish())
    }

    /// Returns whether an extension asked to stop.
    async fn load_extensions(
        &self,
        identity: &ServiceIdentity,
        composition: &mut Composition,
    ) -> Result<bool> {
        for extension in &self.extensions {
            let name = extension.name();
            let outcome = extension.load(identity).await.map_err(|e| match e {
                ComposeError::Extension { .. } => e,
                other => ComposeError::Extension {
                    name: name.clone(),
                    reason: other.to_string(),
                },
            })?;
            let (sources, stop) = match outcome {
                ExtensionOutcome::Continue(sources) => (sources, false),
                ExtensionOutcome::ShortCircuit(sources) => (sources, true),
            };
            debug!(extension = %name, sources = sources.len(), stop, "extension loaded");
            for source in sources {
                composition.push(Arc::new(source));
            }
            if stop {
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// Internal file candidates in precedence order.
    pub fn internal_files(
        &self,
        identity: &ServiceIdentity,
        profiles: &[String],
    ) -> Vec<ConfigFileMetadata> {
        let mut files = Vec::new();
        for stem in &self.config.internal_file_stems {
            for profile in profiles {
                for ext in FileFormat::EXTENSIONS {
                    files.push(identity.internal_file(format!("{stem}-{profile}.{ext}")));
                }
            }
            for ext in FileFormat::EXTENSIONS {
                files.push(identity.internal_file(format!("{stem}.{ext}")));
            }
        }
        files
    }

    pub(super) fn deployment_bundles(
        &self,
        identity: &ServiceIdentity,
    ) -> Vec<GroupMetadata> {
        let deployment = &self.config.deployment;
        let application_id = env::var(&deployment.application_id_env).ok().filter(|v| !v.is_empty());
        let namespace_id = env::var(&deployment.namespace_id_env).ok().filter(|v| !v.is_empty());
        match (application_id, namespace_id) {
            (Some(application_id), Some(namespace_id)) => vec![
                GroupMetadata::new(&identity.namespace, application_id),
                GroupMetadata::new(&identity.namespace, namespace_id),
            ],
            _ => Vec::new(),
        }
    }

    async fn fetch_file(
        &self,
        metadata: &ConfigFileMetadata,
    ) -> Result<Arc<dyn ConfigFile>> {
        metadata.format()?;
        let handle = self
            .backend
            .get_config_file(metadata)
            .await
            .map_err(|source| ComposeError::Fetch {
                target: metadata.to_string(),
                source,
            })?;
        if !handle.exists() {
            debug!(file = %metadata, "config file absent, using empty content");
        }
        Ok(handle)
    }

    async fn add_single_file(
        &self,
        metadata: ConfigFileMetadata,
        composition: &mut Composition,
    ) -> Result<()> {
        let handle = self.fetch_file(&metadata).await?;
        let source = Arc::new(NamedSource::single(metadata.to_string(), metadata, handle.content()));
        if composition.push(source.clone()) {
            composition.subscriptions.push(Subscription::File { source, handle });
        }
        Ok(())
    }

    /// Explicit ordered list: later files override earlier ones.
    async fn add_file_list(
        &self,
        group: GroupMetadata,
        files: &[String],
        composition: &mut Composition,
    ) -> Result<()> {
        let mut handles = Vec::with_capacity(files.len());
        for file_name in files {
            let metadata = ConfigFileMetadata::new(&group.namespace, &group.group, file_name);
            handles.push(self.fetch_file(&metadata).await?);
        }
        let source = Arc::new(NamedSource::merged(
            group.to_string(),
            handles.iter().map(|h| (h.metadata().clone(), h.content())).collect(),
        ));
        if !composition.push(source.clone()) {
            return Ok(());
        }
        for handle in handles {
            composition.subscriptions.push(Subscription::File {
                source: source.clone(),
                handle,
            });
        }
        Ok(())
    }

    /// Whole group: members in backend order, watched for membership changes.
    pub(super) async fn add_group_bundle(
        &self,
        group: GroupMetadata,
        composition: &mut Composition,
    ) -> Result<()> {
        let handle = self
            .backend
            .get_file_group(&group)
            .await
            .map_err(|source| ComposeError::Fetch {
                target: group.to_string(),
                source,
            })?;
        let Some(group_handle) = handle else {
            warn!(group = %group, "config file group not found, skipped");
            return Ok(());
        };

        let mut handles = Vec::new();
        for metadata in group_handle.files() {
            handles.push(self.fetch_file(&metadata).await?);
        }
        let source = Arc::new(NamedSource::merged(
            group.to_string(),
            handles.iter().map(|h| (h.metadata().clone(), h.content())).collect(),
        ));
        if !composition.push(source.clone()) {
            return Ok(());
        }
        for handle in handles {
            composition.subscriptions.push(Subscription::File {
                source: source.clone(),
                handle,
            });
        }
        composition.subscriptions.push(Subscription::Group {
            source,
            handle: group_handle,
        });
        Ok(())
    }
}
