//! Host-facing entry point.
//!
//! ```ignore
//! let engine = EngineBuilder::new(EngineConfig::load(None)?.validate()?)
//!     .backend(backend)
//!     .host(host)
//!     .schema(ReloadableSchema::new("pool").collection("hosts"))
//!     .build()?;
//! let snapshot = engine.start(&identity, &profiles).await?;
//! engine.registry().register(owner, "k1", binding);
//! ```


use std::sync::Arc;

use arc_swap::ArcSwapOption;
use tokio::sync::Mutex;
use tracing::info;

use crate::BindingRegistry;
use crate::ChangeDispatcher;
use crate::ComposedSnapshot;
use crate::ConfigBackend;
use crate::ConfigSnapshot;
use crate::EngineConfig;
use crate::Error;
use crate::HostReloader;
use crate::OwnerId;
use crate::RefreshContext;
use crate::ReloadableSchema;
use crate::Result;
use crate::ScopeIndex;
use crate::ServiceIdentity;
use crate::SnapshotComposer;
use crate::SourceExtension;

pub struct EngineBuilder {
    config: EngineConfig,
    backend: Option<Arc<dyn ConfigBackend>>,
    host: Option<Arc<dyn HostReloader>>,
    owner: OwnerId,
    extensions: Vec<Arc<dyn SourceExtension>>,
    schemas: Vec<ReloadableSchema>,
}

impl EngineBuilder {
    pub fn new(config: EngineConfig) -> Self {
        Self {
            config,
            backend: None,
            host: None,
            owner: OwnerId(0),
            extensions: Vec::new(),
            schemas: Vec::new(),
        }
    }

    pub fn backend(
        mut self,
        backend: Arc<dyn ConfigBackend>,
    ) -> Self {
        self.backend = Some(backend);
        self
    }

    pub fn host(
        mut self,
        host: Arc<dyn HostReloader>,
    ) -> Self {
        self.host = Some(host);
        self
    }

    /// Container whose bindings are patched on fine-grained refresh.
    pub fn owner(
        mut self,
        owner: OwnerId,
    ) -> Self {
        self.owner = owner;
        self
    }

    pub fn extension(
        mut self,
        extension: Arc<dyn SourceExtension>,
    ) -> Self {
        self.extensions.push(extension);
        self
    }

    /// Declares a reloadable object; its fields become coarse keys.
    pub fn schema(
        mut self,
        schema: ReloadableSchema,
    ) -> Self {
        self.schemas.push(schema);
        self
    }

    pub fn build(self) -> Result<Engine> {
        let config = self.config.validate()?;
        let backend = self
            .backend
            .ok_or_else(|| Error::Fatal("config backend is not set".to_string()))?;
        let host = self
            .host
            .ok_or_else(|| Error::Fatal("host reloader is not set".to_string()))?;

        let scope = Arc::new(ScopeIndex::new());
        for schema in &self.schemas {
            scope.register_schema(schema);
        }
        let registry = BindingRegistry::new(scope.clone(), &config.registry);
        let composer = self.extensions.into_iter().fold(
            SnapshotComposer::new(backend.clone(), config.composer.clone(), &config.backend),
            SnapshotComposer::with_extension,
        );

        Ok(Engine {
            config,
            backend,
            host,
            owner: self.owner,
            scope,
            registry,
            composer,
            running: ArcSwapOption::empty(),
            lifecycle: Mutex::new(()),
        })
    }
}

/// A composed snapshot with its dispatcher attached.
struct Running {
    composed: Arc<ComposedSnapshot>,
    dispatcher: ChangeDispatcher,
}

pub struct Engine {
    config: EngineConfig,
    backend: Arc<dyn ConfigBackend>,
    host: Arc<dyn HostReloader>,
    owner: OwnerId,
    scope: Arc<ScopeIndex>,
    registry: BindingRegistry,
    composer: SnapshotComposer,
    running: ArcSwapOption<Running>,
    lifecycle: Mutex<()>,
}

impl std::fmt::Debug for Engine {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("config", &self.config)
            .field("owner", &self.owner)
            .field("started", &self.running.load().is_some())
            .finish_non_exhaustive()
    }
}

impl Engine {
    /// Composes the snapshot and starts change delivery.
    ///
    /// Calling it again returns the same snapshot without touching the
    /// backend or installing more listeners.
    pub async fn start(
        &self,
        identity: &ServiceIdentity,
        profiles: &[String],
    ) -> Result<Arc<ConfigSnapshot>> {
        let _guard = self.lifecycle.lock().await;
        let composed = self.composer.compose(identity, profiles, &[]).await?;
        if let Some(running) = self.running.load_full() {
            if Arc::ptr_eq(&running.composed, &composed) {
                return Ok(composed.snapshot().clone());
            }
        }

        let ctx = RefreshContext {
            snapshot: composed.snapshot().clone(),
            registry: self.registry.clone(),
            scope: self.scope.clone(),
            host: self.host.clone(),
            owner: self.owner,
            mode: self.config.refresh.mode,
        };
        let dispatcher = ChangeDispatcher::new(
            self.backend.clone(),
            ctx,
            &self.config.refresh,
            &self.config.dispatcher,
        );
        dispatcher.attach(&composed);
        info!(service = %identity.service, profiles = ?profiles, "engine started");

        let snapshot = composed.snapshot().clone();
        self.running.store(Some(Arc::new(Running { composed, dispatcher })));
        Ok(snapshot)
    }

    /// Value of `key` in the live snapshot; `None` before `start`.
    pub fn resolve(
        &self,
        key: &str,
    ) -> Option<String> {
        self.running
            .load()
            .as_ref()
            .and_then(|running| running.composed.snapshot().resolve(key))
    }

    pub fn snapshot(&self) -> Option<Arc<ConfigSnapshot>> {
        self.running
            .load()
            .as_ref()
            .map(|running| running.composed.snapshot().clone())
    }

    pub fn scope(&self) -> &Arc<ScopeIndex> {
        &self.scope
    }

    pub fn registry(&self) -> &BindingRegistry {
        &self.registry
    }

    pub fn is_started(&self) -> bool {
        self.running.load().is_some()
    }

    /// Drops the composed snapshot and stops its listeners, e.g. after the
    /// backend reconnected. The next `start` composes from scratch.
    pub async fn invalidate(&self) {
        let _guard = self.lifecycle.lock().await;
        self.composer.invalidate();
        if let Some(running) = self.running.swap(None) {
            running.dispatcher.shutdown().await;
        }
    }

    /// Stops change delivery and the binding sweeper.
    ///
    /// The composition is dropped with the dispatcher, so a later `start`
    /// composes and attaches afresh.
    pub async fn shutdown(&self) {
        let _guard = self.lifecycle.lock().await;
        self.composer.invalidate();
        if let Some(running) = self.running.swap(None) {
            running.dispatcher.shutdown().await;
        }
        self.registry.shutdown();
        info!("engine stopped");
    }
}
