//! Delivery of backend pushes into the snapshot and the host.
//!
//! ```text
//! backend thread ──try_send──> [bounded queue] ──> worker task (one per subscription)
//!                                                    │ apply to NamedSource
//!                                                    │ ChangeBatch (never empty)
//!                                                    └ RefreshStrategy::select + apply_batch
//! ```
//!
//! One queue per subscription keeps per-file ordering; workers of different
//! subscriptions run concurrently on the tokio runtime. Listener callbacks
//! never block and never panic back into the backend.
//!
//! A push that does not fit into a full queue is dropped and the worker is
//! told to resync: once its queue is drained it re-reads the handle's current
//! content (or member list) and applies it as a full push.


use std::fmt::Display;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashSet;
use futures::FutureExt;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use tracing::error;
use tracing::info;
use tracing::trace;
use tracing::warn;

use crate::differ;
use crate::metrics::CHANGE_EVENTS;
use crate::metrics::DROPPED_EVENTS;
use crate::utils::async_task::spawn_task;
use crate::utils::async_task::task_with_timeout_and_exponential_backoff;
use crate::ChangeBatch;
use crate::ComposedSnapshot;
use crate::ConfigBackend;
use crate::ConfigFile;
use crate::ConfigFileMetadata;
use crate::DispatchError;
use crate::DispatcherConfig;
use crate::Error;
use crate::FileChangeEvent;
use crate::FileGroup;
use crate::FilePush;
use crate::GroupChangeEvent;
use crate::NamedSource;
use crate::RefreshConfig;
use crate::RefreshContext;
use crate::RefreshStrategy;
use crate::Result;
use crate::Subscription;

/// Bounded wait for each worker on shutdown.
const WORKER_STOP_TIMEOUT: Duration = Duration::from_millis(500);

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct WatchKey {
    source: String,
    file: ConfigFileMetadata,
}

/// Raised by a listener callback when it had to drop a push.
#[derive(Debug, Default)]
struct ResyncSignal {
    pending: AtomicBool,
    notify: Notify,
}

impl ResyncSignal {
    fn request(&self) {
        self.pending.store(true, Ordering::Release);
        self.notify.notify_one();
    }

    fn take(&self) -> bool {
        self.pending.swap(false, Ordering::AcqRel)
    }
}

struct DispatcherInner {
    backend: Arc<dyn ConfigBackend>,
    ctx: RefreshContext,
    auto_refresh: bool,
    config: DispatcherConfig,
    cancel: CancellationToken,
    workers: Mutex<Vec<JoinHandle<()>>>,
    watched: DashSet<WatchKey>,
}

#[derive(Clone)]
pub struct ChangeDispatcher {
    inner: Arc<DispatcherInner>,
}

impl std::fmt::Debug for ChangeDispatcher {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        f.debug_struct("ChangeDispatcher")
            .field("auto_refresh", &self.inner.auto_refresh)
            .field("watched", &self.inner.watched.len())
            .field("cancelled", &self.inner.cancel.is_cancelled())
            .finish_non_exhaustive()
    }
}

impl ChangeDispatcher {
    pub fn new(
        backend: Arc<dyn ConfigBackend>,
        ctx: RefreshContext,
        refresh: &RefreshConfig,
        config: &DispatcherConfig,
    ) -> Self {
        Self {
            inner: Arc::new(DispatcherInner {
                backend,
                ctx,
                auto_refresh: refresh.auto_refresh,
                config: config.clone(),
                cancel: CancellationToken::new(),
                workers: Mutex::new(Vec::new()),
                watched: DashSet::new(),
            }),
        }
    }

    /// Installs listeners for every subscription of `composed`.
    ///
    /// Must run inside a tokio runtime. A composition is attached at most
    /// once; later calls return 0.
    pub fn attach(
        &self,
        composed: &ComposedSnapshot,
    ) -> usize {
        if !composed.mark_attached() {
            debug!("composed snapshot already attached");
            return 0;
        }
        let mut started = 0;
        for subscription in composed.subscriptions() {
            let fresh = match subscription {
                Subscription::File { source, handle } => self.inner.watch_file(source.clone(), handle.clone()),
                Subscription::Group { source, handle } => {
                    self.inner.watch_group(source.clone(), handle.clone());
                    true
                }
            };
            if fresh {
                started += 1;
            }
        }
        info!(subscriptions = started, "change dispatcher attached");
        started
    }

    /// Number of file subscriptions currently watched.
    pub fn watched_files(&self) -> usize {
        self.inner.watched.len()
    }

    pub fn is_watching(
        &self,
        source: &str,
        file: &ConfigFileMetadata,
    ) -> bool {
        self.inner.watched.contains(&WatchKey {
            source: source.to_string(),
            file: file.clone(),
        })
    }

    /// Stops every worker, waiting a bounded time for each.
    pub async fn shutdown(&self) {
        self.inner.cancel.cancel();
        let workers = std::mem::take(&mut *self.inner.workers.lock());
        let count = workers.len();
        for worker in workers {
            if timeout(WORKER_STOP_TIMEOUT, worker).await.is_err() {
                warn!("dispatch worker did not stop in time");
            }
        }
        info!(workers = count, "change dispatcher stopped");
    }
}

/// Hands an event to a worker queue without blocking the caller.
///
/// Listeners of a stopped dispatcher stay installed on the backend handles;
/// their events are ignored without being counted.
fn enqueue<T>(
    tx: &mpsc::Sender<T>,
    kind: &str,
    origin: &impl Display,
    event: T,
    resync: &ResyncSignal,
) {
    if tx.is_closed() {
        trace!(%origin, kind, "subscription stopped, change event ignored");
        return;
    }
    CHANGE_EVENTS.with_label_values(&[kind]).inc();
    match tx.try_send(event) {
        Ok(()) => trace!(%origin, kind, "change event queued"),
        Err(TrySendError::Full(_)) => {
            DROPPED_EVENTS.inc();
            resync.request();
            warn!(%origin, kind, "subscription queue full, change event dropped, resync scheduled");
        }
        Err(TrySendError::Closed(_)) => debug!("{}", DispatchError::QueueClosed(origin.to_string())),
    }
}

impl DispatcherInner {
    /// Returns false when the file is already watched for this source.
    fn watch_file(
        self: &Arc<Self>,
        source: Arc<NamedSource>,
        handle: Arc<dyn ConfigFile>,
    ) -> bool {
        let metadata = handle.metadata().clone();
        let key = WatchKey {
            source: source.name().to_string(),
            file: metadata.clone(),
        };
        if !self.watched.insert(key) {
            return false;
        }

        let (tx, rx) = mpsc::channel(self.config.queue_size);
        let resync = Arc::new(ResyncSignal::default());
        let origin = metadata.clone();
        let signal = resync.clone();
        handle.add_change_listener(Arc::new(move |event: FileChangeEvent| {
            enqueue(&tx, "file", &origin, event, &signal);
        }));

        let name = format!("file-worker {metadata}");
        let this = self.clone();
        let mut workers = self.workers.lock();
        spawn_task(
            &name,
            async move { this.run_file_worker(source, handle, rx, resync).await },
            Some(&mut *workers),
        );
        true
    }

    fn watch_group(
        self: &Arc<Self>,
        source: Arc<NamedSource>,
        handle: Arc<dyn FileGroup>,
    ) {
        let group = handle.metadata().clone();
        let (tx, rx) = mpsc::channel(self.config.queue_size);
        let resync = Arc::new(ResyncSignal::default());
        let origin = group.clone();
        let signal = resync.clone();
        handle.add_change_listener(Arc::new(move |event: GroupChangeEvent| {
            enqueue(&tx, "group", &origin, event, &signal);
        }));

        let name = format!("group-worker {group}");
        let this = self.clone();
        let mut workers = self.workers.lock();
        spawn_task(
            &name,
            async move { this.run_group_worker(source, handle, rx, resync).await },
            Some(&mut *workers),
        );
    }

    /// Queued events always run before a pending resync.
    async fn run_file_worker(
        self: Arc<Self>,
        source: Arc<NamedSource>,
        handle: Arc<dyn ConfigFile>,
        mut rx: mpsc::Receiver<FileChangeEvent>,
        resync: Arc<ResyncSignal>,
    ) -> Result<()> {
        let file = handle.metadata().clone();
        debug!(source = %source.name(), %file, "file worker started");
        loop {
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => break,
                event = rx.recv() => {
                    let Some(event) = event else { break };
                    let outcome = AssertUnwindSafe(async { self.on_file_event(&source, event) })
                        .catch_unwind()
                        .await;
                    settle(source.name(), outcome);
                }
                _ = resync.notify.notified() => {
                    if !resync.take() {
                        continue;
                    }
                    let outcome = AssertUnwindSafe(async { self.resync_file(&source, handle.as_ref()) })
                        .catch_unwind()
                        .await;
                    settle(source.name(), outcome);
                }
            }
        }
        debug!(source = %source.name(), %file, "file worker stopped");
        Ok(())
    }

    async fn run_group_worker(
        self: Arc<Self>,
        source: Arc<NamedSource>,
        handle: Arc<dyn FileGroup>,
        mut rx: mpsc::Receiver<GroupChangeEvent>,
        resync: Arc<ResyncSignal>,
    ) -> Result<()> {
        debug!(source = %source.name(), "group worker started");
        loop {
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => break,
                event = rx.recv() => {
                    let Some(event) = event else { break };
                    let outcome = AssertUnwindSafe(self.on_group_event(&source, event))
                        .catch_unwind()
                        .await;
                    settle(source.name(), outcome);
                }
                _ = resync.notify.notified() => {
                    if !resync.take() {
                        continue;
                    }
                    let event = GroupChangeEvent {
                        group: handle.metadata().clone(),
                        old_files: source.provenance(),
                        new_files: handle.files(),
                    };
                    info!(source = %source.name(), "resyncing group members after dropped push");
                    let outcome = AssertUnwindSafe(self.on_group_event(&source, event))
                        .catch_unwind()
                        .await;
                    settle(source.name(), outcome);
                }
            }
        }
        debug!(source = %source.name(), "group worker stopped");
        Ok(())
    }

    fn on_file_event(
        &self,
        source: &NamedSource,
        event: FileChangeEvent,
    ) -> Result<()> {
        let records = match &event.push {
            FilePush::Content(content) => source.apply_file_content(&event.metadata, content)?,
            FilePush::Changes(records) => source.apply_file_records(&event.metadata, records)?,
        };
        self.refresh(source.name(), records)
    }

    /// Applies the handle's current content as a full push.
    fn resync_file(
        &self,
        source: &NamedSource,
        handle: &dyn ConfigFile,
    ) -> Result<()> {
        info!(source = %source.name(), file = %handle.metadata(), "resyncing file after dropped push");
        let records = source.apply_file_content(handle.metadata(), &handle.content())?;
        self.refresh(source.name(), records)
    }

    /// Loads newly added members, then re-resolves the group's content.
    async fn on_group_event(
        self: &Arc<Self>,
        source: &Arc<NamedSource>,
        event: GroupChangeEvent,
    ) -> Result<()> {
        let mut records = Vec::new();
        for metadata in differ::added_files(&event.old_files, &event.new_files) {
            if let Err(e) = metadata.format() {
                warn!(group = %event.group, "group member skipped: {}", e);
                continue;
            }
            let backend = self.backend.clone();
            let handle = task_with_timeout_and_exponential_backoff(
                || {
                    let backend = backend.clone();
                    let metadata = metadata.clone();
                    async move { backend.get_config_file(&metadata).await.map_err(Error::from) }
                },
                &self.config.fetch_retry,
            )
            .await
            .map_err(|e| DispatchError::Subscribe {
                file: metadata.to_string(),
                reason: e.to_string(),
            })?;

            // listen before reading so no push between the two is lost
            self.watch_file(source.clone(), handle.clone());
            records.extend(source.upsert_file(metadata, handle.content()));
        }
        records.extend(source.apply_membership(&event.new_files));
        self.refresh(source.name(), differ::squash(records))
    }

    fn refresh(
        &self,
        origin: &str,
        records: Vec<differ::ChangeRecord>,
    ) -> Result<()> {
        let Some(batch) = ChangeBatch::new(origin, records) else {
            trace!(source = %origin, "push carried no effective change");
            return Ok(());
        };
        debug!(source = %origin, changes = batch.len(), "change batch applied to snapshot");
        if !self.auto_refresh {
            return Ok(());
        }
        let strategy = RefreshStrategy::select(self.ctx.mode, &self.ctx.scope, &batch);
        strategy.apply_batch(&self.ctx, &batch)?;
        Ok(())
    }
}

fn settle(
    origin: &str,
    outcome: std::thread::Result<Result<()>>,
) {
    match outcome {
        Ok(Ok(())) => {}
        Ok(Err(e)) => error!(source = %origin, "change batch dropped: {}", e),
        Err(_) => error!(source = %origin, "{}", DispatchError::Panicked(origin.to_string())),
    }
}
