//! Process-wide registry of live bindings.
//!
//! ```text
//! register(owner, key, binding) ──> DashMap<(owner, key), Arc<Vec<Binding>>>
//!                                          ▲ copy-on-write per list
//! lookup(owner, key) ──────────────────────┘ (clones the Arc, never a partial list)
//!
//! sweeper thread (started by the first registration, once per registry):
//!   every sweep_interval ─> drop bindings whose target died
//! ```

use std::collections::HashSet;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::sync::Weak;
use std::thread::JoinHandle;
use std::time::Duration;

use crossbeam_channel::bounded;
use crossbeam_channel::Sender;
use dashmap::DashMap;
use parking_lot::Mutex;
use tracing::debug;
use tracing::error;
use tracing::trace;

use super::template;
use super::Binding;
use super::BindingIdentity;
use super::OwnerId;
use crate::metrics::SWEPT_BINDINGS;
use crate::BindingError;
use crate::RegistryConfig;
use crate::ScopeIndex;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct BindingKey {
    owner: OwnerId,
    key: String,
}

/// What `register` did with a binding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegisterOutcome {
    /// Appended to the key's list
    Tracked,
    /// Replaced a prior binding with the same identity
    Replaced,
    /// Key is coarse: a change rebuilds the object through a whole reload,
    /// so nothing is tracked
    Coarse,
}

struct SweeperHandle {
    shutdown_tx: Sender<()>,
    thread: JoinHandle<()>,
}

struct RegistryInner {
    bindings: DashMap<BindingKey, Arc<Vec<Binding>>>,
    scope: Arc<ScopeIndex>,
    sweep_interval: Duration,
    sweeper_started: AtomicBool,
    sweeper: Mutex<Option<SweeperHandle>>,
}

impl RegistryInner {
    /// Liveness probes are user code, so they run outside the shard locks.
    fn sweep(&self) -> usize {
        let lists: Vec<(BindingKey, Arc<Vec<Binding>>)> = self
            .bindings
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect();

        let mut removed = 0;
        for (key, list) in lists {
            let dead: HashSet<BindingIdentity> = list.iter().filter(|b| !b.is_alive()).map(|b| b.identity()).collect();
            if dead.is_empty() {
                continue;
            }
            self.bindings.remove_if_mut(&key, |_, current| {
                let next: Vec<Binding> = current
                    .iter()
                    .filter(|b| !dead.contains(&b.identity()))
                    .cloned()
                    .collect();
                removed += current.len() - next.len();
                *current = Arc::new(next);
                current.is_empty()
            });
        }
        if removed > 0 {
            SWEPT_BINDINGS.inc_by(removed as u64);
            debug!(removed, "swept dead bindings");
        }
        removed
    }
}

/// Thread-safe multimap from `(owner, key)` to bindings.
#[derive(Clone)]
pub struct BindingRegistry {
    inner: Arc<RegistryInner>,
}

impl std::fmt::Debug for BindingRegistry {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        f.debug_struct("BindingRegistry")
            .field("keys", &self.inner.bindings.len())
            .field("sweep_interval", &self.inner.sweep_interval)
            .field("sweeper_started", &self.inner.sweeper_started)
            .finish_non_exhaustive()
    }
}

impl BindingRegistry {
    pub fn new(
        scope: Arc<ScopeIndex>,
        config: &RegistryConfig,
    ) -> Self {
        Self {
            inner: Arc::new(RegistryInner {
                bindings: DashMap::new(),
                scope,
                sweep_interval: Duration::from_millis(config.sweep_interval_in_ms),
                sweeper_started: AtomicBool::new(false),
                sweeper: Mutex::new(None),
            }),
        }
    }

    /// Registers `binding` under `key` for `owner`.
    ///
    /// A prior binding with the same identity is replaced. The first call on
    /// a registry starts the periodic sweep.
    pub fn register(
        &self,
        owner: OwnerId,
        key: &str,
        binding: Binding,
    ) -> RegisterOutcome {
        if self.inner.scope.is_in_scope(key) {
            trace!(%owner, key, member = binding.member(), "coarse key, binding not tracked");
            return RegisterOutcome::Coarse;
        }

        let identity = binding.identity();
        let outcome = {
            let mut list = self
                .inner
                .bindings
                .entry(BindingKey {
                    owner,
                    key: key.to_string(),
                })
                .or_default();
            let mut next: Vec<Binding> = list.iter().filter(|b| b.identity() != identity).cloned().collect();
            let outcome = if next.len() == list.len() {
                RegisterOutcome::Tracked
            } else {
                RegisterOutcome::Replaced
            };
            next.push(binding);
            *list = Arc::new(next);
            outcome
        };
        trace!(%owner, key, member = %identity.member, ?outcome, "binding registered");

        self.ensure_sweeper();
        outcome
    }

    /// Registers `binding` under every key its template references.
    pub fn register_template(
        &self,
        owner: OwnerId,
        binding: Binding,
    ) -> Result<Vec<(String, RegisterOutcome)>, BindingError> {
        let keys = template::placeholder_keys(binding.raw_template())?;
        Ok(keys
            .into_iter()
            .map(|key| {
                let outcome = self.register(owner, &key, binding.clone());
                (key, outcome)
            })
            .collect())
    }

    /// Live bindings for `key` under `owner`.
    pub fn lookup(
        &self,
        owner: OwnerId,
        key: &str,
    ) -> Vec<Binding> {
        let list = self
            .inner
            .bindings
            .get(&BindingKey {
                owner,
                key: key.to_string(),
            })
            .map(|entry| entry.value().clone());
        match list {
            Some(list) => list.iter().filter(|b| b.is_alive()).cloned().collect(),
            None => Vec::new(),
        }
    }

    /// Explicitly removes one binding. Returns whether it was present.
    pub fn remove(
        &self,
        owner: OwnerId,
        key: &str,
        identity: &BindingIdentity,
    ) -> bool {
        let bk = BindingKey {
            owner,
            key: key.to_string(),
        };
        let mut removed = false;
        self.inner.bindings.remove_if_mut(&bk, |_, list| {
            let next: Vec<Binding> = list.iter().filter(|b| &b.identity() != identity).cloned().collect();
            removed = next.len() != list.len();
            *list = Arc::new(next);
            list.is_empty()
        });
        removed
    }

    /// Drops every binding of a destroyed container.
    pub fn retire_owner(
        &self,
        owner: OwnerId,
    ) -> usize {
        let mut removed = 0;
        self.inner.bindings.retain(|k, list| {
            if k.owner == owner {
                removed += list.len();
                false
            } else {
                true
            }
        });
        debug!(%owner, removed, "owner retired");
        removed
    }

    /// Removes bindings whose target is gone. Returns how many were dropped.
    pub fn sweep(&self) -> usize {
        self.inner.sweep()
    }

    /// Number of tracked bindings, dead ones included until the next sweep.
    pub fn len(&self) -> usize {
        self.inner.bindings.iter().map(|e| e.value().len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.bindings.is_empty()
    }

    pub fn sweeper_running(&self) -> bool {
        self.inner.sweeper.lock().is_some()
    }

    fn ensure_sweeper(&self) {
        if self
            .inner
            .sweeper_started
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return;
        }

        let weak: Weak<RegistryInner> = Arc::downgrade(&self.inner);
        let interval = self.inner.sweep_interval;
        let (shutdown_tx, shutdown_rx) = bounded::<()>(1);

        let spawned = std::thread::Builder::new()
            .name("meshconf-binding-sweeper".into())
            .spawn(move || {
                debug!(?interval, "binding sweeper started");
                loop {
                    crossbeam_channel::select! {
                        recv(shutdown_rx) -> _ => break,
                        default(interval) => {
                            let Some(inner) = weak.upgrade() else { break };
                            inner.sweep();
                        }
                    }
                }
                debug!("binding sweeper stopped");
            });

        match spawned {
            Ok(thread) => {
                *self.inner.sweeper.lock() = Some(SweeperHandle { shutdown_tx, thread });
            }
            Err(e) => {
                error!("failed to start binding sweeper: {:?}", e);
                self.inner.sweeper_started.store(false, Ordering::Release);
            }
        }
    }

    /// Stops the sweeper and waits for it to exit.
    ///
    /// The wait is bounded by one sweep pass.
    pub fn shutdown(&self) {
        let handle = self.inner.sweeper.lock().take();
        if let Some(SweeperHandle { shutdown_tx, thread }) = handle {
            let _ = shutdown_tx.send(());
            if thread.join().is_err() {
                error!("binding sweeper panicked");
            }
            // a later registration starts a fresh sweeper
            self.inner.sweeper_started.store(false, Ordering::Release);
        }
    }
}
