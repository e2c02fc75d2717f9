//! Applying a change batch to the running host.
//!
//! Two strategies share one `apply_batch` contract:
//! - [`RefreshStrategy::WholeReload`] asks the host to rebuild its context,
//!   once per batch;
//! - [`RefreshStrategy::AffectedOnly`] re-renders every live binding of the
//!   changed keys and then broadcasts one change event with all keys.


use std::collections::BTreeSet;
use std::collections::HashSet;
use std::sync::Arc;

#[cfg(test)]
use mockall::automock;
use tracing::debug;
use tracing::info;
use tracing::warn;

use crate::binding::template;
use crate::metrics::BINDING_APPLY_FAILURES;
use crate::metrics::REFRESH_TOTAL;
use crate::BindingRegistry;
use crate::ChangeBatch;
use crate::ConfigSnapshot;
use crate::OwnerId;
use crate::RefreshMode;
use crate::Result;
use crate::ScopeIndex;

/// Reload primitives of the host application framework.
#[cfg_attr(test, automock)]
pub trait HostReloader: Send + Sync + 'static {
    /// Tears down and rebuilds the whole dependency context.
    fn whole_reload(&self) -> Result<()>;

    /// Lightweight broadcast of changed keys, no rebuild.
    fn publish_change_event(
        &self,
        keys: &BTreeSet<String>,
    );
}

/// Everything a strategy needs to push values into the host.
#[derive(Clone)]
pub struct RefreshContext {
    pub snapshot: Arc<ConfigSnapshot>,
    pub registry: BindingRegistry,
    pub scope: Arc<ScopeIndex>,
    pub host: Arc<dyn HostReloader>,
    pub owner: OwnerId,
    pub mode: RefreshMode,
}

impl std::fmt::Debug for RefreshContext {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        f.debug_struct("RefreshContext")
            .field("owner", &self.owner)
            .field("mode", &self.mode)
            .finish_non_exhaustive()
    }
}

/// Outcome of one `apply_batch` call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RefreshReport {
    pub applied: usize,
    pub failed: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshStrategy {
    WholeReload,
    AffectedOnly,
}

impl RefreshStrategy {
    /// Picks the strategy for one batch.
    ///
    /// In [`RefreshMode::Reflect`] a single coarse key is enough to reload the
    /// whole context.
    pub fn select(
        mode: RefreshMode,
        scope: &ScopeIndex,
        batch: &ChangeBatch,
    ) -> Self {
        match mode {
            RefreshMode::WholeReload => RefreshStrategy::WholeReload,
            RefreshMode::Reflect => {
                if batch.records().iter().any(|r| scope.is_in_scope(&r.key)) {
                    RefreshStrategy::WholeReload
                } else {
                    RefreshStrategy::AffectedOnly
                }
            }
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RefreshStrategy::WholeReload => "whole_reload",
            RefreshStrategy::AffectedOnly => "affected_only",
        }
    }

    pub fn apply_batch(
        &self,
        ctx: &RefreshContext,
        batch: &ChangeBatch,
    ) -> Result<RefreshReport> {
        REFRESH_TOTAL.with_label_values(&[self.as_str()]).inc();
        match self {
            RefreshStrategy::WholeReload => {
                info!(source = %batch.origin(), changes = batch.len(), "whole reload");
                ctx.host.whole_reload()?;
                Ok(RefreshReport::default())
            }
            RefreshStrategy::AffectedOnly => Ok(Self::patch_bindings(ctx, batch)),
        }
    }

    fn patch_bindings(
        ctx: &RefreshContext,
        batch: &ChangeBatch,
    ) -> RefreshReport {
        let keys = batch.keys();
        let mut report = RefreshReport::default();
        // a template bound under several changed keys renders once
        let mut seen = HashSet::new();

        for key in &keys {
            for binding in ctx.registry.lookup(ctx.owner, key) {
                if !seen.insert(binding.identity()) {
                    continue;
                }
                let result = template::render(binding.raw_template(), |k| ctx.snapshot.resolve(k))
                    .and_then(|value| binding.apply(&value));
                match result {
                    Ok(()) => report.applied += 1,
                    Err(e) => {
                        report.failed += 1;
                        BINDING_APPLY_FAILURES.inc();
                        warn!(key = %key, member = binding.member(), "binding skipped: {}", e);
                    }
                }
            }
        }

        debug!(
            source = %batch.origin(),
            applied = report.applied,
            failed = report.failed,
            "bindings patched"
        );
        ctx.host.publish_change_event(&keys);
        report
    }
}
