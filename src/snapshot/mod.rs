//! Composite property source.
//!
//! A [`ConfigSnapshot`] is an ordered list of [`NamedSource`]s resolved
//! first-match-wins. The order is fixed when the snapshot is composed: sources
//! are only ever appended or removed, never re-sorted.
//!
//! ```text
//! ConfigSnapshot
//!   ├─ NamedSource "ns.svc.application-dev.properties"   (checked first)
//!   ├─ NamedSource "ns.svc.application.properties"
//!   └─ NamedSource "ns.shared"  ── file1.properties
//!                               └─ file2.properties       (last file wins inside)
//! ```
//!
//! Reads of the source list are lock-free (`arc-swap`). Each NamedSource guards
//! its own content with a `parking_lot::RwLock`, so pushes for the same source
//! serialize while pushes for different sources proceed in parallel.

mod composer;
mod extension;
pub use composer::*;
pub use extension::*;


use std::collections::BTreeSet;
use std::sync::Arc;

use arc_swap::ArcSwap;
use parking_lot::Mutex;
use parking_lot::RwLock;
use tracing::debug;
use tracing::warn;

use crate::differ;
use crate::ChangeRecord;
use crate::ConfigFileMetadata;
use crate::DispatchError;
use crate::Properties;

/// Content contributed by one remote file.
#[derive(Debug, Clone)]
struct FileSlice {
    metadata: ConfigFileMetadata,
    entries: Properties,
    /// No longer a group member; dropped once its content is emptied.
    detached: bool,
}

#[derive(Debug, Default)]
struct SourceState {
    /// Entries not backed by a remote file (extension sources).
    base: Properties,
    /// Declaration order; later files win.
    files: Vec<FileSlice>,
    merged: Properties,
}

impl SourceState {
    fn lookup(
        &self,
        key: &str,
    ) -> Option<&String> {
        self.files
            .iter()
            .rev()
            .find_map(|f| f.entries.get(key))
            .or_else(|| self.base.get(key))
    }

    fn all_keys(&self) -> BTreeSet<String> {
        let mut keys: BTreeSet<String> = self.merged.keys().cloned().collect();
        keys.extend(self.base.keys().cloned());
        for file in &self.files {
            keys.extend(file.entries.keys().cloned());
        }
        keys
    }

    fn slice_mut(
        &mut self,
        metadata: &ConfigFileMetadata,
    ) -> Option<&mut FileSlice> {
        self.files.iter_mut().find(|f| &f.metadata == metadata)
    }

    /// Recomputes merged values for `keys` and reports what moved.
    fn remerge(
        &mut self,
        keys: BTreeSet<String>,
    ) -> Vec<ChangeRecord> {
        let mut old = Properties::new();
        let mut new = Properties::new();
        for key in keys {
            match self.lookup(&key).cloned() {
                Some(value) => {
                    new.insert(key.clone(), value.clone());
                    if let Some(prev) = self.merged.insert(key.clone(), value) {
                        old.insert(key, prev);
                    }
                }
                None => {
                    if let Some(prev) = self.merged.remove(&key) {
                        old.insert(key, prev);
                    }
                }
            }
        }
        differ::diff(&old, &new)
    }

    fn drop_emptied_detached(&mut self) {
        self.files.retain(|f| !(f.detached && f.entries.is_empty()));
    }
}

/// One merged, named chunk of the composite configuration.
#[derive(Debug)]
pub struct NamedSource {
    name: String,
    state: RwLock<SourceState>,
}

impl NamedSource {
    /// A source backed by exactly one remote file.
    pub fn single(
        name: impl Into<String>,
        metadata: ConfigFileMetadata,
        entries: Properties,
    ) -> Self {
        Self::merged(name, vec![(metadata, entries)])
    }

    /// A source merging several files of one group, in declaration order.
    pub fn merged(
        name: impl Into<String>,
        files: Vec<(ConfigFileMetadata, Properties)>,
    ) -> Self {
        let mut state = SourceState {
            files: files
                .into_iter()
                .map(|(metadata, entries)| FileSlice {
                    metadata,
                    entries,
                    detached: false,
                })
                .collect(),
            ..Default::default()
        };
        let keys = state.all_keys();
        state.remerge(keys);
        Self {
            name: name.into(),
            state: RwLock::new(state),
        }
    }

    /// A source without remote provenance, e.g. supplied by an extension.
    pub fn from_entries(
        name: impl Into<String>,
        entries: Properties,
    ) -> Self {
        Self {
            name: name.into(),
            state: RwLock::new(SourceState {
                merged: entries.clone(),
                base: entries,
                files: Vec::new(),
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn get(
        &self,
        key: &str,
    ) -> Option<String> {
        self.state.read().merged.get(key).cloned()
    }

    pub fn contains_key(
        &self,
        key: &str,
    ) -> bool {
        self.state.read().merged.contains_key(key)
    }

    /// Copy of the merged view.
    pub fn entries(&self) -> Properties {
        self.state.read().merged.clone()
    }

    /// Files backing this source, in precedence order (last wins).
    pub fn provenance(&self) -> Vec<ConfigFileMetadata> {
        self.state.read().files.iter().map(|f| f.metadata.clone()).collect()
    }

    pub fn contains_file(
        &self,
        metadata: &ConfigFileMetadata,
    ) -> bool {
        self.state.read().files.iter().any(|f| &f.metadata == metadata)
    }

    pub fn len(&self) -> usize {
        self.state.read().merged.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.read().merged.is_empty()
    }

    /// Replaces one file's content with a freshly pushed full copy.
    ///
    /// Returns the effective changes of the merged view.
    pub fn apply_file_content(
        &self,
        metadata: &ConfigFileMetadata,
        content: &Properties,
    ) -> Result<Vec<ChangeRecord>, DispatchError> {
        let mut state = self.state.write();
        let slice = state.slice_mut(metadata).ok_or_else(|| self.unknown_file(metadata))?;
        let touched: BTreeSet<String> = differ::diff(&slice.entries, content)
            .into_iter()
            .map(|r| r.key)
            .collect();
        slice.entries = content.clone();
        let changes = state.remerge(touched);
        state.drop_emptied_detached();
        Ok(changes)
    }

    /// Applies backend-supplied per-key records to one file.
    pub fn apply_file_records(
        &self,
        metadata: &ConfigFileMetadata,
        records: &[ChangeRecord],
    ) -> Result<Vec<ChangeRecord>, DispatchError> {
        let mut state = self.state.write();
        let slice = state.slice_mut(metadata).ok_or_else(|| self.unknown_file(metadata))?;
        let touched: BTreeSet<String> = differ::apply_records(&mut slice.entries, records)
            .into_iter()
            .map(|r| r.key)
            .collect();
        let changes = state.remerge(touched);
        state.drop_emptied_detached();
        Ok(changes)
    }

    /// Inserts a newly discovered member file, or replaces its content when
    /// already known. New files are appended and therefore take precedence.
    pub fn upsert_file(
        &self,
        metadata: ConfigFileMetadata,
        content: Properties,
    ) -> Vec<ChangeRecord> {
        let mut state = self.state.write();
        let mut touched: BTreeSet<String> = content.keys().cloned().collect();
        match state.slice_mut(&metadata) {
            Some(slice) => {
                touched.extend(slice.entries.keys().cloned());
                slice.entries = content;
                slice.detached = false;
            }
            None => state.files.push(FileSlice {
                metadata,
                entries: content,
                detached: false,
            }),
        }
        state.remerge(touched)
    }

    /// Re-resolves the source against a new group membership list.
    ///
    /// Members follow `members` order. Files no longer listed move to the
    /// lowest precedence so the remaining files win right away; their content
    /// disappears once their own DELETE records arrive.
    pub fn apply_membership(
        &self,
        members: &[ConfigFileMetadata],
    ) -> Vec<ChangeRecord> {
        let mut state = self.state.write();
        let mut current = std::mem::take(&mut state.files);

        let mut reordered: Vec<FileSlice> = Vec::with_capacity(current.len());
        current.retain(|slice| {
            if members.contains(&slice.metadata) {
                true
            } else {
                let mut detached = slice.clone();
                detached.detached = true;
                reordered.push(detached);
                false
            }
        });
        for member in members {
            if let Some(pos) = current.iter().position(|s| &s.metadata == member) {
                reordered.push(current.swap_remove(pos));
            }
        }
        if reordered.iter().any(|s| s.detached) {
            debug!(source = %self.name, "group members detached");
        }
        state.files = reordered;
        state.drop_emptied_detached();

        let keys = state.all_keys();
        state.remerge(keys)
    }

    fn unknown_file(
        &self,
        metadata: &ConfigFileMetadata,
    ) -> DispatchError {
        DispatchError::UnknownFile {
            file: metadata.to_string(),
            source_name: self.name.clone(),
        }
    }
}

/// Ordered composite of named sources, first match wins.
#[derive(Debug, Default)]
pub struct ConfigSnapshot {
    sources: ArcSwap<Vec<Arc<NamedSource>>>,
    writer: Mutex<()>,
}

impl ConfigSnapshot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a source at the lowest precedence.
    ///
    /// A source whose name is already present is rejected and `false` returned.
    pub fn push_source(
        &self,
        source: Arc<NamedSource>,
    ) -> bool {
        let _guard = self.writer.lock();
        let current = self.sources.load_full();
        if current.iter().any(|s| s.name() == source.name()) {
            warn!(source = %source.name(), "duplicate source name ignored");
            return false;
        }
        let mut next = Vec::with_capacity(current.len() + 1);
        next.extend(current.iter().cloned());
        next.push(source);
        self.sources.store(Arc::new(next));
        true
    }

    pub fn remove_source(
        &self,
        name: &str,
    ) -> Option<Arc<NamedSource>> {
        let _guard = self.writer.lock();
        let current = self.sources.load_full();
        let pos = current.iter().position(|s| s.name() == name)?;
        let mut next: Vec<Arc<NamedSource>> = current.iter().cloned().collect();
        let removed = next.remove(pos);
        self.sources.store(Arc::new(next));
        Some(removed)
    }

    /// Looks `key` up in every source in order; the first hit wins.
    pub fn resolve(
        &self,
        key: &str,
    ) -> Option<String> {
        self.sources.load().iter().find_map(|s| s.get(key))
    }

    pub fn sources(&self) -> Arc<Vec<Arc<NamedSource>>> {
        self.sources.load_full()
    }

    pub fn source(
        &self,
        name: &str,
    ) -> Option<Arc<NamedSource>> {
        self.sources.load().iter().find(|s| s.name() == name).cloned()
    }

    pub fn source_names(&self) -> Vec<String> {
        self.sources.load().iter().map(|s| s.name().to_string()).collect()
    }

    pub fn keys(&self) -> BTreeSet<String> {
        self.sources
            .load()
            .iter()
            .flat_map(|s| s.entries().into_keys())
            .collect()
    }

    /// Flattened view with precedence applied.
    pub fn to_map(&self) -> Properties {
        let mut map = Properties::new();
        for source in self.sources.load().iter().rev() {
            map.extend(source.entries());
        }
        map
    }

    pub fn len(&self) -> usize {
        self.sources.load().len()
    }

    pub fn is_empty(&self) -> bool {
        self.sources.load().is_empty()
    }
}
