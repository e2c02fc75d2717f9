//! Per-key change computation.
//!
//! Values are opaque strings at this layer. Type coercion happens when a
//! value is pushed into a binding, never here.

use std::collections::BTreeMap;
use std::collections::BTreeSet;
use std::collections::HashSet;
use std::fmt;

use crate::ConfigFileMetadata;
use crate::Properties;


#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChangeKind {
    Add,
    Modify,
    Delete,
}

impl fmt::Display for ChangeKind {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        let s = match self {
            ChangeKind::Add => "ADD",
            ChangeKind::Modify => "MODIFY",
            ChangeKind::Delete => "DELETE",
        };
        f.write_str(s)
    }
}

/// One changed key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeRecord {
    pub key: String,
    pub old_value: Option<String>,
    pub new_value: Option<String>,
    pub kind: ChangeKind,
}

impl ChangeRecord {
    pub fn added(
        key: impl Into<String>,
        value: impl Into<String>,
    ) -> Self {
        Self {
            key: key.into(),
            old_value: None,
            new_value: Some(value.into()),
            kind: ChangeKind::Add,
        }
    }

    pub fn modified(
        key: impl Into<String>,
        old: impl Into<String>,
        new: impl Into<String>,
    ) -> Self {
        Self {
            key: key.into(),
            old_value: Some(old.into()),
            new_value: Some(new.into()),
            kind: ChangeKind::Modify,
        }
    }

    pub fn deleted(
        key: impl Into<String>,
        old: impl Into<String>,
    ) -> Self {
        Self {
            key: key.into(),
            old_value: Some(old.into()),
            new_value: None,
            kind: ChangeKind::Delete,
        }
    }

    fn between(
        key: &str,
        old: Option<&String>,
        new: Option<&String>,
    ) -> Option<Self> {
        let kind = match (old, new) {
            (None, Some(_)) => ChangeKind::Add,
            (Some(o), Some(n)) if o != n => ChangeKind::Modify,
            (Some(_), None) => ChangeKind::Delete,
            _ => return None,
        };
        Some(Self {
            key: key.to_string(),
            old_value: old.cloned(),
            new_value: new.cloned(),
            kind,
        })
    }
}

/// The set of changes produced by one backend event for one source.
///
/// Never empty: [`ChangeBatch::new`] refuses zero-length input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeBatch {
    origin: String,
    records: Vec<ChangeRecord>,
}

impl ChangeBatch {
    pub fn new(
        origin: impl Into<String>,
        records: Vec<ChangeRecord>,
    ) -> Option<Self> {
        if records.is_empty() {
            return None;
        }
        Some(Self {
            origin: origin.into(),
            records,
        })
    }

    /// Name of the NamedSource the changes were applied to.
    pub fn origin(&self) -> &str {
        &self.origin
    }

    pub fn records(&self) -> &[ChangeRecord] {
        &self.records
    }

    pub fn keys(&self) -> BTreeSet<String> {
        self.records.iter().map(|r| r.key.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

/// Computes ADD/MODIFY/DELETE records turning `old` into `new`.
///
/// Output is ordered by key.
pub fn diff(
    old: &Properties,
    new: &Properties,
) -> Vec<ChangeRecord> {
    let keys: BTreeSet<&String> = old.keys().chain(new.keys()).collect();
    keys.into_iter()
        .filter_map(|key| ChangeRecord::between(key, old.get(key), new.get(key)))
        .collect()
}

/// Applies backend-supplied records to `current` and returns the records that
/// actually changed something, with old values and kinds taken from `current`.
pub fn apply_records(
    current: &mut Properties,
    records: &[ChangeRecord],
) -> Vec<ChangeRecord> {
    let mut effective = Vec::with_capacity(records.len());
    for record in records {
        let target = match record.kind {
            ChangeKind::Delete => None,
            ChangeKind::Add | ChangeKind::Modify => record.new_value.clone(),
        };
        let previous = match &target {
            Some(value) => current.insert(record.key.clone(), value.clone()),
            None => current.remove(&record.key),
        };
        if let Some(change) = ChangeRecord::between(&record.key, previous.as_ref(), target.as_ref()) {
            effective.push(change);
        }
    }
    effective
}

/// Collapses successive records into one net record per key.
///
/// The first old value and the last new value are kept; keys that end up
/// where they started are dropped. Output is ordered by key.
pub fn squash(records: impl IntoIterator<Item = ChangeRecord>) -> Vec<ChangeRecord> {
    let mut net: BTreeMap<String, (Option<String>, Option<String>)> = BTreeMap::new();
    for record in records {
        net.entry(record.key)
            .and_modify(|(_, new)| *new = record.new_value.clone())
            .or_insert((record.old_value, record.new_value));
    }
    net.iter()
        .filter_map(|(key, (old, new))| ChangeRecord::between(key, old.as_ref(), new.as_ref()))
        .collect()
}

/// Files present in `new` but not in `old`, in `new`'s order.
pub fn added_files(
    old: &[ConfigFileMetadata],
    new: &[ConfigFileMetadata],
) -> Vec<ConfigFileMetadata> {
    let known: HashSet<&ConfigFileMetadata> = old.iter().collect();
    new.iter().filter(|f| !known.contains(f)).cloned().collect()
}

/// Files present in `old` but not in `new`, in `old`'s order.
pub fn removed_files(
    old: &[ConfigFileMetadata],
    new: &[ConfigFileMetadata],
) -> Vec<ConfigFileMetadata> {
    added_files(new, old)
}
