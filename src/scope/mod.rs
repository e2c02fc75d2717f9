//! Classification of changed keys into coarse (full reload) and fine
//! (patch in place).
//!
//! A key is coarse when it is one of the exact keys, or when it lies at or
//! below a registered collection prefix. The index is filled once while
//! reloadable schemas are registered at startup and only grows afterwards.

mod schema;
mod trie;
pub use schema::*;
pub use trie::*;


use std::collections::HashSet;

use parking_lot::RwLock;
use tracing::trace;

#[derive(Debug, Default)]
pub struct ScopeIndex {
    exact: RwLock<HashSet<String>>,
    prefixes: RwLock<PrefixTrie>,
}

impl ScopeIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn mark_exact(
        &self,
        key: impl Into<String>,
    ) {
        let key = key.into();
        trace!(key = %key, "scope exact key");
        self.exact.write().insert(key);
    }

    pub fn mark_prefix(
        &self,
        prefix: &str,
    ) {
        if self.prefixes.write().insert(prefix) {
            trace!(prefix, "scope prefix");
        }
    }

    pub fn is_in_scope(
        &self,
        key: &str,
    ) -> bool {
        if self.exact.read().contains(key) {
            return true;
        }
        self.prefixes.read().matches(key)
    }

    /// Scans one reloadable object's declared fields.
    ///
    /// Scalars become exact keys, collections become prefixes, nested objects
    /// recurse. Every path segment is registered in both camelCase and
    /// hyphenated spelling.
    pub fn register_schema(
        &self,
        schema: &ReloadableSchema,
    ) {
        self.scan(&schema.prefix, &schema.fields);
    }

    fn scan(
        &self,
        prefix: &str,
        fields: &FieldSet,
    ) {
        for field in fields.iter() {
            for spelling in spellings(&field.name) {
                let path = join_path(prefix, &spelling);
                match &field.kind {
                    FieldKind::Scalar => self.mark_exact(path),
                    FieldKind::Collection => self.mark_prefix(&path),
                    FieldKind::Nested(inner) => self.scan(&path, inner),
                }
            }
        }
    }

    pub fn exact_len(&self) -> usize {
        self.exact.read().len()
    }

    pub fn prefix_len(&self) -> usize {
        self.prefixes.read().len()
    }
}
