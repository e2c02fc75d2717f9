use std::collections::HashMap;

/// Splits a key on its structural delimiters: `a.b[0].c` → `a`, `b`, `0`, `c`.
pub(crate) fn segments(key: &str) -> impl Iterator<Item = &str> {
    key.split(['.', '[', ']']).filter(|s| !s.is_empty())
}

#[derive(Debug, Default)]
struct TrieNode {
    children: HashMap<String, TrieNode>,
    /// A registered prefix ends here
    terminal: bool,
}

/// Segment-wise prefix trie.
///
/// Insert-only: prefixes are never removed.
#[derive(Debug, Default)]
pub struct PrefixTrie {
    root: TrieNode,
    len: usize,
}

impl PrefixTrie {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `false` when the prefix was already registered or has no
    /// segments.
    pub fn insert(
        &mut self,
        prefix: &str,
    ) -> bool {
        let mut node = &mut self.root;
        let mut depth = 0;
        for segment in segments(prefix) {
            node = node.children.entry(segment.to_string()).or_default();
            depth += 1;
        }
        if depth == 0 || node.terminal {
            return false;
        }
        node.terminal = true;
        self.len += 1;
        true
    }

    /// True when `key` equals a registered prefix or lies below one.
    pub fn matches(
        &self,
        key: &str,
    ) -> bool {
        let mut node = &self.root;
        for segment in segments(key) {
            match node.children.get(segment) {
                Some(child) if child.terminal => return true,
                Some(child) => node = child,
                None => return false,
            }
        }
        false
    }

    /// True only for an exactly registered prefix.
    pub fn contains(
        &self,
        prefix: &str,
    ) -> bool {
        let mut node = &self.root;
        let mut depth = 0;
        for segment in segments(prefix) {
            match node.children.get(segment) {
                Some(child) => node = child,
                None => return false,
            }
            depth += 1;
        }
        depth > 0 && node.terminal
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}
