//! Bounded per-notebook undo history.
//!
//! Each mutating tool records the file text as it was before the mutation.
//! `None` records that the file did not exist yet. History lives in process
//! memory only and is keyed by resolved path.

use std::collections::{HashMap, VecDeque};
use std::path::{Path, PathBuf};

/// Undo snapshots for every notebook touched in this session.
#[derive(Debug)]
pub struct History {
    limit: usize,
    entries: HashMap<PathBuf, VecDeque<Option<String>>>,
}

impl History {
    /// History keeping at most `limit` snapshots per notebook.
    pub fn new(limit: usize) -> Self {
        Self {
            limit,
            entries: HashMap::new(),
        }
    }

    /// Record the pre-mutation state of `path`, evicting the oldest snapshot
    /// once the limit is reached.
    pub fn record(&mut self, path: &Path, before: Option<String>) {
        if self.limit == 0 {
            return;
        }
        let log = self.entries.entry(path.to_path_buf()).or_default();
        if log.len() == self.limit {
            log.pop_front();
        }
        log.push_back(before);
    }

    /// Take the most recent snapshot of `path`.
    ///
    /// The outer `None` means there is nothing to undo.
    pub fn pop(&mut self, path: &Path) -> Option<Option<String>> {
        let log = self.entries.get_mut(path)?;
        let snapshot = log.pop_back();
        if log.is_empty() {
            self.entries.remove(path);
        }
        snapshot
    }

    /// Number of snapshots held for `path`.
    pub fn depth(&self, path: &Path) -> usize {
        self.entries.get(path).map_or(0, VecDeque::len)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn text(marker: &str) -> Option<String> {
        Some(marker.to_string())
    }

    #[test]
    fn test_pop_returns_newest_first() {
        let mut h = History::new(5);
        let p = Path::new("/w/a.ipynb");
        h.record(p, None);
        h.record(p, text("one"));
        h.record(p, text("two"));

        assert_eq!(h.pop(p).unwrap().as_deref(), Some("two"));
        assert_eq!(h.pop(p).unwrap().as_deref(), Some("one"));
        assert!(h.pop(p).unwrap().is_none());
        assert!(h.pop(p).is_none());
    }

    #[test]
    fn test_oldest_evicted_at_limit() {
        let mut h = History::new(2);
        let p = Path::new("/w/a.ipynb");
        h.record(p, text("one"));
        h.record(p, text("two"));
        h.record(p, text("three"));
        assert_eq!(h.depth(p), 2);
        assert_eq!(h.pop(p).unwrap().as_deref(), Some("three"));
        assert_eq!(h.pop(p).unwrap().as_deref(), Some("two"));
        assert!(h.pop(p).is_none());
    }

    #[test]
    fn test_histories_are_per_file() {
        let mut h = History::new(3);
        let a = Path::new("/w/a.ipynb");
        let b = Path::new("/w/b.ipynb");
        h.record(a, None);
        assert_eq!(h.depth(a), 1);
        assert_eq!(h.depth(b), 0);
        assert!(h.pop(b).is_none());
    }

    #[test]
    fn test_zero_limit_disables_history() {
        let mut h = History::new(0);
        let p = Path::new("/w/a.ipynb");
        h.record(p, None);
        assert!(h.pop(p).is_none());
    }
}
