//! Registry of files that have arrived on the intake side
//!
//! The registry is the storage half of a bundling run: it maps each path to the
//! most recent file delivered for it and remembers whether intake has ended.
//! Waking up lookups that are waiting on a path is handled by
//! [`crate::run_state::RunState`], which owns this registry together with the
//! pending request table.

use std::sync::Arc;

use indexmap::IndexMap;
use rustc_hash::FxBuildHasher;

use crate::types::File;

/// Type alias for FxHasher-based IndexMap
type FxIndexMap<K, V> = IndexMap<K, V, FxBuildHasher>;

/// Files received so far, keyed by path
#[derive(Debug, Default)]
pub struct FileRegistry {
    files: FxIndexMap<String, Arc<File>>,
    ended: bool,
}

impl FileRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a file, replacing any earlier file at the same path
    ///
    /// Returns the shared handle that was stored so callers can hand it to
    /// waiters without another map lookup.
    pub fn insert(&mut self, file: File) -> Arc<File> {
        let file = Arc::new(file);
        if let Some(previous) = self.files.insert(file.path.clone(), Arc::clone(&file)) {
            log::debug!(
                "Replacing {} ({} bytes) with {} bytes",
                previous.path,
                previous.contents.len(),
                file.contents.len()
            );
        }
        file
    }

    /// Get the current file stored at `path`
    pub fn get(&self, path: &str) -> Option<&Arc<File>> {
        self.files.get(path)
    }

    /// Check whether a file has been registered at `path`
    pub fn contains(&self, path: &str) -> bool {
        self.files.contains_key(path)
    }

    /// Flip the registry to ended
    ///
    /// Returns `false` if it had already ended. The flag never reverts.
    pub fn mark_ended(&mut self) -> bool {
        !std::mem::replace(&mut self.ended, true)
    }

    /// Whether intake has signalled that no more files will arrive
    pub fn is_ended(&self) -> bool {
        self.ended
    }

    /// Number of distinct paths stored
    pub fn len(&self) -> usize {
        self.files.len()
    }

    /// Check if the registry is empty
    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insert_and_get() {
        let mut registry = FileRegistry::new();
        assert!(registry.is_empty());

        registry.insert(File::new("a.js", "export default 1;"));

        assert!(registry.contains("a.js"));
        assert!(!registry.contains("b.js"));
        assert_eq!(
            registry.get("a.js").map(|f| f.contents_lossy().into_owned()),
            Some("export default 1;".to_owned())
        );
    }

    #[test]
    fn test_last_write_wins() {
        let mut registry = FileRegistry::new();
        let first = registry.insert(File::new("a.js", "old"));
        registry.insert(File::new("a.js", "new"));

        assert_eq!(registry.len(), 1);
        assert_eq!(registry.get("a.js").map(|f| f.contents.as_slice()), Some(&b"new"[..]));
        // Handles given out earlier keep their contents
        assert_eq!(first.contents, b"old");
    }

    #[test]
    fn test_mark_ended_is_one_way() {
        let mut registry = FileRegistry::new();
        assert!(!registry.is_ended());
        assert!(registry.mark_ended());
        assert!(registry.is_ended());
        assert!(!registry.mark_ended());
        assert!(registry.is_ended());
    }
}
