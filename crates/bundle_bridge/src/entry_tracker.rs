//! Tracking of the entry file
//!
//! The entry file is decided by call order: the path of the very first lookup
//! claims the slot, and whichever file eventually answers that lookup is
//! bound to it. Files that arrive earlier for other paths do not matter.

use std::sync::Arc;

use crate::types::File;

#[derive(Debug, Default)]
pub struct EntryFileTracker {
    claimed: Option<String>,
    file: Option<Arc<File>>,
}

impl EntryFileTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim the slot for `path` if no lookup has claimed it yet
    ///
    /// Returns `true` only for the call that performed the claim.
    pub fn claim(&mut self, path: &str) -> bool {
        if self.claimed.is_some() {
            return false;
        }
        log::debug!("Entry file claimed by first lookup of {path}");
        self.claimed = Some(path.to_owned());
        true
    }

    /// Bind the file that resolved the claiming lookup. Only the first bind sticks.
    pub fn bind(&mut self, file: Arc<File>) {
        if self.file.is_none() {
            self.file = Some(file);
        }
    }

    /// Path of the first lookup, if any lookup has been issued
    pub fn claimed_path(&self) -> Option<&str> {
        self.claimed.as_deref()
    }

    pub fn file(&self) -> Option<&Arc<File>> {
        self.file.as_ref()
    }
}
