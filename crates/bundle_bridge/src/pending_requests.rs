//! Per-path queues of lookups that are waiting for a file to arrive
//!
//! Every unresolved lookup leaves a [`Waiter`] behind. Waiters for the same
//! path are kept in issue order and are handed back as a whole when that path
//! is resolved, either by an arriving file or by the end of intake.

use std::{collections::VecDeque, sync::Arc};

use indexmap::IndexMap;
use rustc_hash::FxBuildHasher;
use tokio::sync::oneshot;

use crate::types::File;

type FxIndexMap<K, V> = IndexMap<K, V, FxBuildHasher>;

/// Outcome delivered to a waiting lookup: the file, or `None` if it never came
pub type Resolution = Option<Arc<File>>;

/// A continuation parked on an unresolved path
#[derive(Debug)]
pub enum Waiter {
    /// Records whichever file resolves the path as the entry file
    EntryCapture,
    /// Wakes a suspended lookup
    Lookup(oneshot::Sender<Resolution>),
}

/// Waiters grouped by the path they are waiting on
#[derive(Debug, Default)]
pub struct PendingRequestTable {
    waiters: FxIndexMap<String, VecDeque<Waiter>>,
}

impl PendingRequestTable {
    /// Create an empty table
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a waiter behind any earlier waiters for `path`
    pub fn enqueue(&mut self, path: &str, waiter: Waiter) {
        self.waiters.entry(path.to_owned()).or_default().push_back(waiter);
    }

    /// Remove and return every waiter for `path`, oldest first
    ///
    /// The path's entry is dropped entirely; a later request re-creates it.
    pub fn take(&mut self, path: &str) -> VecDeque<Waiter> {
        self.waiters.shift_remove(path).unwrap_or_default()
    }

    /// Remove every waiter for every path
    ///
    /// Paths come back in the order they were first requested, each with its
    /// waiters oldest first.
    pub fn drain_all(&mut self) -> Vec<(String, VecDeque<Waiter>)> {
        self.waiters.drain(..).collect()
    }

    /// Number of waiters parked on `path`
    pub fn waiting_on(&self, path: &str) -> usize {
        self.waiters.get(path).map_or(0, VecDeque::len)
    }

    /// Check if nothing is waiting
    pub fn is_empty(&self) -> bool {
        self.waiters.is_empty()
    }
}
