//! Shared state of one bundling run
//!
//! `RunState` bundles the file registry, the pending request table, the entry
//! file tracker and the bridge phase behind a single lock. Intake and lookups
//! both go through it, so "request before arrival" and "request after end"
//! are decided atomically and every waiter fires exactly once.

use std::{fmt, sync::Arc};

use log::{debug, trace};
use parking_lot::Mutex;
use tokio::sync::oneshot;

use crate::{
    entry_tracker::EntryFileTracker,
    file_registry::FileRegistry,
    pending_requests::{PendingRequestTable, Resolution, Waiter},
    types::File,
};

/// Lifecycle of the bridge. Transitions only move forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum BridgePhase {
    /// Accepting intake
    Open,
    /// Intake ended, bundling still in progress
    Draining,
    /// Result or error emitted
    Closed,
}

impl fmt::Display for BridgePhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Open => write!(f, "open"),
            Self::Draining => write!(f, "draining"),
            Self::Closed => write!(f, "closed"),
        }
    }
}

/// Answer to a lookup
#[derive(Debug)]
pub enum LookupOutcome {
    /// Known without waiting
    Ready(Resolution),
    /// Parked until the path arrives or intake ends
    Pending(oneshot::Receiver<Resolution>),
}

#[derive(Debug)]
struct Inner {
    registry: FileRegistry,
    pending: PendingRequestTable,
    entry: EntryFileTracker,
    phase: BridgePhase,
}

impl Inner {
    fn advance(&mut self, to: BridgePhase) {
        if to > self.phase {
            debug!("Bridge phase {} -> {}", self.phase, to);
            self.phase = to;
        }
    }
}

#[derive(Debug)]
pub struct RunState {
    inner: Mutex<Inner>,
}

impl Default for RunState {
    fn default() -> Self {
        Self::new()
    }
}

impl RunState {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                registry: FileRegistry::new(),
                pending: PendingRequestTable::new(),
                entry: EntryFileTracker::new(),
                phase: BridgePhase::Open,
            }),
        }
    }

    /// Store an arrived file and resolve every lookup waiting on its path
    ///
    /// Waiters are resolved in the order their lookups were issued. Lookups
    /// resolved earlier are never revisited, even if the path is registered
    /// again later. Returns `false` when the run is already closed and the
    /// file was discarded.
    pub fn register(&self, file: File) -> bool {
        let mut guard = self.inner.lock();
        let inner = &mut *guard;
        if inner.phase == BridgePhase::Closed {
            trace!("Run closed, discarding {}", file.path);
            return false;
        }

        let file = inner.registry.insert(file);
        let waiters = inner.pending.take(&file.path);
        debug!(
            "Registered {} ({} bytes), waking {} waiter(s)",
            file.path,
            file.contents.len(),
            waiters.len()
        );

        for waiter in waiters {
            match waiter {
                Waiter::EntryCapture => inner.entry.bind(Arc::clone(&file)),
                Waiter::Lookup(tx) => {
                    if tx.send(Some(Arc::clone(&file))).is_err() {
                        trace!("Lookup for {} was abandoned before resolution", file.path);
                    }
                }
            }
        }
        true
    }

    /// Signal that no more files will arrive
    ///
    /// Every remaining waiter is resolved with `None` and the table is
    /// cleared. Calls after the first are no-ops.
    pub fn mark_ended(&self) {
        let mut guard = self.inner.lock();
        let inner = &mut *guard;
        if !inner.registry.mark_ended() {
            return;
        }
        inner.advance(BridgePhase::Draining);

        let drained = inner.pending.drain_all();
        debug!(
            "Intake ended with {} file(s), {} path(s) still requested",
            inner.registry.len(),
            drained.len()
        );
        for (path, waiters) in drained {
            for waiter in waiters {
                if let Waiter::Lookup(tx) = waiter {
                    if tx.send(None).is_err() {
                        trace!("Lookup for {path} was abandoned before resolution");
                    }
                }
            }
        }
    }

    /// Look up `path`, parking the request if the answer is not known yet
    ///
    /// The first lookup ever issued claims the entry file slot before its
    /// answer is known.
    pub fn lookup(&self, path: &str) -> LookupOutcome {
        let mut guard = self.inner.lock();
        let inner = &mut *guard;
        let claimed = inner.entry.claim(path);

        if let Some(file) = inner.registry.get(path) {
            let file = Arc::clone(file);
            if claimed {
                inner.entry.bind(Arc::clone(&file));
            }
            return LookupOutcome::Ready(Some(file));
        }

        if inner.registry.is_ended() {
            trace!("{path} requested after intake ended");
            return LookupOutcome::Ready(None);
        }

        if claimed {
            inner.pending.enqueue(path, Waiter::EntryCapture);
        }
        let (tx, rx) = oneshot::channel();
        inner.pending.enqueue(path, Waiter::Lookup(tx));
        debug!(
            "{path} not available yet, {} waiter(s) queued",
            inner.pending.waiting_on(path)
        );
        LookupOutcome::Pending(rx)
    }

    /// The file bound to the first lookup, once known
    pub fn entry_file(&self) -> Option<Arc<File>> {
        self.inner.lock().entry.file().cloned()
    }

    pub fn phase(&self) -> BridgePhase {
        self.inner.lock().phase
    }

    /// Move to `Closed`; no further intake is stored
    pub fn close(&self) {
        self.inner.lock().advance(BridgePhase::Closed);
    }

    /// Whether intake has ended
    pub fn is_ended(&self) -> bool {
        self.inner.lock().registry.is_ended()
    }

    /// Number of lookups currently parked on `path`
    pub fn waiting_on(&self, path: &str) -> usize {
        self.inner.lock().pending.waiting_on(path)
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    fn ready_contents(outcome: LookupOutcome) -> Option<String> {
        match outcome {
            LookupOutcome::Ready(resolution) => {
                resolution.map(|file| file.contents_lossy().into_owned())
            }
            LookupOutcome::Pending(_) => panic!("expected an immediate answer"),
        }
    }

    fn pending(outcome: LookupOutcome) -> oneshot::Receiver<Resolution> {
        match outcome {
            LookupOutcome::Pending(rx) => rx,
            LookupOutcome::Ready(_) => panic!("expected the lookup to be parked"),
        }
    }

    #[test]
    fn test_lookup_of_registered_file_is_immediate() {
        let state = RunState::new();
        state.register(File::new("a.js", "export default 1;"));

        assert_eq!(
            ready_contents(state.lookup("a.js")),
            Some("export default 1;".to_owned())
        );
        assert_eq!(state.entry_file().map(|f| f.path.clone()), Some("a.js".to_owned()));
    }

    #[test]
    fn test_lookup_after_end_is_none() {
        let state = RunState::new();
        state.mark_ended();
        assert_eq!(ready_contents(state.lookup("c.js")), None);
    }

    #[test]
    fn test_parked_lookup_resolves_on_arrival() {
        let state = RunState::new();
        let mut rx = pending(state.lookup("b.js"));
        assert!(rx.try_recv().is_err());

        state.register(File::new("b.js", "export const x=2;"));

        let file = rx.try_recv().unwrap().unwrap();
        assert_eq!(file.contents, b"export const x=2;");
        assert_eq!(state.waiting_on("b.js"), 0);
    }

    #[test]
    fn test_parked_lookup_resolves_none_on_end() {
        let state = RunState::new();
        let mut rx = pending(state.lookup("c.js"));
        state.mark_ended();

        assert_eq!(rx.try_recv().unwrap(), None);
        assert_eq!(state.phase(), BridgePhase::Draining);
    }

    #[test]
    fn test_entry_follows_call_order_not_arrival_order() {
        let state = RunState::new();
        state.register(File::new("other.js", "1").with_base("lib"));

        let _rx = pending(state.lookup("main.js"));
        assert_eq!(ready_contents(state.lookup("other.js")), Some("1".to_owned()));
        assert!(state.entry_file().is_none());

        state.register(File::new("main.js", "2").with_base("src"));
        let entry = state.entry_file().unwrap();
        assert_eq!(entry.path, "main.js");
        assert_eq!(entry.base.as_deref(), Some("src"));
    }

    #[test]
    fn test_entry_unbound_when_first_lookup_never_arrives() {
        let state = RunState::new();
        let _rx = pending(state.lookup("missing.js"));
        state.mark_ended();
        state.register(File::new("missing.js", "late"));

        assert!(state.entry_file().is_none());
    }

    #[test]
    fn test_reregistration_does_not_notify_resolved_lookups() {
        let state = RunState::new();
        let mut rx = pending(state.lookup("a.js"));
        state.register(File::new("a.js", "v1"));
        state.register(File::new("a.js", "v2"));

        assert_eq!(rx.try_recv().unwrap().unwrap().contents, b"v1");
        assert_eq!(ready_contents(state.lookup("a.js")), Some("v2".to_owned()));
        assert_eq!(state.entry_file().unwrap().contents, b"v1");
    }

    #[test]
    fn test_mark_ended_twice_is_noop() {
        let state = RunState::new();
        state.mark_ended();
        state.mark_ended();
        assert!(state.is_ended());
        assert_eq!(state.phase(), BridgePhase::Draining);
    }

    #[test]
    fn test_phase_only_moves_forward() {
        let state = RunState::new();
        assert_eq!(state.phase(), BridgePhase::Open);
        state.close();
        state.mark_ended();
        assert_eq!(state.phase(), BridgePhase::Closed);
        assert!(!state.register(File::new("a.js", "")));
    }
}
