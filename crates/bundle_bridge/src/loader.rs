//! The load hook the bridge injects into the bundler
//!
//! The loader has no resolution logic of its own. It answers lookups from the
//! run's registry, waiting for intake when the path has not arrived yet.

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;

use crate::{
    plugin::Plugin,
    run_state::{LookupOutcome, RunState},
};

pub const LOADER_NAME: &str = "bundle-bridge:load-intake";

#[derive(Debug, Clone)]
pub struct Loader {
    state: Arc<RunState>,
}

impl Loader {
    pub fn new(state: Arc<RunState>) -> Self {
        Self { state }
    }

    /// Contents of `path`, or `None` once it is certain the path never arrived
    ///
    /// Resolves without suspending when the answer is already known.
    pub async fn lookup(&self, path: &str) -> Option<String> {
        let resolution = match self.state.lookup(path) {
            LookupOutcome::Ready(resolution) => resolution,
            // The sender only disappears if the run state is torn down
            LookupOutcome::Pending(rx) => rx.await.ok().flatten(),
        };
        resolution.map(|file| file.contents_lossy().into_owned())
    }
}

#[async_trait]
impl Plugin for Loader {
    fn name(&self) -> &str {
        LOADER_NAME
    }

    async fn load(&self, path: &str) -> Result<Option<String>> {
        Ok(self.lookup(path).await)
    }
}
