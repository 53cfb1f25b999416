//! Orchestration of one bundling run
//!
//! The orchestrator prepends the intake loader to the plugin list, drives the
//! bundler's build and generate phases strictly in sequence, wraps the
//! generated code as a file and pushes it, or the failure, to the result
//! stream.

use std::{any::Any, fmt, panic::AssertUnwindSafe, sync::Arc};

use anyhow::{Result, anyhow};
use futures::FutureExt;
use log::{info, warn};

use crate::{
    bridge::{ResultEmitter, StreamBridge},
    loader::Loader,
    plugin::{BuildOptions, Bundler, GenerateOptions, Plugin, PluginList},
    run_state::RunState,
    types::{File, OutputFormat, SourceMapMode},
};

/// Configuration of one bundling run
#[derive(Clone, Default)]
pub struct BundleConfig {
    /// Entry module path; also the path of the output file
    pub entry: String,
    pub format: OutputFormat,
    /// Emit an inline source map
    pub source_map: bool,
    /// User plugins, consulted after the intake loader
    pub plugins: PluginList,
    /// Module ids the bundler should leave unresolved
    pub external: Vec<String>,
}

impl fmt::Debug for BundleConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BundleConfig")
            .field("entry", &self.entry)
            .field("format", &self.format)
            .field("source_map", &self.source_map)
            .field(
                "plugins",
                &self.plugins.iter().map(|p| p.name()).collect::<Vec<_>>(),
            )
            .field("external", &self.external)
            .finish()
    }
}

impl BundleConfig {
    pub fn new(entry: impl Into<String>) -> Self {
        Self {
            entry: entry.into(),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_format(mut self, format: OutputFormat) -> Self {
        self.format = format;
        self
    }

    #[must_use]
    pub fn with_source_map(mut self, enabled: bool) -> Self {
        self.source_map = enabled;
        self
    }

    #[must_use]
    pub fn with_plugin(mut self, plugin: Arc<dyn Plugin>) -> Self {
        self.plugins.push(plugin);
        self
    }

    #[must_use]
    pub fn with_external(mut self, id: impl Into<String>) -> Self {
        self.external.push(id.into());
        self
    }
}

/// Start a bundling run and return its duplex handle
///
/// Must be called from within a tokio runtime. Files sent into the returned
/// bridge feed the bundler's lookups; the bridge's output yields the single
/// bundled file or the bundling error.
pub fn bundle(config: BundleConfig, bundler: Arc<dyn Bundler>) -> StreamBridge {
    let state = Arc::new(RunState::new());
    let (bridge, emitter) = StreamBridge::open(Arc::clone(&state));
    tokio::spawn(run(config, bundler, state, emitter));
    bridge
}

/// Feed `files` into a new run, end intake and wait for the outcome
pub async fn bundle_files<I>(
    config: BundleConfig,
    bundler: Arc<dyn Bundler>,
    files: I,
) -> Result<File>
where
    I: IntoIterator<Item = File>,
{
    let bridge = bundle(config, bundler);
    for file in files {
        bridge.send(file).await?;
    }
    bridge.finish().await
}

async fn run(
    config: BundleConfig,
    bundler: Arc<dyn Bundler>,
    state: Arc<RunState>,
    emitter: ResultEmitter,
) {
    info!("Bundling {} as {}", config.entry, config.format);
    let outcome = AssertUnwindSafe(build_and_generate(&config, bundler.as_ref(), &state))
        .catch_unwind()
        .await
        .unwrap_or_else(|payload| Err(panic_to_error(payload.as_ref())));
    match &outcome {
        Ok(file) => info!("Bundled {} ({} bytes)", file.path, file.contents.len()),
        Err(err) => warn!("Bundling {} failed: {err:#}", config.entry),
    }
    emitter.emit(outcome).await;
}

/// Turn a bundler panic into a bundling failure
fn panic_to_error(payload: &(dyn Any + Send)) -> anyhow::Error {
    let message = payload
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("non-string panic payload");
    anyhow!("Bundler panicked: {message}")
}

async fn build_and_generate(
    config: &BundleConfig,
    bundler: &dyn Bundler,
    state: &Arc<RunState>,
) -> Result<File> {
    let mut plugins: PluginList = Vec::with_capacity(config.plugins.len() + 1);
    plugins.push(Arc::new(Loader::new(Arc::clone(state))));
    plugins.extend(config.plugins.iter().cloned());

    let built = bundler
        .build(BuildOptions {
            entry: config.entry.clone(),
            plugins,
            external: config.external.clone(),
        })
        .await?;

    let generated = built
        .generate(GenerateOptions {
            format: config.format,
            source_map: SourceMapMode::from(config.source_map),
        })
        .await?;

    Ok(File {
        path: config.entry.clone(),
        contents: generated.code.into_bytes(),
        base: state.entry_file().and_then(|entry| entry.base.clone()),
        source_map: generated.map,
    })
}
