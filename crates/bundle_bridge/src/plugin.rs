//! Seams between the bridge and the bundler collaborator
//!
//! The bundler itself is opaque. It is driven through [`Bundler`] and
//! [`Bundle`], and it calls back into the bridge through the [`Plugin`] load
//! hook whenever it needs the contents of a module.

use std::{fmt, sync::Arc};

use anyhow::{Context, Result};
use async_trait::async_trait;

use crate::types::{OutputFormat, SourceMap, SourceMapMode};

/// A resolution hook consulted by the bundler
///
/// Plugins are asked in order; the first one answering `Some` provides the
/// module contents. `Ok(None)` means "not mine / not found" and is not an error.
#[async_trait]
pub trait Plugin: Send + Sync {
    /// Human-readable name used in logs and error messages
    fn name(&self) -> &str;

    /// Load the contents of `path`
    async fn load(&self, path: &str) -> Result<Option<String>>;
}

/// Ordered list of plugins shared with the bundler
pub type PluginList = Vec<Arc<dyn Plugin>>;

/// Inputs to the build phase
#[derive(Clone)]
pub struct BuildOptions {
    /// Path of the module the bundle starts from
    pub entry: String,
    /// Resolution hooks, highest priority first
    pub plugins: PluginList,
    /// Module ids left unresolved in the output
    pub external: Vec<String>,
}

impl fmt::Debug for BuildOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BuildOptions")
            .field("entry", &self.entry)
            .field(
                "plugins",
                &self.plugins.iter().map(|p| p.name()).collect::<Vec<_>>(),
            )
            .field("external", &self.external)
            .finish()
    }
}

/// Inputs to the generate phase
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct GenerateOptions {
    pub format: OutputFormat,
    pub source_map: SourceMapMode,
}

/// Result of the generate phase
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeneratedBundle {
    pub code: String,
    pub map: Option<SourceMap>,
}

/// The bundling collaborator
#[async_trait]
pub trait Bundler: Send + Sync {
    /// Resolve and load every module reachable from `options.entry`
    async fn build(&self, options: BuildOptions) -> Result<Box<dyn Bundle>>;
}

/// A built module graph ready to be emitted
#[async_trait]
pub trait Bundle: Send + Sync {
    async fn generate(&self, options: GenerateOptions) -> Result<GeneratedBundle>;
}

/// Ask each plugin in turn for `path`, returning the first answer
pub async fn load_with(plugins: &[Arc<dyn Plugin>], path: &str) -> Result<Option<String>> {
    for plugin in plugins {
        let loaded = plugin
            .load(path)
            .await
            .with_context(|| format!("Plugin {} failed to load {path}", plugin.name()))?;
        if let Some(contents) = loaded {
            log::trace!("{path} loaded by {}", plugin.name());
            return Ok(Some(contents));
        }
    }
    Ok(None)
}
