//! Configuration file support for the `bundle-bridge` binary

use std::{
    fs,
    path::{Path, PathBuf},
};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::{orchestrator::BundleConfig, types::OutputFormat};

pub const DEFAULT_CONFIG_FILE: &str = "bundle-bridge.toml";

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case", deny_unknown_fields)]
pub struct Config {
    /// Entry module, relative to `root`
    pub entry: Option<String>,
    /// Directory whose files are streamed into the bridge
    pub root: Option<PathBuf>,
    pub format: OutputFormat,
    pub source_map: bool,
    /// Module ids left unresolved in the output
    pub external: Vec<String>,
    /// Where to write the bundle; stdout when absent
    pub output: Option<PathBuf>,
}

impl Config {
    /// Load configuration from a TOML file
    pub fn from_file(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        Self::from_toml(&text)
            .with_context(|| format!("Failed to parse config file {}", path.display()))
    }

    pub fn from_toml(text: &str) -> Result<Self> {
        Ok(toml::from_str(text)?)
    }

    /// Load `bundle-bridge.toml` from `dir` if present
    pub fn discover(dir: &Path) -> Result<Option<Self>> {
        let candidate = dir.join(DEFAULT_CONFIG_FILE);
        if !candidate.is_file() {
            return Ok(None);
        }
        log::debug!("Using config file {}", candidate.display());
        Self::from_file(&candidate).map(Some)
    }

    /// Directory to stream files from, defaulting to the current directory
    pub fn root_dir(&self) -> PathBuf {
        self.root.clone().unwrap_or_else(|| PathBuf::from("."))
    }

    /// Build the run configuration
    pub fn to_bundle_config(&self) -> Result<BundleConfig> {
        let entry = self
            .entry
            .clone()
            .context("No entry module configured; pass --entry or set `entry` in the config file")?;
        Ok(BundleConfig {
            entry,
            format: self.format,
            source_map: self.source_map,
            plugins: Vec::new(),
            external: self.external.clone(),
        })
    }
}
