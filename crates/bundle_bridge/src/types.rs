//! Shared type definitions for the bundle bridge
//!
//! This module contains the file record that flows through the bridge and the
//! small tags that describe how the bundler should emit its output.

use std::{borrow::Cow, fmt};

use serde::{Deserialize, Serialize};

/// A single file flowing through the bridge
///
/// Files arrive on the intake side keyed by `path`. The bridge never mutates a
/// file once it has been wrapped; a later arrival for the same path replaces
/// the stored entry instead.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct File {
    /// Unique key used for lookups
    pub path: String,
    /// Raw file contents
    pub contents: Vec<u8>,
    /// Base directory the path is relative to, if known
    pub base: Option<String>,
    /// Source map attached to generated output
    pub source_map: Option<SourceMap>,
}

impl File {
    /// Create a file without base directory or source map
    pub fn new(path: impl Into<String>, contents: impl Into<Vec<u8>>) -> Self {
        Self {
            path: path.into(),
            contents: contents.into(),
            base: None,
            source_map: None,
        }
    }

    /// Attach a base directory
    #[must_use]
    pub fn with_base(mut self, base: impl Into<String>) -> Self {
        self.base = Some(base.into());
        self
    }

    /// Contents decoded as UTF-8, replacing invalid sequences
    pub fn contents_lossy(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.contents)
    }

    /// The path with `base` stripped from the front
    ///
    /// Falls back to the full path when there is no base or the path does not
    /// live under it.
    pub fn relative(&self) -> &str {
        let Some(base) = self.base.as_deref() else {
            return &self.path;
        };
        let base = base.trim_end_matches('/');
        match self.path.strip_prefix(base) {
            Some(rest) if base.is_empty() => rest,
            Some(rest) if rest.starts_with('/') => rest.trim_start_matches('/'),
            _ => &self.path,
        }
    }
}

/// Output format tag handed to the bundler's generate phase
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize, clap::ValueEnum,
)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    /// ES module output
    #[default]
    #[serde(alias = "esm")]
    #[value(alias = "esm")]
    Es,
    /// CommonJS output
    Cjs,
    /// Self-executing function
    Iife,
}

impl fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Es => write!(f, "es"),
            Self::Cjs => write!(f, "cjs"),
            Self::Iife => write!(f, "iife"),
        }
    }
}

/// How the generate phase should produce source maps
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SourceMapMode {
    /// No source map
    #[default]
    Disabled,
    /// Source map embedded in the generated code
    Inline,
}

impl From<bool> for SourceMapMode {
    fn from(enabled: bool) -> Self {
        if enabled { Self::Inline } else { Self::Disabled }
    }
}

/// Version 3 source map record
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceMap {
    pub version: u8,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file: Option<String>,
    pub sources: Vec<String>,
    #[serde(default)]
    pub sources_content: Vec<Option<String>>,
    #[serde(default)]
    pub names: Vec<String>,
    pub mappings: String,
}
