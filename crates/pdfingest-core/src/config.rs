//! Configuration management for the ingestion core
//!
//! Settings come from a TOML file with one table per component, then
//! environment overrides. Every field has a default, so an empty file (or
//! no file) is a valid configuration.
//!
//! ```toml
//! [cache]
//! max_entries = 256
//! max_text_bytes = 67108864
//! max_age_secs = 3600
//!
//! [extraction]
//! adjacency_threshold = 0.15
//!
//! [parser]
//! max_reference_depth = 32
//! max_tree_depth = 64
//! ```

use std::path::Path;

use anyhow::{anyhow, bail, Context, Result};
use serde::{Deserialize, Serialize};

use crate::cache::CacheConfig;
use crate::extract::ExtractionOptions;
use crate::parser::ParserOptions;

/// Names the config file used by the CLI when `--config` is absent
pub const CONFIG_PATH_VAR: &str = "PDFINGEST_CONFIG";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IngestConfig {
    pub cache: CacheConfig,
    pub extraction: ExtractionOptions,
    pub parser: ParserOptions,
}

impl IngestConfig {
    pub fn from_toml_str(source: &str) -> Result<Self> {
        toml::from_str(source).context("Invalid configuration TOML")
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let source = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        Self::from_toml_str(&source).with_context(|| format!("Failed to load {}", path.display()))
    }

    /// File (if given), then environment overrides, then validation
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        config.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    /// Apply overrides from the process environment
    ///
    /// Recognised variables:
    /// - PDFINGEST_CACHE_MAX_ENTRIES
    /// - PDFINGEST_CACHE_MAX_TEXT_BYTES
    /// - PDFINGEST_CACHE_MAX_AGE_SECS
    /// - PDFINGEST_ADJACENCY_THRESHOLD
    pub fn apply_env_overrides(&mut self) -> Result<()> {
        self.apply_overrides(|name| std::env::var(name).ok())
    }

    /// Apply overrides from any variable source
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(value) = lookup("PDFINGEST_CACHE_MAX_ENTRIES") {
            self.cache.max_entries = parse_var("PDFINGEST_CACHE_MAX_ENTRIES", &value)?;
        }
        if let Some(value) = lookup("PDFINGEST_CACHE_MAX_TEXT_BYTES") {
            self.cache.max_text_bytes = Some(parse_var("PDFINGEST_CACHE_MAX_TEXT_BYTES", &value)?);
        }
        if let Some(value) = lookup("PDFINGEST_CACHE_MAX_AGE_SECS") {
            self.cache.max_age_secs = Some(parse_var("PDFINGEST_CACHE_MAX_AGE_SECS", &value)?);
        }
        if let Some(value) = lookup("PDFINGEST_ADJACENCY_THRESHOLD") {
            self.extraction.adjacency_threshold = parse_var("PDFINGEST_ADJACENCY_THRESHOLD", &value)?;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.cache.max_entries == 0 {
            bail!("cache.max_entries must be at least 1");
        }
        let threshold = self.extraction.adjacency_threshold;
        if !threshold.is_finite() || threshold < 0.0 {
            bail!("extraction.adjacency_threshold must be a non-negative number, got {}", threshold);
        }
        if self.parser.max_reference_depth == 0 {
            bail!("parser.max_reference_depth must be at least 1");
        }
        if self.parser.max_tree_depth == 0 {
            bail!("parser.max_tree_depth must be at least 1");
        }
        Ok(())
    }
}

fn parse_var<T>(name: &str, value: &str) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    value
        .trim()
        .parse()
        .map_err(|e| anyhow!("Invalid value {:?} for {}: {}", value, name, e))
}
