//! Configuration via `vicinity.toml`, environment variables and defaults.
//!
//! # Priority (highest to lowest)
//!
//! 1. Environment variables (`VICINITY_*`)
//! 2. Configuration file (`vicinity.toml`)
//! 3. Default values

use crate::error::{Error, Result};
use crate::index::hnsw::HnswParams;
use crate::index::lsh::LshParams;
use crate::storage::DEFAULT_CAPACITY;

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Storage configuration section.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Entry capacity of the vector list (pre-sized, not grown online).
    pub capacity: usize,
    /// Data directory; `None` places the backing files under the system
    /// temp directory and deletes them on drop.
    pub data_dir: Option<String>,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            capacity: DEFAULT_CAPACITY,
            data_dir: None,
        }
    }
}

/// HNSW index configuration section.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HnswConfig {
    /// Neighbor budget per non-zero layer.
    pub m: usize,
    /// Neighbor budget at layer 0.
    pub max_m0: usize,
    /// Construction-time candidate width.
    pub ef_construction: usize,
    /// Default query-time candidate width.
    pub ef: usize,
    /// Build seed.
    pub seed: u64,
}

impl Default for HnswConfig {
    fn default() -> Self {
        let params = HnswParams::default();
        Self {
            m: params.m,
            max_m0: params.max_m0,
            ef_construction: params.ef_construction,
            ef: params.ef,
            seed: params.seed,
        }
    }
}

/// LSH index configuration section.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LshConfig {
    /// Number of hash tables.
    pub tables: usize,
    /// Bits per table.
    pub hash_bits: usize,
    /// Projection seed.
    pub seed: u64,
}

impl Default for LshConfig {
    fn default() -> Self {
        let params = LshParams::default();
        Self {
            tables: params.tables,
            hash_bits: params.hash_bits,
            seed: params.seed,
        }
    }
}

/// Search configuration section.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchConfig {
    /// Similarity threshold applied to k-NN results when the caller does
    /// not pass one explicitly. `None` disables filtering.
    pub default_threshold: Option<f32>,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            default_threshold: None,
        }
    }
}

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct VicinityConfig {
    /// Storage section.
    pub storage: StorageConfig,
    /// HNSW section.
    pub hnsw: HnswConfig,
    /// LSH section.
    pub lsh: LshConfig,
    /// Search section.
    pub search: SearchConfig,
}

impl VicinityConfig {
    /// Loads configuration from defaults, an optional TOML file, and
    /// `VICINITY_*` environment variables (e.g. `VICINITY_STORAGE__CAPACITY`).
    ///
    /// # Errors
    ///
    /// Returns `Config` when the file or environment cannot be parsed, or
    /// when a value fails validation.
    pub fn load<P: AsRef<Path>>(path: Option<P>) -> Result<Self> {
        let mut figment = Figment::from(Serialized::defaults(Self::default()));
        if let Some(path) = path {
            figment = figment.merge(Toml::file(path.as_ref()));
        }
        figment = figment.merge(Env::prefixed("VICINITY_").split("__"));

        let config: Self = figment
            .extract()
            .map_err(|e| Error::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Validates the loaded values.
    ///
    /// # Errors
    ///
    /// Returns `Config` describing the first invalid value.
    pub fn validate(&self) -> Result<()> {
        if self.storage.capacity == 0 {
            return Err(Error::Config("storage.capacity must be at least 1".into()));
        }
        self.hnsw_params()
            .validate()
            .map_err(|e| Error::Config(format!("hnsw section: {e}")))?;
        if self.lsh.tables == 0 || self.lsh.hash_bits == 0 || self.lsh.hash_bits > 30 {
            return Err(Error::Config(
                "lsh section: tables must be >= 1, hash_bits in 1..=30".into(),
            ));
        }
        if let Some(tau) = self.search.default_threshold {
            if !(tau.is_finite() && tau > 0.0) {
                return Err(Error::Config(
                    "search.default_threshold must be positive and finite".into(),
                ));
            }
        }
        Ok(())
    }

    /// The HNSW parameters this configuration describes.
    #[must_use]
    pub fn hnsw_params(&self) -> HnswParams {
        HnswParams {
            m: self.hnsw.m,
            max_m0: self.hnsw.max_m0,
            ef_construction: self.hnsw.ef_construction,
            ef: self.hnsw.ef,
            seed: self.hnsw.seed,
            ..HnswParams::default()
        }
    }

    /// The LSH parameters this configuration describes.
    #[must_use]
    pub fn lsh_params(&self) -> LshParams {
        LshParams {
            tables: self.lsh.tables,
            hash_bits: self.lsh.hash_bits,
            seed: self.lsh.seed,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = VicinityConfig::default();
        config.validate().unwrap();
        assert_eq!(config.storage.capacity, DEFAULT_CAPACITY);
        assert_eq!(config.hnsw_params(), HnswParams::default());
        assert_eq!(config.lsh_params(), LshParams::default());
    }

    #[test]
    fn test_toml_overrides_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("vicinity.toml");
        std::fs::write(
            &path,
            "[storage]\ncapacity = 500\n\n[hnsw]\nm = 8\nmax_m0 = 16\n",
        )
        .unwrap();

        let config = VicinityConfig::load(Some(&path)).unwrap();
        assert_eq!(config.storage.capacity, 500);
        assert_eq!(config.hnsw.m, 8);
        // Values the file does not mention keep their defaults.
        assert_eq!(config.hnsw.ef, 200);
    }

    #[test]
    fn test_missing_file_falls_back_to_defaults() {
        let config = VicinityConfig::load(Some("/nonexistent/vicinity.toml")).unwrap();
        assert_eq!(config.storage.capacity, DEFAULT_CAPACITY);
    }

    #[test]
    fn test_invalid_values_rejected() {
        let mut config = VicinityConfig::default();
        config.storage.capacity = 0;
        assert!(config.validate().is_err());

        let mut config = VicinityConfig::default();
        config.lsh.hash_bits = 40;
        assert!(config.validate().is_err());

        let mut config = VicinityConfig::default();
        config.search.default_threshold = Some(-1.0);
        assert!(config.validate().is_err());
    }
}
