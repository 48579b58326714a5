//! HNSW construction and search parameters.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};

/// Hard cap on the layer a node can be assigned to.
pub const MAX_LEVEL: usize = 16;

/// Tunable parameters of the HNSW graph.
///
/// `level_mult` is the level-generation normalizer `mL`; the probability of
/// a node reaching layer `l` is proportional to `exp(-l / mL)`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct HnswParams {
    /// Neighbor budget per non-zero layer (M).
    pub m: usize,
    /// Neighbor budget at layer 0 (usually 2·M).
    pub max_m0: usize,
    /// Candidate width during construction.
    pub ef_construction: usize,
    /// Default candidate width during queries; the effective layer-0 width
    /// is `max(k, ef)`.
    pub ef: usize,
    /// Level-generation normalizer (mL).
    pub level_mult: f64,
    /// PRNG seed for deterministic builds.
    pub seed: u64,
}

impl Default for HnswParams {
    fn default() -> Self {
        Self {
            m: 16,
            max_m0: 32,
            ef_construction: 200,
            ef: 200,
            level_mult: 1.0 / std::f64::consts::LN_2,
            seed: 42,
        }
    }
}

impl HnswParams {
    /// Recall-oriented preset: wider budgets, wider search.
    #[must_use]
    pub fn high_accuracy() -> Self {
        Self {
            m: 32,
            max_m0: 64,
            ef_construction: 400,
            ef: 400,
            ..Self::default()
        }
    }

    /// Latency-oriented preset: narrow budgets, shallow search.
    #[must_use]
    pub fn high_speed() -> Self {
        Self {
            m: 8,
            max_m0: 16,
            ef_construction: 100,
            ef: 100,
            ..Self::default()
        }
    }

    /// Validates the parameter combination.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` for degenerate budgets or widths.
    pub fn validate(&self) -> Result<()> {
        if self.m < 2 {
            return Err(Error::InvalidArgument("hnsw m must be at least 2".into()));
        }
        if self.max_m0 < self.m {
            return Err(Error::InvalidArgument(
                "hnsw max_m0 must be at least m".into(),
            ));
        }
        if self.ef_construction == 0 || self.ef == 0 {
            return Err(Error::InvalidArgument(
                "hnsw ef widths must be at least 1".into(),
            ));
        }
        if !(self.level_mult.is_finite() && self.level_mult > 0.0) {
            return Err(Error::InvalidArgument(
                "hnsw level_mult must be positive".into(),
            ));
        }
        Ok(())
    }
}
