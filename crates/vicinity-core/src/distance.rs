//! Distance calculators for vector similarity.
//!
//! The calculator set is closed: a tagged enum rather than an open trait,
//! which keeps dispatch branch-predictable and the serialized form stable.
//! Every variant implements both the scalar form and a batch form; the batch
//! form is the performance path and runs on the SIMD kernels in
//! [`crate::simd`].

use crate::error::{Error, Result};
use crate::simd;
use serde::{Deserialize, Serialize};

/// Distance calculator for vector similarity.
///
/// All variants return a *distance*: lower is more similar. Cosine is
/// expressed as `1 - similarity` so it composes with the other metrics.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
pub enum DistanceCalculator {
    /// Euclidean (L2) distance: `sqrt(sum((q - t)^2))`.
    #[default]
    Euclidean,

    /// Cosine distance: `1 - q·t / (‖q‖‖t‖)`.
    /// Best for normalized text embeddings.
    Cosine,

    /// Manhattan (L1) distance: `sum(|q - t|)`.
    Manhattan,

    /// Chebyshev (L∞) distance: `max(|q - t|)`.
    Chebyshev,

    /// Minkowski distance of order `p`: `(sum(|q - t|^p))^(1/p)`.
    Minkowski {
        /// Order of the norm; must be >= 1.
        p: f32,
    },
}

impl DistanceCalculator {
    /// Creates a Minkowski calculator of order `p`.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` if `p < 1` (not a metric below 1).
    pub fn minkowski(p: f32) -> Result<Self> {
        if !p.is_finite() || p < 1.0 {
            return Err(Error::InvalidArgument(format!(
                "Minkowski order must be a finite value >= 1, got {p}"
            )));
        }
        Ok(Self::Minkowski { p })
    }

    /// Calculates the distance between two vectors.
    ///
    /// # Errors
    ///
    /// Returns `DimensionMismatch` if the vectors have different lengths,
    /// `InvalidArgument` if either is empty.
    pub fn distance(&self, query: &[f32], target: &[f32]) -> Result<f32> {
        if query.is_empty() {
            return Err(Error::InvalidArgument("query vector is empty".into()));
        }
        if query.len() != target.len() {
            return Err(Error::DimensionMismatch {
                expected: query.len(),
                actual: target.len(),
            });
        }

        Ok(match self {
            Self::Euclidean => simd::euclidean_distance(query, target),
            Self::Cosine => 1.0 - simd::cosine_similarity(query, target),
            Self::Manhattan => simd::manhattan_distance(query, target),
            Self::Chebyshev => simd::chebyshev_distance(query, target),
            Self::Minkowski { p } => minkowski_distance(query, target, *p),
        })
    }

    /// Hot-path form without argument validation.
    ///
    /// Index query loops validate dimensions once at the API boundary and
    /// then call this per candidate.
    #[must_use]
    pub(crate) fn distance_unchecked(&self, query: &[f32], target: &[f32]) -> f32 {
        match self {
            Self::Euclidean => simd::euclidean_distance(query, target),
            Self::Cosine => 1.0 - simd::cosine_similarity(query, target),
            Self::Manhattan => simd::manhattan_distance(query, target),
            Self::Chebyshev => simd::chebyshev_distance(query, target),
            Self::Minkowski { p } => minkowski_distance(query, target, *p),
        }
    }

    /// Calculates distances from `query` to every target in one pass.
    ///
    /// This is the performance path: targets are visited in blocks sized by
    /// [`Self::optimal_batch_size`] so the query stays hot in cache while
    /// the SIMD kernels stream over the candidates.
    ///
    /// # Errors
    ///
    /// Returns `DimensionMismatch` on the first target with a different
    /// length, `InvalidArgument` for an empty query.
    pub fn distances(&self, query: &[f32], targets: &[&[f32]]) -> Result<Vec<f32>> {
        if query.is_empty() {
            return Err(Error::InvalidArgument("query vector is empty".into()));
        }

        let mut out = Vec::with_capacity(targets.len());
        let block = self.optimal_batch_size(query.len());

        for chunk in targets.chunks(block) {
            for target in chunk {
                out.push(self.distance(query, target)?);
            }
        }

        Ok(out)
    }

    /// Returns the preferred batch block size for dimension `d`.
    ///
    /// Sized so a block of candidates fits in L2 alongside the query;
    /// monotonically non-increasing in `d`.
    #[must_use]
    pub fn optimal_batch_size(&self, dimension: usize) -> usize {
        // ~512KB of candidate data per block
        const BLOCK_BYTES: usize = 512 * 1024;
        let per_vector = dimension.max(1) * std::mem::size_of::<f32>();
        (BLOCK_BYTES / per_vector).clamp(16, 4096)
    }
}

fn minkowski_distance(a: &[f32], b: &[f32], p: f32) -> f32 {
    let sum: f32 = a
        .iter()
        .zip(b.iter())
        .map(|(x, y)| (x - y).abs().powf(p))
        .sum();
    sum.powf(1.0 / p)
}
