//! Search index family: KD-tree, ball tree, HNSW, LSH and quantizers.
//!
//! All indexes share one build/query/serialize contract ([`SearchIndex`])
//! and hold ids into the backing [`crate::storage::VectorList`]; every id an
//! index returns must resolve in that list at query time.

pub mod balltree;
pub mod hnsw;
pub mod kdtree;
pub mod lsh;
pub mod quantization;

mod heap;
mod rng;

pub(crate) use heap::{KnnHeap, OrderedFloat};
pub(crate) use rng::Xorshift64;

use crate::error::{Error, Result};
use std::io::{Read, Write};
use uuid::Uuid;

/// Algorithm selector for building and dispatching queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IndexAlgorithm {
    /// Median-split KD-tree.
    KdTree,
    /// Hierarchical bounding-ball tree.
    BallTree,
    /// Exact brute-force scan (no index state).
    Linear,
    /// Random-projection locality-sensitive hashing.
    Lsh,
    /// Hierarchical navigable small world graph.
    Hnsw,
    /// Sign/threshold binary quantization.
    BinaryQuantization,
    /// Product quantization with k-means sub-codebooks.
    ProductQuantization,
    /// Exact brute-force range scan.
    Range,
}

impl IndexAlgorithm {
    /// Wire tag in the service persistence stream, `None` for the stateless
    /// scan algorithms.
    #[must_use]
    pub const fn tag(self) -> Option<u32> {
        match self {
            Self::KdTree => Some(1),
            Self::BallTree => Some(2),
            Self::Hnsw => Some(3),
            Self::Lsh => Some(4),
            Self::BinaryQuantization => Some(5),
            Self::ProductQuantization => Some(6),
            Self::Linear | Self::Range => None,
        }
    }

    /// Inverse of [`Self::tag`].
    ///
    /// # Errors
    ///
    /// Returns `InvalidFormat` for an unknown tag.
    pub fn from_tag(tag: u32) -> Result<Self> {
        match tag {
            1 => Ok(Self::KdTree),
            2 => Ok(Self::BallTree),
            3 => Ok(Self::Hnsw),
            4 => Ok(Self::Lsh),
            5 => Ok(Self::BinaryQuantization),
            6 => Ok(Self::ProductQuantization),
            other => Err(Error::InvalidFormat(format!(
                "unknown index algorithm tag {other}"
            ))),
        }
    }
}

impl std::fmt::Display for IndexAlgorithm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::KdTree => "kd-tree",
            Self::BallTree => "ball-tree",
            Self::Linear => "linear",
            Self::Lsh => "lsh",
            Self::Hnsw => "hnsw",
            Self::BinaryQuantization => "binary-quantization",
            Self::ProductQuantization => "product-quantization",
            Self::Range => "range",
        };
        f.write_str(name)
    }
}

/// Common contract every search index implements.
///
/// Queries return `(id, distance)` pairs sorted ascending by distance; the
/// service materializes records from the backing list. Indexes are immutable
/// during queries; rebuilding is not coherent with ongoing queries, so
/// callers quiesce before `build`.
pub trait SearchIndex: Send + Sync {
    /// The algorithm this index implements.
    fn algorithm(&self) -> IndexAlgorithm;

    /// (Re)builds the index from the backing vector list.
    ///
    /// # Errors
    ///
    /// Returns an error when the source records are inconsistent (e.g.
    /// mixed dimensionality).
    fn build(&mut self) -> Result<()>;

    /// True when the index holds non-empty state.
    fn is_built(&self) -> bool;

    /// Drops all index state.
    fn clear(&mut self);

    /// k-nearest-neighbor query.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` for an empty query or `k == 0`,
    /// `DimensionMismatch` when the query does not match the indexed data.
    fn search(&self, query: &[f32], k: usize) -> Result<Vec<(Uuid, f32)>>;

    /// Range query: every indexed vector within `radius` of the query.
    ///
    /// # Errors
    ///
    /// `Unsupported` unless the index overrides it.
    fn range(&self, _query: &[f32], _radius: f32) -> Result<Vec<(Uuid, f32)>> {
        Err(Error::Unsupported(format!(
            "range queries are not supported by the {} index",
            self.algorithm()
        )))
    }

    /// Serializes the index state.
    ///
    /// # Errors
    ///
    /// Returns `Io` on write failure.
    fn save(&self, writer: &mut dyn Write) -> Result<()>;

    /// Restores the index state, resolving vector ids against the backing
    /// list. Entries whose ids no longer resolve are skipped.
    ///
    /// # Errors
    ///
    /// Returns `InvalidFormat` on a version mismatch or corrupt stream.
    fn load(&mut self, reader: &mut dyn Read) -> Result<()>;
}

pub(crate) fn validate_query(query: &[f32], k: usize) -> Result<()> {
    if query.is_empty() {
        return Err(Error::InvalidArgument("query vector is empty".into()));
    }
    if k == 0 {
        return Err(Error::InvalidArgument("k must be at least 1".into()));
    }
    Ok(())
}
