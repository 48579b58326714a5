//! Search service: builds, owns, persists and dispatches to the indexes.
//!
//! The service is the façade a host embeds: it owns the backing
//! [`VectorList`], one index instance per algorithm, the distance
//! calculator, and the optional embedding generator behind the text-query
//! overload.

mod text;

use crate::distance::DistanceCalculator;
use crate::embedding::EmbeddingGenerator;
use crate::error::{Error, Result};
use crate::index::balltree::BallTreeIndex;
use crate::index::hnsw::{HnswIndex, HnswParams};
use crate::index::kdtree::KdTreeIndex;
use crate::index::lsh::{LshIndex, LshParams};
use crate::index::quantization::{BinaryQuantizationIndex, ProductQuantizationIndex};
use crate::index::{IndexAlgorithm, KnnHeap, SearchIndex};
use crate::storage::VectorList;
use crate::vector::Vector;

use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use std::io::{Read, Write};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{error, info, warn};
use uuid::Uuid;

const SERVICE_FILE_VERSION: u32 = 1;

/// Algorithms with index state the service builds and persists.
const BUILDABLE: [IndexAlgorithm; 6] = [
    IndexAlgorithm::KdTree,
    IndexAlgorithm::BallTree,
    IndexAlgorithm::Hnsw,
    IndexAlgorithm::Lsh,
    IndexAlgorithm::BinaryQuantization,
    IndexAlgorithm::ProductQuantization,
];

/// One search result: the record plus its distance to the query.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchHit {
    /// The matching record.
    pub vector: Vector,
    /// Distance to the query under the calculator in effect.
    pub distance: f32,
}

impl SearchHit {
    /// Creates a new search hit.
    #[must_use]
    pub const fn new(vector: Vector, distance: f32) -> Self {
        Self { vector, distance }
    }
}

/// Façade over the vector list and the index family.
pub struct SearchService {
    vectors: Arc<VectorList>,
    calc: DistanceCalculator,
    hnsw_params: HnswParams,
    lsh_params: LshParams,
    indexes: RwLock<FxHashMap<IndexAlgorithm, Box<dyn SearchIndex>>>,
    embedding_generator: RwLock<Option<Box<dyn EmbeddingGenerator>>>,
    /// Bumped on every mutation routed through the service; lets callers
    /// see which built indexes no longer reflect the list.
    mutation_epoch: AtomicU64,
    /// Epoch each index was built at.
    built_epochs: RwLock<FxHashMap<IndexAlgorithm, u64>>,
}

impl SearchService {
    /// Creates a service over the given vector list with the default
    /// (Euclidean) calculator.
    #[must_use]
    pub fn new(vectors: Arc<VectorList>) -> Self {
        Self {
            vectors,
            calc: DistanceCalculator::default(),
            hnsw_params: HnswParams::default(),
            lsh_params: LshParams::default(),
            indexes: RwLock::new(FxHashMap::default()),
            embedding_generator: RwLock::new(None),
            mutation_epoch: AtomicU64::new(0),
            built_epochs: RwLock::new(FxHashMap::default()),
        }
    }

    /// Replaces the distance calculator used by the exact paths and the
    /// tree indexes. Call before building.
    #[must_use]
    pub fn with_calculator(mut self, calc: DistanceCalculator) -> Self {
        self.calc = calc;
        self
    }

    /// Replaces the HNSW construction parameters. Call before building.
    #[must_use]
    pub fn with_hnsw_params(mut self, params: HnswParams) -> Self {
        self.hnsw_params = params;
        self
    }

    /// Replaces the LSH parameters. Call before building.
    #[must_use]
    pub fn with_lsh_params(mut self, params: LshParams) -> Self {
        self.lsh_params = params;
        self
    }

    /// The backing vector list.
    #[must_use]
    pub fn vectors(&self) -> &Arc<VectorList> {
        &self.vectors
    }

    /// Injects the text-embedding port used by the text-query overload.
    pub fn set_embedding_generator(&self, generator: Box<dyn EmbeddingGenerator>) {
        *self.embedding_generator.write() = Some(generator);
    }

    /// Appends a record through the service, marking built indexes stale.
    ///
    /// # Errors
    ///
    /// Propagates [`VectorList::add`] failures.
    pub fn add_vector(&self, vector: &Vector) -> Result<()> {
        self.vectors.add(vector)?;
        self.mutation_epoch.fetch_add(1, Ordering::Release);
        Ok(())
    }

    /// Removes a record through the service, marking built indexes stale
    /// when something was removed.
    pub fn remove_vector(&self, vector: &Vector) -> bool {
        let removed = self.vectors.remove(vector);
        if removed {
            self.mutation_epoch.fetch_add(1, Ordering::Release);
        }
        removed
    }

    /// Replaces a record through the service, marking built indexes stale
    /// when the id was found.
    ///
    /// # Errors
    ///
    /// Propagates [`VectorList::update`] failures.
    pub fn update_vector(&self, id: Uuid, updated: &Vector) -> Result<bool> {
        let found = self.vectors.update(id, updated)?;
        if found {
            self.mutation_epoch.fetch_add(1, Ordering::Release);
        }
        Ok(found)
    }

    /// True when the index was built before the most recent mutation routed
    /// through the service. A stale index still answers queries; its results
    /// just predate the mutation. Rebuild to refresh (quiesce queries first).
    #[must_use]
    pub fn is_index_stale(&self, algorithm: IndexAlgorithm) -> bool {
        if !self.is_index_built(algorithm) {
            return false;
        }
        let current = self.mutation_epoch.load(Ordering::Acquire);
        self.built_epochs
            .read()
            .get(&algorithm)
            .is_some_and(|built| *built < current)
    }

    /// Builds (or rebuilds) the index for one algorithm. The stateless scan
    /// algorithms are a no-op.
    ///
    /// # Errors
    ///
    /// Propagates index build failures; prior index state stays intact on
    /// failure.
    pub fn build_index(&self, algorithm: IndexAlgorithm) -> Result<()> {
        if algorithm.tag().is_none() {
            return Ok(());
        }

        // The epoch is captured before the build, so mutations racing with
        // it leave the index marked stale.
        let epoch = self.mutation_epoch.load(Ordering::Acquire);
        let mut index = self.make_index(algorithm)?;
        index.build()?;
        info!(algorithm = %algorithm, count = self.vectors.count(), "index built");
        self.indexes.write().insert(algorithm, index);
        self.built_epochs.write().insert(algorithm, epoch);
        Ok(())
    }

    /// Builds every index with state.
    ///
    /// # Errors
    ///
    /// Stops at the first failing build.
    pub fn build_all_indexes(&self) -> Result<()> {
        for algorithm in BUILDABLE {
            self.build_index(algorithm)?;
        }
        Ok(())
    }

    /// Drops all built index state. The vector list is untouched.
    pub fn clear(&self) {
        self.indexes.write().clear();
        self.built_epochs.write().clear();
    }

    /// True when the given algorithm currently holds non-empty state.
    #[must_use]
    pub fn is_index_built(&self, algorithm: IndexAlgorithm) -> bool {
        self.indexes
            .read()
            .get(&algorithm)
            .is_some_and(|i| i.is_built())
    }

    /// k-nearest-neighbor search.
    ///
    /// Dispatches to the selected algorithm, materializes records from the
    /// vector list and applies the threshold policy when `threshold` is
    /// given. Results are ascending by distance.
    ///
    /// # Errors
    ///
    /// `InvalidArgument` for `k == 0`, `Unsupported` for algorithms that
    /// answer range queries only; index errors propagate.
    pub fn search(
        &self,
        query: &Vector,
        k: usize,
        algorithm: IndexAlgorithm,
        threshold: Option<f32>,
    ) -> Result<Vec<SearchHit>> {
        let result = self.knn(query.values(), k, algorithm).map(|ids| {
            let hits = self.materialize(ids);
            match threshold {
                Some(tau) => apply_threshold(hits, query.dimension(), tau),
                None => hits,
            }
        });
        if let Err(e) = &result {
            error!(
                operation = "search",
                query_id = %query.id,
                k,
                algorithm = %algorithm,
                error = %e,
                "search failed"
            );
        }
        result
    }

    /// Range search: every record within `radius` of the query.
    ///
    /// `calc` overrides the service calculator for the exact scan paths.
    ///
    /// # Errors
    ///
    /// `InvalidArgument` for a non-positive radius, `Unsupported` for
    /// algorithms without a range path.
    pub fn range_search(
        &self,
        query: &Vector,
        radius: f32,
        algorithm: IndexAlgorithm,
        calc: Option<DistanceCalculator>,
    ) -> Result<Vec<SearchHit>> {
        let result = self
            .range_ids(query.values(), radius, algorithm, calc)
            .map(|ids| self.materialize(ids));
        if let Err(e) = &result {
            error!(
                operation = "range_search",
                query_id = %query.id,
                radius,
                algorithm = %algorithm,
                error = %e,
                "range search failed"
            );
        }
        result
    }

    /// Serializes every built index as `(algorithm_tag, payload)` entries
    /// behind a version header.
    ///
    /// # Errors
    ///
    /// Returns `Io` on write failure.
    pub fn save(&self, writer: &mut dyn Write) -> Result<()> {
        let indexes = self.indexes.read();
        let mut built: Vec<(u32, &dyn SearchIndex)> = indexes
            .iter()
            .filter(|(_, index)| index.is_built())
            .filter_map(|(algorithm, index)| algorithm.tag().map(|tag| (tag, index.as_ref())))
            .collect();
        built.sort_by_key(|(tag, _)| *tag);

        writer.write_all(&SERVICE_FILE_VERSION.to_le_bytes())?;
        let count = u32::try_from(built.len())
            .map_err(|_| Error::Serialization("too many indexes".into()))?;
        writer.write_all(&count.to_le_bytes())?;
        for (tag, index) in built {
            writer.write_all(&tag.to_le_bytes())?;
            index.save(writer)?;
        }
        Ok(())
    }

    /// Restores indexes from a stream written by [`Self::save`], resolving
    /// ids against the current vector list. Entries whose records are gone
    /// are skipped by the per-index loaders.
    ///
    /// # Errors
    ///
    /// `InvalidFormat` on a version mismatch or unknown algorithm tag.
    pub fn load(&self, reader: &mut dyn Read) -> Result<()> {
        let mut four = [0u8; 4];
        reader.read_exact(&mut four)?;
        let version = u32::from_le_bytes(four);
        if version != SERVICE_FILE_VERSION {
            return Err(Error::InvalidFormat(format!(
                "index stream version {version}, expected {SERVICE_FILE_VERSION}"
            )));
        }

        reader.read_exact(&mut four)?;
        let count = u32::from_le_bytes(four);

        let mut loaded: FxHashMap<IndexAlgorithm, Box<dyn SearchIndex>> = FxHashMap::default();
        for _ in 0..count {
            reader.read_exact(&mut four)?;
            let algorithm = IndexAlgorithm::from_tag(u32::from_le_bytes(four))?;
            let mut index = self.make_index(algorithm)?;
            index.load(reader)?;
            loaded.insert(algorithm, index);
        }

        let epoch = self.mutation_epoch.load(Ordering::Acquire);
        let mut indexes = self.indexes.write();
        let mut epochs = self.built_epochs.write();
        for (algorithm, index) in loaded {
            epochs.insert(algorithm, epoch);
            indexes.insert(algorithm, index);
        }
        Ok(())
    }

    fn make_index(&self, algorithm: IndexAlgorithm) -> Result<Box<dyn SearchIndex>> {
        let vectors = Arc::clone(&self.vectors);
        Ok(match algorithm {
            IndexAlgorithm::KdTree => {
                Box::new(KdTreeIndex::with_calculator(vectors, self.calc))
            }
            IndexAlgorithm::BallTree => {
                Box::new(BallTreeIndex::with_calculator(vectors, self.calc))
            }
            IndexAlgorithm::Hnsw => Box::new(HnswIndex::with_params(vectors, self.hnsw_params)),
            IndexAlgorithm::Lsh => Box::new(LshIndex::with_params(vectors, self.lsh_params)?),
            IndexAlgorithm::BinaryQuantization => Box::new(BinaryQuantizationIndex::new(vectors)),
            IndexAlgorithm::ProductQuantization => Box::new(ProductQuantizationIndex::new(vectors)),
            IndexAlgorithm::Linear | IndexAlgorithm::Range => {
                return Err(Error::Unsupported(format!(
                    "the {algorithm} algorithm has no index state"
                )));
            }
        })
    }

    /// Builds the index on first use; an already-built index is never
    /// silently rebuilt (callers quiesce and rebuild explicitly).
    fn ensure_built(&self, algorithm: IndexAlgorithm) -> Result<()> {
        if self.vectors.is_empty() || self.is_index_built(algorithm) {
            return Ok(());
        }
        self.build_index(algorithm)
    }

    pub(crate) fn knn(
        &self,
        query: &[f32],
        k: usize,
        algorithm: IndexAlgorithm,
    ) -> Result<Vec<(Uuid, f32)>> {
        if k == 0 {
            return Err(Error::InvalidArgument("k must be at least 1".into()));
        }

        match algorithm {
            IndexAlgorithm::Linear => self.linear_knn(query, k),
            IndexAlgorithm::Range => Err(Error::Unsupported(
                "the range algorithm answers range_search, not k-NN".into(),
            )),
            _ => {
                self.ensure_built(algorithm)?;
                let indexes = self.indexes.read();
                match indexes.get(&algorithm) {
                    Some(index) => index.search(query, k),
                    None => Ok(Vec::new()),
                }
            }
        }
    }

    fn range_ids(
        &self,
        query: &[f32],
        radius: f32,
        algorithm: IndexAlgorithm,
        calc: Option<DistanceCalculator>,
    ) -> Result<Vec<(Uuid, f32)>> {
        if radius <= 0.0 || !radius.is_finite() {
            return Err(Error::InvalidArgument(format!(
                "radius must be positive and finite, got {radius}"
            )));
        }

        match algorithm {
            IndexAlgorithm::Linear | IndexAlgorithm::Range => {
                self.linear_range(query, radius, calc.unwrap_or(self.calc))
            }
            IndexAlgorithm::KdTree => {
                self.ensure_built(algorithm)?;
                let indexes = self.indexes.read();
                match indexes.get(&algorithm) {
                    Some(index) => index.range(query, radius),
                    None => Ok(Vec::new()),
                }
            }
            other => Err(Error::Unsupported(format!(
                "range queries are not supported by the {other} index"
            ))),
        }
    }

    /// Exact scan over the list through the batch distance path.
    fn linear_knn(&self, query: &[f32], k: usize) -> Result<Vec<(Uuid, f32)>> {
        let records: Vec<Vector> = self.vectors.iter().collect();
        let targets: Vec<&[f32]> = records.iter().map(Vector::values).collect();
        let distances = self.calc.distances(query, &targets)?;

        let mut heap = KnnHeap::new(k);
        for (record, distance) in records.iter().zip(distances) {
            heap.offer(record.id, distance);
        }
        Ok(heap.into_sorted_vec())
    }

    fn linear_range(
        &self,
        query: &[f32],
        radius: f32,
        calc: DistanceCalculator,
    ) -> Result<Vec<(Uuid, f32)>> {
        let records: Vec<Vector> = self.vectors.iter().collect();
        let targets: Vec<&[f32]> = records.iter().map(Vector::values).collect();
        let distances = calc.distances(query, &targets)?;

        let mut hits: Vec<(Uuid, f32)> = records
            .iter()
            .zip(distances)
            .filter_map(|(record, distance)| (distance <= radius).then_some((record.id, distance)))
            .collect();
        hits.sort_by(|a, b| a.1.total_cmp(&b.1));
        Ok(hits)
    }

    fn materialize(&self, ids: Vec<(Uuid, f32)>) -> Vec<SearchHit> {
        ids.into_iter()
            .filter_map(|(id, distance)| match self.vectors.get_by_id(id) {
                Some(vector) => Some(SearchHit::new(vector, distance)),
                None => {
                    warn!(%id, "search hit no longer resolves in the vector list");
                    None
                }
            })
            .collect()
    }
}

/// Threshold policy for k-NN results.
///
/// High-dimensional queries whose result set already contains far-away
/// matches are returned unfiltered when the threshold is loose; everything
/// else is cut at the threshold.
fn apply_threshold(hits: Vec<SearchHit>, query_dim: usize, tau: f32) -> Vec<SearchHit> {
    if query_dim > 50 && tau > 1.5 && hits.iter().any(|h| h.distance > 5.0) {
        return hits;
    }
    hits.into_iter().filter(|h| h.distance <= tau).collect()
}

#[cfg(test)]
mod service_tests;

#[cfg(test)]
mod threshold_tests {
    use super::*;

    fn hit(distance: f32, dim: usize) -> SearchHit {
        SearchHit::new(Vector::new(vec![0.0; dim]).unwrap(), distance)
    }

    #[test]
    fn test_filters_by_threshold() {
        let hits = vec![hit(0.1, 3), hit(0.5, 3), hit(2.0, 3)];
        let kept = apply_threshold(hits, 3, 0.6);
        assert_eq!(kept.len(), 2);
    }

    #[test]
    fn test_high_dim_loose_threshold_unfiltered() {
        // d > 50, a result beyond 5.0, tau > 1.5: returned unfiltered.
        let hits = vec![hit(0.1, 64), hit(6.0, 64)];
        let kept = apply_threshold(hits, 64, 2.0);
        assert_eq!(kept.len(), 2);
    }

    #[test]
    fn test_high_dim_tight_threshold_still_filters() {
        let hits = vec![hit(0.1, 64), hit(6.0, 64)];
        // tau <= 1.5: the escape hatch does not apply.
        let kept = apply_threshold(hits, 64, 1.0);
        assert_eq!(kept.len(), 1);
    }

    #[test]
    fn test_low_dim_always_filters() {
        let hits = vec![hit(0.1, 3), hit(6.0, 3)];
        let kept = apply_threshold(hits, 3, 2.0);
        assert_eq!(kept.len(), 1);
    }

    #[test]
    fn test_no_far_results_filters() {
        let hits = vec![hit(0.1, 64), hit(1.6, 64)];
        let kept = apply_threshold(hits, 64, 1.6);
        assert_eq!(kept.len(), 2);
    }
}
