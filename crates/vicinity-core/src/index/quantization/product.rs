//! Product quantization: k-means sub-codebooks and lookup-table scoring.
//!
//! Vectors are split into `m` equal sub-vectors; each position gets its own
//! codebook of up to 256 centroids trained by Lloyd's k-means with a fixed
//! seed, and a vector is coded as `m` bytes. A query pre-computes one
//! squared-distance lookup table per position and scores a candidate as
//! `sqrt(sum LUT_i[code_i])`.

use super::super::{validate_query, IndexAlgorithm, KnnHeap, SearchIndex, Xorshift64};
use crate::error::{Error, Result};
use crate::storage::VectorList;

use serde::{Deserialize, Serialize};
use std::io::{Read, Write};
use std::sync::Arc;
use tracing::{debug, warn};
use uuid::Uuid;

const PQ_FILE_VERSION: u32 = 1;
const MAX_CENTROIDS: usize = 256;
const MAX_KMEANS_ITERATIONS: usize = 50;
const KMEANS_SEED: u64 = 42;

/// Picks the sub-quantizer count for dimension `d`: the split with
/// `d/m` in `[4, 16]` when one exists, otherwise the largest divisor that
/// still leaves at least two components per sub-vector.
fn auto_subquantizers(dimension: usize) -> usize {
    for sub in (4..=16).rev() {
        if dimension % sub == 0 {
            return dimension / sub;
        }
    }
    let mut m = 1;
    for candidate in 1..=dimension {
        if dimension % candidate == 0 && dimension / candidate >= 2 {
            m = candidate;
        }
    }
    m
}

#[derive(Serialize, Deserialize)]
struct PqPayload {
    m: usize,
    sub_dim: usize,
    dimension: usize,
    codebooks: Vec<Vec<Vec<f32>>>,
    codes: Vec<(Uuid, Vec<u8>)>,
}

/// Product quantization index.
#[derive(Debug)]
pub struct ProductQuantizationIndex {
    vectors: Arc<VectorList>,
    requested_m: Option<usize>,
    m: usize,
    sub_dim: usize,
    dimension: usize,
    /// `codebooks[position][centroid]`, each centroid of length `sub_dim`.
    codebooks: Vec<Vec<Vec<f32>>>,
    codes: Vec<(Uuid, Vec<u8>)>,
}

impl ProductQuantizationIndex {
    /// Creates an empty index; `m` is chosen automatically at build time.
    #[must_use]
    pub fn new(vectors: Arc<VectorList>) -> Self {
        Self {
            vectors,
            requested_m: None,
            m: 0,
            sub_dim: 0,
            dimension: 0,
            codebooks: Vec::new(),
            codes: Vec::new(),
        }
    }

    /// Creates an empty index with an explicit sub-quantizer count.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` when `m` is zero or does not divide
    /// `dimension`.
    pub fn with_subquantizers(
        vectors: Arc<VectorList>,
        m: usize,
        dimension: usize,
    ) -> Result<Self> {
        if m == 0 || dimension == 0 {
            return Err(Error::InvalidArgument(
                "pq needs at least one sub-quantizer and one dimension".into(),
            ));
        }
        if dimension % m != 0 {
            return Err(Error::InvalidArgument(format!(
                "dimension {dimension} is not divisible into {m} sub-vectors"
            )));
        }
        Ok(Self {
            requested_m: Some(m),
            ..Self::new(vectors)
        })
    }

    /// Sub-quantizer count in effect after the last build.
    #[must_use]
    pub fn subquantizers(&self) -> usize {
        self.m
    }

    fn sub_slice(values: &[f32], position: usize, sub_dim: usize) -> &[f32] {
        &values[position * sub_dim..(position + 1) * sub_dim]
    }

    fn squared_distance(a: &[f32], b: &[f32]) -> f32 {
        a.iter().zip(b.iter()).map(|(x, y)| (x - y).powi(2)).sum()
    }

    /// Lloyd's k-means over one sub-vector position, seeded for
    /// reproducible codebooks. Runs until assignments stabilize or the
    /// iteration cap is hit.
    fn train_codebook(points: &[&[f32]], sub_dim: usize, rng: &mut Xorshift64) -> Vec<Vec<f32>> {
        let k = points.len().min(MAX_CENTROIDS);

        // Seed centroids from k distinct training points.
        let mut picks: Vec<usize> = (0..points.len()).collect();
        for i in 0..k {
            let j = i + rng.next_index(picks.len() - i);
            picks.swap(i, j);
        }
        let mut centroids: Vec<Vec<f32>> =
            picks[..k].iter().map(|&i| points[i].to_vec()).collect();

        let mut assignments = vec![usize::MAX; points.len()];
        for _ in 0..MAX_KMEANS_ITERATIONS {
            let mut changed = false;
            for (p, point) in points.iter().enumerate() {
                let mut best = 0;
                let mut best_dist = f32::INFINITY;
                for (c, centroid) in centroids.iter().enumerate() {
                    let dist = Self::squared_distance(point, centroid);
                    if dist < best_dist {
                        best = c;
                        best_dist = dist;
                    }
                }
                if assignments[p] != best {
                    assignments[p] = best;
                    changed = true;
                }
            }
            if !changed {
                break;
            }

            let mut sums = vec![vec![0.0f32; sub_dim]; k];
            let mut counts = vec![0usize; k];
            for (p, point) in points.iter().enumerate() {
                let c = assignments[p];
                counts[c] += 1;
                for (s, v) in sums[c].iter_mut().zip(point.iter()) {
                    *s += v;
                }
            }
            for c in 0..k {
                if counts[c] == 0 {
                    // Empty cluster keeps its previous centroid.
                    continue;
                }
                #[allow(clippy::cast_precision_loss)]
                let n = counts[c] as f32;
                for (dst, sum) in centroids[c].iter_mut().zip(sums[c].iter()) {
                    *dst = sum / n;
                }
            }
        }

        centroids
    }

    fn encode(&self, values: &[f32]) -> Vec<u8> {
        (0..self.m)
            .map(|position| {
                let sub = Self::sub_slice(values, position, self.sub_dim);
                let mut best = 0usize;
                let mut best_dist = f32::INFINITY;
                for (c, centroid) in self.codebooks[position].iter().enumerate() {
                    let dist = Self::squared_distance(sub, centroid);
                    if dist < best_dist {
                        best = c;
                        best_dist = dist;
                    }
                }
                #[allow(clippy::cast_possible_truncation)]
                let code = best as u8;
                code
            })
            .collect()
    }
}

impl SearchIndex for ProductQuantizationIndex {
    fn algorithm(&self) -> IndexAlgorithm {
        IndexAlgorithm::ProductQuantization
    }

    fn build(&mut self) -> Result<()> {
        self.codebooks.clear();
        self.codes.clear();

        let records: Vec<(Uuid, Vec<f32>)> = self
            .vectors
            .iter()
            .map(|v| (v.id, v.values().to_vec()))
            .collect();
        let Some(first) = records.first() else {
            return Ok(());
        };

        let dimension = first.1.len();
        for (_, values) in &records {
            if values.len() != dimension {
                return Err(Error::DimensionMismatch {
                    expected: dimension,
                    actual: values.len(),
                });
            }
        }

        let m = match self.requested_m {
            Some(m) => {
                if dimension % m != 0 {
                    return Err(Error::InvalidArgument(format!(
                        "dimension {dimension} is not divisible into {m} sub-vectors"
                    )));
                }
                m
            }
            None => auto_subquantizers(dimension),
        };

        self.dimension = dimension;
        self.m = m;
        self.sub_dim = dimension / m;

        let mut rng = Xorshift64::new(KMEANS_SEED);
        for position in 0..m {
            let points: Vec<&[f32]> = records
                .iter()
                .map(|(_, values)| Self::sub_slice(values, position, self.sub_dim))
                .collect();
            self.codebooks
                .push(Self::train_codebook(&points, self.sub_dim, &mut rng));
        }

        self.codes = records
            .iter()
            .map(|(id, values)| (*id, self.encode(values)))
            .collect();

        debug!(
            m = self.m,
            sub_dim = self.sub_dim,
            records = self.codes.len(),
            "pq codebooks trained"
        );
        Ok(())
    }

    fn is_built(&self) -> bool {
        !self.codes.is_empty()
    }

    fn clear(&mut self) {
        self.codebooks.clear();
        self.codes.clear();
        self.m = 0;
        self.sub_dim = 0;
        self.dimension = 0;
    }

    fn search(&self, query: &[f32], k: usize) -> Result<Vec<(Uuid, f32)>> {
        validate_query(query, k)?;
        if self.codes.is_empty() {
            return Ok(Vec::new());
        }
        if query.len() != self.dimension {
            return Err(Error::DimensionMismatch {
                expected: self.dimension,
                actual: query.len(),
            });
        }

        // One lookup table per sub-vector position.
        let luts: Vec<Vec<f32>> = (0..self.m)
            .map(|position| {
                let sub = Self::sub_slice(query, position, self.sub_dim);
                self.codebooks[position]
                    .iter()
                    .map(|centroid| Self::squared_distance(sub, centroid))
                    .collect()
            })
            .collect();

        let mut heap = KnnHeap::new(k);
        for (id, codes) in &self.codes {
            let score: f32 = codes
                .iter()
                .enumerate()
                .map(|(position, &code)| luts[position][code as usize])
                .sum();
            heap.offer(*id, score.sqrt());
        }
        Ok(heap.into_sorted_vec())
    }

    fn save(&self, writer: &mut dyn Write) -> Result<()> {
        writer.write_all(&PQ_FILE_VERSION.to_le_bytes())?;
        let payload = PqPayload {
            m: self.m,
            sub_dim: self.sub_dim,
            dimension: self.dimension,
            codebooks: self.codebooks.clone(),
            codes: self.codes.clone(),
        };
        bincode::serialize_into(writer, &payload)
            .map_err(|e| Error::Serialization(e.to_string()))
    }

    fn load(&mut self, reader: &mut dyn Read) -> Result<()> {
        let mut four = [0u8; 4];
        reader.read_exact(&mut four)?;
        let version = u32::from_le_bytes(four);
        if version != PQ_FILE_VERSION {
            return Err(Error::InvalidFormat(format!(
                "product quantization file version {version}, expected {PQ_FILE_VERSION}"
            )));
        }

        let payload: PqPayload = bincode::deserialize_from(reader)
            .map_err(|e| Error::InvalidFormat(e.to_string()))?;
        if payload.m == 0 || payload.m * payload.sub_dim != payload.dimension {
            return Err(Error::InvalidFormat(
                "pq payload has inconsistent geometry".into(),
            ));
        }

        self.m = payload.m;
        self.sub_dim = payload.sub_dim;
        self.dimension = payload.dimension;
        self.codebooks = payload.codebooks;
        self.codes = payload
            .codes
            .into_iter()
            .filter(|(id, _)| {
                let present = self.vectors.get_by_id(*id).is_some();
                if !present {
                    warn!(%id, "pq entry no longer resolves, skipping");
                }
                present
            })
            .collect();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vector::Vector;

    fn list_with(points: &[Vec<f32>]) -> (Arc<VectorList>, Vec<Vector>) {
        let list = Arc::new(VectorList::new(1024).unwrap());
        let mut stored = Vec::new();
        for p in points {
            let v = Vector::new(p.clone()).unwrap();
            list.add(&v).unwrap();
            stored.push(v);
        }
        (list, stored)
    }

    fn clustered_points(dim: usize) -> Vec<Vec<f32>> {
        use rand::prelude::*;
        let mut rng = StdRng::seed_from_u64(42);
        let mut points = Vec::new();
        for offset in [0.0f32, 20.0] {
            for _ in 0..60 {
                points.push(
                    (0..dim)
                        .map(|_| offset + rng.gen_range(-1.0..1.0))
                        .collect(),
                );
            }
        }
        points
    }

    #[test]
    fn test_auto_subquantizers() {
        assert_eq!(auto_subquantizers(32), 2); // 16 per sub-vector
        assert_eq!(auto_subquantizers(768), 48);
        assert_eq!(auto_subquantizers(8), 1);
        // 6 and 7 both fit a single sub-vector in the [4, 16] window
        assert_eq!(auto_subquantizers(6), 1);
        assert_eq!(auto_subquantizers(7), 1);
    }

    #[test]
    fn test_indivisible_m_rejected() {
        let list = Arc::new(VectorList::new(16).unwrap());
        let err = ProductQuantizationIndex::with_subquantizers(list, 3, 8).unwrap_err();
        assert_eq!(err.code(), "VCN-001");
    }

    #[test]
    fn test_search_separates_clusters() {
        let points = clustered_points(8);
        let (list, stored) = list_with(&points);
        let mut index =
            ProductQuantizationIndex::with_subquantizers(list, 2, 8).unwrap();
        index.build().unwrap();
        assert_eq!(index.subquantizers(), 2);

        let hits = index.search(&[20.0; 8], 5).unwrap();
        assert_eq!(hits.len(), 5);
        for (id, _) in &hits {
            let v = stored.iter().find(|v| v.id == *id).unwrap();
            assert!(v.values()[0] > 10.0, "hit came from the wrong cluster");
        }
    }

    #[test]
    fn test_scores_sorted_ascending() {
        let points = clustered_points(8);
        let (list, _) = list_with(&points);
        let mut index = ProductQuantizationIndex::new(list);
        index.build().unwrap();

        let hits = index.search(&[0.5; 8], 10).unwrap();
        for pair in hits.windows(2) {
            assert!(pair[0].1 <= pair[1].1);
        }
    }

    #[test]
    fn test_deterministic_training() {
        let points = clustered_points(8);
        let (list, _) = list_with(&points);

        let mut a = ProductQuantizationIndex::new(Arc::clone(&list));
        a.build().unwrap();
        let mut b = ProductQuantizationIndex::new(list);
        b.build().unwrap();

        let query = [3.0; 8];
        assert_eq!(a.search(&query, 5).unwrap(), b.search(&query, 5).unwrap());
    }

    #[test]
    fn test_save_load_round_trip() {
        let points = clustered_points(8);
        let (list, _) = list_with(&points);
        let mut index = ProductQuantizationIndex::new(Arc::clone(&list));
        index.build().unwrap();

        let mut buf = Vec::new();
        index.save(&mut buf).unwrap();

        let mut restored = ProductQuantizationIndex::new(list);
        restored.load(&mut std::io::Cursor::new(buf)).unwrap();

        let query = [19.5; 8];
        assert_eq!(
            index.search(&query, 6).unwrap(),
            restored.search(&query, 6).unwrap()
        );
    }

    #[test]
    fn test_load_rejects_wrong_version() {
        let points = clustered_points(8);
        let (list, _) = list_with(&points);
        let mut index = ProductQuantizationIndex::new(Arc::clone(&list));
        index.build().unwrap();

        let mut buf = Vec::new();
        index.save(&mut buf).unwrap();
        buf[0] = 9;

        let mut restored = ProductQuantizationIndex::new(list);
        assert_eq!(
            restored
                .load(&mut std::io::Cursor::new(buf))
                .unwrap_err()
                .code(),
            "VCN-003"
        );
    }

    #[test]
    fn test_range_unsupported() {
        let points = clustered_points(8);
        let (list, _) = list_with(&points);
        let mut index = ProductQuantizationIndex::new(list);
        index.build().unwrap();
        assert_eq!(index.range(&[0.0; 8], 1.0).unwrap_err().code(), "VCN-004");
    }
}
