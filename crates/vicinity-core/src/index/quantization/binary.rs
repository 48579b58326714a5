//! Binary quantization: one bit per component, Hamming pre-filter, exact
//! rerank.
//!
//! Every component contributes one bit (`value >= threshold`). The search
//! pipeline gathers candidates within a Hamming budget of the query's bit
//! vector (falling back to the 3k Hamming-closest when the budget yields
//! nothing) and reranks them by exact distance.

use super::super::{validate_query, IndexAlgorithm, KnnHeap, SearchIndex};
use crate::distance::DistanceCalculator;
use crate::error::{Error, Result};
use crate::storage::VectorList;

use serde::{Deserialize, Serialize};
use std::io::{Read, Write};
use std::sync::Arc;
use tracing::warn;
use uuid::Uuid;

const BQ_FILE_VERSION: u32 = 1;

/// Quantizes `values` into a packed bit vector: bit i set when
/// `values[i] >= threshold`.
#[must_use]
pub fn quantize(values: &[f32], threshold: f32) -> Vec<u64> {
    let mut bits = vec![0u64; values.len().div_ceil(64)];
    for (i, value) in values.iter().enumerate() {
        if *value >= threshold {
            bits[i / 64] |= 1 << (i % 64);
        }
    }
    bits
}

/// Hamming distance between two packed bit vectors: popcount of the XOR.
#[must_use]
pub fn hamming_distance(a: &[u64], b: &[u64]) -> u32 {
    a.iter()
        .zip(b.iter())
        .map(|(x, y)| (x ^ y).count_ones())
        .sum()
}

#[derive(Serialize, Deserialize)]
struct BqPayload {
    threshold: f32,
    dimension: usize,
    codes: Vec<(Uuid, Vec<u64>)>,
}

/// Sign/threshold binary quantization index.
pub struct BinaryQuantizationIndex {
    vectors: Arc<VectorList>,
    calc: DistanceCalculator,
    /// Caller-supplied threshold; when absent the build uses the mean of
    /// all components of all vectors.
    threshold_override: Option<f32>,
    threshold: f32,
    codes: Vec<(Uuid, Vec<u64>)>,
    dimension: usize,
}

impl BinaryQuantizationIndex {
    /// Creates an empty index; the threshold is derived at build time.
    #[must_use]
    pub fn new(vectors: Arc<VectorList>) -> Self {
        Self {
            vectors,
            calc: DistanceCalculator::default(),
            threshold_override: None,
            threshold: 0.0,
            codes: Vec::new(),
            dimension: 0,
        }
    }

    /// Creates an empty index with a fixed quantization threshold.
    #[must_use]
    pub fn with_threshold(vectors: Arc<VectorList>, threshold: f32) -> Self {
        Self {
            threshold_override: Some(threshold),
            ..Self::new(vectors)
        }
    }

    /// The threshold in effect after the last build.
    #[must_use]
    pub fn threshold(&self) -> f32 {
        self.threshold
    }

    fn hamming_budget(&self) -> u32 {
        #[allow(clippy::cast_possible_truncation)]
        let budget = (self.dimension / 4).min(64) as u32;
        budget
    }
}

impl SearchIndex for BinaryQuantizationIndex {
    fn algorithm(&self) -> IndexAlgorithm {
        IndexAlgorithm::BinaryQuantization
    }

    fn build(&mut self) -> Result<()> {
        self.codes.clear();
        self.dimension = 0;

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

        self.threshold = match self.threshold_override {
            Some(t) => t,
            None => {
                let total: f64 = records
                    .iter()
                    .flat_map(|(_, values)| values.iter())
                    .map(|v| f64::from(*v))
                    .sum();
                #[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation)]
                let mean = (total / (records.len() * dimension) as f64) as f32;
                mean
            }
        };

        self.dimension = dimension;
        self.codes = records
            .iter()
            .map(|(id, values)| (*id, quantize(values, self.threshold)))
            .collect();
        Ok(())
    }

    fn is_built(&self) -> bool {
        !self.codes.is_empty()
    }

    fn clear(&mut self) {
        self.codes.clear();
        self.dimension = 0;
        self.threshold = 0.0;
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

        let query_bits = quantize(query, self.threshold);
        let budget = self.hamming_budget();

        let mut candidates: Vec<(Uuid, u32)> = self
            .codes
            .iter()
            .filter_map(|(id, code)| {
                let h = hamming_distance(&query_bits, code);
                (h <= budget).then_some((*id, h))
            })
            .collect();

        if candidates.is_empty() {
            // Nothing inside the budget: fall back to the 3k Hamming-closest.
            let mut all: Vec<(Uuid, u32)> = self
                .codes
                .iter()
                .map(|(id, code)| (*id, hamming_distance(&query_bits, code)))
                .collect();
            all.sort_by_key(|&(_, h)| h);
            all.truncate(3 * k);
            candidates = all;
        }

        // Rerank candidates by exact distance on the original vectors.
        let mut heap = KnnHeap::new(k);
        for (id, _) in candidates {
            let Some(vector) = self.vectors.get_by_id(id) else {
                warn!(%id, "bq candidate no longer resolves");
                continue;
            };
            heap.offer(id, self.calc.distance_unchecked(query, vector.values()));
        }
        Ok(heap.into_sorted_vec())
    }

    fn save(&self, writer: &mut dyn Write) -> Result<()> {
        writer.write_all(&BQ_FILE_VERSION.to_le_bytes())?;
        let payload = BqPayload {
            threshold: self.threshold,
            dimension: self.dimension,
            codes: self.codes.clone(),
        };
        bincode::serialize_into(writer, &payload)
            .map_err(|e| Error::Serialization(e.to_string()))
    }

    fn load(&mut self, reader: &mut dyn Read) -> Result<()> {
        let mut four = [0u8; 4];
        reader.read_exact(&mut four)?;
        let version = u32::from_le_bytes(four);
        if version != BQ_FILE_VERSION {
            return Err(Error::InvalidFormat(format!(
                "binary quantization file version {version}, expected {BQ_FILE_VERSION}"
            )));
        }

        let payload: BqPayload = bincode::deserialize_from(reader)
            .map_err(|e| Error::InvalidFormat(e.to_string()))?;

        self.threshold = payload.threshold;
        self.dimension = payload.dimension;
        self.codes = payload
            .codes
            .into_iter()
            .filter(|(id, _)| {
                let present = self.vectors.get_by_id(*id).is_some();
                if !present {
                    warn!(%id, "bq entry no longer resolves, skipping");
                }
                present
            })
            .collect();
        Ok(())
    }
}
