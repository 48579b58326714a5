//! LSH index: random-projection hash tables with exact reranking.
//!
//! Each of the `L` tables hashes a vector to `k` bits, one per unit-length
//! standard-normal projection: bit `j` is the sign of the dot product with
//! projection `j`. Similar vectors (small cosine distance) collide in at
//! least one table with probability increasing in `L`. A query unions the
//! matching buckets of every table and reranks the candidates by exact
//! cosine distance.

use super::{validate_query, IndexAlgorithm, SearchIndex, Xorshift64};
use crate::distance::DistanceCalculator;
use crate::error::{Error, Result};
use crate::storage::VectorList;

use rustc_hash::{FxHashMap, FxHashSet};
use std::io::{Read, Write};
use std::sync::Arc;
use tracing::warn;
use uuid::Uuid;

const LSH_FILE_VERSION: u32 = 1;

/// Upper bound on hash bits so codes fit a u32.
const MAX_HASH_BITS: usize = 30;

/// LSH parameters: table count, bits per table, RNG seed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LshParams {
    /// Number of hash tables (L).
    pub tables: usize,
    /// Bits per table (k), at most 30.
    pub hash_bits: usize,
    /// Seed for the projection generator.
    pub seed: u64,
}

impl Default for LshParams {
    fn default() -> Self {
        Self {
            tables: 10,
            hash_bits: 8,
            seed: 42,
        }
    }
}

impl LshParams {
    fn validate(self) -> Result<()> {
        if self.tables == 0 {
            return Err(Error::InvalidArgument(
                "lsh needs at least one hash table".into(),
            ));
        }
        if self.hash_bits == 0 || self.hash_bits > MAX_HASH_BITS {
            return Err(Error::InvalidArgument(format!(
                "lsh hash bits must be in 1..={MAX_HASH_BITS}"
            )));
        }
        Ok(())
    }
}

/// Random-projection LSH index over the vector list.
pub struct LshIndex {
    vectors: Arc<VectorList>,
    params: LshParams,
    /// `projections[table][bit]` is a unit-length vector of the indexed
    /// dimensionality.
    projections: Vec<Vec<Vec<f32>>>,
    /// `tables[table][hash] -> ids` bucket maps.
    tables: Vec<FxHashMap<u32, Vec<Uuid>>>,
    dimension: usize,
}

impl LshIndex {
    /// Creates an empty index with default parameters.
    #[must_use]
    pub fn new(vectors: Arc<VectorList>) -> Self {
        Self {
            vectors,
            params: LshParams::default(),
            projections: Vec::new(),
            tables: Vec::new(),
            dimension: 0,
        }
    }

    /// Creates an empty index with the given parameters.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` for a zero table count or out-of-range
    /// hash bits.
    pub fn with_params(vectors: Arc<VectorList>, params: LshParams) -> Result<Self> {
        params.validate()?;
        Ok(Self {
            vectors,
            params,
            projections: Vec::new(),
            tables: Vec::new(),
            dimension: 0,
        })
    }

    /// The configured parameters.
    #[must_use]
    pub fn params(&self) -> LshParams {
        self.params
    }

    /// Projections are derived deterministically from the seed, so save
    /// files only need to carry the seed.
    fn generate_projections(params: LshParams, dimension: usize) -> Vec<Vec<Vec<f32>>> {
        let mut rng = Xorshift64::new(params.seed);
        (0..params.tables)
            .map(|_| {
                (0..params.hash_bits)
                    .map(|_| {
                        let mut projection: Vec<f32> =
                            (0..dimension).map(|_| rng.next_gaussian()).collect();
                        let norm = projection.iter().map(|x| x * x).sum::<f32>().sqrt();
                        if norm > 0.0 {
                            for x in &mut projection {
                                *x /= norm;
                            }
                        }
                        projection
                    })
                    .collect()
            })
            .collect()
    }

    fn hash(&self, table: usize, values: &[f32]) -> u32 {
        let mut code = 0u32;
        for (bit, projection) in self.projections[table].iter().enumerate() {
            let dot: f32 = values
                .iter()
                .zip(projection.iter())
                .map(|(v, p)| v * p)
                .sum();
            if dot >= 0.0 {
                code |= 1 << bit;
            }
        }
        code
    }

    fn check_dimension(&self, query: &[f32]) -> Result<()> {
        if self.dimension != 0 && query.len() != self.dimension {
            return Err(Error::DimensionMismatch {
                expected: self.dimension,
                actual: query.len(),
            });
        }
        Ok(())
    }

    fn insert_into_tables(&mut self, id: Uuid, values: &[f32]) {
        for table in 0..self.params.tables {
            let code = self.hash(table, values);
            self.tables[table].entry(code).or_default().push(id);
        }
    }
}

impl SearchIndex for LshIndex {
    fn algorithm(&self) -> IndexAlgorithm {
        IndexAlgorithm::Lsh
    }

    fn build(&mut self) -> Result<()> {
        self.clear();

        let records: Vec<(Uuid, Vec<f32>)> = self
            .vectors
            .iter()
            .map(|v| (v.id, v.values().to_vec()))
            .collect();
        let Some(first) = records.first() else {
            return Ok(());
        };

        self.dimension = first.1.len();
        self.projections = Self::generate_projections(self.params, self.dimension);
        self.tables = vec![FxHashMap::default(); self.params.tables];

        for (id, values) in &records {
            if values.len() != self.dimension {
                return Err(Error::DimensionMismatch {
                    expected: self.dimension,
                    actual: values.len(),
                });
            }
            self.insert_into_tables(*id, values);
        }
        Ok(())
    }

    fn is_built(&self) -> bool {
        self.tables.iter().any(|t| !t.is_empty())
    }

    fn clear(&mut self) {
        self.projections.clear();
        self.tables.clear();
        self.dimension = 0;
    }

    fn search(&self, query: &[f32], k: usize) -> Result<Vec<(Uuid, f32)>> {
        validate_query(query, k)?;
        self.check_dimension(query)?;

        if !self.is_built() {
            return Ok(Vec::new());
        }

        let mut candidates: FxHashSet<Uuid> = FxHashSet::default();
        for table in 0..self.params.tables {
            let code = self.hash(table, query);
            if let Some(bucket) = self.tables[table].get(&code) {
                candidates.extend(bucket.iter().copied());
            }
        }
        if candidates.is_empty() {
            return Ok(Vec::new());
        }

        // Rerank the union by exact cosine distance.
        let mut reranked: Vec<(Uuid, f32)> = candidates
            .into_iter()
            .filter_map(|id| {
                let Some(vector) = self.vectors.get_by_id(id) else {
                    warn!(%id, "lsh bucket entry no longer resolves");
                    return None;
                };
                Some((
                    id,
                    DistanceCalculator::Cosine.distance_unchecked(query, vector.values()),
                ))
            })
            .collect();
        reranked.sort_by(|a, b| a.1.total_cmp(&b.1));
        reranked.truncate(k);
        Ok(reranked)
    }

    fn save(&self, writer: &mut dyn Write) -> Result<()> {
        writer.write_all(&LSH_FILE_VERSION.to_le_bytes())?;
        writer.write_all(&(self.params.tables as u32).to_le_bytes())?;
        writer.write_all(&(self.params.hash_bits as u32).to_le_bytes())?;
        writer.write_all(&self.params.seed.to_le_bytes())?;
        writer.write_all(&(self.dimension as u32).to_le_bytes())?;

        for table in &self.tables {
            let buckets = u32::try_from(table.len())
                .map_err(|_| Error::Serialization("lsh table too large".into()))?;
            writer.write_all(&buckets.to_le_bytes())?;

            // Deterministic output: buckets sorted by hash code.
            let mut codes: Vec<u32> = table.keys().copied().collect();
            codes.sort_unstable();
            for code in codes {
                let ids = &table[&code];
                writer.write_all(&code.to_le_bytes())?;
                let count = u32::try_from(ids.len())
                    .map_err(|_| Error::Serialization("lsh bucket too large".into()))?;
                writer.write_all(&count.to_le_bytes())?;
                for id in ids {
                    writer.write_all(id.as_bytes())?;
                }
            }
        }
        Ok(())
    }

    fn load(&mut self, reader: &mut dyn Read) -> Result<()> {
        let mut four = [0u8; 4];
        let mut eight = [0u8; 8];

        reader.read_exact(&mut four)?;
        let version = u32::from_le_bytes(four);
        if version != LSH_FILE_VERSION {
            return Err(Error::InvalidFormat(format!(
                "lsh file version {version}, expected {LSH_FILE_VERSION}"
            )));
        }

        reader.read_exact(&mut four)?;
        let tables = u32::from_le_bytes(four) as usize;
        reader.read_exact(&mut four)?;
        let hash_bits = u32::from_le_bytes(four) as usize;
        reader.read_exact(&mut eight)?;
        let seed = u64::from_le_bytes(eight);
        reader.read_exact(&mut four)?;
        let dimension = u32::from_le_bytes(four) as usize;

        let params = LshParams {
            tables,
            hash_bits,
            seed,
        };
        params
            .validate()
            .map_err(|e| Error::InvalidFormat(format!("lsh header invalid: {e}")))?;

        let mut loaded_tables = Vec::with_capacity(tables);
        let mut id_bytes = [0u8; 16];
        for _ in 0..tables {
            reader.read_exact(&mut four)?;
            let buckets = u32::from_le_bytes(four) as usize;
            let mut table = FxHashMap::default();
            for _ in 0..buckets {
                reader.read_exact(&mut four)?;
                let code = u32::from_le_bytes(four);
                reader.read_exact(&mut four)?;
                let count = u32::from_le_bytes(four) as usize;
                let mut ids = Vec::with_capacity(count);
                for _ in 0..count {
                    reader.read_exact(&mut id_bytes)?;
                    let id = Uuid::from_bytes(id_bytes);
                    if self.vectors.get_by_id(id).is_some() {
                        ids.push(id);
                    } else {
                        warn!(%id, "lsh entry no longer resolves, skipping");
                    }
                }
                if !ids.is_empty() {
                    table.insert(code, ids);
                }
            }
            loaded_tables.push(table);
        }

        self.params = params;
        self.dimension = dimension;
        self.projections = Self::generate_projections(params, dimension);
        self.tables = loaded_tables;
        Ok(())
    }
}
