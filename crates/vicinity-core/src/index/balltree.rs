//! Ball tree index: hierarchical bounding balls over the vector list.
//!
//! Every branch stores the mean of its subset as centroid and the maximum
//! distance from that centroid as radius, so a ball always covers all of
//! its descendants. The build splits the ordered subset in two equal halves
//! without re-ordering, which yields balanced depth at the cost of looser
//! balls than a principal-axis split would give.

use super::{validate_query, IndexAlgorithm, KnnHeap, SearchIndex};
use crate::distance::DistanceCalculator;
use crate::error::{Error, Result};
use crate::storage::VectorList;

use std::io::{Read, Write};
use std::sync::Arc;
use tracing::warn;
use uuid::Uuid;

const BALLTREE_FILE_VERSION: u32 = 1;

enum BallNode {
    Leaf {
        id: Uuid,
        point: Vec<f32>,
    },
    Branch {
        centroid: Vec<f32>,
        radius: f32,
        left: Box<BallNode>,
        right: Box<BallNode>,
    },
}

/// Hierarchical bounding-ball tree with k-NN queries.
pub struct BallTreeIndex {
    vectors: Arc<VectorList>,
    calc: DistanceCalculator,
    root: Option<Box<BallNode>>,
    /// Leaf ids in build order, kept for serialization.
    order: Vec<Uuid>,
    dimension: usize,
}

impl BallTreeIndex {
    /// Creates an empty index over the given vector list.
    #[must_use]
    pub fn new(vectors: Arc<VectorList>) -> Self {
        Self::with_calculator(vectors, DistanceCalculator::default())
    }

    /// Creates an empty index using a specific distance calculator.
    #[must_use]
    pub fn with_calculator(vectors: Arc<VectorList>, calc: DistanceCalculator) -> Self {
        Self {
            vectors,
            calc,
            root: None,
            order: Vec::new(),
            dimension: 0,
        }
    }

    /// Number of indexed vectors.
    #[must_use]
    pub fn len(&self) -> usize {
        self.order.len()
    }

    /// True when no vectors are indexed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    fn build_from(&mut self, items: Vec<(Uuid, Vec<f32>)>) -> Result<()> {
        self.root = None;
        self.order.clear();
        self.dimension = 0;

        let Some(first) = items.first() else {
            return Ok(());
        };
        let dimension = first.1.len();
        for (_, point) in &items {
            if point.len() != dimension {
                return Err(Error::DimensionMismatch {
                    expected: dimension,
                    actual: point.len(),
                });
            }
        }

        self.dimension = dimension;
        self.order = items.iter().map(|(id, _)| *id).collect();
        self.root = Some(self.build_recursive(items));
        Ok(())
    }

    fn build_recursive(&self, mut items: Vec<(Uuid, Vec<f32>)>) -> Box<BallNode> {
        if items.len() == 1 {
            let (id, point) = items.pop().expect("single leaf item");
            return Box::new(BallNode::Leaf { id, point });
        }

        let mut centroid = vec![0.0f32; self.dimension];
        for (_, point) in &items {
            for (c, v) in centroid.iter_mut().zip(point.iter()) {
                *c += v;
            }
        }
        #[allow(clippy::cast_precision_loss)]
        let n = items.len() as f32;
        for c in &mut centroid {
            *c /= n;
        }

        let radius = items
            .iter()
            .map(|(_, point)| self.calc.distance_unchecked(&centroid, point))
            .fold(0.0f32, f32::max);

        let right_items = items.split_off(items.len() / 2);
        Box::new(BallNode::Branch {
            centroid,
            radius,
            left: self.build_recursive(items),
            right: self.build_recursive(right_items),
        })
    }

    fn knn_recursive(&self, node: &BallNode, query: &[f32], heap: &mut KnnHeap<Uuid>) {
        match node {
            BallNode::Leaf { id, point } => {
                heap.offer(*id, self.calc.distance_unchecked(query, point));
            }
            BallNode::Branch {
                centroid,
                radius,
                left,
                right,
            } => {
                // worst() is +inf until the heap fills, so nothing is pruned
                // before k candidates have been seen.
                if self.calc.distance_unchecked(query, centroid) > radius + heap.worst() {
                    return;
                }

                // Visit the child whose ball center is closer first, so the
                // heap tightens before the far side is considered.
                let left_key = self.child_key(left, query);
                let right_key = self.child_key(right, query);
                if left_key <= right_key {
                    self.knn_recursive(left, query, heap);
                    self.knn_recursive(right, query, heap);
                } else {
                    self.knn_recursive(right, query, heap);
                    self.knn_recursive(left, query, heap);
                }
            }
        }
    }

    fn child_key(&self, node: &BallNode, query: &[f32]) -> f32 {
        match node {
            BallNode::Leaf { point, .. } => self.calc.distance_unchecked(query, point),
            BallNode::Branch { centroid, .. } => self.calc.distance_unchecked(query, centroid),
        }
    }

    fn check_dimension(&self, query: &[f32]) -> Result<()> {
        if self.root.is_some() && query.len() != self.dimension {
            return Err(Error::DimensionMismatch {
                expected: self.dimension,
                actual: query.len(),
            });
        }
        Ok(())
    }
}

impl SearchIndex for BallTreeIndex {
    fn algorithm(&self) -> IndexAlgorithm {
        IndexAlgorithm::BallTree
    }

    fn build(&mut self) -> Result<()> {
        let items: Vec<(Uuid, Vec<f32>)> = self
            .vectors
            .iter()
            .map(|v| (v.id, v.values().to_vec()))
            .collect();
        self.build_from(items)
    }

    fn is_built(&self) -> bool {
        self.root.is_some()
    }

    fn clear(&mut self) {
        self.root = None;
        self.order.clear();
        self.dimension = 0;
    }

    fn search(&self, query: &[f32], k: usize) -> Result<Vec<(Uuid, f32)>> {
        validate_query(query, k)?;
        self.check_dimension(query)?;

        let Some(root) = &self.root else {
            return Ok(Vec::new());
        };

        let mut heap = KnnHeap::new(k);
        self.knn_recursive(root, query, &mut heap);
        Ok(heap.into_sorted_vec())
    }

    fn save(&self, writer: &mut dyn Write) -> Result<()> {
        writer.write_all(&BALLTREE_FILE_VERSION.to_le_bytes())?;
        let count = u32::try_from(self.order.len())
            .map_err(|_| Error::Serialization("ball tree too large for u32 count".into()))?;
        writer.write_all(&count.to_le_bytes())?;
        for id in &self.order {
            writer.write_all(id.as_bytes())?;
        }
        Ok(())
    }

    fn load(&mut self, reader: &mut dyn Read) -> Result<()> {
        let mut four = [0u8; 4];
        reader.read_exact(&mut four)?;
        let version = u32::from_le_bytes(four);
        if version != BALLTREE_FILE_VERSION {
            return Err(Error::InvalidFormat(format!(
                "ball tree file version {version}, expected {BALLTREE_FILE_VERSION}"
            )));
        }

        reader.read_exact(&mut four)?;
        let count = u32::from_le_bytes(four) as usize;

        let mut items = Vec::with_capacity(count);
        let mut id_bytes = [0u8; 16];
        for _ in 0..count {
            reader.read_exact(&mut id_bytes)?;
            let id = Uuid::from_bytes(id_bytes);
            match self.vectors.get_by_id(id) {
                Some(vector) => items.push((id, vector.values().to_vec())),
                None => warn!(%id, "ball tree entry no longer resolves, skipping"),
            }
        }

        self.build_from(items)
    }
}
