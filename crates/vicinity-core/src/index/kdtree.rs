//! KD-tree index: median-split binary tree over the vector list.
//!
//! Build sorts the subset on the split axis (`depth % d`, stable sort so
//! equal values keep their input order) and pivots on the median; the left
//! subtree holds everything before the median in that order, the right
//! everything after. Queries recurse into the near child first and only
//! visit the far child while the axis gap can still beat the current worst
//! retained distance.

use super::{validate_query, IndexAlgorithm, KnnHeap, SearchIndex};
use crate::distance::DistanceCalculator;
use crate::error::{Error, Result};
use crate::storage::VectorList;

use std::io::{Read, Write};
use std::sync::Arc;
use tracing::warn;
use uuid::Uuid;

const KDTREE_FILE_VERSION: u32 = 1;

struct KdNode {
    id: Uuid,
    point: Vec<f32>,
    left: Option<Box<KdNode>>,
    right: Option<Box<KdNode>>,
}

/// Median-split KD-tree with k-NN and range queries.
pub struct KdTreeIndex {
    vectors: Arc<VectorList>,
    calc: DistanceCalculator,
    root: Option<Box<KdNode>>,
    dimension: usize,
}

impl KdTreeIndex {
    /// Creates an empty index over the given vector list.
    #[must_use]
    pub fn new(vectors: Arc<VectorList>) -> Self {
        Self::with_calculator(vectors, DistanceCalculator::default())
    }

    /// Creates an empty index using a specific distance calculator.
    ///
    /// Axis pruning assumes the per-axis difference lower-bounds the full
    /// distance, which holds for the Minkowski family (Euclidean,
    /// Manhattan, Chebyshev, Minkowski).
    #[must_use]
    pub fn with_calculator(vectors: Arc<VectorList>, calc: DistanceCalculator) -> Self {
        Self {
            vectors,
            calc,
            root: None,
            dimension: 0,
        }
    }

    fn build_from(&mut self, items: Vec<(Uuid, Vec<f32>)>) -> Result<()> {
        self.root = None;
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
        self.root = Self::build_recursive(items, 0, dimension);
        Ok(())
    }

    fn build_recursive(
        mut items: Vec<(Uuid, Vec<f32>)>,
        depth: usize,
        dimension: usize,
    ) -> Option<Box<KdNode>> {
        if items.is_empty() {
            return None;
        }

        let axis = depth % dimension;
        // Stable sort: equal axis values keep their input order, which makes
        // the median split deterministic.
        items.sort_by(|a, b| a.1[axis].total_cmp(&b.1[axis]));

        let mid = items.len() / 2;
        let right_items = items.split_off(mid + 1);
        let (id, point) = items.pop().expect("median element");

        Some(Box::new(KdNode {
            id,
            point,
            left: Self::build_recursive(items, depth + 1, dimension),
            right: Self::build_recursive(right_items, depth + 1, dimension),
        }))
    }

    fn knn_recursive(&self, node: &KdNode, query: &[f32], depth: usize, heap: &mut KnnHeap<Uuid>) {
        let axis = depth % self.dimension;
        let axis_gap = query[axis] - node.point[axis];

        let (near, far) = if axis_gap < 0.0 {
            (&node.left, &node.right)
        } else {
            (&node.right, &node.left)
        };

        if let Some(child) = near {
            self.knn_recursive(child, query, depth + 1, heap);
        }

        heap.offer(node.id, self.calc.distance_unchecked(query, &node.point));

        // worst() is +inf while the heap is not yet full, so this also
        // covers the "heap not full" case.
        if axis_gap.abs() < heap.worst() {
            if let Some(child) = far {
                self.knn_recursive(child, query, depth + 1, heap);
            }
        }
    }

    fn range_recursive(
        &self,
        node: &KdNode,
        query: &[f32],
        depth: usize,
        radius: f32,
        out: &mut Vec<(Uuid, f32)>,
    ) {
        let axis = depth % self.dimension;
        let axis_gap = query[axis] - node.point[axis];

        let (near, far) = if axis_gap < 0.0 {
            (&node.left, &node.right)
        } else {
            (&node.right, &node.left)
        };

        if let Some(child) = near {
            self.range_recursive(child, query, depth + 1, radius, out);
        }

        let dist = self.calc.distance_unchecked(query, &node.point);
        if dist <= radius {
            out.push((node.id, dist));
        }

        if axis_gap.abs() <= radius {
            if let Some(child) = far {
                self.range_recursive(child, query, depth + 1, radius, out);
            }
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

    fn write_preorder(node: &KdNode, writer: &mut dyn Write) -> Result<()> {
        writer.write_all(node.id.as_bytes())?;
        if let Some(left) = &node.left {
            Self::write_preorder(left, writer)?;
        }
        if let Some(right) = &node.right {
            Self::write_preorder(right, writer)?;
        }
        Ok(())
    }

    fn insert_loaded(
        root: &mut Option<Box<KdNode>>,
        id: Uuid,
        point: Vec<f32>,
        depth: usize,
        dimension: usize,
    ) {
        match root {
            None => {
                *root = Some(Box::new(KdNode {
                    id,
                    point,
                    left: None,
                    right: None,
                }));
            }
            Some(node) => {
                let axis = depth % dimension;
                let child = if point[axis] < node.point[axis] {
                    &mut node.left
                } else {
                    &mut node.right
                };
                Self::insert_loaded(child, id, point, depth + 1, dimension);
            }
        }
    }

    fn count(node: Option<&KdNode>) -> usize {
        node.map_or(0, |n| {
            1 + Self::count(n.left.as_deref()) + Self::count(n.right.as_deref())
        })
    }

    /// Number of indexed vectors.
    #[must_use]
    pub fn len(&self) -> usize {
        Self::count(self.root.as_deref())
    }

    /// True when no vectors are indexed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.root.is_none()
    }
}

impl SearchIndex for KdTreeIndex {
    fn algorithm(&self) -> IndexAlgorithm {
        IndexAlgorithm::KdTree
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
        self.dimension = 0;
    }

    fn search(&self, query: &[f32], k: usize) -> Result<Vec<(Uuid, f32)>> {
        validate_query(query, k)?;
        self.check_dimension(query)?;

        let Some(root) = &self.root else {
            return Ok(Vec::new());
        };

        let mut heap = KnnHeap::new(k);
        self.knn_recursive(root, query, 0, &mut heap);
        Ok(heap.into_sorted_vec())
    }

    fn range(&self, query: &[f32], radius: f32) -> Result<Vec<(Uuid, f32)>> {
        if query.is_empty() {
            return Err(Error::InvalidArgument("query vector is empty".into()));
        }
        if radius <= 0.0 || !radius.is_finite() {
            return Err(Error::InvalidArgument(format!(
                "radius must be positive and finite, got {radius}"
            )));
        }
        self.check_dimension(query)?;

        let Some(root) = &self.root else {
            return Ok(Vec::new());
        };

        let mut out = Vec::new();
        self.range_recursive(root, query, 0, radius, &mut out);
        out.sort_by(|a, b| a.1.total_cmp(&b.1));
        Ok(out)
    }

    fn save(&self, writer: &mut dyn Write) -> Result<()> {
        writer.write_all(&KDTREE_FILE_VERSION.to_le_bytes())?;
        let count = u32::try_from(self.len())
            .map_err(|_| Error::Serialization("kd-tree too large for u32 count".into()))?;
        writer.write_all(&count.to_le_bytes())?;
        if let Some(root) = &self.root {
            Self::write_preorder(root, writer)?;
        }
        Ok(())
    }

    fn load(&mut self, reader: &mut dyn Read) -> Result<()> {
        let mut four = [0u8; 4];
        reader.read_exact(&mut four)?;
        let version = u32::from_le_bytes(four);
        if version != KDTREE_FILE_VERSION {
            return Err(Error::InvalidFormat(format!(
                "kd-tree file version {version}, expected {KDTREE_FILE_VERSION}"
            )));
        }

        reader.read_exact(&mut four)?;
        let count = u32::from_le_bytes(four) as usize;

        self.clear();
        let mut id_bytes = [0u8; 16];
        for _ in 0..count {
            reader.read_exact(&mut id_bytes)?;
            let id = Uuid::from_bytes(id_bytes);
            let Some(vector) = self.vectors.get_by_id(id) else {
                warn!(%id, "kd-tree entry no longer resolves, skipping");
                continue;
            };
            let point = vector.values().to_vec();
            if self.dimension == 0 {
                self.dimension = point.len();
            } else if point.len() != self.dimension {
                warn!(%id, "kd-tree entry has mismatched dimension, skipping");
                continue;
            }
            Self::insert_loaded(&mut self.root, id, point, 0, self.dimension);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vector::Vector;

    fn list_with(points: &[Vec<f32>]) -> (Arc<VectorList>, Vec<Vector>) {
        let list = Arc::new(VectorList::new(2048).unwrap());
        let mut stored = Vec::new();
        for p in points {
            let v = Vector::new(p.clone()).unwrap();
            list.add(&v).unwrap();
            stored.push(v);
        }
        (list, stored)
    }

    fn linear_range(
        stored: &[Vector],
        query: &[f32],
        radius: f32,
        calc: DistanceCalculator,
    ) -> Vec<Uuid> {
        let mut hits: Vec<(Uuid, f32)> = stored
            .iter()
            .filter_map(|v| {
                let d = calc.distance(query, v.values()).unwrap();
                (d <= radius).then_some((v.id, d))
            })
            .collect();
        hits.sort_by(|a, b| a.1.total_cmp(&b.1));
        hits.into_iter().map(|(id, _)| id).collect()
    }

    #[test]
    fn test_nearest_neighbor() {
        let (list, stored) = list_with(&[
            vec![1.0, 2.0, 3.0],
            vec![4.0, 5.0, 6.0],
            vec![7.0, 8.0, 9.0],
        ]);
        let mut index = KdTreeIndex::new(list);
        index.build().unwrap();

        let hits = index.search(&[2.0, 3.0, 4.0], 1).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].0, stored[0].id);
    }

    #[test]
    fn test_k_larger_than_count() {
        let (list, _) = list_with(&[vec![0.0, 0.0], vec![1.0, 1.0]]);
        let mut index = KdTreeIndex::new(list);
        index.build().unwrap();

        let hits = index.search(&[0.0, 0.0], 10).unwrap();
        assert_eq!(hits.len(), 2);
    }

    #[test]
    fn test_results_sorted_ascending() {
        let points: Vec<Vec<f32>> = (0..50).map(|i| vec![i as f32, (i % 7) as f32]).collect();
        let (list, _) = list_with(&points);
        let mut index = KdTreeIndex::new(list);
        index.build().unwrap();

        let hits = index.search(&[10.0, 3.0], 8).unwrap();
        for pair in hits.windows(2) {
            assert!(pair[0].1 <= pair[1].1);
        }
    }

    #[test]
    fn test_range_matches_linear_scan() {
        use rand::prelude::*;

        let mut rng = StdRng::seed_from_u64(42);
        let points: Vec<Vec<f32>> = (0..1000)
            .map(|_| (0..10).map(|_| rng.gen_range(-10.0..10.0)).collect())
            .collect();
        let query: Vec<f32> = (0..10).map(|_| rng.gen_range(-10.0..10.0)).collect();

        let (list, stored) = list_with(&points);
        let mut index = KdTreeIndex::new(list);
        index.build().unwrap();

        let tree_ids: Vec<Uuid> = index
            .range(&query, 5.0)
            .unwrap()
            .into_iter()
            .map(|(id, _)| id)
            .collect();
        let linear_ids = linear_range(&stored, &query, 5.0, DistanceCalculator::Euclidean);

        assert_eq!(tree_ids, linear_ids);
        assert!(!tree_ids.is_empty());
    }

    #[test]
    fn test_range_radius_boundary() {
        let (list, stored) = list_with(&[vec![3.0, 4.0]]);
        let mut index = KdTreeIndex::new(list);
        index.build().unwrap();

        // Nearest point sits at distance exactly 5.
        assert!(index.range(&[0.0, 0.0], 4.999).unwrap().is_empty());
        let at = index.range(&[0.0, 0.0], 5.0).unwrap();
        assert_eq!(at.len(), 1);
        assert_eq!(at[0].0, stored[0].id);
    }

    #[test]
    fn test_empty_index_returns_empty() {
        let list = Arc::new(VectorList::new(16).unwrap());
        let index = KdTreeIndex::new(list);
        assert!(index.search(&[1.0], 3).unwrap().is_empty());
        assert!(!index.is_built());
    }

    #[test]
    fn test_invalid_arguments() {
        let (list, _) = list_with(&[vec![1.0, 2.0]]);
        let mut index = KdTreeIndex::new(list);
        index.build().unwrap();

        assert!(index.search(&[], 3).is_err());
        assert!(index.search(&[1.0, 2.0], 0).is_err());
        assert!(index.range(&[1.0, 2.0], 0.0).is_err());
        assert!(index.range(&[1.0, 2.0], -1.0).is_err());
        assert_eq!(
            index.search(&[1.0, 2.0, 3.0], 1).unwrap_err().code(),
            "VCN-002"
        );
    }

    #[test]
    fn test_save_load_round_trip() {
        let points: Vec<Vec<f32>> = (0..30).map(|i| vec![i as f32, (30 - i) as f32]).collect();
        let (list, _) = list_with(&points);
        let mut index = KdTreeIndex::new(Arc::clone(&list));
        index.build().unwrap();

        let mut buf = Vec::new();
        index.save(&mut buf).unwrap();

        let mut restored = KdTreeIndex::new(list);
        restored.load(&mut std::io::Cursor::new(buf)).unwrap();

        assert_eq!(restored.len(), 30);
        let query = [7.3, 21.9];
        let a = index.search(&query, 5).unwrap();
        let b = restored.search(&query, 5).unwrap();
        let ids_a: Vec<Uuid> = a.iter().map(|(id, _)| *id).collect();
        let ids_b: Vec<Uuid> = b.iter().map(|(id, _)| *id).collect();
        assert_eq!(ids_a, ids_b);
    }

    #[test]
    fn test_load_skips_missing_ids() {
        let (list, stored) = list_with(&[vec![1.0, 1.0], vec![2.0, 2.0], vec![3.0, 3.0]]);
        let mut index = KdTreeIndex::new(Arc::clone(&list));
        index.build().unwrap();

        let mut buf = Vec::new();
        index.save(&mut buf).unwrap();

        list.remove(&stored[1]);

        let mut restored = KdTreeIndex::new(list);
        restored.load(&mut std::io::Cursor::new(buf)).unwrap();
        assert_eq!(restored.len(), 2);
    }

    #[test]
    fn test_load_rejects_wrong_version() {
        let (list, _) = list_with(&[vec![1.0, 1.0]]);
        let mut index = KdTreeIndex::new(Arc::clone(&list));
        index.build().unwrap();

        let mut buf = Vec::new();
        index.save(&mut buf).unwrap();
        buf[0] = 9;

        let mut restored = KdTreeIndex::new(list);
        let err = restored.load(&mut std::io::Cursor::new(buf)).unwrap_err();
        assert_eq!(err.code(), "VCN-003");
    }
}
