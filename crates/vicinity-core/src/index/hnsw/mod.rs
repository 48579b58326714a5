//! HNSW index: layered proximity graph for approximate nearest neighbors.
//!
//! Implements the hierarchical navigable small world structure of Malkov &
//! Yashunin. Builds are single-threaded and deterministic for a given seed;
//! queries over a frozen graph are safe to run concurrently. The cooperative
//! async variants live in [`async_ops`].

mod async_ops;
mod node;
mod params;
mod persistence;

pub use params::{HnswParams, MAX_LEVEL};

use super::{validate_query, IndexAlgorithm, OrderedFloat, SearchIndex, Xorshift64};
use crate::distance::DistanceCalculator;
use crate::error::{Error, Result};
use crate::storage::VectorList;
use crate::vector::Vector;
use node::{HnswNode, NodeId};

use rustc_hash::FxHashSet;
use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::io::{Read, Write};
use std::sync::Arc;
use uuid::Uuid;

/// Layered proximity graph with parameterized insert and search.
pub struct HnswIndex {
    vectors: Arc<VectorList>,
    calc: DistanceCalculator,
    params: HnswParams,
    nodes: Vec<HnswNode>,
    entry_point: Option<NodeId>,
    max_layer: usize,
    rng: Xorshift64,
}

impl HnswIndex {
    /// Creates an empty index with default parameters.
    #[must_use]
    pub fn new(vectors: Arc<VectorList>) -> Self {
        Self::with_params(vectors, HnswParams::default())
    }

    /// Creates an empty index with the given parameters.
    #[must_use]
    pub fn with_params(vectors: Arc<VectorList>, params: HnswParams) -> Self {
        Self {
            vectors,
            calc: DistanceCalculator::default(),
            params,
            nodes: Vec::new(),
            entry_point: None,
            max_layer: 0,
            rng: Xorshift64::new(params.seed),
        }
    }

    /// Number of nodes in the graph.
    #[must_use]
    pub fn count(&self) -> usize {
        self.nodes.len()
    }

    /// Current top layer of the graph.
    #[must_use]
    pub fn max_layer(&self) -> usize {
        self.max_layer
    }

    /// Handle of the entry-point node, if any.
    #[must_use]
    pub fn entry_point_id(&self) -> Option<usize> {
        self.entry_point
    }

    /// The configured parameters.
    #[must_use]
    pub fn params(&self) -> &HnswParams {
        &self.params
    }

    /// Inserts one record into the graph.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` for an empty vector, `DimensionMismatch`
    /// when the record does not match the indexed dimensionality.
    pub fn insert(&mut self, vector: &Vector) -> Result<NodeId> {
        if vector.values().is_empty() {
            return Err(Error::InvalidArgument(
                "cannot insert an empty vector".into(),
            ));
        }
        if let Some(first) = self.nodes.first() {
            if vector.values().len() != first.values.len() {
                return Err(Error::DimensionMismatch {
                    expected: first.values.len(),
                    actual: vector.values().len(),
                });
            }
        }

        let level = self.random_level();
        let node_id = self.nodes.len();
        self.nodes.push(HnswNode::new(
            vector.id,
            vector.values().to_vec(),
            level,
        ));

        let Some(mut ep) = self.entry_point else {
            self.entry_point = Some(node_id);
            self.max_layer = level;
            return Ok(node_id);
        };

        let query = self.nodes[node_id].values.clone();

        // Greedy width-1 descent from the top of the graph down to the new
        // node's level.
        for layer in (level + 1..=self.max_layer).rev() {
            ep = self.greedy_closest(&query, ep, layer);
        }

        // Wide search and bidirectional linking on every layer the node
        // participates in.
        for layer in (0..=level.min(self.max_layer)).rev() {
            let candidates =
                self.search_layer(&query, &[ep], self.params.ef_construction, layer);

            let budget = self.budget_at(layer);
            let selected: Vec<NodeId> = candidates
                .iter()
                .take(budget)
                .map(|&(n, _)| n)
                .collect();

            self.nodes[node_id].neighbors[layer] = selected.clone();
            for &neighbor in &selected {
                self.link(neighbor, node_id, layer);
            }

            if let Some(&(nearest, _)) = candidates.first() {
                ep = nearest;
            }
        }

        if level > self.max_layer {
            self.max_layer = level;
            self.entry_point = Some(node_id);
        }

        Ok(node_id)
    }

    fn budget_at(&self, layer: usize) -> usize {
        if layer == 0 {
            self.params.max_m0
        } else {
            self.params.m
        }
    }

    /// Adds the back edge `neighbor -> new_node` and prunes the neighbor's
    /// adjacency back to its budget, keeping the nearest edges. Both
    /// endpoints are updated before the writer moves on, so the graph is
    /// never half-linked.
    fn link(&mut self, neighbor: NodeId, new_node: NodeId, layer: usize) {
        let mut adjacency = self.nodes[neighbor].neighbors[layer].clone();
        if adjacency.contains(&new_node) {
            return;
        }
        adjacency.push(new_node);

        let budget = self.budget_at(layer);
        if adjacency.len() > budget {
            let base = self.nodes[neighbor].values.clone();
            let mut with_dist: Vec<(NodeId, f32)> = adjacency
                .into_iter()
                .map(|n| (n, self.calc.distance_unchecked(&base, &self.nodes[n].values)))
                .collect();
            with_dist.sort_by(|a, b| a.1.total_cmp(&b.1));
            adjacency = with_dist.into_iter().take(budget).map(|(n, _)| n).collect();
        }

        self.nodes[neighbor].neighbors[layer] = adjacency;
    }

    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    fn random_level(&mut self) -> usize {
        let uniform = self.rng.next_f64();
        let level = (-uniform.ln() * self.params.level_mult).floor() as usize;
        level.min(MAX_LEVEL)
    }

    /// Width-1 greedy walk: hop to the closest neighbor until no neighbor
    /// improves on the current node.
    fn greedy_closest(&self, query: &[f32], entry: NodeId, layer: usize) -> NodeId {
        let mut best = entry;
        let mut best_dist = self
            .calc
            .distance_unchecked(query, &self.nodes[best].values);

        loop {
            let mut improved = false;
            for &neighbor in self.nodes[best].neighbors_at(layer) {
                let dist = self
                    .calc
                    .distance_unchecked(query, &self.nodes[neighbor].values);
                if dist < best_dist {
                    best = neighbor;
                    best_dist = dist;
                    improved = true;
                }
            }
            if !improved {
                return best;
            }
        }
    }

    /// Beam search over one layer with two heaps: a min-heap of candidates
    /// to expand and a bounded max-heap of the best results so far. Stops
    /// when the closest open candidate cannot beat the worst retained
    /// result.
    fn search_layer(
        &self,
        query: &[f32],
        entry_points: &[NodeId],
        ef: usize,
        layer: usize,
    ) -> Vec<(NodeId, f32)> {
        let mut visited: FxHashSet<NodeId> = FxHashSet::default();
        let mut candidates: BinaryHeap<Reverse<(OrderedFloat, NodeId)>> = BinaryHeap::new();
        let mut results: BinaryHeap<(OrderedFloat, NodeId)> = BinaryHeap::new();

        for &ep in entry_points {
            let dist = self.calc.distance_unchecked(query, &self.nodes[ep].values);
            candidates.push(Reverse((OrderedFloat(dist), ep)));
            results.push((OrderedFloat(dist), ep));
            visited.insert(ep);
        }

        while let Some(Reverse((OrderedFloat(c_dist), c_node))) = candidates.pop() {
            let furthest = results.peek().map_or(f32::MAX, |r| r.0 .0);
            if c_dist > furthest && results.len() >= ef {
                break;
            }

            for &neighbor in self.nodes[c_node].neighbors_at(layer) {
                if visited.insert(neighbor) {
                    let dist = self
                        .calc
                        .distance_unchecked(query, &self.nodes[neighbor].values);
                    let furthest = results.peek().map_or(f32::MAX, |r| r.0 .0);

                    if dist < furthest || results.len() < ef {
                        candidates.push(Reverse((OrderedFloat(dist), neighbor)));
                        results.push((OrderedFloat(dist), neighbor));
                        if results.len() > ef {
                            results.pop();
                        }
                    }
                }
            }
        }

        let mut out: Vec<(NodeId, f32)> = results
            .into_iter()
            .map(|(d, n)| (n, d.0))
            .collect();
        out.sort_by(|a, b| a.1.total_cmp(&b.1));
        out
    }

    fn check_dimension(&self, query: &[f32]) -> Result<()> {
        if let Some(first) = self.nodes.first() {
            if query.len() != first.values.len() {
                return Err(Error::DimensionMismatch {
                    expected: first.values.len(),
                    actual: query.len(),
                });
            }
        }
        Ok(())
    }

    fn clear_state(&mut self) {
        self.nodes.clear();
        self.entry_point = None;
        self.max_layer = 0;
        self.rng = Xorshift64::new(self.params.seed);
    }
}

impl SearchIndex for HnswIndex {
    fn algorithm(&self) -> IndexAlgorithm {
        IndexAlgorithm::Hnsw
    }

    fn build(&mut self) -> Result<()> {
        self.clear_state();
        let records: Vec<Vector> = self.vectors.iter().collect();
        for record in &records {
            self.insert(record)?;
        }
        Ok(())
    }

    fn is_built(&self) -> bool {
        !self.nodes.is_empty()
    }

    fn clear(&mut self) {
        self.clear_state();
    }

    fn search(&self, query: &[f32], k: usize) -> Result<Vec<(Uuid, f32)>> {
        validate_query(query, k)?;
        self.check_dimension(query)?;

        let Some(mut ep) = self.entry_point else {
            return Ok(Vec::new());
        };

        for layer in (1..=self.max_layer).rev() {
            ep = self.greedy_closest(query, ep, layer);
        }

        let ef = self.params.ef.max(k);
        let candidates = self.search_layer(query, &[ep], ef, 0);

        Ok(candidates
            .into_iter()
            .take(k)
            .map(|(n, d)| (self.nodes[n].vector_id, d))
            .collect())
    }

    fn save(&self, writer: &mut dyn Write) -> Result<()> {
        persistence::write_header(self, writer)?;
        for (handle, node) in self.nodes.iter().enumerate() {
            persistence::write_node(handle, node, writer)?;
        }
        Ok(())
    }

    fn load(&mut self, reader: &mut dyn Read) -> Result<()> {
        let header = persistence::read_header(reader)?;
        let mut raw_nodes = Vec::with_capacity(header.node_count as usize);
        for _ in 0..header.node_count {
            raw_nodes.push(persistence::read_node(reader)?);
        }
        persistence::assemble(self, header, raw_nodes)
    }
}
