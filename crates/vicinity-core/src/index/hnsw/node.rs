//! HNSW graph node.
//!
//! The graph is a single arena (`Vec<HnswNode>`) keyed by a dense integer
//! handle. Edges are bidirectional and owned by the pool; nodes hold only
//! handles, so the cycles the graph is full of never form ownership cycles.

use uuid::Uuid;

/// Dense handle of a node in the arena.
pub(crate) type NodeId = usize;

#[derive(Debug, Clone)]
pub(crate) struct HnswNode {
    /// Id of the backing record in the vector list.
    pub vector_id: Uuid,
    /// Cached vector components for distance computation.
    pub values: Vec<f32>,
    /// Highest layer this node participates in.
    pub max_layer: usize,
    /// Per-layer adjacency, `neighbors[layer]`, `0..=max_layer`.
    pub neighbors: Vec<Vec<NodeId>>,
}

impl HnswNode {
    pub fn new(vector_id: Uuid, values: Vec<f32>, max_layer: usize) -> Self {
        Self {
            vector_id,
            values,
            max_layer,
            neighbors: vec![Vec::new(); max_layer + 1],
        }
    }

    /// Adjacency at `layer`, empty above the node's own top layer.
    pub fn neighbors_at(&self, layer: usize) -> &[NodeId] {
        self.neighbors.get(layer).map_or(&[], Vec::as_slice)
    }
}
