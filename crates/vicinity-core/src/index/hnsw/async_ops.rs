//! Cooperative async build/save/load for the HNSW index.
//!
//! These are the only suspension points in the core: the build yields every
//! 10 inserts, save/load yield between nodes. Each yield point also checks
//! the cancellation token; on cancel the operation surfaces `Cancelled` and
//! leaves the index in a consistent (for a build: empty) state, which the
//! caller must treat as "no index built".

use super::{persistence, HnswIndex};
use crate::cancel::CancellationToken;
use crate::error::{Error, Result};
use crate::index::SearchIndex;
use crate::vector::Vector;

use std::io::{Read, Write};
use tracing::debug;

/// Inserts between yields during an async build.
const BUILD_YIELD_EVERY: usize = 10;

impl HnswIndex {
    /// Builds the graph from the backing vector list, yielding to the
    /// runtime every few inserts.
    ///
    /// # Errors
    ///
    /// Returns `Cancelled` when the token fires (the index is left empty),
    /// or any insert error.
    pub async fn build_async(&mut self, cancel: &CancellationToken) -> Result<()> {
        self.clear();

        let records: Vec<Vector> = self.vectors.iter().collect();
        for (i, record) in records.iter().enumerate() {
            if i % BUILD_YIELD_EVERY == 0 {
                if cancel.is_cancelled() {
                    self.clear();
                    return Err(Error::Cancelled("hnsw build".into()));
                }
                tokio::task::yield_now().await;
            }
            self.insert(record)?;
        }

        debug!(count = self.count(), max_layer = self.max_layer(), "hnsw built");
        Ok(())
    }

    /// Serializes the graph, yielding between nodes.
    ///
    /// # Errors
    ///
    /// Returns `Cancelled` when the token fires (the stream is left
    /// truncated; the in-memory graph is untouched), or `Io` on write
    /// failure.
    pub async fn save_async<W: Write + Send>(
        &self,
        writer: &mut W,
        cancel: &CancellationToken,
    ) -> Result<()> {
        persistence::write_header(self, writer)?;
        for (handle, node) in self.nodes.iter().enumerate() {
            if cancel.is_cancelled() {
                return Err(Error::Cancelled("hnsw save".into()));
            }
            persistence::write_node(handle, node, writer)?;
            tokio::task::yield_now().await;
        }
        Ok(())
    }

    /// Restores the graph from a stream, yielding between nodes.
    ///
    /// # Errors
    ///
    /// Returns `Cancelled` when the token fires (the index is left empty),
    /// `InvalidFormat` on a version mismatch or corrupt stream.
    pub async fn load_async<R: Read + Send>(
        &mut self,
        reader: &mut R,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let header = persistence::read_header(reader)?;

        let mut raw_nodes = Vec::with_capacity(header.node_count as usize);
        for _ in 0..header.node_count {
            if cancel.is_cancelled() {
                self.clear();
                return Err(Error::Cancelled("hnsw load".into()));
            }
            raw_nodes.push(persistence::read_node(reader)?);
            tokio::task::yield_now().await;
        }

        persistence::assemble(self, header, raw_nodes)
    }
}
