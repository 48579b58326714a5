//! HNSW persistence: graph save/load stream.
//!
//! File layout:
//!
//! ```text
//! version u32 | node_count u32 | max_layer u32 | entry_point i64 (-1 = none)
//! | m u32 | max_m0 u32 | ef_construction u32 | ef u32 | level_mult f64 | seed u64
//! per node:
//!   handle u32 | vector_id 16B | max_layer u32
//!   | per layer: connection_count u32, connection handles u32…
//! ```
//!
//! Loading resolves vector ids against the backing list; nodes whose id no
//! longer resolves are skipped and their edges dropped.

use super::node::HnswNode;
use super::params::HnswParams;
use super::HnswIndex;
use crate::error::{Error, Result};
use crate::index::Xorshift64;

use rustc_hash::FxHashMap;
use std::io::{Read, Write};
use tracing::warn;
use uuid::Uuid;

const HNSW_FILE_VERSION: u32 = 1;

pub(super) struct Header {
    pub node_count: u32,
    pub entry_point: i64,
    pub params: HnswParams,
}

pub(super) struct RawNode {
    pub handle: u32,
    pub vector_id: Uuid,
    pub neighbors: Vec<Vec<u32>>,
}

pub(super) fn write_header(index: &HnswIndex, writer: &mut dyn Write) -> Result<()> {
    let count = u32::try_from(index.nodes.len())
        .map_err(|_| Error::Serialization("hnsw graph too large for u32 count".into()))?;
    let entry = index.entry_point.map_or(-1i64, |ep| ep as i64);

    writer.write_all(&HNSW_FILE_VERSION.to_le_bytes())?;
    writer.write_all(&count.to_le_bytes())?;
    writer.write_all(&(index.max_layer as u32).to_le_bytes())?;
    writer.write_all(&entry.to_le_bytes())?;
    writer.write_all(&(index.params.m as u32).to_le_bytes())?;
    writer.write_all(&(index.params.max_m0 as u32).to_le_bytes())?;
    writer.write_all(&(index.params.ef_construction as u32).to_le_bytes())?;
    writer.write_all(&(index.params.ef as u32).to_le_bytes())?;
    writer.write_all(&index.params.level_mult.to_le_bytes())?;
    writer.write_all(&index.params.seed.to_le_bytes())?;
    Ok(())
}

pub(super) fn write_node(
    handle: usize,
    node: &HnswNode,
    writer: &mut dyn Write,
) -> Result<()> {
    // The handle is implicit in arena order but written out so a reader can
    // remap edges when nodes get skipped.
    let handle = u32::try_from(handle)
        .map_err(|_| Error::Serialization("hnsw handle too large for u32".into()))?;
    writer.write_all(&handle.to_le_bytes())?;
    writer.write_all(node.vector_id.as_bytes())?;
    writer.write_all(&(node.max_layer as u32).to_le_bytes())?;
    for layer in &node.neighbors {
        let count = u32::try_from(layer.len())
            .map_err(|_| Error::Serialization("hnsw adjacency too large".into()))?;
        writer.write_all(&count.to_le_bytes())?;
        for &neighbor in layer {
            writer.write_all(&(neighbor as u32).to_le_bytes())?;
        }
    }
    Ok(())
}

pub(super) fn read_header(reader: &mut dyn Read) -> Result<Header> {
    let version = read_u32(reader)?;
    if version != HNSW_FILE_VERSION {
        return Err(Error::InvalidFormat(format!(
            "hnsw file version {version}, expected {HNSW_FILE_VERSION}"
        )));
    }

    let node_count = read_u32(reader)?;
    let _max_layer = read_u32(reader)?;
    let entry_point = read_i64(reader)?;
    let m = read_u32(reader)? as usize;
    let max_m0 = read_u32(reader)? as usize;
    let ef_construction = read_u32(reader)? as usize;
    let ef = read_u32(reader)? as usize;
    let level_mult = read_f64(reader)?;
    let seed = read_u64(reader)?;

    let params = HnswParams {
        m,
        max_m0,
        ef_construction,
        ef,
        level_mult,
        seed,
    };
    params.validate().map_err(|e| {
        Error::InvalidFormat(format!("hnsw header carries invalid parameters: {e}"))
    })?;

    Ok(Header {
        node_count,
        entry_point,
        params,
    })
}

pub(super) fn read_node(reader: &mut dyn Read) -> Result<RawNode> {
    let handle = read_u32(reader)?;

    let mut id_bytes = [0u8; 16];
    reader.read_exact(&mut id_bytes)?;
    let vector_id = Uuid::from_bytes(id_bytes);

    let max_layer = read_u32(reader)? as usize;
    if max_layer > super::MAX_LEVEL {
        return Err(Error::InvalidFormat(format!(
            "hnsw node layer {max_layer} exceeds the level cap"
        )));
    }

    let mut neighbors = Vec::with_capacity(max_layer + 1);
    for _ in 0..=max_layer {
        let count = read_u32(reader)? as usize;
        let mut layer = Vec::with_capacity(count);
        for _ in 0..count {
            layer.push(read_u32(reader)?);
        }
        neighbors.push(layer);
    }

    Ok(RawNode {
        handle,
        vector_id,
        neighbors,
    })
}

/// Resolves raw nodes against the vector list, remaps handles densely and
/// installs the graph into `index`.
pub(super) fn assemble(
    index: &mut HnswIndex,
    header: Header,
    raw_nodes: Vec<RawNode>,
) -> Result<()> {
    let mut resolved: Vec<(RawNode, Vec<f32>)> = Vec::with_capacity(raw_nodes.len());
    for raw in raw_nodes {
        match index.vectors.get_by_id(raw.vector_id) {
            Some(vector) => resolved.push((raw, vector.values().to_vec())),
            None => {
                warn!(id = %raw.vector_id, "hnsw node no longer resolves, skipping");
            }
        }
    }

    let handle_map: FxHashMap<u32, usize> = resolved
        .iter()
        .enumerate()
        .map(|(new, (raw, _))| (raw.handle, new))
        .collect();

    let mut nodes = Vec::with_capacity(resolved.len());
    for (raw, values) in resolved {
        let neighbors: Vec<Vec<usize>> = raw
            .neighbors
            .iter()
            .map(|layer| {
                layer
                    .iter()
                    .filter_map(|h| handle_map.get(h).copied())
                    .collect()
            })
            .collect();
        let max_layer = neighbors.len().saturating_sub(1);
        let mut node = HnswNode::new(raw.vector_id, values, max_layer);
        node.neighbors = neighbors;
        nodes.push(node);
    }

    let max_layer = nodes.iter().map(|n| n.max_layer).max().unwrap_or(0);

    let entry_point = if header.entry_point >= 0 {
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let stored = header.entry_point as u32;
        handle_map.get(&stored).copied()
    } else {
        None
    };
    // A skipped entry point falls back to the highest surviving node.
    let entry_point = entry_point.or_else(|| {
        nodes
            .iter()
            .enumerate()
            .max_by_key(|(_, n)| n.max_layer)
            .map(|(i, _)| i)
    });

    index.params = header.params;
    index.rng = Xorshift64::new(header.params.seed);
    index.nodes = nodes;
    index.max_layer = max_layer;
    index.entry_point = entry_point;
    Ok(())
}

fn read_u32(reader: &mut dyn Read) -> Result<u32> {
    let mut buf = [0u8; 4];
    reader.read_exact(&mut buf)?;
    Ok(u32::from_le_bytes(buf))
}

fn read_u64(reader: &mut dyn Read) -> Result<u64> {
    let mut buf = [0u8; 8];
    reader.read_exact(&mut buf)?;
    Ok(u64::from_le_bytes(buf))
}

fn read_i64(reader: &mut dyn Read) -> Result<i64> {
    let mut buf = [0u8; 8];
    reader.read_exact(&mut buf)?;
    Ok(i64::from_le_bytes(buf))
}

fn read_f64(reader: &mut dyn Read) -> Result<f64> {
    let mut buf = [0u8; 8];
    reader.read_exact(&mut buf)?;
    Ok(f64::from_le_bytes(buf))
}
