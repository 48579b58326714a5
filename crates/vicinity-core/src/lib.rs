//! # Vicinity Core
//!
//! Embedded vector database engine written in Rust.
//!
//! Vicinity stores high-dimensional vectors in a memory-mapped, tombstoned
//! list and answers k-NN and range queries through a family of ANN indexes
//! sharing one build/query/serialize contract.
//!
//! ## Features
//!
//! - **Persistent vector list**: two mmap-backed files, concurrent readers,
//!   O(1) tombstone removal, online batched defragmentation
//! - **Index family**: KD-tree, ball tree, HNSW graph, LSH tables, binary
//!   and product quantization
//! - **Search service**: one façade that builds, owns, persists and
//!   dispatches, with threshold policy and a text-query overload
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use vicinity_core::{IndexAlgorithm, SearchService, Vector, VectorList};
//!
//! let list = Arc::new(VectorList::new(10_000)?);
//! list.add(&Vector::new(vec![0.1, 0.2, 0.3])?)?;
//!
//! let service = SearchService::new(Arc::clone(&list));
//! service.build_index(IndexAlgorithm::Hnsw)?;
//!
//! let query = Vector::new(vec![0.1, 0.2, 0.25])?;
//! let hits = service.search(&query, 10, IndexAlgorithm::Hnsw, None)?;
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod cancel;
pub mod config;
pub mod distance;
pub mod embedding;
pub mod error;
pub mod etl;
pub mod index;
pub mod search;
pub mod simd;
pub mod storage;
pub mod vector;

pub use cancel::CancellationToken;
pub use config::VicinityConfig;
pub use distance::DistanceCalculator;
pub use embedding::EmbeddingGenerator;
pub use error::{Error, Result};
pub use index::hnsw::{HnswIndex, HnswParams};
pub use index::{IndexAlgorithm, SearchIndex};
pub use search::{SearchHit, SearchService};
pub use storage::VectorList;
pub use vector::{Precision, Vector, VectorAttributes};
