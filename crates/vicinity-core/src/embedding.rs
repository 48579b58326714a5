//! Text-embedding port.
//!
//! Text search is not core functionality: the service delegates to this
//! capability so the engine links clean with no text-model dependency. A
//! host injects an implementation via
//! [`crate::search::SearchService::set_embedding_generator`].

use crate::error::Result;

/// Turns text into an embedding of the collection's dimensionality.
///
/// Implementations must be deterministic for a given model: the same text
/// yields the same embedding. Failures surface as
/// [`crate::error::Error::EmbeddingFailed`].
pub trait EmbeddingGenerator: Send + Sync {
    /// Generates the embedding for `text`.
    ///
    /// # Errors
    ///
    /// Returns `EmbeddingFailed` when the underlying model cannot embed the
    /// input.
    fn generate_embedding(&self, text: &str) -> Result<Vec<f32>>;
}
