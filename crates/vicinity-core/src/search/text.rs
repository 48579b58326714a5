//! Text-query overload: embed, search, and union short queries with exact
//! prefix matches on the stored source text.

use super::{apply_threshold, SearchHit, SearchService};
use crate::error::{Error, Result};
use crate::index::IndexAlgorithm;

use rustc_hash::FxHashSet;
use tracing::error;
use uuid::Uuid;

/// Below this many characters a query is "partial" and gets the loosest
/// default threshold.
const PARTIAL_TEXT_LENGTH_THRESHOLD: usize = 5;
/// Below this many characters a query is still short enough to union with
/// exact prefix matches.
const FULL_TEXT_LENGTH_THRESHOLD: usize = 20;

const PARTIAL_TEXT_TAU: f32 = 0.9;
const SHORT_TEXT_TAU: f32 = 0.8;
const LONG_TEXT_TAU: f32 = 0.5;

impl SearchService {
    /// k-NN search from a text query.
    ///
    /// The text is embedded through the injected [`crate::embedding::EmbeddingGenerator`];
    /// when `threshold` is not given a default is derived from the query
    /// length. Queries under 20 characters additionally union up to `k`
    /// case-insensitive prefix matches on the records' original text,
    /// deduplicated, ordered by distance then insertion.
    ///
    /// # Errors
    ///
    /// `InvalidArgument` for an empty text or `k == 0`; `EmbeddingFailed`
    /// when no generator is configured or the generator fails.
    pub fn search_text(
        &self,
        text: &str,
        k: usize,
        algorithm: IndexAlgorithm,
        threshold: Option<f32>,
    ) -> Result<Vec<SearchHit>> {
        let result = self.search_text_inner(text, k, algorithm, threshold);
        if let Err(e) = &result {
            error!(
                operation = "search_text",
                text_len = text.len(),
                k,
                algorithm = %algorithm,
                error = %e,
                "text search failed"
            );
        }
        result
    }

    fn search_text_inner(
        &self,
        text: &str,
        k: usize,
        algorithm: IndexAlgorithm,
        threshold: Option<f32>,
    ) -> Result<Vec<SearchHit>> {
        if text.is_empty() {
            return Err(Error::InvalidArgument("query text is empty".into()));
        }
        if k == 0 {
            return Err(Error::InvalidArgument("k must be at least 1".into()));
        }

        let embedding = {
            let generator = self.embedding_generator.read();
            let Some(generator) = generator.as_ref() else {
                return Err(Error::EmbeddingFailed(
                    "no embedding generator configured".into(),
                ));
            };
            generator.generate_embedding(text)?
        };
        if embedding.is_empty() {
            return Err(Error::EmbeddingFailed(
                "embedding generator returned an empty vector".into(),
            ));
        }

        let text_len = text.chars().count();
        let tau = threshold.unwrap_or(default_tau(text_len));

        let ids = self.knn(&embedding, k, algorithm)?;
        let mut hits = apply_threshold(self.materialize(ids), embedding.len(), tau);

        if text_len < FULL_TEXT_LENGTH_THRESHOLD {
            self.union_prefix_matches(&mut hits, text, k, &embedding);
        }

        Ok(hits)
    }

    /// Appends up to `k` exact prefix matches on `original_text`
    /// (case-insensitive) that the distance search did not already surface,
    /// in insertion order.
    fn union_prefix_matches(
        &self,
        hits: &mut Vec<SearchHit>,
        text: &str,
        k: usize,
        embedding: &[f32],
    ) {
        let seen: FxHashSet<Uuid> = hits.iter().map(|h| h.vector.id).collect();
        let needle = text.to_lowercase();

        let mut appended = 0;
        for record in self.vectors.iter() {
            if appended >= k {
                break;
            }
            let Some(stored) = &record.original_text else {
                continue;
            };
            if !stored.to_lowercase().starts_with(&needle) || seen.contains(&record.id) {
                continue;
            }

            let distance = if record.dimension() == embedding.len() {
                self.calc.distance_unchecked(embedding, record.values())
            } else {
                f32::INFINITY
            };
            hits.push(SearchHit::new(record, distance));
            appended += 1;
        }
    }
}

fn default_tau(text_len: usize) -> f32 {
    if text_len < PARTIAL_TEXT_LENGTH_THRESHOLD {
        PARTIAL_TEXT_TAU
    } else if text_len < FULL_TEXT_LENGTH_THRESHOLD {
        SHORT_TEXT_TAU
    } else {
        LONG_TEXT_TAU
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_tau_by_length() {
        assert!((default_tau(3) - 0.9).abs() < f32::EPSILON);
        assert!((default_tau(4) - 0.9).abs() < f32::EPSILON);
        assert!((default_tau(5) - 0.8).abs() < f32::EPSILON);
        assert!((default_tau(19) - 0.8).abs() < f32::EPSILON);
        assert!((default_tau(20) - 0.5).abs() < f32::EPSILON);
        assert!((default_tau(200) - 0.5).abs() < f32::EPSILON);
    }
}
