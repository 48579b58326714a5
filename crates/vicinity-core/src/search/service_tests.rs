//! End-to-end tests for the search service.

use super::*;
use crate::embedding::EmbeddingGenerator;

/// Deterministic embedder: folds the text bytes into a fixed-dimension
/// vector. Identical text always embeds identically.
struct StubEmbedder {
    dim: usize,
}

impl EmbeddingGenerator for StubEmbedder {
    fn generate_embedding(&self, text: &str) -> Result<Vec<f32>> {
        let mut values = vec![0.0f32; self.dim];
        for (i, byte) in text.bytes().enumerate() {
            values[i % self.dim] += f32::from(byte) / 255.0;
        }
        Ok(values)
    }
}

fn service_with(points: &[Vec<f32>]) -> (SearchService, Vec<Vector>) {
    let list = Arc::new(VectorList::new(2048).unwrap());
    let mut stored = Vec::new();
    for p in points {
        let v = Vector::new(p.clone()).unwrap();
        list.add(&v).unwrap();
        stored.push(v);
    }
    (SearchService::new(list), stored)
}

#[test]
fn test_three_vector_knn_linear() {
    let (service, stored) = service_with(&[
        vec![1.0, 2.0, 3.0],
        vec![4.0, 5.0, 6.0],
        vec![7.0, 8.0, 9.0],
    ]);

    let query = Vector::new(vec![2.0, 3.0, 4.0]).unwrap();
    let hits = service
        .search(&query, 1, IndexAlgorithm::Linear, None)
        .unwrap();

    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].vector, stored[0]);
}

#[test]
fn test_range_search_around_origin() {
    let (service, stored) = service_with(&[
        vec![0.0, 0.0],
        vec![1.0, 0.0],
        vec![0.0, 1.0],
        vec![1.0, 1.0],
        vec![2.0, 0.0],
        vec![0.0, 2.0],
        vec![3.0, 4.0],
        vec![5.0, 0.0],
    ]);

    let query = Vector::new(vec![0.0, 0.0]).unwrap();
    let hits = service
        .range_search(&query, 1.5, IndexAlgorithm::Linear, None)
        .unwrap();

    let expected: Vec<Uuid> = stored[..4].iter().map(|v| v.id).collect();
    let got: Vec<Uuid> = hits.iter().map(|h| h.vector.id).collect();
    assert_eq!(hits.len(), 4);
    for id in &expected {
        assert!(got.contains(id));
    }
    // Ascending by Euclidean distance, origin first.
    assert_eq!(got[0], stored[0].id);
    for pair in hits.windows(2) {
        assert!(pair[0].distance <= pair[1].distance);
    }
}

#[test]
fn test_kdtree_and_linear_range_agree() {
    use rand::prelude::*;

    let mut rng = StdRng::seed_from_u64(42);
    let points: Vec<Vec<f32>> = (0..1000)
        .map(|_| (0..10).map(|_| rng.gen_range(-10.0..10.0)).collect())
        .collect();
    let query_values: Vec<f32> = (0..10).map(|_| rng.gen_range(-10.0..10.0)).collect();

    let (service, _) = service_with(&points);
    let query = Vector::new(query_values).unwrap();

    let mut kd: Vec<Uuid> = service
        .range_search(&query, 5.0, IndexAlgorithm::KdTree, None)
        .unwrap()
        .into_iter()
        .map(|h| h.vector.id)
        .collect();
    let mut linear: Vec<Uuid> = service
        .range_search(&query, 5.0, IndexAlgorithm::Linear, None)
        .unwrap()
        .into_iter()
        .map(|h| h.vector.id)
        .collect();

    kd.sort();
    linear.sort();
    assert_eq!(kd, linear);
}

#[test]
fn test_every_algorithm_answers_knn() {
    let points: Vec<Vec<f32>> = (0..64)
        .map(|i| vec![(i % 8) as f32, (i / 8) as f32, 1.0, -1.0, 0.5, 0.0, 2.0, -2.0])
        .collect();
    let (service, _) = service_with(&points);

    for algorithm in [
        IndexAlgorithm::Linear,
        IndexAlgorithm::KdTree,
        IndexAlgorithm::BallTree,
        IndexAlgorithm::Hnsw,
        IndexAlgorithm::Lsh,
        IndexAlgorithm::BinaryQuantization,
        IndexAlgorithm::ProductQuantization,
    ] {
        let query = Vector::new(vec![3.0, 3.0, 1.0, -1.0, 0.5, 0.0, 2.0, -2.0]).unwrap();
        let hits = service.search(&query, 5, algorithm, None).unwrap();
        assert!(!hits.is_empty(), "{algorithm} returned nothing");
        for pair in hits.windows(2) {
            assert!(pair[0].distance <= pair[1].distance, "{algorithm} unsorted");
        }
        // Every hit resolves in the backing list.
        for hit in &hits {
            assert!(service.vectors().contains(&hit.vector));
        }
    }
}

#[test]
fn test_k_larger_than_count() {
    let (service, _) = service_with(&[vec![1.0, 1.0], vec![2.0, 2.0], vec![3.0, 3.0]]);
    let query = Vector::new(vec![0.0, 0.0]).unwrap();
    let hits = service
        .search(&query, 10, IndexAlgorithm::Linear, None)
        .unwrap();
    assert_eq!(hits.len(), 3);
}

#[test]
fn test_invalid_arguments() {
    let (service, _) = service_with(&[vec![1.0, 1.0]]);
    let query = Vector::new(vec![0.0, 0.0]).unwrap();

    assert_eq!(
        service
            .search(&query, 0, IndexAlgorithm::Linear, None)
            .unwrap_err()
            .code(),
        "VCN-001"
    );
    assert_eq!(
        service
            .range_search(&query, 0.0, IndexAlgorithm::Linear, None)
            .unwrap_err()
            .code(),
        "VCN-001"
    );
    assert_eq!(
        service
            .range_search(&query, -2.0, IndexAlgorithm::Range, None)
            .unwrap_err()
            .code(),
        "VCN-001"
    );
}

#[test]
fn test_unsupported_combinations() {
    let (service, _) = service_with(&[vec![1.0, 1.0]]);
    let query = Vector::new(vec![0.0, 0.0]).unwrap();

    // Range "algorithm" only answers range queries.
    assert_eq!(
        service
            .search(&query, 1, IndexAlgorithm::Range, None)
            .unwrap_err()
            .code(),
        "VCN-004"
    );
    // LSH has no range path.
    assert_eq!(
        service
            .range_search(&query, 1.0, IndexAlgorithm::Lsh, None)
            .unwrap_err()
            .code(),
        "VCN-004"
    );
    assert_eq!(
        service
            .range_search(&query, 1.0, IndexAlgorithm::Hnsw, None)
            .unwrap_err()
            .code(),
        "VCN-004"
    );
}

#[test]
fn test_search_on_empty_list() {
    let list = Arc::new(VectorList::new(16).unwrap());
    let service = SearchService::new(list);
    let query = Vector::new(vec![1.0, 2.0]).unwrap();

    for algorithm in [
        IndexAlgorithm::Linear,
        IndexAlgorithm::KdTree,
        IndexAlgorithm::Hnsw,
    ] {
        assert!(service.search(&query, 3, algorithm, None).unwrap().is_empty());
    }
}

#[test]
fn test_threshold_filters_knn() {
    let (service, _) = service_with(&[vec![0.0, 0.0], vec![1.0, 0.0], vec![10.0, 0.0]]);
    let query = Vector::new(vec![0.0, 0.0]).unwrap();

    let hits = service
        .search(&query, 3, IndexAlgorithm::Linear, Some(1.5))
        .unwrap();
    assert_eq!(hits.len(), 2);
    assert!(hits.iter().all(|h| h.distance <= 1.5));
}

#[test]
fn test_range_search_with_calculator_override() {
    let (service, _) = service_with(&[vec![1.0, 1.0], vec![2.0, 2.0]]);
    let query = Vector::new(vec![0.0, 0.0]).unwrap();

    // Manhattan distance of (1,1) is 2.0; Euclidean would be ~1.41.
    let hits = service
        .range_search(
            &query,
            2.0,
            IndexAlgorithm::Range,
            Some(DistanceCalculator::Manhattan),
        )
        .unwrap();
    assert_eq!(hits.len(), 1);
    assert!((hits[0].distance - 2.0).abs() < 1e-6);
}

#[test]
fn test_build_all_and_clear() {
    let points: Vec<Vec<f32>> = (0..32).map(|i| vec![i as f32, 1.0, 2.0, 3.0]).collect();
    let (service, _) = service_with(&points);

    service.build_all_indexes().unwrap();
    for algorithm in [
        IndexAlgorithm::KdTree,
        IndexAlgorithm::BallTree,
        IndexAlgorithm::Hnsw,
        IndexAlgorithm::Lsh,
        IndexAlgorithm::BinaryQuantization,
        IndexAlgorithm::ProductQuantization,
    ] {
        assert!(service.is_index_built(algorithm), "{algorithm} not built");
    }

    service.clear();
    assert!(!service.is_index_built(IndexAlgorithm::Hnsw));
}

#[test]
fn test_save_load_round_trip() {
    let points: Vec<Vec<f32>> = (0..48)
        .map(|i| vec![(i % 7) as f32, (i / 7) as f32, 0.5, -0.5])
        .collect();
    let list = Arc::new(VectorList::new(256).unwrap());
    for p in &points {
        list.add(&Vector::new(p.clone()).unwrap()).unwrap();
    }

    let service = SearchService::new(Arc::clone(&list));
    service.build_index(IndexAlgorithm::KdTree).unwrap();
    service.build_index(IndexAlgorithm::Hnsw).unwrap();
    service
        .build_index(IndexAlgorithm::BinaryQuantization)
        .unwrap();

    let mut buf = Vec::new();
    service.save(&mut buf).unwrap();

    let restored = SearchService::new(list);
    restored.load(&mut std::io::Cursor::new(buf)).unwrap();

    assert!(restored.is_index_built(IndexAlgorithm::KdTree));
    assert!(restored.is_index_built(IndexAlgorithm::Hnsw));
    assert!(restored.is_index_built(IndexAlgorithm::BinaryQuantization));
    assert!(!restored.is_index_built(IndexAlgorithm::Lsh));

    let query = Vector::new(vec![3.0, 3.0, 0.5, -0.5]).unwrap();
    for algorithm in [IndexAlgorithm::KdTree, IndexAlgorithm::Hnsw] {
        let a: Vec<Uuid> = service
            .search(&query, 5, algorithm, None)
            .unwrap()
            .into_iter()
            .map(|h| h.vector.id)
            .collect();
        let b: Vec<Uuid> = restored
            .search(&query, 5, algorithm, None)
            .unwrap()
            .into_iter()
            .map(|h| h.vector.id)
            .collect();
        assert_eq!(a, b, "{algorithm} differs after reload");
    }
}

#[test]
fn test_load_rejects_wrong_version() {
    let (service, _) = service_with(&[vec![1.0, 1.0]]);
    service.build_index(IndexAlgorithm::KdTree).unwrap();

    let mut buf = Vec::new();
    service.save(&mut buf).unwrap();
    buf[0] = 42;

    assert_eq!(
        service
            .load(&mut std::io::Cursor::new(buf))
            .unwrap_err()
            .code(),
        "VCN-003"
    );
}

#[test]
fn test_crud_passthrough_marks_indexes_stale() {
    let (service, stored) = service_with(&[vec![1.0, 1.0], vec![2.0, 2.0]]);
    service.build_index(IndexAlgorithm::KdTree).unwrap();
    assert!(!service.is_index_stale(IndexAlgorithm::KdTree));

    let extra = Vector::new(vec![3.0, 3.0]).unwrap();
    service.add_vector(&extra).unwrap();
    assert!(service.is_index_stale(IndexAlgorithm::KdTree));
    assert_eq!(service.vectors().count(), 3);

    // Rebuilding refreshes the staleness mark.
    service.build_index(IndexAlgorithm::KdTree).unwrap();
    assert!(!service.is_index_stale(IndexAlgorithm::KdTree));

    assert!(service.remove_vector(&stored[0]));
    assert!(service.is_index_stale(IndexAlgorithm::KdTree));

    // A no-op remove does not invalidate anything.
    service.build_index(IndexAlgorithm::KdTree).unwrap();
    assert!(!service.remove_vector(&stored[0]));
    assert!(!service.is_index_stale(IndexAlgorithm::KdTree));
}

#[test]
fn test_update_vector_passthrough() {
    let (service, stored) = service_with(&[vec![1.0, 1.0]]);
    service.build_index(IndexAlgorithm::KdTree).unwrap();

    let replacement = Vector::new(vec![9.0, 9.0]).unwrap();
    assert!(service.update_vector(stored[0].id, &replacement).unwrap());
    assert!(service.is_index_stale(IndexAlgorithm::KdTree));
    assert!(service.vectors().contains(&replacement));

    // Unknown id: found=false, no staleness change after rebuild.
    service.build_index(IndexAlgorithm::KdTree).unwrap();
    assert!(!service.update_vector(stored[0].id, &replacement).unwrap());
    assert!(!service.is_index_stale(IndexAlgorithm::KdTree));
}

#[test]
fn test_unbuilt_index_is_not_stale() {
    let (service, _) = service_with(&[vec![1.0, 1.0]]);
    assert!(!service.is_index_stale(IndexAlgorithm::Hnsw));
}

#[test]
fn test_text_search_requires_generator() {
    let (service, _) = service_with(&[vec![1.0, 1.0]]);
    let err = service
        .search_text("hello", 3, IndexAlgorithm::Linear, None)
        .unwrap_err();
    assert_eq!(err.code(), "VCN-007");
}

#[test]
fn test_text_search_finds_matching_text() {
    let dim = 4;
    let embedder = StubEmbedder { dim };

    let list = Arc::new(VectorList::new(64).unwrap());
    let texts = ["alpha particle", "beta decay", "gamma ray burst"];
    for text in texts {
        let values = embedder.generate_embedding(text).unwrap();
        list.add(&Vector::with_text(values, text).unwrap()).unwrap();
    }

    let service = SearchService::new(list);
    service.set_embedding_generator(Box::new(StubEmbedder { dim }));

    let hits = service
        .search_text("beta decay", 1, IndexAlgorithm::Linear, None)
        .unwrap();
    assert!(!hits.is_empty());
    assert_eq!(hits[0].vector.original_text.as_deref(), Some("beta decay"));
    assert!(hits[0].distance < 1e-6);
}

#[test]
fn test_text_search_unions_prefix_matches() {
    let dim = 4;
    let embedder = StubEmbedder { dim };

    let list = Arc::new(VectorList::new(64).unwrap());
    // A record whose embedding is far from the query embedding but whose
    // text shares the query prefix.
    let far = Vector::with_text(vec![100.0, 100.0, 100.0, 100.0], "Alphabet soup").unwrap();
    list.add(&far).unwrap();
    let near_values = embedder.generate_embedding("alp").unwrap();
    let near = Vector::with_text(near_values, "unrelated text").unwrap();
    list.add(&near).unwrap();

    let service = SearchService::new(list);
    service.set_embedding_generator(Box::new(StubEmbedder { dim }));

    // "alp" is 3 chars: tau 0.9, short enough for the prefix union; the
    // prefix match is appended after the distance hits, case-insensitive.
    let hits = service
        .search_text("alp", 2, IndexAlgorithm::Linear, None)
        .unwrap();

    let ids: Vec<Uuid> = hits.iter().map(|h| h.vector.id).collect();
    assert!(ids.contains(&near.id));
    assert!(ids.contains(&far.id));
    assert_eq!(ids.last(), Some(&far.id));
}

#[test]
fn test_text_search_empty_text() {
    let (service, _) = service_with(&[vec![1.0, 1.0]]);
    service.set_embedding_generator(Box::new(StubEmbedder { dim: 2 }));
    assert_eq!(
        service
            .search_text("", 1, IndexAlgorithm::Linear, None)
            .unwrap_err()
            .code(),
        "VCN-001"
    );
}
