//! End-to-end matching scenarios: legacy import -> snapshot -> store -> decision.

use crate::embedding::snapshot::{self, Snapshot};
use crate::embedding::{classify, find_best_match, Decision, EmbeddingStore};

const THRESHOLD: f32 = 0.65;

/// The canonical two-entry store: `A__1` along the x axis, `B__2` along y.
fn two_entry_store() -> (tempfile::TempDir, EmbeddingStore) {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("embeddings.bin");

    let records =
        snapshot::import_legacy_json(br#"{"A__1": [1.0, 0.0, 0.0], "B__2": [0.0, 1.0, 0.0]}"#)
            .unwrap();

    let model_id = snapshot::model_id_hash("facenet");
    Snapshot::new(path.clone()).write(&records, 3, &model_id).unwrap();

    let store = EmbeddingStore::load(&path, &model_id, 3).unwrap();
    (dir, store)
}

#[test]
fn test_near_axis_query_identifies_a() {
    let (_dir, store) = two_entry_store();

    let result = find_best_match(&[0.9, 0.1, 0.0], &store).unwrap();
    let decision = classify(&result, THRESHOLD);

    match decision {
        Decision::Identified {
            category,
            file_id,
            score,
        } => {
            assert_eq!(category, "A");
            assert_eq!(file_id, "1");
            // cos(angle between [0.9,0.1,0] and [1,0,0]) ~= 0.9939
            assert!((score - 0.9939).abs() < 1e-3, "score was {score}");
        }
        Decision::Unknown { score } => panic!("expected identification, got unknown({score})"),
    }
}

#[test]
fn test_orthogonal_query_is_unknown() {
    let (_dir, store) = two_entry_store();

    let result = find_best_match(&[0.0, 0.0, 1.0], &store).unwrap();
    let decision = classify(&result, THRESHOLD);

    match decision {
        Decision::Unknown { score } => assert!(score.abs() < 1e-6, "score was {score}"),
        Decision::Identified { category, .. } => {
            panic!("orthogonal query identified '{category}'")
        }
    }
}

#[test]
fn test_stored_vector_queried_back_scores_one() {
    let (_dir, store) = two_entry_store();

    let result = find_best_match(&[0.0, 1.0, 0.0], &store).unwrap();
    assert_eq!(result.best.unwrap().category, "B");
    assert!((result.score - 1.0).abs() < 1e-6);
}

#[test]
fn test_wrong_model_snapshot_is_refused() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("embeddings.bin");

    let records = snapshot::import_legacy_json(br#"{"A__1": [1.0, 0.0, 0.0]}"#).unwrap();
    Snapshot::new(path.clone())
        .write(&records, 3, &snapshot::model_id_hash("facenet"))
        .unwrap();

    // server configured for a different extractor model
    let result = EmbeddingStore::load(&path, &snapshot::model_id_hash("arcface"), 3);
    assert!(result.is_err());
}

#[test]
fn test_query_dimension_skew_fails_loudly() {
    let (_dir, store) = two_entry_store();

    // a 128-dim extractor against a 3-dim store must never silently truncate
    let query = vec![0.5f32; 128];
    assert!(find_best_match(&query, &store).is_err());
}
