//! Immutable, insertion-ordered collection of reference embeddings.

use std::path::Path;

use crate::embedding::snapshot::{Snapshot, SnapshotError};

/// A single reference embedding.
///
/// `category` is the identity (the dataset folder), `file_id` the source image
/// inside it. `file_id` may be empty for legacy entries that carried no
/// filename.
#[derive(Debug, Clone, PartialEq)]
pub struct EmbeddingRecord {
    pub category: String,
    pub file_id: String,
    pub vector: Vec<f32>,
}

impl EmbeddingRecord {
    /// Human-readable key for logs and errors.
    pub fn key(&self) -> String {
        format!("{}/{}", self.category, self.file_id)
    }
}

/// Errors raised while building or loading the store.
#[derive(Debug, thiserror::Error)]
pub enum LoadError {
    #[error("snapshot error: {0}")]
    Snapshot(#[from] SnapshotError),

    #[error("entry '{key}' has dimension {got}, store expects {expected}")]
    DimensionMismatch {
        key: String,
        expected: usize,
        got: usize,
    },

    #[error("entry '{key}' has zero norm, cosine similarity is undefined for it")]
    ZeroNormVector { key: String },

    #[error("snapshot contains no embeddings")]
    Empty,
}

/// Read-only embedding collection.
///
/// Entries keep their load order (a `Vec`), which makes the matcher's
/// first-wins tie-break deterministic.
pub struct EmbeddingStore {
    records: Vec<EmbeddingRecord>,
    dimensions: usize,
}

impl EmbeddingStore {
    /// Create an empty store with a fixed dimension.
    pub fn new(dimensions: usize) -> Self {
        Self {
            records: Vec::new(),
            dimensions,
        }
    }

    /// Build a store from records, validating each entry.
    pub fn from_records(
        dimensions: usize,
        records: Vec<EmbeddingRecord>,
    ) -> Result<Self, LoadError> {
        let mut store = Self::new(dimensions);
        for record in records {
            store.push(record)?;
        }
        Ok(store)
    }

    /// Append a record. Rejects dimension mismatches and zero-norm vectors:
    /// both would make the similarity scan ill-defined.
    pub fn push(&mut self, record: EmbeddingRecord) -> Result<(), LoadError> {
        if record.vector.len() != self.dimensions {
            return Err(LoadError::DimensionMismatch {
                key: record.key(),
                expected: self.dimensions,
                got: record.vector.len(),
            });
        }

        let norm: f32 = record.vector.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm < f32::EPSILON {
            return Err(LoadError::ZeroNormVector { key: record.key() });
        }

        self.records.push(record);
        Ok(())
    }

    /// Load the store from a binary snapshot.
    ///
    /// `expected_model_id` is the SHA256 of the extractor model name; a
    /// mismatch means the snapshot was produced by a different model and the
    /// scores would be meaningless.
    pub fn load(
        path: &Path,
        expected_model_id: &[u8; 32],
        expected_dimensions: usize,
    ) -> Result<Self, LoadError> {
        let snapshot = Snapshot::new(path.to_path_buf());
        let records = snapshot.read(expected_model_id, expected_dimensions)?;

        if records.is_empty() {
            return Err(LoadError::Empty);
        }

        let store = Self::from_records(expected_dimensions, records)?;
        log::info!(
            "loaded {} reference embeddings ({} dims) from {}",
            store.len(),
            store.dimensions(),
            path.display()
        );
        Ok(store)
    }

    /// Restartable scan over all entries, in load order.
    pub fn entries(&self) -> impl Iterator<Item = &EmbeddingRecord> {
        self.records.iter()
    }

    pub fn dimensions(&self) -> usize {
        self.dimensions
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(category: &str, file_id: &str, vector: Vec<f32>) -> EmbeddingRecord {
        EmbeddingRecord {
            category: category.to_string(),
            file_id: file_id.to_string(),
            vector,
        }
    }

    #[test]
    fn test_push_and_iterate_in_order() {
        let mut store = EmbeddingStore::new(3);
        store.push(record("A", "1.jpg", vec![1.0, 0.0, 0.0])).unwrap();
        store.push(record("B", "2.jpg", vec![0.0, 1.0, 0.0])).unwrap();

        let categories: Vec<&str> = store.entries().map(|r| r.category.as_str()).collect();
        assert_eq!(categories, vec!["A", "B"]);
        assert_eq!(store.len(), 2);
        assert_eq!(store.dimensions(), 3);
    }

    #[test]
    fn test_push_rejects_wrong_dimension() {
        let mut store = EmbeddingStore::new(3);
        let result = store.push(record("A", "1.jpg", vec![1.0, 0.0]));
        assert!(matches!(result, Err(LoadError::DimensionMismatch { .. })));
        assert!(store.is_empty());
    }

    #[test]
    fn test_push_rejects_zero_norm() {
        let mut store = EmbeddingStore::new(3);
        let result = store.push(record("A", "1.jpg", vec![0.0, 0.0, 0.0]));
        assert!(matches!(result, Err(LoadError::ZeroNormVector { .. })));
    }

    #[test]
    fn test_from_records_validates_every_entry() {
        let records = vec![
            record("A", "1.jpg", vec![1.0, 0.0, 0.0]),
            record("B", "2.jpg", vec![0.0, 1.0]),
        ];
        let result = EmbeddingStore::from_records(3, records);
        assert!(matches!(result, Err(LoadError::DimensionMismatch { .. })));
    }

    #[test]
    fn test_load_rejects_empty_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("embeddings.bin");

        let snapshot = Snapshot::new(path.clone());
        snapshot.write(&[], 128, &[0u8; 32]).unwrap();

        let result = EmbeddingStore::load(&path, &[0u8; 32], 128);
        assert!(matches!(result, Err(LoadError::Empty)));
    }

    #[test]
    fn test_load_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("embeddings.bin");

        let records = vec![
            record("A", "1.jpg", vec![1.0, 0.0, 0.0]),
            record("B", "2.jpg", vec![0.0, 1.0, 0.0]),
        ];
        let model_id = [7u8; 32];

        let snapshot = Snapshot::new(path.clone());
        snapshot.write(&records, 3, &model_id).unwrap();

        let store = EmbeddingStore::load(&path, &model_id, 3).unwrap();
        assert_eq!(store.len(), 2);
        let loaded: Vec<&EmbeddingRecord> = store.entries().collect();
        assert_eq!(loaded[0].category, "A");
        assert_eq!(loaded[1].file_id, "2.jpg");
        assert_eq!(loaded[1].vector, vec![0.0, 1.0, 0.0]);
    }
}
