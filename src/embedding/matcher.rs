//! Cosine-similarity matcher and threshold decision policy.

use serde::Serialize;

use crate::embedding::store::{EmbeddingRecord, EmbeddingStore};

/// Sentinel score for "no candidate could be scored". Outside the cosine
/// range, so it always falls below any sane threshold.
pub const NO_MATCH_SCORE: f32 = -1.0;

#[derive(Debug, thiserror::Error)]
pub enum MatchError {
    #[error("query has dimension {got}, store expects {expected}")]
    DimensionMismatch { expected: usize, got: usize },
}

/// Best-scoring entry of a single scan. `best` is `None` for an empty store
/// or a query no entry could be scored against.
#[derive(Debug, Clone)]
pub struct MatchResult<'a> {
    pub best: Option<&'a EmbeddingRecord>,
    pub score: f32,
}

/// Outcome of applying the acceptance threshold to a match result.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "decision", rename_all = "snake_case")]
pub enum Decision {
    Identified {
        category: String,
        file_id: String,
        score: f32,
    },
    Unknown {
        score: f32,
    },
}

/// Scan the whole store once and return the entry with the highest cosine
/// similarity to `query`.
///
/// Ties go to the earliest entry in load order: the running best is only
/// replaced on a strictly greater score. Zero-norm vectors have no defined
/// cosine and are never selected; a zero-norm query therefore yields the
/// sentinel result.
pub fn find_best_match<'a>(
    query: &[f32],
    store: &'a EmbeddingStore,
) -> Result<MatchResult<'a>, MatchError> {
    if query.len() != store.dimensions() {
        return Err(MatchError::DimensionMismatch {
            expected: store.dimensions(),
            got: query.len(),
        });
    }

    let query_norm = l2_norm(query);
    if query_norm < f32::EPSILON {
        return Ok(MatchResult {
            best: None,
            score: NO_MATCH_SCORE,
        });
    }

    let mut best: Option<&EmbeddingRecord> = None;
    let mut best_score = NO_MATCH_SCORE;

    for record in store.entries() {
        let record_norm = l2_norm(&record.vector);
        if record_norm < f32::EPSILON {
            // undefined cosine, never a match
            continue;
        }

        let dot: f32 = query
            .iter()
            .zip(record.vector.iter())
            .map(|(a, b)| a * b)
            .sum();
        let score = dot / (query_norm * record_norm);

        if score > best_score {
            best_score = score;
            best = Some(record);
        }
    }

    Ok(MatchResult {
        best,
        score: best_score,
    })
}

/// Apply the acceptance threshold.
///
/// Strict `<` is the only rejection condition: a score exactly at the
/// threshold is identified. The empty-store sentinel is below any threshold
/// in [0, 1] and classifies as unknown.
pub fn classify(result: &MatchResult, threshold: f32) -> Decision {
    match result.best {
        Some(record) if result.score >= threshold => Decision::Identified {
            category: record.category.clone(),
            file_id: record.file_id.clone(),
            score: result.score,
        },
        _ => Decision::Unknown {
            score: result.score,
        },
    }
}

/// Cosine similarity between two equal-length vectors, in [-1, 1].
/// Returns the sentinel for zero-norm inputs.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let norm_a = l2_norm(a);
    let norm_b = l2_norm(b);
    if norm_a < f32::EPSILON || norm_b < f32::EPSILON {
        return NO_MATCH_SCORE;
    }
    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    dot / (norm_a * norm_b)
}

fn l2_norm(v: &[f32]) -> f32 {
    v.iter().map(|x| x * x).sum::<f32>().sqrt()
}
