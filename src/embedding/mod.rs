//! Face embedding store and matcher.
//!
//! The reference embeddings are loaded once at startup from a binary snapshot
//! and never mutated afterwards, so request handlers share the store without
//! locking.

pub mod matcher;
pub mod snapshot;
pub mod store;

pub use matcher::{classify, find_best_match, Decision, MatchError, MatchResult};
pub use store::{EmbeddingRecord, EmbeddingStore, LoadError};
