//! Hybrid search: vector retrieval, keyword fallback, recency re-ranking

pub mod engine;
pub mod recency;
pub mod rewrite;

pub use engine::{ScoredObservation, SearchEngine};
pub use recency::recency_boost;
pub use rewrite::QueryRewriter;
