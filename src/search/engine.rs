//! Hybrid search engine: vector retrieval with keyword fallback

use std::cmp::Ordering;
use std::collections::HashSet;
use std::sync::Arc;

use anyhow::Result;
use chrono::Utc;
use serde::Serialize;
use tracing::{debug, warn};

use crate::embedding::EmbeddingClient;
use crate::limiter::RateLimiter;
use crate::store::{Observation, ObservationStore, SearchFilters};

use super::recency::{age_days, recency_boost};
use super::rewrite::QueryRewriter;

/// An observation with the boosted similarity that ranked it. Keyword
/// backfill rows carry no similarity.
#[derive(Debug, Clone, Serialize)]
pub struct ScoredObservation {
    pub observation: Observation,
    pub similarity: Option<f32>,
}

/// Orchestrates query normalization, vector search, keyword fallback,
/// id de-duplication, and recency-weighted re-ranking into one ordered
/// result list.
///
/// The policy is fixed: vector hits come first (ascending distance) and
/// short-circuit the keyword pass whenever they fill the limit; keyword
/// hits (descending timestamp) only ever backfill. The two segments never
/// interleave.
pub struct SearchEngine {
    store: Arc<ObservationStore>,
    embeddings: Arc<EmbeddingClient>,
    llm_limiter: Arc<RateLimiter>,
    rewriter: Option<Box<dyn QueryRewriter>>,
}

impl SearchEngine {
    pub fn new(
        store: Arc<ObservationStore>,
        embeddings: Arc<EmbeddingClient>,
        llm_limiter: Arc<RateLimiter>,
    ) -> Self {
        Self {
            store,
            embeddings,
            llm_limiter,
            rewriter: None,
        }
    }

    /// Install the optional query normalizer. Its calls are gated by the
    /// LLM rate limiter.
    pub fn with_rewriter(mut self, rewriter: Box<dyn QueryRewriter>) -> Self {
        self.rewriter = Some(rewriter);
        self
    }

    async fn normalize(&self, query: &str) -> String {
        let Some(rewriter) = &self.rewriter else {
            return query.to_string();
        };
        self.llm_limiter.acquire().await;
        match rewriter.rewrite(query).await {
            Ok(rewritten) if !rewritten.trim().is_empty() => {
                debug!(original = query, rewritten = %rewritten, "normalized query");
                rewritten
            }
            Ok(_) => {
                debug!("query rewrite came back empty, keeping original");
                query.to_string()
            }
            Err(err) => {
                warn!(error = %err, "query rewrite failed, keeping original");
                query.to_string()
            }
        }
    }

    /// Shared retrieval pass: the vector segment (with distances) and the
    /// keyword backfill, already de-duplicated by id and capped at
    /// `limit` combined rows.
    async fn run(
        &self,
        query: &str,
        limit: usize,
        filters: &SearchFilters,
    ) -> Result<(Vec<(Observation, f32)>, Vec<Observation>)> {
        let normalized = self.normalize(query).await;

        let mut vector_hits = Vec::new();
        if let Some(vector) = self.embeddings.embed(&normalized).await {
            vector_hits = self.store.vector_search(&vector, limit, filters)?;
        } else {
            debug!("no query vector, relying on keyword search");
        }

        if vector_hits.len() >= limit {
            vector_hits.truncate(limit);
            return Ok((vector_hits, Vec::new()));
        }

        let seen: HashSet<i64> = vector_hits.iter().map(|(obs, _)| obs.id).collect();
        let mut keyword_hits = Vec::new();
        for obs in self.store.keyword_search(&normalized, filters)? {
            if vector_hits.len() + keyword_hits.len() >= limit {
                break;
            }
            if !seen.contains(&obs.id) {
                keyword_hits.push(obs);
            }
        }
        debug!(
            vector = vector_hits.len(),
            keyword = keyword_hits.len(),
            "hybrid search complete"
        );
        Ok((vector_hits, keyword_hits))
    }

    /// Hybrid search returning plain rows: vector hits ascending by
    /// distance, then keyword hits descending by timestamp.
    pub async fn search(
        &self,
        query: &str,
        limit: usize,
        filters: &SearchFilters,
    ) -> Result<Vec<Observation>> {
        let (vector_hits, keyword_hits) = self.run(query, limit, filters).await?;
        let mut results: Vec<Observation> =
            vector_hits.into_iter().map(|(obs, _)| obs).collect();
        results.extend(keyword_hits);
        Ok(results)
    }

    /// Similarity-bearing variant: vector hits carry
    /// `1 / (1 + distance)` scaled by the recency boost of their event
    /// time and are re-ordered by that boosted similarity (stable on
    /// ties); keyword backfill follows unscored.
    pub async fn search_scored(
        &self,
        query: &str,
        limit: usize,
        filters: &SearchFilters,
    ) -> Result<Vec<ScoredObservation>> {
        let (vector_hits, keyword_hits) = self.run(query, limit, filters).await?;
        let now = Utc::now().timestamp_millis();

        let mut scored: Vec<ScoredObservation> = vector_hits
            .into_iter()
            .map(|(observation, distance)| {
                let similarity = 1.0 / (1.0 + distance);
                let boosted = similarity * recency_boost(age_days(observation.timestamp, now));
                ScoredObservation {
                    observation,
                    similarity: Some(boosted),
                }
            })
            .collect();
        scored.sort_by(|a, b| {
            b.similarity
                .partial_cmp(&a.similarity)
                .unwrap_or(Ordering::Equal)
        });

        scored.extend(keyword_hits.into_iter().map(|observation| ScoredObservation {
            observation,
            similarity: None,
        }));
        Ok(scored)
    }
}
