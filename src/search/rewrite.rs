//! Query normalization seam

use anyhow::Result;
use async_trait::async_trait;

/// Text-completion collaborator that rewrites a raw query into a cleaner
/// search phrase before retrieval.
///
/// The engine treats a failed or empty rewrite as "keep the original
/// query"; implementations should not retry on their own.
#[async_trait]
pub trait QueryRewriter: Send + Sync {
    async fn rewrite(&self, query: &str) -> Result<String>;
}
