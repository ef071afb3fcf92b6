//! Embedding generation: fixed-tag prompt building, rate limiting, and
//! dispatch to the in-process model or the out-of-process worker.

mod local;
mod worker;

pub use local::LocalEmbedder;
pub use worker::WorkerClient;

use std::sync::Arc;

use tracing::debug;

use crate::limiter::RateLimiter;

/// Fixed embedding vector length.
pub const EMBEDDING_DIM: usize = 768;

/// Literal tag prepended to every embedded text (E5-family document
/// prefix).
pub const EMBED_TAG: &str = "passage: ";

/// Hard cap on the tagged prompt, in characters.
pub const MAX_EMBED_CHARS: usize = 8000;

/// Build the tagged prompt: `EMBED_TAG` plus the text, truncated to
/// exactly [`MAX_EMBED_CHARS`] characters when the tagged string runs
/// over. The tag is always kept intact.
pub(crate) fn build_prompt(text: &str) -> String {
    let mut prompt = String::with_capacity(EMBED_TAG.len() + text.len());
    prompt.push_str(EMBED_TAG);
    prompt.push_str(text);
    if prompt.chars().count() > MAX_EMBED_CHARS {
        prompt = prompt.chars().take(MAX_EMBED_CHARS).collect();
    }
    prompt
}

/// One embeddable string for a user/assistant turn pair, in the fixed
/// layout `User: …\n\nAssistant: …[\n\nTools: a, b, …]`. An empty tool
/// list omits the tools line.
pub fn exchange_text(user: &str, assistant: &str, tools: &[String]) -> String {
    let mut text = format!("User: {user}\n\nAssistant: {assistant}");
    if !tools.is_empty() {
        text.push_str("\n\nTools: ");
        text.push_str(&tools.join(", "));
    }
    text
}

/// Where vectors come from.
pub enum EmbeddingProducer {
    /// Model pipeline living in this process, initialized lazily once.
    Local(LocalEmbedder),
    /// Long-lived worker process reached over the wire protocol.
    Worker(WorkerClient),
}

/// Text → fixed-length vector, or absent.
///
/// Every call acquires a token from the embedding rate limiter before
/// dispatching. All transport and provider failures come back as `None`;
/// callers fall back to keyword search. The disabled form never consumes
/// a token and never touches a connection.
pub struct EmbeddingClient {
    producer: Option<EmbeddingProducer>,
    limiter: Arc<RateLimiter>,
}

impl EmbeddingClient {
    pub fn new(producer: EmbeddingProducer, limiter: Arc<RateLimiter>) -> Self {
        Self {
            producer: Some(producer),
            limiter,
        }
    }

    /// Client with embeddings disabled: every call returns `None` without
    /// attempting anything.
    pub fn disabled(limiter: Arc<RateLimiter>) -> Self {
        Self {
            producer: None,
            limiter,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.producer.is_some()
    }

    /// Embed one text. `None` means "no vector" (disabled embeddings, an
    /// unreachable worker, a provider error) and is an expected outcome,
    /// never an error.
    pub async fn embed(&self, text: &str) -> Option<Vec<f32>> {
        let Some(producer) = &self.producer else {
            debug!("embeddings disabled, returning no vector");
            return None;
        };
        let prompt = build_prompt(text);
        self.limiter.acquire().await;
        match producer {
            EmbeddingProducer::Local(local) => local.embed(prompt).await,
            EmbeddingProducer::Worker(worker) => worker.embed(&prompt).await,
        }
    }

    /// Embed a user/assistant turn pair plus an optional tool-name list,
    /// through the same tagged/limited path as [`embed`](Self::embed).
    pub async fn embed_exchange(
        &self,
        user: &str,
        assistant: &str,
        tools: &[String],
    ) -> Option<Vec<f32>> {
        self.embed(&exchange_text(user, assistant, tools)).await
    }
}
