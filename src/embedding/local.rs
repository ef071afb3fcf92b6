//! In-process embedding model

use std::sync::Arc;

use anyhow::{Context, Result};
use fastembed::{EmbeddingModel, InitOptions, TextEmbedding};
use tokio::sync::OnceCell;
use tracing::{info, warn};

use super::EMBEDDING_DIM;

/// Lazily initialized in-process model pipeline.
///
/// The model loads exactly once, on first use; concurrent callers share
/// the single initialization and the pipeline is reused for every
/// subsequent call.
pub struct LocalEmbedder {
    model: OnceCell<Arc<TextEmbedding>>,
}

impl LocalEmbedder {
    pub fn new() -> Self {
        Self {
            model: OnceCell::new(),
        }
    }

    async fn model(&self) -> Result<&Arc<TextEmbedding>> {
        self.model
            .get_or_try_init(|| async {
                info!("Initializing local embedding model");
                tokio::task::spawn_blocking(|| {
                    let mut options = InitOptions::default();
                    options.model_name = EmbeddingModel::MultilingualE5Base;
                    options.show_download_progress = false;
                    TextEmbedding::try_new(options)
                        .map(Arc::new)
                        .context("Failed to initialize embedding model")
                })
                .await
                .context("Embedding model init task failed")?
            })
            .await
    }

    /// Embed one tagged prompt. Any failure is reported as absent.
    pub async fn embed(&self, prompt: String) -> Option<Vec<f32>> {
        let model = match self.model().await {
            Ok(model) => Arc::clone(model),
            Err(err) => {
                warn!(error = %err, "embedding model unavailable");
                return None;
            }
        };

        let result = tokio::task::spawn_blocking(move || model.embed(vec![prompt], None)).await;
        match result {
            Ok(Ok(mut vectors)) if !vectors.is_empty() => {
                let vector = vectors.remove(0);
                if vector.len() == EMBEDDING_DIM {
                    Some(vector)
                } else {
                    warn!(dims = vector.len(), "unexpected embedding dimension");
                    None
                }
            }
            Ok(Ok(_)) => {
                warn!("model returned no embedding");
                None
            }
            Ok(Err(err)) => {
                warn!(error = %err, "embedding inference failed");
                None
            }
            Err(err) => {
                warn!(error = %err, "embedding task failed");
                None
            }
        }
    }
}

impl Default for LocalEmbedder {
    fn default() -> Self {
        Self::new()
    }
}
