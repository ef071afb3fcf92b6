//! Service wiring: one object that owns the store, the per-class rate
//! limiters, the embedding client, and the search engine.

use std::sync::Arc;

use anyhow::Result;
use tracing::info;

use crate::config::{ProducerKind, Settings};
use crate::embedding::{EmbeddingClient, EmbeddingProducer, LocalEmbedder, WorkerClient};
use crate::search::{QueryRewriter, ScoredObservation, SearchEngine};
use crate::store::{
    NewObservation, NewPendingEvent, Observation, ObservationStore, PendingEvent, SearchFilters,
};

/// The retrieval core, assembled once from [`Settings`].
///
/// The embedding and LLM rate limiters are constructed here and handed to
/// the components that gate on them; nothing in the crate holds global
/// state.
pub struct MemoryService {
    store: Arc<ObservationStore>,
    embeddings: Arc<EmbeddingClient>,
    engine: SearchEngine,
}

impl MemoryService {
    /// Open the store at the configured location and wire every component.
    pub fn open(settings: &Settings) -> Result<Self> {
        let store = Arc::new(ObservationStore::open(settings.db_path())?);
        Ok(Self::with_store(settings, store))
    }

    /// Same wiring over an ephemeral in-memory store.
    pub fn open_in_memory(settings: &Settings) -> Result<Self> {
        let store = Arc::new(ObservationStore::open_in_memory()?);
        Ok(Self::with_store(settings, store))
    }

    fn with_store(settings: &Settings, store: Arc<ObservationStore>) -> Self {
        let embed_limiter = Arc::new(settings.embedding.build_limiter());
        let llm_limiter = Arc::new(settings.llm.build_limiter());

        let embeddings = if settings.disable_embeddings {
            info!("embeddings disabled by configuration");
            EmbeddingClient::disabled(embed_limiter)
        } else {
            let producer = match settings.embedding_producer {
                ProducerKind::Local => EmbeddingProducer::Local(LocalEmbedder::new()),
                ProducerKind::Worker => {
                    EmbeddingProducer::Worker(WorkerClient::new(settings.worker_addr()))
                }
            };
            EmbeddingClient::new(producer, embed_limiter)
        };
        let embeddings = Arc::new(embeddings);

        let engine = SearchEngine::new(Arc::clone(&store), Arc::clone(&embeddings), llm_limiter);
        Self {
            store,
            embeddings,
            engine,
        }
    }

    /// Install the optional query normalizer.
    pub fn with_rewriter(mut self, rewriter: Box<dyn QueryRewriter>) -> Self {
        self.engine = self.engine.with_rewriter(rewriter);
        self
    }

    /// Ingest one observation: embed its title and content (the vector is
    /// simply absent when the provider fails or embeddings are disabled)
    /// and insert. Returns the store-assigned id.
    pub async fn remember(&self, obs: NewObservation) -> Result<i64> {
        let text = format!("{}\n\n{}", obs.title, obs.content);
        let vector = self.embeddings.embed(&text).await;
        self.store.insert_observation(&obs, vector.as_deref())
    }

    /// Stage one raw event for later promotion by the upstream pipeline.
    pub fn record_event(&self, event: NewPendingEvent) -> Result<i64> {
        self.store.insert_pending_event(&event)
    }

    pub fn pending_events(&self, session_id: &str) -> Result<Vec<PendingEvent>> {
        self.store.pending_events(session_id)
    }

    pub fn get(&self, id: i64) -> Result<Option<Observation>> {
        self.store.get_observation(id)
    }

    /// Newest observations by event timestamp.
    pub fn recent(&self, limit: usize, filters: &SearchFilters) -> Result<Vec<Observation>> {
        self.store.recent(limit, filters)
    }

    pub async fn search(
        &self,
        query: &str,
        limit: usize,
        filters: &SearchFilters,
    ) -> Result<Vec<Observation>> {
        self.engine.search(query, limit, filters).await
    }

    pub async fn search_scored(
        &self,
        query: &str,
        limit: usize,
        filters: &SearchFilters,
    ) -> Result<Vec<ScoredObservation>> {
        self.engine.search_scored(query, limit, filters).await
    }

    pub fn store(&self) -> &ObservationStore {
        &self.store
    }

    pub fn embeddings(&self) -> &EmbeddingClient {
        &self.embeddings
    }
}
