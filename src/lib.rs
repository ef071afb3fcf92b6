pub mod config;
pub mod embedding;
pub mod limiter;
pub mod search;
pub mod service;
pub mod store;

pub use config::{ProducerKind, RateSettings, Settings};
pub use embedding::{
    EmbeddingClient, EmbeddingProducer, LocalEmbedder, WorkerClient, EMBEDDING_DIM,
};
pub use limiter::RateLimiter;
pub use search::{recency_boost, QueryRewriter, ScoredObservation, SearchEngine};
pub use service::MemoryService;
pub use store::{
    FilterError, NewObservation, NewPendingEvent, Observation, ObservationStore, PendingEvent,
    SearchFilters,
};
