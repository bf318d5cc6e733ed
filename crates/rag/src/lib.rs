//! Hybrid Retrieval Client (C5): vector search via Qdrant, fulltext search
//! via Tantivy BM25, and an optional structured strategy, fused by
//! reciprocal-rank fusion with minimum-consensus gating and wrapped in a
//! stale-while-revalidate cache.

pub mod cache;
pub mod embeddings;
pub mod retriever;
pub mod sparse_search;
pub mod vector_store;

pub use cache::{CacheKey, CacheLookup, RetrievalCache};
pub use embeddings::{Embedder, EmbeddingConfig, SimpleEmbedder};
pub use retriever::{
    CachingRetrievalClient, FusionStats, HybridRetrievalClient, NullStructuredSearch,
    RetrievalRequest, RetrievalResponse, RetrievedItem, Strategy, StrategyStats, StructuredSearch,
};
pub use sparse_search::{SparseConfig, SparseIndex};
pub use vector_store::{VectorDistance, VectorStore, VectorStoreConfig};

use thiserror::Error;

#[derive(Error, Debug)]
pub enum RagError {
    #[error("embedding error: {0}")]
    Embedding(String),

    #[error("vector store error: {0}")]
    VectorStore(String),

    #[error("search error: {0}")]
    Search(String),

    #[error("model error: {0}")]
    Model(String),

    #[error("index error: {0}")]
    Index(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("connection error: {0}")]
    Connection(String),
}
