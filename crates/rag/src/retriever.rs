//! Hybrid Retrieval Client (C5)
//!
//! Dispatches a query across the vector, fulltext and structured strategies
//! concurrently, fuses the result lists by reciprocal-rank fusion gated on a
//! minimum-consensus count, and enforces a soft/hard timeout budget so a slow
//! strategy degrades the result set instead of the whole call.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use voice_agent_config::{RagConfig, RetrievalConfig};

use crate::sparse_search::SparseIndex;
use crate::vector_store::{SearchFilter, VectorStore};
use crate::RagError;

/// One of the three retrieval strategies a request may ask for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Strategy {
    Vector,
    Fulltext,
    Structured,
}

impl Strategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Strategy::Vector => "vector",
            Strategy::Fulltext => "fulltext",
            Strategy::Structured => "structured",
        }
    }
}

/// A site's structured-data lookup (catalog rows, FAQ entries, ...), brokered
/// behind a trait the same way an event sink backend is behind `EventSink` —
/// no concrete backend is vendored, callers plug one in per deployment.
#[async_trait]
pub trait StructuredSearch: Send + Sync {
    async fn search(&self, query: &str, top_k: usize) -> Result<Vec<RetrievedItem>, RagError>;
}

/// No structured source configured: the strategy contributes nothing and is
/// not counted toward `strategies.totalExecuted`.
pub struct NullStructuredSearch;

#[async_trait]
impl StructuredSearch for NullStructuredSearch {
    async fn search(&self, _query: &str, _top_k: usize) -> Result<Vec<RetrievedItem>, RagError> {
        Ok(Vec::new())
    }
}

#[derive(Debug, Clone)]
pub struct RetrievalRequest {
    pub tenant_id: String,
    pub site_id: String,
    pub query: String,
    pub top_k: usize,
    pub locale: String,
    pub strategies: Vec<Strategy>,
}

#[derive(Debug, Clone, Default)]
pub struct RetrievedItem {
    pub id: String,
    pub content: String,
    pub url: Option<String>,
    pub title: Option<String>,
    pub score: f32,
    pub relevant_snippet: String,
    pub metadata: HashMap<String, String>,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct StrategyStats {
    pub total_executed: usize,
    pub timed_out: bool,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct FusionStats {
    pub combined_count: usize,
}

#[derive(Debug, Clone, Default)]
pub struct RetrievalResponse {
    pub items: Vec<RetrievedItem>,
    pub strategies: StrategyStats,
    pub fusion: FusionStats,
}

/// C5 entrypoint: fuses vector (qdrant), fulltext (tantivy) and an optional
/// structured strategy behind one timeout-bounded call.
pub struct HybridRetrievalClient {
    vector_store: Option<Arc<VectorStore>>,
    sparse_index: Option<Arc<SparseIndex>>,
    structured: Arc<dyn StructuredSearch>,
    rag_config: RagConfig,
    retrieval_config: RetrievalConfig,
}

impl HybridRetrievalClient {
    pub fn new(rag_config: RagConfig, retrieval_config: RetrievalConfig) -> Self {
        Self {
            vector_store: None,
            sparse_index: None,
            structured: Arc::new(NullStructuredSearch),
            rag_config,
            retrieval_config,
        }
    }

    pub fn with_vector_store(mut self, store: Arc<VectorStore>) -> Self {
        self.vector_store = Some(store);
        self
    }

    pub fn with_sparse_index(mut self, index: Arc<SparseIndex>) -> Self {
        self.sparse_index = Some(index);
        self
    }

    pub fn with_structured_search(mut self, structured: Arc<dyn StructuredSearch>) -> Self {
        self.structured = structured;
        self
    }

    pub async fn search(&self, request: &RetrievalRequest) -> Result<RetrievalResponse, RagError> {
        let soft = Duration::from_millis(self.retrieval_config.soft_timeout_ms);
        let hard = Duration::from_millis(self.retrieval_config.hard_timeout_ms);

        let mut runs = Vec::new();
        for strategy in &request.strategies {
            let fut = self.dispatch(*strategy, request);
            runs.push(Self::run_timed(*strategy, fut, soft, hard));
        }

        let outcomes = futures::future::join_all(runs).await;

        let mut by_strategy: Vec<(Strategy, Vec<RetrievedItem>)> = Vec::new();
        let mut timed_out = false;
        for (strategy, items, exceeded) in outcomes {
            timed_out |= exceeded;
            if let Some(items) = items {
                by_strategy.push((strategy, items));
            }
        }

        let total_executed = by_strategy.len();
        let (fused, combined_count) = self.fuse(by_strategy, total_executed);

        let items: Vec<RetrievedItem> = fused
            .into_iter()
            .take(request.top_k.max(1))
            .map(|mut item| {
                item.relevant_snippet =
                    make_snippet(&item.content, &request.query, self.rag_config.snippet_max_chars);
                item
            })
            .collect();

        Ok(RetrievalResponse {
            items,
            strategies: StrategyStats { total_executed, timed_out },
            fusion: FusionStats { combined_count },
        })
    }

    async fn dispatch(&self, strategy: Strategy, request: &RetrievalRequest) -> Result<Vec<RetrievedItem>, RagError> {
        match strategy {
            Strategy::Vector => self.search_vector(&request.query).await,
            Strategy::Fulltext => self.search_fulltext(&request.query),
            Strategy::Structured => self.structured.search(&request.query, self.rag_config.dense_top_k).await,
        }
    }

    async fn search_vector(&self, query: &str) -> Result<Vec<RetrievedItem>, RagError> {
        let store = match &self.vector_store {
            Some(s) => s,
            None => return Ok(Vec::new()),
        };

        let embedder = crate::embeddings::SimpleEmbedder::new(crate::embeddings::EmbeddingConfig {
            embedding_dim: self.rag_config.vector_dim,
            ..Default::default()
        });
        let query_owned = query.to_string();
        let embedding = tokio::task::spawn_blocking(move || embedder.embed(&query_owned))
            .await
            .map_err(|e| RagError::Embedding(format!("embedding task failed: {e}")))?;

        let top_k = self.rag_config.dense_top_k;
        let results = store.search(&embedding, top_k, Option::<SearchFilter>::None).await?;
        Ok(results.into_iter().map(|r| from_metadata(r.id, r.content, r.score, r.metadata)).collect())
    }

    fn search_fulltext(&self, query: &str) -> Result<Vec<RetrievedItem>, RagError> {
        let index = match &self.sparse_index {
            Some(i) => i,
            None => return Ok(Vec::new()),
        };
        let top_k = self.rag_config.sparse_top_k;
        let results = index.search(query, Some(top_k))?;
        Ok(results.into_iter().map(|r| from_metadata(r.id, r.content, r.score, r.metadata)).collect())
    }

    /// RRF fusion gated on minimum-consensus: an item must appear in at least
    /// `min(min_consensus, total_executed)` strategy result lists to survive.
    /// If fewer strategies executed than the configured minimum, the gate
    /// relaxes to 1 so a degraded call still returns something.
    fn fuse(&self, by_strategy: Vec<(Strategy, Vec<RetrievedItem>)>, total_executed: usize) -> (Vec<RetrievedItem>, usize) {
        let rrf_k = self.rag_config.rrf_k as f32;
        let required = self.rag_config.min_consensus.min(total_executed.max(1)).max(1);

        let mut scored: HashMap<String, (f32, usize, RetrievedItem)> = HashMap::new();
        for (_, items) in &by_strategy {
            for (rank, item) in items.iter().enumerate() {
                let rrf_score = 1.0 / (rrf_k + rank as f32 + 1.0);
                scored
                    .entry(item.id.clone())
                    .and_modify(|(score, count, _)| {
                        *score += rrf_score;
                        *count += 1;
                    })
                    .or_insert((rrf_score, 1, item.clone()));
            }
        }

        let combined_count = scored.len();
        let min_score = self.rag_config.min_score as f32;

        let mut results: Vec<RetrievedItem> = scored
            .into_values()
            .filter(|(_, count, _)| *count >= required)
            .map(|(score, _, mut item)| {
                item.score = score;
                item
            })
            .filter(|item| item.score >= min_score)
            .collect();

        results.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        (results, combined_count)
    }

    async fn run_timed<F>(strategy: Strategy, fut: F, soft: Duration, hard: Duration) -> (Strategy, Option<Vec<RetrievedItem>>, bool)
    where
        F: std::future::Future<Output = Result<Vec<RetrievedItem>, RagError>>,
    {
        let start = tokio::time::Instant::now();
        match tokio::time::timeout(hard, fut).await {
            Ok(Ok(items)) => {
                let exceeded_soft = start.elapsed() > soft;
                if exceeded_soft {
                    tracing::warn!(strategy = strategy.as_str(), "retrieval strategy exceeded soft timeout");
                }
                (strategy, Some(items), exceeded_soft)
            }
            Ok(Err(e)) => {
                tracing::warn!(strategy = strategy.as_str(), error = %e, "retrieval strategy failed");
                (strategy, None, false)
            }
            Err(_) => {
                tracing::warn!(strategy = strategy.as_str(), "retrieval strategy hit hard timeout");
                (strategy, None, true)
            }
        }
    }
}

/// Wraps a [`HybridRetrievalClient`] with the stale-while-revalidate cache:
/// a fresh hit returns immediately, a stale hit returns immediately while a
/// background task refreshes the entry, and a miss computes synchronously.
pub struct CachingRetrievalClient {
    inner: Arc<HybridRetrievalClient>,
    cache: Arc<crate::cache::RetrievalCache>,
}

impl CachingRetrievalClient {
    pub fn new(inner: Arc<HybridRetrievalClient>, ttl: Duration) -> Self {
        Self { inner, cache: Arc::new(crate::cache::RetrievalCache::new(ttl)) }
    }

    pub async fn search(&self, request: RetrievalRequest) -> Result<Arc<RetrievalResponse>, RagError> {
        let key = crate::cache::CacheKey::new(&request.tenant_id, &request.site_id, &request.query, &request.locale);

        if let Some(lookup) = self.cache.get(&key) {
            if lookup.stale {
                let inner = Arc::clone(&self.inner);
                let cache = Arc::clone(&self.cache);
                let refresh_request = request.clone();
                let refresh_key = key.clone();
                tokio::spawn(async move {
                    match inner.search(&refresh_request).await {
                        Ok(fresh) => cache.insert(refresh_key, Arc::new(fresh)),
                        Err(e) => tracing::warn!(error = %e, "background retrieval cache refresh failed"),
                    }
                });
            }
            return Ok(lookup.response);
        }

        let response = Arc::new(self.inner.search(&request).await?);
        self.cache.insert(key, Arc::clone(&response));
        Ok(response)
    }
}

fn from_metadata(id: String, content: String, score: f32, mut metadata: HashMap<String, String>) -> RetrievedItem {
    let title = metadata.remove("title");
    let url = metadata.remove("url");
    RetrievedItem { id, content, url, title, score, relevant_snippet: String::new(), metadata }
}

fn make_snippet(content: &str, query: &str, max_chars: usize) -> String {
    let lower_content = content.to_lowercase();
    let first_term = query.split_whitespace().next().unwrap_or("").to_lowercase();

    let start = if !first_term.is_empty() {
        lower_content.find(&first_term).unwrap_or(0)
    } else {
        0
    };

    let window_start = start.saturating_sub(max_chars / 4);
    let slice: String = content.chars().skip(char_index(content, window_start)).take(max_chars).collect();

    if slice.chars().count() >= max_chars.min(content.chars().count()) {
        slice
    } else {
        content.chars().take(max_chars).collect()
    }
}

fn char_index(s: &str, byte_offset: usize) -> usize {
    s.char_indices().take_while(|(i, _)| *i < byte_offset).count()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(id: &str, content: &str, score: f32) -> RetrievedItem {
        RetrievedItem { id: id.to_string(), content: content.to_string(), score, ..Default::default() }
    }

    #[test]
    fn fuse_requires_minimum_consensus() {
        let client = HybridRetrievalClient::new(RagConfig::default(), RetrievalConfig::default());
        let vector = vec![item("1", "a", 0.9), item("2", "b", 0.8)];
        let fulltext = vec![item("2", "b", 0.7), item("3", "c", 0.6)];

        let (fused, combined) = client.fuse(
            vec![(Strategy::Vector, vector), (Strategy::Fulltext, fulltext)],
            2,
        );

        assert_eq!(combined, 3);
        assert_eq!(fused.len(), 1);
        assert_eq!(fused[0].id, "2");
    }

    #[test]
    fn fuse_relaxes_gate_when_only_one_strategy_ran() {
        let client = HybridRetrievalClient::new(RagConfig::default(), RetrievalConfig::default());
        let vector = vec![item("1", "a", 0.9)];

        let (fused, _combined) = client.fuse(vec![(Strategy::Vector, vector)], 1);

        assert_eq!(fused.len(), 1);
    }

    #[test]
    fn snippet_is_bounded_by_max_chars() {
        let content = "x".repeat(500);
        let snippet = make_snippet(&content, "x", 200);
        assert!(snippet.chars().count() <= 200);
    }

    #[tokio::test]
    async fn search_with_no_backends_returns_empty_items() {
        let client = HybridRetrievalClient::new(RagConfig::default(), RetrievalConfig::default());
        let request = RetrievalRequest {
            tenant_id: "t1".to_string(),
            site_id: "s1".to_string(),
            query: "shipping".to_string(),
            top_k: 5,
            locale: "en-US".to_string(),
            strategies: vec![Strategy::Vector, Strategy::Fulltext],
        };

        let response = client.search(&request).await.unwrap();
        assert!(response.items.is_empty());
        assert_eq!(response.strategies.total_executed, 2);
        assert!(!response.strategies.timed_out);
    }

    #[tokio::test]
    async fn caching_client_reuses_response_within_ttl() {
        let inner = Arc::new(HybridRetrievalClient::new(RagConfig::default(), RetrievalConfig::default()));
        let caching = CachingRetrievalClient::new(inner, Duration::from_secs(60));
        let request = RetrievalRequest {
            tenant_id: "t1".to_string(),
            site_id: "s1".to_string(),
            query: "shipping".to_string(),
            top_k: 5,
            locale: "en-US".to_string(),
            strategies: vec![Strategy::Vector],
        };

        let first = caching.search(request.clone()).await.unwrap();
        let second = caching.search(request).await.unwrap();
        assert!(Arc::ptr_eq(&first, &second));
    }
}
