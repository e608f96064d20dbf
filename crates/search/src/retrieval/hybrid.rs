//! Hybrid retrieval combining BM25 and vector search
//!
//! Runs the rankers a mode asks for concurrently, waits for both, and fuses
//! whatever succeeded with RRF. A failed ranker becomes a warning on the
//! outcome; if every ranker fails the outcome is simply empty evidence.

use super::{
    bm25::{BM25Params, BM25Retriever},
    fusion::{FusedResult, RRFusion},
    vector::VectorRetriever,
    RankedList, RetrievalMode, Retriever, RetrieverKind,
};
use crate::index::VectorIndex;
use citeforge_common::chunks::ChunkStore;
use citeforge_common::config::RetrievalConfig;
use citeforge_common::embeddings::Embedder;
use citeforge_common::errors::{AppError, Result};
use citeforge_common::metrics;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;
use tracing::instrument;

/// Non-fatal note that one ranker did not contribute
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrievalWarning {
    pub retriever: RetrieverKind,
    pub message: String,
}

/// Everything one retrieval produced
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchOutcome {
    pub mode: RetrievalMode,
    /// Lists that took part in fusion, keyword first
    pub lists: Vec<RankedList>,
    pub fused: FusedResult,
    pub warnings: Vec<RetrievalWarning>,
    pub elapsed_ms: u64,
}

impl SearchOutcome {
    /// True when fusion produced no chunks
    pub fn is_empty(&self) -> bool {
        self.fused.is_empty()
    }
}

/// Mode-aware searcher over the keyword and vector rankers
pub struct Searcher {
    keyword: Arc<dyn Retriever>,
    vector: Option<Arc<dyn Retriever>>,
    fusion: RRFusion,
    candidate_depth: usize,
    top_k: usize,
}

impl Searcher {
    /// Create a searcher with only the keyword ranker
    pub fn new(keyword: Arc<dyn Retriever>, fusion: RRFusion) -> Self {
        Self {
            keyword,
            vector: None,
            fusion,
            candidate_depth: 20,
            top_k: 8,
        }
    }

    /// Attach the vector ranker
    pub fn with_vector(mut self, vector: Arc<dyn Retriever>) -> Self {
        self.vector = Some(vector);
        self
    }

    /// Depth of each ranked list before fusion
    pub fn with_candidate_depth(mut self, depth: usize) -> Self {
        self.candidate_depth = depth;
        self
    }

    /// Default size of the fused output
    pub fn with_top_k(mut self, top_k: usize) -> Self {
        self.top_k = top_k;
        self
    }

    /// Wire BM25 over the store, plus vector search when an index is given
    pub fn from_config(
        config: &RetrievalConfig,
        store: Arc<ChunkStore>,
        embedder: Arc<dyn Embedder>,
        index: Option<Arc<dyn VectorIndex>>,
    ) -> Result<Self> {
        let fusion = RRFusion::new(config.rrf_k, config.keyword_weight, config.vector_weight)?;
        let bm25 = BM25Retriever::new(
            &store,
            BM25Params {
                k1: config.bm25_k1,
                b: config.bm25_b,
            },
        );

        let mut searcher = Searcher::new(Arc::new(bm25), fusion)
            .with_candidate_depth(config.candidate_depth)
            .with_top_k(config.top_k);

        if let Some(index) = index {
            let vector = VectorRetriever::new(
                embedder,
                index,
                store,
                config.timeout(),
            );
            searcher = searcher.with_vector(Arc::new(vector));
        }
        Ok(searcher)
    }

    pub fn top_k(&self) -> usize {
        self.top_k
    }

    pub fn has_vector(&self) -> bool {
        self.vector.is_some()
    }

    /// Retrieve and fuse with the configured top-k
    pub async fn search(&self, query: &str, mode: RetrievalMode) -> SearchOutcome {
        self.search_with_limit(query, mode, self.top_k).await
    }

    #[instrument(skip(self, mode), fields(mode = %mode))]
    pub async fn search_with_limit(
        &self,
        query: &str,
        mode: RetrievalMode,
        top_k: usize,
    ) -> SearchOutcome {
        let start = Instant::now();
        let depth = self.candidate_depth.max(top_k);

        let keyword = async {
            if mode.uses(RetrieverKind::Keyword) {
                Some(self.keyword.retrieve(query, depth).await)
            } else {
                None
            }
        };
        let vector = async {
            if !mode.uses(RetrieverKind::Vector) {
                return None;
            }
            Some(match &self.vector {
                Some(vector) => vector.retrieve(query, depth).await,
                None => Err(AppError::RetrievalUnavailable {
                    retriever: "vector".to_string(),
                    message: "no vector index configured".to_string(),
                }),
            })
        };

        // Execute both searches in parallel
        let (keyword, vector) = tokio::join!(keyword, vector);

        let mut lists = Vec::with_capacity(2);
        let mut warnings = Vec::new();
        for (kind, result) in [
            (RetrieverKind::Keyword, keyword),
            (RetrieverKind::Vector, vector),
        ] {
            match result {
                Some(Ok(list)) => lists.push(list),
                Some(Err(e)) => {
                    tracing::warn!(retriever = %kind, error = %e, "Retriever failed, continuing without it");
                    metrics::record_retriever_failure(kind.as_str());
                    warnings.push(RetrievalWarning {
                        retriever: kind,
                        message: e.to_string(),
                    });
                }
                None => {}
            }
        }

        let fused = self.fusion.fuse(&lists, top_k);
        let elapsed = start.elapsed();
        metrics::record_retrieval(elapsed.as_secs_f64(), mode.as_str(), fused.len());

        tracing::info!(
            lists = lists.len(),
            fused = fused.len(),
            warnings = warnings.len(),
            elapsed_ms = elapsed.as_millis() as u64,
            "Retrieval complete"
        );

        SearchOutcome {
            mode,
            lists,
            fused,
            warnings,
            elapsed_ms: elapsed.as_millis() as u64,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::{IndexPoint, InMemoryVectorIndex};
    use citeforge_common::chunks::Chunk;
    use citeforge_common::embeddings::HashingEmbedder;

    fn store() -> Arc<ChunkStore> {
        let texts = [
            ("sfo-bart", "Take BART from SFO airport to downtown Powell station."),
            ("ferry", "The Ferry Building hosts a farmers market on Saturday."),
            ("muni", "Muni buses and cable cars connect downtown neighborhoods."),
            ("stay", "Union Square hotels are close to transit."),
        ];
        Arc::new(
            ChunkStore::from_chunks(
                texts
                    .iter()
                    .enumerate()
                    .map(|(i, (id, text))| Chunk {
                        id: id.to_string(),
                        text: text.to_string(),
                        source: format!("doc{}.pdf", i % 2),
                        position: i as u32,
                    })
                    .collect(),
            )
            .unwrap(),
        )
    }

    async fn indexed(store: &ChunkStore, embedder: &HashingEmbedder) -> Arc<InMemoryVectorIndex> {
        let index = Arc::new(InMemoryVectorIndex::new());
        let mut points = Vec::new();
        for c in store.iter() {
            points.push(IndexPoint {
                chunk_id: c.id.clone(),
                vector: embedder.embed(&c.text).await.unwrap(),
                source: c.source.clone(),
                position: c.position,
                text: c.text.clone(),
            });
        }
        index.upsert(points).await.unwrap();
        index
    }

    async fn searcher() -> (Searcher, Arc<InMemoryVectorIndex>) {
        let store = store();
        let embedder = Arc::new(HashingEmbedder::new(128));
        let index = indexed(&store, &embedder).await;
        let searcher = Searcher::from_config(
            &RetrievalConfig::default(),
            store,
            embedder,
            Some(index.clone() as Arc<dyn VectorIndex>),
        )
        .unwrap();
        (searcher, index)
    }

    #[tokio::test]
    async fn test_hybrid_fuses_both_lists() {
        let (searcher, _) = searcher().await;
        let outcome = searcher.search("BART from SFO airport", RetrievalMode::Hybrid).await;

        assert!(outcome.warnings.is_empty());
        assert_eq!(outcome.lists.len(), 2);
        assert_eq!(outcome.lists[0].retriever, RetrieverKind::Keyword);
        assert_eq!(outcome.lists[1].retriever, RetrieverKind::Vector);
        assert_eq!(outcome.fused.chunk_ids()[0], "sfo-bart");
        let top = &outcome.fused.entries()[0];
        assert_eq!(top.bm25_rank, Some(1));
        assert!(top.vector_rank.is_some());
    }

    #[tokio::test]
    async fn test_bm25_mode_skips_vector() {
        let (searcher, index) = searcher().await;
        index.set_available(false);

        let outcome = searcher.search("ferry market", RetrievalMode::Bm25).await;
        assert!(outcome.warnings.is_empty());
        assert_eq!(outcome.lists.len(), 1);
        assert_eq!(outcome.fused.chunk_ids(), vec!["ferry"]);
    }

    #[tokio::test]
    async fn test_hybrid_degrades_to_keyword_when_vector_down() {
        let (searcher, index) = searcher().await;
        index.set_available(false);

        let outcome = searcher.search("cable cars downtown", RetrievalMode::Hybrid).await;
        assert_eq!(outcome.warnings.len(), 1);
        assert_eq!(outcome.warnings[0].retriever, RetrieverKind::Vector);
        assert_eq!(outcome.lists.len(), 1);
        assert_eq!(outcome.fused.chunk_ids()[0], "muni");
    }

    #[tokio::test]
    async fn test_vector_mode_with_backend_down_is_empty_evidence() {
        let (searcher, index) = searcher().await;
        index.set_available(false);

        let outcome = searcher.search("ferry", RetrievalMode::Vector).await;
        assert!(outcome.is_empty());
        assert_eq!(outcome.warnings.len(), 1);
    }

    #[tokio::test]
    async fn test_vector_mode_without_index_warns() {
        let store = store();
        let searcher = Searcher::from_config(
            &RetrievalConfig::default(),
            store,
            Arc::new(HashingEmbedder::new(16)),
            None,
        )
        .unwrap();
        assert!(!searcher.has_vector());

        let outcome = searcher.search("ferry", RetrievalMode::Hybrid).await;
        assert_eq!(outcome.warnings.len(), 1);
        assert_eq!(outcome.fused.chunk_ids(), vec!["ferry"]);
    }

    #[tokio::test]
    async fn test_empty_corpus_is_empty_evidence() {
        let store = Arc::new(ChunkStore::default());
        let embedder = Arc::new(HashingEmbedder::new(16));
        let index: Arc<dyn VectorIndex> = Arc::new(InMemoryVectorIndex::new());
        let searcher =
            Searcher::from_config(&RetrievalConfig::default(), store, embedder, Some(index))
                .unwrap();

        let outcome = searcher.search("anything", RetrievalMode::Hybrid).await;
        assert!(outcome.is_empty());
        assert!(outcome.warnings.is_empty());
    }

    #[tokio::test]
    async fn test_top_k_limits_fused_output() {
        let (searcher, _) = searcher().await;
        let outcome = searcher
            .search_with_limit("downtown transit", RetrievalMode::Hybrid, 2)
            .await;
        assert!(outcome.fused.len() <= 2);
    }

    /// Answers every search only after `delay`
    struct SlowIndex {
        inner: Arc<InMemoryVectorIndex>,
        delay: std::time::Duration,
    }

    #[async_trait::async_trait]
    impl VectorIndex for SlowIndex {
        async fn ensure_collection(&self, dimension: usize) -> Result<()> {
            self.inner.ensure_collection(dimension).await
        }
        async fn upsert(&self, points: Vec<IndexPoint>) -> Result<()> {
            self.inner.upsert(points).await
        }
        async fn search(&self, vector: &[f32], top_k: usize) -> Result<Vec<crate::VectorHit>> {
            tokio::time::sleep(self.delay).await;
            self.inner.search(vector, top_k).await
        }
        async fn health(&self) -> Result<()> {
            Ok(())
        }
        fn name(&self) -> &str {
            "slow"
        }
    }

    #[tokio::test]
    async fn test_configured_timeout_bounds_vector_search() {
        let store = store();
        let embedder = Arc::new(HashingEmbedder::new(128));
        let index = Arc::new(SlowIndex {
            inner: indexed(&store, &embedder).await,
            delay: std::time::Duration::from_millis(500),
        });
        let config = RetrievalConfig {
            timeout_ms: 20,
            ..RetrievalConfig::default()
        };
        let searcher =
            Searcher::from_config(&config, store, embedder, Some(index as Arc<dyn VectorIndex>))
                .unwrap();

        let outcome = searcher.search("ferry market", RetrievalMode::Hybrid).await;
        assert_eq!(outcome.warnings.len(), 1);
        assert_eq!(outcome.warnings[0].retriever, RetrieverKind::Vector);
        assert_eq!(outcome.fused.chunk_ids()[0], "ferry");
        assert!(outcome.elapsed_ms < 500);
    }

    #[tokio::test]
    async fn test_invalid_fusion_config_is_rejected() {
        let config = RetrievalConfig {
            rrf_k: 0.0,
            ..RetrievalConfig::default()
        };
        let result = Searcher::from_config(
            &config,
            store(),
            Arc::new(HashingEmbedder::new(16)),
            None,
        );
        assert!(result.is_err());
    }
}
