//! Indexing processor
//!
//! Embeds every chunk of the store and upserts the vectors into the vector
//! index, batch by batch, retrying failed upserts with exponential backoff.

use backoff::{future::retry, ExponentialBackoff};
use citeforge_common::chunks::{Chunk, ChunkStore};
use citeforge_common::config::AppConfig;
use citeforge_common::embeddings::Embedder;
use citeforge_common::metrics;
use citeforge_search::{IndexPoint, VectorIndex};
use serde::Serialize;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, instrument, warn};

/// Indexing processor configuration
#[derive(Debug, Clone)]
pub struct IndexingConfig {
    /// Texts per embedding call
    pub embed_batch_size: usize,
    /// Points per upsert call
    pub upsert_batch_size: usize,
    /// First retry delay for a failed upsert
    pub initial_retry_interval: Duration,
    /// Give up on an upsert after retrying this long
    pub max_retry_elapsed: Duration,
}

impl Default for IndexingConfig {
    fn default() -> Self {
        Self {
            embed_batch_size: 64,
            upsert_batch_size: 256,
            initial_retry_interval: Duration::from_millis(500),
            max_retry_elapsed: Duration::from_secs(60),
        }
    }
}

impl From<&AppConfig> for IndexingConfig {
    fn from(config: &AppConfig) -> Self {
        Self {
            embed_batch_size: config.embedding.batch_size.max(1),
            upsert_batch_size: config.vector_index.upsert_batch_size.max(1),
            ..Self::default()
        }
    }
}

/// Counts reported after a run
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct IndexingReport {
    pub chunks: usize,
    pub embed_batches: usize,
    pub upsert_batches: usize,
    pub elapsed_ms: u64,
}

/// Indexing worker processor
pub struct IndexingProcessor {
    index: Arc<dyn VectorIndex>,
    embedder: Arc<dyn Embedder>,
    config: IndexingConfig,
}

impl IndexingProcessor {
    pub fn new(
        index: Arc<dyn VectorIndex>,
        embedder: Arc<dyn Embedder>,
        config: IndexingConfig,
    ) -> Self {
        Self {
            index,
            embedder,
            config,
        }
    }

    /// Index the whole store
    #[instrument(skip(self, store), fields(chunks = store.len(), index = self.index.name()))]
    pub async fn index_store(&self, store: &ChunkStore) -> Result<IndexingReport, IndexingError> {
        let start = Instant::now();
        let dimension = self.embedder.dimension();
        self.index
            .ensure_collection(dimension)
            .await
            .map_err(|e| IndexingError::IndexFailed(e.to_string()))?;

        info!(
            model = %self.embedder.model_name(),
            dimension = dimension,
            "Indexing chunk store"
        );

        let chunks: Vec<&Chunk> = store.iter().collect();
        let mut report = IndexingReport::default();

        for group in chunks.chunks(self.config.upsert_batch_size.max(1)) {
            let mut points = Vec::with_capacity(group.len());

            // Process chunks in batches
            for batch in group.chunks(self.config.embed_batch_size.max(1)) {
                let texts: Vec<String> = batch.iter().map(|c| c.text.clone()).collect();
                let embeddings = self
                    .embedder
                    .embed_batch(&texts)
                    .await
                    .map_err(|e| IndexingError::EmbeddingFailed(e.to_string()))?;

                if embeddings.len() != batch.len() {
                    return Err(IndexingError::EmbeddingFailed(format!(
                        "expected {} embeddings, got {}",
                        batch.len(),
                        embeddings.len()
                    )));
                }
                report.embed_batches += 1;

                points.extend(batch.iter().zip(embeddings).map(|(chunk, vector)| IndexPoint {
                    chunk_id: chunk.id.clone(),
                    vector,
                    source: chunk.source.clone(),
                    position: chunk.position,
                    text: chunk.text.clone(),
                }));
            }

            let count = points.len();
            self.upsert_with_retry(points).await?;
            report.upsert_batches += 1;
            report.chunks += count;

            debug!(indexed = report.chunks, total = chunks.len(), "Upserted batch");
        }

        report.elapsed_ms = start.elapsed().as_millis() as u64;
        metrics::record_indexed(report.chunks, self.index.name());
        info!(
            chunks = report.chunks,
            upsert_batches = report.upsert_batches,
            elapsed_ms = report.elapsed_ms,
            "Indexing complete"
        );
        Ok(report)
    }

    async fn upsert_with_retry(&self, points: Vec<IndexPoint>) -> Result<(), IndexingError> {
        let policy = ExponentialBackoff {
            initial_interval: self.config.initial_retry_interval,
            max_elapsed_time: Some(self.config.max_retry_elapsed),
            ..ExponentialBackoff::default()
        };

        let index = &self.index;
        let points = &points;
        retry(policy, || async move {
            index.upsert(points.clone()).await.map_err(|e| {
                warn!(error = %e, points = points.len(), "Upsert failed, retrying");
                backoff::Error::transient(e)
            })
        })
        .await
        .map_err(|e| IndexingError::IndexFailed(e.to_string()))
    }

    /// Embed a single text (smoke test of the embedding backend)
    pub async fn embed_single(&self, text: &str) -> Result<Vec<f32>, IndexingError> {
        self.embedder
            .embed(text)
            .await
            .map_err(|e| IndexingError::EmbeddingFailed(e.to_string()))
    }
}

#[derive(Debug, thiserror::Error)]
pub enum IndexingError {
    #[error("Embedding generation failed: {0}")]
    EmbeddingFailed(String),

    #[error("Vector index error: {0}")]
    IndexFailed(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use citeforge_common::embeddings::HashingEmbedder;
    use citeforge_common::errors::{AppError, Result};
    use citeforge_search::index::InMemoryVectorIndex;
    use citeforge_search::VectorHit;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio_test::assert_ok;

    fn store(n: usize) -> ChunkStore {
        ChunkStore::from_chunks(
            (0..n)
                .map(|i| Chunk {
                    id: format!("guide-{}", i),
                    text: format!("chunk number {} about cable cars", i),
                    source: format!("guide{}.pdf", i % 3),
                    position: i as u32,
                })
                .collect(),
        )
        .unwrap()
    }

    fn config(embed: usize, upsert: usize) -> IndexingConfig {
        IndexingConfig {
            embed_batch_size: embed,
            upsert_batch_size: upsert,
            initial_retry_interval: Duration::from_millis(5),
            max_retry_elapsed: Duration::from_millis(500),
        }
    }

    #[tokio::test]
    async fn test_indexes_every_chunk_in_batches() {
        let index = Arc::new(InMemoryVectorIndex::new());
        let processor = IndexingProcessor::new(
            index.clone(),
            Arc::new(HashingEmbedder::new(16)),
            config(4, 10),
        );

        let report = processor.index_store(&store(25)).await.unwrap();
        assert_eq!(report.chunks, 25);
        assert_eq!(report.upsert_batches, 3);
        // 10 + 10 + 5 chunks, embedded 4 at a time: 3 + 3 + 2
        assert_eq!(report.embed_batches, 8);
        assert_eq!(index.len().await, 25);

        let point = index.get("guide-7").await.unwrap();
        assert_eq!(point.position, 7);
        assert_eq!(point.source, "guide1.pdf");
        assert_eq!(point.vector.len(), 16);
    }

    #[tokio::test]
    async fn test_reindexing_is_idempotent() {
        let index = Arc::new(InMemoryVectorIndex::new());
        let processor = IndexingProcessor::new(
            index.clone(),
            Arc::new(HashingEmbedder::new(16)),
            IndexingConfig::default(),
        );
        let store = store(5);
        processor.index_store(&store).await.unwrap();
        processor.index_store(&store).await.unwrap();
        assert_eq!(index.len().await, 5);
    }

    #[tokio::test]
    async fn test_empty_store() {
        let index = Arc::new(InMemoryVectorIndex::new());
        let processor =
            IndexingProcessor::new(index.clone(), Arc::new(HashingEmbedder::new(8)), config(4, 4));
        let report = processor.index_store(&ChunkStore::default()).await.unwrap();
        assert_eq!(report.chunks, 0);
        assert_eq!(report.upsert_batches, 0);
        assert!(index.is_empty().await);
    }

    /// Fails the first `failures` upserts, then delegates
    struct FlakyIndex {
        inner: InMemoryVectorIndex,
        failures: usize,
        attempts: AtomicUsize,
    }

    #[async_trait::async_trait]
    impl VectorIndex for FlakyIndex {
        async fn ensure_collection(&self, dimension: usize) -> Result<()> {
            self.inner.ensure_collection(dimension).await
        }
        async fn upsert(&self, points: Vec<IndexPoint>) -> Result<()> {
            if self.attempts.fetch_add(1, Ordering::SeqCst) < self.failures {
                return Err(AppError::VectorIndex {
                    message: "temporarily unavailable".into(),
                });
            }
            self.inner.upsert(points).await
        }
        async fn search(&self, vector: &[f32], top_k: usize) -> Result<Vec<VectorHit>> {
            self.inner.search(vector, top_k).await
        }
        async fn health(&self) -> Result<()> {
            Ok(())
        }
        fn name(&self) -> &str {
            "flaky"
        }
    }

    #[tokio::test]
    async fn test_upsert_retries_transient_failures() {
        let index = Arc::new(FlakyIndex {
            inner: InMemoryVectorIndex::new(),
            failures: 2,
            attempts: AtomicUsize::new(0),
        });
        let processor =
            IndexingProcessor::new(index.clone(), Arc::new(HashingEmbedder::new(8)), config(4, 4));

        let report = assert_ok!(processor.index_store(&store(3)).await);
        assert_eq!(report.chunks, 3);
        assert_eq!(index.attempts.load(Ordering::SeqCst), 3);
        assert_eq!(index.inner.len().await, 3);
    }

    #[tokio::test]
    async fn test_unavailable_index_gives_up() {
        let index = Arc::new(InMemoryVectorIndex::new());
        let processor = IndexingProcessor::new(
            index.clone(),
            Arc::new(HashingEmbedder::new(8)),
            IndexingConfig {
                max_retry_elapsed: Duration::from_millis(50),
                ..config(4, 4)
            },
        );
        index.ensure_collection(8).await.unwrap();
        index.set_available(false);

        let err = processor.index_store(&store(2)).await.unwrap_err();
        assert!(matches!(err, IndexingError::IndexFailed(_)));
    }

    #[tokio::test]
    async fn test_embed_single() {
        let processor = IndexingProcessor::new(
            Arc::new(InMemoryVectorIndex::new()),
            Arc::new(HashingEmbedder::new(12)),
            IndexingConfig::default(),
        );
        assert_eq!(processor.embed_single("ferry").await.unwrap().len(), 12);
    }
}
