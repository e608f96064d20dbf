//! Vector similarity search
//!
//! Embeds the query and asks the vector index for its nearest chunks. Any
//! failure of either external call, including running past the timeout,
//! surfaces as `RetrievalUnavailable` so the caller can degrade to BM25.

use super::{RankedList, Retriever, RetrieverKind};
use crate::index::VectorIndex;
use citeforge_common::chunks::ChunkStore;
use citeforge_common::embeddings::Embedder;
use citeforge_common::errors::{AppError, Result};
use std::sync::Arc;
use std::time::Duration;
use tracing::instrument;

/// Vector retriever over an external index
pub struct VectorRetriever {
    embedder: Arc<dyn Embedder>,
    index: Arc<dyn VectorIndex>,
    store: Arc<ChunkStore>,
    timeout: Duration,
}

impl VectorRetriever {
    /// Create a new vector retriever
    pub fn new(
        embedder: Arc<dyn Embedder>,
        index: Arc<dyn VectorIndex>,
        store: Arc<ChunkStore>,
        timeout: Duration,
    ) -> Self {
        Self {
            embedder,
            index,
            store,
            timeout,
        }
    }

    async fn embed_and_search(&self, query: &str, depth: usize) -> Result<RankedList> {
        let embedding = self.embedder.embed(query).await?;
        let hits = self.index.search(&embedding, depth).await?;
        let returned = hits.len();

        // Stale index entries never reach the pack
        let list = RankedList::from_ordered(
            RetrieverKind::Vector,
            hits.into_iter()
                .filter(|hit| self.store.contains(&hit.chunk_id))
                .map(|hit| (hit.chunk_id, hit.score)),
        );

        if list.len() < returned {
            tracing::warn!(
                returned = returned,
                kept = list.len(),
                "Vector index returned unknown or duplicate chunk ids"
            );
        }
        Ok(list)
    }
}

#[async_trait::async_trait]
impl Retriever for VectorRetriever {
    #[instrument(skip(self), fields(retriever = "vector", index = self.index.name()))]
    async fn retrieve(&self, query: &str, depth: usize) -> Result<RankedList> {
        if depth == 0 || query.trim().is_empty() {
            return Ok(RankedList::empty(RetrieverKind::Vector));
        }

        match tokio::time::timeout(self.timeout, self.embed_and_search(query, depth)).await {
            Ok(Ok(list)) => {
                tracing::debug!(hits = list.len(), "Vector search complete");
                Ok(list)
            }
            Ok(Err(e)) => Err(AppError::retrieval_unavailable("vector", &e)),
            Err(_) => Err(AppError::RetrievalUnavailable {
                retriever: "vector".to_string(),
                message: format!("timed out after {}ms", self.timeout.as_millis()),
            }),
        }
    }

    fn kind(&self) -> RetrieverKind {
        RetrieverKind::Vector
    }
}
