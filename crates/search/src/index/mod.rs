//! Vector index adapters
//!
//! The vector ranker only sees the [`VectorIndex`] trait. Two backends:
//! - [`QdrantIndex`]: Qdrant collection with cosine distance
//! - [`InMemoryVectorIndex`]: exact cosine search, for local runs and tests

mod memory;
mod qdrant;

pub use memory::InMemoryVectorIndex;
pub use qdrant::{point_id, QdrantIndex};

use citeforge_common::config::VectorIndexConfig;
use citeforge_common::errors::{AppError, Result};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// A chunk vector with the metadata stored next to it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexPoint {
    pub chunk_id: String,
    pub vector: Vec<f32>,
    pub source: String,
    pub position: u32,
    pub text: String,
}

/// One nearest-neighbour hit
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VectorHit {
    pub chunk_id: String,
    /// Similarity, higher is closer
    pub score: f32,
}

#[async_trait::async_trait]
pub trait VectorIndex: Send + Sync {
    /// Create the collection if it does not exist yet
    async fn ensure_collection(&self, dimension: usize) -> Result<()>;

    /// Insert or replace points, keyed by chunk id
    async fn upsert(&self, points: Vec<IndexPoint>) -> Result<()>;

    /// Closest `top_k` points to `vector`, most similar first
    async fn search(&self, vector: &[f32], top_k: usize) -> Result<Vec<VectorHit>>;

    /// Fails if the backend cannot serve queries
    async fn health(&self) -> Result<()>;

    /// Backend name for logs
    fn name(&self) -> &str;
}

/// Create a vector index based on configuration
pub fn create_vector_index(config: &VectorIndexConfig) -> Result<Arc<dyn VectorIndex>> {
    match config.backend.to_ascii_lowercase().as_str() {
        "qdrant" => Ok(Arc::new(QdrantIndex::connect(config)?)),
        "memory" => Ok(Arc::new(InMemoryVectorIndex::new())),
        other => Err(AppError::Configuration {
            message: format!("unknown vector index backend: {}", other),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_create_memory_index() {
        let config = VectorIndexConfig {
            backend: "Memory".into(),
            ..VectorIndexConfig::default()
        };
        let index = create_vector_index(&config).unwrap();
        assert_eq!(index.name(), "memory");
        assert!(index.health().await.is_ok());
    }

    #[test]
    fn test_unknown_backend() {
        let config = VectorIndexConfig {
            backend: "faiss".into(),
            ..VectorIndexConfig::default()
        };
        assert!(matches!(
            create_vector_index(&config),
            Err(AppError::Configuration { .. })
        ));
    }
}
