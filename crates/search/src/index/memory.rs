//! Exact in-memory vector index

use super::{IndexPoint, VectorHit, VectorIndex};
use citeforge_common::errors::{AppError, Result};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::RwLock;

#[derive(Debug, Default)]
struct Collection {
    dimension: Option<usize>,
    points: HashMap<String, IndexPoint>,
}

/// Brute-force cosine index held in process memory
#[derive(Debug)]
pub struct InMemoryVectorIndex {
    collection: RwLock<Collection>,
    available: AtomicBool,
}

impl Default for InMemoryVectorIndex {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryVectorIndex {
    pub fn new() -> Self {
        Self {
            collection: RwLock::new(Collection::default()),
            available: AtomicBool::new(true),
        }
    }

    /// Simulate an outage: every call fails while unavailable
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    pub async fn len(&self) -> usize {
        self.collection.read().await.points.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.collection.read().await.points.is_empty()
    }

    pub async fn get(&self, chunk_id: &str) -> Option<IndexPoint> {
        self.collection.read().await.points.get(chunk_id).cloned()
    }

    fn check_available(&self) -> Result<()> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(AppError::VectorIndex {
                message: "in-memory index marked unavailable".to_string(),
            })
        }
    }
}

fn cosine(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let na = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let nb = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if na == 0.0 || nb == 0.0 {
        0.0
    } else {
        dot / (na * nb)
    }
}

#[async_trait::async_trait]
impl VectorIndex for InMemoryVectorIndex {
    async fn ensure_collection(&self, dimension: usize) -> Result<()> {
        self.check_available()?;
        let mut collection = self.collection.write().await;
        match collection.dimension {
            Some(existing) if existing != dimension => Err(AppError::VectorIndex {
                message: format!(
                    "collection dimension is {}, requested {}",
                    existing, dimension
                ),
            }),
            _ => {
                collection.dimension = Some(dimension);
                Ok(())
            }
        }
    }

    async fn upsert(&self, points: Vec<IndexPoint>) -> Result<()> {
        self.check_available()?;
        let mut collection = self.collection.write().await;
        let dimension = collection.dimension;
        for point in points {
            if let Some(dim) = dimension {
                if point.vector.len() != dim {
                    return Err(AppError::VectorIndex {
                        message: format!(
                            "vector for {} has dimension {}, expected {}",
                            point.chunk_id,
                            point.vector.len(),
                            dim
                        ),
                    });
                }
            }
            collection.points.insert(point.chunk_id.clone(), point);
        }
        Ok(())
    }

    async fn search(&self, vector: &[f32], top_k: usize) -> Result<Vec<VectorHit>> {
        self.check_available()?;
        let collection = self.collection.read().await;

        let mut hits: Vec<VectorHit> = collection
            .points
            .values()
            .map(|p| VectorHit {
                chunk_id: p.chunk_id.clone(),
                score: cosine(vector, &p.vector),
            })
            .collect();
        hits.sort_by(|a, b| {
            b.score
                .total_cmp(&a.score)
                .then_with(|| a.chunk_id.cmp(&b.chunk_id))
        });
        hits.truncate(top_k);
        Ok(hits)
    }

    async fn health(&self) -> Result<()> {
        self.check_available()
    }

    fn name(&self) -> &str {
        "memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn point(id: &str, vector: Vec<f32>) -> IndexPoint {
        IndexPoint {
            chunk_id: id.to_string(),
            vector,
            source: "guide.pdf".to_string(),
            position: 0,
            text: String::new(),
        }
    }

    #[tokio::test]
    async fn test_search_orders_by_cosine() {
        let index = InMemoryVectorIndex::new();
        index.ensure_collection(2).await.unwrap();
        index
            .upsert(vec![
                point("east", vec![1.0, 0.0]),
                point("north", vec![0.0, 1.0]),
                point("northeast", vec![1.0, 1.0]),
            ])
            .await
            .unwrap();

        let hits = index.search(&[1.0, 0.1], 2).await.unwrap();
        let ids: Vec<&str> = hits.iter().map(|h| h.chunk_id.as_str()).collect();
        assert_eq!(ids, vec!["east", "northeast"]);
        assert!(hits[0].score > hits[1].score);
    }

    #[tokio::test]
    async fn test_upsert_replaces_by_chunk_id() {
        let index = InMemoryVectorIndex::new();
        index.upsert(vec![point("a", vec![1.0, 0.0])]).await.unwrap();
        index.upsert(vec![point("a", vec![0.0, 1.0])]).await.unwrap();
        assert_eq!(index.len().await, 1);
        assert_eq!(index.get("a").await.unwrap().vector, vec![0.0, 1.0]);
    }

    #[tokio::test]
    async fn test_rejects_dimension_mismatch() {
        let index = InMemoryVectorIndex::new();
        index.ensure_collection(3).await.unwrap();
        tokio_test::assert_err!(index.upsert(vec![point("a", vec![1.0])]).await);
        tokio_test::assert_err!(index.ensure_collection(4).await);
        tokio_test::assert_ok!(index.ensure_collection(3).await);
    }

    #[tokio::test]
    async fn test_unavailable_index_fails_every_call() {
        let index = InMemoryVectorIndex::new();
        index.set_available(false);
        assert!(index.health().await.is_err());
        assert!(matches!(
            index.search(&[1.0], 5).await,
            Err(AppError::VectorIndex { .. })
        ));

        index.set_available(true);
        assert!(index.search(&[1.0], 5).await.unwrap().is_empty());
    }
}
