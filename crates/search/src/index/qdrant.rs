//! Qdrant-backed vector index
//!
//! Chunk ids are strings while Qdrant point ids are integers or UUIDs, so every
//! chunk id maps to a stable 64-bit id (the first 8 bytes of its SHA-256). The
//! original chunk id travels in the payload and is what searches return.

use super::{IndexPoint, VectorHit, VectorIndex};
use citeforge_common::config::VectorIndexConfig;
use citeforge_common::errors::{AppError, Result};
use qdrant_client::{
    qdrant::{
        self, value::Kind, CreateCollection, Distance, PointStruct, SearchPoints, UpsertPoints,
        Value, VectorParams,
    },
    Payload, Qdrant,
};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::time::Duration;
use tracing::{instrument, warn};

/// Stable numeric point id for a chunk id
pub fn point_id(chunk_id: &str) -> u64 {
    let digest = Sha256::digest(chunk_id.as_bytes());
    let mut prefix = [0u8; 8];
    prefix.copy_from_slice(&digest[..8]);
    u64::from_be_bytes(prefix)
}

pub struct QdrantIndex {
    client: Qdrant,
    collection: String,
}

impl QdrantIndex {
    /// Build a client for the configured endpoint. No request is made yet.
    pub fn connect(config: &VectorIndexConfig) -> Result<Self> {
        let client = Qdrant::from_url(&config.url)
            .api_key(config.api_key.clone())
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(index_error)?;

        tracing::info!(
            url = %config.url,
            collection = %config.collection,
            "Qdrant client configured"
        );

        Ok(Self {
            client,
            collection: config.collection.clone(),
        })
    }

    fn to_point(point: IndexPoint) -> PointStruct {
        let mut payload_map: HashMap<String, Value> = HashMap::new();
        payload_map.insert("chunk_id".to_string(), string_value(point.chunk_id.clone()));
        payload_map.insert("source".to_string(), string_value(point.source));
        payload_map.insert(
            "position".to_string(),
            Value {
                kind: Some(Kind::IntegerValue(point.position as i64)),
            },
        );
        payload_map.insert("text".to_string(), string_value(point.text));

        let payload: Payload = payload_map.into();
        PointStruct::new(
            qdrant::PointId::from(point_id(&point.chunk_id)),
            point.vector,
            payload,
        )
    }
}

fn index_error(err: impl std::fmt::Display) -> AppError {
    AppError::VectorIndex {
        message: err.to_string(),
    }
}

fn string_value(text: String) -> Value {
    Value {
        kind: Some(Kind::StringValue(text)),
    }
}

fn payload_to_string(value: Option<&Value>) -> Option<String> {
    value
        .and_then(|value| value.kind.as_ref())
        .and_then(|kind| match kind {
            Kind::StringValue(text) => Some(text.clone()),
            _ => None,
        })
}

#[async_trait::async_trait]
impl VectorIndex for QdrantIndex {
    #[instrument(skip(self), fields(collection = %self.collection))]
    async fn ensure_collection(&self, dimension: usize) -> Result<()> {
        let exists = self
            .client
            .collection_exists(&self.collection)
            .await
            .map_err(index_error)?;
        if exists {
            tracing::debug!("Collection already exists");
            return Ok(());
        }

        self.client
            .create_collection(CreateCollection {
                collection_name: self.collection.clone(),
                vectors_config: Some(qdrant::VectorsConfig {
                    config: Some(qdrant::vectors_config::Config::Params(VectorParams {
                        size: dimension as u64,
                        distance: Distance::Cosine as i32,
                        ..Default::default()
                    })),
                }),
                ..Default::default()
            })
            .await
            .map_err(index_error)?;

        tracing::info!(dimension = dimension, "Collection created");
        Ok(())
    }

    #[instrument(skip(self, points), fields(collection = %self.collection, points = points.len()))]
    async fn upsert(&self, points: Vec<IndexPoint>) -> Result<()> {
        if points.is_empty() {
            return Ok(());
        }
        let points: Vec<PointStruct> = points.into_iter().map(Self::to_point).collect();

        self.client
            .upsert_points(UpsertPoints {
                collection_name: self.collection.clone(),
                wait: Some(true),
                points,
                ..Default::default()
            })
            .await
            .map_err(index_error)?;
        Ok(())
    }

    async fn search(&self, vector: &[f32], top_k: usize) -> Result<Vec<VectorHit>> {
        let response = self
            .client
            .search_points(SearchPoints {
                collection_name: self.collection.clone(),
                vector: vector.to_vec(),
                limit: top_k as u64,
                with_payload: Some(qdrant::WithPayloadSelector {
                    selector_options: Some(qdrant::with_payload_selector::SelectorOptions::Enable(
                        true,
                    )),
                }),
                ..Default::default()
            })
            .await
            .map_err(index_error)?;

        let mut hits = Vec::with_capacity(response.result.len());
        for point in response.result {
            match payload_to_string(point.payload.get("chunk_id")) {
                Some(chunk_id) => hits.push(VectorHit {
                    chunk_id,
                    score: point.score,
                }),
                None => warn!(point = ?point.id, "Point without chunk_id payload skipped"),
            }
        }
        Ok(hits)
    }

    async fn health(&self) -> Result<()> {
        let exists = self
            .client
            .collection_exists(&self.collection)
            .await
            .map_err(index_error)?;
        if exists {
            Ok(())
        } else {
            Err(AppError::VectorIndex {
                message: format!("collection {} missing", self.collection),
            })
        }
    }

    fn name(&self) -> &str {
        "qdrant"
    }
}
