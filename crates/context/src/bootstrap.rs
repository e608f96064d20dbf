//! Wiring from configuration to a ready pipeline
//!
//! Shared by the gateway and the evals binary so both answer questions with
//! the same components.

use crate::generator::{create_generator, Generator};
use crate::packer::{ContextPacker, ContextPackerConfig};
use crate::pipeline::RagPipeline;
use citeforge_common::chunks::ChunkStore;
use citeforge_common::config::AppConfig;
use citeforge_common::embeddings::{create_embedder, Embedder};
use citeforge_common::errors::Result;
use citeforge_search::{create_vector_index, IndexPoint, Searcher, VectorIndex};
use std::sync::Arc;

/// Long-lived components of a running service
#[derive(Clone)]
pub struct Components {
    pub config: Arc<AppConfig>,
    pub store: Arc<ChunkStore>,
    pub embedder: Arc<dyn Embedder>,
    pub index: Option<Arc<dyn VectorIndex>>,
    pub searcher: Arc<Searcher>,
    pub pipeline: Arc<RagPipeline>,
}

impl Components {
    /// Load the chunk store and connect every backend named in `config`
    pub async fn build(config: AppConfig) -> Result<Self> {
        let store = ChunkStore::load_shared(&config.corpus.chunks_path)?;
        let embedder = create_embedder(&config.embedding)?;
        let generator = create_generator(&config.generator)?;
        Self::assemble(config, store, embedder, generator).await
    }

    /// Build from an already loaded store and explicit embedder and generator
    pub async fn assemble(
        config: AppConfig,
        store: Arc<ChunkStore>,
        embedder: Arc<dyn Embedder>,
        generator: Arc<dyn Generator>,
    ) -> Result<Self> {
        let index = match config.vector_index.backend.to_ascii_lowercase().as_str() {
            "none" | "disabled" => {
                tracing::warn!("Vector index disabled, vector and hybrid modes fall back to BM25");
                None
            }
            _ => Some(create_vector_index(&config.vector_index)?),
        };

        if let Some(index) = index.as_ref().filter(|i| i.name() == "memory") {
            warm_memory_index(&**index, &store, embedder.as_ref(), config.embedding.batch_size)
                .await?;
        }

        let searcher = Arc::new(Searcher::from_config(
            &config.retrieval,
            store.clone(),
            embedder.clone(),
            index.clone(),
        )?);

        let pipeline = RagPipeline::new(
            searcher.clone(),
            store.clone(),
            ContextPacker::new(ContextPackerConfig::from(&config.context)),
            generator,
        )
        .with_history_window(config.generator.history_window)
        .with_generation_timeout(config.generation_timeout());

        tracing::info!(
            chunks = store.len(),
            sources = store.source_count(),
            vector_index = index.as_ref().map(|i| i.name()).unwrap_or("none"),
            embedding_model = embedder.model_name(),
            "Components ready"
        );

        Ok(Self {
            config: Arc::new(config),
            store,
            embedder,
            index,
            searcher,
            pipeline: Arc::new(pipeline),
        })
    }
}

/// An in-memory index starts empty; fill it from the store
async fn warm_memory_index(
    index: &dyn VectorIndex,
    store: &ChunkStore,
    embedder: &dyn Embedder,
    batch_size: usize,
) -> Result<()> {
    index.ensure_collection(embedder.dimension()).await?;
    let chunks: Vec<_> = store.iter().collect();
    for batch in chunks.chunks(batch_size.max(1)) {
        let texts: Vec<String> = batch.iter().map(|c| c.text.clone()).collect();
        let vectors = embedder.embed_batch(&texts).await?;
        let points = batch
            .iter()
            .zip(vectors)
            .map(|(chunk, vector)| IndexPoint {
                chunk_id: chunk.id.clone(),
                vector,
                source: chunk.source.clone(),
                position: chunk.position,
                text: chunk.text.clone(),
            })
            .collect();
        index.upsert(points).await?;
    }
    tracing::info!(points = chunks.len(), "In-memory vector index warmed");
    Ok(())
}
