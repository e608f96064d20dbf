//! CiteForge Embedding Worker
//!
//! Indexes the chunk store into the vector index:
//! 1. Loads the JSONL chunk store
//! 2. Ensures the collection exists with the embedder's dimension
//! 3. Embeds chunk texts in batches
//! 4. Upserts the vectors, retrying with backoff
//!
//! `embedding-worker test [text]` embeds one text and exits.

mod processor;

use crate::processor::{IndexingConfig, IndexingProcessor};
use citeforge_common::{
    chunks::ChunkStore, config::AppConfig, embeddings::create_embedder, metrics, telemetry,
    VERSION,
};
use citeforge_search::create_vector_index;
use tracing::{error, info};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    // Load configuration
    let config = AppConfig::load()?;
    telemetry::init_tracing(&config.observability);
    config.validate()?;

    info!("Starting CiteForge Embedding Worker v{}", VERSION);
    metrics::register_metrics();

    // Initialize embedder
    let embedder = create_embedder(&config.embedding)?;
    info!(
        model = %embedder.model_name(),
        dimension = embedder.dimension(),
        "Embedder initialized"
    );

    let index = create_vector_index(&config.vector_index)?;
    let processor = IndexingProcessor::new(index, embedder, IndexingConfig::from(&config));

    // Check for command line arguments for testing
    let args: Vec<String> = std::env::args().collect();

    if args.len() > 1 && args[1] == "test" {
        info!("Running in test mode...");

        let test_text = args
            .get(2)
            .cloned()
            .unwrap_or_else(|| "This is a test sentence for embedding.".to_string());

        match processor.embed_single(&test_text).await {
            Ok(embedding) => {
                println!("Embedding generated successfully!");
                println!("  Dimension: {}", embedding.len());
                println!("  First 5 values: {:?}", &embedding[..5.min(embedding.len())]);
            }
            Err(e) => {
                error!(error = %e, "Failed to generate embedding");
                eprintln!("Error: {}", e);
                std::process::exit(1);
            }
        }

        return Ok(());
    }

    let store = ChunkStore::load(&config.corpus.chunks_path)?;

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("Shutdown signal received, indexing interrupted");
        }
        result = processor.index_store(&store) => {
            let report = result?;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
    }

    info!("Embedding worker shutting down");
    Ok(())
}
