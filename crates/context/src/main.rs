//! CiteForge evals
//!
//! Runs the evaluation question set through the configured pipeline and
//! writes a JSON report.
//!
//! Environment:
//! - `EVALS_QUESTIONS`: JSON file with `[{id, question, mode}]` (default: built-in set)
//! - `EVALS_OUTPUT`: report path (default: `data/processed/evals.json`)
//! - `EVALS_TOP_K`: fused chunks per question (default: 15)

use citeforge_common::{config::AppConfig, telemetry, VERSION};
use citeforge_context::{
    evals::{self, DEFAULT_EVAL_TOP_K, DEFAULT_OUTPUT_PATH},
    Components,
};
use tracing::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    // Load configuration
    let mut config = AppConfig::load()?;
    telemetry::init_tracing(&config.observability);

    info!("Starting CiteForge evals v{}", VERSION);

    config.retrieval.top_k = match std::env::var("EVALS_TOP_K") {
        Ok(raw) => raw.parse()?,
        Err(_) => DEFAULT_EVAL_TOP_K,
    };
    let output = std::env::var("EVALS_OUTPUT").unwrap_or_else(|_| DEFAULT_OUTPUT_PATH.to_string());
    let questions = match std::env::var("EVALS_QUESTIONS") {
        Ok(path) => evals::load_questions(&path)?,
        Err(_) => evals::default_questions(),
    };
    config.validate()?;
    let rrf_k = config.retrieval.rrf_k;

    let components = Components::build(config).await?;
    let report = evals::run_evals(&components.pipeline, &questions, rrf_k).await;
    report.write(&output)?;

    let summary = serde_json::to_value(&report.summary)?;
    println!("=== EVAL SUMMARY ===");
    if let Some(fields) = summary.as_object() {
        for (key, value) in fields {
            println!("{}: {}", key, value);
        }
    }
    println!("\nSaved: {}", output);
    Ok(())
}
