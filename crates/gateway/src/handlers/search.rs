//! Retrieval-only search handler

use axum::{extract::State, Json};
use citeforge_common::errors::{AppError, Result};
use citeforge_search::{RetrievalMode, RetrievalWarning};
use serde::{Deserialize, Serialize};
use validator::Validate;

use super::{resolve_mode, validate_request};
use crate::AppState;

const SNIPPET_CHARS: usize = 300;

/// Search request
#[derive(Debug, Deserialize, Validate)]
pub struct SearchRequest {
    #[validate(length(min = 1, max = 1000))]
    pub query: String,

    /// Search mode: bm25, vector, hybrid
    #[serde(default)]
    pub mode: Option<String>,

    /// Maximum results to return
    #[serde(default)]
    #[validate(range(min = 1, max = 100))]
    pub top_k: Option<usize>,
}

/// Search response
#[derive(Serialize)]
pub struct SearchResponse {
    pub query: String,
    pub mode: RetrievalMode,
    pub total_results: usize,
    pub results: Vec<SearchResultItem>,
    pub warnings: Vec<RetrievalWarning>,
    pub processing_time_ms: u64,
}

#[derive(Serialize)]
pub struct SearchResultItem {
    pub chunk_id: String,
    pub source: String,
    pub position: u32,
    pub score: f64,
    pub bm25_rank: Option<usize>,
    pub vector_rank: Option<usize>,
    pub snippet: String,
}

/// Perform a search
pub async fn search(
    State(state): State<AppState>,
    Json(request): Json<SearchRequest>,
) -> Result<Json<SearchResponse>> {
    validate_request(&request)?;
    let query = request.query.trim();
    if query.is_empty() {
        return Err(AppError::Validation {
            message: "Query must not be blank".to_string(),
            field: Some("query".to_string()),
        });
    }
    let mode = resolve_mode(request.mode.as_deref(), state.default_mode)?;

    let searcher = &state.components.searcher;
    let top_k = request.top_k.unwrap_or_else(|| searcher.top_k());
    let outcome = searcher.search_with_limit(query, mode, top_k).await;

    let store = &state.components.store;
    let results: Vec<SearchResultItem> = outcome
        .fused
        .iter()
        .filter_map(|entry| {
            let chunk = store.get(&entry.chunk_id)?;
            Some(SearchResultItem {
                chunk_id: entry.chunk_id.clone(),
                source: chunk.source.clone(),
                position: chunk.position,
                score: entry.score,
                bm25_rank: entry.bm25_rank,
                vector_rank: entry.vector_rank,
                snippet: chunk.text.chars().take(SNIPPET_CHARS).collect(),
            })
        })
        .collect();

    tracing::info!(
        mode = %mode,
        results = results.len(),
        warnings = outcome.warnings.len(),
        "Search completed"
    );

    Ok(Json(SearchResponse {
        query: query.to_string(),
        mode,
        total_results: results.len(),
        results,
        warnings: outcome.warnings,
        processing_time_ms: outcome.elapsed_ms,
    }))
}
