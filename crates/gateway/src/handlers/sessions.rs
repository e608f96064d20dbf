//! Session and question-answering handlers

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use citeforge_common::{
    errors::{AppError, Result},
    history::{Turn, UsedCitation},
};
use citeforge_context::Evidence;
use citeforge_search::{RetrievalMode, RetrievalWarning};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;
use validator::Validate;

use super::{resolve_mode, validate_request};
use crate::AppState;

/// Create session response
#[derive(Serialize)]
pub struct CreateSessionResponse {
    pub session_id: Uuid,
    pub created_at: String,
}

/// Session state response
#[derive(Serialize)]
pub struct SessionResponse {
    pub session_id: Uuid,
    pub created_at: String,
    pub turns: Vec<Turn>,
}

/// Ask request
#[derive(Debug, Deserialize, Validate)]
pub struct AskRequest {
    #[validate(length(min = 1, max = 4000))]
    pub question: String,

    /// bm25, vector or hybrid; the configured default when absent
    #[serde(default)]
    pub mode: Option<String>,
}

/// Ask response
#[derive(Serialize)]
pub struct AskResponse {
    pub session_id: Uuid,
    pub answer: String,
    pub citations: Vec<UsedCitation>,
    pub evidence: Evidence,
    pub mode: RetrievalMode,
    pub retrieved: usize,
    pub warnings: Vec<RetrievalWarning>,
    pub latency_ms: u64,
}

/// Create a new session
pub async fn create_session(
    State(state): State<AppState>,
) -> Result<(StatusCode, Json<CreateSessionResponse>)> {
    let session_id = state.sessions.create().await;
    let created_at = state.sessions.get(session_id).await?.read().await.created_at;

    tracing::info!(session_id = %session_id, "Session created");

    Ok((
        StatusCode::CREATED,
        Json(CreateSessionResponse {
            session_id,
            created_at: created_at.to_rfc3339(),
        }),
    ))
}

/// Get session state
pub async fn get_session(
    State(state): State<AppState>,
    Path(session_id): Path<Uuid>,
) -> Result<Json<SessionResponse>> {
    let session = state.sessions.get(session_id).await?;
    let log = session.read().await;

    Ok(Json(SessionResponse {
        session_id,
        created_at: log.created_at.to_rfc3339(),
        turns: log.turns().to_vec(),
    }))
}

/// End a session and drop its history
pub async fn delete_session(
    State(state): State<AppState>,
    Path(session_id): Path<Uuid>,
) -> Result<StatusCode> {
    state.sessions.remove(session_id).await?;
    tracing::info!(session_id = %session_id, "Session deleted");
    Ok(StatusCode::NO_CONTENT)
}

/// Answer a question within a session and record the exchange
pub async fn ask(
    State(state): State<AppState>,
    Path(session_id): Path<Uuid>,
    Json(request): Json<AskRequest>,
) -> Result<Json<AskResponse>> {
    validate_request(&request)?;
    let mode = resolve_mode(request.mode.as_deref(), state.default_mode)?;
    let session = state.sessions.get(session_id).await?;

    // Dropping this handler (client gone) cancels the turn
    let cancel = CancellationToken::new();
    let guard = cancel.clone().drop_guard();

    let pipeline = state.components.pipeline.clone();
    let question = request.question;
    let turn = tokio::spawn(async move {
        let history = session.read().await.clone();
        let outcome = pipeline.answer(&question, mode, &history, &cancel).await?;
        outcome.record(&question, &mut *session.write().await);
        Ok::<_, AppError>(outcome)
    });

    let outcome = turn.await.map_err(|e| AppError::Internal {
        message: format!("turn task failed: {}", e),
    })??;
    guard.disarm();

    tracing::info!(
        session_id = %session_id,
        mode = %mode,
        citations = outcome.citations.len(),
        evidence = ?outcome.evidence,
        latency_ms = outcome.latency_ms,
        "Question answered"
    );

    Ok(Json(AskResponse {
        session_id,
        retrieved: outcome.retrieval.fused.len(),
        warnings: outcome.retrieval.warnings,
        answer: outcome.answer,
        citations: outcome.citations,
        evidence: outcome.evidence,
        mode,
        latency_ms: outcome.latency_ms,
    }))
}
