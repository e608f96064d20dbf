//! Evaluation harness
//!
//! Runs a fixed question set through the pipeline and measures grounding:
//! how often answers cite evidence, how many sources they draw on, and how
//! often they decline.

use crate::pipeline::RagPipeline;
use chrono::{DateTime, Utc};
use citeforge_common::errors::Result;
use citeforge_common::history::{ConversationLog, UsedCitation};
use citeforge_search::RetrievalMode;
use regex_lite::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;
use std::sync::OnceLock;
use std::time::Instant;
use tokio_util::sync::CancellationToken;

/// Where `evals` writes its report unless told otherwise
pub const DEFAULT_OUTPUT_PATH: &str = "data/processed/evals.json";

/// Retrieval depth used for evaluation runs
pub const DEFAULT_EVAL_TOP_K: usize = 15;

const ANSWER_PREVIEW_CHARS: usize = 300;

static REFUSAL_PATTERN: OnceLock<Regex> = OnceLock::new();

fn refusal_pattern() -> &'static Regex {
    REFUSAL_PATTERN.get_or_init(|| {
        Regex::new(
            r"(?i)\b(i\s+don['’]t\s+know|not\s+enough\s+context|not\s+enough\s+detail|provided\s+context\s+does\s+not|can['’]t\s+responsibly|i\s+don['’]t\s+have\s+enough)\b",
        )
        .expect("valid refusal pattern")
    })
}

/// True for an empty answer or one that reads like "not in the context"
pub fn is_refusal_like(answer: &str) -> bool {
    answer.trim().is_empty() || refusal_pattern().is_match(answer)
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvalQuestion {
    pub id: String,
    pub question: String,
    #[serde(default)]
    pub mode: RetrievalMode,
}

impl EvalQuestion {
    fn hybrid(id: &str, question: &str) -> Self {
        Self {
            id: id.to_string(),
            question: question.to_string(),
            mode: RetrievalMode::Hybrid,
        }
    }
}

/// Starter question set for the bundled travel-guide corpus
pub fn default_questions() -> Vec<EvalQuestion> {
    vec![
        EvalQuestion::hybrid(
            "itinerary_first_timer",
            "Plan a 2-day first-timer weekend in SF with food + transit tips",
        ),
        EvalQuestion::hybrid(
            "airport_to_city",
            "How do I get to downtown SF from SFO using transit?",
        ),
        EvalQuestion::hybrid(
            "areas_to_stay",
            "What are good areas to stay for a first-time visitor and why?",
        ),
        EvalQuestion::hybrid(
            "muni_line_numbers_sfo_to_union_square",
            "Give me the exact Muni/BART line numbers and step-by-step route from SFO to Union Square.",
        ),
        EvalQuestion::hybrid(
            "ferry_building_hours",
            "What time does the Ferry Building open and close today?",
        ),
        EvalQuestion::hybrid(
            "quiet_stay_easy_transit",
            "Where should I stay if I want quiet nights but still easy public transit access, and why?",
        ),
    ]
}

/// Read a question set from a JSON array file
pub fn load_questions(path: impl AsRef<Path>) -> Result<Vec<EvalQuestion>> {
    let raw = std::fs::read_to_string(path)?;
    Ok(serde_json::from_str(&raw)?)
}

/// Result for one question
#[derive(Debug, Clone, Serialize)]
pub struct EvalRow {
    pub id: String,
    pub mode: RetrievalMode,
    pub question: String,
    pub latency_s: f64,
    pub answer_len: usize,
    pub answer_preview: String,
    pub citations_used: usize,
    pub has_citation: bool,
    pub unique_sources_used: usize,
    pub retrieval_count: usize,
    pub retrieval_unique_sources: usize,
    pub refusal_like: bool,
    pub citations: Vec<UsedCitation>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EvalSummary {
    pub n_questions: usize,
    pub top_k: usize,
    pub rrf_k: f64,
    pub total_time_s: f64,
    pub citation_coverage: f64,
    pub avg_citations_used: f64,
    pub empty_answer_rate: f64,
    pub avg_latency_s: f64,
    pub avg_unique_sources_used: f64,
    pub avg_retrieval_unique_sources: f64,
    pub refusal_rate: f64,
    pub error_rate: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct EvalReport {
    pub generated_at: DateTime<Utc>,
    pub summary: EvalSummary,
    pub rows: Vec<EvalRow>,
}

impl EvalReport {
    /// Write the report as pretty JSON, creating parent directories
    pub fn write(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }
}

fn round3(value: f64) -> f64 {
    (value * 1000.0).round() / 1000.0
}

fn mean<F>(rows: &[EvalRow], f: F) -> f64
where
    F: Fn(&EvalRow) -> f64,
{
    if rows.is_empty() {
        return 0.0;
    }
    round3(rows.iter().map(f).sum::<f64>() / rows.len() as f64)
}

fn rate<F>(rows: &[EvalRow], f: F) -> f64
where
    F: Fn(&EvalRow) -> bool,
{
    mean(rows, |r| if f(r) { 1.0 } else { 0.0 })
}

/// Aggregate per-question rows; every rate is 0 for an empty run
pub fn summarize(rows: &[EvalRow], top_k: usize, rrf_k: f64, total_time_s: f64) -> EvalSummary {
    EvalSummary {
        n_questions: rows.len(),
        top_k,
        rrf_k,
        total_time_s: round3(total_time_s),
        citation_coverage: rate(rows, |r| r.has_citation),
        avg_citations_used: mean(rows, |r| r.citations_used as f64),
        empty_answer_rate: rate(rows, |r| r.answer_len == 0),
        avg_latency_s: mean(rows, |r| r.latency_s),
        avg_unique_sources_used: mean(rows, |r| r.unique_sources_used as f64),
        avg_retrieval_unique_sources: mean(rows, |r| r.retrieval_unique_sources as f64),
        refusal_rate: rate(rows, |r| r.refusal_like),
        error_rate: rate(rows, |r| r.error.is_some()),
    }
}

/// Run each question in a fresh session and collect the report
pub async fn run_evals(pipeline: &RagPipeline, questions: &[EvalQuestion], rrf_k: f64) -> EvalReport {
    let started = Instant::now();
    let mut rows = Vec::with_capacity(questions.len());

    for item in questions {
        let start = Instant::now();
        let result = pipeline
            .answer(
                &item.question,
                item.mode,
                &ConversationLog::default(),
                &CancellationToken::new(),
            )
            .await;
        let latency_s = round3(start.elapsed().as_secs_f64());

        let row = match result {
            Ok(outcome) => {
                let answer = outcome.answer.trim();
                let retrieved_sources: HashSet<&str> = outcome
                    .retrieval
                    .fused
                    .iter()
                    .filter_map(|e| pipeline.store().get(&e.chunk_id))
                    .map(|c| c.source.as_str())
                    .filter(|s| !s.is_empty())
                    .collect();
                let used_sources: HashSet<&str> = outcome
                    .citations
                    .iter()
                    .map(|c| c.source.as_str())
                    .filter(|s| !s.is_empty())
                    .collect();

                EvalRow {
                    id: item.id.clone(),
                    mode: item.mode,
                    question: item.question.clone(),
                    latency_s,
                    answer_len: answer.chars().count(),
                    answer_preview: answer.chars().take(ANSWER_PREVIEW_CHARS).collect(),
                    citations_used: outcome.citations.len(),
                    has_citation: !outcome.citations.is_empty(),
                    unique_sources_used: used_sources.len(),
                    retrieval_count: outcome.retrieval.fused.len(),
                    retrieval_unique_sources: retrieved_sources.len(),
                    refusal_like: is_refusal_like(answer),
                    citations: outcome.citations.clone(),
                    error: None,
                }
            }
            Err(e) => {
                tracing::warn!(id = %item.id, error = %e, "Eval question failed");
                EvalRow {
                    id: item.id.clone(),
                    mode: item.mode,
                    question: item.question.clone(),
                    latency_s,
                    answer_len: 0,
                    answer_preview: String::new(),
                    citations_used: 0,
                    has_citation: false,
                    unique_sources_used: 0,
                    retrieval_count: 0,
                    retrieval_unique_sources: 0,
                    refusal_like: true,
                    citations: Vec::new(),
                    error: Some(e.to_string()),
                }
            }
        };
        rows.push(row);
    }

    let summary = summarize(
        &rows,
        pipeline.searcher().top_k(),
        rrf_k,
        started.elapsed().as_secs_f64(),
    );
    EvalReport {
        generated_at: Utc::now(),
        summary,
        rows,
    }
}
