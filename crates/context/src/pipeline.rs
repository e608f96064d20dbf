//! Turn pipeline
//!
//! One conversational turn: retrieve, pack, generate, then resolve the
//! citations the answer used. Every failure is scoped to the turn; nothing is
//! written to the conversation log here, the caller records a finished
//! [`TurnOutcome`] itself.

use crate::citations::CitationFilter;
use crate::generator::Generator;
use crate::packer::{ContextPacker, PackEntry};
use crate::prompts::{build_messages, INSUFFICIENT_EVIDENCE_ANSWER};
use citeforge_common::chunks::ChunkStore;
use citeforge_common::errors::{AppError, Result};
use citeforge_common::history::{ConversationLog, UsedCitation};
use citeforge_common::metrics;
use citeforge_search::{RetrievalMode, RetrievalWarning, SearchOutcome, Searcher};
use futures::StreamExt;
use serde::Serialize;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::instrument;

/// Whether the answer was generated from retrieved evidence
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Evidence {
    Grounded,
    /// Nothing retrieved; the canned decline was returned without generation
    Empty,
}

/// Everything one turn produced
#[derive(Debug, Clone, Serialize)]
pub struct TurnOutcome {
    pub answer: String,
    pub citations: Vec<UsedCitation>,
    pub evidence: Evidence,
    pub retrieval: SearchOutcome,
    /// The numbered evidence the generator saw
    pub pack: Vec<PackEntry>,
    pub latency_ms: u64,
}

impl TurnOutcome {
    pub fn warnings(&self) -> &[RetrievalWarning] {
        &self.retrieval.warnings
    }

    /// Append the question and this answer to a session log
    pub fn record(&self, question: &str, log: &mut ConversationLog) {
        log.append_exchange(question.trim(), self.answer.clone(), self.citations.clone());
    }
}

pub struct RagPipeline {
    searcher: Arc<Searcher>,
    store: Arc<ChunkStore>,
    packer: ContextPacker,
    generator: Arc<dyn Generator>,
    history_window: usize,
    generation_timeout: Duration,
}

impl RagPipeline {
    pub fn new(
        searcher: Arc<Searcher>,
        store: Arc<ChunkStore>,
        packer: ContextPacker,
        generator: Arc<dyn Generator>,
    ) -> Self {
        Self {
            searcher,
            store,
            packer,
            generator,
            history_window: 12,
            generation_timeout: Duration::from_secs(60),
        }
    }

    /// Prior turns passed to the generator
    pub fn with_history_window(mut self, turns: usize) -> Self {
        self.history_window = turns;
        self
    }

    /// Upper bound on the whole generation, first fragment to last
    pub fn with_generation_timeout(mut self, timeout: Duration) -> Self {
        self.generation_timeout = timeout;
        self
    }

    pub fn searcher(&self) -> &Searcher {
        &self.searcher
    }

    pub fn store(&self) -> &ChunkStore {
        &self.store
    }

    pub fn generator_name(&self) -> &str {
        self.generator.name()
    }

    /// Answer one question within a session
    pub async fn answer(
        &self,
        question: &str,
        mode: RetrievalMode,
        history: &ConversationLog,
        cancel: &CancellationToken,
    ) -> Result<TurnOutcome> {
        self.answer_with(question, mode, history, cancel, |_| {}).await
    }

    /// Like [`answer`](Self::answer), handing each fragment to `on_fragment`
    /// as it arrives.
    #[instrument(
        skip(self, question, mode, history, cancel, on_fragment),
        fields(mode = %mode, session = %history.session_id)
    )]
    pub async fn answer_with<F>(
        &self,
        question: &str,
        mode: RetrievalMode,
        history: &ConversationLog,
        cancel: &CancellationToken,
        mut on_fragment: F,
    ) -> Result<TurnOutcome>
    where
        F: FnMut(&str) + Send,
    {
        let start = Instant::now();
        let question = question.trim();
        if question.is_empty() {
            return Err(AppError::Validation {
                message: "Question must not be empty".to_string(),
                field: Some("question".to_string()),
            });
        }
        if cancel.is_cancelled() {
            return Err(AppError::GenerationCancelled);
        }

        let retrieval = self.searcher.search(question, mode).await;
        let (pack, index) = self.packer.pack(&retrieval.fused, &self.store);

        if pack.is_empty() {
            metrics::record_empty_evidence(mode.as_str());
            tracing::info!(
                warnings = retrieval.warnings.len(),
                "No evidence retrieved, skipping generation"
            );
            return Ok(TurnOutcome {
                answer: INSUFFICIENT_EVIDENCE_ANSWER.to_string(),
                citations: Vec::new(),
                evidence: Evidence::Empty,
                retrieval,
                pack: Vec::new(),
                latency_ms: start.elapsed().as_millis() as u64,
            });
        }

        let messages = build_messages(
            question,
            pack.rendered(),
            &history.window(self.history_window),
        );

        let generation_start = Instant::now();
        let answer = match self.generate(messages, cancel, &mut on_fragment).await {
            Ok(answer) => answer,
            Err(e) => {
                let status = match e {
                    AppError::GenerationTimeout { .. } => "timeout",
                    AppError::GenerationCancelled => "cancelled",
                    _ => "failed",
                };
                metrics::record_generation(generation_start.elapsed().as_secs_f64(), status, 0);
                tracing::warn!(error = %e, status = status, "Generation did not complete");
                return Err(e);
            }
        };

        // Citations are resolved only once the stream is complete
        let citations = CitationFilter::filter(&answer, &index);
        metrics::record_generation(
            generation_start.elapsed().as_secs_f64(),
            "completed",
            citations.len(),
        );

        tracing::info!(
            packed = pack.len(),
            citations = citations.len(),
            answer_chars = answer.chars().count(),
            "Turn complete"
        );

        Ok(TurnOutcome {
            answer,
            citations,
            evidence: Evidence::Grounded,
            retrieval,
            pack: pack.entries().to_vec(),
            latency_ms: start.elapsed().as_millis() as u64,
        })
    }

    /// Drain the generator stream under the timeout and the cancellation token
    async fn generate<F>(
        &self,
        messages: Vec<crate::prompts::ChatMessage>,
        cancel: &CancellationToken,
        on_fragment: &mut F,
    ) -> Result<String>
    where
        F: FnMut(&str) + Send,
    {
        let deadline = tokio::time::Instant::now() + self.generation_timeout;
        let timed_out = || AppError::GenerationTimeout {
            timeout_ms: self.generation_timeout.as_millis() as u64,
        };

        let mut stream = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(AppError::GenerationCancelled),
            _ = tokio::time::sleep_until(deadline) => return Err(timed_out()),
            started = self.generator.generate(messages) => started.map_err(generation_error)?,
        };

        let mut answer = String::new();
        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(AppError::GenerationCancelled),
                _ = tokio::time::sleep_until(deadline) => return Err(timed_out()),
                next = stream.next() => match next {
                    Some(Ok(fragment)) => {
                        on_fragment(&fragment);
                        answer.push_str(&fragment);
                    }
                    Some(Err(e)) => return Err(generation_error(e)),
                    None => break,
                },
            }
        }
        Ok(answer.trim().to_string())
    }
}

fn generation_error(err: AppError) -> AppError {
    match err {
        AppError::GenerationFailed { .. }
        | AppError::GenerationTimeout { .. }
        | AppError::GenerationCancelled => err,
        other => AppError::GenerationFailed {
            message: other.to_string(),
        },
    }
}
