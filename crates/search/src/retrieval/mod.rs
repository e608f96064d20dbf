//! Multi-modal retrieval system
//!
//! Provides three retrieval modes:
//! - BM25 search (lexical matching over the in-memory chunk store)
//! - Vector search (semantic similarity via an external vector index)
//! - Hybrid search (RRF fusion of BM25 + vector)
//!
//! Every ranker produces a [`RankedList`]; fusion is the only place lists meet.

mod bm25;
mod fusion;
mod hybrid;
mod vector;

pub use bm25::{BM25Params, BM25Retriever};
pub use fusion::{FusedEntry, FusedResult, RRFusion, DEFAULT_RRF_K};
pub use hybrid::{RetrievalWarning, SearchOutcome, Searcher};
pub use vector::VectorRetriever;

use citeforge_common::errors::{AppError, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;

/// Retrieval mode selected per request
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum RetrievalMode {
    /// BM25 lexical search only
    Bm25,
    /// Vector similarity search only
    Vector,
    /// Both, fused with RRF
    Hybrid,
}

impl RetrievalMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            RetrievalMode::Bm25 => "bm25",
            RetrievalMode::Vector => "vector",
            RetrievalMode::Hybrid => "hybrid",
        }
    }

    /// Rankers that take part in this mode
    pub fn retrievers(&self) -> &'static [RetrieverKind] {
        match self {
            RetrievalMode::Bm25 => &[RetrieverKind::Keyword],
            RetrievalMode::Vector => &[RetrieverKind::Vector],
            RetrievalMode::Hybrid => &[RetrieverKind::Keyword, RetrieverKind::Vector],
        }
    }

    pub fn uses(&self, kind: RetrieverKind) -> bool {
        self.retrievers().contains(&kind)
    }
}

impl Default for RetrievalMode {
    fn default() -> Self {
        RetrievalMode::Hybrid
    }
}

impl fmt::Display for RetrievalMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RetrievalMode {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "bm25" => Ok(RetrievalMode::Bm25),
            "vector" => Ok(RetrievalMode::Vector),
            "hybrid" => Ok(RetrievalMode::Hybrid),
            other => Err(AppError::Validation {
                message: format!(
                    "Unknown retrieval mode '{}', expected one of bm25, vector, hybrid",
                    other
                ),
                field: Some("mode".to_string()),
            }),
        }
    }
}

/// Which ranker produced a list
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum RetrieverKind {
    #[serde(rename = "bm25")]
    Keyword,
    Vector,
}

impl RetrieverKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            RetrieverKind::Keyword => "bm25",
            RetrieverKind::Vector => "vector",
        }
    }
}

impl fmt::Display for RetrieverKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One entry of a ranked list
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RankedEntry {
    pub chunk_id: String,
    /// 1-based position in the list
    pub rank: usize,
    /// Raw retriever score (BM25 score or similarity), informational only
    pub score: f32,
}

/// Ordered, duplicate-free output of one ranker for one query
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RankedList {
    pub retriever: RetrieverKind,
    entries: Vec<RankedEntry>,
}

impl RankedList {
    pub fn empty(retriever: RetrieverKind) -> Self {
        Self {
            retriever,
            entries: Vec::new(),
        }
    }

    /// Build a list from hits already in best-first order.
    ///
    /// Ranks are assigned from 1; a repeated chunk id keeps its first position.
    pub fn from_ordered<I>(retriever: RetrieverKind, hits: I) -> Self
    where
        I: IntoIterator<Item = (String, f32)>,
    {
        let mut seen = HashSet::new();
        let mut entries = Vec::new();
        for (chunk_id, score) in hits {
            if !seen.insert(chunk_id.clone()) {
                continue;
            }
            entries.push(RankedEntry {
                chunk_id,
                rank: entries.len() + 1,
                score,
            });
        }
        Self { retriever, entries }
    }

    pub fn entries(&self) -> &[RankedEntry] {
        &self.entries
    }

    pub fn iter(&self) -> impl Iterator<Item = &RankedEntry> {
        self.entries.iter()
    }

    pub fn chunk_ids(&self) -> Vec<&str> {
        self.entries.iter().map(|e| e.chunk_id.as_str()).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Common trait for all rankers
#[async_trait::async_trait]
pub trait Retriever: Send + Sync {
    /// Rank chunks for the query, returning at most `depth` entries
    async fn retrieve(&self, query: &str, depth: usize) -> Result<RankedList>;

    /// Which ranker this is
    fn kind(&self) -> RetrieverKind;
}
