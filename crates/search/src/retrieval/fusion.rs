//! Reciprocal Rank Fusion (RRF) for combining ranked lists
//!
//! RRF only looks at rank positions, so BM25 scores and cosine similarities
//! never have to be normalized against each other:
//!
//! ```text
//! score(d) = Σ over lists containing d of  weight(list) / (k + rank(d, list))
//! ```
//!
//! A chunk missing from a list gets nothing from that list. Exact ties are
//! broken by the best rank the chunk achieved in any list, then by chunk id.

use super::{RankedList, RetrieverKind};
use citeforge_common::errors::{AppError, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Standard RRF smoothing constant
pub const DEFAULT_RRF_K: f64 = 60.0;

/// RRF fusion parameters
#[derive(Debug, Clone, PartialEq)]
pub struct RRFusion {
    /// Smoothing constant k
    k: f64,

    /// Weight for BM25 lists
    keyword_weight: f64,

    /// Weight for vector lists
    vector_weight: f64,
}

impl Default for RRFusion {
    fn default() -> Self {
        Self {
            k: DEFAULT_RRF_K,
            keyword_weight: 1.0,
            vector_weight: 1.0,
        }
    }
}

/// One chunk of the fused ranking
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FusedEntry {
    pub chunk_id: String,
    pub score: f64,
    /// Best rank across contributing lists
    pub best_rank: usize,
    /// Rank in the BM25 list, if the chunk appeared there
    pub bm25_rank: Option<usize>,
    /// Rank in the vector list, if the chunk appeared there
    pub vector_rank: Option<usize>,
}

/// Fused ranking, best first, capped at top-k
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FusedResult {
    entries: Vec<FusedEntry>,
}

impl FusedResult {
    pub fn entries(&self) -> &[FusedEntry] {
        &self.entries
    }

    pub fn iter(&self) -> impl Iterator<Item = &FusedEntry> {
        self.entries.iter()
    }

    pub fn chunk_ids(&self) -> Vec<&str> {
        self.entries.iter().map(|e| e.chunk_id.as_str()).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// No evidence: every input list was empty
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl RRFusion {
    /// Create with a custom constant and per-retriever weights.
    ///
    /// `k` must be positive; weights must be finite and non-negative.
    pub fn new(k: f64, keyword_weight: f64, vector_weight: f64) -> Result<Self> {
        if !(k.is_finite() && k > 0.0) {
            return Err(AppError::Validation {
                message: format!("RRF constant must be positive, got {}", k),
                field: Some("rrf_k".to_string()),
            });
        }
        for (field, weight) in [("keyword_weight", keyword_weight), ("vector_weight", vector_weight)] {
            if !(weight.is_finite() && weight >= 0.0) {
                return Err(AppError::Validation {
                    message: format!("RRF weight must be non-negative, got {}", weight),
                    field: Some(field.to_string()),
                });
            }
        }
        Ok(Self {
            k,
            keyword_weight,
            vector_weight,
        })
    }

    pub fn k(&self) -> f64 {
        self.k
    }

    pub fn weight(&self, retriever: RetrieverKind) -> f64 {
        match retriever {
            RetrieverKind::Keyword => self.keyword_weight,
            RetrieverKind::Vector => self.vector_weight,
        }
    }

    /// Fuse ranked lists into a single ranking of at most `top_k` chunks
    pub fn fuse(&self, lists: &[RankedList], top_k: usize) -> FusedResult {
        let mut fused: HashMap<&str, FusedEntry> = HashMap::new();

        for list in lists {
            let weight = self.weight(list.retriever);
            for entry in list.iter() {
                let contribution = weight / (self.k + entry.rank as f64);
                let slot = fused
                    .entry(entry.chunk_id.as_str())
                    .or_insert_with(|| FusedEntry {
                        chunk_id: entry.chunk_id.clone(),
                        score: 0.0,
                        best_rank: entry.rank,
                        bm25_rank: None,
                        vector_rank: None,
                    });
                slot.score += contribution;
                slot.best_rank = slot.best_rank.min(entry.rank);

                let rank_slot = match list.retriever {
                    RetrieverKind::Keyword => &mut slot.bm25_rank,
                    RetrieverKind::Vector => &mut slot.vector_rank,
                };
                *rank_slot = Some(rank_slot.map_or(entry.rank, |r| r.min(entry.rank)));
            }
        }

        let mut entries: Vec<FusedEntry> = fused.into_values().collect();
        entries.sort_by(|a, b| {
            b.score
                .total_cmp(&a.score)
                .then_with(|| a.best_rank.cmp(&b.best_rank))
                .then_with(|| a.chunk_id.cmp(&b.chunk_id))
        });
        entries.truncate(top_k);

        FusedResult { entries }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn list(retriever: RetrieverKind, ids: &[&str]) -> RankedList {
        RankedList::from_ordered(retriever, ids.iter().map(|id| (id.to_string(), 0.0)))
    }

    fn score_of(result: &FusedResult, id: &str) -> f64 {
        result
            .iter()
            .find(|e| e.chunk_id == id)
            .map(|e| e.score)
            .unwrap()
    }

    #[test]
    fn test_rrf_scores_follow_formula() {
        let fusion = RRFusion::default();
        let a = list(RetrieverKind::Keyword, &["c3", "c1", "c5"]);
        let b = list(RetrieverKind::Vector, &["c1", "c7", "c3"]);

        let result = fusion.fuse(&[a, b], 10);

        assert_eq!(score_of(&result, "c1"), 1.0 / 62.0 + 1.0 / 61.0);
        assert_eq!(score_of(&result, "c3"), 1.0 / 61.0 + 1.0 / 63.0);
        assert_eq!(score_of(&result, "c7"), 1.0 / 62.0);
        assert_eq!(score_of(&result, "c5"), 1.0 / 63.0);
        assert_eq!(result.chunk_ids(), vec!["c1", "c3", "c7", "c5"]);

        let c3 = &result.entries()[1];
        assert_eq!(c3.bm25_rank, Some(1));
        assert_eq!(c3.vector_rank, Some(3));
        assert_eq!(c3.best_rank, 1);
    }

    #[test]
    fn test_rank_one_in_one_list_beats_rank_two_in_both() {
        let fusion = RRFusion::default();
        let a = list(RetrieverKind::Keyword, &["c3", "c1", "c5"]);
        let b = list(RetrieverKind::Vector, &["c7", "c1", "c3"]);

        let result = fusion.fuse(&[a, b], 10);

        // 1/61 + 1/63 > 2/62
        assert_eq!(result.chunk_ids()[0], "c3");
        assert!(score_of(&result, "c3") > score_of(&result, "c1"));
    }

    #[test]
    fn test_single_list_preserves_order() {
        let fusion = RRFusion::default();
        let a = list(RetrieverKind::Vector, &["z", "m", "a", "q"]);
        let result = fusion.fuse(&[a], 10);
        assert_eq!(result.chunk_ids(), vec!["z", "m", "a", "q"]);
        assert_eq!(result.entries()[0].score, 1.0 / 61.0);
    }

    #[test]
    fn test_absent_chunk_is_not_penalized() {
        let fusion = RRFusion::default();
        let a = list(RetrieverKind::Keyword, &["x", "y"]);
        let b = list(RetrieverKind::Vector, &["y", "z"]);

        let alone = fusion.fuse(&[a.clone()], 10);
        let both = fusion.fuse(&[a, b], 10);

        assert_eq!(score_of(&alone, "x"), score_of(&both, "x"));
    }

    #[test]
    fn test_exact_ties_break_by_best_rank_then_id() {
        let fusion = RRFusion::default();
        // p: ranks 1 and 3; q: ranks 3 and 1; r/s: rank 2 in one list each
        let a = list(RetrieverKind::Keyword, &["p", "s", "q"]);
        let b = list(RetrieverKind::Vector, &["q", "r", "p"]);

        let result = fusion.fuse(&[a, b], 10);

        assert_eq!(score_of(&result, "p"), score_of(&result, "q"));
        assert_eq!(score_of(&result, "r"), score_of(&result, "s"));
        assert_eq!(result.chunk_ids(), vec!["p", "q", "r", "s"]);
    }

    #[test]
    fn test_weights_bias_the_ranking() {
        let fusion = RRFusion::new(60.0, 1.0, 3.0).unwrap();
        let a = list(RetrieverKind::Keyword, &["kw"]);
        let b = list(RetrieverKind::Vector, &["vec"]);

        let result = fusion.fuse(&[a, b], 10);
        assert_eq!(result.chunk_ids(), vec!["vec", "kw"]);
        assert_eq!(score_of(&result, "vec"), 3.0 / 61.0);
    }

    #[test]
    fn test_top_k_truncates_final_output() {
        let fusion = RRFusion::default();
        let a = list(RetrieverKind::Keyword, &["a", "b", "c", "d"]);
        let result = fusion.fuse(&[a], 2);
        assert_eq!(result.chunk_ids(), vec!["a", "b"]);
    }

    #[test]
    fn test_empty_inputs_yield_empty_result() {
        let fusion = RRFusion::default();
        assert!(fusion.fuse(&[], 8).is_empty());
        assert!(fusion
            .fuse(
                &[
                    RankedList::empty(RetrieverKind::Keyword),
                    RankedList::empty(RetrieverKind::Vector)
                ],
                8
            )
            .is_empty());
    }

    #[test]
    fn test_deterministic_across_runs() {
        let fusion = RRFusion::default();
        let a = list(RetrieverKind::Keyword, &["d", "b", "a", "e", "c"]);
        let b = list(RetrieverKind::Vector, &["c", "e", "a", "f", "b"]);

        let first = serde_json::to_string(&fusion.fuse(&[a.clone(), b.clone()], 10)).unwrap();
        for _ in 0..10 {
            let again = serde_json::to_string(&fusion.fuse(&[a.clone(), b.clone()], 10)).unwrap();
            assert_eq!(first, again);
        }
    }

    #[test]
    fn test_rejects_invalid_parameters() {
        assert!(RRFusion::new(0.0, 1.0, 1.0).is_err());
        assert!(RRFusion::new(-5.0, 1.0, 1.0).is_err());
        assert!(RRFusion::new(f64::NAN, 1.0, 1.0).is_err());
        assert!(RRFusion::new(60.0, -1.0, 1.0).is_err());
        assert!(RRFusion::new(60.0, 1.0, f64::INFINITY).is_err());
        assert!(RRFusion::new(60.0, 0.0, 1.0).is_ok());
    }
}
