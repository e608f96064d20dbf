//! BM25 lexical search over the in-memory chunk store
//!
//! The inverted index is built once from the [`ChunkStore`] and never
//! mutated, so a single instance serves concurrent queries without locking.

use super::{RankedList, Retriever, RetrieverKind};
use citeforge_common::chunks::ChunkStore;
use citeforge_common::errors::Result;
use citeforge_common::text::tokenize;
use std::collections::HashMap;
use tracing::instrument;

/// Okapi BM25 parameters
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BM25Params {
    /// Term frequency saturation
    pub k1: f64,
    /// Document length normalization
    pub b: f64,
}

impl Default for BM25Params {
    fn default() -> Self {
        Self { k1: 1.5, b: 0.75 }
    }
}

#[derive(Debug, Clone, Copy)]
struct Posting {
    doc: usize,
    tf: u32,
}

/// BM25 retriever over tokenized chunk texts
#[derive(Debug)]
pub struct BM25Retriever {
    params: BM25Params,
    doc_ids: Vec<String>,
    doc_lens: Vec<usize>,
    avg_doc_len: f64,
    postings: HashMap<String, Vec<Posting>>,
}

impl BM25Retriever {
    /// Index every chunk of the store
    pub fn new(store: &ChunkStore, params: BM25Params) -> Self {
        let mut doc_ids = Vec::with_capacity(store.len());
        let mut doc_lens = Vec::with_capacity(store.len());
        let mut postings: HashMap<String, Vec<Posting>> = HashMap::new();

        for (doc, chunk) in store.iter().enumerate() {
            let tokens = tokenize(&chunk.text);
            doc_ids.push(chunk.id.clone());
            doc_lens.push(tokens.len());

            let mut tf: HashMap<String, u32> = HashMap::new();
            for token in tokens {
                *tf.entry(token).or_insert(0) += 1;
            }
            for (term, tf) in tf {
                postings.entry(term).or_default().push(Posting { doc, tf });
            }
        }

        let total_len: usize = doc_lens.iter().sum();
        let avg_doc_len = if total_len == 0 {
            1.0
        } else {
            total_len as f64 / doc_lens.len() as f64
        };

        tracing::info!(
            documents = doc_ids.len(),
            terms = postings.len(),
            avg_doc_len = avg_doc_len,
            "BM25 index built"
        );

        Self {
            params,
            doc_ids,
            doc_lens,
            avg_doc_len,
            postings,
        }
    }

    /// Number of indexed chunks
    pub fn len(&self) -> usize {
        self.doc_ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.doc_ids.is_empty()
    }

    /// Inverse document frequency, never negative
    fn idf(&self, doc_freq: usize) -> f64 {
        let n = self.doc_ids.len() as f64;
        let df = doc_freq as f64;
        (1.0 + (n - df + 0.5) / (df + 0.5)).ln()
    }

    /// Score every chunk that shares a term with the query and return the
    /// best `depth`, highest score first, equal scores by chunk id.
    pub fn search(&self, query: &str, depth: usize) -> RankedList {
        if self.is_empty() || depth == 0 {
            return RankedList::empty(RetrieverKind::Keyword);
        }

        let BM25Params { k1, b } = self.params;
        let mut scores: HashMap<usize, f64> = HashMap::new();

        // Repeated query terms count once per occurrence
        for term in tokenize(query) {
            let Some(postings) = self.postings.get(&term) else {
                continue;
            };
            let idf = self.idf(postings.len());
            for posting in postings {
                let tf = posting.tf as f64;
                let dl = self.doc_lens[posting.doc] as f64;
                let norm = k1 * (1.0 - b + b * dl / self.avg_doc_len);
                *scores.entry(posting.doc).or_insert(0.0) += idf * tf * (k1 + 1.0) / (tf + norm);
            }
        }

        let mut hits: Vec<(usize, f64)> = scores.into_iter().filter(|(_, s)| *s > 0.0).collect();
        hits.sort_by(|a, b| {
            b.1.total_cmp(&a.1)
                .then_with(|| self.doc_ids[a.0].cmp(&self.doc_ids[b.0]))
        });
        hits.truncate(depth);

        RankedList::from_ordered(
            RetrieverKind::Keyword,
            hits.into_iter()
                .map(|(doc, score)| (self.doc_ids[doc].clone(), score as f32)),
        )
    }
}

#[async_trait::async_trait]
impl Retriever for BM25Retriever {
    #[instrument(skip(self), fields(retriever = "bm25"))]
    async fn retrieve(&self, query: &str, depth: usize) -> Result<RankedList> {
        let list = self.search(query, depth);
        tracing::debug!(hits = list.len(), "BM25 search complete");
        Ok(list)
    }

    fn kind(&self) -> RetrieverKind {
        RetrieverKind::Keyword
    }
}
