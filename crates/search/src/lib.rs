//! CiteForge Search
//!
//! Hybrid retrieval over the chunk store:
//! - BM25 over an in-memory inverted index
//! - Vector search through a pluggable vector index (Qdrant or in-memory)
//! - Reciprocal Rank Fusion of whichever lists a mode asks for

pub mod index;
pub mod retrieval;

pub use index::{create_vector_index, IndexPoint, VectorHit, VectorIndex};
pub use retrieval::{
    FusedEntry, FusedResult, RRFusion, RankedEntry, RankedList, RetrievalMode, RetrievalWarning,
    Retriever, RetrieverKind, SearchOutcome, Searcher,
};
