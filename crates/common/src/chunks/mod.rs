//! Read-only chunk store
//!
//! Loads the corpus written by the ingestion collaborator (JSON Lines, one
//! chunk per line) and serves lookups by id. Records are validated once here;
//! everything downstream works with the fixed-field [`Chunk`].

use crate::errors::{AppError, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;
use std::sync::Arc;

/// A bounded span of source text with stable identity
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chunk {
    /// Unique, stable identifier
    pub id: String,

    /// Chunk content
    pub text: String,

    /// Document identifier (e.g. relative path of the source PDF)
    pub source: String,

    /// Ordinal of the chunk within its source
    pub position: u32,
}

/// Chunk id as written on disk: older exports used integer point ids
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawId {
    Text(String),
    Unsigned(u64),
    Signed(i64),
}

impl RawId {
    fn into_string(self) -> String {
        match self {
            RawId::Text(s) => s,
            RawId::Unsigned(n) => n.to_string(),
            RawId::Signed(n) => n.to_string(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct ChunkRecord {
    id: RawId,
    text: String,
    source: String,
    #[serde(alias = "chunk_index")]
    position: u32,
}

/// In-memory index of all corpus chunks.
///
/// Immutable after construction; share it as `Arc<ChunkStore>`.
#[derive(Debug, Default)]
pub struct ChunkStore {
    chunks: Vec<Chunk>,
    by_id: HashMap<String, usize>,
}

impl ChunkStore {
    /// Build a store from already-validated chunks
    pub fn from_chunks(chunks: Vec<Chunk>) -> Result<Self> {
        let mut store = ChunkStore {
            chunks: Vec::with_capacity(chunks.len()),
            by_id: HashMap::with_capacity(chunks.len()),
        };
        for (i, chunk) in chunks.into_iter().enumerate() {
            store.insert(chunk, i + 1)?;
        }
        Ok(store)
    }

    /// Parse JSON Lines from any reader. Blank lines are skipped.
    ///
    /// `position` may be spelled `chunk_index`, but a record carrying both is
    /// rejected as a duplicate field. Positions are non-negative integers; a
    /// negative or fractional position rejects the line.
    pub fn from_reader<R: BufRead>(reader: R) -> Result<Self> {
        let mut store = ChunkStore::default();

        for (i, line) in reader.lines().enumerate() {
            let line_no = i + 1;
            let line = line.map_err(|e| AppError::ChunkStore {
                line: line_no,
                message: e.to_string(),
            })?;
            let line = line.trim();
            if line.is_empty() {
                continue;
            }

            let record: ChunkRecord =
                serde_json::from_str(line).map_err(|e| AppError::ChunkStore {
                    line: line_no,
                    message: e.to_string(),
                })?;

            let chunk = Chunk {
                id: record.id.into_string(),
                text: record.text,
                source: record.source,
                position: record.position,
            };
            store.insert(chunk, line_no)?;
        }

        Ok(store)
    }

    /// Load the store from a JSON Lines file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path).map_err(|e| AppError::ChunkStore {
            line: 0,
            message: format!("cannot open {}: {}", path.display(), e),
        })?;
        let store = Self::from_reader(BufReader::new(file))?;

        tracing::info!(
            path = %path.display(),
            chunks = store.len(),
            sources = store.source_count(),
            "Chunk store loaded"
        );

        Ok(store)
    }

    /// Load and wrap for sharing across concurrent queries
    pub fn load_shared(path: impl AsRef<Path>) -> Result<Arc<Self>> {
        Self::load(path).map(Arc::new)
    }

    fn insert(&mut self, chunk: Chunk, line: usize) -> Result<()> {
        if chunk.id.trim().is_empty() {
            return Err(AppError::ChunkStore {
                line,
                message: "chunk id must not be empty".to_string(),
            });
        }
        if self.by_id.contains_key(&chunk.id) {
            return Err(AppError::DuplicateChunk { id: chunk.id, line });
        }
        self.by_id.insert(chunk.id.clone(), self.chunks.len());
        self.chunks.push(chunk);
        Ok(())
    }

    /// Look up a chunk by id
    pub fn get(&self, id: &str) -> Option<&Chunk> {
        self.by_id.get(id).map(|&i| &self.chunks[i])
    }

    /// Look up a chunk by id, failing if it is unknown
    pub fn require(&self, id: &str) -> Result<&Chunk> {
        self.get(id).ok_or_else(|| AppError::ChunkNotFound { id: id.to_string() })
    }

    pub fn contains(&self, id: &str) -> bool {
        self.by_id.contains_key(id)
    }

    /// Chunks in ingestion order
    pub fn iter(&self) -> impl Iterator<Item = &Chunk> {
        self.chunks.iter()
    }

    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    /// Number of distinct source documents
    pub fn source_count(&self) -> usize {
        let mut sources: Vec<&str> = self.chunks.iter().map(|c| c.source.as_str()).collect();
        sources.sort_unstable();
        sources.dedup();
        sources.len()
    }
}
