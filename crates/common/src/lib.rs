//! CiteForge Common Library
//!
//! Shared code for all CiteForge crates including:
//! - Chunk store (read-only corpus loaded from JSON Lines)
//! - Embedding client abstraction
//! - Error types and handling
//! - Configuration management
//! - Conversation history
//! - Tokenization
//! - Metrics and observability

pub mod chunks;
pub mod config;
pub mod embeddings;
pub mod errors;
pub mod history;
pub mod metrics;
pub mod telemetry;
pub mod text;

// Re-export commonly used types
pub use chunks::{Chunk, ChunkStore};
pub use config::AppConfig;
pub use embeddings::Embedder;
pub use errors::{AppError, Result};
pub use history::{ConversationLog, Role, SessionRegistry, Turn, UsedCitation};

/// Application version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Default embedding model
pub const DEFAULT_EMBEDDING_MODEL: &str = "text-embedding-3-small";

/// Default embedding dimension for the hashing embedder
pub const DEFAULT_EMBEDDING_DIMENSION: usize = 384;
