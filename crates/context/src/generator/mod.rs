//! Text generation backends
//!
//! A generator turns chat messages into a lazy, finite stream of text
//! fragments. The pipeline owns timeouts and cancellation; generators only
//! produce fragments.

mod openai;
mod scripted;

pub use openai::{OpenAIGenerator, SseDecoder, SseEvent};
pub use scripted::{Script, ScriptedGenerator};

use crate::prompts::ChatMessage;
use citeforge_common::config::GeneratorConfig;
use citeforge_common::errors::{AppError, Result};
use futures::stream::BoxStream;
use std::sync::Arc;

/// Fragments of one answer, in order
pub type FragmentStream = BoxStream<'static, Result<String>>;

#[async_trait::async_trait]
pub trait Generator: Send + Sync {
    /// Start a generation; fragments arrive as the backend produces them
    async fn generate(&self, messages: Vec<ChatMessage>) -> Result<FragmentStream>;

    /// Backend name for logs
    fn name(&self) -> &str;
}

/// Create a generator based on configuration
pub fn create_generator(config: &GeneratorConfig) -> Result<Arc<dyn Generator>> {
    match config.provider.to_ascii_lowercase().as_str() {
        "openai" => Ok(Arc::new(OpenAIGenerator::new(config)?)),
        "scripted" => Ok(Arc::new(ScriptedGenerator::new(Script::Extractive))),
        other => Err(AppError::Configuration {
            message: format!("unknown generator provider: {}", other),
        }),
    }
}
