//! Scripted generator for tests and offline runs

use super::{FragmentStream, Generator};
use crate::prompts::ChatMessage;
use citeforge_common::errors::{AppError, Result};
use futures::stream::{self, StreamExt};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// What the generator answers with
#[derive(Debug, Clone)]
pub enum Script {
    /// Emit these fragments verbatim
    Fragments(Vec<String>),
    /// Quote the first context block and cite it as `[1]`
    Extractive,
    /// Fail before producing anything
    FailOnStart(String),
    /// Emit fragments, then fail
    FailMidStream { fragments: Vec<String>, message: String },
}

impl Script {
    /// Split a full answer into word-sized fragments
    pub fn answer(text: &str) -> Self {
        Script::Fragments(text.split_inclusive(' ').map(str::to_string).collect())
    }
}

/// Deterministic [`Generator`] that counts its calls
pub struct ScriptedGenerator {
    script: Script,
    delay: Duration,
    calls: AtomicUsize,
    emitted: Arc<AtomicUsize>,
    last_messages: Mutex<Option<Vec<ChatMessage>>>,
}

impl ScriptedGenerator {
    pub fn new(script: Script) -> Self {
        Self {
            script,
            delay: Duration::ZERO,
            calls: AtomicUsize::new(0),
            emitted: Arc::new(AtomicUsize::new(0)),
            last_messages: Mutex::new(None),
        }
    }

    /// Sleep before each fragment
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Number of `generate` calls so far
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Fragments handed to consumers so far, across all calls
    pub fn fragments_emitted(&self) -> usize {
        self.emitted.load(Ordering::SeqCst)
    }

    /// Messages of the most recent call
    pub fn last_messages(&self) -> Option<Vec<ChatMessage>> {
        self.last_messages.lock().ok().and_then(|m| m.clone())
    }

    fn pace(&self, items: Vec<Result<String>>) -> FragmentStream {
        let delay = self.delay;
        let emitted = self.emitted.clone();
        stream::iter(items)
            .then(move |item| {
                let emitted = emitted.clone();
                async move {
                    if !delay.is_zero() {
                        tokio::time::sleep(delay).await;
                    }
                    emitted.fetch_add(1, Ordering::SeqCst);
                    item
                }
            })
            .boxed()
    }
}

/// First block of the rendered context, quoted with its marker
fn extractive_answer(messages: &[ChatMessage]) -> String {
    let snippet = messages
        .iter()
        .rev()
        .find(|m| m.role == "user")
        .and_then(|m| m.content.split_once("CONTEXT:\n"))
        .and_then(|(_, context)| {
            let mut lines = context.lines();
            lines.find(|line| line.starts_with("[1] "))?;
            lines.next()
        })
        .map(str::trim)
        .filter(|s| !s.is_empty());

    match snippet {
        Some(text) => {
            let excerpt: String = text.chars().take(240).collect();
            format!("According to the guides: {} [1]", excerpt)
        }
        None => "I don't know: the provided context does not cover this.".to_string(),
    }
}

#[async_trait::async_trait]
impl Generator for ScriptedGenerator {
    async fn generate(&self, messages: Vec<ChatMessage>) -> Result<FragmentStream> {
        self.calls.fetch_add(1, Ordering::SeqCst);

        let items: Vec<Result<String>> = match &self.script {
            Script::Fragments(fragments) => fragments.iter().cloned().map(Ok).collect(),
            Script::Extractive => extractive_answer(&messages)
                .split_inclusive(' ')
                .map(|f| Ok(f.to_string()))
                .collect(),
            Script::FailOnStart(message) => {
                return Err(AppError::GenerationFailed {
                    message: message.clone(),
                })
            }
            Script::FailMidStream { fragments, message } => fragments
                .iter()
                .cloned()
                .map(Ok)
                .chain(std::iter::once(Err(AppError::GenerationFailed {
                    message: message.clone(),
                })))
                .collect(),
        };

        if let Ok(mut last) = self.last_messages.lock() {
            *last = Some(messages);
        }
        Ok(self.pace(items))
    }

    fn name(&self) -> &str {
        "scripted"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::prompts::build_messages;

    async fn collect(generator: &ScriptedGenerator, messages: Vec<ChatMessage>) -> Vec<Result<String>> {
        generator.generate(messages).await.unwrap().collect().await
    }

    #[tokio::test]
    async fn test_fragments_and_call_count() {
        let generator = ScriptedGenerator::new(Script::answer("Ride the cable car [1]."));
        let items = collect(&generator, vec![]).await;
        let text: String = items.into_iter().map(|r| r.unwrap()).collect();

        assert_eq!(text, "Ride the cable car [1].");
        assert_eq!(generator.calls(), 1);
        assert_eq!(generator.fragments_emitted(), 5);
    }

    #[tokio::test]
    async fn test_extractive_quotes_first_block() {
        let generator = ScriptedGenerator::new(Script::Extractive);
        let messages = build_messages(
            "How do I reach downtown?",
            "[1] source=bart.pdf position=2\nBART runs from SFO to Powell Street.\n",
            &[],
        );
        let text: String = collect(&generator, messages)
            .await
            .into_iter()
            .map(|r| r.unwrap())
            .collect();

        assert_eq!(text, "According to the guides: BART runs from SFO to Powell Street. [1]");
        assert_eq!(generator.last_messages().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_extractive_without_context_declines() {
        let generator = ScriptedGenerator::new(Script::Extractive);
        let text: String = collect(&generator, vec![ChatMessage::user("hi")])
            .await
            .into_iter()
            .map(|r| r.unwrap())
            .collect();
        assert!(text.starts_with("I don't know"));
    }

    #[tokio::test]
    async fn test_failures() {
        let generator = ScriptedGenerator::new(Script::FailOnStart("down".into()));
        assert!(generator.generate(vec![]).await.is_err());
        assert_eq!(generator.calls(), 1);

        let generator = ScriptedGenerator::new(Script::FailMidStream {
            fragments: vec!["partial ".into()],
            message: "reset".into(),
        });
        let items = collect(&generator, vec![]).await;
        assert_eq!(items.len(), 2);
        tokio_test::assert_ok!(&items[0]);
        assert!(matches!(items[1], Err(AppError::GenerationFailed { .. })));
    }
}
