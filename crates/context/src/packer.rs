//! Context Packer - Assembles the numbered evidence pack
//!
//! Provides:
//! - Snippet sanitization and per-chunk caps
//! - Sequential `[n]` markers in fused order
//! - Character budget management (tail truncation)
//! - The citation index used to resolve markers after generation

use citeforge_common::chunks::ChunkStore;
use citeforge_common::config::ContextConfig;
use citeforge_common::history::UsedCitation;
use citeforge_search::FusedResult;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};

/// Separator placed between rendered blocks
pub const BLOCK_SEPARATOR: &str = "\n---\n";

/// Context packer configuration
#[derive(Debug, Clone)]
pub struct ContextPackerConfig {
    /// Character budget for the whole rendered pack, separators included
    pub max_chars: usize,

    /// Cap on each sanitized snippet
    pub per_chunk_chars: usize,
}

impl Default for ContextPackerConfig {
    fn default() -> Self {
        Self {
            max_chars: 24_000,
            per_chunk_chars: 1_200,
        }
    }
}

impl From<&ContextConfig> for ContextPackerConfig {
    fn from(config: &ContextConfig) -> Self {
        Self {
            max_chars: config.max_chars,
            per_chunk_chars: config.per_chunk_chars,
        }
    }
}

/// One numbered chunk of evidence
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackEntry {
    pub marker: u32,
    pub chunk_id: String,
    pub source: String,
    pub position: u32,
    pub snippet: String,
}

impl PackEntry {
    /// Block as the generator sees it; the marker sits right above the text
    pub fn render(&self) -> String {
        format!(
            "[{}] source={} position={}\n{}\n",
            self.marker, self.source, self.position, self.snippet
        )
    }

    pub fn to_citation(&self) -> UsedCitation {
        UsedCitation {
            marker: self.marker,
            chunk_id: self.chunk_id.clone(),
            source: self.source.clone(),
            position: self.position,
            snippet: self.snippet.clone(),
        }
    }
}

/// Rendered evidence for one turn
#[derive(Debug, Clone, Default, Serialize)]
pub struct ContextPack {
    entries: Vec<PackEntry>,
    rendered: String,
}

impl ContextPack {
    pub fn entries(&self) -> &[PackEntry] {
        &self.entries
    }

    /// Text handed to the generator
    pub fn rendered(&self) -> &str {
        &self.rendered
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Distinct sources among the packed chunks
    pub fn source_count(&self) -> usize {
        self.entries
            .iter()
            .map(|e| e.source.as_str())
            .collect::<HashSet<_>>()
            .len()
    }
}

/// Marker → chunk identity for one turn
#[derive(Debug, Clone, Default)]
pub struct CitationIndex {
    entries: BTreeMap<u32, UsedCitation>,
}

impl CitationIndex {
    pub fn get(&self, marker: u32) -> Option<&UsedCitation> {
        self.entries.get(&marker)
    }

    pub fn contains(&self, marker: u32) -> bool {
        self.entries.contains_key(&marker)
    }

    /// Markers in ascending order
    pub fn markers(&self) -> impl Iterator<Item = u32> + '_ {
        self.entries.keys().copied()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl FromIterator<UsedCitation> for CitationIndex {
    fn from_iter<I: IntoIterator<Item = UsedCitation>>(iter: I) -> Self {
        Self {
            entries: iter.into_iter().map(|c| (c.marker, c)).collect(),
        }
    }
}

/// Builds a [`ContextPack`] and its [`CitationIndex`] from a fused ranking
pub struct ContextPacker {
    config: ContextPackerConfig,
}

impl ContextPacker {
    /// Create a new context packer
    pub fn new(config: ContextPackerConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ContextPackerConfig {
        &self.config
    }

    /// Pack fused chunks in order until the budget is spent.
    ///
    /// Ids missing from the store are skipped before numbering, so markers
    /// are always `1..=len` with no gaps.
    pub fn pack(&self, fused: &FusedResult, store: &ChunkStore) -> (ContextPack, CitationIndex) {
        let mut seen = HashSet::new();
        let mut entries: Vec<PackEntry> = Vec::new();
        let mut blocks: Vec<String> = Vec::new();
        let mut total_chars = 0usize;
        let separator_chars = BLOCK_SEPARATOR.chars().count();

        for fused_entry in fused.iter() {
            if !seen.insert(fused_entry.chunk_id.as_str()) {
                continue;
            }
            let Some(chunk) = store.get(&fused_entry.chunk_id) else {
                tracing::warn!(chunk_id = %fused_entry.chunk_id, "Fused chunk missing from store, skipped");
                continue;
            };

            let entry = PackEntry {
                marker: entries.len() as u32 + 1,
                chunk_id: chunk.id.clone(),
                source: chunk.source.clone(),
                position: chunk.position,
                snippet: sanitize_snippet(&chunk.text, self.config.per_chunk_chars),
            };
            let block = entry.render();
            let cost = block.chars().count() + if blocks.is_empty() { 0 } else { separator_chars };

            // Check character budget
            if total_chars + cost > self.config.max_chars {
                tracing::debug!(
                    packed = entries.len(),
                    budget = self.config.max_chars,
                    "Context budget reached, dropping remaining chunks"
                );
                break;
            }

            total_chars += cost;
            blocks.push(block);
            entries.push(entry);
        }

        let index = entries.iter().map(PackEntry::to_citation).collect();
        let pack = ContextPack {
            rendered: blocks.join(BLOCK_SEPARATOR),
            entries,
        };
        (pack, index)
    }
}

impl Default for ContextPacker {
    fn default() -> Self {
        Self::new(ContextPackerConfig::default())
    }
}

/// Clean chunk text for the prompt and cap it at `max_chars` characters.
///
/// Private-use glyphs, zero-width and control characters become spaces and
/// whitespace runs collapse to one space.
pub fn sanitize_snippet(text: &str, max_chars: usize) -> String {
    let cleaned: String = text
        .chars()
        .map(|c| if is_junk_char(c) { ' ' } else { c })
        .collect();

    cleaned
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .chars()
        .take(max_chars)
        .collect()
}

fn is_junk_char(c: char) -> bool {
    matches!(
        c,
        '\u{E000}'..='\u{F8FF}'
            | '\u{200B}'..='\u{200F}'
            | '\u{2060}'
            | '\u{FEFF}'
            | '\u{FFFD}'
    ) || (c.is_control() && !c.is_whitespace())
}
