//! Citation filter
//!
//! Keeps only the `[n]` markers an answer actually uses, resolved against the
//! citation index built for the same turn.

use crate::packer::CitationIndex;
use citeforge_common::history::UsedCitation;
use regex_lite::Regex;
use std::collections::BTreeSet;
use std::sync::OnceLock;

static MARKER_PATTERN: OnceLock<Regex> = OnceLock::new();

fn marker_pattern() -> &'static Regex {
    MARKER_PATTERN.get_or_init(|| Regex::new(r"\[(\d+)\]").expect("valid citation marker pattern"))
}

/// Resolves the markers of a generated answer
pub struct CitationFilter;

impl CitationFilter {
    /// Unique marker numbers found in `answer`, ascending.
    ///
    /// `[01]` and numbers that overflow `u32` are not markers.
    pub fn markers(answer: &str) -> BTreeSet<u32> {
        marker_pattern()
            .captures_iter(answer)
            .filter_map(|cap| cap.get(1))
            .map(|m| m.as_str())
            .filter(|digits| digits.len() == 1 || !digits.starts_with('0'))
            .filter_map(|digits| digits.parse::<u32>().ok())
            .collect()
    }

    /// Citations used by `answer`, ordered by marker.
    ///
    /// Markers absent from `index` are dropped silently.
    pub fn filter(answer: &str, index: &CitationIndex) -> Vec<UsedCitation> {
        let mut used = Vec::new();
        for marker in Self::markers(answer) {
            match index.get(marker) {
                Some(citation) => used.push(citation.clone()),
                None => tracing::debug!(marker = marker, "Dropping citation marker outside the pack"),
            }
        }
        used
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn index(n: u32) -> CitationIndex {
        (1..=n)
            .map(|marker| UsedCitation {
                marker,
                chunk_id: format!("chunk-{}", marker),
                source: format!("doc{}.pdf", marker),
                position: marker * 10,
                snippet: format!("snippet {}", marker),
            })
            .collect()
    }

    fn markers(used: &[UsedCitation]) -> Vec<u32> {
        used.iter().map(|c| c.marker).collect()
    }

    #[test]
    fn test_drops_marker_outside_index() {
        let used = CitationFilter::filter("Ride the ferry [1]. Also see [4].", &index(3));
        assert_eq!(markers(&used), vec![1]);
        assert_eq!(used[0].chunk_id, "chunk-1");
        assert_eq!(used[0].source, "doc1.pdf");
        assert_eq!(used[0].position, 10);
    }

    #[test]
    fn test_unique_and_ascending() {
        let used = CitationFilter::filter("[3] then [1], again [3] and [2][1]", &index(3));
        assert_eq!(markers(&used), vec![1, 2, 3]);
    }

    #[test]
    fn test_no_markers() {
        assert!(CitationFilter::filter("No citations here.", &index(3)).is_empty());
        assert!(CitationFilter::filter("", &index(3)).is_empty());
    }

    #[test]
    fn test_empty_index_emits_nothing() {
        assert!(CitationFilter::filter("[1] [2]", &CitationIndex::default()).is_empty());
    }

    #[test]
    fn test_malformed_markers_ignored() {
        let answer = "[0] [01] [ 2 ] [2a] [-1] [99999999999999999999] (3) [a]";
        assert!(CitationFilter::markers(answer).is_empty());
        assert!(CitationFilter::filter(answer, &index(3)).is_empty());
    }

    #[test]
    fn test_every_output_marker_appears_in_answer() {
        let answer = "Cable cars [2] run late; BART [5] reaches SFO [1].";
        let used = CitationFilter::filter(answer, &index(4));
        for citation in &used {
            assert!(answer.contains(&format!("[{}]", citation.marker)));
        }
        assert_eq!(markers(&used), vec![1, 2]);
    }

    #[test]
    fn test_nested_brackets() {
        assert_eq!(CitationFilter::markers("see [[2]]"), BTreeSet::from([2]));
    }
}
