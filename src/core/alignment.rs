//! Grounds extraction text onto character intervals of the source document.

use std::collections::HashMap;
use tracing::debug;

use crate::core::data::{AlignmentStatus, CharInterval, Extraction};
use crate::core::tokenizer::{tokenize, TokenizedText};

pub const DEFAULT_FUZZY_THRESHOLD: f32 = 0.75;

/// Aligns extractions against the chunk they were produced from.
///
/// Matching is tried in order: exact token sequence, raw substring widened to
/// token boundaries, longest matching prefix, then best fuzzy window by token
/// overlap. Searches start after the previous match so repeated mentions are
/// assigned in order of appearance, and wrap to the chunk start otherwise.
pub struct WordAligner {
    tokenize_cjk_by_char: bool,
    fuzzy_threshold: f32,
}

struct ChunkTokens<'a> {
    tokenized: &'a TokenizedText,
    normalized: Vec<String>,
}

impl<'a> ChunkTokens<'a> {
    fn new(tokenized: &'a TokenizedText) -> Self {
        let normalized = (0..tokenized.len())
            .map(|i| tokenized.token_str(i).to_lowercase())
            .collect();
        Self {
            tokenized,
            normalized,
        }
    }

    fn byte_range(&self, start_token: usize, end_token: usize) -> (usize, usize) {
        let tokens = &self.tokenized.tokens;
        (tokens[start_token].span.start, tokens[end_token - 1].span.end)
    }
}

impl WordAligner {
    pub fn new(tokenize_cjk_by_char: bool, fuzzy_threshold: f32) -> Self {
        Self {
            tokenize_cjk_by_char,
            fuzzy_threshold,
        }
    }

    pub fn align(
        &self,
        extractions: Vec<Extraction>,
        chunk_text: &str,
        char_offset: usize,
    ) -> Vec<Extraction> {
        let tokenized = tokenize(chunk_text, self.tokenize_cjk_by_char);
        let chunk = ChunkTokens::new(&tokenized);
        let mut cursor = 0;

        extractions
            .into_iter()
            .map(|mut extraction| {
                let needle: Vec<String> = {
                    let t = tokenize(&extraction.extraction_text, self.tokenize_cjk_by_char);
                    (0..t.len()).map(|i| t.token_str(i).to_lowercase()).collect()
                };

                let found = if needle.is_empty() || chunk.normalized.is_empty() {
                    None
                } else {
                    self.exact(&chunk, &needle, cursor)
                        .map(|range| (range, AlignmentStatus::MatchExact))
                        .or_else(|| self.substring(&chunk, chunk_text, &extraction.extraction_text, cursor))
                        .or_else(|| {
                            self.lesser(&chunk, &needle, cursor)
                                .map(|range| (range, AlignmentStatus::MatchLesser))
                        })
                        .or_else(|| {
                            self.fuzzy(&chunk, &needle)
                                .map(|range| (range, AlignmentStatus::MatchFuzzy))
                        })
                };

                match found {
                    Some(((start_token, end_token), status)) => {
                        let (start_byte, end_byte) = chunk.byte_range(start_token, end_token);
                        let start = char_offset + chunk_text[..start_byte].chars().count();
                        let end = start + chunk_text[start_byte..end_byte].chars().count();
                        extraction.char_interval = Some(CharInterval::new(start, end));
                        extraction.alignment_status = Some(status);
                        if status != AlignmentStatus::MatchFuzzy {
                            cursor = end_token;
                        }
                    }
                    None => {
                        debug!(
                            "Could not align '{}' ({})",
                            extraction.extraction_text, extraction.extraction_class
                        );
                    }
                }
                extraction
            })
            .collect()
    }

    fn find_sequence(haystack: &[String], needle: &[String], from: usize) -> Option<usize> {
        if needle.len() > haystack.len() {
            return None;
        }
        let last_start = haystack.len() - needle.len();
        let search = |range: std::ops::RangeInclusive<usize>| {
            range
                .into_iter()
                .find(|&s| haystack[s..s + needle.len()] == *needle)
        };
        if from <= last_start {
            if let Some(found) = search(from..=last_start) {
                return Some(found);
            }
        }
        search(0..=last_start.min(from.saturating_sub(1)))
            .filter(|_| from > 0)
    }

    fn exact(&self, chunk: &ChunkTokens, needle: &[String], cursor: usize) -> Option<(usize, usize)> {
        Self::find_sequence(&chunk.normalized, needle, cursor).map(|s| (s, s + needle.len()))
    }

    /// Raw substring match, widened to whole tokens. Exact when no widening was needed.
    fn substring(
        &self,
        chunk: &ChunkTokens,
        chunk_text: &str,
        extraction_text: &str,
        cursor: usize,
    ) -> Option<((usize, usize), AlignmentStatus)> {
        let needle = extraction_text.trim();
        if needle.is_empty() {
            return None;
        }
        let tokens = &chunk.tokenized.tokens;
        let cursor_byte = tokens.get(cursor).map(|t| t.span.start).unwrap_or(chunk_text.len());
        let start_byte = chunk_text[cursor_byte..]
            .find(needle)
            .map(|pos| pos + cursor_byte)
            .or_else(|| chunk_text.find(needle))?;
        let end_byte = start_byte + needle.len();

        let first = tokens.iter().position(|t| t.span.end > start_byte)?;
        let last = tokens.iter().rposition(|t| t.span.start < end_byte)?;
        if last < first {
            return None;
        }

        let widened = tokens[first].span.start != start_byte || tokens[last].span.end != end_byte;
        let status = if widened {
            AlignmentStatus::MatchGreater
        } else {
            AlignmentStatus::MatchExact
        };
        Some(((first, last + 1), status))
    }

    /// Longest prefix of the extraction found in the chunk, if it covers more than half of it.
    fn lesser(&self, chunk: &ChunkTokens, needle: &[String], cursor: usize) -> Option<(usize, usize)> {
        let minimum = needle.len() / 2 + 1;
        (minimum..needle.len()).rev().find_map(|len| {
            Self::find_sequence(&chunk.normalized, &needle[..len], cursor).map(|s| (s, s + len))
        })
    }

    /// Window of the chunk with the highest token overlap ratio above the threshold.
    fn fuzzy(&self, chunk: &ChunkTokens, needle: &[String]) -> Option<(usize, usize)> {
        let window = needle.len().min(chunk.normalized.len());
        let mut wanted: HashMap<&str, usize> = HashMap::new();
        for token in needle {
            *wanted.entry(token.as_str()).or_default() += 1;
        }

        let mut best: Option<(f32, usize, usize)> = None;
        for start in 0..=(chunk.normalized.len() - window) {
            let mut remaining = wanted.clone();
            let mut matched = 0;
            let mut first_hit = None;
            let mut last_hit = start;
            for (offset, token) in chunk.normalized[start..start + window].iter().enumerate() {
                if let Some(count) = remaining.get_mut(token.as_str()).filter(|c| **c > 0) {
                    *count -= 1;
                    matched += 1;
                    first_hit.get_or_insert(start + offset);
                    last_hit = start + offset;
                }
            }
            let score = matched as f32 / needle.len() as f32;
            if let Some(first_hit) = first_hit {
                if best.map_or(true, |(best_score, _, _)| score > best_score) {
                    best = Some((score, first_hit, last_hit + 1));
                }
            }
        }

        best.filter(|(score, _, _)| *score >= self.fuzzy_threshold)
            .map(|(_, start, end)| (start, end))
    }
}

impl Default for WordAligner {
    fn default() -> Self {
        Self::new(true, DEFAULT_FUZZY_THRESHOLD)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn align_one(text: &str, class: &str, extraction_text: &str) -> Extraction {
        WordAligner::default()
            .align(vec![Extraction::new(class, extraction_text)], text, 0)
            .remove(0)
    }

    #[test]
    fn test_exact_alignment() {
        let text = "ROMEO. But soft! What light through yonder window breaks?";
        let extraction = align_one(text, "emotion", "But soft!");
        assert_eq!(extraction.char_interval, Some(CharInterval::new(7, 16)));
        assert_eq!(extraction.alignment_status, Some(AlignmentStatus::MatchExact));
    }

    #[test]
    fn test_exact_alignment_is_case_insensitive() {
        let extraction = align_one("ROMEO. But soft!", "character", "Romeo");
        assert_eq!(extraction.char_interval, Some(CharInterval::new(0, 5)));
        assert_eq!(extraction.alignment_status, Some(AlignmentStatus::MatchExact));
    }

    #[test]
    fn test_chunk_offset_and_cjk_positions() {
        let text = "公司成立于2021年9月30日，注册地位于长治市。";
        let aligned = WordAligner::default().align(
            vec![Extraction::new("date", "2021年9月30日"), Extraction::new("location", "长治市")],
            text,
            100,
        );
        assert_eq!(aligned[0].char_interval, Some(CharInterval::new(105, 115)));
        assert_eq!(aligned[1].char_interval, Some(CharInterval::new(121, 124)));
    }

    #[test]
    fn test_repeated_mentions_follow_order() {
        let text = "Juliet waits. Romeo calls Juliet.";
        let aligned = WordAligner::default().align(
            vec![
                Extraction::new("character", "Romeo"),
                Extraction::new("character", "Juliet"),
            ],
            text,
            0,
        );
        assert_eq!(aligned[0].char_interval, Some(CharInterval::new(14, 19)));
        assert_eq!(aligned[1].char_interval, Some(CharInterval::new(26, 32)));
    }

    #[test]
    fn test_substring_widened_to_tokens_is_greater() {
        let aligned = WordAligner::new(false, DEFAULT_FUZZY_THRESHOLD).align(
            vec![Extraction::new("company", "晋控")],
            "晋控创力成立。",
            0,
        );
        assert_eq!(aligned[0].alignment_status, Some(AlignmentStatus::MatchGreater));
        assert_eq!(aligned[0].char_interval, Some(CharInterval::new(0, 6)));
    }

    #[test]
    fn test_lesser_alignment_on_partial_prefix() {
        let text = "Lady Juliet gazed at the stars tonight";
        let extraction = align_one(text, "character", "Lady Juliet gazed longingly");
        assert_eq!(extraction.alignment_status, Some(AlignmentStatus::MatchLesser));
        assert_eq!(extraction.char_interval, Some(CharInterval::new(0, 17)));
    }

    #[test]
    fn test_fuzzy_alignment() {
        let text = "The pump station supplies emulsion to the hydraulic support system.";
        let extraction = align_one(text, "product", "hydraulic system support");
        assert_eq!(extraction.alignment_status, Some(AlignmentStatus::MatchFuzzy));
        let interval = extraction.char_interval.unwrap();
        assert_eq!(&text[interval.start_pos..interval.end_pos], "hydraulic support system");
    }

    #[test]
    fn test_unalignable_extraction_is_left_unset() {
        let extraction = align_one("Romeo and Juliet", "character", "Mercutio");
        assert!(extraction.char_interval.is_none());
        assert!(extraction.alignment_status.is_none());
    }
}
