//! Sentence-aware chunking under a character budget.

use std::collections::HashSet;

use crate::core::tokenizer::{
    default_abbreviations, find_sentence_range, TextSpan, TokenInterval, TokenizedText,
};

/// A window of the document sent to the model in one request.
#[derive(Debug, Clone, PartialEq)]
pub struct TextChunk {
    pub index: usize,
    pub token_interval: TokenInterval,
    /// Byte span into the source document.
    pub span: TextSpan,
    /// Character offset of the chunk start in the source document.
    pub char_offset: usize,
    pub text: String,
}

/// Iterates over chunks of at most `max_char_buffer` characters.
///
/// Whole sentences are packed together while they fit. A sentence that is too
/// long is cut at the last line break that fits, or at the last token that fits.
/// A single token longer than the budget becomes a chunk of its own.
pub struct ChunkIterator<'a> {
    tokenized: &'a TokenizedText,
    max_char_buffer: usize,
    abbreviations: HashSet<String>,
    position: usize,
    emitted: usize,
    last_byte: usize,
    last_char: usize,
}

impl<'a> ChunkIterator<'a> {
    pub fn new(tokenized: &'a TokenizedText, max_char_buffer: usize) -> Self {
        Self {
            tokenized,
            max_char_buffer: max_char_buffer.max(1),
            abbreviations: default_abbreviations(),
            position: 0,
            emitted: 0,
            last_byte: 0,
            last_char: 0,
        }
    }

    fn char_len(&self, start_token: usize, end_token: usize) -> usize {
        let tokens = &self.tokenized.tokens;
        let start = tokens[start_token].span.start;
        let end = tokens[end_token - 1].span.end;
        self.tokenized.text[start..end].chars().count()
    }

    fn emit(&mut self, start_token: usize, end_token: usize) -> TextChunk {
        let tokenized: &'a TokenizedText = self.tokenized;
        let tokens = &tokenized.tokens;
        let span = TextSpan::new(tokens[start_token].span.start, tokens[end_token - 1].span.end);

        self.last_char += tokenized.text[self.last_byte..span.start].chars().count();
        self.last_byte = span.start;

        let chunk = TextChunk {
            index: self.emitted,
            token_interval: TokenInterval::new(start_token, end_token),
            span,
            char_offset: self.last_char,
            text: tokenized.text[span.start..span.end].to_string(),
        };
        self.emitted += 1;
        self.position = end_token;
        chunk
    }
}

impl<'a> Iterator for ChunkIterator<'a> {
    type Item = TextChunk;

    fn next(&mut self) -> Option<Self::Item> {
        let tokenized: &'a TokenizedText = self.tokenized;
        let total = tokenized.tokens.len();
        if self.position >= total {
            return None;
        }

        let text = tokenized.text.as_str();
        let tokens = &tokenized.tokens;
        let first = self.position;
        let sentence = find_sentence_range(text, tokens, first, Some(&self.abbreviations)).ok()?;

        let mut end = first + 1;
        if self.char_len(first, end) > self.max_char_buffer {
            return Some(self.emit(first, end));
        }

        let mut newline_break: Option<usize> = None;
        while end < sentence.end_index {
            if tokens[end].first_token_after_newline {
                newline_break = Some(end);
            }
            if self.char_len(first, end + 1) > self.max_char_buffer {
                if let Some(cut) = newline_break.filter(|&cut| cut > first) {
                    end = cut;
                }
                return Some(self.emit(first, end));
            }
            end += 1;
        }

        while end < total {
            let next_sentence =
                find_sentence_range(text, tokens, end, Some(&self.abbreviations)).ok()?;
            if self.char_len(first, next_sentence.end_index) > self.max_char_buffer {
                break;
            }
            end = next_sentence.end_index;
        }

        Some(self.emit(first, end))
    }
}
