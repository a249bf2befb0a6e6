//! Unicode-aware tokenization with exact position tracking.
//!
//! Text is split into word, number, punctuation and acronym tokens. Each token
//! records the byte span it covers in the original string so that extraction
//! text can later be grounded back onto the document.
//!
//! - Consecutive letters group into one token, as do digits and symbols.
//! - Underscores are always single punctuation tokens (`a_b` is three tokens).
//! - CJK characters become one token each unless grouping is requested.
//! - Slash abbreviations such as `mg/kg` or `160/90` become one acronym token.

use regex::Regex;
use std::collections::HashSet;
use std::sync::LazyLock;
use thiserror::Error;
use tracing::debug;
use unicode_segmentation::UnicodeSegmentation;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum TokenizerError {
    #[error("Invalid token interval. start_index={start_index}, end_index={end_index}, total_tokens={total_tokens}.")]
    InvalidTokenInterval {
        start_index: usize,
        end_index: usize,
        total_tokens: usize,
    },

    #[error("start_token_index={start_index} out of range. Total tokens: {total_tokens}.")]
    SentenceRange {
        start_index: usize,
        total_tokens: usize,
    },
}

/// Byte span into the tokenized text, end exclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TextSpan {
    pub start: usize,
    pub end: usize,
}

impl TextSpan {
    pub fn new(start: usize, end: usize) -> Self {
        Self { start, end }
    }
}

/// Interval over tokens, `start_index` inclusive and `end_index` exclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TokenInterval {
    pub start_index: usize,
    pub end_index: usize,
}

impl TokenInterval {
    pub fn new(start_index: usize, end_index: usize) -> Self {
        Self {
            start_index,
            end_index,
        }
    }

    pub fn len(&self) -> usize {
        self.end_index.saturating_sub(self.start_index)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenType {
    Word,
    Number,
    Punctuation,
    Acronym,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token {
    pub index: usize,
    pub token_type: TokenType,
    pub span: TextSpan,
    pub first_token_after_newline: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TokenizedText {
    pub text: String,
    pub tokens: Vec<Token>,
}

impl TokenizedText {
    pub fn token_str(&self, index: usize) -> &str {
        let span = self.tokens[index].span;
        &self.text[span.start..span.end]
    }

    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }
}

static END_OF_SENTENCE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[.?!。？！।۔؟]+$").unwrap());

static ACRONYM_ONLY: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?:\p{L}+(?:/\p{L}+)+|\p{Nd}+(?:/\p{Nd}+)+)$").unwrap()
});

static DIGITS_ONLY: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^\p{Nd}+$").unwrap());

static WORD_ONLY: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(?:(?:\p{L}\p{M}*)+|\p{Nd}+)$").unwrap());

static CJK: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[\p{Han}\p{Hiragana}\p{Katakana}\p{Hangul}]$").unwrap()
});

static LETTER_OR_DIGIT_START: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[\p{L}\p{Nd}]").unwrap());

static PUNCT_NO_SLASH_START: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[^\p{L}\p{Nd}\s/]").unwrap());

static LETTER_SEQUENCE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(?:\p{L}\p{M}*)+$").unwrap());

static SINGLE_LETTER: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^\p{L}\p{M}*$").unwrap());

static DIGIT_SEQUENCE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^\p{Nd}+$").unwrap());

static SINGLE_DIGIT: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^\p{Nd}$").unwrap());

static PUNCT_SEQUENCE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[^\p{L}\p{Nd}\s]+$").unwrap());

static SINGLE_PUNCT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[^\p{L}\p{Nd}\s]$").unwrap());

/// English abbreviations that do not end a sentence.
pub const DEFAULT_ABBREVIATIONS: &[&str] = &["Mr.", "Mrs.", "Ms.", "Dr.", "Prof.", "St."];

pub fn default_abbreviations() -> HashSet<String> {
    DEFAULT_ABBREVIATIONS.iter().map(|s| s.to_string()).collect()
}

pub fn is_cjk(grapheme: &str) -> bool {
    CJK.is_match(grapheme)
}

fn classify(text: &str) -> TokenType {
    if ACRONYM_ONLY.is_match(text) {
        TokenType::Acronym
    } else if DIGITS_ONLY.is_match(text) {
        TokenType::Number
    } else if WORD_ONLY.is_match(text) || text.chars().any(char::is_alphabetic) {
        TokenType::Word
    } else {
        TokenType::Punctuation
    }
}

fn starts_group(grapheme: &str, tokenize_cjk_by_char: bool) -> bool {
    if tokenize_cjk_by_char && is_cjk(grapheme) {
        return false;
    }
    if LETTER_OR_DIGIT_START.is_match(grapheme) {
        return true;
    }
    if grapheme == "/" {
        return false;
    }
    PUNCT_NO_SLASH_START.is_match(grapheme)
}

fn extends_group(current: &str, next: &str) -> bool {
    if LETTER_SEQUENCE.is_match(current) {
        SINGLE_LETTER.is_match(next)
    } else if DIGIT_SEQUENCE.is_match(current) {
        SINGLE_DIGIT.is_match(next)
    } else if PUNCT_SEQUENCE.is_match(current) {
        SINGLE_PUNCT.is_match(next) && !current.contains('/') && next != "/"
    } else {
        false
    }
}

fn is_whitespace(grapheme: &str) -> bool {
    grapheme.chars().all(char::is_whitespace)
}

fn contains_newline(s: &str) -> bool {
    s.contains('\n') || s.contains('\r')
}

/// Splits text into tokens.
pub fn tokenize(text: &str, tokenize_cjk_by_char: bool) -> TokenizedText {
    debug!("Tokenizing text of {} bytes", text.len());

    let graphemes: Vec<(usize, &str)> = text.grapheme_indices(true).collect();
    let mut tokens: Vec<Token> = Vec::new();
    let mut pending_newline = false;
    let mut i = 0;

    while i < graphemes.len() {
        let (start, grapheme) = graphemes[i];
        let end = start + grapheme.len();

        if is_whitespace(grapheme) {
            if contains_newline(grapheme) {
                pending_newline = true;
            }
            i += 1;
            continue;
        }

        let after_newline = std::mem::take(&mut pending_newline);

        if grapheme == "_" {
            tokens.push(Token {
                index: tokens.len(),
                token_type: TokenType::Punctuation,
                span: TextSpan::new(start, end),
                first_token_after_newline: after_newline,
            });
            i += 1;
            continue;
        }

        let mut group_end = end;
        let mut next = i + 1;

        if starts_group(grapheme, tokenize_cjk_by_char) {
            while next < graphemes.len() {
                let (next_start, next_grapheme) = graphemes[next];
                if tokenize_cjk_by_char && is_cjk(next_grapheme) {
                    break;
                }
                let next_end = next_start + next_grapheme.len();
                let extends = extends_group(&text[start..group_end], next_grapheme)
                    || ACRONYM_ONLY.is_match(&text[start..next_end]);
                if !extends {
                    break;
                }
                group_end = next_end;
                next += 1;
            }
        }

        tokens.push(Token {
            index: tokens.len(),
            token_type: classify(&text[start..group_end]),
            span: TextSpan::new(start, group_end),
            first_token_after_newline: after_newline,
        });
        i = next;
    }

    let tokens = merge_slash_patterns(tokens, text);
    debug!("Tokenized into {} tokens", tokens.len());

    TokenizedText {
        text: text.to_string(),
        tokens,
    }
}

/// Joins `word / word` and `number / number` triples into acronym tokens.
fn merge_slash_patterns(tokens: Vec<Token>, text: &str) -> Vec<Token> {
    if tokens.len() < 3 {
        return tokens;
    }

    let is_operand = |t: &Token| matches!(t.token_type, TokenType::Word | TokenType::Number);
    let mut merged: Vec<Token> = Vec::with_capacity(tokens.len());
    let mut i = 0;

    while i < tokens.len() {
        if i + 2 < tokens.len() {
            let (left, slash, right) = (&tokens[i], &tokens[i + 1], &tokens[i + 2]);
            let contiguous = left.span.end == slash.span.start && slash.span.end == right.span.start;
            if is_operand(left)
                && slash.token_type == TokenType::Punctuation
                && &text[slash.span.start..slash.span.end] == "/"
                && is_operand(right)
                && contiguous
                && ACRONYM_ONLY.is_match(&text[left.span.start..right.span.end])
            {
                merged.push(Token {
                    index: merged.len(),
                    token_type: TokenType::Acronym,
                    span: TextSpan::new(left.span.start, right.span.end),
                    first_token_after_newline: left.first_token_after_newline,
                });
                i += 3;
                continue;
            }
        }

        let mut token = tokens[i].clone();
        token.index = merged.len();
        merged.push(token);
        i += 1;
    }

    merged
}

/// Returns the exact substring covered by a token interval.
pub fn tokens_text<'a>(
    tokenized: &'a TokenizedText,
    interval: TokenInterval,
) -> Result<&'a str, TokenizerError> {
    if interval.end_index > tokenized.tokens.len() || interval.start_index >= interval.end_index {
        return Err(TokenizerError::InvalidTokenInterval {
            start_index: interval.start_index,
            end_index: interval.end_index,
            total_tokens: tokenized.tokens.len(),
        });
    }

    let start = tokenized.tokens[interval.start_index].span.start;
    let end = tokenized.tokens[interval.end_index - 1].span.end;
    Ok(&tokenized.text[start..end])
}

fn token_slice<'a>(text: &'a str, token: &Token) -> &'a str {
    &text[token.span.start..token.span.end]
}

fn is_end_of_sentence(
    text: &str,
    tokens: &[Token],
    index: usize,
    abbreviations: &HashSet<String>,
) -> bool {
    let current = token_slice(text, &tokens[index]);
    if !END_OF_SENTENCE.is_match(current) {
        return false;
    }
    if index > 0 {
        let candidate = format!("{}{}", token_slice(text, &tokens[index - 1]), current);
        if abbreviations.contains(&candidate) {
            return false;
        }
    }
    true
}

/// Uppercase letters, or letters from scripts without case (Han, Hangul, Thai...).
fn can_start_sentence(token_text: &str) -> bool {
    match token_text.chars().next() {
        Some(ch) => ch.is_uppercase() || (ch.is_alphabetic() && !ch.is_lowercase()),
        None => false,
    }
}

fn is_break_after_newline(text: &str, tokens: &[Token], index: usize) -> bool {
    if index + 1 >= tokens.len() {
        return false;
    }
    let gap = &text[tokens[index].span.end..tokens[index + 1].span.start];
    contains_newline(gap) && can_start_sentence(token_slice(text, &tokens[index + 1]))
}

/// Finds the sentence that begins at `start_index`.
///
/// A sentence ends at terminal punctuation that is not part of a known
/// abbreviation, or at a line break followed by a capital (or caseless)
/// letter. Without a boundary the interval runs to the last token.
pub fn find_sentence_range(
    text: &str,
    tokens: &[Token],
    start_index: usize,
    abbreviations: Option<&HashSet<String>>,
) -> Result<TokenInterval, TokenizerError> {
    if start_index >= tokens.len() {
        return Err(TokenizerError::SentenceRange {
            start_index,
            total_tokens: tokens.len(),
        });
    }

    let defaults;
    let abbreviations = match abbreviations {
        Some(set) => set,
        None => {
            defaults = default_abbreviations();
            &defaults
        }
    };

    for i in start_index..tokens.len() {
        if tokens[i].token_type == TokenType::Punctuation
            && is_end_of_sentence(text, tokens, i, abbreviations)
        {
            return Ok(TokenInterval::new(start_index, i + 1));
        }
        if is_break_after_newline(text, tokens, i) {
            return Ok(TokenInterval::new(start_index, i + 1));
        }
    }

    Ok(TokenInterval::new(start_index, tokens.len()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn types(text: &str, by_char: bool) -> Vec<TokenType> {
        tokenize(text, by_char).tokens.iter().map(|t| t.token_type).collect()
    }

    fn texts(text: &str, by_char: bool) -> Vec<String> {
        let tokenized = tokenize(text, by_char);
        (0..tokenized.len()).map(|i| tokenized.token_str(i).to_string()).collect()
    }

    use TokenType::*;

    #[test]
    fn test_basic_text() {
        assert_eq!(types("Hello, world!", true), vec![Word, Punctuation, Word, Punctuation]);
    }

    #[test]
    fn test_spaces_numbers_and_newline_flag() {
        let tokenized = tokenize("Age:   25\nWeight=70kg.", true);
        let kinds: Vec<TokenType> = tokenized.tokens.iter().map(|t| t.token_type).collect();
        assert_eq!(
            kinds,
            vec![Word, Punctuation, Number, Word, Punctuation, Number, Word, Punctuation]
        );
        let flags: Vec<bool> = tokenized
            .tokens
            .iter()
            .map(|t| t.first_token_after_newline)
            .collect();
        assert_eq!(flags, vec![false, false, false, true, false, false, false, false]);
    }

    #[test]
    fn test_crlf_marks_next_token() {
        let tokenized = tokenize("Line1\r\nLine2\r\nLine3", true);
        let flags: Vec<bool> = tokenized
            .tokens
            .iter()
            .map(|t| t.first_token_after_newline)
            .collect();
        assert_eq!(flags, vec![false, false, true, false, true, false]);
    }

    #[test]
    fn test_symbols_group_and_empty_input() {
        assert_eq!(types("!!!@#   $$$%", true), vec![Punctuation, Punctuation]);
        assert!(tokenize("", true).tokens.is_empty());
        assert!(tokenize("  \n\t ", true).tokens.is_empty());
    }

    #[test]
    fn test_underscore_is_separate_punctuation() {
        assert_eq!(texts("test_123", true), vec!["test", "_", "123"]);
    }

    #[test]
    fn test_cjk_by_char_and_grouped() {
        assert_eq!(
            texts("Hello, 世界! test_123", true),
            vec!["Hello", ",", "世", "界", "!", "test", "_", "123"]
        );
        assert_eq!(texts("公司成立", false), vec!["公司成立"]);
        assert_eq!(texts("公司成立", true), vec!["公", "司", "成", "立"]);
    }

    #[test]
    fn test_slash_abbreviations_merge() {
        let tokenized = tokenize("Dose 10 mg/kg at 160/90", true);
        assert_eq!(tokenized.token_str(2), "mg/kg");
        assert_eq!(tokenized.tokens[2].token_type, Acronym);
        assert_eq!(tokenized.token_str(4), "160/90");
        assert_eq!(tokenized.tokens[4].token_type, Acronym);
        assert_eq!(tokenized.len(), 5);
        assert_eq!(tokenized.tokens.last().unwrap().index, tokenized.len() - 1);
    }

    #[test]
    fn test_combining_marks_stay_in_word() {
        assert_eq!(texts("cafe\u{301} ok", true), vec!["cafe\u{301}", "ok"]);
    }

    #[test]
    fn test_spans_are_valid() {
        let text = "晋控创力成立于2021年9月30日，注册资本10000万元。";
        let tokenized = tokenize(text, true);
        for token in &tokenized.tokens {
            assert!(token.span.start < token.span.end);
            assert!(text.is_char_boundary(token.span.start));
            assert!(text.is_char_boundary(token.span.end));
        }
        assert!(tokenized.tokens.iter().any(|t| &text[t.span.start..t.span.end] == "10000"));
    }

    #[test]
    fn test_tokens_text() {
        let tokenized = tokenize("Patient Jane Doe, ID 67890, received 10mg daily.", true);
        assert_eq!(tokens_text(&tokenized, TokenInterval::new(1, 3)).unwrap(), "Jane Doe");
        assert_eq!(
            tokens_text(&tokenized, TokenInterval::new(0, 4)).unwrap(),
            "Patient Jane Doe,"
        );
        assert_eq!(tokens_text(&tokenized, TokenInterval::new(5, 6)).unwrap(), "67890");
        assert!(matches!(
            tokens_text(&tokenized, TokenInterval::new(0, 999)),
            Err(TokenizerError::InvalidTokenInterval { .. })
        ));
        assert!(tokens_text(&tokenized, TokenInterval::new(4, 4)).is_err());
    }

    #[test]
    fn test_sentence_ranges() {
        let cases: &[(&str, usize, (usize, usize))] = &[
            ("This is one sentence. Then another?", 0, (0, 5)),
            ("Dr. John visited. Then left.", 0, (0, 5)),
            (
                "Blood pressure was 160/90 and patient was recommended to\nAtenolol 50 mg daily.",
                0,
                (0, 9),
            ),
            ("これは文です。次の文です。", 0, (0, 2)),
            ("これは文です。次の文です。", 2, (2, 4)),
            ("كيف حالك؟ أنا بخير.", 0, (0, 3)),
            ("line one\nΣ line two", 0, (0, 2)),
            ("line one\r\nLine two", 0, (0, 2)),
        ];
        for (text, start, (expected_start, expected_end)) in cases {
            let tokenized = tokenize(text, false);
            let interval = find_sentence_range(text, &tokenized.tokens, *start, None).unwrap();
            assert_eq!(
                (interval.start_index, interval.end_index),
                (*expected_start, *expected_end),
                "sentence range for {:?}",
                text
            );
        }
    }

    #[test]
    fn test_sentence_range_to_end_and_errors() {
        let text = "Only one sentence here";
        let tokenized = tokenize(text, true);
        let interval = find_sentence_range(text, &tokenized.tokens, 0, None).unwrap();
        assert_eq!(interval.end_index, tokenized.len());
        assert!(matches!(
            find_sentence_range(text, &tokenized.tokens, 999, None),
            Err(TokenizerError::SentenceRange { .. })
        ));
    }

    #[test]
    fn test_custom_abbreviations() {
        let text = "M. Dupont arrived. Then left.";
        let tokenized = tokenize(text, true);
        let default_range = find_sentence_range(text, &tokenized.tokens, 0, None).unwrap();
        assert_eq!(default_range.end_index, 2);

        let french: HashSet<String> = ["M.".to_string()].into_iter().collect();
        let custom = find_sentence_range(text, &tokenized.tokens, 0, Some(&french)).unwrap();
        assert_eq!(custom.end_index, 5);
    }
}
