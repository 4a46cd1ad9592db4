#[cfg(test)]
mod tests;

use std::fmt::Debug;
use std::ops::Range;
use std::sync::{Arc, LazyLock};

use fancy_regex::Regex;

/// Longest run of characters a single regex piece may contribute as one token
pub const DEFAULT_MAX_PIECE_CHARS: usize = 8;

static PRETOKEN_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r" ?\p{L}+| ?\p{N}+| ?[^\s\p{L}\p{N}]+|\s+").expect("valid regex")
});

/// Splits text into model tokens.
///
/// Tokens are reported as byte ranges into the input. The ranges must be ordered,
/// non-overlapping and together cover the whole input, so any run of tokens can be
/// decoded back to text by slicing.
pub trait Tokenizer: Send + Sync + Debug {
    fn token_spans(&self, text: &str) -> Vec<Range<usize>>;

    fn count(&self, text: &str) -> usize {
        self.token_spans(text).len()
    }
}

/// Byte-pair style approximation: letters, digits and punctuation runs become pieces
/// (each carrying its leading space), and pieces longer than `max_piece_chars`
/// characters are cut into several tokens.
#[derive(Debug, Clone)]
pub struct RegexTokenizer {
    max_piece_chars: usize,
}

impl RegexTokenizer {
    #[inline]
    pub fn new(max_piece_chars: usize) -> Self {
        Self {
            max_piece_chars: max_piece_chars.max(1),
        }
    }

    fn push_piece(&self, offset: usize, piece: &str, spans: &mut Vec<Range<usize>>) {
        let mut start = 0;
        let mut chars = 0;
        for (idx, _) in piece.char_indices() {
            if chars == self.max_piece_chars {
                spans.push(offset + start..offset + idx);
                start = idx;
                chars = 0;
            }
            chars += 1;
        }
        spans.push(offset + start..offset + piece.len());
    }
}

impl Default for RegexTokenizer {
    #[inline]
    fn default() -> Self {
        Self::new(DEFAULT_MAX_PIECE_CHARS)
    }
}

impl Tokenizer for RegexTokenizer {
    #[inline]
    fn token_spans(&self, text: &str) -> Vec<Range<usize>> {
        let mut spans = Vec::with_capacity(text.len() / 4 + 1);
        for piece in PRETOKEN_REGEX.find_iter(text).flatten() {
            self.push_piece(piece.start(), piece.as_str(), &mut spans);
        }
        spans
    }
}

/// Measures text in model tokens. Cheap to clone.
#[derive(Debug, Clone)]
pub struct TokenCounter {
    tokenizer: Arc<dyn Tokenizer>,
}

impl TokenCounter {
    #[inline]
    pub fn new(tokenizer: Arc<dyn Tokenizer>) -> Self {
        Self { tokenizer }
    }

    #[inline]
    pub fn count(&self, text: &str) -> usize {
        self.tokenizer.count(text)
    }

    #[inline]
    pub fn spans(&self, text: &str) -> Vec<Range<usize>> {
        self.tokenizer.token_spans(text)
    }

    /// The last `n` tokens of `text`, decoded back to text and trimmed.
    ///
    /// Returns the whole (trimmed) text when it holds `n` tokens or fewer.
    #[inline]
    pub fn tail<'a>(&self, text: &'a str, n: usize) -> &'a str {
        if n == 0 {
            return "";
        }
        let spans = self.tokenizer.token_spans(text);
        let start = spans
            .len()
            .checked_sub(n)
            .and_then(|first| spans.get(first))
            .map_or(0, |span| span.start);
        text.get(start..).unwrap_or(text).trim()
    }
}

impl Default for TokenCounter {
    #[inline]
    fn default() -> Self {
        Self::new(Arc::new(RegexTokenizer::default()))
    }
}
