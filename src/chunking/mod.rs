
pub mod boundaries;
pub mod strategy;
pub mod tokens;

use std::collections::HashSet;
use std::fmt::{self, Write as _};
use std::ops::Range;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::debug;

use crate::config::ConfigError;
use boundaries::{BoundaryFinder, Section, trim_span};
use strategy::{Budget, SplitChain, Unit};
use tokens::TokenCounter;

pub use boundaries::BoundaryKind;
pub use tokens::{RegexTokenizer, Tokenizer};

/// Open key/value metadata carried on every chunk
pub type Metadata = serde_json::Map<String, serde_json::Value>;

/// Text placed between the overlap carried from the previous chunk and the new body
pub const OVERLAP_SEPARATOR: &str = "\n\n";

/// Tokens a single join may add or remove when summed counts stand in for a recount
const JOIN_SLACK: usize = 2;

/// Configuration for document chunking
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChunkConfig {
    /// Chunks are packed up to this many tokens
    pub target_tokens: usize,
    /// Chunks below this size are merged into a neighbour when possible
    pub min_tokens: usize,
    /// Hard upper bound for every chunk
    pub max_tokens: usize,
    /// Tokens repeated from the end of one chunk at the start of the next
    pub overlap_tokens: usize,
    pub respect_sections: bool,
    pub respect_paragraphs: bool,
    pub respect_sentences: bool,
    /// Characters per token assumed when cutting text with no usable boundaries
    pub avg_chars_per_token: f64,
}

impl Default for ChunkConfig {
    #[inline]
    fn default() -> Self {
        Self {
            target_tokens: 1000,
            min_tokens: 200,
            max_tokens: 1200,
            overlap_tokens: 100,
            respect_sections: true,
            respect_paragraphs: true,
            respect_sentences: true,
            avg_chars_per_token: 4.0,
        }
    }
}

impl ChunkConfig {
    #[inline]
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_tokens == 0 {
            return Err(ConfigError::InvalidMaxTokens(self.max_tokens));
        }
        if self.min_tokens >= self.max_tokens {
            return Err(ConfigError::MinNotBelowMax {
                min: self.min_tokens,
                max: self.max_tokens,
            });
        }
        if self.target_tokens < self.min_tokens || self.target_tokens > self.max_tokens {
            return Err(ConfigError::TargetOutOfRange {
                target: self.target_tokens,
                min: self.min_tokens,
                max: self.max_tokens,
            });
        }
        if self.overlap_tokens >= self.target_tokens {
            return Err(ConfigError::OverlapTooLarge {
                overlap: self.overlap_tokens,
                target: self.target_tokens,
            });
        }
        if !self.avg_chars_per_token.is_finite() || self.avg_chars_per_token <= 0.0 {
            return Err(ConfigError::InvalidCharsPerToken(self.avg_chars_per_token));
        }
        Ok(())
    }
}

/// How a chunk was produced
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChunkStrategy {
    /// The whole input fit in one chunk
    None,
    SectionsWithOverlap,
    /// At least part of the chunk was cut by character count
    HardSplit,
}

impl ChunkStrategy {
    #[inline]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::None => "none",
            Self::SectionsWithOverlap => "sections_with_overlap",
            Self::HardSplit => "hard_split",
        }
    }
}

impl fmt::Display for ChunkStrategy {
    #[inline]
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which part of the source document a chunk covers.
///
/// Serialized as a short human-readable string such as `"sections 0-2"`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub enum SectionsRange {
    Whole,
    Sections { first: usize, last: usize },
    /// A structured element extracted separately from the running text
    Element(String),
}

impl SectionsRange {
    #[inline]
    pub fn contains(&self, section: usize) -> bool {
        match self {
            Self::Whole => true,
            Self::Sections { first, last } => (*first..=*last).contains(&section),
            Self::Element(_) => false,
        }
    }
}

impl fmt::Display for SectionsRange {
    #[inline]
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Whole => f.write_str("full document"),
            Self::Sections { first, last } if first == last => write!(f, "section {first}"),
            Self::Sections { first, last } => write!(f, "sections {first}-{last}"),
            Self::Element(name) => f.write_str(name),
        }
    }
}

impl FromStr for SectionsRange {
    type Err = String;

    #[inline]
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parse = |n: &str| {
            n.trim()
                .parse::<usize>()
                .map_err(|e| format!("invalid section number '{n}': {e}"))
        };
        if s == "full document" {
            Ok(Self::Whole)
        } else if let Some(range) = s.strip_prefix("sections ") {
            let (first, last) = range
                .split_once('-')
                .ok_or_else(|| format!("invalid sections range '{s}'"))?;
            Ok(Self::Sections {
                first: parse(first)?,
                last: parse(last)?,
            })
        } else if let Some(single) = s.strip_prefix("section ") {
            let section = parse(single)?;
            Ok(Self::Sections {
                first: section,
                last: section,
            })
        } else if s.is_empty() {
            Err("empty sections range".to_string())
        } else {
            Ok(Self::Element(s.to_string()))
        }
    }
}

impl From<SectionsRange> for String {
    #[inline]
    fn from(range: SectionsRange) -> Self {
        range.to_string()
    }
}

impl TryFrom<String> for SectionsRange {
    type Error = String;

    #[inline]
    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

/// A contiguous, possibly overlapping span of a document selected for retrieval
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    pub id: String,
    pub document_id: String,
    /// 0-based position among the chunks of the document
    pub sequence_index: usize,
    pub content: String,
    pub token_count: usize,
    pub sections_range: SectionsRange,
    pub strategy: ChunkStrategy,
    /// Byte length of the leading part of `content` repeated from the previous chunk,
    /// separator included
    #[serde(default)]
    pub overlap_len: usize,
    #[serde(default)]
    pub metadata: Metadata,
}

impl Chunk {
    /// The content with the overlap from the previous chunk removed
    #[inline]
    pub fn body(&self) -> &str {
        self.content.get(self.overlap_len..).unwrap_or(&self.content)
    }
}

/// Deterministic id from the owning document and the chunk text
#[inline]
pub fn chunk_id(document_id: &str, content: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(document_id.as_bytes());
    hasher.update([0u8]);
    hasher.update(content.as_bytes());
    let digest = hasher.finalize();

    let hash = digest.iter().take(8).fold(String::with_capacity(16), |mut hex, byte| {
        // writing to a String cannot fail
        write!(hex, "{byte:02x}").ok();
        hex
    });
    format!("{document_id}_{hash}")
}

/// Hands out chunk ids for one document, suffixing repeats of identical content with
/// `-1`, `-2`, ... in order of appearance.
#[derive(Debug, Clone)]
pub struct ChunkIdAllocator {
    document_id: String,
    issued: HashSet<String>,
}

impl ChunkIdAllocator {
    #[inline]
    pub fn new(document_id: &str) -> Self {
        Self {
            document_id: document_id.to_string(),
            issued: HashSet::new(),
        }
    }

    /// Continue allocating after chunks that already have ids
    #[inline]
    pub fn after(document_id: &str, chunks: &[Chunk]) -> Self {
        let mut allocator = Self::new(document_id);
        allocator
            .issued
            .extend(chunks.iter().map(|chunk| chunk.id.clone()));
        allocator
    }

    #[inline]
    pub fn next_id(&mut self, content: &str) -> String {
        let base = chunk_id(&self.document_id, content);
        let mut candidate = base.clone();
        let mut ordinal = 0;
        while self.issued.contains(&candidate) {
            ordinal += 1;
            candidate = format!("{base}-{ordinal}");
        }
        self.issued.insert(candidate.clone());
        candidate
    }
}

/// A chunk under construction: overlap text plus a verbatim span of the source
#[derive(Debug, Clone)]
struct Draft {
    overlap: String,
    body: Range<usize>,
    first_section: usize,
    last_section: usize,
    hard_split: bool,
    tokens: usize,
    /// Joins summed into `tokens` since it was last measured exactly
    unsettled: usize,
}

impl Draft {
    fn content(&self, text: &str) -> String {
        compose(&self.overlap, text.get(self.body.clone()).unwrap_or(""))
    }
}

fn compose(overlap: &str, body: &str) -> String {
    if overlap.is_empty() {
        body.to_string()
    } else {
        let mut content = String::with_capacity(overlap.len() + OVERLAP_SEPARATOR.len() + body.len());
        content.push_str(overlap);
        content.push_str(OVERLAP_SEPARATOR);
        content.push_str(body);
        content
    }
}

/// Structure-aware, token-budgeted document splitter.
///
/// Stateless once built, so one chunker can serve many documents in parallel.
#[derive(Debug, Clone)]
pub struct Chunker {
    config: ChunkConfig,
    counter: TokenCounter,
}

impl Chunker {
    #[inline]
    pub fn new(config: ChunkConfig) -> Result<Self, ConfigError> {
        Self::with_counter(config, TokenCounter::default())
    }

    #[inline]
    pub fn with_counter(config: ChunkConfig, counter: TokenCounter) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self { config, counter })
    }

    #[inline]
    pub fn config(&self) -> &ChunkConfig {
        &self.config
    }

    #[inline]
    pub fn counter(&self) -> &TokenCounter {
        &self.counter
    }

    /// Split `text` into ordered, overlapping chunks that each fit `max_tokens`.
    ///
    /// `metadata` is copied onto every chunk; chunks inside a titled section also get a
    /// `section_title` entry.
    #[inline]
    pub fn chunk(&self, document_id: &str, text: &str, metadata: &Metadata) -> Vec<Chunk> {
        let Some(whole) = trim_span(text, 0..text.len()) else {
            return Vec::new();
        };

        let total_tokens = self.counter.count(text);
        if total_tokens <= self.config.max_tokens {
            let content = text.get(whole).unwrap_or(text).to_string();
            let token_count = self.counter.count(&content);
            debug!(
                "Document '{}' fits in a single chunk ({} tokens)",
                document_id, token_count
            );
            return vec![Chunk {
                id: chunk_id(document_id, &content),
                document_id: document_id.to_string(),
                sequence_index: 0,
                content,
                token_count,
                sections_range: SectionsRange::Whole,
                strategy: ChunkStrategy::None,
                overlap_len: 0,
                metadata: metadata.clone(),
            }];
        }

        let sections = if self.config.respect_sections {
            BoundaryFinder.sections(text)
        } else {
            vec![Section {
                span: whole,
                kind: None,
                title: None,
            }]
        };

        let chain = SplitChain::new(
            self.config.respect_paragraphs,
            self.config.respect_sentences,
            self.config.target_tokens,
            self.config.max_tokens,
        );
        let budget = Budget {
            max_tokens: self.config.max_tokens,
            avg_chars_per_token: self.config.avg_chars_per_token,
            counter: &self.counter,
        };
        let units: Vec<(usize, Unit)> = sections
            .iter()
            .enumerate()
            .flat_map(|(idx, section)| {
                chain
                    .units(text, section.span.clone(), &budget)
                    .into_iter()
                    .map(move |unit| (idx, unit))
            })
            .collect();

        let drafts = self.pack(text, units);
        let drafts = self.merge_small(text, drafts);
        let chunks = self.finish(document_id, text, &sections, drafts, metadata);

        debug!(
            "Chunked document '{}' ({} tokens, {} sections) into {} chunks (avg {} tokens)",
            document_id,
            total_tokens,
            sections.len(),
            chunks.len(),
            chunks.iter().map(|c| c.token_count).sum::<usize>() / chunks.len().max(1)
        );

        chunks
    }

    /// Greedily fill chunks up to the target, seeding each new chunk with the tail of the
    /// one just closed.
    fn pack(&self, text: &str, units: Vec<(usize, Unit)>) -> Vec<Draft> {
        let mut drafts = Vec::new();
        let mut current: Option<Draft> = None;

        for (section, mut unit) in units {
            if let Some(draft) = current.as_mut() {
                if self.try_extend(text, draft, section, &unit) {
                    continue;
                }
                if draft.tokens < self.config.min_tokens {
                    if let Some(rest) = self.fill(text, draft, section, &unit) {
                        unit = rest;
                    }
                }
            }

            let overlap = match current.take() {
                Some(mut closed) => {
                    self.settle(text, &mut closed);
                    let overlap = self.overlap_after(text, &closed);
                    drafts.push(closed);
                    overlap
                }
                None => String::new(),
            };
            current = Some(self.open(text, overlap, section, &unit));
        }

        if let Some(mut last) = current {
            self.settle(text, &mut last);
            drafts.push(last);
        }
        drafts
    }

    /// Append `unit` to `draft` when the result stays within `target_tokens`, or within
    /// `max_tokens` while the draft is still below `min_tokens`.
    ///
    /// Token counts are summed across joins and only measured exactly once the running
    /// total comes within `JOIN_SLACK` tokens per join of the target.
    fn try_extend(&self, text: &str, draft: &mut Draft, section: usize, unit: &Unit) -> bool {
        let gap = self
            .counter
            .count(text.get(draft.body.end..unit.span.start).unwrap_or(""));
        let estimate = draft.tokens + gap + unit.tokens;
        let joins = draft.unsettled + 1;

        let tokens = if estimate + JOIN_SLACK * joins <= self.config.target_tokens {
            draft.unsettled = joins;
            estimate
        } else {
            self.settle(text, draft);
            let candidate = compose(
                &draft.overlap,
                text.get(draft.body.start..unit.span.end).unwrap_or(""),
            );
            let tokens = self.counter.count(&candidate);
            let fits_target = tokens <= self.config.target_tokens;
            let undersized =
                draft.tokens < self.config.min_tokens && tokens <= self.config.max_tokens;
            if !(fits_target || undersized) {
                return false;
            }
            tokens
        };

        draft.body.end = unit.span.end;
        draft.last_section = section;
        draft.hard_split |= unit.is_hard_split();
        draft.tokens = tokens;
        true
    }

    /// Move the longest leading part of `unit` that still fits `max_tokens` into an
    /// undersized `draft`, returning what is left of the unit.
    ///
    /// Hard-split units may be cut at any token; other units only at sentence ends.
    fn fill(&self, text: &str, draft: &mut Draft, section: usize, unit: &Unit) -> Option<Unit> {
        let cuts: Vec<usize> = if unit.is_hard_split() {
            let slice = text.get(unit.span.clone())?;
            self.counter
                .spans(slice)
                .into_iter()
                .map(|span| unit.span.start + span.end)
                .collect()
        } else if self.config.respect_sentences {
            BoundaryFinder
                .sentences(text, unit.span.clone())
                .into_iter()
                .map(|span| span.end)
                .collect()
        } else {
            return None;
        };
        // the whole unit is already known not to fit
        let candidates = cuts.get(..cuts.len().saturating_sub(1))?;

        let end = {
            let fits = |end: usize| {
                let content = compose(
                    &draft.overlap,
                    text.get(draft.body.start..end).unwrap_or(""),
                );
                self.counter.count(&content) <= self.config.max_tokens
            };
            let usable = candidates.partition_point(|&end| fits(end));
            *candidates.get(usable.checked_sub(1)?)?
        };
        let head = trim_span(text, draft.body.start..end)?;
        let rest = trim_span(text, end..unit.span.end)?;

        draft.body.end = head.end;
        draft.last_section = section;
        draft.hard_split |= unit.is_hard_split();
        draft.unsettled = 1;
        self.settle(text, draft);

        Some(Unit {
            tokens: self.counter.count(text.get(rest.clone()).unwrap_or("")),
            span: rest,
            origin: unit.origin,
        })
    }

    fn settle(&self, text: &str, draft: &mut Draft) {
        if draft.unsettled > 0 {
            draft.tokens = self.counter.count(&draft.content(text));
            draft.unsettled = 0;
        }
    }

    fn overlap_after(&self, text: &str, closed: &Draft) -> String {
        if self.config.overlap_tokens == 0 {
            return String::new();
        }
        let content = closed.content(text);
        self.counter
            .tail(&content, self.config.overlap_tokens)
            .to_string()
    }

    /// Drop leading overlap tokens until overlap plus `text[body]` fits `max_tokens`.
    ///
    /// Returns the kept overlap and the token count of the composed chunk, which is still
    /// above `max_tokens` when the body alone does not fit.
    fn fit_overlap(&self, text: &str, mut overlap: String, body: Range<usize>) -> (String, usize) {
        let body = text.get(body).unwrap_or("");
        let mut overlap_tokens = self.counter.count(&overlap);
        loop {
            let tokens = self.counter.count(&compose(&overlap, body));
            if tokens <= self.config.max_tokens || overlap.is_empty() {
                return (overlap, tokens);
            }
            let excess = tokens - self.config.max_tokens;
            overlap_tokens = overlap_tokens.saturating_sub(excess.max(1));
            overlap = self.counter.tail(&overlap, overlap_tokens).to_string();
        }
    }

    /// Start a chunk with `unit`, shrinking the overlap until the chunk fits `max_tokens`.
    fn open(&self, text: &str, overlap: String, section: usize, unit: &Unit) -> Draft {
        let (overlap, tokens) = self.fit_overlap(text, overlap, unit.span.clone());
        Draft {
            overlap,
            body: unit.span.clone(),
            first_section: section,
            last_section: section,
            hard_split: unit.is_hard_split(),
            tokens,
            unsettled: 0,
        }
    }

    /// Fold chunks below `min_tokens` into the following chunk (or, for the last chunk,
    /// the preceding one), trimming the carried overlap when that makes the result fit
    /// `max_tokens`.
    fn merge_small(&self, text: &str, drafts: Vec<Draft>) -> Vec<Draft> {
        let mut merged: Vec<Draft> = Vec::with_capacity(drafts.len());
        let mut iter = drafts.into_iter();
        let Some(mut current) = iter.next() else {
            return merged;
        };

        for next in iter {
            if current.tokens < self.config.min_tokens {
                let body = current.body.start..next.body.end;
                let (overlap, tokens) =
                    self.fit_overlap(text, current.overlap.clone(), body.clone());
                if tokens <= self.config.max_tokens {
                    current = Draft {
                        overlap,
                        body,
                        first_section: current.first_section,
                        last_section: next.last_section,
                        hard_split: current.hard_split || next.hard_split,
                        tokens,
                        unsettled: 0,
                    };
                    continue;
                }
            }
            merged.push(current);
            current = next;
        }

        if current.tokens < self.config.min_tokens {
            if let Some(previous) = merged.last_mut() {
                let body = previous.body.start..current.body.end;
                let (overlap, tokens) =
                    self.fit_overlap(text, previous.overlap.clone(), body.clone());
                if tokens <= self.config.max_tokens {
                    previous.overlap = overlap;
                    previous.body = body;
                    previous.last_section = current.last_section;
                    previous.hard_split |= current.hard_split;
                    previous.tokens = tokens;
                    return merged;
                }
            }
        }

        merged.push(current);
        merged
    }

    fn finish(
        &self,
        document_id: &str,
        text: &str,
        sections: &[Section],
        drafts: Vec<Draft>,
        metadata: &Metadata,
    ) -> Vec<Chunk> {
        let mut ids = ChunkIdAllocator::new(document_id);
        drafts
            .into_iter()
            .enumerate()
            .map(|(sequence_index, draft)| {
                let content = draft.content(text);
                let overlap_len = if draft.overlap.is_empty() {
                    0
                } else {
                    draft.overlap.len() + OVERLAP_SEPARATOR.len()
                };

                let mut chunk_metadata = metadata.clone();
                let title = sections
                    .get(draft.first_section..=draft.last_section)
                    .and_then(|range| range.iter().find_map(|s| s.title.as_deref()));
                if let Some(title) = title {
                    chunk_metadata.insert("section_title".to_string(), title.into());
                }

                Chunk {
                    id: ids.next_id(&content),
                    document_id: document_id.to_string(),
                    sequence_index,
                    token_count: draft.tokens,
                    content,
                    sections_range: SectionsRange::Sections {
                        first: draft.first_section,
                        last: draft.last_section,
                    },
                    strategy: if draft.hard_split {
                        ChunkStrategy::HardSplit
                    } else {
                        ChunkStrategy::SectionsWithOverlap
                    },
                    overlap_len,
                    metadata: chunk_metadata,
                }
            })
            .collect()
    }
}

/// Chunk `text` with a one-off chunker built from `config`
#[inline]
pub fn chunk_text(
    document_id: &str,
    text: &str,
    config: &ChunkConfig,
) -> Result<Vec<Chunk>, ConfigError> {
    let chunker = Chunker::new(config.clone())?;
    Ok(chunker.chunk(document_id, text, &Metadata::new()))
}
