#[cfg(test)]
mod tests;

use std::fmt::Debug;
use std::ops::Range;

use super::boundaries::BoundaryFinder;
use super::tokens::TokenCounter;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SplitLevel {
    Paragraph,
    Sentence,
    Hard,
}

/// The limits a strategy splits against.
#[derive(Debug, Clone, Copy)]
pub struct Budget<'a> {
    pub max_tokens: usize,
    pub avg_chars_per_token: f64,
    pub counter: &'a TokenCounter,
}

impl Budget<'_> {
    #[inline]
    pub fn fits(&self, text: &str) -> bool {
        self.counter.count(text) <= self.max_tokens
    }
}

/// One way of dividing an oversized span.
///
/// Returns sub-spans relative to `text`, or `None` when this strategy finds nothing to
/// split on.
pub trait SplitStrategy: Send + Sync + Debug {
    fn level(&self) -> SplitLevel;

    fn split(&self, text: &str, budget: &Budget<'_>) -> Option<Vec<Range<usize>>>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ParagraphSplit;

impl SplitStrategy for ParagraphSplit {
    #[inline]
    fn level(&self) -> SplitLevel {
        SplitLevel::Paragraph
    }

    #[inline]
    fn split(&self, text: &str, _budget: &Budget<'_>) -> Option<Vec<Range<usize>>> {
        let pieces = BoundaryFinder.paragraphs(text, 0..text.len());
        (pieces.len() > 1).then_some(pieces)
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SentenceSplit;

impl SplitStrategy for SentenceSplit {
    #[inline]
    fn level(&self) -> SplitLevel {
        SplitLevel::Sentence
    }

    #[inline]
    fn split(&self, text: &str, _budget: &Budget<'_>) -> Option<Vec<Range<usize>>> {
        let pieces = BoundaryFinder.sentences(text, 0..text.len());
        (pieces.len() > 1).then_some(pieces)
    }
}

/// Cuts text into runs of `max_tokens * avg_chars_per_token` characters, halving the run
/// length for any piece the tokenizer still measures above the budget.
#[derive(Debug, Clone, Copy, Default)]
pub struct HardSplit;

impl HardSplit {
    fn cut(text: &str, base: usize, slice_chars: usize, budget: &Budget<'_>) -> Vec<Range<usize>> {
        let mut pieces = Vec::new();
        let mut start = 0;
        let mut chars = 0;
        for (idx, _) in text.char_indices() {
            if chars == slice_chars {
                pieces.push(start..idx);
                start = idx;
                chars = 0;
            }
            chars += 1;
        }
        if start < text.len() {
            pieces.push(start..text.len());
        }

        let mut out = Vec::with_capacity(pieces.len());
        for piece in pieces {
            let Some(slice) = text.get(piece.clone()) else {
                continue;
            };
            if slice.trim().is_empty() {
                continue;
            }
            if slice_chars > 1 && !budget.fits(slice) {
                out.extend(Self::cut(slice, base + piece.start, slice_chars / 2, budget));
            } else {
                out.push(base + piece.start..base + piece.end);
            }
        }
        out
    }
}

impl SplitStrategy for HardSplit {
    #[inline]
    fn level(&self) -> SplitLevel {
        SplitLevel::Hard
    }

    #[inline]
    fn split(&self, text: &str, budget: &Budget<'_>) -> Option<Vec<Range<usize>>> {
        let slice_chars = (budget.max_tokens as f64 * budget.avg_chars_per_token).floor() as usize;
        let pieces = Self::cut(text, 0, slice_chars.max(1), budget);
        (!pieces.is_empty()).then_some(pieces)
    }
}

/// A packing unit: a span of the source text that fits the token budget.
///
/// Only units produced by a hard split may end mid-sentence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Unit {
    pub span: Range<usize>,
    pub tokens: usize,
    /// The strategy that produced this unit, `None` when the span was kept whole
    pub origin: Option<SplitLevel>,
}

impl Unit {
    #[inline]
    pub fn is_hard_split(&self) -> bool {
        self.origin == Some(SplitLevel::Hard)
    }
}

#[derive(Debug)]
struct Step {
    strategy: Box<dyn SplitStrategy>,
    split_above: usize,
}

/// Ordered list of split strategies.
///
/// A span is handed to the first remaining strategy whose threshold it exceeds; each
/// resulting piece continues with the strategies after it.
#[derive(Debug)]
pub struct SplitChain {
    steps: Vec<Step>,
}

impl SplitChain {
    /// Paragraphs split sections above `target_tokens`; sentences and hard cuts split
    /// anything above `max_tokens`. The hard split is always last.
    #[inline]
    pub fn new(
        respect_paragraphs: bool,
        respect_sentences: bool,
        target_tokens: usize,
        max_tokens: usize,
    ) -> Self {
        let mut steps = Vec::with_capacity(3);
        if respect_paragraphs {
            steps.push(Step {
                strategy: Box::new(ParagraphSplit),
                split_above: target_tokens,
            });
        }
        if respect_sentences {
            steps.push(Step {
                strategy: Box::new(SentenceSplit),
                split_above: max_tokens,
            });
        }
        steps.push(Step {
            strategy: Box::new(HardSplit),
            split_above: max_tokens,
        });
        Self { steps }
    }

    #[inline]
    pub fn levels(&self) -> Vec<SplitLevel> {
        self.steps.iter().map(|step| step.strategy.level()).collect()
    }

    /// Break `text[span]` into units.
    #[inline]
    pub fn units(&self, text: &str, span: Range<usize>, budget: &Budget<'_>) -> Vec<Unit> {
        let mut units = Vec::new();
        self.refine(text, span, 0, None, budget, &mut units);
        units
    }

    fn refine(
        &self,
        text: &str,
        span: Range<usize>,
        from_step: usize,
        origin: Option<SplitLevel>,
        budget: &Budget<'_>,
        units: &mut Vec<Unit>,
    ) {
        let Some(slice) = text.get(span.clone()) else {
            return;
        };
        let tokens = budget.counter.count(slice);

        for (idx, step) in self.steps.iter().enumerate().skip(from_step) {
            if tokens <= step.split_above {
                continue;
            }
            let Some(pieces) = step.strategy.split(slice, budget) else {
                continue;
            };
            let level = step.strategy.level();
            for piece in pieces {
                let absolute = span.start + piece.start..span.start + piece.end;
                self.refine(text, absolute, idx + 1, Some(level), budget, units);
            }
            return;
        }

        units.push(Unit {
            span,
            tokens,
            origin,
        });
    }
}
