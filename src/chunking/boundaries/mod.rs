
use std::collections::BTreeMap;
use std::ops::Range;
use std::sync::LazyLock;

use fancy_regex::Regex;

/// Kinds of section boundary, strongest first.
///
/// When several patterns match at the same line, the earliest kind in this list wins.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum BoundaryKind {
    /// A rule of 50 or more `=` or `-` characters
    Separator,
    /// `--- DOCUMENT: name ---`
    DocumentMarker,
    MarkdownHeader,
    AllCapsTitle,
    NumberedHeading,
    RomanHeading,
}

static SECTION_PATTERNS: LazyLock<Vec<(BoundaryKind, Regex)>> = LazyLock::new(|| {
    vec![
        (
            BoundaryKind::Separator,
            Regex::new(r"(?m)^(?:={50,}|-{50,})[ \t]*$").expect("valid regex"),
        ),
        (
            BoundaryKind::DocumentMarker,
            Regex::new(r"(?m)^---[ \t]*DOCUMENT:[^\n]*---[ \t]*$").expect("valid regex"),
        ),
        (
            BoundaryKind::MarkdownHeader,
            Regex::new(r"(?m)^#{1,6}[ \t]+\S[^\n]*$").expect("valid regex"),
        ),
        (
            BoundaryKind::AllCapsTitle,
            Regex::new(r"(?m)^\p{Lu}[\p{Lu}\p{N} \t,&/'()\-]{9,}:?[ \t]*$").expect("valid regex"),
        ),
        (
            BoundaryKind::NumberedHeading,
            Regex::new(r"(?m)^\d+\.(?:\d+\.?)*[ \t]+\p{Lu}[^\n]{0,80}$").expect("valid regex"),
        ),
        (
            BoundaryKind::RomanHeading,
            Regex::new(r"(?m)^[IVXLC]+\.[ \t]+\S[^\n]{0,80}$").expect("valid regex"),
        ),
    ]
});

static BLANK_LINE_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\n[ \t]*\n\s*").expect("valid regex"));

static LIST_ITEM_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?m)^[ \t]*(?:[-*•]|\d+[.)]|[a-z][.)])[ \t]+").expect("valid regex")
});

static SENTENCE_END_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?<=[.!?])["'»)\]]*\s+(?=[\p{Lu}\p{N}¿¡"'«(\[])"#).expect("valid regex")
});

/// A structural section of a document, as a trimmed byte range into the source text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Section {
    pub span: Range<usize>,
    /// The pattern class that opened this section; `None` for leading text before the
    /// first boundary
    pub kind: Option<BoundaryKind>,
    pub title: Option<String>,
}

/// Locates candidate split points in raw text.
///
/// All returned ranges are byte offsets into the text passed in, trimmed of surrounding
/// whitespace, non-empty and in document order.
#[derive(Debug, Clone, Copy, Default)]
pub struct BoundaryFinder;

impl BoundaryFinder {
    /// Split `text` into sections at separator rules, document markers and headings.
    #[inline]
    pub fn sections(&self, text: &str) -> Vec<Section> {
        let mut starts: BTreeMap<usize, (BoundaryKind, Range<usize>)> = BTreeMap::new();
        for (kind, pattern) in SECTION_PATTERNS.iter() {
            for found in pattern.find_iter(text).flatten() {
                starts
                    .entry(found.start())
                    .or_insert((*kind, found.range()));
            }
        }

        let mut sections = Vec::with_capacity(starts.len() + 1);
        let mut cursor = 0;
        let mut open: Option<(BoundaryKind, Range<usize>)> = None;
        for (start, boundary) in starts {
            push_section(text, cursor..start, open.take(), &mut sections);
            cursor = start;
            open = Some(boundary);
        }
        push_section(text, cursor..text.len(), open, &mut sections);
        sections
    }

    /// Paragraphs of `text[span]`, split at blank lines and list-item markers.
    #[inline]
    pub fn paragraphs(&self, text: &str, span: Range<usize>) -> Vec<Range<usize>> {
        let Some(slice) = text.get(span.clone()) else {
            return Vec::new();
        };
        let mut cuts: Vec<(usize, usize)> = BLANK_LINE_REGEX
            .find_iter(slice)
            .flatten()
            .map(|found| (found.start(), found.end()))
            .collect();
        cuts.extend(
            LIST_ITEM_REGEX
                .find_iter(slice)
                .flatten()
                .filter(|found| found.start() > 0)
                .map(|found| (found.start(), found.start())),
        );
        cuts.sort_unstable();
        split_at(slice, span.start, &cuts)
    }

    /// Sentences of `text[span]`, split after terminal punctuation that is followed by
    /// whitespace and something that looks like the start of a sentence.
    #[inline]
    pub fn sentences(&self, text: &str, span: Range<usize>) -> Vec<Range<usize>> {
        let Some(slice) = text.get(span.clone()) else {
            return Vec::new();
        };
        let cuts: Vec<(usize, usize)> = SENTENCE_END_REGEX
            .find_iter(slice)
            .flatten()
            .map(|found| {
                // closing quotes and brackets stay with the sentence they end
                let trailing = found.as_str().trim_start_matches(|c: char| !c.is_whitespace());
                (found.end() - trailing.len(), found.end())
            })
            .collect();
        split_at(slice, span.start, &cuts)
    }
}

fn push_section(
    text: &str,
    range: Range<usize>,
    boundary: Option<(BoundaryKind, Range<usize>)>,
    sections: &mut Vec<Section>,
) {
    let Some(span) = trim_span(text, range) else {
        return;
    };
    let (kind, title) = boundary.map_or((None, None), |(kind, line)| {
        (Some(kind), section_title(kind, text.get(line).unwrap_or("")))
    });
    sections.push(Section { span, kind, title });
}

fn section_title(kind: BoundaryKind, line: &str) -> Option<String> {
    let title = match kind {
        BoundaryKind::Separator => return None,
        BoundaryKind::DocumentMarker => line
            .trim()
            .trim_matches('-')
            .trim()
            .trim_start_matches("DOCUMENT:")
            .trim(),
        BoundaryKind::MarkdownHeader => line.trim().trim_start_matches('#').trim(),
        BoundaryKind::AllCapsTitle => line.trim().trim_end_matches(':').trim(),
        BoundaryKind::NumberedHeading | BoundaryKind::RomanHeading => line.trim(),
    };
    (!title.is_empty()).then(|| title.to_string())
}

/// Split `slice` at the sorted `(gap_start, gap_end)` cuts, returning trimmed, non-empty
/// ranges shifted by `base`.
fn split_at(slice: &str, base: usize, cuts: &[(usize, usize)]) -> Vec<Range<usize>> {
    let mut pieces = Vec::with_capacity(cuts.len() + 1);
    let mut cursor = 0;
    for &(gap_start, gap_end) in cuts {
        if gap_start < cursor {
            cursor = cursor.max(gap_end);
            continue;
        }
        if let Some(piece) = trim_span(slice, cursor..gap_start) {
            pieces.push(piece.start + base..piece.end + base);
        }
        cursor = gap_end;
    }
    if let Some(piece) = trim_span(slice, cursor..slice.len()) {
        pieces.push(piece.start + base..piece.end + base);
    }
    pieces
}

/// Shrink `range` to exclude leading and trailing whitespace; `None` if nothing is left.
pub(crate) fn trim_span(text: &str, range: Range<usize>) -> Option<Range<usize>> {
    let slice = text.get(range.clone())?;
    let leading = slice.len() - slice.trim_start().len();
    let trimmed = slice.trim();
    if trimmed.is_empty() {
        return None;
    }
    let start = range.start + leading;
    Some(start..start + trimmed.len())
}
