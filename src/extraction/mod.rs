//! Structured output of the external text/layout extraction step.
//!
//! Documents arrive as running text plus optional tagged elements (tables, key/value
//! pairs, figures). Every field that an extractor may omit has a serde default.

#[cfg(test)]
mod tests;

use std::collections::{BTreeMap, HashSet};

use itertools::Itertools;
use serde::{Deserialize, Serialize};

use crate::chunking::Metadata;

const SPANISH_INDICATORS: &[&str] = &[
    "el", "la", "de", "que", "y", "en", "un", "es", "se", "no", "te", "lo", "le", "da", "su",
    "por", "son", "con", "para", "al", "del",
];

const ENGLISH_INDICATORS: &[&str] = &[
    "the", "be", "to", "of", "and", "a", "in", "that", "have", "i", "it", "for", "not", "on",
    "with", "he", "as", "you", "do", "at",
];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractedDocument {
    pub document_id: String,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub metadata: DocumentMetadata,
    #[serde(default)]
    pub elements: Vec<ContentElement>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DocumentMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page_count: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_name: Option<String>,
    /// Anything else the extractor reported, passed through to chunk metadata
    #[serde(default, flatten)]
    pub extra: Metadata,
}

impl DocumentMetadata {
    /// Flatten into the open chunk metadata map
    #[inline]
    pub fn to_metadata(&self) -> Metadata {
        let mut metadata = self.extra.clone();
        if let Some(pages) = self.page_count {
            metadata.insert("page_count".to_string(), pages.into());
        }
        if let Some(language) = &self.language {
            metadata.insert("language".to_string(), language.as_str().into());
        }
        if let Some(file_name) = &self.file_name {
            metadata.insert("file_name".to_string(), file_name.as_str().into());
        }
        metadata
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ContentElement {
    Paragraph {
        content: String,
        /// Layout role such as `title` or `pageHeader`
        #[serde(default, skip_serializing_if = "Option::is_none")]
        role: Option<String>,
    },
    Table(Table),
    KeyValue {
        #[serde(default)]
        key: String,
        #[serde(default)]
        value: String,
    },
    Figure {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        caption: Option<String>,
    },
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Table {
    #[serde(default)]
    pub table_id: String,
    #[serde(default)]
    pub row_count: usize,
    #[serde(default)]
    pub column_count: usize,
    #[serde(default)]
    pub cells: Vec<TableCell>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableCell {
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub row_index: usize,
    #[serde(default)]
    pub column_index: usize,
    #[serde(default = "default_span")]
    pub row_span: usize,
    #[serde(default = "default_span")]
    pub column_span: usize,
}

fn default_span() -> usize {
    1
}

impl Table {
    /// One line per row, cells ordered by column and joined with ` | `
    #[inline]
    pub fn to_text(&self) -> String {
        let mut rows: BTreeMap<usize, BTreeMap<usize, &str>> = BTreeMap::new();
        for cell in &self.cells {
            rows.entry(cell.row_index)
                .or_default()
                .insert(cell.column_index, cell.content.as_str());
        }
        rows.values()
            .map(|row| row.values().join(" | "))
            .join("\n")
    }
}

impl ExtractedDocument {
    #[inline]
    pub fn tables(&self) -> impl Iterator<Item = &Table> {
        self.elements.iter().filter_map(|element| match element {
            ContentElement::Table(table) => Some(table),
            _ => None,
        })
    }

    /// Key/value pairs where both sides are non-empty
    #[inline]
    pub fn key_values(&self) -> impl Iterator<Item = (&str, &str)> {
        self.elements.iter().filter_map(|element| match element {
            ContentElement::KeyValue { key, value }
                if !key.trim().is_empty() && !value.trim().is_empty() =>
            {
                Some((key.trim(), value.trim()))
            }
            _ => None,
        })
    }

    /// The declared language, or a guess from the running text
    #[inline]
    pub fn language(&self) -> String {
        self.metadata
            .language
            .clone()
            .unwrap_or_else(|| detect_language(&self.content).to_string())
    }
}

/// Stop-word language guess between Spanish and English; ties go to English
#[inline]
pub fn detect_language(text: &str) -> &'static str {
    let lowered = text.to_lowercase();
    let words: HashSet<&str> = lowered
        .split(|c: char| !c.is_alphabetic())
        .filter(|word| !word.is_empty())
        .collect();

    let spanish = SPANISH_INDICATORS
        .iter()
        .filter(|word| words.contains(*word))
        .count();
    let english = ENGLISH_INDICATORS
        .iter()
        .filter(|word| words.contains(*word))
        .count();

    if spanish > english { "es" } else { "en" }
}
