
use std::borrow::Cow;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::chunking::{Chunk, Metadata};

/// A single condition on one metadata key.
#[derive(Debug, Clone, PartialEq)]
pub enum Predicate {
    Equals { key: String, value: Value },
    OneOf { key: String, values: Vec<Value> },
}

impl Predicate {
    #[inline]
    pub fn key(&self) -> &str {
        match self {
            Self::Equals { key, .. } | Self::OneOf { key, .. } => key,
        }
    }

    #[inline]
    pub fn matches(&self, chunk: &Chunk) -> bool {
        let Some(actual) = field(chunk, self.key()) else {
            return false;
        };
        match self {
            Self::Equals { value, .. } => values_equal(&actual, value),
            Self::OneOf { values, .. } => values.iter().any(|value| values_equal(&actual, value)),
        }
    }
}

/// Conjunction of predicates applied to chunk metadata before ranking.
///
/// Serialized as a plain map: a scalar value is an exact match, a list is set membership.
/// Keys missing from a chunk's metadata fall back to the chunk's own fields
/// (`document_id`, `id`, `strategy`, `sequence_index`).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(from = "Metadata", into = "Metadata")]
pub struct MetadataFilter {
    predicates: Vec<Predicate>,
}

impl MetadataFilter {
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    #[must_use]
    pub fn equals(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.predicates.push(Predicate::Equals {
            key: key.into(),
            value: value.into(),
        });
        self
    }

    #[inline]
    #[must_use]
    pub fn one_of<V: Into<Value>>(
        mut self,
        key: impl Into<String>,
        values: impl IntoIterator<Item = V>,
    ) -> Self {
        self.predicates.push(Predicate::OneOf {
            key: key.into(),
            values: values.into_iter().map(Into::into).collect(),
        });
        self
    }

    #[inline]
    pub fn predicates(&self) -> &[Predicate] {
        &self.predicates
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.predicates.is_empty()
    }

    /// An empty filter matches everything.
    #[inline]
    pub fn matches(&self, chunk: &Chunk) -> bool {
        self.predicates.iter().all(|predicate| predicate.matches(chunk))
    }
}

impl From<Metadata> for MetadataFilter {
    #[inline]
    fn from(map: Metadata) -> Self {
        let predicates = map
            .into_iter()
            .map(|(key, value)| match value {
                Value::Array(values) => Predicate::OneOf { key, values },
                value => Predicate::Equals { key, value },
            })
            .collect();
        Self { predicates }
    }
}

impl From<MetadataFilter> for Metadata {
    #[inline]
    fn from(filter: MetadataFilter) -> Self {
        filter
            .predicates
            .into_iter()
            .map(|predicate| match predicate {
                Predicate::Equals { key, value } => (key, value),
                Predicate::OneOf { key, values } => (key, Value::Array(values)),
            })
            .collect()
    }
}

fn field<'a>(chunk: &'a Chunk, key: &str) -> Option<Cow<'a, Value>> {
    if let Some(value) = chunk.metadata.get(key) {
        return Some(Cow::Borrowed(value));
    }
    let value = match key {
        "id" => Value::from(chunk.id.as_str()),
        "document_id" => Value::from(chunk.document_id.as_str()),
        "strategy" => Value::from(chunk.strategy.as_str()),
        "sequence_index" => Value::from(chunk.sequence_index),
        _ => return None,
    };
    Some(Cow::Owned(value))
}

/// Equality that treats `1` and `1.0` as the same number.
fn values_equal(actual: &Value, expected: &Value) -> bool {
    match (actual, expected) {
        (Value::Number(a), Value::Number(b)) => match (a.as_f64(), b.as_f64()) {
            (Some(a), Some(b)) => a == b,
            _ => a == b,
        },
        _ => actual == expected,
    }
}
