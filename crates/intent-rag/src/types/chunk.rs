//! Chunk and labeled example types

use serde::{Deserialize, Serialize};

use super::Intent;

/// Smallest retrievable unit of source text
///
/// Produced once by ingestion and never mutated afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chunk {
    /// Stable identifier, unique within a collection
    pub id: String,
    /// Chunk text
    pub text: String,
}

impl Chunk {
    pub fn new(id: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            text: text.into(),
        }
    }
}

/// One line of a pre-chunked corpus file; the id is optional
#[derive(Debug, Clone, Deserialize)]
pub struct ChunkRecord {
    #[serde(default)]
    pub id: Option<String>,
    pub text: String,
}

/// A labeled query used to train the intent classifier
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LabeledExample {
    pub text: String,
    #[serde(deserialize_with = "deserialize_intent")]
    pub intent: Intent,
}

fn deserialize_intent<'de, D>(deserializer: D) -> std::result::Result<Intent, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let label = String::deserialize(deserializer)?;
    label.parse().map_err(serde::de::Error::custom)
}
