//! Response and stream frame types

use serde::{Deserialize, Serialize};

use super::Intent;

/// Frame of the `/query` event stream
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamChunk {
    /// Newly generated text
    pub delta: String,
    /// True on the terminating frame
    pub finished: bool,
}

impl StreamChunk {
    pub fn delta(delta: impl Into<String>) -> Self {
        Self {
            delta: delta.into(),
            finished: false,
        }
    }

    /// Terminating frame: `{delta: "", finished: true}`
    pub fn finished() -> Self {
        Self {
            delta: String::new(),
            finished: true,
        }
    }
}

/// Terminal error frame of the `/query` event stream
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorChunk {
    pub error: String,
    pub finished: bool,
}

impl ErrorChunk {
    pub fn new(error: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            finished: true,
        }
    }
}

/// A ranked alternative offered when the classifier is unsure
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IntentOption {
    pub intent: Intent,
    pub confidence: f32,
}

/// Frames of the `/query_with_intent` event stream
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum IntentFrame {
    /// Selected intent, always first
    Intent {
        intent: Intent,
        avatar: String,
        confidence: f32,
    },
    /// Answer increment
    Content { delta: String },
    /// Low-confidence classification: ranked alternatives instead of an answer
    Clarification {
        options: Vec<IntentOption>,
        message: String,
    },
    /// Complete answer (non-streaming mode)
    Answer {
        intent: Intent,
        avatar: String,
        confidence: f32,
        answer: String,
        has_docs: bool,
    },
    /// Stream terminator
    Finished { finished: bool },
    /// Terminal error
    Error { error: String, finished: bool },
}

impl IntentFrame {
    pub fn finished() -> Self {
        IntentFrame::Finished { finished: true }
    }

    pub fn error(error: impl Into<String>) -> Self {
        IntentFrame::Error {
            error: error.into(),
            finished: true,
        }
    }
}

/// Response of `/intent`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IntentResponse {
    pub success: bool,
    pub intent: Intent,
    pub confidence: f32,
    pub avatar: String,
    pub message: String,
    /// Confidence fell below the routing threshold
    pub needs_clarification: bool,
    /// Ranked alternatives (top-N by probability)
    pub options: Vec<IntentOption>,
}

/// Response of `/health`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub rag_initialized: bool,
    pub classifier_initialized: bool,
    pub agents_initialized: usize,
    pub output_mode: String,
}
