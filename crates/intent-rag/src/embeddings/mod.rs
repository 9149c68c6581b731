//! Embedding and reranking models
//!
//! Both models are ONNX encoders behind a lazily loaded [`OnnxModel`]. The
//! traits here are synchronous and CPU-bound; async callers go through
//! `spawn_blocking`.

mod onnx_embedder;
mod onnx_model;
mod pooling;
mod reranker;

pub use onnx_embedder::{prepare_texts, OnnxEmbedder, EMPTY_PLACEHOLDER};
pub use onnx_model::{ModelOutput, OnnxModel};
pub use pooling::{l2_normalize, pool, PoolingStrategy};
pub use reranker::{CrossEncoderReranker, Reranker};

use serde::Serialize;

use crate::error::Result;

/// Query texts get the instruction prefix; documents are encoded raw
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmbedMode {
    Query,
    Document,
}

/// Cumulative encoder usage
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct EmbedderStats {
    pub texts_processed: u64,
    pub total_encode_ms: u64,
}

/// Text to fixed-width vector encoder
pub trait TextEmbedder: Send + Sync {
    /// Output vector width
    fn dimensions(&self) -> usize;

    /// Encode `texts`; row `i` of the result belongs to `texts[i]`
    fn embed(&self, texts: &[&str], mode: EmbedMode) -> Result<Vec<Vec<f32>>>;

    fn stats(&self) -> EmbedderStats {
        EmbedderStats::default()
    }

    /// Convenience for a single query
    fn embed_query(&self, text: &str) -> Result<Vec<f32>> {
        self.embed(&[text], EmbedMode::Query)?
            .into_iter()
            .next()
            .ok_or_else(|| crate::error::Error::embedding("Empty embedding result"))
    }
}
