//! Cross-encoder relevance scoring

use std::sync::Arc;

use super::onnx_model::OnnxModel;
use crate::config::RerankerConfig;
use crate::error::{Error, Result};

/// Scores `(query, candidate)` pairs; higher means more relevant
pub trait Reranker: Send + Sync {
    /// One score per candidate, in candidate order
    fn score(&self, query: &str, candidates: &[String]) -> Result<Vec<f32>>;
}

/// Cross-encoder reranker over a shared [`OnnxModel`]
pub struct CrossEncoderReranker {
    model: Arc<OnnxModel>,
    batch_size: usize,
}

impl CrossEncoderReranker {
    pub fn new(config: &RerankerConfig) -> Self {
        let model = OnnxModel::new(&config.model_dir, &config.model_repo, config.max_length, None);
        Self {
            model: Arc::new(model),
            batch_size: config.batch_size.max(1),
        }
    }

    pub fn model(&self) -> &Arc<OnnxModel> {
        &self.model
    }

    pub async fn prefetch(&self) -> Result<()> {
        self.model.prefetch().await
    }
}

impl Reranker for CrossEncoderReranker {
    fn score(&self, query: &str, candidates: &[String]) -> Result<Vec<f32>> {
        let mut scores = Vec::with_capacity(candidates.len());

        for batch in candidates.chunks(self.batch_size) {
            let pairs: Vec<(String, String)> = batch
                .iter()
                .map(|c| (query.to_string(), c.clone()))
                .collect();
            let output = self.model.run(pairs)?;
            scores.extend(relevance_logits(&output.shape, &output.data, batch.len())?);
        }

        Ok(scores)
    }
}

/// Extract one relevance logit per row from a `[batch, labels]` output
///
/// Single-label heads give the score directly; two-label heads use the
/// positive class.
fn relevance_logits(shape: &[usize], data: &[f32], batch: usize) -> Result<Vec<f32>> {
    let labels = match shape {
        [rows] if *rows == batch => 1,
        [rows, labels] if *rows == batch && *labels > 0 => *labels,
        _ => {
            return Err(Error::embedding(format!(
                "Unexpected reranker output shape {:?} for {} pairs",
                shape, batch
            )))
        }
    };
    if data.len() != batch * labels {
        return Err(Error::embedding(format!(
            "Reranker output has {} values, shape {:?}",
            data.len(),
            shape
        )));
    }
    let column = if labels == 1 { 0 } else { 1 };
    Ok((0..batch).map(|i| data[i * labels + column]).collect())
}
