//! ONNX sentence embedder

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use super::onnx_model::{ModelOutput, OnnxModel};
use super::pooling::{self, PoolingStrategy};
use super::{EmbedMode, EmbedderStats, TextEmbedder};
use crate::config::EmbeddingConfig;
use crate::error::{Error, Result};

/// Stands in for empty or whitespace-only input
pub const EMPTY_PLACEHOLDER: &str = "[empty]";

/// Sentence embedder backed by a shared [`OnnxModel`]
pub struct OnnxEmbedder {
    model: Arc<OnnxModel>,
    dimensions: usize,
    batch_size: usize,
    pooling: PoolingStrategy,
    normalize: bool,
    query_instruction: String,
    texts_processed: AtomicU64,
    encode_micros: AtomicU64,
}

impl OnnxEmbedder {
    /// Create an embedder; the model itself is loaded on first use
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let model = OnnxModel::new(
            &config.model_dir,
            &config.model_repo,
            config.max_length,
            config.intra_threads,
        );
        Self::with_model(Arc::new(model), config)
    }

    /// Create an embedder over an existing model handle
    pub fn with_model(model: Arc<OnnxModel>, config: &EmbeddingConfig) -> Result<Self> {
        Ok(Self {
            model,
            dimensions: config.dimensions,
            batch_size: config.batch_size.max(1),
            pooling: PoolingStrategy::parse(&config.pooling)?,
            normalize: config.normalize,
            query_instruction: config.query_instruction.clone(),
            texts_processed: AtomicU64::new(0),
            encode_micros: AtomicU64::new(0),
        })
    }

    pub fn model(&self) -> &Arc<OnnxModel> {
        &self.model
    }

    /// Download missing model files
    pub async fn prefetch(&self) -> Result<()> {
        self.model.prefetch().await
    }

    /// Encode texts with an explicit pooling strategy
    ///
    /// Batches are run in order and concatenated, so row `i` always belongs
    /// to `texts[i]`.
    pub fn encode(
        &self,
        texts: &[&str],
        strategy: PoolingStrategy,
        normalize: bool,
    ) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let start = Instant::now();
        let prepared = prepare_texts(texts);
        let batch_size = tuned_batch_size(self.batch_size, &prepared, num_cpus::get());
        if batch_size != self.batch_size {
            tracing::debug!("Batch size adjusted {} -> {}", self.batch_size, batch_size);
        }

        let all = encode_batched(&prepared, batch_size, |batch| {
            self.encode_batch(batch, strategy, normalize)
        })?;

        let elapsed = start.elapsed();
        self.texts_processed
            .fetch_add(texts.len() as u64, Ordering::Relaxed);
        self.encode_micros
            .fetch_add(elapsed.as_micros() as u64, Ordering::Relaxed);
        tracing::debug!("Encoded {} texts in {:?}", texts.len(), elapsed);

        Ok(all)
    }

    fn encode_batch(
        &self,
        batch: &[String],
        strategy: PoolingStrategy,
        normalize: bool,
    ) -> Result<Vec<Vec<f32>>> {
        let output = self.model.run(batch.to_vec())?;
        let hidden = checked_hidden_size(&output, batch.len())?;

        let mut rows = pooling::pool(
            &output.data,
            &output.attention_mask,
            batch.len(),
            output.seq_len,
            hidden,
            strategy,
        );
        if normalize {
            rows.iter_mut().for_each(|row| pooling::l2_normalize(row));
        }
        Ok(rows)
    }
}

impl TextEmbedder for OnnxEmbedder {
    fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn embed(&self, texts: &[&str], mode: EmbedMode) -> Result<Vec<Vec<f32>>> {
        let vectors = match mode {
            EmbedMode::Document => self.encode(texts, self.pooling, self.normalize)?,
            EmbedMode::Query => {
                let prefixed = with_instruction(&self.query_instruction, texts);
                let refs: Vec<&str> = prefixed.iter().map(String::as_str).collect();
                self.encode(&refs, self.pooling, self.normalize)?
            }
        };

        if let Some(bad) = vectors.iter().find(|v| v.len() != self.dimensions) {
            return Err(Error::embedding(format!(
                "Model produced {}-dimensional vectors, configured for {}",
                bad.len(),
                self.dimensions
            )));
        }

        Ok(vectors)
    }

    fn stats(&self) -> EmbedderStats {
        EmbedderStats {
            texts_processed: self.texts_processed.load(Ordering::Relaxed),
            total_encode_ms: self.encode_micros.load(Ordering::Relaxed) / 1000,
        }
    }
}

/// Replace blank inputs with [`EMPTY_PLACEHOLDER`]
pub fn prepare_texts(texts: &[&str]) -> Vec<String> {
    texts
        .iter()
        .map(|t| {
            if t.trim().is_empty() {
                EMPTY_PLACEHOLDER.to_string()
            } else {
                (*t).to_string()
            }
        })
        .collect()
}

/// Prefix every text with the query instruction
fn with_instruction(instruction: &str, texts: &[&str]) -> Vec<String> {
    texts.iter().map(|t| format!("{}{}", instruction, t)).collect()
}

/// Average input length, in characters, that the configured batch size is
/// sized for
const BATCH_TEXT_CHARS: usize = 512;

/// Best-effort batch size for this input
///
/// Halved on machines with fewer than four cores and scaled down in
/// proportion when the average text is longer than [`BATCH_TEXT_CHARS`].
/// Never below 1.
fn tuned_batch_size(configured: usize, texts: &[String], cores: usize) -> usize {
    let mut size = configured.max(1);
    if cores < 4 {
        size /= 2;
    }
    if !texts.is_empty() {
        let avg = texts.iter().map(|t| t.chars().count()).sum::<usize>() / texts.len();
        if avg > BATCH_TEXT_CHARS {
            size = size * BATCH_TEXT_CHARS / avg;
        }
    }
    size.max(1)
}

/// Run `encode_batch` over consecutive batches and concatenate the rows
fn encode_batched<F>(texts: &[String], batch_size: usize, mut encode_batch: F) -> Result<Vec<Vec<f32>>>
where
    F: FnMut(&[String]) -> Result<Vec<Vec<f32>>>,
{
    let mut all = Vec::with_capacity(texts.len());
    for batch in texts.chunks(batch_size.max(1)) {
        let rows = encode_batch(batch)?;
        if rows.len() != batch.len() {
            return Err(Error::embedding(format!(
                "Batch of {} texts produced {} vectors",
                batch.len(),
                rows.len()
            )));
        }
        all.extend(rows);
    }
    Ok(all)
}

/// Hidden size of a `[batch, seq_len, hidden]` output, after checking it
/// matches the batch that produced it
fn checked_hidden_size(output: &ModelOutput, batch: usize) -> Result<usize> {
    let &[rows, seq_len, hidden] = &output.shape[..] else {
        return Err(Error::embedding(format!(
            "Expected [batch, seq, hidden] output, got {:?}",
            output.shape
        )));
    };
    if rows != batch
        || seq_len != output.seq_len
        || output.data.len() != rows * seq_len * hidden
        || output.attention_mask.len() != rows * seq_len
    {
        return Err(Error::embedding(format!(
            "Output shape {:?} does not match batch {} x seq {}",
            output.shape, batch, output.seq_len
        )));
    }
    Ok(hidden)
}
