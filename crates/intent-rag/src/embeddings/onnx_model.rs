//! Lazily loaded ONNX Runtime session plus tokenizer
//!
//! The handle is cheap to construct. Model files are read on first use and the
//! session is shared by every caller afterwards.

use once_cell::sync::OnceCell;
use ort::session::{builder::GraphOptimizationLevel, Session};
use ort::value::{DynValue, Tensor};
use parking_lot::Mutex;
use std::path::{Path, PathBuf};
use tokenizers::{EncodeInput, Tokenizer, TruncationParams};

use crate::error::{Error, Result};

const MODEL_FILE: &str = "model.onnx";
const TOKENIZER_FILE: &str = "tokenizer.json";

/// Raw model output for one batch
#[derive(Debug)]
pub struct ModelOutput {
    /// Output tensor shape
    pub shape: Vec<usize>,
    /// Output tensor data, row-major
    pub data: Vec<f32>,
    /// Padded attention mask, `batch * seq_len`
    pub attention_mask: Vec<i64>,
    /// Padded sequence length
    pub seq_len: usize,
}

struct LoadedModel {
    session: Mutex<Session>,
    tokenizer: Tokenizer,
    input_names: Vec<String>,
}

/// Shared handle to an ONNX encoder
pub struct OnnxModel {
    dir: PathBuf,
    repo: String,
    max_length: usize,
    intra_threads: usize,
    loaded: OnceCell<LoadedModel>,
}

impl OnnxModel {
    /// Create an unloaded handle over `dir/model.onnx` and `dir/tokenizer.json`
    pub fn new(
        dir: impl Into<PathBuf>,
        repo: impl Into<String>,
        max_length: usize,
        intra_threads: Option<usize>,
    ) -> Self {
        Self {
            dir: dir.into(),
            repo: repo.into(),
            max_length,
            intra_threads: intra_threads.unwrap_or_else(num_cpus::get).max(1),
            loaded: OnceCell::new(),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn is_loaded(&self) -> bool {
        self.loaded.get().is_some()
    }

    /// Download model files that are missing from the model directory
    pub async fn prefetch(&self) -> Result<()> {
        tokio::fs::create_dir_all(&self.dir).await.map_err(|e| {
            Error::Config(format!(
                "Failed to create model directory {}: {}",
                self.dir.display(),
                e
            ))
        })?;

        let model_path = self.dir.join(MODEL_FILE);
        if !model_path.exists() {
            let url = format!("https://huggingface.co/{}/resolve/main/onnx/{}", self.repo, MODEL_FILE);
            download(&url, &model_path).await?;
        }

        let tokenizer_path = self.dir.join(TOKENIZER_FILE);
        if !tokenizer_path.exists() {
            let url = format!("https://huggingface.co/{}/resolve/main/{}", self.repo, TOKENIZER_FILE);
            download(&url, &tokenizer_path).await?;
        }

        Ok(())
    }

    /// Load the session once; later calls are no-ops
    pub fn ensure_loaded(&self) -> Result<()> {
        self.loaded().map(|_| ())
    }

    fn loaded(&self) -> Result<&LoadedModel> {
        self.loaded.get_or_try_init(|| self.load())
    }

    fn load(&self) -> Result<LoadedModel> {
        let model_path = self.dir.join(MODEL_FILE);
        let tokenizer_path = self.dir.join(TOKENIZER_FILE);
        tracing::info!("Loading ONNX model from {}", model_path.display());

        if !model_path.exists() || !tokenizer_path.exists() {
            return Err(Error::embedding(format!(
                "Model files missing in {} (run a prefetch first)",
                self.dir.display()
            )));
        }

        let session = Session::builder()
            .map_err(|e| Error::embedding(format!("Failed to create session builder: {}", e)))?
            .with_optimization_level(GraphOptimizationLevel::Level3)
            .map_err(|e| Error::embedding(format!("Failed to set optimization level: {}", e)))?
            .with_intra_threads(self.intra_threads)
            .map_err(|e| Error::embedding(format!("Failed to set threads: {}", e)))?
            .commit_from_file(&model_path)
            .map_err(|e| Error::embedding(format!("Failed to load model: {}", e)))?;

        let input_names = session.inputs.iter().map(|input| input.name.clone()).collect();

        let mut tokenizer = Tokenizer::from_file(&tokenizer_path)
            .map_err(|e| Error::embedding(format!("Failed to load tokenizer: {}", e)))?;
        tokenizer
            .with_truncation(Some(TruncationParams {
                max_length: self.max_length,
                ..Default::default()
            }))
            .map_err(|e| Error::embedding(format!("Failed to configure truncation: {}", e)))?;

        tracing::info!("ONNX model loaded (inputs: {:?})", input_names);

        Ok(LoadedModel {
            session: Mutex::new(session),
            tokenizer,
            input_names,
        })
    }

    /// Tokenize and run one batch, returning the primary output tensor
    pub fn run<'s, E>(&self, inputs: Vec<E>) -> Result<ModelOutput>
    where
        E: Into<EncodeInput<'s>> + Send,
    {
        let model = self.loaded()?;
        let batch_size = inputs.len();

        let encodings = model
            .tokenizer
            .encode_batch(inputs, true)
            .map_err(|e| Error::embedding(format!("Tokenization failed: {}", e)))?;

        let seq_len = encodings
            .iter()
            .map(|e| e.get_ids().len())
            .max()
            .unwrap_or(0)
            .clamp(1, self.max_length.max(1));

        let mut input_ids = vec![0i64; batch_size * seq_len];
        let mut attention_mask = vec![0i64; batch_size * seq_len];
        let mut token_type_ids = vec![0i64; batch_size * seq_len];
        let mut position_ids = vec![0i64; batch_size * seq_len];

        for (i, encoding) in encodings.iter().enumerate() {
            let ids = encoding.get_ids();
            let mask = encoding.get_attention_mask();
            let types = encoding.get_type_ids();

            for j in 0..ids.len().min(seq_len) {
                let at = i * seq_len + j;
                input_ids[at] = ids[j] as i64;
                attention_mask[at] = mask[j] as i64;
                token_type_ids[at] = types[j] as i64;
                position_ids[at] = j as i64;
            }
        }

        let shape = vec![batch_size, seq_len];
        let mut feeds: Vec<(&str, DynValue)> = Vec::with_capacity(4);
        feeds.push(("input_ids", tensor(&shape, input_ids)?));
        feeds.push(("attention_mask", tensor(&shape, attention_mask.clone())?));
        if model.input_names.iter().any(|n| n == "token_type_ids") {
            feeds.push(("token_type_ids", tensor(&shape, token_type_ids)?));
        }
        if model.input_names.iter().any(|n| n == "position_ids") {
            feeds.push(("position_ids", tensor(&shape, position_ids)?));
        }

        let mut session = model.session.lock();
        let outputs = session
            .run(feeds)
            .map_err(|e| Error::embedding(format!("Inference failed: {}", e)))?;

        let output_iter: Vec<_> = outputs.iter().collect();
        let output = output_iter
            .iter()
            .find(|(name, _)| *name == "last_hidden_state" || *name == "logits")
            .or_else(|| output_iter.first())
            .map(|(_, v)| v)
            .ok_or_else(|| Error::embedding("No output tensor"))?;

        let (tensor_shape, tensor_data) = output
            .try_extract_tensor::<f32>()
            .map_err(|e| Error::embedding(format!("Failed to extract tensor: {}", e)))?;

        Ok(ModelOutput {
            shape: tensor_shape.iter().map(|&d| d as usize).collect(),
            data: tensor_data.to_vec(),
            attention_mask,
            seq_len,
        })
    }
}

fn tensor(shape: &[usize], data: Vec<i64>) -> Result<DynValue> {
    Tensor::from_array((shape.to_vec(), data.into_boxed_slice()))
        .map(|t| t.into_dyn())
        .map_err(|e| Error::embedding(format!("Tensor creation failed: {}", e)))
}

async fn download(url: &str, path: &Path) -> Result<()> {
    tracing::info!("Downloading {}", url);

    let response = reqwest::get(url)
        .await
        .map_err(|e| Error::embedding(format!("Failed to download {}: {}", url, e)))?;

    if !response.status().is_success() {
        return Err(Error::embedding(format!(
            "Download of {} failed: HTTP {}",
            url,
            response.status()
        )));
    }

    let bytes = response
        .bytes()
        .await
        .map_err(|e| Error::embedding(format!("Failed to read {}: {}", url, e)))?;

    let tmp = path.with_extension("part");
    tokio::fs::write(&tmp, &bytes).await?;
    tokio::fs::rename(&tmp, path).await?;

    tracing::info!("Saved {} ({} bytes)", path.display(), bytes.len());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_handle_is_lazy() {
        let dir = tempfile::tempdir().unwrap();
        let model = OnnxModel::new(dir.path(), "org/model", 128, Some(1));
        assert!(!model.is_loaded());

        // no files present: loading fails and the cell stays empty
        assert!(model.ensure_loaded().is_err());
        assert!(!model.is_loaded());
    }
}
