//! Configuration for the intent-routed RAG engine

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};
use crate::types::Intent;

/// Main configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct RagConfig {
    /// HTTP server configuration
    pub server: ServerConfig,
    /// Sentence embedding model
    pub embeddings: EmbeddingConfig,
    /// Cross-encoder reranker model
    pub reranker: RerankerConfig,
    /// Index location and retrieval depths
    pub retrieval: RetrievalConfig,
    /// Intent classifier training and routing policy
    pub classifier: ClassifierConfig,
    /// Per-agent query cache
    pub cache: CacheConfig,
    /// Remote generation service
    pub generation: GenerationConfig,
    /// Per-intent agent profiles
    pub agents: AgentProfiles,
}

impl RagConfig {
    /// Load configuration from a TOML file, then apply environment overrides
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|e| {
            Error::Config(format!("Failed to read config {}: {}", path.display(), e))
        })?;
        let mut config: RagConfig = toml::from_str(&raw)
            .map_err(|e| Error::Config(format!("Invalid config {}: {}", path.display(), e)))?;
        config.apply_env();
        Ok(config)
    }

    /// Defaults with environment overrides applied
    pub fn from_env() -> Self {
        let mut config = Self::default();
        config.apply_env();
        config
    }

    /// Pick up secrets and app ids from the environment
    ///
    /// `DASHSCOPE_API_KEY` wins over `BAILIAN_API_KEY`. `APP_ID_<INTENT>`
    /// sets the app id of that intent's agent; the general agent also
    /// accepts `LLM_APPID`.
    pub fn apply_env(&mut self) {
        if let Some(key) = env_var("DASHSCOPE_API_KEY").or_else(|| env_var("BAILIAN_API_KEY")) {
            self.generation.api_key = Some(key);
        }

        for intent in Intent::ALL {
            let var = format!("APP_ID_{}", intent.as_str().to_uppercase());
            let mut app_id = env_var(&var);
            if app_id.is_none() && intent == Intent::Other {
                app_id = env_var("LLM_APPID").or_else(|| env_var("LLM_appid"));
            }
            if let Some(app_id) = app_id {
                if let Some(profile) = self.agents.0.get_mut(&intent) {
                    profile.app_id = Some(app_id);
                }
            }
        }
    }

    /// Check values that would otherwise fail deep inside a request
    pub fn validate(&self) -> Result<()> {
        if self.embeddings.dimensions == 0 {
            return Err(Error::Config("embeddings.dimensions must be > 0".into()));
        }
        if self.embeddings.batch_size == 0 {
            return Err(Error::Config("embeddings.batch_size must be > 0".into()));
        }
        crate::embeddings::PoolingStrategy::parse(&self.embeddings.pooling)?;
        if self.retrieval.final_k == 0 || self.retrieval.top_k < self.retrieval.final_k {
            return Err(Error::Config(
                "retrieval requires 0 < final_k <= top_k".into(),
            ));
        }
        if !(0.0..=1.0).contains(&self.classifier.confidence_threshold) {
            return Err(Error::Config(
                "classifier.confidence_threshold must be within [0, 1]".into(),
            ));
        }
        if !(0.0..1.0).contains(&self.classifier.validation_fraction) {
            return Err(Error::Config(
                "classifier.validation_fraction must be within [0, 1)".into(),
            ));
        }
        Ok(())
    }
}

fn env_var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

fn data_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("intent-rag")
}

fn model_dir(name: &str) -> PathBuf {
    dirs::cache_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("intent-rag")
        .join("models")
        .join(name)
}

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Host address
    pub host: String,
    /// Port number
    pub port: u16,
    /// Enable CORS
    pub enable_cors: bool,
    /// Reported by `/health`
    pub output_mode: String,
    /// Bound of the producer/consumer channel behind each stream
    pub stream_buffer: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8000,
            enable_cors: true,
            output_mode: "stream_only".to_string(),
            stream_buffer: 32,
        }
    }
}

/// Embedding model configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbeddingConfig {
    /// Directory holding `model.onnx` and `tokenizer.json`
    pub model_dir: PathBuf,
    /// HuggingFace repository the model files are fetched from when missing
    pub model_repo: String,
    /// Embedding dimensions
    pub dimensions: usize,
    /// Texts per inference batch
    pub batch_size: usize,
    /// Maximum sequence length in tokens
    pub max_length: usize,
    /// Pooling strategy: `mean`, `max` or `cls`
    pub pooling: String,
    /// L2-normalize output rows
    pub normalize: bool,
    /// Prefix prepended to queries in query mode
    pub query_instruction: String,
    /// ONNX Runtime intra-op threads (default: CPU count)
    pub intra_threads: Option<usize>,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            model_dir: model_dir("multilingual-e5-small"),
            model_repo: "intfloat/multilingual-e5-small".to_string(),
            dimensions: 384,
            batch_size: 32,
            max_length: 512,
            pooling: "mean".to_string(),
            normalize: true,
            query_instruction: "query: ".to_string(),
            intra_threads: None,
        }
    }
}

/// Cross-encoder reranker configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RerankerConfig {
    /// Directory holding `model.onnx` and `tokenizer.json`
    pub model_dir: PathBuf,
    /// HuggingFace repository the model files are fetched from when missing
    pub model_repo: String,
    /// Maximum pair length in tokens
    pub max_length: usize,
    /// Pairs per inference batch
    pub batch_size: usize,
}

impl Default for RerankerConfig {
    fn default() -> Self {
        Self {
            model_dir: model_dir("cross-encoder"),
            model_repo: "cross-encoder/ms-marco-MiniLM-L-6-v2".to_string(),
            max_length: 512,
            batch_size: 16,
        }
    }
}

/// Retrieval configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrievalConfig {
    /// Directory holding the per-collection index artifacts
    pub index_dir: PathBuf,
    /// Coarse candidates taken from the vector index
    pub top_k: usize,
    /// Results kept after reranking
    pub final_k: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            index_dir: data_dir().join("index"),
            top_k: 15,
            final_k: 5,
        }
    }
}

/// Intent classifier configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClassifierConfig {
    /// Persisted classifier bundle (JSON)
    pub model_path: PathBuf,
    /// Labeled JSONL used when no bundle exists
    pub training_data: Option<PathBuf>,
    /// Below this confidence the caller is asked to clarify
    pub confidence_threshold: f32,
    /// Ranked alternatives returned with each prediction
    pub top_n_options: usize,
    /// Share of examples held out for validation
    pub validation_fraction: f32,
    /// Stratified cross-validation folds (0 or 1 disables)
    pub cv_folds: usize,
    /// Gradient descent epochs
    pub epochs: usize,
    /// Gradient descent step size
    pub learning_rate: f32,
    /// L2 penalty
    pub l2_penalty: f32,
    /// Seed for splits and shuffling
    pub seed: u64,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            model_path: data_dir().join("classifier.json"),
            training_data: None,
            confidence_threshold: 0.7,
            top_n_options: 1,
            validation_fraction: 0.2,
            cv_folds: 5,
            epochs: 300,
            learning_rate: 0.5,
            l2_penalty: 1e-4,
            seed: 42,
        }
    }
}

/// Query cache configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Entries per agent cache (0 disables storage)
    pub capacity: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self { capacity: 100 }
    }
}

/// Generation service configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GenerationConfig {
    /// Base URL of the application completion API
    pub base_url: String,
    /// API key (usually supplied by the environment)
    #[serde(skip_serializing)]
    pub api_key: Option<String>,
    /// Session id sent with every request
    pub session_id: String,
    /// Request timeout in seconds
    pub timeout_secs: u64,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            base_url: "https://dashscope.aliyuncs.com".to_string(),
            api_key: None,
            session_id: "default_session".to_string(),
            timeout_secs: 120,
        }
    }
}

/// Prompt profile and knowledge base of one intent's agent
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentProfile {
    /// Index collection name
    pub collection: String,
    /// Application id on the generation service
    #[serde(default)]
    pub app_id: Option<String>,
    /// System prompt for batched answers
    pub system_prompt: String,
    /// System prompt for streamed answers
    pub stream_system_prompt: String,
}

/// Agent profiles keyed by intent
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AgentProfiles(pub BTreeMap<Intent, AgentProfile>);

impl AgentProfiles {
    pub fn get(&self, intent: Intent) -> Option<&AgentProfile> {
        self.0.get(&intent)
    }
}

const NO_EMOJI: &str = "Do not use emoji in the answer.";

impl Default for AgentProfiles {
    fn default() -> Self {
        let profile = |collection: &str, role: &str, rules: &[&str], domain: &str| {
            let rules = rules
                .iter()
                .enumerate()
                .map(|(i, rule)| format!("{}. {}", i + 1, rule))
                .collect::<Vec<_>>()
                .join("\n");
            AgentProfile {
                collection: collection.to_string(),
                app_id: None,
                system_prompt: format!(
                    "{role}\nFollow these principles:\n{rules}\nAnswer from the retrieved {domain} passages. {NO_EMOJI}"
                ),
                stream_system_prompt: format!(
                    "{role}\nFollow these principles:\n{rules}\nIf the question is unrelated to the {domain} background, answer from general knowledge. {NO_EMOJI}"
                ),
            }
        };

        let mut map = BTreeMap::new();
        map.insert(
            Intent::Psychology,
            profile(
                "psychology",
                "You are a professional mental health assistant.",
                &[
                    "Keep a warm, understanding and empathetic tone",
                    "Give scientific, professional psychological advice",
                    "Encourage seeing a counselor when needed",
                    "Never give medical diagnoses or treatment advice",
                ],
                "psychology",
            ),
        );
        map.insert(
            Intent::Fitness,
            profile(
                "fitness",
                "You are a professional fitness and nutrition assistant.",
                &[
                    "Give safe, evidence-based training advice",
                    "Give reasonable nutrition and diet advice",
                    "Stress gradual, individual progression",
                    "Suggest a doctor or dietitian for serious health issues",
                ],
                "fitness and nutrition",
            ),
        );
        map.insert(
            Intent::Campus,
            profile(
                "campus",
                "You are a campus knowledge assistant for students.",
                &[
                    "Give accurate campus information",
                    "Answer academic, daily-life and service questions in detail",
                    "Remind the user to verify time-sensitive information",
                    "Include contacts or office locations when known",
                ],
                "campus",
            ),
        );
        map.insert(
            Intent::Paper,
            profile(
                "paper",
                "You are a professional academic writing assistant.",
                &[
                    "Give rigorous academic advice",
                    "Follow academic conventions and citation standards",
                    "Help improve logic and structure",
                    "Stress academic integrity",
                ],
                "academic",
            ),
        );
        map.insert(
            Intent::Other,
            AgentProfile {
                collection: "document_embeddings".to_string(),
                app_id: None,
                system_prompt: format!(
                    "You are a knowledge assistant. Answer the question accurately from the passages below. {NO_EMOJI}"
                ),
                stream_system_prompt: format!(
                    "You are a knowledge assistant. Answer the question using any relevant background knowledge. {NO_EMOJI}"
                ),
            },
        );
        Self(map)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = RagConfig::default();
        config.validate().unwrap();
        assert_eq!(config.retrieval.top_k, 15);
        assert_eq!(config.retrieval.final_k, 5);
        assert_eq!(config.classifier.confidence_threshold, 0.7);
        assert_eq!(config.agents.0.len(), Intent::ALL.len());
    }

    #[test]
    fn test_partial_toml() {
        let raw = r#"
            [server]
            port = 9000

            [retrieval]
            final_k = 3

            [agents.fitness]
            collection = "gym"
            app_id = "app-123"
            system_prompt = "s"
            stream_system_prompt = "t"
        "#;
        let config: RagConfig = toml::from_str(raw).unwrap();
        assert_eq!(config.server.port, 9000);
        assert_eq!(config.server.host, "0.0.0.0");
        assert_eq!(config.retrieval.final_k, 3);
        assert_eq!(config.retrieval.top_k, 15);

        let fitness = config.agents.get(Intent::Fitness).unwrap();
        assert_eq!(fitness.collection, "gym");
        assert_eq!(fitness.app_id.as_deref(), Some("app-123"));
        assert!(config.agents.get(Intent::Paper).is_none());
    }

    #[test]
    fn test_rejects_bad_pooling() {
        let mut config = RagConfig::default();
        config.embeddings.pooling = "median".into();
        assert!(config.validate().is_err());
    }
}
