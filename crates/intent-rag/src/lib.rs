//! intent-rag: intent-routed retrieval-augmented question answering
//!
//! A query is classified into one of a closed set of intents, routed to that
//! intent's agent, answered from the agent's knowledge base with two-stage
//! retrieval (flat vector search, then cross-encoder rerank) and forwarded to
//! a remote generation service, optionally streamed back incrementally.
//!
//! Embedding and reranking models run locally through ONNX Runtime.

pub mod classifier;
pub mod config;
pub mod embeddings;
pub mod error;
pub mod generation;
pub mod ingestion;
pub mod retrieval;
pub mod routing;
pub mod server;
pub mod types;

pub use classifier::{IntentClassifier, Prediction};
pub use config::RagConfig;
pub use error::{Error, Result};
pub use retrieval::{RetrievalEngine, VectorIndex};
pub use routing::{AgentRouter, QueryCache};
pub use types::{Chunk, Intent};
