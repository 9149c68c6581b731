//! Per-intent agent: knowledge base, retrieval cache and generation client

use std::sync::Arc;
use tokio::sync::mpsc;

use super::cache::{CacheStats, QueryCache};
use crate::config::{AgentProfile, RagConfig};
use crate::embeddings::{Reranker, TextEmbedder};
use crate::error::{Error, Result};
use crate::generation::{GenerationClient, StreamEvent};
use crate::retrieval::{RetrievalEngine, VectorIndex};
use crate::types::Intent;

/// Open the retrieval engine over an intent's collection
pub fn open_engine(
    config: &RagConfig,
    intent: Intent,
    embedder: Arc<dyn TextEmbedder>,
    reranker: Arc<dyn Reranker>,
) -> Result<RetrievalEngine> {
    let profile = config
        .agents
        .get(intent)
        .ok_or_else(|| Error::validation(format!("Unsupported intent: {}", intent)))?;

    let index = VectorIndex::open(
        &config.retrieval.index_dir,
        &profile.collection,
        embedder.dimensions(),
    )?;

    Ok(RetrievalEngine::new(
        embedder,
        reranker,
        Arc::new(index),
        &config.retrieval,
    ))
}

/// Answers questions for one intent
pub struct Agent {
    intent: Intent,
    engine: Arc<RetrievalEngine>,
    generator: GenerationClient,
    cache: QueryCache,
}

impl Agent {
    pub fn new(
        intent: Intent,
        engine: RetrievalEngine,
        generator: GenerationClient,
        cache_capacity: usize,
    ) -> Self {
        let count = engine.index().count();
        if count == 0 {
            tracing::warn!(
                "Knowledge base '{}' for {} is empty; answers will have no context",
                engine.index().collection(),
                intent
            );
        } else {
            tracing::info!(
                "Agent for {} ready with {} chunks in '{}'",
                intent,
                count,
                engine.index().collection()
            );
        }

        Self {
            intent,
            engine: Arc::new(engine),
            generator,
            cache: QueryCache::new(cache_capacity),
        }
    }

    pub fn intent(&self) -> Intent {
        self.intent
    }

    pub fn profile(&self) -> &AgentProfile {
        self.generator.profile()
    }

    pub fn engine(&self) -> &Arc<RetrievalEngine> {
        &self.engine
    }

    pub fn document_count(&self) -> usize {
        self.engine.index().count()
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }

    /// Cached retrieval; blocks on model inference
    pub fn retrieve(&self, query: &str) -> Vec<String> {
        self.cache
            .get_or_compute(query, || self.engine.retrieve(query))
    }

    /// [`Agent::retrieve`] on the blocking pool
    pub async fn retrieve_blocking(self: &Arc<Self>, query: &str) -> Result<Vec<String>> {
        let agent = Arc::clone(self);
        let query = query.to_string();
        Ok(tokio::task::spawn_blocking(move || agent.retrieve(&query)).await?)
    }

    /// Retrieve, then generate a full answer
    pub async fn answer(self: &Arc<Self>, query: &str) -> Result<String> {
        let chunks = self.retrieve_blocking(query).await?;
        tracing::debug!("{} agent answering with {} chunks", self.intent, chunks.len());
        self.generator.answer(query, &chunks).await
    }

    /// Retrieve, then stream the answer
    pub async fn answer_stream(self: &Arc<Self>, query: &str) -> Result<mpsc::Receiver<StreamEvent>> {
        let chunks = self.retrieve_blocking(query).await?;
        tracing::debug!("{} agent streaming with {} chunks", self.intent, chunks.len());
        self.generator.answer_stream(query, &chunks).await
    }
}
