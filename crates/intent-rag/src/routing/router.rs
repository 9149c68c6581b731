//! Intent to agent routing with lazy, per-intent construction

use dashmap::DashMap;
use std::sync::Arc;

use super::agent::{open_engine, Agent};
use crate::classifier::Prediction;
use crate::config::RagConfig;
use crate::embeddings::{Reranker, TextEmbedder};
use crate::error::{Error, Result};
use crate::generation::{CompletionBackend, GenerationClient};
use crate::types::Intent;

/// Builds the agent for an intent
pub trait AgentFactory: Send + Sync {
    fn build(&self, intent: Intent) -> Result<Agent>;
}

/// Factory sharing one embedder, reranker and generation backend across
/// every agent
pub struct SharedModelFactory {
    config: RagConfig,
    embedder: Arc<dyn TextEmbedder>,
    reranker: Arc<dyn Reranker>,
    backend: Arc<dyn CompletionBackend>,
}

impl SharedModelFactory {
    pub fn new(
        config: RagConfig,
        embedder: Arc<dyn TextEmbedder>,
        reranker: Arc<dyn Reranker>,
        backend: Arc<dyn CompletionBackend>,
    ) -> Self {
        Self {
            config,
            embedder,
            reranker,
            backend,
        }
    }
}

impl AgentFactory for SharedModelFactory {
    fn build(&self, intent: Intent) -> Result<Agent> {
        let profile = self
            .config
            .agents
            .get(intent)
            .cloned()
            .ok_or_else(|| Error::validation(format!("Unsupported intent: {}", intent)))?;

        let generator = GenerationClient::new(
            self.backend.clone(),
            profile,
            self.config.server.stream_buffer,
        )?;
        let engine = open_engine(
            &self.config,
            intent,
            self.embedder.clone(),
            self.reranker.clone(),
        )?;

        Ok(Agent::new(intent, engine, generator, self.config.cache.capacity))
    }
}

/// Outcome of applying the confidence threshold
#[derive(Debug, Clone, PartialEq)]
pub enum RouteDecision {
    Confident(Intent),
    /// Ask the user to pick; carries the ranked options
    Clarify(Vec<(Intent, f32)>),
}

/// Route confidently at or above `threshold`, otherwise ask for clarification
pub fn decide(prediction: &Prediction, threshold: f32) -> RouteDecision {
    if prediction.confidence >= threshold {
        RouteDecision::Confident(prediction.best_intent)
    } else {
        RouteDecision::Clarify(prediction.top_options.clone())
    }
}

/// Per-intent agents, constructed on first use and kept for the process
/// lifetime
pub struct AgentRouter {
    factory: Arc<dyn AgentFactory>,
    agents: DashMap<Intent, Arc<Agent>>,
}

impl AgentRouter {
    pub fn new(factory: Arc<dyn AgentFactory>) -> Self {
        Self {
            factory,
            agents: DashMap::new(),
        }
    }

    /// Agent for `intent`, building it if needed
    ///
    /// A failed build is logged and retried on the next call; other intents
    /// are unaffected.
    pub fn route(&self, intent: Intent) -> Option<Arc<Agent>> {
        if let Some(agent) = self.agents.get(&intent) {
            return Some(agent.clone());
        }

        match self.factory.build(intent) {
            Ok(agent) => {
                let agent = self
                    .agents
                    .entry(intent)
                    .or_insert_with(|| Arc::new(agent))
                    .clone();
                tracing::info!("Initialized {} agent", intent);
                Some(agent)
            }
            Err(e) => {
                tracing::warn!("Failed to initialize {} agent: {}", intent, e);
                None
            }
        }
    }

    /// Agents built so far
    pub fn initialized(&self) -> usize {
        self.agents.len()
    }

    pub fn is_initialized(&self, intent: Intent) -> bool {
        self.agents.contains_key(&intent)
    }

    /// Drop every agent
    pub fn shutdown(&self) {
        let count = self.agents.len();
        self.agents.clear();
        tracing::info!("Released {} agents", count);
    }
}
