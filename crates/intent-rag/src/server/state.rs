//! Application state for the HTTP server

use std::sync::Arc;

use crate::classifier::{IntentClassifier, Prediction};
use crate::config::RagConfig;
use crate::embeddings::{CrossEncoderReranker, OnnxEmbedder, Reranker, TextEmbedder};
use crate::error::Result;
use crate::generation::{CompletionBackend, DashScopeClient};
use crate::routing::{Agent, AgentFactory, AgentRouter, SharedModelFactory};
use crate::types::Intent;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    inner: Arc<AppStateInner>,
}

struct AppStateInner {
    config: RagConfig,
    classifier: Arc<IntentClassifier>,
    router: AgentRouter,
}

impl AppState {
    /// Assemble state from already constructed components
    pub fn new(
        config: RagConfig,
        classifier: Arc<IntentClassifier>,
        factory: Arc<dyn AgentFactory>,
    ) -> Self {
        Self {
            inner: Arc::new(AppStateInner {
                config,
                classifier,
                router: AgentRouter::new(factory),
            }),
        }
    }

    /// Build every component from configuration
    ///
    /// Models are downloaded when missing. The classifier is loaded (or
    /// trained) and the general agent is built eagerly; a failure of either
    /// is logged and leaves the corresponding endpoints unavailable.
    pub async fn from_config(config: RagConfig) -> Result<Self> {
        tracing::info!("Initializing application state...");
        config.validate()?;

        let embedder = Arc::new(OnnxEmbedder::new(&config.embeddings)?);
        embedder.prefetch().await?;
        let reranker = Arc::new(CrossEncoderReranker::new(&config.reranker));
        reranker.prefetch().await?;
        tracing::info!("Embedding and reranking models available");

        let backend: Arc<dyn CompletionBackend> = Arc::new(DashScopeClient::new(&config.generation)?);
        let embedder: Arc<dyn TextEmbedder> = embedder;
        let reranker: Arc<dyn Reranker> = reranker;

        let classifier = Arc::new(IntentClassifier::new(
            embedder.clone(),
            config.classifier.clone(),
        ));
        let factory = Arc::new(SharedModelFactory::new(
            config.clone(),
            embedder,
            reranker,
            backend,
        ));
        let state = Self::new(config, classifier.clone(), factory);

        let loaded = tokio::task::spawn_blocking(move || classifier.load_or_train()).await?;
        if let Err(e) = loaded {
            tracing::error!("Intent classifier unavailable: {}", e);
        }

        if state.agent(Intent::Other).await.is_none() {
            tracing::error!("General agent unavailable; /query will fail");
        }

        tracing::info!("Application state initialized");
        Ok(state)
    }

    pub fn config(&self) -> &RagConfig {
        &self.inner.config
    }

    pub fn classifier(&self) -> &Arc<IntentClassifier> {
        &self.inner.classifier
    }

    pub fn router(&self) -> &AgentRouter {
        &self.inner.router
    }

    /// The general agent has been built
    pub fn rag_initialized(&self) -> bool {
        self.inner.router.is_initialized(Intent::Other)
    }

    /// Classify on the blocking pool
    pub async fn classify(&self, query: &str) -> Result<Prediction> {
        let classifier = self.inner.classifier.clone();
        let query = query.to_string();
        tokio::task::spawn_blocking(move || classifier.predict(&query)).await?
    }

    /// Route on the blocking pool, building the agent if needed
    pub async fn agent(&self, intent: Intent) -> Option<Arc<Agent>> {
        let state = self.clone();
        match tokio::task::spawn_blocking(move || state.inner.router.route(intent)).await {
            Ok(agent) => agent,
            Err(e) => {
                tracing::error!("Agent construction task failed: {}", e);
                None
            }
        }
    }

    /// Release agents before exit
    pub fn shutdown(&self) {
        tracing::info!("Shutting down application state");
        self.inner.router.shutdown();
    }
}
