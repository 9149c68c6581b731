//! Two-stage retrieval: coarse vector search, then cross-encoder rerank

use serde::Serialize;
use std::sync::Arc;
use std::time::Instant;

use super::vector_index::VectorIndex;
use crate::config::RetrievalConfig;
use crate::embeddings::{EmbedMode, Reranker, TextEmbedder};
use crate::error::{Error, Result};
use crate::types::Chunk;

/// A retrieved chunk with its ranking signals
#[derive(Debug, Clone, Serialize)]
pub struct RankedChunk {
    pub id: String,
    pub text: String,
    /// Squared L2 distance from the coarse stage
    pub distance: f32,
    /// Reranker score, absent when the rerank stage was skipped
    pub score: Option<f32>,
}

/// Retrieval over one knowledge base
pub struct RetrievalEngine {
    embedder: Arc<dyn TextEmbedder>,
    reranker: Arc<dyn Reranker>,
    index: Arc<VectorIndex>,
    top_k: usize,
    final_k: usize,
}

impl RetrievalEngine {
    pub fn new(
        embedder: Arc<dyn TextEmbedder>,
        reranker: Arc<dyn Reranker>,
        index: Arc<VectorIndex>,
        config: &RetrievalConfig,
    ) -> Self {
        Self {
            embedder,
            reranker,
            index,
            top_k: config.top_k,
            final_k: config.final_k,
        }
    }

    pub fn index(&self) -> &Arc<VectorIndex> {
        &self.index
    }

    pub fn embedder(&self) -> &Arc<dyn TextEmbedder> {
        &self.embedder
    }

    /// Retrieve with the configured depths
    pub fn retrieve(&self, query: &str) -> Vec<String> {
        self.retrieve_with(query, self.top_k, self.final_k)
    }

    /// Retrieve up to `final_k` chunk texts, most relevant first
    ///
    /// Never fails: embedding or rerank errors are logged and produce an
    /// empty list so the caller can still answer without context.
    pub fn retrieve_with(&self, query: &str, top_k: usize, final_k: usize) -> Vec<String> {
        match self.search(query, top_k, final_k) {
            Ok(chunks) => chunks.into_iter().map(|c| c.text).collect(),
            Err(e) => {
                tracing::warn!(
                    "Retrieval failed for collection '{}': {}",
                    self.index.collection(),
                    e
                );
                Vec::new()
            }
        }
    }

    /// Fallible retrieval returning ranking signals
    pub fn search(&self, query: &str, top_k: usize, final_k: usize) -> Result<Vec<RankedChunk>> {
        let start = Instant::now();

        let vector = self
            .embedder
            .embed_query(query)
            .map_err(|e| Error::retrieval(format!("Query embedding failed: {}", e)))?;

        let candidates = self
            .index
            .query(&[vector], top_k)?
            .into_iter()
            .next()
            .unwrap_or_default();

        if candidates.len() <= final_k {
            tracing::debug!(
                "Retrieved {} candidates from '{}' without rerank in {:?}",
                candidates.len(),
                self.index.collection(),
                start.elapsed()
            );
            return Ok(candidates
                .into_iter()
                .map(|hit| RankedChunk {
                    id: hit.id,
                    text: hit.text,
                    distance: hit.distance,
                    score: None,
                })
                .collect());
        }

        let texts: Vec<String> = candidates.iter().map(|hit| hit.text.clone()).collect();
        let scores = self
            .reranker
            .score(query, &texts)
            .map_err(|e| Error::retrieval(format!("Rerank failed: {}", e)))?;
        if scores.len() != candidates.len() {
            return Err(Error::retrieval(format!(
                "Reranker returned {} scores for {} candidates",
                scores.len(),
                candidates.len()
            )));
        }

        let order = rerank_order(&scores);
        let mut slots: Vec<_> = candidates.into_iter().map(Some).collect();
        let ranked = order
            .into_iter()
            .take(final_k)
            .filter_map(|i| {
                slots[i].take().map(|hit| RankedChunk {
                    id: hit.id,
                    text: hit.text,
                    distance: hit.distance,
                    score: Some(scores[i]),
                })
            })
            .collect();

        tracing::debug!(
            "Reranked {} candidates from '{}' in {:?}",
            scores.len(),
            self.index.collection(),
            start.elapsed()
        );
        Ok(ranked)
    }

    /// Document-mode encode `chunks` and append them to the index
    pub fn index_chunks(&self, chunks: &[Chunk]) -> Result<usize> {
        if chunks.is_empty() {
            return Ok(0);
        }

        let texts: Vec<&str> = chunks.iter().map(|c| c.text.as_str()).collect();
        let vectors = self.embedder.embed(&texts, EmbedMode::Document)?;

        let ids: Vec<String> = chunks.iter().map(|c| c.id.clone()).collect();
        let texts: Vec<String> = chunks.iter().map(|c| c.text.clone()).collect();
        self.index.add(&ids, &texts, &vectors)?;

        Ok(chunks.len())
    }
}

/// Candidate positions sorted by descending score; ties keep input order
pub fn rerank_order(scores: &[f32]) -> Vec<usize> {
    let mut order: Vec<usize> = (0..scores.len()).collect();
    order.sort_by(|&a, &b| scores[b].total_cmp(&scores[a]));
    order
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Maps a text to `[len, first byte]`
    struct ShapeEmbedder;

    impl TextEmbedder for ShapeEmbedder {
        fn dimensions(&self) -> usize {
            2
        }

        fn embed(&self, texts: &[&str], _mode: EmbedMode) -> Result<Vec<Vec<f32>>> {
            Ok(texts
                .iter()
                .map(|t| vec![t.len() as f32, t.bytes().next().unwrap_or(0) as f32])
                .collect())
        }
    }

    struct FixedReranker {
        scores: Vec<f32>,
        calls: AtomicUsize,
    }

    impl Reranker for FixedReranker {
        fn score(&self, _query: &str, candidates: &[String]) -> Result<Vec<f32>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.scores[..candidates.len()].to_vec())
        }
    }

    struct FailingEmbedder;

    impl TextEmbedder for FailingEmbedder {
        fn dimensions(&self) -> usize {
            2
        }

        fn embed(&self, _texts: &[&str], _mode: EmbedMode) -> Result<Vec<Vec<f32>>> {
            Err(Error::embedding("model unavailable"))
        }
    }

    fn engine_with(
        dir: &std::path::Path,
        embedder: Arc<dyn TextEmbedder>,
        scores: Vec<f32>,
    ) -> (RetrievalEngine, Arc<FixedReranker>) {
        let reranker = Arc::new(FixedReranker {
            scores,
            calls: AtomicUsize::new(0),
        });
        let index = Arc::new(VectorIndex::open(dir, "test", 2).unwrap());
        let engine = RetrievalEngine::new(
            embedder,
            reranker.clone(),
            index,
            &RetrievalConfig::default(),
        );
        (engine, reranker)
    }

    /// Three chunks at increasing distance from the query "q"
    fn seed(engine: &RetrievalEngine) {
        let chunks = vec![
            Chunk::new("c1", "qa"),
            Chunk::new("c2", "qaa"),
            Chunk::new("c3", "qaaa"),
        ];
        assert_eq!(engine.index_chunks(&chunks).unwrap(), 3);
    }

    #[test]
    fn test_rerank_picks_highest_scores() {
        let dir = tempfile::tempdir().unwrap();
        let (engine, _) = engine_with(dir.path(), Arc::new(ShapeEmbedder), vec![0.1, 0.3, 0.9]);
        seed(&engine);

        assert_eq!(engine.retrieve_with("q", 15, 2), vec!["qaaa", "qaa"]);
    }

    #[test]
    fn test_rerank_second_example() {
        let dir = tempfile::tempdir().unwrap();
        let (engine, _) = engine_with(dir.path(), Arc::new(ShapeEmbedder), vec![0.2, 0.9, 0.5]);
        seed(&engine);

        assert_eq!(engine.retrieve_with("q", 15, 2), vec!["qaa", "qaaa"]);
    }

    #[test]
    fn test_no_rerank_when_few_candidates() {
        let dir = tempfile::tempdir().unwrap();
        let (engine, reranker) =
            engine_with(dir.path(), Arc::new(ShapeEmbedder), vec![0.9, 0.5, 0.1]);
        seed(&engine);

        // three candidates, final_k of five: distance order, reranker untouched
        assert_eq!(engine.retrieve_with("q", 15, 5), vec!["qa", "qaa", "qaaa"]);
        assert_eq!(reranker.calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_embedding_failure_yields_empty() {
        let dir = tempfile::tempdir().unwrap();
        let (engine, _) = engine_with(dir.path(), Arc::new(FailingEmbedder), vec![]);
        assert!(engine.retrieve("anything").is_empty());
        assert!(matches!(engine.search("anything", 15, 5), Err(Error::Retrieval(_))));
    }

    #[test]
    fn test_rerank_order_is_stable() {
        assert_eq!(rerank_order(&[0.5, 0.9, 0.5, 0.1]), vec![1, 0, 2, 3]);
    }
}
