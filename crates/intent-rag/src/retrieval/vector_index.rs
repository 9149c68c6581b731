//! Persistent flat vector index with exact squared-L2 search
//!
//! A collection is three artifacts in one directory:
//! - `<collection>.index`: bincode-encoded vector matrix
//! - `<collection>.documents`: JSON list of chunk texts
//! - `<collection>.ids`: JSON list of chunk ids
//!
//! The three lists are index-aligned and only grow, except on [`VectorIndex::reset`].

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};

/// One search hit
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IndexHit {
    pub id: String,
    pub text: String,
    /// Squared L2 distance to the query vector
    pub distance: f32,
}

#[derive(Debug, Deserialize)]
struct StoredMatrix {
    dimension: usize,
    rows: usize,
    data: Vec<f32>,
}

#[derive(Serialize)]
struct StoredMatrixRef<'a> {
    dimension: usize,
    rows: usize,
    data: &'a [f32],
}

#[derive(Debug, Default, Clone)]
struct IndexState {
    ids: Vec<String>,
    texts: Vec<String>,
    /// Row-major `len * dimension`
    vectors: Vec<f32>,
}

impl IndexState {
    fn len(&self) -> usize {
        self.ids.len()
    }

    fn truncate(&mut self, len: usize, dimension: usize) {
        self.ids.truncate(len);
        self.texts.truncate(len);
        self.vectors.truncate(len * dimension);
    }
}

/// Flat vector index for one collection
pub struct VectorIndex {
    dir: PathBuf,
    collection: String,
    dimension: usize,
    state: RwLock<IndexState>,
}

impl VectorIndex {
    /// Open a collection, falling back to an empty index when the stored
    /// artifacts are missing, unreadable or inconsistent
    pub fn open(dir: impl Into<PathBuf>, collection: &str, dimension: usize) -> Result<Self> {
        if dimension == 0 {
            return Err(Error::validation("Index dimension must be > 0"));
        }

        let dir = dir.into();
        std::fs::create_dir_all(&dir).map_err(|e| {
            Error::persistence(format!("Failed to create index directory {}: {}", dir.display(), e))
        })?;

        let index = Self {
            dir,
            collection: collection.to_string(),
            dimension,
            state: RwLock::new(IndexState::default()),
        };

        if index.artifact(IndexArtifact::Matrix).exists() {
            match index.load() {
                Ok(state) => {
                    tracing::info!(
                        "Loaded index '{}' with {} entries",
                        index.collection,
                        state.len()
                    );
                    *index.state.write() = state;
                }
                Err(e) => {
                    tracing::warn!(
                        "Index '{}' could not be loaded, starting empty: {}",
                        index.collection,
                        e
                    );
                }
            }
        } else {
            tracing::info!("Created new index '{}' (dimension {})", index.collection, dimension);
        }

        Ok(index)
    }

    pub fn collection(&self) -> &str {
        &self.collection
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    pub fn count(&self) -> usize {
        self.state.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.count() == 0
    }

    /// Append entries and persist before returning
    pub fn add(&self, ids: &[String], texts: &[String], vectors: &[Vec<f32>]) -> Result<()> {
        if ids.is_empty() || texts.is_empty() || vectors.is_empty() {
            return Err(Error::validation("ids, texts and vectors must not be empty"));
        }
        if ids.len() != texts.len() || ids.len() != vectors.len() {
            return Err(Error::validation(format!(
                "Length mismatch: {} ids, {} texts, {} vectors",
                ids.len(),
                texts.len(),
                vectors.len()
            )));
        }
        if let Some(bad) = vectors.iter().find(|v| v.len() != self.dimension) {
            return Err(Error::validation(format!(
                "Vector dimension {} does not match index dimension {}",
                bad.len(),
                self.dimension
            )));
        }

        let mut state = self.state.write();
        let before = state.len();
        state.ids.extend_from_slice(ids);
        state.texts.extend_from_slice(texts);
        for v in vectors {
            state.vectors.extend_from_slice(v);
        }

        if let Err(e) = self.persist(&state) {
            state.truncate(before, self.dimension);
            return Err(e);
        }

        tracing::debug!(
            "Added {} entries to '{}' (total {})",
            ids.len(),
            self.collection,
            state.len()
        );
        Ok(())
    }

    /// Up to `k` nearest entries per query vector, nearest first
    pub fn query(&self, queries: &[Vec<f32>], k: usize) -> Result<Vec<Vec<IndexHit>>> {
        if let Some(bad) = queries.iter().find(|q| q.len() != self.dimension) {
            return Err(Error::validation(format!(
                "Query dimension {} does not match index dimension {}",
                bad.len(),
                self.dimension
            )));
        }

        let state = self.state.read();
        if state.len() == 0 || k == 0 {
            return Ok(vec![Vec::new(); queries.len()]);
        }

        let results = queries
            .iter()
            .map(|q| {
                let mut scored: Vec<(usize, f32)> = state
                    .vectors
                    .chunks_exact(self.dimension)
                    .map(|row| squared_l2(q, row))
                    .enumerate()
                    .collect();
                scored.sort_by(|a, b| a.1.total_cmp(&b.1).then(a.0.cmp(&b.0)));

                scored
                    .into_iter()
                    .take(k)
                    .filter_map(|(i, distance)| {
                        Some(IndexHit {
                            id: state.ids.get(i)?.clone(),
                            text: state.texts.get(i)?.clone(),
                            distance,
                        })
                    })
                    .collect()
            })
            .collect();

        Ok(results)
    }

    /// Discard all entries and persist the empty state
    pub fn reset(&self) -> Result<()> {
        let mut state = self.state.write();
        *state = IndexState::default();
        self.persist(&state)?;
        tracing::info!("Reset index '{}'", self.collection);
        Ok(())
    }

    fn artifact(&self, kind: IndexArtifact) -> PathBuf {
        self.dir
            .join(format!("{}.{}", self.collection, kind.extension()))
    }

    fn persist(&self, state: &IndexState) -> Result<()> {
        let matrix = StoredMatrixRef {
            dimension: self.dimension,
            rows: state.len(),
            data: &state.vectors,
        };
        let matrix_bytes = bincode::serde::encode_to_vec(&matrix, bincode::config::standard())
            .map_err(|e| Error::persistence(format!("Failed to encode index: {}", e)))?;

        write_atomic(&self.artifact(IndexArtifact::Matrix), &matrix_bytes)?;
        write_atomic(
            &self.artifact(IndexArtifact::Documents),
            &serde_json::to_vec(&state.texts)?,
        )?;
        write_atomic(&self.artifact(IndexArtifact::Ids), &serde_json::to_vec(&state.ids)?)?;
        Ok(())
    }

    fn load(&self) -> Result<IndexState> {
        let read = |kind: IndexArtifact| {
            let path = self.artifact(kind);
            std::fs::read(&path)
                .map_err(|e| Error::persistence(format!("Failed to read {}: {}", path.display(), e)))
        };

        let (matrix, _): (StoredMatrix, usize) =
            bincode::serde::decode_from_slice(&read(IndexArtifact::Matrix)?, bincode::config::standard())
                .map_err(|e| Error::persistence(format!("Corrupt index matrix: {}", e)))?;
        let texts: Vec<String> = serde_json::from_slice(&read(IndexArtifact::Documents)?)
            .map_err(|e| Error::persistence(format!("Corrupt documents list: {}", e)))?;
        let ids: Vec<String> = serde_json::from_slice(&read(IndexArtifact::Ids)?)
            .map_err(|e| Error::persistence(format!("Corrupt ids list: {}", e)))?;

        if matrix.dimension != self.dimension {
            return Err(Error::persistence(format!(
                "Stored dimension {} differs from configured {}",
                matrix.dimension, self.dimension
            )));
        }
        if matrix.data.len() != matrix.rows * matrix.dimension
            || matrix.rows != texts.len()
            || matrix.rows != ids.len()
        {
            return Err(Error::persistence(format!(
                "Inconsistent artifacts: {} vectors, {} texts, {} ids",
                matrix.rows,
                texts.len(),
                ids.len()
            )));
        }

        Ok(IndexState {
            ids,
            texts,
            vectors: matrix.data,
        })
    }
}

#[derive(Clone, Copy)]
enum IndexArtifact {
    Matrix,
    Documents,
    Ids,
}

impl IndexArtifact {
    fn extension(self) -> &'static str {
        match self {
            IndexArtifact::Matrix => "index",
            IndexArtifact::Documents => "documents",
            IndexArtifact::Ids => "ids",
        }
    }
}

fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);

    std::fs::write(&tmp, bytes)
        .and_then(|_| std::fs::rename(&tmp, path))
        .map_err(|e| Error::persistence(format!("Failed to write {}: {}", path.display(), e)))
}

/// Squared Euclidean distance
pub fn squared_l2(a: &[f32], b: &[f32]) -> f32 {
    a.iter()
        .zip(b)
        .map(|(x, y)| {
            let d = x - y;
            d * d
        })
        .sum()
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn strings(prefix: &str, n: usize) -> Vec<String> {
        (0..n).map(|i| format!("{}{}", prefix, i)).collect()
    }

    #[test]
    fn test_query_orders_by_distance() {
        let dir = tempfile::tempdir().unwrap();
        let index = VectorIndex::open(dir.path(), "docs", 2).unwrap();
        index
            .add(
                &strings("id", 3),
                &strings("text", 3),
                &[vec![0.0, 0.0], vec![1.0, 0.0], vec![5.0, 5.0]],
            )
            .unwrap();

        let hits = index.query(&[vec![0.9, 0.0]], 2).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].len(), 2);
        assert_eq!(hits[0][0].id, "id1");
        assert_eq!(hits[0][1].id, "id0");
        assert!((hits[0][0].distance - 0.01).abs() < 1e-5);
    }

    #[test]
    fn test_empty_index_returns_empty_per_query() {
        let dir = tempfile::tempdir().unwrap();
        let index = VectorIndex::open(dir.path(), "docs", 3).unwrap();
        let hits = index.query(&[vec![0.0; 3], vec![1.0; 3]], 5).unwrap();
        assert_eq!(hits, vec![Vec::new(), Vec::new()]);
    }

    #[test]
    fn test_add_validation() {
        let dir = tempfile::tempdir().unwrap();
        let index = VectorIndex::open(dir.path(), "docs", 2).unwrap();

        assert!(matches!(index.add(&[], &[], &[]), Err(Error::Validation(_))));
        assert!(matches!(
            index.add(&strings("id", 2), &strings("t", 1), &[vec![0.0, 0.0]]),
            Err(Error::Validation(_))
        ));
        assert!(matches!(
            index.add(&strings("id", 1), &strings("t", 1), &[vec![0.0; 3]]),
            Err(Error::Validation(_))
        ));
        assert_eq!(index.count(), 0);
    }

    #[test]
    fn test_persists_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        {
            let index = VectorIndex::open(dir.path(), "campus", 2).unwrap();
            index
                .add(&strings("id", 2), &strings("t", 2), &[vec![1.0, 2.0], vec![3.0, 4.0]])
                .unwrap();
        }

        let reopened = VectorIndex::open(dir.path(), "campus", 2).unwrap();
        assert_eq!(reopened.count(), 2);
        let hits = reopened.query(&[vec![3.0, 4.0]], 1).unwrap();
        assert_eq!(hits[0][0].text, "t1");

        for ext in ["index", "documents", "ids"] {
            assert!(dir.path().join(format!("campus.{}", ext)).exists());
        }
    }

    #[test]
    fn test_reset_persists_empty_state() {
        let dir = tempfile::tempdir().unwrap();
        let index = VectorIndex::open(dir.path(), "docs", 2).unwrap();
        index
            .add(&strings("id", 1), &strings("t", 1), &[vec![1.0, 1.0]])
            .unwrap();
        index.reset().unwrap();
        assert_eq!(index.count(), 0);

        let reopened = VectorIndex::open(dir.path(), "docs", 2).unwrap();
        assert_eq!(reopened.count(), 0);
    }

    #[test]
    fn test_inconsistent_artifacts_fall_back_to_empty() {
        let dir = tempfile::tempdir().unwrap();
        {
            let index = VectorIndex::open(dir.path(), "docs", 2).unwrap();
            index
                .add(&strings("id", 2), &strings("t", 2), &[vec![1.0, 1.0], vec![2.0, 2.0]])
                .unwrap();
        }
        std::fs::write(dir.path().join("docs.ids"), r#"["only-one"]"#).unwrap();

        let reopened = VectorIndex::open(dir.path(), "docs", 2).unwrap();
        assert_eq!(reopened.count(), 0);
    }

    #[test]
    fn test_dimension_change_falls_back_to_empty() {
        let dir = tempfile::tempdir().unwrap();
        {
            let index = VectorIndex::open(dir.path(), "docs", 2).unwrap();
            index
                .add(&strings("id", 1), &strings("t", 1), &[vec![1.0, 1.0]])
                .unwrap();
        }
        let reopened = VectorIndex::open(dir.path(), "docs", 4).unwrap();
        assert_eq!(reopened.count(), 0);
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(32))]

        #[test]
        fn prop_stored_vector_is_its_own_nearest_match(
            rows in prop::collection::vec(prop::collection::vec(-10.0f32..10.0, 4), 1..20),
            pick in any::<prop::sample::Index>(),
        ) {
            let dir = tempfile::tempdir().unwrap();
            let index = VectorIndex::open(dir.path(), "prop", 4).unwrap();
            let n = rows.len();
            index.add(&strings("id", n), &strings("t", n), &rows).unwrap();

            let target = pick.index(n);
            let hits = index.query(&[rows[target].clone()], 1).unwrap();
            prop_assert_eq!(hits[0].len(), 1);
            prop_assert!(hits[0][0].distance.abs() < 1e-6);
        }

        #[test]
        fn prop_reset_empties_index(n in 1usize..10) {
            let dir = tempfile::tempdir().unwrap();
            let index = VectorIndex::open(dir.path(), "prop", 2).unwrap();
            let rows: Vec<Vec<f32>> = (0..n).map(|i| vec![i as f32, 0.0]).collect();
            index.add(&strings("id", n), &strings("t", n), &rows).unwrap();
            prop_assert_eq!(index.count(), n);
            index.reset().unwrap();
            prop_assert_eq!(index.count(), 0);
        }
    }
}
