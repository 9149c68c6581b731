//! Bulk loading of pre-chunked corpora
//!
//! A corpus is a directory tree of `.jsonl` files, one `{"id"?, "text"}`
//! record per line. Files are loaded in path order; each file becomes one
//! index batch. Missing ids become `file_<n>_chunk_<m>` with `n` counted
//! from 1 over the sorted file list and `m` from 0 within the file.

use serde::Serialize;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

use crate::error::{Error, Result};
use crate::retrieval::RetrievalEngine;
use crate::types::{Chunk, ChunkRecord};

/// A file that could not be loaded
#[derive(Debug, Clone, Serialize)]
pub struct LoadFailure {
    pub path: PathBuf,
    pub error: String,
}

/// Outcome of a bulk load
#[derive(Debug, Clone, Default, Serialize)]
pub struct BulkLoadReport {
    pub files_seen: usize,
    pub files_loaded: usize,
    pub chunks_added: usize,
    pub failures: Vec<LoadFailure>,
}

/// Corpus files under `dir`, sorted by path
pub fn corpus_files(dir: impl AsRef<Path>) -> Result<Vec<PathBuf>> {
    let dir = dir.as_ref();
    if !dir.is_dir() {
        return Err(Error::validation(format!(
            "Corpus directory not found: {}",
            dir.display()
        )));
    }

    let mut files: Vec<PathBuf> = WalkDir::new(dir)
        .follow_links(true)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .map(|e| e.into_path())
        .filter(|p| {
            p.extension()
                .map(|ext| ext.to_string_lossy().eq_ignore_ascii_case("jsonl"))
                .unwrap_or(false)
        })
        .collect();
    files.sort();
    Ok(files)
}

/// Parse one corpus file into chunks
pub fn read_chunks(path: &Path, file_number: usize) -> Result<Vec<Chunk>> {
    let file = std::fs::File::open(path)?;
    let mut chunks = Vec::new();

    for (line_no, line) in BufReader::new(file).lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let record: ChunkRecord = serde_json::from_str(&line)
            .map_err(|e| Error::validation(format!("line {}: {}", line_no + 1, e)))?;
        if record.text.trim().is_empty() {
            continue;
        }
        let id = record
            .id
            .unwrap_or_else(|| format!("file_{}_chunk_{}", file_number, chunks.len()));
        chunks.push(Chunk::new(id, record.text));
    }

    Ok(chunks)
}

/// Load every corpus file under `dir` into `engine`
pub fn bulk_load(engine: &RetrievalEngine, dir: impl AsRef<Path>, reset: bool) -> Result<BulkLoadReport> {
    bulk_load_with(engine, dir, reset, |_, _| {})
}

/// [`bulk_load`] reporting each file's outcome to `on_file`
///
/// A file that fails to parse or index is logged, recorded and skipped.
pub fn bulk_load_with<F>(
    engine: &RetrievalEngine,
    dir: impl AsRef<Path>,
    reset: bool,
    mut on_file: F,
) -> Result<BulkLoadReport>
where
    F: FnMut(&Path, &Result<usize>),
{
    let files = corpus_files(&dir)?;
    if reset {
        engine.index().reset()?;
        tracing::info!("Reset collection '{}'", engine.index().collection());
    }

    let mut report = BulkLoadReport {
        files_seen: files.len(),
        ..Default::default()
    };

    for (i, path) in files.iter().enumerate() {
        let outcome = read_chunks(path, i + 1).and_then(|chunks| engine.index_chunks(&chunks));
        on_file(path, &outcome);

        match outcome {
            Ok(added) => {
                tracing::info!("Loaded {} chunks from {}", added, path.display());
                report.files_loaded += 1;
                report.chunks_added += added;
            }
            Err(e) => {
                tracing::warn!("Skipping {}: {}", path.display(), e);
                report.failures.push(LoadFailure {
                    path: path.clone(),
                    error: e.to_string(),
                });
            }
        }
    }

    tracing::info!(
        "Bulk load into '{}' finished: {}/{} files, {} chunks, {} total",
        engine.index().collection(),
        report.files_loaded,
        report.files_seen,
        report.chunks_added,
        engine.index().count()
    );
    Ok(report)
}
