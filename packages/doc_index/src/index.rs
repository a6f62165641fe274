//! In-memory vector index with JSON persistence.
//!
//! The index holds one embedding per text chunk and scans linearly at
//! query time (brute-force cosine). Persistence is a single JSON file in
//! the index directory so interchangeable server processes pointed at
//! the same data dir see the same documents.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::embedding::Embedder;
use crate::error::IndexError;
use crate::processor::ProgressUpdate;

const INDEX_FILE: &str = "index.json";

/// Search tuning knobs.
#[derive(Clone, Debug)]
pub struct IndexConfig {
    pub max_results: usize,
    pub similarity_threshold: f32,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            max_results: 5,
            similarity_threshold: 0.6,
        }
    }
}

/// Where a chunk came from.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct HitMetadata {
    pub filename: String,
    pub chunk_id: usize,
}

/// One scored search result.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SearchHit {
    pub text: String,
    pub score: f32,
    pub metadata: HitMetadata,
}

/// Index counters reported through the `stats` envelope.
#[derive(Clone, Copy, Debug)]
pub struct IndexStats {
    pub total_documents: usize,
    pub index_size: usize,
}

#[derive(Serialize, Deserialize)]
struct ChunkRecord {
    filename: String,
    chunk_id: usize,
    text: String,
    vector: Vec<f32>,
}

#[derive(Serialize, Deserialize)]
struct PersistedIndex {
    dimension: usize,
    chunks: Vec<ChunkRecord>,
}

/// Brute-force cosine-similarity index over embedded chunks.
pub struct VectorIndex {
    embedder: Box<dyn Embedder>,
    chunks: Vec<ChunkRecord>,
    index_dir: PathBuf,
    config: IndexConfig,
}

impl VectorIndex {
    /// Load the persisted index from `index_dir`, or start empty.
    ///
    /// A persisted file with a different embedding dimension is discarded
    /// (logged, not fatal) — the embedder is authoritative.
    pub fn load_or_create(
        index_dir: PathBuf,
        embedder: Box<dyn Embedder>,
        config: IndexConfig,
    ) -> Result<Self, IndexError> {
        std::fs::create_dir_all(&index_dir).map_err(|source| IndexError::Write {
            path: index_dir.clone(),
            source,
        })?;

        let file = index_dir.join(INDEX_FILE);
        let chunks = if file.exists() {
            let raw = std::fs::read_to_string(&file).map_err(|source| IndexError::Read {
                path: file.clone(),
                source,
            })?;
            match serde_json::from_str::<PersistedIndex>(&raw) {
                Ok(persisted) if persisted.dimension == embedder.dimension() => {
                    info!(chunks = persisted.chunks.len(), "loaded vector index");
                    persisted.chunks
                }
                Ok(persisted) => {
                    warn!(
                        on_disk = persisted.dimension,
                        expected = embedder.dimension(),
                        "index dimension mismatch, starting empty"
                    );
                    Vec::new()
                }
                Err(e) => {
                    warn!(error = %e, "corrupt index file, starting empty");
                    Vec::new()
                }
            }
        } else {
            Vec::new()
        };

        Ok(Self {
            embedder,
            chunks,
            index_dir,
            config,
        })
    }

    /// Embed and add a document's chunks, streaming per-chunk progress.
    ///
    /// Returns the number of chunks added. The index is persisted before
    /// returning so a sibling server process can pick the document up.
    pub async fn add_document(
        &mut self,
        filename: &str,
        chunks: &[String],
        progress: &mpsc::Sender<ProgressUpdate>,
    ) -> Result<usize, IndexError> {
        let _ = progress
            .send(ProgressUpdate::new(0, "Creating embeddings"))
            .await;

        for (i, chunk) in chunks.iter().enumerate() {
            let vector = self.embedder.embed(chunk);
            self.chunks.push(ChunkRecord {
                filename: filename.to_string(),
                chunk_id: i,
                text: chunk.clone(),
                vector,
            });

            let pct = ((i + 1) * 80 / chunks.len()) as u8;
            let _ = progress
                .send(ProgressUpdate::new(
                    pct,
                    format!("Processing chunk {}/{}", i + 1, chunks.len()),
                ))
                .await;
        }

        self.save()?;
        Ok(chunks.len())
    }

    /// Return the best-scoring chunks for `query`, highest first.
    ///
    /// Scores are cosine similarities clamped to 0.0–1.0; hits below the
    /// configured threshold are dropped and at most `max_results` are
    /// returned.
    pub fn search(&self, query: &str) -> Vec<SearchHit> {
        if self.chunks.is_empty() {
            return Vec::new();
        }

        let query_vector = self.embedder.embed(query);
        let mut hits: Vec<SearchHit> = self
            .chunks
            .iter()
            .map(|chunk| {
                let score: f32 = chunk
                    .vector
                    .iter()
                    .zip(&query_vector)
                    .map(|(a, b)| a * b)
                    .sum();
                SearchHit {
                    text: chunk.text.clone(),
                    score: score.clamp(0.0, 1.0),
                    metadata: HitMetadata {
                        filename: chunk.filename.clone(),
                        chunk_id: chunk.chunk_id,
                    },
                }
            })
            .filter(|hit| hit.score >= self.config.similarity_threshold)
            .collect();

        hits.sort_by(|a, b| b.score.total_cmp(&a.score));
        hits.truncate(self.config.max_results);
        hits
    }

    pub fn stats(&self) -> IndexStats {
        IndexStats {
            total_documents: self.chunks.len(),
            index_size: self.chunks.len(),
        }
    }

    fn save(&self) -> Result<(), IndexError> {
        let persisted = PersistedIndex {
            dimension: self.embedder.dimension(),
            chunks: self
                .chunks
                .iter()
                .map(|c| ChunkRecord {
                    filename: c.filename.clone(),
                    chunk_id: c.chunk_id,
                    text: c.text.clone(),
                    vector: c.vector.clone(),
                })
                .collect(),
        };
        let path = self.index_dir.join(INDEX_FILE);
        let json = serde_json::to_string(&persisted)?;
        std::fs::write(&path, json).map_err(|source| IndexError::Write { path, source })?;
        Ok(())
    }
}
