//! Document upload handling: save, extract text, chunk.
//!
//! Extraction is behind the [`TextExtractor`] trait so formats can be
//! added without touching the pipeline. Progress flows out through an
//! mpsc channel as coarse percentage steps; the final chunk list is the
//! return value.

use std::path::{Path, PathBuf};

use tokio::sync::mpsc;
use tracing::debug;

use crate::error::IndexError;

/// One progress step of a long-running pipeline stage.
///
/// `progress` is a 0–100 percentage for the *current stage*, not a global
/// counter — consumers display the latest value and must tolerate a
/// regression when a new stage starts.
#[derive(Clone, Debug)]
pub struct ProgressUpdate {
    pub progress: u8,
    pub status: String,
}

impl ProgressUpdate {
    pub fn new(progress: u8, status: impl Into<String>) -> Self {
        Self {
            progress,
            status: status.into(),
        }
    }
}

/// Extracts plain text from one file format.
pub trait TextExtractor: Send + Sync {
    /// Lowercase extension without the dot, e.g. "txt".
    fn supports(&self, extension: &str) -> bool;

    fn extract(&self, path: &Path) -> Result<String, IndexError>;
}

/// Extractor for `.txt` files.
pub struct PlainTextExtractor;

impl TextExtractor for PlainTextExtractor {
    fn supports(&self, extension: &str) -> bool {
        extension == "txt"
    }

    fn extract(&self, path: &Path) -> Result<String, IndexError> {
        std::fs::read_to_string(path).map_err(|source| IndexError::Read {
            path: path.to_path_buf(),
            source,
        })
    }
}

/// Saves uploads and turns them into overlapping text chunks.
pub struct DocumentProcessor {
    upload_dir: PathBuf,
    chunk_size: usize,
    chunk_overlap: usize,
    extractors: Vec<Box<dyn TextExtractor>>,
}

impl DocumentProcessor {
    /// Create a processor rooted at `upload_dir` (created if missing).
    ///
    /// `chunk_size` and `chunk_overlap` are measured in words; overlap
    /// must be smaller than the chunk size.
    pub fn new(
        upload_dir: PathBuf,
        chunk_size: usize,
        chunk_overlap: usize,
    ) -> Result<Self, IndexError> {
        std::fs::create_dir_all(&upload_dir).map_err(|source| IndexError::Write {
            path: upload_dir.clone(),
            source,
        })?;
        Ok(Self {
            upload_dir,
            chunk_size: chunk_size.max(1),
            chunk_overlap: chunk_overlap.min(chunk_size.saturating_sub(1)),
            extractors: vec![Box::new(PlainTextExtractor)],
        })
    }

    /// Register an additional extractor (e.g. a PDF backend).
    pub fn with_extractor(mut self, extractor: Box<dyn TextExtractor>) -> Self {
        self.extractors.push(extractor);
        self
    }

    /// Save an uploaded file under the upload directory and return its path.
    ///
    /// Rejects filenames with path components so a client cannot write
    /// outside the upload directory.
    pub fn save_upload(&self, filename: &str, data: &[u8]) -> Result<PathBuf, IndexError> {
        if filename.is_empty()
            || filename.contains('/')
            || filename.contains('\\')
            || filename.contains("..")
        {
            return Err(IndexError::InvalidFilename(filename.to_string()));
        }

        let path = self.upload_dir.join(filename);
        std::fs::write(&path, data).map_err(|source| IndexError::Write {
            path: path.clone(),
            source,
        })?;
        debug!(file = %path.display(), bytes = data.len(), "saved upload");
        Ok(path)
    }

    /// Extract text from `path` and chunk it, streaming progress steps.
    ///
    /// Returns the chunk list; the caller emits the terminal envelope.
    pub async fn process_file(
        &self,
        path: &Path,
        progress: &mpsc::Sender<ProgressUpdate>,
    ) -> Result<Vec<String>, IndexError> {
        let _ = progress
            .send(ProgressUpdate::new(0, "Starting document processing"))
            .await;

        let extension = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase())
            .unwrap_or_default();

        let extractor = self
            .extractors
            .iter()
            .find(|e| e.supports(&extension))
            .ok_or_else(|| IndexError::UnsupportedFileType(extension.clone()))?;

        let _ = progress
            .send(ProgressUpdate::new(30, format!("Reading {extension} file")))
            .await;

        let text = extractor.extract(path)?;

        let _ = progress
            .send(ProgressUpdate::new(70, "Text extraction completed"))
            .await;

        let chunks = self.chunk_text(&text);
        if chunks.is_empty() {
            return Err(IndexError::EmptyDocument);
        }

        let _ = progress
            .send(ProgressUpdate::new(
                80,
                format!("Created {} text chunks", chunks.len()),
            ))
            .await;

        Ok(chunks)
    }

    /// Split text into word-based chunks with the configured overlap.
    fn chunk_text(&self, text: &str) -> Vec<String> {
        let words: Vec<&str> = text.split_whitespace().collect();
        let stride = self.chunk_size - self.chunk_overlap;

        let mut chunks = Vec::new();
        let mut start = 0;
        while start < words.len() {
            let end = (start + self.chunk_size).min(words.len());
            let chunk = words[start..end].join(" ");
            if !chunk.trim().is_empty() {
                chunks.push(chunk);
            }
            if end == words.len() {
                break;
            }
            start += stride;
        }
        chunks
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn processor(chunk_size: usize, overlap: usize) -> (tempfile::TempDir, DocumentProcessor) {
        let tmp = tempfile::tempdir().unwrap();
        let p = DocumentProcessor::new(tmp.path().join("uploads"), chunk_size, overlap).unwrap();
        (tmp, p)
    }

    #[test]
    fn save_upload_writes_file() {
        let (_tmp, p) = processor(500, 50);
        let path = p.save_upload("notes.txt", b"hello").unwrap();
        assert_eq!(std::fs::read(&path).unwrap(), b"hello");
    }

    #[test]
    fn save_upload_rejects_traversal() {
        let (_tmp, p) = processor(500, 50);
        assert!(p.save_upload("../evil.txt", b"x").is_err());
        assert!(p.save_upload("a/b.txt", b"x").is_err());
        assert!(p.save_upload("", b"x").is_err());
    }

    #[test]
    fn chunking_respects_overlap() {
        let (_tmp, p) = processor(4, 1);
        let words: Vec<String> = (0..10).map(|i| format!("w{i}")).collect();
        let chunks = p.chunk_text(&words.join(" "));

        // Stride 3: [0..4], [3..7], [6..10]
        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[0], "w0 w1 w2 w3");
        assert_eq!(chunks[1], "w3 w4 w5 w6");
        assert_eq!(chunks[2], "w6 w7 w8 w9");
    }

    #[test]
    fn chunking_short_text_is_single_chunk() {
        let (_tmp, p) = processor(500, 50);
        let chunks = p.chunk_text("just a few words");
        assert_eq!(chunks, vec!["just a few words".to_string()]);
    }

    #[tokio::test]
    async fn process_file_streams_progress_and_chunks() {
        let (_tmp, p) = processor(500, 50);
        let path = p.save_upload("doc.txt", b"alpha beta gamma").unwrap();

        let (tx, mut rx) = mpsc::channel(16);
        let chunks = p.process_file(&path, &tx).await.unwrap();
        drop(tx);

        assert_eq!(chunks, vec!["alpha beta gamma".to_string()]);

        let mut updates = Vec::new();
        while let Some(u) = rx.recv().await {
            updates.push(u);
        }
        assert_eq!(updates.first().unwrap().progress, 0);
        assert_eq!(updates.last().unwrap().progress, 80);
    }

    #[tokio::test]
    async fn process_file_rejects_unknown_extension() {
        let (_tmp, p) = processor(500, 50);
        let path = p.save_upload("doc.pdf", b"%PDF-").unwrap();

        let (tx, _rx) = mpsc::channel(16);
        let err = p.process_file(&path, &tx).await.unwrap_err();
        assert!(matches!(err, IndexError::UnsupportedFileType(_)));
    }

    #[tokio::test]
    async fn process_file_rejects_empty_document() {
        let (_tmp, p) = processor(500, 50);
        let path = p.save_upload("empty.txt", b"   \n  ").unwrap();

        let (tx, _rx) = mpsc::channel(16);
        let err = p.process_file(&path, &tx).await.unwrap_err();
        assert!(matches!(err, IndexError::EmptyDocument));
    }
}
