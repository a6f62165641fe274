//! doc_index - Document processing and vector search library
//!
//! This crate holds the slow, streaming collaborators behind the LiveDoc
//! WebSocket protocol: text extraction and chunking, embedding, the
//! in-memory vector index, and the answer engine. It has no transport
//! dependencies — progress flows out through plain mpsc channels so the
//! caller decides how updates reach the client.
//!
//! # Example
//!
//! ```no_run
//! use doc_index::{DocumentProcessor, HashEmbedder, IndexConfig, ProgressUpdate, VectorIndex};
//! use tokio::sync::mpsc;
//!
//! #[tokio::main]
//! async fn main() {
//!     let processor = DocumentProcessor::new("data/uploads".into(), 500, 50).unwrap();
//!     let mut index = VectorIndex::load_or_create(
//!         "data/index".into(),
//!         Box::new(HashEmbedder::new(384)),
//!         IndexConfig::default(),
//!     )
//!     .unwrap();
//!
//!     let (tx, mut rx) = mpsc::channel::<ProgressUpdate>(16);
//!     tokio::spawn(async move {
//!         while let Some(update) = rx.recv().await {
//!             println!("{}% {}", update.progress, update.status);
//!         }
//!     });
//!
//!     let path = processor.save_upload("notes.txt", b"hello world").unwrap();
//!     let chunks = processor.process_file(&path, &tx).await.unwrap();
//!     index.add_document("notes.txt", &chunks, &tx).await.unwrap();
//!
//!     for hit in index.search("hello") {
//!         println!("{:.2} {}", hit.score, hit.text);
//!     }
//! }
//! ```

mod answer;
mod embedding;
mod error;
mod index;
mod processor;

pub use answer::{Answer, AnswerEngine, ExtractiveAnswerer};
pub use embedding::{Embedder, HashEmbedder};
pub use error::IndexError;
pub use index::{HitMetadata, IndexConfig, IndexStats, SearchHit, VectorIndex};
pub use processor::{DocumentProcessor, PlainTextExtractor, ProgressUpdate, TextExtractor};
