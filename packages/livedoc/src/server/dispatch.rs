//! Per-request handling.
//!
//! Each request kind produces its documented envelope sequence on the
//! connection's outbound channel. Failures become a single `error`
//! envelope; nothing here tears down the connection.

use std::path::Path;
use std::sync::atomic::Ordering;

use anyhow::{Context, Result, bail};
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use tokio::sync::mpsc;
use tracing::{info, warn};

use doc_index::ProgressUpdate;

use crate::ws::{ClientMessage, SearchResult, ServerMessage};

use super::AppState;

/// How many top hits are stitched into question-answering context.
const CONTEXT_HITS: usize = 3;

pub(super) async fn handle_message(
    msg: ClientMessage,
    state: &AppState,
    tx: &mpsc::Sender<ServerMessage>,
) {
    let result = match msg {
        ClientMessage::GetStats => handle_stats(state, tx).await,
        ClientMessage::SearchQuery { query } => handle_search(&query, state, tx).await,
        ClientMessage::AskQuestion { question } => handle_question(&question, state, tx).await,
        ClientMessage::FileUpload {
            filename,
            file_data,
        } => handle_upload(&filename, &file_data, state, tx).await,
    };

    if let Err(e) = result {
        warn!(error = %e, "request failed");
        let _ = tx
            .send(ServerMessage::Error {
                message: e.to_string(),
            })
            .await;
    }
}

async fn handle_stats(state: &AppState, tx: &mpsc::Sender<ServerMessage>) -> Result<()> {
    let stats = state.index.read().await.stats();
    let _ = tx
        .send(ServerMessage::Stats {
            total_documents: stats.total_documents,
            server_port: state.server_port,
            active_clients: state.active_clients.load(Ordering::SeqCst),
        })
        .await;
    Ok(())
}

async fn handle_search(
    query: &str,
    state: &AppState,
    tx: &mpsc::Sender<ServerMessage>,
) -> Result<()> {
    if query.trim().is_empty() {
        bail!("Search query cannot be empty");
    }

    let hits = state.index.read().await.search(query);
    let total_found = hits.len();
    let results: Vec<SearchResult> = hits.into_iter().map(SearchResult::from).collect();

    let _ = tx
        .send(ServerMessage::SearchResults {
            results,
            query: query.to_string(),
            total_found,
        })
        .await;
    Ok(())
}

async fn handle_question(
    question: &str,
    state: &AppState,
    tx: &mpsc::Sender<ServerMessage>,
) -> Result<()> {
    if question.trim().is_empty() {
        bail!("Question cannot be empty");
    }

    // Retrieve context first, then stream the answer.
    let context = {
        let hits = state.index.read().await.search(question);
        hits.iter()
            .take(CONTEXT_HITS)
            .map(|h| h.text.as_str())
            .collect::<Vec<_>>()
            .join("\n\n")
    };

    let _ = tx
        .send(ServerMessage::AiStatus {
            question: question.to_string(),
        })
        .await;

    let (chunk_tx, mut chunk_rx) = mpsc::channel::<String>(64);
    let forward = async {
        while let Some(content) = chunk_rx.recv().await {
            let _ = tx.send(ServerMessage::AiChunk { content }).await;
        }
    };
    let (answer, ()) = tokio::join!(
        state.answerer.stream_answer(question, &context, chunk_tx),
        forward,
    );
    let answer = answer?;

    let _ = tx
        .send(ServerMessage::AiComplete {
            response: answer.response,
            question: question.to_string(),
            context_used: answer.context_used,
        })
        .await;
    Ok(())
}

async fn handle_upload(
    filename: &str,
    file_data: &str,
    state: &AppState,
    tx: &mpsc::Sender<ServerMessage>,
) -> Result<()> {
    let extension = Path::new(filename)
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .unwrap_or_default();
    if !state.limits.allowed_extensions.contains(&extension) {
        bail!("File type not supported: .{extension}");
    }

    let data = BASE64
        .decode(file_data.as_bytes())
        .context("file_data is not valid base64")?;
    if data.len() > state.limits.max_file_size_bytes {
        bail!(
            "File too large: {} bytes (max {})",
            data.len(),
            state.limits.max_file_size_bytes
        );
    }

    let path = state.processor.save_upload(filename, &data)?;
    let _ = tx
        .send(ServerMessage::UploadComplete {
            filename: filename.to_string(),
            size: Some(data.len()),
        })
        .await;

    // Stage 1: extract and chunk, relaying progress.
    let (progress_tx, mut progress_rx) = mpsc::channel::<ProgressUpdate>(32);
    let forward = async {
        while let Some(u) = progress_rx.recv().await {
            let _ = tx
                .send(ServerMessage::ProcessingStatus {
                    progress: u.progress,
                    status: u.status,
                })
                .await;
        }
    };
    let process = async {
        let result = state.processor.process_file(&path, &progress_tx).await;
        drop(progress_tx);
        result
    };
    let (chunks, ()) = tokio::join!(process, forward);
    let chunks = chunks?;

    let _ = tx
        .send(ServerMessage::ProcessingComplete {
            chunks: Some(chunks.len()),
        })
        .await;

    // Stage 2: embed and persist. The progress counter restarts.
    let (embed_tx, mut embed_rx) = mpsc::channel::<ProgressUpdate>(32);
    let forward = async {
        while let Some(u) = embed_rx.recv().await {
            let _ = tx
                .send(ServerMessage::EmbeddingStatus {
                    progress: u.progress,
                    status: u.status,
                })
                .await;
        }
    };
    let embed = async {
        let mut index = state.index.write().await;
        let result = index.add_document(filename, &chunks, &embed_tx).await;
        drop(embed_tx);
        result
    };
    let (added, ()) = tokio::join!(embed, forward);
    let chunks_added = added?;

    info!(filename, chunks_added, "document indexed");
    let _ = tx
        .send(ServerMessage::EmbeddingComplete { chunks_added })
        .await;
    Ok(())
}
