//! Protocol envelope types and codec.
//!
//! Every frame is a JSON object discriminated by a `type` field. The
//! kind set is closed: both enums are exhaustive, so adding a kind is a
//! compile-time-enforced update to the codec, the session tracker, and
//! the server dispatcher at once.
//!
//! There is no correlation id on the wire — each client holds at most
//! one outstanding operation per category, matching the deployed
//! protocol. File bytes travel base64-encoded inside the envelope so
//! uploads share the same text framing as all other traffic.

use serde::{Deserialize, Serialize};

/// Messages sent FROM the client TO the server.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Upload a document for indexing. `file_data` is base64.
    FileUpload { filename: String, file_data: String },
    /// Semantic search over indexed chunks.
    SearchQuery { query: String },
    /// Ask a question answered from retrieved context, streamed back.
    AskQuestion { question: String },
    /// Request index/server counters.
    GetStats,
}

/// Messages sent FROM the server TO the client.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Sent once on register, before any request.
    ConnectionStatus {
        server_port: u16,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        status: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        message: Option<String>,
    },
    /// The uploaded bytes were received and saved.
    UploadComplete {
        filename: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        size: Option<usize>,
    },
    /// Text-extraction progress. `progress` replaces the previous value.
    ProcessingStatus { progress: u8, status: String },
    ProcessingComplete {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        chunks: Option<usize>,
    },
    /// Embedding progress. An independent counter — it may start below
    /// the last `processing_status` value.
    EmbeddingStatus { progress: u8, status: String },
    /// Terminal envelope of an upload.
    EmbeddingComplete { chunks_added: usize },
    /// Terminal envelope of a search; fully replaces prior results.
    SearchResults {
        results: Vec<SearchResult>,
        query: String,
        total_found: usize,
    },
    AiStatus { question: String },
    /// One streamed answer fragment, appended in arrival order.
    AiChunk { content: String },
    /// Terminal envelope of a question.
    AiComplete {
        response: String,
        question: String,
        context_used: bool,
    },
    /// Terminal envelope of a stats request.
    Stats {
        total_documents: usize,
        server_port: u16,
        active_clients: usize,
    },
    /// Application error; terminates the operation that caused it,
    /// never the connection.
    Error { message: String },
}

/// One scored search hit on the wire.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SearchResult {
    pub text: String,
    pub score: f32,
    pub metadata: ResultMetadata,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ResultMetadata {
    pub filename: String,
    pub chunk_id: usize,
}

impl From<doc_index::SearchHit> for SearchResult {
    fn from(hit: doc_index::SearchHit) -> Self {
        Self {
            text: hit.text,
            score: hit.score,
            metadata: ResultMetadata {
                filename: hit.metadata.filename,
                chunk_id: hit.metadata.chunk_id,
            },
        }
    }
}

const CLIENT_KINDS: &[&str] = &["file_upload", "search_query", "ask_question", "get_stats"];

const SERVER_KINDS: &[&str] = &[
    "connection_status",
    "upload_complete",
    "processing_status",
    "processing_complete",
    "embedding_status",
    "embedding_complete",
    "search_results",
    "ai_status",
    "ai_chunk",
    "ai_complete",
    "stats",
    "error",
];

/// Codec failures. Receivers log and drop — never fatal to a connection.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("malformed envelope: {0}")]
    Malformed(String),

    #[error("unrecognized message type: {0}")]
    UnknownKind(String),
}

pub fn encode_client(msg: &ClientMessage) -> Result<String, ProtocolError> {
    serde_json::to_string(msg).map_err(|e| ProtocolError::Malformed(e.to_string()))
}

pub fn encode_server(msg: &ServerMessage) -> Result<String, ProtocolError> {
    serde_json::to_string(msg).map_err(|e| ProtocolError::Malformed(e.to_string()))
}

pub fn decode_client(text: &str) -> Result<ClientMessage, ProtocolError> {
    decode(text, CLIENT_KINDS)
}

pub fn decode_server(text: &str) -> Result<ServerMessage, ProtocolError> {
    decode(text, SERVER_KINDS)
}

/// Parse a frame, separating "we don't know this kind" from "we know the
/// kind but a required field is missing or mistyped".
fn decode<T: serde::de::DeserializeOwned>(
    text: &str,
    known_kinds: &[&str],
) -> Result<T, ProtocolError> {
    let value: serde_json::Value =
        serde_json::from_str(text).map_err(|e| ProtocolError::Malformed(e.to_string()))?;

    let kind = value
        .get("type")
        .and_then(|v| v.as_str())
        .ok_or_else(|| ProtocolError::Malformed("missing `type` field".to_string()))?;

    if !known_kinds.contains(&kind) {
        return Err(ProtocolError::UnknownKind(kind.to_string()));
    }

    serde_json::from_value(value).map_err(|e| ProtocolError::Malformed(e.to_string()))
}
