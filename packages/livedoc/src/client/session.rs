//! Streaming sessions: envelope bursts → UI-facing state updates.
//!
//! One outstanding operation per category (the wire has no correlation
//! id). Progress values replace prior values, answer chunks append in
//! arrival order, and each new `search_results` fully replaces what was
//! displayed before — including results of a query that was already
//! superseded. Last reply wins by arrival time, not query recency; that
//! staleness race is a documented limitation, asserted in tests below.

use tracing::debug;

use crate::ws::{ClientMessage, SearchResult, ServerMessage};

/// The four logical operation kinds a client can have in flight.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum OpCategory {
    Upload,
    Search,
    Question,
    Stats,
}

impl OpCategory {
    /// Category an outgoing intent belongs to.
    pub fn of(msg: &ClientMessage) -> Self {
        match msg {
            ClientMessage::FileUpload { .. } => Self::Upload,
            ClientMessage::SearchQuery { .. } => Self::Search,
            ClientMessage::AskQuestion { .. } => Self::Question,
            ClientMessage::GetStats => Self::Stats,
        }
    }
}

/// Which server-side stage a progress percentage belongs to.
///
/// The stages are independent counters; a fresh stage may start below
/// the previous stage's last value and that is not an error.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ProgressStage {
    Processing,
    Embedding,
}

/// One UI-facing state update derived from inbound envelopes.
#[derive(Clone, Debug, PartialEq)]
pub enum SessionUpdate {
    /// A new session opened for an outgoing intent.
    Started { category: OpCategory },
    /// Connection-health info from the server's welcome envelope.
    ServerInfo { server_port: u16 },
    UploadAccepted { filename: String, size: Option<usize> },
    /// Latest-wins progress for the upload pipeline.
    Progress {
        stage: ProgressStage,
        progress: u8,
        status: String,
    },
    ProcessingDone { chunks: Option<usize> },
    /// Terminal update of an upload.
    Indexed { chunks_added: usize },
    /// Full replacement of displayed search results.
    SearchResults {
        query: String,
        results: Vec<SearchResult>,
        total_found: usize,
    },
    AnswerStarted { question: String },
    /// One appended fragment plus the accumulated text so far.
    AnswerDelta { chunk: String, accumulated: String },
    /// Terminal update of a question.
    AnswerComplete {
        response: String,
        question: String,
        context_used: bool,
    },
    /// Terminal update of a stats request.
    Stats {
        total_documents: usize,
        server_port: u16,
        active_clients: usize,
    },
    /// Application error, terminal for the session it answers.
    /// `category` is `None` when no session was outstanding.
    Failed {
        category: Option<OpCategory>,
        message: String,
    },
    /// The connection dropped mid-session; the intent is not replayed.
    Interrupted { category: OpCategory },
}

#[derive(Debug)]
struct UploadSession {
    seq: u64,
    progress: u8,
}

#[derive(Debug)]
struct SearchSession {
    seq: u64,
}

#[derive(Debug)]
struct QuestionSession {
    seq: u64,
    accumulated: String,
}

#[derive(Debug)]
struct StatsSession {
    seq: u64,
}

/// Tracks the outstanding session per category and folds inbound
/// envelopes into [`SessionUpdate`]s. Purely synchronous; the connection
/// manager drives it from its single event loop.
#[derive(Default)]
pub struct SessionTracker {
    upload: Option<UploadSession>,
    search: Option<SearchSession>,
    question: Option<QuestionSession>,
    stats: Option<StatsSession>,
    /// Monotonic intent counter, used to route `error` envelopes to the
    /// most recently begun live session.
    next_seq: u64,
    /// Query whose results are currently displayed (arrival order).
    displayed_query: Option<String>,
}

impl SessionTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a session for an outgoing intent. An existing session of the
    /// same category is silently superseded (the caller issued a new
    /// intent; the old one will never be answered distinguishably).
    pub fn begin(&mut self, category: OpCategory) -> SessionUpdate {
        let seq = self.next_seq;
        self.next_seq += 1;

        match category {
            OpCategory::Upload => {
                if self.upload.is_some() {
                    debug!("superseding outstanding upload session");
                }
                self.upload = Some(UploadSession { seq, progress: 0 });
            }
            OpCategory::Search => {
                self.search = Some(SearchSession { seq });
            }
            OpCategory::Question => {
                if self.question.is_some() {
                    debug!("superseding outstanding question session");
                }
                self.question = Some(QuestionSession {
                    seq,
                    accumulated: String::new(),
                });
            }
            OpCategory::Stats => {
                self.stats = Some(StatsSession { seq });
            }
        }
        SessionUpdate::Started { category }
    }

    /// Number of live sessions (for leak checks).
    pub fn live_sessions(&self) -> usize {
        usize::from(self.upload.is_some())
            + usize::from(self.search.is_some())
            + usize::from(self.question.is_some())
            + usize::from(self.stats.is_some())
    }

    /// Accumulated answer text of the outstanding question session.
    pub fn answer_so_far(&self) -> Option<&str> {
        self.question.as_ref().map(|q| q.accumulated.as_str())
    }

    /// Latest displayed progress of the outstanding upload session.
    pub fn upload_progress(&self) -> Option<u8> {
        self.upload.as_ref().map(|u| u.progress)
    }

    /// Query whose results the UI currently shows (last arrival wins).
    pub fn displayed_search_query(&self) -> Option<&str> {
        self.displayed_query.as_deref()
    }

    /// Fold one inbound envelope into zero or more updates.
    pub fn apply(&mut self, msg: &ServerMessage) -> Vec<SessionUpdate> {
        match msg {
            ServerMessage::ConnectionStatus { server_port, .. } => {
                vec![SessionUpdate::ServerInfo {
                    server_port: *server_port,
                }]
            }

            ServerMessage::UploadComplete { filename, size } => {
                if self.upload.is_none() {
                    debug!("upload_complete with no upload session, ignoring");
                    return Vec::new();
                }
                vec![SessionUpdate::UploadAccepted {
                    filename: filename.clone(),
                    size: *size,
                }]
            }

            ServerMessage::ProcessingStatus { progress, status } => {
                self.upload_progress_update(ProgressStage::Processing, *progress, status)
            }

            ServerMessage::ProcessingComplete { chunks } => {
                if self.upload.is_none() {
                    debug!("processing_complete with no upload session, ignoring");
                    return Vec::new();
                }
                vec![SessionUpdate::ProcessingDone { chunks: *chunks }]
            }

            ServerMessage::EmbeddingStatus { progress, status } => {
                self.upload_progress_update(ProgressStage::Embedding, *progress, status)
            }

            ServerMessage::EmbeddingComplete { chunks_added } => {
                if self.upload.take().is_none() {
                    debug!("embedding_complete with no upload session, ignoring");
                    return Vec::new();
                }
                vec![SessionUpdate::Indexed {
                    chunks_added: *chunks_added,
                }]
            }

            ServerMessage::SearchResults {
                results,
                query,
                total_found,
            } => {
                // Always displayed, even when the session that asked was
                // already answered or superseded: last arrival wins.
                self.search = None;
                self.displayed_query = Some(query.clone());
                vec![SessionUpdate::SearchResults {
                    query: query.clone(),
                    results: results.clone(),
                    total_found: *total_found,
                }]
            }

            ServerMessage::AiStatus { question } => {
                if self.question.is_none() {
                    debug!("ai_status with no question session, ignoring");
                    return Vec::new();
                }
                vec![SessionUpdate::AnswerStarted {
                    question: question.clone(),
                }]
            }

            ServerMessage::AiChunk { content } => {
                let Some(session) = self.question.as_mut() else {
                    debug!("ai_chunk with no question session, ignoring");
                    return Vec::new();
                };
                session.accumulated.push_str(content);
                vec![SessionUpdate::AnswerDelta {
                    chunk: content.clone(),
                    accumulated: session.accumulated.clone(),
                }]
            }

            ServerMessage::AiComplete {
                response,
                question,
                context_used,
            } => {
                if self.question.take().is_none() {
                    debug!("ai_complete with no question session, ignoring");
                    return Vec::new();
                }
                vec![SessionUpdate::AnswerComplete {
                    response: response.clone(),
                    question: question.clone(),
                    context_used: *context_used,
                }]
            }

            ServerMessage::Stats {
                total_documents,
                server_port,
                active_clients,
            } => {
                if self.stats.take().is_none() {
                    debug!("stats with no stats session, ignoring");
                    return Vec::new();
                }
                vec![SessionUpdate::Stats {
                    total_documents: *total_documents,
                    server_port: *server_port,
                    active_clients: *active_clients,
                }]
            }

            ServerMessage::Error { message } => {
                let category = self.fail_most_recent();
                vec![SessionUpdate::Failed {
                    category,
                    message: message.clone(),
                }]
            }
        }
    }

    /// Mark every live session interrupted and prune them all.
    pub fn interrupt_all(&mut self) -> Vec<SessionUpdate> {
        let mut updates = Vec::new();
        if self.upload.take().is_some() {
            updates.push(SessionUpdate::Interrupted {
                category: OpCategory::Upload,
            });
        }
        if self.search.take().is_some() {
            updates.push(SessionUpdate::Interrupted {
                category: OpCategory::Search,
            });
        }
        if self.question.take().is_some() {
            updates.push(SessionUpdate::Interrupted {
                category: OpCategory::Question,
            });
        }
        if self.stats.take().is_some() {
            updates.push(SessionUpdate::Interrupted {
                category: OpCategory::Stats,
            });
        }
        updates
    }

    fn upload_progress_update(
        &mut self,
        stage: ProgressStage,
        progress: u8,
        status: &str,
    ) -> Vec<SessionUpdate> {
        let Some(session) = self.upload.as_mut() else {
            debug!("progress envelope with no upload session, ignoring");
            return Vec::new();
        };
        // Replace, never sum. Stages are independent counters, so a
        // regression is displayed as-is.
        session.progress = progress;
        vec![SessionUpdate::Progress {
            stage,
            progress,
            status: status.to_string(),
        }]
    }

    /// Terminate the most recently begun live session; the wire carries
    /// no correlation id, so recency is the best available routing.
    fn fail_most_recent(&mut self) -> Option<OpCategory> {
        let candidates = [
            (self.upload.as_ref().map(|s| s.seq), OpCategory::Upload),
            (self.search.as_ref().map(|s| s.seq), OpCategory::Search),
            (self.question.as_ref().map(|s| s.seq), OpCategory::Question),
            (self.stats.as_ref().map(|s| s.seq), OpCategory::Stats),
        ];
        let newest = candidates
            .iter()
            .filter_map(|(seq, cat)| seq.map(|s| (s, *cat)))
            .max_by_key(|(seq, _)| *seq)?;

        match newest.1 {
            OpCategory::Upload => self.upload = None,
            OpCategory::Search => self.search = None,
            OpCategory::Question => self.question = None,
            OpCategory::Stats => self.stats = None,
        }
        Some(newest.1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunk(content: &str) -> ServerMessage {
        ServerMessage::AiChunk {
            content: content.to_string(),
        }
    }

    fn results_for(query: &str) -> ServerMessage {
        ServerMessage::SearchResults {
            results: Vec::new(),
            query: query.to_string(),
            total_found: 0,
        }
    }

    #[test]
    fn answer_chunks_accumulate_in_arrival_order() {
        let mut tracker = SessionTracker::new();
        tracker.begin(OpCategory::Question);

        tracker.apply(&chunk("A"));
        let updates = tracker.apply(&chunk("B"));

        assert_eq!(tracker.answer_so_far(), Some("AB"));
        assert_eq!(
            updates,
            vec![SessionUpdate::AnswerDelta {
                chunk: "B".to_string(),
                accumulated: "AB".to_string(),
            }]
        );

        let done = tracker.apply(&ServerMessage::AiComplete {
            response: "AB".to_string(),
            question: "q".to_string(),
            context_used: true,
        });
        assert!(matches!(done[0], SessionUpdate::AnswerComplete { .. }));
        assert_eq!(tracker.live_sessions(), 0);
    }

    #[test]
    fn upload_progress_is_latest_wins_across_stages() {
        let mut tracker = SessionTracker::new();
        tracker.begin(OpCategory::Upload);

        tracker.apply(&ServerMessage::ProcessingStatus {
            progress: 25,
            status: "Extracting".to_string(),
        });
        assert_eq!(tracker.upload_progress(), Some(25));

        // Embedding restarts from a lower value; displayed, not an error.
        let updates = tracker.apply(&ServerMessage::EmbeddingStatus {
            progress: 10,
            status: "Embedding chunk 1/10".to_string(),
        });
        assert_eq!(tracker.upload_progress(), Some(10));
        assert!(matches!(
            updates[0],
            SessionUpdate::Progress {
                stage: ProgressStage::Embedding,
                progress: 10,
                ..
            }
        ));
    }

    #[test]
    fn upload_terminates_on_embedding_complete() {
        let mut tracker = SessionTracker::new();
        tracker.begin(OpCategory::Upload);

        let updates = tracker.apply(&ServerMessage::EmbeddingComplete { chunks_added: 7 });
        assert_eq!(updates, vec![SessionUpdate::Indexed { chunks_added: 7 }]);
        assert_eq!(tracker.live_sessions(), 0);
    }

    #[test]
    fn stale_search_results_win_by_arrival_time() {
        let mut tracker = SessionTracker::new();

        // "ml" issued, then "ml algorithms" before the first reply.
        tracker.begin(OpCategory::Search);
        tracker.begin(OpCategory::Search);

        // Second query's reply arrives first, first query's reply last.
        tracker.apply(&results_for("ml algorithms"));
        let updates = tracker.apply(&results_for("ml"));

        // Known race: the stale "ml" results end up displayed.
        assert_eq!(tracker.displayed_search_query(), Some("ml"));
        assert!(matches!(
            &updates[0],
            SessionUpdate::SearchResults { query, .. } if query == "ml"
        ));
    }

    #[test]
    fn error_routes_to_most_recent_session() {
        let mut tracker = SessionTracker::new();
        tracker.begin(OpCategory::Upload);
        tracker.begin(OpCategory::Question);

        let updates = tracker.apply(&ServerMessage::Error {
            message: "AI response error".to_string(),
        });
        assert_eq!(
            updates,
            vec![SessionUpdate::Failed {
                category: Some(OpCategory::Question),
                message: "AI response error".to_string(),
            }]
        );
        // The upload session is untouched.
        assert_eq!(tracker.live_sessions(), 1);
        assert!(tracker.upload_progress().is_some());
    }

    #[test]
    fn error_with_no_session_is_uncategorized() {
        let mut tracker = SessionTracker::new();
        let updates = tracker.apply(&ServerMessage::Error {
            message: "oops".to_string(),
        });
        assert_eq!(
            updates,
            vec![SessionUpdate::Failed {
                category: None,
                message: "oops".to_string(),
            }]
        );
    }

    #[test]
    fn interrupt_all_prunes_every_session() {
        let mut tracker = SessionTracker::new();
        tracker.begin(OpCategory::Upload);
        tracker.begin(OpCategory::Question);
        tracker.begin(OpCategory::Stats);

        let updates = tracker.interrupt_all();
        assert_eq!(updates.len(), 3);
        assert!(updates
            .iter()
            .all(|u| matches!(u, SessionUpdate::Interrupted { .. })));
        assert_eq!(tracker.live_sessions(), 0);

        // Idempotent: nothing left to interrupt.
        assert!(tracker.interrupt_all().is_empty());
    }

    #[test]
    fn envelopes_without_sessions_do_not_disturb_others() {
        let mut tracker = SessionTracker::new();
        tracker.begin(OpCategory::Question);
        tracker.apply(&chunk("A"));

        // Upload envelopes arrive with no upload session in flight.
        assert!(tracker
            .apply(&ServerMessage::ProcessingStatus {
                progress: 50,
                status: "x".to_string(),
            })
            .is_empty());
        assert!(tracker
            .apply(&ServerMessage::EmbeddingComplete { chunks_added: 3 })
            .is_empty());

        // The question session is exactly as it was.
        assert_eq!(tracker.answer_so_far(), Some("A"));
    }

    #[test]
    fn stats_envelope_terminates_stats_session() {
        let mut tracker = SessionTracker::new();
        tracker.begin(OpCategory::Stats);

        let updates = tracker.apply(&ServerMessage::Stats {
            total_documents: 12,
            server_port: 8080,
            active_clients: 2,
        });
        assert!(matches!(updates[0], SessionUpdate::Stats { .. }));
        assert_eq!(tracker.live_sessions(), 0);
    }

    #[test]
    fn unsolicited_stats_envelope_is_ignored() {
        let mut tracker = SessionTracker::new();
        tracker.begin(OpCategory::Question);

        let updates = tracker.apply(&ServerMessage::Stats {
            total_documents: 12,
            server_port: 8080,
            active_clients: 2,
        });
        assert!(updates.is_empty());
        // The question session is untouched.
        assert_eq!(tracker.live_sessions(), 1);
    }
}
