//! Answer generation boundary.
//!
//! The production backend is a streaming LLM; here it is a trait that
//! pushes text fragments into a channel and returns the assembled
//! response. [`ExtractiveAnswerer`] is the built-in backend: it answers
//! from the retrieved context verbatim, which keeps the streaming path
//! exercisable without any model.

use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::error::IndexError;

/// Final result of a streamed answer.
#[derive(Clone, Debug)]
pub struct Answer {
    pub response: String,
    pub context_used: bool,
}

/// Streams an answer for a question, given retrieved document context.
///
/// Implementations push fragments into `chunk_tx` in order; the returned
/// `Answer::response` must equal the concatenation of every fragment
/// sent. A dropped receiver is not an error — generation may finish
/// even if nobody is listening anymore.
#[async_trait]
pub trait AnswerEngine: Send + Sync {
    async fn stream_answer(
        &self,
        question: &str,
        context: &str,
        chunk_tx: mpsc::Sender<String>,
    ) -> Result<Answer, IndexError>;
}

/// Answers by quoting the retrieved context, streamed word by word.
pub struct ExtractiveAnswerer {
    chunk_delay: Duration,
}

impl ExtractiveAnswerer {
    pub fn new() -> Self {
        Self {
            chunk_delay: Duration::from_millis(20),
        }
    }

    /// Disable the pacing delay (used by tests).
    pub fn without_delay() -> Self {
        Self {
            chunk_delay: Duration::ZERO,
        }
    }

    fn compose(question: &str, context: &str) -> String {
        if context.trim().is_empty() {
            format!(
                "No indexed documents matched \"{question}\". \
                 Upload a document and ask again."
            )
        } else {
            format!("Based on your documents: {}", context.trim())
        }
    }
}

impl Default for ExtractiveAnswerer {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl AnswerEngine for ExtractiveAnswerer {
    async fn stream_answer(
        &self,
        question: &str,
        context: &str,
        chunk_tx: mpsc::Sender<String>,
    ) -> Result<Answer, IndexError> {
        let response = Self::compose(question, context);

        let words: Vec<&str> = response.split_inclusive(' ').collect();
        for word in words {
            if chunk_tx.send(word.to_string()).await.is_err() {
                break;
            }
            if !self.chunk_delay.is_zero() {
                tokio::time::sleep(self.chunk_delay).await;
            }
        }

        Ok(Answer {
            response,
            context_used: !context.trim().is_empty(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn chunks_concatenate_to_response() {
        let engine = ExtractiveAnswerer::without_delay();
        let (tx, mut rx) = mpsc::channel(256);

        let answer = engine
            .stream_answer("what is rust", "rust is a systems language", tx)
            .await
            .unwrap();

        let mut assembled = String::new();
        while let Some(chunk) = rx.recv().await {
            assembled.push_str(&chunk);
        }
        assert_eq!(assembled, answer.response);
        assert!(answer.context_used);
    }

    #[tokio::test]
    async fn empty_context_is_flagged() {
        let engine = ExtractiveAnswerer::without_delay();
        let (tx, mut rx) = mpsc::channel(256);

        let answer = engine.stream_answer("anything", "  ", tx).await.unwrap();
        assert!(!answer.context_used);
        assert!(answer.response.contains("anything"));

        // Drain so the channel closes cleanly
        while rx.recv().await.is_some() {}
    }

    #[tokio::test]
    async fn dropped_receiver_is_not_an_error() {
        let engine = ExtractiveAnswerer::without_delay();
        let (tx, rx) = mpsc::channel(1);
        drop(rx);

        let answer = engine.stream_answer("q", "some context", tx).await.unwrap();
        assert!(!answer.response.is_empty());
    }
}
