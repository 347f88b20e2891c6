use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::config::Config;
use crate::types::{AskRequest, HealthStatus};

mod sse;

pub use sse::{pump, SseDecoder};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AnswerError {
    #[error("answer service returned {status}")]
    ServiceUnavailable { status: u16 },
    #[error("network error: {0}")]
    Network(String),
    #[error("answer stream ended without any text")]
    Empty,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AnswerStreamEvent {
    Token(String),
    /// Authoritative answer. May differ from the concatenated tokens.
    Complete(String),
    Error(AnswerError),
}

impl AnswerStreamEvent {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, AnswerStreamEvent::Token(_))
    }
}

/// One-shot sequence of answer events. Closing or dropping it cancels the
/// request behind it.
pub struct AnswerStream {
    events: mpsc::Receiver<AnswerStreamEvent>,
    cancel: CancellationToken,
    done: bool,
}

impl AnswerStream {
    pub fn new(events: mpsc::Receiver<AnswerStreamEvent>, cancel: CancellationToken) -> Self {
        Self {
            events,
            cancel,
            done: false,
        }
    }

    /// Next event, or `None` after the terminal one. A producer that goes
    /// away without a terminal event ends the stream as well.
    pub async fn next_event(&mut self) -> Option<AnswerStreamEvent> {
        if self.done {
            return None;
        }
        let event = self.events.recv().await;
        match &event {
            Some(event) if !event.is_terminal() => {}
            _ => self.close(),
        }
        event
    }

    pub fn close(&mut self) {
        if !self.done {
            self.done = true;
            self.cancel.cancel();
            self.events.close();
        }
    }
}

impl Drop for AnswerStream {
    fn drop(&mut self) {
        self.close();
    }
}

#[async_trait]
pub trait AnswerSource: Send + Sync {
    /// Starts answering `question`. Failures surface as a terminal
    /// [`AnswerStreamEvent::Error`].
    fn ask(&self, question: &str, cancel: &CancellationToken) -> AnswerStream;

    async fn health(&self) -> Result<HealthStatus, AnswerError>;
}

/// Client of the retrieval-augmented answer backend.
pub struct RagClient {
    http: reqwest::Client,
    base_url: String,
    capacity: usize,
}

impl RagClient {
    pub fn new(http: reqwest::Client, base_url: &str) -> Self {
        Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            capacity: 64,
        }
    }

    pub fn from_config(http: reqwest::Client, config: &Config) -> Self {
        Self::new(http, config.rag_backend_url())
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }
}

#[async_trait]
impl AnswerSource for RagClient {
    fn ask(&self, question: &str, cancel: &CancellationToken) -> AnswerStream {
        let cancel = cancel.child_token();
        let (tx, rx) = mpsc::channel(self.capacity);
        let request = self
            .http
            .post(format!("{}/ask", self.base_url))
            .header(reqwest::header::ACCEPT, "text/event-stream")
            .json(&AskRequest::new(question));

        let task_cancel = cancel.clone();
        tokio::spawn(async move {
            let response = tokio::select! {
                _ = task_cancel.cancelled() => return,
                response = request.send() => response,
            };
            let event = match response {
                Ok(response) if response.status().is_success() => {
                    pump(response.bytes_stream(), tx, task_cancel).await;
                    return;
                }
                Ok(response) => {
                    tracing::warn!("answer backend returned {}", response.status());
                    AnswerStreamEvent::Error(AnswerError::ServiceUnavailable {
                        status: response.status().as_u16(),
                    })
                }
                Err(e) => {
                    tracing::warn!("answer backend unreachable: {}", e);
                    AnswerStreamEvent::Error(AnswerError::Network(e.to_string()))
                }
            };
            let _ = tx.send(event).await;
        });

        AnswerStream::new(rx, cancel)
    }

    async fn health(&self) -> Result<HealthStatus, AnswerError> {
        let response = self
            .http
            .get(format!("{}/health", self.base_url))
            .send()
            .await
            .map_err(|e| AnswerError::Network(e.to_string()))?;
        if !response.status().is_success() {
            return Err(AnswerError::ServiceUnavailable {
                status: response.status().as_u16(),
            });
        }
        response
            .json::<HealthStatus>()
            .await
            .map_err(|e| AnswerError::Network(e.to_string()))
    }
}
