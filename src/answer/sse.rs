use std::fmt::Display;

use bytes::Bytes;
use futures::{Stream, StreamExt};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::answer::{AnswerError, AnswerStreamEvent};
use crate::types::AnswerPayload;

/// Turns the newline-delimited answer body into events. Bytes are buffered
/// until a full line is available, so lines and UTF-8 sequences may be split
/// across network chunks.
#[derive(Debug, Default)]
pub struct SseDecoder {
    buffer: Vec<u8>,
    accumulated: String,
    tokens: usize,
    finished: bool,
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Decodes every complete line in `chunk`. Nothing is returned once the
    /// final payload has been seen.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<AnswerStreamEvent> {
        let mut events = Vec::new();
        if self.finished {
            return events;
        }
        self.buffer.extend_from_slice(chunk);
        while let Some(newline) = self.buffer.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.buffer.drain(..=newline).collect();
            if let Some(event) = self.decode_line(&line) {
                let terminal = event.is_terminal();
                events.push(event);
                if terminal {
                    self.buffer.clear();
                    break;
                }
            }
        }
        events
    }

    /// Called at end of body. Without a final payload the tokens seen so far
    /// become the answer; with no tokens either the stream is an error.
    pub fn finish(&mut self) -> Vec<AnswerStreamEvent> {
        let mut events = Vec::new();
        if self.finished {
            return events;
        }
        let rest = std::mem::take(&mut self.buffer);
        if let Some(event) = self.decode_line(&rest) {
            events.push(event);
        }
        if !self.finished {
            self.finished = true;
            if self.tokens > 0 {
                events.push(AnswerStreamEvent::Complete(std::mem::take(&mut self.accumulated)));
            } else {
                events.push(AnswerStreamEvent::Error(AnswerError::Empty));
            }
        }
        events
    }

    fn decode_line(&mut self, raw: &[u8]) -> Option<AnswerStreamEvent> {
        let line = String::from_utf8_lossy(raw);
        let line = line.trim_end_matches(['\n', '\r']);
        let data = line.strip_prefix("data:")?.trim_start();
        match serde_json::from_str::<AnswerPayload>(data) {
            Ok(AnswerPayload::Token { token }) if token.is_empty() => None,
            Ok(AnswerPayload::Token { token }) => {
                self.tokens += 1;
                self.accumulated.push_str(&token);
                Some(AnswerStreamEvent::Token(token))
            }
            Ok(AnswerPayload::Final { text }) => {
                self.finished = true;
                Some(AnswerStreamEvent::Complete(text))
            }
            Err(_) => {
                tracing::trace!("skipping answer line: {}", line);
                None
            }
        }
    }
}

/// Reads `body` until a terminal event, cancellation or a closed receiver.
/// Returning drops the body, which closes the underlying connection.
pub async fn pump<S, E>(body: S, events: mpsc::Sender<AnswerStreamEvent>, cancel: CancellationToken)
where
    S: Stream<Item = Result<Bytes, E>>,
    E: Display,
{
    let mut body = std::pin::pin!(body);
    let mut decoder = SseDecoder::new();
    loop {
        let chunk = tokio::select! {
            _ = cancel.cancelled() => {
                tracing::debug!("answer stream cancelled");
                return;
            }
            chunk = body.next() => chunk,
        };
        match chunk {
            Some(Ok(bytes)) => {
                for event in decoder.push(&bytes) {
                    if events.send(event).await.is_err() {
                        return;
                    }
                }
                if decoder.is_finished() {
                    return;
                }
            }
            Some(Err(e)) => {
                tracing::warn!("answer stream interrupted: {}", e);
                let error = AnswerError::Network(e.to_string());
                let _ = events.send(AnswerStreamEvent::Error(error)).await;
                return;
            }
            None => {
                for event in decoder.finish() {
                    if events.send(event).await.is_err() {
                        return;
                    }
                }
                return;
            }
        }
    }
}
