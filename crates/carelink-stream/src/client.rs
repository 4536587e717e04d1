use crate::decoder::StreamTokenDecoder;
use carelink_core::{StreamError, StreamEvent, TokenProvider};
use futures_util::StreamExt;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;

#[derive(Serialize)]
struct AskRequest<'a> {
    message: &'a str,
}

/// How a decode attempt ended when it did not fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamOutcome {
    Completed,
    Cancelled,
}

#[derive(Debug)]
pub struct ReplySummary {
    pub outcome: StreamOutcome,
    pub visible_text: String,
}

/// Client for the assistant's streaming reply endpoint.
///
/// Each call to [`stream`](Self::stream) is one decode attempt with a fresh
/// decoder; a failed or cancelled attempt cannot corrupt a later one. Retry
/// policy belongs to the caller.
pub struct ReplyStream {
    client: reqwest::Client,
    endpoint: String,
    token: Arc<dyn TokenProvider>,
}

impl ReplyStream {
    pub fn new(endpoint: impl Into<String>, token: Arc<dyn TokenProvider>) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint: endpoint.into(),
            token,
        }
    }

    /// Send a prompt and decode the pushed reply until it terminates, fails,
    /// or `cancel` is raised. Events are forwarded in arrival order.
    pub async fn stream(
        &self,
        message: &str,
        events: mpsc::UnboundedSender<StreamEvent>,
        cancel: Arc<AtomicBool>,
    ) -> Result<ReplySummary, StreamError> {
        let mut request = self
            .client
            .post(&self.endpoint)
            .json(&AskRequest { message });
        if let Some(token) = self.token.bearer_token() {
            request = request.bearer_auth(token);
        }

        let response = request
            .send()
            .await
            .map_err(|e| StreamError::Transport(e.to_string()))?;
        let status = response.status();
        if !status.is_success() {
            return Err(StreamError::Status(status.as_u16()));
        }

        let mut decoder = StreamTokenDecoder::new();
        let mut body = response.bytes_stream();

        while let Some(chunk) = body.next().await {
            if cancel.load(Ordering::Relaxed) {
                tracing::debug!("reply stream cancelled by caller");
                return Ok(ReplySummary {
                    outcome: StreamOutcome::Cancelled,
                    visible_text: decoder.visible_text().to_string(),
                });
            }
            let chunk = chunk.map_err(|e| StreamError::Transport(e.to_string()))?;
            for event in decoder.feed(&chunk) {
                let _ = events.send(event);
            }
            if decoder.is_finished() {
                break;
            }
        }

        Ok(ReplySummary {
            outcome: StreamOutcome::Completed,
            visible_text: decoder.visible_text().to_string(),
        })
    }
}
