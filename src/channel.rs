//! Outbound collaborator contract.
//!
//! The browser/UI automation that physically talks to a messaging surface
//! lives behind `MessageChannel`. Send failures are explicit result values,
//! never thrown control flow; the engine branches on the outcome.

use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, BufReader};

/// Outcome of one send request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SendOutcome {
    Sent,
    Failed { reason: String },
}

impl SendOutcome {
    pub fn is_sent(&self) -> bool {
        matches!(self, SendOutcome::Sent)
    }
}

#[async_trait]
pub trait MessageChannel: Send + Sync {
    /// Deliver `text` to the named contact's conversation.
    async fn send(&self, contact_name: &str, text: &str) -> SendOutcome;

    /// Raw inbound text fragments observed within the polling window. Empty
    /// when the conversation cannot be located; the caller must still
    /// attempt outreach.
    async fn receive_latest(&self, contact_name: &str, window: Duration) -> Result<Vec<String>>;
}

/// Bounded-retry wrapper: transient failures are retried with a fixed delay,
/// each failed attempt leaving a diagnostic record.
pub struct RetryingChannel<C> {
    inner: C,
    attempts: u32,
    delay: Duration,
}

impl<C: MessageChannel> RetryingChannel<C> {
    pub fn new(inner: C, attempts: u32, delay: Duration) -> Self {
        Self {
            inner,
            attempts: attempts.max(1),
            delay,
        }
    }
}

#[async_trait]
impl<C: MessageChannel> MessageChannel for RetryingChannel<C> {
    async fn send(&self, contact_name: &str, text: &str) -> SendOutcome {
        let mut last_reason = String::new();
        for attempt in 1..=self.attempts {
            match self.inner.send(contact_name, text).await {
                SendOutcome::Sent => return SendOutcome::Sent,
                SendOutcome::Failed { reason } => {
                    // Diagnostic artifact per failed attempt (the UI layer's
                    // screenshot equivalent).
                    let diagnostic = serde_json::json!({
                        "contact": contact_name,
                        "attempt": attempt,
                        "max_attempts": self.attempts,
                        "reason": reason.as_str(),
                    });
                    tracing::warn!(%diagnostic, "send attempt failed");
                    last_reason = reason;
                    if attempt < self.attempts {
                        tokio::time::sleep(self.delay).await;
                    }
                }
            }
        }
        tracing::error!(
            contact = contact_name,
            attempts = self.attempts,
            "send gave up"
        );
        SendOutcome::Failed {
            reason: last_reason,
        }
    }

    async fn receive_latest(&self, contact_name: &str, window: Duration) -> Result<Vec<String>> {
        self.inner.receive_latest(contact_name, window).await
    }
}

/// Console-backed channel: outbound messages print to stdout, inbound
/// fragments are read from stdin until an empty line or the window closes.
/// Stands in for the UI-automation layer during local runs.
pub struct ConsoleChannel;

impl ConsoleChannel {
    pub fn new() -> Self {
        Self
    }
}

impl Default for ConsoleChannel {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MessageChannel for ConsoleChannel {
    async fn send(&self, contact_name: &str, text: &str) -> SendOutcome {
        // Non-BMP characters are stripped the way the UI layer requires.
        let clean = strip_non_bmp(text);
        println!("\n➡️  [{}] {}", contact_name, clean);
        tracing::info!(contact = contact_name, "message delivered to console");
        SendOutcome::Sent
    }

    async fn receive_latest(&self, contact_name: &str, window: Duration) -> Result<Vec<String>> {
        println!(
            "\n⬅️  [{}] respostas nos próximos {}s (linha vazia encerra):",
            contact_name,
            window.as_secs()
        );

        let mut fragments = Vec::new();
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        let deadline = tokio::time::Instant::now() + window;

        loop {
            match tokio::time::timeout_at(deadline, lines.next_line()).await {
                Ok(Ok(Some(line))) => {
                    let trimmed = line.trim();
                    if trimmed.is_empty() {
                        break;
                    }
                    fragments.push(trimmed.to_string());
                }
                // EOF, read error or window elapsed all end the poll.
                Ok(Ok(None)) | Ok(Err(_)) | Err(_) => break,
            }
        }
        Ok(fragments)
    }
}

/// Keep only Basic Multilingual Plane characters; the automation surface
/// cannot type astral-plane code points.
pub fn strip_non_bmp(text: &str) -> String {
    text.chars().filter(|c| (*c as u32) <= 0xFFFF).collect()
}
