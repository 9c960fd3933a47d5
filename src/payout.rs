//! Terminal-result notifications to the escrow/payout collaborator.

use async_trait::async_trait;
use derive_new::new;
use serde::{Deserialize, Serialize};
use std::sync::Mutex;
use tracing::{info, instrument, warn};

use crate::error::PayoutError;

/// Fire-once notice that a match reached a terminal result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, new)]
pub struct TerminalNotice {
    /// Match identifier.
    pub match_id: String,
    /// Winner address, `None` for a draw.
    pub winner: Option<String>,
}

/// Receives terminal results. Called at most once per match.
#[async_trait]
pub trait PayoutSink: Send + Sync + std::fmt::Debug {
    /// Delivers a terminal notice.
    async fn notify(&self, notice: TerminalNotice) -> Result<(), PayoutError>;
}

/// Sink that only logs. Used when no webhook is configured.
#[derive(Debug, Default)]
pub struct LogPayout;

#[async_trait]
impl PayoutSink for LogPayout {
    #[instrument(skip(self))]
    async fn notify(&self, notice: TerminalNotice) -> Result<(), PayoutError> {
        match &notice.winner {
            Some(winner) => info!(match_id = %notice.match_id, %winner, "Payout to winner"),
            None => info!(match_id = %notice.match_id, "Draw, stakes returned"),
        }
        Ok(())
    }
}

/// Sink that POSTs the notice as JSON to an HTTP endpoint.
#[derive(Debug, Clone)]
pub struct WebhookPayout {
    url: String,
    client: reqwest::Client,
}

impl WebhookPayout {
    /// Creates a webhook sink for `url`.
    pub fn new(url: String) -> Self {
        Self {
            url,
            client: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl PayoutSink for WebhookPayout {
    #[instrument(skip(self), fields(url = %self.url))]
    async fn notify(&self, notice: TerminalNotice) -> Result<(), PayoutError> {
        let response = self.client.post(&self.url).json(&notice).send().await?;
        let status = response.status();
        if !status.is_success() {
            warn!(%status, "Payout webhook refused notice");
            return Err(PayoutError::new(format!("webhook returned {}", status)));
        }
        info!(match_id = %notice.match_id, "Payout webhook accepted notice");
        Ok(())
    }
}

/// Sink that keeps every notice in memory.
#[derive(Debug, Default)]
pub struct RecordingPayout {
    notices: Mutex<Vec<TerminalNotice>>,
}

impl RecordingPayout {
    /// Creates an empty recorder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Notices received so far, in order.
    pub fn notices(&self) -> Vec<TerminalNotice> {
        self.notices
            .lock()
            .map(|n| n.clone())
            .unwrap_or_else(|poisoned| poisoned.into_inner().clone())
    }
}

#[async_trait]
impl PayoutSink for RecordingPayout {
    async fn notify(&self, notice: TerminalNotice) -> Result<(), PayoutError> {
        self.notices
            .lock()
            .map_err(|_| PayoutError::new("recorder lock poisoned"))?
            .push(notice);
        Ok(())
    }
}
