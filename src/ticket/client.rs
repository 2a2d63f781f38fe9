use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::{debug, instrument};

use super::types::{FailureReason, Ticket, TicketFailure, TicketKey};
use crate::config::TrackerConfig;

/// Issue-tracker lookup by key.
#[async_trait]
pub trait TrackerClient: Send + Sync {
    async fn fetch(&self, key: &TicketKey) -> Result<Ticket, TicketFailure>;
}

/// Client for the internal tracker webhook API:
/// `GET {base_url}/getissuedetail/{project_id}/{key}`.
pub struct HttpTrackerClient {
    client: reqwest::Client,
    base_url: String,
    project_id: String,
    timeout: Duration,
}

#[derive(Deserialize)]
struct Envelope {
    status: String,
    #[serde(default)]
    message: Option<String>,
    data: Option<Ticket>,
}

impl HttpTrackerClient {
    /// Returns None when the tracker is not configured.
    pub fn from_config(config: &TrackerConfig) -> Option<Self> {
        if !config.enabled() {
            return None;
        }
        Some(Self {
            client: reqwest::Client::new(),
            base_url: config.base_url.trim_end_matches('/').to_string(),
            project_id: config.project_id.clone().unwrap_or_default(),
            timeout: config.timeout(),
        })
    }

    fn issue_url(&self, key: &TicketKey) -> String {
        format!("{}/getissuedetail/{}/{}", self.base_url, self.project_id, key)
    }
}

fn failure(key: &TicketKey, reason: FailureReason, detail: impl Into<String>) -> TicketFailure {
    TicketFailure {
        key: key.to_string(),
        reason,
        detail: detail.into(),
    }
}

fn classify_status(status: reqwest::StatusCode) -> FailureReason {
    match status.as_u16() {
        404 => FailureReason::NotFound,
        401 | 403 => FailureReason::Unauthorized,
        408 | 504 => FailureReason::Timeout,
        _ => FailureReason::Unknown,
    }
}

#[async_trait]
impl TrackerClient for HttpTrackerClient {
    #[instrument(skip(self), fields(key = %key))]
    async fn fetch(&self, key: &TicketKey) -> Result<Ticket, TicketFailure> {
        let url = self.issue_url(key);
        debug!(%url, "fetching ticket");

        let response = self
            .client
            .get(&url)
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| {
                let reason = if e.is_timeout() {
                    FailureReason::Timeout
                } else {
                    FailureReason::Unknown
                };
                failure(key, reason, e.to_string())
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(failure(key, classify_status(status), format!("HTTP {status}")));
        }

        let envelope: Envelope = response
            .json()
            .await
            .map_err(|e| failure(key, FailureReason::Unknown, e.to_string()))?;

        match (envelope.status.as_str(), envelope.data) {
            ("success", Some(ticket)) => Ok(ticket),
            ("error", _) => Err(failure(
                key,
                FailureReason::NotFound,
                envelope.message.unwrap_or_else(|| "tracker returned error".to_string()),
            )),
            _ => Err(failure(key, FailureReason::Unknown, "unexpected response format")),
        }
    }
}
