use serde::Deserialize;
use thiserror::Error;

/// An issue-tracker key such as `SEC-406`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TicketKey(pub(crate) String);

impl std::fmt::Display for TicketKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// A ticket as normalized from the tracker response.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Ticket {
    pub key: String,
    #[serde(default)]
    pub summary: String,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub description: String,
    #[serde(default)]
    pub subtasks: Vec<Subtask>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Subtask {
    pub key: String,
    #[serde(default)]
    pub summary: String,
    /// Set when the tracker marks the subtask as required for completion
    #[serde(default, alias = "required")]
    pub mandatory: bool,
}

fn null_as_empty<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: serde::Deserializer<'de>,
{
    Ok(Option::<String>::deserialize(deserializer)?.unwrap_or_default())
}

/// One verifiable item derived from a ticket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Requirement {
    /// Subtask key, or `AC-n` for acceptance criteria taken from the description
    pub id: String,
    pub text: String,
    pub mandatory: bool,
}

/// Why a ticket could not be loaded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureReason {
    NotFound,
    Unauthorized,
    Timeout,
    Unknown,
}

impl std::fmt::Display for FailureReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FailureReason::NotFound => write!(f, "not_found"),
            FailureReason::Unauthorized => write!(f, "unauthorized"),
            FailureReason::Timeout => write!(f, "timeout"),
            FailureReason::Unknown => write!(f, "unknown"),
        }
    }
}

#[derive(Debug, Clone, Error)]
#[error("ticket {key} unavailable: {reason}")]
pub struct TicketFailure {
    pub key: String,
    pub reason: FailureReason,
    /// Diagnostic detail for logs; never published.
    pub detail: String,
}

/// Where ticket association stands for one run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TicketStatus {
    /// No tracker configured; a key may still have been resolved.
    NotConfigured { key: Option<TicketKey> },
    /// Tracker configured but no key found in branch, title or commits.
    NoKey,
    Loaded(Ticket),
    Unavailable { key: TicketKey, reason: FailureReason },
}

impl TicketStatus {
    pub fn ticket(&self) -> Option<&Ticket> {
        match self {
            TicketStatus::Loaded(ticket) => Some(ticket),
            _ => None,
        }
    }

    /// One line describing the ticket context, suitable for the summary.
    pub fn describe(&self) -> String {
        match self {
            TicketStatus::NotConfigured { key: Some(key) } => {
                format!("ticket {key} referenced; issue tracker not configured")
            }
            TicketStatus::NotConfigured { key: None } => "issue tracker not configured".to_string(),
            TicketStatus::NoKey => "no ticket key found in branch, title or commits".to_string(),
            TicketStatus::Loaded(ticket) => format!("ticket {} loaded", ticket.key),
            TicketStatus::Unavailable { key, reason } => {
                format!("ticket context unavailable: {reason} ({key})")
            }
        }
    }
}
