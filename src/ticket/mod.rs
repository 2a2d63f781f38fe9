//! Ticket resolution and loading.

pub mod client;
pub mod types;

pub use client::{HttpTrackerClient, TrackerClient};
pub use types::{FailureReason, Requirement, Ticket, TicketFailure, TicketKey, TicketStatus};

use std::sync::LazyLock;
use std::time::Duration;

use regex::Regex;
use tracing::{debug, info, warn};

// `_` and `/` count as separators, so no `\b` anchors here.
static TICKET_KEY_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?:^|[^A-Z0-9])([A-Z][A-Z0-9]+-[0-9]+)").expect("valid ticket key regex")
});

static ACCEPTANCE_HEADING_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?im)^\W*(acceptance criteria|acceptance|ac)\b\W*$").expect("valid heading regex")
});

static MANDATORY_MARKER_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)[\[(](mandatory|required)[\])]").expect("valid marker regex")
});

/// Most acceptance-criteria items taken from one description.
const MAX_CRITERIA: usize = 20;

fn find_key(text: &str) -> Option<TicketKey> {
    let upper = text.to_ascii_uppercase();
    TICKET_KEY_RE
        .captures(&upper)
        .and_then(|caps| caps.get(1))
        .map(|m| TicketKey(m.as_str().to_string()))
}

/// Resolve the ticket key governing a PR.
///
/// The branch name is checked first, then the PR title, then each commit
/// message in order. The first match wins.
pub fn resolve(branch: &str, title: &str, commit_messages: &[String]) -> Option<TicketKey> {
    if let Some(key) = find_key(branch) {
        debug!(%key, source = "branch name", "resolved ticket key");
        return Some(key);
    }
    if let Some(key) = find_key(title) {
        debug!(%key, source = "PR title", "resolved ticket key");
        return Some(key);
    }
    for (i, message) in commit_messages.iter().enumerate() {
        if let Some(key) = find_key(message) {
            debug!(%key, source = "commit message", index = i, "resolved ticket key");
            return Some(key);
        }
    }
    None
}

/// Fetch a ticket, bounded by `timeout`. All failures come back as a
/// [`TicketFailure`]; the caller decides whether to continue without it.
pub async fn load_ticket(
    client: &dyn TrackerClient,
    key: &TicketKey,
    timeout: Duration,
) -> Result<Ticket, TicketFailure> {
    let result = match tokio::time::timeout(timeout, client.fetch(key)).await {
        Ok(result) => result,
        Err(_) => Err(TicketFailure {
            key: key.to_string(),
            reason: FailureReason::Timeout,
            detail: format!("no response within {}ms", timeout.as_millis()),
        }),
    };

    match &result {
        Ok(ticket) => info!(key = %ticket.key, subtasks = ticket.subtasks.len(), "ticket loaded"),
        Err(failure) => warn!(
            %key,
            reason = %failure.reason,
            detail = %failure.detail,
            "ticket unavailable"
        ),
    }
    result
}

/// Derive the checklist requirements of a ticket: its subtasks first, then
/// acceptance criteria from the description.
///
/// Criteria come from an "Acceptance Criteria" section when the description
/// has one, otherwise from the description's bullets and sentences.
pub fn requirements(ticket: &Ticket) -> Vec<Requirement> {
    let mut out: Vec<Requirement> = ticket
        .subtasks
        .iter()
        .map(|s| Requirement {
            id: s.key.clone(),
            text: s.summary.trim().to_string(),
            mandatory: s.mandatory,
        })
        .collect();

    let criteria = acceptance_criteria(&ticket.description);
    out.extend(criteria.into_iter().enumerate().map(|(i, text)| Requirement {
        id: format!("AC-{}", i + 1),
        mandatory: MANDATORY_MARKER_RE.is_match(&text),
        text: MANDATORY_MARKER_RE.replace_all(&text, "").trim().to_string(),
    }));
    out
}

fn acceptance_criteria(description: &str) -> Vec<String> {
    let section = match ACCEPTANCE_HEADING_RE.find(description) {
        Some(heading) => {
            let rest = &description[heading.end()..];
            // the section ends at the first blank line after some content
            let trimmed = rest.trim_start_matches(['\r', '\n']);
            trimmed.split("\n\n").next().unwrap_or_default()
        }
        None => description,
    };

    let mut items = Vec::new();
    for line in section.lines() {
        let line = line
            .trim()
            .trim_start_matches(['-', '*', '•'])
            .trim_start_matches(|c: char| c.is_ascii_digit() || c == '.' || c == ')')
            .trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        for sentence in line.split_inclusive(". ") {
            let sentence = sentence.trim().trim_end_matches('.').trim();
            if sentence.split_whitespace().count() >= 3 {
                items.push(sentence.to_string());
            }
        }
    }
    items.truncate(MAX_CRITERIA);
    items
}
