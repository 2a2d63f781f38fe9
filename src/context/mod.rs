//! Requirement context: the bounded text block describing what the PR is
//! supposed to implement.

pub mod store;

pub use store::{DocumentStore, FsDocumentStore, RequirementDocument};

use std::time::Duration;

use tracing::{debug, info, warn};

use crate::ticket::{self, Ticket};

/// Document text that fit the character budget.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DocumentContext {
    pub text: String,
    /// Documents whose text was included, fully or cut
    pub included: Vec<String>,
    pub omitted_documents: usize,
    pub omitted_chars: usize,
    /// Set when the document store did not answer in time
    pub timed_out: bool,
}

impl DocumentContext {
    pub fn truncated(&self) -> bool {
        self.omitted_chars > 0 || self.omitted_documents > 0
    }
}

/// Marker closing any cut context. Its text states how much was dropped.
pub fn truncation_marker(omitted_chars: usize, omitted_documents: usize) -> String {
    format!(
        "\n[... truncated: {omitted_chars} characters omitted, \
{omitted_documents} document(s) not included ...]"
    )
}

/// Take at most `max` characters from `text`.
fn take_chars(text: &str, max: usize) -> &str {
    match text.char_indices().nth(max) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

/// Concatenate documents under a header each, stopping at `max_chars`.
///
/// The document that crosses the budget is cut at the remaining budget and
/// the text ends with [`truncation_marker`]. The result never exceeds
/// `max_chars` plus the marker.
pub fn render_documents(docs: &[RequirementDocument], max_chars: usize) -> DocumentContext {
    let mut ctx = DocumentContext::default();
    let mut used = 0usize;

    for (i, doc) in docs.iter().enumerate() {
        let text = doc.text.trim_end();
        let section = format!("### Requirement document: {}\n\n{text}\n\n", doc.id);
        let len = section.chars().count();

        if used + len <= max_chars {
            ctx.text.push_str(&section);
            ctx.included.push(doc.id.clone());
            used += len;
            continue;
        }

        let remaining = max_chars - used;
        let kept = take_chars(&section, remaining);
        if !kept.is_empty() {
            ctx.text.push_str(kept);
            ctx.included.push(doc.id.clone());
            ctx.omitted_documents = docs.len() - i - 1;
        } else {
            ctx.omitted_documents = docs.len() - i;
        }
        ctx.omitted_chars = len - kept.chars().count()
            + docs[i + 1..]
                .iter()
                .map(|d| d.text.chars().count())
                .sum::<usize>();
        ctx.text
            .push_str(&truncation_marker(ctx.omitted_chars, ctx.omitted_documents));
        break;
    }

    ctx
}

/// Read requirement documents from `store` and render them within `max_chars`.
/// A store that does not answer within `timeout` yields an empty context.
pub async fn load_documents(
    store: &dyn DocumentStore,
    prefixes: &[String],
    max_chars: usize,
    timeout: Duration,
) -> DocumentContext {
    let docs = match tokio::time::timeout(timeout, store.documents(prefixes)).await {
        Ok(docs) => docs,
        Err(_) => {
            warn!(timeout_ms = timeout.as_millis() as u64, "document store timed out");
            return DocumentContext {
                timed_out: true,
                ..DocumentContext::default()
            };
        }
    };

    if docs.is_empty() {
        info!("no requirement documents found");
        return DocumentContext::default();
    }

    let ctx = render_documents(&docs, max_chars);
    info!(
        found = docs.len(),
        included = ctx.included.len(),
        omitted_chars = ctx.omitted_chars,
        "requirement documents loaded"
    );
    ctx
}

/// The formatted requirement context shared by every file prompt.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RequirementContext {
    text: String,
    documents: DocumentContext,
}

impl RequirementContext {
    /// Combine the ticket block (if any) and the document block.
    ///
    /// The ticket block lists the ticket's checklist requirements by id so the
    /// model can report coverage against them. Its description is cut at
    /// `ticket_max_chars` with a marker.
    pub fn assemble(
        ticket: Option<&Ticket>,
        ticket_max_chars: usize,
        documents: DocumentContext,
    ) -> Self {
        let mut text = String::new();

        if let Some(ticket) = ticket {
            text.push_str(&format!("## Ticket {}\n\n", ticket.key));
            text.push_str(&format!("**Summary:** {}\n\n", ticket.summary.trim()));

            let reqs = ticket::requirements(ticket);
            if !reqs.is_empty() {
                text.push_str("**Requirements to verify:**\n");
                for req in &reqs {
                    let flag = if req.mandatory { " (mandatory)" } else { "" };
                    text.push_str(&format!("- [{}]{} {}\n", req.id, flag, req.text));
                }
                text.push('\n');
            }

            let description = ticket.description.trim();
            if !description.is_empty() {
                text.push_str("**Description:**\n");
                let kept = take_chars(description, ticket_max_chars);
                text.push_str(kept);
                let omitted = description.chars().count() - kept.chars().count();
                if omitted > 0 {
                    text.push_str(&truncation_marker(omitted, 0));
                }
                text.push_str("\n\n");
            }
        }

        if !documents.text.is_empty() {
            text.push_str("## Requirement documents\n\n");
            text.push_str(&documents.text);
        }

        debug!(chars = text.chars().count(), "assembled requirement context");
        Self { text, documents }
    }

    pub fn as_str(&self) -> &str {
        &self.text
    }

    pub fn is_empty(&self) -> bool {
        self.text.is_empty()
    }

    pub fn documents(&self) -> &DocumentContext {
        &self.documents
    }
}
