pub mod types;

pub use types::{ChecklistEntry, ReviewSummary, Verdict};

use std::path::Path;

use colored::Colorize;
use thiserror::Error;
use tracing::{debug, info, instrument};

use crate::config::MissingRequirementPolicy;
use crate::context::RequirementContext;
use crate::review::{
    FileOutcome, FileReviewResult, Finding, RequirementCoverage, RequirementStatus, Severity,
};
use crate::ticket::{self, Requirement, TicketStatus};

#[derive(Debug, Error)]
pub enum ReportError {
    #[error("Failed to write report file: {0}")]
    FileWrite(#[from] std::io::Error),
}

/// Hidden marker carried by every comment this tool posts, so a later run
/// can find and delete them.
pub const COMMENT_MARKER: &str = "<!-- pr-reviewer -->";

/// Append [`COMMENT_MARKER`] to a comment body.
pub fn tagged(body: &str) -> String {
    format!("{}\n\n{COMMENT_MARKER}\n", body.trim_end())
}

/// Comment posted instead of a review when a ticket is required but none
/// could be resolved.
pub const TICKET_REQUIRED_COMMENT: &str = "## Ticket Required

This PR does not reference a ticket. Add a ticket key to one of:

- **PR title** (e.g. `PROJ-123: Add login feature`)
- **Branch name** (e.g. `feature/PROJ-123-login`)
- **Commit message** (e.g. `PROJ-123: Implement login`)

Ticket keys look like `PROJ-123` or `ABC-456`.

Once a ticket is detected, the review checks the changes against its requirements and
acceptance criteria.
";

/// Comment posted when the run cannot start for lack of configuration.
pub fn configuration_missing_comment(what: &str) -> String {
    format!(
        "## Review Not Run\n\nThe automated review could not start: {what} is not configured.\n"
    )
}

/// Words too common to say anything about a requirement.
const STOPWORDS: &[&str] = &[
    "that", "this", "with", "from", "into", "must", "should", "shall", "will", "have", "when",
    "then", "them", "they", "their", "there", "which", "where", "while", "each", "every", "only",
    "also", "been", "being", "more", "than", "some", "such", "user", "users", "data", "make",
    "sure",
];

fn keywords(text: &str) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    for word in text
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| w.chars().count() >= 4)
        .map(str::to_lowercase)
    {
        if !STOPWORDS.contains(&word.as_str()) && !out.contains(&word) {
            out.push(word);
        }
    }
    out
}

/// A coverage entry names a requirement by id (optionally followed by its
/// text) or by its exact text.
fn coverage_matches(coverage: &RequirementCoverage, requirement: &Requirement) -> bool {
    let named = coverage.requirement.trim();
    let head = named
        .split(|c: char| c.is_whitespace() || c == ':')
        .next()
        .unwrap_or_default()
        .trim_matches(|c| c == '[' || c == ']');
    head.eq_ignore_ascii_case(&requirement.id)
        || named.eq_ignore_ascii_case(requirement.text.trim())
}

fn checklist_status(
    requirement: &Requirement,
    results: &[&FileReviewResult],
    haystack: &str,
) -> RequirementStatus {
    let reported = results
        .iter()
        .flat_map(|r| &r.coverage)
        .filter(|c| coverage_matches(c, requirement))
        .map(|c| c.status)
        .max();
    if let Some(status) = reported {
        return status;
    }

    let words = keywords(&requirement.text);
    if !words.is_empty() && words.iter().all(|w| haystack.contains(w.as_str())) {
        RequirementStatus::Partial
    } else {
        RequirementStatus::Missing
    }
}

fn build_checklist(status: &TicketStatus, results: &[&FileReviewResult]) -> Vec<ChecklistEntry> {
    let Some(ticket) = status.ticket() else {
        return Vec::new();
    };

    let haystack = results
        .iter()
        .flat_map(|r| {
            let messages = r.findings.iter().map(|f| f.message.as_str());
            std::iter::once(r.assessment.as_str()).chain(messages)
        })
        .collect::<Vec<_>>()
        .join("\n")
        .to_lowercase();

    ticket::requirements(ticket)
        .into_iter()
        .map(|req| ChecklistEntry {
            status: checklist_status(&req, results, &haystack),
            id: req.id,
            requirement: req.text,
            mandatory: req.mandatory,
        })
        .collect()
}

fn build_document_notes(
    results: &[&FileReviewResult],
    context: &RequirementContext,
) -> Vec<String> {
    let mut notes: Vec<String> = Vec::new();
    for note in results.iter().flat_map(|r| &r.document_notes) {
        if !notes.contains(note) {
            notes.push(note.clone());
        }
    }

    let docs = context.documents();
    if !docs.included.is_empty() {
        notes.push(format!(
            "Checked against {} requirement document(s): {}",
            docs.included.len(),
            docs.included.join(", ")
        ));
    }
    if docs.truncated() {
        notes.push(format!(
            "Requirement documents truncated: {} characters omitted, {} document(s) not included",
            docs.omitted_chars, docs.omitted_documents
        ));
    }
    notes
}

fn build_notices(
    outcomes: &[FileOutcome],
    status: &TicketStatus,
    context: &RequirementContext,
) -> Vec<String> {
    let mut notices = Vec::new();
    if let TicketStatus::Unavailable { .. } = status {
        notices.push(status.describe());
    }
    if context.documents().timed_out {
        notices.push("requirement documents unavailable: timeout".to_string());
    }
    for outcome in outcomes {
        match outcome {
            FileOutcome::NotReviewed { path, reason } => {
                notices.push(format!("{path}: not reviewed ({reason})"));
            }
            FileOutcome::Reviewed(result) if result.unstructured => {
                notices.push(format!(
                    "{}: response could not be parsed, raw output kept",
                    result.path
                ));
            }
            FileOutcome::Reviewed(_) => {}
        }
    }
    notices
}

/// Combine per-file outcomes, ticket state and requirement context into the
/// PR-level summary and verdict.
///
/// A critical finding anywhere requests changes. With a loaded ticket, a
/// `missing` checklist entry also requests changes when `policy` says it
/// blocks. Files that were not reviewed are reported but do not change the
/// verdict.
#[instrument(skip_all, fields(files = outcomes.len()))]
pub fn aggregate(
    outcomes: Vec<FileOutcome>,
    status: &TicketStatus,
    context: &RequirementContext,
    policy: MissingRequirementPolicy,
) -> ReviewSummary {
    let results: Vec<&FileReviewResult> = outcomes.iter().filter_map(FileOutcome::result).collect();

    let checklist = build_checklist(status, &results);
    let document_notes = build_document_notes(&results, context);
    let notices = build_notices(&outcomes, status, context);

    let has_critical = results.iter().any(|r| r.has_critical());
    let blocking_missing = checklist.iter().any(|entry| {
        entry.status == RequirementStatus::Missing
            && match policy {
                MissingRequirementPolicy::Always => true,
                MissingRequirementPolicy::MandatoryOnly => entry.mandatory,
            }
    });

    let verdict = if has_critical || blocking_missing {
        Verdict::ChangesRequested
    } else {
        Verdict::Approve
    };
    debug!(has_critical, blocking_missing, %verdict, "computed verdict");

    ReviewSummary {
        ticket_line: status.describe(),
        files: outcomes,
        checklist,
        document_notes,
        notices,
        verdict,
    }
}

/// Body of an inline comment for one finding.
pub fn inline_comment_body(finding: &Finding) -> String {
    let mut body = format!("**[{}] {}**: {}", finding.severity, finding.category, finding.message);
    if let Some(suggestion) = &finding.suggestion {
        body.push_str(&format!("\n\n**Suggestion:** {suggestion}"));
    }
    body
}

/// Render the summary comment.
pub fn render_markdown(summary: &ReviewSummary) -> String {
    let mut md = String::new();
    md.push_str("## Code Review Summary\n\n");
    md.push_str(&format!("**Verdict:** {}\n\n", summary.verdict));
    md.push_str(&format!("**Ticket:** {}\n\n", summary.ticket_line));
    md.push_str(&format!(
        "**Files:** {} of {} reviewed | **Critical findings:** {}\n\n",
        summary.reviewed_count(),
        summary.files.len(),
        summary.critical_count()
    ));

    if !summary.notices.is_empty() {
        md.push_str("### Notices\n\n");
        for notice in &summary.notices {
            md.push_str(&format!("- {notice}\n"));
        }
        md.push('\n');
    }

    if !summary.checklist.is_empty() {
        md.push_str("### Requirement Checklist\n\n");
        md.push_str("| ID | Requirement | Status |\n|---|---|---|\n");
        for entry in &summary.checklist {
            let flag = if entry.mandatory { " (mandatory)" } else { "" };
            md.push_str(&format!(
                "| {} | {}{} | {} |\n",
                entry.id,
                entry.requirement.replace('|', "\\|"),
                flag,
                entry.status
            ));
        }
        md.push('\n');
    }

    if !summary.document_notes.is_empty() {
        md.push_str("### Requirement Documents\n\n");
        for note in &summary.document_notes {
            md.push_str(&format!("- {note}\n"));
        }
        md.push('\n');
    }

    md.push_str("### Files\n\n");
    if summary.files.is_empty() {
        md.push_str("No reviewable files in this PR.\n");
    }
    for outcome in &summary.files {
        match outcome {
            FileOutcome::NotReviewed { path, reason } => {
                md.push_str(&format!("#### `{path}`\n\nNot reviewed: {reason}\n\n"));
            }
            FileOutcome::Reviewed(result) => {
                md.push_str(&format!("#### `{}`\n\n", result.path));
                if !result.assessment.is_empty() {
                    md.push_str(&format!("{}\n\n", result.assessment));
                }
                if result.findings.is_empty() {
                    md.push_str("No findings.\n\n");
                    continue;
                }
                for finding in &result.findings {
                    let location = finding.line.map(|l| format!(" (line {l})")).unwrap_or_default();
                    md.push_str(&format!(
                        "- **[{}]** ({}) {}{}\n",
                        finding.severity, finding.category, finding.message, location
                    ));
                    if let Some(suggestion) = &finding.suggestion {
                        md.push_str(&format!("  - Suggestion: {suggestion}\n"));
                    }
                }
                md.push('\n');
            }
        }
    }

    md
}

/// Print the summary to the terminal (default) or write markdown to a file.
#[instrument(skip(summary), fields(verdict = %summary.verdict))]
pub fn output(summary: &ReviewSummary, output_path: Option<&Path>) -> Result<(), ReportError> {
    match output_path {
        None => {
            debug!("writing summary to terminal");
            print_terminal_report(summary);
            Ok(())
        }
        Some(path) => {
            debug!(path = %path.display(), "writing summary to file");
            std::fs::write(path, render_markdown(summary))?;
            info!(path = %path.display(), "summary written");
            Ok(())
        }
    }
}

fn print_terminal_report(summary: &ReviewSummary) {
    println!();
    println!("Ticket: {}", summary.ticket_line);
    println!(
        "Files reviewed: {} of {}",
        summary.reviewed_count(),
        summary.files.len()
    );
    println!();

    for notice in &summary.notices {
        println!("{} {}", "!".yellow().bold(), notice);
    }
    if !summary.notices.is_empty() {
        println!();
    }

    if !summary.checklist.is_empty() {
        println!("═══ Requirement Checklist ═══");
        for entry in &summary.checklist {
            println!("  [{}] {} {}", colorize_status(entry.status), entry.id, entry.requirement);
        }
        println!();
    }

    for outcome in &summary.files {
        println!("═══ {} ═══", outcome.path());
        match outcome {
            FileOutcome::NotReviewed { reason, .. } => println!("  Not reviewed: {reason}"),
            FileOutcome::Reviewed(result) if result.findings.is_empty() => {
                println!("  No findings.")
            }
            FileOutcome::Reviewed(result) => {
                for finding in &result.findings {
                    let location = finding.line.map(|l| format!(" (line {l})")).unwrap_or_default();
                    println!(
                        "  • [{}] {}{}",
                        colorize_severity(finding.severity),
                        finding.message,
                        location
                    );
                }
            }
        }
        println!();
    }

    for note in &summary.document_notes {
        println!("  {note}");
    }

    let verdict = match summary.verdict {
        Verdict::Approve => summary.verdict.to_string().green().bold(),
        Verdict::ChangesRequested => summary.verdict.to_string().red().bold(),
    };
    println!("═══ Verdict: {verdict} ═══");
    println!();
}

fn colorize_severity(severity: Severity) -> colored::ColoredString {
    match severity {
        Severity::Critical => "CRITICAL".red().bold(),
        Severity::Warning => "WARNING".yellow().bold(),
        Severity::Info => "INFO".blue(),
    }
}

fn colorize_status(status: RequirementStatus) -> colored::ColoredString {
    match status {
        RequirementStatus::Met => "met".green(),
        RequirementStatus::Partial => "partial".yellow(),
        RequirementStatus::Missing => "missing".red(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::{render_documents, DocumentContext, RequirementDocument};
    use crate::ticket::types::Subtask;
    use crate::ticket::{FailureReason, Ticket, TicketKey};

    fn finding(severity: Severity, message: &str) -> Finding {
        Finding {
            severity,
            category: "security".to_string(),
            message: message.to_string(),
            line: Some(12),
            suggestion: None,
        }
    }

    fn reviewed(path: &str, findings: Vec<Finding>, assessment: &str) -> FileOutcome {
        FileOutcome::Reviewed(FileReviewResult {
            path: path.to_string(),
            findings,
            assessment: assessment.to_string(),
            coverage: vec![],
            document_notes: vec![],
            unstructured: false,
        })
    }

    fn ticket_status() -> TicketStatus {
        TicketStatus::Loaded(Ticket {
            key: "SEC-406".to_string(),
            summary: "Payments".to_string(),
            description: String::new(),
            subtasks: vec![
                Subtask {
                    key: "SEC-406-1".to_string(),
                    summary: "Validate card input".to_string(),
                    mandatory: false,
                },
                Subtask {
                    key: "SEC-406-2".to_string(),
                    summary: "Persist payments atomically".to_string(),
                    mandatory: true,
                },
            ],
        })
    }

    fn empty_context() -> RequirementContext {
        RequirementContext::default()
    }

    #[test]
    fn test_critical_finding_requests_changes() {
        let outcomes = vec![
            reviewed("a.py", vec![finding(Severity::Info, "nit")], "fine"),
            reviewed("b.py", vec![finding(Severity::Critical, "SQL injection")], "unsafe"),
        ];
        let summary = aggregate(
            outcomes,
            &TicketStatus::NotConfigured { key: None },
            &empty_context(),
            MissingRequirementPolicy::Always,
        );
        assert_eq!(summary.verdict, Verdict::ChangesRequested);
        assert!(summary.checklist.is_empty());
    }

    #[test]
    fn test_clean_review_without_ticket_approves() {
        let summary = aggregate(
            vec![reviewed("a.py", vec![finding(Severity::Warning, "slow")], "ok")],
            &TicketStatus::NoKey,
            &empty_context(),
            MissingRequirementPolicy::Always,
        );
        assert_eq!(summary.verdict, Verdict::Approve);
        assert_eq!(summary.ticket_line, "no ticket key found in branch, title or commits");
    }

    #[test]
    fn test_explicit_coverage_best_status_wins() {
        let mut a = FileReviewResult {
            path: "a.py".to_string(),
            findings: vec![],
            assessment: String::new(),
            coverage: vec![RequirementCoverage {
                requirement: "SEC-406-1".to_string(),
                status: RequirementStatus::Missing,
            }],
            document_notes: vec![],
            unstructured: false,
        };
        let mut b = a.clone();
        b.path = "b.py".to_string();
        b.coverage = vec![
            RequirementCoverage {
                requirement: "sec-406-1: Validate card input".to_string(),
                status: RequirementStatus::Met,
            },
            RequirementCoverage {
                requirement: "Persist payments atomically".to_string(),
                status: RequirementStatus::Partial,
            },
        ];
        a.coverage.push(RequirementCoverage {
            requirement: "SEC-406-2".to_string(),
            status: RequirementStatus::Missing,
        });

        let summary = aggregate(
            vec![FileOutcome::Reviewed(a), FileOutcome::Reviewed(b)],
            &ticket_status(),
            &empty_context(),
            MissingRequirementPolicy::Always,
        );
        assert_eq!(summary.checklist[0].status, RequirementStatus::Met);
        assert_eq!(summary.checklist[1].status, RequirementStatus::Partial);
        assert_eq!(summary.verdict, Verdict::Approve);
    }

    #[test]
    fn test_keyword_heuristic_gives_partial() {
        let outcomes = vec![reviewed(
            "payments.py",
            vec![],
            "Validate card input before charging.",
        )];
        let summary = aggregate(
            outcomes,
            &ticket_status(),
            &empty_context(),
            MissingRequirementPolicy::Always,
        );
        assert_eq!(summary.checklist[0].status, RequirementStatus::Partial);
        assert_eq!(summary.checklist[1].status, RequirementStatus::Missing);
        assert_eq!(summary.verdict, Verdict::ChangesRequested);
    }

    #[test]
    fn test_mandatory_only_policy() {
        let assessment = "Persist payments atomically in one transaction.";
        let outcomes = vec![reviewed("payments.py", vec![], assessment)];
        let summary = aggregate(
            outcomes,
            &ticket_status(),
            &empty_context(),
            MissingRequirementPolicy::MandatoryOnly,
        );
        assert_eq!(summary.checklist[0].status, RequirementStatus::Missing);
        assert!(!summary.checklist[0].mandatory);
        assert_eq!(summary.checklist[1].status, RequirementStatus::Partial);
        assert_eq!(summary.verdict, Verdict::Approve);
    }

    #[test]
    fn test_not_reviewed_and_unavailable_ticket_are_noticed() {
        let status = TicketStatus::Unavailable {
            key: TicketKey("SEC-406".to_string()),
            reason: FailureReason::Timeout,
        };
        let outcomes = vec![
            FileOutcome::NotReviewed {
                path: "a.py".to_string(),
                reason: "timeout".to_string(),
            },
            reviewed("b.py", vec![], "ok"),
        ];
        let summary = aggregate(
            outcomes,
            &status,
            &empty_context(),
            MissingRequirementPolicy::Always,
        );
        assert_eq!(summary.verdict, Verdict::Approve);
        assert!(summary.checklist.is_empty());
        assert_eq!(summary.notices[0], "ticket context unavailable: timeout (SEC-406)");
        assert_eq!(summary.notices[1], "a.py: not reviewed (timeout)");
        assert_eq!(summary.files[0].path(), "a.py");
    }

    #[test]
    fn test_document_notes_dedup_and_truncation() {
        let mut result = FileReviewResult {
            path: "a.py".to_string(),
            findings: vec![],
            assessment: String::new(),
            coverage: vec![],
            document_notes: vec!["Logging matches SRS 3.1".to_string()],
            unstructured: false,
        };
        let other = FileOutcome::Reviewed(result.clone());
        result.path = "b.py".to_string();

        let docs = render_documents(
            &[
                RequirementDocument {
                    id: "docs/srs.md".to_string(),
                    text: "x".repeat(100),
                },
                RequirementDocument {
                    id: "docs/extra.md".to_string(),
                    text: "y".repeat(100),
                },
            ],
            150,
        );
        let context = RequirementContext::assemble(None, 100, docs);
        let summary = aggregate(
            vec![other, FileOutcome::Reviewed(result)],
            &TicketStatus::NoKey,
            &context,
            MissingRequirementPolicy::Always,
        );
        assert_eq!(summary.document_notes[0], "Logging matches SRS 3.1");
        assert!(summary.document_notes[1].starts_with("Checked against 2 requirement document(s)"));
        assert!(summary.document_notes[2].starts_with("Requirement documents truncated"));
        assert_eq!(summary.document_notes.len(), 3);
    }

    #[test]
    fn test_document_timeout_notice() {
        let context = RequirementContext::assemble(
            None,
            100,
            DocumentContext {
                timed_out: true,
                ..DocumentContext::default()
            },
        );
        let summary = aggregate(
            vec![],
            &TicketStatus::NoKey,
            &context,
            MissingRequirementPolicy::Always,
        );
        assert_eq!(summary.notices, vec!["requirement documents unavailable: timeout"]);
    }

    #[test]
    fn test_render_markdown() {
        let outcomes = vec![
            reviewed("b.py", vec![finding(Severity::Critical, "SQL injection")], "unsafe"),
            FileOutcome::NotReviewed {
                path: "c.py".to_string(),
                reason: "http_503".to_string(),
            },
        ];
        let summary = aggregate(
            outcomes,
            &ticket_status(),
            &empty_context(),
            MissingRequirementPolicy::Always,
        );
        let md = render_markdown(&summary);
        assert!(md.contains("**Verdict:** CHANGES REQUESTED"));
        assert!(md.contains("**Ticket:** ticket SEC-406 loaded"));
        assert!(md.contains("1 of 2 reviewed"));
        assert!(md.contains("| SEC-406-2 | Persist payments atomically (mandatory) | missing |"));
        assert!(md.contains("- **[CRITICAL]** (security) SQL injection (line 12)"));
        assert!(md.contains("Not reviewed: http_503"));
    }

    #[test]
    fn test_tagged_body_ends_with_marker() {
        let body = tagged("## Code Review Summary\n\n");
        assert_eq!(body, "## Code Review Summary\n\n<!-- pr-reviewer -->\n");
        assert!(tagged(TICKET_REQUIRED_COMMENT).contains(COMMENT_MARKER));
    }

    #[test]
    fn test_inline_comment_body() {
        let mut f = finding(Severity::Warning, "Unbounded loop");
        f.suggestion = Some("Add a limit".to_string());
        assert_eq!(
            inline_comment_body(&f),
            "**[WARNING] security**: Unbounded loop\n\n**Suggestion:** Add a limit"
        );
    }

    #[test]
    fn test_output_to_file() {
        let summary = aggregate(
            vec![],
            &TicketStatus::NoKey,
            &empty_context(),
            MissingRequirementPolicy::Always,
        );
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("review.md");
        output(&summary, Some(&path)).unwrap();
        let content = std::fs::read_to_string(&path).unwrap();
        assert!(content.contains("No reviewable files in this PR."));
    }

    #[test]
    fn test_output_to_terminal() {
        let summary = aggregate(
            vec![reviewed("a.py", vec![finding(Severity::Critical, "leak")], "bad")],
            &ticket_status(),
            &empty_context(),
            MissingRequirementPolicy::Always,
        );
        output(&summary, None).unwrap();
    }
}
