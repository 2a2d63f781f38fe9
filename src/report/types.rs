use crate::review::{FileOutcome, RequirementStatus};

/// Final PR-level decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Approve,
    ChangesRequested,
}

impl std::fmt::Display for Verdict {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Verdict::Approve => write!(f, "APPROVE"),
            Verdict::ChangesRequested => write!(f, "CHANGES REQUESTED"),
        }
    }
}

/// One ticket requirement and how the change addresses it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChecklistEntry {
    /// Subtask key or `AC-n`
    pub id: String,
    pub requirement: String,
    pub status: RequirementStatus,
    pub mandatory: bool,
}

/// Everything published for one run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReviewSummary {
    /// Per-file outcomes in scope order
    pub files: Vec<FileOutcome>,
    /// Describes the ticket context the review ran with
    pub ticket_line: String,
    pub checklist: Vec<ChecklistEntry>,
    pub document_notes: Vec<String>,
    /// Degradations the reader should know about
    pub notices: Vec<String>,
    pub verdict: Verdict,
}

impl ReviewSummary {
    pub fn reviewed_count(&self) -> usize {
        self.files.iter().filter(|f| f.result().is_some()).count()
    }

    pub fn critical_count(&self) -> usize {
        self.files
            .iter()
            .filter_map(FileOutcome::result)
            .flat_map(|r| &r.findings)
            .filter(|f| f.severity == crate::review::Severity::Critical)
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_verdict_display() {
        assert_eq!(Verdict::Approve.to_string(), "APPROVE");
        assert_eq!(Verdict::ChangesRequested.to_string(), "CHANGES REQUESTED");
    }

    #[test]
    fn test_summary_counts() {
        let summary = ReviewSummary {
            files: vec![FileOutcome::NotReviewed {
                path: "a.rs".to_string(),
                reason: "timeout".to_string(),
            }],
            ticket_line: String::new(),
            checklist: vec![],
            document_notes: vec![],
            notices: vec![],
            verdict: Verdict::Approve,
        };
        assert_eq!(summary.reviewed_count(), 0);
        assert_eq!(summary.critical_count(), 0);
    }
}
