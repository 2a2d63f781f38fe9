/// Severity of a single finding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Severity {
    Info,
    Warning,
    Critical,
}

impl Severity {
    /// Map a model-supplied label. Unknown labels degrade to `Info`.
    pub fn from_label(label: &str) -> Self {
        match label.trim().to_ascii_lowercase().as_str() {
            "critical" | "error" | "high" | "blocker" => Severity::Critical,
            "warning" | "warn" | "medium" | "major" => Severity::Warning,
            _ => Severity::Info,
        }
    }
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Severity::Info => write!(f, "INFO"),
            Severity::Warning => write!(f, "WARNING"),
            Severity::Critical => write!(f, "CRITICAL"),
        }
    }
}

/// A single reviewer-reported issue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Finding {
    pub severity: Severity,
    /// e.g. "security", "bug", "requirement"
    pub category: String,
    pub message: String,
    /// Line in the new file version, if the model gave one
    pub line: Option<usize>,
    pub suggestion: Option<String>,
}

/// How well a requirement is addressed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum RequirementStatus {
    Missing,
    Partial,
    Met,
}

impl RequirementStatus {
    pub fn from_label(label: &str) -> Option<Self> {
        let label = label.to_ascii_lowercase().replace(['_', '-'], " ");
        let has = |words: &[&str]| words.iter().any(|w| label.contains(w));
        // negatives contain the positive words, so they are checked first
        if has(&["partial", "incomplete"]) {
            Some(RequirementStatus::Partial)
        } else if has(&[
            "missing",
            "not met",
            "unmet",
            "not covered",
            "uncovered",
            "not done",
            "not implemented",
        ]) {
            Some(RequirementStatus::Missing)
        } else if has(&["met", "covered", "done", "implemented"]) {
            Some(RequirementStatus::Met)
        } else {
            None
        }
    }
}

impl std::fmt::Display for RequirementStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RequirementStatus::Missing => write!(f, "missing"),
            RequirementStatus::Partial => write!(f, "partial"),
            RequirementStatus::Met => write!(f, "met"),
        }
    }
}

/// The model's statement about one ticket requirement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequirementCoverage {
    /// Requirement id (e.g. "SEC-406-1", "AC-2") or its text
    pub requirement: String,
    pub status: RequirementStatus,
}

/// Review of one file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileReviewResult {
    pub path: String,
    pub findings: Vec<Finding>,
    pub assessment: String,
    pub coverage: Vec<RequirementCoverage>,
    /// Remarks about alignment with the requirement documents
    pub document_notes: Vec<String>,
    /// Set when the model output could not be parsed and was kept verbatim
    pub unstructured: bool,
}

impl FileReviewResult {
    pub fn has_critical(&self) -> bool {
        self.findings.iter().any(|f| f.severity == Severity::Critical)
    }
}

/// What happened to one scoped file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileOutcome {
    Reviewed(FileReviewResult),
    NotReviewed { path: String, reason: String },
}

impl FileOutcome {
    pub fn path(&self) -> &str {
        match self {
            FileOutcome::Reviewed(result) => &result.path,
            FileOutcome::NotReviewed { path, .. } => path,
        }
    }

    pub fn result(&self) -> Option<&FileReviewResult> {
        match self {
            FileOutcome::Reviewed(result) => Some(result),
            FileOutcome::NotReviewed { .. } => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_severity_ordering_and_labels() {
        assert!(Severity::Info < Severity::Warning);
        assert!(Severity::Warning < Severity::Critical);
        assert_eq!(Severity::from_label("error"), Severity::Critical);
        assert_eq!(Severity::from_label(" High "), Severity::Critical);
        assert_eq!(Severity::from_label("medium"), Severity::Warning);
        assert_eq!(Severity::from_label("nit"), Severity::Info);
        assert_eq!(Severity::Critical.to_string(), "CRITICAL");
    }

    #[test]
    fn test_requirement_status_labels() {
        assert_eq!(RequirementStatus::from_label("✅ Met"), Some(RequirementStatus::Met));
        assert_eq!(RequirementStatus::from_label("❌ Missing"), Some(RequirementStatus::Missing));
        assert_eq!(
            RequirementStatus::from_label("⚠️ Partial"),
            Some(RequirementStatus::Partial)
        );
        assert_eq!(RequirementStatus::from_label("Covered"), Some(RequirementStatus::Met));
        assert_eq!(RequirementStatus::from_label("not met"), Some(RequirementStatus::Missing));
        assert_eq!(RequirementStatus::from_label("???"), None);
        for label in ["not_met", "NOT_MET", "unmet", "uncovered", "not-covered", "Not done"] {
            assert_eq!(
                RequirementStatus::from_label(label),
                Some(RequirementStatus::Missing),
                "{label}"
            );
        }
        assert_eq!(RequirementStatus::from_label("implemented"), Some(RequirementStatus::Met));
        assert_eq!(RequirementStatus::from_label("incomplete"), Some(RequirementStatus::Partial));
        assert!(RequirementStatus::Met > RequirementStatus::Partial);
    }

    #[test]
    fn test_outcome_accessors() {
        let outcome = FileOutcome::NotReviewed {
            path: "src/a.rs".to_string(),
            reason: "timeout".to_string(),
        };
        assert_eq!(outcome.path(), "src/a.rs");
        assert!(outcome.result().is_none());
    }
}
