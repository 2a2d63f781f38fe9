//! Tolerant parsing of the review model's output.
//!
//! The model is asked for a JSON object, but providers wrap it in markdown
//! fences, add prose around it, or drift from the field names. Anything that
//! cannot be read completely is kept verbatim instead of being dropped.

use std::sync::LazyLock;

use regex::Regex;
use serde_json::{Map, Value};

use super::types::{FileReviewResult, Finding, RequirementCoverage, RequirementStatus, Severity};

/// Content inside markdown code fences. The closing fence must start a line
/// so backticks embedded in JSON strings do not end the match.
static FENCE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)```(?:json)?\s*\n(.*?)\n```").expect("valid fence regex"));

static LINE_NUMBER_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\d+").expect("valid line regex"));

/// Structured content of a model response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedReview {
    pub assessment: String,
    pub findings: Vec<Finding>,
    pub coverage: Vec<RequirementCoverage>,
    pub document_notes: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParsedResponse {
    Structured(ParsedReview),
    /// The response did not follow the expected layout; the raw text is kept.
    RawFallback(String),
}

impl ParsedResponse {
    /// Turn the parsed response into a file result. A fallback becomes a
    /// single `Info` finding carrying the whole raw text.
    pub fn into_result(self, path: &str) -> FileReviewResult {
        match self {
            ParsedResponse::Structured(review) => FileReviewResult {
                path: path.to_string(),
                findings: review.findings,
                assessment: review.assessment,
                coverage: review.coverage,
                document_notes: review.document_notes,
                unstructured: false,
            },
            ParsedResponse::RawFallback(raw) => FileReviewResult {
                path: path.to_string(),
                findings: vec![Finding {
                    severity: Severity::Info,
                    category: "general".to_string(),
                    message: if raw.trim().is_empty() {
                        "(empty response)".to_string()
                    } else {
                        raw.trim().to_string()
                    },
                    line: None,
                    suggestion: None,
                }],
                assessment: "The review response could not be parsed; raw output kept.".to_string(),
                coverage: Vec::new(),
                document_notes: Vec::new(),
                unstructured: true,
            },
        }
    }
}

/// Parse raw model output.
pub fn parse_response(raw: &str) -> ParsedResponse {
    let trimmed = raw.trim();
    for candidate in json_candidates(trimmed) {
        let Ok(Value::Object(root)) = serde_json::from_str::<Value>(&candidate) else {
            continue;
        };
        if let Some(review) = read_review(&root) {
            return ParsedResponse::Structured(review);
        }
    }
    ParsedResponse::RawFallback(raw.to_string())
}

/// The raw text, fenced blocks, then the outermost `{...}` slice.
fn json_candidates(text: &str) -> Vec<String> {
    let mut candidates = vec![text.to_string()];

    for cap in FENCE_RE.captures_iter(text) {
        if let Some(inner) = cap.get(1) {
            let inner = inner.as_str().trim();
            if !inner.is_empty() {
                candidates.push(inner.to_string());
            }
        }
    }

    if let (Some(start), Some(end)) = (text.find('{'), text.rfind('}')) {
        if start < end {
            candidates.push(text[start..=end].to_string());
        }
    }

    candidates
}

fn first_str<'a>(obj: &'a Map<String, Value>, keys: &[&str]) -> Option<&'a str> {
    keys.iter()
        .find_map(|k| obj.get(*k).and_then(Value::as_str))
        .map(str::trim)
        .filter(|s| !s.is_empty())
}

fn first_array<'a>(obj: &'a Map<String, Value>, keys: &[&str]) -> Option<&'a Vec<Value>> {
    keys.iter().find_map(|k| obj.get(*k).and_then(Value::as_array))
}

/// Read the whole object, or nothing: one malformed finding rejects the review.
fn read_review(root: &Map<String, Value>) -> Option<ParsedReview> {
    let assessment = first_str(root, &["overall_assessment", "assessment", "summary"]);
    let findings_value = first_array(root, &["findings", "issues"]);
    if assessment.is_none() && findings_value.is_none() {
        return None;
    }

    let findings = match findings_value {
        Some(items) => items.iter().map(read_finding).collect::<Option<Vec<_>>>()?,
        None => Vec::new(),
    };

    let mut coverage = Vec::new();
    let compliance = root.get("jira_compliance").and_then(Value::as_object);
    let coverage_keys = [
        "requirement_coverage",
        "subtask_coverage",
        "acceptance_criteria_checklist",
    ];
    for source in std::iter::once(root).chain(compliance) {
        for key in coverage_keys {
            if let Some(items) = source.get(key).and_then(Value::as_array) {
                coverage.extend(items.iter().filter_map(read_coverage));
            }
        }
    }

    let document_notes = first_array(root, &["document_notes", "srs_notes"])
        .map(|notes| {
            notes
                .iter()
                .filter_map(Value::as_str)
                .map(str::trim)
                .filter(|n| !n.is_empty())
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default();

    Some(ParsedReview {
        assessment: assessment.unwrap_or_default().to_string(),
        findings,
        coverage,
        document_notes,
    })
}

fn read_finding(value: &Value) -> Option<Finding> {
    let obj = value.as_object()?;

    let title = first_str(obj, &["title"]);
    let body = first_str(obj, &["message", "description", "issue"]);
    let message = match (title, body) {
        (Some(title), Some(body)) => format!("{title}: {body}"),
        (Some(text), None) | (None, Some(text)) => text.to_string(),
        (None, None) => return None,
    };

    let line = match obj.get("line") {
        Some(Value::Number(n)) => n.as_u64().map(|n| n as usize),
        Some(Value::String(s)) => LINE_NUMBER_RE.find(s).and_then(|m| m.as_str().parse().ok()),
        _ => None,
    }
    .filter(|&n| n > 0);

    Some(Finding {
        severity: first_str(obj, &["severity"]).map(Severity::from_label).unwrap_or(Severity::Info),
        category: first_str(obj, &["category"]).unwrap_or("general").to_ascii_lowercase(),
        message,
        line,
        suggestion: first_str(obj, &["suggestion", "fix"]).map(str::to_string),
    })
}

fn read_coverage(value: &Value) -> Option<RequirementCoverage> {
    let obj = value.as_object()?;
    let requirement = first_str(obj, &["requirement", "id", "subtask_key", "criteria"])?;
    let status = RequirementStatus::from_label(first_str(obj, &["status"])?)?;
    Some(RequirementCoverage {
        requirement: requirement.to_string(),
        status,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn structured(raw: &str) -> ParsedReview {
        match parse_response(raw) {
            ParsedResponse::Structured(review) => review,
            ParsedResponse::RawFallback(raw) => {
                panic!("expected structured response, got fallback: {raw}")
            }
        }
    }

    #[test]
    fn test_parse_canonical_response() {
        let review = structured(
            r#"{
              "overall_assessment": "Builds SQL by concatenation.",
              "findings": [
                {"severity": "critical", "category": "Security",
                 "message": "SQL injection via string concatenation",
                 "line": 12, "suggestion": "Use bound parameters"},
                {"severity": "info", "category": "testing", "message": "No tests added"}
              ],
              "requirement_coverage": [{"requirement": "SEC-406-1", "status": "missing"}],
              "document_notes": ["Matches logging requirement in docs/srs.md", ""]
            }"#,
        );
        assert_eq!(review.findings.len(), 2);
        assert_eq!(review.findings[0].severity, Severity::Critical);
        assert_eq!(review.findings[0].category, "security");
        assert_eq!(review.findings[0].line, Some(12));
        assert_eq!(review.findings[1].line, None);
        assert_eq!(review.coverage[0].status, RequirementStatus::Missing);
        assert_eq!(review.document_notes.len(), 1);
    }

    #[test]
    fn test_parse_fenced_and_aliased_response() {
        let raw = concat!(
            "Here is my review:\n```json\n",
            r#"{"overall_assessment": "ok", "issues": [{"severity": "error", "title": "Leak", "#,
            r#""description": "Token logged", "line": "40-42"}], "#,
            r#""jira_compliance": {"subtask_coverage": "#,
            r#"[{"subtask_key": "H30-2", "status": "✅ Covered"}]}}"#,
            "\n```\nThanks",
        );
        let review = structured(raw);
        assert_eq!(review.findings[0].severity, Severity::Critical);
        assert_eq!(review.findings[0].message, "Leak: Token logged");
        assert_eq!(review.findings[0].line, Some(40));
        assert_eq!(review.coverage[0].requirement, "H30-2");
        assert_eq!(review.coverage[0].status, RequirementStatus::Met);
    }

    #[test]
    fn test_parse_brace_slice() {
        let review = structured(r#"Result: {"overall_assessment": "fine", "findings": []} -- end"#);
        assert_eq!(review.assessment, "fine");
        assert!(review.findings.is_empty());
    }

    #[test]
    fn test_prose_falls_back_to_raw() {
        let raw = "[Severity: Critical]\nIssue: SQL built from user input\nLine: 12";
        let parsed = parse_response(raw);
        assert_eq!(parsed, ParsedResponse::RawFallback(raw.to_string()));

        let result = parsed.into_result("src/db.py");
        assert!(result.unstructured);
        assert_eq!(result.findings.len(), 1);
        assert_eq!(result.findings[0].severity, Severity::Info);
        assert_eq!(result.findings[0].message, raw);
    }

    #[test]
    fn test_malformed_finding_rejects_structure() {
        let raw = r#"{"overall_assessment": "x", "findings": [{"severity": "critical"}]}"#;
        assert!(matches!(parse_response(raw), ParsedResponse::RawFallback(_)));
    }

    #[test]
    fn test_unrelated_json_falls_back() {
        assert!(matches!(parse_response(r#"{"answer": 42}"#), ParsedResponse::RawFallback(_)));
        assert!(matches!(parse_response("[1, 2]"), ParsedResponse::RawFallback(_)));
    }

    #[test]
    fn test_empty_response_fallback_message() {
        let result = parse_response("  ").into_result("a.rs");
        assert_eq!(result.findings[0].message, "(empty response)");
    }

    #[test]
    fn test_structured_into_result() {
        let raw = r#"{"overall_assessment": "ok",
            "findings": [{"severity":"warning","message":"slow loop","line":0}]}"#;
        let result = parse_response(raw).into_result("src/a.rs");
        assert_eq!(result.path, "src/a.rs");
        assert!(!result.unstructured);
        assert!(!result.has_critical());
        assert_eq!(result.findings[0].line, None);
    }
}
