//! Per-file prompt composition.
//!
//! Prompts are pure functions of their inputs: the same file, context and
//! instructions always produce byte-identical text.

use std::collections::BTreeMap;

use tracing::debug;

use crate::config::ReviewConfig;
use crate::context::RequirementContext;
use crate::pr::DiffFile;

/// Categories that stay enabled whatever the configuration says.
const MANDATORY_CATEGORIES: &[&str] = &["security", "secrets", "authorization", "error_leakage"];

const PERSONA: &str = "You are a strict senior code reviewer acting as a Staff Engineer. \
Review only the changed code shown in the diff. Report issues that introduce security \
vulnerabilities, break the application, lose or corrupt data, degrade performance \
significantly, break API contracts or business logic, or leave ticket requirements \
unimplemented. Ignore cosmetic style and naming.";

const PRIORITY_ORDER: &str = "Priority order when space is limited:\n\
1. Requirement violations (missing acceptance criteria, out-of-scope changes)\n\
2. Security vulnerabilities (injection, hardcoded secrets, sensitive data exposure)\n\
3. Authorization and data access issues\n\
4. Bugs that break functionality or corrupt data\n\
5. Performance problems with real impact";

/// Built-in rule text per review category. `review.rules` overrides these.
const BUILTIN_RULES: &[(&str, &str)] = &[
    (
        "requirement",
        "Check the change against the ticket and requirement documents. Flag acceptance \
criteria that are missing or only partly implemented.",
    ),
    (
        "scope",
        "Flag changes clearly unrelated to the ticket, such as unrelated features, CI \
configuration or demo files. Files related to the ticket topic are in scope.",
    ),
    (
        "security",
        "Look for injection (SQL, command, template), unsafe deserialization, path traversal, \
XSS and missing input validation on untrusted data.",
    ),
    (
        "secrets",
        "Flag hardcoded passwords, API keys, tokens, private keys and connection strings.",
    ),
    (
        "authorization",
        "Every read or write of user-owned data must check that the caller may access that \
object. Flag missing or bypassable permission checks.",
    ),
    (
        "error_leakage",
        "Errors returned to clients must not expose stack traces, SQL, file paths or internal \
identifiers.",
    ),
    (
        "pii",
        "Personal data must not be logged, cached or returned beyond what the feature needs.",
    ),
    (
        "bug",
        "Look for logic errors, unhandled edge cases, crashes and data corruption.",
    ),
    (
        "error_handling",
        "Flag swallowed errors, missing cleanup on failure and retries without bounds.",
    ),
    (
        "performance",
        "Flag N+1 queries, unbounded loops or collections, blocking calls on hot paths and \
memory leaks with real impact.",
    ),
    (
        "architecture",
        "Flag broken API contracts, layering violations and changes that couple unrelated \
modules.",
    ),
    (
        "testing",
        "Business logic changes need tests. Warn when new behaviour ships without any.",
    ),
];

const OUTPUT_FORMAT: &str = r#"Respond with a single JSON object and nothing else:
{
  "overall_assessment": "1-3 sentence assessment of this file",
  "findings": [
    {
      "severity": "critical|warning|info",
      "category": "one of the review categories",
      "message": "what is wrong and why it matters",
      "line": <line number in the new file version, or null>,
      "suggestion": "minimal fix, or null"
    }
  ],
  "requirement_coverage": [
    {"requirement": "<requirement id such as PROJ-12 or AC-1>", "status": "met|partial|missing"}
  ],
  "document_notes": ["alignment or deviation with the requirement documents"]
}
Use "critical" only for issues that must block the merge. Report requirement_coverage only
for requirements this file implements or should implement. Return empty arrays when there
is nothing to report."#;

/// Marker appended to cut diff or file text.
pub const DIFF_TRUNCATION_MARKER: &str = "\n[... diff truncated ...]";
const FILE_TRUNCATION_MARKER: &str = "\n[... file truncated ...]";

/// A PR above either limit gets a size warning.
const LARGE_PR_FILES: usize = 10;
const LARGE_PR_CHANGES: usize = 500;

/// The fixed instruction block shared by every prompt of a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReviewInstructions {
    pub categories: Vec<String>,
    /// Rule text for the enabled categories that have one
    pub rules: BTreeMap<String, String>,
    pub strictness: String,
    pub security_level: String,
    pub custom_rules: Vec<String>,
}

impl ReviewInstructions {
    /// Build from config. Mandatory categories are always added; the list is
    /// de-duplicated keeping first occurrence order.
    pub fn from_config(config: &ReviewConfig) -> Self {
        let mut categories: Vec<String> = Vec::new();
        for category in config
            .categories
            .iter()
            .map(String::as_str)
            .chain(MANDATORY_CATEGORIES.iter().copied())
        {
            let category = category.trim().to_ascii_lowercase();
            if !category.is_empty() && !categories.contains(&category) {
                categories.push(category);
            }
        }

        let mut rules = BTreeMap::new();
        for category in &categories {
            let configured = config
                .rules
                .iter()
                .find(|(name, _)| name.eq_ignore_ascii_case(category))
                .map(|(_, text)| text.as_str());
            let builtin = BUILTIN_RULES
                .iter()
                .find(|(name, _)| name == category)
                .map(|(_, text)| *text);
            match configured.or(builtin) {
                Some(text) => {
                    rules.insert(category.clone(), text.trim().to_string());
                }
                None => debug!(%category, "no rule text for category"),
            }
        }

        Self {
            categories,
            rules,
            strictness: config.strictness.clone(),
            security_level: config.security_level.clone(),
            custom_rules: config.custom_rules.clone(),
        }
    }

    fn render(&self) -> String {
        let mut out = String::new();
        out.push_str(PERSONA);
        out.push_str("\n\n");
        out.push_str(PRIORITY_ORDER);
        out.push_str("\n\n## Review configuration\n");
        out.push_str(&format!("- Strictness: {}\n", self.strictness));
        out.push_str(&format!("- Security level: {}\n", self.security_level));
        out.push_str(&format!("- Enabled categories: {}\n", self.categories.len()));
        out.push_str("\n## Review categories\n");
        for category in &self.categories {
            match self.rules.get(category) {
                Some(rule) => out.push_str(&format!("- **{category}**: {rule}\n")),
                None => out.push_str(&format!("- **{category}**\n")),
            }
        }
        if !self.custom_rules.is_empty() {
            out.push_str("\n## Project rules\n");
            for rule in &self.custom_rules {
                out.push_str(&format!("- {rule}\n"));
            }
        }
        out.push_str("\n## Output format\n");
        out.push_str(OUTPUT_FORMAT);
        out
    }
}

/// Added and removed line counts of one file's hunks.
fn line_changes(file: &DiffFile) -> (usize, usize) {
    let lines = file.hunks.iter().flat_map(|h| &h.lines);
    lines.fold((0, 0), |(added, removed), line| {
        if line.starts_with('+') {
            (added + 1, removed)
        } else if line.starts_with('-') {
            (added, removed + 1)
        } else {
            (added, removed)
        }
    })
}

/// PR-wide facts repeated in every file's prompt, so each review can judge
/// scope and size.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PrOverview {
    /// Paths of the reviewed files, in scope order
    pub paths: Vec<String>,
    pub additions: usize,
    pub deletions: usize,
}

impl PrOverview {
    pub fn from_files(files: &[DiffFile]) -> Self {
        let mut overview = Self::default();
        for file in files {
            let (added, removed) = line_changes(file);
            overview.paths.push(file.path.clone());
            overview.additions += added;
            overview.deletions += removed;
        }
        overview
    }

    pub fn is_large(&self) -> bool {
        self.paths.len() > LARGE_PR_FILES || self.additions + self.deletions > LARGE_PR_CHANGES
    }

    fn render(&self) -> String {
        let mut out = format!("**All Changed Files in PR:** ({} files)\n", self.paths.len());
        for path in &self.paths {
            out.push_str(&format!("- {path}\n"));
        }
        out.push_str("\n**PR Size Analysis:**\n");
        out.push_str(&format!("- Total files changed: {}\n", self.paths.len()));
        out.push_str(&format!("- Total lines added: {}\n", self.additions));
        out.push_str(&format!("- Total lines deleted: {}\n", self.deletions));
        out.push_str(&format!(
            "- Total changes: {} lines\n",
            self.additions + self.deletions
        ));
        if self.is_large() {
            out.push_str(
                "\n**PR SIZE WARNING:** This PR is large. Consider breaking it into smaller, \
focused PRs for easier review.\n",
            );
        }
        out
    }
}

/// Cut `text` to `max` characters, appending `marker` when anything was dropped.
fn truncate_with_marker(text: &str, max: usize, marker: &str) -> String {
    match text.char_indices().nth(max) {
        Some((idx, _)) => format!("{}{}", &text[..idx], marker),
        None => text.to_string(),
    }
}

/// Compose the prompt for one file.
pub fn compose(
    file: &DiffFile,
    overview: &PrOverview,
    context: &RequirementContext,
    instructions: &ReviewInstructions,
    max_diff_chars: usize,
    max_file_chars: usize,
) -> String {
    let mut prompt = instructions.render();
    prompt.push_str("\n\n");

    if !context.is_empty() {
        prompt.push_str("# REQUIREMENT CONTEXT\n\n");
        prompt.push_str(context.as_str().trim_end());
        prompt.push_str(
            "\n\nCode changes should align with the requirements above. \
Flag deviations and missing implementations.\n\n",
        );
    }

    let (added, removed) = line_changes(file);
    prompt.push_str("# CODE CHANGES\n\n");
    prompt.push_str(&format!("**File:** {}\n", file.path));
    prompt.push_str(&format!("**Status:** {}\n", file.status));
    prompt.push_str(&format!("**Changes:** +{added} -{removed}\n"));
    if let Some(previous) = &file.previous_path {
        prompt.push_str(&format!("**Previous path:** {previous}\n"));
    }
    prompt.push('\n');
    prompt.push_str(&overview.render());

    let diff = truncate_with_marker(&file.diff, max_diff_chars, DIFF_TRUNCATION_MARKER);
    prompt.push_str("\n**DIFF:**\n```diff\n");
    prompt.push_str(diff.trim_end());
    prompt.push_str("\n```\n");

    if let Some(text) = &file.full_text {
        let text = truncate_with_marker(text, max_file_chars, FILE_TRUNCATION_MARKER);
        prompt.push_str("\n**FULL FILE CONTENT (context only, review the diff):**\n```\n");
        prompt.push_str(text.trim_end());
        prompt.push_str("\n```\n");
    }

    prompt
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::DocumentContext;
    use crate::pr::types::Hunk;
    use crate::pr::FileStatus;

    fn file(diff: &str) -> DiffFile {
        DiffFile {
            path: "src/payments.py".to_string(),
            status: FileStatus::Modified,
            previous_path: None,
            diff: diff.to_string(),
            hunks: vec![],
            full_text: None,
        }
    }

    fn overview() -> PrOverview {
        PrOverview::from_files(&[file("")])
    }

    fn hunk_file(path: &str, added: usize, removed: usize) -> DiffFile {
        let mut lines: Vec<String> = (0..added).map(|i| format!("+line {i}")).collect();
        lines.extend((0..removed).map(|i| format!("-line {i}")));
        lines.push(" context".to_string());
        DiffFile {
            path: path.to_string(),
            hunks: vec![Hunk {
                old_start: 1,
                old_count: removed + 1,
                new_start: 1,
                new_count: added + 1,
                header: String::new(),
                lines,
            }],
            ..file("")
        }
    }

    fn instructions() -> ReviewInstructions {
        ReviewInstructions::from_config(&ReviewConfig::default())
    }

    #[test]
    fn test_mandatory_categories_always_present() {
        let config = ReviewConfig {
            categories: vec!["Performance".to_string(), "security".to_string()],
            ..ReviewConfig::default()
        };
        let instructions = ReviewInstructions::from_config(&config);
        assert_eq!(
            instructions.categories,
            vec!["performance", "security", "secrets", "authorization", "error_leakage"]
        );
    }

    #[test]
    fn test_compose_is_deterministic() {
        let ctx = RequirementContext::assemble(None, 100, DocumentContext::default());
        let f = file("@@ -1 +1 @@\n-a\n+b\n");
        let a = compose(&f, &overview(), &ctx, &instructions(), 8000, 5000);
        let b = compose(&f, &overview(), &ctx, &instructions(), 8000, 5000);
        assert_eq!(a, b);
    }

    #[test]
    fn test_compose_section_order() {
        let docs = crate::context::render_documents(
            &[crate::context::RequirementDocument {
                id: "docs/srs.md".to_string(),
                text: "Payments must be logged.".to_string(),
            }],
            1000,
        );
        let ctx = RequirementContext::assemble(None, 100, docs);
        let mut f = file("@@ -1 +1 @@\n+query = \"SELECT * FROM t WHERE id=\" + id\n");
        f.full_text = Some("query = ...".to_string());
        let prompt = compose(&f, &overview(), &ctx, &instructions(), 8000, 5000);

        let output = prompt.find("## Output format").unwrap();
        let context = prompt.find("# REQUIREMENT CONTEXT").unwrap();
        let identity = prompt.find("**File:** src/payments.py").unwrap();
        let diff = prompt.find("**DIFF:**").unwrap();
        let full = prompt.find("**FULL FILE CONTENT").unwrap();
        assert!(output < context && context < identity && identity < diff && diff < full);
    }

    #[test]
    fn test_empty_context_block_is_omitted() {
        let ctx = RequirementContext::default();
        let prompt = compose(&file("+x\n"), &overview(), &ctx, &instructions(), 8000, 5000);
        assert!(!prompt.contains("# REQUIREMENT CONTEXT"));
    }

    #[test]
    fn test_long_diff_is_truncated_with_marker() {
        let diff = "+x\n".repeat(100);
        let ctx = RequirementContext::default();
        let prompt = compose(&file(&diff), &overview(), &ctx, &instructions(), 30, 5000);
        assert!(prompt.contains(DIFF_TRUNCATION_MARKER.trim_start()));
        assert!(!prompt.contains(&diff));
    }

    #[test]
    fn test_short_diff_is_untouched() {
        let ctx = RequirementContext::default();
        let prompt = compose(&file("+x\n"), &overview(), &ctx, &instructions(), 30, 5000);
        assert!(!prompt.contains("diff truncated"));
        assert!(prompt.contains("```diff\n+x\n```"));
    }

    #[test]
    fn test_rules_and_security_level_rendered() {
        let mut config = ReviewConfig {
            categories: vec!["performance".to_string(), "logging".to_string()],
            security_level: "medium".to_string(),
            ..ReviewConfig::default()
        };
        config
            .rules
            .insert("Logging".to_string(), "Every handler logs the request id.".to_string());
        let instructions = ReviewInstructions::from_config(&config);
        assert!(instructions.rules["performance"].contains("N+1 queries"));
        assert_eq!(instructions.rules["logging"], "Every handler logs the request id.");
        assert!(instructions.rules["secrets"].contains("hardcoded"));

        let ctx = RequirementContext::default();
        let prompt = compose(&file("+x\n"), &overview(), &ctx, &instructions, 8000, 5000);
        assert!(prompt.contains("- Security level: medium\n"));
        assert!(prompt.contains("- Strictness: standard\n"));
        assert!(prompt.contains("- Enabled categories: 6\n"));
        assert!(prompt.contains("- **logging**: Every handler logs the request id.\n"));
    }

    #[test]
    fn test_unknown_category_is_listed_without_rule() {
        let config = ReviewConfig {
            categories: vec!["accessibility".to_string()],
            ..ReviewConfig::default()
        };
        let instructions = ReviewInstructions::from_config(&config);
        assert!(!instructions.rules.contains_key("accessibility"));
        assert!(instructions.render().contains("- **accessibility**\n"));
    }

    #[test]
    fn test_overview_lists_every_scoped_file() {
        let files = vec![hunk_file("src/a.py", 3, 1), hunk_file("src/b.py", 2, 0)];
        let overview = PrOverview::from_files(&files);
        assert_eq!(overview.paths, vec!["src/a.py", "src/b.py"]);
        assert_eq!((overview.additions, overview.deletions), (5, 1));
        assert!(!overview.is_large());

        let ctx = RequirementContext::default();
        let prompt = compose(&files[1], &overview, &ctx, &instructions(), 8000, 5000);
        assert!(prompt.contains("**Changes:** +2 -0\n"));
        let listing = "**All Changed Files in PR:** (2 files)\n- src/a.py\n- src/b.py\n";
        assert!(prompt.contains(listing));
        assert!(prompt.contains("- Total changes: 6 lines\n"));
        assert!(!prompt.contains("PR SIZE WARNING"));

        let identity = prompt.find("**File:** src/b.py").unwrap();
        let listing = prompt.find("**All Changed Files in PR:**").unwrap();
        let diff = prompt.find("**DIFF:**").unwrap();
        assert!(identity < listing && listing < diff);
    }

    #[test]
    fn test_large_pr_gets_size_warning() {
        let many: Vec<DiffFile> = (0..11)
            .map(|i| hunk_file(&format!("src/m{i}.py"), 1, 0))
            .collect();
        assert!(PrOverview::from_files(&many).is_large());

        let big = vec![hunk_file("src/big.py", 400, 101)];
        let overview = PrOverview::from_files(&big);
        assert!(overview.is_large());
        let ctx = RequirementContext::default();
        let prompt = compose(&big[0], &overview, &ctx, &instructions(), 8000, 5000);
        assert!(prompt.contains("**PR SIZE WARNING:**"));

        let at_limit = vec![hunk_file("src/edge.py", 250, 250)];
        assert!(!PrOverview::from_files(&at_limit).is_large());
    }
}
