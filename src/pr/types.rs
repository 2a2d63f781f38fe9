/// Metadata about a pull request as reported by the host.
/// Not Deserialize: PullRequest is assembled from several GitHub
/// API responses (pull, files, commits).
#[derive(Debug, Clone)]
pub struct PullRequest {
    /// PR number (e.g., 42)
    pub number: u64,
    /// PR title
    pub title: String,
    /// Source branch name
    pub branch: String,
    /// Commit the review is made against
    pub head_sha: String,
    /// Commit messages, oldest first
    pub commit_messages: Vec<String>,
    /// Changed files in the host's reported order
    pub files: Vec<ChangedFile>,
}

/// Change status of a file within the PR.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileStatus {
    Added,
    Modified,
    Removed,
    Renamed,
}

impl FileStatus {
    /// Map a GitHub `status` string. Copies and mode changes count as modifications.
    pub fn from_github(status: &str) -> Self {
        match status {
            "added" => FileStatus::Added,
            "removed" => FileStatus::Removed,
            "renamed" => FileStatus::Renamed,
            _ => FileStatus::Modified,
        }
    }
}

impl std::fmt::Display for FileStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FileStatus::Added => write!(f, "added"),
            FileStatus::Modified => write!(f, "modified"),
            FileStatus::Removed => write!(f, "removed"),
            FileStatus::Renamed => write!(f, "renamed"),
        }
    }
}

/// A changed file exactly as the host reports it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangedFile {
    pub path: String,
    pub status: FileStatus,
    /// Per-file unified diff (hunks only). None for binary or oversized files.
    pub patch: Option<String>,
    /// Old path for renames
    pub previous_path: Option<String>,
}

/// A file that survived scoping and will be reviewed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiffFile {
    /// File path (e.g., "src/auth/config.rs")
    pub path: String,
    pub status: FileStatus,
    pub previous_path: Option<String>,
    /// Diff text with whitespace-only hunks removed
    pub diff: String,
    /// Hunks (contiguous changed regions) backing `diff`
    pub hunks: Vec<Hunk>,
    /// Current file text, when a local checkout is available
    pub full_text: Option<String>,
}

impl DiffFile {
    /// Whether `line` (new-file numbering) falls inside one of the hunks.
    /// Inline comments can only be anchored on such lines.
    pub fn contains_new_line(&self, line: usize) -> bool {
        self.hunks
            .iter()
            .any(|h| line >= h.new_start && line < h.new_start + h.new_count.max(1))
    }
}

/// A contiguous region of changes within a file.
/// Parsed from unified diff format.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Hunk {
    /// Starting line number in the old file
    pub old_start: usize,
    /// Number of lines in the old file
    pub old_count: usize,
    /// Starting line number in the new file
    pub new_start: usize,
    /// Number of lines in the new file
    pub new_count: usize,
    /// The raw `@@ ... @@` header line
    pub header: String,
    /// Raw lines of the hunk (prefixed with +, -, or space)
    pub lines: Vec<String>,
}

impl Hunk {
    /// True when the hunk only changes whitespace: the added and removed
    /// lines are identical once whitespace is stripped and blank lines dropped.
    pub fn is_whitespace_only(&self) -> bool {
        let normalized = |prefix: char| -> Vec<String> {
            self.lines
                .iter()
                .filter_map(|l| l.strip_prefix(prefix))
                .map(|l| l.split_whitespace().collect::<String>())
                .filter(|l| !l.is_empty())
                .collect()
        };
        let has_changes = self
            .lines
            .iter()
            .any(|l| l.starts_with('+') || l.starts_with('-'));
        has_changes && normalized('+') == normalized('-')
    }
}

/// Represents the parsed components of a GitHub PR URL.
/// Extracted by parse_pr_url() in pr/mod.rs.
#[derive(Debug, Clone)]
pub struct PrUrl {
    pub owner: String,
    pub repo: String,
    pub pr_number: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hunk(new_start: usize, new_count: usize, lines: &[&str]) -> Hunk {
        Hunk {
            old_start: new_start,
            old_count: new_count,
            new_start,
            new_count,
            header: format!("@@ -{new_start},{new_count} +{new_start},{new_count} @@"),
            lines: lines.iter().map(|l| l.to_string()).collect(),
        }
    }

    #[test]
    fn test_pr_url_fields() {
        let url = PrUrl {
            owner: "org".to_string(),
            repo: "repo".to_string(),
            pr_number: 42,
        };
        assert_eq!(url.owner, "org");
        assert_eq!(url.repo, "repo");
        assert_eq!(url.pr_number, 42);
    }

    #[test]
    fn test_status_from_github() {
        assert_eq!(FileStatus::from_github("added"), FileStatus::Added);
        assert_eq!(FileStatus::from_github("removed"), FileStatus::Removed);
        assert_eq!(FileStatus::from_github("renamed"), FileStatus::Renamed);
        assert_eq!(FileStatus::from_github("copied"), FileStatus::Modified);
        assert_eq!(FileStatus::Renamed.to_string(), "renamed");
    }

    #[test]
    fn test_whitespace_only_hunk() {
        let h = hunk(1, 3, &[" fn a() {", "-    x();", "+\tx();", "+", " }"]);
        assert!(h.is_whitespace_only());
    }

    #[test]
    fn test_real_change_is_not_whitespace_only() {
        let h = hunk(1, 2, &["-    x();", "+    y();"]);
        assert!(!h.is_whitespace_only());
    }

    #[test]
    fn test_context_only_hunk_is_not_whitespace_only() {
        let h = hunk(1, 1, &[" unchanged"]);
        assert!(!h.is_whitespace_only());
    }

    #[test]
    fn test_contains_new_line() {
        let file = DiffFile {
            path: "src/a.rs".to_string(),
            status: FileStatus::Modified,
            previous_path: None,
            diff: String::new(),
            hunks: vec![hunk(10, 5, &["+x"])],
            full_text: None,
        };
        assert!(file.contains_new_line(10));
        assert!(file.contains_new_line(14));
        assert!(!file.contains_new_line(15));
        assert!(!file.contains_new_line(9));
    }
}
