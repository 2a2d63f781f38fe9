//! Diff scoping: decide which changed files are worth a review.

use std::path::Path;
use std::time::Duration;

use glob::{MatchOptions, Pattern};
use tracing::{debug, warn};

use super::diff::{parse_patch, render_hunks};
use super::types::{ChangedFile, DiffFile, FileStatus};
use crate::config::DiffConfig;

const MATCH_OPTIONS: MatchOptions = MatchOptions {
    case_sensitive: true,
    require_literal_separator: true,
    require_literal_leading_dot: false,
};

/// Compiled path filters.
#[derive(Debug, Clone, Default)]
pub struct ScopeRules {
    skip: Vec<Pattern>,
    include: Vec<Pattern>,
}

impl ScopeRules {
    /// Compile glob patterns. Invalid patterns are logged and ignored.
    pub fn new(skip: &[String], include: &[String]) -> Self {
        Self {
            skip: compile(skip),
            include: compile(include),
        }
    }

    pub fn from_config(config: &DiffConfig) -> Self {
        Self::new(&config.skip_patterns, &config.include_patterns)
    }

    /// A path is skipped when a skip pattern matches and no include pattern does.
    pub fn should_skip(&self, path: &str) -> bool {
        let matches = |patterns: &[Pattern]| {
            patterns
                .iter()
                .any(|p| p.matches_with(path, MATCH_OPTIONS))
        };
        matches(&self.skip) && !matches(&self.include)
    }
}

fn compile(patterns: &[String]) -> Vec<Pattern> {
    patterns
        .iter()
        .filter_map(|p| match Pattern::new(p) {
            Ok(pattern) => Some(pattern),
            Err(e) => {
                warn!(pattern = %p, error = %e, "ignoring invalid path pattern");
                None
            }
        })
        .collect()
}

/// Filter the host's changed-file list down to reviewable files.
///
/// Drops removed files, skipped paths, files without a patch, and files whose
/// changes are whitespace-only. Whitespace-only hunks are stripped from the
/// diff text of the files that remain. Host order is preserved.
pub fn scope(changed: &[ChangedFile], rules: &ScopeRules) -> Vec<DiffFile> {
    let mut scoped = Vec::new();

    for file in changed {
        if file.status == FileStatus::Removed {
            debug!(path = %file.path, "skipping removed file");
            continue;
        }
        if rules.should_skip(&file.path) {
            debug!(path = %file.path, "skipping file matching skip pattern");
            continue;
        }
        let Some(patch) = file.patch.as_deref() else {
            debug!(path = %file.path, "skipping file without patch");
            continue;
        };

        let hunks = match parse_patch(patch) {
            Ok(hunks) => hunks,
            Err(e) => {
                warn!(path = %file.path, error = %e, "could not parse patch, reviewing raw text");
                scoped.push(DiffFile {
                    path: file.path.clone(),
                    status: file.status,
                    previous_path: file.previous_path.clone(),
                    diff: patch.to_string(),
                    hunks: Vec::new(),
                    full_text: None,
                });
                continue;
            }
        };

        let hunks: Vec<_> = hunks.into_iter().filter(|h| !h.is_whitespace_only()).collect();
        if hunks.is_empty() {
            debug!(path = %file.path, "skipping file with whitespace-only changes");
            continue;
        }

        scoped.push(DiffFile {
            path: file.path.clone(),
            status: file.status,
            previous_path: file.previous_path.clone(),
            diff: render_hunks(&hunks),
            hunks,
            full_text: None,
        });
    }

    scoped
}

/// Attach the current text of each file from a local checkout, cut to
/// `max_chars`. Missing or unreadable files are left without text.
pub async fn attach_full_text(
    files: &mut [DiffFile],
    root: &Path,
    max_chars: usize,
    timeout: Duration,
) {
    for file in files.iter_mut() {
        let path = root.join(&file.path);
        match tokio::time::timeout(timeout, tokio::fs::read_to_string(&path)).await {
            Ok(Ok(text)) => {
                file.full_text = Some(text.chars().take(max_chars).collect());
            }
            Ok(Err(e)) => debug!(path = %path.display(), error = %e, "full file text unavailable"),
            Err(_) => warn!(path = %path.display(), "timed out reading full file text"),
        }
    }
}
