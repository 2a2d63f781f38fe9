use serde::Deserialize;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    FileRead(#[from] std::io::Error),

    #[error("Failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Default config file name, looked up in the current directory.
pub const CONFIG_FILE: &str = ".pr-reviewer.toml";

/// Top-level configuration loaded from .pr-reviewer.toml.
///
/// All sections are optional; the tool runs with zero config as long as the
/// GitHub and model tokens come from the environment.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub github: GitHubConfig,

    #[serde(default)]
    pub tracker: TrackerConfig,

    #[serde(default)]
    pub documents: DocumentsConfig,

    #[serde(default)]
    pub diff: DiffConfig,

    #[serde(default)]
    pub model: ModelConfig,

    #[serde(default)]
    pub review: ReviewConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct GitHubConfig {
    /// GitHub API token. If None, falls back to GITHUB_TOKEN env var.
    pub token: Option<String>,
    /// REST API root, overridable for GitHub Enterprise.
    pub api_url: String,
}

impl Default for GitHubConfig {
    fn default() -> Self {
        Self {
            token: None,
            api_url: "https://api.github.com".to_string(),
        }
    }
}

/// Issue-tracker settings. The tracker is disabled while `project_id` is unset.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TrackerConfig {
    pub base_url: String,
    pub project_id: Option<String>,
    /// Abort the review and ask for a ticket when no key can be resolved.
    pub required: bool,
    pub timeout_ms: u64,
    /// Ceiling for the ticket block of the requirement context.
    pub max_chars: usize,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost/api/jira".to_string(),
            project_id: None,
            required: false,
            timeout_ms: 15_000,
            max_chars: 4_000,
        }
    }
}

impl TrackerConfig {
    pub fn enabled(&self) -> bool {
        self.project_id.as_deref().is_some_and(|id| !id.trim().is_empty())
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DocumentsConfig {
    /// Directory the search paths are resolved against.
    pub root: PathBuf,
    pub search_paths: Vec<String>,
    pub extensions: Vec<String>,
    pub max_chars: usize,
    pub timeout_ms: u64,
}

impl Default for DocumentsConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("."),
            search_paths: vec![
                "docs/srs/".to_string(),
                "docs/requirements/".to_string(),
                "docs/".to_string(),
            ],
            extensions: vec!["md".to_string(), "txt".to_string(), "rst".to_string()],
            max_chars: 10_000,
            timeout_ms: 10_000,
        }
    }
}

impl DocumentsConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DiffConfig {
    /// Glob patterns for paths that are never reviewed.
    pub skip_patterns: Vec<String>,
    /// Glob patterns that win over `skip_patterns`.
    pub include_patterns: Vec<String>,
    pub max_diff_chars: usize,
    pub max_file_chars: usize,
}

impl Default for DiffConfig {
    fn default() -> Self {
        Self {
            skip_patterns: default_skip_patterns(),
            include_patterns: Vec::new(),
            max_diff_chars: 8_000,
            max_file_chars: 5_000,
        }
    }
}

fn default_skip_patterns() -> Vec<String> {
    [
        // lock files
        "**/*.lock",
        "**/package-lock.json",
        "**/pnpm-lock.yaml",
        // minified and binary assets
        "**/*.min.js",
        "**/*.min.css",
        "**/*.png",
        "**/*.jpg",
        "**/*.jpeg",
        "**/*.gif",
        "**/*.svg",
        "**/*.ico",
        "**/*.pdf",
        "**/*.zip",
        "**/*.tar",
        "**/*.gz",
        // build output
        "**/dist/**",
        "**/build/**",
        "**/target/**",
        "**/__pycache__/**",
        // vendored dependencies
        "**/node_modules/**",
        "**/vendor/**",
        // environment files
        "**/.env",
        "**/.env.*",
        // CI configuration
        ".github/**",
        ".bitbucket/**",
        "bitbucket-pipelines.yml",
        ".gitlab-ci.yml",
        // documentation outside source trees
        "docs/**",
        "*.md",
        "*.txt",
        "*.rst",
    ]
    .iter()
    .map(|p| p.to_string())
    .collect()
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    /// Model API key. If None, falls back to OPENAI_API_KEY env var.
    pub api_key: Option<String>,
    pub base_url: String,
    pub model: String,
    pub temperature: f32,
    pub timeout_ms: u64,
    /// Delay before the single retry of a transient failure.
    pub retry_backoff_ms: u64,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: "https://api.openai.com/v1".to_string(),
            model: "gpt-4o".to_string(),
            temperature: 0.3,
            timeout_ms: 120_000,
            retry_backoff_ms: 2_000,
        }
    }
}

impl ModelConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_ms)
    }
}

/// How `missing` checklist entries influence the verdict.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MissingRequirementPolicy {
    /// Any missing requirement requests changes.
    #[default]
    Always,
    /// Only requirements the ticket flags as mandatory request changes.
    MandatoryOnly,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ReviewConfig {
    /// Local checkout used to attach full file text to prompts.
    pub repo_root: Option<PathBuf>,
    pub max_concurrent: usize,
    pub missing_requirements: MissingRequirementPolicy,
    pub categories: Vec<String>,
    /// One of "lenient", "standard", "strict".
    pub strictness: String,
    /// One of "low", "medium", "high".
    pub security_level: String,
    /// Rule text per category, replacing or adding to the built-in rules.
    pub rules: BTreeMap<String, String>,
    /// Project-specific rules appended to the review instructions.
    pub custom_rules: Vec<String>,
}

impl Default for ReviewConfig {
    fn default() -> Self {
        Self {
            repo_root: None,
            max_concurrent: 4,
            missing_requirements: MissingRequirementPolicy::default(),
            categories: [
                "requirement",
                "scope",
                "security",
                "bug",
                "performance",
                "architecture",
                "testing",
            ]
            .iter()
            .map(|c| c.to_string())
            .collect(),
            strictness: "standard".to_string(),
            security_level: "high".to_string(),
            rules: BTreeMap::new(),
            custom_rules: Vec::new(),
        }
    }
}

impl Config {
    /// Load configuration from .pr-reviewer.toml in the current directory,
    /// or from `path` when given. A missing default file yields the default
    /// config; environment overrides are applied last.
    pub fn load(path: Option<&Path>) -> Result<Config, ConfigError> {
        let mut config = match path {
            Some(path) => Self::load_from(path)?,
            None => {
                let default_path = Path::new(CONFIG_FILE);
                if default_path.exists() {
                    Self::load_from(default_path)?
                } else {
                    Config::default()
                }
            }
        };

        config.apply_env(|key| std::env::var(key).ok());
        Ok(config)
    }

    /// Load from a specific path (useful for testing).
    pub fn load_from(path: &Path) -> Result<Config, ConfigError> {
        let contents = fs::read_to_string(path)?;
        let config = toml::from_str(&contents)?;
        Ok(config)
    }

    /// Apply environment overrides. Tokens only fill unset values; the
    /// remaining variables replace file values.
    fn apply_env(&mut self, var: impl Fn(&str) -> Option<String>) {
        if self.github.token.is_none() {
            self.github.token = var("GITHUB_TOKEN");
        }
        if self.model.api_key.is_none() {
            self.model.api_key = var("OPENAI_API_KEY");
        }
        if let Some(url) = var("JIRA_API_BASE_URL") {
            self.tracker.base_url = url.trim_end_matches('/').to_string();
        }
        if let Some(project) = var("JIRA_PROJECT_ID") {
            self.tracker.project_id = Some(project);
        }
        if let Some(required) = var("REVIEW_REQUIRE_TICKET") {
            self.tracker.required = matches!(required.trim(), "1" | "true" | "yes");
        }
        if let Some(paths) = var("SRS_PATHS") {
            let paths: Vec<String> = paths
                .split(',')
                .map(str::trim)
                .filter(|p| !p.is_empty())
                .map(str::to_string)
                .collect();
            if !paths.is_empty() {
                self.documents.search_paths = paths;
            }
        }
        if let Some(max) = var("MAX_SRS_LENGTH").and_then(|v| v.trim().parse().ok()) {
            self.documents.max_chars = max;
        }
    }

    pub fn github_token(&self) -> Option<String> {
        self.github.token.clone()
    }
}
