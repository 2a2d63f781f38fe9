pub mod diff;
pub mod scope;
pub mod types;

pub use types::{ChangedFile, DiffFile, FileStatus, PrUrl, PullRequest};

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use thiserror::Error;
use tracing::{debug, instrument};

use crate::report::Verdict;

#[derive(Debug, Error)]
pub enum PrError {
    #[error("GitHub API request failed: {0}")]
    ApiRequest(#[from] reqwest::Error),

    #[error("Invalid PR URL: {0}")]
    InvalidUrl(String),

    #[error("Failed to parse diff: {0}")]
    DiffParse(String),

    #[error("GitHub token not found in environment")]
    MissingToken,
}

/// A comment anchored on one line of the new file version.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InlineComment {
    pub path: String,
    pub line: usize,
    pub body: String,
}

/// The version-control host as seen by the review pipeline: it supplies the
/// pull request and accepts the published review.
#[async_trait]
pub trait HostClient: Send + Sync {
    /// Fetch PR metadata, changed files (host order) and commit messages.
    async fn pull_request(&self) -> Result<PullRequest, PrError>;

    /// Current head commit of the PR, used to detect superseded runs.
    async fn head_sha(&self) -> Result<String, PrError>;

    async fn post_inline_comment(
        &self,
        commit_id: &str,
        comment: &InlineComment,
    ) -> Result<(), PrError>;

    async fn post_summary_comment(&self, body: &str) -> Result<(), PrError>;

    async fn submit_verdict(
        &self,
        commit_id: &str,
        verdict: Verdict,
        body: &str,
    ) -> Result<(), PrError>;

    /// Delete earlier summary and inline comments whose body contains
    /// `marker`. Returns how many were deleted.
    async fn delete_comments_containing(&self, marker: &str) -> Result<usize, PrError>;
}

/// Parse a GitHub PR URL into its component parts.
///
/// Expected format: https://github.com/{owner}/{repo}/pull/{number}
/// Returns PrError::InvalidUrl for malformed URLs.
pub fn parse_pr_url(url: &str) -> Result<PrUrl, PrError> {
    let parsed = reqwest::Url::parse(url).map_err(|_| PrError::InvalidUrl(url.to_string()))?;

    if parsed.host_str() != Some("github.com") {
        return Err(PrError::InvalidUrl(url.to_string()));
    }

    let segments: Vec<_> = parsed
        .path_segments()
        .ok_or_else(|| PrError::InvalidUrl(url.to_string()))?
        .filter(|segment| !segment.is_empty())
        .collect();

    if segments.len() != 4 || segments[2] != "pull" {
        return Err(PrError::InvalidUrl(url.to_string()));
    }

    let pr_number = segments[3]
        .parse::<u64>()
        .map_err(|_| PrError::InvalidUrl(url.to_string()))?;

    Ok(PrUrl {
        owner: segments[0].to_string(),
        repo: segments[1].to_string(),
        pr_number,
    })
}

const USER_AGENT: &str = "pr-reviewer";
const PER_PAGE: usize = 100;

/// GitHub REST v3 implementation of [`HostClient`] for one pull request.
pub struct GitHubClient {
    client: reqwest::Client,
    token: String,
    api_url: String,
    pr: PrUrl,
}

#[derive(Deserialize)]
struct GitRef {
    #[serde(rename = "ref")]
    name: String,
    sha: String,
}

#[derive(Deserialize)]
struct PullResponse {
    number: u64,
    title: String,
    head: GitRef,
}

#[derive(Deserialize)]
struct FileResponse {
    filename: String,
    status: String,
    patch: Option<String>,
    previous_filename: Option<String>,
}

#[derive(Deserialize)]
struct CommentResponse {
    id: u64,
    body: Option<String>,
}

#[derive(Deserialize)]
struct CommitDetail {
    message: String,
}

#[derive(Deserialize)]
struct CommitResponse {
    commit: CommitDetail,
}

impl GitHubClient {
    pub fn new(pr: PrUrl, config: &crate::config::Config) -> Result<Self, PrError> {
        let token = config.github_token().ok_or(PrError::MissingToken)?;
        Ok(Self {
            client: reqwest::Client::new(),
            token,
            api_url: config.github.api_url.trim_end_matches('/').to_string(),
            pr,
        })
    }

    fn repo_url(&self) -> String {
        format!("{}/repos/{}/{}", self.api_url, self.pr.owner, self.pr.repo)
    }

    fn pull_url(&self) -> String {
        format!("{}/pulls/{}", self.repo_url(), self.pr.pr_number)
    }

    fn issue_comments_url(&self) -> String {
        format!("{}/issues/{}/comments", self.repo_url(), self.pr.pr_number)
    }

    async fn get<T: serde::de::DeserializeOwned>(&self, url: &str) -> Result<T, PrError> {
        let response = self
            .client
            .get(url)
            .header("User-Agent", USER_AGENT)
            .header("Accept", "application/vnd.github+json")
            .bearer_auth(&self.token)
            .send()
            .await?
            .error_for_status()?;
        Ok(response.json::<T>().await?)
    }

    async fn post(&self, url: &str, body: serde_json::Value) -> Result<(), PrError> {
        self.client
            .post(url)
            .header("User-Agent", USER_AGENT)
            .header("Accept", "application/vnd.github+json")
            .bearer_auth(&self.token)
            .json(&body)
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }

    async fn delete(&self, url: &str) -> Result<(), PrError> {
        self.client
            .delete(url)
            .header("User-Agent", USER_AGENT)
            .header("Accept", "application/vnd.github+json")
            .bearer_auth(&self.token)
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }

    /// Ids of the comments listed at `list_url` whose body contains `marker`.
    async fn marked_comment_ids(&self, list_url: &str, marker: &str) -> Result<Vec<u64>, PrError> {
        let mut ids = Vec::new();
        for page in 1.. {
            let url = format!("{list_url}?per_page={PER_PAGE}&page={page}");
            let batch: Vec<CommentResponse> = self.get(&url).await?;
            let done = batch.len() < PER_PAGE;
            ids.extend(marked_ids(batch, marker));
            if done {
                break;
            }
        }
        Ok(ids)
    }

    async fn changed_files(&self) -> Result<Vec<ChangedFile>, PrError> {
        let mut files = Vec::new();
        for page in 1.. {
            let url = format!("{}/files?per_page={PER_PAGE}&page={page}", self.pull_url());
            let batch: Vec<FileResponse> = self.get(&url).await?;
            let done = batch.len() < PER_PAGE;
            files.extend(batch.into_iter().map(|f| ChangedFile {
                status: FileStatus::from_github(&f.status),
                path: f.filename,
                patch: f.patch,
                previous_path: f.previous_filename,
            }));
            if done {
                break;
            }
        }
        Ok(files)
    }
}

fn marked_ids(comments: Vec<CommentResponse>, marker: &str) -> impl Iterator<Item = u64> + '_ {
    comments
        .into_iter()
        .filter(move |c| c.body.as_deref().is_some_and(|b| b.contains(marker)))
        .map(|c| c.id)
}

#[async_trait]
impl HostClient for GitHubClient {
    #[instrument(
        skip(self),
        fields(owner = %self.pr.owner, repo = %self.pr.repo, pr = self.pr.pr_number)
    )]
    async fn pull_request(&self) -> Result<PullRequest, PrError> {
        debug!("fetching PR metadata from GitHub API");
        let metadata: PullResponse = self.get(&self.pull_url()).await?;
        debug!(title = %metadata.title, branch = %metadata.head.name, "received PR metadata");

        let files = self.changed_files().await?;
        debug!(files = files.len(), "received changed files");

        let commits: Vec<CommitResponse> = self
            .get(&format!("{}/commits?per_page=100", self.pull_url()))
            .await?;

        Ok(PullRequest {
            number: metadata.number,
            title: metadata.title,
            branch: metadata.head.name,
            head_sha: metadata.head.sha,
            commit_messages: commits.into_iter().map(|c| c.commit.message).collect(),
            files,
        })
    }

    async fn head_sha(&self) -> Result<String, PrError> {
        let metadata: PullResponse = self.get(&self.pull_url()).await?;
        Ok(metadata.head.sha)
    }

    async fn post_inline_comment(
        &self,
        commit_id: &str,
        comment: &InlineComment,
    ) -> Result<(), PrError> {
        let body = json!({
            "body": comment.body,
            "commit_id": commit_id,
            "path": comment.path,
            "line": comment.line,
            "side": "RIGHT",
        });
        self.post(&format!("{}/comments", self.pull_url()), body).await
    }

    async fn post_summary_comment(&self, body: &str) -> Result<(), PrError> {
        self.post(&self.issue_comments_url(), json!({ "body": body })).await
    }

    async fn submit_verdict(
        &self,
        commit_id: &str,
        verdict: Verdict,
        body: &str,
    ) -> Result<(), PrError> {
        let event = match verdict {
            Verdict::Approve => "APPROVE",
            Verdict::ChangesRequested => "REQUEST_CHANGES",
        };
        let payload = json!({ "commit_id": commit_id, "event": event, "body": body });
        self.post(&format!("{}/reviews", self.pull_url()), payload).await
    }

    #[instrument(skip(self), fields(pr = self.pr.pr_number))]
    async fn delete_comments_containing(&self, marker: &str) -> Result<usize, PrError> {
        let mut deleted = 0;
        for id in self.marked_comment_ids(&self.issue_comments_url(), marker).await? {
            self.delete(&format!("{}/issues/comments/{id}", self.repo_url())).await?;
            deleted += 1;
        }
        let review_comments = format!("{}/comments", self.pull_url());
        for id in self.marked_comment_ids(&review_comments, marker).await? {
            self.delete(&format!("{}/pulls/comments/{id}", self.repo_url())).await?;
            deleted += 1;
        }
        debug!(deleted, "deleted earlier comments");
        Ok(deleted)
    }
}
