//! One review run: ticket, context, scoping, per-file reviews, aggregation
//! and publication.

use std::sync::Arc;

use thiserror::Error;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, info, info_span, instrument, warn, Instrument};

use crate::config::Config;
use crate::context::{self, DocumentStore, RequirementContext};
use crate::pr::scope::{attach_full_text, scope, ScopeRules};
use crate::pr::{DiffFile, HostClient, InlineComment, PrError, PullRequest};
use crate::report::{self, ReviewSummary};
use crate::review::prompt::{self, PrOverview};
use crate::review::{FileOutcome, ReviewClient, ReviewInstructions, ReviewModel};
use crate::ticket::{self, TicketKey, TicketStatus, TrackerClient};

#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error("{0} is not configured")]
    ConfigurationMissing(String),

    #[error(transparent)]
    Host(#[from] PrError),
}

/// A completed review, ready to publish.
#[derive(Debug, Clone)]
pub struct Review {
    pub summary: ReviewSummary,
    /// Findings that can be anchored on a changed line
    pub inline_comments: Vec<InlineComment>,
}

#[derive(Debug, Clone)]
pub enum RunOutcome {
    /// A ticket is required and none was referenced; nothing was reviewed.
    TicketRequired,
    Reviewed(Review),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Publication {
    Published { inline_comments: usize },
    /// A newer commit arrived while the run was in progress.
    Superseded { head_sha: String },
}

pub struct Orchestrator {
    config: Arc<Config>,
    tracker: Option<Arc<dyn TrackerClient>>,
    documents: Arc<dyn DocumentStore>,
    model: Option<Arc<dyn ReviewModel>>,
}

impl Orchestrator {
    pub fn new(
        config: Arc<Config>,
        tracker: Option<Arc<dyn TrackerClient>>,
        documents: Arc<dyn DocumentStore>,
        model: Option<Arc<dyn ReviewModel>>,
    ) -> Self {
        Self {
            config,
            tracker,
            documents,
            model,
        }
    }

    async fn ticket_status(&self, key: Option<TicketKey>) -> TicketStatus {
        let Some(tracker) = &self.tracker else {
            return TicketStatus::NotConfigured { key };
        };
        let Some(key) = key else {
            return TicketStatus::NoKey;
        };
        match ticket::load_ticket(tracker.as_ref(), &key, self.config.tracker.timeout()).await {
            Ok(ticket) => TicketStatus::Loaded(ticket),
            Err(failure) => TicketStatus::Unavailable {
                key,
                reason: failure.reason,
            },
        }
    }

    /// Review a pull request. Nothing is published here; see [`Orchestrator::publish`].
    #[instrument(skip_all, fields(pr = pr.number))]
    pub async fn run(&self, pr: &PullRequest) -> Result<RunOutcome, OrchestratorError> {
        let key = ticket::resolve(&pr.branch, &pr.title, &pr.commit_messages);
        if key.is_none() && self.config.tracker.required {
            info!("no ticket key found and a ticket is required, skipping review");
            return Ok(RunOutcome::TicketRequired);
        }

        let mut files = scope(&pr.files, &ScopeRules::from_config(&self.config.diff));
        info!(changed = pr.files.len(), scoped = files.len(), "scoped diff");

        if self.model.is_none() && !files.is_empty() {
            return Err(OrchestratorError::ConfigurationMissing("review model API key".to_string()));
        }

        let documents = &self.config.documents;
        let (status, document_context) = tokio::join!(
            self.ticket_status(key),
            context::load_documents(
                self.documents.as_ref(),
                &documents.search_paths,
                documents.max_chars,
                documents.timeout(),
            )
        );
        debug!(ticket = %status.describe(), "ticket context resolved");

        let context = RequirementContext::assemble(
            status.ticket(),
            self.config.tracker.max_chars,
            document_context,
        );

        if let Some(root) = &self.config.review.repo_root {
            // one extra character lets the prompt mark the cut
            let max_chars = self.config.diff.max_file_chars.saturating_add(1);
            attach_full_text(&mut files, root, max_chars, documents.timeout()).await;
        }

        let outcomes = self.review_files(&files, &context).await;
        let policy = self.config.review.missing_requirements;
        let summary = report::aggregate(outcomes, &status, &context, policy);
        let inline_comments = inline_comments(&files, &summary.files);
        info!(verdict = %summary.verdict, inline = inline_comments.len(), "review complete");

        Ok(RunOutcome::Reviewed(Review {
            summary,
            inline_comments,
        }))
    }

    /// Review every file concurrently, bounded by `review.max_concurrent`.
    /// Outcomes come back in `files` order whatever the completion order.
    async fn review_files(
        &self,
        files: &[DiffFile],
        context: &RequirementContext,
    ) -> Vec<FileOutcome> {
        let Some(model) = self.model.clone() else {
            return Vec::new();
        };
        let instructions = ReviewInstructions::from_config(&self.config.review);
        let overview = PrOverview::from_files(files);
        let client = ReviewClient::new(model, &self.config.model);
        let semaphore = Arc::new(Semaphore::new(self.config.review.max_concurrent.max(1)));
        let mut join_set = JoinSet::new();

        for (index, file) in files.iter().enumerate() {
            let prompt = prompt::compose(
                file,
                &overview,
                context,
                &instructions,
                self.config.diff.max_diff_chars,
                self.config.diff.max_file_chars,
            );
            let client = client.clone();
            let sem = Arc::clone(&semaphore);
            let path = file.path.clone();
            let span = info_span!("review_file", path = %path);

            join_set.spawn(
                async move {
                    let Ok(_permit) = sem.acquire_owned().await else {
                        let reason = "cancelled".to_string();
                        return (index, FileOutcome::NotReviewed { path, reason });
                    };
                    let reviewed = client.review(&path, &prompt).await;
                    let outcome = match reviewed {
                        Ok(result) => FileOutcome::Reviewed(result),
                        Err(failure) => {
                            warn!(error = %failure, "file not reviewed");
                            FileOutcome::NotReviewed {
                                reason: failure.reason(),
                                path,
                            }
                        }
                    };
                    (index, outcome)
                }
                .instrument(span),
            );
        }

        let mut slots: Vec<Option<FileOutcome>> = vec![None; files.len()];
        while let Some(joined) = join_set.join_next().await {
            match joined {
                Ok((index, outcome)) => slots[index] = Some(outcome),
                Err(e) => warn!(error = %e, "review task failed"),
            }
        }

        slots
            .into_iter()
            .zip(files)
            .map(|(slot, file)| {
                slot.unwrap_or_else(|| FileOutcome::NotReviewed {
                    path: file.path.clone(),
                    reason: "internal_error".to_string(),
                })
            })
            .collect()
    }

    /// The current head commit when it differs from the one `pr` was
    /// reviewed at.
    async fn newer_head(
        &self,
        host: &dyn HostClient,
        pr: &PullRequest,
    ) -> Result<Option<String>, OrchestratorError> {
        let head_sha = host.head_sha().await?;
        if head_sha == pr.head_sha {
            return Ok(None);
        }
        warn!(
            reviewed = %pr.head_sha,
            current = %head_sha,
            "run superseded by a newer commit, not publishing"
        );
        Ok(Some(head_sha))
    }

    /// Remove what earlier runs posted. Failure only costs duplicate comments.
    async fn delete_previous_comments(&self, host: &dyn HostClient) {
        match host.delete_comments_containing(report::COMMENT_MARKER).await {
            Ok(0) => {}
            Ok(deleted) => info!(deleted, "deleted comments from earlier runs"),
            Err(e) => warn!(error = %e, "could not delete comments from earlier runs"),
        }
    }

    /// Publish a finished run. The head commit is checked first; a run that
    /// was superseded by a newer commit posts nothing.
    #[instrument(skip_all, fields(pr = pr.number))]
    pub async fn publish(
        &self,
        host: &dyn HostClient,
        pr: &PullRequest,
        outcome: &RunOutcome,
    ) -> Result<Publication, OrchestratorError> {
        if let Some(head_sha) = self.newer_head(host, pr).await? {
            return Ok(Publication::Superseded { head_sha });
        }
        self.delete_previous_comments(host).await;

        let review = match outcome {
            RunOutcome::TicketRequired => {
                host.post_summary_comment(&report::tagged(report::TICKET_REQUIRED_COMMENT))
                    .await?;
                return Ok(Publication::Published { inline_comments: 0 });
            }
            RunOutcome::Reviewed(review) => review,
        };

        let mut posted = 0;
        for comment in &review.inline_comments {
            let comment = InlineComment {
                body: report::tagged(&comment.body),
                ..comment.clone()
            };
            match host.post_inline_comment(&pr.head_sha, &comment).await {
                Ok(()) => posted += 1,
                Err(e) => warn!(
                    path = %comment.path,
                    line = comment.line,
                    error = %e,
                    "inline comment rejected"
                ),
            }
        }

        let summary = report::render_markdown(&review.summary);
        host.post_summary_comment(&report::tagged(&summary)).await?;

        let verdict = review.summary.verdict;
        let body = format!("Automated review verdict: {verdict}");
        host.submit_verdict(&pr.head_sha, verdict, &body).await?;

        info!(inline = posted, %verdict, "review published");
        Ok(Publication::Published { inline_comments: posted })
    }

    /// Explain on the PR why the review could not start. Subject to the same
    /// head commit check as [`Orchestrator::publish`].
    #[instrument(skip_all, fields(pr = pr.number))]
    pub async fn publish_configuration_missing(
        &self,
        host: &dyn HostClient,
        pr: &PullRequest,
        what: &str,
    ) -> Result<Publication, OrchestratorError> {
        if let Some(head_sha) = self.newer_head(host, pr).await? {
            return Ok(Publication::Superseded { head_sha });
        }
        self.delete_previous_comments(host).await;

        let body = report::configuration_missing_comment(what);
        host.post_summary_comment(&report::tagged(&body)).await?;
        Ok(Publication::Published { inline_comments: 0 })
    }
}

/// Findings whose line falls inside a new-side hunk of their file. The rest
/// stay in the summary only.
fn inline_comments(files: &[DiffFile], outcomes: &[FileOutcome]) -> Vec<InlineComment> {
    files
        .iter()
        .zip(outcomes)
        .filter_map(|(file, outcome)| outcome.result().map(|result| (file, result)))
        .flat_map(|(file, result)| {
            result.findings.iter().filter_map(move |finding| {
                let line = finding.line.filter(|&l| file.contains_new_line(l))?;
                Some(InlineComment {
                    path: file.path.clone(),
                    line,
                    body: report::inline_comment_body(finding),
                })
            })
        })
        .collect()
}
