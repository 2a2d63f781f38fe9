mod config;
mod context;
mod orchestrator;
mod pr;
mod report;
mod review;
mod ticket;

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tracing::{debug, info, info_span, warn, Instrument};
use tracing_subscriber::EnvFilter;

use crate::context::{DocumentStore, FsDocumentStore};
use crate::orchestrator::{Orchestrator, OrchestratorError, Publication, RunOutcome};
use crate::pr::{GitHubClient, HostClient};
use crate::review::{OpenAiModel, ReviewModel};
use crate::ticket::{HttpTrackerClient, TrackerClient};

/// PR Reviewer: reviews a GitHub pull request against its ticket and
/// requirement documents with an LLM, then posts inline comments, a summary
/// and a verdict.
#[derive(Parser, Debug)]
#[command(name = "pr-reviewer", version, about)]
struct Cli {
    /// GitHub Pull Request URL (e.g., https://github.com/org/repo/pull/42)
    pr_url: String,

    /// Config file (defaults to .pr-reviewer.toml in the current directory)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Also write the markdown summary to this file
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Run the review but print the summary instead of posting it
    #[arg(long)]
    dry_run: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(true)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let span = info_span!("pr_review", pr_url = %cli.pr_url, dry_run = cli.dry_run);
    run(cli).instrument(span).await
}

async fn run(cli: Cli) -> Result<(), Box<dyn std::error::Error>> {
    info!("parsing PR URL");
    let parsed_url = pr::parse_pr_url(&cli.pr_url)?;
    debug!(
        owner = %parsed_url.owner,
        repo = %parsed_url.repo,
        pr = parsed_url.pr_number,
        "parsed PR URL"
    );

    info!("loading configuration");
    let config = Arc::new(config::Config::load(cli.config.as_deref())?);

    let host = GitHubClient::new(parsed_url, &config)?;
    info!("fetching pull request from GitHub");
    let pull_request = host.pull_request().await?;
    info!(
        files = pull_request.files.len(),
        commits = pull_request.commit_messages.len(),
        head = %pull_request.head_sha,
        "fetched PR metadata"
    );

    let tracker = HttpTrackerClient::from_config(&config.tracker)
        .map(|c| Arc::new(c) as Arc<dyn TrackerClient>);
    let documents: Arc<dyn DocumentStore> = Arc::new(FsDocumentStore::new(
        config.documents.root.clone(),
        &config.documents.extensions,
    ));
    let model = match OpenAiModel::from_config(&config.model) {
        Ok(model) => Some(Arc::new(model) as Arc<dyn ReviewModel>),
        Err(e) => {
            warn!(error = %e, "review model unavailable");
            None
        }
    };

    let orchestrator = Orchestrator::new(Arc::clone(&config), tracker, documents, model);

    let outcome = match orchestrator.run(&pull_request).await {
        Ok(outcome) => outcome,
        Err(OrchestratorError::ConfigurationMissing(what)) => {
            if !cli.dry_run {
                orchestrator
                    .publish_configuration_missing(&host, &pull_request, &what)
                    .await?;
            }
            return Err(OrchestratorError::ConfigurationMissing(what).into());
        }
        Err(e) => return Err(e.into()),
    };

    if let (Some(path), RunOutcome::Reviewed(review)) = (cli.output.as_deref(), &outcome) {
        report::output(&review.summary, Some(path))?;
    }

    if cli.dry_run {
        match &outcome {
            RunOutcome::TicketRequired => println!("{}", report::TICKET_REQUIRED_COMMENT),
            RunOutcome::Reviewed(review) => report::output(&review.summary, None)?,
        }
        info!("dry run, nothing posted");
        return Ok(());
    }

    match orchestrator.publish(&host, &pull_request, &outcome).await? {
        Publication::Published { inline_comments } => info!(inline_comments, "done"),
        Publication::Superseded { head_sha } => info!(%head_sha, "superseded, nothing posted"),
    }

    Ok(())
}
