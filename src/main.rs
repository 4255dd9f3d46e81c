use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use thiserror::Error;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use ci_worker::config::{ConfigError, PROJECT_CONFIG_FILE, ProjectConfig, WorkerConfig};
use ci_worker::github::{GitHubApiError, GitHubReporter};
use ci_worker::report::{ConsoleTransport, ReportTransport};
use ci_worker::server::{AppState, build_router};
use ci_worker::types::{PrNumber, RepoId, Sha};
use ci_worker::watch::{POLL_PERIOD, watch_files};
use ci_worker::worker::{EnqueueError, EnqueueRequest, QueueSettings, WorkerQueue};
use ci_worker::workspace::{WorkspaceProvisioner, WorkspaceSettings};

#[derive(Debug, Parser)]
#[command(name = "ci-worker", version, about = "Self-hosted CI worker for GitHub")]
struct Cli {
    /// Worker config file; written as a template if missing.
    #[arg(long, global = true, default_value = "ci-worker.yml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Serve webhooks until the config file or the executable changes (default).
    Serve,

    /// Run one job now and wait for it.
    Run {
        /// Repository as `owner/name`.
        repo: String,

        /// Checkout path under the cache root instead of `github.com/owner/name`.
        #[arg(long)]
        alt_path: Option<String>,

        /// Commit to check; defaults to the head of the pull request or the
        /// default branch.
        #[arg(long, default_value = "")]
        commit: String,

        /// Pull request number.
        #[arg(long)]
        pull: Option<u64>,

        /// Clone over SSH instead of HTTPS.
        #[arg(long)]
        ssh: bool,

        /// Print results to stdout instead of publishing them to GitHub.
        #[arg(long)]
        local: bool,
    },

    /// Validate a repository's check list.
    CheckConfig {
        /// Directory holding the check list.
        #[arg(default_value = ".")]
        dir: PathBuf,
    },
}

#[derive(Debug, Error)]
enum AppError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    GitHub(#[from] GitHubApiError),

    #[error(transparent)]
    Enqueue(#[from] EnqueueError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid repository {0:?}, expected owner/name")]
    InvalidRepo(String),
}

/// Log filter used when `RUST_LOG` is unset.
const DEFAULT_LOG_FILTER: &str = "ci_worker=info";

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| DEFAULT_LOG_FILTER.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();
    let result = match cli.command.unwrap_or(Command::Serve) {
        Command::Serve => serve(&cli.config).await,
        Command::Run {
            repo,
            alt_path,
            commit,
            pull,
            ssh,
            local,
        } => {
            let repo = RepoId::parse(&repo).ok_or(AppError::InvalidRepo(repo));
            match repo {
                Ok(repo) => {
                    let request = EnqueueRequest::new(repo, Sha::new(commit))
                        .with_alt_path(alt_path)
                        .with_pull(pull.filter(|&n| n != 0).map(PrNumber))
                        .with_ssh(ssh);
                    run_once(&cli.config, request, local).await
                }
                Err(err) => Err(err),
            }
        }
        Command::CheckConfig { dir } => check_config(&dir),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(AppError::Config(ConfigError::WroteTemplate(path))) => {
            eprintln!(
                "Wrote a new config to {}; edit it, then run again.",
                path.display()
            );
            ExitCode::FAILURE
        }
        Err(err) => {
            tracing::error!(error = %err, "exiting");
            ExitCode::FAILURE
        }
    }
}

/// Loads the worker config; workspaces live next to it.
fn load(config_path: &Path) -> Result<(WorkerConfig, PathBuf), AppError> {
    let config = WorkerConfig::load(config_path)?;
    let config_path = std::path::absolute(config_path)?;
    let work_dir = config_path
        .parent()
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."));
    Ok((config, work_dir))
}

fn queue<T: ReportTransport>(
    config: &WorkerConfig,
    work_dir: PathBuf,
    transport: Arc<T>,
) -> WorkerQueue<T, WorkspaceProvisioner> {
    let provisioner = WorkspaceProvisioner::new(WorkspaceSettings::from_config(config, work_dir));
    WorkerQueue::new(QueueSettings::from_config(config), transport, provisioner)
}

async fn serve(config_path: &Path) -> Result<(), AppError> {
    let (config, work_dir) = load(config_path)?;
    let transport = Arc::new(GitHubReporter::from_token(
        config.oauth2_access_token.clone(),
        config.name.clone(),
    )?);
    let queue = queue(&config, work_dir, transport);
    let app = build_router(AppState::new(
        queue.clone(),
        config.webhook_secret.as_bytes().to_vec(),
    ));

    let executable = std::env::current_exe()?;
    let watched = vec![config_path.to_path_buf(), executable];

    let listener = tokio::net::TcpListener::bind(("0.0.0.0", config.port)).await?;
    tracing::info!(
        name = %config.name,
        addr = %listener.local_addr()?,
        "listening"
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            match watch_files(&watched, POLL_PERIOD).await {
                Ok(path) => tracing::info!(path = %path.display(), "changed, shutting down"),
                Err(err) => {
                    // Without a watcher, serve until killed.
                    tracing::warn!(error = %err, "cannot watch files");
                    std::future::pending::<()>().await;
                }
            }
        })
        .await?;

    tracing::info!(outstanding = queue.outstanding(), "waiting for queued jobs");
    queue.wait().await;
    Ok(())
}

async fn run_once(config_path: &Path, request: EnqueueRequest, local: bool) -> Result<(), AppError> {
    let (config, work_dir) = load(config_path)?;
    if local {
        let queue = queue(&config, work_dir, Arc::new(ConsoleTransport::default()));
        queue.enqueue(request).await?;
        queue.wait().await;
    } else {
        let transport = Arc::new(GitHubReporter::from_token(
            config.oauth2_access_token.clone(),
            config.name.clone(),
        )?);
        let queue = queue(&config, work_dir, transport);
        queue.enqueue(request).await?;
        queue.wait().await;
    }
    Ok(())
}

fn check_config(dir: &Path) -> Result<(), AppError> {
    let project = ProjectConfig::load(dir)?;
    println!("{}: version {}", dir.join(PROJECT_CONFIG_FILE).display(), project.version);
    for worker in &project.workers {
        let name = if worker.name.is_empty() {
            "(any worker)"
        } else {
            worker.name.as_str()
        };
        println!("{name}:");
        for check in &worker.checks {
            println!("  {}", check.display());
        }
    }
    Ok(())
}
