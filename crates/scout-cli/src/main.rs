mod handlers;

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use clap::{ArgGroup, Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use scout_client::{
    ClientConfig, DiscoveryParams, FetchConfig, FollowDiscovery, GithubClient, HtmdExtractor,
    OpenReviewClient, ReqwestFetcher,
};
use scout_core::content::ContentFetcher;
use scout_core::progress::ProgressTracker;
use scout_core::runner::{BatchOptions, RunnerConfig, TaskRunner, TracingRunnerReporter};
use scout_core::task::{NewTask, TaskStatus, TaskTarget};
use scout_core::token_pool::TokenPool;
use scout_core::traits::TaskStore;
use scout_db::{Database, DatabaseConfig, TaskRepository};

use crate::handlers::{
    GITHUB_SOURCE, GithubHandler, HOMEPAGE_SOURCE, HomepageHandler, OPENREVIEW_SOURCE,
    OpenReviewHandler, discovery_summary, persist_logins,
};

#[cfg(feature = "browser")]
type PageRenderer = scout_client::ChromiumRenderer;
#[cfg(not(feature = "browser"))]
type PageRenderer = scout_core::traits::NoRenderer;

#[derive(Parser)]
#[command(name = "scout", version, about = "Researcher profile crawler")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Add a task to the queue
    #[command(group(ArgGroup::new("target").required(true).args(["url", "login", "profile_id"])))]
    Enqueue {
        /// Source that consumes the task (github, homepage, openreview)
        #[arg(long)]
        source: String,

        /// Task type within the source (profile, follow_scan, fetch, forum)
        #[arg(long = "type")]
        task_type: String,

        #[arg(long)]
        url: Option<String>,

        #[arg(long)]
        login: Option<String>,

        #[arg(long)]
        profile_id: Option<String>,

        #[arg(long, default_value_t = 0)]
        priority: i32,

        #[arg(long, default_value_t = 0)]
        depth: u32,

        #[arg(long)]
        batch_id: Option<String>,

        #[arg(long)]
        candidate_id: Option<i64>,
    },

    /// Consume pending tasks of a source until none are left
    Run {
        /// github, homepage or openreview
        #[arg(long)]
        source: String,

        /// Only these task types (comma-separated)
        #[arg(long, value_delimiter = ',')]
        types: Option<Vec<String>>,

        /// Stop after this many tasks
        #[arg(long)]
        max_tasks: Option<u64>,
    },

    /// Walk the follow graph of a GitHub user
    Discover {
        #[arg(long)]
        seed: String,

        #[arg(long, default_value_t = 2)]
        depth: u8,

        #[arg(long, default_value_t = 10)]
        per_side: usize,

        #[arg(long, default_value_t = 200)]
        d2_cap: usize,

        #[arg(long, default_value_t = 300)]
        sleep_min_ms: u64,

        #[arg(long, default_value_t = 800)]
        sleep_max_ms: u64,

        /// Upsert discovered logins into the database
        #[arg(long, default_value_t = false)]
        save: bool,
    },

    /// Fetch one page with the tiered strategy and print the result
    Fetch {
        #[arg(short, long)]
        url: String,
    },

    /// Show the masked state of the configured GitHub tokens
    Tokens,
}

#[tokio::main]
async fn main() -> Result<()> {
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("scout=info".parse()?))
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Enqueue {
            source,
            task_type,
            url,
            login,
            profile_id,
            priority,
            depth,
            batch_id,
            candidate_id,
        } => {
            let target = match (url, login, profile_id) {
                (Some(url), _, _) => TaskTarget::Url(url),
                (_, Some(login), _) => TaskTarget::Login(login),
                (_, _, Some(id)) => TaskTarget::ProfileId(id),
                _ => bail!("one of --url, --login or --profile-id is required"),
            };
            let mut task = NewTask::new(source, task_type, target)
                .with_priority(priority)
                .with_depth(depth);
            if let Some(batch) = batch_id {
                task = task.with_batch_id(batch);
            }
            if let Some(candidate) = candidate_id {
                task = task.with_candidate_id(candidate);
            }
            cmd_enqueue(task).await?;
        }
        Commands::Run {
            source,
            types,
            max_tasks,
        } => {
            let mut options = BatchOptions::default();
            if let Some(types) = types {
                options = options.with_task_types(types);
            }
            if let Some(max) = max_tasks {
                options = options.with_max_tasks(max);
            }
            cmd_run(&source, options).await?;
        }
        Commands::Discover {
            seed,
            depth,
            per_side,
            d2_cap,
            sleep_min_ms,
            sleep_max_ms,
            save,
        } => {
            let params = DiscoveryParams {
                depth: depth.min(2),
                per_side,
                d2_cap,
                sleep_range: (
                    Duration::from_millis(sleep_min_ms),
                    Duration::from_millis(sleep_max_ms.max(sleep_min_ms)),
                ),
            };
            cmd_discover(&seed, &params, save).await?;
        }
        Commands::Fetch { url } => cmd_fetch(&url).await?,
        Commands::Tokens => cmd_tokens()?,
    }

    Ok(())
}

/// Connects with `DATABASE_URL` and applies pending migrations.
async fn connect_db() -> Result<Database> {
    let config = DatabaseConfig::from_env()?;
    let db = Database::connect(&config)
        .await
        .context("Failed to connect to database")?;
    db.migrate().await?;
    Ok(db)
}

/// Cancels `token` on the first Ctrl-C.
fn cancel_on_ctrl_c(token: CancellationToken) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Stop requested, finishing current task");
            token.cancel();
        }
    });
}

async fn open_renderer(config: &FetchConfig) -> Option<PageRenderer> {
    if !config.browser_enabled {
        return None;
    }
    #[cfg(feature = "browser")]
    {
        match scout_client::ChromiumRenderer::with_timeout(config.browser_timeout).await {
            Ok(renderer) => Some(renderer),
            Err(e) => {
                tracing::warn!(error = %e, "Headless browser unavailable, rendering disabled");
                None
            }
        }
    }
    #[cfg(not(feature = "browser"))]
    {
        tracing::debug!("Built without the browser feature, rendering disabled");
        None
    }
}

async fn content_fetcher(
    config: &FetchConfig,
) -> Result<ContentFetcher<ReqwestFetcher, HtmdExtractor, PageRenderer>> {
    Ok(ContentFetcher::with_renderer(
        ReqwestFetcher::new()?,
        HtmdExtractor::new(),
        open_renderer(config).await,
        config.settings(),
    ))
}

async fn cmd_enqueue(task: NewTask) -> Result<()> {
    let db = connect_db().await?;
    let id = db.task_repo().create_task(&task).await?;
    tracing::info!(id, source = %task.source, task_type = %task.task_type, target = %task.target, "Task enqueued");
    println!("{id}");
    Ok(())
}

async fn cmd_run(source: &str, options: BatchOptions) -> Result<()> {
    let db = connect_db().await?;
    let runner = Arc::new(TaskRunner::new(
        db.task_repo(),
        ProgressTracker::new(),
        RunnerConfig::default(),
    ));

    let shutdown = CancellationToken::new();
    cancel_on_ctrl_c(shutdown.clone());
    {
        let runner = Arc::clone(&runner);
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            shutdown.cancelled().await;
            runner.stop();
        });
    }

    let outcome = match source {
        GITHUB_SOURCE => {
            let client = GithubClient::from_config(&ClientConfig::from_env()?)?;
            let discovery =
                FollowDiscovery::new(ReqwestFetcher::new()?).with_cancellation(shutdown.clone());
            let handler = GithubHandler::new(
                client,
                db.login_repo(),
                db.task_repo(),
                discovery,
                DiscoveryParams::default(),
            );
            run_source(&runner, source, &handler, options).await?
        }
        HOMEPAGE_SOURCE => {
            let fetcher = content_fetcher(&FetchConfig::from_env()?).await?;
            let handler = HomepageHandler::new(fetcher, db.content_repo());
            run_source(&runner, source, &handler, options).await?
        }
        OPENREVIEW_SOURCE => {
            let client = OpenReviewClient::new(ReqwestFetcher::new()?);
            let handler = OpenReviewHandler::new(client, db.task_repo(), db.openreview_repo());
            run_source(&runner, source, &handler, options).await?
        }
        other => bail!(
            "unknown source '{other}' (expected {GITHUB_SOURCE}, {HOMEPAGE_SOURCE} or {OPENREVIEW_SOURCE})"
        ),
    };

    let repo = db.task_repo();
    let pending = repo.count_by_status(source, TaskStatus::Pending).await?;
    let failed = repo.count_by_status(source, TaskStatus::Failed).await?;
    tracing::info!(%source, pending, failed, "Queue state after round");

    println!("{}", serde_json::to_string_pretty(&outcome)?);
    Ok(())
}

async fn run_source<H: scout_core::runner::TaskHandler>(
    runner: &TaskRunner<TaskRepository>,
    source: &str,
    handler: &H,
    options: BatchOptions,
) -> Result<scout_core::runner::RunOutcome> {
    let outcome = runner
        .run_batch(source, handler, options, &TracingRunnerReporter)
        .await?;
    Ok(outcome)
}

async fn cmd_discover(seed: &str, params: &DiscoveryParams, save: bool) -> Result<()> {
    let db = if save { Some(connect_db().await?) } else { None };

    let shutdown = CancellationToken::new();
    cancel_on_ctrl_c(shutdown.clone());
    let discovery = FollowDiscovery::new(ReqwestFetcher::new()?).with_cancellation(shutdown);

    let result = discovery.discover_logins(seed, params).await;

    if let Some(db) = db {
        let (inserted, duplicate) = persist_logins(&db.login_repo(), &result).await?;
        tracing::info!(%seed, summary = %discovery_summary(&result, inserted, duplicate), "Discovered logins saved");
    }

    println!("{}", serde_json::to_string_pretty(&result)?);
    Ok(())
}

async fn cmd_fetch(url: &str) -> Result<()> {
    let fetcher = content_fetcher(&FetchConfig::from_env()?).await?;
    let result = fetcher.fetch(url).await;
    println!("{}", serde_json::to_string_pretty(&result)?);
    Ok(())
}

fn cmd_tokens() -> Result<()> {
    let config = ClientConfig::from_env()?;
    let pool = TokenPool::from_records(config.tokens);
    if pool.is_empty() {
        bail!("no GitHub tokens configured (SCOUT_TOKENS_FILE or GITHUB_TOKENS)");
    }
    println!("{}", serde_json::to_string_pretty(&pool.snapshot())?);
    Ok(())
}
