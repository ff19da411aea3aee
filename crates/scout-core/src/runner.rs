use std::collections::HashSet;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::FutureExt;
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::error::AppError;
use crate::progress::ProgressTracker;
use crate::task::{CrawlTask, NewCrawlLog, PendingQuery, TaskOutcome, TaskStatus};
use crate::traits::TaskStore;

/// Runner tuning.
#[derive(Debug, Clone)]
pub struct RunnerConfig {
    /// Pending tasks fetched per query.
    pub page_size: usize,
    /// Pause between two tasks of the same round.
    pub task_delay: Duration,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            page_size: 10,
            task_delay: Duration::from_millis(200),
        }
    }
}

/// Processes one task.
///
/// An `Err` is turned into a failed task, except for
/// [`AppError::ExhaustedTokens`] which puts the task back and aborts the
/// whole round.
pub trait TaskHandler: Send + Sync {
    fn handle(
        &self,
        task: &CrawlTask,
    ) -> impl Future<Output = Result<TaskOutcome, AppError>> + Send;
}

impl<F, Fut> TaskHandler for F
where
    F: Fn(CrawlTask) -> Fut + Send + Sync,
    Fut: Future<Output = Result<TaskOutcome, AppError>> + Send,
{
    fn handle(
        &self,
        task: &CrawlTask,
    ) -> impl Future<Output = Result<TaskOutcome, AppError>> + Send {
        self(task.clone())
    }
}

/// Caller-supplied filter applied to each fetched task.
pub type TaskPredicate = Arc<dyn Fn(&CrawlTask) -> bool + Send + Sync>;

/// Options for [`TaskRunner::run_batch`].
#[derive(Clone, Default)]
pub struct BatchOptions {
    pub task_types: Option<Vec<String>>,
    /// Tasks rejected here stay pending and are not fetched again this round.
    pub predicate: Option<TaskPredicate>,
    pub max_tasks: Option<u64>,
}

impl BatchOptions {
    pub fn with_task_types(mut self, types: Vec<String>) -> Self {
        self.task_types = Some(types);
        self
    }

    pub fn with_predicate<P>(mut self, predicate: P) -> Self
    where
        P: Fn(&CrawlTask) -> bool + Send + Sync + 'static,
    {
        self.predicate = Some(Arc::new(predicate));
        self
    }

    pub fn with_max_tasks(mut self, max: u64) -> Self {
        self.max_tasks = Some(max);
        self
    }

    fn limit_reached(&self, processed: u64) -> bool {
        self.max_tasks.is_some_and(|max| processed >= max)
    }
}

/// Counters of one round.
#[derive(Debug, Clone, Serialize)]
pub struct RunStats {
    pub source: String,
    pub trace_id: String,
    pub processed: u64,
    pub success_count: u64,
    pub fail_count: u64,
    pub skip_count: u64,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    /// Loop ended because `stop()` was observed.
    pub stopped: bool,
}

impl RunStats {
    fn new(source: &str, trace_id: &str) -> Self {
        Self {
            source: source.to_string(),
            trace_id: trace_id.to_string(),
            processed: 0,
            success_count: 0,
            fail_count: 0,
            skip_count: 0,
            start_time: Utc::now(),
            end_time: None,
            stopped: false,
        }
    }
}

/// Result of a runner invocation.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum RunOutcome {
    /// Another round for the source was active; nothing was touched.
    AlreadyRunning { source: String },
    Finished(RunStats),
}

impl RunOutcome {
    pub fn stats(&self) -> Option<&RunStats> {
        match self {
            RunOutcome::Finished(stats) => Some(stats),
            RunOutcome::AlreadyRunning { .. } => None,
        }
    }
}

/// Events emitted by the runner for monitoring/logging.
#[derive(Debug, Clone)]
pub enum RunnerEvent<'a> {
    AlreadyRunning {
        source: &'a str,
    },
    RoundStarted {
        source: &'a str,
        trace_id: &'a str,
    },
    TaskStarted {
        task: &'a CrawlTask,
    },
    TaskFinished {
        task: &'a CrawlTask,
        outcome: &'a TaskOutcome,
    },
    StopObserved {
        source: &'a str,
        trace_id: &'a str,
    },
    RoundFinished {
        stats: &'a RunStats,
    },
    RoundAborted {
        source: &'a str,
        trace_id: &'a str,
        error: &'a AppError,
    },
}

/// Receives runner events; the hook for external progress callbacks.
pub trait RunnerReporter: Send + Sync {
    fn report(&self, event: RunnerEvent<'_>) {
        let _ = event;
    }
}

/// Reporter that uses the `tracing` crate.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingRunnerReporter;

impl RunnerReporter for TracingRunnerReporter {
    fn report(&self, event: RunnerEvent<'_>) {
        match event {
            RunnerEvent::AlreadyRunning { source } => {
                tracing::warn!(%source, "Round already running, skipping");
            }
            RunnerEvent::RoundStarted { source, trace_id } => {
                tracing::info!(%source, %trace_id, "Round started");
            }
            RunnerEvent::TaskStarted { task } => {
                tracing::debug!(
                    task_id = task.id,
                    task_type = %task.task_type,
                    target = %task.target,
                    "Processing task"
                );
            }
            RunnerEvent::TaskFinished { task, outcome } => match outcome {
                TaskOutcome::Fail { message, error } => {
                    tracing::warn!(task_id = task.id, %message, ?error, "Task failed");
                }
                other => {
                    tracing::info!(
                        task_id = task.id,
                        status = %other.log_status(),
                        message = %other.message(),
                        "Task finished"
                    );
                }
            },
            RunnerEvent::StopObserved { source, trace_id } => {
                tracing::info!(%source, %trace_id, "Stop requested, leaving round");
            }
            RunnerEvent::RoundFinished { stats } => {
                tracing::info!(
                    source = %stats.source,
                    trace_id = %stats.trace_id,
                    processed = stats.processed,
                    success = stats.success_count,
                    fail = stats.fail_count,
                    skip = stats.skip_count,
                    "Round finished"
                );
            }
            RunnerEvent::RoundAborted {
                source,
                trace_id,
                error,
            } => {
                tracing::error!(%source, %trace_id, %error, "Round aborted");
            }
        }
    }
}

/// Holds the single-flight claim for a source; releasing it on drop ends
/// the progress round even if the round future is dropped mid-way.
struct RunningGuard {
    running: Arc<Mutex<HashSet<String>>>,
    progress: ProgressTracker,
    source: String,
}

impl RunningGuard {
    fn claim(
        running: &Arc<Mutex<HashSet<String>>>,
        progress: &ProgressTracker,
        source: &str,
    ) -> Option<Self> {
        let claimed = lock_set(running).insert(source.to_string());
        claimed.then(|| Self {
            running: Arc::clone(running),
            progress: progress.clone(),
            source: source.to_string(),
        })
    }
}

impl Drop for RunningGuard {
    fn drop(&mut self) {
        self.progress.end_round(&self.source);
        lock_set(&self.running).remove(&self.source);
    }
}

fn lock_set(set: &Mutex<HashSet<String>>) -> std::sync::MutexGuard<'_, HashSet<String>> {
    set.lock().unwrap_or_else(|poisoned| {
        tracing::warn!("Recovered from poisoned running-set mutex");
        poisoned.into_inner()
    })
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

fn log_entry(task: &CrawlTask, outcome: &TaskOutcome, trace_id: &str) -> NewCrawlLog {
    NewCrawlLog {
        task_id: task.id,
        source: task.source.clone(),
        task_type: task.task_type.clone(),
        target: task.target.value().to_string(),
        status: outcome.log_status(),
        message: outcome.message().to_string(),
        trace_id: trace_id.to_string(),
    }
}

/// Source-scoped consumer of pending crawl tasks.
///
/// At most one round per source is active at a time. Tasks inside a round
/// run one after another in queue order.
pub struct TaskRunner<S: TaskStore> {
    store: S,
    progress: ProgressTracker,
    config: RunnerConfig,
    running: Arc<Mutex<HashSet<String>>>,
    stop: Mutex<CancellationToken>,
}

impl<S: TaskStore> TaskRunner<S> {
    pub fn new(store: S, progress: ProgressTracker, config: RunnerConfig) -> Self {
        Self {
            store,
            progress,
            config,
            running: Arc::new(Mutex::new(HashSet::new())),
            stop: Mutex::new(CancellationToken::new()),
        }
    }

    pub fn progress(&self) -> &ProgressTracker {
        &self.progress
    }

    pub fn is_running(&self, source: &str) -> bool {
        lock_set(&self.running).contains(source)
    }

    fn stop_token(&self) -> CancellationToken {
        self.stop
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    /// Asks every active round to leave after its current task. Rounds
    /// started afterwards are not affected.
    pub fn stop(&self) {
        let mut token = self.stop.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        token.cancel();
        *token = CancellationToken::new();
    }

    /// Consumes pending tasks of `source` until none are left or `stop()`
    /// is observed.
    pub async fn run_until_empty<H: TaskHandler>(
        &self,
        source: &str,
        handler: &H,
        filter_types: Option<Vec<String>>,
    ) -> Result<RunOutcome, AppError> {
        let options = BatchOptions {
            task_types: filter_types,
            ..Default::default()
        };
        self.run_batch(source, handler, options, &TracingRunnerReporter)
            .await
    }

    /// Like [`run_until_empty`](Self::run_until_empty) with a caller
    /// predicate, a task cap and a custom reporter.
    pub async fn run_batch<H, R>(
        &self,
        source: &str,
        handler: &H,
        options: BatchOptions,
        reporter: &R,
    ) -> Result<RunOutcome, AppError>
    where
        H: TaskHandler,
        R: RunnerReporter,
    {
        let Some(_guard) = RunningGuard::claim(&self.running, &self.progress, source) else {
            reporter.report(RunnerEvent::AlreadyRunning { source });
            return Ok(RunOutcome::AlreadyRunning {
                source: source.to_string(),
            });
        };

        let cancel = self.stop_token();
        let trace_id = Uuid::new_v4().to_string();
        let mut stats = RunStats::new(source, &trace_id);

        self.progress.start_round(source);
        reporter.report(RunnerEvent::RoundStarted {
            source,
            trace_id: &trace_id,
        });

        let result = self
            .drive(source, handler, &options, &cancel, &mut stats, reporter)
            .await;
        stats.end_time = Some(Utc::now());

        match result {
            Ok(()) => {
                reporter.report(RunnerEvent::RoundFinished { stats: &stats });
                Ok(RunOutcome::Finished(stats))
            }
            Err(error) => {
                reporter.report(RunnerEvent::RoundAborted {
                    source,
                    trace_id: &trace_id,
                    error: &error,
                });
                Err(error)
            }
        }
    }

    async fn drive<H, R>(
        &self,
        source: &str,
        handler: &H,
        options: &BatchOptions,
        cancel: &CancellationToken,
        stats: &mut RunStats,
        reporter: &R,
    ) -> Result<(), AppError>
    where
        H: TaskHandler,
        R: RunnerReporter,
    {
        let mut excluded: Vec<i64> = Vec::new();

        loop {
            if cancel.is_cancelled() {
                self.observe_stop(source, stats, reporter);
                return Ok(());
            }
            if options.limit_reached(stats.processed) {
                return Ok(());
            }

            let query = PendingQuery {
                source: source.to_string(),
                task_types: options.task_types.clone(),
                exclude_ids: excluded.clone(),
                limit: self.config.page_size.max(1),
            };
            let page = self.store.fetch_pending(&query).await?;
            if page.is_empty() {
                return Ok(());
            }

            for task in page {
                if cancel.is_cancelled() {
                    self.observe_stop(source, stats, reporter);
                    return Ok(());
                }
                if options.limit_reached(stats.processed) {
                    return Ok(());
                }
                if let Some(predicate) = &options.predicate
                    && !predicate(&task)
                {
                    excluded.push(task.id);
                    continue;
                }

                self.process_task(&task, handler, stats, reporter).await?;
                excluded.push(task.id);

                if !self.config.task_delay.is_zero() {
                    tokio::select! {
                        () = tokio::time::sleep(self.config.task_delay) => {}
                        () = cancel.cancelled() => {}
                    }
                }
            }
        }
    }

    fn observe_stop<R: RunnerReporter>(&self, source: &str, stats: &mut RunStats, reporter: &R) {
        stats.stopped = true;
        reporter.report(RunnerEvent::StopObserved {
            source,
            trace_id: &stats.trace_id,
        });
    }

    async fn process_task<H, R>(
        &self,
        task: &CrawlTask,
        handler: &H,
        stats: &mut RunStats,
        reporter: &R,
    ) -> Result<(), AppError>
    where
        H: TaskHandler,
        R: RunnerReporter,
    {
        reporter.report(RunnerEvent::TaskStarted { task });
        if let Err(error) = self.store.update_status(task.id, TaskStatus::Running).await {
            tracing::error!(task_id = task.id, %error, "Failed to claim task, leaving it pending");
            return Ok(());
        }

        let outcome = match AssertUnwindSafe(handler.handle(task)).catch_unwind().await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(error)) if error.is_operator_error() => {
                // Not the task's fault: hand it back to the queue untouched.
                if let Err(e) = self.store.update_status(task.id, TaskStatus::Pending).await {
                    tracing::error!(task_id = task.id, error = %e, "Failed to revert task to pending");
                }
                return Err(error);
            }
            Ok(Err(error)) => {
                TaskOutcome::fail(format!("handler error: {error}"), Some(error.to_string()))
            }
            Err(payload) => {
                let message = panic_message(payload.as_ref());
                TaskOutcome::fail(format!("handler panicked: {message}"), Some(message))
            }
        };

        let outcome = match self.record(task, &outcome, &stats.trace_id).await {
            Ok(()) => outcome,
            Err(error) => {
                tracing::error!(task_id = task.id, %error, "Failed to record task outcome");
                let failed =
                    TaskOutcome::fail(format!("store error: {error}"), Some(error.to_string()));
                self.record_store_failure(task, &failed, &stats.trace_id)
                    .await;
                failed
            }
        };

        stats.processed += 1;
        self.progress.inc_processed(&task.source);
        match &outcome {
            TaskOutcome::Success { .. } => {
                stats.success_count += 1;
                self.progress.inc_success(&task.source);
            }
            TaskOutcome::Skip { .. } => {
                stats.skip_count += 1;
                self.progress.inc_skip(&task.source);
            }
            TaskOutcome::Fail { .. } => {
                stats.fail_count += 1;
                self.progress.inc_fail(&task.source);
            }
        }

        reporter.report(RunnerEvent::TaskFinished {
            task,
            outcome: &outcome,
        });
        Ok(())
    }

    /// Writes the terminal status and the log row of a handled task.
    async fn record(
        &self,
        task: &CrawlTask,
        outcome: &TaskOutcome,
        trace_id: &str,
    ) -> Result<(), AppError> {
        if matches!(outcome, TaskOutcome::Fail { .. }) {
            self.store.increment_retries(task.id).await?;
        }
        self.store
            .update_status(task.id, outcome.task_status())
            .await?;

        let log_id = self
            .store
            .append_log(&log_entry(task, outcome, trace_id))
            .await?;
        if let Some(entity_id) = task.candidate_id {
            self.store.link_log_entity(log_id, entity_id).await?;
        }
        Ok(())
    }

    /// Best effort: a task whose outcome could not be recorded must not
    /// stay `running`.
    async fn record_store_failure(&self, task: &CrawlTask, failed: &TaskOutcome, trace_id: &str) {
        if let Err(error) = self.store.update_status(task.id, TaskStatus::Failed).await {
            tracing::error!(task_id = task.id, %error, "Task left running, status update failed");
        }
        if let Err(error) = self
            .store
            .append_log(&log_entry(task, failed, trace_id))
            .await
        {
            tracing::error!(task_id = task.id, %error, "Failed to log store failure");
        }
    }
}
