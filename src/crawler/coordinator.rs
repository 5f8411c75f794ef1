//! Run orchestration
//!
//! This module ties the pipeline together for one run:
//! - Recording the run and its configuration hash
//! - Seeding the frontier from the selected targets and resuming archived tasks
//! - Driving a bounded pool of workers through fetch, extraction, fusion and storage
//! - Re-processing stored raw documents without fetching (process-only mode)
//! - Honoring cancellation and reporting per-target outcomes

use crate::config::{Config, FetchMode};
use crate::crawler::fetcher::{fetch_with_deadline, FetchError, Fetcher, HttpFetcher};
use crate::crawler::identity::build_http_client;
use crate::crawler::parser::LinkFilter;
use crate::crawler::retry::{RetryPolicy, Retryable};
use crate::crawler::scheduler::{CrawlTask, DomainSignal, EnqueueOutcome, Frontier, TaskOutcome};
use crate::document::FetchedDocument;
use crate::extract::ContentRouter;
use crate::fusion::{
    DisabledInference, FusionEngine, HttpInferenceClient, InferenceClient, RecordStatus,
};
use crate::output::RunSummary;
use crate::registry::Target;
use crate::robots::RobotsCache;
use crate::state::TaskState;
use crate::storage::{open_storage, Persistence, RunStatus, Storage, StorageError, StorageResult};
use crate::{ConfigError, HarvestError};
use futures::future::{self, join_all};
use futures::stream::{self, StreamExt};
use std::collections::HashMap;
use std::fmt;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

/// Log a progress line every this many finished tasks
const PROGRESS_INTERVAL: usize = 10;

/// What a run does
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunMode {
    /// Fetch, extract, fuse and store
    Crawl,
    /// Extract and fuse stored raw documents; never fetches
    ProcessOnly,
}

impl RunMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Crawl => "crawl",
            Self::ProcessOnly => "process-only",
        }
    }
}

impl fmt::Display for RunMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// State shared by the workers of one crawl
struct CrawlContext {
    run_id: i64,
    frontier: Frontier,
    filters: HashMap<String, LinkFilter>,
    finished: AtomicUsize,
}

/// Drives runs over a fixed set of targets
///
/// Cloning is cheap; every clone shares the same storage, fetcher, models
/// and cancellation token.
#[derive(Clone)]
pub struct Orchestrator {
    config: Arc<Config>,
    config_hash: String,
    targets: Vec<Arc<Target>>,
    storage: Persistence,
    fetcher: Arc<dyn Fetcher>,
    robots: Arc<RobotsCache>,
    router: Arc<ContentRouter>,
    engine: Arc<FusionEngine>,
    fetch_retry: RetryPolicy,
    storage_retry: RetryPolicy,
    fetch_deadline: Duration,
    slow_threshold: Duration,
    cancel: CancellationToken,
}

impl Orchestrator {
    /// Creates an orchestrator from configuration
    ///
    /// Opens the database, builds the fetcher for the configured mode and
    /// the inference client.
    ///
    /// # Arguments
    ///
    /// * `config` - Loaded configuration
    /// * `config_hash` - Hash recorded with every run
    /// * `targets` - Targets this orchestrator works on
    /// * `force_http` - Use lightweight HTTP fetching even if browser mode is configured
    ///
    /// # Returns
    ///
    /// * `Ok(Orchestrator)` - Ready to run
    /// * `Err(HarvestError)` - Storage could not be opened or a client could not be built
    pub fn new(
        config: Config,
        config_hash: String,
        targets: Vec<Arc<Target>>,
        force_http: bool,
    ) -> Result<Self, HarvestError> {
        let storage = Persistence::new(open_storage(Path::new(&config.storage.database_path))?);

        let client: Arc<dyn InferenceClient> = if config.inference.enabled {
            Arc::new(HttpInferenceClient::new(&config.inference)?)
        } else {
            tracing::info!("inference disabled, fusing extractor candidates only");
            Arc::new(DisabledInference)
        };

        let fetcher = build_fetcher(&config, force_http)?;
        tracing::info!(fetcher = fetcher.name(), "fetcher ready");

        Self::with_components(config, config_hash, targets, storage, fetcher, client)
    }

    /// Creates an orchestrator around existing components
    pub fn with_components(
        config: Config,
        config_hash: String,
        targets: Vec<Arc<Target>>,
        storage: Persistence,
        fetcher: Arc<dyn Fetcher>,
        client: Arc<dyn InferenceClient>,
    ) -> Result<Self, HarvestError> {
        let retry = RetryPolicy::from_config(&config.retry);
        let storage_retry = retry.clone().with_max_attempts(config.storage.max_attempts);

        let request_timeout = Duration::from_secs(config.fetcher.request_timeout_secs);
        let robots_client = build_http_client(request_timeout, None)
            .map_err(|e| FetchError::Client(e.to_string()))?;

        // Fetchers sleep a pacing delay before each request
        let pacing = Duration::from_millis(config.fetcher.max_action_delay_ms);
        let timeout_secs = if fetcher.name() == "browser" {
            config.fetcher.browser_timeout_secs
        } else {
            config.fetcher.request_timeout_secs
        };

        Ok(Self {
            router: Arc::new(ContentRouter::new(client.clone(), retry.clone())),
            engine: Arc::new(FusionEngine::new(
                client,
                retry.clone(),
                config.inference.clone(),
            )),
            robots: Arc::new(RobotsCache::new(robots_client)),
            fetch_deadline: Duration::from_secs(timeout_secs) + pacing,
            slow_threshold: Duration::from_millis(config.crawler.slow_response_ms) + pacing,
            fetch_retry: retry,
            storage_retry,
            config: Arc::new(config),
            config_hash,
            targets,
            storage,
            fetcher,
            cancel: CancellationToken::new(),
        })
    }

    /// Token that cancels the run when triggered
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Shared handle to the storage backend
    pub fn storage(&self) -> &Persistence {
        &self.storage
    }

    /// Executes one run
    ///
    /// # Arguments
    ///
    /// * `mode` - Crawl or process-only
    /// * `reprocess` - In process-only mode, mark every stored document of the
    ///   targets stale first so all of them are fused again
    ///
    /// # Returns
    ///
    /// * `Ok(RunSummary)` - The run finished or was interrupted; per-target
    ///   failures are reported in the summary
    /// * `Err(HarvestError)` - Storage failed beyond its retry cap
    pub async fn run(&self, mode: RunMode, reprocess: bool) -> Result<RunSummary, HarvestError> {
        let run_id = self
            .storage
            .with(|s| s.create_run(&self.config_hash, mode.as_str()))?;
        tracing::info!(
            run_id,
            mode = mode.as_str(),
            targets = self.targets.len(),
            "starting run"
        );

        let started = Instant::now();
        let result = match mode {
            RunMode::Crawl => self.crawl(run_id).await,
            RunMode::ProcessOnly => self.process_stored(reprocess).await,
        };

        let status = match &result {
            Err(_) => RunStatus::Failed,
            Ok(_) if self.cancel.is_cancelled() => RunStatus::Interrupted,
            Ok(_) => RunStatus::Completed,
        };
        if let Err(e) = self.storage.with(|s| s.finish_run(run_id, status)) {
            tracing::error!(run_id, "failed to record run status: {}", e);
        }

        let mut summary = result?;
        summary.run_id = run_id;
        summary.status = status;
        summary.elapsed = started.elapsed();

        tracing::info!(
            run_id,
            status = status.to_db_string(),
            elapsed_secs = summary.elapsed.as_secs(),
            "run finished"
        );
        Ok(summary)
    }

    async fn crawl(&self, run_id: i64) -> Result<RunSummary, HarvestError> {
        let frontier = Frontier::new(self.config.crawler.clone(), self.fetch_retry.clone());
        let mut filters = HashMap::new();

        for target in &self.targets {
            let filter = LinkFilter::new(&target.root_domain, &self.config.crawler.follow_patterns)
                .map_err(|e| ConfigError::InvalidPattern(e.to_string()))?;
            filters.insert(target.id.clone(), filter);

            for seed in &target.seeds {
                match frontier.enqueue(&target.id, seed.as_str(), 0) {
                    EnqueueOutcome::Queued | EnqueueOutcome::Duplicate => {}
                    outcome => tracing::warn!(
                        target_id = %target.id,
                        url = %seed,
                        "seed not queued: {:?}",
                        outcome
                    ),
                }
            }
        }

        let resumed = self.resume(&frontier)?;
        let pending = frontier.pending_tasks();
        tracing::info!(tasks = pending.len(), resumed, "frontier seeded");

        self.storage.with(|s| {
            for task in &pending {
                s.upsert_task(run_id, task, TaskState::Pending, None)?;
            }
            Ok(())
        })?;

        let context = Arc::new(CrawlContext {
            run_id,
            frontier,
            filters,
            finished: AtomicUsize::new(0),
        });

        let workers = self.config.crawler.max_concurrent_fetches.max(1);
        let handles: Vec<_> = (0..workers)
            .map(|worker| {
                let this = self.clone();
                let context = context.clone();
                tokio::spawn(async move { this.worker(worker, &context).await })
            })
            .collect();

        let mut summary = RunSummary::for_targets(RunMode::Crawl, &self.targets);
        let mut fatal = None;
        for joined in join_all(handles).await {
            match joined {
                Ok(Ok(partial)) => summary.merge(partial),
                Ok(Err(e)) => {
                    fatal.get_or_insert(e);
                }
                Err(e) => {
                    fatal.get_or_insert(HarvestError::Worker(e.to_string()));
                }
            }
        }

        if let Some(e) = fatal {
            return Err(e);
        }

        let stats = context.frontier.stats();
        tracing::info!(
            seen = stats.seen,
            pending = stats.pending,
            permanently_failed = stats.permanently_failed,
            "crawl finished"
        );
        Ok(summary)
    }

    /// Re-queues tasks an earlier run left unfinished
    fn resume(&self, frontier: &Frontier) -> Result<usize, HarvestError> {
        let records = self.storage.with(|s| s.load_resumable_tasks(None))?;

        let mut resumed = 0;
        for record in records {
            if !record.state.is_resumable()
                || !self.targets.iter().any(|t| t.id == record.target_id)
            {
                continue;
            }
            if frontier.enqueue(&record.target_id, &record.url, record.depth)
                == EnqueueOutcome::Queued
            {
                resumed += 1;
            }
        }

        if resumed > 0 {
            tracing::info!(resumed, "resuming tasks left unfinished by an earlier run");
        }
        Ok(resumed)
    }

    async fn worker(&self, worker: u32, context: &CrawlContext) -> Result<RunSummary, HarvestError> {
        let mut summary = RunSummary::default();
        tracing::debug!(worker, "worker started");

        while let Some(claimed) = context.frontier.next(&self.cancel).await {
            let task = claimed.task.clone();

            let outcome = match self.process_task(context, &task, &mut summary).await {
                Ok(outcome) => outcome,
                Err(e) => {
                    tracing::error!(
                        target_id = %task.target_id,
                        url = %task.url,
                        "aborting run: {}",
                        e
                    );
                    context.frontier.complete(claimed, TaskOutcome::Cancelled);
                    self.cancel.cancel();
                    context.frontier.close();
                    return Err(e);
                }
            };

            let reason = match &outcome {
                TaskOutcome::Failed { reason, .. } | TaskOutcome::Skipped { reason } => {
                    Some(reason.clone())
                }
                TaskOutcome::Succeeded { .. } | TaskOutcome::Cancelled => None,
            };
            let completion = context.frontier.complete(claimed, outcome.clone());

            if completion.state == TaskState::PermanentlyFailed {
                let entry = summary.target_mut(&task.target_id);
                match outcome {
                    TaskOutcome::Skipped { .. } => entry.skipped += 1,
                    _ => entry.fetch_failures += 1,
                }
            }

            let archived = self
                .commit("archive task", Some((&context.frontier, &task.domain)), |s| {
                    s.upsert_task(context.run_id, &task, completion.state, reason.as_deref())?;
                    for discovered in &completion.enqueued {
                        s.upsert_task(context.run_id, discovered, TaskState::Pending, None)?;
                    }
                    Ok(())
                })
                .await;
            if let Err(e) = archived {
                self.cancel.cancel();
                context.frontier.close();
                return Err(e.into());
            }

            let finished = context.finished.fetch_add(1, Ordering::Relaxed) + 1;
            if finished % PROGRESS_INTERVAL == 0 {
                let stats = context.frontier.stats();
                tracing::info!(
                    finished,
                    pending = stats.pending,
                    in_flight = stats.in_flight,
                    "crawl progress"
                );
            }
        }

        tracing::debug!(worker, "worker stopped");
        Ok(summary)
    }

    /// Fetches and processes one claimed task
    ///
    /// Only storage failures beyond the retry cap are returned as errors;
    /// everything else becomes the task's outcome.
    async fn process_task(
        &self,
        context: &CrawlContext,
        task: &CrawlTask,
        summary: &mut RunSummary,
    ) -> Result<TaskOutcome, HarvestError> {
        let frontier = &context.frontier;

        if self.config.crawler.respect_robots {
            let agent = &self.config.crawler.robots_agent;
            let rules = self.robots.rules_for(&task.url).await;
            if let Some(delay) = rules.crawl_delay(agent) {
                frontier.apply_crawl_delay(&task.domain, delay);
            }
            if !rules.allows(task.url.as_str(), agent) {
                return Ok(TaskOutcome::Skipped {
                    reason: "disallowed by robots.txt".to_string(),
                });
            }
        }

        let pressure = Some((frontier, task.domain.as_str()));
        self.commit("archive task", pressure, |s| {
            s.upsert_task(context.run_id, task, TaskState::InFlight, None)
        })
        .await?;

        let started = Instant::now();
        let result =
            fetch_with_deadline(self.fetcher.as_ref(), task, self.fetch_deadline, &self.cancel)
                .await;
        if started.elapsed() > self.slow_threshold {
            frontier.record_signal(&task.domain, DomainSignal::SlowResponse);
        }

        let document = match result {
            Ok(document) => document,
            Err(FetchError::Cancelled) => return Ok(TaskOutcome::Cancelled),
            Err(e) => {
                if e.block_signal().is_some() {
                    frontier.record_signal(&task.domain, DomainSignal::Blocked);
                }
                tracing::warn!(
                    target_id = %task.target_id,
                    url = %task.url,
                    attempt = task.attempts,
                    "fetch failed: {}",
                    e
                );
                return Ok(TaskOutcome::Failed {
                    retryable: e.is_retryable(),
                    reason: e.to_string(),
                });
            }
        };

        let stored = self
            .commit("store raw document", pressure, |s| s.store_raw(&document))
            .await?;

        if stored.inserted {
            let target = self.target(&task.target_id)?;
            let Some(status) = self.process_document(&target, &document, pressure).await? else {
                // stays unprocessed for the next process-only run
                return Ok(TaskOutcome::Cancelled);
            };
            summary.target_mut(&task.target_id).record(status);
        } else {
            tracing::debug!(
                target_id = %task.target_id,
                url = %task.url,
                content_hash = %document.content_hash,
                "content already stored"
            );
            summary.target_mut(&task.target_id).unchanged += 1;
        }

        let discovered = context
            .filters
            .get(&task.target_id)
            .map(|filter| filter.discover(&document))
            .unwrap_or_default();

        Ok(TaskOutcome::Succeeded { discovered })
    }

    /// Extracts, fuses and stores one raw document
    ///
    /// Returns `None` when the run was cancelled before the record was
    /// complete; nothing is stored in that case.
    async fn process_document(
        &self,
        target: &Target,
        document: &FetchedDocument,
        pressure: Option<(&Frontier, &str)>,
    ) -> Result<Option<RecordStatus>, HarvestError> {
        let extraction = self.router.extract(document, &self.cancel).await;
        let Ok(record) = self.engine.fuse(target, document, extraction, &self.cancel).await else {
            tracing::debug!(
                target_id = %target.id,
                url = %document.url,
                "processing cancelled"
            );
            return Ok(None);
        };

        let version = self
            .commit("store structured record", pressure, |s| s.store_structured(&record))
            .await?;

        tracing::info!(
            target_id = %target.id,
            url = %document.url,
            content_hash = %document.content_hash,
            schema = record.schema_type.to_db_string(),
            version,
            resolved = record.resolved_count(),
            status = %record.status,
            "stored structured record"
        );
        Ok(Some(record.status))
    }

    /// Process-only mode: fuses stored documents again without fetching
    async fn process_stored(&self, reprocess: bool) -> Result<RunSummary, HarvestError> {
        let mut summary = RunSummary::for_targets(RunMode::ProcessOnly, &self.targets);
        let concurrency = self.config.crawler.max_concurrent_fetches.max(1) as usize;

        for target in &self.targets {
            if self.cancel.is_cancelled() {
                break;
            }

            if reprocess {
                let marked = self
                    .commit("mark documents stale", None, |s| s.mark_target_stale(&target.id))
                    .await?;
                tracing::debug!(target_id = %target.id, marked, "marked documents stale");
            }

            let documents = self
                .commit("list unprocessed documents", None, |s| {
                    s.list_unprocessed(Some(&target.id))
                })
                .await?;
            tracing::info!(
                target_id = %target.id,
                documents = documents.len(),
                "processing stored documents"
            );

            let results: Vec<Result<Option<RecordStatus>, HarvestError>> = stream::iter(documents.iter())
                .take_while(|_| future::ready(!self.cancel.is_cancelled()))
                .map(|document| self.process_document(target, document, None))
                .buffer_unordered(concurrency)
                .collect()
                .await;

            for status in results {
                if let Some(status) = status? {
                    summary.target_mut(&target.id).record(status);
                }
            }
        }

        Ok(summary)
    }

    fn target(&self, id: &str) -> Result<Arc<Target>, HarvestError> {
        self.targets
            .iter()
            .find(|t| t.id == id)
            .cloned()
            .ok_or_else(|| HarvestError::UnknownTarget(id.to_string()))
    }

    /// Runs a storage operation under the storage retry policy
    ///
    /// A commit that needed more than one attempt is reported to the
    /// frontier as backpressure for `pressure`'s domain.
    async fn commit<T>(
        &self,
        what: &str,
        pressure: Option<(&Frontier, &str)>,
        operation: impl Fn(&mut dyn Storage) -> StorageResult<T>,
    ) -> Result<T, StorageError> {
        let mut attempts = 0;
        let result = self
            .storage_retry
            .run(what, |attempt| {
                attempts = attempt;
                future::ready(self.storage.with(&operation))
            })
            .await;

        if attempts > 1 {
            if let Some((frontier, domain)) = pressure {
                frontier.record_signal(domain, DomainSignal::Backpressure);
            }
        }
        if let Err(e) = &result {
            if e.is_retryable() {
                tracing::error!(attempts, "{} failed after retries: {}", what, e);
            }
        }
        result
    }
}

fn build_fetcher(config: &Config, force_http: bool) -> Result<Arc<dyn Fetcher>, FetchError> {
    let mode = if force_http {
        FetchMode::Http
    } else {
        config.fetcher.mode
    };

    match mode {
        FetchMode::Http => Ok(Arc::new(HttpFetcher::new(&config.fetcher)?)),
        FetchMode::Browser => browser_fetcher(config),
    }
}

#[cfg(feature = "browser")]
fn browser_fetcher(config: &Config) -> Result<Arc<dyn Fetcher>, FetchError> {
    Ok(Arc::new(crate::crawler::browser::BrowserFetcher::new(
        &config.fetcher,
    )?))
}

#[cfg(not(feature = "browser"))]
fn browser_fetcher(config: &Config) -> Result<Arc<dyn Fetcher>, FetchError> {
    tracing::warn!("built without the `browser` feature, using HTTP fetching");
    Ok(Arc::new(HttpFetcher::new(&config.fetcher)?))
}
