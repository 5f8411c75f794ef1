//! Frontier and scheduler
//!
//! This module handles:
//! - Per-target deduplication of normalized URLs
//! - Breadth-first ordering (depth, then discovery order)
//! - Global concurrency via a semaphore and per-domain concurrency caps
//! - Politeness spacing that adapts to blocking signals and backpressure
//! - Retry scheduling with the shared retry policy
//! - Global and per-target task budgets
//!
//! All state lives behind one mutex that is never held across an await;
//! workers only interact with it through `enqueue`, `next` and `complete`.

use crate::config::CrawlerConfig;
use crate::crawler::retry::RetryPolicy;
use crate::state::{DomainState, PolitenessPolicy, TaskState};
use crate::url::{extract_domain, normalize_url, url_hash};
use chrono::{DateTime, Utc};
use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};
use tokio::sync::{Notify, OwnedSemaphorePermit, Semaphore};
use tokio_util::sync::CancellationToken;
use url::Url;

/// Upper bound for one idle wait inside `next`
const MAX_IDLE_WAIT: Duration = Duration::from_secs(1);

/// A URL in the frontier
#[derive(Debug, Clone)]
pub struct CrawlTask {
    pub target_id: String,
    /// Normalized URL
    pub url: Url,
    /// Dedup key of `url`
    pub url_hash: String,
    pub domain: String,
    pub depth: u32,
    pub discovered_at: DateTime<Utc>,
    /// Discovery order within the run
    pub sequence: u64,
    /// Attempts started so far (incremented when the task is claimed)
    pub attempts: u32,
    /// Backoff applied before the current attempt
    pub backoff: Duration,
    not_before: Option<Instant>,
}

// BinaryHeap is a max-heap: the shallowest, earliest-discovered task must compare greatest
impl Ord for CrawlTask {
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .depth
            .cmp(&self.depth)
            .then_with(|| other.sequence.cmp(&self.sequence))
    }
}

impl PartialOrd for CrawlTask {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for CrawlTask {
    fn eq(&self, other: &Self) -> bool {
        self.depth == other.depth && self.sequence == other.sequence
    }
}

impl Eq for CrawlTask {}

/// A task handed to a worker together with its global concurrency permit
#[derive(Debug)]
pub struct ClaimedTask {
    pub task: CrawlTask,
    _permit: OwnedSemaphorePermit,
}

/// Result of an `enqueue` call
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EnqueueOutcome {
    /// A new task was created
    Queued,
    /// The normalized URL was already seen for this target
    Duplicate,
    /// Depth exceeds the configured maximum
    TooDeep,
    /// The global or per-target budget is used up
    BudgetExhausted,
    /// The URL could not be normalized
    Invalid(String),
}

/// How a claimed task ended
#[derive(Debug, Clone)]
pub enum TaskOutcome {
    /// Fetched and processed; `discovered` links are enqueued one level deeper
    Succeeded { discovered: Vec<String> },
    /// Fetch failed; retryable failures are re-queued while attempts remain
    Failed { retryable: bool, reason: String },
    /// Not fetched on purpose (e.g. disallowed by robots.txt)
    Skipped { reason: String },
    /// The run was cancelled while the task was in flight
    Cancelled,
}

/// What `complete` did with a task
#[derive(Debug, Clone)]
pub struct Completion {
    /// State the task ended in
    pub state: TaskState,
    /// Newly created tasks for discovered links
    pub enqueued: Vec<CrawlTask>,
}

/// Signals that make the scheduler slow down for a domain
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum DomainSignal {
    /// 429/503 or an anti-bot challenge page
    Blocked,
    /// Response took longer than the configured threshold
    SlowResponse,
    /// Storage or inference is saturated
    Backpressure,
}

/// Counters for progress reporting
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FrontierStats {
    pub pending: usize,
    pub in_flight: usize,
    pub seen: usize,
    pub admitted: u32,
    pub permanently_failed: usize,
}

struct Inner {
    queue: BinaryHeap<CrawlTask>,
    seen: HashSet<(String, String)>,
    permanently_failed: HashSet<(String, String)>,
    domains: HashMap<String, DomainState>,
    admitted_per_target: HashMap<String, u32>,
    admitted: u32,
    in_flight: usize,
    sequence: u64,
    closed: bool,
}

enum Claim {
    Ready(CrawlTask),
    Wait(Option<Duration>),
    Finished,
}

/// The crawl frontier shared by all workers of a run
pub struct Frontier {
    inner: Mutex<Inner>,
    notify: Notify,
    global: Arc<Semaphore>,
    config: CrawlerConfig,
    politeness: PolitenessPolicy,
    retry: RetryPolicy,
}

impl Frontier {
    /// Creates an empty frontier
    ///
    /// # Arguments
    ///
    /// * `config` - Depth limit, budgets and concurrency limits
    /// * `retry` - Policy deciding re-attempts of failed fetches
    pub fn new(config: CrawlerConfig, retry: RetryPolicy) -> Self {
        let global = Arc::new(Semaphore::new(config.max_concurrent_fetches.max(1) as usize));
        Self {
            inner: Mutex::new(Inner {
                queue: BinaryHeap::new(),
                seen: HashSet::new(),
                permanently_failed: HashSet::new(),
                domains: HashMap::new(),
                admitted_per_target: HashMap::new(),
                admitted: 0,
                in_flight: 0,
                sequence: 0,
                closed: false,
            }),
            notify: Notify::new(),
            global,
            politeness: PolitenessPolicy::from(&config),
            config,
            retry,
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        // A poisoned lock only means another worker panicked mid-update;
        // the frontier data itself stays consistent per operation.
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Adds a task if the normalized URL is new for the target and within limits
    ///
    /// # Arguments
    ///
    /// * `target_id` - Target the URL belongs to
    /// * `url` - Absolute URL (normalized here)
    /// * `depth` - Link distance from a seed
    pub fn enqueue(&self, target_id: &str, url: &str, depth: u32) -> EnqueueOutcome {
        let outcome = {
            let mut inner = self.lock();
            self.enqueue_locked(&mut inner, target_id, url, depth).0
        };
        if outcome == EnqueueOutcome::Queued {
            self.notify.notify_waiters();
        }
        outcome
    }

    fn enqueue_locked(
        &self,
        inner: &mut Inner,
        target_id: &str,
        url: &str,
        depth: u32,
    ) -> (EnqueueOutcome, Option<CrawlTask>) {
        let url = match normalize_url(url) {
            Ok(url) => url,
            Err(e) => return (EnqueueOutcome::Invalid(e.to_string()), None),
        };
        let Some(domain) = extract_domain(&url) else {
            return (EnqueueOutcome::Invalid("missing host".to_string()), None);
        };

        if depth > self.config.max_depth {
            return (EnqueueOutcome::TooDeep, None);
        }

        let hash = url_hash(&url);
        let key = (target_id.to_string(), hash.clone());
        if inner.seen.contains(&key) {
            return (EnqueueOutcome::Duplicate, None);
        }

        let per_target = inner
            .admitted_per_target
            .get(target_id)
            .copied()
            .unwrap_or(0);
        if inner.admitted >= self.config.max_tasks
            || per_target >= self.config.max_pages_per_target
        {
            return (EnqueueOutcome::BudgetExhausted, None);
        }

        inner.seen.insert(key);
        inner.admitted += 1;
        inner
            .admitted_per_target
            .insert(target_id.to_string(), per_target + 1);
        inner.sequence += 1;

        let task = CrawlTask {
            target_id: target_id.to_string(),
            url,
            url_hash: hash,
            domain,
            depth,
            discovered_at: Utc::now(),
            sequence: inner.sequence,
            attempts: 0,
            backoff: Duration::ZERO,
            not_before: None,
        };
        inner.queue.push(task.clone());

        (EnqueueOutcome::Queued, Some(task))
    }

    /// Waits for the next task that may be fetched now
    ///
    /// Blocks until a task is ready with respect to the global permit, the
    /// domain's concurrency cap, its politeness spacing and any retry backoff.
    ///
    /// # Returns
    ///
    /// * `Some(ClaimedTask)` - A task now owned by the caller until `complete`
    /// * `None` - The frontier is drained (nothing pending or in flight), or
    ///   the run was cancelled
    pub async fn next(&self, cancel: &CancellationToken) -> Option<ClaimedTask> {
        loop {
            if cancel.is_cancelled() {
                return None;
            }

            let permit = tokio::select! {
                permit = self.global.clone().acquire_owned() => permit.ok()?,
                _ = cancel.cancelled() => return None,
            };

            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            let claim = self.claim(Instant::now());
            match claim {
                Claim::Ready(task) => {
                    tracing::debug!(
                        target_id = %task.target_id,
                        url = %task.url,
                        depth = task.depth,
                        attempt = task.attempts,
                        "claimed task"
                    );
                    return Some(ClaimedTask {
                        task,
                        _permit: permit,
                    });
                }
                Claim::Finished => {
                    self.notify.notify_waiters();
                    return None;
                }
                Claim::Wait(wait) => {
                    drop(permit);
                    let wait = wait.unwrap_or(MAX_IDLE_WAIT).min(MAX_IDLE_WAIT);
                    tracing::trace!(wait_ms = wait.as_millis() as u64, "no task ready");
                    tokio::select! {
                        _ = &mut notified => {}
                        _ = tokio::time::sleep(wait) => {}
                        _ = cancel.cancelled() => return None,
                    }
                }
            }
        }
    }

    fn claim(&self, now: Instant) -> Claim {
        let mut inner = self.lock();

        if inner.closed || (inner.queue.is_empty() && inner.in_flight == 0) {
            return Claim::Finished;
        }

        let mut not_ready = Vec::new();
        let mut min_wait: Option<Duration> = None;
        let mut found = None;

        while let Some(task) = inner.queue.pop() {
            let task_wait = task
                .not_before
                .and_then(|t| t.checked_duration_since(now))
                .filter(|d| !d.is_zero());

            let state = inner
                .domains
                .entry(task.domain.clone())
                .or_insert_with(|| DomainState::new(&self.politeness));
            let domain_wait = state.time_until_next_request(now);
            let saturated = state.in_flight >= state.concurrency_limit;

            if task_wait.is_none() && domain_wait.is_none() && !saturated {
                state.record_request(now);
                found = Some(task);
                break;
            }

            if !saturated {
                let wait = task_wait.max(domain_wait);
                min_wait = match (min_wait, wait) {
                    (Some(a), Some(b)) => Some(a.min(b)),
                    (a, b) => a.or(b),
                };
            }
            not_ready.push(task);
        }

        for task in not_ready {
            inner.queue.push(task);
        }

        match found {
            Some(mut task) => {
                task.attempts += 1;
                task.not_before = None;
                inner.in_flight += 1;
                Claim::Ready(task)
            }
            None => Claim::Wait(min_wait),
        }
    }

    /// Marks a claimed task finished
    ///
    /// On success, discovered links are enqueued at `depth + 1`. Retryable
    /// failures go back to the queue with exponential backoff while the retry
    /// policy allows; everything else becomes permanently failed and is never
    /// re-enqueued in this run.
    pub fn complete(&self, claimed: ClaimedTask, outcome: TaskOutcome) -> Completion {
        let ClaimedTask { mut task, _permit } = claimed;
        let now = Instant::now();

        let completion = {
            let mut inner = self.lock();
            inner.in_flight = inner.in_flight.saturating_sub(1);
            if let Some(state) = inner.domains.get_mut(&task.domain) {
                state.record_finished();
            }

            match outcome {
                TaskOutcome::Succeeded { discovered } => {
                    if let Some(state) = inner.domains.get_mut(&task.domain) {
                        state.record_success(&self.politeness);
                    }
                    let mut enqueued = Vec::new();
                    for link in discovered {
                        if let (EnqueueOutcome::Queued, Some(new_task)) =
                            self.enqueue_locked(&mut inner, &task.target_id, &link, task.depth + 1)
                        {
                            enqueued.push(new_task);
                        }
                    }
                    Completion {
                        state: TaskState::Done,
                        enqueued,
                    }
                }
                TaskOutcome::Failed { retryable, reason } => {
                    if retryable && task.attempts < self.retry.max_attempts {
                        let backoff = self.retry.delay_before(task.attempts + 1);
                        tracing::debug!(
                            url = %task.url,
                            attempt = task.attempts,
                            backoff_ms = backoff.as_millis() as u64,
                            "re-queueing after failure: {}",
                            reason
                        );
                        task.backoff = backoff;
                        task.not_before = Some(now + backoff);
                        inner.queue.push(task);
                        Completion {
                            state: TaskState::Pending,
                            enqueued: Vec::new(),
                        }
                    } else {
                        tracing::info!(
                            url = %task.url,
                            attempts = task.attempts,
                            "task permanently failed: {}",
                            reason
                        );
                        inner
                            .permanently_failed
                            .insert((task.target_id.clone(), task.url_hash.clone()));
                        Completion {
                            state: TaskState::PermanentlyFailed,
                            enqueued: Vec::new(),
                        }
                    }
                }
                TaskOutcome::Skipped { reason } => {
                    tracing::debug!(url = %task.url, "task skipped: {}", reason);
                    inner
                        .permanently_failed
                        .insert((task.target_id.clone(), task.url_hash.clone()));
                    Completion {
                        state: TaskState::PermanentlyFailed,
                        enqueued: Vec::new(),
                    }
                }
                TaskOutcome::Cancelled => Completion {
                    state: TaskState::FailedRetryable,
                    enqueued: Vec::new(),
                },
            }
        };

        drop(_permit);
        self.notify.notify_waiters();
        completion
    }

    /// Adapts a domain's politeness to a signal observed by a worker
    pub fn record_signal(&self, domain: &str, signal: DomainSignal) {
        let mut inner = self.lock();
        let state = inner
            .domains
            .entry(domain.to_string())
            .or_insert_with(|| DomainState::new(&self.politeness));

        match signal {
            DomainSignal::Blocked => state.record_block(&self.politeness, Instant::now()),
            DomainSignal::SlowResponse => state.record_slow_response(&self.politeness),
            DomainSignal::Backpressure => state.record_backpressure(&self.politeness),
        }
        tracing::debug!(
            domain,
            ?signal,
            delay_ms = state.delay.as_millis() as u64,
            concurrency = state.concurrency_limit,
            "adjusted politeness"
        );
    }

    /// Raises a domain's spacing to a robots.txt crawl-delay
    pub fn apply_crawl_delay(&self, domain: &str, seconds: f64) {
        let mut inner = self.lock();
        inner
            .domains
            .entry(domain.to_string())
            .or_insert_with(|| DomainState::new(&self.politeness))
            .apply_crawl_delay(&self.politeness, seconds);
    }

    /// Current politeness state of a domain, if it has been seen
    pub fn domain_state(&self, domain: &str) -> Option<DomainState> {
        self.lock().domains.get(domain).cloned()
    }

    /// Returns true if the URL permanently failed for the target in this run
    pub fn is_permanently_failed(&self, target_id: &str, url: &str) -> bool {
        let Ok(url) = normalize_url(url) else {
            return false;
        };
        self.lock()
            .permanently_failed
            .contains(&(target_id.to_string(), url_hash(&url)))
    }

    /// Stops handing out tasks; waiting workers return None
    pub fn close(&self) {
        self.lock().closed = true;
        self.notify.notify_waiters();
    }

    /// Snapshot of queued tasks in claim order
    pub fn pending_tasks(&self) -> Vec<CrawlTask> {
        let inner = self.lock();
        let mut tasks: Vec<CrawlTask> = inner.queue.iter().cloned().collect();
        tasks.sort_by(|a, b| b.cmp(a));
        tasks
    }

    pub fn stats(&self) -> FrontierStats {
        let inner = self.lock();
        FrontierStats {
            pending: inner.queue.len(),
            in_flight: inner.in_flight,
            seen: inner.seen.len(),
            admitted: inner.admitted,
            permanently_failed: inner.permanently_failed.len(),
        }
    }
}
