//! Scheduler/Queue
//!
//! Owns, per model-class key, a FIFO wait list, the set of calls in
//! progress, the [`RateLimitState`] and an optional window timer.
//!
//! Admission runs on every [`Scheduler::fire`]:
//!
//! ```text
//! for each key with a non-empty wait list:
//!   n = min(|wait|, remaining_requests - |in_progress|)
//!   repeat n times:
//!     if head.prompt_tokens > remaining_tokens and the window is not fresh: stop
//!     admit head, remaining_requests -= 1, remaining_tokens -= head.prompt_tokens
//!   arm the window timer if calls still wait, disarm it once the list is empty
//! ```
//!
//! The head is never skipped, so a small call can wait behind a large one.
//! All state sits behind one mutex that is never held across an await.


use crate::error::{Error, Result};
use crate::executor::CallExecutor;
use crate::limits::RateLimitState;
use crate::retry::{RetryDecision, RetryPolicy};
use crate::run_bit::{CallEvent, CallHandle, RunBit, RunStatus};
use crate::usage::UsageReport;
use runbit_llm::models::{self, ModelProfile};
use runbit_llm::{
    normalize, CallRequest, NormalizeOptions, NormalizedRequest, RateLimitUpdate, TokenCount,
};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Scheduler configuration
#[derive(Debug, Clone, Default)]
pub struct SchedulerConfig {
    /// Retry behavior
    pub retry: RetryPolicy,
    /// Window timer length when the vendor reported no reset time
    pub default_window: Option<Duration>,
    /// Normalization switches applied on submit
    pub normalize: NormalizeOptions,
    /// Seed unseen keys from the model registry's default limits
    pub seed_from_registry: bool,
    /// Per-key `(requests, tokens)` overrides
    pub limits: HashMap<String, (u64, u64)>,
}

impl SchedulerConfig {
    /// Create a new configuration
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the retry policy
    #[must_use]
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Set the default window length
    #[must_use]
    pub fn with_default_window(mut self, window: Duration) -> Self {
        self.default_window = Some(window);
        self
    }

    /// Set normalization switches
    #[must_use]
    pub fn with_normalize(mut self, options: NormalizeOptions) -> Self {
        self.normalize = options;
        self
    }

    /// Seed unseen keys from the model registry
    #[must_use]
    pub fn with_registry_limits(mut self, enabled: bool) -> Self {
        self.seed_from_registry = enabled;
        self
    }

    /// Override the limits of one key
    #[must_use]
    pub fn with_limits(mut self, key: impl Into<String>, requests: u64, tokens: u64) -> Self {
        self.limits.insert(key.into(), (requests, tokens));
        self
    }

    fn window(&self) -> Duration {
        self.default_window.unwrap_or(self.retry.default_wait)
    }
}

/// Diagnostic view of one key
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueSnapshot {
    /// Waiting entry ids, head first
    pub waiting: Vec<u64>,
    /// Entry ids in progress
    pub in_progress: Vec<u64>,
    /// Current budget
    pub limits: RateLimitState,
    /// Whether the window timer is armed
    pub timer_armed: bool,
}

/// How an attempt left its slot
enum Outcome<'a> {
    Completed(&'a TokenCount),
    Failed,
    Abandoned,
}

struct KeyState {
    wait: VecDeque<RunBit>,
    in_progress: BTreeSet<u64>,
    limits: RateLimitState,
    timer: Option<JoinHandle<()>>,
}

impl KeyState {
    fn new(limits: RateLimitState) -> Self {
        Self {
            wait: VecDeque::new(),
            in_progress: BTreeSet::new(),
            limits,
            timer: None,
        }
    }

    fn disarm(&mut self) {
        if let Some(timer) = self.timer.take() {
            timer.abort();
        }
    }
}

#[derive(Default)]
struct State {
    keys: HashMap<String, KeyState>,
    usage: UsageReport,
    closed: bool,
}

struct Inner {
    executor: CallExecutor,
    config: SchedulerConfig,
    next_id: AtomicU64,
    state: Mutex<State>,
}

impl Inner {
    fn initial_limits(&self, key: &str, profile: Option<&ModelProfile>) -> RateLimitState {
        if let Some(&(requests, tokens)) = self.config.limits.get(key) {
            return RateLimitState::new(requests, tokens);
        }
        if self.config.seed_from_registry {
            let defaults = profile.and_then(|p| p.default_limits).or_else(|| {
                models::MODELS
                    .iter()
                    .find(|spec| spec.short_code == key)
                    .map(|spec| (spec.limit_requests, spec.limit_tokens))
            });
            if let Some((requests, tokens)) = defaults {
                return RateLimitState::new(requests, tokens);
            }
        }
        warn!(key = %key, "No rate limits known for key, admission blocked until reported");
        RateLimitState::zeroed()
    }
}

fn key_state<'a>(
    inner: &Inner,
    keys: &'a mut HashMap<String, KeyState>,
    key: &str,
    profile: Option<&ModelProfile>,
) -> &'a mut KeyState {
    keys.entry(key.to_string())
        .or_insert_with(|| KeyState::new(inner.initial_limits(key, profile)))
}

/// Per-model rate-limited call queue
#[derive(Clone)]
pub struct Scheduler {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scheduler")
            .field("executor", &self.inner.executor)
            .field("config", &self.inner.config)
            .finish_non_exhaustive()
    }
}

impl Scheduler {
    /// Create a scheduler with fresh state
    #[must_use]
    pub fn new(executor: CallExecutor, config: SchedulerConfig) -> Self {
        Self {
            inner: Arc::new(Inner {
                executor,
                config,
                next_id: AtomicU64::new(1),
                state: Mutex::new(State::default()),
            }),
        }
    }

    /// Configuration in use
    #[must_use]
    pub fn config(&self) -> &SchedulerConfig {
        &self.inner.config
    }

    /// Normalize and queue a call
    ///
    /// # Errors
    ///
    /// Normalization errors (malformed parameters, local media without
    /// permission) are returned here, before any network call.
    pub async fn submit(&self, request: &CallRequest) -> Result<CallHandle> {
        let normalized = normalize(request, &self.inner.config.normalize).await?;
        Ok(self.submit_normalized(normalized).await)
    }

    /// Queue an already normalized call
    pub async fn submit_normalized(&self, request: NormalizedRequest) -> CallHandle {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let (bit, handle) = RunBit::new(id, request);
        debug!(
            id,
            key = %bit.key(),
            prompt_tokens = bit.prompt_tokens(),
            "Call submitted"
        );
        self.enqueue(bit).await;
        handle
    }

    /// Append an entry to the back of its key's wait list and run admission
    pub async fn enqueue(&self, mut bit: RunBit) {
        {
            let mut state = self.inner.state.lock().await;
            if state.closed {
                drop(state);
                bit.set_status(RunStatus::Error);
                bit.emit(CallEvent::Failed(Error::Closed));
                return;
            }
            let key = bit.key().to_string();
            let ks = key_state(&self.inner, &mut state.keys, &key, Some(bit.request().profile()));
            bit.set_status(RunStatus::Wait);
            ks.wait.push_back(bit);
        }
        self.fire().await;
    }

    /// Run one admission pass over every key
    pub async fn fire(&self) {
        let admitted = {
            let mut state = self.inner.state.lock().await;
            if state.closed {
                return;
            }
            self.admit(&mut state)
        };
        for bit in admitted {
            self.spawn_attempt(bit, None);
        }
    }

    fn admit(&self, state: &mut State) -> Vec<RunBit> {
        let mut admitted = Vec::new();
        let window = self.inner.config.window();

        for (key, ks) in &mut state.keys {
            if ks.wait.is_empty() {
                continue;
            }
            let capacity = ks.limits.remaining_requests - ks.in_progress.len() as i64;
            let n = capacity.clamp(0, ks.wait.len() as i64);

            for _ in 0..n {
                let Some(head) = ks.wait.front() else {
                    break;
                };
                if !ks.limits.admits(head.prompt_tokens()) {
                    debug!(
                        key = %key,
                        id = head.id(),
                        prompt_tokens = head.prompt_tokens(),
                        remaining_tokens = ks.limits.remaining_tokens,
                        "Head of queue exceeds token budget"
                    );
                    break;
                }
                let Some(mut bit) = ks.wait.pop_front() else {
                    break;
                };
                ks.limits.debit(bit.prompt_tokens());
                ks.in_progress.insert(bit.id());
                bit.set_status(RunStatus::InProgress);
                debug!(
                    key = %key,
                    id = bit.id(),
                    remaining_requests = ks.limits.remaining_requests,
                    remaining_tokens = ks.limits.remaining_tokens,
                    "Admitted"
                );
                admitted.push(bit);
            }

            if ks.wait.is_empty() {
                ks.disarm();
            } else if ks.timer.is_none() {
                let duration = ks.limits.window(window);
                debug!(key = %key, waiting = ks.wait.len(), ?duration, "Arming window timer");
                ks.timer = Some(self.arm_timer(key.clone(), duration));
            }
        }
        admitted
    }

    fn arm_timer(&self, key: String, duration: Duration) -> JoinHandle<()> {
        let weak: Weak<Inner> = Arc::downgrade(&self.inner);
        tokio::spawn(async move {
            tokio::time::sleep(duration).await;
            if let Some(inner) = weak.upgrade() {
                Scheduler { inner }.on_rate_limit_window_elapsed(&key).await;
            }
        })
    }

    /// Start a fresh window for `key` and run admission
    pub async fn on_rate_limit_window_elapsed(&self, key: &str) {
        {
            let mut state = self.inner.state.lock().await;
            let Some(ks) = state.keys.get_mut(key) else {
                return;
            };
            ks.timer = None;
            ks.limits.reset_window(ks.in_progress.len());
            debug!(
                key = %key,
                remaining_requests = ks.limits.remaining_requests,
                remaining_tokens = ks.limits.remaining_tokens,
                "Rate-limit window elapsed"
            );
        }
        self.fire().await;
    }

    /// Overwrite a key's budget with vendor-reported values
    pub async fn update_limits(&self, key: &str, update: RateLimitUpdate) {
        {
            let mut state = self.inner.state.lock().await;
            let ks = key_state(&self.inner, &mut state.keys, key, None);
            ks.limits.apply(&update);
            debug!(key = %key, limits = ?ks.limits, "Rate limits updated");
        }
        self.fire().await;
    }

    /// Set a key's limits and start a full window
    pub async fn seed_limits(&self, key: &str, requests: u64, tokens: u64) {
        {
            let mut state = self.inner.state.lock().await;
            let ks = key_state(&self.inner, &mut state.keys, key, None);
            ks.limits = RateLimitState::new(requests, tokens);
            ks.limits.reset_window(ks.in_progress.len());
            info!(key = %key, requests, tokens, "Rate limits seeded");
        }
        self.fire().await;
    }

    /// Queue state of a key
    pub async fn snapshot(&self, key: &str) -> Option<QueueSnapshot> {
        let state = self.inner.state.lock().await;
        state.keys.get(key).map(|ks| QueueSnapshot {
            waiting: ks.wait.iter().map(RunBit::id).collect(),
            in_progress: ks.in_progress.iter().copied().collect(),
            limits: ks.limits,
            timer_armed: ks.timer.is_some(),
        })
    }

    /// Spend totals so far
    pub async fn usage(&self) -> UsageReport {
        self.inner.state.lock().await.usage.clone()
    }

    /// Stop admitting calls
    ///
    /// Timers are aborted and waiting calls fail with [`Error::Closed`].
    /// Calls in progress run to their natural end.
    pub async fn shutdown(&self) {
        let abandoned: Vec<RunBit> = {
            let mut state = self.inner.state.lock().await;
            state.closed = true;
            state
                .keys
                .values_mut()
                .flat_map(|ks| {
                    ks.disarm();
                    ks.wait.drain(..).collect::<Vec<_>>()
                })
                .collect()
        };
        info!(abandoned = abandoned.len(), "Scheduler shut down");
        for mut bit in abandoned {
            bit.set_status(RunStatus::Error);
            bit.emit(CallEvent::Failed(Error::Closed));
        }
    }

    fn spawn_attempt(&self, bit: RunBit, delay: Option<Duration>) {
        let scheduler = self.clone();
        tokio::spawn(async move {
            match delay {
                Some(delay) => {
                    tokio::time::sleep(delay).await;
                    scheduler.resume(bit).await;
                }
                None => scheduler.run_attempt(bit).await,
            }
        });
    }

    async fn resume(&self, mut bit: RunBit) {
        let closed = self.inner.state.lock().await.closed;
        if closed {
            self.release(bit.key(), bit.id(), Outcome::Abandoned).await;
            bit.set_status(RunStatus::Error);
            bit.emit(CallEvent::Failed(Error::Closed));
            return;
        }
        bit.set_status(RunStatus::InProgress);
        self.run_attempt(bit).await;
    }

    async fn run_attempt(&self, mut bit: RunBit) {
        let result = self.inner.executor.execute(&mut bit, self).await;
        self.finish_attempt(bit, result).await;
    }

    async fn finish_attempt(&self, mut bit: RunBit, result: runbit_llm::Result<()>) {
        let key = bit.key().to_string();

        let error = match result {
            Ok(()) => {
                bit.set_status(RunStatus::Done);
                self.release(&key, bit.id(), Outcome::Completed(bit.count())).await;
                bit.emit(CallEvent::Completed(bit.count().clone()));
                self.fire().await;
                return;
            }
            Err(error) => error,
        };

        bit.set_status(RunStatus::Error);
        let attempt = bit.attempt();
        let decision = self.inner.config.retry.decide(&error, attempt);

        match decision {
            RetryDecision::Delay(wait) => {
                self.record_failure(&key).await;
                warn!(
                    key = %key,
                    id = bit.id(),
                    attempt,
                    wait_ms = wait.as_millis() as u64,
                    error = %error,
                    "Rate limited, re-attempting after wait"
                );
                bit.emit(CallEvent::AttemptFailed {
                    attempt,
                    error: error.to_string(),
                    class: error.class(),
                    retry_in: Some(wait),
                });
                bit.next_attempt();
                self.spawn_attempt(bit, Some(wait));
            }
            RetryDecision::Requeue => {
                self.release(&key, bit.id(), Outcome::Failed).await;
                warn!(
                    key = %key,
                    id = bit.id(),
                    attempt,
                    max_attempts = self.inner.config.retry.max_attempts,
                    error = %error,
                    "Attempt failed, re-queued"
                );
                bit.emit(CallEvent::AttemptFailed {
                    attempt,
                    error: error.to_string(),
                    class: error.class(),
                    retry_in: None,
                });
                bit.next_attempt();
                self.enqueue(bit).await;
                return;
            }
            RetryDecision::Exhausted => {
                self.release(&key, bit.id(), Outcome::Failed).await;
                error!(key = %key, id = bit.id(), attempts = attempt, error = %error, "Retry exhausted");
                bit.emit(CallEvent::Failed(Error::RetryExhausted {
                    attempts: attempt,
                    last_error: error,
                }));
            }
            RetryDecision::Terminal => {
                self.release(&key, bit.id(), Outcome::Failed).await;
                error!(key = %key, id = bit.id(), attempt, error = %error, "Call failed");
                bit.emit(CallEvent::Failed(Error::Llm(error)));
            }
        }
        self.fire().await;
    }

    /// Free the slot of an entry and record the attempt outcome
    async fn release(&self, key: &str, id: u64, outcome: Outcome<'_>) {
        let mut state = self.inner.state.lock().await;
        if let Some(ks) = state.keys.get_mut(key) {
            ks.in_progress.remove(&id);
        }
        match outcome {
            Outcome::Completed(count) => state.usage.record_success(count),
            Outcome::Failed => state.usage.record_failure(key),
            Outcome::Abandoned => {}
        }
    }

    async fn record_failure(&self, key: &str) {
        self.inner.state.lock().await.usage.record_failure(key);
    }
}
