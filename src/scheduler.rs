//! Per-model rate-limited scheduler.
//!
//! Serializes outbound requests for one model so provider-advertised rate
//! limits are respected, classifies and retries transient failures, and
//! recalibrates its local pools from whatever rate-limit headers the
//! provider hands back. One `Scheduler` instance runs per model; there is
//! no cross-model coordination; none needed since each owns an independent
//! lock and task.
//!
//! No single file in the vendored SDK does this — it is a single-client,
//! single-model library. This module generalizes its `retry.rs` backoff
//! math and its async idiom (`tokio::sync::Mutex`, `tokio::time::timeout`,
//! `tokio::spawn`) into a queueing scheduler.

use crate::error::RetryClass;
use crate::provider::ProviderAdapter;
use crate::types::{NeutralRequest, NeutralResponse};
use crate::{Error, Result};
use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{oneshot, Mutex};
use tokio::time::Instant;

/// Token and request pools for one model's current rate-limit window.
#[derive(Debug, Clone, Copy)]
pub struct PoolState {
    pub token_pool: i64,
    pub token_pool_max: i64,
    pub request_pool: i64,
    pub request_pool_max: i64,
}

impl PoolState {
    pub fn new(token_pool_max: i64, request_pool_max: i64) -> Self {
        Self {
            token_pool: token_pool_max,
            token_pool_max,
            request_pool: request_pool_max,
            request_pool_max,
        }
    }

    fn refill_tokens(&mut self) {
        self.token_pool = self.token_pool_max;
    }

    fn refill_requests(&mut self) {
        self.request_pool = self.request_pool_max;
    }
}

struct Ticket {
    id: u64,
    tokens: u64,
    retries: u32,
    request: NeutralRequest,
    resolve: oneshot::Sender<Result<NeutralResponse>>,
}

struct SchedulerInner {
    pools: PoolState,
    queue: VecDeque<Ticket>,
    inflight: HashSet<u64>,
    request_reset_armed: bool,
    token_reset_armed: bool,
}

/// Serializes dispatch for one model.
pub struct Scheduler {
    model_id: String,
    adapter: Arc<dyn ProviderAdapter>,
    config: crate::config::SchedulerConfig,
    inner: Mutex<SchedulerInner>,
    next_ticket_id: AtomicU64,
    running: AtomicBool,
}

impl Scheduler {
    pub fn new(
        model_id: impl Into<String>,
        adapter: Arc<dyn ProviderAdapter>,
        initial_pools: PoolState,
        config: crate::config::SchedulerConfig,
    ) -> Arc<Self> {
        Arc::new(Self {
            model_id: model_id.into(),
            adapter,
            config,
            inner: Mutex::new(SchedulerInner {
                pools: initial_pools,
                queue: VecDeque::new(),
                inflight: HashSet::new(),
                request_reset_armed: false,
                token_reset_armed: false,
            }),
            next_ticket_id: AtomicU64::new(0),
            running: AtomicBool::new(false),
        })
    }

    /// Arm the fallback timer. Idempotent.
    pub fn start(self: &Arc<Self>) {
        if self.running.swap(true, Ordering::SeqCst) {
            return;
        }
        let weak = Arc::downgrade(self);
        let interval = self.config.fallback_reset_interval;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                let Some(scheduler) = weak.upgrade() else {
                    return;
                };
                if !scheduler.running.load(Ordering::SeqCst) {
                    return;
                }
                scheduler.fallback_refill().await;
            }
        });
    }

    /// Disarm timers and reject all queued tickets with a shutdown error.
    /// No hang after `stop()`.
    pub async fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
        let mut inner = self.inner.lock().await;
        while let Some(ticket) = inner.queue.pop_front() {
            let _ = ticket.resolve.send(Err(Error::other(format!(
                "scheduler for model {} stopped",
                self.model_id
            ))));
        }
    }

    /// Unconditionally refill any pool whose reset timer is not currently
    /// armed, guaranteeing progress if a provider omits headers.
    async fn fallback_refill(self: &Arc<Self>) {
        let mut should_step = false;
        {
            let mut inner = self.inner.lock().await;
            if !inner.request_reset_armed {
                inner.pools.refill_requests();
                should_step = true;
            }
            if !inner.token_reset_armed {
                inner.pools.refill_tokens();
                should_step = true;
            }
        }
        if should_step {
            self.run_schedule_step().await;
        }
    }

    /// Schedule a one-shot refill at `delay`, arming the corresponding
    /// reset flag so the fallback timer leaves it alone until it fires.
    fn arm_reset_timer(self: &Arc<Self>, delay: Duration, is_token: bool) {
        if delay > Duration::from_secs(10) {
            tracing::warn!(
                model_id = %self.model_id,
                ?delay,
                is_token,
                "provider rate-limit reset is more than ten seconds away"
            );
        }
        let weak = Arc::downgrade(self);
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let Some(scheduler) = weak.upgrade() else {
                return;
            };
            {
                let mut inner = scheduler.inner.lock().await;
                if is_token {
                    inner.pools.refill_tokens();
                    inner.token_reset_armed = false;
                } else {
                    inner.pools.refill_requests();
                    inner.request_reset_armed = false;
                }
            }
            scheduler.run_schedule_step().await;
        });
    }

    /// Enqueue a request, returning the eventual response. Creates a
    /// ticket, appends it to the queue, and invokes the scheduling step.
    pub async fn enqueue(
        self: &Arc<Self>,
        estimated_tokens: u64,
        request: NeutralRequest,
    ) -> Result<NeutralResponse> {
        let (tx, rx) = oneshot::channel();
        let id = self.next_ticket_id.fetch_add(1, Ordering::SeqCst);
        let ticket = Ticket {
            id,
            tokens: estimated_tokens,
            retries: 0,
            request,
            resolve: tx,
        };
        {
            let mut inner = self.inner.lock().await;
            inner.queue.push_back(ticket);
        }
        self.run_schedule_step().await;
        rx.await
            .unwrap_or_else(|_| Err(Error::other("scheduler dropped ticket without resolving")))
    }

    /// Pop and dispatch as many head-of-queue tickets as current pools
    /// allow. Runs to a fixed point rather than recursing, since each
    /// dispatch happens on a spawned task and re-invokes this method on
    /// completion.
    async fn run_schedule_step(self: &Arc<Self>) {
        loop {
            let ticket = {
                let mut inner = self.inner.lock().await;
                if inner.queue.is_empty() {
                    return;
                }
                if inner.pools.request_pool <= 0 {
                    return;
                }
                let ticket = inner.queue.pop_front().unwrap();
                if ticket.tokens as i64 > inner.pools.token_pool_max {
                    let pool_max = inner.pools.token_pool_max as u64;
                    let _ = ticket
                        .resolve
                        .send(Err(Error::exceeds_context(ticket.tokens, pool_max)));
                    continue;
                }
                if ticket.tokens as i64 > inner.pools.token_pool {
                    inner.queue.push_front(ticket);
                    return;
                }
                inner.pools.request_pool -= 1;
                inner.pools.token_pool -= ticket.tokens as i64;
                inner.inflight.insert(ticket.id);
                ticket
            };
            let scheduler = Arc::clone(self);
            tokio::spawn(async move {
                scheduler.dispatch(ticket).await;
            });
        }
    }

    async fn dispatch(self: Arc<Self>, mut ticket: Ticket) {
        let start = Instant::now();
        let outcome = tokio::time::timeout(
            self.config.request_timeout,
            self.adapter.invoke(&ticket.request),
        )
        .await;

        {
            let mut inner = self.inner.lock().await;
            inner.inflight.remove(&ticket.id);
        }

        let result = match outcome {
            Ok(Ok(response)) => Ok(response),
            Ok(Err(err)) => Err(err),
            Err(_elapsed) => Err(Error::timeout()),
        };
        let _ = start; // timing is recorded by the caller (Session) from ledger entries

        match result {
            Ok(response) => {
                let _ = ticket.resolve.send(Ok(response));
            }
            Err(err) => {
                let class = err.retry_class();
                self.handle_failure(ticket, err, class).await;
                return;
            }
        }
        self.run_schedule_step().await;
    }

    async fn handle_failure(self: &Arc<Self>, mut ticket: Ticket, err: Error, class: RetryClass) {
        let exhausted = ticket.retries >= self.config.max_retries;
        if !class.is_retryable() || exhausted {
            let _ = ticket.resolve.send(Err(err));
            self.run_schedule_step().await;
            return;
        }
        ticket.retries += 1;
        let delay = self.backoff_delay(ticket.retries);
        tokio::time::sleep(delay).await;
        {
            let mut inner = self.inner.lock().await;
            inner.queue.push_back(ticket);
        }
        self.run_schedule_step().await;
    }

    /// Exponential backoff with jitter, same math as `retry::RetryConfig`.
    fn backoff_delay(&self, attempt: u32) -> Duration {
        let base_ms = self.config.initial_delay.as_millis() as f64;
        let exp = base_ms * self.config.backoff_multiplier.powi(attempt as i32);
        let capped = exp.min(self.config.max_delay.as_millis() as f64);
        let jitter_range = capped * self.config.jitter_factor;
        let jitter = rand::random::<f64>() * jitter_range;
        let final_delay = capped + jitter - (jitter_range / 2.0);
        Duration::from_millis(final_delay.max(0.0) as u64)
    }

    /// Feed provider-reported rate-limit headers back into the pools,
    /// arming reset timers as indicated.
    pub async fn update_pools(self: &Arc<Self>, headers: crate::types::RateLimitHeaders) {
        {
            let mut inner = self.inner.lock().await;
            if let Some(limit) = headers.request_limit {
                inner.pools.request_pool_max = limit as i64;
            }
            if let Some(remaining) = headers.request_remaining {
                inner.pools.request_pool = remaining as i64;
            }
            if let Some(limit) = headers.token_limit {
                inner.pools.token_pool_max = limit as i64;
            }
            if let Some(remaining) = headers.token_remaining {
                inner.pools.token_pool = remaining as i64;
            }
            if headers.request_reset.is_some() {
                inner.request_reset_armed = true;
            }
            if headers.token_reset.is_some() {
                inner.token_reset_armed = true;
            }
        }
        if let Some(delay) = headers.request_reset {
            self.arm_reset_timer(delay, false);
        }
        if let Some(delay) = headers.token_reset {
            self.arm_reset_timer(delay, true);
        }
        self.run_schedule_step().await;
    }

    pub fn model_id(&self) -> &str {
        &self.model_id
    }
}
