//! Priority-based rate limiter for outbound remote calls.
//!
//! The limiter owns a priority queue and a coordinator task. Callers
//! submit re-invokable async tasks through [`RateLimiter::enqueue`],
//! which settles once the task succeeds, fails terminally, or is
//! evicted. The coordinator alone enforces the global concurrency
//! ceiling and the fixed 1000 ms per-second window; rate-limited
//! failures are re-queued with exponential backoff up to the configured
//! retry budget.
//!
//! The limiter is an owned, explicitly start/stop-able component rather
//! than a process-wide singleton, so tests can drive it on a paused
//! clock.

use crate::config::{LimiterConfig, RetryConfig};
use crate::error::{EngineError, EngineResult};
use parking_lot::Mutex;
use std::cmp::Ordering as CmpOrdering;
use std::collections::BinaryHeap;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{oneshot, Notify};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, warn};

/// The fixed rate window.
const WINDOW: Duration = Duration::from_millis(1000);

/// Dispatch priority. Higher priorities are dequeued first; ties are
/// broken FIFO by arrival order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Priority {
    /// Background work (snapshot imports).
    Low = 0,
    /// Normal sync operations.
    Normal = 1,
    /// Cheap read-only checks (dry-run existence queries).
    High = 2,
}

/// A settled task result, carrying the limiter-level retries consumed.
#[derive(Debug)]
pub struct Settled<T> {
    /// The task's output.
    pub value: T,
    /// How many rate-limit retries were needed before success.
    pub retries: u32,
}

/// Snapshot of the limiter's internal state, for caller-side
/// backpressure. Not consumed internally.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LimiterStatus {
    /// Tasks waiting in the queue.
    pub queued: usize,
    /// Tasks currently running.
    pub active: usize,
    /// Tasks started in the current 1000 ms window.
    pub requests_in_window: u32,
    /// Whether another task could start immediately.
    pub can_start_now: bool,
}

type BoxFuture<T> = Pin<Box<dyn Future<Output = T> + Send>>;
type RunFn = Arc<dyn Fn(u32) -> BoxFuture<TaskOutcome> + Send + Sync>;
type FailFn = Arc<dyn Fn(EngineError) + Send + Sync>;

/// What the coordinator should do after one task attempt.
enum TaskOutcome {
    /// The result was delivered to the caller.
    Settled,
    /// The attempt was rate limited and the retry budget allows another.
    RateLimited,
}

/// A queued task. Retried tasks keep their original sequence number and
/// enqueue time, so they neither jump the FIFO line nor escape the
/// queue timeout.
struct QueuedTask {
    priority: u8,
    seq: u64,
    enqueued_at: Instant,
    retry_count: u32,
    run: RunFn,
    fail: FailFn,
}

impl PartialEq for QueuedTask {
    fn eq(&self, other: &Self) -> bool {
        self.priority == other.priority && self.seq == other.seq
    }
}

impl Eq for QueuedTask {}

impl PartialOrd for QueuedTask {
    fn partial_cmp(&self, other: &Self) -> Option<CmpOrdering> {
        Some(self.cmp(other))
    }
}

impl Ord for QueuedTask {
    fn cmp(&self, other: &Self) -> CmpOrdering {
        // Max-heap: higher priority first, then lower seq (earlier arrival)
        self.priority
            .cmp(&other.priority)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

/// The current rate window.
struct Window {
    started_at: Instant,
    count: u32,
}

struct Shared {
    limiter: LimiterConfig,
    retry: RetryConfig,
    queue: Mutex<BinaryHeap<QueuedTask>>,
    seq: AtomicU64,
    active: AtomicUsize,
    window: Mutex<Window>,
    running: AtomicBool,
    notify: Notify,
}

impl Shared {
    /// Resets the window if at least 1000 ms have elapsed since it
    /// started.
    fn refresh_window(&self, now: Instant) {
        let mut window = self.window.lock();
        if now.duration_since(window.started_at) >= WINDOW {
            window.started_at = now;
            window.count = 0;
        }
    }

    /// Whether another task could start right now.
    fn can_dispatch(&self) -> bool {
        self.active.load(Ordering::SeqCst) < self.limiter.max_concurrent
            && self.window.lock().count < self.limiter.max_per_second
    }

    /// Evicts tasks that have waited past the queue timeout, rejecting
    /// them without execution.
    fn evict_expired(&self, now: Instant) {
        let timeout = self.limiter.queue_timeout;
        let mut queue = self.queue.lock();
        if !queue
            .iter()
            .any(|t| now.duration_since(t.enqueued_at) >= timeout)
        {
            return;
        }

        let drained = std::mem::take(&mut *queue);
        for task in drained.into_vec() {
            let waited = now.duration_since(task.enqueued_at);
            if waited >= timeout {
                warn!(
                    waited_ms = waited.as_millis() as u64,
                    "evicting task queued past timeout"
                );
                (task.fail)(EngineError::QueueTimeout {
                    waited_ms: waited.as_millis() as u64,
                });
            } else {
                queue.push(task);
            }
        }
    }

    /// Starts one task: accounts for it in the window and active count,
    /// then spawns its attempt.
    fn begin(self: &Arc<Self>, task: QueuedTask) {
        self.active.fetch_add(1, Ordering::SeqCst);
        self.window.lock().count += 1;

        let shared = Arc::clone(self);
        tokio::spawn(async move {
            let outcome = (task.run)(task.retry_count).await;
            shared.active.fetch_sub(1, Ordering::SeqCst);
            match outcome {
                TaskOutcome::Settled => shared.notify.notify_one(),
                TaskOutcome::RateLimited => {
                    let delay = shared.retry.delay_for_retry(task.retry_count);
                    debug!(
                        retry = task.retry_count + 1,
                        delay_ms = delay.as_millis() as u64,
                        "task rate limited, backing off before re-queue"
                    );
                    tokio::time::sleep(delay).await;
                    shared.queue.lock().push(QueuedTask {
                        retry_count: task.retry_count + 1,
                        ..task
                    });
                    shared.notify.notify_one();
                }
            }
        });
    }
}

/// The coordinator loop: evict, refresh the window, dispatch what fits,
/// then idle until notified or the poll interval elapses.
async fn coordinate(shared: Arc<Shared>) {
    while shared.running.load(Ordering::SeqCst) {
        let now = Instant::now();
        shared.evict_expired(now);
        shared.refresh_window(now);

        while shared.can_dispatch() {
            let task = shared.queue.lock().pop();
            match task {
                Some(task) => shared.begin(task),
                None => break,
            }
        }

        tokio::select! {
            _ = shared.notify.notified() => {}
            _ = tokio::time::sleep(shared.limiter.poll_interval) => {}
        }
    }

    // Reject whatever is still queued at shutdown
    let drained = std::mem::take(&mut *shared.queue.lock());
    for task in drained.into_vec() {
        (task.fail)(EngineError::LimiterStopped);
    }
}

/// Priority-based rate limiter for outbound remote calls.
pub struct RateLimiter {
    shared: Arc<Shared>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl RateLimiter {
    /// Creates a limiter. Call [`RateLimiter::start`] before enqueueing.
    pub fn new(limiter: LimiterConfig, retry: RetryConfig) -> Self {
        Self {
            shared: Arc::new(Shared {
                limiter,
                retry,
                queue: Mutex::new(BinaryHeap::new()),
                seq: AtomicU64::new(0),
                active: AtomicUsize::new(0),
                window: Mutex::new(Window {
                    started_at: Instant::now(),
                    count: 0,
                }),
                running: AtomicBool::new(false),
                notify: Notify::new(),
            }),
            handle: Mutex::new(None),
        }
    }

    /// Starts the coordinator task. Idempotent.
    pub fn start(&self) {
        if !self.shared.running.swap(true, Ordering::SeqCst) {
            *self.handle.lock() = Some(tokio::spawn(coordinate(Arc::clone(&self.shared))));
        }
    }

    /// Stops the coordinator and rejects all queued tasks. Running tasks
    /// complete and their results are still delivered.
    pub async fn shutdown(&self) {
        if self.shared.running.swap(false, Ordering::SeqCst) {
            self.shared.notify.notify_one();
            let handle = self.handle.lock().take();
            if let Some(handle) = handle {
                let _ = handle.await;
            }
        }
    }

    /// Returns true if the coordinator is running.
    pub fn is_running(&self) -> bool {
        self.shared.running.load(Ordering::SeqCst)
    }

    /// Submits a task and waits for it to settle.
    ///
    /// The task closure must be re-invokable: a failure classified as
    /// rate limiting is re-submitted after `base_delay * 2^retry_count`,
    /// up to `max_retries`, and beyond that rejected with the original
    /// error. Any other failure rejects immediately. A task still queued
    /// after `queue_timeout` is evicted with a timeout error, even if it
    /// never started.
    pub async fn enqueue<T, F, Fut>(&self, priority: Priority, task: F) -> EngineResult<Settled<T>>
    where
        T: Send + 'static,
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = EngineResult<T>> + Send + 'static,
    {
        if !self.is_running() {
            return Err(EngineError::LimiterStopped);
        }

        let (tx, rx) = oneshot::channel::<EngineResult<Settled<T>>>();
        let sender = Arc::new(Mutex::new(Some(tx)));
        let task = Arc::new(task);
        let max_retries = self.shared.retry.max_retries;

        let run_sender = Arc::clone(&sender);
        let run: RunFn = Arc::new(move |attempt: u32| {
            let task = Arc::clone(&task);
            let sender = Arc::clone(&run_sender);
            Box::pin(async move {
                match task().await {
                    Ok(value) => {
                        if let Some(tx) = sender.lock().take() {
                            let _ = tx.send(Ok(Settled {
                                value,
                                retries: attempt,
                            }));
                        }
                        TaskOutcome::Settled
                    }
                    Err(err) if err.is_rate_limited() && attempt < max_retries => {
                        TaskOutcome::RateLimited
                    }
                    Err(err) => {
                        if let Some(tx) = sender.lock().take() {
                            let _ = tx.send(Err(err));
                        }
                        TaskOutcome::Settled
                    }
                }
            }) as BoxFuture<TaskOutcome>
        });

        let fail_sender = Arc::clone(&sender);
        let fail: FailFn = Arc::new(move |err| {
            if let Some(tx) = fail_sender.lock().take() {
                let _ = tx.send(Err(err));
            }
        });

        self.shared.queue.lock().push(QueuedTask {
            priority: priority as u8,
            seq: self.shared.seq.fetch_add(1, Ordering::SeqCst),
            enqueued_at: Instant::now(),
            retry_count: 0,
            run,
            fail,
        });
        self.shared.notify.notify_one();

        rx.await.map_err(|_| EngineError::TaskDropped)?
    }

    /// Returns a snapshot of the queue, active count, and window state.
    pub fn status(&self) -> LimiterStatus {
        self.shared.refresh_window(Instant::now());
        // Guards must drop before can_dispatch locks the same mutexes
        let queued = self.shared.queue.lock().len();
        let requests_in_window = self.shared.window.lock().count;
        LimiterStatus {
            queued,
            active: self.shared.active.load(Ordering::SeqCst),
            requests_in_window,
            can_start_now: self.is_running() && self.shared.can_dispatch(),
        }
    }
}
