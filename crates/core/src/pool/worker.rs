//! Fixed-size worker pool for CPU-heavy tasks.
//!
//! Two submission lanes: fire-and-forget tasks and context-carrying tasks
//! with a single-delivery result channel. Queue overflow degrades to a
//! freshly spawned task instead of shedding load.

use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Instant;

use futures::future::BoxFuture;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::context::{ContextError, OpContext};

/// Boxed error type produced by pool tasks.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// A unit of work for the plain lane.
pub type Task = BoxFuture<'static, Result<(), BoxError>>;

/// A unit of work that receives the submitting operation context.
pub type ContextTask = Box<dyn FnOnce(OpContext) -> Task + Send + 'static>;

/// Errors surfaced by the worker pool.
#[derive(Debug, Error)]
pub enum PoolError {
    /// The pool has not been started (or has been stopped).
    #[error("worker pool not started")]
    NotStarted,

    /// `start` was called more than once.
    #[error("worker pool already started")]
    AlreadyStarted,

    /// The submitting context was already done.
    #[error(transparent)]
    Context(#[from] ContextError),

    /// A batch task failed.
    #[error("task failed: {0}")]
    TaskFailed(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PoolState {
    NotStarted,
    Running,
    Stopped,
}

struct ContextJob {
    ctx: OpContext,
    task: ContextTask,
    done: oneshot::Sender<Result<(), BoxError>>,
}

#[derive(Default)]
struct PoolStats {
    active: AtomicU64,
    queued: AtomicU64,
    total: AtomicU64,
    failed: AtomicU64,
    /// Rolling average execution time in nanoseconds. Concurrent updates
    /// are racy and the value is advisory.
    avg_exec_ns: AtomicI64,
}

impl PoolStats {
    fn record(&self, failed: bool, elapsed_ns: i64) {
        self.total.fetch_add(1, Ordering::Relaxed);
        if failed {
            self.failed.fetch_add(1, Ordering::Relaxed);
        }
        let old = self.avg_exec_ns.load(Ordering::Relaxed);
        let new = if old == 0 {
            elapsed_ns
        } else {
            (old * 9 + elapsed_ns) / 10
        };
        self.avg_exec_ns.store(new, Ordering::Relaxed);
    }
}

/// Point-in-time view of pool activity.
#[derive(Debug, Clone, serde::Serialize)]
pub struct WorkerPoolStats {
    pub max_workers: usize,
    pub active_workers: u64,
    pub queue_size: u64,
    pub total_tasks: u64,
    pub failed_tasks: u64,
    pub success_rate: f64,
    pub avg_exec_time_ms: f64,
}

/// A pool of `max_workers` task runners over two bounded lanes.
pub struct WorkerPool {
    max_workers: usize,
    plain_tx: mpsc::Sender<Task>,
    context_tx: mpsc::Sender<ContextJob>,
    plain_rx: Arc<tokio::sync::Mutex<mpsc::Receiver<Task>>>,
    context_rx: Arc<tokio::sync::Mutex<mpsc::Receiver<ContextJob>>>,
    stats: Arc<PoolStats>,
    quit: CancellationToken,
    state: Mutex<PoolState>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl WorkerPool {
    /// Create a pool with `max_workers` workers and a queue depth of
    /// `max_workers * 10` per lane.
    pub fn new(max_workers: usize) -> Self {
        let max_workers = max_workers.max(1);
        let depth = max_workers * 10;
        let (plain_tx, plain_rx) = mpsc::channel(depth);
        let (context_tx, context_rx) = mpsc::channel(depth);

        Self {
            max_workers,
            plain_tx,
            context_tx,
            plain_rx: Arc::new(tokio::sync::Mutex::new(plain_rx)),
            context_rx: Arc::new(tokio::sync::Mutex::new(context_rx)),
            stats: Arc::new(PoolStats::default()),
            quit: CancellationToken::new(),
            state: Mutex::new(PoolState::NotStarted),
            workers: Mutex::new(Vec::new()),
        }
    }

    /// Start the workers. One-shot: restarting returns an error.
    pub fn start(&self) -> Result<(), PoolError> {
        let mut state = self.state.lock().expect("pool state poisoned");
        if *state != PoolState::NotStarted {
            return Err(PoolError::AlreadyStarted);
        }

        let mut workers = self.workers.lock().expect("pool workers poisoned");
        for id in 0..self.max_workers {
            let plain_rx = Arc::clone(&self.plain_rx);
            let context_rx = Arc::clone(&self.context_rx);
            let stats = Arc::clone(&self.stats);
            let quit = self.quit.clone();

            workers.push(tokio::spawn(async move {
                Self::worker_loop(id, plain_rx, context_rx, stats, quit).await;
            }));
        }

        *state = PoolState::Running;
        Ok(())
    }

    async fn worker_loop(
        id: usize,
        plain_rx: Arc<tokio::sync::Mutex<mpsc::Receiver<Task>>>,
        context_rx: Arc<tokio::sync::Mutex<mpsc::Receiver<ContextJob>>>,
        stats: Arc<PoolStats>,
        quit: CancellationToken,
    ) {
        debug!(worker = id, "worker started");
        loop {
            enum Next {
                Plain(Task),
                Context(ContextJob),
            }

            // Only one worker parks on the receivers at a time; the rest
            // queue on the locks and are woken as jobs drain.
            let next = {
                let mut plain = plain_rx.lock().await;
                let mut context = context_rx.lock().await;
                tokio::select! {
                    biased;
                    _ = quit.cancelled() => break,
                    task = plain.recv() => match task {
                        Some(task) => Next::Plain(task),
                        None => break,
                    },
                    job = context.recv() => match job {
                        Some(job) => Next::Context(job),
                        None => break,
                    },
                }
            };

            stats.queued.fetch_sub(1, Ordering::Relaxed);
            match next {
                Next::Plain(task) => {
                    let _ = Self::execute(&stats, task).await;
                }
                Next::Context(job) => {
                    let ContextJob { ctx, task, done } = job;
                    let result = Self::execute(&stats, task(ctx)).await;
                    // Single-delivery; a dropped receiver is not an error.
                    let _ = done.send(result);
                }
            }
        }
        debug!(worker = id, "worker stopped");
    }

    async fn execute(stats: &PoolStats, task: Task) -> Result<(), BoxError> {
        stats.active.fetch_add(1, Ordering::Relaxed);
        let start = Instant::now();
        let result = task.await;
        stats.record(result.is_err(), start.elapsed().as_nanos() as i64);
        stats.active.fetch_sub(1, Ordering::Relaxed);
        result
    }

    fn ensure_running(&self) -> Result<(), PoolError> {
        match *self.state.lock().expect("pool state poisoned") {
            PoolState::Running => Ok(()),
            _ => Err(PoolError::NotStarted),
        }
    }

    /// Submit a task without waiting for it.
    ///
    /// When the lane is full the task runs in a freshly spawned unit
    /// instead: availability is preferred over strictly bounded
    /// concurrency.
    pub fn submit(&self, task: Task) -> Result<(), PoolError> {
        self.ensure_running()?;

        match self.plain_tx.try_send(task) {
            Ok(()) => {
                self.stats.queued.fetch_add(1, Ordering::Relaxed);
                Ok(())
            }
            Err(mpsc::error::TrySendError::Full(task))
            | Err(mpsc::error::TrySendError::Closed(task)) => {
                debug!("worker queue saturated, degrading to spawned task");
                let stats = Arc::clone(&self.stats);
                tokio::spawn(async move {
                    let _ = Self::execute(&stats, task).await;
                });
                Ok(())
            }
        }
    }

    /// Submit a context-carrying task; the returned channel delivers the
    /// task result exactly once.
    ///
    /// Fails fast without enqueueing when the context is already done.
    pub fn submit_with_context(
        &self,
        ctx: &OpContext,
        task: ContextTask,
    ) -> Result<oneshot::Receiver<Result<(), BoxError>>, PoolError> {
        self.ensure_running()?;
        ctx.check()?;

        let (done_tx, done_rx) = oneshot::channel();
        let job = ContextJob {
            ctx: ctx.clone(),
            task,
            done: done_tx,
        };

        match self.context_tx.try_send(job) {
            Ok(()) => {
                self.stats.queued.fetch_add(1, Ordering::Relaxed);
                Ok(done_rx)
            }
            Err(mpsc::error::TrySendError::Full(job))
            | Err(mpsc::error::TrySendError::Closed(job)) => {
                debug!("context queue saturated, degrading to spawned task");
                let stats = Arc::clone(&self.stats);
                tokio::spawn(async move {
                    let ContextJob { ctx, task, done } = job;
                    let result = Self::execute(&stats, task(ctx)).await;
                    let _ = done.send(result);
                });
                Ok(done_rx)
            }
        }
    }

    /// Fan a batch of tasks out and wait for completion or the context
    /// deadline. The first task error wins.
    pub async fn submit_batch(&self, ctx: &OpContext, tasks: Vec<Task>) -> Result<(), PoolError> {
        self.ensure_running()?;

        let count = tasks.len();
        if count == 0 {
            return Ok(());
        }

        let (tx, mut rx) = mpsc::channel::<Option<String>>(count);
        for task in tasks {
            let ctx = ctx.clone();
            let tx = tx.clone();
            self.submit(Box::pin(async move {
                if let Err(err) = ctx.check() {
                    let _ = tx.send(Some(err.to_string())).await;
                    return Err(Box::new(err) as BoxError);
                }
                match task.await {
                    Ok(()) => {
                        let _ = tx.send(None).await;
                        Ok(())
                    }
                    Err(err) => {
                        let _ = tx.send(Some(err.to_string())).await;
                        Err(err)
                    }
                }
            }))?;
        }
        drop(tx);

        let mut completed = 0;
        while completed < count {
            tokio::select! {
                err = ctx.done() => return Err(err.into()),
                msg = rx.recv() => match msg {
                    Some(Some(failure)) => return Err(PoolError::TaskFailed(failure)),
                    Some(None) => completed += 1,
                    None => break,
                },
            }
        }

        Ok(())
    }

    /// Stop the pool, waiting for in-flight work to drain. Idempotent.
    pub async fn stop(&self) {
        {
            let mut state = self.state.lock().expect("pool state poisoned");
            if *state != PoolState::Running {
                return;
            }
            *state = PoolState::Stopped;
        }

        self.quit.cancel();
        let workers = {
            let mut workers = self.workers.lock().expect("pool workers poisoned");
            std::mem::take(&mut *workers)
        };
        for worker in workers {
            let _ = worker.await;
        }
    }

    /// Number of tasks currently executing.
    pub fn active_workers(&self) -> u64 {
        self.stats.active.load(Ordering::Relaxed)
    }

    /// Number of tasks waiting in the lanes.
    pub fn queue_size(&self) -> u64 {
        self.stats.queued.load(Ordering::Relaxed)
    }

    /// Current pool statistics.
    pub fn stats(&self) -> WorkerPoolStats {
        let total = self.stats.total.load(Ordering::Relaxed);
        let failed = self.stats.failed.load(Ordering::Relaxed);
        let success_rate = if total > 0 {
            (total - failed) as f64 / total as f64
        } else {
            0.0
        };

        WorkerPoolStats {
            max_workers: self.max_workers,
            active_workers: self.active_workers(),
            queue_size: self.queue_size(),
            total_tasks: total,
            failed_tasks: failed,
            success_rate,
            avg_exec_time_ms: self.stats.avg_exec_ns.load(Ordering::Relaxed) as f64 / 1e6,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    fn counting_task(counter: Arc<AtomicUsize>) -> Task {
        Box::pin(async move {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })
    }

    #[tokio::test]
    async fn submit_before_start_is_rejected() {
        let pool = WorkerPool::new(2);
        let result = pool.submit(Box::pin(async { Ok(()) }));
        assert!(matches!(result, Err(PoolError::NotStarted)));
    }

    #[tokio::test]
    async fn start_is_one_shot() {
        let pool = WorkerPool::new(2);
        pool.start().unwrap();
        assert!(matches!(pool.start(), Err(PoolError::AlreadyStarted)));
        pool.stop().await;
        assert!(matches!(pool.start(), Err(PoolError::AlreadyStarted)));
    }

    #[tokio::test]
    async fn tasks_run_and_are_counted() {
        let pool = WorkerPool::new(2);
        pool.start().unwrap();

        let counter = Arc::new(AtomicUsize::new(0));
        for _ in 0..20 {
            pool.submit(counting_task(Arc::clone(&counter))).unwrap();
        }

        tokio::time::timeout(Duration::from_secs(5), async {
            while counter.load(Ordering::SeqCst) < 20 {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();

        let stats = pool.stats();
        assert_eq!(stats.total_tasks, 20);
        assert_eq!(stats.failed_tasks, 0);
        assert!(stats.success_rate > 0.99);
        pool.stop().await;
    }

    #[tokio::test]
    async fn failures_increment_the_failed_counter() {
        let pool = WorkerPool::new(1);
        pool.start().unwrap();

        let rx = pool
            .submit_with_context(
                &OpContext::new(),
                Box::new(|_ctx| Box::pin(async { Err("boom".into()) })),
            )
            .unwrap();

        let result = rx.await.unwrap();
        assert!(result.is_err());
        assert_eq!(pool.stats().failed_tasks, 1);
        pool.stop().await;
    }

    #[tokio::test]
    async fn queue_overflow_degrades_instead_of_rejecting() {
        let pool = WorkerPool::new(1);
        pool.start().unwrap();

        let counter = Arc::new(AtomicUsize::new(0));
        // Far beyond the lane depth of 10; all of them must still run.
        for _ in 0..100 {
            pool.submit(counting_task(Arc::clone(&counter))).unwrap();
        }

        tokio::time::timeout(Duration::from_secs(5), async {
            while counter.load(Ordering::SeqCst) < 100 {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();
        pool.stop().await;
    }

    #[tokio::test]
    async fn expired_context_fails_fast() {
        let pool = WorkerPool::new(1);
        pool.start().unwrap();

        let ctx = OpContext::with_timeout(Duration::ZERO);
        tokio::time::sleep(Duration::from_millis(5)).await;

        let result =
            pool.submit_with_context(&ctx, Box::new(|_ctx| Box::pin(async { Ok(()) })));
        assert!(matches!(result, Err(PoolError::Context(_))));
        assert_eq!(pool.stats().total_tasks, 0);
        pool.stop().await;
    }

    #[tokio::test]
    async fn context_task_delivers_result_once() {
        let pool = WorkerPool::new(2);
        pool.start().unwrap();

        let rx = pool
            .submit_with_context(
                &OpContext::new(),
                Box::new(|_ctx| Box::pin(async { Ok(()) })),
            )
            .unwrap();

        assert!(rx.await.unwrap().is_ok());
        pool.stop().await;
    }

    #[tokio::test]
    async fn batch_first_error_wins() {
        let pool = WorkerPool::new(2);
        pool.start().unwrap();

        let ctx = OpContext::with_timeout(Duration::from_secs(5));
        let tasks: Vec<Task> = vec![
            Box::pin(async { Ok(()) }),
            Box::pin(async { Err("second task failed".into()) }),
            Box::pin(async { Ok(()) }),
        ];

        let result = pool.submit_batch(&ctx, tasks).await;
        match result {
            Err(PoolError::TaskFailed(msg)) => assert!(msg.contains("second task failed")),
            other => panic!("expected TaskFailed, got {:?}", other.map(|_| ())),
        }
        pool.stop().await;
    }

    #[tokio::test]
    async fn batch_completes_cleanly() {
        let pool = WorkerPool::new(4);
        pool.start().unwrap();

        let ctx = OpContext::with_timeout(Duration::from_secs(5));
        let counter = Arc::new(AtomicUsize::new(0));
        let tasks: Vec<Task> = (0..8)
            .map(|_| counting_task(Arc::clone(&counter)))
            .collect();

        pool.submit_batch(&ctx, tasks).await.unwrap();
        assert_eq!(counter.load(Ordering::SeqCst), 8);
        pool.stop().await;
    }

    #[tokio::test]
    async fn stop_is_idempotent() {
        let pool = WorkerPool::new(2);
        pool.start().unwrap();
        pool.stop().await;
        pool.stop().await;
    }

    #[tokio::test]
    async fn rolling_average_is_seeded_then_filtered() {
        let stats = PoolStats::default();
        stats.record(false, 1_000);
        assert_eq!(stats.avg_exec_ns.load(Ordering::Relaxed), 1_000);
        stats.record(false, 2_000);
        assert_eq!(stats.avg_exec_ns.load(Ordering::Relaxed), 1_100);
    }
}
