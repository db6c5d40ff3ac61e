//! Priority dispatch
//!
//! The bus only depends on the `Dispatcher` contract. `WorkerPool` backs it
//! with a multi-level ready queue:
//! - one queue per priority class, HIGH drained before DEFAULT
//! - a batch (one publish fan-out) is enqueued under a single lock, so no
//!   worker can start a DEFAULT job from that batch before the HIGH ones
//!   are visible
//! - optional workers reserved for HIGH jobs, so HIGH work can start while
//!   every general worker is busy with DEFAULT work
//!
//! Workers never preempt a running job. Whenever a HIGH job is admitted and
//! no worker is free for it while some worker runs DEFAULT work, the job
//! starts later than it would under strict preemption, and the pool records
//! a degradation. A FIFO pool runs jobs in submission order and also reports
//! every priority inversion it causes through its `DegradationMonitor`.

use std::borrow::Cow;
use std::collections::VecDeque;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use camflow_core::PriorityClass;
use parking_lot::{Condvar, Mutex};

use crate::{PoolConfig, QueuePolicy, ScheduleError, ScheduleResult};

/// Unit of work handed to a dispatcher
pub type Job = Box<dyn FnOnce() + Send + 'static>;

/// A job tagged with its priority
pub struct ReadyJob {
    pub priority: PriorityClass,
    pub label: Cow<'static, str>,
    pub job: Job,
}

impl ReadyJob {
    pub fn new<F>(priority: PriorityClass, label: impl Into<Cow<'static, str>>, job: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        ReadyJob {
            priority,
            label: label.into(),
            job: Box::new(job),
        }
    }
}

impl std::fmt::Debug for ReadyJob {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReadyJob")
            .field("priority", &self.priority)
            .field("label", &self.label)
            .finish_non_exhaustive()
    }
}

/// Priority-aware job submission
pub trait Dispatcher: Send + Sync {
    /// Enqueue all jobs atomically with respect to dispatch decisions.
    /// On overflow, HIGH jobs are admitted first and the rest are dropped.
    fn submit_batch(&self, batch: Vec<ReadyJob>) -> ScheduleResult<()>;

    fn submit(&self, job: ReadyJob) -> ScheduleResult<()> {
        self.submit_batch(vec![job])
    }

    /// Whether every HIGH job so far started no later than it would have
    /// under strict preemption
    fn honors_priority(&self) -> bool;

    /// Priority inversions observed so far
    fn degradation_count(&self) -> u64;
}

/// Counts scheduling degradations. The first one is logged at warn,
/// later ones at debug.
#[derive(Debug, Default)]
pub struct DegradationMonitor {
    events: AtomicU64,
    warned: AtomicBool,
}

impl DegradationMonitor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, reason: &str) {
        let total = self.events.fetch_add(1, Ordering::Relaxed) + 1;
        if !self.warned.swap(true, Ordering::Relaxed) {
            tracing::warn!(total, "scheduling degraded: {}", reason);
        } else {
            tracing::debug!(total, "scheduling degraded: {}", reason);
        }
    }

    pub fn count(&self) -> u64 {
        self.events.load(Ordering::Relaxed)
    }
}

/// Worker pool counters
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PoolStats {
    pub submitted: u64,
    pub completed: u64,
    pub panicked: u64,
    pub rejected: u64,
    pub high_started: u64,
    pub default_started: u64,
}

struct ReadyQueues {
    policy: QueuePolicy,
    /// Indexed by `PriorityClass::rank`. FIFO only uses lane 0.
    lanes: [VecDeque<ReadyJob>; PriorityClass::COUNT],
}

impl ReadyQueues {
    fn new(policy: QueuePolicy) -> Self {
        ReadyQueues {
            policy,
            lanes: [VecDeque::new(), VecDeque::new()],
        }
    }

    fn len(&self) -> usize {
        self.lanes.iter().map(VecDeque::len).sum()
    }

    fn is_empty(&self) -> bool {
        self.lanes.iter().all(VecDeque::is_empty)
    }

    fn push(&mut self, job: ReadyJob) {
        let lane = match self.policy {
            QueuePolicy::Priority => job.priority.rank(),
            QueuePolicy::Fifo => 0,
        };
        self.lanes[lane].push_back(job);
    }

    /// Next job to run. `high_only` workers never take DEFAULT jobs.
    fn pop(&mut self, high_only: bool) -> Option<ReadyJob> {
        match self.policy {
            QueuePolicy::Priority => {
                let lanes = if high_only { 1 } else { PriorityClass::COUNT };
                self.lanes[..lanes].iter_mut().find_map(VecDeque::pop_front)
            }
            QueuePolicy::Fifo => {
                let lane = &mut self.lanes[0];
                match lane.front() {
                    Some(job) if high_only && job.priority != PriorityClass::High => None,
                    _ => lane.pop_front(),
                }
            }
        }
    }

    /// Is a job of lower priority than `priority` already waiting ahead?
    fn has_lower_than(&self, priority: PriorityClass) -> bool {
        self.lanes
            .iter()
            .flatten()
            .any(|queued| priority.outranks(queued.priority))
    }

    /// Queued jobs that will start before a newly admitted HIGH job
    fn ahead_of_high(&self) -> usize {
        match self.policy {
            QueuePolicy::Priority => self.lanes[PriorityClass::High.rank()].len(),
            QueuePolicy::Fifo => self.len(),
        }
    }
}

struct PoolState {
    queues: ReadyQueues,
    /// Running jobs, indexed by `PriorityClass::rank`
    running: [usize; PriorityClass::COUNT],
    in_flight: usize,
    shutdown: bool,
}

impl PoolState {
    /// Would a HIGH job admitted now find every worker taken while some of
    /// them run DEFAULT work it could have preempted?
    fn high_waits_behind_default(&self, workers: usize) -> bool {
        let running: usize = self.running.iter().sum();
        running + self.queues.ahead_of_high() >= workers
            && self.running[PriorityClass::Default.rank()] > 0
    }
}

struct PoolShared {
    state: Mutex<PoolState>,
    work_ready: Condvar,
    idle: Condvar,
    stats: Mutex<PoolStats>,
    degradation: DegradationMonitor,
    capacity: usize,
    workers: usize,
}

/// Multi-level ready-queue worker pool
pub struct WorkerPool {
    shared: Arc<PoolShared>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    config: PoolConfig,
}

impl WorkerPool {
    pub fn new(config: PoolConfig) -> ScheduleResult<Self> {
        config.validate().map_err(ScheduleError::InvalidConfig)?;

        let shared = Arc::new(PoolShared {
            state: Mutex::new(PoolState {
                queues: ReadyQueues::new(config.policy),
                running: [0; PriorityClass::COUNT],
                in_flight: 0,
                shutdown: false,
            }),
            work_ready: Condvar::new(),
            idle: Condvar::new(),
            stats: Mutex::new(PoolStats::default()),
            degradation: DegradationMonitor::new(),
            capacity: config.queue_capacity,
            workers: config.workers,
        });

        if config.policy == QueuePolicy::Fifo {
            tracing::warn!(
                workers = config.workers,
                "FIFO pool cannot honor subscription priority; dispatch is best effort"
            );
        }

        let pool = WorkerPool {
            shared,
            workers: Mutex::new(Vec::with_capacity(config.workers)),
            config,
        };

        for index in 0..pool.config.workers {
            let high_only = index < pool.config.reserved_high_workers;
            let shared = pool.shared.clone();
            let handle = thread::Builder::new()
                .name(format!("{}-{}", pool.config.thread_name, index))
                .spawn(move || worker_loop(shared, high_only))?;
            pool.workers.lock().push(handle);
        }

        tracing::info!(
            workers = pool.config.workers,
            reserved_high = pool.config.reserved_high_workers,
            policy = ?pool.config.policy,
            "worker pool started"
        );
        Ok(pool)
    }

    pub fn config(&self) -> &PoolConfig {
        &self.config
    }

    pub fn stats(&self) -> PoolStats {
        self.shared.stats.lock().clone()
    }

    pub fn queued(&self) -> usize {
        self.shared.state.lock().queues.len()
    }

    /// Block until no job is queued or running. Returns false on timeout.
    pub fn wait_idle(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut state = self.shared.state.lock();
        loop {
            if state.queues.is_empty() && state.in_flight == 0 {
                return true;
            }
            if self.shared.idle.wait_until(&mut state, deadline).timed_out() {
                return state.queues.is_empty() && state.in_flight == 0;
            }
        }
    }

    /// Stop accepting work, let queued jobs finish, join the workers
    pub fn shutdown(&self) {
        {
            let mut state = self.shared.state.lock();
            if state.shutdown {
                return;
            }
            state.shutdown = true;
        }
        self.shared.work_ready.notify_all();

        let current = thread::current().id();
        let handles: Vec<_> = self.workers.lock().drain(..).collect();
        for handle in handles {
            // The last pool handle can be dropped from inside a job
            if handle.thread().id() == current {
                continue;
            }
            if handle.join().is_err() {
                tracing::error!("worker thread panicked outside a job");
            }
        }
        tracing::info!("worker pool stopped");
    }
}

impl Dispatcher for WorkerPool {
    fn submit_batch(&self, mut batch: Vec<ReadyJob>) -> ScheduleResult<()> {
        if batch.is_empty() {
            return Ok(());
        }

        let policy = self.config.policy;
        if policy == QueuePolicy::Priority {
            // Stable: equal priorities keep submission order
            batch.sort_by_key(|job| job.priority.rank());
        }

        let mut dropped = 0;
        let mut admitted = 0u64;
        {
            let mut state = self.shared.state.lock();
            if state.shutdown {
                self.shared.stats.lock().rejected += batch.len() as u64;
                return Err(ScheduleError::ShutDown);
            }

            for job in batch {
                if state.queues.len() >= self.shared.capacity {
                    dropped += 1;
                    tracing::warn!(label = %job.label, priority = %job.priority, "ready queue full, job dropped");
                    continue;
                }
                if policy == QueuePolicy::Fifo && state.queues.has_lower_than(job.priority) {
                    self.shared.degradation.record(&format!(
                        "{} job {} queued behind lower-priority work",
                        job.priority, job.label
                    ));
                } else if job.priority == PriorityClass::High
                    && state.high_waits_behind_default(self.shared.workers)
                {
                    self.shared.degradation.record(&format!(
                        "{} job {} waits for a worker running {} work",
                        job.priority,
                        job.label,
                        PriorityClass::Default
                    ));
                }
                tracing::debug!(label = %job.label, priority = %job.priority, "job queued");
                state.queues.push(job);
                admitted += 1;
            }
        }

        {
            let mut stats = self.shared.stats.lock();
            stats.submitted += admitted;
            stats.rejected += dropped as u64;
        }
        self.shared.work_ready.notify_all();

        if dropped > 0 {
            return Err(ScheduleError::QueueFull {
                dropped,
                capacity: self.shared.capacity,
            });
        }
        Ok(())
    }

    fn honors_priority(&self) -> bool {
        self.config.policy == QueuePolicy::Priority && self.shared.degradation.count() == 0
    }

    fn degradation_count(&self) -> u64 {
        self.shared.degradation.count()
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl std::fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerPool")
            .field("config", &self.config)
            .field("stats", &self.stats())
            .finish()
    }
}

fn worker_loop(shared: Arc<PoolShared>, high_only: bool) {
    loop {
        let next = {
            let mut state = shared.state.lock();
            loop {
                if let Some(job) = state.queues.pop(high_only) {
                    state.in_flight += 1;
                    state.running[job.priority.rank()] += 1;
                    break Some(job);
                }
                if state.shutdown {
                    break None;
                }
                shared.work_ready.wait(&mut state);
            }
        };
        let Some(ready) = next else {
            return;
        };

        {
            let mut stats = shared.stats.lock();
            match ready.priority {
                PriorityClass::High => stats.high_started += 1,
                PriorityClass::Default => stats.default_started += 1,
            }
        }

        let (label, rank) = (ready.label, ready.priority.rank());
        let panicked = catch_unwind(AssertUnwindSafe(ready.job)).is_err();
        if panicked {
            tracing::warn!(label = %label, "job panicked");
        }

        {
            let mut stats = shared.stats.lock();
            stats.completed += 1;
            if panicked {
                stats.panicked += 1;
            }
        }

        let mut state = shared.state.lock();
        state.in_flight -= 1;
        state.running[rank] -= 1;
        if state.queues.is_empty() && state.in_flight == 0 {
            shared.idle.notify_all();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::sync::mpsc;

    const WAIT: Duration = Duration::from_secs(5);

    /// Keeps one general worker busy with DEFAULT work until released, so
    /// later submissions pile up in the ready queue.
    fn block_worker(pool: &WorkerPool) -> Arc<(Mutex<bool>, Condvar)> {
        let gate = Arc::new((Mutex::new(false), Condvar::new()));
        let started = Arc::new((Mutex::new(false), Condvar::new()));
        let (g, s) = (gate.clone(), started.clone());
        pool.submit(ReadyJob::new(PriorityClass::Default, "blocker", move || {
            *s.0.lock() = true;
            s.1.notify_all();
            let mut open = g.0.lock();
            while !*open {
                g.1.wait(&mut open);
            }
        }))
        .unwrap();

        let mut running = started.0.lock();
        while !*running {
            started.1.wait(&mut running);
        }
        gate
    }

    fn release(gate: &Arc<(Mutex<bool>, Condvar)>) {
        *gate.0.lock() = true;
        gate.1.notify_all();
    }

    fn recording_job(order: &Arc<Mutex<Vec<&'static str>>>, priority: PriorityClass, label: &'static str) -> ReadyJob {
        let order = order.clone();
        ReadyJob::new(priority, label, move || order.lock().push(label))
    }

    #[test]
    fn test_priority_pool_drains_high_first() {
        let pool = WorkerPool::new(PoolConfig::single_worker()).unwrap();
        let order = Arc::new(Mutex::new(Vec::new()));

        let gate = block_worker(&pool);
        pool.submit(recording_job(&order, PriorityClass::Default, "logger-1")).unwrap();
        pool.submit(recording_job(&order, PriorityClass::Default, "logger-2")).unwrap();
        pool.submit(recording_job(&order, PriorityClass::High, "detector")).unwrap();
        release(&gate);

        assert!(pool.wait_idle(WAIT));
        assert_eq!(*order.lock(), vec!["detector", "logger-1", "logger-2"]);
        // The detector still waited for the running blocker
        assert_eq!(pool.degradation_count(), 1);
    }

    #[test]
    fn test_high_behind_running_default_is_degradation() {
        let pool = WorkerPool::new(PoolConfig::single_worker()).unwrap();
        assert!(pool.honors_priority());

        let gate = block_worker(&pool);
        pool.submit(ReadyJob::new(PriorityClass::High, "detector", || {})).unwrap();
        assert_eq!(pool.degradation_count(), 1);
        assert!(!pool.honors_priority());

        release(&gate);
        assert!(pool.wait_idle(WAIT));
    }

    #[test]
    fn test_default_pool_starts_high_while_default_runs() {
        let pool = WorkerPool::new(PoolConfig::default()).unwrap();
        let general = pool.config().workers - pool.config().reserved_high_workers;
        let gates: Vec<_> = (0..general).map(|_| block_worker(&pool)).collect();

        let (tx, rx) = mpsc::channel();
        pool.submit(ReadyJob::new(PriorityClass::High, "detector", move || {
            let _ = tx.send(Instant::now());
        }))
        .unwrap();

        // Starts while every general worker is still held
        assert!(rx.recv_timeout(WAIT).is_ok());
        assert_eq!(pool.degradation_count(), 0);
        assert!(pool.honors_priority());

        gates.iter().for_each(release);
        assert!(pool.wait_idle(WAIT));
    }

    #[test]
    fn test_unreserved_pool_reports_high_behind_default() {
        let pool = WorkerPool::new(PoolConfig {
            workers: 2,
            reserved_high_workers: 0,
            ..PoolConfig::default()
        })
        .unwrap();
        let gates = [block_worker(&pool), block_worker(&pool)];

        let (tx, rx) = mpsc::channel();
        pool.submit(ReadyJob::new(PriorityClass::High, "detector", move || {
            let _ = tx.send(());
        }))
        .unwrap();

        assert_eq!(pool.degradation_count(), 1);
        assert!(!pool.honors_priority());
        assert!(rx.recv_timeout(Duration::from_millis(20)).is_err());

        gates.iter().for_each(release);
        assert!(rx.recv_timeout(WAIT).is_ok());
        assert!(pool.wait_idle(WAIT));
    }

    #[test]
    fn test_batch_respects_priority_not_registration_order() {
        let pool = WorkerPool::new(PoolConfig::single_worker()).unwrap();
        let order = Arc::new(Mutex::new(Vec::new()));

        pool.submit_batch(vec![
            recording_job(&order, PriorityClass::Default, "logger"),
            recording_job(&order, PriorityClass::High, "detector"),
        ])
        .unwrap();

        assert!(pool.wait_idle(WAIT));
        assert_eq!(*order.lock(), vec!["detector", "logger"]);
    }

    #[test]
    fn test_fifo_pool_reports_inversion() {
        let pool = WorkerPool::new(PoolConfig::fifo(1)).unwrap();
        let order = Arc::new(Mutex::new(Vec::new()));

        pool.submit_batch(vec![
            recording_job(&order, PriorityClass::Default, "logger"),
            recording_job(&order, PriorityClass::High, "detector"),
        ])
        .unwrap();

        assert!(pool.wait_idle(WAIT));
        assert_eq!(*order.lock(), vec!["logger", "detector"]);
        assert!(!pool.honors_priority());
        assert_eq!(pool.degradation_count(), 1);
    }

    #[test]
    fn test_fifo_pool_no_inversion_no_report() {
        let pool = WorkerPool::new(PoolConfig::fifo(1)).unwrap();
        let order = Arc::new(Mutex::new(Vec::new()));

        pool.submit_batch(vec![
            recording_job(&order, PriorityClass::High, "detector"),
            recording_job(&order, PriorityClass::Default, "logger"),
        ])
        .unwrap();

        assert!(pool.wait_idle(WAIT));
        assert_eq!(pool.degradation_count(), 0);
    }

    #[test]
    fn test_reserved_worker_runs_high_while_default_blocks() {
        let pool = WorkerPool::new(PoolConfig::with_reserved_high()).unwrap();
        let order = Arc::new(Mutex::new(Vec::new()));

        // Occupies the only general worker
        let gate = block_worker(&pool);
        pool.submit(recording_job(&order, PriorityClass::High, "detector")).unwrap();

        let deadline = Instant::now() + WAIT;
        while order.lock().is_empty() && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(1));
        }
        assert_eq!(*order.lock(), vec!["detector"]);
        assert_eq!(pool.degradation_count(), 0);

        release(&gate);
        assert!(pool.wait_idle(WAIT));
    }

    #[test]
    fn test_queue_full_admits_high_first() {
        let config = PoolConfig {
            queue_capacity: 1,
            ..PoolConfig::single_worker()
        };
        let pool = WorkerPool::new(config).unwrap();
        let order = Arc::new(Mutex::new(Vec::new()));

        let gate = block_worker(&pool);
        let result = pool.submit_batch(vec![
            recording_job(&order, PriorityClass::Default, "logger"),
            recording_job(&order, PriorityClass::High, "detector"),
        ]);
        assert!(matches!(result, Err(ScheduleError::QueueFull { dropped: 1, capacity: 1 })));
        release(&gate);

        assert!(pool.wait_idle(WAIT));
        assert_eq!(*order.lock(), vec!["detector"]);
        assert_eq!(pool.stats().rejected, 1);
    }

    #[test]
    fn test_panicking_job_does_not_kill_worker() {
        let pool = WorkerPool::new(PoolConfig::single_worker()).unwrap();
        let order = Arc::new(Mutex::new(Vec::new()));

        pool.submit(ReadyJob::new(PriorityClass::High, "bad", || panic!("callback failure")))
            .unwrap();
        pool.submit(recording_job(&order, PriorityClass::Default, "after")).unwrap();

        assert!(pool.wait_idle(WAIT));
        assert_eq!(*order.lock(), vec!["after"]);
        let stats = pool.stats();
        assert_eq!(stats.panicked, 1);
        assert_eq!(stats.completed, 2);
    }

    #[test]
    fn test_submit_after_shutdown_rejected() {
        let pool = WorkerPool::new(PoolConfig::single_worker()).unwrap();
        pool.shutdown();
        let result = pool.submit(ReadyJob::new(PriorityClass::High, "late", || {}));
        assert!(matches!(result, Err(ScheduleError::ShutDown)));
    }

    #[test]
    fn test_shutdown_finishes_queued_jobs() {
        let pool = WorkerPool::new(PoolConfig::single_worker()).unwrap();
        let order = Arc::new(Mutex::new(Vec::new()));

        let gate = block_worker(&pool);
        pool.submit(recording_job(&order, PriorityClass::Default, "queued")).unwrap();
        release(&gate);
        pool.shutdown();

        assert_eq!(*order.lock(), vec!["queued"]);
    }

    #[test]
    fn test_invalid_config_rejected() {
        let config = PoolConfig { workers: 0, ..PoolConfig::default() };
        assert!(matches!(WorkerPool::new(config), Err(ScheduleError::InvalidConfig(_))));
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(16))]

        #[test]
        fn prop_queued_high_runs_before_queued_default(highs in proptest::collection::vec(any::<bool>(), 1..12)) {
            let pool = WorkerPool::new(PoolConfig::single_worker()).unwrap();
            let order = Arc::new(Mutex::new(Vec::new()));

            let gate = block_worker(&pool);
            for (index, &high) in highs.iter().enumerate() {
                let priority = if high { PriorityClass::High } else { PriorityClass::Default };
                let order = order.clone();
                pool.submit(ReadyJob::new(priority, "job", move || order.lock().push(index))).unwrap();
            }
            release(&gate);
            prop_assert!(pool.wait_idle(WAIT));

            let (high, default): (Vec<usize>, Vec<usize>) = (0..highs.len()).partition(|&i| highs[i]);
            let expected: Vec<usize> = high.into_iter().chain(default).collect();
            prop_assert_eq!(&*order.lock(), &expected);
        }
    }
}
