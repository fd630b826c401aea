//! `Dispatcher`: runs application handler callbacks off the calling
//! thread, in the order they were enqueued, on a small pool of worker
//! threads that normally behaves like a single serial queue.
//!
//! Handlers run one at a time so application code never has to reason
//! about concurrent callback invocations for the same core. The one
//! exception is the watchdog escalation: if the in-flight handler has not
//! returned within `max_dispatch_time_ms`, an additional worker is spawned
//! (up to `max_dispatchers`) so the queue keeps draining rather than
//! wedging behind one slow callback. Workers
//! that get spawned this way are never retired — once escalated, the pool
//! stays at the higher concurrency for the rest of its life, which is the
//! same trade vsomeip's routing manager makes (`examples/original_source`).
//!
//! Escalation is the only way two jobs ever run at once, so every job that
//! is scoped to a (service, instance) — an availability callback or a
//! message callback — is tagged with an [`OrderingKey`] via
//! [`Dispatcher::enqueue_for`]. A worker never picks up a job whose key
//! another worker currently has in flight, so an availability callback and
//! a message callback for the same service are never observed out of
//! order or concurrently, no matter how many workers are active.

use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle, ThreadId};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use crate::observability::{LogField, Logger};

type Job = Box<dyn FnOnce() + Send + 'static>;

/// Groups jobs that must never run concurrently with one another — in
/// practice a (service, instance) pair, so an availability callback and a
/// message callback for the same service never race.
pub type OrderingKey = (u16, u16);

struct QueuedJob {
    key: Option<OrderingKey>,
    job: Job,
}

/// Counters a host can poll for dispatcher health.
#[derive(Default)]
pub struct DispatchMetrics {
    dispatched: AtomicU64,
    escalations: AtomicU64,
}

impl DispatchMetrics {
    pub fn dispatched(&self) -> u64 {
        self.dispatched.load(Ordering::Relaxed)
    }

    pub fn escalations(&self) -> u64 {
        self.escalations.load(Ordering::Relaxed)
    }
}

struct Inner {
    queue: Mutex<VecDeque<QueuedJob>>,
    queue_cv: Condvar,
    stopping: AtomicBool,
    workers: Mutex<Vec<(ThreadId, JoinHandle<()>)>>,
    max_dispatchers: usize,
    max_dispatch_time: Duration,
    in_flight_started_at: Mutex<Option<Instant>>,
    /// Keys currently being processed by some worker; a job whose key is
    /// in this set stays in the queue until that worker finishes, so two
    /// jobs sharing a key never run at the same time.
    in_flight_keys: Mutex<HashSet<OrderingKey>>,
    metrics: Arc<DispatchMetrics>,
    logger: Arc<dyn Logger>,
}

/// A bounded worker pool dispatching FIFO work items.
pub struct Dispatcher {
    inner: Arc<Inner>,
    watchdog: Mutex<Option<JoinHandle<()>>>,
}

impl Dispatcher {
    pub fn new(max_dispatchers: usize, max_dispatch_time_ms: u64, logger: Arc<dyn Logger>) -> Self {
        let metrics = Arc::new(DispatchMetrics::default());
        let inner = Arc::new(Inner {
            queue: Mutex::new(VecDeque::new()),
            queue_cv: Condvar::new(),
            stopping: AtomicBool::new(false),
            workers: Mutex::new(Vec::new()),
            max_dispatchers: max_dispatchers.max(1),
            max_dispatch_time: Duration::from_millis(max_dispatch_time_ms.max(1)),
            in_flight_started_at: Mutex::new(None),
            in_flight_keys: Mutex::new(HashSet::new()),
            metrics,
            logger,
        });

        Self::spawn_worker(&inner);

        let watchdog_inner = inner.clone();
        let watchdog = thread::spawn(move || Self::watchdog_loop(watchdog_inner));

        Self {
            inner,
            watchdog: Mutex::new(Some(watchdog)),
        }
    }

    pub fn metrics(&self) -> Arc<DispatchMetrics> {
        self.inner.metrics.clone()
    }

    fn spawn_worker(inner: &Arc<Inner>) {
        let worker_inner = inner.clone();
        let handle = thread::spawn(move || Self::worker_loop(worker_inner));
        let id = handle.thread().id();
        inner.workers.lock().push((id, handle));
    }

    fn worker_loop(inner: Arc<Inner>) {
        loop {
            let picked: Option<(Option<OrderingKey>, Job)> = {
                let mut queue = inner.queue.lock();
                loop {
                    let eligible = {
                        let in_flight = inner.in_flight_keys.lock();
                        queue.iter().position(|queued| match queued.key {
                            Some(key) => !in_flight.contains(&key),
                            None => true,
                        })
                    };
                    if let Some(pos) = eligible {
                        let queued = queue.remove(pos).expect("position came from this queue");
                        break Some((queued.key, queued.job));
                    }
                    if inner.stopping.load(Ordering::SeqCst) && queue.is_empty() {
                        break None;
                    }
                    inner.queue_cv.wait(&mut queue);
                }
            };
            let Some((key, job)) = picked else {
                return;
            };
            if let Some(key) = key {
                inner.in_flight_keys.lock().insert(key);
            }
            *inner.in_flight_started_at.lock() = Some(Instant::now());
            job();
            *inner.in_flight_started_at.lock() = None;
            if let Some(key) = key {
                inner.in_flight_keys.lock().remove(&key);
            }
            inner.metrics.dispatched.fetch_add(1, Ordering::Relaxed);
            // Wake any worker parked because every queued job's key was in flight.
            inner.queue_cv.notify_all();
        }
    }

    fn watchdog_loop(inner: Arc<Inner>) {
        let poll_interval = (inner.max_dispatch_time / 4).max(Duration::from_millis(1));
        loop {
            thread::sleep(poll_interval);
            if inner.stopping.load(Ordering::SeqCst) {
                return;
            }
            let stuck = inner
                .in_flight_started_at
                .lock()
                .map(|started| started.elapsed() >= inner.max_dispatch_time)
                .unwrap_or(false);
            if !stuck {
                continue;
            }
            let workers = inner.workers.lock();
            if workers.len() >= inner.max_dispatchers {
                continue;
            }
            inner.logger.warn(
                "dispatcher",
                "handler exceeded max dispatch time, spawning extra worker",
                &[LogField::new("worker_count", workers.len() as u64 + 1)],
            );
            drop(workers);
            Self::spawn_worker(&inner);
            inner.metrics.escalations.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// `enqueue`: appends a job to the FIFO queue with no ordering key.
    /// Use [`Self::enqueue_for`] for jobs scoped to a (service, instance)
    /// pair so they never run concurrently with another job for the same
    /// key.
    pub fn enqueue<F>(&self, job: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.enqueue_for(None, job);
    }

    /// `enqueue_for(key, job)`: appends a job to the FIFO queue, tagged
    /// with an ordering key. Callers are responsible for pushing
    /// causally-ordered items (e.g. an availability change before a
    /// message for the same service) in the order they should be
    /// observed: push order within a key is preserved exactly, and a
    /// worker never picks up a job whose key another worker currently has
    /// in flight, so two same-keyed jobs never run concurrently even once
    /// the watchdog has escalated to more than one worker.
    pub fn enqueue_for<F>(&self, key: Option<OrderingKey>, job: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.inner.queue.lock().push_back(QueuedJob { key, job: Box::new(job) });
        self.inner.queue_cv.notify_one();
    }

    pub fn queue_len(&self) -> usize {
        self.inner.queue.lock().len()
    }

    pub fn worker_count(&self) -> usize {
        self.inner.workers.lock().len()
    }

    /// `stop()`: signals every worker to drain and exit, then joins
    /// them. If called from inside a worker thread (a handler that itself
    /// calls `stop()`), that worker's own handle is detached instead of
    /// joined, since a thread cannot join itself.
    pub fn stop(&self) {
        self.inner.stopping.store(true, Ordering::SeqCst);
        self.inner.queue_cv.notify_all();

        let caller = thread::current().id();
        let handles = std::mem::take(&mut *self.inner.workers.lock());
        for (id, handle) in handles {
            if id == caller {
                // Joining ourselves would deadlock; let the OS reclaim it.
                continue;
            }
            let _ = handle.join();
        }

        if let Some(watchdog) = self.watchdog.lock().take() {
            if watchdog.thread().id() != caller {
                let _ = watchdog.join();
            }
        }
    }
}

impl Drop for Dispatcher {
    fn drop(&mut self) {
        if !self.inner.stopping.load(Ordering::SeqCst) {
            self.stop();
        }
    }
}
