// SPDX-FileCopyrightText: Copyright © 2024-2025 Quarry Developers
//
// SPDX-License-Identifier: MPL-2.0

//! Cooperative work-stealing scheduler.
//!
//! A fixed pool of worker threads services per-worker bounded queues. Tasks
//! are grouped under a [`TaskCount`]; a caller that [`Scheduler::wait`]s on a
//! count becomes a helper and steals queued tasks instead of blocking, so
//! nested fan-out from inside a task cannot starve the pool. If every worker
//! ends up waiting while work remains queued, a temporary relief thread is
//! spawned to drain it.

use std::collections::VecDeque;
use std::io;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};
use std::time::Duration;

type Task = Box<dyn FnOnce() + Send + 'static>;

/// Counter shared between a parent and the tasks it enqueued.
///
/// Incremented on enqueue, decremented when a task finishes. A parent joins
/// on its children by waiting for the counter to drain to zero.
#[derive(Debug, Clone, Default)]
pub struct TaskCount(Arc<CountInner>);

#[derive(Debug, Default)]
struct CountInner {
    n: AtomicUsize,
    lock: Mutex<()>,
    cond: Condvar,
}

impl TaskCount {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self) -> usize {
        self.0.n.load(Ordering::Acquire)
    }

    fn increment(&self) {
        self.0.n.fetch_add(1, Ordering::AcqRel);
    }

    fn decrement(&self) {
        if self.0.n.fetch_sub(1, Ordering::AcqRel) == 1 {
            let _guard = lock(&self.0.lock);
            self.0.cond.notify_all();
        }
    }

    fn park(&self, timeout: Duration) {
        let guard = lock(&self.0.lock);
        if self.get() != 0 {
            let _ = self
                .0
                .cond
                .wait_timeout(guard, timeout)
                .unwrap_or_else(|e| e.into_inner());
        }
    }
}

/// Final scheduler statistics returned by [`Scheduler::shutdown`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Stats {
    /// Configured number of runnable threads.
    pub max_active: usize,
    /// Relief threads spawned over the scheduler's lifetime.
    pub helpers: u64,
    /// Tasks executed inline because every queue was full.
    pub queue_full: u64,
    /// Calls to `wait` that found the count still above zero.
    pub waits: u64,
}

struct Shared {
    queues: Vec<Mutex<VecDeque<Task>>>,
    depth: usize,
    max_active: usize,
    /// Tasks enqueued or currently running.
    outstanding: AtomicUsize,
    /// Workers currently executing a task.
    active: AtomicUsize,
    /// Live relief threads.
    relief: AtomicUsize,
    shutdown: AtomicBool,
    work_lock: Mutex<()>,
    work_cond: Condvar,
    idle_lock: Mutex<()>,
    idle_cond: Condvar,
    next: AtomicUsize,
    stat_helpers: AtomicU64,
    stat_queue_full: AtomicU64,
    stat_waits: AtomicU64,
}

/// The scheduler. One per build context.
pub struct Scheduler {
    shared: Arc<Shared>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl Scheduler {
    /// Create a scheduler with `max_active` runnable threads and the default
    /// queue depth derived from it.
    pub fn new(max_active: usize) -> io::Result<Self> {
        Self::with_depth(max_active, max_active.max(1) * 8)
    }

    /// Create a scheduler with an explicit per-worker queue depth.
    pub fn with_depth(max_active: usize, depth: usize) -> io::Result<Self> {
        let max_active = max_active.max(1);
        let shared = Arc::new(Shared {
            queues: (0..max_active).map(|_| Mutex::new(VecDeque::new())).collect(),
            depth: depth.max(1),
            max_active,
            outstanding: AtomicUsize::new(0),
            active: AtomicUsize::new(0),
            relief: AtomicUsize::new(0),
            shutdown: AtomicBool::new(false),
            work_lock: Mutex::new(()),
            work_cond: Condvar::new(),
            idle_lock: Mutex::new(()),
            idle_cond: Condvar::new(),
            next: AtomicUsize::new(0),
            stat_helpers: AtomicU64::new(0),
            stat_queue_full: AtomicU64::new(0),
            stat_waits: AtomicU64::new(0),
        });

        let mut workers = Vec::with_capacity(max_active);
        for i in 0..max_active {
            let shared = Arc::clone(&shared);
            let handle = thread::Builder::new()
                .name(format!("sched-{i}"))
                .spawn(move || worker(&shared, i))?;
            workers.push(handle);
        }

        Ok(Self {
            shared,
            workers: Mutex::new(workers),
        })
    }

    pub fn max_active(&self) -> usize {
        self.shared.max_active
    }

    /// Enqueue a task under `count`.
    ///
    /// The count is incremented before the task is visible to any worker and
    /// decremented once it returns. When every queue is at capacity the task
    /// is executed inline on the calling thread.
    pub fn spawn(&self, count: &TaskCount, f: impl FnOnce() + Send + 'static) {
        count.increment();
        self.shared.outstanding.fetch_add(1, Ordering::AcqRel);

        let task = {
            let count = count.clone();
            let shared = Arc::clone(&self.shared);
            Box::new(move || {
                f();
                count.decrement();
                if shared.outstanding.fetch_sub(1, Ordering::AcqRel) == 1 {
                    let _guard = lock(&shared.idle_lock);
                    shared.idle_cond.notify_all();
                }
            }) as Task
        };

        let n = self.shared.queues.len();
        let start = self.shared.next.fetch_add(1, Ordering::Relaxed);
        for i in 0..n {
            let mut queue = lock(&self.shared.queues[(start + i) % n]);
            if queue.len() < self.shared.depth {
                queue.push_back(task);
                drop(queue);
                let _guard = lock(&self.shared.work_lock);
                self.shared.work_cond.notify_one();
                return;
            }
        }

        // Every queue is full; run on the caller's stack.
        self.shared.stat_queue_full.fetch_add(1, Ordering::Relaxed);
        task();
    }

    /// Block until `count` drains to zero, stealing and executing queued
    /// tasks in the meantime.
    pub fn wait(&self, count: &TaskCount) {
        if count.get() == 0 {
            return;
        }

        self.shared.stat_waits.fetch_add(1, Ordering::Relaxed);

        while count.get() != 0 {
            if let Some(task) = self.shared.pop(0) {
                self.shared.run(task);
                continue;
            }

            self.shared.maybe_relieve();
            count.park(Duration::from_millis(1));
        }
    }

    /// Block until no task is enqueued or running.
    pub fn drain(&self) {
        while self.shared.outstanding.load(Ordering::Acquire) != 0 {
            if let Some(task) = self.shared.pop(0) {
                self.shared.run(task);
                continue;
            }

            let guard = lock(&self.shared.idle_lock);
            if self.shared.outstanding.load(Ordering::Acquire) != 0 {
                let _ = self
                    .shared
                    .idle_cond
                    .wait_timeout(guard, Duration::from_millis(1))
                    .unwrap_or_else(|e| e.into_inner());
            }
        }
    }

    /// Drain outstanding work, join all threads and report statistics.
    pub fn shutdown(self) -> Stats {
        self.drain();
        self.shared.shutdown.store(true, Ordering::Release);
        {
            let _guard = lock(&self.shared.work_lock);
            self.shared.work_cond.notify_all();
        }

        let workers = std::mem::take(&mut *lock(&self.workers));
        for handle in workers {
            let _ = handle.join();
        }

        Stats {
            max_active: self.shared.max_active,
            helpers: self.shared.stat_helpers.load(Ordering::Relaxed),
            queue_full: self.shared.stat_queue_full.load(Ordering::Relaxed),
            waits: self.shared.stat_waits.load(Ordering::Relaxed),
        }
    }
}

impl Shared {
    /// Pop from the preferred queue, stealing from the back of the others.
    fn pop(&self, preferred: usize) -> Option<Task> {
        let n = self.queues.len();
        if let Some(task) = lock(&self.queues[preferred % n]).pop_front() {
            return Some(task);
        }
        for i in 1..n {
            if let Some(task) = lock(&self.queues[(preferred + i) % n]).pop_back() {
                return Some(task);
            }
        }
        None
    }

    fn run(&self, task: Task) {
        self.active.fetch_add(1, Ordering::AcqRel);
        task();
        self.active.fetch_sub(1, Ordering::AcqRel);
    }

    fn queued(&self) -> bool {
        self.queues.iter().any(|q| !lock(q).is_empty())
    }

    /// Starvation relief: if work is queued but every worker is blocked in
    /// `wait`, spin up a temporary thread to drain it.
    fn maybe_relieve(self: &Arc<Self>) {
        if !self.queued()
            || self.active.load(Ordering::Acquire) != 0
            || self.relief.load(Ordering::Acquire) >= self.max_active
        {
            return;
        }

        self.relief.fetch_add(1, Ordering::AcqRel);
        self.stat_helpers.fetch_add(1, Ordering::Relaxed);

        let shared = Arc::clone(self);
        let spawned = thread::Builder::new().name("sched-relief".into()).spawn(move || {
            while let Some(task) = shared.pop(0) {
                shared.run(task);
            }
            shared.relief.fetch_sub(1, Ordering::AcqRel);
        });

        if spawned.is_err() {
            // Could not get a thread; the parked waiter will retry.
            self.relief.fetch_sub(1, Ordering::AcqRel);
            tracing::warn!("failed to spawn relief thread");
        }
    }
}

fn worker(shared: &Arc<Shared>, index: usize) {
    loop {
        if let Some(task) = shared.pop(index) {
            shared.run(task);
            continue;
        }

        if shared.shutdown.load(Ordering::Acquire) {
            break;
        }

        let guard = lock(&shared.work_lock);
        if !shared.queued() && !shared.shutdown.load(Ordering::Acquire) {
            let _ = shared
                .work_cond
                .wait_timeout(guard, Duration::from_millis(10))
                .unwrap_or_else(|e| e.into_inner());
        }
    }
}

/// Lock recovering from poisoning; a panicking task must not wedge the pool.
fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}
