// Copyright 2015-2020 Eirene developers.
// This file is part of Eirene.

// Eirene is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.

// Eirene is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.

// You should have received a copy of the GNU General Public License
// along with Eirene.  If not, see <http://www.gnu.org/licenses/>.

//! Adaptive worker pool: a bounded, dynamically-sized pool of threads
//! draining a shared `crossbeam_channel` task queue, with atomic
//! counters for queue depth and worker activity and a background loop
//! that grows the pool under sustained pressure and retires workers
//! when idle.

use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender, TryRecvError};
use eirene_types::Error;
use parking_lot::Mutex;

type Task = Box<dyn FnOnce() + Send + 'static>;

struct Shared {
    queue_tx: Sender<Task>,
    queue_rx: Receiver<Task>,
    /// One token per worker asked to retire; workers observe it on
    /// their next queue-timeout tick and exit.
    retire_tx: Sender<()>,
    retire_rx: Receiver<()>,
    /// Workers ignore retire tokens once the pool is at this floor.
    worker_floor: usize,
    queued: AtomicUsize,
    active: AtomicUsize,
    workers: AtomicUsize,
    processed: AtomicU64,
    rejected: AtomicU64,
    high_water_mark: AtomicUsize,
    stopped: AtomicBool,
}

/// A pool of worker threads that grows toward `worker_max` under
/// sustained queue pressure and shrinks back toward `worker_min` when
/// idle, polled by a dedicated scaling thread.
pub struct WorkerPool {
    shared: Arc<Shared>,
    worker_min: usize,
    worker_max: usize,
    queue_size: usize,
    handles: Mutex<Vec<JoinHandle<()>>>,
    scaler: Mutex<Option<JoinHandle<()>>>,
}

const ADJUST_INTERVAL: Duration = Duration::from_millis(200);
/// Queue occupancy above which the pool grows, provided workers are busy.
const SCALE_UP_OCCUPANCY: f64 = 0.8;
/// Idle-worker fraction below which growth is allowed.
const SCALE_UP_MAX_IDLE: f64 = 0.1;
/// Queue occupancy below which idle workers may be retired.
const SCALE_DOWN_OCCUPANCY: f64 = 0.2;
/// Idle-worker fraction above which shrinking is allowed.
const SCALE_DOWN_MIN_IDLE: f64 = 0.3;

impl WorkerPool {
    pub fn new(worker_min: usize, worker_max: usize, queue_size: usize) -> Self {
        let worker_min = worker_min.max(1);
        let worker_max = worker_max.max(worker_min);
        let (queue_tx, queue_rx) = bounded(queue_size);
        let (retire_tx, retire_rx) = bounded(worker_max);
        let shared = Arc::new(Shared {
            queue_tx,
            queue_rx,
            retire_tx,
            retire_rx,
            worker_floor: worker_min,
            queued: AtomicUsize::new(0),
            active: AtomicUsize::new(0),
            workers: AtomicUsize::new(0),
            processed: AtomicU64::new(0),
            rejected: AtomicU64::new(0),
            high_water_mark: AtomicUsize::new(0),
            stopped: AtomicBool::new(false),
        });
        let pool = WorkerPool {
            shared,
            worker_min,
            worker_max,
            queue_size: queue_size.max(1),
            handles: Mutex::new(Vec::new()),
            scaler: Mutex::new(None),
        };
        for _ in 0..pool.worker_min {
            pool.spawn_worker();
        }
        pool
    }

    /// Starts the background scaling loop. Idempotent; a second call
    /// is a no-op while a scaler thread is already running.
    pub fn start(self: &Arc<Self>) {
        let mut guard = self.scaler.lock();
        if guard.is_some() {
            return;
        }
        let pool = Arc::clone(self);
        *guard = Some(thread::spawn(move || pool.scale_loop()));
    }

    fn scale_loop(&self) {
        while !self.shared.stopped.load(Ordering::Acquire) {
            thread::sleep(ADJUST_INTERVAL);
            if self.shared.stopped.load(Ordering::Acquire) {
                break;
            }
            let queued = self.shared.queued.load(Ordering::Acquire);
            let occupancy = queued as f64 / self.queue_size as f64;
            let workers = self.shared.workers.load(Ordering::Acquire).max(1);
            let active = self.shared.active.load(Ordering::Acquire).min(workers);
            let idle = (workers - active) as f64 / workers as f64;

            // A backlog deeper than the worker count is pressure even
            // when a generous queue keeps raw occupancy low.
            let pressured = occupancy > SCALE_UP_OCCUPANCY || queued > workers;
            if pressured && idle < SCALE_UP_MAX_IDLE {
                let target = ((workers as f64 * 1.5).ceil() as usize).min(self.worker_max);
                log::debug!(
                    target: "pool",
                    "scaling up {} -> {} (occupancy={:.2}, idle={:.2})",
                    workers, target, occupancy, idle
                );
                for _ in workers..target {
                    self.spawn_worker();
                }
            } else if occupancy < SCALE_DOWN_OCCUPANCY && idle > SCALE_DOWN_MIN_IDLE {
                let target = ((workers as f64 * 0.8).floor() as usize).max(self.worker_min);
                if target < workers {
                    log::debug!(
                        target: "pool",
                        "scaling down {} -> {} (occupancy={:.2}, idle={:.2})",
                        workers, target, occupancy, idle
                    );
                    for _ in target..workers {
                        let _ = self.shared.retire_tx.try_send(());
                    }
                }
            }
        }
    }

    fn spawn_worker(&self) {
        let shared = Arc::clone(&self.shared);
        shared.workers.fetch_add(1, Ordering::AcqRel);
        let handle = thread::spawn(move || {
            loop {
                if shared.workers.load(Ordering::Acquire) > shared.worker_floor
                    && shared.retire_rx.try_recv().is_ok()
                {
                    break;
                }
                match shared.queue_rx.recv_timeout(ADJUST_INTERVAL) {
                    Ok(task) => run_task(&shared, task),
                    Err(RecvTimeoutError::Timeout) => {
                        if shared.stopped.load(Ordering::Acquire) {
                            break;
                        }
                    }
                    Err(RecvTimeoutError::Disconnected) => break,
                }
            }
            // Accepted submissions must still be processed after stop:
            // drain whatever is left before exiting.
            if shared.stopped.load(Ordering::Acquire) {
                loop {
                    match shared.queue_rx.try_recv() {
                        Ok(task) => run_task(&shared, task),
                        Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => break,
                    }
                }
            }
            shared.workers.fetch_sub(1, Ordering::AcqRel);
        });
        self.handles.lock().push(handle);
    }

    /// Enqueues `task`, returning [`Error::QueueFull`] if the bounded
    /// queue is already at capacity.
    pub fn submit(&self, task: Task) -> Result<(), Error> {
        if self.shared.stopped.load(Ordering::Acquire) {
            return Err(Error::WorkerPoolStopped);
        }
        // Count before enqueueing so a fast worker's decrement can
        // never observe the counter at zero.
        let depth = self.shared.queued.fetch_add(1, Ordering::AcqRel) + 1;
        if self.shared.queue_tx.try_send(task).is_err() {
            self.shared.queued.fetch_sub(1, Ordering::AcqRel);
            self.shared.rejected.fetch_add(1, Ordering::AcqRel);
            return Err(Error::QueueFull);
        }
        self.shared.high_water_mark.fetch_max(depth, Ordering::AcqRel);
        Ok(())
    }

    /// Runs `f` on the pool and blocks for its result. A task that
    /// panics surfaces here as [`Error::InternalError`] rather than
    /// tearing down the worker.
    pub fn submit_and_wait<T, F>(&self, f: F) -> Result<T, Error>
    where
        T: Send + 'static,
        F: FnOnce() -> T + Send + 'static,
    {
        let (tx, rx) = crossbeam_channel::bounded(1);
        self.submit(Box::new(move || {
            let _ = tx.send(f());
        }))?;
        rx.recv()
            .map_err(|_| Error::InternalError("worker task panicked before replying".into()))
    }

    pub fn queue_depth(&self) -> usize {
        self.shared.queued.load(Ordering::Acquire)
    }

    pub fn worker_count(&self) -> usize {
        self.shared.workers.load(Ordering::Acquire)
    }

    pub fn active_count(&self) -> usize {
        self.shared.active.load(Ordering::Acquire)
    }

    /// Total tasks that have finished running (panicked tasks included).
    pub fn tasks_processed(&self) -> u64 {
        self.shared.processed.load(Ordering::Acquire)
    }

    /// Submissions turned away with [`Error::QueueFull`].
    pub fn tasks_rejected(&self) -> u64 {
        self.shared.rejected.load(Ordering::Acquire)
    }

    /// Deepest the queue has ever been.
    pub fn high_water_mark(&self) -> usize {
        self.shared.high_water_mark.load(Ordering::Acquire)
    }

    pub fn is_stopped(&self) -> bool {
        self.shared.stopped.load(Ordering::Acquire)
    }

    /// Stops accepting submissions, lets every accepted task run to
    /// completion, and joins all workers. Idempotent.
    pub fn stop(&self) {
        self.shared.stopped.store(true, Ordering::Release);
        let handles: Vec<_> = self.handles.lock().drain(..).collect();
        for handle in handles {
            let _ = handle.join();
        }
        if let Some(scaler) = self.scaler.lock().take() {
            let _ = scaler.join();
        }
    }
}

fn run_task(shared: &Shared, task: Task) {
    shared.queued.fetch_sub(1, Ordering::AcqRel);
    shared.active.fetch_add(1, Ordering::AcqRel);
    if panic::catch_unwind(AssertUnwindSafe(task)).is_err() {
        log::error!(target: "pool", "worker task panicked");
    }
    shared.active.fetch_sub(1, Ordering::AcqRel);
    shared.processed.fetch_add(1, Ordering::AcqRel);
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.shared.stopped.store(true, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize as TestCounter;
    use std::time::Duration as TestDuration;

    #[test]
    fn submitted_tasks_all_run() {
        let pool = WorkerPool::new(2, 4, 64);
        let counter = Arc::new(TestCounter::new(0));
        for _ in 0..50 {
            let c = Arc::clone(&counter);
            pool.submit(Box::new(move || {
                c.fetch_add(1, Ordering::AcqRel);
            }))
            .unwrap();
        }
        thread::sleep(TestDuration::from_millis(300));
        assert_eq!(counter.load(Ordering::Acquire), 50);
        pool.stop();
    }

    #[test]
    fn submit_and_wait_returns_the_computed_value() {
        let pool = WorkerPool::new(1, 2, 8);
        let result = pool.submit_and_wait(|| 21 * 2).unwrap();
        assert_eq!(result, 42);
        pool.stop();
    }

    #[test]
    fn a_panicking_task_surfaces_as_an_internal_error() {
        let pool = WorkerPool::new(1, 2, 8);
        let result: Result<(), Error> = pool.submit_and_wait(|| panic!("boom"));
        assert!(matches!(result, Err(Error::InternalError(_))));
        // The worker survives and keeps serving.
        assert_eq!(pool.submit_and_wait(|| 7).unwrap(), 7);
        pool.stop();
    }

    #[test]
    fn submit_rejects_once_the_queue_is_saturated() {
        let pool = WorkerPool::new(1, 1, 1);
        // Occupy the single worker with a blocking task, then fill the
        // one-slot queue, so the next submission observes QueueFull.
        let (blocker_tx, blocker_rx) = crossbeam_channel::bounded::<()>(0);
        pool.submit(Box::new(move || {
            let _ = blocker_rx.recv();
        }))
        .unwrap();
        thread::sleep(TestDuration::from_millis(50));
        pool.submit(Box::new(|| {})).unwrap();
        let result = pool.submit(Box::new(|| {}));
        assert!(matches!(result, Err(Error::QueueFull)));
        assert_eq!(pool.tasks_rejected(), 1);
        let _ = blocker_tx.send(());
        pool.stop();
    }

    #[test]
    fn stop_prevents_further_submissions() {
        let pool = WorkerPool::new(1, 2, 8);
        pool.stop();
        let result = pool.submit(Box::new(|| {}));
        assert!(matches!(result, Err(Error::WorkerPoolStopped)));
    }

    #[test]
    fn after_stop_processed_equals_enqueued_minus_rejected() {
        let pool = WorkerPool::new(2, 4, 16);
        let mut enqueued = 0u64;
        for _ in 0..100 {
            if pool
                .submit(Box::new(|| thread::sleep(TestDuration::from_millis(1))))
                .is_ok()
            {
                enqueued += 1;
            }
        }
        pool.stop();
        assert_eq!(pool.tasks_processed(), enqueued);
        assert_eq!(pool.worker_count(), 0);
        assert!(pool.high_water_mark() > 0);
    }

    #[test]
    fn sustained_slow_load_scales_the_pool_up_toward_its_max() {
        let pool = Arc::new(WorkerPool::new(2, 8, 1_000));
        pool.start();
        for _ in 0..500 {
            let _ = pool.submit(Box::new(|| {
                thread::sleep(TestDuration::from_millis(50));
            }));
        }
        // Three adjust intervals of sustained queue pressure: 2 -> 3 -> 5.
        thread::sleep(ADJUST_INTERVAL * 3 + TestDuration::from_millis(100));
        assert!(
            pool.worker_count() >= 5,
            "expected scale-up, got {} workers",
            pool.worker_count()
        );
        pool.stop();
    }

    #[test]
    fn an_idle_pool_shrinks_back_toward_its_floor() {
        let pool = Arc::new(WorkerPool::new(2, 8, 100));
        pool.start();
        for _ in 0..100 {
            let _ = pool.submit(Box::new(|| {
                thread::sleep(TestDuration::from_millis(20));
            }));
        }
        // Let the load drain completely, then give the scaler a few
        // idle intervals to retire the extra workers.
        thread::sleep(TestDuration::from_millis(2_500));
        assert!(
            pool.worker_count() <= 4,
            "expected scale-down, got {} workers",
            pool.worker_count()
        );
        pool.stop();
    }
}
