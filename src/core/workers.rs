//! Background pool for cache fills (cover prefetch, batch saves).
//!
//! Work-stealing deques: jobs land in a shared injector, each worker drains
//! its local deque first, then the injector, then steals from siblings.
//!
//! Jobs may be tagged with an epoch. The player bumps the epoch on every
//! track change, so prefetches queued for a track the user already skipped
//! are dropped when a worker picks them up.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use crossbeam::deque::{Injector, Stealer, Worker};
use log::{debug, trace, warn};

type Job = Box<dyn FnOnce() + Send + 'static>;

/// How long `Drop` waits for busy workers before detaching them
const SHUTDOWN_GRACE: Duration = Duration::from_millis(500);

/// Default pool size: three quarters of the cores, at least one
pub fn default_threads() -> usize {
    (num_cpus::get() * 3 / 4).max(1)
}

/// Work-stealing pool for background cache jobs (cover prefetch, batch saves).
///
/// Each worker drains its own deque first, then takes batches from the
/// global injector, then steals from siblings.
///
/// # Example
/// ```ignore
/// let workers = Workers::new(2, Arc::new(AtomicU64::new(0)));
///
/// // Skipped if the player moves on before it runs
/// let epoch = workers.current_epoch();
/// workers.execute_with_epoch(epoch, move || {
///     assets::fetch_cover(&cache, &info).ok();
/// });
/// ```
pub struct Workers {
    injector: Arc<Injector<Job>>,          // Global queue for submitted jobs
    handles: Vec<thread::JoinHandle<()>>,  // Joined (with a grace period) on drop
    epoch: Arc<AtomicU64>,                 // Bumped by the player on every track change
    shutdown: Arc<AtomicBool>,
}

impl Workers {
    /// Spawn `num_threads` workers sharing `epoch` with the owner.
    ///
    /// Recommended: [`default_threads`] for batch saves; the player keeps
    /// a small pool since it only prefetches artwork.
    ///
    /// # Arguments
    ///
    /// * `num_threads` - Number of worker threads (at least one is spawned)
    /// * `epoch` - Shared epoch counter for skipping stale jobs
    pub fn new(num_threads: usize, epoch: Arc<AtomicU64>) -> Self {
        let num_threads = num_threads.max(1);
        let injector: Arc<Injector<Job>> = Arc::new(Injector::new());
        let shutdown = Arc::new(AtomicBool::new(false));

        let locals: Vec<Worker<Job>> = (0..num_threads).map(|_| Worker::new_fifo()).collect();
        let stealers: Vec<Stealer<Job>> = locals.iter().map(Worker::stealer).collect();

        let mut handles = Vec::with_capacity(num_threads);
        for (worker_id, local) in locals.into_iter().enumerate() {
            let injector = Arc::clone(&injector);
            let shutdown = Arc::clone(&shutdown);
            let stealers = stealers.clone();

            let spawned = thread::Builder::new()
                .name(format!("tunehub-worker-{}", worker_id))
                .spawn(move || worker_loop(worker_id, local, &injector, &stealers, &shutdown));

            match spawned {
                Ok(handle) => handles.push(handle),
                Err(e) => warn!("Failed to spawn worker {}: {}", worker_id, e),
            }
        }

        debug!("Workers initialized: {} threads", handles.len());
        Self {
            injector,
            handles,
            epoch,
            shutdown,
        }
    }

    pub fn num_threads(&self) -> usize {
        self.handles.len()
    }

    pub fn execute<F>(&self, f: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.injector.push(Box::new(f));
    }

    pub fn current_epoch(&self) -> u64 {
        self.epoch.load(Ordering::Relaxed)
    }

    /// Invalidate every job queued under the current epoch
    pub fn bump_epoch(&self) -> u64 {
        self.epoch.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Run `f` only if the epoch is still `epoch` when a worker dequeues it
    pub fn execute_with_epoch<F>(&self, epoch: u64, f: F)
    where
        F: FnOnce() + Send + 'static,
    {
        let current = Arc::clone(&self.epoch);
        self.injector.push(Box::new(move || {
            if current.load(Ordering::Relaxed) == epoch {
                f();
            } else {
                trace!("Skipping stale job (epoch {})", epoch);
            }
        }));
    }
}

fn worker_loop(
    worker_id: usize,
    local: Worker<Job>,
    injector: &Injector<Job>,
    stealers: &[Stealer<Job>],
    shutdown: &AtomicBool,
) {
    trace!("Worker {} started", worker_id);
    loop {
        let job = local
            .pop()
            .or_else(|| injector.steal_batch_and_pop(&local).success())
            .or_else(|| stealers.iter().find_map(|s| s.steal().success()));

        match job {
            Some(job) => job(),
            None if shutdown.load(Ordering::Relaxed) => break,
            None => thread::sleep(Duration::from_millis(1)),
        }
    }
    trace!("Worker {} stopped", worker_id);
}

impl Drop for Workers {
    fn drop(&mut self) {
        self.shutdown.store(true, Ordering::SeqCst);
        let deadline = Instant::now() + SHUTDOWN_GRACE;

        for handle in std::mem::take(&mut self.handles) {
            while !handle.is_finished() {
                if Instant::now() >= deadline {
                    debug!("Workers shutdown timed out, detaching");
                    return;
                }
                thread::sleep(Duration::from_millis(1));
            }
            let _ = handle.join();
        }
        trace!("Workers stopped");
    }
}
