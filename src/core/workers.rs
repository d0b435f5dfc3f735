//! Background thread pool for device transfers.
//!
//! The control flow (player, overlay, session) is single-threaded; hardware
//! I/O is the only work that runs here. Jobs go through an unbounded
//! crossbeam channel shared by all workers, so a transfer stuck on one
//! thread does not starve the others.
//!
//! Shutdown: dropping the pool closes the channel, workers finish their
//! current job and exit. Drop waits a bounded time and then detaches.

use crossbeam_channel::{Receiver, Sender, unbounded};
use log::{trace, warn};
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;
use std::time::{Duration, Instant};

type Job = Box<dyn FnOnce() + Send + 'static>;

/// How long Drop waits for workers before detaching them
const SHUTDOWN_GRACE: Duration = Duration::from_millis(500);

/// Replacement threads allowed per initial worker
const REPLACEMENT_FACTOR: usize = 4;

pub struct Workers {
    sender: Option<Sender<Job>>,
    receiver: Receiver<Job>,
    handles: Mutex<Vec<thread::JoinHandle<()>>>,
    next_id: AtomicUsize,
    max_threads: usize,
}

impl Workers {
    /// Spawn `num_threads` workers (at least one).
    pub fn new(num_threads: usize) -> Self {
        let num_threads = num_threads.max(1);
        let (sender, receiver) = unbounded::<Job>();

        let workers = Self {
            sender: Some(sender),
            receiver,
            handles: Mutex::new(Vec::with_capacity(num_threads)),
            next_id: AtomicUsize::new(0),
            max_threads: num_threads * REPLACEMENT_FACTOR,
        };
        for _ in 0..num_threads {
            workers.spawn_worker();
        }
        trace!("Workers initialized: {} threads", workers.num_threads());
        workers
    }

    fn spawn_worker(&self) -> bool {
        let worker_id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let receiver = self.receiver.clone();
        let spawned = thread::Builder::new()
            .name(format!("panelcast-xfer-{}", worker_id))
            .spawn(move || {
                trace!("Worker {} started", worker_id);
                for job in receiver.iter() {
                    job();
                }
                trace!("Worker {} stopped", worker_id);
            });
        match spawned {
            Ok(handle) => {
                self.lock_handles().push(handle);
                true
            }
            Err(e) => {
                warn!("Failed to spawn transfer worker {}: {}", worker_id, e);
                false
            }
        }
    }

    fn lock_handles(&self) -> std::sync::MutexGuard<'_, Vec<thread::JoinHandle<()>>> {
        self.handles.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Add a thread in place of one blocked on an abandoned job.
    ///
    /// Finished threads are pruned first. Returns false once the pool is at
    /// its thread limit, in which case queued jobs wait for a blocked worker.
    pub fn replace_stuck(&self) -> bool {
        let live = {
            let mut handles = self.lock_handles();
            handles.retain(|h| !h.is_finished());
            handles.len()
        };
        if live >= self.max_threads {
            warn!(
                "All {} transfer workers blocked, new transfers will queue",
                live
            );
            return false;
        }
        self.spawn_worker()
    }

    /// Run closure on a worker thread. Returns false if no worker can take it.
    pub fn execute<F>(&self, f: F) -> bool
    where
        F: FnOnce() + Send + 'static,
    {
        if self.lock_handles().is_empty() {
            return false;
        }
        match &self.sender {
            Some(sender) => sender.send(Box::new(f)).is_ok(),
            None => false,
        }
    }

    pub fn num_threads(&self) -> usize {
        self.lock_handles().len()
    }
}

impl Drop for Workers {
    fn drop(&mut self) {
        // Closing the channel ends each worker's receive loop
        self.sender.take();

        let deadline = Instant::now() + SHUTDOWN_GRACE;
        let handles = std::mem::take(self.handles.get_mut().unwrap_or_else(|e| e.into_inner()));
        for handle in handles {
            while !handle.is_finished() {
                if Instant::now() >= deadline {
                    trace!("Worker shutdown timeout reached, detaching");
                    return;
                }
                thread::sleep(Duration::from_millis(1));
            }
            let _ = handle.join();
        }
    }
}
