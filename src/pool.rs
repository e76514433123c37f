//! Bounded worker pool with one queue per worker.
//!
//! The reactor pushes tasks round-robin; each worker consumes exactly one
//! queue, so high dispatch throughput never contends on a global lock and
//! round-robin keeps per-request fairness. A push that finds its target
//! queue full fails, which the reactor translates into a 503.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};

use tracing::{debug, error};

use crate::queue::SharedQueue;

pub type Task = Box<dyn FnOnce() + Send + 'static>;

pub struct ThreadPool {
    queues: Vec<Arc<SharedQueue<Task>>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    next: AtomicUsize,
    executing: Arc<AtomicUsize>,
    stopped: AtomicBool,
}

impl ThreadPool {
    pub fn new(num_workers: usize, queue_capacity: usize) -> Self {
        let num_workers = num_workers.max(1);
        let queues = (0..num_workers)
            .map(|_| Arc::new(SharedQueue::new(queue_capacity)))
            .collect();
        Self {
            queues,
            workers: Mutex::new(Vec::new()),
            next: AtomicUsize::new(0),
            executing: Arc::new(AtomicUsize::new(0)),
            stopped: AtomicBool::new(false),
        }
    }

    pub fn start(&self) -> std::io::Result<()> {
        let mut workers = self.workers.lock().unwrap();
        for (i, queue) in self.queues.iter().enumerate() {
            let queue = Arc::clone(queue);
            let executing = Arc::clone(&self.executing);
            let handle = thread::Builder::new()
                .name(format!("minuet-worker-{i}"))
                .spawn(move || worker_loop(i, &queue, &executing))?;
            workers.push(handle);
        }
        debug!("thread pool started with {} workers", self.queues.len());
        Ok(())
    }

    /// Round-robin dispatch. Returns the task on overflow so the caller
    /// can shed load.
    pub fn dispatch(&self, task: Task) -> Result<(), Task> {
        let idx = self.next.fetch_add(1, Ordering::Relaxed) % self.queues.len();
        self.queues[idx].push(task)
    }

    /// Tasks queued but not yet picked up, summed across worker queues.
    pub fn pending_tasks(&self) -> usize {
        self.queues.iter().map(|q| q.len()).sum()
    }

    /// Queued plus currently executing tasks; zero means every accepted
    /// request has produced its response.
    pub fn in_flight(&self) -> usize {
        self.pending_tasks() + self.executing.load(Ordering::Acquire)
    }

    pub fn size(&self) -> usize {
        self.queues.len()
    }

    /// Stop all queues and join the workers. Idempotent.
    pub fn stop(&self) {
        if self.stopped.swap(true, Ordering::AcqRel) {
            return;
        }
        for queue in &self.queues {
            queue.stop();
        }
        let mut workers = self.workers.lock().unwrap();
        for handle in workers.drain(..) {
            let _ = handle.join();
        }
        debug!("thread pool stopped");
    }
}

impl Drop for ThreadPool {
    fn drop(&mut self) {
        self.stop();
    }
}

fn worker_loop(id: usize, queue: &SharedQueue<Task>, executing: &AtomicUsize) {
    debug!("worker {id} started");
    while let Some(task) = queue.wait_and_pop() {
        executing.fetch_add(1, Ordering::AcqRel);
        if catch_unwind(AssertUnwindSafe(task)).is_err() {
            error!("panic caught in worker {id}");
        }
        executing.fetch_sub(1, Ordering::AcqRel);
    }
    debug!("worker {id} finished");
}
