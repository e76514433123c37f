//! Shared runtime metrics.
//!
//! One `Metrics` instance is shared by every shard. Counters are relaxed
//! atomics; the list of registered worker pools sits behind a mutex and is
//! only touched at startup and when a snapshot is rendered.

use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use chrono::Local;
use serde::Serialize;

use crate::pool::ThreadPool;
use crate::util;

/// The JSON shape served by `/metrics`.
#[derive(Debug, Serialize)]
struct Snapshot<'a> {
    pod_name: &'a str,
    start_time: &'a str,
    total_requests: u64,
    average_processing_time_seconds: f64,
    current_connections: i64,
    current_active_threads: i64,
    pending_tasks: usize,
    thread_pool_size: usize,
    total_ram_kb: u64,
    memory_usage_kb: u64,
    memory_usage_percentage: f64,
}

pub struct Metrics {
    pod_name: String,
    start_time: String,
    pool_size: usize,
    total_ram_kb: u64,

    total_requests: AtomicU64,
    total_processing_time_us: AtomicU64,
    connections: AtomicI64,
    active_threads: AtomicI64,

    pools: Mutex<Vec<Arc<ThreadPool>>>,
}

impl Metrics {
    pub fn new(pod_name: String, pool_size: usize) -> Self {
        Self {
            pod_name,
            // Local time honors TZ for operator-facing start stamps.
            start_time: Local::now().format("%Y-%m-%dT%H:%M:%S").to_string(),
            pool_size,
            total_ram_kb: util::total_memory_kb(),
            total_requests: AtomicU64::new(0),
            total_processing_time_us: AtomicU64::new(0),
            connections: AtomicI64::new(0),
            active_threads: AtomicI64::new(0),
            pools: Mutex::new(Vec::new()),
        }
    }

    pub fn increment_connections(&self) {
        self.connections.fetch_add(1, Ordering::Relaxed);
    }

    pub fn decrement_connections(&self) {
        self.connections.fetch_sub(1, Ordering::Relaxed);
    }

    pub fn increment_active_threads(&self) {
        self.active_threads.fetch_add(1, Ordering::Relaxed);
    }

    pub fn decrement_active_threads(&self) {
        self.active_threads.fetch_sub(1, Ordering::Relaxed);
    }

    pub fn record_request_time(&self, micros: u64) {
        self.total_requests.fetch_add(1, Ordering::Relaxed);
        self.total_processing_time_us.fetch_add(micros, Ordering::Relaxed);
    }

    pub fn register_pool(&self, pool: Arc<ThreadPool>) {
        self.pools.lock().unwrap().push(pool);
    }

    pub fn connections(&self) -> i64 {
        self.connections.load(Ordering::Relaxed)
    }

    pub fn total_requests(&self) -> u64 {
        self.total_requests.load(Ordering::Relaxed)
    }

    pub fn pod_name(&self) -> &str {
        &self.pod_name
    }

    fn pending_tasks(&self) -> usize {
        self.pools
            .lock()
            .unwrap()
            .iter()
            .map(|p| p.pending_tasks())
            .sum()
    }

    pub fn to_json(&self) -> String {
        let total_requests = self.total_requests.load(Ordering::Relaxed);
        let total_time_us = self.total_processing_time_us.load(Ordering::Relaxed);
        let avg_seconds = if total_requests > 0 {
            total_time_us as f64 / total_requests as f64 / 1_000_000.0
        } else {
            0.0
        };
        let memory_usage_kb = util::memory_usage_kb();
        let memory_usage_percentage = if self.total_ram_kb > 0 {
            memory_usage_kb as f64 / self.total_ram_kb as f64 * 100.0
        } else {
            0.0
        };

        let snapshot = Snapshot {
            pod_name: &self.pod_name,
            start_time: &self.start_time,
            total_requests,
            average_processing_time_seconds: avg_seconds,
            current_connections: self.connections.load(Ordering::Relaxed),
            current_active_threads: self.active_threads.load(Ordering::Relaxed),
            pending_tasks: self.pending_tasks(),
            thread_pool_size: self.pool_size,
            total_ram_kb: self.total_ram_kb,
            memory_usage_kb,
            memory_usage_percentage: (memory_usage_percentage * 100.0).round() / 100.0,
        };
        serde_json::to_string(&snapshot).unwrap_or_else(|_| "{}".to_string())
    }

    pub fn to_prometheus(&self) -> String {
        let total_requests = self.total_requests.load(Ordering::Relaxed);
        let total_time_us = self.total_processing_time_us.load(Ordering::Relaxed);
        format!(
            "# HELP minuet_requests_total Requests dispatched to handlers.\n\
             # TYPE minuet_requests_total counter\n\
             minuet_requests_total {}\n\
             # HELP minuet_processing_seconds_total Cumulative handler time.\n\
             # TYPE minuet_processing_seconds_total counter\n\
             minuet_processing_seconds_total {:.6}\n\
             # HELP minuet_connections Current open connections.\n\
             # TYPE minuet_connections gauge\n\
             minuet_connections {}\n\
             # HELP minuet_active_threads Workers executing a handler.\n\
             # TYPE minuet_active_threads gauge\n\
             minuet_active_threads {}\n\
             # HELP minuet_pending_tasks Tasks queued across worker pools.\n\
             # TYPE minuet_pending_tasks gauge\n\
             minuet_pending_tasks {}\n\
             # HELP minuet_pool_size Configured worker pool size.\n\
             # TYPE minuet_pool_size gauge\n\
             minuet_pool_size {}\n\
             # HELP minuet_memory_usage_kb Resident set size.\n\
             # TYPE minuet_memory_usage_kb gauge\n\
             minuet_memory_usage_kb {}\n",
            total_requests,
            total_time_us as f64 / 1_000_000.0,
            self.connections.load(Ordering::Relaxed),
            self.active_threads.load(Ordering::Relaxed),
            self.pending_tasks(),
            self.pool_size,
            util::memory_usage_kb(),
        )
    }
}
