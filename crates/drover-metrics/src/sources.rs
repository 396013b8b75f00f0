//! Load-signal sources.
//!
//! `QueueBacklog` answers "how many jobs are ready on this queue";
//! `JobMetrics` answers "how long does a job on this queue take".
//! Deployments wire their queue backend behind these traits; the crate
//! ships an in-memory runtime window and two backlog implementations used
//! for tests and for hosts with no backlog source configured.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

/// Ready-job counts per queue, as reported by the queue backend.
pub trait QueueBacklog: Send + Sync {
    fn ready_jobs(&self, connection: &str, queue: &str) -> anyhow::Result<u64>;
}

/// Average job runtime per queue, in milliseconds.
pub trait JobMetrics: Send + Sync {
    fn runtime_for_queue(&self, queue: &str) -> f64;
}

/// Backlog source reporting zero depth everywhere.
///
/// Used when no queue backend is wired in; the autoscaler then holds every
/// pool at its floor.
#[derive(Debug, Default)]
pub struct NullBacklog;

impl QueueBacklog for NullBacklog {
    fn ready_jobs(&self, _connection: &str, _queue: &str) -> anyhow::Result<u64> {
        Ok(0)
    }
}

/// Fixed per-queue depths, keyed `connection:queue`.
#[derive(Debug, Default)]
pub struct StaticBacklog {
    depths: HashMap<String, u64>,
}

impl StaticBacklog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, connection: &str, queue: &str, depth: u64) {
        self.depths.insert(format!("{connection}:{queue}"), depth);
    }
}

impl QueueBacklog for StaticBacklog {
    fn ready_jobs(&self, connection: &str, queue: &str) -> anyhow::Result<u64> {
        Ok(self
            .depths
            .get(&format!("{connection}:{queue}"))
            .copied()
            .unwrap_or(0))
    }
}

/// Rolling window of observed job runtimes per queue.
///
/// Bounded to `window` samples per queue; recording past the bound evicts
/// the oldest sample. The average over the window is the `JobMetrics`
/// answer. Queues with no samples report 0.
pub struct RuntimeWindow {
    window: usize,
    samples: Mutex<HashMap<String, VecDeque<f64>>>,
}

impl RuntimeWindow {
    pub fn new(window: usize) -> Self {
        Self {
            window: window.max(1),
            samples: Mutex::new(HashMap::new()),
        }
    }

    /// Record one completed job's runtime in milliseconds.
    pub fn record(&self, queue: &str, runtime_ms: f64) {
        let mut samples = self.samples.lock().unwrap_or_else(|e| e.into_inner());
        let entry = samples.entry(queue.to_string()).or_default();
        entry.push_back(runtime_ms);
        while entry.len() > self.window {
            entry.pop_front();
        }
    }

    /// Number of samples currently held for a queue.
    pub fn sample_count(&self, queue: &str) -> usize {
        let samples = self.samples.lock().unwrap_or_else(|e| e.into_inner());
        samples.get(queue).map(VecDeque::len).unwrap_or(0)
    }
}

impl JobMetrics for RuntimeWindow {
    fn runtime_for_queue(&self, queue: &str) -> f64 {
        let samples = self.samples.lock().unwrap_or_else(|e| e.into_inner());
        match samples.get(queue) {
            Some(entry) if !entry.is_empty() => {
                entry.iter().sum::<f64>() / entry.len() as f64
            }
            _ => 0.0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn null_backlog_reports_zero() {
        let backlog = NullBacklog;
        assert_eq!(backlog.ready_jobs("redis", "default").unwrap(), 0);
    }

    #[test]
    fn static_backlog_keys_by_connection_and_queue() {
        let mut backlog = StaticBacklog::new();
        backlog.set("redis", "high", 20);
        backlog.set("redis", "low", 10);

        assert_eq!(backlog.ready_jobs("redis", "high").unwrap(), 20);
        assert_eq!(backlog.ready_jobs("redis", "low").unwrap(), 10);
        assert_eq!(backlog.ready_jobs("redis", "other").unwrap(), 0);
        assert_eq!(backlog.ready_jobs("sqs", "high").unwrap(), 0);
    }

    #[test]
    fn runtime_window_averages_samples() {
        let window = RuntimeWindow::new(10);
        window.record("default", 100.0);
        window.record("default", 200.0);
        window.record("default", 300.0);

        assert_eq!(window.runtime_for_queue("default"), 200.0);
    }

    #[test]
    fn runtime_window_unknown_queue_is_zero() {
        let window = RuntimeWindow::new(10);
        assert_eq!(window.runtime_for_queue("nope"), 0.0);
    }

    #[test]
    fn runtime_window_trims_to_bound() {
        let window = RuntimeWindow::new(3);
        for runtime in [10.0, 20.0, 30.0, 40.0, 50.0] {
            window.record("default", runtime);
        }

        assert_eq!(window.sample_count("default"), 3);
        // Only 30, 40, 50 remain.
        assert_eq!(window.runtime_for_queue("default"), 40.0);
    }

    #[test]
    fn runtime_window_isolates_queues() {
        let window = RuntimeWindow::new(5);
        window.record("high", 1000.0);
        window.record("low", 10.0);

        assert_eq!(window.runtime_for_queue("high"), 1000.0);
        assert_eq!(window.runtime_for_queue("low"), 10.0);
    }
}
