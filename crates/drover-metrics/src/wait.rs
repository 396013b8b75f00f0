//! Wait-time estimation.
//!
//! Estimates how long a job pushed onto a queue right now would wait
//! before a worker picks it up, from the backlog, the observed runtime,
//! and how many processes the supervisors on this host have assigned to
//! that queue.

use std::collections::BTreeMap;
use std::sync::Arc;

use drover_state::StateStore;

use crate::sources::{JobMetrics, QueueBacklog};

/// Estimates time-to-clear per queue key (`connection:queue`).
pub struct WaitTimeCalculator {
    store: StateStore,
    backlog: Arc<dyn QueueBacklog>,
    metrics: Arc<dyn JobMetrics>,
}

impl WaitTimeCalculator {
    pub fn new(
        store: StateStore,
        backlog: Arc<dyn QueueBacklog>,
        metrics: Arc<dyn JobMetrics>,
    ) -> Self {
        Self {
            store,
            backlog,
            metrics,
        }
    }

    /// Estimated wait in milliseconds for every queue key assigned to any
    /// supervisor on this host, sorted by estimate descending.
    pub fn calculate(&self) -> anyhow::Result<Vec<(String, f64)>> {
        let mut estimates: Vec<(String, f64)> = self
            .assigned_processes()?
            .into_iter()
            .map(|(key, total)| {
                let estimate = self.estimate_for(&key, total);
                (key, estimate)
            })
            .collect();
        estimates.sort_by(|a, b| b.1.total_cmp(&a.1));
        Ok(estimates)
    }

    /// Estimated wait in milliseconds for one queue key.
    pub fn calculate_for(&self, key: &str) -> anyhow::Result<f64> {
        let total = self.assigned_processes()?.remove(key).unwrap_or(0);
        Ok(self.estimate_for(key, total))
    }

    /// Pool key → total processes assigned across all supervisor records.
    fn assigned_processes(&self) -> anyhow::Result<BTreeMap<String, u32>> {
        let mut totals: BTreeMap<String, u32> = BTreeMap::new();
        for record in self.store.list_supervisors()? {
            for (key, count) in &record.processes {
                *totals.entry(key.clone()).or_insert(0) += count;
            }
        }
        Ok(totals)
    }

    /// `Σ size_q × runtime_q / total_processes` over the key's queues.
    ///
    /// A key with no assigned processes is treated as having one, so an
    /// orphaned backlog still yields a finite estimate.
    fn estimate_for(&self, key: &str, total_processes: u32) -> f64 {
        let (connection, queues) = match key.split_once(':') {
            Some(parts) => parts,
            None => return 0.0,
        };
        let divisor = total_processes.max(1) as f64;

        queues
            .split(',')
            .map(|queue| {
                let size = self
                    .backlog
                    .ready_jobs(connection, queue)
                    .unwrap_or(0);
                if size == 0 {
                    0.0
                } else {
                    size as f64 * self.metrics.runtime_for_queue(queue) / divisor
                }
            })
            .sum()
    }
}
