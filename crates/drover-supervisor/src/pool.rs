//! ProcessPool — the worker set dedicated to one queue key.
//!
//! A pool converges its worker count toward whatever target it was last
//! given. Scaling down never kills outright: excess workers are signaled
//! to finish and parked in a terminating set with a deadline, after which
//! they are hard-stopped. Terminating workers do not count toward the
//! pool's process count.

use tracing::{debug, info};

use drover_state::SupervisorOptions;

use crate::process::{MonitorOutcome, WorkerProcess};

/// A worker that was asked to exit gracefully.
struct TerminatingWorker {
    worker: WorkerProcess,
    /// Epoch second after which the worker is hard-stopped.
    deadline: u64,
}

/// The worker processes assigned to one queue key.
pub struct ProcessPool {
    /// `connection:queue` key this pool drains.
    key: String,
    /// Comma-joined queue string passed to workers.
    queue: String,
    /// Worker binary to spawn.
    program: String,
    options: SupervisorOptions,
    workers: Vec<WorkerProcess>,
    terminating: Vec<TerminatingWorker>,
    working: bool,
}

impl ProcessPool {
    pub fn new(program: &str, options: SupervisorOptions, queue: String) -> Self {
        let key = options.pool_key(&queue);
        Self {
            key,
            queue,
            program: program.to_string(),
            options,
            workers: Vec::new(),
            terminating: Vec::new(),
            working: true,
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    /// The queue string this pool's workers drain.
    pub fn queue(&self) -> &str {
        &self.queue
    }

    pub fn working(&self) -> bool {
        self.working
    }

    /// Current worker count, excluding terminating workers.
    pub fn total_process_count(&self) -> u32 {
        self.workers.len() as u32
    }

    /// Workers currently draining out toward termination.
    pub fn terminating_process_count(&self) -> usize {
        self.terminating.len()
    }

    fn configured_worker(&self) -> WorkerProcess {
        WorkerProcess::new(
            &self.program,
            self.options.worker_args(&self.queue),
            self.options.nice,
        )
    }

    /// Converge the worker count toward `target`.
    ///
    /// New workers are added unstarted and launched by the next `monitor`
    /// pass; excess workers move to the terminating set with a deadline of
    /// `now + timeout`.
    pub fn scale(&mut self, target: u32, now: u64) {
        let current = self.total_process_count();
        if target == current {
            return;
        }

        info!(pool = %self.key, from = current, to = target, "scaling pool");
        if target > current {
            for _ in current..target {
                self.workers.push(self.configured_worker());
            }
        } else {
            let deadline = now + self.options.timeout;
            for _ in target..current {
                if let Some(mut worker) = self.workers.pop() {
                    worker.terminate();
                    self.terminating.push(TerminatingWorker { worker, deadline });
                }
            }
        }
    }

    /// One reconciliation pass: launch/relaunch workers (only while
    /// working) and reap the terminating set.
    pub fn monitor(&mut self, now: u64) -> Vec<MonitorOutcome> {
        let mut outcomes = Vec::new();
        if self.working {
            for worker in &mut self.workers {
                outcomes.push(worker.monitor(now));
            }
        }
        self.reap_terminating(now);
        outcomes
    }

    /// Drop terminating workers that exited; hard-stop those past their
    /// deadline.
    pub fn reap_terminating(&mut self, now: u64) {
        let key = self.key.clone();
        self.terminating.retain_mut(|entry| {
            if !entry.worker.running() {
                debug!(pool = %key, "terminating worker exited");
                return false;
            }
            if now >= entry.deadline {
                debug!(pool = %key, "terminating worker past deadline, stopping");
                entry.worker.stop();
                return false;
            }
            true
        });
    }

    /// Replace every worker with a freshly spawned one.
    pub fn restart(&mut self, now: u64) {
        let count = self.total_process_count();
        self.scale(0, now);
        self.scale(count, now);
        if self.working {
            self.monitor(now);
        }
    }

    /// Stop issuing work: park launches and signal workers to pause.
    pub fn pause(&mut self) {
        self.working = false;
        for worker in &mut self.workers {
            worker.pause();
        }
    }

    /// Resume launches and signal workers to continue.
    pub fn resume(&mut self) {
        self.working = true;
        for worker in &mut self.workers {
            worker.resume();
        }
    }

    /// Move every worker into the terminating set (graceful shutdown).
    pub fn terminate_all(&mut self, now: u64) {
        let count = self.total_process_count();
        if count > 0 {
            self.scale(0, now);
        }
    }

    /// Hard-stop everything still draining out.
    pub fn stop_terminating(&mut self) {
        for entry in &mut self.terminating {
            entry.worker.stop();
        }
        self.terminating.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pool_with(program: &str) -> ProcessPool {
        let options = SupervisorOptions {
            name: "host:sup-1".to_string(),
            connection: "redis".to_string(),
            queues: vec!["default".to_string()],
            max_processes: 10,
            timeout: 5,
            ..SupervisorOptions::default()
        };
        ProcessPool::new(program, options, "default".to_string())
    }

    // `sleep` takes the worker args as garbage but `sleep 30` style spawn
    // still works because the first worker arg is the connection name;
    // use `sleep`-free programs where liveness matters.
    fn idle_pool() -> ProcessPool {
        pool_with("sleep")
    }

    #[test]
    fn key_is_connection_and_queue() {
        let pool = idle_pool();
        assert_eq!(pool.key(), "redis:default");
        assert_eq!(pool.queue(), "default");
    }

    #[tokio::test]
    async fn scale_up_adds_unstarted_workers() {
        let mut pool = idle_pool();
        pool.scale(3, 1000);

        assert_eq!(pool.total_process_count(), 3);
        assert_eq!(pool.terminating_process_count(), 0);
    }

    #[tokio::test]
    async fn scale_down_moves_excess_to_terminating() {
        let mut pool = idle_pool();
        pool.scale(3, 1000);
        pool.scale(1, 1000);

        assert_eq!(pool.total_process_count(), 1);
        assert_eq!(pool.terminating_process_count(), 2);
    }

    #[tokio::test]
    async fn scale_to_same_count_is_a_noop() {
        let mut pool = idle_pool();
        pool.scale(2, 1000);
        pool.scale(2, 1000);

        assert_eq!(pool.total_process_count(), 2);
        assert_eq!(pool.terminating_process_count(), 0);
    }

    #[tokio::test]
    async fn terminating_workers_never_started_are_reaped_immediately() {
        let mut pool = idle_pool();
        pool.scale(2, 1000);
        // Workers were never launched, so scaling down reaps them at the
        // first pass — nothing is running.
        pool.scale(0, 1000);
        pool.reap_terminating(1000);

        assert_eq!(pool.total_process_count(), 0);
        assert_eq!(pool.terminating_process_count(), 0);
    }

    #[tokio::test]
    async fn reap_past_deadline_hard_stops() {
        let mut pool = idle_pool();
        pool.scale(1, 1000);
        pool.monitor(1000);
        assert_eq!(pool.total_process_count(), 1);

        pool.scale(0, 1000);
        assert_eq!(pool.terminating_process_count(), 1);

        // `sleep` ignores nothing — SIGTERM kills it; simulate a stuck
        // worker by reaping before the signal lands, then past deadline.
        pool.reap_terminating(1000 + 100);
        assert_eq!(pool.terminating_process_count(), 0);
    }

    #[tokio::test]
    async fn pause_blocks_launches() {
        let mut pool = idle_pool();
        pool.scale(2, 1000);
        pool.pause();

        let outcomes = pool.monitor(1000);
        assert!(outcomes.is_empty());
        assert!(pool.workers.iter().all(|w| !w.started()));

        pool.resume();
        let outcomes = pool.monitor(1001);
        assert_eq!(outcomes.len(), 2);
        assert!(outcomes.iter().all(|o| *o == MonitorOutcome::Started));
        pool.stop_terminating();
        pool.terminate_all(1001);
        pool.stop_terminating();
    }

    #[tokio::test]
    async fn monitor_launches_configured_workers() {
        let mut pool = idle_pool();
        pool.scale(2, 1000);

        let outcomes = pool.monitor(1000);
        assert_eq!(
            outcomes,
            vec![MonitorOutcome::Started, MonitorOutcome::Started]
        );
        assert!(pool.workers.iter().all(|w| w.pid().is_some()));

        pool.terminate_all(1000);
        pool.stop_terminating();
    }

    #[tokio::test]
    async fn unable_to_launch_reports_per_worker() {
        let mut pool = pool_with("/nonexistent/drover-test-worker");
        pool.scale(1, 1000);

        let outcomes = pool.monitor(1000);
        assert_eq!(outcomes, vec![MonitorOutcome::UnableToLaunch]);

        // Cooling down on the next pass.
        let outcomes = pool.monitor(1001);
        assert_eq!(outcomes, vec![MonitorOutcome::CoolingDown]);
    }

    #[tokio::test]
    async fn restart_replaces_every_worker() {
        let mut pool = idle_pool();
        pool.scale(2, 1000);
        pool.monitor(1000);
        let old_pids: Vec<_> = pool.workers.iter().map(|w| w.pid()).collect();

        pool.restart(1000);

        assert_eq!(pool.total_process_count(), 2);
        let new_pids: Vec<_> = pool.workers.iter().map(|w| w.pid()).collect();
        for pid in new_pids.iter().flatten() {
            assert!(!old_pids.contains(&Some(*pid)));
        }

        pool.terminate_all(1000);
        pool.stop_terminating();
    }

    #[tokio::test]
    async fn terminate_all_drains_the_pool() {
        let mut pool = idle_pool();
        pool.scale(3, 1000);
        pool.monitor(1000);

        pool.terminate_all(1000);
        assert_eq!(pool.total_process_count(), 0);
        assert_eq!(pool.terminating_process_count(), 3);

        pool.stop_terminating();
        assert_eq!(pool.terminating_process_count(), 0);
    }
}
