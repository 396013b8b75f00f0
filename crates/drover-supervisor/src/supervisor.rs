//! Supervisor — owns the process pools for one connection.
//!
//! Ticked externally via `loop_once`: reconciles each pool's workers,
//! drains its command channel, runs the autoscale planner on a cooldown,
//! and persists its status record. Failures inside a tick are reported
//! and never abort the tick.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{error, info, warn};

use drover_autoscale::PoolLoad;
use drover_metrics::{JobMetrics, QueueBacklog};
use drover_state::{Command, RunStatus, StateStore, SupervisorOptions, SupervisorRecord};

use crate::error::{SupervisorError, SupervisorResult};
use crate::events::{fire, ErrorCallback, EventCallback, SupervisorEvent};
use crate::pool::ProcessPool;
use crate::process::{epoch_secs, pid_alive, MonitorOutcome};

/// Exit code a supervisor uses when its name is already taken; the master
/// treats it as "do not respawn".
pub const DUPLICATE_EXIT_CODE: i32 = 13;

/// Supervises the worker pools for one connection.
pub struct Supervisor {
    name: String,
    pid: u32,
    options: SupervisorOptions,
    store: StateStore,
    backlog: Arc<dyn QueueBacklog>,
    metrics: Arc<dyn JobMetrics>,
    pools: BTreeMap<String, ProcessPool>,
    working: bool,
    status: RunStatus,
    last_auto_scaled: Option<u64>,
    exit_request: Option<i32>,
    on_event: Option<EventCallback>,
    on_error: Option<ErrorCallback>,
}

impl Supervisor {
    /// Build a supervisor and its pool topology from validated options.
    pub fn new(
        store: StateStore,
        backlog: Arc<dyn QueueBacklog>,
        metrics: Arc<dyn JobMetrics>,
        worker_program: &str,
        options: SupervisorOptions,
    ) -> SupervisorResult<Self> {
        options.validate()?;

        let mut pools = BTreeMap::new();
        for queue in options.pool_queues() {
            let pool = ProcessPool::new(worker_program, options.clone(), queue);
            pools.insert(pool.key().to_string(), pool);
        }

        Ok(Self {
            name: options.name.clone(),
            pid: std::process::id(),
            options,
            store,
            backlog,
            metrics,
            pools,
            working: true,
            status: RunStatus::Running,
            last_auto_scaled: None,
            exit_request: None,
            on_event: None,
            on_error: None,
        })
    }

    /// Attach a lifecycle-event callback.
    pub fn with_event_callback(mut self, callback: EventCallback) -> Self {
        self.on_event = Some(callback);
        self
    }

    /// Attach an error callback for failures caught at the loop boundary.
    pub fn with_error_callback(mut self, callback: ErrorCallback) -> Self {
        self.on_error = Some(callback);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn options(&self) -> &SupervisorOptions {
        &self.options
    }

    pub fn status(&self) -> RunStatus {
        self.status
    }

    pub fn working(&self) -> bool {
        self.working
    }

    pub fn last_auto_scaled(&self) -> Option<u64> {
        self.last_auto_scaled
    }

    /// Set when a `Terminate` command was drained; the host loop should
    /// call [`Supervisor::terminate`] with this status.
    pub fn exit_requested(&self) -> Option<i32> {
        self.exit_request
    }

    /// Pool key → current process count (terminating excluded).
    pub fn process_counts(&self) -> BTreeMap<String, u32> {
        self.pools
            .iter()
            .map(|(key, pool)| (key.clone(), pool.total_process_count()))
            .collect()
    }

    /// Processes across all pools, terminating excluded.
    pub fn total_process_count(&self) -> u32 {
        self.pools.values().map(ProcessPool::total_process_count).sum()
    }

    /// Workers still draining out across all pools.
    pub fn terminating_process_count(&self) -> usize {
        self.pools
            .values()
            .map(ProcessPool::terminating_process_count)
            .sum()
    }

    /// Register this supervisor in the shared store.
    ///
    /// Fails if another live supervisor already holds the name; a stale
    /// record left by a dead process is overwritten.
    pub fn monitor(&self) -> SupervisorResult<()> {
        if let Some(existing) = self.store.get_supervisor(&self.name)? {
            if existing.pid != self.pid && pid_alive(existing.pid) {
                return Err(SupervisorError::DuplicateSupervisor(self.name.clone()));
            }
        }
        self.persist()?;
        Ok(())
    }

    /// One control-loop tick.
    pub fn loop_once(&mut self, now: u64) {
        let outcomes = self.monitor_pools(now);
        self.emit_pool_events(outcomes);

        match self.store.drain_commands(&self.name) {
            Ok(commands) => {
                for command in commands {
                    self.handle_command(command, now);
                }
            }
            Err(e) => self.report(anyhow::Error::new(e).context("draining commands")),
        }

        if let Err(e) = self.auto_scale(now) {
            self.report(e.context("autoscale evaluation"));
        }

        if let Err(e) = self.persist() {
            self.report(anyhow::Error::new(e).context("persisting supervisor record"));
        }

        fire(
            &self.on_event,
            SupervisorEvent::SupervisorLooped {
                name: self.name.clone(),
            },
        );
    }

    /// Set the desired count on every pool.
    pub fn scale(&mut self, processes: u32, now: u64) {
        for pool in self.pools.values_mut() {
            pool.scale(processes, now);
        }
    }

    /// Stop issuing new work without killing running workers.
    pub fn pause(&mut self) {
        if !self.working {
            return;
        }
        info!(supervisor = %self.name, "pausing");
        self.working = false;
        self.status = RunStatus::Paused;
        for pool in self.pools.values_mut() {
            pool.pause();
        }
    }

    /// Resume issuing work.
    pub fn resume(&mut self) {
        if self.working {
            return;
        }
        info!(supervisor = %self.name, "continuing");
        self.working = true;
        self.status = RunStatus::Running;
        for pool in self.pools.values_mut() {
            pool.resume();
        }
    }

    /// Rolling-replace every worker with a freshly spawned one.
    pub fn restart(&mut self, now: u64) {
        info!(supervisor = %self.name, "restarting workers");
        for pool in self.pools.values_mut() {
            pool.restart(now);
        }
    }

    /// Graceful shutdown: drain every pool, poll liveness up to the
    /// configured timeout, hard-stop stragglers, drop the record.
    pub async fn terminate(&mut self, status: i32) -> i32 {
        info!(supervisor = %self.name, status, "terminating");
        self.working = false;
        self.status = RunStatus::Terminating;
        if let Err(e) = self.persist() {
            self.report(anyhow::Error::new(e).context("persisting terminating status"));
        }

        let now = epoch_secs();
        for pool in self.pools.values_mut() {
            pool.terminate_all(now);
        }

        let deadline = Instant::now() + Duration::from_secs(self.options.timeout + 1);
        loop {
            let now = epoch_secs();
            for pool in self.pools.values_mut() {
                pool.reap_terminating(now);
            }
            if self.terminating_process_count() == 0 {
                break;
            }
            if Instant::now() >= deadline {
                warn!(supervisor = %self.name, "termination timeout, stopping stragglers");
                for pool in self.pools.values_mut() {
                    pool.stop_terminating();
                }
                break;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }

        if let Err(e) = self.store.delete_supervisor(&self.name) {
            self.report(anyhow::Error::new(e).context("removing supervisor record"));
        }
        status
    }

    // ── Internal helpers ────────────────────────────────────────────

    fn monitor_pools(&mut self, now: u64) -> Vec<(String, MonitorOutcome)> {
        let mut outcomes = Vec::new();
        for (key, pool) in &mut self.pools {
            for outcome in pool.monitor(now) {
                outcomes.push((key.clone(), outcome));
            }
        }
        outcomes
    }

    fn emit_pool_events(&self, outcomes: Vec<(String, MonitorOutcome)>) {
        for (pool, outcome) in outcomes {
            match outcome {
                MonitorOutcome::Restarting => {
                    fire(&self.on_event, SupervisorEvent::WorkerRestarting { pool });
                }
                MonitorOutcome::UnableToLaunch => {
                    fire(
                        &self.on_event,
                        SupervisorEvent::WorkerUnableToLaunch { pool },
                    );
                }
                MonitorOutcome::Idle
                | MonitorOutcome::Started
                | MonitorOutcome::CoolingDown => {}
            }
        }
    }

    fn handle_command(&mut self, command: Command, now: u64) {
        match command {
            Command::Scale { processes } => self.scale(processes, now),
            Command::Pause => self.pause(),
            Command::Continue => self.resume(),
            Command::Restart => self.restart(now),
            Command::Terminate { status } => {
                self.status = RunStatus::Terminating;
                self.exit_request = Some(status);
            }
            Command::AddSupervisor { .. } => {
                warn!(supervisor = %self.name, "ignoring add-supervisor command addressed to a supervisor");
            }
        }
    }

    /// Evaluate the autoscale planner if the cooldown elapsed.
    fn auto_scale(&mut self, now: u64) -> anyhow::Result<()> {
        if !self.options.auto_scaling() {
            return Ok(());
        }
        if let Some(last) = self.last_auto_scaled {
            if now.saturating_sub(last) < self.options.balance_cooldown {
                return Ok(());
            }
        }

        let loads = self.pool_loads()?;
        let next = drover_autoscale::plan(&self.options, &loads);
        for (key, count) in next {
            if let Some(pool) = self.pools.get_mut(&key) {
                pool.scale(count, now);
            }
        }
        self.last_auto_scaled = Some(now);
        Ok(())
    }

    /// Gather per-pool load from the queue and metrics collaborators.
    fn pool_loads(&self) -> anyhow::Result<Vec<PoolLoad>> {
        let connection = &self.options.connection;
        self.pools
            .values()
            .map(|pool| {
                let mut size = 0u64;
                let mut weighted_runtime = 0.0;
                for queue in pool.queue().split(',') {
                    let depth = self.backlog.ready_jobs(connection, queue)?;
                    size += depth;
                    weighted_runtime += depth as f64 * self.metrics.runtime_for_queue(queue);
                }
                let runtime = if size > 0 {
                    weighted_runtime / size as f64
                } else {
                    0.0
                };
                Ok(PoolLoad {
                    key: pool.key().to_string(),
                    size,
                    runtime,
                    current: pool.total_process_count(),
                })
            })
            .collect()
    }

    /// Write this supervisor's record to the shared store.
    pub fn persist(&self) -> Result<(), drover_state::StateError> {
        self.store.put_supervisor(&SupervisorRecord {
            name: self.name.clone(),
            status: self.status,
            pid: self.pid,
            processes: self.process_counts(),
            options: self.options.clone(),
        })
    }

    fn report(&self, err: anyhow::Error) {
        error!(supervisor = %self.name, error = %err, "supervisor tick error");
        if let Some(cb) = &self.on_error {
            cb(&err);
        }
    }
}

impl Drop for Supervisor {
    fn drop(&mut self) {
        for pool in self.pools.values_mut() {
            pool.stop_terminating();
        }
    }
}
