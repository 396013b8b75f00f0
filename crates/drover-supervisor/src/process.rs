//! WorkerProcess — one supervised OS process draining a queue.
//!
//! The handle never blocks: liveness comes from `try_wait`, signals go
//! through `libc::kill`, and a worker that cannot be launched is parked in
//! a cooldown window instead of being retried every tick.

use std::process::ExitStatus;
use std::time::{SystemTime, UNIX_EPOCH};

use tokio::process::{Child, Command};
use tracing::{debug, warn};

use crate::error::{SupervisorError, SupervisorResult};

/// Seconds a worker stays parked after a failed launch.
pub const RESTART_COOLDOWN_SECS: u64 = 180;

/// Current Unix epoch in seconds.
pub fn epoch_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

/// Whether a pid refers to a live process.
pub fn pid_alive(pid: u32) -> bool {
    unsafe { libc::kill(pid as i32, 0) == 0 }
}

/// Deliver a signal to a pid, ignoring delivery failures (the target may
/// have exited between liveness check and delivery).
pub fn send_signal(pid: u32, signal: i32) {
    unsafe {
        libc::kill(pid as i32, signal);
    }
}

/// What one monitor pass did to a worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MonitorOutcome {
    /// Running; nothing to do.
    Idle,
    /// Down, but inside its restart cooldown.
    CoolingDown,
    /// First launch of a configured worker.
    Started,
    /// A dead worker was relaunched.
    Restarting,
    /// Launch failed; the worker entered its cooldown.
    UnableToLaunch,
}

/// Handle to one worker OS process.
pub struct WorkerProcess {
    program: String,
    args: Vec<String>,
    nice: i32,
    child: Option<Child>,
    ever_started: bool,
    last_exit: Option<ExitStatus>,
    restart_again_at: Option<u64>,
    restarts: u32,
}

impl WorkerProcess {
    pub fn new(program: &str, args: Vec<String>, nice: i32) -> Self {
        Self {
            program: program.to_string(),
            args,
            nice,
            child: None,
            ever_started: false,
            last_exit: None,
            restart_again_at: None,
            restarts: 0,
        }
    }

    /// Whether a launch has ever been attempted successfully.
    pub fn started(&self) -> bool {
        self.ever_started
    }

    /// The OS pid, while the process is alive.
    pub fn pid(&self) -> Option<u32> {
        self.child.as_ref().and_then(Child::id)
    }

    /// Number of relaunches performed so far.
    pub fn restarts(&self) -> u32 {
        self.restarts
    }

    /// Exit status of the most recently reaped run, if any.
    pub fn last_exit(&self) -> Option<ExitStatus> {
        self.last_exit
    }

    /// Whether restarts are currently suppressed.
    pub fn cooling_down(&self, now: u64) -> bool {
        self.restart_again_at.is_some_and(|at| now < at)
    }

    /// Non-blocking liveness check; reaps the exit status when the process
    /// is found dead.
    pub fn running(&mut self) -> bool {
        match &mut self.child {
            Some(child) => match child.try_wait() {
                Ok(None) => true,
                Ok(Some(status)) => {
                    self.last_exit = Some(status);
                    self.child = None;
                    false
                }
                Err(e) => {
                    warn!(program = %self.program, error = %e, "worker liveness check failed");
                    false
                }
            },
            None => false,
        }
    }

    /// Spawn the worker process.
    pub fn start(&mut self) -> SupervisorResult<()> {
        let mut command = if self.nice != 0 {
            let mut c = Command::new("nice");
            c.arg(format!("-n{}", self.nice)).arg(&self.program);
            c
        } else {
            Command::new(&self.program)
        };

        let child = command
            .args(&self.args)
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| SupervisorError::Spawn {
                program: self.program.clone(),
                source,
            })?;

        debug!(program = %self.program, pid = ?child.id(), "worker started");
        self.child = Some(child);
        self.ever_started = true;
        Ok(())
    }

    /// Reconcile the worker toward "running".
    ///
    /// Relaunches a dead worker unless it is cooling down; a launch
    /// failure parks it until `now + RESTART_COOLDOWN_SECS`. A successful
    /// launch clears any elapsed cooldown.
    pub fn monitor(&mut self, now: u64) -> MonitorOutcome {
        if self.running() {
            return MonitorOutcome::Idle;
        }
        if self.cooling_down(now) {
            return MonitorOutcome::CoolingDown;
        }

        let first_launch = !self.ever_started;
        match self.start() {
            Ok(()) => {
                self.restart_again_at = None;
                if first_launch {
                    MonitorOutcome::Started
                } else {
                    self.restarts += 1;
                    MonitorOutcome::Restarting
                }
            }
            Err(e) => {
                warn!(program = %self.program, error = %e, "unable to launch worker");
                self.restart_again_at = Some(now + RESTART_COOLDOWN_SECS);
                MonitorOutcome::UnableToLaunch
            }
        }
    }

    /// Ask the worker to finish its current job and exit.
    pub fn terminate(&mut self) {
        if let Some(pid) = self.pid() {
            send_signal(pid, libc::SIGTERM);
        }
    }

    /// Kill the worker immediately.
    pub fn stop(&mut self) {
        if let Some(child) = &mut self.child {
            let _ = child.start_kill();
        }
    }

    /// Signal the worker to pause between jobs.
    pub fn pause(&mut self) {
        if let Some(pid) = self.pid() {
            send_signal(pid, libc::SIGUSR2);
        }
    }

    /// Signal a paused worker to resume.
    pub fn resume(&mut self) {
        if let Some(pid) = self.pid() {
            send_signal(pid, libc::SIGCONT);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn sleeper() -> WorkerProcess {
        WorkerProcess::new("sleep", vec!["30".to_string()], 0)
    }

    fn unlaunchable() -> WorkerProcess {
        WorkerProcess::new("/nonexistent/drover-test-worker", Vec::new(), 0)
    }

    #[tokio::test]
    async fn start_and_stop_a_worker() {
        let mut worker = sleeper();
        assert!(!worker.started());

        worker.start().unwrap();
        assert!(worker.started());
        assert!(worker.running());
        assert!(worker.pid().is_some());

        worker.stop();
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(!worker.running());
    }

    #[tokio::test]
    async fn monitor_launches_a_configured_worker() {
        let mut worker = sleeper();
        assert_eq!(worker.monitor(1000), MonitorOutcome::Started);
        assert!(worker.running());
        assert_eq!(worker.restarts(), 0);
        worker.stop();
    }

    #[tokio::test]
    async fn monitor_is_idle_while_running() {
        let mut worker = sleeper();
        worker.monitor(1000);
        assert_eq!(worker.monitor(1001), MonitorOutcome::Idle);
        worker.stop();
    }

    #[tokio::test]
    async fn monitor_restarts_a_dead_worker() {
        let mut worker = sleeper();
        worker.monitor(1000);
        worker.stop();
        tokio::time::sleep(Duration::from_millis(100)).await;

        assert_eq!(worker.monitor(1001), MonitorOutcome::Restarting);
        assert_eq!(worker.restarts(), 1);
        assert!(worker.running());
        worker.stop();
    }

    #[tokio::test]
    async fn failed_launch_enters_cooldown() {
        let mut worker = unlaunchable();

        assert_eq!(worker.monitor(1000), MonitorOutcome::UnableToLaunch);
        assert!(worker.cooling_down(1000));

        // Suppressed until the window elapses.
        assert_eq!(worker.monitor(1001), MonitorOutcome::CoolingDown);
        assert_eq!(
            worker.monitor(1000 + RESTART_COOLDOWN_SECS - 1),
            MonitorOutcome::CoolingDown
        );

        // Past the window the next monitor retries (and fails again here).
        assert_eq!(
            worker.monitor(1000 + RESTART_COOLDOWN_SECS),
            MonitorOutcome::UnableToLaunch
        );
    }

    #[tokio::test]
    async fn successful_retry_clears_cooldown() {
        let mut worker = unlaunchable();
        assert_eq!(worker.monitor(1000), MonitorOutcome::UnableToLaunch);

        // Swap in a launchable program, as if the deploy was fixed.
        worker.program = "sleep".to_string();
        worker.args = vec!["30".to_string()];

        let at = 1000 + RESTART_COOLDOWN_SECS;
        assert_eq!(worker.monitor(at), MonitorOutcome::Started);
        assert!(!worker.cooling_down(at));
        worker.stop();
    }

    #[tokio::test]
    async fn terminate_delivers_sigterm() {
        let mut worker = sleeper();
        worker.start().unwrap();
        worker.terminate();
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(!worker.running());
    }

    #[tokio::test]
    async fn exit_status_is_reaped() {
        let mut worker = WorkerProcess::new("true", Vec::new(), 0);
        worker.start().unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;

        assert!(!worker.running());
        assert!(worker.last_exit().unwrap().success());
    }

    #[test]
    fn pid_alive_for_own_process() {
        assert!(pid_alive(std::process::id()));
        // A pid far above any default pid_max.
        assert!(!pid_alive(3_999_999));
    }
}
