//! MasterSupervisor — the host-level root of the supervision tree.
//!
//! Owns the supervisor child processes on one host. Each tick reconciles
//! children against reality: exited children are classified (clean,
//! duplicate, crashed) and a crash enqueues exactly one replacement
//! command onto the master's own channel, to be provisioned on a later
//! tick. One live master per name, enforced through the shared store.

use std::time::{Duration, Instant};

use tokio::process::{Child, Command as ProcessCommand};
use tracing::{error, info, warn};

use drover_state::{Command, MasterRecord, RunStatus, StateStore, SupervisorOptions};

use crate::error::{SupervisorError, SupervisorResult};
use crate::events::{fire, ErrorCallback, EventCallback, SupervisorEvent};
use crate::process::{pid_alive, send_signal};
use crate::supervisor::DUPLICATE_EXIT_CODE;

/// Resolves the master's stable identity. Swappable for tests and for
/// hosts whose identity is not their hostname.
pub type NameResolver = Box<dyn Fn() -> String + Send>;

/// Host identity via `gethostname`.
pub fn hostname() -> String {
    let mut buf = [0u8; 256];
    let rc = unsafe { libc::gethostname(buf.as_mut_ptr() as *mut libc::c_char, buf.len()) };
    if rc != 0 {
        return "localhost".to_string();
    }
    let end = buf.iter().position(|&b| b == 0).unwrap_or(buf.len());
    String::from_utf8_lossy(&buf[..end]).into_owned()
}

/// Lifecycle of a supervisor child process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SupervisorProcessState {
    Starting,
    Running,
    Dead,
    Duplicate,
}

/// How an exited child should be handled.
enum ExitClass {
    Clean,
    Duplicate,
    Unexpected,
}

/// Handle to one supervisor child process.
pub struct SupervisorProcess {
    pub options: SupervisorOptions,
    child: Option<Child>,
    state: SupervisorProcessState,
    stopped_by_us: bool,
}

impl SupervisorProcess {
    pub fn new(options: SupervisorOptions) -> Self {
        Self {
            options,
            child: None,
            state: SupervisorProcessState::Starting,
            stopped_by_us: false,
        }
    }

    pub fn state(&self) -> SupervisorProcessState {
        self.state
    }

    pub fn pid(&self) -> Option<u32> {
        self.child.as_ref().and_then(Child::id)
    }

    /// Spawn the child: `command... <supervisor args>`.
    fn start(&mut self, command: &[String]) -> SupervisorResult<()> {
        let Some((program, leading)) = command.split_first() else {
            return Err(SupervisorError::Spawn {
                program: String::new(),
                source: std::io::Error::other("empty supervisor command"),
            });
        };

        let child = ProcessCommand::new(program)
            .args(leading)
            .args(self.options.supervisor_args())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| SupervisorError::Spawn {
                program: program.clone(),
                source,
            })?;

        info!(supervisor = %self.options.name, pid = ?child.id(), "supervisor process started");
        self.child = Some(child);
        self.state = SupervisorProcessState::Running;
        Ok(())
    }

    /// Non-blocking: has the child exited, and how should the exit be
    /// treated? `None` while still running or not yet started.
    fn check_exit(&mut self) -> Option<ExitClass> {
        let child = self.child.as_mut()?;
        let status = match child.try_wait() {
            Ok(Some(status)) => status,
            Ok(None) => return None,
            Err(e) => {
                warn!(supervisor = %self.options.name, error = %e, "supervisor liveness check failed");
                return None;
            }
        };
        self.child = None;

        if self.stopped_by_us || status.success() {
            self.state = SupervisorProcessState::Dead;
            return Some(ExitClass::Clean);
        }
        if status.code() == Some(DUPLICATE_EXIT_CODE) {
            self.state = SupervisorProcessState::Duplicate;
            return Some(ExitClass::Duplicate);
        }
        self.state = SupervisorProcessState::Dead;
        Some(ExitClass::Unexpected)
    }

    fn signal(&mut self, signal: i32) {
        if let Some(pid) = self.pid() {
            send_signal(pid, signal);
        }
    }

    fn terminate(&mut self) {
        self.stopped_by_us = true;
        self.signal(libc::SIGTERM);
    }

    fn stop(&mut self) {
        self.stopped_by_us = true;
        if let Some(child) = &mut self.child {
            let _ = child.start_kill();
        }
    }

    fn running(&mut self) -> bool {
        match &mut self.child {
            Some(child) => matches!(child.try_wait(), Ok(None)),
            None => false,
        }
    }
}

/// The root supervisor for one host.
pub struct MasterSupervisor {
    name: String,
    pid: u32,
    store: StateStore,
    /// Program plus leading args used to exec supervisor children,
    /// e.g. `["/usr/bin/droverd", "supervisor"]`.
    supervisor_command: Vec<String>,
    supervisors: Vec<SupervisorProcess>,
    working: bool,
    status: RunStatus,
    exit_request: Option<i32>,
    /// Seconds to wait for children during graceful termination.
    terminate_timeout: u64,
    on_event: Option<EventCallback>,
    on_error: Option<ErrorCallback>,
}

impl MasterSupervisor {
    /// Create a master named after this host.
    pub fn new(store: StateStore, supervisor_command: Vec<String>) -> Self {
        Self::with_name_resolver(store, supervisor_command, Box::new(hostname))
    }

    /// Create a master with a custom identity resolver. The name is
    /// resolved once and cached for the life of the process.
    pub fn with_name_resolver(
        store: StateStore,
        supervisor_command: Vec<String>,
        resolver: NameResolver,
    ) -> Self {
        assert!(
            !supervisor_command.is_empty(),
            "supervisor command template is never empty"
        );
        Self {
            name: resolver(),
            pid: std::process::id(),
            store,
            supervisor_command,
            supervisors: Vec::new(),
            working: true,
            status: RunStatus::Running,
            exit_request: None,
            terminate_timeout: 60,
            on_event: None,
            on_error: None,
        }
    }

    pub fn with_event_callback(mut self, callback: EventCallback) -> Self {
        self.on_event = Some(callback);
        self
    }

    pub fn with_error_callback(mut self, callback: ErrorCallback) -> Self {
        self.on_error = Some(callback);
        self
    }

    pub fn with_terminate_timeout(mut self, seconds: u64) -> Self {
        self.terminate_timeout = seconds;
        self
    }

    /// The cached host identity.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn status(&self) -> RunStatus {
        self.status
    }

    pub fn working(&self) -> bool {
        self.working
    }

    pub fn exit_requested(&self) -> Option<i32> {
        self.exit_request
    }

    /// Names of currently tracked supervisors.
    pub fn supervisor_names(&self) -> Vec<String> {
        self.supervisors
            .iter()
            .map(|s| s.options.name.clone())
            .collect()
    }

    /// Register this master in the shared store.
    ///
    /// Fails if another live master already holds the name — two masters
    /// fighting over the same children is never recoverable. A stale
    /// record left by a dead process is overwritten.
    pub fn monitor(&self) -> SupervisorResult<()> {
        if let Some(existing) = self.store.get_master(&self.name)? {
            if existing.pid != self.pid && pid_alive(existing.pid) {
                return Err(SupervisorError::DuplicateMaster(self.name.clone()));
            }
        }
        self.persist()?;
        Ok(())
    }

    /// Track a supervisor child, stamping this master as its parent.
    /// It is spawned by the next tick.
    pub fn add_supervisor(&mut self, mut options: SupervisorOptions) {
        options.parent_id = Some(self.pid);
        info!(master = %self.name, supervisor = %options.name, "supervisor added");
        self.supervisors.push(SupervisorProcess::new(options));
    }

    /// One control-loop tick: drain commands, reconcile children, persist.
    pub fn loop_once(&mut self) {
        match self.store.drain_commands(&self.name) {
            Ok(commands) => {
                for command in commands {
                    self.handle_command(command);
                }
            }
            Err(e) => self.report(anyhow::Error::new(e).context("draining commands")),
        }

        self.reconcile_children();

        if let Err(e) = self.persist() {
            self.report(anyhow::Error::new(e).context("persisting master record"));
        }

        fire(
            &self.on_event,
            SupervisorEvent::MasterLooped {
                name: self.name.clone(),
            },
        );
    }

    /// Pause provisioning and signal children to pause.
    pub fn pause(&mut self) {
        if !self.working {
            return;
        }
        info!(master = %self.name, "pausing");
        self.working = false;
        self.status = RunStatus::Paused;
        for child in &mut self.supervisors {
            child.signal(libc::SIGUSR2);
        }
    }

    /// Resume provisioning and signal children to continue.
    pub fn resume(&mut self) {
        if self.working {
            return;
        }
        info!(master = %self.name, "continuing");
        self.working = true;
        self.status = RunStatus::Running;
        for child in &mut self.supervisors {
            child.signal(libc::SIGCONT);
        }
    }

    /// Graceful shutdown: ask every child to stop, poll liveness up to
    /// the termination timeout, force-kill stragglers, drop the
    /// registration, and hand back the exit status.
    pub async fn terminate(&mut self, status: i32) -> i32 {
        info!(master = %self.name, status, "terminating");
        self.working = false;
        self.status = RunStatus::Terminating;
        if let Err(e) = self.persist() {
            self.report(anyhow::Error::new(e).context("persisting terminating status"));
        }

        for child in &mut self.supervisors {
            child.terminate();
        }

        let deadline = Instant::now() + Duration::from_secs(self.terminate_timeout);
        loop {
            let all_stopped = self
                .supervisors
                .iter_mut()
                .all(|child| !child.running());
            if all_stopped {
                break;
            }
            if Instant::now() >= deadline {
                warn!(master = %self.name, "termination timeout, stopping stragglers");
                for child in &mut self.supervisors {
                    child.stop();
                }
                break;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        self.supervisors.clear();

        if let Err(e) = self.store.delete_master(&self.name) {
            self.report(anyhow::Error::new(e).context("removing master record"));
        }
        status
    }

    // ── Internal helpers ────────────────────────────────────────────

    fn handle_command(&mut self, command: Command) {
        match command {
            Command::AddSupervisor { options } => self.add_supervisor(options),
            Command::Pause => self.pause(),
            Command::Continue => self.resume(),
            Command::Terminate { status } => {
                self.status = RunStatus::Terminating;
                self.exit_request = Some(status);
            }
            // Topology-wide commands fan out to every child's channel.
            Command::Scale { .. } | Command::Restart => {
                for child in &self.supervisors {
                    if let Err(e) = self.store.push_command(&child.options.name, &command) {
                        self.report(
                            anyhow::Error::new(e).context("forwarding command to supervisor"),
                        );
                    }
                }
            }
        }
    }

    /// Reconcile tracked children against their OS processes.
    fn reconcile_children(&mut self) {
        let mut replacements = Vec::new();
        let working = self.working;
        let command = self.supervisor_command.clone();

        self.supervisors.retain_mut(|child| {
            if child.state() == SupervisorProcessState::Starting {
                if !working {
                    return true;
                }
                if let Err(e) = child.start(&command) {
                    // Retried next tick; the binary may be mid-deploy.
                    error!(supervisor = %child.options.name, error = %e, "failed to start supervisor");
                }
                return true;
            }

            match child.check_exit() {
                None => true,
                Some(ExitClass::Clean) => {
                    info!(supervisor = %child.options.name, "supervisor exited cleanly");
                    false
                }
                Some(ExitClass::Duplicate) => {
                    warn!(
                        supervisor = %child.options.name,
                        "supervisor exited as duplicate, not replacing"
                    );
                    false
                }
                Some(ExitClass::Unexpected) => {
                    warn!(supervisor = %child.options.name, "supervisor exited unexpectedly");
                    replacements.push(child.options.clone());
                    false
                }
            }
        });

        // Self-heal: queue exactly one replacement per crashed child onto
        // our own channel; it is provisioned on a later tick.
        for options in replacements {
            let name = options.name.clone();
            match self
                .store
                .push_command(&self.name, &Command::AddSupervisor { options })
            {
                Ok(()) => fire(
                    &self.on_event,
                    SupervisorEvent::SupervisorReplaced { name },
                ),
                Err(e) => {
                    self.report(anyhow::Error::new(e).context("queueing supervisor replacement"))
                }
            }
        }
    }

    /// Write this master's record to the shared store.
    pub fn persist(&self) -> Result<(), drover_state::StateError> {
        self.store.put_master(&MasterRecord {
            name: self.name.clone(),
            pid: self.pid,
            status: self.status,
            supervisors: self.supervisor_names(),
        })
    }

    fn report(&self, err: anyhow::Error) {
        error!(master = %self.name, error = %err, "master tick error");
        if let Some(cb) = &self.on_error {
            cb(&err);
        }
    }
}
