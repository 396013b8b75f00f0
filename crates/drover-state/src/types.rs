//! Domain types for the Drover shared store.
//!
//! These types represent the persisted state of master and supervisor
//! processes plus the command-channel payloads. All types are serializable
//! to/from JSON for storage in redb tables.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{StateError, StateResult};

// ── Supervisor options ────────────────────────────────────────────

/// How a supervisor splits its process budget across its queues.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum BalanceMode {
    /// One pool working the full queue list in priority order.
    #[default]
    Off,
    /// One pool per queue; the operator sets the per-pool count.
    Simple,
    /// One pool per queue; the autoscaler sets the per-pool count.
    Auto,
}

impl fmt::Display for BalanceMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BalanceMode::Off => write!(f, "off"),
            BalanceMode::Simple => write!(f, "simple"),
            BalanceMode::Auto => write!(f, "auto"),
        }
    }
}

impl FromStr for BalanceMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "off" => Ok(BalanceMode::Off),
            "simple" => Ok(BalanceMode::Simple),
            "auto" => Ok(BalanceMode::Auto),
            other => Err(format!("unknown balance mode: {other}")),
        }
    }
}

/// Load signal the autoscaler weighs pools by.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum AutoScalingStrategy {
    /// Weight = queue size × average job runtime.
    #[default]
    Time,
    /// Weight = queue size.
    Size,
}

impl fmt::Display for AutoScalingStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AutoScalingStrategy::Time => write!(f, "time"),
            AutoScalingStrategy::Size => write!(f, "size"),
        }
    }
}

impl FromStr for AutoScalingStrategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "time" => Ok(AutoScalingStrategy::Time),
            "size" => Ok(AutoScalingStrategy::Size),
            other => Err(format!("unknown auto-scaling strategy: {other}")),
        }
    }
}

/// Configuration for one supervisor and the workers it runs.
///
/// Created at provisioning time and treated as immutable afterwards.
/// The worker tuning fields are passed through verbatim onto the worker
/// command line.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SupervisorOptions {
    /// Fully-qualified supervisor name (`{master}:{key}`).
    pub name: String,
    /// Queue connection the workers drain.
    pub connection: String,
    /// Queues in priority order. Never empty.
    pub queues: Vec<String>,
    /// Name workers identify themselves with (`--name`).
    pub workers_name: String,
    pub balance: BalanceMode,
    pub min_processes: u32,
    pub max_processes: u32,
    /// Seconds between autoscale evaluations.
    pub balance_cooldown: u64,
    /// Maximum per-pool process-count movement per evaluation.
    pub balance_max_shift: u32,
    pub auto_scaling_strategy: AutoScalingStrategy,
    /// Niceness applied to spawned workers.
    pub nice: i32,
    /// Pid of the master that owns this supervisor, if any.
    pub parent_id: Option<u32>,
    // Worker tuning, passed through to the worker command line.
    pub backoff: u64,
    pub max_time: u64,
    pub max_jobs: u64,
    pub memory: u64,
    pub sleep: u64,
    pub timeout: u64,
    pub tries: u32,
    pub rest: u64,
    pub concurrency: u32,
}

impl Default for SupervisorOptions {
    fn default() -> Self {
        Self {
            name: String::new(),
            connection: "default".to_string(),
            queues: vec!["default".to_string()],
            workers_name: "default".to_string(),
            balance: BalanceMode::Off,
            min_processes: 1,
            max_processes: 1,
            balance_cooldown: 3,
            balance_max_shift: 1,
            auto_scaling_strategy: AutoScalingStrategy::Time,
            nice: 0,
            parent_id: None,
            backoff: 0,
            max_time: 0,
            max_jobs: 0,
            memory: 128,
            sleep: 3,
            timeout: 60,
            tries: 1,
            rest: 0,
            concurrency: 1,
        }
    }
}

impl SupervisorOptions {
    /// Check the invariants that must hold before a supervisor starts.
    pub fn validate(&self) -> StateResult<()> {
        if self.queues.is_empty() {
            return Err(StateError::InvalidOptions(format!(
                "supervisor {} has an empty queue list",
                self.name
            )));
        }
        if self.min_processes < 1 {
            return Err(StateError::InvalidOptions(format!(
                "supervisor {} must keep at least one process (min_processes = {})",
                self.name, self.min_processes
            )));
        }
        if self.max_processes < self.min_processes {
            return Err(StateError::InvalidOptions(format!(
                "supervisor {}: max_processes {} is below min_processes {}",
                self.name, self.max_processes, self.min_processes
            )));
        }
        Ok(())
    }

    /// Whether the autoscaler drives this supervisor's pool counts.
    ///
    /// `Off` and `Simple` are operator-driven via scale commands; only
    /// `Auto` hands the pool counts to the scaler each cooldown.
    pub fn auto_scaling(&self) -> bool {
        self.balance == BalanceMode::Auto
    }

    /// The per-pool queue strings implied by the balance mode.
    ///
    /// `Off` yields a single comma-joined entry; `Simple`/`Auto` yield one
    /// entry per queue in configured order.
    pub fn pool_queues(&self) -> Vec<String> {
        match self.balance {
            BalanceMode::Off => vec![self.queues.join(",")],
            BalanceMode::Simple | BalanceMode::Auto => self.queues.clone(),
        }
    }

    /// The pool key for one of this supervisor's queue strings.
    pub fn pool_key(&self, queue: &str) -> String {
        format!("{}:{}", self.connection, queue)
    }

    /// Build the argument vector for a worker draining `queue`.
    ///
    /// Matches the documented worker contract:
    /// `worker <connection> --name=… --supervisor=… --queue=… …`
    pub fn worker_args(&self, queue: &str) -> Vec<String> {
        vec![
            self.connection.clone(),
            format!("--name={}", self.workers_name),
            format!("--supervisor={}", self.name),
            format!("--backoff={}", self.backoff),
            format!("--max-time={}", self.max_time),
            format!("--max-jobs={}", self.max_jobs),
            format!("--memory={}", self.memory),
            format!("--queue={queue}"),
            format!("--sleep={}", self.sleep),
            format!("--timeout={}", self.timeout),
            format!("--tries={}", self.tries),
            format!("--rest={}", self.rest),
            format!("--concurrency={}", self.concurrency),
        ]
    }

    /// Build the argument vector for the supervisor child process running
    /// these options, excluding the leading program/subcommand.
    pub fn supervisor_args(&self) -> Vec<String> {
        let mut args = vec![
            self.name.clone(),
            self.connection.clone(),
            format!("--workers-name={}", self.workers_name),
            format!("--balance={}", self.balance),
            format!("--max-processes={}", self.max_processes),
            format!("--min-processes={}", self.min_processes),
            format!("--nice={}", self.nice),
            format!("--balance-cooldown={}", self.balance_cooldown),
            format!("--balance-max-shift={}", self.balance_max_shift),
        ];
        if let Some(parent) = self.parent_id {
            args.push(format!("--parent-id={parent}"));
        }
        args.extend([
            format!("--auto-scaling-strategy={}", self.auto_scaling_strategy),
            format!("--backoff={}", self.backoff),
            format!("--max-time={}", self.max_time),
            format!("--max-jobs={}", self.max_jobs),
            format!("--memory={}", self.memory),
            format!("--queue={}", self.queues.join(",")),
            format!("--sleep={}", self.sleep),
            format!("--timeout={}", self.timeout),
            format!("--tries={}", self.tries),
            format!("--rest={}", self.rest),
            format!("--concurrency={}", self.concurrency),
        ]);
        args
    }
}

// ── Run status ────────────────────────────────────────────────────

/// Lifecycle status persisted for masters and supervisors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Running,
    Paused,
    Terminating,
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunStatus::Running => write!(f, "running"),
            RunStatus::Paused => write!(f, "paused"),
            RunStatus::Terminating => write!(f, "terminating"),
        }
    }
}

// ── Persisted records ─────────────────────────────────────────────

/// The record a master registers under its host-derived name.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MasterRecord {
    pub name: String,
    pub pid: u32,
    pub status: RunStatus,
    /// Names of the supervisors this master currently tracks.
    pub supervisors: Vec<String>,
}

/// The record a supervisor persists every tick.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SupervisorRecord {
    pub name: String,
    pub status: RunStatus,
    pub pid: u32,
    /// Pool key → current (non-terminating) process count.
    pub processes: BTreeMap<String, u32>,
    pub options: SupervisorOptions,
}

impl SupervisorRecord {
    /// Total processes across all pools.
    pub fn total_processes(&self) -> u32 {
        self.processes.values().sum()
    }
}

// ── Commands ──────────────────────────────────────────────────────

/// A command pushed onto a master's or supervisor's channel.
///
/// The set is closed; each loop drains its channel and dispatches through
/// a single match. Variants that do not apply to the receiver are logged
/// and dropped.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Command {
    /// Ask a master to provision a supervisor child.
    AddSupervisor { options: SupervisorOptions },
    /// Set a supervisor's desired process count.
    Scale { processes: u32 },
    Pause,
    Continue,
    /// Rolling-restart every worker.
    Restart,
    /// Shut down and exit with `status`.
    Terminate { status: i32 },
}

#[cfg(test)]
mod tests {
    use super::*;

    fn options(name: &str) -> SupervisorOptions {
        SupervisorOptions {
            name: name.to_string(),
            connection: "redis".to_string(),
            queues: vec!["high".to_string(), "low".to_string()],
            ..SupervisorOptions::default()
        }
    }

    #[test]
    fn validate_accepts_defaults() {
        assert!(options("host:sup-1").validate().is_ok());
    }

    #[test]
    fn validate_rejects_empty_queue_list() {
        let mut opts = options("host:sup-1");
        opts.queues.clear();
        assert!(matches!(
            opts.validate(),
            Err(StateError::InvalidOptions(_))
        ));
    }

    #[test]
    fn validate_rejects_zero_min_processes() {
        let mut opts = options("host:sup-1");
        opts.min_processes = 0;
        assert!(opts.validate().is_err());
    }

    #[test]
    fn validate_rejects_max_below_min() {
        let mut opts = options("host:sup-1");
        opts.min_processes = 4;
        opts.max_processes = 2;
        assert!(opts.validate().is_err());
    }

    #[test]
    fn pool_queues_off_joins_the_list() {
        let opts = options("host:sup-1");
        assert_eq!(opts.pool_queues(), vec!["high,low".to_string()]);
        assert_eq!(opts.pool_key("high,low"), "redis:high,low");
    }

    #[test]
    fn pool_queues_balanced_splits_per_queue() {
        let mut opts = options("host:sup-1");
        opts.balance = BalanceMode::Auto;
        assert_eq!(
            opts.pool_queues(),
            vec!["high".to_string(), "low".to_string()]
        );
    }

    #[test]
    fn auto_scaling_requires_auto_balance() {
        let mut opts = options("host:sup-1");
        assert!(!opts.auto_scaling());
        opts.balance = BalanceMode::Simple;
        assert!(!opts.auto_scaling());
        opts.balance = BalanceMode::Auto;
        assert!(opts.auto_scaling());
    }

    #[test]
    fn worker_args_match_contract() {
        let mut opts = options("host:sup-1");
        opts.memory = 256;
        opts.timeout = 90;
        let args = opts.worker_args("high,low");
        assert_eq!(args[0], "redis");
        assert!(args.contains(&"--name=default".to_string()));
        assert!(args.contains(&"--supervisor=host:sup-1".to_string()));
        assert!(args.contains(&"--queue=high,low".to_string()));
        assert!(args.contains(&"--memory=256".to_string()));
        assert!(args.contains(&"--timeout=90".to_string()));
        assert!(args.contains(&"--concurrency=1".to_string()));
    }

    #[test]
    fn supervisor_args_match_contract() {
        let mut opts = options("host:sup-1");
        opts.balance = BalanceMode::Auto;
        opts.max_processes = 10;
        opts.parent_id = Some(4242);
        let args = opts.supervisor_args();
        assert_eq!(args[0], "host:sup-1");
        assert_eq!(args[1], "redis");
        assert!(args.contains(&"--balance=auto".to_string()));
        assert!(args.contains(&"--max-processes=10".to_string()));
        assert!(args.contains(&"--parent-id=4242".to_string()));
        assert!(args.contains(&"--auto-scaling-strategy=time".to_string()));
        assert!(args.contains(&"--queue=high,low".to_string()));
    }

    #[test]
    fn supervisor_args_omit_parent_when_standalone() {
        let args = options("host:sup-1").supervisor_args();
        assert!(!args.iter().any(|a| a.starts_with("--parent-id")));
    }

    #[test]
    fn balance_mode_round_trips_from_str() {
        for mode in [BalanceMode::Off, BalanceMode::Simple, BalanceMode::Auto] {
            assert_eq!(mode.to_string().parse::<BalanceMode>().unwrap(), mode);
        }
        assert!("spread".parse::<BalanceMode>().is_err());
    }

    #[test]
    fn strategy_round_trips_from_str() {
        for strategy in [AutoScalingStrategy::Time, AutoScalingStrategy::Size] {
            assert_eq!(
                strategy.to_string().parse::<AutoScalingStrategy>().unwrap(),
                strategy
            );
        }
    }

    #[test]
    fn command_serde_uses_type_tag() {
        let json = serde_json::to_string(&Command::Scale { processes: 5 }).unwrap();
        assert!(json.contains("\"type\":\"scale\""));
        let back: Command = serde_json::from_str(&json).unwrap();
        assert_eq!(back, Command::Scale { processes: 5 });
    }

    #[test]
    fn supervisor_record_total_processes() {
        let mut processes = BTreeMap::new();
        processes.insert("redis:high".to_string(), 3);
        processes.insert("redis:low".to_string(), 2);
        let record = SupervisorRecord {
            name: "host:sup-1".to_string(),
            status: RunStatus::Running,
            pid: 100,
            processes,
            options: options("host:sup-1"),
        };
        assert_eq!(record.total_processes(), 5);
    }
}
