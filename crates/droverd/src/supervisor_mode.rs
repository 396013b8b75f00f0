//! Supervisor mode — run one supervisor process.
//!
//! Normally spawned by the master as
//! `droverd supervisor <name> <connection> --queue=… …`; runs its control
//! loop on a fixed tick and reacts to the signals the master sends
//! (SIGTERM to stop, SIGUSR2 to pause, SIGCONT to continue).

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Args;
use tokio::signal::unix::{signal, SignalKind};
use tracing::{error, info};

use drover_metrics::{NullBacklog, RuntimeWindow};
use drover_state::{AutoScalingStrategy, BalanceMode, SupervisorOptions};
use drover_supervisor::{epoch_secs, Supervisor, SupervisorError, DUPLICATE_EXIT_CODE};

use crate::ops;

/// Arguments matching the supervisor process contract.
#[derive(Debug, Args)]
pub struct SupervisorArgs {
    /// Fully-qualified supervisor name (`{master}:{key}`).
    pub name: String,
    /// Queue connection the workers drain.
    pub connection: String,

    #[arg(long, default_value = "default")]
    pub workers_name: String,
    #[arg(long, default_value = "off")]
    pub balance: BalanceMode,
    #[arg(long, default_value_t = 1)]
    pub max_processes: u32,
    #[arg(long, default_value_t = 1)]
    pub min_processes: u32,
    #[arg(long, default_value_t = 0)]
    pub nice: i32,
    #[arg(long, default_value_t = 3)]
    pub balance_cooldown: u64,
    #[arg(long, default_value_t = 1)]
    pub balance_max_shift: u32,
    /// Pid of the master that spawned this supervisor.
    #[arg(long)]
    pub parent_id: Option<u32>,
    #[arg(long, default_value = "time")]
    pub auto_scaling_strategy: AutoScalingStrategy,
    #[arg(long, default_value_t = 0)]
    pub backoff: u64,
    #[arg(long, default_value_t = 0)]
    pub max_time: u64,
    #[arg(long, default_value_t = 0)]
    pub max_jobs: u64,
    #[arg(long, default_value_t = 128)]
    pub memory: u64,
    /// Comma-separated queue list in priority order.
    #[arg(long, default_value = "default")]
    pub queue: String,
    #[arg(long, default_value_t = 3)]
    pub sleep: u64,
    #[arg(long, default_value_t = 60)]
    pub timeout: u64,
    #[arg(long, default_value_t = 1)]
    pub tries: u32,
    #[arg(long, default_value_t = 0)]
    pub rest: u64,
    #[arg(long, default_value_t = 1)]
    pub concurrency: u32,

    /// Data directory holding the shared store.
    #[arg(long, default_value = "/var/lib/drover")]
    pub data_dir: PathBuf,
    /// Worker binary to spawn.
    #[arg(long, default_value = "worker")]
    pub worker_binary: String,
    /// Control-loop tick in milliseconds.
    #[arg(long, default_value_t = 250)]
    pub tick_ms: u64,
}

impl SupervisorArgs {
    /// Build supervisor options from the parsed command line.
    pub fn to_options(&self) -> SupervisorOptions {
        SupervisorOptions {
            name: self.name.clone(),
            connection: self.connection.clone(),
            queues: self
                .queue
                .split(',')
                .filter(|q| !q.is_empty())
                .map(str::to_string)
                .collect(),
            workers_name: self.workers_name.clone(),
            balance: self.balance,
            min_processes: self.min_processes,
            max_processes: self.max_processes,
            balance_cooldown: self.balance_cooldown,
            balance_max_shift: self.balance_max_shift,
            auto_scaling_strategy: self.auto_scaling_strategy,
            nice: self.nice,
            parent_id: self.parent_id,
            backoff: self.backoff,
            max_time: self.max_time,
            max_jobs: self.max_jobs,
            memory: self.memory,
            sleep: self.sleep,
            timeout: self.timeout,
            tries: self.tries,
            rest: self.rest,
            concurrency: self.concurrency,
        }
    }
}

/// Run a supervisor until it is told to stop.
pub async fn run(args: SupervisorArgs) -> anyhow::Result<()> {
    let options = args.to_options();
    info!(supervisor = %options.name, connection = %options.connection, "supervisor starting");

    let store = ops::open_store(&args.data_dir)?;
    // The queue backend is wired per deployment; without one the
    // autoscaler holds every pool at its floor.
    let backlog = Arc::new(NullBacklog);
    let runtimes = Arc::new(RuntimeWindow::new(240));

    let mut supervisor = Supervisor::new(
        store,
        backlog,
        runtimes,
        &args.worker_binary,
        options.clone(),
    )?;

    if let Err(e) = supervisor.monitor() {
        if matches!(e, SupervisorError::DuplicateSupervisor(_)) {
            // The master treats this exit code as "do not respawn".
            error!(error = %e, "exiting as duplicate");
            std::process::exit(DUPLICATE_EXIT_CODE);
        }
        return Err(e.into());
    }

    supervisor.scale(options.min_processes, epoch_secs());

    let mut ticker = tokio::time::interval(Duration::from_millis(args.tick_ms.max(50)));
    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sigint = signal(SignalKind::interrupt())?;
    let mut sigusr2 = signal(SignalKind::user_defined2())?;
    let mut sigcont = signal(SignalKind::from_raw(libc::SIGCONT))?;

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                supervisor.loop_once(epoch_secs());
                if let Some(status) = supervisor.exit_requested() {
                    let status = supervisor.terminate(status).await;
                    info!(status, "supervisor stopped");
                    std::process::exit(status);
                }
            }
            _ = sigterm.recv() => {
                let status = supervisor.terminate(0).await;
                info!(status, "supervisor stopped");
                std::process::exit(status);
            }
            _ = sigint.recv() => {
                let status = supervisor.terminate(0).await;
                std::process::exit(status);
            }
            _ = sigusr2.recv() => supervisor.pause(),
            _ = sigcont.recv() => supervisor.resume(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[derive(Parser)]
    struct TestCli {
        #[command(flatten)]
        args: SupervisorArgs,
    }

    fn parse(args: &[&str]) -> SupervisorArgs {
        let mut argv = vec!["supervisor"];
        argv.extend(args);
        TestCli::try_parse_from(argv).unwrap().args
    }

    #[test]
    fn positionals_and_defaults() {
        let args = parse(&["host-1:app", "redis"]);
        let options = args.to_options();

        assert_eq!(options.name, "host-1:app");
        assert_eq!(options.connection, "redis");
        assert_eq!(options.queues, vec!["default"]);
        assert_eq!(options.balance, BalanceMode::Off);
        assert_eq!(options.min_processes, 1);
        assert_eq!(options.max_processes, 1);
        assert_eq!(options.timeout, 60);
        assert!(options.validate().is_ok());
    }

    #[test]
    fn full_contract_flags_parse() {
        let args = parse(&[
            "host-1:app",
            "redis",
            "--workers-name=bulk",
            "--balance=auto",
            "--max-processes=20",
            "--min-processes=2",
            "--nice=5",
            "--balance-cooldown=5",
            "--balance-max-shift=3",
            "--parent-id=4242",
            "--auto-scaling-strategy=size",
            "--backoff=2",
            "--max-time=3600",
            "--max-jobs=500",
            "--memory=256",
            "--queue=high,low",
            "--sleep=1",
            "--timeout=90",
            "--tries=3",
            "--rest=1",
            "--concurrency=4",
        ]);
        let options = args.to_options();

        assert_eq!(options.workers_name, "bulk");
        assert_eq!(options.balance, BalanceMode::Auto);
        assert_eq!(options.max_processes, 20);
        assert_eq!(options.min_processes, 2);
        assert_eq!(options.nice, 5);
        assert_eq!(options.balance_cooldown, 5);
        assert_eq!(options.balance_max_shift, 3);
        assert_eq!(options.parent_id, Some(4242));
        assert_eq!(options.auto_scaling_strategy, AutoScalingStrategy::Size);
        assert_eq!(options.queues, vec!["high", "low"]);
        assert_eq!(options.memory, 256);
        assert_eq!(options.timeout, 90);
        assert_eq!(options.concurrency, 4);
        assert!(options.validate().is_ok());
    }

    #[test]
    fn generated_supervisor_args_parse_back() {
        // What the master spawns must be exactly what this mode accepts.
        let options = SupervisorOptions {
            name: "host-1:app".to_string(),
            connection: "redis".to_string(),
            queues: vec!["high".to_string(), "low".to_string()],
            balance: BalanceMode::Auto,
            max_processes: 12,
            min_processes: 2,
            parent_id: Some(999),
            ..SupervisorOptions::default()
        };

        let argv = options.supervisor_args();
        let parsed = parse(&argv.iter().map(String::as_str).collect::<Vec<_>>());
        assert_eq!(parsed.to_options(), options);
    }

    #[test]
    fn bad_balance_mode_is_rejected() {
        let mut argv = vec!["supervisor", "host-1:app", "redis", "--balance=spread"];
        assert!(TestCli::try_parse_from(argv.drain(..)).is_err());
    }
}
