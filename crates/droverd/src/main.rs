//! droverd — the Drover daemon.
//!
//! One binary, two long-running modes and a few operator verbs:
//! - `master` runs the host-level master supervisor, provisioning and
//!   self-healing supervisor child processes.
//! - `supervisor` runs one supervisor (normally spawned by the master).
//! - `pause` / `continue` / `terminate` queue commands for running
//!   masters; `status` prints the shared-store records.
//!
//! # Usage
//!
//! ```text
//! droverd master --config /etc/drover.toml --data-dir /var/lib/drover
//! droverd status --data-dir /var/lib/drover
//! ```

mod master_mode;
mod ops;
mod provision;
mod supervisor_mode;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use drover_state::Command as ControlCommand;

#[derive(Parser)]
#[command(name = "droverd", about = "Drover queue-worker orchestrator")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the host master: provision and supervise supervisor processes.
    Master {
        /// Data directory for the shared store.
        #[arg(long, default_value = "/var/lib/drover")]
        data_dir: PathBuf,

        /// Provisioning file declaring this host's supervisors.
        #[arg(long)]
        config: PathBuf,

        /// Control-loop tick in milliseconds.
        #[arg(long, default_value_t = 250)]
        tick_ms: u64,

        /// Override the resolver-derived master name (default: hostname).
        #[arg(long)]
        name: Option<String>,

        /// Worker binary supervisors spawn.
        #[arg(long, default_value = "worker")]
        worker_binary: String,
    },

    /// Run one supervisor (normally spawned by the master).
    Supervisor(supervisor_mode::SupervisorArgs),

    /// Pause every master registered on this host.
    Pause {
        #[arg(long, default_value = "/var/lib/drover")]
        data_dir: PathBuf,
    },

    /// Resume every paused master on this host.
    Continue {
        #[arg(long, default_value = "/var/lib/drover")]
        data_dir: PathBuf,
    },

    /// Gracefully shut down every master on this host.
    Terminate {
        #[arg(long, default_value = "/var/lib/drover")]
        data_dir: PathBuf,

        /// Exit status the masters should stop with.
        #[arg(long, default_value_t = 0)]
        status: i32,
    },

    /// Print master and supervisor records.
    Status {
        #[arg(long, default_value = "/var/lib/drover")]
        data_dir: PathBuf,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing.
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,droverd=debug,drover=debug".parse().unwrap()),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Command::Master {
            data_dir,
            config,
            tick_ms,
            name,
            worker_binary,
        } => {
            master_mode::run(master_mode::MasterConfig {
                data_dir,
                config,
                tick_ms,
                name,
                worker_binary,
            })
            .await
        }
        Command::Supervisor(args) => supervisor_mode::run(args).await,
        Command::Pause { data_dir } => ops::push_to_masters(&data_dir, ControlCommand::Pause),
        Command::Continue { data_dir } => {
            ops::push_to_masters(&data_dir, ControlCommand::Continue)
        }
        Command::Terminate { data_dir, status } => {
            ops::push_to_masters(&data_dir, ControlCommand::Terminate { status })
        }
        Command::Status { data_dir } => ops::status(&data_dir),
    }
}
