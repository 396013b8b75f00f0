//! Master mode — run the host-level master supervisor.
//!
//! Loads the provisioning file, registers the master (refusing to start
//! when another live master owns the name), and ticks the control loop
//! until terminated.

use std::path::PathBuf;
use std::time::Duration;

use tokio::signal::unix::{signal, SignalKind};
use tracing::info;

use drover_supervisor::MasterSupervisor;

use crate::ops;
use crate::provision::ProvisioningFile;

pub struct MasterConfig {
    pub data_dir: PathBuf,
    pub config: PathBuf,
    pub tick_ms: u64,
    pub name: Option<String>,
    pub worker_binary: String,
}

/// Run the master until it is told to stop.
pub async fn run(config: MasterConfig) -> anyhow::Result<()> {
    info!("drover master starting");

    let store = ops::open_store(&config.data_dir)?;
    let provisioning = ProvisioningFile::load(&config.config)?;

    let supervisor_command = supervisor_command(&config)?;
    let mut master = match config.name {
        Some(name) => MasterSupervisor::with_name_resolver(
            store,
            supervisor_command,
            Box::new(move || name.clone()),
        ),
        None => MasterSupervisor::new(store, supervisor_command),
    };

    // Refuse to start beside a live master of the same name.
    master.monitor()?;
    info!(master = %master.name(), "master registered");

    for options in provisioning.resolve(master.name())? {
        master.add_supervisor(options);
    }

    let mut ticker = tokio::time::interval(Duration::from_millis(config.tick_ms.max(50)));
    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sigint = signal(SignalKind::interrupt())?;

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                master.loop_once();
                if let Some(status) = master.exit_requested() {
                    let status = master.terminate(status).await;
                    info!(status, "master stopped");
                    std::process::exit(status);
                }
            }
            _ = sigterm.recv() => {
                let status = master.terminate(0).await;
                info!(status, "master stopped");
                std::process::exit(status);
            }
            _ = sigint.recv() => {
                let status = master.terminate(0).await;
                std::process::exit(status);
            }
        }
    }
}

/// The command template used to exec supervisor children: this binary's
/// `supervisor` subcommand, pointed at the same store and worker binary.
fn supervisor_command(config: &MasterConfig) -> anyhow::Result<Vec<String>> {
    let exe = std::env::current_exe()?;
    Ok(vec![
        exe.display().to_string(),
        "supervisor".to_string(),
        format!("--data-dir={}", config.data_dir.display()),
        format!("--worker-binary={}", config.worker_binary),
        format!("--tick-ms={}", config.tick_ms),
    ])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn supervisor_command_points_back_at_this_binary() {
        let config = MasterConfig {
            data_dir: PathBuf::from("/var/lib/drover"),
            config: PathBuf::from("/etc/drover.toml"),
            tick_ms: 250,
            name: None,
            worker_binary: "worker".to_string(),
        };

        let command = supervisor_command(&config).unwrap();
        assert!(!command[0].is_empty());
        assert_eq!(command[1], "supervisor");
        assert!(command.contains(&"--data-dir=/var/lib/drover".to_string()));
        assert!(command.contains(&"--worker-binary=worker".to_string()));
        assert!(command.contains(&"--tick-ms=250".to_string()));
    }
}
