//! Operator verbs — push commands at running masters and inspect state.

use std::path::Path;

use drover_state::{Command as ControlCommand, StateStore};

/// Open (creating if needed) the shared store under a data directory.
pub fn open_store(data_dir: &Path) -> anyhow::Result<StateStore> {
    std::fs::create_dir_all(data_dir)?;
    Ok(StateStore::open(&data_dir.join("drover.redb"))?)
}

/// Queue a command for every registered master.
pub fn push_to_masters(data_dir: &Path, command: ControlCommand) -> anyhow::Result<()> {
    let store = open_store(data_dir)?;
    let masters = store.list_masters()?;
    if masters.is_empty() {
        anyhow::bail!("no master is registered under {}", data_dir.display());
    }
    for master in masters {
        store.push_command(&master.name, &command)?;
        println!("queued {command:?} for {}", master.name);
    }
    Ok(())
}

/// Print master and supervisor records.
pub fn status(data_dir: &Path) -> anyhow::Result<()> {
    let store = open_store(data_dir)?;

    let masters = store.list_masters()?;
    if masters.is_empty() {
        println!("no master registered");
    }
    for master in masters {
        println!(
            "master {} pid {} [{}] supervisors: {}",
            master.name,
            master.pid,
            master.status,
            if master.supervisors.is_empty() {
                "-".to_string()
            } else {
                master.supervisors.join(", ")
            }
        );
    }

    for record in store.list_supervisors()? {
        println!(
            "  supervisor {} pid {} [{}]",
            record.name, record.pid, record.status
        );
        for (pool, count) in &record.processes {
            println!("    {pool}: {count} processes");
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use drover_state::{MasterRecord, RunStatus};

    #[test]
    fn push_requires_a_registered_master() {
        let dir = tempfile::tempdir().unwrap();
        let result = push_to_masters(dir.path(), ControlCommand::Pause);
        assert!(result.is_err());
    }

    #[test]
    fn push_queues_for_every_master() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_store(dir.path()).unwrap();
        for name in ["host-1", "host-2"] {
            store
                .put_master(&MasterRecord {
                    name: name.to_string(),
                    pid: 100,
                    status: RunStatus::Running,
                    supervisors: Vec::new(),
                })
                .unwrap();
        }

        push_to_masters(dir.path(), ControlCommand::Terminate { status: 0 }).unwrap();

        // Reopen the same store and check both channels.
        let store = open_store(dir.path()).unwrap();
        assert_eq!(store.pending_commands("host-1").unwrap(), 1);
        assert_eq!(store.pending_commands("host-2").unwrap(), 1);
    }

    #[test]
    fn status_tolerates_an_empty_store() {
        let dir = tempfile::tempdir().unwrap();
        status(dir.path()).unwrap();
    }
}
