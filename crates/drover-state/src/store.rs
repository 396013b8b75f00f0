//! StateStore — redb-backed persistence shared by masters and supervisors.
//!
//! Provides typed CRUD operations over master records, supervisor records,
//! and per-name command channels. All values are JSON-serialized into
//! redb's `&[u8]` value columns. The store supports both on-disk and
//! in-memory backends (the latter for testing).
//!
//! redb admits one open handle per database file, but the store is shared
//! by several processes on the host (master, supervisor children, operator
//! verbs). The file backend therefore holds only the path and opens the
//! database per operation, retrying briefly while another process holds
//! the lock — every access is a short read or write, so contention windows
//! are tiny.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use redb::{Database, ReadableDatabase, ReadableTable};
use tracing::debug;

use crate::error::{StateError, StateResult};
use crate::tables::*;
use crate::types::*;

/// How long to keep retrying an open while another process holds the lock.
const LOCK_TIMEOUT: Duration = Duration::from_secs(2);

/// Convert any `Display` error into a `StateError` variant via a closure factory.
macro_rules! map_err {
    ($variant:ident) => {
        |e| StateError::$variant(e.to_string())
    };
}

#[derive(Clone)]
enum Backend {
    /// Open per operation; safe to share across processes.
    File(PathBuf),
    /// A single kept-open handle; test-only, single process.
    Memory(Arc<Database>),
}

/// Thread-safe shared store backed by redb.
#[derive(Clone)]
pub struct StateStore {
    backend: Backend,
}

impl StateStore {
    /// Open (or create) a persistent store at the given path.
    pub fn open(path: &Path) -> StateResult<Self> {
        // Create the file and tables up front so later per-operation opens
        // only ever see a ready database.
        let db = open_file(path)?;
        ensure_tables(&db)?;
        drop(db);
        debug!(?path, "state store opened");
        Ok(Self {
            backend: Backend::File(path.to_path_buf()),
        })
    }

    /// Create an ephemeral in-memory store (for testing).
    pub fn open_in_memory() -> StateResult<Self> {
        let backend = redb::backends::InMemoryBackend::new();
        let db = Database::builder()
            .create_with_backend(backend)
            .map_err(map_err!(Open))?;
        ensure_tables(&db)?;
        debug!("in-memory state store opened");
        Ok(Self {
            backend: Backend::Memory(Arc::new(db)),
        })
    }

    /// Run an operation against the database.
    fn with_db<T>(&self, op: impl FnOnce(&Database) -> StateResult<T>) -> StateResult<T> {
        match &self.backend {
            Backend::Memory(db) => op(db),
            Backend::File(path) => {
                let db = open_file(path)?;
                op(&db)
            }
        }
    }

    // ── Masters ────────────────────────────────────────────────────

    /// Insert or update a master record.
    pub fn put_master(&self, record: &MasterRecord) -> StateResult<()> {
        let value = serde_json::to_vec(record).map_err(map_err!(Serialize))?;
        self.with_db(|db| {
            let txn = db.begin_write().map_err(map_err!(Transaction))?;
            {
                let mut table = txn.open_table(MASTERS).map_err(map_err!(Table))?;
                table
                    .insert(record.name.as_str(), value.as_slice())
                    .map_err(map_err!(Write))?;
            }
            txn.commit().map_err(map_err!(Transaction))
        })?;
        debug!(name = %record.name, "master record stored");
        Ok(())
    }

    /// Get a master record by name.
    pub fn get_master(&self, name: &str) -> StateResult<Option<MasterRecord>> {
        self.with_db(|db| {
            let txn = db.begin_read().map_err(map_err!(Transaction))?;
            let table = txn.open_table(MASTERS).map_err(map_err!(Table))?;
            match table.get(name).map_err(map_err!(Read))? {
                Some(guard) => {
                    let record: MasterRecord = serde_json::from_slice(guard.value())
                        .map_err(map_err!(Deserialize))?;
                    Ok(Some(record))
                }
                None => Ok(None),
            }
        })
    }

    /// List all master records.
    pub fn list_masters(&self) -> StateResult<Vec<MasterRecord>> {
        self.with_db(|db| {
            let txn = db.begin_read().map_err(map_err!(Transaction))?;
            let table = txn.open_table(MASTERS).map_err(map_err!(Table))?;
            let mut results = Vec::new();
            for entry in table.iter().map_err(map_err!(Read))? {
                let (_, value) = entry.map_err(map_err!(Read))?;
                let record: MasterRecord =
                    serde_json::from_slice(value.value()).map_err(map_err!(Deserialize))?;
                results.push(record);
            }
            Ok(results)
        })
    }

    /// Delete a master record. Returns true if it existed.
    pub fn delete_master(&self, name: &str) -> StateResult<bool> {
        let existed = self.with_db(|db| {
            let txn = db.begin_write().map_err(map_err!(Transaction))?;
            let existed;
            {
                let mut table = txn.open_table(MASTERS).map_err(map_err!(Table))?;
                existed = table.remove(name).map_err(map_err!(Write))?.is_some();
            }
            txn.commit().map_err(map_err!(Transaction))?;
            Ok(existed)
        })?;
        debug!(%name, existed, "master record deleted");
        Ok(existed)
    }

    // ── Supervisors ────────────────────────────────────────────────

    /// Insert or update a supervisor record.
    pub fn put_supervisor(&self, record: &SupervisorRecord) -> StateResult<()> {
        let value = serde_json::to_vec(record).map_err(map_err!(Serialize))?;
        self.with_db(|db| {
            let txn = db.begin_write().map_err(map_err!(Transaction))?;
            {
                let mut table = txn.open_table(SUPERVISORS).map_err(map_err!(Table))?;
                table
                    .insert(record.name.as_str(), value.as_slice())
                    .map_err(map_err!(Write))?;
            }
            txn.commit().map_err(map_err!(Transaction))
        })
    }

    /// Get a supervisor record by name.
    pub fn get_supervisor(&self, name: &str) -> StateResult<Option<SupervisorRecord>> {
        self.with_db(|db| {
            let txn = db.begin_read().map_err(map_err!(Transaction))?;
            let table = txn.open_table(SUPERVISORS).map_err(map_err!(Table))?;
            match table.get(name).map_err(map_err!(Read))? {
                Some(guard) => {
                    let record: SupervisorRecord = serde_json::from_slice(guard.value())
                        .map_err(map_err!(Deserialize))?;
                    Ok(Some(record))
                }
                None => Ok(None),
            }
        })
    }

    /// List all supervisor records.
    pub fn list_supervisors(&self) -> StateResult<Vec<SupervisorRecord>> {
        self.with_db(|db| {
            let txn = db.begin_read().map_err(map_err!(Transaction))?;
            let table = txn.open_table(SUPERVISORS).map_err(map_err!(Table))?;
            let mut results = Vec::new();
            for entry in table.iter().map_err(map_err!(Read))? {
                let (_, value) = entry.map_err(map_err!(Read))?;
                let record: SupervisorRecord =
                    serde_json::from_slice(value.value()).map_err(map_err!(Deserialize))?;
                results.push(record);
            }
            Ok(results)
        })
    }

    /// Delete a supervisor record. Returns true if it existed.
    pub fn delete_supervisor(&self, name: &str) -> StateResult<bool> {
        self.with_db(|db| {
            let txn = db.begin_write().map_err(map_err!(Transaction))?;
            let existed;
            {
                let mut table = txn.open_table(SUPERVISORS).map_err(map_err!(Table))?;
                existed = table.remove(name).map_err(map_err!(Write))?.is_some();
            }
            txn.commit().map_err(map_err!(Transaction))?;
            Ok(existed)
        })
    }

    // ── Command channels ───────────────────────────────────────────

    /// Append a command to the channel for `name`.
    pub fn push_command(&self, name: &str, command: &Command) -> StateResult<()> {
        self.with_db(|db| {
            let txn = db.begin_write().map_err(map_err!(Transaction))?;
            {
                let mut table = txn.open_table(COMMANDS).map_err(map_err!(Table))?;
                let mut pending: Vec<Command> = match table.get(name).map_err(map_err!(Read))? {
                    Some(guard) => {
                        serde_json::from_slice(guard.value()).map_err(map_err!(Deserialize))?
                    }
                    None => Vec::new(),
                };
                pending.push(command.clone());
                let value = serde_json::to_vec(&pending).map_err(map_err!(Serialize))?;
                table
                    .insert(name, value.as_slice())
                    .map_err(map_err!(Write))?;
            }
            txn.commit().map_err(map_err!(Transaction))
        })?;
        debug!(%name, "command queued");
        Ok(())
    }

    /// Take every pending command for `name`, leaving the channel empty.
    ///
    /// Removal happens in the same write transaction as the read, so each
    /// command is handed out exactly once across drains.
    pub fn drain_commands(&self, name: &str) -> StateResult<Vec<Command>> {
        self.with_db(|db| {
            let txn = db.begin_write().map_err(map_err!(Transaction))?;
            let pending;
            {
                let mut table = txn.open_table(COMMANDS).map_err(map_err!(Table))?;
                pending = match table.remove(name).map_err(map_err!(Write))? {
                    Some(guard) => {
                        serde_json::from_slice(guard.value()).map_err(map_err!(Deserialize))?
                    }
                    None => Vec::new(),
                };
            }
            txn.commit().map_err(map_err!(Transaction))?;
            Ok(pending)
        })
    }

    /// Number of commands waiting for `name`.
    pub fn pending_commands(&self, name: &str) -> StateResult<usize> {
        self.with_db(|db| {
            let txn = db.begin_read().map_err(map_err!(Transaction))?;
            let table = txn.open_table(COMMANDS).map_err(map_err!(Table))?;
            match table.get(name).map_err(map_err!(Read))? {
                Some(guard) => {
                    let pending: Vec<Command> =
                        serde_json::from_slice(guard.value()).map_err(map_err!(Deserialize))?;
                    Ok(pending.len())
                }
                None => Ok(0),
            }
        })
    }
}

/// Open a database file, retrying briefly while another process holds
/// the redb lock.
fn open_file(path: &Path) -> StateResult<Database> {
    let deadline = Instant::now() + LOCK_TIMEOUT;
    let mut delay = Duration::from_millis(5);
    loop {
        match Database::create(path) {
            Ok(db) => return Ok(db),
            Err(e) => {
                if Instant::now() >= deadline {
                    return Err(StateError::Open(e.to_string()));
                }
                std::thread::sleep(delay);
                delay = (delay * 2).min(Duration::from_millis(100));
            }
        }
    }
}

/// Create all tables if they don't exist yet.
fn ensure_tables(db: &Database) -> StateResult<()> {
    let txn = db.begin_write().map_err(map_err!(Transaction))?;
    // Opening a table in a write transaction creates it if absent.
    txn.open_table(MASTERS).map_err(map_err!(Table))?;
    txn.open_table(SUPERVISORS).map_err(map_err!(Table))?;
    txn.open_table(COMMANDS).map_err(map_err!(Table))?;
    txn.commit().map_err(map_err!(Transaction))?;
    Ok(())
}
