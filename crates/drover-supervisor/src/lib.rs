//! drover-supervisor — the supervision tree for queue workers.
//!
//! Bottom-up composition:
//! - [`WorkerProcess`] wraps one OS process draining a queue.
//! - [`ProcessPool`] owns the worker set for one queue key and converges
//!   its count toward a target.
//! - [`Supervisor`] owns the pools for one connection, runs the autoscale
//!   planner on a cooldown, and drains its command channel.
//! - [`MasterSupervisor`] owns supervisor child processes on one host and
//!   self-heals unexpected exits.
//!
//! Every component is ticked by an external caller via `loop_once` and
//! never blocks; only `terminate` waits, bounded by the configured
//! timeout.

pub mod error;
pub mod events;
pub mod master;
pub mod pool;
pub mod process;
pub mod supervisor;

pub use error::{SupervisorError, SupervisorResult};
pub use events::{ErrorCallback, EventCallback, SupervisorEvent};
pub use master::{MasterSupervisor, NameResolver, SupervisorProcess, SupervisorProcessState, hostname};
pub use pool::ProcessPool;
pub use process::{MonitorOutcome, WorkerProcess, epoch_secs, pid_alive, RESTART_COOLDOWN_SECS};
pub use supervisor::{Supervisor, DUPLICATE_EXIT_CODE};
