//! Lifecycle events fired by the supervision tree.
//!
//! External listeners (memory monitors, job trimmers, dashboards) attach a
//! callback; the tree reports what happened but never depends on anyone
//! listening.

use std::sync::Arc;

/// Something observable that happened inside the tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SupervisorEvent {
    /// A dead worker is being relaunched.
    WorkerRestarting { pool: String },
    /// A worker could not be launched; it entered its restart cooldown.
    WorkerUnableToLaunch { pool: String },
    /// A supervisor finished one control-loop tick.
    SupervisorLooped { name: String },
    /// The master finished one control-loop tick.
    MasterLooped { name: String },
    /// A supervisor child exited unexpectedly; a replacement was queued.
    SupervisorReplaced { name: String },
}

/// Callback invoked for each [`SupervisorEvent`].
pub type EventCallback = Arc<dyn Fn(&SupervisorEvent) + Send + Sync>;

/// Callback invoked for errors caught at the loop boundary.
pub type ErrorCallback = Arc<dyn Fn(&anyhow::Error) + Send + Sync>;

/// Fire an event through an optional callback.
pub(crate) fn fire(callback: &Option<EventCallback>, event: SupervisorEvent) {
    if let Some(cb) = callback {
        cb(&event);
    }
}
