//! drover-metrics — load signals consumed by the autoscaler.
//!
//! The job queue and the job-runtime history are external collaborators;
//! this crate defines the two interfaces the orchestrator consumes
//! (`QueueBacklog`, `JobMetrics`), a small rolling runtime window that
//! satisfies the latter without long-term retention, and the wait-time
//! estimator built on top of both.

pub mod sources;
pub mod wait;

pub use sources::{JobMetrics, NullBacklog, QueueBacklog, RuntimeWindow, StaticBacklog};
pub use wait::WaitTimeCalculator;
