//! drover-autoscale — per-pool process-count planning.
//!
//! Turns a supervisor's options plus the current load of each of its pools
//! into the pool counts for the next tick. The planner is a pure function:
//! it touches no processes and no storage, which is what makes the
//! convergence properties testable in isolation.
//!
//! # Algorithm
//!
//! ```text
//! weight_i = size_i × runtime_i   (strategy: time)
//!          = size_i               (strategy: size)
//!
//! total == 0:  target_i = min_processes
//! total  > 0:  budget   = max_processes − Σ min_processes
//!              target_i = min_processes + floor(budget × weight_i / total)
//!
//! next_i = current_i stepped toward target_i by ≤ balance_max_shift
//! ```
//!
//! Repeated evaluations under fixed load converge monotonically on the
//! targets and then hold. A pool whose target is at least 1 is never
//! stepped to 0.

pub mod planner;

pub use planner::{PoolLoad, plan, targets};
