//! drover-state — embedded shared store for the Drover orchestrator.
//!
//! Backed by [redb](https://docs.rs/redb), holds the records that the
//! master and supervisor processes on a host share: master registrations,
//! supervisor status records, and the per-name command channels.
//!
//! # Architecture
//!
//! All domain types are JSON-serialized into redb's `&[u8]` value columns.
//! Command channels are stored as one JSON array per target name; a drain
//! removes the whole array in a single write transaction, which is what
//! gives commands their at-most-once-per-tick contract.
//!
//! The `StateStore` is `Clone` + `Send` + `Sync` and is shared by every
//! process on the host: the file backend opens the database per operation
//! so the master, its supervisor children, and operator commands can all
//! use one file without fighting over redb's single-handle lock.

pub mod error;
pub mod store;
pub mod tables;
pub mod types;

pub use error::{StateError, StateResult};
pub use store::StateStore;
pub use types::*;
