//! redb table definitions for the Drover shared store.
//!
//! Each table uses `&str` keys and `&[u8]` values (JSON-serialized domain
//! types). Masters and supervisors are keyed by their registered name;
//! command channels are keyed by the target name and hold a JSON array.

use redb::TableDefinition;

/// Master records keyed by `{master_name}`.
pub const MASTERS: TableDefinition<&str, &[u8]> = TableDefinition::new("masters");

/// Supervisor records keyed by `{supervisor_name}`.
pub const SUPERVISORS: TableDefinition<&str, &[u8]> = TableDefinition::new("supervisors");

/// Pending command arrays keyed by `{target_name}`.
pub const COMMANDS: TableDefinition<&str, &[u8]> = TableDefinition::new("commands");
