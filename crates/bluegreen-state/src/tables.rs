//! redb table definitions for the bluegreen state store.
//!
//! Each table uses `&str` keys and `&[u8]` values (JSON-serialized types).

use redb::TableDefinition;

/// Deployment records keyed by resource name (`{app}-{environment}`).
pub const DEPLOYMENTS: TableDefinition<&str, &[u8]> = TableDefinition::new("deployments");

/// Main service selectors keyed by service name.
pub const SELECTORS: TableDefinition<&str, &[u8]> = TableDefinition::new("selectors");

/// Switch history keyed by `{service}:{revision:020}`.
pub const SWITCHES: TableDefinition<&str, &[u8]> = TableDefinition::new("switches");
