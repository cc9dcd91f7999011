//! redb table definitions for the podwatch state store.
//!
//! Both tables use `(node, service)` tuple keys. Tuples order element by
//! element, so a node's records are one contiguous range no matter which
//! characters the node or service ids contain.

use redb::TableDefinition;

/// Composite key shared by both tables.
pub type NodeKey = (&'static str, &'static str);

/// Desired services keyed by `(node, service)`.
pub const REALITY: TableDefinition<NodeKey, &[u8]> = TableDefinition::new("reality");

/// Latest health results keyed by `(node, service)`.
pub const HEALTH: TableDefinition<NodeKey, &[u8]> = TableDefinition::new("health");
