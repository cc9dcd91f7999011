//! podwatch-state: embedded reality and health store for podwatch.
//!
//! Backed by [redb](https://docs.rs/redb). Holds the two halves of the
//! node agent's view of the coordination store:
//!
//! - **reality**: which services should run on each node
//!   (`ServiceDescriptor`, keyed `(node, service)`)
//! - **health**: the latest probe outcome per service
//!   (`HealthResult`, keyed `(node, service)`)
//!
//! All domain types are JSON-serialized into redb's `&[u8]` value columns.
//! The `StateStore` is `Clone` + `Send` + `Sync` (backed by `Arc<Database>`)
//! and can be shared across async tasks.

pub mod error;
pub mod store;
pub mod tables;
pub mod types;

pub use error::{StateError, StateResult};
pub use store::StateStore;
pub use types::*;
