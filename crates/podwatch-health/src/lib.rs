//! podwatch-health: keeps one health probe running per desired service.
//!
//! A single [`Reconciler`] task polls the reality store for the services
//! that should run on this node, diffs them against the services it is
//! already watching, and starts or stops [`HealthWatch`] workers to match.
//! Each worker probes its service's `/_status` endpoint on its own faster
//! interval and pushes the result through a [`ResultPublisher`].
//!
//! # Architecture
//!
//! ```text
//! Reconciler (one task, every poll_interval)
//!   ├── DesiredStore::fetch_desired(node) → Vec<ServiceDescriptor>
//!   ├── diff by service id against ReconcilerState
//!   │   ├── removed → stop signal, join on shutdown
//!   │   └── added (status_port != 0) → spawn HealthWatch
//!   └── on shutdown: stop all, join all, close PublisherFactory
//!
//! HealthWatch (one task per service, every probe_interval)
//!   ├── StatusChecker::check() → HealthResult
//!   └── ResultPublisher::publish(result)
//! ```

pub mod checker;
pub mod config;
pub mod error;
pub mod reconciler;
pub mod store;
pub mod tls;
pub mod watch;

pub use checker::{ProbeClient, StatusChecker};
pub use config::{FetchErrorPolicy, WatchConfig};
pub use error::{CheckError, ProbeError, TlsError};
pub use reconciler::{ReconcileStats, Reconciler, ReconcilerState, start};
pub use store::{DesiredStore, PublisherFactory, ResultPublisher, StoreHealthManager};
pub use tls::TlsSettings;
pub use watch::{HealthWatch, WatchHandle};
