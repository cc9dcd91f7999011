//! Boundary with the coordination store.
//!
//! The reconciler reads desired services through [`DesiredStore`] and each
//! worker writes results through its own [`ResultPublisher`], obtained from
//! a node-scoped [`PublisherFactory`]. [`StateStore`] and
//! [`StoreHealthManager`] implement these over the embedded redb store.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tracing::{debug, warn};

use podwatch_state::{HealthResult, NodeId, ServiceDescriptor, StateError, StateResult, StateStore};

/// Read side: which services should run on a node.
pub trait DesiredStore: Send + Sync + 'static {
    /// Fetch a fresh snapshot. May fail transiently.
    fn fetch_desired(&self, node: &str) -> StateResult<Vec<ServiceDescriptor>>;
}

/// Write side for one service's health results.
///
/// Owned by exactly one worker, which closes it once when it stops.
pub trait ResultPublisher: Send + 'static {
    /// Best-effort write of one result.
    fn publish(&mut self, result: &HealthResult) -> StateResult<()>;

    /// Release the publisher. Calling it again is a no-op.
    fn close(&mut self);
}

/// Produces per-service publishers for one node.
pub trait PublisherFactory: Send + Sync + 'static {
    fn new_publisher(&self, service: &str) -> Box<dyn ResultPublisher>;

    /// Release the factory. Called once, after every worker has stopped.
    fn close(&self);
}

impl DesiredStore for StateStore {
    fn fetch_desired(&self, node: &str) -> StateResult<Vec<ServiceDescriptor>> {
        self.list_reality(node)
    }
}

/// Which updater currently owns each service's health entry.
#[derive(Default)]
struct Owners {
    closed: bool,
    next_generation: u64,
    current: HashMap<String, u64>,
}

type SharedOwners = Arc<Mutex<Owners>>;

fn lock(owners: &SharedOwners) -> MutexGuard<'_, Owners> {
    owners.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Node-scoped publisher factory writing into the `health` table.
///
/// A service re-added while its previous worker is still finishing gets a
/// new updater that supersedes the old one: from then on the old updater
/// neither writes nor deletes that service's entry.
pub struct StoreHealthManager {
    store: StateStore,
    node: NodeId,
    owners: SharedOwners,
}

impl StoreHealthManager {
    pub fn new(store: StateStore, node: &str) -> Self {
        Self {
            store,
            node: node.to_string(),
            owners: SharedOwners::default(),
        }
    }
}

impl PublisherFactory for StoreHealthManager {
    fn new_publisher(&self, service: &str) -> Box<dyn ResultPublisher> {
        let generation = {
            let mut owners = lock(&self.owners);
            owners.next_generation += 1;
            let generation = owners.next_generation;
            owners.current.insert(service.to_string(), generation);
            generation
        };
        Box::new(StoreHealthUpdater {
            store: self.store.clone(),
            node: self.node.clone(),
            service: service.to_string(),
            generation,
            owners: self.owners.clone(),
            closed: false,
        })
    }

    fn close(&self) {
        let mut owners = lock(&self.owners);
        if !std::mem::replace(&mut owners.closed, true) {
            debug!(node = %self.node, "health manager closed");
        }
    }
}

/// Publishes one service's results. Its health entry lives only as long as
/// the updater: closing removes it, unless a newer updater owns it by then.
pub struct StoreHealthUpdater {
    store: StateStore,
    node: NodeId,
    service: String,
    generation: u64,
    owners: SharedOwners,
    closed: bool,
}

impl StoreHealthUpdater {
    fn is_current(&self, owners: &Owners) -> bool {
        owners.current.get(&self.service) == Some(&self.generation)
    }
}

impl ResultPublisher for StoreHealthUpdater {
    fn publish(&mut self, result: &HealthResult) -> StateResult<()> {
        // Held across the write so a newer updater cannot interleave.
        let owners = lock(&self.owners);
        if self.closed || owners.closed {
            return Err(StateError::Closed(self.node.clone()));
        }
        if !self.is_current(&owners) {
            debug!(node = %self.node, service = %self.service, "superseded health updater, result dropped");
            return Ok(());
        }
        self.store.put_health(result)
    }

    fn close(&mut self) {
        if std::mem::replace(&mut self.closed, true) {
            return;
        }
        let mut owners = lock(&self.owners);
        if !self.is_current(&owners) {
            debug!(node = %self.node, service = %self.service, "superseded health updater closed");
            return;
        }
        owners.current.remove(&self.service);
        match self.store.delete_health(&self.node, &self.service) {
            Ok(_) => debug!(node = %self.node, service = %self.service, "health updater closed"),
            Err(e) => warn!(node = %self.node, service = %self.service, error = %e, "failed to clear health entry"),
        }
    }
}
