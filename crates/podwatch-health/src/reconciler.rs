//! Reconciliation loop: keeps the set of health watches equal to the
//! set of probed services the reality store assigns to this node.
//!
//! The reconciler is the only owner of [`ReconcilerState`]. Each cycle it
//! takes a fresh snapshot, stops watches whose service disappeared and
//! starts watches for services it has not seen before. Services present in
//! both the old and new snapshot are left alone: the diff is by service id
//! only, so a changed status port or scheme takes effect once the service
//! is removed and re-added.

use std::collections::{HashMap, HashSet};

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use podwatch_state::{NodeId, ServiceDescriptor, ServiceId};

use crate::checker::{ProbeClient, StatusChecker, probe_uri};
use crate::config::{FetchErrorPolicy, WatchConfig};
use crate::store::{DesiredStore, PublisherFactory};
use crate::watch::{HealthWatch, WatchHandle};

/// Services currently under watch, keyed by service id.
#[derive(Default)]
pub struct ReconcilerState {
    watches: HashMap<ServiceId, WatchHandle>,
}

impl ReconcilerState {
    pub fn len(&self) -> usize {
        self.watches.len()
    }

    pub fn is_empty(&self) -> bool {
        self.watches.is_empty()
    }

    pub fn contains(&self, service: &str) -> bool {
        self.watches.contains_key(service)
    }

    /// Probe URI of a watched service.
    pub fn probe_uri(&self, service: &str) -> Option<&str> {
        self.watches.get(service).map(WatchHandle::uri)
    }

    /// Watched service ids, sorted.
    pub fn service_ids(&self) -> Vec<&str> {
        let mut ids: Vec<&str> = self.watches.keys().map(String::as_str).collect();
        ids.sort_unstable();
        ids
    }
}

/// What one reconciliation changed.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ReconcileStats {
    pub started: u32,
    pub stopped: u32,
    /// Snapshot entries without a status port.
    pub unprobed: u32,
}

/// Drives health watches from the reality store.
pub struct Reconciler<S, F> {
    config: WatchConfig,
    node: NodeId,
    store: S,
    factory: F,
    client: ProbeClient,
    state: ReconcilerState,
    /// Stopped workers not yet joined.
    retiring: Vec<JoinHandle<()>>,
}

impl<S: DesiredStore, F: PublisherFactory> Reconciler<S, F> {
    pub fn new(config: WatchConfig, node: &str, store: S, factory: F, client: ProbeClient) -> Self {
        Self {
            config,
            node: node.to_string(),
            store,
            factory,
            client,
            state: ReconcilerState::default(),
            retiring: Vec::new(),
        }
    }

    pub fn state(&self) -> &ReconcilerState {
        &self.state
    }

    /// Run until `shutdown` flips to true (or its sender is dropped), then
    /// stop and join every worker and close the publisher factory.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        info!(
            node = %self.node,
            poll_interval = ?self.config.poll_interval,
            probe_interval = ?self.config.probe_interval,
            "health reconciler started"
        );

        if !*shutdown.borrow_and_update() {
            self.poll_once();
            loop {
                tokio::select! {
                    _ = tokio::time::sleep(self.config.poll_interval) => {
                        self.poll_once();
                    }
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            break;
                        }
                    }
                }
            }
        }

        self.shutdown().await;
    }

    /// Fetch a snapshot and reconcile against it.
    ///
    /// Returns `None` when the fetch failed and the cycle was skipped.
    pub fn poll_once(&mut self) -> Option<ReconcileStats> {
        self.retiring.retain(|task| !task.is_finished());

        let snapshot = match self.store.fetch_desired(&self.node) {
            Ok(snapshot) => snapshot,
            Err(e) => {
                warn!(node = %self.node, error = %e, "failed to get services from reality store");
                match self.config.on_fetch_error {
                    FetchErrorPolicy::Skip => return None,
                    FetchErrorPolicy::Empty => Vec::new(),
                }
            }
        };

        let stats = self.reconcile(&snapshot);
        if stats.started > 0 || stats.stopped > 0 {
            info!(
                node = %self.node,
                started = stats.started,
                stopped = stats.stopped,
                watching = self.state.len(),
                "health watches reconciled"
            );
        }
        Some(stats)
    }

    /// Diff `snapshot` against the current watches and apply the changes.
    pub fn reconcile(&mut self, snapshot: &[ServiceDescriptor]) -> ReconcileStats {
        let mut stats = ReconcileStats::default();
        let desired: HashSet<&str> = snapshot.iter().map(|d| d.id.as_str()).collect();

        let current = std::mem::take(&mut self.state.watches);
        let mut next = HashMap::with_capacity(snapshot.len());

        for (service, handle) in current {
            if desired.contains(service.as_str()) {
                next.insert(service, handle);
            } else {
                debug!(%service, "service left reality, stopping health watch");
                self.retiring.push(handle.stop());
                stats.stopped += 1;
            }
        }

        for desc in snapshot {
            if next.contains_key(&desc.id) {
                continue;
            }
            if !desc.is_probed() {
                stats.unprobed += 1;
                continue;
            }
            let handle = self.start_watch(desc);
            next.insert(desc.id.clone(), handle);
            stats.started += 1;
        }

        self.state.watches = next;
        stats
    }

    fn start_watch(&self, desc: &ServiceDescriptor) -> WatchHandle {
        let uri = probe_uri(&self.node, desc);
        debug!(service = %desc.id, %uri, "starting health watch");

        let checker = StatusChecker::new(&desc.id, &self.node, uri, self.client.clone());
        let publisher = self.factory.new_publisher(&desc.id);
        HealthWatch::new(&desc.id, checker, publisher, self.config.probe_interval).spawn()
    }

    /// Wait for every stopped worker to exit.
    pub(crate) async fn join_retiring(&mut self) {
        for task in self.retiring.drain(..) {
            if let Err(e) = task.await {
                warn!(error = %e, "health watch task failed");
            }
        }
    }

    /// Stop every watch, wait for all workers to release their publishers,
    /// then close the factory.
    pub async fn shutdown(mut self) {
        let watches = std::mem::take(&mut self.state.watches);
        let count = watches.len();
        for (_, handle) in watches {
            self.retiring.push(handle.stop());
        }
        self.join_retiring().await;

        self.factory.close();
        info!(node = %self.node, stopped = count, "health reconciler stopped");
    }
}

/// Run the reconciliation loop for `node` until `shutdown` fires.
pub async fn start<S: DesiredStore, F: PublisherFactory>(
    config: WatchConfig,
    node: &str,
    store: S,
    factory: F,
    client: ProbeClient,
    shutdown: watch::Receiver<bool>,
) {
    Reconciler::new(config, node, store, factory, client)
        .run(shutdown)
        .await;
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    use crate::checker::testing::*;
    use crate::store::testing::*;
    use crate::tls::TlsSettings;

    const NODE: &str = "127.0.0.1";

    fn desc(id: &str, port: u16) -> ServiceDescriptor {
        ServiceDescriptor {
            id: id.to_string(),
            status_port: port,
            status_http: true,
            manifest: serde_json::json!({ "id": id }),
        }
    }

    fn config(probe_interval: Duration) -> WatchConfig {
        WatchConfig {
            poll_interval: Duration::from_millis(20),
            probe_interval,
            probe_timeout: Duration::from_secs(1),
            on_fetch_error: FetchErrorPolicy::Skip,
        }
    }

    fn reconciler(
        config: WatchConfig,
        store: &ScriptedStore,
        factory: &RecordingFactory,
    ) -> Reconciler<ScriptedStore, RecordingFactory> {
        let client = ProbeClient::new(
            TlsSettings::default().client_config().unwrap(),
            config.probe_timeout,
        );
        Reconciler::new(config, NODE, store.clone(), factory.clone(), client)
    }

    /// Reconciler whose workers never get to probe during a test.
    fn idle_reconciler(store: &ScriptedStore, factory: &RecordingFactory) -> Reconciler<ScriptedStore, RecordingFactory> {
        reconciler(config(Duration::from_secs(3600)), store, factory)
    }

    async fn wait_for(mut cond: impl FnMut() -> bool) {
        for _ in 0..200 {
            if cond() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("condition not reached");
    }

    #[tokio::test]
    async fn add_remove_readd_scenario() {
        let store = ScriptedStore::default();
        let factory = RecordingFactory::default();
        let mut rec = idle_reconciler(&store, &factory);

        // A: one http service.
        store.set(vec![desc("svc1", 8080)]);
        let stats = rec.poll_once().unwrap();
        assert_eq!(stats.started, 1);
        assert_eq!(rec.state().service_ids(), vec!["svc1"]);
        assert_eq!(
            rec.state().probe_uri("svc1"),
            Some("http://127.0.0.1:8080/_status")
        );

        // B: nothing desired.
        store.set(vec![]);
        let stats = rec.poll_once().unwrap();
        assert_eq!(stats.stopped, 1);
        assert!(rec.state().is_empty());
        rec.join_retiring().await;
        assert_eq!(factory.log.closed("svc1"), 1);

        // C: svc1 back, svc2 without a status port.
        store.set(vec![desc("svc1", 8080), desc("svc2", 0)]);
        let stats = rec.poll_once().unwrap();
        assert_eq!(stats, ReconcileStats { started: 1, stopped: 0, unprobed: 1 });
        assert_eq!(rec.state().service_ids(), vec!["svc1"]);
        assert_eq!(factory.log.created("svc1"), 2);
        assert_eq!(factory.log.created("svc2"), 0);

        rec.shutdown().await;
    }

    #[tokio::test]
    async fn reconciling_same_snapshot_twice_is_a_no_op() {
        let store = ScriptedStore::default();
        let factory = RecordingFactory::default();
        let mut rec = idle_reconciler(&store, &factory);

        let snapshot = vec![desc("a", 1001), desc("b", 1002), desc("c", 0)];
        rec.reconcile(&snapshot);
        let second = rec.reconcile(&snapshot);

        assert_eq!(second, ReconcileStats { started: 0, stopped: 0, unprobed: 1 });
        assert_eq!(factory.log.created("a"), 1);
        assert_eq!(factory.log.created("b"), 1);
        assert_eq!(factory.log.count(|e| matches!(e, Event::Closed(_))), 0);

        rec.shutdown().await;
    }

    #[tokio::test]
    async fn watched_set_tracks_each_snapshot_exactly() {
        let store = ScriptedStore::default();
        let factory = RecordingFactory::default();
        let mut rec = idle_reconciler(&store, &factory);

        let snapshots: Vec<Vec<&str>> = vec![
            vec!["a", "b", "c"],
            vec!["b", "c", "d"],
            vec![],
            vec!["e"],
            vec!["a", "e", "f", "g"],
        ];
        for ids in snapshots {
            let snapshot: Vec<_> = ids.iter().map(|id| desc(id, 9000)).collect();
            rec.reconcile(&snapshot);

            let mut expected = ids.clone();
            expected.sort_unstable();
            assert_eq!(rec.state().service_ids(), expected);
        }

        rec.shutdown().await;
    }

    #[tokio::test]
    async fn zero_port_is_never_watched() {
        let store = ScriptedStore::default();
        let factory = RecordingFactory::default();
        let mut rec = idle_reconciler(&store, &factory);

        for _ in 0..5 {
            let stats = rec.reconcile(&[desc("batch", 0), desc("web", 8080)]);
            assert_eq!(stats.unprobed, 1);
            assert!(!rec.state().contains("batch"));
        }
        assert_eq!(factory.log.created("batch"), 0);

        rec.shutdown().await;
    }

    #[tokio::test]
    async fn unchanged_identity_keeps_original_watch() {
        let store = ScriptedStore::default();
        let factory = RecordingFactory::default();
        let mut rec = idle_reconciler(&store, &factory);

        rec.reconcile(&[desc("web", 8080)]);

        // Port and scheme changes are ignored while the id stays.
        let mut changed = desc("web", 9090);
        changed.status_http = false;
        let stats = rec.reconcile(&[changed.clone()]);

        assert_eq!(stats, ReconcileStats::default());
        assert_eq!(rec.state().probe_uri("web"), Some("http://127.0.0.1:8080/_status"));
        assert_eq!(factory.log.created("web"), 1);

        // Removing and re-adding picks up the new endpoint.
        rec.reconcile(&[]);
        rec.reconcile(&[changed]);
        assert_eq!(rec.state().probe_uri("web"), Some("https://127.0.0.1:9090/_status"));

        rec.shutdown().await;
    }

    #[tokio::test]
    async fn duplicate_ids_in_one_snapshot_are_watched_once() {
        let store = ScriptedStore::default();
        let factory = RecordingFactory::default();
        let mut rec = idle_reconciler(&store, &factory);

        let stats = rec.reconcile(&[desc("web", 8080), desc("web", 8081)]);
        assert_eq!(stats.started, 1);
        assert_eq!(rec.state().probe_uri("web"), Some("http://127.0.0.1:8080/_status"));

        rec.shutdown().await;
    }

    #[tokio::test]
    async fn removed_service_stops_probing() {
        let (port, hits) = spawn_server(Reply::status(200, "ok")).await;
        let store = ScriptedStore::default();
        let factory = RecordingFactory::default();
        let mut rec = reconciler(config(Duration::from_millis(10)), &store, &factory);

        rec.reconcile(&[desc("web", port)]);
        wait_for(|| factory.log.published("web") >= 2).await;

        rec.reconcile(&[]);
        rec.join_retiring().await;
        let after_stop = hits.total();
        let published = factory.log.published("web");

        tokio::time::sleep(Duration::from_millis(60)).await;
        assert_eq!(hits.total(), after_stop);
        assert_eq!(factory.log.published("web"), published);
        assert_eq!(factory.log.closed("web"), 1);

        rec.shutdown().await;
    }

    #[tokio::test]
    async fn fetch_error_skips_cycle_by_default() {
        let store = ScriptedStore::default();
        let factory = RecordingFactory::default();
        let mut rec = idle_reconciler(&store, &factory);

        store.set(vec![desc("web", 8080)]);
        rec.poll_once();

        store.fail();
        assert_eq!(rec.poll_once(), None);
        assert_eq!(rec.state().service_ids(), vec!["web"]);

        rec.shutdown().await;
    }

    #[tokio::test]
    async fn fetch_error_can_empty_the_snapshot() {
        let store = ScriptedStore::default();
        let factory = RecordingFactory::default();
        let mut cfg = config(Duration::from_secs(3600));
        cfg.on_fetch_error = FetchErrorPolicy::Empty;
        let mut rec = reconciler(cfg, &store, &factory);

        store.set(vec![desc("web", 8080)]);
        rec.poll_once();

        store.fail();
        let stats = rec.poll_once().unwrap();
        assert_eq!(stats.stopped, 1);
        assert!(rec.state().is_empty());

        rec.shutdown().await;
    }

    #[tokio::test]
    async fn finished_workers_are_reaped_between_cycles() {
        let store = ScriptedStore::default();
        let factory = RecordingFactory::default();
        let mut rec = idle_reconciler(&store, &factory);

        store.set(vec![desc("a", 1), desc("b", 2)]);
        rec.poll_once();
        store.set(vec![]);
        rec.poll_once();
        assert_eq!(rec.retiring.len(), 2);

        wait_for(|| factory.log.closed("a") == 1 && factory.log.closed("b") == 1).await;
        // Closed is logged just before the task returns.
        tokio::time::sleep(Duration::from_millis(20)).await;
        rec.poll_once();
        assert!(rec.retiring.is_empty());

        rec.shutdown().await;
    }

    #[tokio::test]
    async fn run_polls_until_shutdown_then_joins_workers() {
        let (port, _hits) = spawn_server(Reply::status(200, "ok")).await;
        let store = ScriptedStore::default();
        let factory = RecordingFactory::default();
        store.set(vec![desc("web", port), desc("api", port)]);

        let rec = reconciler(config(Duration::from_millis(10)), &store, &factory);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let task = tokio::spawn(rec.run(shutdown_rx));

        wait_for(|| factory.log.published("web") >= 1 && factory.log.published("api") >= 1).await;

        // A later poll picks up a removal.
        store.set(vec![desc("web", port)]);
        wait_for(|| factory.log.closed("api") == 1).await;

        shutdown_tx.send(true).unwrap();
        task.await.unwrap();

        let events = factory.log.events();
        assert_eq!(events.last(), Some(&Event::FactoryClosed));
        assert_eq!(factory.log.count(|e| *e == Event::FactoryClosed), 1);
        assert_eq!(factory.log.closed("web"), 1);
        assert_eq!(factory.log.closed("api"), 1);
    }

    #[tokio::test]
    async fn dropped_shutdown_sender_also_stops() {
        let store = ScriptedStore::default();
        let factory = RecordingFactory::default();
        store.set(vec![desc("web", 8080)]);

        let rec = idle_reconciler(&store, &factory);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let task = tokio::spawn(rec.run(shutdown_rx));

        wait_for(|| factory.log.created("web") == 1).await;
        drop(shutdown_tx);
        task.await.unwrap();

        assert_eq!(factory.log.closed("web"), 1);
        assert_eq!(factory.log.events().last(), Some(&Event::FactoryClosed));
    }
}
