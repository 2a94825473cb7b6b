//! Live query engine.
//!
//! One actor task per listener owns the merge index. Each store scan gets a
//! forwarder task that pumps its change stream into the actor's event
//! channel, tagged with the scan key and a subscription serial so that
//! messages from a cancelled subscription are recognised and dropped.
//! Control messages from the [`ListenerRegistration`] arrive on a separate
//! command channel.
//!
//! Per scan the state moves `Pending -> Live -> Closed`. The first snapshot
//! goes out once no scan is pending; afterwards a snapshot goes out only
//! when the diff against the last emitted one is non-empty.
//!
//! Every document copy a scan receives is stamped with a version from one
//! counter, and the merge keeps the newest copy of each document. A
//! document whose newest copy comes from a different scan than the one last
//! emitted, at a different location, crossed a range boundary; it is
//! reported as a `removed`/`added` pair in a single snapshot.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use geoq_store::{ChangeBatch, ChangeKind, DocumentStore, StoreQuery, StoreResult, StoredDocument, WhereOp};
use geoq_types::DocumentId;
use serde_json::Value;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::QueryConfig;
use crate::criteria::{validate_filter_field, NearCriteria, QueryCriteria, ScanKey};
use crate::diff::diff_with_moves;
use crate::error::{QueryError, QueryResult};
use crate::query::build_view;
use crate::snapshot::{GeoDocumentSnapshot, QuerySnapshot};

/// Callback a listener delivers snapshots and store errors to.
pub type SnapshotCallback = Box<dyn FnMut(QueryResult<QuerySnapshot>) + Send + 'static>;

enum Command {
    Near(NearCriteria),
    Filter {
        field: String,
        op: WhereOp,
        value: Value,
    },
    Limit(usize),
}

/// A message from a forwarder. `batch` is `None` when the stream ended.
struct Envelope {
    key: ScanKey,
    serial: u64,
    batch: Option<StoreResult<ChangeBatch>>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum ScanState {
    Pending,
    Live,
    Closed,
}

struct ScanSubscription {
    serial: u64,
    state: ScanState,
    /// Documents with the version they were received at.
    documents: BTreeMap<DocumentId, (u64, StoredDocument)>,
    forwarder: JoinHandle<()>,
}

struct Shared {
    active: AtomicBool,
    stop: watch::Sender<bool>,
}

/// Handle to a running listener.
///
/// Clones refer to the same listener. Dropping every clone does not stop
/// it; call [`unsubscribe`](Self::unsubscribe).
#[derive(Clone)]
pub struct ListenerRegistration {
    shared: Arc<Shared>,
    commands: mpsc::UnboundedSender<Command>,
}

impl ListenerRegistration {
    /// Stop the listener and cancel every store subscription. Idempotent,
    /// and safe to call from inside the callback; no snapshot is delivered
    /// after it returns.
    pub fn unsubscribe(&self) {
        if self.shared.active.swap(false, Ordering::SeqCst) {
            info!("listener unsubscribed");
            let _ = self.shared.stop.send(true);
        }
    }

    pub fn is_active(&self) -> bool {
        self.shared.active.load(Ordering::SeqCst)
    }

    /// Move or resize the query. Scans that remain part of the covering set
    /// keep their subscription.
    pub fn near(&self, near: NearCriteria) -> QueryResult<()> {
        near.validate()?;
        self.send(Command::Near(near))
    }

    /// Add a `where` clause. Every scan is resubscribed.
    pub fn filter(&self, field: &str, op: WhereOp, value: Value) -> QueryResult<()> {
        validate_filter_field(field)?;
        self.send(Command::Filter {
            field: field.to_string(),
            op,
            value,
        })
    }

    /// Change the limit. A geo-bound listener recomputes its view; any
    /// other listener resubscribes, since the limit is applied by the store.
    pub fn limit(&self, limit: usize) -> QueryResult<()> {
        self.send(Command::Limit(limit))
    }

    fn send(&self, command: Command) -> QueryResult<()> {
        if !self.is_active() {
            return Err(QueryError::Closed);
        }
        self.commands.send(command).map_err(|_| QueryError::Closed)
    }
}

/// The actor behind a [`ListenerRegistration`].
pub(crate) struct LiveQueryEngine {
    store: Arc<dyn DocumentStore>,
    config: QueryConfig,
    criteria: QueryCriteria,
    callback: SnapshotCallback,
    shared: Arc<Shared>,
    scans: BTreeMap<ScanKey, ScanSubscription>,
    next_serial: u64,
    next_version: u64,
    last_emitted: Vec<GeoDocumentSnapshot>,
    /// The scan each emitted entry came from.
    emitted_sources: HashMap<DocumentId, ScanKey>,
    emitted_once: bool,
    events_tx: mpsc::UnboundedSender<Envelope>,
    events_rx: mpsc::UnboundedReceiver<Envelope>,
    commands_rx: mpsc::UnboundedReceiver<Command>,
}

impl LiveQueryEngine {
    pub(crate) fn spawn(
        store: Arc<dyn DocumentStore>,
        config: QueryConfig,
        criteria: QueryCriteria,
        callback: SnapshotCallback,
    ) -> ListenerRegistration {
        let (stop, stop_rx) = watch::channel(false);
        let shared = Arc::new(Shared {
            active: AtomicBool::new(true),
            stop,
        });
        let (commands, commands_rx) = mpsc::unbounded_channel();
        let (events_tx, events_rx) = mpsc::unbounded_channel();

        let engine = Self {
            store,
            config,
            criteria,
            callback,
            shared: Arc::clone(&shared),
            scans: BTreeMap::new(),
            next_serial: 0,
            next_version: 0,
            last_emitted: Vec::new(),
            emitted_sources: HashMap::new(),
            emitted_once: false,
            events_tx,
            events_rx,
            commands_rx,
        };
        tokio::spawn(engine.run(stop_rx));

        ListenerRegistration { shared, commands }
    }

    fn is_active(&self) -> bool {
        self.shared.active.load(Ordering::SeqCst)
    }

    async fn run(mut self, mut stop: watch::Receiver<bool>) {
        info!(
            geo_bound = self.criteria.is_geo_bound(),
            precision = self.config.precision,
            "listener started"
        );
        self.reconcile_scans(false);

        while self.is_active() {
            tokio::select! {
                biased;
                _ = stop.changed() => break,
                Some(command) = self.commands_rx.recv() => self.apply(command),
                Some(envelope) = self.events_rx.recv() => self.handle_events(envelope).await,
                else => break,
            }
        }

        for (_, scan) in std::mem::take(&mut self.scans) {
            scan.forwarder.abort();
        }
        info!("listener stopped");
    }

    fn apply(&mut self, command: Command) {
        let (next, resubscribe) = match command {
            Command::Near(near) => (self.criteria.with_near(near), false),
            Command::Filter { field, op, value } => {
                (self.criteria.with_filter(&field, op, value), true)
            }
            Command::Limit(limit) => (
                Ok(self.criteria.with_limit(limit)),
                !self.criteria.is_geo_bound(),
            ),
        };
        match next {
            Ok(criteria) => {
                self.criteria = criteria;
                self.reconcile_scans(resubscribe);
                self.maybe_emit();
            }
            Err(e) => self.deliver(Err(e.into())),
        }
    }

    /// Bring the set of scans in line with the criteria. Unchanged scans keep
    /// their subscription unless `resubscribe_all` is set; closed scans are
    /// always resubscribed.
    fn reconcile_scans(&mut self, resubscribe_all: bool) {
        let desired = match self.criteria.scans(self.config.precision) {
            Ok(scans) => scans,
            Err(e) => {
                self.deliver(Err(e.into()));
                return;
            }
        };
        let wanted: BTreeSet<&ScanKey> = desired.iter().map(|(key, _)| key).collect();

        let stale: Vec<ScanKey> = self
            .scans
            .iter()
            .filter(|(key, scan)| {
                resubscribe_all || scan.state == ScanState::Closed || !wanted.contains(key)
            })
            .map(|(key, _)| key.clone())
            .collect();
        for key in &stale {
            if let Some(scan) = self.scans.remove(key) {
                scan.forwarder.abort();
            }
        }

        let mut added = 0;
        for (key, query) in desired {
            if !self.scans.contains_key(&key) {
                self.subscribe(key, query);
                added += 1;
            }
        }
        debug!(
            cancelled = stale.len(),
            subscribed = added,
            active = self.scans.len(),
            "scans reconciled"
        );
    }

    fn subscribe(&mut self, key: ScanKey, query: StoreQuery) {
        let serial = self.next_serial;
        self.next_serial += 1;
        let forwarder = tokio::spawn(forward(
            Arc::clone(&self.store),
            query,
            key.clone(),
            serial,
            self.events_tx.clone(),
        ));
        self.scans.insert(
            key,
            ScanSubscription {
                serial,
                state: ScanState::Pending,
                documents: BTreeMap::new(),
                forwarder,
            },
        );
    }

    /// Apply `first` and every event already queued behind it, then emit at
    /// most once.
    async fn handle_events(&mut self, first: Envelope) {
        self.handle(first);
        // Let forwarders woken by the same store write catch up.
        tokio::task::yield_now().await;
        while self.is_active() {
            match self.events_rx.try_recv() {
                Ok(envelope) => self.handle(envelope),
                Err(_) => break,
            }
        }
        self.maybe_emit();
    }

    fn handle(&mut self, envelope: Envelope) {
        let Some(scan) = self.scans.get_mut(&envelope.key) else {
            return;
        };
        if scan.serial != envelope.serial {
            return;
        }

        match envelope.batch {
            Some(Ok(batch)) => {
                for change in batch {
                    match change.kind {
                        ChangeKind::Added | ChangeKind::Modified => {
                            let version = self.next_version;
                            self.next_version += 1;
                            scan.documents
                                .insert(change.doc.id.clone(), (version, change.doc));
                        }
                        ChangeKind::Removed => {
                            scan.documents.remove(&change.doc.id);
                        }
                    }
                }
                if scan.state == ScanState::Pending {
                    scan.state = ScanState::Live;
                }
            }
            Some(Err(e)) => {
                warn!(scan = ?envelope.key, error = %e, "scan failed");
                scan.state = ScanState::Closed;
                self.deliver(Err(QueryError::Store(e)));
            }
            None => {
                debug!(scan = ?envelope.key, "scan stream ended");
                scan.state = ScanState::Closed;
            }
        }
    }

    /// Recompute the view and emit it if the listener is ready and
    /// something changed.
    fn maybe_emit(&mut self) {
        if self
            .scans
            .values()
            .any(|scan| scan.state == ScanState::Pending)
        {
            return;
        }

        let mut merged: BTreeMap<&DocumentId, (u64, &ScanKey, &StoredDocument)> = BTreeMap::new();
        for (key, scan) in &self.scans {
            for (id, (version, doc)) in &scan.documents {
                match merged.get(id) {
                    Some((newest, _, _)) if newest > version => {}
                    _ => {
                        merged.insert(id, (*version, key, doc));
                    }
                }
            }
        }
        let view = build_view(merged.values().map(|(_, _, doc)| *doc), &self.criteria);

        let before: HashMap<&DocumentId, &GeoDocumentSnapshot> =
            self.last_emitted.iter().map(|doc| (doc.id(), doc)).collect();
        let after: HashMap<&DocumentId, &GeoDocumentSnapshot> =
            view.iter().map(|doc| (doc.id(), doc)).collect();
        let sources = &self.emitted_sources;
        let crossed_scans = |id: &DocumentId| {
            match (before.get(id), after.get(id), sources.get(id), merged.get(id)) {
                (Some(old), Some(new), Some(source), Some((_, key, _))) => {
                    source != *key && old.location() != new.location()
                }
                _ => false,
            }
        };
        let changes = diff_with_moves(&self.last_emitted, &view, crossed_scans);

        if self.emitted_once {
            if changes.is_empty() {
                return;
            }
        } else {
            self.emitted_once = true;
            if view.is_empty() && !self.config.emit_initial_empty {
                return;
            }
        }

        debug!(size = view.len(), changes = changes.len(), "emitting snapshot");
        self.emitted_sources = view
            .iter()
            .filter_map(|doc| {
                merged
                    .get(doc.id())
                    .map(|(_, key, _)| (doc.id().clone(), (*key).clone()))
            })
            .collect();
        self.last_emitted = view.clone();
        self.deliver(Ok(QuerySnapshot::new(view, changes)));
    }

    fn deliver(&mut self, result: QueryResult<QuerySnapshot>) {
        if self.is_active() {
            (self.callback)(result);
        }
    }
}

/// Subscribe to one scan and pump its stream into the engine.
async fn forward(
    store: Arc<dyn DocumentStore>,
    query: StoreQuery,
    key: ScanKey,
    serial: u64,
    events: mpsc::UnboundedSender<Envelope>,
) {
    let mut stream = match store.subscribe(&query).await {
        Ok(stream) => stream,
        Err(e) => {
            let _ = events.send(Envelope {
                key,
                serial,
                batch: Some(Err(e)),
            });
            return;
        }
    };

    while let Some(batch) = stream.recv().await {
        let terminal = batch.is_err();
        let envelope = Envelope {
            key: key.clone(),
            serial,
            batch: Some(batch),
        };
        if events.send(envelope).is_err() || terminal {
            return;
        }
    }
    let _ = events.send(Envelope {
        key,
        serial,
        batch: None,
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use std::time::Duration;

    use async_trait::async_trait;
    use geoq_store::{
        encode_document, ChangeStream, GetOptions, InMemoryDocumentStore, StoreChange, StoreError,
    };
    use geoq_types::GeoPoint;
    use serde_json::json;
    use tokio::time::timeout;

    use crate::query::GeoQuery;

    const WAIT: Duration = Duration::from_secs(5);
    const QUIET: Duration = Duration::from_millis(150);

    type Snapshots = mpsc::UnboundedReceiver<QueryResult<QuerySnapshot>>;

    fn point(lat: f64, lon: f64) -> GeoPoint {
        GeoPoint::new(lat, lon).unwrap()
    }

    fn geo_doc(lat: f64, lon: f64, data: Value) -> Value {
        let location = point(lat, lon);
        let hash = geoq_hash::encode(&location, 10).unwrap();
        encode_document(&location, &hash, data.as_object().cloned().unwrap())
    }

    /// Degrees of longitude on the equator for `meters`.
    fn east(meters: f64) -> f64 {
        meters / 111_195.0
    }

    fn listen(query: &GeoQuery) -> (ListenerRegistration, Snapshots) {
        let (tx, rx) = mpsc::unbounded_channel();
        let registration = query.on_snapshot(move |result| {
            let _ = tx.send(result);
        });
        (registration, rx)
    }

    async fn next(rx: &mut Snapshots) -> QuerySnapshot {
        timeout(WAIT, rx.recv())
            .await
            .expect("timed out waiting for a snapshot")
            .expect("listener channel closed")
            .expect("listener delivered an error")
    }

    async fn next_error(rx: &mut Snapshots) -> QueryError {
        match timeout(WAIT, rx.recv()).await {
            Ok(Some(Err(e))) => e,
            other => panic!("expected an error, got {other:?}"),
        }
    }

    async fn assert_quiet(rx: &mut Snapshots) {
        assert!(
            timeout(QUIET, rx.recv()).await.is_err(),
            "unexpected snapshot"
        );
    }

    fn ids(snapshot: &QuerySnapshot) -> Vec<&str> {
        snapshot.docs().iter().map(|d| d.id().as_str()).collect()
    }

    fn changes(snapshot: &QuerySnapshot) -> Vec<(ChangeKind, &str, i64, i64)> {
        snapshot
            .doc_changes()
            .iter()
            .map(|c| (c.kind, c.doc.id().as_str(), c.old_index, c.new_index))
            .collect()
    }

    fn near_origin(store: &Arc<InMemoryDocumentStore>, radius: f64) -> GeoQuery {
        let store: Arc<dyn DocumentStore> = store.clone();
        GeoQuery::new(store)
            .near(NearCriteria::new(point(0.0, 0.0), radius))
            .unwrap()
    }

    // ---------------------------------------------------------------
    // Initial state
    // ---------------------------------------------------------------

    #[tokio::test]
    async fn first_snapshot_holds_the_initial_result_set() {
        let store = Arc::new(InMemoryDocumentStore::new());
        store.set("near", geo_doc(0.0, east(100.0), json!({})));
        store.set("nearer", geo_doc(0.0, east(50.0), json!({})));
        store.set("far", geo_doc(0.0, east(5000.0), json!({})));

        let (registration, mut rx) = listen(&near_origin(&store, 1000.0));
        let snapshot = next(&mut rx).await;
        assert_eq!(ids(&snapshot), ["nearer", "near"]);
        assert_eq!(
            changes(&snapshot),
            [
                (ChangeKind::Added, "nearer", -1, 0),
                (ChangeKind::Added, "near", -1, 1)
            ]
        );
        registration.unsubscribe();
    }

    #[tokio::test]
    async fn first_snapshot_is_emitted_even_when_empty() {
        let store = Arc::new(InMemoryDocumentStore::new());
        let (registration, mut rx) = listen(&near_origin(&store, 1000.0));
        let snapshot = next(&mut rx).await;
        assert!(snapshot.is_empty());
        assert!(snapshot.doc_changes().is_empty());
        registration.unsubscribe();
    }

    #[tokio::test]
    async fn empty_first_snapshot_can_be_suppressed() {
        let store = Arc::new(InMemoryDocumentStore::new());
        let config = QueryConfig {
            emit_initial_empty: false,
            ..Default::default()
        };
        let dyn_store: Arc<dyn DocumentStore> = store.clone();
        let query = GeoQuery::with_config(dyn_store, config)
            .unwrap()
            .near(NearCriteria::new(point(0.0, 0.0), 1000.0))
            .unwrap();
        let (registration, mut rx) = listen(&query);
        assert_quiet(&mut rx).await;

        store.set("a", geo_doc(0.0, east(10.0), json!({})));
        let snapshot = next(&mut rx).await;
        assert_eq!(changes(&snapshot), [(ChangeKind::Added, "a", -1, 0)]);
        registration.unsubscribe();
    }

    // ---------------------------------------------------------------
    // Incremental changes
    // ---------------------------------------------------------------

    #[tokio::test]
    async fn documents_entering_and_leaving_the_circle() {
        let store = Arc::new(InMemoryDocumentStore::new());
        store.set("a", geo_doc(0.0, east(100.0), json!({ "v": 1 })));
        let (registration, mut rx) = listen(&near_origin(&store, 1000.0));
        next(&mut rx).await;

        store.set("b", geo_doc(0.0, east(50.0), json!({})));
        let snapshot = next(&mut rx).await;
        assert_eq!(ids(&snapshot), ["b", "a"]);
        assert_eq!(changes(&snapshot), [(ChangeKind::Added, "b", -1, 0)]);

        store.set("a", geo_doc(0.0, east(100.0), json!({ "v": 2 })));
        let snapshot = next(&mut rx).await;
        assert_eq!(changes(&snapshot), [(ChangeKind::Modified, "a", 1, 1)]);

        // Moving out of the radius is a removal without any delete.
        store.set("a", geo_doc(0.0, east(3000.0), json!({ "v": 2 })));
        let snapshot = next(&mut rx).await;
        assert_eq!(changes(&snapshot), [(ChangeKind::Removed, "a", 1, -1)]);

        assert!(store.delete(&"b".into()));
        let snapshot = next(&mut rx).await;
        assert_eq!(changes(&snapshot), [(ChangeKind::Removed, "b", 0, -1)]);
        assert!(snapshot.is_empty());
        registration.unsubscribe();
    }

    #[tokio::test]
    async fn changes_outside_the_circle_are_silent() {
        let store = Arc::new(InMemoryDocumentStore::new());
        let (registration, mut rx) = listen(&near_origin(&store, 1000.0));
        next(&mut rx).await;

        store.set("far", geo_doc(10.0, 10.0, json!({})));
        // Inside a covering range but outside the radius.
        store.set("edge", geo_doc(0.0, east(1100.0), json!({})));
        assert_quiet(&mut rx).await;
        registration.unsubscribe();
    }

    #[tokio::test]
    async fn limit_keeps_the_nearest() {
        let store = Arc::new(InMemoryDocumentStore::new());
        for i in 1..=5 {
            store.set(
                format!("p{i}").as_str(),
                geo_doc(0.0, east(i as f64 * 100.0), json!({})),
            );
        }
        let (registration, mut rx) = listen(&near_origin(&store, 1000.0).limit(2));
        let snapshot = next(&mut rx).await;
        assert_eq!(ids(&snapshot), ["p1", "p2"]);

        store.set("p0", geo_doc(0.0, east(10.0), json!({})));
        let snapshot = next(&mut rx).await;
        assert_eq!(ids(&snapshot), ["p0", "p1"]);
        assert_eq!(
            changes(&snapshot),
            [
                (ChangeKind::Removed, "p2", 1, -1),
                (ChangeKind::Added, "p0", -1, 0)
            ]
        );
        registration.unsubscribe();
    }

    #[tokio::test]
    async fn listener_without_geo_tracks_the_collection() {
        let store = Arc::new(InMemoryDocumentStore::new());
        store.set("legacy", json!({ "name": "foreign" }));
        let dyn_store: Arc<dyn DocumentStore> = store.clone();
        let (registration, mut rx) = listen(&GeoQuery::new(dyn_store));
        let snapshot = next(&mut rx).await;
        assert_eq!(ids(&snapshot), ["legacy"]);
        assert_eq!(snapshot.docs()[0].data(), &json!({ "name": "foreign" }));

        store.set("a", geo_doc(50.0, 50.0, json!({})));
        let snapshot = next(&mut rx).await;
        assert_eq!(ids(&snapshot), ["a", "legacy"]);
        registration.unsubscribe();
    }

    // ---------------------------------------------------------------
    // Registration controls
    // ---------------------------------------------------------------

    #[tokio::test]
    async fn unsubscribe_stops_delivery_and_releases_scans() {
        let store = Arc::new(InMemoryDocumentStore::new());
        let (registration, mut rx) = listen(&near_origin(&store, 1000.0));
        next(&mut rx).await;
        assert!(store.subscriber_count() > 0);

        registration.unsubscribe();
        registration.unsubscribe();
        assert!(!registration.is_active());
        store.set("a", geo_doc(0.0, east(10.0), json!({})));
        assert_quiet(&mut rx).await;

        store.set("b", geo_doc(0.0, east(20.0), json!({})));
        assert_eq!(store.subscriber_count(), 0);
        assert!(matches!(registration.limit(3), Err(QueryError::Closed)));
    }

    #[tokio::test]
    async fn unsubscribe_from_inside_the_callback() {
        let store = Arc::new(InMemoryDocumentStore::new());
        let (tx, mut rx) = mpsc::unbounded_channel();
        let slot: Arc<Mutex<Option<ListenerRegistration>>> = Arc::new(Mutex::new(None));
        let inner = Arc::clone(&slot);
        let registration = near_origin(&store, 1000.0).on_snapshot(move |result| {
            let _ = tx.send(result);
            if let Some(registration) = inner.lock().unwrap().as_ref() {
                registration.unsubscribe();
            }
        });
        *slot.lock().unwrap() = Some(registration.clone());

        store.set("a", geo_doc(0.0, east(10.0), json!({})));
        next(&mut rx).await;
        // The first delivery may have raced the registration being stored.
        store.set("b", geo_doc(0.0, east(20.0), json!({})));
        store.set("c", geo_doc(0.0, east(30.0), json!({})));
        let _ = timeout(QUIET, rx.recv()).await;
        assert!(!registration.is_active());
        assert_quiet(&mut rx).await;
    }

    #[tokio::test]
    async fn near_update_moves_the_circle() {
        let store = Arc::new(InMemoryDocumentStore::new());
        store.set("west", geo_doc(0.0, 0.0, json!({})));
        store.set("east", geo_doc(0.0, 1.0, json!({})));
        let (registration, mut rx) = listen(&near_origin(&store, 1000.0));
        assert_eq!(ids(&next(&mut rx).await), ["west"]);

        registration
            .near(NearCriteria::center(point(0.0, 1.0)))
            .unwrap();
        let snapshot = next(&mut rx).await;
        assert_eq!(ids(&snapshot), ["east"]);
        assert_eq!(
            changes(&snapshot),
            [
                (ChangeKind::Removed, "west", 0, -1),
                (ChangeKind::Added, "east", -1, 0)
            ]
        );

        registration.near(NearCriteria::radius(200_000.0)).unwrap();
        let snapshot = next(&mut rx).await;
        assert_eq!(ids(&snapshot), ["east", "west"]);
        registration.unsubscribe();
    }

    #[tokio::test]
    async fn filter_updates_resubscribe() {
        let store = Arc::new(InMemoryDocumentStore::new());
        store.set("a", geo_doc(0.0, east(100.0), json!({ "open": true })));
        store.set("b", geo_doc(0.0, east(200.0), json!({ "open": false })));
        store.set("c", geo_doc(0.0, east(300.0), json!({ "open": true })));
        let (registration, mut rx) = listen(&near_origin(&store, 1000.0));
        assert_eq!(ids(&next(&mut rx).await), ["a", "b", "c"]);

        registration
            .filter("open", WhereOp::Eq, json!(true))
            .unwrap();
        let snapshot = next(&mut rx).await;
        assert_eq!(ids(&snapshot), ["a", "c"]);
        assert_eq!(changes(&snapshot), [(ChangeKind::Removed, "b", 1, -1)]);

        registration.limit(1).unwrap();
        assert_eq!(ids(&next(&mut rx).await), ["a"]);
        registration.unsubscribe();
    }

    #[tokio::test]
    async fn limit_updates_recompute_without_resubscribing() {
        let store = Arc::new(InMemoryDocumentStore::new());
        for i in 1..=4 {
            store.set(
                format!("p{i}").as_str(),
                geo_doc(0.0, east(i as f64 * 100.0), json!({})),
            );
        }
        let (registration, mut rx) = listen(&near_origin(&store, 1000.0).limit(2));
        assert_eq!(ids(&next(&mut rx).await), ["p1", "p2"]);
        let subscribers = store.subscriber_count();

        registration.limit(1).unwrap();
        let snapshot = next(&mut rx).await;
        assert_eq!(ids(&snapshot), ["p1"]);
        assert_eq!(changes(&snapshot), [(ChangeKind::Removed, "p2", 1, -1)]);

        // Documents cut by the old limit come back without a new scan.
        registration.limit(3).unwrap();
        let snapshot = next(&mut rx).await;
        assert_eq!(ids(&snapshot), ["p1", "p2", "p3"]);
        assert_eq!(store.subscriber_count(), subscribers);
        registration.unsubscribe();
    }

    #[tokio::test]
    async fn invalid_updates_fail_synchronously() {
        let store = Arc::new(InMemoryDocumentStore::new());
        let (registration, mut rx) = listen(&near_origin(&store, 1000.0));
        next(&mut rx).await;

        assert!(matches!(
            registration.near(NearCriteria::default()),
            Err(QueryError::Validation(_))
        ));
        assert!(matches!(
            registration.near(NearCriteria::radius(-5.0)),
            Err(QueryError::Validation(_))
        ));
        assert!(registration.filter("", WhereOp::Eq, json!(1)).is_err());
        assert!(registration.filter("g", WhereOp::Eq, json!(1)).is_err());
        assert_quiet(&mut rx).await;
        registration.unsubscribe();
    }

    // ---------------------------------------------------------------
    // Store failures
    // ---------------------------------------------------------------

    #[tokio::test]
    async fn store_errors_reach_the_callback_and_the_engine_recovers() {
        let store = Arc::new(InMemoryDocumentStore::new());
        store.set("a", geo_doc(0.0, east(100.0), json!({})));
        let (registration, mut rx) = listen(&near_origin(&store, 1000.0));
        next(&mut rx).await;

        store.fail_subscriptions("connection reset");
        assert!(matches!(
            next_error(&mut rx).await,
            QueryError::Store(StoreError::Backend(_))
        ));
        // One error per failed scan; the result set itself is unchanged.
        while let Ok(Some(result)) = timeout(QUIET, rx.recv()).await {
            assert!(result.is_err());
        }

        // The next near update resubscribes every closed scan.
        registration
            .near(NearCriteria::center(point(0.0, east(2000.0))))
            .unwrap();
        store.set("b", geo_doc(0.0, east(2050.0), json!({})));
        let snapshot = loop {
            let snapshot = next(&mut rx).await;
            if ids(&snapshot).contains(&"b") {
                break snapshot;
            }
        };
        assert!(ids(&snapshot).contains(&"b"));
        registration.unsubscribe();
    }

    /// A store whose subscriptions are fed by hand, to control delivery
    /// order across scans.
    #[derive(Default)]
    struct ManualStore {
        subscriptions: Mutex<Vec<(StoreQuery, mpsc::UnboundedSender<StoreResult<ChangeBatch>>)>>,
    }

    #[async_trait]
    impl DocumentStore for ManualStore {
        async fn fetch(
            &self,
            _query: &StoreQuery,
            _options: &GetOptions,
        ) -> StoreResult<Vec<StoredDocument>> {
            Ok(Vec::new())
        }

        async fn subscribe(&self, query: &StoreQuery) -> StoreResult<ChangeStream> {
            let (tx, rx) = mpsc::unbounded_channel();
            self.subscriptions.lock().unwrap().push((query.clone(), tx));
            Ok(rx)
        }
    }

    async fn wait_for_subscriptions(store: &ManualStore, count: usize) {
        timeout(WAIT, async {
            while store.subscriptions.lock().unwrap().len() < count {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("scans never subscribed");
    }

    #[tokio::test]
    async fn first_snapshot_waits_for_every_scan() {
        let store = Arc::new(ManualStore::default());
        let center = point(37.7853074, -122.4054274);
        let criteria = QueryCriteria::new()
            .with_near(NearCriteria::new(center, 3000.0))
            .unwrap();
        let expected = criteria.scans(10).unwrap().len();
        assert!(expected > 1, "need several scans for this test");

        let dyn_store: Arc<dyn DocumentStore> = store.clone();
        let query = GeoQuery::new(dyn_store)
            .near(NearCriteria::new(center, 3000.0))
            .unwrap();
        let (registration, mut rx) = listen(&query);
        wait_for_subscriptions(&store, expected).await;

        let senders: Vec<_> = store
            .subscriptions
            .lock()
            .unwrap()
            .iter()
            .map(|(query, tx)| {
                assert!(query.range.is_some());
                tx.clone()
            })
            .collect();

        // Deliver initial states in reverse order, each carrying one
        // document inside the circle.
        let hash = geoq_hash::encode(&center, 10).unwrap();
        for (i, tx) in senders.iter().enumerate().rev() {
            if i > 0 {
                tx.send(Ok(Vec::new())).unwrap();
                assert_quiet(&mut rx).await;
            } else {
                let doc = StoredDocument::new(
                    "center",
                    encode_document(&center, &hash, serde_json::Map::new()),
                );
                tx.send(Ok(vec![StoreChange::added(doc)])).unwrap();
            }
        }
        let snapshot = next(&mut rx).await;
        assert_eq!(ids(&snapshot), ["center"]);
        registration.unsubscribe();
    }

    #[tokio::test]
    async fn documents_seen_by_two_scans_appear_once() {
        let store = Arc::new(ManualStore::default());
        let center = point(37.7853074, -122.4054274);
        let dyn_store: Arc<dyn DocumentStore> = store.clone();
        let query = GeoQuery::new(dyn_store)
            .near(NearCriteria::new(center, 3000.0))
            .unwrap();
        let expected = query.criteria().scans(10).unwrap().len();
        let (registration, mut rx) = listen(&query);
        wait_for_subscriptions(&store, expected).await;

        let hash = geoq_hash::encode(&center, 10).unwrap();
        let doc = StoredDocument::new(
            "dup",
            encode_document(&center, &hash, serde_json::Map::new()),
        );
        let senders: Vec<_> = store
            .subscriptions
            .lock()
            .unwrap()
            .iter()
            .map(|(_, tx)| tx.clone())
            .collect();
        for tx in &senders {
            tx.send(Ok(vec![StoreChange::added(doc.clone())])).unwrap();
        }
        let snapshot = next(&mut rx).await;
        assert_eq!(ids(&snapshot), ["dup"]);

        // Removal from one scan while another still holds it is not a removal.
        senders[0]
            .send(Ok(vec![StoreChange::removed(doc.clone())]))
            .unwrap();
        assert_quiet(&mut rx).await;
        registration.unsubscribe();
    }

    /// A geo listener on a [`ManualStore`] whose first snapshot holds
    /// `mover` at `from`, delivered by the first scan.
    async fn listen_with_mover(
        from: GeoPoint,
    ) -> (
        ListenerRegistration,
        Snapshots,
        Vec<mpsc::UnboundedSender<StoreResult<ChangeBatch>>>,
    ) {
        let store = Arc::new(ManualStore::default());
        let center = point(37.7853074, -122.4054274);
        let dyn_store: Arc<dyn DocumentStore> = store.clone();
        let query = GeoQuery::new(dyn_store)
            .near(NearCriteria::new(center, 3000.0))
            .unwrap();
        let expected = query.criteria().scans(10).unwrap().len();
        assert!(expected > 1, "need several scans for this test");
        let (registration, mut rx) = listen(&query);
        wait_for_subscriptions(&store, expected).await;

        let senders: Vec<_> = store
            .subscriptions
            .lock()
            .unwrap()
            .iter()
            .map(|(_, tx)| tx.clone())
            .collect();
        for (i, tx) in senders.iter().enumerate() {
            let batch = if i == 0 {
                vec![StoreChange::added(located("mover", from))]
            } else {
                Vec::new()
            };
            tx.send(Ok(batch)).unwrap();
        }
        let snapshot = next(&mut rx).await;
        assert_eq!(ids(&snapshot), ["mover"]);
        (registration, rx, senders)
    }

    fn located(id: &str, location: GeoPoint) -> StoredDocument {
        let hash = geoq_hash::encode(&location, 10).unwrap();
        StoredDocument::new(id, encode_document(&location, &hash, serde_json::Map::new()))
    }

    fn mover_positions() -> (GeoPoint, GeoPoint) {
        (
            point(37.7853074, -122.4054274),
            point(37.7857574, -122.4054274),
        )
    }

    #[tokio::test]
    async fn move_across_scans_removal_first_is_a_removed_added_pair() {
        let (from, to) = mover_positions();
        let (registration, mut rx, senders) = listen_with_mover(from).await;

        senders[0]
            .send(Ok(vec![StoreChange::removed(located("mover", from))]))
            .unwrap();
        senders[1]
            .send(Ok(vec![StoreChange::added(located("mover", to))]))
            .unwrap();
        let snapshot = next(&mut rx).await;
        assert_eq!(
            changes(&snapshot),
            [
                (ChangeKind::Removed, "mover", 0, -1),
                (ChangeKind::Added, "mover", -1, 0)
            ]
        );
        assert_eq!(snapshot.docs()[0].location(), Some(to));
        assert_quiet(&mut rx).await;
        registration.unsubscribe();
    }

    #[tokio::test]
    async fn move_across_scans_addition_first_is_a_removed_added_pair() {
        let (from, to) = mover_positions();
        let (registration, mut rx, senders) = listen_with_mover(from).await;

        senders[1]
            .send(Ok(vec![StoreChange::added(located("mover", to))]))
            .unwrap();
        senders[0]
            .send(Ok(vec![StoreChange::removed(located("mover", from))]))
            .unwrap();
        let snapshot = next(&mut rx).await;
        assert_eq!(
            changes(&snapshot),
            [
                (ChangeKind::Removed, "mover", 0, -1),
                (ChangeKind::Added, "mover", -1, 0)
            ]
        );
        assert_eq!(snapshot.docs()[0].location(), Some(to));
        assert_quiet(&mut rx).await;
        registration.unsubscribe();
    }

    #[tokio::test]
    async fn newest_copy_wins_while_the_old_scan_lags() {
        let (from, to) = mover_positions();
        let (registration, mut rx, senders) = listen_with_mover(from).await;

        // The old scan has not reported the removal yet.
        senders[1]
            .send(Ok(vec![StoreChange::added(located("mover", to))]))
            .unwrap();
        let snapshot = next(&mut rx).await;
        assert_eq!(snapshot.docs()[0].location(), Some(to));
        assert_eq!(
            changes(&snapshot),
            [
                (ChangeKind::Removed, "mover", 0, -1),
                (ChangeKind::Added, "mover", -1, 0)
            ]
        );

        senders[0]
            .send(Ok(vec![StoreChange::removed(located("mover", from))]))
            .unwrap();
        assert_quiet(&mut rx).await;

        // A later move back within the new scan is a plain modification.
        senders[1]
            .send(Ok(vec![StoreChange::modified(located("mover", from))]))
            .unwrap();
        let snapshot = next(&mut rx).await;
        assert_eq!(changes(&snapshot), [(ChangeKind::Modified, "mover", 0, 0)]);
        assert_eq!(snapshot.docs()[0].location(), Some(from));
        registration.unsubscribe();
    }

    #[tokio::test]
    async fn scans_ending_without_a_batch_still_emit() {
        let store = Arc::new(ManualStore::default());
        let dyn_store: Arc<dyn DocumentStore> = store.clone();
        let query = GeoQuery::new(dyn_store)
            .near(NearCriteria::new(point(37.7853074, -122.4054274), 3000.0))
            .unwrap();
        let expected = query.criteria().scans(10).unwrap().len();
        let (registration, mut rx) = listen(&query);
        wait_for_subscriptions(&store, expected).await;
        assert_quiet(&mut rx).await;

        // Every stream closes before reporting an initial state.
        store.subscriptions.lock().unwrap().clear();
        let snapshot = next(&mut rx).await;
        assert!(snapshot.is_empty());
        assert!(snapshot.doc_changes().is_empty());
        assert_quiet(&mut rx).await;
        registration.unsubscribe();
    }

    #[tokio::test]
    async fn subscribe_failures_are_reported() {
        struct FailingStore;

        #[async_trait]
        impl DocumentStore for FailingStore {
            async fn fetch(
                &self,
                _query: &StoreQuery,
                _options: &GetOptions,
            ) -> StoreResult<Vec<StoredDocument>> {
                Err(StoreError::Backend("down".into()))
            }

            async fn subscribe(&self, _query: &StoreQuery) -> StoreResult<ChangeStream> {
                Err(StoreError::Backend("down".into()))
            }
        }

        let store: Arc<dyn DocumentStore> = Arc::new(FailingStore);
        let query = GeoQuery::new(store);
        assert!(matches!(
            query.get(GetOptions::default()).await,
            Err(QueryError::Store(_))
        ));

        let (registration, mut rx) = listen(&query);
        assert!(matches!(next_error(&mut rx).await, QueryError::Store(_)));
        // With its only scan closed the listener emits an empty snapshot.
        assert!(next(&mut rx).await.is_empty());
        registration.unsubscribe();
    }
}
