use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, RwLock};

use async_trait::async_trait;
use geoq_types::{DocumentData, DocumentId};
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::document::{ChangeBatch, StoreChange, StoredDocument};
use crate::error::{StoreError, StoreResult};
use crate::query::{GetOptions, StoreQuery};
use crate::traits::{ChangeStream, DocumentStore};

/// A live subscription: its query, the result set it last saw, and the
/// sender its batches go out on.
struct Subscriber {
    query: StoreQuery,
    last: Vec<StoredDocument>,
    sender: mpsc::UnboundedSender<StoreResult<ChangeBatch>>,
}

impl Subscriber {
    /// Recompute the result set and send the difference, if any.
    /// Returns `false` once the receiving side is gone.
    fn refresh(&mut self, documents: &BTreeMap<DocumentId, Value>) -> bool {
        let current = self.query.execute(documents);
        let batch = result_set_changes(&self.last, &current);
        self.last = current;
        if batch.is_empty() {
            return !self.sender.is_closed();
        }
        self.sender.send(Ok(batch)).is_ok()
    }
}

/// Changes that turn `old` into `new`: removals first, then additions and
/// modifications in `new` order.
fn result_set_changes(old: &[StoredDocument], new: &[StoredDocument]) -> ChangeBatch {
    let old_by_id: HashMap<&DocumentId, &StoredDocument> =
        old.iter().map(|doc| (&doc.id, doc)).collect();
    let new_by_id: HashMap<&DocumentId, &StoredDocument> =
        new.iter().map(|doc| (&doc.id, doc)).collect();

    let mut batch: ChangeBatch = old
        .iter()
        .filter(|doc| !new_by_id.contains_key(&doc.id))
        .map(|doc| StoreChange::removed(doc.clone()))
        .collect();

    for doc in new {
        match old_by_id.get(&doc.id) {
            None => batch.push(StoreChange::added(doc.clone())),
            Some(previous) if previous.data != doc.data => {
                batch.push(StoreChange::modified(doc.clone()))
            }
            Some(_) => {}
        }
    }
    batch
}

/// In-memory document collection with live subscriptions.
///
/// Intended for tests, demos and embedding. Documents live in a `BTreeMap`
/// behind a `RwLock`. Every write recomputes each subscriber's result set
/// and sends the difference over its channel; subscribers whose receivers
/// were dropped are pruned.
///
/// Lock order is documents, then subscribers.
pub struct InMemoryDocumentStore {
    documents: RwLock<BTreeMap<DocumentId, Value>>,
    subscribers: Mutex<Vec<Subscriber>>,
}

impl InMemoryDocumentStore {
    /// Create a new empty store.
    pub fn new() -> Self {
        Self {
            documents: RwLock::new(BTreeMap::new()),
            subscribers: Mutex::new(Vec::new()),
        }
    }

    /// Number of documents currently stored.
    pub fn len(&self) -> usize {
        self.documents.read().expect("lock poisoned").len()
    }

    /// Returns `true` if the store holds no documents.
    pub fn is_empty(&self) -> bool {
        self.documents.read().expect("lock poisoned").is_empty()
    }

    /// Number of open subscriptions.
    pub fn subscriber_count(&self) -> usize {
        self.subscribers.lock().expect("lock poisoned").len()
    }

    pub fn get(&self, id: &DocumentId) -> Option<Value> {
        self.documents.read().expect("lock poisoned").get(id).cloned()
    }

    /// Create or overwrite a document.
    pub fn set(&self, id: impl Into<DocumentId>, data: Value) {
        let id = id.into();
        debug!(%id, "set document");
        self.documents
            .write()
            .expect("lock poisoned")
            .insert(id, data);
        self.notify();
    }

    /// Store a document under a freshly generated id.
    pub fn add(&self, data: Value) -> DocumentId {
        let id = DocumentId::generate();
        self.set(id.clone(), data);
        id
    }

    /// Apply a partial update. Keys are dotted field paths; intermediate
    /// objects are created as needed.
    pub fn update(&self, id: &DocumentId, fields: DocumentData) -> StoreResult<()> {
        {
            let mut documents = self.documents.write().expect("lock poisoned");
            let doc = documents
                .get_mut(id)
                .ok_or_else(|| StoreError::Backend(format!("no document to update: {id}")))?;
            for (path, value) in fields {
                set_path(doc, &path, value)?;
            }
        }
        debug!(%id, "updated document");
        self.notify();
        Ok(())
    }

    /// Delete a document. Returns `true` if it existed.
    pub fn delete(&self, id: &DocumentId) -> bool {
        let existed = self
            .documents
            .write()
            .expect("lock poisoned")
            .remove(id)
            .is_some();
        if existed {
            debug!(%id, "deleted document");
            self.notify();
        }
        existed
    }

    /// Fail every open subscription with a backend error, as a real store
    /// does when it loses its connection. The affected streams then close.
    pub fn fail_subscriptions(&self, reason: &str) {
        let mut subscribers = self.subscribers.lock().expect("lock poisoned");
        warn!(count = subscribers.len(), reason, "failing subscriptions");
        for subscriber in subscribers.drain(..) {
            let _ = subscriber
                .sender
                .send(Err(StoreError::Backend(reason.to_string())));
        }
    }

    fn notify(&self) {
        let documents = self.documents.read().expect("lock poisoned");
        let mut subscribers = self.subscribers.lock().expect("lock poisoned");
        subscribers.retain_mut(|subscriber| subscriber.refresh(&documents));
    }
}

impl Default for InMemoryDocumentStore {
    fn default() -> Self {
        Self::new()
    }
}

/// Write `value` at a dotted path inside `doc`.
fn set_path(doc: &mut Value, path: &str, value: Value) -> StoreResult<()> {
    let mut segments: Vec<&str> = path.split('.').collect();
    let last = segments
        .pop()
        .filter(|segment| !segment.is_empty())
        .ok_or_else(|| StoreError::InvalidQuery(format!("invalid field path: {path}")))?;

    let mut current = doc;
    for segment in segments {
        let Value::Object(fields) = current else {
            return Err(StoreError::InvalidQuery(format!(
                "field path crosses a non-object: {path}"
            )));
        };
        current = fields
            .entry(segment.to_string())
            .or_insert_with(|| Value::Object(DocumentData::new()));
    }
    match current {
        Value::Object(fields) => {
            fields.insert(last.to_string(), value);
            Ok(())
        }
        _ => Err(StoreError::InvalidQuery(format!(
            "field path crosses a non-object: {path}"
        ))),
    }
}

#[async_trait]
impl DocumentStore for InMemoryDocumentStore {
    async fn fetch(
        &self,
        query: &StoreQuery,
        options: &GetOptions,
    ) -> StoreResult<Vec<StoredDocument>> {
        debug!(range = ?query.range, source = ?options.source, "fetch");
        let documents = self.documents.read().expect("lock poisoned");
        Ok(query.execute(documents.iter()))
    }

    async fn subscribe(&self, query: &StoreQuery) -> StoreResult<ChangeStream> {
        let (sender, receiver) = mpsc::unbounded_channel();
        let documents = self.documents.read().expect("lock poisoned");
        let initial = query.execute(documents.iter());
        let batch = initial.iter().cloned().map(StoreChange::added).collect();
        sender.send(Ok(batch)).map_err(|_| StoreError::Closed)?;

        debug!(range = ?query.range, initial = initial.len(), "subscribed");
        self.subscribers
            .lock()
            .expect("lock poisoned")
            .push(Subscriber {
                query: query.clone(),
                last: initial,
                sender,
            });
        Ok(receiver)
    }
}
