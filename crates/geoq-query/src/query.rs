use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::sync::Arc;

use geoq_hash::calculate_distance;
use geoq_store::{
    decode_document, decode_location, DocumentStore, GetOptions, StoreError, StoredDocument,
    WhereOp,
};
use serde_json::Value;
use tokio::task::JoinSet;
use tracing::debug;

use crate::config::QueryConfig;
use crate::criteria::{NearCriteria, QueryCriteria};
use crate::diff::diff_results;
use crate::engine::{ListenerRegistration, LiveQueryEngine};
use crate::error::QueryResult;
use crate::snapshot::{GeoDocumentSnapshot, QuerySnapshot};

/// A radius query over a document store.
///
/// Values are immutable: `near`, `filter` and `limit` return a new query.
/// Cloning is cheap; the store is shared.
#[derive(Clone)]
pub struct GeoQuery {
    store: Arc<dyn DocumentStore>,
    config: QueryConfig,
    criteria: QueryCriteria,
}

impl GeoQuery {
    /// A query over the whole collection with the default configuration.
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self {
            store,
            config: QueryConfig::default(),
            criteria: QueryCriteria::new(),
        }
    }

    pub fn with_config(store: Arc<dyn DocumentStore>, config: QueryConfig) -> QueryResult<Self> {
        config.validate()?;
        Ok(Self {
            store,
            config,
            criteria: QueryCriteria::new(),
        })
    }

    pub fn config(&self) -> &QueryConfig {
        &self.config
    }

    pub fn criteria(&self) -> &QueryCriteria {
        &self.criteria
    }

    /// Set or update the center and radius (meters).
    pub fn near(&self, near: NearCriteria) -> QueryResult<Self> {
        Ok(self.with_criteria(self.criteria.with_near(near)?))
    }

    /// Add a `where` clause on a payload field.
    pub fn filter(&self, field: &str, op: WhereOp, value: Value) -> QueryResult<Self> {
        Ok(self.with_criteria(self.criteria.with_filter(field, op, value)?))
    }

    /// Keep at most `limit` results; for geo-bound queries, the nearest.
    pub fn limit(&self, limit: usize) -> Self {
        self.with_criteria(self.criteria.with_limit(limit))
    }

    fn with_criteria(&self, criteria: QueryCriteria) -> Self {
        Self {
            store: Arc::clone(&self.store),
            config: self.config.clone(),
            criteria,
        }
    }

    /// Run the query once.
    ///
    /// Every scan is fetched concurrently. The merged results are decoded,
    /// filtered by distance and `where` clauses, ordered, and truncated.
    /// Each entry is reported as `added`.
    pub async fn get(&self, options: GetOptions) -> QueryResult<QuerySnapshot> {
        let scans = self.criteria.scans(self.config.precision)?;
        debug!(scans = scans.len(), source = ?options.source, "get");

        let mut fetches = JoinSet::new();
        for (_, query) in scans {
            let store = Arc::clone(&self.store);
            fetches.spawn(async move { store.fetch(&query, &options).await });
        }

        let mut candidates = BTreeMap::new();
        while let Some(joined) = fetches.join_next().await {
            let docs = joined
                .map_err(|e| StoreError::Backend(format!("fetch task failed: {e}")))??;
            for doc in docs {
                candidates.insert(doc.id.clone(), doc);
            }
        }

        let docs = build_view(candidates.values(), &self.criteria);
        let changes = diff_results(&[], &docs);
        Ok(QuerySnapshot::new(docs, changes))
    }

    /// Start a live listener.
    ///
    /// `callback` receives the first snapshot once every scan has delivered
    /// its initial state, then one snapshot per non-empty change. Store
    /// failures arrive as `Err`; the listener keeps running. Must be called
    /// from within a tokio runtime.
    pub fn on_snapshot<F>(&self, callback: F) -> ListenerRegistration
    where
        F: FnMut(QueryResult<QuerySnapshot>) + Send + 'static,
    {
        LiveQueryEngine::spawn(
            Arc::clone(&self.store),
            self.config.clone(),
            self.criteria.clone(),
            Box::new(callback),
        )
    }
}

/// Turn raw candidates into the ordered, limited result set.
///
/// Geo-bound queries drop documents without a valid location and those
/// outside the radius. Candidates must be unique by id.
pub(crate) fn build_view<'a, I>(candidates: I, criteria: &QueryCriteria) -> Vec<GeoDocumentSnapshot>
where
    I: IntoIterator<Item = &'a StoredDocument>,
{
    let center = criteria.center();
    let radius_km = criteria.radius().map(|meters| meters / 1000.0);

    let mut entries: Vec<GeoDocumentSnapshot> = candidates
        .into_iter()
        .filter_map(|doc| {
            let location = decode_location(&doc.data);
            let distance = match (center, location) {
                (Some(c), Some(l)) => calculate_distance(&c, &l).ok(),
                _ => None,
            };
            if criteria.is_geo_bound() {
                match (distance, radius_km) {
                    (Some(d), Some(r)) if d <= r => {}
                    _ => return None,
                }
            }
            let payload = decode_document(&doc.data);
            if !criteria.matches_filters(&payload) {
                return None;
            }
            Some(GeoDocumentSnapshot::new(
                doc.id.clone(),
                payload,
                location,
                distance,
            ))
        })
        .collect();

    if center.is_some() {
        entries.sort_by(|a, b| {
            by_distance(a.distance(), b.distance()).then_with(|| a.id().cmp(b.id()))
        });
    } else {
        entries.sort_by(|a, b| a.id().cmp(b.id()));
    }

    if let Some(limit) = criteria.limit() {
        entries.truncate(limit);
    }
    for (rank, entry) in entries.iter_mut().enumerate() {
        entry.set_rank(rank);
    }
    entries
}

/// Ascending distance; entries without one sort last.
fn by_distance(a: Option<f64>, b: Option<f64>) -> Ordering {
    match (a, b) {
        (Some(x), Some(y)) => x.total_cmp(&y),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
}
