use geoq_store::{lookup_path, ChangeKind};
use geoq_types::{DocumentId, GeoPoint};
use serde::Serialize;
use serde_json::Value;

/// One document in a query result.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct GeoDocumentSnapshot {
    id: DocumentId,
    data: Value,
    location: Option<GeoPoint>,
    distance: Option<f64>,
    rank: usize,
}

impl GeoDocumentSnapshot {
    pub fn new(
        id: DocumentId,
        data: Value,
        location: Option<GeoPoint>,
        distance: Option<f64>,
    ) -> Self {
        Self {
            id,
            data,
            location,
            distance,
            rank: 0,
        }
    }

    pub fn id(&self) -> &DocumentId {
        &self.id
    }

    /// The decoded payload (or the raw body of a foreign document).
    pub fn data(&self) -> &Value {
        &self.data
    }

    /// A payload field by dotted path.
    pub fn get(&self, field: &str) -> Option<&Value> {
        lookup_path(&self.data, field)
    }

    pub fn location(&self) -> Option<GeoPoint> {
        self.location
    }

    /// Distance from the query center in kilometers; `None` when the query
    /// has no center or the document has no location.
    pub fn distance(&self) -> Option<f64> {
        self.distance
    }

    pub fn distance_meters(&self) -> Option<f64> {
        self.distance.map(|km| km * 1000.0)
    }

    /// Position within the snapshot this entry belongs to.
    pub fn rank(&self) -> usize {
        self.rank
    }

    pub(crate) fn set_rank(&mut self, rank: usize) {
        self.rank = rank;
    }

    /// Returns `true` if the two entries differ in anything other than
    /// their position.
    pub(crate) fn content_differs(&self, other: &Self) -> bool {
        self.data != other.data || self.distance != other.distance || self.location != other.location
    }
}

/// How one document's membership or content changed between snapshots.
///
/// Indexes are positions in the previous and current snapshot, `-1` where
/// the document is absent.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct DocumentChange {
    pub kind: ChangeKind,
    pub doc: GeoDocumentSnapshot,
    pub old_index: i64,
    pub new_index: i64,
}

/// An ordered result set plus the changes that produced it.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct QuerySnapshot {
    docs: Vec<GeoDocumentSnapshot>,
    changes: Vec<DocumentChange>,
}

impl QuerySnapshot {
    pub fn new(docs: Vec<GeoDocumentSnapshot>, changes: Vec<DocumentChange>) -> Self {
        Self { docs, changes }
    }

    pub fn docs(&self) -> &[GeoDocumentSnapshot] {
        &self.docs
    }

    pub fn doc_changes(&self) -> &[DocumentChange] {
        &self.changes
    }

    pub fn size(&self) -> usize {
        self.docs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.docs.is_empty()
    }

    pub fn into_docs(self) -> Vec<GeoDocumentSnapshot> {
        self.docs
    }
}
