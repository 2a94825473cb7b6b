use std::fmt;

use geoq_types::DocumentId;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::query::lookup_path;

/// A raw document as the store returns it: id plus the stored JSON body.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StoredDocument {
    pub id: DocumentId,
    pub data: Value,
}

impl StoredDocument {
    pub fn new(id: impl Into<DocumentId>, data: Value) -> Self {
        Self {
            id: id.into(),
            data,
        }
    }

    /// The stored `g` field, if it is a string.
    pub fn geohash(&self) -> Option<&str> {
        lookup_path(&self.data, crate::codec::GEOHASH_FIELD).and_then(Value::as_str)
    }
}

/// How a document entered, changed within, or left a result set.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeKind {
    Added,
    Modified,
    Removed,
}

impl fmt::Display for ChangeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Added => f.write_str("added"),
            Self::Modified => f.write_str("modified"),
            Self::Removed => f.write_str("removed"),
        }
    }
}

/// One change reported by a store subscription.
///
/// For `Removed`, `doc` carries the last version the subscriber saw.
#[derive(Clone, Debug, PartialEq)]
pub struct StoreChange {
    pub kind: ChangeKind,
    pub doc: StoredDocument,
}

impl StoreChange {
    pub fn added(doc: StoredDocument) -> Self {
        Self {
            kind: ChangeKind::Added,
            doc,
        }
    }

    pub fn modified(doc: StoredDocument) -> Self {
        Self {
            kind: ChangeKind::Modified,
            doc,
        }
    }

    pub fn removed(doc: StoredDocument) -> Self {
        Self {
            kind: ChangeKind::Removed,
            doc,
        }
    }
}

/// All changes a single store notification carries.
pub type ChangeBatch = Vec<StoreChange>;
