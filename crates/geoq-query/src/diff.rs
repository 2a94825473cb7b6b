//! Result-set diff: compare two ordered snapshots.
//!
//! Entries are matched by document id. Removals come first in old order,
//! then additions and modifications in new order.

use std::collections::HashMap;

use geoq_store::ChangeKind;
use geoq_types::DocumentId;

use crate::snapshot::{DocumentChange, GeoDocumentSnapshot};

/// Compute the changes that turn `old` into `new`.
///
/// An entry present in both is `Modified` when its payload, location or
/// distance changed; a pure reordering produces no event.
pub fn diff_results(old: &[GeoDocumentSnapshot], new: &[GeoDocumentSnapshot]) -> Vec<DocumentChange> {
    diff_with_moves(old, new, |_| false)
}

/// Like [`diff_results`], except that an entry present in both for which
/// `moved` returns `true` is reported as `Removed` at its old position and
/// `Added` at its new one.
pub fn diff_with_moves<F>(
    old: &[GeoDocumentSnapshot],
    new: &[GeoDocumentSnapshot],
    moved: F,
) -> Vec<DocumentChange>
where
    F: Fn(&DocumentId) -> bool,
{
    let old_index: HashMap<&DocumentId, usize> = old
        .iter()
        .enumerate()
        .map(|(i, doc)| (doc.id(), i))
        .collect();
    let new_index: HashMap<&DocumentId, usize> = new
        .iter()
        .enumerate()
        .map(|(i, doc)| (doc.id(), i))
        .collect();

    let mut changes = Vec::new();

    for (i, doc) in old.iter().enumerate() {
        if !new_index.contains_key(doc.id()) || moved(doc.id()) {
            changes.push(DocumentChange {
                kind: ChangeKind::Removed,
                doc: doc.clone(),
                old_index: i as i64,
                new_index: -1,
            });
        }
    }

    for (i, doc) in new.iter().enumerate() {
        match old_index.get(doc.id()) {
            None => changes.push(DocumentChange {
                kind: ChangeKind::Added,
                doc: doc.clone(),
                old_index: -1,
                new_index: i as i64,
            }),
            Some(_) if moved(doc.id()) => changes.push(DocumentChange {
                kind: ChangeKind::Added,
                doc: doc.clone(),
                old_index: -1,
                new_index: i as i64,
            }),
            Some(&j) if old[j].content_differs(doc) => changes.push(DocumentChange {
                kind: ChangeKind::Modified,
                doc: doc.clone(),
                old_index: j as i64,
                new_index: i as i64,
            }),
            Some(_) => {}
        }
    }

    changes
}
