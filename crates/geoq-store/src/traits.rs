use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::document::{ChangeBatch, StoredDocument};
use crate::error::StoreResult;
use crate::query::{GetOptions, StoreQuery};

/// Receiving end of a store subscription.
///
/// Dropping it cancels the subscription; the store prunes the sender on its
/// next delivery attempt.
pub type ChangeStream = mpsc::UnboundedReceiver<StoreResult<ChangeBatch>>;

/// The document store the geo layer runs on.
///
/// Implementations must satisfy these invariants:
/// - `fetch` returns documents in the order [`StoreQuery`] prescribes.
/// - The first batch on a [`ChangeStream`] is the full initial result set,
///   every change `Added`, possibly empty.
/// - Later batches are incremental, carry stable document ids, and describe
///   a document leaving the query's result set as `Removed` even when it was
///   modified rather than deleted.
/// - An `Err` on the stream is terminal for that subscription.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// One-shot read of every document matching `query`.
    async fn fetch(
        &self,
        query: &StoreQuery,
        options: &GetOptions,
    ) -> StoreResult<Vec<StoredDocument>>;

    /// Persistent subscription to the result set of `query`.
    async fn subscribe(&self, query: &StoreQuery) -> StoreResult<ChangeStream>;
}
