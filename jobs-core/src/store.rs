//! Store client abstraction
//!
//! The read path only needs two things from a time-series backend: start a
//! query and walk its result rows. Both traits are object safe so the HTTP
//! layer can hold an `Arc<dyn QueryClient>` and tests can swap in fakes.

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::error::StoreError;
use crate::record::RawRecord;

/// Forward-only, closable iterator over query result rows.
///
/// # Contract
///
/// - `advance` moves to the next row and returns `false` at end of stream or
///   on a terminal error; `err` then reports the error, if any.
/// - `current` returns the row the last successful `advance` moved to.
/// - `close` releases the underlying resources and must be idempotent. After
///   `close`, `advance` returns `false`.
#[async_trait]
pub trait Cursor: Send {
    async fn advance(&mut self) -> bool;

    fn current(&self) -> Option<&RawRecord>;

    fn err(&self) -> Option<&StoreError>;

    fn close(&mut self);
}

/// Issues query text against a store.
///
/// Implementations must be safe to call concurrently from many requests.
/// The cancellation token is observed both while the query is being started
/// and by the returned cursor.
#[async_trait]
pub trait QueryClient: Send + Sync {
    async fn query(
        &self,
        query: &str,
        cancel: &CancellationToken,
    ) -> Result<Box<dyn Cursor>, StoreError>;
}
