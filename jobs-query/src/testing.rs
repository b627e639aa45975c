//! In-memory query client for unit and API tests
//!
//! The fake records every query it receives and counts cursor activity so
//! tests can check how the pipeline drives a cursor.

use async_trait::async_trait;
use jobs_core::{Cursor, QueryClient, RawRecord, StoreError};
use parking_lot::Mutex;
use std::{
    collections::VecDeque,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
    time::Duration,
};
use tokio_util::sync::CancellationToken;

/// What the fake store answers to every query
#[derive(Debug, Clone)]
pub enum FakeQueryResult {
    /// Yield these rows, then end cleanly
    Rows(Vec<RawRecord>),
    /// Yield these rows, then fail mid-stream
    RowsThenError(Vec<RawRecord>, StoreError),
    /// Refuse to start the query
    Fail(StoreError),
}

impl FakeQueryResult {
    pub fn rows(rows: Vec<RawRecord>) -> Self {
        FakeQueryResult::Rows(rows)
    }
}

#[derive(Debug, Default)]
struct FakeStats {
    queries: Mutex<Vec<String>>,
    closes: AtomicUsize,
    rows_read: AtomicUsize,
}

/// Scripted [`QueryClient`]
pub struct FakeQueryClient {
    result: FakeQueryResult,
    advance_delay: Option<Duration>,
    stats: Arc<FakeStats>,
}

impl FakeQueryClient {
    pub fn new(result: FakeQueryResult) -> Self {
        Self {
            result,
            advance_delay: None,
            stats: Arc::new(FakeStats::default()),
        }
    }

    /// Make every `advance` wait this long, as a slow network would
    pub fn with_advance_delay(mut self, delay: Duration) -> Self {
        self.advance_delay = Some(delay);
        self
    }

    /// Query texts received so far
    pub fn queries(&self) -> Vec<String> {
        self.stats.queries.lock().clone()
    }

    /// Number of `close` calls across all cursors
    pub fn close_count(&self) -> usize {
        self.stats.closes.load(Ordering::SeqCst)
    }

    /// Number of rows handed out across all cursors
    pub fn rows_read(&self) -> usize {
        self.stats.rows_read.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl QueryClient for FakeQueryClient {
    async fn query(
        &self,
        query: &str,
        cancel: &CancellationToken,
    ) -> Result<Box<dyn Cursor>, StoreError> {
        self.stats.queries.lock().push(query.to_string());

        let (rows, tail_error) = match &self.result {
            FakeQueryResult::Fail(err) => return Err(err.clone()),
            FakeQueryResult::Rows(rows) => (rows.clone(), None),
            FakeQueryResult::RowsThenError(rows, err) => (rows.clone(), Some(err.clone())),
        };

        Ok(Box::new(FakeCursor {
            rows: rows.into(),
            tail_error,
            current: None,
            error: None,
            closed: false,
            delay: self.advance_delay,
            cancel: cancel.clone(),
            stats: self.stats.clone(),
        }))
    }
}

struct FakeCursor {
    rows: VecDeque<RawRecord>,
    tail_error: Option<StoreError>,
    current: Option<RawRecord>,
    error: Option<StoreError>,
    closed: bool,
    delay: Option<Duration>,
    cancel: CancellationToken,
    stats: Arc<FakeStats>,
}

#[async_trait]
impl Cursor for FakeCursor {
    async fn advance(&mut self) -> bool {
        self.current = None;
        if self.closed || self.error.is_some() {
            return false;
        }

        let cancelled = match self.delay {
            Some(delay) => tokio::select! {
                biased;
                _ = self.cancel.cancelled() => true,
                _ = tokio::time::sleep(delay) => false,
            },
            None => self.cancel.is_cancelled(),
        };
        if cancelled {
            self.error = Some(StoreError::Cancelled);
            return false;
        }

        match self.rows.pop_front() {
            Some(row) => {
                self.stats.rows_read.fetch_add(1, Ordering::SeqCst);
                self.current = Some(row);
                true
            }
            None => {
                self.error = self.tail_error.take();
                false
            }
        }
    }

    fn current(&self) -> Option<&RawRecord> {
        self.current.as_ref()
    }

    fn err(&self) -> Option<&StoreError> {
        self.error.as_ref()
    }

    fn close(&mut self) {
        self.stats.closes.fetch_add(1, Ordering::SeqCst);
        self.closed = true;
        self.current = None;
    }
}
