//! Query execution and the fail-fast collection pipeline

use jobs_core::{
    Cursor, JobList, JobsError, JobsResult, QueryClient, QueryShape, RecordMapper, StoreError,
};
use std::{sync::Arc, time::Duration};
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Runs the configured jobs query against a store
#[derive(Clone)]
pub struct QueryExecutor {
    client: Arc<dyn QueryClient>,
    shape: QueryShape,
}

impl QueryExecutor {
    pub fn new(client: Arc<dyn QueryClient>, shape: QueryShape) -> Self {
        Self { client, shape }
    }

    pub fn shape(&self) -> &QueryShape {
        &self.shape
    }

    /// Start the query and hand back its cursor
    pub async fn run(&self, cancel: &CancellationToken) -> JobsResult<Box<dyn Cursor>> {
        let flux = self.shape.to_flux();
        debug!(
            bucket = %self.shape.bucket,
            measurement = %self.shape.measurement,
            range_hours = self.shape.range_hours,
            limit = self.shape.limit,
            "Executing jobs query"
        );
        self.client
            .query(&flux, cancel)
            .await
            .map_err(JobsError::QueryExecution)
    }
}

/// Collects every row of one query into jobs, or fails on the first bad row
#[derive(Clone)]
pub struct JobsPipeline {
    executor: QueryExecutor,
    mapper: RecordMapper,
    timeout: Option<Duration>,
}

impl JobsPipeline {
    pub fn new(executor: QueryExecutor, timeout: Option<Duration>) -> Self {
        Self {
            executor,
            mapper: RecordMapper::new(),
            timeout,
        }
    }

    /// Run the query and map all of its rows.
    ///
    /// The cursor is closed exactly once whatever the outcome, including when
    /// this future is dropped part way. No partial list is ever returned.
    pub async fn collect(&self, cancel: &CancellationToken) -> JobsResult<JobList> {
        let Some(timeout) = self.timeout else {
            return self.collect_with(cancel).await;
        };

        let cancel = cancel.child_token();
        match tokio::time::timeout(timeout, self.collect_with(&cancel)).await {
            Ok(result) => result,
            Err(_elapsed) => {
                cancel.cancel();
                let timeout_ms = timeout.as_millis() as u64;
                debug!(timeout_ms, "Jobs query timed out");
                Err(JobsError::QueryExecution(StoreError::Timeout { timeout_ms }))
            }
        }
    }

    async fn collect_with(&self, cancel: &CancellationToken) -> JobsResult<JobList> {
        let mut cursor = CursorGuard::new(self.executor.run(cancel).await?);
        let result = self.drain(cursor.get()).await;
        cursor.close();
        result
    }

    async fn drain(&self, cursor: &mut dyn Cursor) -> JobsResult<JobList> {
        let mut jobs = JobList::new();

        while cursor.advance().await {
            let record = cursor.current().ok_or_else(|| {
                StoreError::decode("cursor advanced without a current record")
            })?;
            jobs.push(self.mapper.map(record)?);
        }

        if let Some(err) = cursor.err() {
            return Err(JobsError::QueryExecution(err.clone()));
        }

        debug!(jobs = jobs.len(), "Collected jobs");
        Ok(jobs)
    }
}

/// Owns a cursor and closes it once, either explicitly or on drop
struct CursorGuard {
    cursor: Box<dyn Cursor>,
    closed: bool,
}

impl CursorGuard {
    fn new(cursor: Box<dyn Cursor>) -> Self {
        Self {
            cursor,
            closed: false,
        }
    }

    fn get(&mut self) -> &mut dyn Cursor {
        &mut *self.cursor
    }

    fn close(&mut self) {
        if !self.closed {
            self.closed = true;
            self.cursor.close();
        }
    }
}

impl Drop for CursorGuard {
    fn drop(&mut self) {
        if !self.closed {
            debug!("Closing cursor of abandoned jobs query");
            self.close();
        }
    }
}
