//! Metrics collection and reporting for the query service

use jobs_core::JobsError;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Thread-safe metrics collector for the jobs endpoint
#[derive(Debug)]
pub struct QueryMetricsCollector {
    /// Total `/jobs` requests served
    pub requests_total: AtomicU64,

    /// Requests that failed while querying the store
    pub query_errors_total: AtomicU64,

    /// Requests that failed on an invalid record
    pub field_errors_total: AtomicU64,

    /// Requests that failed to encode their response
    pub serialization_errors_total: AtomicU64,

    /// Requests whose query hit the configured deadline
    pub timeouts_total: AtomicU64,

    /// Total jobs returned
    pub jobs_returned_total: AtomicU64,

    /// Total query execution time
    pub query_time_total_ms: AtomicU64,

    /// Slow queries (above threshold)
    pub slow_queries_total: AtomicU64,

    /// Service start time
    start_time: Instant,
}

impl Default for QueryMetricsCollector {
    fn default() -> Self {
        Self {
            requests_total: AtomicU64::new(0),
            query_errors_total: AtomicU64::new(0),
            field_errors_total: AtomicU64::new(0),
            serialization_errors_total: AtomicU64::new(0),
            timeouts_total: AtomicU64::new(0),
            jobs_returned_total: AtomicU64::new(0),
            query_time_total_ms: AtomicU64::new(0),
            slow_queries_total: AtomicU64::new(0),
            start_time: Instant::now(),
        }
    }
}

impl QueryMetricsCollector {
    /// Create a new metrics collector
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a finished request, successful or not
    pub fn record_request(&self, duration: Duration, slow_query_threshold_ms: u64) {
        self.requests_total.fetch_add(1, Ordering::Relaxed);

        let duration_ms = duration.as_millis() as u64;
        self.query_time_total_ms
            .fetch_add(duration_ms, Ordering::Relaxed);

        if duration_ms > slow_query_threshold_ms {
            self.slow_queries_total.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Record jobs handed back to a client
    pub fn record_jobs(&self, count: usize) {
        self.jobs_returned_total
            .fetch_add(count as u64, Ordering::Relaxed);
    }

    /// Record a failed request under its error category
    pub fn record_error(&self, err: &JobsError) {
        let counter = match err.category() {
            "field_type" => &self.field_errors_total,
            "serialization" => &self.serialization_errors_total,
            "timeout" => &self.timeouts_total,
            _ => &self.query_errors_total,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    /// Get current metrics snapshot
    pub fn snapshot(&self) -> QueryMetricsSnapshot {
        let requests = self.requests_total.load(Ordering::Relaxed);
        let total_time = self.query_time_total_ms.load(Ordering::Relaxed);
        let query_errors = self.query_errors_total.load(Ordering::Relaxed);
        let field_errors = self.field_errors_total.load(Ordering::Relaxed);
        let serialization_errors = self.serialization_errors_total.load(Ordering::Relaxed);
        let timeouts = self.timeouts_total.load(Ordering::Relaxed);

        QueryMetricsSnapshot {
            requests_total: requests,
            errors_total: query_errors + field_errors + serialization_errors + timeouts,
            query_errors_total: query_errors,
            field_errors_total: field_errors,
            serialization_errors_total: serialization_errors,
            timeouts_total: timeouts,
            jobs_returned_total: self.jobs_returned_total.load(Ordering::Relaxed),
            query_time_total_ms: total_time,
            slow_queries_total: self.slow_queries_total.load(Ordering::Relaxed),
            uptime_seconds: self.start_time.elapsed().as_secs(),
            avg_query_time_ms: if requests > 0 {
                total_time as f64 / requests as f64
            } else {
                0.0
            },
        }
    }

    /// Generate Prometheus format metrics
    pub fn prometheus_format(&self) -> String {
        let snapshot = self.snapshot();

        format!(
            "# HELP jobs_query_requests_total Total number of /jobs requests\n\
             # TYPE jobs_query_requests_total counter\n\
             jobs_query_requests_total {}\n\
             \n\
             # HELP jobs_query_errors_total Failed /jobs requests by category\n\
             # TYPE jobs_query_errors_total counter\n\
             jobs_query_errors_total{{category=\"query\"}} {}\n\
             jobs_query_errors_total{{category=\"field_type\"}} {}\n\
             jobs_query_errors_total{{category=\"serialization\"}} {}\n\
             jobs_query_errors_total{{category=\"timeout\"}} {}\n\
             \n\
             # HELP jobs_query_jobs_returned_total Total number of jobs returned\n\
             # TYPE jobs_query_jobs_returned_total counter\n\
             jobs_query_jobs_returned_total {}\n\
             \n\
             # HELP jobs_query_time_total_ms Total query execution time in milliseconds\n\
             # TYPE jobs_query_time_total_ms counter\n\
             jobs_query_time_total_ms {}\n\
             \n\
             # HELP jobs_query_slow_queries_total Total number of slow queries\n\
             # TYPE jobs_query_slow_queries_total counter\n\
             jobs_query_slow_queries_total {}\n\
             \n\
             # HELP jobs_query_uptime_seconds Service uptime in seconds\n\
             # TYPE jobs_query_uptime_seconds gauge\n\
             jobs_query_uptime_seconds {}\n\
             \n\
             # HELP jobs_query_avg_time_ms Average query execution time in milliseconds\n\
             # TYPE jobs_query_avg_time_ms gauge\n\
             jobs_query_avg_time_ms {}\n",
            snapshot.requests_total,
            snapshot.query_errors_total,
            snapshot.field_errors_total,
            snapshot.serialization_errors_total,
            snapshot.timeouts_total,
            snapshot.jobs_returned_total,
            snapshot.query_time_total_ms,
            snapshot.slow_queries_total,
            snapshot.uptime_seconds,
            snapshot.avg_query_time_ms,
        )
    }
}

/// Snapshot of query metrics at a point in time
#[derive(Debug, Clone)]
pub struct QueryMetricsSnapshot {
    pub requests_total: u64,
    pub errors_total: u64,
    pub query_errors_total: u64,
    pub field_errors_total: u64,
    pub serialization_errors_total: u64,
    pub timeouts_total: u64,
    pub jobs_returned_total: u64,
    pub query_time_total_ms: u64,
    pub slow_queries_total: u64,
    pub uptime_seconds: u64,
    pub avg_query_time_ms: f64,
}

/// Helper for timing query operations
pub struct QueryTimer {
    start: Instant,
}

impl QueryTimer {
    /// Start a new query timer
    pub fn start() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    /// Get elapsed duration
    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }

    /// Finish timing and record to metrics collector
    pub fn finish(self, collector: &QueryMetricsCollector, slow_threshold_ms: u64) -> Duration {
        let elapsed = self.elapsed();
        collector.record_request(elapsed, slow_threshold_ms);
        elapsed
    }
}
