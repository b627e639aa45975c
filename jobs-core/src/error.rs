//! Error types for the jobs read path

use std::fmt;

use thiserror::Error;

/// Result type for jobs operations
pub type JobsResult<T> = Result<T, JobsError>;

/// Failures raised by a time-series store client.
///
/// The `Display` output of each variant is the bare cause; callers add
/// their own context when wrapping it.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum StoreError {
    #[error("{0}")]
    Connection(String),

    #[error("unexpected status {status}: {message}")]
    Status { status: u16, message: String },

    #[error("{message}")]
    Query {
        message: String,
        reference: Option<String>,
    },

    #[error("malformed response: {0}")]
    Decode(String),

    #[error("query timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    #[error("query cancelled")]
    Cancelled,
}

impl StoreError {
    pub fn connection<S: Into<String>>(message: S) -> Self {
        Self::Connection(message.into())
    }

    pub fn decode<S: Into<String>>(message: S) -> Self {
        Self::Decode(message.into())
    }
}

/// Why a required field could not be read from a record
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldProblem {
    Missing,
    Empty,
    WrongType {
        expected: &'static str,
        found: &'static str,
    },
}

impl fmt::Display for FieldProblem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldProblem::Missing => write!(f, "field is missing"),
            FieldProblem::Empty => write!(f, "field is empty"),
            FieldProblem::WrongType { expected, found } => {
                write!(f, "expected {}, found {}", expected, found)
            }
        }
    }
}

/// Everything that can go wrong between issuing the query and encoding the response
#[derive(Error, Debug)]
pub enum JobsError {
    #[error("error querying data: {0}")]
    QueryExecution(#[source] StoreError),

    #[error("error parsing {field}: {problem}")]
    FieldType {
        field: &'static str,
        problem: FieldProblem,
    },

    #[error("{0}")]
    Serialization(#[from] serde_json::Error),
}

impl JobsError {
    pub fn field_type(field: &'static str, problem: FieldProblem) -> Self {
        Self::FieldType { field, problem }
    }

    /// Get the error category for monitoring/metrics
    pub fn category(&self) -> &'static str {
        match self {
            JobsError::QueryExecution(StoreError::Timeout { .. }) => "timeout",
            JobsError::QueryExecution(StoreError::Cancelled) => "cancelled",
            JobsError::QueryExecution(_) => "query",
            JobsError::FieldType { .. } => "field_type",
            JobsError::Serialization(_) => "serialization",
        }
    }
}

impl From<StoreError> for JobsError {
    fn from(err: StoreError) -> Self {
        JobsError::QueryExecution(err)
    }
}
