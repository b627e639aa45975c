//! # Jobs Core Library
//!
//! Shared types for the jobs telemetry read service.
//!
//! ## Features
//!
//! - **Domain**: the validated [`Job`] record and its JSON form
//! - **Records**: untyped query rows with typed field access
//! - **Store**: object-safe query client and cursor traits
//! - **Mapping**: strict conversion of rows into jobs
//! - **Query**: the configurable shape of the jobs query and its Flux text

pub mod error;
pub mod job;
pub mod mapper;
pub mod query;
pub mod record;
pub mod store;

// Re-export commonly used types
pub use error::{FieldProblem, JobsError, JobsResult, StoreError};
pub use job::{Job, JobList};
pub use mapper::RecordMapper;
pub use query::QueryShape;
pub use record::{FieldAccess, FieldValue, RawRecord};
pub use store::{Cursor, QueryClient};

/// Version information for the jobs service
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
