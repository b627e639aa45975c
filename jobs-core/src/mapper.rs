//! Conversion of raw rows into [`Job`]s

use chrono::SecondsFormat;

use crate::error::{FieldProblem, JobsError, JobsResult};
use crate::job::Job;
use crate::record::{FieldAccess, RawRecord, TIME_COLUMN};

pub const JOB_TYPE_FIELD: &str = "jobType";
pub const VALUE_FIELD: &str = "value";

/// Validates one record and builds a [`Job`] from it.
///
/// Types are checked strictly: `value` must be a double column, a long column
/// is rejected rather than widened. Timestamps are written as whole-second
/// RFC3339 in UTC.
#[derive(Debug, Clone, Copy, Default)]
pub struct RecordMapper;

impl RecordMapper {
    pub fn new() -> Self {
        Self
    }

    pub fn map(&self, record: &RawRecord) -> JobsResult<Job> {
        let job_type = match record.string(JOB_TYPE_FIELD) {
            FieldAccess::Present("") => {
                return Err(JobsError::field_type(JOB_TYPE_FIELD, FieldProblem::Empty))
            }
            FieldAccess::Present(job_type) => job_type.to_string(),
            other => return Err(access_error(JOB_TYPE_FIELD, "string", other)),
        };

        let value = match record.float(VALUE_FIELD) {
            FieldAccess::Present(value) => value,
            other => return Err(access_error(VALUE_FIELD, "double", other)),
        };

        let time = record
            .time()
            .ok_or_else(|| JobsError::field_type(TIME_COLUMN, FieldProblem::Missing))?
            .to_rfc3339_opts(SecondsFormat::Secs, true);

        Ok(Job {
            job_type,
            value,
            time,
        })
    }
}

fn access_error<T>(field: &'static str, expected: &'static str, access: FieldAccess<T>) -> JobsError {
    let problem = match access {
        FieldAccess::WrongType { found } => FieldProblem::WrongType { expected, found },
        FieldAccess::Missing | FieldAccess::Present(_) => FieldProblem::Missing,
    };
    JobsError::field_type(field, problem)
}
