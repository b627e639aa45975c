//! The `Job` domain record served by the read endpoint

use serde::{Deserialize, Serialize, Serializer};

/// Ordered jobs as returned by one query
pub type JobList = Vec<Job>;

/// One validated job measurement
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Job {
    pub job_type: String,
    #[serde(serialize_with = "serialize_measurement")]
    pub value: f64,
    /// RFC3339 timestamp
    pub time: String,
}

/// Below this every integral f64 converts to i64 exactly.
const MAX_EXACT_INTEGRAL: f64 = 9_007_199_254_740_992.0;

/// Integral values below this are written in plain decimal, larger ones in
/// exponent form.
const MAX_PLAIN_INTEGRAL: f64 = 1e21;

/// Writes integral values without a fractional part (`1`, not `1.0`) and
/// rejects values JSON cannot represent.
fn serialize_measurement<S: Serializer>(value: &f64, serializer: S) -> Result<S::Ok, S::Error> {
    if !value.is_finite() {
        return Err(serde::ser::Error::custom(format!(
            "unsupported value: {}",
            value
        )));
    }

    if value.fract() != 0.0 || value.abs() >= MAX_PLAIN_INTEGRAL {
        return serializer.serialize_f64(*value);
    }

    if value.abs() < MAX_EXACT_INTEGRAL {
        return serializer.serialize_i64(*value as i64);
    }

    // Shortest round-trip digits, so 1.2345678901234567e20 is written as
    // 123456789012345670000 rather than its exact binary expansion.
    match value.to_string().parse::<i128>() {
        Ok(digits) => serializer.serialize_i128(digits),
        Err(_) => serializer.serialize_f64(*value),
    }
}
