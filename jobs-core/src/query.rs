//! Shape of the fixed time-window query and its Flux rendering

use serde::{Deserialize, Serialize};

/// Parameters of the jobs query. Everything else about the query is fixed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueryShape {
    /// Bucket to read from
    pub bucket: String,

    /// Measurement the rows are filtered to
    pub measurement: String,

    /// Look-back window, in hours, ending now
    pub range_hours: u64,

    /// Maximum number of pivoted rows per table
    pub limit: usize,
}

impl Default for QueryShape {
    fn default() -> Self {
        Self {
            bucket: "my-bucket".to_string(),
            measurement: "jobs".to_string(),
            range_hours: 1000,
            limit: 10,
        }
    }
}

impl QueryShape {
    /// Render the Flux query text.
    ///
    /// Rows are pivoted on `_time` so each returned record holds every field
    /// written at that timestamp.
    pub fn to_flux(&self) -> String {
        format!(
            "from(bucket: \"{bucket}\")\n    \
             |> range(start: -{range}h)\n    \
             |> filter(fn: (r) => r[\"_measurement\"] == \"{measurement}\")\n    \
             |> pivot(rowKey:[\"_time\"], columnKey: [\"_field\"], valueColumn: \"_value\")\n    \
             |> limit(n: {limit})",
            bucket = escape_flux_string(&self.bucket),
            range = self.range_hours,
            measurement = escape_flux_string(&self.measurement),
            limit = self.limit,
        )
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.bucket.trim().is_empty() {
            return Err("query bucket cannot be empty".to_string());
        }
        if self.measurement.trim().is_empty() {
            return Err("query measurement cannot be empty".to_string());
        }
        if self.range_hours == 0 {
            return Err("query range must be at least one hour".to_string());
        }
        if self.limit == 0 {
            return Err("query limit must be greater than 0".to_string());
        }
        Ok(())
    }
}

/// Escape a value for use inside a Flux double-quoted string literal
fn escape_flux_string(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '\\' => escaped.push_str("\\\\"),
            '"' => escaped.push_str("\\\""),
            '$' => escaped.push_str("\\$"),
            '\n' => escaped.push_str("\\n"),
            '\r' => escaped.push_str("\\r"),
            '\t' => escaped.push_str("\\t"),
            _ => escaped.push(c),
        }
    }
    escaped
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_shape_renders_the_jobs_query() {
        let flux = QueryShape::default().to_flux();
        assert_eq!(
            flux,
            "from(bucket: \"my-bucket\")\n    \
             |> range(start: -1000h)\n    \
             |> filter(fn: (r) => r[\"_measurement\"] == \"jobs\")\n    \
             |> pivot(rowKey:[\"_time\"], columnKey: [\"_field\"], valueColumn: \"_value\")\n    \
             |> limit(n: 10)"
        );
    }

    #[test]
    fn window_and_limit_come_from_the_shape() {
        let shape = QueryShape {
            bucket: "ci".to_string(),
            measurement: "builds".to_string(),
            range_hours: 24,
            limit: 500,
        };
        let flux = shape.to_flux();
        assert!(flux.starts_with("from(bucket: \"ci\")"));
        assert!(flux.contains("range(start: -24h)"));
        assert!(flux.contains("== \"builds\")"));
        assert!(flux.ends_with("limit(n: 500)"));
    }

    #[test]
    fn string_literals_are_escaped() {
        let shape = QueryShape {
            measurement: "jobs\") |> drop(columns: [\"x".to_string(),
            ..QueryShape::default()
        };
        assert!(shape
            .to_flux()
            .contains(r#"== "jobs\") |> drop(columns: [\"x")"#));
    }

    #[test]
    fn validate_rejects_degenerate_shapes() {
        assert!(QueryShape::default().validate().is_ok());
        assert!(QueryShape {
            limit: 0,
            ..QueryShape::default()
        }
        .validate()
        .is_err());
        assert!(QueryShape {
            range_hours: 0,
            ..QueryShape::default()
        }
        .validate()
        .is_err());
        assert!(QueryShape {
            bucket: " ".to_string(),
            ..QueryShape::default()
        }
        .validate()
        .is_err());
    }
}
