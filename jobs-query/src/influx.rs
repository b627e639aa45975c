//! InfluxDB v2 query client
//!
//! Flux is posted to `/api/v2/query` and the annotated CSV response is decoded
//! lazily: the body is pulled chunk by chunk and rows are produced as complete
//! lines become available.

use async_trait::async_trait;
use base64::prelude::*;
use chrono::{DateTime, Utc};
use jobs_core::{Cursor, FieldValue, QueryClient, RawRecord, StoreError};
use reqwest::header::{ACCEPT, AUTHORIZATION, CONTENT_TYPE};
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::config::InfluxConfig;

/// Query client for a single InfluxDB organization
#[derive(Clone)]
pub struct InfluxClient {
    http: reqwest::Client,
    query_url: String,
    token: String,
    org: String,
}

#[derive(Debug, Deserialize)]
struct InfluxErrorBody {
    message: String,
}

impl InfluxClient {
    pub fn new(config: &InfluxConfig) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            .connect_timeout(Duration::from_millis(config.connect_timeout_ms))
            .build()?;

        Ok(Self {
            http,
            query_url: format!("{}/api/v2/query", config.url.trim_end_matches('/')),
            token: config.token.clone(),
            org: config.org.clone(),
        })
    }

    fn request_body(query: &str) -> Result<Vec<u8>, StoreError> {
        let body = json!({
            "query": query,
            "type": "flux",
            "dialect": {
                "header": true,
                "delimiter": ",",
                "annotations": ["datatype", "group", "default"],
                "commentPrefix": "#",
                "dateTimeFormat": "RFC3339",
            },
        });
        serde_json::to_vec(&body).map_err(|err| StoreError::decode(err.to_string()))
    }
}

#[async_trait]
impl QueryClient for InfluxClient {
    async fn query(
        &self,
        query: &str,
        cancel: &CancellationToken,
    ) -> Result<Box<dyn Cursor>, StoreError> {
        let request = self
            .http
            .post(&self.query_url)
            .query(&[("org", self.org.as_str())])
            .header(AUTHORIZATION, format!("Token {}", self.token))
            .header(ACCEPT, "application/csv")
            .header(CONTENT_TYPE, "application/json")
            .body(Self::request_body(query)?);

        let response = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(StoreError::Cancelled),
            response = request.send() => {
                response.map_err(|err| StoreError::connection(err.to_string()))?
            }
        };

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            let message = serde_json::from_str::<InfluxErrorBody>(&text)
                .map(|body| body.message)
                .unwrap_or(text);
            return Err(StoreError::Status {
                status: status.as_u16(),
                message,
            });
        }

        debug!("InfluxDB accepted query, streaming results");
        Ok(Box::new(CsvCursor::new(response, cancel.clone())))
    }
}

/// Source of raw response bytes
#[async_trait]
pub trait ChunkSource: Send {
    /// Next chunk of the body, or `None` once the body is exhausted
    async fn next_chunk(&mut self) -> Result<Option<Vec<u8>>, StoreError>;
}

#[async_trait]
impl ChunkSource for reqwest::Response {
    async fn next_chunk(&mut self) -> Result<Option<Vec<u8>>, StoreError> {
        self.chunk()
            .await
            .map(|chunk| chunk.map(|bytes| bytes.to_vec()))
            .map_err(|err| StoreError::connection(err.to_string()))
    }
}

/// Cursor over an annotated CSV body
pub struct CsvCursor<S> {
    source: Option<S>,
    cancel: CancellationToken,
    buffer: Vec<u8>,
    scan_pos: usize,
    in_quotes: bool,
    eof: bool,
    closed: bool,
    decoder: AnnotatedCsvDecoder,
    current: Option<RawRecord>,
    error: Option<StoreError>,
}

impl<S: ChunkSource> CsvCursor<S> {
    pub fn new(source: S, cancel: CancellationToken) -> Self {
        Self {
            source: Some(source),
            cancel,
            buffer: Vec::new(),
            scan_pos: 0,
            in_quotes: false,
            eof: false,
            closed: false,
            decoder: AnnotatedCsvDecoder::default(),
            current: None,
            error: None,
        }
    }

    /// Split the next complete line off the buffer. Newlines inside quoted
    /// cells do not end a line.
    fn take_line(&mut self) -> Option<Vec<u8>> {
        while self.scan_pos < self.buffer.len() {
            let byte = self.buffer[self.scan_pos];
            self.scan_pos += 1;
            match byte {
                b'"' => self.in_quotes = !self.in_quotes,
                b'\n' if !self.in_quotes => {
                    let mut line: Vec<u8> = self.buffer.drain(..self.scan_pos).collect();
                    self.scan_pos = 0;
                    line.pop();
                    if line.last() == Some(&b'\r') {
                        line.pop();
                    }
                    return Some(line);
                }
                _ => {}
            }
        }

        if self.eof && !self.buffer.is_empty() {
            self.scan_pos = 0;
            self.in_quotes = false;
            return Some(std::mem::take(&mut self.buffer));
        }

        None
    }

    fn fail(&mut self, err: StoreError) {
        self.error = Some(err);
        self.source = None;
        self.buffer.clear();
    }
}

#[async_trait]
impl<S: ChunkSource> Cursor for CsvCursor<S> {
    async fn advance(&mut self) -> bool {
        self.current = None;
        if self.closed || self.error.is_some() {
            return false;
        }

        loop {
            if let Some(line) = self.take_line() {
                match self.decoder.decode_line(&line) {
                    Ok(Some(record)) => {
                        self.current = Some(record);
                        return true;
                    }
                    Ok(None) => continue,
                    Err(err) => {
                        self.fail(err);
                        return false;
                    }
                }
            }

            if self.eof {
                self.source = None;
                return false;
            }

            let Some(source) = self.source.as_mut() else {
                return false;
            };

            let next = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => Err(StoreError::Cancelled),
                chunk = source.next_chunk() => chunk,
            };

            match next {
                Ok(Some(chunk)) => self.buffer.extend_from_slice(&chunk),
                Ok(None) => self.eof = true,
                Err(err) => {
                    self.fail(err);
                    return false;
                }
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
        if self.closed {
            return;
        }
        self.closed = true;
        self.source = None;
        self.current = None;
        self.buffer.clear();
    }
}

/// Line-at-a-time decoder for InfluxDB annotated CSV.
///
/// A table is a run of annotation rows, one header row and data rows. A blank
/// line ends the table.
#[derive(Debug, Default)]
pub struct AnnotatedCsvDecoder {
    datatypes: Vec<String>,
    defaults: Vec<String>,
    columns: Vec<String>,
    error_table: bool,
}

impl AnnotatedCsvDecoder {
    /// Feed one line. Returns a record for data rows and `None` for
    /// annotations, headers and table separators.
    pub fn decode_line(&mut self, line: &[u8]) -> Result<Option<RawRecord>, StoreError> {
        if line.iter().all(|b| b.is_ascii_whitespace()) {
            self.reset();
            return Ok(None);
        }

        let cells = parse_cells(line)?;
        let annotation = cells.first().filter(|c| c.starts_with('#')).cloned();

        if let Some(annotation) = annotation {
            if !self.columns.is_empty() {
                self.reset();
            }
            match annotation.as_str() {
                "#datatype" => self.datatypes = cells,
                "#default" => self.defaults = cells,
                _ => {}
            }
            return Ok(None);
        }

        if self.columns.is_empty() {
            self.error_table = cells == ["", "error", "reference"];
            self.columns = cells;
            return Ok(None);
        }

        if self.error_table {
            return Err(self.query_error(&cells));
        }

        self.decode_row(&cells).map(Some)
    }

    fn reset(&mut self) {
        self.datatypes.clear();
        self.defaults.clear();
        self.columns.clear();
        self.error_table = false;
    }

    fn cell<'a>(&'a self, cells: &'a [String], idx: usize) -> &'a str {
        match cells.get(idx).map(String::as_str) {
            Some(value) if !value.is_empty() => value,
            _ => self.defaults.get(idx).map(String::as_str).unwrap_or_default(),
        }
    }

    fn query_error(&self, cells: &[String]) -> StoreError {
        let mut message = String::new();
        let mut reference = None;
        for (idx, column) in self.columns.iter().enumerate() {
            match column.as_str() {
                "error" => message = self.cell(cells, idx).to_string(),
                "reference" => {
                    let value = self.cell(cells, idx);
                    if !value.is_empty() {
                        reference = Some(value.to_string());
                    }
                }
                _ => {}
            }
        }
        StoreError::Query { message, reference }
    }

    fn decode_row(&self, cells: &[String]) -> Result<RawRecord, StoreError> {
        let mut record = RawRecord::new();
        for (idx, column) in self.columns.iter().enumerate() {
            if column.is_empty() {
                continue;
            }
            let raw = self.cell(cells, idx);
            if raw.is_empty() {
                continue;
            }
            let datatype = self
                .datatypes
                .get(idx)
                .map(String::as_str)
                .unwrap_or("string");
            record.insert(column.as_str(), convert_cell(column, datatype, raw)?);
        }
        Ok(record)
    }
}

fn parse_cells(line: &[u8]) -> Result<Vec<String>, StoreError> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_reader(line);
    let mut record = csv::StringRecord::new();
    match reader.read_record(&mut record) {
        Ok(true) => Ok(record.iter().map(str::to_string).collect()),
        Ok(false) => Ok(Vec::new()),
        Err(err) => Err(StoreError::decode(err.to_string())),
    }
}

fn convert_cell(column: &str, datatype: &str, raw: &str) -> Result<FieldValue, StoreError> {
    let invalid = || StoreError::decode(format!("column {}: invalid {} value {:?}", column, datatype, raw));

    let value = match datatype {
        "double" => FieldValue::Float(match raw {
            "+Inf" | "Inf" => f64::INFINITY,
            "-Inf" => f64::NEG_INFINITY,
            _ => raw.parse().map_err(|_| invalid())?,
        }),
        "long" => FieldValue::Integer(raw.parse().map_err(|_| invalid())?),
        "unsignedLong" => FieldValue::UInteger(raw.parse().map_err(|_| invalid())?),
        "boolean" => FieldValue::Boolean(match raw {
            "true" => true,
            "false" => false,
            _ => return Err(invalid()),
        }),
        "duration" => FieldValue::Duration(raw.to_string()),
        "base64Binary" => FieldValue::Binary(
            BASE64_STANDARD
                .decode(raw.as_bytes())
                .map_err(|_| invalid())?,
        ),
        dt if dt.starts_with("dateTime") => FieldValue::Time(
            DateTime::parse_from_rfc3339(raw)
                .map_err(|_| invalid())?
                .with_timezone(&Utc),
        ),
        _ => FieldValue::String(raw.to_string()),
    };
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use std::collections::VecDeque;

    struct ScriptedBody {
        chunks: VecDeque<Result<Vec<u8>, StoreError>>,
    }

    impl ScriptedBody {
        fn split(body: &str, size: usize) -> Self {
            Self {
                chunks: body
                    .as_bytes()
                    .chunks(size)
                    .map(|c| Ok(c.to_vec()))
                    .collect(),
            }
        }
    }

    #[async_trait]
    impl ChunkSource for ScriptedBody {
        async fn next_chunk(&mut self) -> Result<Option<Vec<u8>>, StoreError> {
            self.chunks.pop_front().transpose()
        }
    }

    const JOBS_BODY: &str = "\
#datatype,string,long,dateTime:RFC3339,dateTime:RFC3339,dateTime:RFC3339,string,string,double
#group,false,false,true,true,false,true,false,false
#default,_result,,,,,,,
,result,table,_start,_stop,_time,_measurement,jobType,value
,,0,2022-11-20T00:00:00Z,2023-01-03T00:00:00Z,2023-01-01T00:00:00Z,jobs,build,42.5
,,0,2022-11-20T00:00:00Z,2023-01-03T00:00:00Z,2023-01-02T00:00:00Z,jobs,test,1
";

    async fn drain(cursor: &mut CsvCursor<ScriptedBody>) -> Vec<RawRecord> {
        let mut rows = Vec::new();
        while cursor.advance().await {
            rows.push(cursor.current().cloned().unwrap());
        }
        rows
    }

    #[tokio::test]
    async fn decodes_typed_rows_across_chunk_boundaries() {
        for size in [1, 7, 64, 4096] {
            let mut cursor =
                CsvCursor::new(ScriptedBody::split(JOBS_BODY, size), CancellationToken::new());
            let rows = drain(&mut cursor).await;

            assert!(cursor.err().is_none(), "chunk size {}", size);
            assert_eq!(rows.len(), 2);
            assert_eq!(rows[0].value_by_key("jobType"), Some(&FieldValue::from("build")));
            assert_eq!(rows[0].value_by_key("value"), Some(&FieldValue::Float(42.5)));
            assert_eq!(rows[0].value_by_key("table"), Some(&FieldValue::Integer(0)));
            assert_eq!(rows[0].value_by_key("result"), Some(&FieldValue::from("_result")));
            assert_eq!(
                rows[1].time(),
                Some(Utc.with_ymd_and_hms(2023, 1, 2, 0, 0, 0).unwrap())
            );
        }
    }

    #[tokio::test]
    async fn empty_cells_without_default_are_absent() {
        let body = "\
#datatype,string,long,dateTime:RFC3339,string,double
#group,false,false,false,false,false
#default,_result,,,,
,result,table,_time,jobType,value
,,0,2023-01-01T00:00:00Z,,3.5
";
        let mut cursor = CsvCursor::new(ScriptedBody::split(body, 16), CancellationToken::new());
        let rows = drain(&mut cursor).await;
        assert_eq!(rows.len(), 1);
        assert!(rows[0].value_by_key("jobType").is_none());
    }

    #[tokio::test]
    async fn blank_line_starts_a_new_table() {
        let body = "\
#datatype,string,long,dateTime:RFC3339,string,double
#group,false,false,false,false,false
#default,_result,,,,
,result,table,_time,jobType,value
,,0,2023-01-01T00:00:00Z,build,1.5

#datatype,string,long,dateTime:RFC3339,string,long
#group,false,false,false,false,false
#default,_result,,,,
,result,table,_time,jobType,value
,,1,2023-01-02T00:00:00Z,test,7
";
        let mut cursor = CsvCursor::new(ScriptedBody::split(body, 32), CancellationToken::new());
        let rows = drain(&mut cursor).await;
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].value_by_key("value"), Some(&FieldValue::Float(1.5)));
        assert_eq!(rows[1].value_by_key("value"), Some(&FieldValue::Integer(7)));
    }

    #[tokio::test]
    async fn quoted_cells_may_contain_newlines() {
        let body = "\
#datatype,string,long,dateTime:RFC3339,string,double
#group,false,false,false,false,false
#default,_result,,,,
,result,table,_time,jobType,value
,,0,2023-01-01T00:00:00Z,\"multi
line, job\",2
";
        let mut cursor = CsvCursor::new(ScriptedBody::split(body, 5), CancellationToken::new());
        let rows = drain(&mut cursor).await;
        assert_eq!(rows.len(), 1);
        assert_eq!(
            rows[0].value_by_key("jobType"),
            Some(&FieldValue::from("multi\nline, job"))
        );
    }

    #[tokio::test]
    async fn error_table_is_a_terminal_query_error() {
        let body = "\
#datatype,string,string
#group,true,true
#default,,
,error,reference
,\"failed to evaluate query: bucket not found\",897
";
        let mut cursor = CsvCursor::new(ScriptedBody::split(body, 64), CancellationToken::new());
        assert!(!cursor.advance().await);
        assert_eq!(
            cursor.err(),
            Some(&StoreError::Query {
                message: "failed to evaluate query: bucket not found".to_string(),
                reference: Some("897".to_string()),
            })
        );
        assert!(!cursor.advance().await);
    }

    #[tokio::test]
    async fn data_columns_named_error_are_not_an_error_table() {
        let body = "\
#datatype,string,long,dateTime:RFC3339,string,string,string,double
#group,false,false,false,false,false,false,false
#default,_result,,,,,,
,result,table,_time,error,jobType,reference,value
,,0,2023-01-01T00:00:00Z,none,build,abc,1.5
";
        let mut cursor = CsvCursor::new(ScriptedBody::split(body, 64), CancellationToken::new());
        let rows = drain(&mut cursor).await;

        assert!(cursor.err().is_none());
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].value_by_key("error"), Some(&FieldValue::from("none")));
        assert_eq!(rows[0].value_by_key("reference"), Some(&FieldValue::from("abc")));
    }

    #[tokio::test]
    async fn body_failure_mid_stream_is_reported() {
        let mut chunks: VecDeque<_> = JOBS_BODY
            .lines()
            .take(5)
            .map(|line| Ok(format!("{}\n", line).into_bytes()))
            .collect();
        chunks.push_back(Err(StoreError::connection("connection reset by peer")));
        let mut cursor = CsvCursor::new(ScriptedBody { chunks }, CancellationToken::new());

        assert!(cursor.advance().await);
        assert!(!cursor.advance().await);
        assert_eq!(
            cursor.err(),
            Some(&StoreError::connection("connection reset by peer"))
        );
    }

    #[tokio::test]
    async fn malformed_cell_is_a_decode_error() {
        let body = "\
#datatype,string,long,dateTime:RFC3339,string,double
#group,false,false,false,false,false
#default,_result,,,,
,result,table,_time,jobType,value
,,0,2023-01-01T00:00:00Z,build,not-a-number
";
        let mut cursor = CsvCursor::new(ScriptedBody::split(body, 64), CancellationToken::new());
        assert!(!cursor.advance().await);
        assert!(matches!(cursor.err(), Some(StoreError::Decode(_))));
    }

    #[tokio::test]
    async fn cancelled_token_stops_the_cursor() {
        let cancel = CancellationToken::new();
        let mut cursor = CsvCursor::new(ScriptedBody::split(JOBS_BODY, 8), cancel.clone());
        cancel.cancel();
        assert!(!cursor.advance().await);
        assert_eq!(cursor.err(), Some(&StoreError::Cancelled));
    }

    #[tokio::test]
    async fn close_is_idempotent_and_ends_iteration() {
        let mut cursor =
            CsvCursor::new(ScriptedBody::split(JOBS_BODY, 4096), CancellationToken::new());
        assert!(cursor.advance().await);
        cursor.close();
        cursor.close();
        assert!(cursor.current().is_none());
        assert!(!cursor.advance().await);
        assert!(cursor.err().is_none());
    }

    #[test]
    fn special_doubles_are_understood() {
        assert_eq!(
            convert_cell("value", "double", "+Inf").unwrap(),
            FieldValue::Float(f64::INFINITY)
        );
        assert_eq!(
            convert_cell("value", "double", "-Inf").unwrap(),
            FieldValue::Float(f64::NEG_INFINITY)
        );
        assert!(matches!(
            convert_cell("value", "double", "NaN").unwrap(),
            FieldValue::Float(v) if v.is_nan()
        ));
        assert_eq!(
            convert_cell("ok", "boolean", "true").unwrap(),
            FieldValue::Boolean(true)
        );
        assert!(convert_cell("ok", "boolean", "yes").is_err());
    }

    #[test]
    fn base64_cells_decode_to_bytes() {
        assert_eq!(
            convert_cell("jobType", "base64Binary", "YnVpbGQ=").unwrap(),
            FieldValue::Binary(b"build".to_vec())
        );
        assert!(convert_cell("jobType", "base64Binary", "not base64!").is_err());
    }
}
