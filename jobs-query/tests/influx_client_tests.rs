//! Tests for the InfluxDB client against an in-process stand-in server
//!
//! The stand-in speaks just enough of `/api/v2/query` to answer with a fixed
//! annotated CSV body or an error status.

use axum::{
    extract::{Query, State},
    http::{header, HeaderMap, StatusCode},
    routing::post,
    Router,
};
use jobs_core::{FieldValue, QueryClient, StoreError};
use jobs_query::{
    config::{InfluxConfig, QueryConfig},
    create_router,
    influx::InfluxClient,
    AppState,
};
use parking_lot::Mutex;
use std::{collections::HashMap, sync::Arc};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower::ServiceExt;

const JOBS_CSV: &str = "\
#datatype,string,long,dateTime:RFC3339,dateTime:RFC3339,dateTime:RFC3339,string,string,double\r
#group,false,false,true,true,false,true,false,false\r
#default,_result,,,,,,,\r
,result,table,_start,_stop,_time,_measurement,jobType,value\r
,,0,2022-11-20T08:00:00Z,2023-01-03T00:00:00Z,2023-01-01T00:00:00Z,jobs,build,42.5\r
,,0,2022-11-20T08:00:00Z,2023-01-03T00:00:00Z,2023-01-02T00:00:00Z,jobs,test,1\r
\r
";

#[derive(Debug, Clone)]
struct SeenRequest {
    org: Option<String>,
    authorization: Option<String>,
    accept: Option<String>,
    body: serde_json::Value,
}

#[derive(Clone)]
struct StandIn {
    status: StatusCode,
    body: &'static str,
    seen: Arc<Mutex<Vec<SeenRequest>>>,
}

async fn query_route(
    State(stand_in): State<StandIn>,
    Query(params): Query<HashMap<String, String>>,
    headers: HeaderMap,
    body: String,
) -> (StatusCode, String) {
    let header_value = |name: header::HeaderName| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
    };
    stand_in.seen.lock().push(SeenRequest {
        org: params.get("org").cloned(),
        authorization: header_value(header::AUTHORIZATION),
        accept: header_value(header::ACCEPT),
        body: serde_json::from_str(&body).unwrap_or_default(),
    });
    (stand_in.status, stand_in.body.to_string())
}

/// Start a stand-in InfluxDB and return its base URL
async fn start_stand_in(stand_in: StandIn) -> String {
    let app = Router::new()
        .route("/api/v2/query", post(query_route))
        .with_state(stand_in);
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{}", addr)
}

fn influx_config(url: String) -> InfluxConfig {
    InfluxConfig {
        url,
        token: "test-token".to_string(),
        org: "acme".to_string(),
        ..InfluxConfig::default()
    }
}

fn stand_in(status: StatusCode, body: &'static str) -> StandIn {
    StandIn {
        status,
        body,
        seen: Arc::new(Mutex::new(Vec::new())),
    }
}

#[tokio::test]
async fn test_client_posts_flux_and_streams_rows() {
    let server = stand_in(StatusCode::OK, JOBS_CSV);
    let seen = server.seen.clone();
    let url = start_stand_in(server).await;

    let client = InfluxClient::new(&influx_config(url)).unwrap();
    let mut cursor = client
        .query("from(bucket: \"ci\")", &CancellationToken::new())
        .await
        .unwrap();

    let mut job_types = Vec::new();
    while cursor.advance().await {
        let record = cursor.current().unwrap();
        job_types.push(record.value_by_key("jobType").cloned());
    }
    assert!(cursor.err().is_none());
    cursor.close();

    assert_eq!(
        job_types,
        vec![
            Some(FieldValue::from("build")),
            Some(FieldValue::from("test"))
        ]
    );

    let seen = seen.lock().clone();
    assert_eq!(seen.len(), 1);
    assert_eq!(seen[0].org.as_deref(), Some("acme"));
    assert_eq!(seen[0].authorization.as_deref(), Some("Token test-token"));
    assert_eq!(seen[0].accept.as_deref(), Some("application/csv"));
    assert_eq!(seen[0].body["query"], "from(bucket: \"ci\")");
    assert_eq!(seen[0].body["type"], "flux");
    assert_eq!(seen[0].body["dialect"]["header"], true);
}

#[tokio::test]
async fn test_client_reports_error_status_message() {
    let url = start_stand_in(stand_in(
        StatusCode::UNAUTHORIZED,
        r#"{"code":"unauthorized","message":"unauthorized access"}"#,
    ))
    .await;

    let client = InfluxClient::new(&influx_config(url)).unwrap();
    let err = client
        .query("from(bucket: \"ci\")", &CancellationToken::new())
        .await
        .err()
        .unwrap();

    assert_eq!(
        err,
        StoreError::Status {
            status: 401,
            message: "unauthorized access".to_string(),
        }
    );
}

#[tokio::test]
async fn test_client_reports_unreachable_server() {
    // Bind then drop to get a port nothing listens on.
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let client = InfluxClient::new(&influx_config(format!("http://{}", addr))).unwrap();
    let err = client
        .query("from(bucket: \"ci\")", &CancellationToken::new())
        .await
        .err()
        .unwrap();

    assert!(matches!(err, StoreError::Connection(_)));
}

#[tokio::test]
async fn test_client_honours_cancellation_before_sending() {
    let url = start_stand_in(stand_in(StatusCode::OK, JOBS_CSV)).await;
    let client = InfluxClient::new(&influx_config(url)).unwrap();

    let cancel = CancellationToken::new();
    cancel.cancel();
    let err = client
        .query("from(bucket: \"ci\")", &cancel)
        .await
        .err()
        .unwrap();

    assert_eq!(err, StoreError::Cancelled);
}

#[tokio::test]
async fn test_jobs_endpoint_end_to_end() {
    let server = stand_in(StatusCode::OK, JOBS_CSV);
    let seen = server.seen.clone();
    let url = start_stand_in(server).await;

    let mut config = QueryConfig::default();
    config.influx = influx_config(url);
    let config = Arc::new(config);
    let client = Arc::new(InfluxClient::new(&config.influx).unwrap());
    let app = create_router(AppState::new(client, config.clone()));

    let request = axum::http::Request::builder()
        .uri("/jobs")
        .body(axum::body::Body::empty())
        .unwrap();
    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    assert_eq!(
        std::str::from_utf8(&body).unwrap(),
        r#"[{"jobType":"build","value":42.5,"time":"2023-01-01T00:00:00Z"},{"jobType":"test","value":1,"time":"2023-01-02T00:00:00Z"}]"#
    );

    let seen = seen.lock().clone();
    assert_eq!(seen[0].body["query"], config.query.to_flux());
}
