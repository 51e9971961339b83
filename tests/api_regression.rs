//! API Regression Tests
//!
//! In-process tests that build the Axum app via `create_app()` and exercise
//! the /v1 endpoints using `tower::ServiceExt::oneshot()`.
//! No binary spawn, no network port. The collector is never started; readings
//! are published straight into the station's store.

use std::path::Path;
use std::sync::Arc;

use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use axum::response::Response;
use chrono::NaiveDate;
use futures::StreamExt;
use serde_json::{json, Value};
use tower::ServiceExt;

use tds530_collector::api::{create_app, ApiState};
use tds530_collector::config::StationConfig;
use tds530_collector::station::Station;
use tds530_collector::types::Reading;

fn test_config() -> StationConfig {
    let mut config = StationConfig::default();
    // TEST-NET-1, never contacted because the collector is not started.
    config.device.host = "192.0.2.1".to_string();
    config
}

fn create_test_station() -> Arc<Station> {
    Arc::new(Station::new(&test_config()))
}

fn station_with_log_dir(dir: &Path) -> Arc<Station> {
    let mut config = test_config();
    config.log.dir = dir.to_path_buf();
    Arc::new(Station::new(&config))
}

fn sample_reading() -> Reading {
    let ts = NaiveDate::from_ymd_opt(2024, 3, 9)
        .unwrap()
        .and_hms_opt(7, 5, 1)
        .unwrap();
    Reading::new(ts, vec![Some(1.0), None, Some(-2.5)])
}

async fn send(station: &Arc<Station>, request: Request<Body>) -> Response {
    create_app(ApiState::new(Arc::clone(station)))
        .oneshot(request)
        .await
        .unwrap()
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

fn post_log(path: &str) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri("/v1/log")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(json!({ "path": path }).to_string()))
        .unwrap()
}

fn delete_log() -> Request<Body> {
    Request::builder()
        .method("DELETE")
        .uri("/v1/log")
        .body(Body::empty())
        .unwrap()
}

async fn body_json(resp: Response) -> Value {
    let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

/// Before the first reading, /v1/ is 503 with a NOT_READY error envelope.
#[tokio::test]
async fn test_latest_before_first_reading_is_503() {
    let station = create_test_station();
    let resp = send(&station, get("/v1/")).await;
    assert_eq!(resp.status(), StatusCode::SERVICE_UNAVAILABLE);

    let v = body_json(resp).await;
    assert_eq!(v["error"]["code"], "NOT_READY");
    assert!(v["error"]["message"].is_string());
}

/// After a publish, /v1/ returns the bare reading with nulls for absent channels.
#[tokio::test]
async fn test_latest_after_publish() {
    let station = create_test_station();
    station.store().publish(sample_reading()).unwrap();

    for uri in ["/v1/", "/v1"] {
        let resp = send(&station, get(uri)).await;
        assert_eq!(resp.status(), StatusCode::OK, "GET {uri}");
        let v = body_json(resp).await;
        assert_eq!(
            v,
            json!({ "time": "2024/03/09 07:05:01", "data": [1.0, null, -2.5] })
        );
    }
}

/// /v1/status reports collector counters and log state.
#[tokio::test]
async fn test_status_shape() {
    let station = create_test_station();
    let resp = send(&station, get("/v1/status")).await;
    assert_eq!(resp.status(), StatusCode::OK);

    let v = body_json(resp).await;
    let data = &v["data"];
    assert_eq!(data["device"], "192.0.2.1:4242");
    assert_eq!(data["polling"], false);
    assert_eq!(data["collector"]["connected"], false);
    assert_eq!(data["collector"]["frames_received"], 0);
    assert_eq!(data["log"]["attached"], false);
    assert!(v["meta"]["timestamp"].is_string());
}

/// Attach/detach through the API follows the log state machine.
#[tokio::test]
async fn test_log_attach_detach_cycle() {
    let dir = tempfile::tempdir().unwrap();
    let station = station_with_log_dir(dir.path());
    let requested = "run";

    let resp = send(&station, post_log(requested)).await;
    assert_eq!(resp.status(), StatusCode::CREATED);
    let v = body_json(resp).await;
    assert_eq!(v["data"]["attached"], true);
    assert_eq!(v["data"]["path"], json!(dir.path().join("run.tsv")));

    let resp = send(&station, post_log(requested)).await;
    assert_eq!(resp.status(), StatusCode::CONFLICT);
    assert_eq!(body_json(resp).await["error"]["code"], "CONFLICT");

    station.store().publish(sample_reading()).unwrap();
    let v = body_json(send(&station, get("/v1/log")).await).await;
    assert_eq!(v["data"]["rows_written"], 1);
    assert_eq!(v["data"]["channels"], 3);

    let resp = send(&station, delete_log()).await;
    assert_eq!(resp.status(), StatusCode::OK);
    assert!(body_json(resp).await["data"]["path"]
        .as_str()
        .unwrap()
        .ends_with("run.tsv"));

    let resp = send(&station, delete_log()).await;
    assert_eq!(resp.status(), StatusCode::CONFLICT);

    let contents = std::fs::read_to_string(dir.path().join("run.tsv")).unwrap();
    assert_eq!(
        contents,
        "Time\tCH000\tCH001\tCH002\n2024/03/09 07:05:01\t1.0\t\t-2.5\n"
    );
}

/// Bad log paths map to 400 (empty) and 500 (cannot create).
#[tokio::test]
async fn test_log_attach_bad_paths() {
    let dir = tempfile::tempdir().unwrap();
    let station = station_with_log_dir(dir.path());

    let resp = send(&station, post_log("")).await;
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    assert_eq!(body_json(resp).await["error"]["code"], "BAD_REQUEST");

    let resp = send(&station, post_log("no-such-dir/run.tsv")).await;
    assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert!(!station.log_status().attached);
}

/// Paths outside the log directory are refused before any file is opened.
#[tokio::test]
async fn test_log_attach_refuses_paths_outside_log_dir() {
    let root = tempfile::tempdir().unwrap();
    let log_dir = root.path().join("logs");
    std::fs::create_dir(&log_dir).unwrap();
    let station = station_with_log_dir(&log_dir);

    let victim = root.path().join("victim.txt");
    std::fs::write(&victim, "keep me\n").unwrap();

    for requested in [
        victim.to_str().unwrap().to_string(),
        "../victim.txt".to_string(),
        "nested/../../victim.txt".to_string(),
    ] {
        let resp = send(&station, post_log(&requested)).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST, "POST {requested}");
        assert_eq!(body_json(resp).await["error"]["code"], "BAD_REQUEST");
    }

    assert_eq!(std::fs::read_to_string(&victim).unwrap(), "keep me\n");
    assert!(!station.log_status().attached);
}

/// The stream starts with the current reading as a `reading` event.
#[tokio::test]
async fn test_stream_sends_current_reading() {
    let station = create_test_station();
    station.store().publish(sample_reading()).unwrap();

    let resp = send(&station, get("/v1/stream")).await;
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(
        resp.headers().get(header::CONTENT_TYPE).unwrap(),
        "text/event-stream"
    );

    let mut body = resp.into_body().into_data_stream();
    let chunk = body.next().await.unwrap().unwrap();
    let text = String::from_utf8(chunk.to_vec()).unwrap();
    assert!(text.contains("event: reading"), "chunk: {text:?}");
    assert!(text.contains("2024/03/09 07:05:01"), "chunk: {text:?}");
}

/// Before the first reading, the stream opens with a `not_ready` event.
#[tokio::test]
async fn test_stream_reports_not_ready_before_first_reading() {
    let station = create_test_station();

    let resp = send(&station, get("/v1/stream")).await;
    assert_eq!(resp.status(), StatusCode::OK);

    let mut body = resp.into_body().into_data_stream();
    let chunk = body.next().await.unwrap().unwrap();
    let text = String::from_utf8(chunk.to_vec()).unwrap();
    assert!(text.contains("event: not_ready"), "chunk: {text:?}");
    assert!(text.contains("\"code\":\"NOT_READY\""), "chunk: {text:?}");

    station.store().publish(sample_reading()).unwrap();
    let chunk = body.next().await.unwrap().unwrap();
    let text = String::from_utf8(chunk.to_vec()).unwrap();
    assert!(text.contains("event: reading"), "chunk: {text:?}");
}

/// `/` serves the embedded dashboard; unknown API paths get the error envelope.
#[tokio::test]
async fn test_dashboard_and_unknown_paths() {
    let station = create_test_station();

    let resp = send(&station, get("/")).await;
    assert_eq!(resp.status(), StatusCode::OK);
    assert!(resp
        .headers()
        .get(header::CONTENT_TYPE)
        .unwrap()
        .to_str()
        .unwrap()
        .starts_with("text/html"));

    let resp = send(&station, get("/v1/nope")).await;
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    assert_eq!(body_json(resp).await["error"]["code"], "NOT_FOUND");
}
