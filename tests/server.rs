use std::sync::Arc;
use std::time::Duration;

use anyhow::{Result, bail};
use axum::Router;
use axum::body::{Body, to_bytes};
use axum::http::{Request, StatusCode, header};
use georag::Searcher;
use georag::builder::build_index;
use georag::counter::DownloadCounter;
use georag::embedding::HashEmbedder;
use georag::model::{DatasetRecord, Location};
use georag::server::{AppState, create_app};
use georag::summarize::{NO_DESCRIPTION, NOT_CONFIGURED, RetryPolicy, Summarizer};
use serde_json::{Value, json};
use tempfile::TempDir;
use tower::ServiceExt;

struct EchoSummarizer;

impl Summarizer for EchoSummarizer {
    fn summarize(&self, prompt: &str) -> Result<String> {
        Ok(format!("echo: {}", prompt.lines().last().unwrap_or_default()))
    }
}

struct DownSummarizer;

impl Summarizer for DownSummarizer {
    fn summarize(&self, _prompt: &str) -> Result<String> {
        bail!("service unavailable")
    }
}

fn record(file: &str, description: &str) -> DatasetRecord {
    DatasetRecord {
        file_id: file.to_string(),
        path: None,
        description: description.to_string(),
        location: Location::default(),
        raw_metadata: Value::Null,
    }
}

fn app(dir: &TempDir, summarizer: Option<Arc<dyn Summarizer>>) -> Router {
    let embedder = Arc::new(HashEmbedder::default());
    let records = vec![
        record("line.sgy", "seismic reflection profile"),
        record("sst.nc", "ocean sea surface temperature"),
        record("bouguer.h5", "bouguer gravity anomaly"),
    ];
    let (index, mapping) = build_index(records, embedder.as_ref()).unwrap();

    let raw_dir = dir.path().join("raw");
    std::fs::create_dir_all(&raw_dir).unwrap();
    std::fs::write(raw_dir.join("bouguer.h5"), b"HDF5 bytes").unwrap();
    std::fs::write(dir.path().join("secret.txt"), b"secret").unwrap();

    let state = AppState {
        searcher: Searcher::new(embedder, index, mapping),
        counter: DownloadCounter::new(dir.path().join("download_stats.json")),
        raw_dir,
        summarizer,
        retry: RetryPolicy {
            min_wait: Duration::ZERO,
            max_wait: Duration::ZERO,
            ..Default::default()
        },
        default_k: 5,
    };
    create_app(Arc::new(state))
}

async fn get(app: &Router, uri: &str) -> (StatusCode, Vec<u8>) {
    let request = Request::builder().uri(uri).body(Body::empty()).unwrap();
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    (status, body.to_vec())
}

async fn get_json(app: &Router, uri: &str) -> (StatusCode, Value) {
    let (status, body) = get(app, uri).await;
    (status, serde_json::from_slice(&body).unwrap())
}

async fn summarize(app: &Router, body: Value) -> (StatusCode, Value) {
    let request = Request::builder()
        .method("POST")
        .uri("/summarize")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap();
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    (status, serde_json::from_slice(&body).unwrap())
}

#[tokio::test]
async fn search() {
    let dir = TempDir::new().unwrap();
    let app = app(&dir, None);

    let (status, body) = get_json(&app, "/search?q=gravity%20survey&k=2").await;
    assert_eq!(status, StatusCode::OK);
    let hits = body.as_array().unwrap();
    assert_eq!(hits.len(), 2);
    assert_eq!(hits[0]["file"], "bouguer.h5");
    assert_eq!(hits[0]["similarity_percent"], 40.8);
    assert!(hits[0]["distance"].is_number());

    let (_, body) = get_json(&app, "/search?q=gravity").await;
    assert_eq!(body.as_array().unwrap().len(), 3);
}

#[tokio::test]
async fn blank_search() {
    let dir = TempDir::new().unwrap();
    let app = app(&dir, None);

    assert_eq!(get_json(&app, "/search?q=").await, (StatusCode::OK, json!([])));
    assert_eq!(get_json(&app, "/search").await, (StatusCode::OK, json!([])));
}

#[tokio::test]
async fn datasets() {
    let dir = TempDir::new().unwrap();
    let app = app(&dir, None);

    let (status, body) = get_json(&app, "/datasets").await;
    assert_eq!(status, StatusCode::OK);
    let files = body.as_array().unwrap().iter().map(|r| r["file"].clone()).collect::<Vec<_>>();
    assert_eq!(files, [json!("line.sgy"), json!("sst.nc"), json!("bouguer.h5")]);
}

#[tokio::test]
async fn download_counts() {
    let dir = TempDir::new().unwrap();
    let app = app(&dir, None);

    assert_eq!(get_json(&app, "/stats").await, (StatusCode::OK, json!({})));

    let request = Request::builder().uri("/download/bouguer.h5").body(Body::empty()).unwrap();
    let response = app.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers()[header::CONTENT_DISPOSITION],
        "attachment; filename=\"bouguer.h5\""
    );
    let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    assert_eq!(&body[..], b"HDF5 bytes");

    get(&app, "/download/bouguer.h5").await;
    assert_eq!(get_json(&app, "/stats").await, (StatusCode::OK, json!({"bouguer.h5": 2})));

    let (status, body) = get(&app, "/metrics").await;
    assert_eq!(status, StatusCode::OK);
    assert!(String::from_utf8(body).unwrap().contains("georag_download_count"));
}

#[tokio::test]
async fn download_large_file() {
    let dir = TempDir::new().unwrap();
    let app = app(&dir, None);
    let data = (0..3 * 1024 * 1024).map(|i| (i % 251) as u8).collect::<Vec<_>>();
    std::fs::write(dir.path().join("raw/line.sgy"), &data).unwrap();

    let request = Request::builder().uri("/download/line.sgy").body(Body::empty()).unwrap();
    let response = app.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()[header::CONTENT_TYPE], "application/octet-stream");
    assert_eq!(response.headers()[header::CONTENT_LENGTH], data.len().to_string().as_str());
    let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    assert_eq!(body.len(), data.len());
    assert!(body[..] == data[..]);

    assert_eq!(get_json(&app, "/stats").await, (StatusCode::OK, json!({"line.sgy": 1})));
}

#[tokio::test]
async fn download_missing() {
    let dir = TempDir::new().unwrap();
    let app = app(&dir, None);

    let not_found = (StatusCode::NOT_FOUND, json!({"error": "File not found"}));
    assert_eq!(get_json(&app, "/download/missing.nc").await, not_found);
    assert_eq!(get_json(&app, "/download/..%2Fsecret.txt").await, not_found);
    assert_eq!(get_json(&app, "/download/..").await, not_found);

    // 失败的下载不计数
    assert_eq!(get_json(&app, "/stats").await, (StatusCode::OK, json!({})));
}

#[tokio::test]
async fn summarize_configured() {
    let dir = TempDir::new().unwrap();
    let app = app(&dir, Some(Arc::new(EchoSummarizer)));

    let (status, body) =
        summarize(&app, json!({"file": "sst.nc", "description": "ocean temperature"})).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["summary"], "echo: Metadata: ocean temperature");

    let (status, body) = summarize(&app, json!({"file": "sst.nc", "description": ""})).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["summary"], NO_DESCRIPTION);
}

#[tokio::test]
async fn summarize_not_configured() {
    let dir = TempDir::new().unwrap();
    let app = app(&dir, None);

    let (status, body) = summarize(&app, json!({"description": "ocean temperature"})).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["summary"], NOT_CONFIGURED);
}

#[tokio::test]
async fn summarize_failure() {
    let dir = TempDir::new().unwrap();
    let app = app(&dir, Some(Arc::new(DownSummarizer)));

    let (status, body) = summarize(&app, json!({"description": "ocean temperature"})).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body["summary"], "Error generating summary: service unavailable");
}

#[tokio::test]
async fn openapi_document() {
    let dir = TempDir::new().unwrap();
    let app = app(&dir, None);

    let (status, body) = get_json(&app, "/api-docs/openapi.json").await;
    assert_eq!(status, StatusCode::OK);
    assert!(body["paths"]["/search"].is_object());
    assert!(body["paths"]["/download/{filename}"].is_object());
}
