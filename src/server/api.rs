use std::sync::Arc;

use axum::Json;
use axum::body::Body;
use axum::extract::{Path, Query, Request, State};
use axum::http::header::{CONTENT_DISPOSITION, CONTENT_TYPE};
use axum::http::{HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use log::{error, info};
use tokio::task::spawn_blocking;
use tower::ServiceExt;
use tower_http::services::ServeFile;

use super::error::{Result, not_found};
use super::state::AppState;
use super::types::*;
use crate::metrics;
use crate::model::{DatasetRecord, ScoredRecord};
use crate::summarize::summarize_dataset;

/// 使用自然语言搜索数据文件
#[utoipa::path(
    get,
    path = "/search",
    params(SearchQuery),
    responses(
        (status = 200, body = Vec<ScoredRecord>),
        (status = 500, body = ErrorResponse),
    )
)]
pub async fn search_handler(
    State(state): State<Arc<AppState>>,
    Query(query): Query<SearchQuery>,
) -> Result<Json<Vec<ScoredRecord>>> {
    let k = query.k.unwrap_or(state.default_k);
    let result = spawn_blocking(move || state.searcher.search(&query.q, k)).await??;
    Ok(Json(result))
}

/// 获取全部数据文件，用于地图展示
#[utoipa::path(
    get,
    path = "/datasets",
    responses(
        (status = 200, body = Vec<DatasetRecord>),
    )
)]
pub async fn datasets_handler(State(state): State<Arc<AppState>>) -> Json<Vec<DatasetRecord>> {
    Json(state.searcher.records().to_vec())
}

/// 获取下载统计
#[utoipa::path(
    get,
    path = "/stats",
    responses(
        (status = 200, body = DownloadStats),
        (status = 500, body = ErrorResponse),
    )
)]
pub async fn stats_handler(State(state): State<Arc<AppState>>) -> Result<Json<DownloadStats>> {
    let stats = spawn_blocking(move || state.counter.read_all()).await??;
    Ok(Json(DownloadStats(stats)))
}

/// 下载原始数据文件，并增加下载次数
#[utoipa::path(
    get,
    path = "/download/{filename}",
    params(("filename" = String, Path, description = "数据文件名")),
    responses(
        (status = 200, description = "文件内容"),
        (status = 404, body = ErrorResponse),
    )
)]
pub async fn download_handler(
    State(state): State<Arc<AppState>>,
    Path(filename): Path<String>,
    request: Request,
) -> Result<Response> {
    // 只允许下载 raw 目录下的文件
    if filename.is_empty() || filename.contains(['/', '\\']) || filename == "." || filename == ".." {
        return Ok(not_found());
    }
    let path = state.raw_dir.join(&filename);
    match tokio::fs::metadata(&path).await {
        Ok(meta) if meta.is_file() => {}
        _ => return Ok(not_found()),
    }

    // 文件按块流式发送，不整体读入内存
    let mut response = ServeFile::new(&path).oneshot(request).await?.map(Body::new);
    if response.status() == StatusCode::NOT_FOUND {
        return Ok(not_found());
    }
    if !response.status().is_success() {
        return Ok(response);
    }

    let name = filename.clone();
    let count = spawn_blocking(move || state.counter.increment(&name)).await??;
    metrics::inc_download();
    info!("下载 {filename}，累计 {count} 次");

    let disposition = if filename.chars().all(|c| c.is_ascii_graphic() && c != '"') {
        format!("attachment; filename=\"{filename}\"")
    } else {
        "attachment".to_string()
    };
    let headers = response.headers_mut();
    headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/octet-stream"));
    headers.insert(CONTENT_DISPOSITION, HeaderValue::from_str(&disposition)?);
    Ok(response)
}

/// 使用大模型生成数据文件摘要
#[utoipa::path(
    post,
    path = "/summarize",
    request_body = SummarizeRequest,
    responses(
        (status = 200, body = SummarizeResponse),
        (status = 500, body = SummarizeResponse),
    )
)]
pub async fn summarize_handler(
    State(state): State<Arc<AppState>>,
    Json(req): Json<SummarizeRequest>,
) -> Response {
    let result = spawn_blocking(move || {
        summarize_dataset(state.summarizer.as_deref(), &state.retry, &req.file, &req.description)
    })
    .await
    .map_err(anyhow::Error::from)
    .and_then(|r| r);

    match result {
        Ok(summary) => Json(SummarizeResponse { summary }).into_response(),
        Err(e) => {
            error!("生成摘要失败: {e:?}");
            let body = SummarizeResponse { summary: format!("Error generating summary: {e}") };
            (StatusCode::INTERNAL_SERVER_ERROR, Json(body)).into_response()
        }
    }
}

/// Prometheus 指标
#[utoipa::path(
    get,
    path = "/metrics",
    responses(
        (status = 200, description = "文本格式的指标", body = String),
    )
)]
pub async fn metrics_handler() -> Result<Response> {
    let text = metrics::encode_text()?;
    Ok(([(CONTENT_TYPE, prometheus::TEXT_FORMAT)], text).into_response())
}
