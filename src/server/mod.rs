mod api;
mod error;
mod state;
mod types;

use std::sync::Arc;

use axum::Router;
use axum::routing::{get, post};
use tower_http::limit::RequestBodyLimitLayer;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

pub use self::state::*;
pub use self::types::*;
use crate::model::{DatasetRecord, Location, ScoredRecord};

#[derive(OpenApi)]
#[openapi(
    paths(
        api::search_handler,
        api::datasets_handler,
        api::stats_handler,
        api::download_handler,
        api::summarize_handler,
        api::metrics_handler,
    ),
    components(schemas(
        DatasetRecord,
        Location,
        ScoredRecord,
        SummarizeRequest,
        SummarizeResponse,
        ErrorResponse,
        DownloadStats,
    ))
)]
pub struct ApiDoc;

/// 构建API服务器
pub fn create_app(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/search", get(api::search_handler))
        .route("/datasets", get(api::datasets_handler))
        .route("/stats", get(api::stats_handler))
        .route("/download/{filename}", get(api::download_handler))
        .route("/summarize", post(api::summarize_handler))
        .route("/metrics", get(api::metrics_handler))
        .merge(SwaggerUi::new("/docs").url("/api-docs/openapi.json", ApiDoc::openapi()))
        // 请求体限制：1M
        .layer(RequestBodyLimitLayer::new(1024 * 1024))
        .with_state(state)
}
