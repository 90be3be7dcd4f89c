use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use log::error;

use super::types::ErrorResponse;

pub type Result<T, E = AppError> = std::result::Result<T, E>;

/// API错误类型，统一返回 500
pub struct AppError(pub anyhow::Error);

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        error!("请求处理失败: {:?}", self.0);
        let body = ErrorResponse { error: format!("Something went wrong: {}", self.0) };
        (StatusCode::INTERNAL_SERVER_ERROR, Json(body)).into_response()
    }
}

impl<E> From<E> for AppError
where
    E: Into<anyhow::Error>,
{
    fn from(err: E) -> Self {
        Self(err.into())
    }
}

/// 文件不存在
pub fn not_found() -> Response {
    let body = ErrorResponse { error: "File not found".to_string() };
    (StatusCode::NOT_FOUND, Json(body)).into_response()
}
