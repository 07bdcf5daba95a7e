use axum::{
    extract::{Request, State},
    http::HeaderValue,
    middleware::Next,
    response::Response,
};
use tracing::{Instrument, info, warn};
use uuid::Uuid;

use crate::server::AppState;

/// Request ID header name
pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// Requests slower than this are logged at warn level
const SLOW_REQUEST_MS: u64 = 5_000;

/// Reuse the caller's request ID or mint one
fn request_id_of(request: &Request) -> String {
    request
        .headers()
        .get(REQUEST_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.trim().is_empty())
        .map(|s| s.to_string())
        .unwrap_or_else(|| Uuid::new_v4().to_string())
}

/// 请求日志中间件
///
/// ## 功能说明
/// - 为每个请求分配（或沿用）`x-request-id`，并写回响应头
/// - 在以请求ID命名的 span 内处理请求，使下游的提供商日志带上同一个ID
/// - 记录请求耗时和成功/失败计数
pub async fn logging_middleware(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Response {
    let request_id = request_id_of(&request);
    let method = request.method().clone();
    let uri = request.uri().clone();

    if let Ok(value) = HeaderValue::from_str(&request_id) {
        request.headers_mut().insert(REQUEST_ID_HEADER, value);
    }

    let span = tracing::info_span!(
        "http_request",
        request_id = %request_id,
        method = %method,
        uri = %uri,
    );

    let started = state.metrics.record_request_start();
    let mut response = async {
        tracing::debug!("Request started");
        next.run(request).await
    }
    .instrument(span)
    .await;

    let duration_ms = started.elapsed().as_millis() as u64;
    let status = response.status();

    if let Ok(value) = HeaderValue::from_str(&request_id) {
        response.headers_mut().insert(REQUEST_ID_HEADER, value);
    }

    if status.is_success() {
        info!(
            request_id = %request_id,
            method = %method,
            uri = %uri,
            status = status.as_u16(),
            duration_ms = duration_ms,
            "Request completed"
        );
    } else {
        warn!(
            request_id = %request_id,
            method = %method,
            uri = %uri,
            status = status.as_u16(),
            duration_ms = duration_ms,
            "Request completed with error status"
        );
    }

    if duration_ms > SLOW_REQUEST_MS {
        warn!(request_id = %request_id, uri = %uri, duration_ms = duration_ms, "Slow request detected");
    }

    state.metrics.record_request_end(started, status.is_success()).await;
    response
}
