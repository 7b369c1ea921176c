//! API Key 认证
//!
//! `RequireApiKey` extractor 校验 `x-api-key` header，用于 /up, /down, /logs, /status

use axum::{
    async_trait,
    extract::FromRequestParts,
    http::{header::HeaderMap, request::Parts},
};
use std::sync::Arc;

use crate::error::ApiError;
use crate::state::AppState;

/// API Key 认证 Extractor
///
/// 放在 handler 参数的最前面，校验失败时返回 401，后续 extractor 不再执行
#[derive(Debug, Clone)]
pub struct RequireApiKey;

#[async_trait]
impl FromRequestParts<Arc<AppState>> for RequireApiKey {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        verify_api_key(&parts.headers, &state.api_key)
    }
}

/// 检查 `x-api-key` header 是否与配置的 API key 匹配
///
/// 未配置 API key 时拒绝所有请求
pub fn verify_api_key(headers: &HeaderMap, expected_key: &str) -> Result<RequireApiKey, ApiError> {
    let provided_key = headers
        .get("x-api-key")
        .and_then(|v| v.to_str().ok());

    match provided_key {
        _ if expected_key.is_empty() => {
            tracing::warn!("No API key configured, rejecting request");
            Err(ApiError::unauthorized())
        }
        Some(key) if key == expected_key => Ok(RequireApiKey),
        Some(_) => {
            tracing::warn!("Invalid API key provided");
            Err(ApiError::unauthorized())
        }
        None => {
            tracing::warn!("Missing x-api-key header");
            Err(ApiError::unauthorized())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn test_verify_api_key_success() {
        let mut headers = HeaderMap::new();
        headers.insert("x-api-key", HeaderValue::from_static("test-key"));

        let result = verify_api_key(&headers, "test-key");
        assert!(result.is_ok());
    }

    #[test]
    fn test_verify_api_key_wrong_key() {
        let mut headers = HeaderMap::new();
        headers.insert("x-api-key", HeaderValue::from_static("wrong-key"));

        let result = verify_api_key(&headers, "test-key");
        assert!(result.is_err());
    }

    #[test]
    fn test_empty_configured_key_rejects_everything() {
        let mut headers = HeaderMap::new();
        headers.insert("x-api-key", HeaderValue::from_static(""));

        assert!(verify_api_key(&headers, "").is_err());
    }

    #[test]
    fn test_verify_api_key_missing() {
        let headers = HeaderMap::new();

        let result = verify_api_key(&headers, "test-key");
        assert!(result.is_err());
    }
}
