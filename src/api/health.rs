//! 健康检查和部署状态 API
//!
//! 包含 /health, /status 端点

use axum::{extract::State, routing::get, Json, Router};
use serde::Serialize;
use std::sync::Arc;

use crate::config::env::constants::VERSION;
use crate::domain::deploy::DeploymentStatus;
use crate::error::{ApiResult, DeployError};
use crate::middleware::RequireApiKey;
use crate::state::AppState;

/// 健康检查响应
#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
    service: &'static str,
    version: &'static str,
    timestamp: String,
    uptime_secs: i64,
}

/// 创建健康检查路由
pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/health", get(health_check))
        .route("/status", get(deployment_status))
}

/// 健康检查 - 返回状态、版本、运行时间
///
/// GET /health
/// 无需认证
async fn health_check(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    let now = chrono::Utc::now();
    Json(HealthResponse {
        status: "ok",
        service: "deckhand-agent",
        version: VERSION,
        timestamp: now.to_rfc3339(),
        uptime_secs: (now - state.started_at).num_seconds(),
    })
}

/// 当前部署状态
///
/// GET /status
/// 需要 API Key
async fn deployment_status(
    _auth: RequireApiKey,
    State(state): State<Arc<AppState>>,
) -> ApiResult<Json<DeploymentStatus>> {
    // 只在复制记录时短暂持锁
    let deployment = state.deployment.lock().await.clone();
    let containers = state
        .services
        .fleet
        .project_containers()
        .await
        .map_err(DeployError::from)?
        .iter()
        .map(|c| c.display_name().to_string())
        .collect();

    Ok(Json(DeploymentStatus::new(&deployment, containers)))
}
