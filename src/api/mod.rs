//! API 模块
//!
//! HTTP handlers 和路由组装

pub mod deploy;
pub mod health;
pub mod logs;

use axum::Router;
use std::sync::Arc;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::state::AppState;

/// 构建完整的 API 路由
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        // Health & Status
        .merge(health::router())
        // Deploy
        .merge(deploy::router())
        // Logs
        .merge(logs::router())
        // Middleware
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}
