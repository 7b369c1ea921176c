//! 部署管理 API
//!
//! 包含 /up, /down 端点

use axum::{
    extract::State,
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::post,
    Json, Router,
};
use serde::Deserialize;
use std::sync::Arc;
use tracing::{info, warn};

use crate::domain::deploy::{BuildType, DeployTarget};
use crate::error::{ApiError, ApiResult, DeployError};
use crate::middleware::RequireApiKey;
use crate::services::deploy::{self, DeploymentOutcome};
use crate::state::log_session::LogSession;
use crate::state::sink::ResponseSink;
use crate::state::AppState;

/// up 请求
#[derive(Debug, Clone, Deserialize)]
pub struct UpRequest {
    /// 仓库地址
    pub remote_url: String,
    /// 部署分支
    pub branch: String,
    /// 构建类型 (docker-compose, dockerfile)
    pub build_type: String,
    /// 构建文件路径，为空时按构建类型使用默认文件
    #[serde(default)]
    pub build_file_path: String,
    /// 项目名称，默认取仓库名
    #[serde(default)]
    pub project_name: Option<String>,
    #[serde(default)]
    pub webhook_secret: Option<String>,
    /// 是否以分块文本流返回部署进度
    #[serde(default)]
    pub stream: bool,
}

impl UpRequest {
    /// 校验并转换为部署目标
    pub fn to_target(&self) -> Result<DeployTarget, DeployError> {
        let remote_url = self.remote_url.trim();
        if remote_url.is_empty() {
            return Err(DeployError::InvalidConfig("remote_url is required".to_string()));
        }
        let branch = self.branch.trim();
        if branch.is_empty() {
            return Err(DeployError::InvalidConfig("branch is required".to_string()));
        }
        let build_type: BuildType = self
            .build_type
            .parse()
            .map_err(|e: crate::domain::UnknownBuildType| DeployError::InvalidConfig(e.to_string()))?;

        let project_name = self
            .project_name
            .as_deref()
            .map(str::trim)
            .filter(|name| !name.is_empty())
            .map(str::to_string)
            .unwrap_or_else(|| repository_name(remote_url));

        Ok(DeployTarget {
            project_name,
            remote_url: remote_url.to_string(),
            branch: branch.to_string(),
            build_type,
            build_file_path: self.build_file_path.trim().to_string(),
        })
    }
}

/// 仓库地址的最后一段（去掉 `.git`）
fn repository_name(remote_url: &str) -> String {
    let last = remote_url
        .trim_end_matches('/')
        .rsplit(|c: char| c == '/' || c == ':')
        .next()
        .unwrap_or_default();
    let name = last.strip_suffix(".git").unwrap_or(last);
    if name.is_empty() {
        "project".to_string()
    } else {
        name.to_string()
    }
}

/// 创建部署路由
pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/up", post(up))
        .route("/down", post(down))
}

/// 启动或更新部署
///
/// POST /up
/// 需要 API Key
async fn up(
    _auth: RequireApiKey,
    State(state): State<Arc<AppState>>,
    Json(request): Json<UpRequest>,
) -> ApiResult<Response> {
    let target = request.to_target()?;
    state.set_webhook_secret(request.webhook_secret.clone()).await;

    // 整个操作期间持有部署记录
    let mut deployment = state.lock_deployment().await;
    let services = state.services.clone();

    info!(
        project = %target.project_name,
        remote = %target.remote_url,
        branch = %target.branch,
        build_type = %target.build_type,
        stream = request.stream,
        "Up requested"
    );

    if request.stream {
        // 状态码提交前先做不产生副作用的检查，远端不一致仍返回 412
        deploy::preflight(&services, &deployment, &target).await?;

        let (sink, body) = ResponseSink::channel();
        let mut session = LogSession::console().with_primary(sink);
        tokio::spawn(async move {
            let outcome = deploy::up(&services, &mut deployment, target, &mut session).await;
            drop(deployment);
            report_outcome(outcome, &mut session).await;
            session.close().await;
        });

        return Ok((
            StatusCode::CREATED,
            [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
            body.into_body(),
        )
            .into_response());
    }

    let mut session = LogSession::console();
    let outcome = deploy::up(&services, &mut deployment, target, &mut session).await;
    session.close().await;

    match outcome {
        DeploymentOutcome::Failed(e) => Err(e.into()),
        outcome => Ok((StatusCode::CREATED, outcome.message()).into_response()),
    }
}

/// 在流式响应末尾写入结果，失败时追加一行 JSON 错误
async fn report_outcome(outcome: DeploymentOutcome, session: &mut LogSession) {
    match outcome {
        DeploymentOutcome::Failed(e) => {
            let (status, body) = ApiError::from(e).into_parts();
            let body = body.with_details(format!("HTTP {}", status.as_u16()));
            match serde_json::to_string(&body) {
                Ok(line) => session.println(line).await,
                Err(e) => warn!(error = %e, "Failed to encode error response"),
            }
        }
        outcome => session.println(outcome.message()).await,
    }
}

/// 下线当前部署
///
/// POST /down
/// 需要 API Key
async fn down(
    _auth: RequireApiKey,
    State(state): State<Arc<AppState>>,
) -> ApiResult<impl IntoResponse> {
    let deployment = state.lock_deployment().await;
    info!(project = %deployment.project_name, "Down requested");

    let mut session = LogSession::console();
    let result = deploy::down(&state.services, &deployment, &mut session).await;
    session.close().await;
    result?;

    Ok((StatusCode::OK, "Project shut down."))
}
