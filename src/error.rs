//! 统一错误处理
//!
//! - `DeployError`：部署流程的领域错误，按 `status()` 分类
//! - `ApiError`：请求边界的错误，实现 `IntoResponse` 输出 JSON `ErrorResponse`

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;

use crate::infra::build::BuildError;
use crate::infra::docker::FleetError;
use crate::infra::git::ScmError;
use crate::services::teardown::TeardownError;

/// 没有部署时 down 的提示
pub const MSG_NO_DEPLOYMENT: &str = "No deployment is currently active on this host - try running up first";

/// 部署流程错误
#[derive(Debug, thiserror::Error)]
pub enum DeployError {
    /// 请求的仓库与已部署的仓库不同
    #[error("Given remote {requested} does not match the deployed remote {current}; run down and remove the project first")]
    RemoteMismatch { current: String, requested: String },
    /// 尚无部署
    #[error("{}", MSG_NO_DEPLOYMENT)]
    NoDeployment,
    /// 只有守护进程在运行
    #[error("There are currently no active containers")]
    NoContainers,
    /// 构建配置无效
    #[error("invalid deployment configuration: {0}")]
    InvalidConfig(String),
    /// 容器不存在
    #[error("container {0}")]
    NotFound(String),
    #[error(transparent)]
    Fleet(FleetError),
    #[error(transparent)]
    Teardown(TeardownError),
    #[error(transparent)]
    Scm(#[from] ScmError),
    #[error(transparent)]
    Build(#[from] BuildError),
}

impl DeployError {
    /// 对应的 HTTP 状态码
    pub fn status(&self) -> StatusCode {
        match self {
            DeployError::RemoteMismatch { .. }
            | DeployError::NoDeployment
            | DeployError::NoContainers
            | DeployError::InvalidConfig(_)
            | DeployError::Build(BuildError::MissingBuildFile(_))
            | DeployError::Teardown(TeardownError::NoContainers { .. }) => StatusCode::PRECONDITION_FAILED,
            DeployError::NotFound(_) | DeployError::Fleet(FleetError::NotFound(_)) => StatusCode::NOT_FOUND,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// 前置条件失败属于正常的业务拒绝，不是内部错误
    pub fn is_precondition(&self) -> bool {
        self.status() == StatusCode::PRECONDITION_FAILED
    }
}

impl From<FleetError> for DeployError {
    fn from(e: FleetError) -> Self {
        match e {
            FleetError::NoContainers { .. } => DeployError::NoContainers,
            FleetError::NotFound(id) => DeployError::NotFound(id),
            other => DeployError::Fleet(other),
        }
    }
}

impl From<TeardownError> for DeployError {
    fn from(e: TeardownError) -> Self {
        match e {
            TeardownError::NoContainers { .. } => DeployError::NoContainers,
            other => DeployError::Teardown(other),
        }
    }
}

/// API 错误响应结构
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

impl ErrorResponse {
    pub fn new(error: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            message: message.into(),
            details: None,
        }
    }

    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }
}

/// 统一 API 错误类型
#[derive(Debug)]
pub enum ApiError {
    /// 401 - 未授权（API Key 无效或缺失）
    Unauthorized,
    /// 404 - 资源未找到
    NotFound(String),
    /// 400 - 请求无效
    BadRequest(String),
    /// 412 - 前置条件失败（如：远端不一致、没有活跃容器）
    PreconditionFailed(String),
    /// 500 - 内部错误
    Internal(String),
}

impl ApiError {
    /// 创建未授权错误
    pub fn unauthorized() -> Self {
        Self::Unauthorized
    }

    /// 创建未找到错误
    pub fn not_found(resource: impl Into<String>) -> Self {
        Self::NotFound(resource.into())
    }

    /// 创建请求无效错误
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::BadRequest(message.into())
    }

    /// 创建内部错误
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }
}

impl ApiError {
    /// 拆分为状态码和 JSON 错误体
    pub fn into_parts(self) -> (StatusCode, ErrorResponse) {
        let (status, error_type, message) = match self {
            ApiError::Unauthorized => (
                StatusCode::UNAUTHORIZED,
                "unauthorized",
                "Invalid or missing API key".to_string(),
            ),
            ApiError::NotFound(resource) => (
                StatusCode::NOT_FOUND,
                "not_found",
                format!("{} not found", resource),
            ),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "bad_request", msg),
            ApiError::PreconditionFailed(msg) => {
                (StatusCode::PRECONDITION_FAILED, "precondition_failed", msg)
            }
            ApiError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, "internal_error", msg),
        };

        (status, ErrorResponse::new(error_type, message))
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, body) = self.into_parts();
        (status, Json(body)).into_response()
    }
}

impl std::fmt::Display for ApiError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ApiError::Unauthorized => write!(f, "Unauthorized"),
            ApiError::NotFound(r) => write!(f, "Not found: {}", r),
            ApiError::BadRequest(m) => write!(f, "Bad request: {}", m),
            ApiError::PreconditionFailed(m) => write!(f, "Precondition failed: {}", m),
            ApiError::Internal(m) => write!(f, "Internal error: {}", m),
        }
    }
}

impl std::error::Error for ApiError {}

impl From<DeployError> for ApiError {
    fn from(e: DeployError) -> Self {
        let message = e.to_string();
        match e.status() {
            StatusCode::PRECONDITION_FAILED => ApiError::PreconditionFailed(message),
            StatusCode::NOT_FOUND => ApiError::NotFound(message),
            StatusCode::BAD_REQUEST => ApiError::BadRequest(message),
            _ => ApiError::Internal(message),
        }
    }
}

/// 便捷类型别名
pub type ApiResult<T> = Result<T, ApiError>;
