//! 领域模型模块
//!
//! 纯数据结构，不依赖 axum/tokio

pub mod container;
pub mod deploy;

// Re-exports for convenience
pub use container::{Container, ContainerLogsQuery, LogQueryError, LogRequest};
pub use deploy::{BuildType, DeployTarget, Deployment, DeploymentStatus, UnknownBuildType};
