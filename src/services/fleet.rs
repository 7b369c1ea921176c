//! 容器集群客户端
//!
//! 在 `ContainerRuntime` 之上加入守护进程容器的保留名称规则和固定超时

use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use crate::config::env::constants::STOP_TIMEOUT_SECS;
use crate::domain::container::Container;
use crate::infra::docker::{ContainerRuntime, FleetError, LogOptions};
use crate::state::log_session::LogSource;

/// 容器集群客户端
#[derive(Clone)]
pub struct Fleet {
    runtime: Arc<dyn ContainerRuntime>,
    daemon_name: String,
    stop_timeout: Duration,
}

impl Fleet {
    pub fn new(runtime: Arc<dyn ContainerRuntime>, daemon_name: impl Into<String>) -> Self {
        Self {
            runtime,
            daemon_name: daemon_name.into(),
            stop_timeout: Duration::from_secs(STOP_TIMEOUT_SECS),
        }
    }

    /// 是否为守护进程自身的容器
    pub fn is_daemon(&self, container: &Container) -> bool {
        container.has_name(&self.daemon_name)
    }

    /// 列出所有活跃容器（含守护进程）
    ///
    /// 不超过一个容器时返回 `NoContainers`：`daemon_only` 为 true 表示
    /// 剩下的正是守护进程自身
    pub async fn list_active(&self) -> Result<Vec<Container>, FleetError> {
        let containers = self.runtime.list_containers().await?;
        if containers.len() <= 1 {
            let daemon_only = containers.first().is_some_and(|c| self.is_daemon(c));
            debug!(count = containers.len(), daemon_only, "No active project containers");
            return Err(FleetError::NoContainers { daemon_only });
        }
        Ok(containers)
    }

    /// 项目容器（不含守护进程），空闲状态返回空列表
    pub async fn project_containers(&self) -> Result<Vec<Container>, FleetError> {
        let containers = self.runtime.list_containers().await?;
        Ok(containers.into_iter().filter(|c| !self.is_daemon(c)).collect())
    }

    /// 以固定宽限期停止容器
    pub async fn stop(&self, id: &str) -> Result<(), FleetError> {
        self.stop_with_timeout(id, self.stop_timeout).await
    }

    pub async fn stop_with_timeout(&self, id: &str, timeout: Duration) -> Result<(), FleetError> {
        self.runtime.stop_container(id, timeout).await
    }

    /// 获取日志字节流
    pub async fn fetch_logs(&self, id: &str, options: LogOptions) -> Result<LogSource, FleetError> {
        self.runtime.container_logs(id, options).await
    }

    /// 清理未使用的镜像（尽力而为，是否致命由调用方决定）
    pub async fn prune_unused_images(&self) -> Result<(), FleetError> {
        self.runtime.prune_images().await.map_err(|e| {
            warn!(error = %e, "Failed to prune unused images");
            e
        })
    }
}
