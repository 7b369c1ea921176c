//! 集群下线
//!
//! 停止除守护进程外的所有活跃容器，然后清理未使用的镜像

use tracing::{error, info};

use crate::infra::docker::FleetError;
use crate::state::log_session::LogSession;

use super::fleet::Fleet;

/// 下线错误
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TeardownError {
    /// 只有守护进程容器在运行（前置条件失败，不是内部错误）
    #[error("There are currently no active containers")]
    NoContainers { daemon_only: bool },
    /// 列出容器失败
    #[error("failed to list containers: {0}")]
    List(FleetError),
    /// 停止某个容器失败，之前已停止的容器保持停止
    #[error("failed to stop container {container}: {source}")]
    Stop {
        container: String,
        #[source]
        source: FleetError,
    },
    /// 容器都已停止，但镜像清理失败
    #[error("containers stopped but image prune failed: {0}")]
    Prune(FleetError),
}

/// 下线结果
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TeardownReport {
    /// 已停止的容器名称，按停止顺序
    pub stopped: Vec<String>,
}

/// 停止所有活跃的项目容器
///
/// 按列出顺序逐个停止，遇到第一个失败即中止，不回滚已停止的容器
pub async fn stop_active_containers(fleet: &Fleet, session: &mut LogSession) -> Result<TeardownReport, TeardownError> {
    session.println("Shutting down active containers...").await;

    let containers = fleet.list_active().await.map_err(|e| match e {
        FleetError::NoContainers { daemon_only } => TeardownError::NoContainers { daemon_only },
        other => TeardownError::List(other),
    })?;

    let mut report = TeardownReport::default();
    for container in containers.iter().filter(|c| !fleet.is_daemon(c)) {
        let name = container.display_name();
        session.println(format!("Stopping {}...", name)).await;

        if let Err(source) = fleet.stop(&container.id).await {
            error!(container = %name, error = %source, "Failed to stop container");
            return Err(TeardownError::Stop {
                container: name.to_string(),
                source,
            });
        }
        info!(container = %name, "Container stopped");
        report.stopped.push(name.to_string());
    }

    fleet
        .prune_unused_images()
        .await
        .map_err(TeardownError::Prune)?;

    Ok(report)
}
