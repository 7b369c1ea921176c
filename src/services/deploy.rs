//! 部署编排
//!
//! up：判定 → 克隆/拉取 → 停止旧容器 → 构建 → 记录提交
//! down：确认存在部署 → 下线

use std::sync::Arc;
use tracing::{error, info, warn};

use crate::domain::deploy::{DeployTarget, Deployment};
use crate::error::DeployError;
use crate::infra::build::{BuildSpec, Builder};
use crate::infra::git::{ScmError, SourceControl};
use crate::state::log_session::LogSession;

use super::fleet::Fleet;
use super::resolver::{resolve, DeployAction};
use super::teardown::{stop_active_containers, TeardownError, TeardownReport};

/// 部署流程依赖的协作者
#[derive(Clone)]
pub struct DeployServices {
    pub fleet: Fleet,
    pub scm: Arc<dyn SourceControl>,
    pub builder: Arc<dyn Builder>,
}

/// 一次 up 的结果
#[derive(Debug)]
pub enum DeploymentOutcome {
    /// 首次部署已启动
    Initialized,
    /// 更新后重新部署已启动
    Updated,
    /// 没有新提交、配置未变且容器仍在运行，未重新构建
    Skipped,
    Failed(DeployError),
}

impl DeploymentOutcome {
    /// 返回给客户端的提示
    pub fn message(&self) -> String {
        match self {
            DeploymentOutcome::Initialized | DeploymentOutcome::Updated => "Project startup initiated!".to_string(),
            DeploymentOutcome::Skipped => "Project is already up to date.".to_string(),
            DeploymentOutcome::Failed(e) => e.to_string(),
        }
    }
}

/// 在不产生副作用的前提下检查 up 能否进行
///
/// 先按记录判定，再让已有的检出确认 origin 与请求一致
pub async fn preflight(services: &DeployServices, deployment: &Deployment, target: &DeployTarget) -> Result<DeployAction, DeployError> {
    let action = resolve(deployment, target)?;
    let checked_out = match action {
        DeployAction::Update { .. } => true,
        // 上次构建失败时仓库已克隆，但记录中还没有提交
        DeployAction::Initialize => services.scm.current_commit_hash().await?.is_some(),
    };
    if checked_out && !services.scm.compare_remote(&target.remote_url).await? {
        let current = if deployment.remote_url.is_empty() {
            "of the existing checkout".to_string()
        } else {
            deployment.remote_url.clone()
        };
        return Err(DeployError::RemoteMismatch {
            current,
            requested: target.remote_url.clone(),
        });
    }
    Ok(action)
}

/// 启动或更新部署
///
/// 失败时在会话中写入错误行，部分完成的状态保留以便重试
pub async fn up(services: &DeployServices, deployment: &mut Deployment, target: DeployTarget, session: &mut LogSession) -> DeploymentOutcome {
    match run_up(services, deployment, &target, session).await {
        Ok(outcome) => {
            info!(project = %deployment.project_name, commit = %deployment.commit_hash, outcome = ?outcome, "Deployment finished");
            outcome
        }
        Err(e) => {
            if e.is_precondition() {
                warn!(error = %e, "Deployment rejected");
            } else {
                error!(error = %e, "Deployment failed");
            }
            session.write_error(e.to_string()).await;
            DeploymentOutcome::Failed(e)
        }
    }
}

async fn run_up(services: &DeployServices, deployment: &mut Deployment, target: &DeployTarget, session: &mut LogSession) -> Result<DeploymentOutcome, DeployError> {
    let action = preflight(services, deployment, target).await?;
    let previous_commit = deployment.commit_hash.clone();
    let unchanged_config = deployment.matches_target(target);

    let skip_update = match &action {
        DeployAction::Initialize => {
            session.println("No deployment detected").await;
            if services.scm.current_commit_hash().await?.is_some() {
                session.println("Reusing existing checkout").await;
                deployment.apply_target(target);
                false
            } else {
                services
                    .scm
                    .clone_repo(&target.remote_url, &target.branch, session)
                    .await?;
                deployment.apply_target(target);
                true
            }
        }
        DeployAction::Update { .. } => {
            if deployment.branch != target.branch {
                info!(from = %deployment.branch, to = %target.branch, "Switching branch");
            }
            deployment.apply_target(target);
            false
        }
    };

    if !skip_update {
        services.scm.pull(&deployment.branch, session).await?;
    }

    let commit = services
        .scm
        .current_commit_hash()
        .await?
        .ok_or_else(|| ScmError::Failed {
            operation: "rev-parse",
            message: "repository has no HEAD after checkout".to_string(),
        })?;

    if !skip_update && unchanged_config && commit == previous_commit {
        let running = services.fleet.project_containers().await?;
        if !running.is_empty() {
            session
                .println(format!("Already at {}, {} container(s) running", short(&commit), running.len()))
                .await;
            return Ok(DeploymentOutcome::Skipped);
        }
    }

    match stop_active_containers(&services.fleet, session).await {
        Ok(_) | Err(TeardownError::NoContainers { .. }) => {}
        Err(e) => return Err(e.into()),
    }

    let build_type = deployment
        .build_type
        .ok_or_else(|| DeployError::InvalidConfig("no build type".to_string()))?;
    let spec = BuildSpec {
        project_name: &deployment.project_name,
        build_type,
        build_file_path: &deployment.build_file_path,
    };
    services.builder.build(&spec, session).await?;

    deployment.commit_hash = commit;
    session
        .println(format!("Deployed commit {}", short(&deployment.commit_hash)))
        .await;

    Ok(match action {
        DeployAction::Initialize => DeploymentOutcome::Initialized,
        DeployAction::Update { .. } => DeploymentOutcome::Updated,
    })
}

/// 下线当前部署
///
/// 没有记录提交但仍有项目容器在运行时，记录一条警告并照常下线
pub async fn down(services: &DeployServices, deployment: &Deployment, session: &mut LogSession) -> Result<TeardownReport, DeployError> {
    let result = run_down(services, deployment, session).await;
    if let Err(e) = &result {
        session.write_error(e.to_string()).await;
    }
    result
}

async fn run_down(services: &DeployServices, deployment: &Deployment, session: &mut LogSession) -> Result<TeardownReport, DeployError> {
    if !deployment.exists() {
        let running = services.fleet.project_containers().await?;
        if running.is_empty() {
            return Err(DeployError::NoDeployment);
        }
        warn!(count = running.len(), "Containers running without a recorded deployment, shutting them down");
    }

    let report = stop_active_containers(&services.fleet, session).await?;
    info!(stopped = report.stopped.len(), "Project shut down");
    Ok(report)
}

fn short(commit: &str) -> &str {
    commit.get(..7).unwrap_or(commit)
}
