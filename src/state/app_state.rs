//! 应用状态

use chrono::{DateTime, Utc};
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard, RwLock};
use tokio_util::sync::CancellationToken;

/// 全局 shutdown token，用于优雅关闭所有后台任务
static GLOBAL_SHUTDOWN: std::sync::OnceLock<CancellationToken> = std::sync::OnceLock::new();

/// 获取全局 shutdown token
pub fn get_shutdown_token() -> CancellationToken {
    GLOBAL_SHUTDOWN
        .get_or_init(CancellationToken::new)
        .clone()
}

/// 触发全局 shutdown
pub fn trigger_shutdown() {
    if let Some(token) = GLOBAL_SHUTDOWN.get() {
        token.cancel();
    }
}

use crate::config::env::EnvConfig;
use crate::domain::deploy::Deployment;
use crate::infra::{ComposeBuilder, DockerCli, GitCli};
use crate::services::{DeployServices, Fleet};

/// 应用状态
pub struct AppState {
    // ========== 核心配置 ==========
    /// API 密钥（用于验证请求）
    pub api_key: String,
    /// 环境配置
    pub config: EnvConfig,
    /// 服务启动时间
    pub started_at: DateTime<Utc>,

    // ========== 部署 ==========
    /// 容器集群、仓库和构建器
    pub services: DeployServices,
    /// 本机唯一的部署记录，up/down 在整个操作期间持有锁
    pub deployment: Arc<Mutex<Deployment>>,
    /// 最近一次 up 提供的 webhook 密钥（不透明字符串，不做校验）
    pub webhook_secret: RwLock<Option<String>>,
}

impl AppState {
    /// 从环境变量创建应用状态
    pub fn new() -> Self {
        Self::from_config(EnvConfig::from_env())
    }

    /// 使用 docker / git 命令行实现创建应用状态
    pub fn from_config(config: EnvConfig) -> Self {
        tracing::info!(
            api_key_len = config.api_key.len(),
            port = config.port,
            project_dir = %config.project_dir.display(),
            deploy_key = config.deploy_key_path.is_some(),
            daemon_container = %config.daemon_container,
            "Loaded configuration"
        );

        let services = DeployServices {
            fleet: Fleet::new(Arc::new(DockerCli::new()), config.daemon_container.clone()),
            scm: Arc::new(GitCli::new(config.project_dir.clone(), config.deploy_key_path.clone())),
            builder: Arc::new(ComposeBuilder::new(config.project_dir.clone())),
        };
        Self::with_services(config, services)
    }

    /// 使用给定的协作者创建应用状态
    pub fn with_services(config: EnvConfig, services: DeployServices) -> Self {
        Self {
            api_key: config.api_key.clone(),
            started_at: Utc::now(),
            services,
            deployment: Arc::new(Mutex::new(Deployment::default())),
            webhook_secret: RwLock::new(None),
            config,
        }
    }

    /// 取得部署记录的独占访问，守卫可以移入后台任务
    pub async fn lock_deployment(&self) -> OwnedMutexGuard<Deployment> {
        self.deployment.clone().lock_owned().await
    }

    /// 启动时从已有的仓库恢复提交记录
    ///
    /// 守护进程重启后项目容器可能仍在运行，恢复提交后 down/up 才能按已部署处理
    pub async fn recover_deployment(&self) {
        match self.services.scm.current_commit_hash().await {
            Ok(Some(commit)) => {
                tracing::info!(commit = %commit, "Recovered existing deployment");
                self.deployment.lock().await.commit_hash = commit;
            }
            Ok(None) => tracing::debug!("No existing repository found"),
            Err(e) => tracing::warn!(error = %e, "Failed to read existing repository"),
        }
    }

    /// 记录 up 请求中提供的 webhook 密钥
    pub async fn set_webhook_secret(&self, secret: Option<String>) {
        if let Some(secret) = secret.filter(|s| !s.is_empty()) {
            *self.webhook_secret.write().await = Some(secret);
        }
    }
}

impl Default for AppState {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{FakeBuilder, FakeRuntime, FakeScm};

    fn state_with(scm: Arc<FakeScm>) -> AppState {
        let services = DeployServices {
            fleet: Fleet::new(FakeRuntime::with_containers(&[]), "deckhand-daemon"),
            scm,
            builder: FakeBuilder::new(),
        };
        AppState::with_services(EnvConfig::default(), services)
    }

    #[tokio::test]
    async fn test_recover_deployment_from_repository() {
        let state = state_with(FakeScm::cloned("git@github.com:acme/shop.git", "abc123"));
        state.recover_deployment().await;

        let deployment = state.lock_deployment().await;
        assert!(deployment.exists());
        assert_eq!(deployment.commit_hash, "abc123");
    }

    #[tokio::test]
    async fn test_no_repository_means_no_deployment() {
        let state = state_with(FakeScm::empty());
        state.recover_deployment().await;

        assert!(!state.lock_deployment().await.exists());
    }

    #[tokio::test]
    async fn test_empty_webhook_secret_is_ignored() {
        let state = state_with(FakeScm::empty());
        state.set_webhook_secret(Some("s3cret".to_string())).await;
        state.set_webhook_secret(Some(String::new())).await;

        assert_eq!(state.webhook_secret.read().await.as_deref(), Some("s3cret"));
    }
}
