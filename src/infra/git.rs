//! Git 仓库操作
//!
//! 部署流程只通过 `SourceControl` 使用仓库：查询当前提交、比对远端、克隆、拉取

use async_trait::async_trait;
use std::path::PathBuf;
use std::time::Duration;
use tracing::info;

use crate::config::env::constants::GIT_TIMEOUT_SECS;
use crate::services::resolver::remotes_match;
use crate::state::log_session::LogSession;

use super::command::{combined_output, CommandError, CommandRunner, CommandSpec};

/// 仓库操作错误
#[derive(Debug, thiserror::Error)]
pub enum ScmError {
    #[error("git {operation} failed: {message}")]
    Failed { operation: &'static str, message: String },
    #[error("git {operation}: {source}")]
    Command {
        operation: &'static str,
        #[source]
        source: CommandError,
    },
}

/// 源码仓库接口
#[async_trait]
pub trait SourceControl: Send + Sync {
    /// 当前 HEAD 提交，仓库不存在时返回 None
    async fn current_commit_hash(&self) -> Result<Option<String>, ScmError>;

    /// 仓库的 origin 是否指向 `url`
    async fn compare_remote(&self, url: &str) -> Result<bool, ScmError>;

    /// 克隆仓库并检出分支
    async fn clone_repo(&self, remote_url: &str, branch: &str, session: &mut LogSession) -> Result<(), ScmError>;

    /// 拉取并切换到分支的最新提交
    async fn pull(&self, branch: &str, session: &mut LogSession) -> Result<(), ScmError>;
}

/// 基于 `git` 命令行的仓库实现
#[derive(Debug, Clone)]
pub struct GitCli {
    repo_dir: PathBuf,
    deploy_key_path: Option<PathBuf>,
    timeout: Duration,
}

impl GitCli {
    pub fn new(repo_dir: PathBuf, deploy_key_path: Option<PathBuf>) -> Self {
        Self {
            repo_dir,
            deploy_key_path,
            timeout: Duration::from_secs(GIT_TIMEOUT_SECS),
        }
    }

    fn spec(&self) -> CommandSpec<'_> {
        let mut spec = CommandSpec::new("git", self.timeout);
        if let Some(key) = &self.deploy_key_path {
            spec = spec.env(
                "GIT_SSH_COMMAND",
                format!("ssh -i {} -o StrictHostKeyChecking=no", key.display()),
            );
        }
        spec
    }

    fn in_repo(&self) -> CommandSpec<'_> {
        self.spec().current_dir(&self.repo_dir)
    }

    async fn query(&self, operation: &'static str, args: &[&str]) -> Result<Option<String>, ScmError> {
        if !self.repo_dir.join(".git").exists() {
            return Ok(None);
        }
        let spec = self.in_repo().args(args.iter().copied());
        let output = CommandRunner::run_simple(&spec)
            .await
            .map_err(|source| ScmError::Command { operation, source })?;
        if !output.status.success() {
            return Err(ScmError::Failed {
                operation,
                message: combined_output(&output).trim().to_string(),
            });
        }
        Ok(Some(String::from_utf8_lossy(&output.stdout).trim().to_string()))
    }

    async fn stream(&self, operation: &'static str, spec: CommandSpec<'_>, session: &mut LogSession) -> Result<(), ScmError> {
        session.println(format!(">>> {}", spec.display())).await;
        let status = CommandRunner::run_streaming(&spec, session)
            .await
            .map_err(|source| ScmError::Command { operation, source })?;
        if status.success() {
            Ok(())
        } else {
            Err(ScmError::Failed {
                operation,
                message: format!("exited with {}", status),
            })
        }
    }
}

#[async_trait]
impl SourceControl for GitCli {
    async fn current_commit_hash(&self) -> Result<Option<String>, ScmError> {
        self.query("rev-parse", &["rev-parse", "HEAD"]).await
    }

    async fn compare_remote(&self, url: &str) -> Result<bool, ScmError> {
        let origin = self.query("remote", &["remote", "get-url", "origin"]).await?;
        Ok(origin.is_some_and(|origin| remotes_match(&origin, url)))
    }

    async fn clone_repo(&self, remote_url: &str, branch: &str, session: &mut LogSession) -> Result<(), ScmError> {
        info!(remote = %remote_url, branch = %branch, dir = %self.repo_dir.display(), "Cloning repository");
        if let Some(parent) = self.repo_dir.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(|e| ScmError::Failed {
                operation: "clone",
                message: e.to_string(),
            })?;
        }
        let spec = self.spec().args([
            "clone".to_string(),
            "--branch".to_string(),
            branch.to_string(),
            remote_url.to_string(),
            self.repo_dir.display().to_string(),
        ]);
        self.stream("clone", spec, session).await
    }

    async fn pull(&self, branch: &str, session: &mut LogSession) -> Result<(), ScmError> {
        info!(branch = %branch, "Updating repository");
        self.stream("fetch", self.in_repo().args(["fetch", "origin", branch]), session)
            .await?;
        self.stream("checkout", self.in_repo().args(["checkout", branch]), session)
            .await?;
        let upstream = format!("origin/{}", branch);
        self.stream("reset", self.in_repo().args(["reset", "--hard", upstream.as_str()]), session)
            .await
    }
}
