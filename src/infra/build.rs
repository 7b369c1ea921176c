//! 项目构建与启动
//!
//! 构建已检出的项目并以后台方式启动容器，构建成功即表示部署已启动

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, info};

use crate::config::env::constants::BUILD_TIMEOUT_SECS;
use crate::domain::deploy::BuildType;
use crate::state::log_session::LogSession;

use super::command::{combined_output, CommandError, CommandRunner, CommandSpec};

/// 构建错误
#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    #[error("build file not found: {0}")]
    MissingBuildFile(String),
    #[error("{step} failed: {message}")]
    StepFailed { step: String, message: String },
    #[error("{step}: {source}")]
    Command {
        step: String,
        #[source]
        source: CommandError,
    },
}

/// 构建参数
#[derive(Debug, Clone)]
pub struct BuildSpec<'a> {
    pub project_name: &'a str,
    pub build_type: BuildType,
    /// 相对项目目录或绝对路径
    pub build_file_path: &'a str,
}

/// 构建接口
#[async_trait]
pub trait Builder: Send + Sync {
    async fn build(&self, spec: &BuildSpec<'_>, session: &mut LogSession) -> Result<(), BuildError>;
}

/// 使用 docker compose 或 Dockerfile 构建
#[derive(Debug, Clone)]
pub struct ComposeBuilder {
    project_dir: PathBuf,
    timeout: Duration,
}

impl ComposeBuilder {
    pub fn new(project_dir: PathBuf) -> Self {
        Self {
            project_dir,
            timeout: Duration::from_secs(BUILD_TIMEOUT_SECS),
        }
    }

    fn resolve_file(&self, spec: &BuildSpec<'_>) -> PathBuf {
        let file = if spec.build_file_path.is_empty() {
            spec.build_type.default_file()
        } else {
            spec.build_file_path
        };
        let path = Path::new(file);
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.project_dir.join(path)
        }
    }

    async fn step(&self, step: &str, spec: CommandSpec<'_>, session: &mut LogSession) -> Result<(), BuildError> {
        session.println(format!(">>> {}", spec.display())).await;
        let status = CommandRunner::run_streaming(&spec, session)
            .await
            .map_err(|source| BuildError::Command {
                step: step.to_string(),
                source,
            })?;
        if status.success() {
            Ok(())
        } else {
            Err(BuildError::StepFailed {
                step: step.to_string(),
                message: format!("exited with {}", status),
            })
        }
    }
}

#[async_trait]
impl Builder for ComposeBuilder {
    async fn build(&self, spec: &BuildSpec<'_>, session: &mut LogSession) -> Result<(), BuildError> {
        let file = self.resolve_file(spec);
        if !file.exists() {
            return Err(BuildError::MissingBuildFile(file.display().to_string()));
        }
        let file_arg = file.display().to_string();
        let project = project_label(spec.project_name);

        info!(project = %project, build_type = %spec.build_type, file = %file_arg, "Building project");
        session
            .println(format!("Building {} project {}...", spec.build_type, project))
            .await;

        match spec.build_type {
            BuildType::DockerCompose => {
                let (program, base_args) = detect_compose_command().await;
                let compose = CommandSpec::new(program, self.timeout)
                    .current_dir(&self.project_dir)
                    .args(base_args)
                    .args(["-p", project.as_str(), "-f", file_arg.as_str(), "up", "-d", "--build"]);
                self.step("compose up", compose, session).await
            }
            BuildType::Dockerfile => {
                let image = format!("{}-image", project);
                let build = CommandSpec::new("docker", self.timeout)
                    .current_dir(&self.project_dir)
                    .args(["build", "-t", image.as_str(), "-f", file_arg.as_str(), "."]);
                self.step("docker build", build, session).await?;

                // 旧容器在构建前已停止，删除后才能复用名称
                let remove = CommandSpec::new("docker", self.timeout).args(["rm", "-f", project.as_str()]);
                match CommandRunner::run_simple(&remove).await {
                    Ok(output) if output.status.success() => debug!(container = %project, "Removed previous container"),
                    Ok(output) => debug!(
                        container = %project,
                        output = %combined_output(&output).trim(),
                        "No previous container removed"
                    ),
                    Err(e) => debug!(container = %project, error = %e, "Failed to remove previous container"),
                }

                let run = CommandSpec::new("docker", self.timeout)
                    .args(["run", "-d", "--name", project.as_str(), image.as_str()]);
                self.step("docker run", run, session).await
            }
        }
    }
}

/// Docker 项目名只允许小写字母、数字、`-` 和 `_`
fn project_label(name: &str) -> String {
    let label: String = name
        .chars()
        .map(|c| c.to_ascii_lowercase())
        .filter(|c| c.is_ascii_alphanumeric() || *c == '-' || *c == '_')
        .collect();
    if label.is_empty() {
        "project".to_string()
    } else {
        label
    }
}

/// 检测使用 docker-compose 还是 docker compose
async fn detect_compose_command() -> (&'static str, Vec<&'static str>) {
    let check = Command::new("which")
        .arg("docker-compose")
        .output()
        .await;

    if check.map(|o| o.status.success()).unwrap_or(false) {
        ("docker-compose", vec![])
    } else {
        ("docker", vec!["compose"])
    }
}
