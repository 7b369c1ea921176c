//! Docker 运行时封装
//!
//! `ContainerRuntime` 是容器运行时的最小查询/命令接口，
//! `DockerCli` 通过 `docker` 命令行实现它

use async_trait::async_trait;
use futures::stream;
use std::io;
use std::pin::Pin;
use std::process::Stdio;
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::io::{AsyncRead, ReadBuf};
use tokio::process::{Child, Command};
use tokio_util::io::{ReaderStream, StreamReader};
use tracing::{debug, warn};

use crate::config::env::constants::DOCKER_COMMAND_TIMEOUT_SECS;
use crate::domain::container::Container;
use crate::state::log_session::LogSource;

use super::command::{combined_output, CommandError, CommandRunner, CommandSpec};

/// 容器运行时错误
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FleetError {
    /// 无法连接运行时
    #[error("container runtime unavailable: {0}")]
    Unavailable(String),
    /// 容器不存在
    #[error("No such container: {0}")]
    NotFound(String),
    /// 只有守护进程自身（或完全没有）容器在运行
    #[error("There are currently no active containers")]
    NoContainers {
        /// true 表示只剩守护进程容器（正常的空闲状态）
        daemon_only: bool,
    },
    /// 运行时命令失败
    #[error("container runtime error: {0}")]
    Runtime(String),
}

/// 日志查询选项
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LogOptions {
    pub timestamps: bool,
    /// true 时返回无界的实时流
    pub follow: bool,
    /// 只返回最后 N 行
    pub tail: Option<usize>,
}

/// 容器运行时接口
#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    /// 列出正在运行的容器（含守护进程自身）
    async fn list_containers(&self) -> Result<Vec<Container>, FleetError>;

    /// 停止容器，`timeout` 为强制终止前的宽限期
    async fn stop_container(&self, id: &str, timeout: Duration) -> Result<(), FleetError>;

    /// 获取容器日志字节流
    async fn container_logs(&self, id: &str, options: LogOptions) -> Result<LogSource, FleetError>;

    /// 清理未使用的镜像
    async fn prune_images(&self) -> Result<(), FleetError>;
}

/// 基于 `docker` 命令行的运行时实现
#[derive(Debug, Clone)]
pub struct DockerCli {
    program: String,
    command_timeout: Duration,
}

impl DockerCli {
    pub fn new() -> Self {
        Self {
            program: "docker".to_string(),
            command_timeout: Duration::from_secs(DOCKER_COMMAND_TIMEOUT_SECS),
        }
    }

    async fn run(&self, args: &[&str], timeout: Duration) -> Result<String, FleetError> {
        let spec = CommandSpec::new(&self.program, timeout).args(args.iter().copied());
        let output = CommandRunner::run_simple(&spec).await.map_err(|e| match e {
            CommandError::SpawnFailed(e) => FleetError::Unavailable(e.to_string()),
            other => FleetError::Runtime(other.to_string()),
        })?;

        if output.status.success() {
            Ok(String::from_utf8_lossy(&output.stdout).into_owned())
        } else {
            Err(classify_failure(&combined_output(&output)))
        }
    }

    /// 确认容器存在，否则返回 NotFound
    async fn inspect(&self, id: &str) -> Result<(), FleetError> {
        self.run(&["inspect", "--type", "container", "--format", "{{.Id}}", id], self.command_timeout)
            .await
            .map(|_| ())
    }
}

impl Default for DockerCli {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ContainerRuntime for DockerCli {
    async fn list_containers(&self) -> Result<Vec<Container>, FleetError> {
        let stdout = self
            .run(&["ps", "--no-trunc", "--format", "{{.ID}}|{{.Names}}|{{.State}}"], self.command_timeout)
            .await?;
        Ok(parse_ps_output(&stdout))
    }

    async fn stop_container(&self, id: &str, timeout: Duration) -> Result<(), FleetError> {
        let grace = timeout.as_secs().to_string();
        // 命令本身的超时要留出宽限期之外的余量
        self.run(&["stop", "-t", &grace, id], timeout + self.command_timeout)
            .await
            .map(|_| ())
    }

    async fn container_logs(&self, id: &str, options: LogOptions) -> Result<LogSource, FleetError> {
        self.inspect(id).await?;

        let mut cmd = Command::new(&self.program);
        cmd.arg("logs");
        if options.timestamps {
            cmd.arg("--timestamps");
        }
        if options.follow {
            cmd.arg("--follow");
        } else if let Some(tail) = options.tail {
            cmd.arg("--tail").arg(tail.to_string());
        }
        cmd.arg(id)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = cmd
            .spawn()
            .map_err(|e| FleetError::Unavailable(e.to_string()))?;
        debug!(container = %id, follow = options.follow, "Spawned docker logs");

        let stdout = child.stdout.take().ok_or_else(|| FleetError::Runtime("missing stdout pipe".into()))?;
        let stderr = child.stderr.take().ok_or_else(|| FleetError::Runtime("missing stderr pipe".into()))?;

        // 容器的 stdout 和 stderr 分别出现在 docker logs 的两个管道上
        let merged = stream::select(ReaderStream::new(stdout), ReaderStream::new(stderr));

        Ok(Box::pin(ChildLogReader {
            reader: Box::pin(StreamReader::new(merged)),
            _child: child,
        }))
    }

    async fn prune_images(&self) -> Result<(), FleetError> {
        self.run(&["image", "prune", "--force"], self.command_timeout)
            .await
            .map(|_| ())
    }
}

/// 持有 `docker logs` 子进程的读取器，丢弃时终止子进程
struct ChildLogReader {
    reader: Pin<Box<dyn AsyncRead + Send>>,
    _child: Child,
}

impl AsyncRead for ChildLogReader {
    fn poll_read(self: Pin<&mut Self>, cx: &mut Context<'_>, buf: &mut ReadBuf<'_>) -> Poll<io::Result<()>> {
        self.get_mut().reader.as_mut().poll_read(cx, buf)
    }
}

/// 解析 `docker ps --format {{.ID}}|{{.Names}}|{{.State}}` 的输出
fn parse_ps_output(stdout: &str) -> Vec<Container> {
    stdout
        .lines()
        .filter(|line| !line.trim().is_empty())
        .filter_map(|line| {
            let mut parts = line.splitn(3, '|');
            let id = parts.next()?.trim();
            // 多个名称以逗号分隔，取第一个
            let name = parts.next()?.split(',').next().unwrap_or_default().trim();
            let state = parts.next().unwrap_or("running").trim();
            if id.is_empty() {
                warn!(line = %line, "Skipping malformed docker ps line");
                return None;
            }
            Some(Container::new(id, name, state))
        })
        .collect()
}

/// 根据 docker 的错误输出区分错误类型
fn classify_failure(message: &str) -> FleetError {
    let message = message.trim().to_string();
    if message.contains("No such container") || message.contains("No such object") {
        FleetError::NotFound(message)
    } else if message.contains("Cannot connect to the Docker daemon") || message.contains("permission denied while trying to connect") {
        FleetError::Unavailable(message)
    } else {
        FleetError::Runtime(message)
    }
}
