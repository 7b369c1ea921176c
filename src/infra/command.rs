//! 命令执行器
//!
//! 提供统一的命令执行接口，支持：
//! - 实时输出写入日志会话
//! - 超时控制
//! - stdout/stderr 分离

use std::path::Path;
use std::process::{ExitStatus, Output, Stdio};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tracing::error;

use crate::state::log_session::LogSession;

/// 命令执行器
pub struct CommandRunner;

/// 命令执行错误
#[derive(Debug)]
pub enum CommandError {
    /// 命令启动失败
    SpawnFailed(std::io::Error),
    /// 命令超时
    Timeout(Duration),
    /// 等待命令完成失败
    WaitFailed(std::io::Error),
}

impl std::fmt::Display for CommandError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CommandError::SpawnFailed(e) => write!(f, "Failed to spawn command: {}", e),
            CommandError::Timeout(t) => write!(f, "Command timed out after {:?}", t),
            CommandError::WaitFailed(e) => write!(f, "Failed to wait for command: {}", e),
        }
    }
}

impl std::error::Error for CommandError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            CommandError::SpawnFailed(e) | CommandError::WaitFailed(e) => Some(e),
            CommandError::Timeout(_) => None,
        }
    }
}

/// 一条待执行的命令
pub struct CommandSpec<'a> {
    pub program: &'a str,
    pub args: Vec<String>,
    pub work_dir: Option<&'a Path>,
    pub envs: Vec<(String, String)>,
    pub timeout: Duration,
}

impl<'a> CommandSpec<'a> {
    pub fn new(program: &'a str, timeout: Duration) -> Self {
        Self {
            program,
            args: Vec::new(),
            work_dir: None,
            envs: Vec::new(),
            timeout,
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn current_dir(mut self, dir: &'a Path) -> Self {
        self.work_dir = Some(dir);
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.envs.push((key.into(), value.into()));
        self
    }

    /// 用于日志的命令行文本
    pub fn display(&self) -> String {
        std::iter::once(self.program.to_string())
            .chain(self.args.iter().cloned())
            .collect::<Vec<_>>()
            .join(" ")
    }

    fn command(&self) -> Command {
        let mut cmd = Command::new(self.program);
        cmd.args(&self.args).envs(self.envs.iter().map(|(k, v)| (k, v)));
        if let Some(dir) = self.work_dir {
            cmd.current_dir(dir);
        }
        cmd.kill_on_drop(true);
        cmd
    }
}

impl CommandRunner {
    /// 执行简单命令（无流式输出）
    ///
    /// 超时后子进程随 future 一起被丢弃并终止
    pub async fn run_simple(spec: &CommandSpec<'_>) -> Result<Output, CommandError> {
        let mut cmd = spec.command();
        let child = cmd.output();

        tokio::select! {
            result = child => {
                result.map_err(CommandError::SpawnFailed)
            }
            _ = tokio::time::sleep(spec.timeout) => {
                Err(CommandError::Timeout(spec.timeout))
            }
        }
    }

    /// 执行命令，把 stdout/stderr 按行写入日志会话
    pub async fn run_streaming(spec: &CommandSpec<'_>, session: &mut LogSession) -> Result<ExitStatus, CommandError> {
        let mut cmd = spec.command();
        let mut child = cmd
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(CommandError::SpawnFailed)?;

        let mut stdout = child.stdout.take().map(|s| BufReader::new(s).lines());
        let mut stderr = child.stderr.take().map(|s| BufReader::new(s).lines());

        let deadline = tokio::time::sleep(spec.timeout);
        tokio::pin!(deadline);

        while stdout.is_some() || stderr.is_some() {
            tokio::select! {
                line = next_line(&mut stdout), if stdout.is_some() => match line {
                    Some(line) => session.println(line).await,
                    None => stdout = None,
                },
                line = next_line(&mut stderr), if stderr.is_some() => match line {
                    Some(line) => session.println(line).await,
                    None => stderr = None,
                },
                _ = &mut deadline => {
                    error!(command = %spec.display(), "Command timed out after {:?}", spec.timeout);
                    let _ = child.kill().await;
                    return Err(CommandError::Timeout(spec.timeout));
                }
            }
        }

        child.wait().await.map_err(CommandError::WaitFailed)
    }
}

type Lines<R> = tokio::io::Lines<BufReader<R>>;

async fn next_line<R>(lines: &mut Option<Lines<R>>) -> Option<String>
where
    R: tokio::io::AsyncRead + Unpin,
{
    match lines {
        Some(lines) => lines.next_line().await.ok().flatten(),
        None => None,
    }
}

/// 把输出的 stdout 和 stderr 合并成文本
pub fn combined_output(output: &Output) -> String {
    let mut text = String::from_utf8_lossy(&output.stdout).into_owned();
    let stderr = String::from_utf8_lossy(&output.stderr);
    if !stderr.trim().is_empty() {
        if !text.is_empty() && !text.ends_with('\n') {
            text.push('\n');
        }
        text.push_str(&stderr);
    }
    text
}
