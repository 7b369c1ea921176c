//! 环境变量配置加载

use std::env;
use std::path::PathBuf;
use std::time::Duration;
use tracing::warn;

use self::constants::{
    DEFAULT_DAEMON_CONTAINER, DEFAULT_PORT, DEFAULT_PROJECT_DIR, LOG_QUERY_TIMEOUT_SECS,
};

/// 环境配置
#[derive(Clone, Debug)]
pub struct EnvConfig {
    /// API 密钥
    pub api_key: String,
    /// 服务监听端口
    pub port: u16,
    /// 项目仓库所在目录
    pub project_dir: PathBuf,
    /// 部署密钥路径（用于 git over ssh，可选）
    pub deploy_key_path: Option<PathBuf>,
    /// 守护进程自身容器的保留名称
    pub daemon_container: String,
    /// 非流式日志查询的超时
    pub log_query_timeout: Duration,
}

impl EnvConfig {
    /// 从环境变量加载配置
    pub fn from_env() -> Self {
        // API Key - 支持旧名称兼容
        let api_key = load_with_fallback("DECKHAND_API_KEY", "API_KEY")
            .unwrap_or_else(|| "change-me-in-production".to_string());
        if env::var("DECKHAND_API_KEY").is_err() && env::var("API_KEY").is_ok() {
            warn!("Deprecated environment variable API_KEY detected. Please use DECKHAND_API_KEY");
        }

        let port = parse_var("PORT").unwrap_or(DEFAULT_PORT);

        let project_dir = env::var("PROJECT_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from(DEFAULT_PROJECT_DIR));

        let deploy_key_path = env::var("DEPLOY_KEY_PATH")
            .ok()
            .filter(|v| !v.is_empty())
            .map(PathBuf::from);

        let daemon_container = env::var("DAEMON_CONTAINER_NAME")
            .ok()
            .filter(|v| !v.is_empty())
            .unwrap_or_else(|| DEFAULT_DAEMON_CONTAINER.to_string());

        let log_query_timeout =
            Duration::from_secs(parse_var("LOG_QUERY_TIMEOUT_SECS").unwrap_or(LOG_QUERY_TIMEOUT_SECS));

        Self {
            api_key,
            port,
            project_dir,
            deploy_key_path,
            daemon_container,
            log_query_timeout,
        }
    }
}

impl Default for EnvConfig {
    fn default() -> Self {
        Self {
            api_key: "change-me-in-production".to_string(),
            port: DEFAULT_PORT,
            project_dir: PathBuf::from(DEFAULT_PROJECT_DIR),
            deploy_key_path: None,
            daemon_container: DEFAULT_DAEMON_CONTAINER.to_string(),
            log_query_timeout: Duration::from_secs(LOG_QUERY_TIMEOUT_SECS),
        }
    }
}

/// 加载配置值，支持旧名称兼容
fn load_with_fallback(primary: &str, fallback: &str) -> Option<String> {
    env::var(primary).ok().or_else(|| env::var(fallback).ok())
}

/// 解析数值型环境变量，格式错误时记录警告并忽略
fn parse_var<T: std::str::FromStr>(name: &str) -> Option<T> {
    let raw = env::var(name).ok()?;
    match raw.trim().parse() {
        Ok(v) => Some(v),
        Err(_) => {
            warn!(var = name, value = %raw, "Ignoring malformed environment variable");
            None
        }
    }
}

/// 常量
pub mod constants {
    /// 默认监听端口
    pub const DEFAULT_PORT: u16 = 4303;

    /// 默认项目目录
    pub const DEFAULT_PROJECT_DIR: &str = "/app/host/project";

    /// 守护进程容器的默认保留名称
    pub const DEFAULT_DAEMON_CONTAINER: &str = "deckhand-daemon";

    /// 停止容器的宽限期（秒），超时后由运行时强制终止
    pub const STOP_TIMEOUT_SECS: u64 = 10;

    /// 非流式日志的默认行数
    pub const DEFAULT_LOG_ENTRIES: usize = 500;

    /// 非流式日志查询超时（秒）
    pub const LOG_QUERY_TIMEOUT_SECS: u64 = 30;

    /// 单条 docker 查询命令超时（秒）
    pub const DOCKER_COMMAND_TIMEOUT_SECS: u64 = 60;

    /// git clone / pull 超时（秒）
    pub const GIT_TIMEOUT_SECS: u64 = 600;

    /// 构建并启动容器的超时（秒）
    pub const BUILD_TIMEOUT_SECS: u64 = 1800; // 30 分钟

    /// 版本号
    pub const VERSION: &str = env!("CARGO_PKG_VERSION");
}
