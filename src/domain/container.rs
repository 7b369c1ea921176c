//! 容器相关领域模型

use serde::{Deserialize, Serialize};

use crate::config::env::constants::DEFAULT_LOG_ENTRIES;

/// 容器信息（运行时状态的只读投影）
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Container {
    pub id: String,
    /// 容器名称（Docker API 返回的名称带有前导 `/`，CLI 不带）
    pub name: String,
    /// 运行状态 (running, exited, ...)
    pub state: String,
}

impl Container {
    pub fn new(id: impl Into<String>, name: impl Into<String>, state: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            state: state.into(),
        }
    }

    /// 去掉前导 `/` 的名称
    pub fn display_name(&self) -> &str {
        self.name.trim_start_matches('/')
    }

    /// 是否为指定的保留名称（守护进程自身的容器）
    pub fn has_name(&self, reserved: &str) -> bool {
        self.display_name() == reserved.trim_start_matches('/')
    }
}

/// 日志查询参数（原始字符串，由 [`LogRequest::from_query`] 校验）
#[derive(Debug, Default, Deserialize)]
pub struct ContainerLogsQuery {
    pub container: Option<String>,
    pub stream: Option<String>,
    pub entries: Option<String>,
}

/// 日志查询参数错误
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LogQueryError {
    #[error("missing container parameter")]
    MissingContainer,
    #[error("invalid stream value: {0}")]
    InvalidStream(String),
    #[error("invalid number of entries")]
    InvalidEntries(String),
}

/// 已校验的日志请求
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogRequest {
    pub container: String,
    pub stream: bool,
    /// 返回最后 N 行；`stream` 为 true 时忽略
    pub entries: usize,
}

impl LogRequest {
    /// 校验并解析查询参数
    ///
    /// `entries` 缺省或为 0 时使用 500
    pub fn from_query(query: &ContainerLogsQuery) -> Result<Self, LogQueryError> {
        let container = query
            .container
            .as_deref()
            .map(str::trim)
            .filter(|c| !c.is_empty())
            .ok_or(LogQueryError::MissingContainer)?
            .to_string();

        let stream = match query.stream.as_deref().filter(|s| !s.is_empty()) {
            Some(raw) => parse_bool(raw).ok_or_else(|| LogQueryError::InvalidStream(raw.to_string()))?,
            None => false,
        };

        let entries = match query.entries.as_deref().filter(|s| !s.is_empty()) {
            Some(raw) => raw
                .trim()
                .parse::<usize>()
                .map_err(|_| LogQueryError::InvalidEntries(raw.to_string()))?,
            None => 0,
        };

        Ok(Self {
            container,
            stream,
            entries: if entries == 0 { DEFAULT_LOG_ENTRIES } else { entries },
        })
    }
}

/// 接受与常见布尔解析一致的写法
fn parse_bool(raw: &str) -> Option<bool> {
    match raw.trim() {
        "1" | "t" | "T" | "true" | "TRUE" | "True" => Some(true),
        "0" | "f" | "F" | "false" | "FALSE" | "False" => Some(false),
        _ => None,
    }
}
