//! 部署相关领域模型

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// 构建类型
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BuildType {
    /// docker compose 项目
    DockerCompose,
    /// 单个 Dockerfile
    Dockerfile,
}

impl BuildType {
    /// 获取构建类型名称
    pub fn name(&self) -> &'static str {
        match self {
            BuildType::DockerCompose => "docker-compose",
            BuildType::Dockerfile => "dockerfile",
        }
    }

    /// 未指定构建文件时使用的默认文件
    pub fn default_file(&self) -> &'static str {
        match self {
            BuildType::DockerCompose => "docker-compose.yml",
            BuildType::Dockerfile => "Dockerfile",
        }
    }
}

impl fmt::Display for BuildType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// 不支持的构建类型
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unsupported build type '{0}'")]
pub struct UnknownBuildType(pub String);

impl FromStr for BuildType {
    type Err = UnknownBuildType;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "docker-compose" | "docker_compose" | "compose" => Ok(BuildType::DockerCompose),
            "dockerfile" => Ok(BuildType::Dockerfile),
            other => Err(UnknownBuildType(other.to_string())),
        }
    }
}

/// 一次 up 请求所要求的部署目标
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DeployTarget {
    pub project_name: String,
    pub remote_url: String,
    pub branch: String,
    pub build_type: BuildType,
    pub build_file_path: String,
}

/// 当前主机上的部署记录
///
/// 每台主机仅有一个，`commit_hash` 为空表示尚无部署
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct Deployment {
    pub project_name: String,
    pub commit_hash: String,
    pub build_type: Option<BuildType>,
    pub build_file_path: String,
    pub remote_url: String,
    pub branch: String,
}

impl Deployment {
    /// 是否已有部署
    pub fn exists(&self) -> bool {
        !self.commit_hash.is_empty()
    }

    /// 用请求的目标覆盖分支和构建配置（首次部署或记录中没有远端时也写入仓库地址）
    ///
    /// 不会修改 `commit_hash`，它只在构建成功后更新
    pub fn apply_target(&mut self, target: &DeployTarget) {
        if !self.exists() || self.remote_url.is_empty() {
            self.remote_url = target.remote_url.clone();
        }
        if !target.project_name.is_empty() {
            self.project_name = target.project_name.clone();
        }
        self.branch = target.branch.clone();
        self.build_type = Some(target.build_type);
        self.build_file_path = target.build_file_path.clone();
    }

    /// 记录中的项目名、分支和构建配置是否与目标一致
    pub fn matches_target(&self, target: &DeployTarget) -> bool {
        self.project_name == target.project_name
            && self.branch == target.branch
            && self.build_type == Some(target.build_type)
            && self.build_file_path == target.build_file_path
    }
}

/// GET /status 响应
#[derive(Clone, Debug, Serialize)]
pub struct DeploymentStatus {
    pub project: String,
    pub commit_hash: String,
    pub branch: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub build_type: Option<BuildType>,
    /// 项目容器（不含守护进程自身）
    pub containers: Vec<String>,
}

impl DeploymentStatus {
    pub fn new(deployment: &Deployment, containers: Vec<String>) -> Self {
        Self {
            project: deployment.project_name.clone(),
            commit_hash: deployment.commit_hash.clone(),
            branch: deployment.branch.clone(),
            build_type: deployment.build_type,
            containers,
        }
    }
}
