//! 基础设施模块
//!
//! 封装外部依赖（容器运行时、git、构建命令执行等）

pub mod build;
pub mod command;
pub mod docker;
pub mod git;

pub use build::{BuildError, BuildSpec, Builder, ComposeBuilder};
pub use command::{CommandError, CommandRunner, CommandSpec};
pub use docker::{ContainerRuntime, DockerCli, FleetError, LogOptions};
pub use git::{GitCli, ScmError, SourceControl};
