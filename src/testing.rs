//! 测试用的运行时、仓库和构建替身

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::DuplexStream;

use crate::domain::container::Container;
use crate::domain::deploy::BuildType;
use crate::infra::build::{BuildError, BuildSpec, Builder};
use crate::infra::docker::{ContainerRuntime, FleetError, LogOptions};
use crate::infra::git::{ScmError, SourceControl};
use crate::services::resolver::remotes_match;
use crate::state::log_session::{LogSession, LogSource};

/// 内存中的容器运行时
#[derive(Default)]
pub struct FakeRuntime {
    containers: Mutex<Vec<Container>>,
    stops: Mutex<Vec<(String, Duration)>>,
    fail_stop: Mutex<Option<String>>,
    fail_prune: Mutex<bool>,
    prunes: Mutex<usize>,
    unavailable: Mutex<bool>,
    logs: Mutex<HashMap<String, String>>,
    log_calls: Mutex<Vec<(String, LogOptions)>>,
    live_writers: Mutex<Vec<DuplexStream>>,
}

impl FakeRuntime {
    pub fn with_containers(containers: &[(&str, &str)]) -> Arc<Self> {
        let runtime = Self::default();
        *runtime.containers.lock().unwrap() = containers
            .iter()
            .map(|(id, name)| Container::new(*id, *name, "running"))
            .collect();
        Arc::new(runtime)
    }

    pub fn add_container(&self, id: &str, name: &str) {
        self.containers
            .lock()
            .unwrap()
            .push(Container::new(id, name, "running"));
    }

    pub fn running_names(&self) -> Vec<String> {
        self.containers
            .lock()
            .unwrap()
            .iter()
            .map(|c| c.name.clone())
            .collect()
    }

    pub fn stop_calls(&self) -> Vec<(String, Duration)> {
        self.stops.lock().unwrap().clone()
    }

    pub fn stopped_ids(&self) -> Vec<String> {
        self.stop_calls().into_iter().map(|(id, _)| id).collect()
    }

    pub fn fail_stop_on(&self, id: &str) {
        *self.fail_stop.lock().unwrap() = Some(id.to_string());
    }

    pub fn fail_prune(&self) {
        *self.fail_prune.lock().unwrap() = true;
    }

    pub fn prune_count(&self) -> usize {
        *self.prunes.lock().unwrap()
    }

    pub fn set_unavailable(&self) {
        *self.unavailable.lock().unwrap() = true;
    }

    pub fn set_logs(&self, id: &str, text: impl Into<String>) {
        self.logs.lock().unwrap().insert(id.to_string(), text.into());
    }

    pub fn log_calls(&self) -> Vec<(String, LogOptions)> {
        self.log_calls.lock().unwrap().clone()
    }

    /// 取出实时日志的写入端
    pub fn take_live_writer(&self) -> Option<DuplexStream> {
        self.live_writers.lock().unwrap().pop()
    }

    fn check_available(&self) -> Result<(), FleetError> {
        if *self.unavailable.lock().unwrap() {
            Err(FleetError::Unavailable("fake runtime is down".to_string()))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl ContainerRuntime for FakeRuntime {
    async fn list_containers(&self) -> Result<Vec<Container>, FleetError> {
        self.check_available()?;
        Ok(self.containers.lock().unwrap().clone())
    }

    async fn stop_container(&self, id: &str, timeout: Duration) -> Result<(), FleetError> {
        self.check_available()?;
        self.stops.lock().unwrap().push((id.to_string(), timeout));
        if self.fail_stop.lock().unwrap().as_deref() == Some(id) {
            return Err(FleetError::Runtime(format!("cannot stop {}", id)));
        }
        let mut containers = self.containers.lock().unwrap();
        let before = containers.len();
        containers.retain(|c| c.id != id);
        if containers.len() == before {
            return Err(FleetError::NotFound(id.to_string()));
        }
        Ok(())
    }

    async fn container_logs(&self, id: &str, options: LogOptions) -> Result<LogSource, FleetError> {
        self.check_available()?;
        self.log_calls.lock().unwrap().push((id.to_string(), options));
        let text = self
            .logs
            .lock()
            .unwrap()
            .get(id)
            .cloned()
            .ok_or_else(|| FleetError::NotFound(id.to_string()))?;

        if options.follow {
            let (writer, reader) = tokio::io::duplex(1024);
            self.live_writers.lock().unwrap().push(writer);
            return Ok(Box::pin(reader));
        }

        let lines: Vec<&str> = text.lines().collect();
        let start = options.tail.map_or(0, |tail| lines.len().saturating_sub(tail));
        let mut tail = lines[start..].join("\n");
        if !tail.is_empty() {
            tail.push('\n');
        }
        Ok(Box::pin(std::io::Cursor::new(tail.into_bytes())))
    }

    async fn prune_images(&self) -> Result<(), FleetError> {
        self.check_available()?;
        *self.prunes.lock().unwrap() += 1;
        if *self.fail_prune.lock().unwrap() {
            return Err(FleetError::Runtime("prune failed".to_string()));
        }
        Ok(())
    }
}

/// 内存中的仓库
#[derive(Default)]
pub struct FakeScm {
    commit: Mutex<Option<String>>,
    origin: Mutex<Option<String>>,
    /// pull 之后 HEAD 指向的提交
    next_commit: Mutex<Option<String>>,
    calls: Mutex<Vec<String>>,
    fail_clone: Mutex<bool>,
}

impl FakeScm {
    pub fn empty() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// 已克隆的仓库
    pub fn cloned(origin: &str, commit: &str) -> Arc<Self> {
        let scm = Self::default();
        *scm.origin.lock().unwrap() = Some(origin.to_string());
        *scm.commit.lock().unwrap() = Some(commit.to_string());
        Arc::new(scm)
    }

    pub fn set_next_commit(&self, commit: &str) {
        *self.next_commit.lock().unwrap() = Some(commit.to_string());
    }

    pub fn fail_clone(&self) {
        *self.fail_clone.lock().unwrap() = true;
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl SourceControl for FakeScm {
    async fn current_commit_hash(&self) -> Result<Option<String>, ScmError> {
        Ok(self.commit.lock().unwrap().clone())
    }

    async fn compare_remote(&self, url: &str) -> Result<bool, ScmError> {
        Ok(self
            .origin
            .lock()
            .unwrap()
            .as_deref()
            .is_some_and(|origin| remotes_match(origin, url)))
    }

    async fn clone_repo(&self, remote_url: &str, branch: &str, session: &mut LogSession) -> Result<(), ScmError> {
        self.calls.lock().unwrap().push(format!("clone {} {}", remote_url, branch));
        session.println(format!("Cloning {}...", remote_url)).await;
        // 与 git 一致：目标目录已有仓库时克隆失败
        if self.commit.lock().unwrap().is_some() {
            return Err(ScmError::Failed {
                operation: "clone",
                message: "destination path already exists and is not an empty directory".to_string(),
            });
        }
        if *self.fail_clone.lock().unwrap() {
            return Err(ScmError::Failed {
                operation: "clone",
                message: "repository not found".to_string(),
            });
        }
        *self.origin.lock().unwrap() = Some(remote_url.to_string());
        *self.commit.lock().unwrap() = Some("c0ffee".to_string());
        Ok(())
    }

    async fn pull(&self, branch: &str, session: &mut LogSession) -> Result<(), ScmError> {
        self.calls.lock().unwrap().push(format!("pull {}", branch));
        session.println(format!("Pulling {}...", branch)).await;
        if let Some(next) = self.next_commit.lock().unwrap().take() {
            *self.commit.lock().unwrap() = Some(next);
        }
        Ok(())
    }
}

/// 记录调用的构建器，成功时可以在运行时中"启动"容器
#[derive(Default)]
pub struct FakeBuilder {
    runtime: Option<Arc<FakeRuntime>>,
    builds: Mutex<Vec<(BuildType, String)>>,
    fail: Mutex<Option<String>>,
}

impl FakeBuilder {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn starting_on(runtime: Arc<FakeRuntime>) -> Arc<Self> {
        Arc::new(Self {
            runtime: Some(runtime),
            ..Default::default()
        })
    }

    /// 下一次构建失败
    pub fn fail_next(&self, message: &str) {
        *self.fail.lock().unwrap() = Some(message.to_string());
    }

    pub fn builds(&self) -> Vec<(BuildType, String)> {
        self.builds.lock().unwrap().clone()
    }
}

#[async_trait]
impl Builder for FakeBuilder {
    async fn build(&self, spec: &BuildSpec<'_>, session: &mut LogSession) -> Result<(), BuildError> {
        self.builds
            .lock()
            .unwrap()
            .push((spec.build_type, spec.build_file_path.to_string()));
        session.println(format!("Building {}...", spec.project_name)).await;

        let failure = self.fail.lock().unwrap().take();
        if let Some(message) = failure {
            return Err(BuildError::StepFailed {
                step: "compose up".to_string(),
                message,
            });
        }
        if let Some(runtime) = &self.runtime {
            let index = runtime.running_names().len();
            runtime.add_container(&format!("p{}", index), &format!("{}_web_{}", spec.project_name, index));
        }
        Ok(())
    }
}
