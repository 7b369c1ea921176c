//! 部署状态判定
//!
//! 根据当前部署记录和请求的目标，决定是首次初始化还是更新

use crate::domain::deploy::{DeployTarget, Deployment};
use crate::error::DeployError;

/// 本次 up 需要执行的动作
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeployAction {
    /// 尚无部署：克隆仓库，本次请求跳过拉取
    Initialize,
    /// 已有部署且远端一致：拉取分支后重新构建
    Update { branch: String },
}

/// 判定部署动作
///
/// 纯函数，不访问仓库；远端比对使用记录中的 `remote_url`，
/// 记录中没有远端（如重启后只恢复了提交）时交给仓库比对
pub fn resolve(deployment: &Deployment, target: &DeployTarget) -> Result<DeployAction, DeployError> {
    if !deployment.exists() {
        return Ok(DeployAction::Initialize);
    }
    if !deployment.remote_url.is_empty() && !remotes_match(&deployment.remote_url, &target.remote_url) {
        return Err(DeployError::RemoteMismatch {
            current: deployment.remote_url.clone(),
            requested: target.remote_url.clone(),
        });
    }
    Ok(DeployAction::Update {
        branch: target.branch.clone(),
    })
}

/// 两个仓库地址是否指向同一个仓库
///
/// `https://host/owner/repo`、`ssh://git@host/owner/repo` 和
/// `git@host:owner/repo` 视为相同，忽略末尾的 `/` 和 `.git`
pub fn remotes_match(a: &str, b: &str) -> bool {
    match (normalize_remote(a), normalize_remote(b)) {
        (Some(a), Some(b)) => a == b,
        _ => false,
    }
}

/// 规范化为 `host/owner/repo`（小写主机名）
fn normalize_remote(url: &str) -> Option<String> {
    let url = url.trim();
    if url.is_empty() {
        return None;
    }

    let rest = if let Some((_, rest)) = url.split_once("://") {
        // https://host/path 或 ssh://user@host:port/path
        let rest = rest.rsplit_once('@').map_or(rest, |(_, r)| r);
        let (host, path) = rest.split_once('/').unwrap_or((rest, ""));
        let host = host.split(':').next().unwrap_or(host);
        format!("{}/{}", host.to_ascii_lowercase(), path)
    } else if let Some((user_host, path)) = url.split_once(':') {
        // scp 风格：git@host:owner/repo
        let host = user_host.rsplit_once('@').map_or(user_host, |(_, h)| h);
        format!("{}/{}", host.to_ascii_lowercase(), path.trim_start_matches('/'))
    } else {
        url.to_string()
    };

    let rest = rest.trim_end_matches('/');
    let rest = rest.strip_suffix(".git").unwrap_or(rest);
    Some(rest.trim_end_matches('/').to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::deploy::BuildType;

    fn target(remote: &str) -> DeployTarget {
        DeployTarget {
            project_name: "shop".to_string(),
            remote_url: remote.to_string(),
            branch: "main".to_string(),
            build_type: BuildType::DockerCompose,
            build_file_path: String::new(),
        }
    }

    fn deployed(remote: &str) -> Deployment {
        Deployment {
            project_name: "shop".to_string(),
            commit_hash: "abc123".to_string(),
            remote_url: remote.to_string(),
            branch: "main".to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn test_empty_commit_initializes() {
        let deployment = Deployment {
            remote_url: "git@github.com:acme/other.git".to_string(),
            ..Default::default()
        };
        let action = resolve(&deployment, &target("git@github.com:acme/shop.git")).unwrap();
        assert_eq!(action, DeployAction::Initialize);
    }

    #[test]
    fn test_matching_remote_updates_requested_branch() {
        let mut t = target("https://github.com/acme/shop");
        t.branch = "release".to_string();

        let action = resolve(&deployed("git@github.com:acme/shop.git"), &t).unwrap();
        assert_eq!(
            action,
            DeployAction::Update {
                branch: "release".to_string()
            }
        );
    }

    #[test]
    fn test_different_remote_is_mismatch() {
        let result = resolve(
            &deployed("git@github.com:acme/shop.git"),
            &target("git@github.com:acme/blog.git"),
        );
        assert!(matches!(result, Err(DeployError::RemoteMismatch { .. })));
    }

    #[test]
    fn test_unknown_recorded_remote_defers_to_repository() {
        let action = resolve(&deployed(""), &target("git@github.com:acme/blog.git")).unwrap();
        assert!(matches!(action, DeployAction::Update { .. }));
    }

    #[test]
    fn test_remotes_match_variants() {
        let same = [
            "git@github.com:acme/shop.git",
            "https://github.com/acme/shop",
            "https://github.com/acme/shop.git/",
            "ssh://git@github.com/acme/shop.git",
            "ssh://git@GitHub.com:22/acme/shop",
            "  https://token@github.com/acme/shop  ",
        ];
        for url in same {
            assert!(remotes_match("git@github.com:acme/shop.git", url), "{}", url);
        }

        assert!(!remotes_match("git@github.com:acme/shop.git", "git@gitlab.com:acme/shop.git"));
        assert!(!remotes_match("git@github.com:acme/shop.git", "git@github.com:acme/shop-api.git"));
        assert!(!remotes_match("", ""));
    }
}
