//! Deckhand Agent - 持续部署代理
//!
//! 在远程主机上管理单个项目：启动/更新部署（up）、下线（down）、查看容器日志（logs）

pub mod api;
pub mod config;
pub mod domain;
pub mod error;
pub mod infra;
pub mod middleware;
pub mod services;
pub mod state;

#[cfg(test)]
mod testing;

use anyhow::Context;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{info, warn};

use crate::config::env::constants::VERSION;
use crate::state::app_state::{get_shutdown_token, trigger_shutdown};
use crate::state::AppState;

/// 命令行覆盖的运行时参数
#[derive(Debug, Clone, Default)]
pub struct RuntimeConfig {
    /// 覆盖 PORT 环境变量
    pub port_override: Option<u16>,
}

/// 初始化状态并运行 HTTP 服务，直到收到关闭信号
pub async fn init_and_run_agent_with_config(runtime: RuntimeConfig) -> anyhow::Result<()> {
    let state = Arc::new(AppState::new());
    state.recover_deployment().await;

    let port = runtime.port_override.unwrap_or(state.config.port);
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {}", addr))?;

    info!(
        %addr,
        version = VERSION,
        daemon_container = %state.config.daemon_container,
        "Deckhand agent listening"
    );

    tokio::spawn(async {
        shutdown_signal().await;
        info!("Shutdown signal received");
        trigger_shutdown();
    });

    let shutdown = get_shutdown_token();
    axum::serve(listener, api::router(state))
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await
        .context("server error")?;

    info!("Deckhand agent stopped");
    Ok(())
}

/// 等待 ctrl-c 或 SIGTERM
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
