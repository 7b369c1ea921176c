//! 容器日志 API
//!
//! GET /logs?container=..&stream=..&entries=..
//! - 有界模式：返回最后 `entries` 行（默认 500）的纯文本
//! - 实时模式：升级为 WebSocket，持续推送直到容器停止或客户端断开

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Query, State,
    },
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use futures::StreamExt;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::domain::container::{ContainerLogsQuery, LogRequest};
use crate::error::{ApiError, ApiResult, DeployError};
use crate::infra::docker::LogOptions;
use crate::middleware::RequireApiKey;
use crate::state::app_state::get_shutdown_token;
use crate::services::Fleet;
use crate::state::log_session::{LogSession, LogSource, SessionError};
use crate::state::sink::{ResponseSink, SocketSink};
use crate::state::AppState;

/// 创建日志路由
pub fn router() -> Router<Arc<AppState>> {
    Router::new().route("/logs", get(container_logs))
}

/// 获取容器日志
///
/// GET /logs
/// 需要 API Key
async fn container_logs(
    _auth: RequireApiKey,
    State(state): State<Arc<AppState>>,
    Query(query): Query<ContainerLogsQuery>,
    ws: Option<WebSocketUpgrade>,
) -> ApiResult<Response> {
    let request = LogRequest::from_query(&query).map_err(|e| ApiError::bad_request(e.to_string()))?;
    let fleet = &state.services.fleet;

    if request.stream {
        let ws = ws.ok_or_else(|| ApiError::bad_request("stream=true requires a websocket upgrade"))?;
        let options = LogOptions {
            timestamps: true,
            follow: true,
            tail: None,
        };
        // 升级前打开来源，容器不存在时仍能返回 404
        let source = open_logs(fleet, &request.container, options, &mut LogSession::console()).await?;

        info!(container = %request.container, "Streaming container logs");
        let container = request.container;
        return Ok(ws.on_upgrade(move |socket| stream_logs(socket, source, container)));
    }

    let options = LogOptions {
        timestamps: true,
        follow: false,
        tail: Some(request.entries),
    };
    let source = open_logs(fleet, &request.container, options, &mut LogSession::console()).await?;

    let (sink, body) = ResponseSink::channel();
    let mut session = LogSession::console().with_primary(sink);
    let drained = session
        .drain_bounded(source, state.config.log_query_timeout)
        .await;
    session.close().await;

    match drained {
        Ok(bytes) => {
            debug!(container = %request.container, bytes, entries = request.entries, "Fetched container logs");
            Ok((
                StatusCode::OK,
                [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
                body.collect().await,
            )
                .into_response())
        }
        Err(e @ (SessionError::Timeout(_) | SessionError::Source(_))) => {
            error!(container = %request.container, error = %e, "Failed to read container logs");
            Err(ApiError::internal(e.to_string()))
        }
        Err(SessionError::Disconnected) => Err(ApiError::internal("log response closed early")),
    }
}

/// 打开日志来源，失败时在会话中写入错误行
async fn open_logs(fleet: &Fleet, container: &str, options: LogOptions, session: &mut LogSession) -> Result<LogSource, DeployError> {
    match fleet.fetch_logs(container, options).await {
        Ok(source) => Ok(source),
        Err(e) => {
            let e = DeployError::from(e);
            if e.status() == StatusCode::NOT_FOUND {
                warn!(container = %container, error = %e, "Log request for unknown container");
            } else {
                error!(container = %container, error = %e, "Failed to open container logs");
            }
            session.write_error(format!("logs {}: {}", container, e)).await;
            Err(e)
        }
    }
}

/// 实时推送日志，直到来源结束、客户端关闭或服务关闭
async fn stream_logs(socket: WebSocket, source: LogSource, container: String) {
    let (tx, rx) = socket.split();
    let session = LogSession::console().with_primary(SocketSink::new(tx));
    let handle = session.spawn_live(source, get_shutdown_token().child_token());

    let watcher = tokio::spawn(watch_client(rx, handle.cancellation_token()));
    let end = handle.join().await;
    let _ = watcher.await;

    info!(container = %container, end = ?end, "Log stream ended");
}

/// 监听客户端，关闭或出错时取消会话
async fn watch_client(mut rx: futures::stream::SplitStream<WebSocket>, cancel: CancellationToken) {
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            message = rx.next() => match message {
                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => {
                    debug!("Log stream client disconnected");
                    cancel.cancel();
                    break;
                }
                Some(Ok(_)) => {}
            },
        }
    }
}
