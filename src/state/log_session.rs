//! 日志会话
//!
//! 把一个日志来源绑定到若干输出端，支持两种模式：
//! - 有界模式：一次性读完来源，整体写入响应
//! - 实时模式：后台 flush 任务持续转发，直到来源结束、输出端断开或被取消
//!
//! 每个会话独占自己的输出端，控制台输出端总是挂载

use std::io;
use std::pin::Pin;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use uuid::Uuid;

use super::sink::{ConsoleSink, LogSink};

/// 日志字节来源
pub type LogSource = Pin<Box<dyn AsyncRead + Send>>;

/// flush 任务单次读取的缓冲大小
const FLUSH_BUFFER_SIZE: usize = 8 * 1024;

/// 会话错误
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    /// 主输出端写入失败（客户端已断开）
    #[error("client disconnected")]
    Disconnected,
    /// 有界读取超时
    #[error("log query timed out after {0:?}")]
    Timeout(Duration),
    /// 读取来源失败
    #[error("failed to read log source: {0}")]
    Source(#[from] io::Error),
}

/// 实时模式结束原因
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FlushEnd {
    /// 来源结束（容器已停止）
    SourceClosed,
    /// 主输出端写入失败（客户端断开）
    SinkClosed,
    /// 收到取消信号
    Cancelled,
    /// 读取来源出错
    SourceError(String),
}

struct SinkSlot {
    sink: Box<dyn LogSink>,
    primary: bool,
    failed: bool,
}

/// 日志会话
pub struct LogSession {
    id: Uuid,
    sinks: Vec<SinkSlot>,
    disconnected: bool,
}

impl LogSession {
    /// 创建会话，`console` 作为第一个输出端
    pub fn new(console: impl LogSink + 'static) -> Self {
        Self {
            id: Uuid::new_v4(),
            sinks: vec![SinkSlot {
                sink: Box::new(console),
                primary: false,
                failed: false,
            }],
            disconnected: false,
        }
    }

    /// 只写控制台的会话
    pub fn console() -> Self {
        Self::new(ConsoleSink::stdout())
    }

    /// 挂载主输出端（HTTP 响应或 WebSocket）
    pub fn with_primary(mut self, sink: impl LogSink + 'static) -> Self {
        self.sinks.push(SinkSlot {
            sink: Box::new(sink),
            primary: true,
            failed: false,
        });
        self
    }

    /// 主输出端是否已断开
    pub fn is_disconnected(&self) -> bool {
        self.disconnected
    }

    /// 扇出写入所有仍可用的输出端
    ///
    /// 单个输出端失败只会让它被跳过，其余输出端继续写入；
    /// 主输出端失败时返回 [`SessionError::Disconnected`]
    pub async fn write(&mut self, chunk: &[u8]) -> Result<(), SessionError> {
        for slot in self.sinks.iter_mut().filter(|s| !s.failed) {
            if let Err(e) = slot.sink.write(chunk).await {
                slot.failed = true;
                if slot.primary {
                    self.disconnected = true;
                }
                debug!(
                    session = %self.id,
                    sink = slot.sink.name(),
                    error = %e,
                    "Log sink failed, detaching"
                );
            }
        }

        if self.disconnected {
            Err(SessionError::Disconnected)
        } else {
            Ok(())
        }
    }

    /// 写入一行进度信息（客户端断开不影响调用方）
    pub async fn println(&mut self, line: impl AsRef<str>) {
        let mut text = line.as_ref().to_string();
        if !text.ends_with('\n') {
            text.push('\n');
        }
        let _ = self.write(text.as_bytes()).await;
    }

    /// 写入一行可读的错误信息
    pub async fn write_error(&mut self, message: impl AsRef<str>) {
        self.println(format!("[ERROR] {}", message.as_ref())).await;
    }

    /// 有界模式：在超时内读完来源，然后一次性写入
    ///
    /// 返回读取的字节数
    pub async fn drain_bounded<R>(&mut self, mut source: R, timeout: Duration) -> Result<usize, SessionError>
    where
        R: AsyncRead + Unpin,
    {
        let mut buf = Vec::new();
        match tokio::time::timeout(timeout, source.read_to_end(&mut buf)).await {
            Err(_) => Err(SessionError::Timeout(timeout)),
            Ok(Err(e)) => Err(SessionError::Source(e)),
            Ok(Ok(n)) => {
                drop(source);
                self.write(&buf).await?;
                Ok(n)
            }
        }
    }

    /// 实时模式：启动 flush 任务
    ///
    /// 会话和来源的所有权都移交给任务，任何退出路径上都会释放来源、关闭输出端并触发取消
    pub fn spawn_live(self, source: LogSource, cancel: CancellationToken) -> LiveHandle {
        let task = tokio::spawn(flush_routine(self, source, cancel.clone()));
        LiveHandle { cancel, task }
    }

    /// 关闭所有输出端
    pub async fn close(mut self) {
        for slot in self.sinks.iter_mut() {
            if let Err(e) = slot.sink.close().await {
                debug!(session = %self.id, sink = slot.sink.name(), error = %e, "Failed to close log sink");
            }
        }
    }
}

/// 实时会话句柄
pub struct LiveHandle {
    cancel: CancellationToken,
    task: JoinHandle<FlushEnd>,
}

impl LiveHandle {
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// 等待 flush 任务结束
    pub async fn join(self) -> FlushEnd {
        match self.task.await {
            Ok(end) => end,
            Err(e) => {
                warn!(error = %e, "Flush routine panicked");
                FlushEnd::SourceError(e.to_string())
            }
        }
    }
}

/// flush 任务：把来源持续复制到输出端
async fn flush_routine(mut session: LogSession, mut source: LogSource, cancel: CancellationToken) -> FlushEnd {
    let mut buf = vec![0u8; FLUSH_BUFFER_SIZE];

    let end = loop {
        let read = tokio::select! {
            biased;
            _ = cancel.cancelled() => break FlushEnd::Cancelled,
            read = source.read(&mut buf) => read,
        };

        match read {
            Ok(0) => break FlushEnd::SourceClosed,
            Ok(n) => {
                if session.write(&buf[..n]).await.is_err() {
                    break FlushEnd::SinkClosed;
                }
            }
            Err(e) => break FlushEnd::SourceError(e.to_string()),
        }
    };

    // 来源先于输出端释放，底层 `docker logs` 进程随之结束
    drop(source);
    cancel.cancel();

    debug!(session = %session.id, end = ?end, "Flush routine finished");
    session.close().await;
    end
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::sink::ResponseSink;
    use async_trait::async_trait;
    use std::sync::{Arc, Mutex};
    use tokio::io::AsyncWriteExt;

    /// 记录写入内容，可设置在第 N 次写入后失败
    #[derive(Clone, Default)]
    struct RecordingSink {
        written: Arc<Mutex<Vec<u8>>>,
        closed: Arc<Mutex<bool>>,
        fail_after: Option<usize>,
        writes: Arc<Mutex<usize>>,
    }

    impl RecordingSink {
        fn failing_after(n: usize) -> Self {
            Self {
                fail_after: Some(n),
                ..Default::default()
            }
        }

        fn contents(&self) -> String {
            String::from_utf8_lossy(&self.written.lock().unwrap()).into_owned()
        }
    }

    #[async_trait]
    impl LogSink for RecordingSink {
        fn name(&self) -> &'static str {
            "recording"
        }

        async fn write(&mut self, chunk: &[u8]) -> io::Result<()> {
            let mut writes = self.writes.lock().unwrap();
            if self.fail_after.is_some_and(|n| *writes >= n) {
                return Err(io::Error::new(io::ErrorKind::BrokenPipe, "gone"));
            }
            *writes += 1;
            self.written.lock().unwrap().extend_from_slice(chunk);
            Ok(())
        }

        async fn close(&mut self) -> io::Result<()> {
            *self.closed.lock().unwrap() = true;
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_fan_out_isolates_failing_sink() {
        let console = RecordingSink::failing_after(0);
        let (primary, body) = ResponseSink::channel();
        let mut session = LogSession::new(console.clone()).with_primary(primary);

        session.println("Stopping web...").await;
        session.println("Stopping db...").await;
        assert!(!session.is_disconnected());
        session.close().await;

        assert_eq!(console.contents(), "");
        assert_eq!(
            String::from_utf8(body.collect().await).unwrap(),
            "Stopping web...\nStopping db...\n"
        );
    }

    #[tokio::test]
    async fn test_console_keeps_receiving_after_client_disconnect() {
        let console = RecordingSink::default();
        let (primary, body) = ResponseSink::channel();
        drop(body);
        let mut session = LogSession::new(console.clone()).with_primary(primary);

        assert!(matches!(session.write(b"one\n").await, Err(SessionError::Disconnected)));
        session.println("two").await;

        assert!(session.is_disconnected());
        assert_eq!(console.contents(), "one\ntwo\n");
    }

    #[tokio::test]
    async fn test_drain_bounded_writes_once() {
        let primary = RecordingSink::default();
        let mut session = LogSession::new(RecordingSink::default()).with_primary(primary.clone());

        let source: &[u8] = b"line 1\nline 2\n";
        let n = session.drain_bounded(source, Duration::from_secs(1)).await.unwrap();

        assert_eq!(n, 14);
        assert_eq!(*primary.writes.lock().unwrap(), 1);
        assert_eq!(primary.contents(), "line 1\nline 2\n");
    }

    #[tokio::test]
    async fn test_drain_bounded_times_out_on_endless_source() {
        let (_writer, reader) = tokio::io::duplex(64);
        let mut session = LogSession::new(RecordingSink::default());

        let result = session.drain_bounded(reader, Duration::from_millis(20)).await;
        assert!(matches!(result, Err(SessionError::Timeout(_))));
    }

    #[tokio::test]
    async fn test_live_ends_when_source_closes() {
        let (mut writer, reader) = tokio::io::duplex(64);
        let primary = RecordingSink::default();
        let session = LogSession::new(RecordingSink::default()).with_primary(primary.clone());

        let handle = session.spawn_live(Box::pin(reader), CancellationToken::new());
        writer.write_all(b"tail line\n").await.unwrap();
        drop(writer);

        assert_eq!(handle.join().await, FlushEnd::SourceClosed);
        assert_eq!(primary.contents(), "tail line\n");
        assert!(*primary.closed.lock().unwrap());
    }

    #[tokio::test]
    async fn test_live_releases_source_when_sink_closes() {
        let (mut writer, reader) = tokio::io::duplex(64);
        let primary = RecordingSink::failing_after(0);
        let session = LogSession::new(RecordingSink::default()).with_primary(primary.clone());
        let cancel = CancellationToken::new();

        let handle = session.spawn_live(Box::pin(reader), cancel.clone());
        writer.write_all(b"first\n").await.unwrap();

        let end = tokio::time::timeout(Duration::from_secs(1), handle.join())
            .await
            .expect("flush routine should stop after one failed write");
        assert_eq!(end, FlushEnd::SinkClosed);
        assert!(cancel.is_cancelled());

        // 读端已被释放
        let err = writer.write_all(b"second\n").await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::BrokenPipe);
        assert!(*primary.closed.lock().unwrap());
    }

    #[tokio::test]
    async fn test_live_stops_on_cancel() {
        let (_writer, reader) = tokio::io::duplex(64);
        let session = LogSession::new(RecordingSink::default());

        let handle = session.spawn_live(Box::pin(reader), CancellationToken::new());
        handle.cancellation_token().cancel();

        assert_eq!(handle.join().await, FlushEnd::Cancelled);
    }
}
