//! 日志输出端
//!
//! 一个会话可以同时写入多个输出端：
//! - `ConsoleSink`: 进程标准输出，所有会话都会挂载
//! - `ResponseSink`: 当前 HTTP 响应体（缓冲或分块流式）
//! - `SocketSink`: WebSocket 连接的发送半部，用于实时日志

use async_trait::async_trait;
use axum::body::{Body, Bytes};
use axum::extract::ws::{Message, WebSocket};
use futures::stream::SplitSink;
use futures::SinkExt;
use std::convert::Infallible;
use std::io;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;

/// 日志输出端
#[async_trait]
pub trait LogSink: Send {
    /// 输出端名称，用于日志
    fn name(&self) -> &'static str;

    /// 写入一段字节；返回错误表示输出端已不可用（如客户端断开）
    async fn write(&mut self, chunk: &[u8]) -> io::Result<()>;

    /// 关闭输出端
    async fn close(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// 控制台输出端
pub struct ConsoleSink {
    out: Box<dyn AsyncWrite + Send + Unpin>,
}

impl ConsoleSink {
    /// 写入进程标准输出
    pub fn stdout() -> Self {
        Self::new(tokio::io::stdout())
    }

    pub fn new(out: impl AsyncWrite + Send + Unpin + 'static) -> Self {
        Self { out: Box::new(out) }
    }
}

#[async_trait]
impl LogSink for ConsoleSink {
    fn name(&self) -> &'static str {
        "console"
    }

    async fn write(&mut self, chunk: &[u8]) -> io::Result<()> {
        self.out.write_all(chunk).await?;
        self.out.flush().await
    }

    async fn close(&mut self) -> io::Result<()> {
        self.out.flush().await
    }
}

/// HTTP 响应输出端
///
/// 写入的数据经由无界通道交给 [`ResponseBody`]，接收端被丢弃即视为客户端断开
pub struct ResponseSink {
    tx: mpsc::UnboundedSender<Bytes>,
}

/// [`ResponseSink`] 的接收端
pub struct ResponseBody {
    rx: mpsc::UnboundedReceiver<Bytes>,
}

impl ResponseSink {
    /// 创建输出端和对应的响应体
    pub fn channel() -> (ResponseSink, ResponseBody) {
        let (tx, rx) = mpsc::unbounded_channel();
        (ResponseSink { tx }, ResponseBody { rx })
    }
}

#[async_trait]
impl LogSink for ResponseSink {
    fn name(&self) -> &'static str {
        "response"
    }

    async fn write(&mut self, chunk: &[u8]) -> io::Result<()> {
        self.tx
            .send(Bytes::copy_from_slice(chunk))
            .map_err(|_| io::Error::new(io::ErrorKind::BrokenPipe, "response receiver dropped"))
    }
}

impl ResponseBody {
    /// 收集全部数据（输出端关闭后返回）
    pub async fn collect(mut self) -> Vec<u8> {
        let mut body = Vec::new();
        while let Some(chunk) = self.rx.recv().await {
            body.extend_from_slice(&chunk);
        }
        body
    }

    /// 转换为分块传输的响应体
    pub fn into_body(self) -> Body {
        let mut rx = self.rx;
        let stream = async_stream::stream! {
            while let Some(chunk) = rx.recv().await {
                yield Ok::<_, Infallible>(chunk);
            }
        };
        Body::from_stream(stream)
    }
}

/// WebSocket 输出端
///
/// 以文本帧发送，跨读取边界被截断的 UTF-8 字符留到下一次写入
pub struct SocketSink {
    tx: SplitSink<WebSocket, Message>,
    pending: Vec<u8>,
}

impl SocketSink {
    pub fn new(tx: SplitSink<WebSocket, Message>) -> Self {
        Self {
            tx,
            pending: Vec::new(),
        }
    }

    async fn send_text(&mut self, text: String) -> io::Result<()> {
        self.tx
            .send(Message::Text(text))
            .await
            .map_err(|e| io::Error::new(io::ErrorKind::BrokenPipe, e))
    }
}

/// 取出 `pending` 中可以完整解码的前缀，末尾不完整的字符保留
fn take_complete_text(pending: &mut Vec<u8>) -> String {
    let split = pending.len() - incomplete_suffix_len(pending);
    let text = String::from_utf8_lossy(&pending[..split]).into_owned();
    pending.drain(..split);
    text
}

/// 末尾不完整的 UTF-8 字符的字节数
fn incomplete_suffix_len(bytes: &[u8]) -> usize {
    for back in 1..=bytes.len().min(3) {
        let byte = bytes[bytes.len() - back];
        if byte & 0xC0 == 0x80 {
            continue;
        }
        let width = match byte {
            0xC0..=0xDF => 2,
            0xE0..=0xEF => 3,
            0xF0..=0xF7 => 4,
            _ => 1,
        };
        return if width > back { back } else { 0 };
    }
    0
}

#[async_trait]
impl LogSink for SocketSink {
    fn name(&self) -> &'static str {
        "socket"
    }

    async fn write(&mut self, chunk: &[u8]) -> io::Result<()> {
        self.pending.extend_from_slice(chunk);
        let text = take_complete_text(&mut self.pending);
        if text.is_empty() {
            return Ok(());
        }
        self.send_text(text).await
    }

    async fn close(&mut self) -> io::Result<()> {
        if !self.pending.is_empty() {
            let rest = String::from_utf8_lossy(&self.pending).into_owned();
            self.pending.clear();
            self.send_text(rest).await?;
        }
        self.tx
            .close()
            .await
            .map_err(|e| io::Error::new(io::ErrorKind::BrokenPipe, e))
    }
}
