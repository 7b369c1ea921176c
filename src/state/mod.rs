//! 运行时状态模块
//!
//! 管理应用状态和日志会话

pub mod app_state;
pub mod log_session;
pub mod sink;

pub use app_state::AppState;
pub use log_session::{LiveHandle, LogSession, LogSource};
