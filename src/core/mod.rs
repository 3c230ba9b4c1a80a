// 核心数据结构和类型定义

pub mod types;
pub mod clock;
pub mod config;
pub mod error;

pub use types::*;
pub use clock::*;
pub use config::*;
pub use error::*;

use std::process;
use std::thread;

/// 日志上下文前缀，区分播放工作线程与窗口回调线程
pub fn log_ctx() -> String {
    format!("[pid:{} tid:{:?}]", process::id(), thread::current().id())
}
