// 播放器核心模块

pub mod controller;
mod worker;

pub use controller::PlayerController;
