//! 硬件解码会话、播放状态机与渲染表面生命周期桥
//!
//! 解码服务、数据源和渲染器都是 trait 边界；crate 内自带一个纯软件的直通解码器、
//! 合成数据源和 H.264 Annex-B 裸码流读取器，没有硬件也能跑完整的缓冲区交换流程。

pub mod codec;
pub mod core;
pub mod engine;
pub mod player;
pub mod renderer;
pub mod source;
pub mod surface;

pub use crate::core::{PlayerConfig, PlayerError, PlayerState, Result};
pub use codec::{DecoderRegistry, DecoderSession};
pub use engine::Engine;
pub use player::PlayerController;
pub use surface::RenderTargetBridge;
