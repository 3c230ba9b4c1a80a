// 渲染表面生命周期桥

pub mod bridge;

pub use bridge::{RenderTargetBridge, SurfaceListener};
