//! DistRHI - 渲染硬件接口核心
//!
//! 为 DistRender 的各个图形后端提供统一的资源状态跟踪、对象生命周期管理
//! 与 CPU/GPU 同步。具体图形 API 只需实现 `gfx::backend::NativeBackend`。
//!
//! # 模块结构
//!
//! - `core`: 核心功能模块（日志、配置、错误处理）
//! - `renderer`: 设备、上下文、资源、交换链与截图
//! - `gfx`: 原生后端接口及其实现
//!
//! # 使用示例
//!
//! ```no_run
//! use dist_rhi::core::config::Config;
//! use dist_rhi::gfx::{self, NativeWindow};
//! use dist_rhi::renderer::{RenderDevice, SwapChainDesc, TransitionMode};
//!
//! # fn main() -> dist_rhi::core::Result<()> {
//! let config = Config::default();
//! let backend = gfx::create_backend(&config.device)?;
//! let (device, mut ctx, _deferred) = RenderDevice::create(backend, &config.device)?;
//! let swap_chain = device.create_swap_chain(&mut ctx, NativeWindow(0), &SwapChainDesc::default())?;
//!
//! let rtv = swap_chain.current_back_buffer_rtv();
//! ctx.set_render_targets(&[rtv.clone()], None, TransitionMode::Transition)?;
//! ctx.clear_render_target(&rtv, [0.1, 0.2, 0.3, 1.0], TransitionMode::Transition)?;
//! swap_chain.present(&mut ctx, 1)?;
//! # Ok(())
//! # }
//! ```

pub mod core;
pub mod gfx;
pub mod renderer;
