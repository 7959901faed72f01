//! 渲染核心模块
//!
//! 与具体图形 API 无关的资源状态、生命周期与同步核心：
//!
//! - `device`：设备，负责创建资源、提交命令以及延迟释放
//! - `context`：立即/延迟上下文，负责状态转换、校验与命令列表回放
//! - `resources`：缓冲区、纹理、视图与采样器
//! - `swap_chain`：交换链与呈现
//! - `capture`：基于 Fence 的异步屏幕截图
//!
//! # 所有权
//!
//! 对象之间只有“强引用向下，弱引用向上”：视图持有纹理，纹理持有设备，
//! 设备从不持有资源。任何对象的最后一个强引用释放后，其原生对象进入设备的
//! 延迟释放队列，等 GPU 用完后再销毁。

pub mod capture;
pub mod context;
pub mod device;
pub mod format;
pub mod object;
pub mod pipeline;
mod release_queue;
pub mod resources;
pub mod state;
pub mod swap_chain;
pub mod sync;

#[cfg(test)]
mod tests;

pub use capture::{CaptureInfo, CaptureSchedule, ScreenCapture};
pub use context::{
    ClearDepthStencilFlags, CommandList, ContextKind, ContextStats, CopyTextureAttribs, DeviceContext, DispatchComputeAttribs,
    DrawAttribs, DrawIndexedAttribs, IndexType, MapFlags, StateTransitionDesc,
};
pub use device::{DeviceCaps, RenderDevice};
pub use format::{TextureFormat, TextureFormatAttribs};
pub use object::{query_interface, reference_count, DeviceObject, InterfaceId};
pub use pipeline::{PipelineState, PipelineStateDesc, Shader, ShaderDesc, ShaderResourceBinding, ShaderStage};
pub use resources::{BindFlags, Buffer, BufferDesc, CpuAccessFlags, Texture, TextureDesc, TextureView, Usage};
pub use state::{ResourceState, TransitionMode};
pub use swap_chain::{SwapChain, SwapChainDesc};
pub use sync::{Fence, FenceDesc};
