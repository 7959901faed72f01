//! 原生后端的统一抽象接口
//!
//! 设备与上下文中所有与具体图形 API 相关的调用都经过 `NativeBackend`。
//! 后端只看到不透明的 `NativeHandle` 和已经决定好的命令（包括屏障的前后状态），
//! 状态跟踪、生命周期与同步策略全部在 `renderer` 中完成。

use std::sync::Arc;

use crate::core::error::GraphicsError;
use crate::renderer::device::DeviceCaps;
use crate::renderer::format::{FormatSupport, TextureFormat};
use crate::renderer::pipeline::{PipelineStateDesc, ShaderDesc};
use crate::renderer::resources::{BufferDesc, BufferViewDesc, SamplerDesc, TextureDesc, TextureViewDesc};
use crate::renderer::state::ResourceState;
use crate::renderer::swap_chain::SwapChainDesc;
use crate::renderer::sync::FenceCounter;

/// 原生对象句柄
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NativeHandle(pub u64);

/// 平台层提供的窗口句柄，核心只把它原样交给后端
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NativeWindow(pub u64);

/// 原生调用失败
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum NativeError {
    #[error("out of device memory: {0}")]
    OutOfMemory(String),

    #[error("device removed")]
    DeviceLost,

    #[error("invalid native call: {0}")]
    Invalid(String),
}

pub type NativeResult<T> = std::result::Result<T, NativeError>;

impl From<NativeError> for GraphicsError {
    fn from(err: NativeError) -> Self {
        match err {
            NativeError::OutOfMemory(msg) => GraphicsError::ResourceExhausted(msg),
            NativeError::DeviceLost => GraphicsError::DeviceLost("the native device was removed".to_string()),
            NativeError::Invalid(msg) => GraphicsError::InvalidArgument(msg),
        }
    }
}

/// 纹理子资源（mip 层级 + 数组切片）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Subresource {
    pub mip: u32,
    pub slice: u32,
}

impl Subresource {
    pub fn new(mip: u32, slice: u32) -> Self {
        Self { mip, slice }
    }
}

/// 已经完成状态推导的原生命令
#[derive(Debug)]
pub enum NativeCommand {
    /// 资源状态转换
    Barrier {
        resource: NativeHandle,
        before: ResourceState,
        after: ResourceState,
    },
    SetPipeline {
        pipeline: NativeHandle,
    },
    SetVertexBuffers {
        start_slot: u32,
        buffers: Vec<(NativeHandle, u64)>,
    },
    SetIndexBuffer {
        buffer: NativeHandle,
        offset: u64,
    },
    SetRenderTargets {
        render_targets: Vec<NativeHandle>,
        depth_stencil: Option<NativeHandle>,
    },
    ClearRenderTarget {
        view: NativeHandle,
        color: [f32; 4],
    },
    ClearDepthStencil {
        view: NativeHandle,
        depth: Option<f32>,
        stencil: Option<u8>,
    },
    /// 绘制；`resources` 是本次绘制引用的全部资源
    Draw {
        indexed: bool,
        count: u32,
        instances: u32,
        resources: Vec<NativeHandle>,
    },
    Dispatch {
        groups: [u32; 3],
        resources: Vec<NativeHandle>,
    },
    UpdateBuffer {
        buffer: NativeHandle,
        offset: u64,
        data: Vec<u8>,
    },
    CopyBuffer {
        src: NativeHandle,
        src_offset: u64,
        dst: NativeHandle,
        dst_offset: u64,
        size: u64,
    },
    UpdateTexture {
        texture: NativeHandle,
        subresource: Subresource,
        data: Vec<u8>,
    },
    CopyBufferToTexture {
        buffer: NativeHandle,
        offset: u64,
        texture: NativeHandle,
        subresource: Subresource,
    },
    CopyTexture {
        src: NativeHandle,
        src_subresource: Subresource,
        dst: NativeHandle,
        dst_subresource: Subresource,
    },
    ResolveTexture {
        src: NativeHandle,
        src_subresource: Subresource,
        dst: NativeHandle,
        dst_subresource: Subresource,
    },
    /// GPU 执行到此处时把计数器推进到 `value`
    SignalFence {
        counter: Arc<FenceCounter>,
        value: u64,
    },
}

/// 一次队列提交
#[derive(Debug)]
pub struct CommandBatch {
    /// 提交编号，单调递增
    pub submission: u64,
    pub commands: Vec<NativeCommand>,
}

/// 图形后端的统一接口
///
/// 所有方法都可能被多个线程同时调用（设备对象可在线程间共享），
/// 实现者需要自行保证内部同步。
pub trait NativeBackend: Send + Sync {
    /// 后端名称，用于日志输出
    fn name(&self) -> &str;

    /// 设备能力
    fn caps(&self) -> DeviceCaps;

    /// 格式支持情况
    fn format_support(&self, format: TextureFormat) -> FormatSupport;

    fn create_buffer(
        &self,
        desc: &BufferDesc,
        data: Option<&[u8]>,
        initial_state: ResourceState,
    ) -> NativeResult<NativeHandle>;

    /// `data` 为空表示不带初始数据，否则与子资源一一对应
    fn create_texture(
        &self,
        desc: &TextureDesc,
        data: &[&[u8]],
        initial_state: ResourceState,
    ) -> NativeResult<NativeHandle>;

    fn create_texture_view(&self, texture: NativeHandle, desc: &TextureViewDesc) -> NativeResult<NativeHandle>;

    fn create_buffer_view(&self, buffer: NativeHandle, desc: &BufferViewDesc) -> NativeResult<NativeHandle>;

    fn create_sampler(&self, desc: &SamplerDesc) -> NativeResult<NativeHandle>;

    fn create_shader(&self, desc: &ShaderDesc) -> NativeResult<NativeHandle>;

    fn create_pipeline(&self, desc: &PipelineStateDesc) -> NativeResult<NativeHandle>;

    fn create_swap_chain(&self, window: NativeWindow, desc: &SwapChainDesc) -> NativeResult<NativeHandle>;

    /// 销毁原生对象；调用方保证 GPU 不再引用它
    fn destroy(&self, handle: NativeHandle);

    /// 提交一批命令，执行是异步的
    fn submit(&self, batch: CommandBatch) -> NativeResult<()>;

    fn present(&self, swap_chain: NativeHandle, back_buffer: NativeHandle, sync_interval: u32) -> NativeResult<()>;

    /// 读取 CPU 可读资源的当前内容
    fn read_texture(&self, texture: NativeHandle, subresource: Subresource) -> NativeResult<Vec<u8>>;

    fn read_buffer(&self, buffer: NativeHandle, offset: u64, size: u64) -> NativeResult<Vec<u8>>;

    /// 由 CPU 直接写入 CPU 可写的资源，不经过命令队列
    ///
    /// 写入范围必须完全落在资源内。调用方负责确认 GPU 不再读取被覆盖的内容。
    fn write_buffer(&self, buffer: NativeHandle, offset: u64, data: &[u8]) -> NativeResult<()>;

    /// `data` 必须正好覆盖整个子资源
    fn write_texture(&self, texture: NativeHandle, subresource: Subresource, data: &[u8]) -> NativeResult<()>;

    /// 阻塞直到计数器到达 `value`；该值永远不会被 signal 时返回错误
    fn wait_for_fence(&self, counter: &FenceCounter, value: u64) -> NativeResult<()>;

    /// 阻塞直到已提交的全部工作完成
    fn wait_idle(&self) -> NativeResult<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_native_error_mapping() {
        assert!(matches!(
            GraphicsError::from(NativeError::OutOfMemory("4 MB".into())),
            GraphicsError::ResourceExhausted(_)
        ));
        assert!(matches!(GraphicsError::from(NativeError::DeviceLost), GraphicsError::DeviceLost(_)));
        assert!(matches!(
            GraphicsError::from(NativeError::Invalid("bad handle".into())),
            GraphicsError::InvalidArgument(_)
        ));
    }
}
