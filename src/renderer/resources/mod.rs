//! GPU 资源
//!
//! 缓冲区与纹理共享同一套生命周期与状态跟踪：
//!
//! - 描述符在创建时确定，之后不可变
//! - 当前状态保存在 `StateCell` 中，由立即上下文在插入屏障时更新
//! - 最后一个强引用释放时，原生对象进入设备的延迟释放队列，
//!   直到 GPU 不再引用它才真正销毁
//!
//! 视图强引用其父资源，父资源在视图存活期间不会被销毁。

pub mod buffer;
pub mod sampler;
pub mod texture;
pub mod view;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use bitflags::bitflags;

use crate::gfx::backend::NativeHandle;
use crate::renderer::device::RenderDevice;
use crate::renderer::object::{DeviceObject, ObjectId};
use crate::renderer::state::{ResourceState, StateCell};

pub use buffer::{Buffer, BufferDesc, BufferMode};
pub use sampler::{AddressMode, ComparisonFunc, FilterType, Sampler, SamplerDesc};
pub use texture::{MipLevelProperties, ResourceDimension, Texture, TextureDesc};
pub use view::{BufferView, BufferViewDesc, BufferViewType, TextureView, TextureViewDesc, TextureViewType};

bitflags! {
    /// 资源可以绑定到管线的哪些位置
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct BindFlags: u32 {
        const VERTEX_BUFFER = 1 << 0;
        const INDEX_BUFFER = 1 << 1;
        const UNIFORM_BUFFER = 1 << 2;
        const SHADER_RESOURCE = 1 << 3;
        const STREAM_OUTPUT = 1 << 4;
        const RENDER_TARGET = 1 << 5;
        const DEPTH_STENCIL = 1 << 6;
        const UNORDERED_ACCESS = 1 << 7;
        const INDIRECT_DRAW_ARGS = 1 << 8;
        const INPUT_ATTACHMENT = 1 << 9;
    }
}

impl BindFlags {
    /// 缓冲区允许的绑定标志
    pub const BUFFER_FLAGS: BindFlags = BindFlags::VERTEX_BUFFER
        .union(BindFlags::INDEX_BUFFER)
        .union(BindFlags::UNIFORM_BUFFER)
        .union(BindFlags::SHADER_RESOURCE)
        .union(BindFlags::STREAM_OUTPUT)
        .union(BindFlags::UNORDERED_ACCESS)
        .union(BindFlags::INDIRECT_DRAW_ARGS);

    /// 纹理允许的绑定标志
    pub const TEXTURE_FLAGS: BindFlags = BindFlags::SHADER_RESOURCE
        .union(BindFlags::RENDER_TARGET)
        .union(BindFlags::DEPTH_STENCIL)
        .union(BindFlags::UNORDERED_ACCESS)
        .union(BindFlags::INPUT_ATTACHMENT);
}

bitflags! {
    /// CPU 访问标志
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct CpuAccessFlags: u32 {
        const READ = 1 << 0;
        const WRITE = 1 << 1;
    }
}

/// 资源用途
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Usage {
    /// GPU 读写，CPU 不可访问
    #[default]
    Default,
    /// 创建后只读，必须提供初始数据
    Immutable,
    /// CPU 每帧写入
    Dynamic,
    /// CPU 与 GPU 之间的中转资源
    Staging,
}

/// 初始数据或纹理更新的数据来源
///
/// 数据要么来自 CPU 内存，要么来自 GPU 缓冲区，二者互斥。
#[derive(Clone)]
pub enum SubresourceData<'a> {
    /// CPU 内存，按行紧密排列
    Cpu(&'a [u8]),
    /// GPU 缓冲区中的数据
    GpuBuffer { buffer: Arc<Buffer>, offset: u64 },
}

impl std::fmt::Debug for SubresourceData<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SubresourceData::Cpu(bytes) => f.debug_tuple("Cpu").field(&bytes.len()).finish(),
            SubresourceData::GpuBuffer { buffer, offset } => f
                .debug_struct("GpuBuffer")
                .field("buffer", &buffer.name())
                .field("offset", offset)
                .finish(),
        }
    }
}

/// 缓冲区与纹理的公共部分
#[derive(Debug)]
pub(crate) struct ResourceCore {
    pub id: ObjectId,
    pub name: String,
    pub handle: NativeHandle,
    pub device: Arc<RenderDevice>,
    pub state: StateCell,
    /// 交换链重建后旧的后台缓冲区被标记为失效
    pub retired: AtomicBool,
}

impl ResourceCore {
    pub fn new(device: &Arc<RenderDevice>, name: &str, handle: NativeHandle, state: ResourceState) -> Self {
        Self {
            id: ObjectId::next(),
            name: name.to_string(),
            handle,
            device: Arc::clone(device),
            state: StateCell::new(state),
            retired: AtomicBool::new(false),
        }
    }

    pub fn is_retired(&self) -> bool {
        self.retired.load(Ordering::Acquire)
    }
}

impl Drop for ResourceCore {
    fn drop(&mut self) {
        self.device.safe_release(self.handle, &self.name);
    }
}

/// 对缓冲区或纹理的强引用
#[derive(Debug, Clone)]
pub enum ResourceRef {
    Buffer(Arc<Buffer>),
    Texture(Arc<Texture>),
}

impl ResourceRef {
    pub(crate) fn core(&self) -> &ResourceCore {
        match self {
            ResourceRef::Buffer(b) => b.core(),
            ResourceRef::Texture(t) => t.core(),
        }
    }

    pub fn state(&self) -> ResourceState {
        self.core().state.get()
    }

    pub fn set_state(&self, state: ResourceState) {
        self.core().state.set(state)
    }

    pub fn name(&self) -> &str {
        &self.core().name
    }

    pub fn unique_id(&self) -> ObjectId {
        self.core().id
    }

    pub fn handle(&self) -> NativeHandle {
        self.core().handle
    }

    pub fn is_texture(&self) -> bool {
        matches!(self, ResourceRef::Texture(_))
    }

    /// CPU 可访问的中转资源只能停留在固定状态
    pub fn fixed_state(&self) -> Option<ResourceState> {
        let (usage, cpu_access) = match self {
            ResourceRef::Buffer(b) => (b.desc().usage, b.desc().cpu_access),
            ResourceRef::Texture(t) => (t.desc().usage, t.desc().cpu_access),
        };
        match usage {
            Usage::Staging => Some(initial_state(usage, cpu_access, false)),
            _ => None,
        }
    }

    /// 状态是否适用于该类资源
    pub fn accepts_state(&self, state: ResourceState) -> bool {
        match self {
            ResourceRef::Buffer(_) => state.valid_for_buffer(),
            ResourceRef::Texture(_) => state.valid_for_texture(),
        }
    }
}

impl From<Arc<Buffer>> for ResourceRef {
    fn from(buffer: Arc<Buffer>) -> Self {
        ResourceRef::Buffer(buffer)
    }
}

impl From<Arc<Texture>> for ResourceRef {
    fn from(texture: Arc<Texture>) -> Self {
        ResourceRef::Texture(texture)
    }
}

impl From<&Arc<Buffer>> for ResourceRef {
    fn from(buffer: &Arc<Buffer>) -> Self {
        ResourceRef::Buffer(Arc::clone(buffer))
    }
}

impl From<&Arc<Texture>> for ResourceRef {
    fn from(texture: &Arc<Texture>) -> Self {
        ResourceRef::Texture(Arc::clone(texture))
    }
}

/// 资源刚创建时的状态
pub(crate) fn initial_state(usage: Usage, cpu_access: CpuAccessFlags, has_data: bool) -> ResourceState {
    match usage {
        Usage::Staging if cpu_access.contains(CpuAccessFlags::READ) => ResourceState::CopyDest,
        Usage::Staging => ResourceState::CopySource,
        Usage::Dynamic => ResourceState::GenericRead,
        _ if has_data => ResourceState::CopyDest,
        _ => ResourceState::Undefined,
    }
}
