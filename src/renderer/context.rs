//! 设备上下文
//!
//! 上下文分两类：
//!
//! - 立即上下文：每个命令立刻推导状态转换，生成原生命令，`flush` 时提交给队列
//! - 延迟上下文：只记录命令和转换模式，不读写任何资源的共享状态，
//!   `finish_command_list` 产出一次性的命令列表，交给立即上下文回放
//!
//! 回放时所有屏障都按资源在执行时刻的实际状态重新推导：
//! 已满足的转换被跳过，其余转换的"之前"状态取自实际状态，
//! 记录时的 Verify 检查也在此时重新执行。
//!
//! 上下文是拥有所有权的值，而不是共享对象，因此一个上下文同时只能被一个线程使用。

use std::sync::{Arc, Weak};

use bitflags::bitflags;

use crate::core::error::{invalid_argument, wrong_context, GraphicsError, Result};
use crate::gfx::backend::{NativeCommand, NativeHandle, Subresource};
use crate::renderer::device::RenderDevice;
use crate::renderer::object::{DeviceObject, ObjectId};
use crate::renderer::pipeline::{PipelineState, ShaderResourceBinding};
use crate::renderer::resources::{
    BindFlags, Buffer, CpuAccessFlags, ResourceRef, SubresourceData, Texture, TextureView, TextureViewType, Usage,
};
use crate::renderer::state::{plan_transition, ResourceState, TransitionMode, TransitionOutcome};
use crate::renderer::swap_chain::SwapChain;
use crate::renderer::sync::Fence;

/// 最多可以同时绑定的顶点流
pub const MAX_VERTEX_STREAMS: u32 = 32;

/// 上下文类型
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContextKind {
    Immediate,
    Deferred,
}

bitflags! {
    /// 深度模板清除标志
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct ClearDepthStencilFlags: u32 {
        const DEPTH = 1 << 0;
        const STENCIL = 1 << 1;
    }
}

bitflags! {
    /// 写映射标志
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct MapFlags: u32 {
        /// 放弃资源原有内容，映射得到的内存全部为零；动态资源必须使用
        const DISCARD = 1 << 0;
    }
}

/// 索引类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum IndexType {
    U16,
    #[default]
    U32,
}

impl IndexType {
    pub fn size(self) -> u64 {
        match self {
            IndexType::U16 => 2,
            IndexType::U32 => 4,
        }
    }
}

/// 非索引绘制参数
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DrawAttribs {
    pub num_vertices: u32,
    pub num_instances: u32,
    pub start_vertex: u32,
    pub first_instance: u32,
}

impl DrawAttribs {
    pub fn new(num_vertices: u32) -> Self {
        Self {
            num_vertices,
            num_instances: 1,
            start_vertex: 0,
            first_instance: 0,
        }
    }

    pub fn with_instances(mut self, num_instances: u32) -> Self {
        self.num_instances = num_instances;
        self
    }
}

/// 索引绘制参数
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DrawIndexedAttribs {
    pub num_indices: u32,
    pub index_type: IndexType,
    pub num_instances: u32,
    pub first_index: u32,
    pub base_vertex: i32,
    pub first_instance: u32,
}

impl DrawIndexedAttribs {
    pub fn new(num_indices: u32, index_type: IndexType) -> Self {
        Self {
            num_indices,
            index_type,
            num_instances: 1,
            first_index: 0,
            base_vertex: 0,
            first_instance: 0,
        }
    }
}

/// 计算分派参数
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DispatchComputeAttribs {
    pub thread_group_count: [u32; 3],
}

impl DispatchComputeAttribs {
    pub fn new(x: u32, y: u32, z: u32) -> Self {
        Self {
            thread_group_count: [x, y, z],
        }
    }
}

/// 纹理子资源复制参数
#[derive(Debug, Clone)]
pub struct CopyTextureAttribs {
    pub src_texture: Arc<Texture>,
    pub src_mip: u32,
    pub src_slice: u32,
    pub src_mode: TransitionMode,
    pub dst_texture: Arc<Texture>,
    pub dst_mip: u32,
    pub dst_slice: u32,
    pub dst_mode: TransitionMode,
}

impl CopyTextureAttribs {
    /// 复制两张纹理的第一个子资源，两端都自动转换状态
    pub fn new(src_texture: &Arc<Texture>, dst_texture: &Arc<Texture>) -> Self {
        Self {
            src_texture: Arc::clone(src_texture),
            src_mip: 0,
            src_slice: 0,
            src_mode: TransitionMode::Transition,
            dst_texture: Arc::clone(dst_texture),
            dst_mip: 0,
            dst_slice: 0,
            dst_mode: TransitionMode::Transition,
        }
    }
}

/// 多重采样解析参数
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ResolveTextureSubresourceAttribs {
    pub src_mip: u32,
    pub src_slice: u32,
    pub src_mode: TransitionMode,
    pub dst_mip: u32,
    pub dst_slice: u32,
    pub dst_mode: TransitionMode,
}

/// 显式状态转换
#[derive(Debug, Clone)]
pub struct StateTransitionDesc {
    pub resource: ResourceRef,
    /// `Unknown` 表示使用引擎跟踪的当前状态
    pub old_state: ResourceState,
    pub new_state: ResourceState,
    /// 转换后是否更新引擎跟踪的状态
    pub update_state: bool,
}

impl StateTransitionDesc {
    pub fn new(resource: impl Into<ResourceRef>, new_state: ResourceState) -> Self {
        Self {
            resource: resource.into(),
            old_state: ResourceState::Unknown,
            new_state,
            update_state: true,
        }
    }

    pub fn with_old_state(mut self, old_state: ResourceState) -> Self {
        self.old_state = old_state;
        self
    }

    pub fn with_update_state(mut self, update_state: bool) -> Self {
        self.update_state = update_state;
        self
    }
}

/// 上下文统计
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ContextStats {
    pub barriers: u64,
    pub draws: u64,
    pub dispatches: u64,
    pub copies: u64,
    pub clears: u64,
    pub flushes: u64,
    pub command_lists_executed: u64,
}

/// 映射后的纹理子资源
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MappedTextureSubresource {
    pub data: Vec<u8>,
    pub row_stride: u64,
    pub depth_stride: u64,
    pub width: u32,
    pub height: u32,
}

/// 纹理更新的数据来源（已拥有所有权）
#[derive(Debug, Clone)]
enum UpdateSource {
    Cpu(Vec<u8>),
    Buffer { buffer: Arc<Buffer>, offset: u64, mode: TransitionMode },
}

/// 上下文记录的高层命令
///
/// 命令强引用它用到的所有对象，命令列表存活期间这些对象不会被销毁。
#[derive(Debug, Clone)]
enum ContextCommand {
    SetPipeline(Arc<PipelineState>),
    CommitShaderResources {
        srb: Arc<ShaderResourceBinding>,
        mode: TransitionMode,
    },
    SetVertexBuffers {
        start_slot: u32,
        buffers: Vec<(Arc<Buffer>, u64)>,
        reset: bool,
        mode: TransitionMode,
    },
    SetIndexBuffer {
        buffer: Arc<Buffer>,
        offset: u64,
        mode: TransitionMode,
    },
    SetRenderTargets {
        render_targets: Vec<Arc<TextureView>>,
        depth_stencil: Option<Arc<TextureView>>,
        mode: TransitionMode,
    },
    ClearRenderTarget {
        view: Arc<TextureView>,
        color: [f32; 4],
        mode: TransitionMode,
    },
    ClearDepthStencil {
        view: Arc<TextureView>,
        flags: ClearDepthStencilFlags,
        depth: f32,
        stencil: u8,
        mode: TransitionMode,
    },
    Draw(DrawAttribs),
    DrawIndexed(DrawIndexedAttribs),
    Dispatch(DispatchComputeAttribs),
    UpdateBuffer {
        buffer: Arc<Buffer>,
        offset: u64,
        data: Vec<u8>,
        mode: TransitionMode,
    },
    CopyBuffer {
        src: Arc<Buffer>,
        src_offset: u64,
        src_mode: TransitionMode,
        dst: Arc<Buffer>,
        dst_offset: u64,
        dst_mode: TransitionMode,
        size: u64,
    },
    UpdateTexture {
        texture: Arc<Texture>,
        subresource: Subresource,
        source: UpdateSource,
        mode: TransitionMode,
    },
    CopyTexture(CopyTextureAttribs),
    ResolveTexture {
        src: Arc<Texture>,
        dst: Arc<Texture>,
        attribs: ResolveTextureSubresourceAttribs,
    },
    TransitionStates(Vec<StateTransitionDesc>),
}

/// 延迟上下文产出的命令列表，只能执行一次
#[derive(Debug)]
pub struct CommandList {
    id: ObjectId,
    name: String,
    commands: Vec<ContextCommand>,
}

impl CommandList {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn unique_id(&self) -> ObjectId {
        self.id
    }

    pub fn len(&self) -> usize {
        self.commands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }
}

#[derive(Debug, Clone)]
struct BoundTargets {
    render_targets: Vec<Arc<TextureView>>,
    depth_stencil: Option<Arc<TextureView>>,
}

impl BoundTargets {
    fn matches(&self, render_targets: &[Arc<TextureView>], depth_stencil: Option<&Arc<TextureView>>) -> bool {
        self.render_targets.len() == render_targets.len()
            && self.render_targets.iter().zip(render_targets).all(|(a, b)| Arc::ptr_eq(a, b))
            && match (&self.depth_stencil, depth_stencil) {
                (Some(a), Some(b)) => Arc::ptr_eq(a, b),
                (None, None) => true,
                _ => false,
            }
    }

    fn references(&self, texture: &Arc<Texture>) -> bool {
        self.render_targets
            .iter()
            .chain(self.depth_stencil.iter())
            .any(|view| Arc::ptr_eq(view.texture(), texture))
    }
}

/// 上下文缓存的绑定状态；`None` 表示未知
#[derive(Debug, Default)]
struct BoundState {
    pipeline: Option<Arc<PipelineState>>,
    srb: Option<Arc<ShaderResourceBinding>>,
    vertex_buffers: Vec<Option<(Arc<Buffer>, u64)>>,
    index_buffer: Option<(Arc<Buffer>, u64)>,
    targets: Option<BoundTargets>,
}

fn same_stream(a: &Option<(Arc<Buffer>, u64)>, b: &Option<(Arc<Buffer>, u64)>) -> bool {
    match (a, b) {
        (Some((a, ao)), Some((b, bo))) => Arc::ptr_eq(a, b) && ao == bo,
        (None, None) => true,
        _ => false,
    }
}

/// 设备上下文
pub struct DeviceContext {
    name: String,
    kind: ContextKind,
    device: Arc<RenderDevice>,
    swap_chain: Weak<SwapChain>,
    bound: BoundState,
    stats: ContextStats,
    /// 立即上下文尚未提交的原生命令
    pending: Vec<NativeCommand>,
    /// 延迟上下文记录的命令
    recording: Vec<ContextCommand>,
    next_list_index: u64,
}

impl std::fmt::Debug for DeviceContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceContext")
            .field("name", &self.name)
            .field("kind", &self.kind)
            .field("pending", &self.pending.len())
            .field("recording", &self.recording.len())
            .finish()
    }
}

impl DeviceContext {
    pub(crate) fn new_immediate(device: &Arc<RenderDevice>) -> Self {
        Self::new(device, "Immediate context".to_string(), ContextKind::Immediate)
    }

    pub(crate) fn new_deferred(device: &Arc<RenderDevice>, index: u32) -> Self {
        Self::new(device, format!("Deferred context {}", index), ContextKind::Deferred)
    }

    fn new(device: &Arc<RenderDevice>, name: String, kind: ContextKind) -> Self {
        Self {
            name,
            kind,
            device: Arc::clone(device),
            swap_chain: Weak::new(),
            bound: BoundState::default(),
            stats: ContextStats::default(),
            pending: Vec::new(),
            recording: Vec::new(),
            next_list_index: 0,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> ContextKind {
        self.kind
    }

    pub fn is_deferred(&self) -> bool {
        self.kind == ContextKind::Deferred
    }

    pub fn device(&self) -> &Arc<RenderDevice> {
        &self.device
    }

    pub fn stats(&self) -> ContextStats {
        self.stats
    }

    /// 立即上下文中尚未提交的原生命令数
    pub fn pending_command_count(&self) -> usize {
        self.pending.len()
    }

    /// 延迟上下文中已记录的命令数
    pub fn recorded_command_count(&self) -> usize {
        self.recording.len()
    }

    fn require_immediate(&self, operation: &str) -> Result<()> {
        if self.is_deferred() {
            crate::engine_error!(context = %self.name, operation, "Operation is only allowed on the immediate context");
            Err(wrong_context(operation))
        } else {
            Ok(())
        }
    }

    // ---------------------------------------------------------------
    // 交换链
    // ---------------------------------------------------------------

    /// 关联交换链（弱引用）
    pub fn set_swap_chain(&mut self, swap_chain: &Arc<SwapChain>) -> Result<()> {
        self.require_immediate("set swap chain")?;
        self.swap_chain = Arc::downgrade(swap_chain);
        Ok(())
    }

    pub fn swap_chain(&self) -> Option<Arc<SwapChain>> {
        self.swap_chain.upgrade()
    }

    /// 绑定交换链当前的后台缓冲区与深度缓冲区
    pub fn bind_swap_chain_targets(&mut self, mode: TransitionMode) -> Result<()> {
        let Some(swap_chain) = self.swap_chain() else {
            return Err(invalid_argument(format!("context '{}' has no swap chain", self.name)));
        };
        let rtv = swap_chain.current_back_buffer_rtv();
        let dsv = swap_chain.depth_buffer_dsv();
        self.set_render_targets(&[rtv], dsv.as_ref(), mode)
    }

    // ---------------------------------------------------------------
    // 绑定
    // ---------------------------------------------------------------

    pub fn set_pipeline_state(&mut self, pipeline: &Arc<PipelineState>) -> Result<()> {
        self.record(ContextCommand::SetPipeline(Arc::clone(pipeline)))
    }

    /// 提交着色器资源，按变量角色转换每个资源的状态
    pub fn commit_shader_resources(&mut self, srb: &Arc<ShaderResourceBinding>, mode: TransitionMode) -> Result<()> {
        self.record(ContextCommand::CommitShaderResources {
            srb: Arc::clone(srb),
            mode,
        })
    }

    /// 设置顶点缓冲区；`reset` 为真时解绑其余所有槽位
    pub fn set_vertex_buffers(
        &mut self,
        start_slot: u32,
        buffers: &[(Arc<Buffer>, u64)],
        reset: bool,
        mode: TransitionMode,
    ) -> Result<()> {
        if start_slot as usize + buffers.len() > MAX_VERTEX_STREAMS as usize {
            return Err(invalid_argument(format!(
                "vertex buffer slots [{}, {}) exceed the limit {}",
                start_slot,
                start_slot as usize + buffers.len(),
                MAX_VERTEX_STREAMS
            )));
        }
        for (buffer, offset) in buffers {
            let desc = buffer.desc();
            if !desc.bind_flags.contains(BindFlags::VERTEX_BUFFER) {
                return Err(invalid_argument(format!(
                    "buffer '{}' was not created with the vertex buffer bind flag",
                    desc.name
                )));
            }
            if *offset >= desc.size {
                return Err(invalid_argument(format!(
                    "offset {} is outside vertex buffer '{}' ({} bytes)",
                    offset, desc.name, desc.size
                )));
            }
        }
        self.record(ContextCommand::SetVertexBuffers {
            start_slot,
            buffers: buffers.to_vec(),
            reset,
            mode,
        })
    }

    pub fn set_index_buffer(&mut self, buffer: &Arc<Buffer>, offset: u64, mode: TransitionMode) -> Result<()> {
        let desc = buffer.desc();
        if !desc.bind_flags.contains(BindFlags::INDEX_BUFFER) {
            return Err(invalid_argument(format!(
                "buffer '{}' was not created with the index buffer bind flag",
                desc.name
            )));
        }
        if offset >= desc.size {
            return Err(invalid_argument(format!(
                "offset {} is outside index buffer '{}' ({} bytes)",
                offset, desc.name, desc.size
            )));
        }
        self.record(ContextCommand::SetIndexBuffer {
            buffer: Arc::clone(buffer),
            offset,
            mode,
        })
    }

    /// 绑定渲染目标，目标纹理转换到渲染目标/深度写入状态
    pub fn set_render_targets(
        &mut self,
        render_targets: &[Arc<TextureView>],
        depth_stencil: Option<&Arc<TextureView>>,
        mode: TransitionMode,
    ) -> Result<()> {
        let max = self.device.caps().max_render_targets as usize;
        if render_targets.len() > max {
            return Err(invalid_argument(format!(
                "{} render targets exceed the limit {}",
                render_targets.len(),
                max
            )));
        }
        for rtv in render_targets {
            check_view(rtv, TextureViewType::RenderTarget)?;
        }
        if let Some(dsv) = depth_stencil {
            check_view(dsv, TextureViewType::DepthStencil)?;
        }
        self.record(ContextCommand::SetRenderTargets {
            render_targets: render_targets.to_vec(),
            depth_stencil: depth_stencil.cloned(),
            mode,
        })
    }

    /// 清除渲染目标
    pub fn clear_render_target(&mut self, view: &Arc<TextureView>, color: [f32; 4], mode: TransitionMode) -> Result<()> {
        check_view(view, TextureViewType::RenderTarget)?;
        self.record(ContextCommand::ClearRenderTarget {
            view: Arc::clone(view),
            color,
            mode,
        })
    }

    pub fn clear_depth_stencil(
        &mut self,
        view: &Arc<TextureView>,
        flags: ClearDepthStencilFlags,
        depth: f32,
        stencil: u8,
        mode: TransitionMode,
    ) -> Result<()> {
        check_view(view, TextureViewType::DepthStencil)?;
        if flags.is_empty() {
            return Err(invalid_argument("clear depth-stencil requires at least one clear flag"));
        }
        if !(0.0..=1.0).contains(&depth) {
            return Err(invalid_argument(format!("depth clear value {} is outside [0, 1]", depth)));
        }
        self.record(ContextCommand::ClearDepthStencil {
            view: Arc::clone(view),
            flags,
            depth,
            stencil,
            mode,
        })
    }

    // ---------------------------------------------------------------
    // 绘制与分派
    // ---------------------------------------------------------------

    pub fn draw(&mut self, attribs: &DrawAttribs) -> Result<()> {
        self.require_pipeline(false, "draw")?;
        if attribs.num_vertices == 0 || attribs.num_instances == 0 {
            crate::engine_warn!(context = %self.name, "Draw command with zero vertices or instances is ignored");
            return Ok(());
        }
        self.record(ContextCommand::Draw(*attribs))
    }

    pub fn draw_indexed(&mut self, attribs: &DrawIndexedAttribs) -> Result<()> {
        self.require_pipeline(false, "draw indexed")?;
        if attribs.num_indices == 0 || attribs.num_instances == 0 {
            crate::engine_warn!(context = %self.name, "Indexed draw command with zero indices or instances is ignored");
            return Ok(());
        }
        self.record(ContextCommand::DrawIndexed(*attribs))
    }

    pub fn dispatch_compute(&mut self, attribs: &DispatchComputeAttribs) -> Result<()> {
        self.require_pipeline(true, "dispatch compute")?;
        if attribs.thread_group_count.contains(&0) {
            crate::engine_warn!(context = %self.name, "Dispatch with an empty thread group count is ignored");
            return Ok(());
        }
        self.record(ContextCommand::Dispatch(*attribs))
    }

    fn require_pipeline(&self, compute: bool, operation: &str) -> Result<()> {
        match &self.bound.pipeline {
            Some(pipeline) if pipeline.is_compute() == compute => Ok(()),
            Some(pipeline) => Err(invalid_argument(format!(
                "{} requires a {} pipeline, '{}' is bound",
                operation,
                if compute { "compute" } else { "graphics" },
                pipeline.desc().name
            ))),
            None => Err(invalid_argument(format!("{} requires a bound pipeline state", operation))),
        }
    }

    // ---------------------------------------------------------------
    // 数据更新与复制
    // ---------------------------------------------------------------

    /// 用 CPU 数据更新默认用途缓冲区
    pub fn update_buffer(&mut self, buffer: &Arc<Buffer>, offset: u64, data: &[u8], mode: TransitionMode) -> Result<()> {
        let desc = buffer.desc();
        if desc.usage != Usage::Default {
            return Err(invalid_argument(format!(
                "buffer '{}': only default-usage buffers can be updated",
                desc.name
            )));
        }
        check_range(&desc.name, offset, data.len() as u64, desc.size)?;
        self.record(ContextCommand::UpdateBuffer {
            buffer: Arc::clone(buffer),
            offset,
            data: data.to_vec(),
            mode,
        })
    }

    #[allow(clippy::too_many_arguments)]
    pub fn copy_buffer(
        &mut self,
        src: &Arc<Buffer>,
        src_offset: u64,
        src_mode: TransitionMode,
        dst: &Arc<Buffer>,
        dst_offset: u64,
        size: u64,
        dst_mode: TransitionMode,
    ) -> Result<()> {
        check_range(&src.desc().name, src_offset, size, src.desc().size)?;
        check_range(&dst.desc().name, dst_offset, size, dst.desc().size)?;
        if Arc::ptr_eq(src, dst) && src_offset < dst_offset + size && dst_offset < src_offset + size {
            return Err(invalid_argument(format!(
                "buffer '{}': source and destination ranges overlap",
                src.desc().name
            )));
        }
        self.record(ContextCommand::CopyBuffer {
            src: Arc::clone(src),
            src_offset,
            src_mode,
            dst: Arc::clone(dst),
            dst_offset,
            dst_mode,
            size,
        })
    }

    /// 更新纹理的一个子资源，数据可以来自 CPU 或 GPU 缓冲区
    pub fn update_texture(
        &mut self,
        texture: &Arc<Texture>,
        mip: u32,
        slice: u32,
        data: SubresourceData<'_>,
        src_mode: TransitionMode,
        dst_mode: TransitionMode,
    ) -> Result<()> {
        let desc = texture.desc();
        if desc.usage != Usage::Default {
            return Err(invalid_argument(format!(
                "texture '{}': only default-usage textures can be updated",
                desc.name
            )));
        }
        if desc.sample_count > 1 {
            return Err(invalid_argument(format!(
                "texture '{}': multisampled textures can't be updated",
                desc.name
            )));
        }
        check_subresource(texture, mip, slice)?;

        let required = desc.mip_properties(mip).mip_size;
        let source = match data {
            SubresourceData::Cpu(bytes) => {
                if bytes.len() as u64 != required {
                    return Err(invalid_argument(format!(
                        "texture '{}': mip {} needs {} bytes, {} provided",
                        desc.name,
                        mip,
                        required,
                        bytes.len()
                    )));
                }
                UpdateSource::Cpu(bytes.to_vec())
            }
            SubresourceData::GpuBuffer { buffer, offset } => {
                check_range(&buffer.desc().name, offset, required, buffer.desc().size)?;
                UpdateSource::Buffer {
                    buffer,
                    offset,
                    mode: src_mode,
                }
            }
        };

        self.record(ContextCommand::UpdateTexture {
            texture: Arc::clone(texture),
            subresource: Subresource::new(mip, slice),
            source,
            mode: dst_mode,
        })
    }

    /// 复制整个纹理子资源
    pub fn copy_texture(&mut self, attribs: &CopyTextureAttribs) -> Result<()> {
        let src = &attribs.src_texture;
        let dst = &attribs.dst_texture;
        check_subresource(src, attribs.src_mip, attribs.src_slice)?;
        check_subresource(dst, attribs.dst_mip, attribs.dst_slice)?;

        let (sd, dd) = (src.desc(), dst.desc());
        let (sp, dp) = (sd.mip_properties(attribs.src_mip), dd.mip_properties(attribs.dst_mip));
        if (sp.logical_width, sp.logical_height, sp.depth) != (dp.logical_width, dp.logical_height, dp.depth) {
            return Err(invalid_argument(format!(
                "copy from '{}' ({}x{}x{}) to '{}' ({}x{}x{}): extents differ",
                sd.name, sp.logical_width, sp.logical_height, sp.depth, dd.name, dp.logical_width, dp.logical_height, dp.depth
            )));
        }
        if sd.format.attribs().element_size() != dd.format.attribs().element_size() {
            return Err(invalid_argument(format!(
                "copy from '{}' ({}) to '{}' ({}): formats are not copy-compatible",
                sd.name, sd.format, dd.name, dd.format
            )));
        }
        if sd.sample_count != dd.sample_count {
            return Err(invalid_argument(format!(
                "copy from '{}' to '{}': sample counts differ",
                sd.name, dd.name
            )));
        }
        if Arc::ptr_eq(src, dst) && attribs.src_mip == attribs.dst_mip && attribs.src_slice == attribs.dst_slice {
            return Err(invalid_argument(format!(
                "texture '{}': a subresource can't be copied onto itself",
                sd.name
            )));
        }
        self.record(ContextCommand::CopyTexture(attribs.clone()))
    }

    /// 把多重采样纹理解析到单采样纹理
    pub fn resolve_texture_subresource(
        &mut self,
        src: &Arc<Texture>,
        dst: &Arc<Texture>,
        attribs: &ResolveTextureSubresourceAttribs,
    ) -> Result<()> {
        let (sd, dd) = (src.desc(), dst.desc());
        if sd.sample_count <= 1 {
            return Err(invalid_argument(format!("resolve source '{}' is not multisampled", sd.name)));
        }
        if dd.sample_count != 1 {
            return Err(invalid_argument(format!("resolve destination '{}' is multisampled", dd.name)));
        }
        if sd.format != dd.format {
            return Err(invalid_argument(format!(
                "resolve from '{}' ({}) to '{}' ({}): formats differ",
                sd.name, sd.format, dd.name, dd.format
            )));
        }
        check_subresource(src, attribs.src_mip, attribs.src_slice)?;
        check_subresource(dst, attribs.dst_mip, attribs.dst_slice)?;
        let (sp, dp) = (sd.mip_properties(attribs.src_mip), dd.mip_properties(attribs.dst_mip));
        if (sp.logical_width, sp.logical_height) != (dp.logical_width, dp.logical_height) {
            return Err(invalid_argument(format!(
                "resolve from '{}' to '{}': extents differ",
                sd.name, dd.name
            )));
        }
        self.record(ContextCommand::ResolveTexture {
            src: Arc::clone(src),
            dst: Arc::clone(dst),
            attribs: *attribs,
        })
    }

    /// 显式插入状态转换屏障
    ///
    /// 对不受跟踪的资源必须给出 `old_state`。
    pub fn transition_resource_states(&mut self, barriers: &[StateTransitionDesc]) -> Result<()> {
        for barrier in barriers {
            if !barrier.new_state.is_known() {
                return Err(invalid_argument(format!(
                    "resource '{}': the new state of a transition must be known",
                    barrier.resource.name()
                )));
            }
            if !barrier.resource.accepts_state(barrier.new_state) {
                return Err(invalid_argument(format!(
                    "resource '{}': {:?} is not a valid state for this kind of resource",
                    barrier.resource.name(),
                    barrier.new_state
                )));
            }
        }
        self.record(ContextCommand::TransitionStates(barriers.to_vec()))
    }

    // ---------------------------------------------------------------
    // CPU 映射
    // ---------------------------------------------------------------

    /// 读取 CPU 可读纹理的一个子资源
    ///
    /// 调用方负责先用 Fence 确认复制已经完成。
    pub fn map_texture_subresource(&mut self, texture: &Arc<Texture>, mip: u32, slice: u32) -> Result<MappedTextureSubresource> {
        self.require_immediate("map texture subresource")?;
        let desc = texture.desc();
        if desc.usage != Usage::Staging || !desc.cpu_access.contains(CpuAccessFlags::READ) {
            return Err(invalid_argument(format!(
                "texture '{}' is not a CPU-readable staging texture",
                desc.name
            )));
        }
        check_subresource(texture, mip, slice)?;

        let props = desc.mip_properties(mip);
        let data = self.device.native_call(
            self.device.backend().read_texture(texture.core().handle, Subresource::new(mip, slice)),
            "read texture",
            &desc.name,
        )?;
        Ok(MappedTextureSubresource {
            data,
            row_stride: props.row_size,
            depth_stride: props.depth_slice_size,
            width: props.logical_width,
            height: props.logical_height,
        })
    }

    /// 读取 CPU 可读缓冲区的全部内容
    pub fn map_buffer_read(&mut self, buffer: &Arc<Buffer>) -> Result<Vec<u8>> {
        self.require_immediate("map buffer")?;
        let desc = buffer.desc();
        if desc.usage != Usage::Staging || !desc.cpu_access.contains(CpuAccessFlags::READ) {
            return Err(invalid_argument(format!(
                "buffer '{}' is not a CPU-readable staging buffer",
                desc.name
            )));
        }
        self.device.native_call(
            self.device.backend().read_buffer(buffer.core().handle, 0, desc.size),
            "read buffer",
            &desc.name,
        )
    }

    /// 映射 CPU 可写缓冲区并由 `write` 填充整个缓冲区
    ///
    /// - 动态缓冲区必须带 `MapFlags::DISCARD`。新内容作为一次更新进入命令流，
    ///   之前记录的命令仍然看到旧内容
    /// - 上传用暂存缓冲区由 CPU 立即写入，调用方负责先用 Fence 确认 GPU 不再读取它
    pub fn map_buffer_write<R>(
        &mut self,
        buffer: &Arc<Buffer>,
        flags: MapFlags,
        write: impl FnOnce(&mut [u8]) -> R,
    ) -> Result<R> {
        self.require_immediate("map buffer for writing")?;
        let desc = buffer.desc();
        let handle = buffer.core().handle;
        match cpu_write_target(&desc.name, desc.usage, desc.cpu_access, flags)? {
            CpuWriteTarget::Dynamic => {
                let mut data = vec![0u8; desc.size as usize];
                let result = write(&mut data);
                self.pending.push(NativeCommand::UpdateBuffer {
                    buffer: handle,
                    offset: 0,
                    data,
                });
                Ok(result)
            }
            CpuWriteTarget::Staging => {
                let mut data = if flags.contains(MapFlags::DISCARD) {
                    vec![0u8; desc.size as usize]
                } else {
                    self.device.native_call(
                        self.device.backend().read_buffer(handle, 0, desc.size),
                        "read buffer",
                        &desc.name,
                    )?
                };
                let result = write(&mut data);
                self.device.native_call(
                    self.device.backend().write_buffer(handle, 0, &data),
                    "write buffer",
                    &desc.name,
                )?;
                Ok(result)
            }
        }
    }

    /// 映射 CPU 可写纹理的一个子资源，规则与 `map_buffer_write` 相同
    ///
    /// `write` 收到的是紧密排列的整个子资源，行距见 `TextureDesc::mip_properties`。
    pub fn map_texture_subresource_write<R>(
        &mut self,
        texture: &Arc<Texture>,
        mip: u32,
        slice: u32,
        flags: MapFlags,
        write: impl FnOnce(&mut [u8]) -> R,
    ) -> Result<R> {
        self.require_immediate("map texture subresource for writing")?;
        let desc = texture.desc();
        check_subresource(texture, mip, slice)?;
        let handle = texture.core().handle;
        let subresource = Subresource::new(mip, slice);
        let size = desc.mip_properties(mip).mip_size as usize;
        match cpu_write_target(&desc.name, desc.usage, desc.cpu_access, flags)? {
            CpuWriteTarget::Dynamic => {
                let mut data = vec![0u8; size];
                let result = write(&mut data);
                self.pending.push(NativeCommand::UpdateTexture {
                    texture: handle,
                    subresource,
                    data,
                });
                Ok(result)
            }
            CpuWriteTarget::Staging => {
                let mut data = if flags.contains(MapFlags::DISCARD) {
                    vec![0u8; size]
                } else {
                    self.device.native_call(
                        self.device.backend().read_texture(handle, subresource),
                        "read texture",
                        &desc.name,
                    )?
                };
                let result = write(&mut data);
                self.device.native_call(
                    self.device.backend().write_texture(handle, subresource, &data),
                    "write texture",
                    &desc.name,
                )?;
                Ok(result)
            }
        }
    }

    // ---------------------------------------------------------------
    // 同步与提交
    // ---------------------------------------------------------------

    /// 在命令流中写入 Fence signal，下次 `flush` 时随命令一起提交
    pub fn signal_fence(&mut self, fence: &Arc<Fence>, value: u64) -> Result<()> {
        self.require_immediate("signal fence")?;
        if !fence.enqueue_signal(value) {
            return Err(invalid_argument(format!(
                "fence '{}': value {} must be greater than the last signaled value {}",
                fence.name(),
                value,
                fence.last_enqueued_value()
            )));
        }
        self.pending.push(NativeCommand::SignalFence {
            counter: fence.counter(),
            value,
        });
        Ok(())
    }

    /// 等待 Fence 到达 `value`
    pub fn wait_for_fence(&mut self, fence: &Arc<Fence>, value: u64, flush_context: bool) -> Result<()> {
        self.require_immediate("wait for fence")?;
        if flush_context {
            self.flush()?;
        }
        if value > fence.last_enqueued_value() && !fence.counter().is_completed(value) {
            return Err(invalid_argument(format!(
                "fence '{}': value {} has never been signaled",
                fence.name(),
                value
            )));
        }
        self.device.wait_for_fence(&fence.counter(), value)
    }

    /// 提交所有未提交的命令
    pub fn flush(&mut self) -> Result<()> {
        self.require_immediate("flush")?;
        let commands = std::mem::take(&mut self.pending);
        self.device.submit(commands)?;
        self.stats.flushes += 1;
        Ok(())
    }

    /// 提交并等待 GPU 空闲
    pub fn wait_for_idle(&mut self) -> Result<()> {
        self.require_immediate("wait for idle")?;
        self.flush()?;
        self.device.idle_gpu()
    }

    /// 忘记缓存的绑定状态，下一次绑定一定会产生原生命令
    pub fn invalidate_state(&mut self) {
        self.bound = BoundState::default();
    }

    // ---------------------------------------------------------------
    // 命令列表
    // ---------------------------------------------------------------

    /// 结束记录，取出命令列表
    pub fn finish_command_list(&mut self) -> Result<CommandList> {
        if !self.is_deferred() {
            return Err(wrong_context("finish command list"));
        }
        self.next_list_index += 1;
        let list = CommandList {
            id: ObjectId::next(),
            name: format!("{} list {}", self.name, self.next_list_index),
            commands: std::mem::take(&mut self.recording),
        };
        self.invalidate_state();
        crate::engine_debug!(context = %self.name, list = %list.name, commands = list.commands.len(), "Command list finished");
        Ok(list)
    }

    /// 回放延迟上下文的命令列表
    ///
    /// 回放前后都会清空绑定状态；遇到第一个错误即停止。
    pub fn execute_command_list(&mut self, list: CommandList) -> Result<()> {
        self.require_immediate("execute command list")?;
        crate::engine_debug!(list = %list.name, commands = list.commands.len(), "Executing command list");

        self.invalidate_state();
        let mut result = Ok(());
        for (index, command) in list.commands.into_iter().enumerate() {
            if let Err(err) = self.execute(command) {
                crate::engine_error!(list = %list.name, index, error = %err, "Command list execution stopped");
                result = Err(err);
                break;
            }
        }
        self.invalidate_state();
        self.stats.command_lists_executed += 1;
        result
    }

    // ---------------------------------------------------------------
    // 交换链内部接口
    // ---------------------------------------------------------------

    /// 解绑引用该纹理的渲染目标
    pub(crate) fn unbind_texture_targets(&mut self, texture: &Arc<Texture>) -> bool {
        let referenced = self.bound.targets.as_ref().is_some_and(|t| t.references(texture));
        if referenced {
            self.pending.push(NativeCommand::SetRenderTargets {
                render_targets: Vec::new(),
                depth_stencil: None,
            });
            self.bound.targets = Some(BoundTargets {
                render_targets: Vec::new(),
                depth_stencil: None,
            });
        }
        referenced
    }

    pub(crate) fn transition_texture(&mut self, texture: &Arc<Texture>, state: ResourceState, operation: &str) -> Result<()> {
        self.require_immediate(operation)?;
        self.transition(&ResourceRef::from(texture), state, TransitionMode::Transition, operation)
    }

    // ---------------------------------------------------------------
    // 执行
    // ---------------------------------------------------------------

    fn record(&mut self, command: ContextCommand) -> Result<()> {
        match self.kind {
            ContextKind::Deferred => {
                match &command {
                    ContextCommand::SetPipeline(pipeline) => self.bound.pipeline = Some(Arc::clone(pipeline)),
                    ContextCommand::CommitShaderResources { srb, .. } => self.bound.srb = Some(Arc::clone(srb)),
                    _ => {}
                }
                self.recording.push(command);
                Ok(())
            }
            ContextKind::Immediate => self.execute(command),
        }
    }

    /// 把资源转换到 `required`，或按模式校验
    fn transition(
        &mut self,
        resource: &ResourceRef,
        required: ResourceState,
        mode: TransitionMode,
        operation: &str,
    ) -> Result<()> {
        if let Some(fixed) = resource.fixed_state() {
            if fixed != required && mode != TransitionMode::None {
                return Err(invalid_argument(format!(
                    "staging resource '{}' must stay in {:?}, {} requires {:?}",
                    resource.name(),
                    fixed,
                    operation,
                    required
                )));
            }
        }

        match mode {
            TransitionMode::None => Ok(()),
            TransitionMode::Verify => self.verify(resource, required, operation),
            TransitionMode::Transition => {
                if let TransitionOutcome::Barrier { before, after } = plan_transition(resource.state(), required) {
                    crate::engine_trace!(
                        resource = %resource.name(),
                        before = ?before,
                        after = ?after,
                        operation,
                        "Resource state transition"
                    );
                    self.pending.push(NativeCommand::Barrier {
                        resource: resource.handle(),
                        before,
                        after,
                    });
                    resource.set_state(after);
                    self.stats.barriers += 1;
                }
                Ok(())
            }
        }
    }

    /// 校验资源已处于所需状态；只在设备开启校验时生效
    fn verify(&self, resource: &ResourceRef, required: ResourceState, operation: &str) -> Result<()> {
        if !self.device.validation_enabled() {
            return Ok(());
        }
        let actual = resource.state();
        if actual.is_known() && !actual.satisfies(required) {
            crate::engine_error!(
                resource = %resource.name(),
                actual = ?actual,
                required = ?required,
                operation,
                "Resource is not in the required state"
            );
            return Err(GraphicsError::StateViolation {
                resource: resource.name().to_string(),
                actual,
                required,
                operation: operation.to_string(),
            }
            .into());
        }
        Ok(())
    }

    /// 绘制前校验所有已绑定资源的状态
    fn verify_bound_resources(&self, graphics: bool, operation: &str) -> Result<()> {
        if !self.device.validation_enabled() {
            return Ok(());
        }
        if graphics {
            for (buffer, _) in self.bound.vertex_buffers.iter().flatten() {
                self.verify(&ResourceRef::from(buffer), ResourceState::VertexBuffer, operation)?;
            }
            if let Some(targets) = &self.bound.targets {
                for rtv in &targets.render_targets {
                    self.verify(&ResourceRef::from(rtv.texture()), ResourceState::RenderTarget, operation)?;
                }
                if let Some(dsv) = &targets.depth_stencil {
                    self.verify(&ResourceRef::from(dsv.texture()), ResourceState::DepthWrite, operation)?;
                }
            }
        }
        if let Some(srb) = &self.bound.srb {
            for bound in srb.bound_resources() {
                self.verify(&bound.resource, bound.required, operation)?;
            }
        }
        Ok(())
    }

    /// 本次绘制引用的全部原生对象
    fn referenced_handles(&self, graphics: bool) -> Vec<NativeHandle> {
        let mut handles = Vec::new();
        if let Some(pipeline) = &self.bound.pipeline {
            handles.push(pipeline.handle());
        }
        if graphics {
            handles.extend(self.bound.vertex_buffers.iter().flatten().map(|(b, _)| b.core().handle));
            if let Some((buffer, _)) = &self.bound.index_buffer {
                handles.push(buffer.core().handle);
            }
            if let Some(targets) = &self.bound.targets {
                for view in targets.render_targets.iter().chain(targets.depth_stencil.iter()) {
                    handles.push(view.handle());
                    handles.push(view.texture().core().handle);
                }
            }
        }
        if let Some(srb) = &self.bound.srb {
            for bound in srb.bound_resources() {
                handles.push(bound.handle);
                handles.push(bound.resource.handle());
            }
        }
        handles
    }

    fn execute(&mut self, command: ContextCommand) -> Result<()> {
        match command {
            ContextCommand::SetPipeline(pipeline) => {
                let same = self.bound.pipeline.as_ref().is_some_and(|p| Arc::ptr_eq(p, &pipeline));
                if !same {
                    self.pending.push(NativeCommand::SetPipeline {
                        pipeline: pipeline.handle(),
                    });
                    self.bound.pipeline = Some(pipeline);
                }
            }
            ContextCommand::CommitShaderResources { srb, mode } => {
                for bound in srb.bound_resources() {
                    self.transition(&bound.resource, bound.required, mode, "commit shader resources")?;
                }
                self.bound.srb = Some(srb);
            }
            ContextCommand::SetVertexBuffers {
                start_slot,
                buffers,
                reset,
                mode,
            } => {
                for (buffer, _) in &buffers {
                    self.transition(&ResourceRef::from(buffer), ResourceState::VertexBuffer, mode, "set vertex buffers")?;
                }

                let mut streams = if reset { Vec::new() } else { self.bound.vertex_buffers.clone() };
                let end = start_slot as usize + buffers.len();
                if streams.len() < end {
                    streams.resize(end, None);
                }
                for (i, (buffer, offset)) in buffers.iter().enumerate() {
                    streams[start_slot as usize + i] = Some((Arc::clone(buffer), *offset));
                }

                let unchanged = streams.len() == self.bound.vertex_buffers.len()
                    && streams.iter().zip(&self.bound.vertex_buffers).all(|(a, b)| same_stream(a, b));
                if !unchanged {
                    self.pending.push(NativeCommand::SetVertexBuffers {
                        start_slot,
                        buffers: buffers.iter().map(|(b, o)| (b.core().handle, *o)).collect(),
                    });
                    self.bound.vertex_buffers = streams;
                }
            }
            ContextCommand::SetIndexBuffer { buffer, offset, mode } => {
                self.transition(&ResourceRef::from(&buffer), ResourceState::IndexBuffer, mode, "set index buffer")?;
                let next = Some((buffer, offset));
                if !same_stream(&self.bound.index_buffer, &next) {
                    if let Some((buffer, offset)) = &next {
                        self.pending.push(NativeCommand::SetIndexBuffer {
                            buffer: buffer.core().handle,
                            offset: *offset,
                        });
                    }
                    self.bound.index_buffer = next;
                }
            }
            ContextCommand::SetRenderTargets {
                render_targets,
                depth_stencil,
                mode,
            } => {
                for rtv in &render_targets {
                    check_not_retired(rtv)?;
                    self.transition(&ResourceRef::from(rtv.texture()), ResourceState::RenderTarget, mode, "set render targets")?;
                }
                if let Some(dsv) = &depth_stencil {
                    check_not_retired(dsv)?;
                    self.transition(&ResourceRef::from(dsv.texture()), ResourceState::DepthWrite, mode, "set render targets")?;
                }

                let unchanged = self
                    .bound
                    .targets
                    .as_ref()
                    .is_some_and(|t| t.matches(&render_targets, depth_stencil.as_ref()));
                if !unchanged {
                    self.pending.push(NativeCommand::SetRenderTargets {
                        render_targets: render_targets.iter().map(|v| v.handle()).collect(),
                        depth_stencil: depth_stencil.as_ref().map(|v| v.handle()),
                    });
                    self.bound.targets = Some(BoundTargets {
                        render_targets,
                        depth_stencil,
                    });
                }
            }
            ContextCommand::ClearRenderTarget { view, color, mode } => {
                check_not_retired(&view)?;
                self.transition(&ResourceRef::from(view.texture()), ResourceState::RenderTarget, mode, "clear render target")?;
                self.pending.push(NativeCommand::ClearRenderTarget {
                    view: view.handle(),
                    color,
                });
                self.stats.clears += 1;
            }
            ContextCommand::ClearDepthStencil {
                view,
                flags,
                depth,
                stencil,
                mode,
            } => {
                check_not_retired(&view)?;
                self.transition(&ResourceRef::from(view.texture()), ResourceState::DepthWrite, mode, "clear depth stencil")?;
                self.pending.push(NativeCommand::ClearDepthStencil {
                    view: view.handle(),
                    depth: flags.contains(ClearDepthStencilFlags::DEPTH).then_some(depth),
                    stencil: flags.contains(ClearDepthStencilFlags::STENCIL).then_some(stencil),
                });
                self.stats.clears += 1;
            }
            ContextCommand::Draw(attribs) => {
                self.require_pipeline(false, "draw")?;
                self.verify_bound_resources(true, "draw")?;
                let resources = self.referenced_handles(true);
                self.pending.push(NativeCommand::Draw {
                    indexed: false,
                    count: attribs.num_vertices,
                    instances: attribs.num_instances,
                    resources,
                });
                self.stats.draws += 1;
            }
            ContextCommand::DrawIndexed(attribs) => {
                self.require_pipeline(false, "draw indexed")?;
                let Some((buffer, _)) = &self.bound.index_buffer else {
                    return Err(invalid_argument("draw indexed requires a bound index buffer"));
                };
                if self.device.validation_enabled() {
                    self.verify(&ResourceRef::from(buffer), ResourceState::IndexBuffer, "draw indexed")?;
                }
                self.verify_bound_resources(true, "draw indexed")?;
                let resources = self.referenced_handles(true);
                self.pending.push(NativeCommand::Draw {
                    indexed: true,
                    count: attribs.num_indices,
                    instances: attribs.num_instances,
                    resources,
                });
                self.stats.draws += 1;
            }
            ContextCommand::Dispatch(attribs) => {
                self.require_pipeline(true, "dispatch compute")?;
                self.verify_bound_resources(false, "dispatch compute")?;
                let resources = self.referenced_handles(false);
                self.pending.push(NativeCommand::Dispatch {
                    groups: attribs.thread_group_count,
                    resources,
                });
                self.stats.dispatches += 1;
            }
            ContextCommand::UpdateBuffer {
                buffer,
                offset,
                data,
                mode,
            } => {
                self.transition(&ResourceRef::from(&buffer), ResourceState::CopyDest, mode, "update buffer")?;
                self.pending.push(NativeCommand::UpdateBuffer {
                    buffer: buffer.core().handle,
                    offset,
                    data,
                });
                self.stats.copies += 1;
            }
            ContextCommand::CopyBuffer {
                src,
                src_offset,
                src_mode,
                dst,
                dst_offset,
                dst_mode,
                size,
            } => {
                self.transition(&ResourceRef::from(&src), ResourceState::CopySource, src_mode, "copy buffer")?;
                self.transition(&ResourceRef::from(&dst), ResourceState::CopyDest, dst_mode, "copy buffer")?;
                self.pending.push(NativeCommand::CopyBuffer {
                    src: src.core().handle,
                    src_offset,
                    dst: dst.core().handle,
                    dst_offset,
                    size,
                });
                self.stats.copies += 1;
            }
            ContextCommand::UpdateTexture {
                texture,
                subresource,
                source,
                mode,
            } => {
                let texture_ref = ResourceRef::from(&texture);
                match source {
                    UpdateSource::Cpu(data) => {
                        self.transition(&texture_ref, ResourceState::CopyDest, mode, "update texture")?;
                        self.pending.push(NativeCommand::UpdateTexture {
                            texture: texture.core().handle,
                            subresource,
                            data,
                        });
                    }
                    UpdateSource::Buffer {
                        buffer,
                        offset,
                        mode: src_mode,
                    } => {
                        self.transition(&ResourceRef::from(&buffer), ResourceState::CopySource, src_mode, "update texture")?;
                        self.transition(&texture_ref, ResourceState::CopyDest, mode, "update texture")?;
                        self.pending.push(NativeCommand::CopyBufferToTexture {
                            buffer: buffer.core().handle,
                            offset,
                            texture: texture.core().handle,
                            subresource,
                        });
                    }
                }
                self.stats.copies += 1;
            }
            ContextCommand::CopyTexture(attribs) => {
                self.transition(
                    &ResourceRef::from(&attribs.src_texture),
                    ResourceState::CopySource,
                    attribs.src_mode,
                    "copy texture",
                )?;
                self.transition(
                    &ResourceRef::from(&attribs.dst_texture),
                    ResourceState::CopyDest,
                    attribs.dst_mode,
                    "copy texture",
                )?;
                self.pending.push(NativeCommand::CopyTexture {
                    src: attribs.src_texture.core().handle,
                    src_subresource: Subresource::new(attribs.src_mip, attribs.src_slice),
                    dst: attribs.dst_texture.core().handle,
                    dst_subresource: Subresource::new(attribs.dst_mip, attribs.dst_slice),
                });
                self.stats.copies += 1;
            }
            ContextCommand::ResolveTexture { src, dst, attribs } => {
                self.transition(&ResourceRef::from(&src), ResourceState::ResolveSource, attribs.src_mode, "resolve texture")?;
                self.transition(&ResourceRef::from(&dst), ResourceState::ResolveDest, attribs.dst_mode, "resolve texture")?;
                self.pending.push(NativeCommand::ResolveTexture {
                    src: src.core().handle,
                    src_subresource: Subresource::new(attribs.src_mip, attribs.src_slice),
                    dst: dst.core().handle,
                    dst_subresource: Subresource::new(attribs.dst_mip, attribs.dst_slice),
                });
                self.stats.copies += 1;
            }
            ContextCommand::TransitionStates(barriers) => {
                for barrier in barriers {
                    self.explicit_transition(&barrier)?;
                }
            }
        }
        Ok(())
    }

    fn explicit_transition(&mut self, barrier: &StateTransitionDesc) -> Result<()> {
        let resource = &barrier.resource;
        let tracked = resource.state();
        if barrier.old_state.is_known() && tracked.is_known() && barrier.old_state != tracked {
            crate::engine_error!(
                resource = %resource.name(),
                old_state = ?barrier.old_state,
                tracked = ?tracked,
                "Explicit old state does not match the tracked state"
            );
            return Err(invalid_argument(format!(
                "resource '{}': old state {:?} does not match the tracked state {:?}",
                resource.name(),
                barrier.old_state,
                tracked
            )));
        }

        let before = if barrier.old_state.is_known() { barrier.old_state } else { tracked };
        if !before.is_known() {
            return Err(invalid_argument(format!(
                "resource '{}' is not tracked, the old state must be given explicitly",
                resource.name()
            )));
        }

        // UAV 到 UAV 仍然需要屏障来同步两次写入
        if before != barrier.new_state || before == ResourceState::UnorderedAccess {
            self.pending.push(NativeCommand::Barrier {
                resource: resource.handle(),
                before,
                after: barrier.new_state,
            });
            self.stats.barriers += 1;
        }
        if barrier.update_state {
            resource.set_state(barrier.new_state);
        }
        Ok(())
    }
}

impl Drop for DeviceContext {
    fn drop(&mut self) {
        match self.kind {
            ContextKind::Immediate if !self.pending.is_empty() && !self.device.is_lost() => {
                if let Err(err) = self.flush() {
                    crate::engine_warn!(context = %self.name, error = %err, "Failed to flush pending commands on drop");
                }
            }
            ContextKind::Deferred if !self.recording.is_empty() => {
                crate::engine_warn!(
                    context = %self.name,
                    commands = self.recording.len(),
                    "Deferred context dropped with unfinished commands"
                );
            }
            _ => {}
        }
    }
}

fn check_view(view: &TextureView, expected: TextureViewType) -> Result<()> {
    if view.view_type() != expected {
        return Err(invalid_argument(format!(
            "view '{}' is a {:?} view, {:?} expected",
            view.desc().name,
            view.view_type(),
            expected
        )));
    }
    check_not_retired(view)
}

fn check_not_retired(view: &TextureView) -> Result<()> {
    if view.texture().is_retired() {
        return Err(invalid_argument(format!(
            "texture '{}' belongs to a resized swap chain and can no longer be used",
            view.texture().desc().name
        )));
    }
    Ok(())
}

/// CPU 写入的落点
enum CpuWriteTarget {
    /// 动态资源：写入经命令流更新
    Dynamic,
    /// 上传用暂存资源：CPU 直接写入
    Staging,
}

fn cpu_write_target(name: &str, usage: Usage, cpu_access: CpuAccessFlags, flags: MapFlags) -> Result<CpuWriteTarget> {
    if !cpu_access.contains(CpuAccessFlags::WRITE) {
        return Err(invalid_argument(format!("resource '{}' was not created with CPU write access", name)));
    }
    match usage {
        Usage::Dynamic if flags.contains(MapFlags::DISCARD) => Ok(CpuWriteTarget::Dynamic),
        Usage::Dynamic => Err(invalid_argument(format!(
            "dynamic resource '{}' must be mapped with the discard flag",
            name
        ))),
        Usage::Staging => Ok(CpuWriteTarget::Staging),
        Usage::Default | Usage::Immutable => Err(invalid_argument(format!(
            "resource '{}' with {:?} usage can't be mapped for writing",
            name, usage
        ))),
    }
}

fn check_range(name: &str, offset: u64, size: u64, total: u64) -> Result<()> {
    if size == 0 || offset.checked_add(size).map_or(true, |end| end > total) {
        return Err(invalid_argument(format!(
            "'{}': range [{}, {} + {}) is empty or exceeds {} bytes",
            name, offset, offset, size, total
        )));
    }
    Ok(())
}

fn check_subresource(texture: &Texture, mip: u32, slice: u32) -> Result<()> {
    let desc = texture.desc();
    if mip >= desc.mip_levels || slice >= desc.array_size() {
        return Err(invalid_argument(format!(
            "texture '{}': subresource (mip {}, slice {}) is out of range ({} mips, {} slices)",
            desc.name,
            mip,
            slice,
            desc.mip_levels,
            desc.array_size()
        )));
    }
    Ok(())
}
