//! null 后端
//!
//! 在 CPU 上模拟一条 GPU 队列：提交的命令批次按顺序执行，
//! 缓冲区与纹理的内容保存在内存中，屏障会改写资源在“GPU 侧”的状态。
//! 执行方式有两种：
//!
//! - `Immediate`：提交即执行
//! - `Manual`：提交后排队，测试代码通过 `process` 显式推进 GPU 进度
//!
//! 后端同时统计屏障前状态不一致、呈现时状态错误、访问已销毁对象等问题，
//! 测试可以据此检查状态跟踪与延迟释放是否正确。

use std::collections::{HashMap, HashSet, VecDeque};

use parking_lot::Mutex;

use crate::core::config::{DeviceConfig, GpuExecution};
use crate::gfx::backend::{
    CommandBatch, NativeBackend, NativeCommand, NativeError, NativeHandle, NativeResult, NativeWindow, Subresource,
};
use crate::gfx::null::storage::{
    encode_color, texture_byte_size, try_zeroed, write_depth_stencil, NullObject, TextureStorage,
};
use crate::renderer::device::DeviceCaps;
use crate::renderer::format::{FormatSupport, TextureFormat};
use crate::renderer::pipeline::{PipelineStateDesc, ShaderDesc};
use crate::renderer::resources::{BufferDesc, BufferViewDesc, SamplerDesc, TextureDesc, TextureViewDesc};
use crate::renderer::state::ResourceState;
use crate::renderer::swap_chain::SwapChainDesc;
use crate::renderer::sync::FenceCounter;

/// null 后端的运行统计
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NullStats {
    pub barriers: u64,
    /// 屏障声明的前状态与 GPU 侧实际状态不一致
    pub barrier_mismatches: u64,
    pub binds: u64,
    pub draws: u64,
    pub dispatches: u64,
    pub presents: u64,
    /// 呈现时后台缓冲区不在 `Present` 状态
    pub present_state_violations: u64,
    /// GPU 执行时引用了已销毁的对象
    pub use_after_free: u64,
    pub submissions: u64,
    pub batches_executed: u64,
    pub destroyed: u64,
}

/// 排队中的 GPU 工作
#[derive(Debug)]
enum QueuedWork {
    Batch(CommandBatch),
    Present {
        swap_chain: NativeHandle,
        back_buffer: NativeHandle,
    },
}

#[derive(Debug, Default)]
struct NullState {
    next_handle: u64,
    objects: HashMap<NativeHandle, NullObject>,
    destroyed: HashSet<NativeHandle>,
    queue: VecDeque<QueuedWork>,
    memory_used: u64,
    lost: bool,
    stats: NullStats,
}

/// 软件模拟的原生后端
#[derive(Debug)]
pub struct NullBackend {
    execution: GpuExecution,
    memory_budget: u64,
    caps: DeviceCaps,
    state: Mutex<NullState>,
}

impl NullBackend {
    pub fn new(execution: GpuExecution) -> Self {
        Self::with_memory_budget(execution, u64::MAX)
    }

    pub fn with_memory_budget(execution: GpuExecution, memory_budget: u64) -> Self {
        crate::engine_info!(execution = ?execution, "Null backend created");
        Self {
            execution,
            memory_budget,
            caps: DeviceCaps::default(),
            state: Mutex::new(NullState {
                next_handle: 1,
                ..Default::default()
            }),
        }
    }

    pub fn from_config(config: &DeviceConfig) -> Self {
        Self::with_memory_budget(config.gpu_execution, config.memory_budget_mb.saturating_mul(1024 * 1024))
    }

    pub fn execution(&self) -> GpuExecution {
        self.execution
    }

    /// 推进 GPU：执行最多 `count` 个排队的工作项，返回实际执行数
    pub fn process(&self, count: usize) -> usize {
        let mut state = self.state.lock();
        let mut executed = 0;
        while executed < count {
            let Some(work) = state.queue.pop_front() else { break };
            state.execute_work(work);
            executed += 1;
        }
        executed
    }

    /// 执行全部排队的工作
    pub fn process_all(&self) -> usize {
        self.process(usize::MAX)
    }

    /// 尚未执行的工作项数
    pub fn pending_batches(&self) -> usize {
        self.state.lock().queue.len()
    }

    /// 模拟设备丢失：之后所有调用都返回 `DeviceLost`
    pub fn simulate_device_loss(&self) {
        let mut state = self.state.lock();
        state.lost = true;
        state.queue.clear();
        crate::engine_warn!("Null backend: simulated device loss");
    }

    pub fn stats(&self) -> NullStats {
        self.state.lock().stats.clone()
    }

    /// 资源在 GPU 侧的状态（由已执行的屏障决定）
    pub fn gpu_state(&self, handle: NativeHandle) -> Option<ResourceState> {
        self.state.lock().objects.get(&handle).and_then(NullObject::gpu_state)
    }

    /// 对象当前是否存在
    pub fn is_alive(&self, handle: NativeHandle) -> bool {
        self.state.lock().objects.contains_key(&handle)
    }

    pub fn live_object_count(&self) -> usize {
        self.state.lock().objects.len()
    }

    pub fn memory_used(&self) -> u64 {
        self.state.lock().memory_used
    }

    fn check_lost(state: &NullState) -> NativeResult<()> {
        if state.lost {
            Err(NativeError::DeviceLost)
        } else {
            Ok(())
        }
    }

    /// 分配前检查预算
    fn check_budget(&self, state: &NullState, size: u64, kind: &str) -> NativeResult<()> {
        Self::check_lost(state)?;
        if state.memory_used.saturating_add(size) > self.memory_budget {
            return Err(NativeError::OutOfMemory(format!(
                "{} bytes requested for a {}, {} of {} bytes in use",
                size, kind, state.memory_used, self.memory_budget
            )));
        }
        Ok(())
    }

    fn insert(&self, object: NullObject) -> NativeResult<NativeHandle> {
        let mut state = self.state.lock();
        let size = object.byte_size();
        self.check_budget(&state, size, object.kind())?;
        let handle = NativeHandle(state.next_handle);
        state.next_handle += 1;
        state.memory_used += size;
        state.objects.insert(handle, object);
        Ok(handle)
    }

    fn require_alive(state: &NullState, handle: NativeHandle, what: &str) -> NativeResult<()> {
        if state.objects.contains_key(&handle) {
            Ok(())
        } else {
            Err(NativeError::Invalid(format!("{} {:?} does not exist", what, handle)))
        }
    }
}

impl NullState {
    fn execute_work(&mut self, work: QueuedWork) {
        match work {
            QueuedWork::Batch(batch) => self.execute_batch(batch),
            QueuedWork::Present { swap_chain, back_buffer } => self.execute_present(swap_chain, back_buffer),
        }
    }

    fn execute_present(&mut self, swap_chain: NativeHandle, back_buffer: NativeHandle) {
        self.stats.presents += 1;
        if !self.objects.contains_key(&swap_chain) {
            self.note_use_after_free(swap_chain, "present");
            return;
        }
        match self.objects.get(&back_buffer).and_then(NullObject::gpu_state) {
            Some(ResourceState::Present) => {}
            Some(state) => {
                self.stats.present_state_violations += 1;
                crate::engine_warn!(back_buffer = ?back_buffer, state = ?state, "Null backend: back buffer presented outside the Present state");
            }
            None => self.note_use_after_free(back_buffer, "present"),
        }
    }

    fn execute_batch(&mut self, batch: CommandBatch) {
        crate::engine_trace!(submission = batch.submission, commands = batch.commands.len(), "Null backend: executing batch");
        for command in batch.commands {
            self.execute_command(command);
        }
        self.stats.batches_executed += 1;
    }

    fn note_use_after_free(&mut self, handle: NativeHandle, operation: &str) {
        self.stats.use_after_free += 1;
        let destroyed = self.destroyed.contains(&handle);
        crate::engine_error!(handle = ?handle, destroyed, operation, "Null backend: GPU accessed a dead object");
    }

    fn check_handles(&mut self, handles: &[NativeHandle], operation: &str) {
        for &handle in handles {
            if !self.objects.contains_key(&handle) {
                self.note_use_after_free(handle, operation);
            }
        }
    }

    fn execute_command(&mut self, command: NativeCommand) {
        match command {
            NativeCommand::Barrier { resource, before, after } => {
                self.stats.barriers += 1;
                match self.objects.get_mut(&resource) {
                    Some(object) => {
                        if let Some(actual) = object.gpu_state() {
                            if before != ResourceState::Unknown && actual != before {
                                self.stats.barrier_mismatches += 1;
                                crate::engine_warn!(
                                    resource = ?resource,
                                    expected = ?before,
                                    actual = ?actual,
                                    "Null backend: barrier source state does not match the GPU state"
                                );
                            }
                        }
                        object.set_gpu_state(after);
                    }
                    None => self.note_use_after_free(resource, "barrier"),
                }
            }
            NativeCommand::SetPipeline { pipeline } => {
                self.stats.binds += 1;
                self.check_handles(&[pipeline], "set pipeline");
            }
            NativeCommand::SetVertexBuffers { buffers, .. } => {
                self.stats.binds += 1;
                let handles: Vec<_> = buffers.iter().map(|(h, _)| *h).collect();
                self.check_handles(&handles, "set vertex buffers");
            }
            NativeCommand::SetIndexBuffer { buffer, .. } => {
                self.stats.binds += 1;
                self.check_handles(&[buffer], "set index buffer");
            }
            NativeCommand::SetRenderTargets { render_targets, depth_stencil } => {
                self.stats.binds += 1;
                self.check_handles(&render_targets, "set render targets");
                if let Some(dsv) = depth_stencil {
                    self.check_handles(&[dsv], "set render targets");
                }
            }
            NativeCommand::ClearRenderTarget { view, color } => self.clear_view(view, |format, texel| {
                texel.copy_from_slice(&encode_color(format, color));
            }),
            NativeCommand::ClearDepthStencil { view, depth, stencil } => {
                self.clear_view(view, |format, texel| write_depth_stencil(format, texel, depth, stencil))
            }
            NativeCommand::Draw { resources, .. } => {
                self.stats.draws += 1;
                self.check_handles(&resources, "draw");
            }
            NativeCommand::Dispatch { resources, .. } => {
                self.stats.dispatches += 1;
                self.check_handles(&resources, "dispatch");
            }
            NativeCommand::UpdateBuffer { buffer, offset, data } => match self.objects.get_mut(&buffer) {
                Some(NullObject::Buffer { data: dst, .. }) => write_clamped(dst, offset as usize, &data),
                _ => self.note_use_after_free(buffer, "update buffer"),
            },
            NativeCommand::CopyBuffer {
                src,
                src_offset,
                dst,
                dst_offset,
                size,
            } => {
                let bytes = match self.objects.get(&src) {
                    Some(NullObject::Buffer { data, .. }) => read_clamped(data, src_offset as usize, size as usize),
                    _ => return self.note_use_after_free(src, "copy buffer"),
                };
                match self.objects.get_mut(&dst) {
                    Some(NullObject::Buffer { data, .. }) => write_clamped(data, dst_offset as usize, &bytes),
                    _ => self.note_use_after_free(dst, "copy buffer"),
                }
            }
            NativeCommand::UpdateTexture {
                texture,
                subresource,
                data,
            } => self.write_subresource(texture, subresource, &data, "update texture"),
            NativeCommand::CopyBufferToTexture {
                buffer,
                offset,
                texture,
                subresource,
            } => {
                let size = match self.objects.get(&texture) {
                    Some(NullObject::Texture { storage, .. }) => storage.subresource(subresource).map_or(0, Vec::len),
                    _ => return self.note_use_after_free(texture, "copy buffer to texture"),
                };
                let bytes = match self.objects.get(&buffer) {
                    Some(NullObject::Buffer { data, .. }) => read_clamped(data, offset as usize, size),
                    _ => return self.note_use_after_free(buffer, "copy buffer to texture"),
                };
                self.write_subresource(texture, subresource, &bytes, "copy buffer to texture");
            }
            NativeCommand::CopyTexture {
                src,
                src_subresource,
                dst,
                dst_subresource,
            } => self.copy_subresource(src, src_subresource, dst, dst_subresource, "copy texture"),
            // 多重采样纹理只保存一份样本，解析即复制
            NativeCommand::ResolveTexture {
                src,
                src_subresource,
                dst,
                dst_subresource,
            } => self.copy_subresource(src, src_subresource, dst, dst_subresource, "resolve texture"),
            NativeCommand::SignalFence { counter, value } => counter.signal(value),
        }
    }

    fn copy_subresource(&mut self, src: NativeHandle, src_sub: Subresource, dst: NativeHandle, dst_sub: Subresource, op: &str) {
        let bytes = match self.objects.get(&src) {
            Some(NullObject::Texture { storage, .. }) => storage.subresource(src_sub).cloned().unwrap_or_default(),
            _ => return self.note_use_after_free(src, op),
        };
        self.write_subresource(dst, dst_sub, &bytes, op);
    }

    fn write_subresource(&mut self, texture: NativeHandle, sub: Subresource, bytes: &[u8], op: &str) {
        match self.objects.get_mut(&texture) {
            Some(NullObject::Texture { storage, .. }) => {
                if let Some(dst) = storage.subresource_mut(sub) {
                    write_clamped(dst, 0, bytes);
                }
            }
            _ => self.note_use_after_free(texture, op),
        }
    }

    /// 对视图覆盖的每个子资源逐像素执行 `write`
    fn clear_view(&mut self, view: NativeHandle, write: impl Fn(TextureFormat, &mut [u8])) {
        let (texture, desc) = match self.objects.get(&view) {
            Some(NullObject::TextureView { texture, desc }) => (*texture, desc.clone()),
            _ => return self.note_use_after_free(view, "clear"),
        };
        if !matches!(self.objects.get(&texture), Some(NullObject::Texture { .. })) {
            return self.note_use_after_free(texture, "clear");
        }
        let Some(NullObject::Texture { storage, .. }) = self.objects.get_mut(&texture) else {
            return;
        };
        let format = desc.format.unwrap_or(storage.desc.format);
        let texel_size = format.attribs().element_size() as usize;
        if texel_size == 0 {
            return;
        }
        for slice in desc.first_slice..desc.first_slice + desc.num_slices {
            for mip in desc.most_detailed_mip..desc.most_detailed_mip + desc.num_mips {
                if let Some(data) = storage.subresource_mut(Subresource::new(mip, slice)) {
                    for texel in data.chunks_exact_mut(texel_size) {
                        write(format, texel);
                    }
                }
            }
        }
    }
}

fn read_clamped(data: &[u8], offset: usize, size: usize) -> Vec<u8> {
    let start = offset.min(data.len());
    let end = offset.saturating_add(size).min(data.len());
    data[start..end].to_vec()
}

fn write_clamped(dst: &mut [u8], offset: usize, bytes: &[u8]) {
    let start = offset.min(dst.len());
    let len = bytes.len().min(dst.len() - start);
    dst[start..start + len].copy_from_slice(&bytes[..len]);
}

impl NativeBackend for NullBackend {
    fn name(&self) -> &str {
        "Null"
    }

    fn caps(&self) -> DeviceCaps {
        self.caps.clone()
    }

    fn format_support(&self, format: TextureFormat) -> FormatSupport {
        FormatSupport::typical(format)
    }

    fn create_buffer(&self, desc: &BufferDesc, data: Option<&[u8]>, initial_state: ResourceState) -> NativeResult<NativeHandle> {
        self.check_budget(&self.state.lock(), desc.size, "buffer")?;
        let mut bytes = try_zeroed(desc.size)?;
        if let Some(data) = data {
            write_clamped(&mut bytes, 0, data);
        }
        self.insert(NullObject::Buffer {
            desc: desc.clone(),
            data: bytes,
            gpu_state: initial_state,
        })
    }

    fn create_texture(&self, desc: &TextureDesc, data: &[&[u8]], initial_state: ResourceState) -> NativeResult<NativeHandle> {
        let size = texture_byte_size(desc).ok_or_else(|| {
            NativeError::OutOfMemory(format!("texture '{}' is larger than the addressable memory", desc.name))
        })?;
        self.check_budget(&self.state.lock(), size, "texture")?;
        let mut storage = TextureStorage::try_new(desc)?;
        for (dst, src) in storage.subresources.iter_mut().zip(data) {
            write_clamped(dst, 0, src);
        }
        self.insert(NullObject::Texture {
            storage,
            gpu_state: initial_state,
        })
    }

    fn create_texture_view(&self, texture: NativeHandle, desc: &TextureViewDesc) -> NativeResult<NativeHandle> {
        Self::require_alive(&self.state.lock(), texture, "texture")?;
        self.insert(NullObject::TextureView {
            texture,
            desc: desc.clone(),
        })
    }

    fn create_buffer_view(&self, buffer: NativeHandle, _desc: &BufferViewDesc) -> NativeResult<NativeHandle> {
        Self::require_alive(&self.state.lock(), buffer, "buffer")?;
        self.insert(NullObject::BufferView { buffer })
    }

    fn create_sampler(&self, _desc: &SamplerDesc) -> NativeResult<NativeHandle> {
        self.insert(NullObject::Sampler)
    }

    fn create_shader(&self, desc: &ShaderDesc) -> NativeResult<NativeHandle> {
        self.insert(NullObject::Shader { stage: desc.stage })
    }

    fn create_pipeline(&self, _desc: &PipelineStateDesc) -> NativeResult<NativeHandle> {
        self.insert(NullObject::Pipeline)
    }

    fn create_swap_chain(&self, _window: NativeWindow, desc: &SwapChainDesc) -> NativeResult<NativeHandle> {
        self.insert(NullObject::SwapChain { desc: desc.clone() })
    }

    fn destroy(&self, handle: NativeHandle) {
        let mut state = self.state.lock();
        match state.objects.remove(&handle) {
            Some(object) => {
                state.memory_used = state.memory_used.saturating_sub(object.byte_size());
                state.destroyed.insert(handle);
                state.stats.destroyed += 1;
            }
            None => crate::engine_warn!(handle = ?handle, "Null backend: destroying an unknown object"),
        }
    }

    fn submit(&self, batch: CommandBatch) -> NativeResult<()> {
        let mut state = self.state.lock();
        Self::check_lost(&state)?;
        state.stats.submissions += 1;
        match self.execution {
            GpuExecution::Immediate => state.execute_batch(batch),
            GpuExecution::Manual => state.queue.push_back(QueuedWork::Batch(batch)),
        }
        Ok(())
    }

    fn present(&self, swap_chain: NativeHandle, back_buffer: NativeHandle, _sync_interval: u32) -> NativeResult<()> {
        let mut state = self.state.lock();
        Self::check_lost(&state)?;
        Self::require_alive(&state, swap_chain, "swap chain")?;
        match self.execution {
            GpuExecution::Immediate => state.execute_present(swap_chain, back_buffer),
            GpuExecution::Manual => state.queue.push_back(QueuedWork::Present { swap_chain, back_buffer }),
        }
        Ok(())
    }

    fn read_texture(&self, texture: NativeHandle, subresource: Subresource) -> NativeResult<Vec<u8>> {
        let state = self.state.lock();
        Self::check_lost(&state)?;
        match state.objects.get(&texture) {
            Some(NullObject::Texture { storage, .. }) => storage.subresource(subresource).cloned().ok_or_else(|| {
                NativeError::Invalid(format!("subresource {:?} of texture {:?} is out of range", subresource, texture))
            }),
            _ => Err(NativeError::Invalid(format!("texture {:?} does not exist", texture))),
        }
    }

    fn read_buffer(&self, buffer: NativeHandle, offset: u64, size: u64) -> NativeResult<Vec<u8>> {
        let state = self.state.lock();
        Self::check_lost(&state)?;
        match state.objects.get(&buffer) {
            Some(NullObject::Buffer { data, .. }) => Ok(read_clamped(data, offset as usize, size as usize)),
            _ => Err(NativeError::Invalid(format!("buffer {:?} does not exist", buffer))),
        }
    }

    fn write_buffer(&self, buffer: NativeHandle, offset: u64, bytes: &[u8]) -> NativeResult<()> {
        let mut state = self.state.lock();
        Self::check_lost(&state)?;
        match state.objects.get_mut(&buffer) {
            Some(NullObject::Buffer { data, .. }) => {
                let start = usize::try_from(offset).ok().filter(|start| *start <= data.len());
                match start.and_then(|start| start.checked_add(bytes.len()).map(|end| (start, end))) {
                    Some((start, end)) if end <= data.len() => {
                        data[start..end].copy_from_slice(bytes);
                        Ok(())
                    }
                    _ => Err(NativeError::Invalid(format!(
                        "write of {} bytes at offset {} exceeds buffer {:?} ({} bytes)",
                        bytes.len(),
                        offset,
                        buffer,
                        data.len()
                    ))),
                }
            }
            _ => Err(NativeError::Invalid(format!("buffer {:?} does not exist", buffer))),
        }
    }

    fn write_texture(&self, texture: NativeHandle, subresource: Subresource, bytes: &[u8]) -> NativeResult<()> {
        let mut state = self.state.lock();
        Self::check_lost(&state)?;
        match state.objects.get_mut(&texture) {
            Some(NullObject::Texture { storage, .. }) => match storage.subresource_mut(subresource) {
                Some(dst) if dst.len() == bytes.len() => {
                    dst.copy_from_slice(bytes);
                    Ok(())
                }
                Some(dst) => Err(NativeError::Invalid(format!(
                    "subresource {:?} of texture {:?} holds {} bytes, {} written",
                    subresource,
                    texture,
                    dst.len(),
                    bytes.len()
                ))),
                None => Err(NativeError::Invalid(format!(
                    "subresource {:?} of texture {:?} is out of range",
                    subresource, texture
                ))),
            },
            _ => Err(NativeError::Invalid(format!("texture {:?} does not exist", texture))),
        }
    }

    fn wait_for_fence(&self, counter: &FenceCounter, value: u64) -> NativeResult<()> {
        let mut state = self.state.lock();
        Self::check_lost(&state)?;
        while !counter.is_completed(value) {
            match state.queue.pop_front() {
                Some(work) => state.execute_work(work),
                None => {
                    return Err(NativeError::Invalid(format!(
                        "fence value {} is never signaled by the submitted work (completed {})",
                        value,
                        counter.completed_value()
                    )))
                }
            }
        }
        Ok(())
    }

    fn wait_idle(&self) -> NativeResult<()> {
        let mut state = self.state.lock();
        Self::check_lost(&state)?;
        while let Some(work) = state.queue.pop_front() {
            state.execute_work(work);
        }
        Ok(())
    }
}
