//! 渲染设备
//!
//! 设备是所有资源的工厂，同时负责：
//!
//! - 队列提交：给每次提交分配编号，并在命令流末尾写入队列 Fence 的 signal
//! - 延迟释放：最后一个引用释放的原生对象要等 GPU 用完才销毁
//! - 采样器去重、格式查询、设备丢失状态
//!
//! 设备通过 `Arc<RenderDevice>` 共享，所有资源都强引用它，
//! 因此设备总是最后一个被析构的对象。

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;

use crate::core::config::DeviceConfig;
use crate::core::error::{invalid_argument, unsupported, GraphicsError, Result};
use crate::gfx::backend::{CommandBatch, NativeBackend, NativeCommand, NativeError, NativeHandle, NativeResult, NativeWindow};
use crate::renderer::context::DeviceContext;
use crate::renderer::format::{TextureFormat, TextureFormatAttribs, TextureFormatInfoExt};
use crate::renderer::object::{impl_device_object, InterfaceId, ObjectId};
use crate::renderer::pipeline::{PipelineState, PipelineStateDesc, Shader, ShaderDesc, ShaderStage};
use crate::renderer::release_queue::ReleaseQueue;
use crate::renderer::resources::buffer::validate_buffer_desc;
use crate::renderer::resources::sampler::SamplerKey;
use crate::renderer::resources::texture::{collect_initial_data, validate_texture_desc};
use crate::renderer::resources::{
    initial_state, Buffer, BufferDesc, ResourceCore, Sampler, SamplerDesc, SubresourceData, Texture, TextureDesc,
};
use crate::renderer::swap_chain::{SwapChain, SwapChainDesc};
use crate::renderer::sync::{Fence, FenceCounter, FenceDesc};

/// 设备能力
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceCaps {
    pub backend_name: String,
    pub adapter_name: String,
    /// 1D/2D 纹理的最大边长
    pub max_texture_dimension: u32,
    pub max_texture_array_slices: u32,
    pub max_render_targets: u32,
    pub compute_shaders: bool,
    pub deferred_contexts: bool,
    pub max_sampler_objects: u32,
}

impl Default for DeviceCaps {
    fn default() -> Self {
        Self {
            backend_name: "Null".to_string(),
            adapter_name: "Software adapter".to_string(),
            max_texture_dimension: 16384,
            max_texture_array_slices: 2048,
            max_render_targets: 8,
            compute_shaders: true,
            deferred_contexts: true,
            max_sampler_objects: 4096,
        }
    }
}

/// 提交计数，受同一把锁保护
#[derive(Debug)]
struct SubmissionState {
    /// 下一次写入命令流的队列 Fence 值
    next_fence_value: u64,
}

/// 等待销毁的原生对象
#[derive(Debug)]
struct StaleObject {
    handle: NativeHandle,
    name: String,
}

/// 渲染设备
pub struct RenderDevice {
    id: ObjectId,
    name: String,
    backend: Arc<dyn NativeBackend>,
    caps: DeviceCaps,
    validation: bool,
    /// 队列 Fence，每次提交之后推进
    queue_fence: Arc<FenceCounter>,
    submission: Mutex<SubmissionState>,
    /// 下一次提交的编号
    next_cmd_number: AtomicU64,
    release_queue: ReleaseQueue<StaleObject>,
    samplers: Mutex<HashMap<SamplerKey, Weak<Sampler>>>,
    lost: AtomicBool,
}

impl_device_object!(RenderDevice, InterfaceId::RenderDevice, [], |_d| None);

impl std::fmt::Debug for RenderDevice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RenderDevice")
            .field("name", &self.name)
            .field("backend", &self.caps.backend_name)
            .field("validation", &self.validation)
            .field("lost", &self.is_lost())
            .finish()
    }
}

impl RenderDevice {
    /// 创建设备、立即上下文以及配置指定数量的延迟上下文
    pub fn create(
        backend: Arc<dyn NativeBackend>,
        config: &DeviceConfig,
    ) -> Result<(Arc<RenderDevice>, DeviceContext, Vec<DeviceContext>)> {
        let caps = backend.caps();
        if config.num_deferred_contexts > 0 && !caps.deferred_contexts {
            crate::engine_error!(backend = %caps.backend_name, "Deferred contexts are not supported by this backend");
            return Err(unsupported(format!(
                "backend {} does not support deferred contexts",
                caps.backend_name
            )));
        }

        crate::engine_info!(
            backend = %caps.backend_name,
            adapter = %caps.adapter_name,
            validation = config.validation,
            deferred_contexts = config.num_deferred_contexts,
            "Creating render device"
        );

        let device = Arc::new(RenderDevice {
            id: ObjectId::next(),
            name: format!("{} render device", caps.backend_name),
            backend,
            caps,
            validation: config.validation,
            queue_fence: Arc::new(FenceCounter::new(0)),
            submission: Mutex::new(SubmissionState { next_fence_value: 1 }),
            next_cmd_number: AtomicU64::new(1),
            release_queue: ReleaseQueue::new(),
            samplers: Mutex::new(HashMap::new()),
            lost: AtomicBool::new(false),
        });

        let immediate = DeviceContext::new_immediate(&device);
        let deferred = (0..config.num_deferred_contexts)
            .map(|i| DeviceContext::new_deferred(&device, i))
            .collect();
        Ok((device, immediate, deferred))
    }

    /// 额外创建一个延迟上下文
    pub fn create_deferred_context(self: &Arc<Self>) -> Result<DeviceContext> {
        if !self.caps.deferred_contexts {
            return Err(unsupported("deferred contexts are not supported by this backend"));
        }
        static NEXT_DEFERRED: AtomicU64 = AtomicU64::new(1000);
        let index = NEXT_DEFERRED.fetch_add(1, Ordering::Relaxed);
        Ok(DeviceContext::new_deferred(self, index as u32))
    }

    pub fn caps(&self) -> &DeviceCaps {
        &self.caps
    }

    /// 是否开启了状态校验
    pub fn validation_enabled(&self) -> bool {
        self.validation
    }

    pub fn is_lost(&self) -> bool {
        self.lost.load(Ordering::Acquire)
    }

    pub(crate) fn backend(&self) -> &dyn NativeBackend {
        self.backend.as_ref()
    }

    pub(crate) fn ensure_alive(&self) -> Result<()> {
        if self.is_lost() {
            Err(GraphicsError::DeviceLost(format!("device '{}' has been lost", self.name)).into())
        } else {
            Ok(())
        }
    }

    /// 转换原生调用的结果；失败时记录日志，设备丢失时标记设备
    pub(crate) fn native_call<T>(&self, result: NativeResult<T>, operation: &str, object: &str) -> Result<T> {
        result.map_err(|err| {
            if err == NativeError::DeviceLost && !self.lost.swap(true, Ordering::AcqRel) {
                crate::engine_error!(device = %self.name, operation, "Device lost");
            }
            crate::engine_error!(object, operation, error = %err, "Native call failed");
            GraphicsError::from(err).into()
        })
    }

    // ---------------------------------------------------------------
    // 格式查询
    // ---------------------------------------------------------------

    /// 格式的固定属性
    pub fn texture_format_info(&self, format: TextureFormat) -> TextureFormatAttribs {
        format.attribs()
    }

    /// 格式属性以及后端的支持情况
    pub fn texture_format_info_ext(&self, format: TextureFormat) -> TextureFormatInfoExt {
        TextureFormatInfoExt {
            attribs: format.attribs(),
            support: self.backend.format_support(format),
        }
    }

    // ---------------------------------------------------------------
    // 资源创建
    // ---------------------------------------------------------------

    /// 创建缓冲区，可以附带初始数据
    pub fn create_buffer(self: &Arc<Self>, desc: &BufferDesc, data: Option<&[u8]>) -> Result<Arc<Buffer>> {
        self.ensure_alive()?;
        if let Err(err) = validate_buffer_desc(desc, data) {
            crate::engine_error!(buffer = %desc.name, error = %err, "Failed to create buffer");
            return Err(err);
        }

        let state = initial_state(desc.usage, desc.cpu_access, data.is_some());
        let handle = self.native_call(self.backend.create_buffer(desc, data, state), "create buffer", &desc.name)?;

        crate::engine_debug!(buffer = %desc.name, size = desc.size, state = ?state, "Buffer created");
        Ok(Arc::new(Buffer::new(
            ResourceCore::new(self, &desc.name, handle, state),
            desc.clone(),
        )))
    }

    /// 用类型化切片初始化缓冲区
    pub fn create_buffer_from_slice<T: bytemuck::Pod>(
        self: &Arc<Self>,
        desc: &BufferDesc,
        data: &[T],
    ) -> Result<Arc<Buffer>> {
        self.create_buffer(desc, Some(bytemuck::cast_slice(data)))
    }

    /// 创建纹理
    ///
    /// `data` 为空表示不初始化，否则必须为每个子资源提供一项，
    /// 顺序为 `slice * mip_levels + mip`。
    pub fn create_texture(self: &Arc<Self>, desc: &TextureDesc, data: &[SubresourceData<'_>]) -> Result<Arc<Texture>> {
        self.ensure_alive()?;

        let mut desc = desc.clone();
        if desc.mip_levels == 0 {
            desc.mip_levels = desc.full_mip_chain();
        }

        let support = self.backend.format_support(desc.format);
        let bytes = validate_texture_desc(&desc, &support, &self.caps).and_then(|_| collect_initial_data(&desc, data));
        let bytes = match bytes {
            Ok(bytes) => bytes,
            Err(err) => {
                crate::engine_error!(texture = %desc.name, error = %err, "Failed to create texture");
                return Err(err);
            }
        };

        let state = initial_state(desc.usage, desc.cpu_access, !bytes.is_empty());
        let handle = self.native_call(
            self.backend.create_texture(&desc, &bytes, state),
            "create texture",
            &desc.name,
        )?;

        crate::engine_debug!(
            texture = %desc.name,
            width = desc.width,
            height = desc.height,
            mips = desc.mip_levels,
            format = %desc.format,
            "Texture created"
        );
        let core = ResourceCore::new(self, &desc.name, handle, state);
        Ok(Arc::new(Texture::new(core, desc)))
    }

    /// 创建采样器，描述相同（忽略名称）时返回已有对象
    pub fn create_sampler(self: &Arc<Self>, desc: &SamplerDesc) -> Result<Arc<Sampler>> {
        self.ensure_alive()?;
        if let Err(err) = desc.validate() {
            crate::engine_error!(sampler = %desc.name, error = %err, "Failed to create sampler");
            return Err(err);
        }

        let key = desc.key();
        let mut samplers = self.samplers.lock();
        if let Some(sampler) = samplers.get(&key).and_then(Weak::upgrade) {
            return Ok(sampler);
        }

        samplers.retain(|_, weak| weak.strong_count() > 0);
        if samplers.len() >= self.caps.max_sampler_objects as usize {
            crate::engine_error!(sampler = %desc.name, "Sampler object limit reached");
            return Err(GraphicsError::ResourceExhausted(format!(
                "at most {} unique samplers can exist",
                self.caps.max_sampler_objects
            ))
            .into());
        }

        let handle = self.native_call(self.backend.create_sampler(desc), "create sampler", &desc.name)?;
        let sampler = Arc::new(Sampler::new(self, handle, desc.clone()));
        samplers.insert(key, Arc::downgrade(&sampler));
        Ok(sampler)
    }

    /// 包装外部编译器产出的着色器
    pub fn create_shader(self: &Arc<Self>, desc: &ShaderDesc) -> Result<Arc<Shader>> {
        self.ensure_alive()?;
        if desc.bytecode.is_empty() {
            crate::engine_error!(shader = %desc.name, "Shader bytecode is empty");
            return Err(invalid_argument(format!("shader '{}': bytecode is empty", desc.name)));
        }
        if desc.stage == ShaderStage::Compute && !self.caps.compute_shaders {
            crate::engine_error!(shader = %desc.name, "Compute shaders are not supported");
            return Err(unsupported(format!("shader '{}': compute shaders are not supported", desc.name)));
        }

        let handle = self.native_call(self.backend.create_shader(desc), "create shader", &desc.name)?;
        Ok(Arc::new(Shader::new(self, handle, desc)))
    }

    pub fn create_pipeline_state(self: &Arc<Self>, desc: &PipelineStateDesc) -> Result<Arc<PipelineState>> {
        self.ensure_alive()?;
        if desc.is_compute() && !self.caps.compute_shaders {
            return Err(unsupported(format!("pipeline '{}': compute pipelines are not supported", desc.name)));
        }
        if let Err(err) = desc.validate(self.caps.max_render_targets) {
            crate::engine_error!(pipeline = %desc.name, error = %err, "Failed to create pipeline state");
            return Err(err);
        }

        let handle = self.native_call(self.backend.create_pipeline(desc), "create pipeline", &desc.name)?;
        Ok(Arc::new(PipelineState::new(self, handle, desc.clone())))
    }

    pub fn create_fence(&self, desc: &FenceDesc) -> Result<Arc<Fence>> {
        self.ensure_alive()?;
        Ok(Arc::new(Fence::new(desc)))
    }

    /// 创建交换链并关联到立即上下文
    pub fn create_swap_chain(
        self: &Arc<Self>,
        immediate: &mut DeviceContext,
        window: NativeWindow,
        desc: &SwapChainDesc,
    ) -> Result<Arc<SwapChain>> {
        self.ensure_alive()?;
        let swap_chain = SwapChain::create(self, window, desc)?;
        immediate.set_swap_chain(&swap_chain)?;
        Ok(swap_chain)
    }

    // ---------------------------------------------------------------
    // 提交与同步
    // ---------------------------------------------------------------

    /// 提交一批命令，返回该批命令完成时队列 Fence 的值
    pub(crate) fn submit(&self, mut commands: Vec<NativeCommand>) -> Result<u64> {
        self.ensure_alive()?;

        let mut submission = self.submission.lock();
        let number = self.next_cmd_number.load(Ordering::Acquire);
        let fence_value = submission.next_fence_value;
        commands.push(NativeCommand::SignalFence {
            counter: Arc::clone(&self.queue_fence),
            value: fence_value,
        });

        let count = commands.len();
        self.native_call(
            self.backend.submit(CommandBatch { submission: number, commands }),
            "submit",
            &self.name,
        )?;

        submission.next_fence_value += 1;
        self.next_cmd_number.store(number + 1, Ordering::Release);
        let moved = self.release_queue.discard_stale(number, fence_value);
        drop(submission);

        crate::engine_trace!(submission = number, fence_value, commands = count, moved, "Command batch submitted");
        Ok(fence_value)
    }

    /// 队列 Fence 已完成的值
    pub fn completed_fence_value(&self) -> u64 {
        self.queue_fence.completed_value()
    }

    /// 最近一次提交写入的队列 Fence 值
    pub fn last_submitted_fence_value(&self) -> u64 {
        self.submission.lock().next_fence_value - 1
    }

    /// 下一次提交的编号
    pub fn next_submission_number(&self) -> u64 {
        self.next_cmd_number.load(Ordering::Acquire)
    }

    pub(crate) fn wait_for_fence(&self, counter: &FenceCounter, value: u64) -> Result<()> {
        if counter.is_completed(value) {
            return Ok(());
        }
        self.ensure_alive()?;
        self.native_call(self.backend.wait_for_fence(counter, value), "wait for fence", &self.name)
    }

    /// 等待 GPU 完成全部已提交的工作，并销毁已经不再使用的对象
    pub fn idle_gpu(&self) -> Result<()> {
        self.ensure_alive()?;
        self.native_call(self.backend.wait_idle(), "wait idle", &self.name)?;
        self.release_stale_resources(false);
        Ok(())
    }

    // ---------------------------------------------------------------
    // 延迟释放
    // ---------------------------------------------------------------

    /// 原生对象的最后一个引用已释放
    pub(crate) fn safe_release(&self, handle: NativeHandle, name: &str) {
        let next = self.next_cmd_number.load(Ordering::Acquire);
        crate::engine_trace!(object = %name, handle = handle.0, submission = next, "Object queued for release");
        self.release_queue.safe_release(
            StaleObject {
                handle,
                name: name.to_string(),
            },
            next,
        );
    }

    /// 销毁 GPU 已经用完的对象
    ///
    /// `force` 为真时调用方保证 GPU 空闲，所有排队对象立即销毁。
    pub fn release_stale_resources(&self, force: bool) {
        let objects = if force {
            self.release_queue.drain_all()
        } else {
            self.release_queue.purge(self.queue_fence.completed_value())
        };
        if objects.is_empty() {
            return;
        }

        crate::engine_debug!(count = objects.len(), force, "Releasing stale resources");
        for object in objects {
            crate::engine_trace!(object = %object.name, handle = object.handle.0, "Destroying native object");
            self.backend.destroy(object.handle);
        }
    }

    /// 等待提交的陈旧对象数量
    pub fn stale_resource_count(&self) -> usize {
        self.release_queue.stale_count()
    }

    /// 已提交、等待 GPU 完成的对象数量
    pub fn pending_release_count(&self) -> usize {
        self.release_queue.pending_release_count()
    }
}

impl Drop for RenderDevice {
    fn drop(&mut self) {
        if !self.is_lost() {
            if let Err(err) = self.backend.wait_idle() {
                crate::engine_warn!(error = %err, "Failed to idle the GPU while destroying the device");
            }
        }
        self.release_stale_resources(true);
        crate::engine_info!(device = %self.name, "Render device destroyed");
    }
}
