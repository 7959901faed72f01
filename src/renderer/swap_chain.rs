//! 交换链
//!
//! 后台缓冲区是普通纹理（渲染目标 + 着色器资源），按环形顺序轮换。
//! 呈现时当前后台缓冲区转换到 `Present` 状态；主交换链每次呈现后
//! 顺带回收设备中 GPU 已经用完的陈旧对象。

use std::sync::Arc;

use parking_lot::Mutex;

use crate::core::config::SwapChainConfig;
use crate::core::error::{invalid_argument, wrong_context, Result};
use crate::gfx::backend::{NativeHandle, NativeWindow};
use crate::renderer::context::DeviceContext;
use crate::renderer::device::RenderDevice;
use crate::renderer::format::TextureFormat;
use crate::renderer::object::{impl_device_object, InterfaceId, ObjectId};
use crate::renderer::resources::{BindFlags, Texture, TextureDesc, TextureView, TextureViewType};
use crate::renderer::state::ResourceState;

/// 交换链描述
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SwapChainDesc {
    pub width: u32,
    pub height: u32,
    pub color_format: TextureFormat,
    pub depth_format: Option<TextureFormat>,
    pub buffer_count: u32,
    /// 默认是否垂直同步
    pub vsync: bool,
    /// 主交换链负责每帧回收陈旧对象
    pub is_primary: bool,
}

impl Default for SwapChainDesc {
    fn default() -> Self {
        Self {
            width: 800,
            height: 600,
            color_format: TextureFormat::Rgba8UnormSrgb,
            depth_format: Some(TextureFormat::D32Float),
            buffer_count: 2,
            vsync: true,
            is_primary: true,
        }
    }
}

impl From<&SwapChainConfig> for SwapChainDesc {
    fn from(config: &SwapChainConfig) -> Self {
        Self {
            width: config.width,
            height: config.height,
            color_format: config.color_format,
            depth_format: config.depth_format,
            buffer_count: config.buffer_count,
            vsync: config.vsync,
            is_primary: true,
        }
    }
}

/// 一个后台缓冲区及其视图
#[derive(Debug, Clone)]
struct BackBuffer {
    texture: Arc<Texture>,
    rtv: Arc<TextureView>,
}

#[derive(Debug)]
struct SwapChainInner {
    desc: SwapChainDesc,
    back_buffers: Vec<BackBuffer>,
    depth: Option<Arc<TextureView>>,
    current: usize,
    frame_count: u64,
}

/// 交换链
#[derive(Debug)]
pub struct SwapChain {
    id: ObjectId,
    name: String,
    handle: NativeHandle,
    device: Arc<RenderDevice>,
    inner: Mutex<SwapChainInner>,
}

impl_device_object!(SwapChain, InterfaceId::SwapChain, [], |s| Some(s.handle));

/// 呈现时同步间隔的上限
pub const MAX_SYNC_INTERVAL: u32 = 4;

impl SwapChain {
    pub(crate) fn create(device: &Arc<RenderDevice>, window: NativeWindow, desc: &SwapChainDesc) -> Result<Arc<Self>> {
        if let Err(err) = validate_swap_chain_desc(desc) {
            crate::engine_error!(error = %err, "Failed to create swap chain");
            return Err(err);
        }

        let name = "Swap chain".to_string();
        let handle = device.native_call(device.backend().create_swap_chain(window, desc), "create swap chain", &name)?;
        let (back_buffers, depth) = match create_buffers(device, desc, 0) {
            Ok(buffers) => buffers,
            Err(err) => {
                device.safe_release(handle, &name);
                return Err(err);
            }
        };

        crate::engine_info!(
            width = desc.width,
            height = desc.height,
            format = %desc.color_format,
            buffers = desc.buffer_count,
            "Swap chain created"
        );
        Ok(Arc::new(Self {
            id: ObjectId::next(),
            name,
            handle,
            device: Arc::clone(device),
            inner: Mutex::new(SwapChainInner {
                desc: desc.clone(),
                back_buffers,
                depth,
                current: 0,
                frame_count: 0,
            }),
        }))
    }

    pub fn desc(&self) -> SwapChainDesc {
        self.inner.lock().desc.clone()
    }

    /// 当前后台缓冲区
    pub fn current_back_buffer(&self) -> Arc<Texture> {
        let inner = self.inner.lock();
        Arc::clone(&inner.back_buffers[inner.current].texture)
    }

    pub fn current_back_buffer_rtv(&self) -> Arc<TextureView> {
        let inner = self.inner.lock();
        Arc::clone(&inner.back_buffers[inner.current].rtv)
    }

    pub fn current_back_buffer_index(&self) -> usize {
        self.inner.lock().current
    }

    /// 深度缓冲区的深度模板视图
    pub fn depth_buffer_dsv(&self) -> Option<Arc<TextureView>> {
        self.inner.lock().depth.clone()
    }

    /// 已呈现的帧数
    pub fn frame_count(&self) -> u64 {
        self.inner.lock().frame_count
    }

    /// 按描述中的垂直同步设置呈现
    pub fn present_default(&self, ctx: &mut DeviceContext) -> Result<()> {
        let interval = u32::from(self.inner.lock().desc.vsync);
        self.present(ctx, interval)
    }

    /// 呈现当前后台缓冲区
    pub fn present(&self, ctx: &mut DeviceContext, sync_interval: u32) -> Result<()> {
        if ctx.is_deferred() {
            return Err(wrong_context("present"));
        }
        if sync_interval > MAX_SYNC_INTERVAL {
            return Err(invalid_argument(format!(
                "sync interval {} exceeds {}",
                sync_interval, MAX_SYNC_INTERVAL
            )));
        }
        self.device.ensure_alive()?;

        let back_buffer = self.current_back_buffer();
        ctx.unbind_texture_targets(&back_buffer);
        ctx.transition_texture(&back_buffer, ResourceState::Present, "present")?;
        ctx.flush()?;
        self.device.native_call(
            self.device.backend().present(self.handle, back_buffer.core().handle, sync_interval),
            "present",
            &self.name,
        )?;

        let is_primary = {
            let mut inner = self.inner.lock();
            inner.current = (inner.current + 1) % inner.back_buffers.len();
            inner.frame_count += 1;
            crate::engine_trace!(frame = inner.frame_count, next_buffer = inner.current, "Frame presented");
            inner.desc.is_primary
        };
        if is_primary {
            self.device.release_stale_resources(false);
        }
        Ok(())
    }

    /// 调整后台缓冲区尺寸
    ///
    /// 尺寸不变时返回 `Ok(false)`。旧缓冲区被标记为失效，之后不能再绑定。
    pub fn resize(&self, ctx: &mut DeviceContext, width: u32, height: u32) -> Result<bool> {
        if width == 0 || height == 0 {
            return Err(invalid_argument(format!("swap chain can't be resized to {}x{}", width, height)));
        }
        if ctx.is_deferred() {
            return Err(wrong_context("resize swap chain"));
        }

        let (old_buffers, old_depth) = {
            let inner = self.inner.lock();
            if inner.desc.width == width && inner.desc.height == height {
                return Ok(false);
            }
            (inner.back_buffers.clone(), inner.depth.clone())
        };

        for buffer in &old_buffers {
            ctx.unbind_texture_targets(&buffer.texture);
        }
        if let Some(depth) = &old_depth {
            ctx.unbind_texture_targets(depth.texture());
        }
        ctx.flush()?;
        self.device.idle_gpu()?;

        let mut desc = self.inner.lock().desc.clone();
        desc.width = width;
        desc.height = height;
        let generation = self.frame_count();
        let (back_buffers, depth) = create_buffers(&self.device, &desc, generation)?;

        for buffer in &old_buffers {
            buffer.texture.retire();
        }
        if let Some(depth) = &old_depth {
            depth.texture().retire();
        }

        let mut inner = self.inner.lock();
        inner.desc = desc;
        inner.back_buffers = back_buffers;
        inner.depth = depth;
        inner.current = 0;
        crate::engine_info!(width, height, "Swap chain resized");
        Ok(true)
    }
}

impl Drop for SwapChain {
    fn drop(&mut self) {
        self.device.safe_release(self.handle, &self.name);
    }
}

fn validate_swap_chain_desc(desc: &SwapChainDesc) -> Result<()> {
    if desc.width == 0 || desc.height == 0 {
        return Err(invalid_argument(format!(
            "swap chain size {}x{} is invalid",
            desc.width, desc.height
        )));
    }
    if desc.buffer_count == 0 {
        return Err(invalid_argument("swap chain needs at least one back buffer"));
    }
    if desc.color_format.attribs().is_depth() {
        return Err(invalid_argument(format!("{} is not a color format", desc.color_format)));
    }
    if let Some(depth) = desc.depth_format {
        if !depth.attribs().is_depth() {
            return Err(invalid_argument(format!("{} is not a depth format", depth)));
        }
    }
    Ok(())
}

type SwapChainBuffers = (Vec<BackBuffer>, Option<Arc<TextureView>>);

fn create_buffers(device: &Arc<RenderDevice>, desc: &SwapChainDesc, generation: u64) -> Result<SwapChainBuffers> {
    let mut back_buffers = Vec::with_capacity(desc.buffer_count as usize);
    for i in 0..desc.buffer_count {
        let texture_desc = TextureDesc::tex2d(
            desc.width,
            desc.height,
            desc.color_format,
            BindFlags::RENDER_TARGET | BindFlags::SHADER_RESOURCE,
        )
        .with_name(format!("Back buffer {} (gen {})", i, generation));
        let texture = device.create_texture(&texture_desc, &[])?;
        let rtv = texture.default_view(TextureViewType::RenderTarget).ok_or_else(|| {
            invalid_argument(format!("failed to create the render target view of back buffer {}", i))
        })?;
        back_buffers.push(BackBuffer { texture, rtv });
    }

    let depth = match desc.depth_format {
        Some(format) => {
            let texture_desc = TextureDesc::tex2d(desc.width, desc.height, format, BindFlags::DEPTH_STENCIL)
                .with_name(format!("Depth buffer (gen {})", generation));
            let texture = device.create_texture(&texture_desc, &[])?;
            let dsv = texture
                .default_view(TextureViewType::DepthStencil)
                .ok_or_else(|| invalid_argument("failed to create the depth-stencil view of the depth buffer"))?;
            Some(dsv)
        }
        None => None,
    };
    Ok((back_buffers, depth))
}
