//! 纹理视图与缓冲区视图
//!
//! 视图强引用父资源：只要视图还在，父资源就不会析构。
//! 视图自身的原生对象同样经过设备的延迟释放队列销毁。

use std::sync::Arc;

use parking_lot::Mutex;

use super::buffer::{Buffer, BufferMode};
use super::sampler::Sampler;
use super::texture::Texture;
use super::BindFlags;
use crate::core::error::{invalid_argument, Result};
use crate::gfx::backend::NativeHandle;
use crate::renderer::format::TextureFormat;
use crate::renderer::object::{impl_device_object, InterfaceId, ObjectId};

/// 纹理视图类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TextureViewType {
    ShaderResource = 0,
    RenderTarget = 1,
    DepthStencil = 2,
    UnorderedAccess = 3,
}

impl TextureViewType {
    /// 创建此类视图需要纹理具备的绑定标志
    pub fn required_bind_flag(self) -> BindFlags {
        match self {
            TextureViewType::ShaderResource => BindFlags::SHADER_RESOURCE,
            TextureViewType::RenderTarget => BindFlags::RENDER_TARGET,
            TextureViewType::DepthStencil => BindFlags::DEPTH_STENCIL,
            TextureViewType::UnorderedAccess => BindFlags::UNORDERED_ACCESS,
        }
    }
}

/// 纹理视图描述
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextureViewDesc {
    pub name: String,
    pub view_type: TextureViewType,
    /// 为空时使用纹理自身的格式
    pub format: Option<TextureFormat>,
    pub most_detailed_mip: u32,
    /// 0 表示到最后一个 mip
    pub num_mips: u32,
    pub first_slice: u32,
    /// 0 表示到最后一个切片
    pub num_slices: u32,
}

impl TextureViewDesc {
    pub fn new(view_type: TextureViewType) -> Self {
        Self {
            name: String::new(),
            view_type,
            format: None,
            most_detailed_mip: 0,
            num_mips: 0,
            first_slice: 0,
            num_slices: 0,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_format(mut self, format: TextureFormat) -> Self {
        self.format = Some(format);
        self
    }

    pub fn with_mips(mut self, most_detailed_mip: u32, num_mips: u32) -> Self {
        self.most_detailed_mip = most_detailed_mip;
        self.num_mips = num_mips;
        self
    }

    pub fn with_slices(mut self, first_slice: u32, num_slices: u32) -> Self {
        self.first_slice = first_slice;
        self.num_slices = num_slices;
        self
    }
}

/// 检查视图描述并展开默认值
fn resolve_texture_view_desc(texture: &Texture, desc: &TextureViewDesc) -> Result<TextureViewDesc> {
    let tex_desc = texture.desc();
    let tex_name = texture.core().name.as_str();
    let err = |msg: String| invalid_argument(format!("view '{}' of texture '{}': {}", desc.name, tex_name, msg));

    if !tex_desc.bind_flags.contains(desc.view_type.required_bind_flag()) {
        return Err(err(format!(
            "{:?} views require the {:?} bind flag",
            desc.view_type,
            desc.view_type.required_bind_flag()
        )));
    }

    if desc.most_detailed_mip >= tex_desc.mip_levels {
        return Err(err(format!(
            "most detailed mip {} is out of range (texture has {} mips)",
            desc.most_detailed_mip, tex_desc.mip_levels
        )));
    }
    let num_mips = if desc.num_mips == 0 {
        tex_desc.mip_levels - desc.most_detailed_mip
    } else {
        desc.num_mips
    };
    if desc.most_detailed_mip + num_mips > tex_desc.mip_levels {
        return Err(err(format!(
            "mip range [{}, {}) exceeds {} mips",
            desc.most_detailed_mip,
            desc.most_detailed_mip + num_mips,
            tex_desc.mip_levels
        )));
    }
    if desc.view_type != TextureViewType::ShaderResource && num_mips != 1 {
        return Err(err(format!("{:?} views must address exactly one mip level", desc.view_type)));
    }

    let array_size = tex_desc.array_size();
    if desc.first_slice >= array_size {
        return Err(err(format!(
            "first slice {} is out of range (texture has {} slices)",
            desc.first_slice, array_size
        )));
    }
    let num_slices = if desc.num_slices == 0 {
        array_size - desc.first_slice
    } else {
        desc.num_slices
    };
    if desc.first_slice + num_slices > array_size {
        return Err(err(format!(
            "slice range [{}, {}) exceeds {} slices",
            desc.first_slice,
            desc.first_slice + num_slices,
            array_size
        )));
    }

    let format = desc.format.unwrap_or(tex_desc.format);
    if format != tex_desc.format && format.attribs().element_size() != tex_desc.format.attribs().element_size() {
        return Err(err(format!(
            "format {} is not compatible with texture format {}",
            format, tex_desc.format
        )));
    }
    match desc.view_type {
        TextureViewType::DepthStencil if !format.attribs().is_depth() => {
            return Err(err(format!("format {} is not a depth format", format)));
        }
        TextureViewType::RenderTarget if format.attribs().is_depth() => {
            return Err(err(format!("depth format {} can't be used for a render target view", format)));
        }
        _ => {}
    }

    Ok(TextureViewDesc {
        name: desc.name.clone(),
        view_type: desc.view_type,
        format: Some(format),
        most_detailed_mip: desc.most_detailed_mip,
        num_mips,
        first_slice: desc.first_slice,
        num_slices,
    })
}

/// 纹理视图
#[derive(Debug)]
pub struct TextureView {
    id: ObjectId,
    name: String,
    handle: NativeHandle,
    texture: Arc<Texture>,
    /// 默认值已展开
    desc: TextureViewDesc,
    sampler: Mutex<Option<Arc<Sampler>>>,
}

impl_device_object!(TextureView, InterfaceId::TextureView, [], |v| Some(v.handle));

impl TextureView {
    pub(crate) fn create(texture: &Arc<Texture>, desc: &TextureViewDesc) -> Result<Arc<Self>> {
        let device = &texture.core().device;
        device.ensure_alive()?;

        let resolved = match resolve_texture_view_desc(texture, desc) {
            Ok(resolved) => resolved,
            Err(err) => {
                crate::engine_error!(view = %desc.name, error = %err, "Failed to create texture view");
                return Err(err);
            }
        };

        let handle = device.native_call(
            device.backend().create_texture_view(texture.core().handle, &resolved),
            "create texture view",
            &resolved.name,
        )?;

        crate::engine_trace!(view = %resolved.name, view_type = ?resolved.view_type, "Texture view created");
        Ok(Arc::new(Self {
            id: ObjectId::next(),
            name: resolved.name.clone(),
            handle,
            texture: Arc::clone(texture),
            desc: resolved,
            sampler: Mutex::new(None),
        }))
    }

    pub fn desc(&self) -> &TextureViewDesc {
        &self.desc
    }

    pub fn view_type(&self) -> TextureViewType {
        self.desc.view_type
    }

    /// 实际使用的格式
    pub fn format(&self) -> TextureFormat {
        self.desc.format.unwrap_or(self.texture.desc().format)
    }

    /// 父纹理
    pub fn texture(&self) -> &Arc<Texture> {
        &self.texture
    }

    pub(crate) fn handle(&self) -> NativeHandle {
        self.handle
    }

    /// 为着色器资源视图关联采样器
    pub fn set_sampler(&self, sampler: Option<Arc<Sampler>>) {
        *self.sampler.lock() = sampler;
    }

    pub fn sampler(&self) -> Option<Arc<Sampler>> {
        self.sampler.lock().clone()
    }
}

impl Drop for TextureView {
    fn drop(&mut self) {
        self.texture.core().device.safe_release(self.handle, &self.name);
    }
}

/// 缓冲区视图类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BufferViewType {
    ShaderResource,
    UnorderedAccess,
}

impl BufferViewType {
    pub fn required_bind_flag(self) -> BindFlags {
        match self {
            BufferViewType::ShaderResource => BindFlags::SHADER_RESOURCE,
            BufferViewType::UnorderedAccess => BindFlags::UNORDERED_ACCESS,
        }
    }
}

/// 缓冲区视图描述
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BufferViewDesc {
    pub name: String,
    pub view_type: BufferViewType,
    pub byte_offset: u64,
    /// 0 表示到缓冲区末尾
    pub byte_width: u64,
}

impl BufferViewDesc {
    pub fn new(view_type: BufferViewType) -> Self {
        Self {
            name: String::new(),
            view_type,
            byte_offset: 0,
            byte_width: 0,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_range(mut self, byte_offset: u64, byte_width: u64) -> Self {
        self.byte_offset = byte_offset;
        self.byte_width = byte_width;
        self
    }
}

fn resolve_buffer_view_desc(buffer: &Buffer, desc: &BufferViewDesc) -> Result<BufferViewDesc> {
    let buf_desc = buffer.desc();
    let err = |msg: String| invalid_argument(format!("view '{}' of buffer '{}': {}", desc.name, buf_desc.name, msg));

    if !buf_desc.bind_flags.contains(desc.view_type.required_bind_flag()) {
        return Err(err(format!(
            "{:?} views require the {:?} bind flag",
            desc.view_type,
            desc.view_type.required_bind_flag()
        )));
    }
    if desc.byte_offset >= buf_desc.size {
        return Err(err(format!(
            "offset {} is out of range (buffer size {})",
            desc.byte_offset, buf_desc.size
        )));
    }
    let byte_width = if desc.byte_width == 0 {
        buf_desc.size - desc.byte_offset
    } else {
        desc.byte_width
    };
    if desc.byte_offset + byte_width > buf_desc.size {
        return Err(err(format!(
            "range [{}, {}) exceeds buffer size {}",
            desc.byte_offset,
            desc.byte_offset + byte_width,
            buf_desc.size
        )));
    }
    if matches!(buf_desc.mode, BufferMode::Structured | BufferMode::Formatted) {
        let stride = u64::from(buf_desc.element_byte_stride);
        if desc.byte_offset % stride != 0 || byte_width % stride != 0 {
            return Err(err(format!("range must be a multiple of the element stride {}", stride)));
        }
    }

    Ok(BufferViewDesc {
        name: desc.name.clone(),
        view_type: desc.view_type,
        byte_offset: desc.byte_offset,
        byte_width,
    })
}

/// 缓冲区视图
#[derive(Debug)]
pub struct BufferView {
    id: ObjectId,
    name: String,
    handle: NativeHandle,
    buffer: Arc<Buffer>,
    desc: BufferViewDesc,
}

impl_device_object!(BufferView, InterfaceId::BufferView, [], |v| Some(v.handle));

impl BufferView {
    pub(crate) fn create(buffer: &Arc<Buffer>, desc: &BufferViewDesc) -> Result<Arc<Self>> {
        let device = &buffer.core().device;
        device.ensure_alive()?;

        let resolved = match resolve_buffer_view_desc(buffer, desc) {
            Ok(resolved) => resolved,
            Err(err) => {
                crate::engine_error!(view = %desc.name, error = %err, "Failed to create buffer view");
                return Err(err);
            }
        };

        let handle = device.native_call(
            device.backend().create_buffer_view(buffer.core().handle, &resolved),
            "create buffer view",
            &resolved.name,
        )?;

        Ok(Arc::new(Self {
            id: ObjectId::next(),
            name: resolved.name.clone(),
            handle,
            buffer: Arc::clone(buffer),
            desc: resolved,
        }))
    }

    pub fn desc(&self) -> &BufferViewDesc {
        &self.desc
    }

    pub fn view_type(&self) -> BufferViewType {
        self.desc.view_type
    }

    pub fn buffer(&self) -> &Arc<Buffer> {
        &self.buffer
    }

    pub(crate) fn handle(&self) -> NativeHandle {
        self.handle
    }
}

impl Drop for BufferView {
    fn drop(&mut self) {
        self.buffer.core().device.safe_release(self.handle, &self.name);
    }
}
