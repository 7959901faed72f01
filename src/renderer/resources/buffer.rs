//! 缓冲区

use std::sync::{Arc, Weak};

use parking_lot::Mutex;

use super::view::{BufferView, BufferViewDesc, BufferViewType};
use super::{BindFlags, CpuAccessFlags, ResourceCore, Usage};
use crate::core::error::{invalid_argument, unsupported, Result};
use crate::renderer::object::{impl_device_object, InterfaceId};
use crate::renderer::state::ResourceState;

/// 常量缓冲区大小必须是该值的整数倍
pub const UNIFORM_BUFFER_ALIGNMENT: u64 = 16;

/// 缓冲区作为着色器资源或 UAV 时的访问方式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum BufferMode {
    #[default]
    Undefined,
    /// 带格式的元素
    Formatted,
    /// 结构化元素
    Structured,
    /// 原始字节
    Raw,
}

/// 缓冲区描述
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct BufferDesc {
    pub name: String,
    /// 大小（字节），必须显式给出
    pub size: u64,
    pub bind_flags: BindFlags,
    pub usage: Usage,
    pub cpu_access: CpuAccessFlags,
    pub mode: BufferMode,
    /// 结构化、带格式缓冲区的元素步长
    pub element_byte_stride: u32,
}

impl BufferDesc {
    pub fn new(size: u64, bind_flags: BindFlags) -> Self {
        Self {
            size,
            bind_flags,
            ..Default::default()
        }
    }

    /// 设置调试名称
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_usage(mut self, usage: Usage) -> Self {
        self.usage = usage;
        self
    }

    pub fn with_cpu_access(mut self, cpu_access: CpuAccessFlags) -> Self {
        self.cpu_access = cpu_access;
        self
    }

    pub fn with_mode(mut self, mode: BufferMode, element_byte_stride: u32) -> Self {
        self.mode = mode;
        self.element_byte_stride = element_byte_stride;
        self
    }

    /// 只读的回读缓冲区
    pub fn readback(size: u64) -> Self {
        Self::new(size, BindFlags::empty())
            .with_usage(Usage::Staging)
            .with_cpu_access(CpuAccessFlags::READ)
    }
}

/// 检查缓冲区描述与初始数据
pub(crate) fn validate_buffer_desc(desc: &BufferDesc, data: Option<&[u8]>) -> Result<()> {
    let name = &desc.name;

    if desc.size == 0 {
        return Err(invalid_argument(format!("buffer '{}': size must not be zero", name)));
    }

    let disallowed = desc.bind_flags - BindFlags::BUFFER_FLAGS;
    if !disallowed.is_empty() {
        return Err(invalid_argument(format!(
            "buffer '{}': bind flags {:?} are not allowed for a buffer",
            name, disallowed
        )));
    }

    if desc.bind_flags.contains(BindFlags::UNIFORM_BUFFER) && desc.size % UNIFORM_BUFFER_ALIGNMENT != 0 {
        return Err(invalid_argument(format!(
            "buffer '{}': uniform buffer size {} is not a multiple of {}",
            name, desc.size, UNIFORM_BUFFER_ALIGNMENT
        )));
    }

    if desc.bind_flags.intersects(BindFlags::SHADER_RESOURCE | BindFlags::UNORDERED_ACCESS) {
        match desc.mode {
            BufferMode::Undefined => {
                return Err(invalid_argument(format!(
                    "buffer '{}': a valid mode is required for shader resource or UAV buffers",
                    name
                )));
            }
            BufferMode::Structured | BufferMode::Formatted if desc.element_byte_stride == 0 => {
                return Err(invalid_argument(format!(
                    "buffer '{}': element stride must not be zero for structured and formatted buffers",
                    name
                )));
            }
            _ => {}
        }
    }

    match desc.usage {
        Usage::Immutable | Usage::Default => {
            if !desc.cpu_access.is_empty() {
                return Err(invalid_argument(format!(
                    "buffer '{}': immutable and default buffers can't have CPU access flags",
                    name
                )));
            }
            if desc.usage == Usage::Immutable && data.is_none() {
                return Err(unsupported(format!(
                    "buffer '{}': immutable buffers must be initialized at creation time",
                    name
                )));
            }
        }
        Usage::Dynamic => {
            if desc.cpu_access != CpuAccessFlags::WRITE {
                return Err(invalid_argument(format!(
                    "buffer '{}': dynamic buffers require exactly CPU write access",
                    name
                )));
            }
            if data.is_some() {
                return Err(invalid_argument(format!(
                    "buffer '{}': initial data must be empty for dynamic buffers",
                    name
                )));
            }
            if desc.bind_flags.contains(BindFlags::UNORDERED_ACCESS) {
                return Err(unsupported(format!(
                    "buffer '{}': dynamic buffers can't be bound for unordered access",
                    name
                )));
            }
        }
        Usage::Staging => {
            if desc.cpu_access != CpuAccessFlags::READ && desc.cpu_access != CpuAccessFlags::WRITE {
                return Err(invalid_argument(format!(
                    "buffer '{}': exactly one of CPU read or write access must be set for a staging buffer",
                    name
                )));
            }
            if !desc.bind_flags.is_empty() {
                return Err(unsupported(format!(
                    "buffer '{}': staging buffers can't be bound to the pipeline",
                    name
                )));
            }
            if desc.cpu_access == CpuAccessFlags::WRITE && data.is_some() {
                return Err(invalid_argument(format!(
                    "buffer '{}': CPU-writable staging buffers must be updated by the CPU, not at creation",
                    name
                )));
            }
        }
    }

    if let Some(bytes) = data {
        if bytes.len() as u64 > desc.size {
            return Err(invalid_argument(format!(
                "buffer '{}': initial data ({} bytes) exceeds buffer size {}",
                name,
                bytes.len(),
                desc.size
            )));
        }
    }

    Ok(())
}

/// GPU 缓冲区
#[derive(Debug)]
pub struct Buffer {
    pub(crate) core: ResourceCore,
    desc: BufferDesc,
    /// 默认视图缓存（SRV、UAV）
    default_views: Mutex<[Weak<BufferView>; 2]>,
}

impl_device_object!(Buffer, InterfaceId::Buffer, [InterfaceId::Resource], core);

impl Buffer {
    pub(crate) fn new(core: ResourceCore, desc: BufferDesc) -> Self {
        Self {
            core,
            desc,
            default_views: Mutex::new([Weak::new(), Weak::new()]),
        }
    }

    pub(crate) fn core(&self) -> &ResourceCore {
        &self.core
    }

    pub fn desc(&self) -> &BufferDesc {
        &self.desc
    }

    /// 当前状态
    pub fn state(&self) -> ResourceState {
        self.core.state.get()
    }

    /// 直接设置跟踪状态；设为 `Unknown` 即退出自动跟踪
    pub fn set_state(&self, state: ResourceState) {
        self.core.state.set(state)
    }

    pub fn is_known_state(&self) -> bool {
        self.state().is_known()
    }

    /// 创建视图
    pub fn create_view(self: &Arc<Self>, desc: &BufferViewDesc) -> Result<Arc<BufferView>> {
        BufferView::create(self, desc)
    }

    /// 获取默认视图
    ///
    /// 视图存活期间重复调用返回同一个实例；缓冲区没有对应绑定标志时返回 `None`。
    pub fn default_view(self: &Arc<Self>, view_type: BufferViewType) -> Option<Arc<BufferView>> {
        let slot = match view_type {
            BufferViewType::ShaderResource => 0,
            BufferViewType::UnorderedAccess => 1,
        };
        let mut views = self.default_views.lock();
        if let Some(view) = views[slot].upgrade() {
            return Some(view);
        }

        let desc = BufferViewDesc::new(view_type).with_name(format!("Default {:?} view of buffer '{}'", view_type, self.core.name));
        match BufferView::create(self, &desc) {
            Ok(view) => {
                views[slot] = Arc::downgrade(&view);
                Some(view)
            }
            Err(err) => {
                crate::engine_error!(buffer = %self.core.name, error = %err, "Failed to create default buffer view");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_uniform_alignment() {
        let bad = BufferDesc::new(20, BindFlags::UNIFORM_BUFFER);
        assert!(validate_buffer_desc(&bad, None).unwrap_err().is_invalid_argument());

        let good = BufferDesc::new(32, BindFlags::UNIFORM_BUFFER);
        assert!(validate_buffer_desc(&good, None).is_ok());
    }

    #[test]
    fn test_zero_size() {
        let desc = BufferDesc::new(0, BindFlags::VERTEX_BUFFER);
        assert!(validate_buffer_desc(&desc, None).unwrap_err().is_invalid_argument());
    }

    #[test]
    fn test_texture_only_flags_rejected() {
        let desc = BufferDesc::new(64, BindFlags::RENDER_TARGET);
        assert!(validate_buffer_desc(&desc, None).unwrap_err().is_invalid_argument());
    }

    #[test]
    fn test_immutable_requires_data() {
        let desc = BufferDesc::new(16, BindFlags::VERTEX_BUFFER).with_usage(Usage::Immutable);
        assert!(validate_buffer_desc(&desc, None).unwrap_err().is_unsupported());
        assert!(validate_buffer_desc(&desc, Some(&[0u8; 16])).is_ok());
    }

    #[test]
    fn test_usage_and_cpu_access() {
        let default_with_cpu = BufferDesc::new(16, BindFlags::VERTEX_BUFFER).with_cpu_access(CpuAccessFlags::WRITE);
        assert!(validate_buffer_desc(&default_with_cpu, None).unwrap_err().is_invalid_argument());

        let dynamic = BufferDesc::new(64, BindFlags::UNIFORM_BUFFER)
            .with_usage(Usage::Dynamic)
            .with_cpu_access(CpuAccessFlags::WRITE);
        assert!(validate_buffer_desc(&dynamic, None).is_ok());
        assert!(validate_buffer_desc(&dynamic, Some(&[0u8; 4])).unwrap_err().is_invalid_argument());

        let staging_both = BufferDesc::new(64, BindFlags::empty())
            .with_usage(Usage::Staging)
            .with_cpu_access(CpuAccessFlags::READ | CpuAccessFlags::WRITE);
        assert!(validate_buffer_desc(&staging_both, None).unwrap_err().is_invalid_argument());

        let staging_bound = BufferDesc::readback(64).with_mode(BufferMode::Raw, 0);
        let staging_bound = BufferDesc { bind_flags: BindFlags::SHADER_RESOURCE, ..staging_bound };
        assert!(validate_buffer_desc(&staging_bound, None).unwrap_err().is_unsupported());

        let upload = BufferDesc::new(64, BindFlags::empty())
            .with_usage(Usage::Staging)
            .with_cpu_access(CpuAccessFlags::WRITE);
        assert!(validate_buffer_desc(&upload, Some(&[1u8; 8])).unwrap_err().is_invalid_argument());
    }

    #[test]
    fn test_structured_requires_stride() {
        let desc = BufferDesc::new(256, BindFlags::SHADER_RESOURCE).with_mode(BufferMode::Structured, 0);
        assert!(validate_buffer_desc(&desc, None).unwrap_err().is_invalid_argument());

        let desc = BufferDesc::new(256, BindFlags::SHADER_RESOURCE);
        assert!(validate_buffer_desc(&desc, None).unwrap_err().is_invalid_argument());

        let desc = BufferDesc::new(256, BindFlags::UNORDERED_ACCESS).with_mode(BufferMode::Structured, 16);
        assert!(validate_buffer_desc(&desc, None).is_ok());
    }

    #[test]
    fn test_data_larger_than_buffer() {
        let desc = BufferDesc::new(8, BindFlags::VERTEX_BUFFER);
        assert!(validate_buffer_desc(&desc, Some(&[0u8; 12])).unwrap_err().is_invalid_argument());
    }
}
