//! 纹理
//!
//! 子资源按"每个数组切片内 mip 最快变化"的顺序排列：
//! 下标为 `slice * mip_levels + mip`，3D 纹理只有一个切片。

use std::sync::{Arc, Weak};

use parking_lot::Mutex;

use super::view::{TextureView, TextureViewDesc, TextureViewType};
use super::{BindFlags, CpuAccessFlags, ResourceCore, SubresourceData, Usage};
use crate::core::error::{invalid_argument, unsupported, Result};
use crate::renderer::device::DeviceCaps;
use crate::renderer::format::{ComponentType, DimensionSupport, FormatSupport, SampleCountFlags, TextureFormat};
use crate::renderer::object::{impl_device_object, InterfaceId};
use crate::renderer::state::ResourceState;

/// 资源维度
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ResourceDimension {
    Tex1D,
    Tex1DArray,
    #[default]
    Tex2D,
    Tex2DArray,
    Tex3D,
    TexCube,
    TexCubeArray,
}

impl ResourceDimension {
    pub fn is_array(self) -> bool {
        matches!(
            self,
            ResourceDimension::Tex1DArray
                | ResourceDimension::Tex2DArray
                | ResourceDimension::TexCube
                | ResourceDimension::TexCubeArray
        )
    }

    pub(crate) fn support_flag(self) -> DimensionSupport {
        match self {
            ResourceDimension::Tex1D => DimensionSupport::TEX_1D,
            ResourceDimension::Tex1DArray => DimensionSupport::TEX_1D_ARRAY,
            ResourceDimension::Tex2D => DimensionSupport::TEX_2D,
            ResourceDimension::Tex2DArray => DimensionSupport::TEX_2D_ARRAY,
            ResourceDimension::Tex3D => DimensionSupport::TEX_3D,
            ResourceDimension::TexCube => DimensionSupport::TEX_CUBE,
            ResourceDimension::TexCubeArray => DimensionSupport::TEX_CUBE_ARRAY,
        }
    }
}

/// 纹理描述
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextureDesc {
    pub name: String,
    pub dimension: ResourceDimension,
    pub width: u32,
    pub height: u32,
    /// 3D 纹理为深度，其余为数组大小
    pub depth_or_array_size: u32,
    pub format: TextureFormat,
    /// 0 表示生成完整的 mip 链
    pub mip_levels: u32,
    pub sample_count: u32,
    pub bind_flags: BindFlags,
    pub usage: Usage,
    pub cpu_access: CpuAccessFlags,
    /// 允许 GPU 生成 mip
    pub generate_mips: bool,
}

impl Default for TextureDesc {
    fn default() -> Self {
        Self {
            name: String::new(),
            dimension: ResourceDimension::Tex2D,
            width: 0,
            height: 0,
            depth_or_array_size: 1,
            format: TextureFormat::Rgba8Unorm,
            mip_levels: 1,
            sample_count: 1,
            bind_flags: BindFlags::empty(),
            usage: Usage::Default,
            cpu_access: CpuAccessFlags::empty(),
            generate_mips: false,
        }
    }
}

impl TextureDesc {
    /// 2D 纹理
    pub fn tex2d(width: u32, height: u32, format: TextureFormat, bind_flags: BindFlags) -> Self {
        Self {
            width,
            height,
            format,
            bind_flags,
            ..Default::default()
        }
    }

    /// CPU 可读的 2D 回读纹理
    pub fn readback_2d(width: u32, height: u32, format: TextureFormat) -> Self {
        Self::tex2d(width, height, format, BindFlags::empty())
            .with_usage(Usage::Staging)
            .with_cpu_access(CpuAccessFlags::READ)
    }

    /// 设置调试名称
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_dimension(mut self, dimension: ResourceDimension, depth_or_array_size: u32) -> Self {
        self.dimension = dimension;
        self.depth_or_array_size = depth_or_array_size;
        self
    }

    pub fn with_mip_levels(mut self, mip_levels: u32) -> Self {
        self.mip_levels = mip_levels;
        self
    }

    pub fn with_sample_count(mut self, sample_count: u32) -> Self {
        self.sample_count = sample_count;
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

    /// 数组切片数（3D 纹理为 1）
    pub fn array_size(&self) -> u32 {
        if self.dimension == ResourceDimension::Tex3D {
            1
        } else {
            self.depth_or_array_size
        }
    }

    /// 3D 纹理的深度（其余为 1）
    pub fn depth(&self) -> u32 {
        if self.dimension == ResourceDimension::Tex3D {
            self.depth_or_array_size
        } else {
            1
        }
    }

    /// 完整 mip 链的层数
    pub fn full_mip_chain(&self) -> u32 {
        match self.dimension {
            ResourceDimension::Tex1D | ResourceDimension::Tex1DArray => compute_mip_levels_count(self.width, 1, 1),
            ResourceDimension::Tex3D => compute_mip_levels_count(self.width, self.height, self.depth_or_array_size),
            _ => compute_mip_levels_count(self.width, self.height, 1),
        }
    }

    /// 初始数据必须提供的子资源数量
    pub fn subresource_count(&self) -> u64 {
        u64::from(self.mip_levels) * u64::from(self.array_size())
    }

    pub fn subresource_index(&self, mip: u32, slice: u32) -> usize {
        (u64::from(slice) * u64::from(self.mip_levels) + u64::from(mip)) as usize
    }

    /// 指定 mip 层级的尺寸与紧密排列时的字节数
    pub fn mip_properties(&self, mip: u32) -> MipLevelProperties {
        let attribs = self.format.attribs();
        let width = (self.width >> mip).max(1);
        let height = (self.height >> mip).max(1);
        let depth = (self.depth() >> mip).max(1);

        let (storage_width, storage_height, row_size, rows) = if attribs.component_type == ComponentType::Compressed {
            let bw = u32::from(attribs.block_width);
            let bh = u32::from(attribs.block_height);
            let sw = width.div_ceil(bw) * bw;
            let sh = height.div_ceil(bh) * bh;
            (sw, sh, u64::from(sw / bw) * u64::from(attribs.element_size()), sh / bh)
        } else {
            (width, height, u64::from(width) * u64::from(attribs.element_size()), height)
        };

        let depth_slice_size = row_size * u64::from(rows);
        MipLevelProperties {
            logical_width: width,
            logical_height: height,
            storage_width,
            storage_height,
            depth,
            row_size,
            depth_slice_size,
            mip_size: depth_slice_size * u64::from(depth),
        }
    }
}

/// mip 层级属性
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MipLevelProperties {
    pub logical_width: u32,
    pub logical_height: u32,
    /// 压缩格式对齐到块大小
    pub storage_width: u32,
    pub storage_height: u32,
    pub depth: u32,
    pub row_size: u64,
    pub depth_slice_size: u64,
    pub mip_size: u64,
}

/// 给定尺寸下完整 mip 链的层数
pub fn compute_mip_levels_count(width: u32, height: u32, depth: u32) -> u32 {
    let max_dim = width.max(height).max(depth);
    if max_dim == 0 {
        0
    } else {
        u32::BITS - max_dim.leading_zeros()
    }
}

/// 检查纹理描述（`mip_levels` 已展开）
pub(crate) fn validate_texture_desc(desc: &TextureDesc, support: &FormatSupport, caps: &DeviceCaps) -> Result<()> {
    let name = &desc.name;
    let err = |msg: String| invalid_argument(format!("texture '{}': {}", name, msg));
    let unsup = |msg: String| unsupported(format!("texture '{}': {}", name, msg));

    if desc.width == 0 {
        return Err(err("width cannot be zero".into()));
    }
    match desc.dimension {
        ResourceDimension::Tex1D | ResourceDimension::Tex1DArray => {
            if desc.height != 1 {
                return Err(err(format!("height ({}) of a 1D texture must be 1", desc.height)));
            }
        }
        _ if desc.height == 0 => return Err(err("height cannot be zero".into())),
        _ => {}
    }
    if desc.depth_or_array_size == 0 {
        return Err(err("depth or array size cannot be zero".into()));
    }
    if matches!(desc.dimension, ResourceDimension::Tex1D | ResourceDimension::Tex2D) && desc.depth_or_array_size != 1 {
        return Err(err(format!(
            "1D/2D textures must have one array slice ({} provided)",
            desc.depth_or_array_size
        )));
    }
    if matches!(desc.dimension, ResourceDimension::TexCube | ResourceDimension::TexCubeArray) {
        if desc.width != desc.height {
            return Err(err(format!("cube faces must be square ({}x{})", desc.width, desc.height)));
        }
        if desc.depth_or_array_size < 6 || desc.depth_or_array_size % 6 != 0 {
            return Err(err(format!(
                "cube textures need a multiple of 6 slices ({} provided)",
                desc.depth_or_array_size
            )));
        }
    }

    if desc.mip_levels == 0 || desc.mip_levels > desc.full_mip_chain() {
        return Err(err(format!(
            "incorrect number of mip levels ({}, at most {})",
            desc.mip_levels,
            desc.full_mip_chain()
        )));
    }

    let disallowed = desc.bind_flags - BindFlags::TEXTURE_FLAGS;
    if !disallowed.is_empty() {
        return Err(err(format!("bind flags {:?} are not allowed for a texture", disallowed)));
    }
    if desc.bind_flags.contains(BindFlags::RENDER_TARGET | BindFlags::DEPTH_STENCIL) {
        return Err(err("a texture can't be both a render target and a depth-stencil".into()));
    }

    if desc.sample_count == 0 || !desc.sample_count.is_power_of_two() || desc.sample_count > 32 {
        return Err(err(format!("invalid sample count {}", desc.sample_count)));
    }
    if desc.sample_count > 1 {
        if !matches!(desc.dimension, ResourceDimension::Tex2D | ResourceDimension::Tex2DArray) {
            return Err(err("only 2D textures and 2D texture arrays can be multisampled".into()));
        }
        if desc.mip_levels != 1 {
            return Err(err(format!(
                "multisampled textures must have one mip level ({} specified)",
                desc.mip_levels
            )));
        }
        if desc.bind_flags.contains(BindFlags::UNORDERED_ACCESS) {
            return Err(unsup("UAVs are not allowed for multisampled resources".into()));
        }
    }

    match desc.usage {
        Usage::Default | Usage::Immutable => {
            if !desc.cpu_access.is_empty() {
                return Err(err("default and immutable textures can't have CPU access flags".into()));
            }
        }
        Usage::Dynamic => {
            if desc.cpu_access != CpuAccessFlags::WRITE {
                return Err(err("dynamic textures require exactly CPU write access".into()));
            }
        }
        Usage::Staging => {
            if !desc.bind_flags.is_empty() {
                return Err(unsup("staging textures cannot be bound to any pipeline stage".into()));
            }
            if desc.generate_mips {
                return Err(err("mipmaps cannot be generated for staging textures".into()));
            }
            if desc.cpu_access != CpuAccessFlags::READ && desc.cpu_access != CpuAccessFlags::WRITE {
                return Err(err("staging textures must use exactly one of CPU read or write access".into()));
            }
        }
    }

    if desc.generate_mips
        && (!desc.bind_flags.contains(BindFlags::RENDER_TARGET | BindFlags::SHADER_RESOURCE) || desc.mip_levels == 1)
    {
        return Err(err("mip generation requires render target and shader resource bind flags and more than one mip".into()));
    }

    // 后端能力
    if !support.supported {
        return Err(unsup(format!("format {} is not supported", desc.format)));
    }
    let missing = desc.bind_flags - support.bind_flags;
    if !missing.is_empty() {
        return Err(unsup(format!("format {} can't be bound as {:?}", desc.format, missing)));
    }
    if !support.dimensions.contains(desc.dimension.support_flag()) {
        return Err(unsup(format!("format {} doesn't support {:?}", desc.format, desc.dimension)));
    }
    if !support.sample_counts.contains(SampleCountFlags::from_count(desc.sample_count)) {
        return Err(unsup(format!(
            "format {} doesn't support {} samples",
            desc.format, desc.sample_count
        )));
    }
    let max_dim = desc.width.max(desc.height).max(desc.depth());
    if max_dim > caps.max_texture_dimension {
        return Err(unsup(format!(
            "dimension {} exceeds the device limit {}",
            max_dim, caps.max_texture_dimension
        )));
    }
    if desc.array_size() > caps.max_texture_array_slices {
        return Err(unsup(format!(
            "{} array slices exceed the device limit {}",
            desc.array_size(),
            caps.max_texture_array_slices
        )));
    }

    if desc.bind_flags.contains(BindFlags::RENDER_TARGET) && desc.format.attribs().component_type == ComponentType::Snorm {
        crate::engine_warn!(
            texture = %name,
            format = %desc.format,
            "SNORM texture is created as a render target; negative values may be clamped to zero on some drivers, use UNORM instead"
        );
    }

    Ok(())
}

/// 检查初始数据并取出每个子资源的字节
pub(crate) fn collect_initial_data<'a>(desc: &TextureDesc, data: &'a [SubresourceData<'a>]) -> Result<Vec<&'a [u8]>> {
    if data.is_empty() {
        if desc.usage == Usage::Immutable {
            return Err(unsupported(format!(
                "texture '{}': immutable textures must be initialized at creation time",
                desc.name
            )));
        }
        return Ok(Vec::new());
    }

    if desc.sample_count > 1 {
        return Err(unsupported(format!(
            "texture '{}': multisampled textures cannot be initialized with data",
            desc.name
        )));
    }

    let expected = desc.subresource_count();
    if data.len() as u64 != expected {
        return Err(invalid_argument(format!(
            "texture '{}': {} subresources provided, {} expected (mip levels {} x array size {})",
            desc.name,
            data.len(),
            expected,
            desc.mip_levels,
            desc.array_size()
        )));
    }

    let mut bytes = Vec::with_capacity(data.len());
    for (index, subresource) in data.iter().enumerate() {
        let mip = index as u32 % desc.mip_levels;
        let required = desc.mip_properties(mip).mip_size;
        match subresource {
            SubresourceData::Cpu(slice) if slice.len() as u64 == required => bytes.push(*slice),
            SubresourceData::Cpu(slice) => {
                return Err(invalid_argument(format!(
                    "texture '{}': subresource {} has {} bytes, {} expected",
                    desc.name,
                    index,
                    slice.len(),
                    required
                )));
            }
            SubresourceData::GpuBuffer { .. } => {
                return Err(invalid_argument(format!(
                    "texture '{}': initial data must come from CPU memory",
                    desc.name
                )));
            }
        }
    }
    Ok(bytes)
}

/// GPU 纹理
#[derive(Debug)]
pub struct Texture {
    pub(crate) core: ResourceCore,
    desc: TextureDesc,
    /// 默认视图缓存，按 `TextureViewType` 索引
    default_views: Mutex<[Weak<TextureView>; 4]>,
}

impl_device_object!(Texture, InterfaceId::Texture, [InterfaceId::Resource], core);

impl Texture {
    pub(crate) fn new(core: ResourceCore, desc: TextureDesc) -> Self {
        Self {
            core,
            desc,
            default_views: Mutex::new([Weak::new(), Weak::new(), Weak::new(), Weak::new()]),
        }
    }

    pub(crate) fn core(&self) -> &ResourceCore {
        &self.core
    }

    /// 描述，`mip_levels` 为创建后的实际值
    pub fn desc(&self) -> &TextureDesc {
        &self.desc
    }

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

    /// 交换链重建后旧的后台缓冲区失效
    pub fn is_retired(&self) -> bool {
        self.core.is_retired()
    }

    pub(crate) fn retire(&self) {
        self.core.retired.store(true, std::sync::atomic::Ordering::Release);
    }

    /// 创建视图
    pub fn create_view(self: &Arc<Self>, desc: &TextureViewDesc) -> Result<Arc<TextureView>> {
        TextureView::create(self, desc)
    }

    /// 获取默认视图
    ///
    /// 覆盖整个纹理；视图存活期间重复调用返回同一个实例。
    /// 纹理没有对应绑定标志时返回 `None`。
    pub fn default_view(self: &Arc<Self>, view_type: TextureViewType) -> Option<Arc<TextureView>> {
        if !self.desc.bind_flags.contains(view_type.required_bind_flag()) {
            return None;
        }

        let slot = view_type as usize;
        let mut views = self.default_views.lock();
        if let Some(view) = views[slot].upgrade() {
            return Some(view);
        }

        let desc = TextureViewDesc::new(view_type)
            .with_name(format!("Default {:?} view of texture '{}'", view_type, self.core.name));
        match TextureView::create(self, &desc) {
            Ok(view) => {
                views[slot] = Arc::downgrade(&view);
                Some(view)
            }
            Err(err) => {
                crate::engine_error!(texture = %self.core.name, error = %err, "Failed to create default texture view");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn caps() -> DeviceCaps {
        DeviceCaps::default()
    }

    fn check(desc: &TextureDesc) -> Result<()> {
        validate_texture_desc(desc, &FormatSupport::typical(desc.format), &caps())
    }

    #[test]
    fn test_mip_levels_count() {
        assert_eq!(compute_mip_levels_count(256, 256, 1), 9);
        assert_eq!(compute_mip_levels_count(1, 1, 1), 1);
        assert_eq!(compute_mip_levels_count(300, 20, 1), 9);
        assert_eq!(compute_mip_levels_count(0, 0, 0), 0);

        let desc = TextureDesc::tex2d(256, 256, TextureFormat::Rgba8Unorm, BindFlags::SHADER_RESOURCE);
        assert_eq!(desc.full_mip_chain(), 9);
    }

    #[test]
    fn test_mip_properties() {
        let desc = TextureDesc::tex2d(64, 32, TextureFormat::Rgba8Unorm, BindFlags::SHADER_RESOURCE).with_mip_levels(0);
        let mip2 = desc.mip_properties(2);
        assert_eq!((mip2.logical_width, mip2.logical_height), (16, 8));
        assert_eq!(mip2.row_size, 64);
        assert_eq!(mip2.mip_size, 512);

        let last = desc.mip_properties(6);
        assert_eq!((last.logical_width, last.logical_height), (1, 1));

        let bc = TextureDesc::tex2d(10, 10, TextureFormat::Bc1Unorm, BindFlags::SHADER_RESOURCE);
        let props = bc.mip_properties(0);
        assert_eq!(props.storage_width, 12);
        assert_eq!(props.row_size, 3 * 8);
        assert_eq!(props.mip_size, 3 * 3 * 8);
    }

    #[test]
    fn test_subresource_layout() {
        let desc = TextureDesc::tex2d(4, 4, TextureFormat::R8Unorm, BindFlags::SHADER_RESOURCE)
            .with_dimension(ResourceDimension::Tex2DArray, 2)
            .with_mip_levels(3);
        assert_eq!(desc.subresource_count(), 6);
        assert_eq!(desc.subresource_index(0, 1), 3);
        assert_eq!(desc.subresource_index(2, 1), 5);

        let volume = TextureDesc::tex2d(8, 8, TextureFormat::R8Unorm, BindFlags::SHADER_RESOURCE)
            .with_dimension(ResourceDimension::Tex3D, 8)
            .with_mip_levels(4);
        assert_eq!(volume.subresource_count(), 4);
        assert_eq!(volume.mip_properties(1).depth, 4);
    }

    #[test]
    fn test_dimension_rules() {
        let mut desc = TextureDesc::tex2d(16, 4, TextureFormat::R8Unorm, BindFlags::SHADER_RESOURCE)
            .with_dimension(ResourceDimension::Tex1D, 1);
        assert!(check(&desc).unwrap_err().is_invalid_argument());
        desc.height = 1;
        assert!(check(&desc).is_ok());

        let cube = TextureDesc::tex2d(16, 8, TextureFormat::Rgba8Unorm, BindFlags::SHADER_RESOURCE)
            .with_dimension(ResourceDimension::TexCube, 6);
        assert!(check(&cube).unwrap_err().is_invalid_argument());

        let cube = TextureDesc::tex2d(16, 16, TextureFormat::Rgba8Unorm, BindFlags::SHADER_RESOURCE)
            .with_dimension(ResourceDimension::TexCube, 4);
        assert!(check(&cube).unwrap_err().is_invalid_argument());

        let array_2d = TextureDesc::tex2d(16, 16, TextureFormat::Rgba8Unorm, BindFlags::SHADER_RESOURCE)
            .with_dimension(ResourceDimension::Tex2D, 3);
        assert!(check(&array_2d).unwrap_err().is_invalid_argument());

        let too_many_mips = TextureDesc::tex2d(16, 16, TextureFormat::Rgba8Unorm, BindFlags::SHADER_RESOURCE)
            .with_mip_levels(6);
        assert!(check(&too_many_mips).unwrap_err().is_invalid_argument());
    }

    #[test]
    fn test_device_limits() {
        let limits = caps();
        let array = TextureDesc::tex2d(16, 16, TextureFormat::Rgba8Unorm, BindFlags::SHADER_RESOURCE)
            .with_dimension(ResourceDimension::Tex2DArray, limits.max_texture_array_slices);
        assert!(check(&array).is_ok());

        let too_many = array.with_dimension(ResourceDimension::Tex2DArray, limits.max_texture_array_slices + 1);
        assert!(check(&too_many).unwrap_err().is_unsupported());

        let huge = too_many.with_dimension(ResourceDimension::Tex2DArray, 1 << 30).with_mip_levels(5);
        assert!(check(&huge).unwrap_err().is_unsupported());
        assert_eq!(huge.subresource_count(), 5 << 30);

        let deep = TextureDesc::tex2d(16, 16, TextureFormat::Rgba8Unorm, BindFlags::SHADER_RESOURCE)
            .with_dimension(ResourceDimension::Tex3D, limits.max_texture_dimension + 1);
        assert!(check(&deep).unwrap_err().is_unsupported());
    }

    #[test]
    fn test_multisample_rules() {
        let ms = TextureDesc::tex2d(64, 64, TextureFormat::Rgba8Unorm, BindFlags::RENDER_TARGET).with_sample_count(4);
        assert!(check(&ms).is_ok());

        let ms_uav = TextureDesc::tex2d(64, 64, TextureFormat::Rgba8Unorm, BindFlags::UNORDERED_ACCESS).with_sample_count(4);
        assert!(check(&ms_uav).unwrap_err().is_unsupported());

        let ms_mips = ms.clone().with_mip_levels(2);
        assert!(check(&ms_mips).unwrap_err().is_invalid_argument());

        let ms_3d = TextureDesc::tex2d(8, 8, TextureFormat::Rgba8Unorm, BindFlags::RENDER_TARGET)
            .with_dimension(ResourceDimension::Tex3D, 8)
            .with_sample_count(2);
        assert!(check(&ms_3d).unwrap_err().is_invalid_argument());

        let bad_count = ms.with_sample_count(3);
        assert!(check(&bad_count).unwrap_err().is_invalid_argument());
    }

    #[test]
    fn test_staging_and_format_rules() {
        let readback = TextureDesc::readback_2d(32, 32, TextureFormat::Rgba8Unorm);
        assert!(check(&readback).is_ok());

        let bound_staging = TextureDesc { bind_flags: BindFlags::SHADER_RESOURCE, ..readback.clone() };
        assert!(check(&bound_staging).unwrap_err().is_unsupported());

        let no_access = readback.with_cpu_access(CpuAccessFlags::empty());
        assert!(check(&no_access).unwrap_err().is_invalid_argument());

        let depth_on_color = TextureDesc::tex2d(32, 32, TextureFormat::Rgba8Unorm, BindFlags::DEPTH_STENCIL);
        assert!(check(&depth_on_color).unwrap_err().is_unsupported());

        let rt_on_bc = TextureDesc::tex2d(32, 32, TextureFormat::Bc1Unorm, BindFlags::RENDER_TARGET);
        assert!(check(&rt_on_bc).unwrap_err().is_unsupported());

        let both = TextureDesc::tex2d(32, 32, TextureFormat::D32Float, BindFlags::RENDER_TARGET | BindFlags::DEPTH_STENCIL);
        assert!(check(&both).unwrap_err().is_invalid_argument());
    }

    #[test]
    fn test_initial_data_count() {
        let desc = TextureDesc::tex2d(2, 2, TextureFormat::R8Unorm, BindFlags::SHADER_RESOURCE)
            .with_dimension(ResourceDimension::Tex2DArray, 2)
            .with_mip_levels(2);
        let mip0 = [0u8; 4];
        let mip1 = [0u8; 1];

        let three = [
            SubresourceData::Cpu(&mip0),
            SubresourceData::Cpu(&mip1),
            SubresourceData::Cpu(&mip0),
        ];
        assert!(collect_initial_data(&desc, &three).unwrap_err().is_invalid_argument());

        let four = [
            SubresourceData::Cpu(&mip0),
            SubresourceData::Cpu(&mip1),
            SubresourceData::Cpu(&mip0),
            SubresourceData::Cpu(&mip1),
        ];
        assert_eq!(collect_initial_data(&desc, &four).unwrap().len(), 4);

        let wrong_size = [
            SubresourceData::Cpu(&mip0),
            SubresourceData::Cpu(&mip0),
            SubresourceData::Cpu(&mip0),
            SubresourceData::Cpu(&mip1),
        ];
        assert!(collect_initial_data(&desc, &wrong_size).unwrap_err().is_invalid_argument());
    }

    #[test]
    fn test_multisampled_initial_data() {
        let desc = TextureDesc::tex2d(2, 2, TextureFormat::R8Unorm, BindFlags::RENDER_TARGET).with_sample_count(4);
        let bytes = [0u8; 4];
        let data = [SubresourceData::Cpu(&bytes)];
        assert!(collect_initial_data(&desc, &data).unwrap_err().is_unsupported());
    }
}
