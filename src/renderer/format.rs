//! 纹理格式与格式能力查询
//!
//! `TextureFormatAttribs` 描述格式本身的固定属性（分量大小、分量数、类型、块大小），
//! 与后端无关；`FormatSupport` 描述当前后端对格式的支持情况。
//! 两者合并为 `TextureFormatInfoExt`，供调用方选择回退格式
//! （例如在 16 位与 32 位可过滤阴影格式之间选择）。

use bitflags::bitflags;
use serde::{Deserialize, Serialize};

use super::resources::BindFlags;

/// 纹理格式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TextureFormat {
    Rgba32Typeless,
    Rgba32Float,
    Rgba32Uint,
    Rgb32Float,
    Rgba16Float,
    Rgba16Unorm,
    Rg32Float,
    Rgb10A2Unorm,
    R11G11B10Float,
    Rgba8Typeless,
    Rgba8Unorm,
    Rgba8UnormSrgb,
    Rgba8Uint,
    Rgba8Snorm,
    Bgra8Unorm,
    Bgra8UnormSrgb,
    Rg16Float,
    Rg8Unorm,
    R32Typeless,
    R32Float,
    R32Uint,
    D32Float,
    R24G8Typeless,
    D24UnormS8Uint,
    D32FloatS8X24Uint,
    R16Typeless,
    R16Float,
    R16Unorm,
    D16Unorm,
    R8Unorm,
    R8Uint,
    A8Unorm,
    Bc1Unorm,
    Bc1UnormSrgb,
    Bc3Unorm,
    Bc5Unorm,
    Bc7Unorm,
    Bc7UnormSrgb,
}

/// 分量类型
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ComponentType {
    Undefined,
    Float,
    Snorm,
    Unorm,
    UnormSrgb,
    Sint,
    Uint,
    Depth,
    DepthStencil,
    /// 打包格式（如 RGB10A2）
    Compound,
    /// 块压缩格式
    Compressed,
}

/// 格式的固定属性
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TextureFormatAttribs {
    pub name: &'static str,
    /// 分量大小（字节）；压缩格式为整个块的大小
    pub component_size: u8,
    pub num_components: u8,
    pub component_type: ComponentType,
    pub is_typeless: bool,
    pub block_width: u8,
    pub block_height: u8,
}

const fn attribs(
    name: &'static str,
    component_size: u8,
    num_components: u8,
    component_type: ComponentType,
    is_typeless: bool,
    block: u8,
) -> TextureFormatAttribs {
    TextureFormatAttribs {
        name,
        component_size,
        num_components,
        component_type,
        is_typeless,
        block_width: block,
        block_height: block,
    }
}

impl TextureFormat {
    pub const ALL: [TextureFormat; 38] = [
        TextureFormat::Rgba32Typeless,
        TextureFormat::Rgba32Float,
        TextureFormat::Rgba32Uint,
        TextureFormat::Rgb32Float,
        TextureFormat::Rgba16Float,
        TextureFormat::Rgba16Unorm,
        TextureFormat::Rg32Float,
        TextureFormat::Rgb10A2Unorm,
        TextureFormat::R11G11B10Float,
        TextureFormat::Rgba8Typeless,
        TextureFormat::Rgba8Unorm,
        TextureFormat::Rgba8UnormSrgb,
        TextureFormat::Rgba8Uint,
        TextureFormat::Rgba8Snorm,
        TextureFormat::Bgra8Unorm,
        TextureFormat::Bgra8UnormSrgb,
        TextureFormat::Rg16Float,
        TextureFormat::Rg8Unorm,
        TextureFormat::R32Typeless,
        TextureFormat::R32Float,
        TextureFormat::R32Uint,
        TextureFormat::D32Float,
        TextureFormat::R24G8Typeless,
        TextureFormat::D24UnormS8Uint,
        TextureFormat::D32FloatS8X24Uint,
        TextureFormat::R16Typeless,
        TextureFormat::R16Float,
        TextureFormat::R16Unorm,
        TextureFormat::D16Unorm,
        TextureFormat::R8Unorm,
        TextureFormat::R8Uint,
        TextureFormat::A8Unorm,
        TextureFormat::Bc1Unorm,
        TextureFormat::Bc1UnormSrgb,
        TextureFormat::Bc3Unorm,
        TextureFormat::Bc5Unorm,
        TextureFormat::Bc7Unorm,
        TextureFormat::Bc7UnormSrgb,
    ];

    /// 格式的固定属性
    pub fn attribs(self) -> TextureFormatAttribs {
        use ComponentType as C;
        use TextureFormat as F;
        match self {
            F::Rgba32Typeless => attribs("RGBA32_TYPELESS", 4, 4, C::Undefined, true, 1),
            F::Rgba32Float => attribs("RGBA32_FLOAT", 4, 4, C::Float, false, 1),
            F::Rgba32Uint => attribs("RGBA32_UINT", 4, 4, C::Uint, false, 1),
            F::Rgb32Float => attribs("RGB32_FLOAT", 4, 3, C::Float, false, 1),
            F::Rgba16Float => attribs("RGBA16_FLOAT", 2, 4, C::Float, false, 1),
            F::Rgba16Unorm => attribs("RGBA16_UNORM", 2, 4, C::Unorm, false, 1),
            F::Rg32Float => attribs("RG32_FLOAT", 4, 2, C::Float, false, 1),
            F::Rgb10A2Unorm => attribs("RGB10A2_UNORM", 4, 1, C::Compound, false, 1),
            F::R11G11B10Float => attribs("R11G11B10_FLOAT", 4, 1, C::Compound, false, 1),
            F::Rgba8Typeless => attribs("RGBA8_TYPELESS", 1, 4, C::Undefined, true, 1),
            F::Rgba8Unorm => attribs("RGBA8_UNORM", 1, 4, C::Unorm, false, 1),
            F::Rgba8UnormSrgb => attribs("RGBA8_UNORM_SRGB", 1, 4, C::UnormSrgb, false, 1),
            F::Rgba8Uint => attribs("RGBA8_UINT", 1, 4, C::Uint, false, 1),
            F::Rgba8Snorm => attribs("RGBA8_SNORM", 1, 4, C::Snorm, false, 1),
            F::Bgra8Unorm => attribs("BGRA8_UNORM", 1, 4, C::Unorm, false, 1),
            F::Bgra8UnormSrgb => attribs("BGRA8_UNORM_SRGB", 1, 4, C::UnormSrgb, false, 1),
            F::Rg16Float => attribs("RG16_FLOAT", 2, 2, C::Float, false, 1),
            F::Rg8Unorm => attribs("RG8_UNORM", 1, 2, C::Unorm, false, 1),
            F::R32Typeless => attribs("R32_TYPELESS", 4, 1, C::Undefined, true, 1),
            F::R32Float => attribs("R32_FLOAT", 4, 1, C::Float, false, 1),
            F::R32Uint => attribs("R32_UINT", 4, 1, C::Uint, false, 1),
            F::D32Float => attribs("D32_FLOAT", 4, 1, C::Depth, false, 1),
            F::R24G8Typeless => attribs("R24G8_TYPELESS", 4, 1, C::DepthStencil, true, 1),
            F::D24UnormS8Uint => attribs("D24_UNORM_S8_UINT", 4, 1, C::DepthStencil, false, 1),
            F::D32FloatS8X24Uint => attribs("D32_FLOAT_S8X24_UINT", 4, 2, C::DepthStencil, false, 1),
            F::R16Typeless => attribs("R16_TYPELESS", 2, 1, C::Undefined, true, 1),
            F::R16Float => attribs("R16_FLOAT", 2, 1, C::Float, false, 1),
            F::R16Unorm => attribs("R16_UNORM", 2, 1, C::Unorm, false, 1),
            F::D16Unorm => attribs("D16_UNORM", 2, 1, C::Depth, false, 1),
            F::R8Unorm => attribs("R8_UNORM", 1, 1, C::Unorm, false, 1),
            F::R8Uint => attribs("R8_UINT", 1, 1, C::Uint, false, 1),
            F::A8Unorm => attribs("A8_UNORM", 1, 1, C::Unorm, false, 1),
            F::Bc1Unorm => attribs("BC1_UNORM", 8, 3, C::Compressed, false, 4),
            F::Bc1UnormSrgb => attribs("BC1_UNORM_SRGB", 8, 3, C::Compressed, false, 4),
            F::Bc3Unorm => attribs("BC3_UNORM", 16, 4, C::Compressed, false, 4),
            F::Bc5Unorm => attribs("BC5_UNORM", 16, 2, C::Compressed, false, 4),
            F::Bc7Unorm => attribs("BC7_UNORM", 16, 4, C::Compressed, false, 4),
            F::Bc7UnormSrgb => attribs("BC7_UNORM_SRGB", 16, 4, C::Compressed, false, 4),
        }
    }
}

impl std::fmt::Display for TextureFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.attribs().name)
    }
}

impl TextureFormatAttribs {
    /// 一个像素（压缩格式为一个块）占用的字节数
    pub fn element_size(&self) -> u32 {
        if self.component_type == ComponentType::Compressed || self.component_type == ComponentType::Compound {
            u32::from(self.component_size)
        } else {
            u32::from(self.component_size) * u32::from(self.num_components)
        }
    }

    pub fn is_depth(&self) -> bool {
        matches!(self.component_type, ComponentType::Depth | ComponentType::DepthStencil)
    }

    pub fn has_stencil(&self) -> bool {
        self.component_type == ComponentType::DepthStencil
    }

    pub fn is_compressed(&self) -> bool {
        self.component_type == ComponentType::Compressed
    }

    pub fn is_integer(&self) -> bool {
        matches!(self.component_type, ComponentType::Uint | ComponentType::Sint)
    }
}

bitflags! {
    /// 格式支持的资源维度
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct DimensionSupport: u32 {
        const TEX_1D = 1 << 0;
        const TEX_1D_ARRAY = 1 << 1;
        const TEX_2D = 1 << 2;
        const TEX_2D_ARRAY = 1 << 3;
        const TEX_3D = 1 << 4;
        const TEX_CUBE = 1 << 5;
        const TEX_CUBE_ARRAY = 1 << 6;
    }
}

bitflags! {
    /// 支持的采样数
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct SampleCountFlags: u32 {
        const X1 = 1;
        const X2 = 2;
        const X4 = 4;
        const X8 = 8;
        const X16 = 16;
        const X32 = 32;
    }
}

impl SampleCountFlags {
    /// 采样数对应的标志位，非 2 的幂返回空
    pub fn from_count(count: u32) -> Self {
        if count.is_power_of_two() {
            Self::from_bits(count).unwrap_or(Self::empty())
        } else {
            Self::empty()
        }
    }
}

/// 后端对某个格式的支持情况
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FormatSupport {
    pub supported: bool,
    pub bind_flags: BindFlags,
    pub dimensions: DimensionSupport,
    pub sample_counts: SampleCountFlags,
    pub filterable: bool,
}

impl FormatSupport {
    /// 不支持
    pub fn none() -> Self {
        Self {
            supported: false,
            bind_flags: BindFlags::empty(),
            dimensions: DimensionSupport::empty(),
            sample_counts: SampleCountFlags::empty(),
            filterable: false,
        }
    }

    /// 桌面级硬件的典型支持情况
    pub fn typical(format: TextureFormat) -> Self {
        let attribs = format.attribs();
        let all_dims = DimensionSupport::all();
        let planar = DimensionSupport::TEX_2D | DimensionSupport::TEX_2D_ARRAY
            | DimensionSupport::TEX_CUBE | DimensionSupport::TEX_CUBE_ARRAY;
        let ms = SampleCountFlags::X1 | SampleCountFlags::X2 | SampleCountFlags::X4 | SampleCountFlags::X8;

        if attribs.is_depth() {
            return Self {
                supported: true,
                bind_flags: BindFlags::DEPTH_STENCIL | BindFlags::SHADER_RESOURCE,
                dimensions: planar | DimensionSupport::TEX_1D | DimensionSupport::TEX_1D_ARRAY,
                sample_counts: ms,
                filterable: true,
            };
        }

        if attribs.is_compressed() {
            return Self {
                supported: true,
                bind_flags: BindFlags::SHADER_RESOURCE,
                dimensions: planar,
                sample_counts: SampleCountFlags::X1,
                filterable: true,
            };
        }

        let mut bind_flags = BindFlags::SHADER_RESOURCE | BindFlags::RENDER_TARGET | BindFlags::INPUT_ATTACHMENT;
        if attribs.component_type != ComponentType::UnormSrgb {
            bind_flags |= BindFlags::UNORDERED_ACCESS;
        }
        // RGB32 只能作为着色器资源
        if attribs.num_components == 3 && attribs.component_size == 4 {
            bind_flags = BindFlags::SHADER_RESOURCE;
        }

        Self {
            supported: true,
            bind_flags,
            dimensions: all_dims,
            sample_counts: if bind_flags.contains(BindFlags::RENDER_TARGET) { ms } else { SampleCountFlags::X1 },
            filterable: !attribs.is_integer() && !attribs.is_typeless,
        }
    }
}

/// 格式属性与后端支持情况的合并视图
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TextureFormatInfoExt {
    pub attribs: TextureFormatAttribs,
    pub support: FormatSupport,
}
