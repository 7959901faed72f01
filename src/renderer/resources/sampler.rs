//! 采样器
//!
//! 设备按描述（忽略名称）缓存采样器，相同描述返回同一个对象。

use std::sync::Arc;

use crate::core::error::{invalid_argument, Result};
use crate::gfx::backend::NativeHandle;
use crate::renderer::device::RenderDevice;
use crate::renderer::object::{impl_device_object, InterfaceId, ObjectId};

/// 过滤方式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FilterType {
    Point,
    Linear,
    Anisotropic,
    ComparisonPoint,
    ComparisonLinear,
}

/// 寻址方式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AddressMode {
    Wrap,
    Mirror,
    Clamp,
    Border,
}

/// 比较函数
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ComparisonFunc {
    Never,
    Less,
    Equal,
    LessEqual,
    Greater,
    NotEqual,
    GreaterEqual,
    Always,
}

/// 采样器描述
#[derive(Debug, Clone, PartialEq)]
pub struct SamplerDesc {
    pub name: String,
    pub min_filter: FilterType,
    pub mag_filter: FilterType,
    pub mip_filter: FilterType,
    pub address_u: AddressMode,
    pub address_v: AddressMode,
    pub address_w: AddressMode,
    pub mip_lod_bias: f32,
    pub max_anisotropy: u32,
    pub comparison_func: ComparisonFunc,
    pub border_color: [f32; 4],
    pub min_lod: f32,
    pub max_lod: f32,
}

impl Default for SamplerDesc {
    fn default() -> Self {
        Self {
            name: String::new(),
            min_filter: FilterType::Linear,
            mag_filter: FilterType::Linear,
            mip_filter: FilterType::Linear,
            address_u: AddressMode::Clamp,
            address_v: AddressMode::Clamp,
            address_w: AddressMode::Clamp,
            mip_lod_bias: 0.0,
            max_anisotropy: 1,
            comparison_func: ComparisonFunc::Never,
            border_color: [0.0; 4],
            min_lod: 0.0,
            max_lod: f32::MAX,
        }
    }
}

impl SamplerDesc {
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_filter(mut self, filter: FilterType) -> Self {
        self.min_filter = filter;
        self.mag_filter = filter;
        self.mip_filter = filter;
        self
    }

    pub fn with_address(mut self, mode: AddressMode) -> Self {
        self.address_u = mode;
        self.address_v = mode;
        self.address_w = mode;
        self
    }

    pub(crate) fn validate(&self) -> Result<()> {
        if self.max_anisotropy == 0 || self.max_anisotropy > 16 {
            return Err(invalid_argument(format!(
                "sampler '{}': max anisotropy {} must be in [1, 16]",
                self.name, self.max_anisotropy
            )));
        }
        if self.min_lod.is_nan() || self.max_lod.is_nan() || self.min_lod > self.max_lod {
            return Err(invalid_argument(format!(
                "sampler '{}': invalid LOD range [{}, {}]",
                self.name, self.min_lod, self.max_lod
            )));
        }
        Ok(())
    }

    /// 去重键，浮点数按位比较
    pub(crate) fn key(&self) -> SamplerKey {
        SamplerKey {
            filters: [self.min_filter, self.mag_filter, self.mip_filter],
            address: [self.address_u, self.address_v, self.address_w],
            mip_lod_bias: self.mip_lod_bias.to_bits(),
            max_anisotropy: self.max_anisotropy,
            comparison_func: self.comparison_func,
            border_color: self.border_color.map(f32::to_bits),
            lod_range: [self.min_lod.to_bits(), self.max_lod.to_bits()],
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) struct SamplerKey {
    filters: [FilterType; 3],
    address: [AddressMode; 3],
    mip_lod_bias: u32,
    max_anisotropy: u32,
    comparison_func: ComparisonFunc,
    border_color: [u32; 4],
    lod_range: [u32; 2],
}

/// 采样器
#[derive(Debug)]
pub struct Sampler {
    id: ObjectId,
    name: String,
    handle: NativeHandle,
    desc: SamplerDesc,
    device: Arc<RenderDevice>,
}

impl_device_object!(Sampler, InterfaceId::Sampler, [], |s| Some(s.handle));

impl Sampler {
    pub(crate) fn new(device: &Arc<RenderDevice>, handle: NativeHandle, desc: SamplerDesc) -> Self {
        Self {
            id: ObjectId::next(),
            name: desc.name.clone(),
            handle,
            desc,
            device: Arc::clone(device),
        }
    }

    pub fn desc(&self) -> &SamplerDesc {
        &self.desc
    }
}

impl Drop for Sampler {
    fn drop(&mut self) {
        self.device.safe_release(self.handle, &self.name);
    }
}
