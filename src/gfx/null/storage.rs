//! null 后端的对象存储
//!
//! 缓冲区和纹理的内容真实保存在内存里，复制、更新、清除都会改写这些字节，
//! 回读结果因此可以和预期像素逐字节比对。

use crate::renderer::format::{ComponentType, TextureFormat};
use crate::renderer::pipeline::ShaderStage;
use crate::renderer::resources::{BufferDesc, TextureDesc, TextureViewDesc};
use crate::renderer::state::ResourceState;
use crate::renderer::swap_chain::SwapChainDesc;
use crate::gfx::backend::{NativeError, NativeHandle, NativeResult, Subresource};

/// 纹理的存储：每个子资源一段字节，按 `slice * mips + mip` 排列
#[derive(Debug)]
pub(crate) struct TextureStorage {
    pub desc: TextureDesc,
    pub subresources: Vec<Vec<u8>>,
}

impl TextureStorage {
    /// 分配全部子资源；调用方应先用 `texture_byte_size` 检查预算
    pub fn try_new(desc: &TextureDesc) -> NativeResult<Self> {
        let count = usize::try_from(desc.subresource_count())
            .map_err(|_| NativeError::OutOfMemory(format!("{} subresources", desc.subresource_count())))?;
        let mut subresources = Vec::new();
        subresources
            .try_reserve_exact(count)
            .map_err(|err| NativeError::OutOfMemory(format!("{} subresources: {}", count, err)))?;
        for _slice in 0..desc.array_size() {
            for mip in 0..desc.mip_levels {
                subresources.push(try_zeroed(desc.mip_properties(mip).mip_size)?);
            }
        }
        Ok(Self {
            desc: desc.clone(),
            subresources,
        })
    }

    pub fn byte_size(&self) -> u64 {
        self.subresources.iter().map(|s| s.len() as u64).sum()
    }

    pub fn subresource(&self, sub: Subresource) -> Option<&Vec<u8>> {
        if sub.mip >= self.desc.mip_levels {
            return None;
        }
        self.subresources.get(self.desc.subresource_index(sub.mip, sub.slice))
    }

    pub fn subresource_mut(&mut self, sub: Subresource) -> Option<&mut Vec<u8>> {
        if sub.mip >= self.desc.mip_levels {
            return None;
        }
        let index = self.desc.subresource_index(sub.mip, sub.slice);
        self.subresources.get_mut(index)
    }
}

/// 纹理全部子资源的字节数，溢出时返回 `None`
pub(crate) fn texture_byte_size(desc: &TextureDesc) -> Option<u64> {
    let per_slice = (0..desc.mip_levels).try_fold(0u64, |total, mip| total.checked_add(desc.mip_properties(mip).mip_size))?;
    per_slice.checked_mul(u64::from(desc.array_size()))
}

/// 分配一段清零的内存，分配失败返回 `OutOfMemory` 而不是中止进程
pub(crate) fn try_zeroed(size: u64) -> NativeResult<Vec<u8>> {
    let len = usize::try_from(size)
        .map_err(|_| NativeError::OutOfMemory(format!("{} bytes exceed the address space", size)))?;
    let mut bytes = Vec::new();
    bytes
        .try_reserve_exact(len)
        .map_err(|err| NativeError::OutOfMemory(format!("failed to allocate {} bytes: {}", size, err)))?;
    bytes.resize(len, 0);
    Ok(bytes)
}

/// null 后端中的一个原生对象
#[derive(Debug)]
pub(crate) enum NullObject {
    Buffer {
        desc: BufferDesc,
        data: Vec<u8>,
        gpu_state: ResourceState,
    },
    Texture {
        storage: TextureStorage,
        gpu_state: ResourceState,
    },
    TextureView {
        texture: NativeHandle,
        desc: TextureViewDesc,
    },
    BufferView {
        buffer: NativeHandle,
    },
    Sampler,
    Shader {
        stage: ShaderStage,
    },
    Pipeline,
    SwapChain {
        desc: SwapChainDesc,
    },
}

impl NullObject {
    /// 占用的显存字节数
    pub fn byte_size(&self) -> u64 {
        match self {
            NullObject::Buffer { data, .. } => data.len() as u64,
            NullObject::Texture { storage, .. } => storage.byte_size(),
            _ => 0,
        }
    }

    pub fn gpu_state(&self) -> Option<ResourceState> {
        match self {
            NullObject::Buffer { gpu_state, .. } | NullObject::Texture { gpu_state, .. } => Some(*gpu_state),
            _ => None,
        }
    }

    pub fn set_gpu_state(&mut self, state: ResourceState) {
        if let NullObject::Buffer { gpu_state, .. } | NullObject::Texture { gpu_state, .. } = self {
            *gpu_state = state;
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            NullObject::Buffer { .. } => "buffer",
            NullObject::Texture { .. } => "texture",
            NullObject::TextureView { .. } => "texture view",
            NullObject::BufferView { .. } => "buffer view",
            NullObject::Sampler => "sampler",
            NullObject::Shader { .. } => "shader",
            NullObject::Pipeline => "pipeline",
            NullObject::SwapChain { .. } => "swap chain",
        }
    }
}

/// 把清除颜色编码成一个像素
///
/// 8 位归一化格式与 32 位浮点格式按分量编码，其他格式清零。
pub(crate) fn encode_color(format: TextureFormat, color: [f32; 4]) -> Vec<u8> {
    let attribs = format.attribs();
    let components = attribs.num_components as usize;
    match (attribs.component_type, attribs.component_size) {
        (ComponentType::Unorm | ComponentType::UnormSrgb, 1) => {
            let to_u8 = |v: f32| (v.clamp(0.0, 1.0) * 255.0).round() as u8;
            let mut px: Vec<u8> = color.iter().take(components).map(|&c| to_u8(c)).collect();
            if matches!(format, TextureFormat::Bgra8Unorm | TextureFormat::Bgra8UnormSrgb) {
                px.swap(0, 2);
            }
            if format == TextureFormat::A8Unorm {
                px = vec![to_u8(color[3])];
            }
            px
        }
        (ComponentType::Float, 4) => color
            .iter()
            .take(components)
            .flat_map(|c| c.to_le_bytes())
            .collect(),
        _ => vec![0u8; attribs.element_size() as usize],
    }
}

/// 在已有像素上写入深度和（或）模板值
pub(crate) fn write_depth_stencil(format: TextureFormat, texel: &mut [u8], depth: Option<f32>, stencil: Option<u8>) {
    match format {
        TextureFormat::D32Float => {
            if let Some(d) = depth {
                texel.copy_from_slice(&d.to_le_bytes());
            }
        }
        TextureFormat::D16Unorm => {
            if let Some(d) = depth {
                let v = (d.clamp(0.0, 1.0) * 65535.0).round() as u16;
                texel.copy_from_slice(&v.to_le_bytes());
            }
        }
        TextureFormat::D24UnormS8Uint => {
            let mut packed = u32::from_le_bytes([texel[0], texel[1], texel[2], texel[3]]);
            if let Some(d) = depth {
                let v = (d.clamp(0.0, 1.0) * 16_777_215.0).round() as u32;
                packed = (packed & 0xFF00_0000) | (v & 0x00FF_FFFF);
            }
            if let Some(s) = stencil {
                packed = (packed & 0x00FF_FFFF) | (u32::from(s) << 24);
            }
            texel.copy_from_slice(&packed.to_le_bytes());
        }
        TextureFormat::D32FloatS8X24Uint => {
            if let Some(d) = depth {
                texel[..4].copy_from_slice(&d.to_le_bytes());
            }
            if let Some(s) = stencil {
                texel[4..8].copy_from_slice(&u32::from(s).to_le_bytes());
            }
        }
        _ => texel.fill(0),
    }
}
