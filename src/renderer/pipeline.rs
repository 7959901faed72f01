//! 着色器、管线状态与着色器资源绑定
//!
//! 着色器编译不在核心范围内：`ShaderDesc` 携带外部编译器产出的字节码，
//! 核心只把它交给后端换取一个不透明句柄。
//!
//! 管线状态声明资源布局（变量名 + 角色），`ShaderResourceBinding`
//! 按布局保存实际资源；提交绑定时上下文根据角色推导每个资源需要的状态。

use std::collections::HashSet;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::core::error::{invalid_argument, Result};
use crate::gfx::backend::NativeHandle;
use crate::renderer::device::RenderDevice;
use crate::renderer::format::TextureFormat;
use crate::renderer::object::{impl_device_object, InterfaceId, ObjectId};
use crate::renderer::resources::{
    BindFlags, Buffer, BufferView, BufferViewType, ResourceRef, TextureView, TextureViewType,
};
use crate::renderer::state::ResourceState;

/// 着色器阶段
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ShaderStage {
    Vertex,
    Pixel,
    Compute,
}

/// 已编译着色器的描述
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShaderDesc {
    pub name: String,
    pub stage: ShaderStage,
    pub entry_point: String,
    /// 外部编译器的输出
    pub bytecode: Vec<u8>,
}

impl ShaderDesc {
    pub fn new(name: impl Into<String>, stage: ShaderStage, bytecode: Vec<u8>) -> Self {
        Self {
            name: name.into(),
            stage,
            entry_point: "main".to_string(),
            bytecode,
        }
    }

    pub fn with_entry_point(mut self, entry_point: impl Into<String>) -> Self {
        self.entry_point = entry_point.into();
        self
    }
}

/// 着色器
#[derive(Debug)]
pub struct Shader {
    id: ObjectId,
    name: String,
    handle: NativeHandle,
    stage: ShaderStage,
    device: Arc<RenderDevice>,
}

impl_device_object!(Shader, InterfaceId::Shader, [], |s| Some(s.handle));

impl Shader {
    pub(crate) fn new(device: &Arc<RenderDevice>, handle: NativeHandle, desc: &ShaderDesc) -> Self {
        Self {
            id: ObjectId::next(),
            name: desc.name.clone(),
            handle,
            stage: desc.stage,
            device: Arc::clone(device),
        }
    }

    pub fn stage(&self) -> ShaderStage {
        self.stage
    }
}

impl Drop for Shader {
    fn drop(&mut self) {
        self.device.safe_release(self.handle, &self.name);
    }
}

/// 着色器变量在资源布局中的角色
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VariableRole {
    ConstantBuffer,
    TextureSrv,
    BufferSrv,
    TextureUav,
    BufferUav,
}

impl VariableRole {
    /// 该角色要求资源所处的状态
    pub fn required_state(self) -> ResourceState {
        match self {
            VariableRole::ConstantBuffer => ResourceState::ConstantBuffer,
            VariableRole::TextureSrv | VariableRole::BufferSrv => ResourceState::ShaderResource,
            VariableRole::TextureUav | VariableRole::BufferUav => ResourceState::UnorderedAccess,
        }
    }
}

/// 资源布局中的一个变量
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShaderVariableDesc {
    pub name: String,
    pub role: VariableRole,
}

impl ShaderVariableDesc {
    pub fn new(name: impl Into<String>, role: VariableRole) -> Self {
        Self { name: name.into(), role }
    }
}

/// 管线类型
#[derive(Debug, Clone)]
pub enum PipelineKind {
    Graphics {
        vs: Arc<Shader>,
        ps: Option<Arc<Shader>>,
        rtv_formats: Vec<TextureFormat>,
        dsv_format: Option<TextureFormat>,
    },
    Compute {
        cs: Arc<Shader>,
    },
}

/// 管线状态描述
#[derive(Debug, Clone)]
pub struct PipelineStateDesc {
    pub name: String,
    pub kind: PipelineKind,
    pub variables: Vec<ShaderVariableDesc>,
}

impl PipelineStateDesc {
    pub fn graphics(name: impl Into<String>, vs: Arc<Shader>, ps: Option<Arc<Shader>>) -> Self {
        Self {
            name: name.into(),
            kind: PipelineKind::Graphics {
                vs,
                ps,
                rtv_formats: Vec::new(),
                dsv_format: None,
            },
            variables: Vec::new(),
        }
    }

    pub fn compute(name: impl Into<String>, cs: Arc<Shader>) -> Self {
        Self {
            name: name.into(),
            kind: PipelineKind::Compute { cs },
            variables: Vec::new(),
        }
    }

    pub fn with_render_targets(mut self, formats: &[TextureFormat], depth: Option<TextureFormat>) -> Self {
        if let PipelineKind::Graphics { rtv_formats, dsv_format, .. } = &mut self.kind {
            *rtv_formats = formats.to_vec();
            *dsv_format = depth;
        }
        self
    }

    pub fn with_variable(mut self, name: impl Into<String>, role: VariableRole) -> Self {
        self.variables.push(ShaderVariableDesc::new(name, role));
        self
    }

    pub fn is_compute(&self) -> bool {
        matches!(self.kind, PipelineKind::Compute { .. })
    }

    pub(crate) fn validate(&self, max_render_targets: u32) -> Result<()> {
        let err = |msg: String| invalid_argument(format!("pipeline '{}': {}", self.name, msg));

        match &self.kind {
            PipelineKind::Graphics { vs, ps, rtv_formats, dsv_format } => {
                if vs.stage() != ShaderStage::Vertex {
                    return Err(err(format!("'{}' is not a vertex shader", vs.name)));
                }
                if let Some(ps) = ps {
                    if ps.stage() != ShaderStage::Pixel {
                        return Err(err(format!("'{}' is not a pixel shader", ps.name)));
                    }
                }
                if rtv_formats.len() > max_render_targets as usize {
                    return Err(err(format!(
                        "{} render targets exceed the limit {}",
                        rtv_formats.len(),
                        max_render_targets
                    )));
                }
                if rtv_formats.iter().any(|f| f.attribs().is_depth()) {
                    return Err(err("render target formats can't be depth formats".into()));
                }
                if let Some(dsv) = dsv_format {
                    if !dsv.attribs().is_depth() {
                        return Err(err(format!("{} is not a depth format", dsv)));
                    }
                }
            }
            PipelineKind::Compute { cs } => {
                if cs.stage() != ShaderStage::Compute {
                    return Err(err(format!("'{}' is not a compute shader", cs.name)));
                }
            }
        }

        let mut names = HashSet::new();
        for var in &self.variables {
            if !names.insert(var.name.as_str()) {
                return Err(err(format!("variable '{}' is declared twice", var.name)));
            }
        }
        Ok(())
    }
}

/// 管线状态
#[derive(Debug)]
pub struct PipelineState {
    id: ObjectId,
    name: String,
    handle: NativeHandle,
    desc: PipelineStateDesc,
    device: Arc<RenderDevice>,
}

impl_device_object!(PipelineState, InterfaceId::PipelineState, [], |p| Some(p.handle));

impl PipelineState {
    pub(crate) fn new(device: &Arc<RenderDevice>, handle: NativeHandle, desc: PipelineStateDesc) -> Self {
        Self {
            id: ObjectId::next(),
            name: desc.name.clone(),
            handle,
            desc,
            device: Arc::clone(device),
        }
    }

    pub fn desc(&self) -> &PipelineStateDesc {
        &self.desc
    }

    pub fn is_compute(&self) -> bool {
        self.desc.is_compute()
    }

    pub(crate) fn handle(&self) -> NativeHandle {
        self.handle
    }

    /// 按布局创建空的资源绑定
    pub fn create_shader_resource_binding(self: &Arc<Self>) -> Arc<ShaderResourceBinding> {
        Arc::new(ShaderResourceBinding {
            id: ObjectId::next(),
            name: format!("SRB of '{}'", self.name),
            pipeline: Arc::clone(self),
            slots: Mutex::new(vec![None; self.desc.variables.len()]),
        })
    }
}

impl Drop for PipelineState {
    fn drop(&mut self) {
        self.device.safe_release(self.handle, &self.name);
    }
}

/// 绑定到着色器变量的对象
#[derive(Debug, Clone)]
pub enum ShaderResource {
    ConstantBuffer(Arc<Buffer>),
    TextureView(Arc<TextureView>),
    BufferView(Arc<BufferView>),
}

impl From<Arc<Buffer>> for ShaderResource {
    fn from(buffer: Arc<Buffer>) -> Self {
        ShaderResource::ConstantBuffer(buffer)
    }
}

impl From<Arc<TextureView>> for ShaderResource {
    fn from(view: Arc<TextureView>) -> Self {
        ShaderResource::TextureView(view)
    }
}

impl From<Arc<BufferView>> for ShaderResource {
    fn from(view: Arc<BufferView>) -> Self {
        ShaderResource::BufferView(view)
    }
}

impl ShaderResource {
    fn matches_role(&self, role: VariableRole) -> bool {
        match (self, role) {
            (ShaderResource::ConstantBuffer(b), VariableRole::ConstantBuffer) => {
                b.desc().bind_flags.contains(BindFlags::UNIFORM_BUFFER)
            }
            (ShaderResource::TextureView(v), VariableRole::TextureSrv) => {
                v.view_type() == TextureViewType::ShaderResource
            }
            (ShaderResource::TextureView(v), VariableRole::TextureUav) => {
                v.view_type() == TextureViewType::UnorderedAccess
            }
            (ShaderResource::BufferView(v), VariableRole::BufferSrv) => v.view_type() == BufferViewType::ShaderResource,
            (ShaderResource::BufferView(v), VariableRole::BufferUav) => v.view_type() == BufferViewType::UnorderedAccess,
            _ => false,
        }
    }

    /// 底层资源
    pub(crate) fn resource(&self) -> ResourceRef {
        match self {
            ShaderResource::ConstantBuffer(b) => ResourceRef::Buffer(Arc::clone(b)),
            ShaderResource::TextureView(v) => ResourceRef::Texture(Arc::clone(v.texture())),
            ShaderResource::BufferView(v) => ResourceRef::Buffer(Arc::clone(v.buffer())),
        }
    }

    /// 绑定时交给后端的句柄
    pub(crate) fn handle(&self) -> NativeHandle {
        match self {
            ShaderResource::ConstantBuffer(b) => b.core().handle,
            ShaderResource::TextureView(v) => v.handle(),
            ShaderResource::BufferView(v) => v.handle(),
        }
    }
}

/// 着色器资源绑定
#[derive(Debug)]
pub struct ShaderResourceBinding {
    id: ObjectId,
    name: String,
    pipeline: Arc<PipelineState>,
    slots: Mutex<Vec<Option<ShaderResource>>>,
}

impl_device_object!(ShaderResourceBinding, InterfaceId::ShaderResourceBinding, [], |_b| None);

/// 提交绑定时每个已绑定资源的信息
#[derive(Debug, Clone)]
pub(crate) struct BoundShaderResource {
    pub variable: String,
    pub resource: ResourceRef,
    pub required: ResourceState,
    pub handle: NativeHandle,
}

impl ShaderResourceBinding {
    pub fn pipeline(&self) -> &Arc<PipelineState> {
        &self.pipeline
    }

    /// 绑定变量；资源类型必须与变量角色一致
    pub fn set(&self, name: &str, resource: impl Into<ShaderResource>) -> Result<()> {
        let resource = resource.into();
        let variables = &self.pipeline.desc.variables;
        let Some(index) = variables.iter().position(|v| v.name == name) else {
            return Err(invalid_argument(format!(
                "pipeline '{}' has no variable named '{}'",
                self.pipeline.name, name
            )));
        };
        let role = variables[index].role;
        if !resource.matches_role(role) {
            return Err(invalid_argument(format!(
                "resource '{}' can't be bound to variable '{}' ({:?})",
                resource.resource().name(),
                name,
                role
            )));
        }
        self.slots.lock()[index] = Some(resource);
        Ok(())
    }

    /// 取消绑定
    pub fn clear(&self, name: &str) {
        if let Some(index) = self.pipeline.desc.variables.iter().position(|v| v.name == name) {
            self.slots.lock()[index] = None;
        }
    }

    pub fn get(&self, name: &str) -> Option<ShaderResource> {
        let index = self.pipeline.desc.variables.iter().position(|v| v.name == name)?;
        self.slots.lock()[index].clone()
    }

    pub(crate) fn bound_resources(&self) -> Vec<BoundShaderResource> {
        let slots = self.slots.lock();
        self.pipeline
            .desc
            .variables
            .iter()
            .zip(slots.iter())
            .filter_map(|(var, slot)| {
                slot.as_ref().map(|res| BoundShaderResource {
                    variable: var.name.clone(),
                    resource: res.resource(),
                    required: var.role.required_state(),
                    handle: res.handle(),
                })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_role_states() {
        assert_eq!(VariableRole::ConstantBuffer.required_state(), ResourceState::ConstantBuffer);
        assert_eq!(VariableRole::TextureSrv.required_state(), ResourceState::ShaderResource);
        assert_eq!(VariableRole::BufferUav.required_state(), ResourceState::UnorderedAccess);
    }
}
