//! 资源状态机
//!
//! 每个缓冲区和纹理都有一个可变的当前使用状态。上下文在每次读写资源之前，
//! 通过本模块判断是否需要插入屏障：
//!
//! - 状态已满足目标时不做任何事（幂等，不产生屏障）
//! - `Unknown` 表示资源不受引擎跟踪，由调用方自行管理
//! - `GenericRead` 是多个只读状态的组合，满足其中任意一个只读需求
//!
//! 位值与原生 API 的状态位对齐，便于后端直接转换。

use std::sync::atomic::{AtomicU32, Ordering};

/// 资源状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum ResourceState {
    /// 不受跟踪，由调用方管理
    Unknown = 0,
    Undefined = 0x0_0001,
    VertexBuffer = 0x0_0002,
    ConstantBuffer = 0x0_0004,
    IndexBuffer = 0x0_0008,
    RenderTarget = 0x0_0010,
    UnorderedAccess = 0x0_0020,
    DepthWrite = 0x0_0040,
    DepthRead = 0x0_0080,
    ShaderResource = 0x0_0100,
    StreamOut = 0x0_0200,
    IndirectArgument = 0x0_0400,
    CopyDest = 0x0_0800,
    CopySource = 0x0_1000,
    ResolveDest = 0x0_2000,
    ResolveSource = 0x0_4000,
    InputAttachment = 0x0_8000,
    Present = 0x1_0000,
    Common = 0x2_0000,
    /// 顶点/常量/索引/着色器资源/间接参数/复制源的组合
    GenericRead = 0x0_0002 | 0x0_0004 | 0x0_0008 | 0x0_0100 | 0x0_0400 | 0x0_1000,
}

impl ResourceState {
    /// 全部状态，测试与调试输出使用
    pub const ALL: [ResourceState; 20] = [
        ResourceState::Unknown,
        ResourceState::Undefined,
        ResourceState::VertexBuffer,
        ResourceState::ConstantBuffer,
        ResourceState::IndexBuffer,
        ResourceState::RenderTarget,
        ResourceState::UnorderedAccess,
        ResourceState::DepthWrite,
        ResourceState::DepthRead,
        ResourceState::ShaderResource,
        ResourceState::StreamOut,
        ResourceState::IndirectArgument,
        ResourceState::CopyDest,
        ResourceState::CopySource,
        ResourceState::ResolveDest,
        ResourceState::ResolveSource,
        ResourceState::InputAttachment,
        ResourceState::Present,
        ResourceState::Common,
        ResourceState::GenericRead,
    ];

    /// 原生状态位
    pub fn bits(self) -> u32 {
        self as u32
    }

    /// 从状态位还原，未知的位组合返回 `None`
    pub fn from_bits(bits: u32) -> Option<Self> {
        Self::ALL.iter().copied().find(|s| s.bits() == bits)
    }

    /// 状态是否受引擎跟踪
    pub fn is_known(self) -> bool {
        self != ResourceState::Unknown
    }

    /// 当前状态是否已经满足 `required`
    ///
    /// 完全相等，或当前状态是包含 `required` 的组合状态（如 `GenericRead`）。
    pub fn satisfies(self, required: ResourceState) -> bool {
        if self == required {
            return true;
        }
        let required_bits = required.bits();
        required_bits != 0 && (self.bits() & required_bits) == required_bits
    }

    /// 该状态是否包含 GPU 写访问
    pub fn is_write(self) -> bool {
        matches!(
            self,
            ResourceState::RenderTarget
                | ResourceState::UnorderedAccess
                | ResourceState::DepthWrite
                | ResourceState::StreamOut
                | ResourceState::CopyDest
                | ResourceState::ResolveDest
        )
    }

    /// 是否可以作为纹理的状态
    pub fn valid_for_texture(self) -> bool {
        !matches!(
            self,
            ResourceState::VertexBuffer
                | ResourceState::ConstantBuffer
                | ResourceState::IndexBuffer
                | ResourceState::StreamOut
                | ResourceState::IndirectArgument
        )
    }

    /// 是否可以作为缓冲区的状态
    pub fn valid_for_buffer(self) -> bool {
        !matches!(
            self,
            ResourceState::RenderTarget
                | ResourceState::DepthWrite
                | ResourceState::DepthRead
                | ResourceState::ResolveDest
                | ResourceState::ResolveSource
                | ResourceState::InputAttachment
                | ResourceState::Present
        )
    }
}

/// 状态转换模式
///
/// 每个绑定、复制、清除操作都可以单独指定。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TransitionMode {
    /// 不做任何检查，完全信任调用方
    None,
    /// 自动检查并插入屏障
    #[default]
    Transition,
    /// 只校验资源已处于所需状态（设备开启校验时生效），不插入屏障
    Verify,
}

/// 可在线程间共享的状态单元
///
/// 资源的当前状态只由立即上下文修改，延迟上下文只读取。
#[derive(Debug)]
pub struct StateCell(AtomicU32);

impl StateCell {
    pub fn new(state: ResourceState) -> Self {
        Self(AtomicU32::new(state.bits()))
    }

    pub fn get(&self) -> ResourceState {
        ResourceState::from_bits(self.0.load(Ordering::Acquire)).unwrap_or(ResourceState::Unknown)
    }

    pub fn set(&self, state: ResourceState) {
        self.0.store(state.bits(), Ordering::Release);
    }
}

/// 一次状态转换请求的结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransitionOutcome {
    /// 资源不受跟踪，跳过
    Untracked,
    /// 已处于目标状态
    AlreadyInState,
    /// 需要从 `before` 转换到 `after`
    Barrier {
        before: ResourceState,
        after: ResourceState,
    },
}

/// 计算把 `current` 转换到 `target` 需要的操作
pub fn plan_transition(current: ResourceState, target: ResourceState) -> TransitionOutcome {
    if !current.is_known() {
        TransitionOutcome::Untracked
    } else if current.satisfies(target) {
        TransitionOutcome::AlreadyInState
    } else {
        TransitionOutcome::Barrier {
            before: current,
            after: target,
        }
    }
}
