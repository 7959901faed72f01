//! 错误处理模块
//!
//! 定义了引擎中使用的统一错误类型，使用 `thiserror` 提供友好的错误消息。
//!
//! 图形错误按调用方的处理方式分类：
//!
//! - `InvalidArgument`：描述符本身有误（尺寸、对齐、标志组合、子资源数量）
//! - `Unsupported`：描述合法，但当前后端或硬件无法实现，调用方可以选择回退路径
//! - `ResourceExhausted`：驱动分配失败
//! - `StateViolation`：Verify 模式下资源状态与调用方声明的不一致
//! - `DeviceLost`：设备丢失，所有设备对象随之失效
//! - `Timeout`：有限时长的等待未能完成
//!
//! 引用计数下溢、重复提交命令列表这类契约违例不会以值的形式返回，
//! 它们在类型系统层面被排除。

use std::path::PathBuf;

use crate::renderer::state::ResourceState;

/// 引擎统一的 Result 类型
pub type Result<T> = std::result::Result<T, DistRhiError>;

/// DistRHI 的错误类型
#[derive(Debug, thiserror::Error)]
pub enum DistRhiError {
    /// 配置错误
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// 图形 API 错误
    #[error("Graphics error: {0}")]
    Graphics(#[from] GraphicsError),

    /// 截图错误
    #[error("Capture error: {0}")]
    Capture(#[from] CaptureError),

    /// IO 错误
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// 日志系统错误
    #[error("Log error: {0}")]
    Log(String),

    /// 初始化错误
    #[error("Initialization error: {0}")]
    Initialization(String),
}

/// 配置相关的错误
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// 配置文件未找到
    #[error("Config file not found: {0}")]
    FileNotFound(String),

    /// 配置文件解析失败
    #[error("Failed to parse config: {0}")]
    ParseError(String),

    /// 配置值无效
    #[error("Invalid value for '{field}': {reason}")]
    InvalidValue { field: String, reason: String },
}

/// 图形 API 相关的错误
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum GraphicsError {
    /// 描述符或参数非法
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// 当前后端不支持
    #[error("Unsupported: {0}")]
    Unsupported(String),

    /// 资源分配失败
    #[error("Resource exhausted: {0}")]
    ResourceExhausted(String),

    /// 资源状态校验失败
    #[error("Resource '{resource}' is in state {actual:?}, but {operation} requires {required:?}")]
    StateViolation {
        resource: String,
        actual: ResourceState,
        required: ResourceState,
        operation: String,
    },

    /// 设备丢失
    #[error("Device lost: {0}")]
    DeviceLost(String),

    /// 等待超时
    #[error("Timed out: {0}")]
    Timeout(String),

    /// 该操作不能在此类上下文上执行
    #[error("Operation '{0}' is not allowed on this context")]
    WrongContext(String),
}

/// 截图保存与比对的错误
#[derive(Debug, thiserror::Error)]
pub enum CaptureError {
    /// 像素格式无法编码
    #[error("Capture format {0} cannot be encoded as an image")]
    UnsupportedFormat(String),

    /// 截图与金图尺寸不一致
    #[error("Golden image {path} is {golden_width}x{golden_height}, capture is {width}x{height}")]
    SizeMismatch {
        path: PathBuf,
        width: u32,
        height: u32,
        golden_width: u32,
        golden_height: u32,
    },

    /// 图像编解码失败
    #[error(transparent)]
    Image(#[from] image::ImageError),
}

impl DistRhiError {
    /// 取出内部的图形错误（如果是）
    pub fn as_graphics(&self) -> Option<&GraphicsError> {
        match self {
            DistRhiError::Graphics(e) => Some(e),
            _ => None,
        }
    }

    pub fn is_invalid_argument(&self) -> bool {
        matches!(self.as_graphics(), Some(GraphicsError::InvalidArgument(_)))
    }

    pub fn is_unsupported(&self) -> bool {
        matches!(self.as_graphics(), Some(GraphicsError::Unsupported(_)))
    }

    pub fn is_state_violation(&self) -> bool {
        matches!(self.as_graphics(), Some(GraphicsError::StateViolation { .. }))
    }

    pub fn is_device_lost(&self) -> bool {
        matches!(self.as_graphics(), Some(GraphicsError::DeviceLost(_)))
    }

    pub fn is_resource_exhausted(&self) -> bool {
        matches!(self.as_graphics(), Some(GraphicsError::ResourceExhausted(_)))
    }
}

/// 构造 `InvalidArgument` 错误的便捷函数
pub(crate) fn invalid_argument(msg: impl Into<String>) -> DistRhiError {
    GraphicsError::InvalidArgument(msg.into()).into()
}

/// 构造 `Unsupported` 错误的便捷函数
pub(crate) fn unsupported(msg: impl Into<String>) -> DistRhiError {
    GraphicsError::Unsupported(msg.into()).into()
}

pub(crate) fn wrong_context(operation: &str) -> DistRhiError {
    GraphicsError::WrongContext(operation.to_string()).into()
}
