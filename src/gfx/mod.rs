//! 图形后端模块
//!
//! `backend` 定义了设备与上下文使用的原生接口 `NativeBackend`，
//! 具体图形 API 的实现放在各自的子模块中。目前提供：
//!
//! - `null`：软件模拟后端，命令在 CPU 上执行

pub mod backend;
pub mod null;

use std::sync::Arc;

use crate::core::config::{BackendKind, DeviceConfig};
use crate::core::error::{unsupported, Result};

pub use backend::{NativeBackend, NativeHandle, NativeWindow};
pub use null::{NullBackend, NullStats};

/// 按配置创建原生后端
pub fn create_backend(config: &DeviceConfig) -> Result<Arc<dyn NativeBackend>> {
    match config.backend {
        BackendKind::Null => {
            crate::engine_info!(backend = config.backend.name(), "Initializing backend");
            Ok(Arc::new(NullBackend::from_config(config)))
        }
        other => {
            crate::engine_error!(backend = other.name(), "Backend is not available in this build");
            Err(unsupported(format!("backend {} is not available in this build", other.name())))
        }
    }
}
