//! 核心功能模块
//!
//! 本模块提供与图形后端无关的基础设施：日志系统、配置管理和错误处理。
//!
//! - `log`：日志系统，提供结构化的日志记录功能
//! - `config`：配置管理，支持从配置文件加载设备与交换链设置
//! - `error`：错误处理，定义统一的错误类型

pub mod log;
pub mod config;
pub mod error;

pub use error::{Result, DistRhiError, GraphicsError};
pub use config::Config;
