//! 软件模拟的 null 后端
//!
//! 不依赖任何图形 API，命令在 CPU 上按提交顺序执行。
//! 用于测试、无头运行以及截图金图比对。
//!
//! - `backend` - NullBackend（命令执行、Fence、呈现、统计）
//! - `storage` - 原生对象与像素编码

mod backend;
mod storage;

pub use backend::{NullBackend, NullStats};
