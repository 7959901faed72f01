//! 配置管理模块
//!
//! 提供设备、交换链、截图与日志配置的加载、解析和校验。
//! 支持从 TOML 配置文件加载，也支持命令行参数覆盖。
//!
//! # 配置文件格式 (config.toml)
//!
//! ```toml
//! [device]
//! backend = "null"
//! validation = true
//! num_deferred_contexts = 2
//! gpu_execution = "immediate"   # immediate | manual
//! memory_budget_mb = 1024
//!
//! [swap_chain]
//! width = 800
//! height = 600
//! color_format = "rgba8_unorm_srgb"
//! depth_format = "d32_float"
//! buffer_count = 2
//! vsync = true
//!
//! [capture]
//! enabled = true
//! directory = "captures"
//! frames_to_capture = 3
//! golden_mode = "compare"
//!
//! [logging]
//! level = "info"
//! file_output = false
//! ```

use serde::{Deserialize, Serialize};
use std::path::Path;

use super::error::{ConfigError, Result};
use crate::renderer::format::TextureFormat;

/// 引擎配置
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// 设备配置
    #[serde(default)]
    pub device: DeviceConfig,

    /// 交换链配置
    #[serde(default)]
    pub swap_chain: SwapChainConfig,

    /// 截图配置
    #[serde(default)]
    pub capture: CaptureConfig,

    /// 演示程序配置
    #[serde(default)]
    pub demo: DemoConfig,

    /// 日志配置
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// 设备配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceConfig {
    /// 原生后端
    #[serde(default = "default_backend")]
    pub backend: BackendKind,

    /// 开启后 Verify 模式与绘制前状态校验才会生效
    #[serde(default = "default_validation")]
    pub validation: bool,

    /// 创建设备时附带的延迟上下文数量
    #[serde(default = "default_num_deferred_contexts")]
    pub num_deferred_contexts: u32,

    /// null 后端的 GPU 执行方式
    #[serde(default = "default_gpu_execution")]
    pub gpu_execution: GpuExecution,

    /// null 后端的显存预算（MB）
    #[serde(default = "default_memory_budget_mb")]
    pub memory_budget_mb: u64,
}

/// 原生后端类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// 软件模拟后端
    Null,
    D3d11,
    D3d12,
    Vulkan,
    Metal,
    Opengl,
}

/// GPU 执行方式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GpuExecution {
    /// 提交即执行
    Immediate,
    /// 提交后排队，直到显式推进
    Manual,
}

/// 交换链配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SwapChainConfig {
    #[serde(default = "default_width")]
    pub width: u32,

    #[serde(default = "default_height")]
    pub height: u32,

    /// 后台缓冲区格式
    #[serde(default = "default_color_format")]
    pub color_format: TextureFormat,

    /// 深度缓冲区格式，为空表示不创建
    #[serde(default = "default_depth_format")]
    pub depth_format: Option<TextureFormat>,

    /// 后台缓冲区数量
    #[serde(default = "default_buffer_count")]
    pub buffer_count: u32,

    /// 垂直同步
    #[serde(default = "default_vsync")]
    pub vsync: bool,
}

/// 截图配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CaptureConfig {
    #[serde(default)]
    pub enabled: bool,

    /// 输出目录
    #[serde(default = "default_capture_directory")]
    pub directory: String,

    /// 文件名前缀
    #[serde(default = "default_capture_file_name")]
    pub file_name: String,

    /// 需要截取的帧数
    #[serde(default = "default_frames_to_capture")]
    pub frames_to_capture: u32,

    /// 截图频率
    #[serde(default = "default_capture_fps")]
    pub capture_fps: f64,

    /// 保存 PNG 时是否保留 alpha 通道
    #[serde(default)]
    pub keep_alpha: bool,

    /// 金图模式
    #[serde(default = "default_golden_mode")]
    pub golden_mode: GoldenImageMode,

    /// 每个通道允许的最大差值
    #[serde(default)]
    pub golden_tolerance: u8,
}

/// 金图模式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GoldenImageMode {
    /// 只保存截图
    None,
    /// 将截图保存为金图
    Capture,
    /// 与金图比对
    Compare,
    /// 比对后用新截图覆盖金图
    CompareUpdate,
}

/// 演示程序配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DemoConfig {
    /// 渲染帧数
    #[serde(default = "default_frames")]
    pub frames: u32,
}

/// 日志配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// 日志级别
    #[serde(default = "default_log_level")]
    pub level: LogLevel,

    /// 是否输出到文件
    #[serde(default = "default_file_output")]
    pub file_output: bool,

    /// 日志文件路径
    #[serde(default = "default_log_file")]
    pub log_file: String,
}

/// 日志级别
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

// 默认值函数
fn default_backend() -> BackendKind { BackendKind::Null }
fn default_validation() -> bool { cfg!(debug_assertions) }
fn default_num_deferred_contexts() -> u32 { 2 }
fn default_gpu_execution() -> GpuExecution { GpuExecution::Immediate }
fn default_memory_budget_mb() -> u64 { 1024 }
fn default_width() -> u32 { 800 }
fn default_height() -> u32 { 600 }
fn default_color_format() -> TextureFormat { TextureFormat::Rgba8UnormSrgb }
fn default_depth_format() -> Option<TextureFormat> { Some(TextureFormat::D32Float) }
fn default_buffer_count() -> u32 { 2 }
fn default_vsync() -> bool { true }
fn default_capture_directory() -> String { "captures".to_string() }
fn default_capture_file_name() -> String { "frame".to_string() }
fn default_frames_to_capture() -> u32 { 1 }
fn default_capture_fps() -> f64 { 30.0 }
fn default_golden_mode() -> GoldenImageMode { GoldenImageMode::None }
fn default_frames() -> u32 { 8 }
fn default_log_level() -> LogLevel { LogLevel::Info }
fn default_file_output() -> bool { false }
fn default_log_file() -> String { "dist_rhi.log".to_string() }

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            backend: default_backend(),
            validation: default_validation(),
            num_deferred_contexts: default_num_deferred_contexts(),
            gpu_execution: default_gpu_execution(),
            memory_budget_mb: default_memory_budget_mb(),
        }
    }
}

impl Default for SwapChainConfig {
    fn default() -> Self {
        Self {
            width: default_width(),
            height: default_height(),
            color_format: default_color_format(),
            depth_format: default_depth_format(),
            buffer_count: default_buffer_count(),
            vsync: default_vsync(),
        }
    }
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            directory: default_capture_directory(),
            file_name: default_capture_file_name(),
            frames_to_capture: default_frames_to_capture(),
            capture_fps: default_capture_fps(),
            keep_alpha: false,
            golden_mode: default_golden_mode(),
            golden_tolerance: 0,
        }
    }
}

impl Default for DemoConfig {
    fn default() -> Self {
        Self { frames: default_frames() }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            file_output: default_file_output(),
            log_file: default_log_file(),
        }
    }
}

impl Config {
    /// 从配置文件加载
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path_str = path.as_ref().to_string_lossy().to_string();

        let contents = std::fs::read_to_string(path)
            .map_err(|_| ConfigError::FileNotFound(path_str.clone()))?;

        toml::from_str(&contents)
            .map_err(|e| ConfigError::ParseError(e.to_string()).into())
    }

    /// 从配置文件加载，如果文件不存在或无法解析则使用默认配置
    pub fn from_file_or_default<P: AsRef<Path>>(path: P) -> Self {
        Self::from_file(path).unwrap_or_default()
    }

    /// 保存配置到文件
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let contents = toml::to_string_pretty(self)
            .map_err(|e| ConfigError::ParseError(e.to_string()))?;

        std::fs::write(path, contents)?;
        Ok(())
    }

    /// 从命令行参数覆盖配置
    ///
    /// 支持的参数：
    /// - `--width <value>` / `--height <value>`：交换链尺寸
    /// - `--frames <value>`：渲染帧数
    /// - `--manual-gpu`：null 后端改为手动推进
    /// - `--no-validation`：关闭状态校验
    /// - `--capture-dir <dir>`：开启截图并指定输出目录
    /// - `--capture-frames <value>`：截图帧数
    /// - `--golden <none|capture|compare|compare_update>`：金图模式
    pub fn apply_args<I>(&mut self, args: I)
    where
        I: IntoIterator,
        I::Item: AsRef<str>,
    {
        let args: Vec<String> = args.into_iter().map(|s| s.as_ref().to_string()).collect();
        let value_of = |flag: &str| -> Option<&String> {
            args.iter()
                .position(|a| a == flag)
                .and_then(|idx| args.get(idx + 1))
        };

        if let Some(width) = value_of("--width").and_then(|v| v.parse().ok()) {
            self.swap_chain.width = width;
        }
        if let Some(height) = value_of("--height").and_then(|v| v.parse().ok()) {
            self.swap_chain.height = height;
        }
        if let Some(frames) = value_of("--frames").and_then(|v| v.parse().ok()) {
            self.demo.frames = frames;
        }
        if args.iter().any(|a| a == "--manual-gpu") {
            self.device.gpu_execution = GpuExecution::Manual;
        }
        if args.iter().any(|a| a == "--no-validation") {
            self.device.validation = false;
        }
        if let Some(dir) = value_of("--capture-dir") {
            self.capture.enabled = true;
            self.capture.directory = dir.clone();
        }
        if let Some(frames) = value_of("--capture-frames").and_then(|v| v.parse().ok()) {
            self.capture.frames_to_capture = frames;
        }
        if let Some(mode) = value_of("--golden") {
            match mode.as_str() {
                "none" => self.capture.golden_mode = GoldenImageMode::None,
                "capture" => self.capture.golden_mode = GoldenImageMode::Capture,
                "compare" => self.capture.golden_mode = GoldenImageMode::Compare,
                "compare_update" => self.capture.golden_mode = GoldenImageMode::CompareUpdate,
                other => tracing::warn!(mode = other, "Unknown golden image mode, ignored"),
            }
        }
    }

    /// 验证配置的有效性
    pub fn validate(&self) -> Result<()> {
        let sc = &self.swap_chain;
        if sc.width == 0 || sc.height == 0 {
            return Err(invalid("swap_chain.width/height", "Swap chain dimensions must be greater than 0"));
        }

        if !(1..=8).contains(&sc.buffer_count) {
            return Err(invalid("swap_chain.buffer_count", "Buffer count must be between 1 and 8"));
        }

        if sc.color_format.attribs().is_depth() {
            return Err(invalid("swap_chain.color_format", "Color format must not be a depth format"));
        }

        if let Some(depth) = sc.depth_format {
            if !depth.attribs().is_depth() {
                return Err(invalid("swap_chain.depth_format", "Depth format must be a depth or depth-stencil format"));
            }
        }

        if self.capture.capture_fps <= 0.0 {
            return Err(invalid("capture.capture_fps", "Capture FPS must be positive"));
        }

        Ok(())
    }
}

fn invalid(field: &str, reason: &str) -> super::error::DistRhiError {
    ConfigError::InvalidValue {
        field: field.to_string(),
        reason: reason.to_string(),
    }
    .into()
}

impl BackendKind {
    /// 获取后端名称
    pub fn name(&self) -> &'static str {
        match self {
            BackendKind::Null => "Null",
            BackendKind::D3d11 => "Direct3D 11",
            BackendKind::D3d12 => "Direct3D 12",
            BackendKind::Vulkan => "Vulkan",
            BackendKind::Metal => "Metal",
            BackendKind::Opengl => "OpenGL",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.swap_chain.width, 800);
        assert_eq!(config.swap_chain.height, 600);
        assert_eq!(config.device.backend, BackendKind::Null);
        assert_eq!(config.swap_chain.color_format, TextureFormat::Rgba8UnormSrgb);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_validation() {
        let mut config = Config::default();
        config.swap_chain.width = 0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.swap_chain.buffer_count = 9;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.swap_chain.depth_format = Some(TextureFormat::Rgba8Unorm);
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.swap_chain.color_format = TextureFormat::D32Float;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_apply_args() {
        let mut config = Config::default();
        config.apply_args([
            "dist_rhi", "--width", "320", "--height", "240", "--manual-gpu",
            "--no-validation", "--capture-dir", "out", "--golden", "compare",
        ]);
        assert_eq!(config.swap_chain.width, 320);
        assert_eq!(config.swap_chain.height, 240);
        assert_eq!(config.device.gpu_execution, GpuExecution::Manual);
        assert!(!config.device.validation);
        assert!(config.capture.enabled);
        assert_eq!(config.capture.directory, "out");
        assert_eq!(config.capture.golden_mode, GoldenImageMode::Compare);
    }

    #[test]
    fn test_parse_partial_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            "[swap_chain]\nwidth = 64\ncolor_format = \"bgra8_unorm\"\n\n[device]\ngpu_execution = \"manual\"\n",
        )
        .unwrap();

        let config = Config::from_file(&path).unwrap();
        assert_eq!(config.swap_chain.width, 64);
        assert_eq!(config.swap_chain.height, 600);
        assert_eq!(config.swap_chain.color_format, TextureFormat::Bgra8Unorm);
        assert_eq!(config.device.gpu_execution, GpuExecution::Manual);
        assert_eq!(config.demo.frames, 8);
    }

    #[test]
    fn test_save_and_reload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("saved.toml");

        let mut config = Config::default();
        config.capture.frames_to_capture = 5;
        config.save_to_file(&path).unwrap();

        let loaded = Config::from_file(&path).unwrap();
        assert_eq!(loaded.capture.frames_to_capture, 5);
        assert_eq!(loaded.swap_chain.depth_format, Some(TextureFormat::D32Float));
    }

    #[test]
    fn test_missing_file_falls_back() {
        let config = Config::from_file_or_default("definitely/not/here.toml");
        assert_eq!(config.demo.frames, 8);
        assert!(Config::from_file("definitely/not/here.toml").is_err());
    }
}
