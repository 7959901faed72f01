//! 屏幕截图
//!
//! 典型的异步回读流程：
//!
//! 1. `capture` 把后台缓冲区复制到中转纹理，并在命令流中写入 Fence signal
//! 2. 若干帧之后 `has_capture` 发现队首条目的 Fence 值已完成
//! 3. `get_capture` 取出纹理供 CPU 读取，用完后 `recycle_staging_texture` 放回池中
//!
//! 待取条目严格按提交顺序排队，只有队首可以被取走。

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::core::config::{CaptureConfig, GoldenImageMode};
use crate::core::error::{CaptureError, Result};
use crate::renderer::context::{CopyTextureAttribs, DeviceContext};
use crate::renderer::device::RenderDevice;
use crate::renderer::format::TextureFormat;
use crate::renderer::resources::{Texture, TextureDesc};
use crate::renderer::swap_chain::SwapChain;
use crate::renderer::sync::{Fence, FenceDesc};

/// 已完成的截图
#[derive(Debug, Clone)]
pub struct CaptureInfo {
    pub texture: Arc<Texture>,
    pub frame_id: u32,
}

#[derive(Debug)]
struct PendingCapture {
    texture: Arc<Texture>,
    frame_id: u32,
    fence_value: u64,
}

/// 屏幕截图器
#[derive(Debug)]
pub struct ScreenCapture {
    device: Arc<RenderDevice>,
    fence: Arc<Fence>,
    next_fence_value: Mutex<u64>,
    available: Mutex<Vec<Arc<Texture>>>,
    pending: Mutex<VecDeque<PendingCapture>>,
}

impl ScreenCapture {
    pub fn new(device: &Arc<RenderDevice>) -> Result<Self> {
        let fence = device.create_fence(&FenceDesc::default().with_name("Screen capture fence"))?;
        Ok(Self {
            device: Arc::clone(device),
            fence,
            next_fence_value: Mutex::new(1),
            available: Mutex::new(Vec::new()),
            pending: Mutex::new(VecDeque::new()),
        })
    }

    /// 复制交换链当前的后台缓冲区
    ///
    /// 不会提交命令，复制随下一次 `flush`（通常是呈现）一起提交。
    pub fn capture(&self, swap_chain: &SwapChain, ctx: &mut DeviceContext, frame_id: u32) -> Result<()> {
        let back_buffer = swap_chain.current_back_buffer();
        let desc = back_buffer.desc();

        let staging = match self.take_pooled(desc.width, desc.height, desc.format) {
            Some(texture) => texture,
            None => {
                let staging_desc = TextureDesc::readback_2d(desc.width, desc.height, desc.format)
                    .with_name("Screen capture staging texture");
                self.device.create_texture(&staging_desc, &[])?
            }
        };

        ctx.copy_texture(&CopyTextureAttribs::new(&back_buffer, &staging))?;

        let fence_value = {
            let mut next = self.next_fence_value.lock();
            let value = *next;
            *next += 1;
            value
        };
        ctx.signal_fence(&self.fence, fence_value)?;

        crate::engine_debug!(frame_id, fence_value, "Screen capture queued");
        self.pending.lock().push_back(PendingCapture {
            texture: staging,
            frame_id,
            fence_value,
        });
        Ok(())
    }

    /// 池中取出尺寸与格式都匹配的纹理，不匹配的直接丢弃
    fn take_pooled(&self, width: u32, height: u32, format: TextureFormat) -> Option<Arc<Texture>> {
        let mut available = self.available.lock();
        while let Some(texture) = available.pop() {
            let desc = texture.desc();
            if desc.width == width && desc.height == height && desc.format == format {
                return Some(texture);
            }
            crate::engine_trace!(texture = %desc.name, "Discarding pooled capture texture with a stale size");
        }
        None
    }

    /// 队首截图是否已经完成
    pub fn has_capture(&self) -> bool {
        let completed = self.fence.completed_value();
        self.pending.lock().front().is_some_and(|p| p.fence_value <= completed)
    }

    /// 取出已完成的队首截图
    pub fn get_capture(&self) -> Option<CaptureInfo> {
        let completed = self.fence.completed_value();
        let mut pending = self.pending.lock();
        if pending.front().is_some_and(|p| p.fence_value <= completed) {
            pending.pop_front().map(|p| CaptureInfo {
                texture: p.texture,
                frame_id: p.frame_id,
            })
        } else {
            None
        }
    }

    /// 把用完的中转纹理放回池中
    pub fn recycle_staging_texture(&self, texture: Arc<Texture>) {
        self.available.lock().push(texture);
    }

    pub fn pending_count(&self) -> usize {
        self.pending.lock().len()
    }

    pub fn available_count(&self) -> usize {
        self.available.lock().len()
    }

    pub fn fence(&self) -> &Arc<Fence> {
        &self.fence
    }
}

/// 把截图读成紧密排列的 RGBA8 像素
fn read_rgba8(ctx: &mut DeviceContext, capture: &CaptureInfo) -> Result<(u32, u32, Vec<u8>)> {
    let format = capture.texture.desc().format;
    let swizzle = match format {
        TextureFormat::Rgba8Unorm | TextureFormat::Rgba8UnormSrgb => false,
        TextureFormat::Bgra8Unorm | TextureFormat::Bgra8UnormSrgb => true,
        other => return Err(CaptureError::UnsupportedFormat(other.to_string()).into()),
    };

    let mapped = ctx.map_texture_subresource(&capture.texture, 0, 0)?;
    let mut pixels = Vec::with_capacity((mapped.width * mapped.height * 4) as usize);
    for row in mapped.data.chunks(mapped.row_stride as usize).take(mapped.height as usize) {
        for px in row[..(mapped.width * 4) as usize].chunks_exact(4) {
            if swizzle {
                pixels.extend_from_slice(&[px[2], px[1], px[0], px[3]]);
            } else {
                pixels.extend_from_slice(px);
            }
        }
    }
    Ok((mapped.width, mapped.height, pixels))
}

/// 把截图保存为 PNG
pub fn save_capture_png(ctx: &mut DeviceContext, capture: &CaptureInfo, path: &Path, keep_alpha: bool) -> Result<()> {
    let (width, height, mut pixels) = read_rgba8(ctx, capture)?;
    if !keep_alpha {
        pixels.chunks_exact_mut(4).for_each(|px| px[3] = 255);
    }
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    image::save_buffer(path, &pixels, width, height, image::ColorType::Rgba8).map_err(CaptureError::from)?;
    crate::engine_info!(path = %path.display(), frame_id = capture.frame_id, "Capture saved");
    Ok(())
}

/// 与金图比对，返回 RGB 任一通道差值超过 `tolerance` 的像素数
pub fn compare_with_golden(ctx: &mut DeviceContext, capture: &CaptureInfo, path: &Path, tolerance: u8) -> Result<u32> {
    let (width, height, pixels) = read_rgba8(ctx, capture)?;
    let golden = image::open(path).map_err(CaptureError::from)?.to_rgba8();
    if golden.width() != width || golden.height() != height {
        return Err(CaptureError::SizeMismatch {
            path: path.to_path_buf(),
            width,
            height,
            golden_width: golden.width(),
            golden_height: golden.height(),
        }
        .into());
    }

    let diff = pixels
        .chunks_exact(4)
        .zip(golden.as_raw().chunks_exact(4))
        .filter(|(a, b)| (0..3).any(|c| a[c].abs_diff(b[c]) > tolerance))
        .count() as u32;
    if diff > 0 {
        crate::engine_warn!(path = %path.display(), frame_id = capture.frame_id, diff, "Capture differs from golden image");
    }
    Ok(diff)
}

/// 截图调度
///
/// 按配置的帧率截取指定数量的帧，并生成输出文件名。
#[derive(Debug, Clone)]
pub struct CaptureSchedule {
    directory: PathBuf,
    file_name: String,
    frames_remaining: u32,
    capture_interval: f64,
    last_capture_time: Option<f64>,
    next_frame_id: u32,
    pub keep_alpha: bool,
    pub golden_mode: GoldenImageMode,
    pub golden_tolerance: u8,
}

impl CaptureSchedule {
    pub fn new(config: &CaptureConfig) -> Self {
        Self {
            directory: PathBuf::from(&config.directory),
            file_name: config.file_name.clone(),
            frames_remaining: if config.enabled { config.frames_to_capture } else { 0 },
            capture_interval: 1.0 / config.capture_fps,
            last_capture_time: None,
            next_frame_id: 0,
            keep_alpha: config.keep_alpha,
            golden_mode: config.golden_mode,
            golden_tolerance: config.golden_tolerance,
        }
    }

    /// 在时刻 `time`（秒）是否应当截图；返回本次截图的帧编号
    pub fn should_capture(&mut self, time: f64) -> Option<u32> {
        if self.frames_remaining == 0 {
            return None;
        }
        if let Some(last) = self.last_capture_time {
            if time - last < self.capture_interval {
                return None;
            }
        }
        self.last_capture_time = Some(time);
        self.frames_remaining -= 1;
        let id = self.next_frame_id;
        self.next_frame_id += 1;
        Some(id)
    }

    pub fn frames_remaining(&self) -> u32 {
        self.frames_remaining
    }

    /// 截图文件路径：`<dir>/<name><id:03>.png`
    pub fn file_path(&self, frame_id: u32) -> PathBuf {
        self.directory.join(format!("{}{:03}.png", self.file_name, frame_id))
    }

    /// 处理一张已完成的截图：保存或与金图比对
    ///
    /// 比对模式返回差异像素数。
    pub fn process(&self, ctx: &mut DeviceContext, capture: &CaptureInfo) -> Result<Option<u32>> {
        let path = self.file_path(capture.frame_id);
        match self.golden_mode {
            GoldenImageMode::None | GoldenImageMode::Capture => {
                save_capture_png(ctx, capture, &path, self.keep_alpha)?;
                Ok(None)
            }
            GoldenImageMode::Compare => compare_with_golden(ctx, capture, &path, self.golden_tolerance).map(Some),
            GoldenImageMode::CompareUpdate => {
                let diff = compare_with_golden(ctx, capture, &path, self.golden_tolerance)?;
                save_capture_png(ctx, capture, &path, self.keep_alpha)?;
                Ok(Some(diff))
            }
        }
    }
}
