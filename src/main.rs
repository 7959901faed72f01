//! DistRHI 演示程序
//!
//! 在 null 后端上跑一段无窗口的渲染循环，覆盖设备、立即/延迟上下文、
//! 交换链呈现与屏幕截图的完整流程。
//!
//! # 使用方法
//!
//! ```bash
//! # 使用配置文件
//! cargo run
//!
//! # 渲染 120 帧并截取 3 帧
//! cargo run -- --frames 120 --capture-dir captures --capture-frames 3
//!
//! # 与金图比对
//! cargo run -- --capture-dir golden --golden compare
//! ```
//!
//! # 每帧流程
//!
//! ```text
//! 延迟上下文记录 ──► 命令列表 ──► 立即上下文回放
//!                                      │
//!                           截图（复制 + Fence signal）
//!                                      │
//!                                   呈现 ──► 取回已完成的截图
//! ```

use std::sync::Arc;

use anyhow::Context;

use dist_rhi::core::config::{Config, GoldenImageMode};
use dist_rhi::core::log;
use dist_rhi::gfx::{self, NativeWindow};
use dist_rhi::renderer::pipeline::VariableRole;
use dist_rhi::renderer::{
    BindFlags, Buffer, BufferDesc, CaptureSchedule, DeviceContext, DrawAttribs, PipelineState, PipelineStateDesc,
    RenderDevice, ScreenCapture, ShaderDesc, ShaderResourceBinding, ShaderStage, SwapChain, SwapChainDesc,
    TransitionMode,
};

/// 每帧更新的常量
#[repr(C)]
#[derive(Debug, Clone, Copy, bytemuck::Pod, bytemuck::Zeroable)]
struct FrameConstants {
    time: f32,
    frame: u32,
    _padding: [u32; 2],
}

/// 演示场景：一个三角形管线及其资源
struct DemoScene {
    pipeline: Arc<PipelineState>,
    srb: Arc<ShaderResourceBinding>,
    vertex_buffer: Arc<Buffer>,
    constants: Arc<Buffer>,
}

impl DemoScene {
    fn new(device: &Arc<RenderDevice>, swap_chain: &SwapChain) -> dist_rhi::core::Result<Self> {
        // null 后端不解析字节码，这里只需要非空即可
        let vs = device.create_shader(&ShaderDesc::new("Triangle VS", ShaderStage::Vertex, b"DXBC-vs".to_vec()))?;
        let ps = device.create_shader(&ShaderDesc::new("Triangle PS", ShaderStage::Pixel, b"DXBC-ps".to_vec()))?;

        let sc_desc = swap_chain.desc();
        let pipeline = device.create_pipeline_state(
            &PipelineStateDesc::graphics("Triangle PSO", vs, Some(ps))
                .with_render_targets(&[sc_desc.color_format], sc_desc.depth_format)
                .with_variable("Constants", VariableRole::ConstantBuffer),
        )?;

        let vertices: [[f32; 3]; 3] = [[0.0, 0.5, 0.0], [0.5, -0.5, 0.0], [-0.5, -0.5, 0.0]];
        let vertex_buffer = device.create_buffer_from_slice(
            &BufferDesc::new(std::mem::size_of_val(&vertices) as u64, BindFlags::VERTEX_BUFFER).with_name("Triangle VB"),
            &vertices,
        )?;
        let constants = device.create_buffer(
            &BufferDesc::new(std::mem::size_of::<FrameConstants>() as u64, BindFlags::UNIFORM_BUFFER)
                .with_name("Frame constants"),
            None,
        )?;

        let srb = pipeline.create_shader_resource_binding();
        srb.set("Constants", Arc::clone(&constants))?;

        Ok(Self {
            pipeline,
            srb,
            vertex_buffer,
            constants,
        })
    }

    /// 在任意上下文上记录一帧的绘制
    fn record(&self, ctx: &mut DeviceContext, swap_chain: &SwapChain, frame: u32) -> dist_rhi::core::Result<()> {
        let t = frame as f32 / 60.0;
        let constants = FrameConstants {
            time: t,
            frame,
            _padding: [0; 2],
        };
        ctx.update_buffer(&self.constants, 0, bytemuck::bytes_of(&constants), TransitionMode::Transition)?;

        let rtv = swap_chain.current_back_buffer_rtv();
        let dsv = swap_chain.depth_buffer_dsv();
        ctx.set_render_targets(&[Arc::clone(&rtv)], dsv.as_ref(), TransitionMode::Transition)?;
        ctx.clear_render_target(&rtv, [0.1, 0.2 + 0.1 * t.sin(), 0.3, 1.0], TransitionMode::Verify)?;

        ctx.set_pipeline_state(&self.pipeline)?;
        ctx.commit_shader_resources(&self.srb, TransitionMode::Transition)?;
        ctx.set_vertex_buffers(0, &[(Arc::clone(&self.vertex_buffer), 0)], true, TransitionMode::Transition)?;
        ctx.draw(&DrawAttribs::new(3))
    }
}

fn main() -> anyhow::Result<()> {
    // 1. 加载配置并应用命令行参数
    let mut config = Config::from_file_or_default("config.toml");
    config.apply_args(std::env::args());
    config.validate().context("invalid configuration")?;

    // 2. 初始化日志系统
    let log_file = config.logging.file_output.then_some(config.logging.log_file.as_str());
    log::init_logger(config.logging.level, config.logging.file_output, log_file)
        .context("failed to initialize logging")?;
    dist_rhi::app_info!(version = env!("CARGO_PKG_VERSION"), "DistRHI demo starting...");
    dist_rhi::app_info!(
        backend = config.device.backend.name(),
        width = config.swap_chain.width,
        height = config.swap_chain.height,
        frames = config.demo.frames,
        "Configuration loaded"
    );

    // 3. 创建后端、设备与交换链
    let backend = gfx::create_backend(&config.device).context("failed to create the native backend")?;
    let (device, mut ctx, mut deferred) =
        RenderDevice::create(backend, &config.device).context("failed to create the render device")?;
    let swap_chain = device
        .create_swap_chain(&mut ctx, NativeWindow(0), &SwapChainDesc::from(&config.swap_chain))
        .context("failed to create the swap chain")?;

    let scene = DemoScene::new(&device, &swap_chain).context("failed to create the demo scene")?;
    let capture = ScreenCapture::new(&device)?;
    let mut schedule = CaptureSchedule::new(&config.capture);
    let mut golden_failures = 0u32;

    // 4. 渲染循环
    for frame in 0..config.demo.frames {
        let time = f64::from(frame) / 60.0;

        // 奇数帧在延迟上下文上记录，偶数帧直接在立即上下文上绘制
        match deferred.first_mut() {
            Some(recorder) if frame % 2 == 1 => {
                scene.record(recorder, &swap_chain, frame)?;
                let list = recorder.finish_command_list()?;
                ctx.execute_command_list(list)?;
            }
            _ => scene.record(&mut ctx, &swap_chain, frame)?,
        }

        if let Some(capture_id) = schedule.should_capture(time) {
            capture.capture(&swap_chain, &mut ctx, capture_id)?;
        }
        swap_chain.present_default(&mut ctx)?;

        golden_failures += drain_captures(&capture, &schedule, &mut ctx)?;
    }

    // 5. 等待 GPU 完成并处理剩余的截图
    ctx.wait_for_idle()?;
    golden_failures += drain_captures(&capture, &schedule, &mut ctx)?;

    let stats = ctx.stats();
    dist_rhi::app_info!(
        frames = swap_chain.frame_count(),
        barriers = stats.barriers,
        draws = stats.draws,
        command_lists = stats.command_lists_executed,
        flushes = stats.flushes,
        stale_objects = device.stale_resource_count(),
        "Demo finished"
    );

    if golden_failures > 0 {
        dist_rhi::app_error!(failures = golden_failures, "Golden image comparison failed");
        anyhow::bail!("{} captures differ from the golden images", golden_failures);
    }
    Ok(())
}

/// 处理所有已完成的截图，返回金图比对失败的数量
fn drain_captures(capture: &ScreenCapture, schedule: &CaptureSchedule, ctx: &mut DeviceContext) -> anyhow::Result<u32> {
    let mut failures = 0;
    while let Some(info) = capture.get_capture() {
        let frame_id = info.frame_id;
        match schedule.process(ctx, &info) {
            Ok(Some(diff)) if diff > 0 && schedule.golden_mode == GoldenImageMode::Compare => {
                dist_rhi::app_warn!(frame_id, diff, "Capture does not match its golden image");
                failures += 1;
            }
            Ok(_) => {}
            Err(err) => {
                dist_rhi::app_error!(frame_id, error = %err, "Failed to process capture");
                return Err(err.into());
            }
        }
        capture.recycle_staging_texture(info.texture);
    }
    Ok(failures)
}
