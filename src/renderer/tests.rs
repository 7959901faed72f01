//! 设备、上下文、交换链与截图的端到端测试，全部运行在 null 后端上

use std::sync::Arc;

use crate::core::config::{DeviceConfig, GpuExecution};
use crate::core::error::{CaptureError, DistRhiError, GraphicsError};
use crate::gfx::{NativeWindow, NullBackend};
use crate::renderer::capture::{compare_with_golden, save_capture_png, ScreenCapture};
use crate::renderer::context::{
    CopyTextureAttribs, DeviceContext, DispatchComputeAttribs, DrawAttribs, DrawIndexedAttribs, IndexType, MapFlags,
    ResolveTextureSubresourceAttribs, StateTransitionDesc,
};
use crate::renderer::device::RenderDevice;
use crate::renderer::format::TextureFormat;
use crate::renderer::object::{query_interface, reference_count, DeviceObject, InterfaceId};
use crate::renderer::pipeline::{PipelineState, PipelineStateDesc, ShaderDesc, ShaderStage, VariableRole};
use crate::renderer::resources::{
    BindFlags, Buffer, BufferDesc, BufferMode, BufferViewType, CpuAccessFlags, FilterType, ResourceDimension, SamplerDesc,
    SubresourceData, Texture, TextureDesc, TextureViewType, Usage,
};
use crate::renderer::state::{ResourceState, TransitionMode};
use crate::renderer::swap_chain::{SwapChain, SwapChainDesc};
use crate::renderer::sync::FenceDesc;

struct TestDevice {
    backend: Arc<NullBackend>,
    device: Arc<RenderDevice>,
    ctx: DeviceContext,
    deferred: Vec<DeviceContext>,
}

fn create_device(execution: GpuExecution, validation: bool) -> TestDevice {
    let backend = Arc::new(NullBackend::new(execution));
    let config = DeviceConfig {
        validation,
        num_deferred_contexts: 1,
        gpu_execution: execution,
        ..DeviceConfig::default()
    };
    let (device, ctx, deferred) = RenderDevice::create(backend.clone(), &config).unwrap();
    TestDevice {
        backend,
        device,
        ctx,
        deferred,
    }
}

fn render_target(device: &Arc<RenderDevice>, size: u32) -> Arc<Texture> {
    let desc = TextureDesc::tex2d(
        size,
        size,
        TextureFormat::Rgba8Unorm,
        BindFlags::RENDER_TARGET | BindFlags::SHADER_RESOURCE,
    )
    .with_name("Test render target");
    device.create_texture(&desc, &[]).unwrap()
}

fn small_swap_chain(t: &mut TestDevice, format: TextureFormat) -> Arc<SwapChain> {
    let desc = SwapChainDesc {
        width: 4,
        height: 4,
        color_format: format,
        depth_format: None,
        ..SwapChainDesc::default()
    };
    t.device.create_swap_chain(&mut t.ctx, NativeWindow(0), &desc).unwrap()
}

fn graphics_pipeline(device: &Arc<RenderDevice>) -> Arc<PipelineState> {
    let vs = device
        .create_shader(&ShaderDesc::new("VS", ShaderStage::Vertex, vec![1, 2, 3, 4]))
        .unwrap();
    device
        .create_pipeline_state(
            &PipelineStateDesc::graphics("Graphics PSO", vs, None).with_render_targets(&[TextureFormat::Rgba8Unorm], None),
        )
        .unwrap()
}

fn compute_pipeline(device: &Arc<RenderDevice>, variables: &[(&str, VariableRole)]) -> Arc<PipelineState> {
    let cs = device
        .create_shader(&ShaderDesc::new("CS", ShaderStage::Compute, vec![5, 6, 7, 8]))
        .unwrap();
    let desc = variables
        .iter()
        .fold(PipelineStateDesc::compute("Compute PSO", cs), |desc, (name, role)| {
            desc.with_variable(*name, *role)
        });
    device.create_pipeline_state(&desc).unwrap()
}

fn uav_buffer(device: &Arc<RenderDevice>) -> Arc<Buffer> {
    let desc = BufferDesc::new(256, BindFlags::UNORDERED_ACCESS)
        .with_mode(BufferMode::Structured, 16)
        .with_name("UAV buffer");
    device.create_buffer(&desc, None).unwrap()
}

fn is_wrong_context(err: &DistRhiError) -> bool {
    matches!(err.as_graphics(), Some(GraphicsError::WrongContext(_)))
}

#[test]
fn test_transition_is_idempotent() {
    let mut t = create_device(GpuExecution::Immediate, true);
    let texture = render_target(&t.device, 16);
    let rtv = texture.default_view(TextureViewType::RenderTarget).unwrap();
    assert_eq!(texture.state(), ResourceState::Undefined);

    t.ctx.clear_render_target(&rtv, [0.0; 4], TransitionMode::Transition).unwrap();
    t.ctx.clear_render_target(&rtv, [1.0; 4], TransitionMode::Transition).unwrap();
    assert_eq!(t.ctx.stats().barriers, 1);
    assert_eq!(texture.state(), ResourceState::RenderTarget);

    t.ctx.flush().unwrap();
    assert_eq!(t.backend.gpu_state(texture.native_handle().unwrap()), Some(ResourceState::RenderTarget));
    assert_eq!(t.backend.stats().barrier_mismatches, 0);
}

#[test]
fn test_reference_count_and_query_interface() {
    let t = create_device(GpuExecution::Immediate, true);
    let texture = render_target(&t.device, 8);
    assert_eq!(reference_count(&texture), 1);

    let object: Arc<dyn DeviceObject> = texture.clone();
    assert!(object.supports(InterfaceId::Resource));
    assert!(object.supports(InterfaceId::NativeResource));
    assert!(!object.supports(InterfaceId::Buffer));

    let queried = query_interface::<Texture>(&object).unwrap();
    assert!(Arc::ptr_eq(&queried, &texture));
    assert_eq!(reference_count(&texture), 3);
    assert!(query_interface::<Buffer>(&object).is_none());

    drop(queried);
    drop(object);
    assert_eq!(reference_count(&texture), 1);
}

#[test]
fn test_view_keeps_texture_alive() {
    let t = create_device(GpuExecution::Immediate, true);
    let texture = render_target(&t.device, 8);
    let srv = texture.default_view(TextureViewType::ShaderResource).unwrap();
    let again = texture.default_view(TextureViewType::ShaderResource).unwrap();
    assert!(Arc::ptr_eq(&srv, &again));
    drop(again);

    drop(texture);
    assert_eq!(t.device.stale_resource_count(), 0);
    assert_eq!(srv.texture().desc().width, 8);

    drop(srv);
    assert_eq!(t.device.stale_resource_count(), 2);
}

#[test]
fn test_uniform_buffer_size_alignment() {
    let t = create_device(GpuExecution::Immediate, true);
    let err = t
        .device
        .create_buffer(&BufferDesc::new(20, BindFlags::UNIFORM_BUFFER), None)
        .unwrap_err();
    assert!(err.is_invalid_argument());
    assert!(t.device.create_buffer(&BufferDesc::new(32, BindFlags::UNIFORM_BUFFER), None).is_ok());
}

#[test]
fn test_full_mip_chain_and_initial_data() {
    let t = create_device(GpuExecution::Immediate, true);
    let desc = TextureDesc::tex2d(256, 256, TextureFormat::Rgba8Unorm, BindFlags::SHADER_RESOURCE).with_mip_levels(0);
    let texture = t.device.create_texture(&desc, &[]).unwrap();
    assert_eq!(texture.desc().mip_levels, 9);

    let desc = TextureDesc::tex2d(8, 8, TextureFormat::Rgba8Unorm, BindFlags::SHADER_RESOURCE)
        .with_mip_levels(0)
        .with_usage(Usage::Immutable);
    let mips: Vec<Vec<u8>> = [256usize, 64, 16, 4].iter().map(|&n| vec![7u8; n]).collect();
    let data: Vec<SubresourceData> = mips.iter().map(|m| SubresourceData::Cpu(m)).collect();

    let err = t.device.create_texture(&desc, &data[..3]).unwrap_err();
    assert!(err.is_invalid_argument());

    let texture = t.device.create_texture(&desc, &data).unwrap();
    assert_eq!(texture.desc().mip_levels, 4);
    assert_eq!(texture.state(), ResourceState::CopyDest);
}

#[test]
fn test_sampler_deduplication() {
    let t = create_device(GpuExecution::Immediate, true);
    let a = t.device.create_sampler(&SamplerDesc::default().with_name("a")).unwrap();
    let b = t.device.create_sampler(&SamplerDesc::default().with_name("b")).unwrap();
    assert!(Arc::ptr_eq(&a, &b));

    let point = SamplerDesc::default().with_filter(FilterType::Point);
    let c = t.device.create_sampler(&point).unwrap();
    assert!(!Arc::ptr_eq(&a, &c));
}

#[test]
fn test_fence_values_must_increase() {
    let mut t = create_device(GpuExecution::Immediate, true);
    let fence = t.device.create_fence(&FenceDesc::default().with_name("Test fence")).unwrap();

    t.ctx.signal_fence(&fence, 1).unwrap();
    assert!(t.ctx.signal_fence(&fence, 1).unwrap_err().is_invalid_argument());
    t.ctx.signal_fence(&fence, 2).unwrap();
    assert_eq!(fence.completed_value(), 0);

    t.ctx.flush().unwrap();
    assert_eq!(fence.completed_value(), 2);
    t.ctx.wait_for_fence(&fence, 2, false).unwrap();
    assert!(t.ctx.wait_for_fence(&fence, 5, true).unwrap_err().is_invalid_argument());
}

#[test]
fn test_manual_fence_wait_drives_gpu() {
    let mut t = create_device(GpuExecution::Manual, true);
    let fence = t.device.create_fence(&FenceDesc::default()).unwrap();
    t.ctx.signal_fence(&fence, 1).unwrap();
    t.ctx.flush().unwrap();
    assert_eq!(fence.completed_value(), 0);
    assert_eq!(t.backend.pending_batches(), 1);

    t.ctx.wait_for_fence(&fence, 1, false).unwrap();
    assert_eq!(fence.completed_value(), 1);
    assert_eq!(t.backend.pending_batches(), 0);
}

#[test]
fn test_capture_roundtrip() {
    let mut t = create_device(GpuExecution::Manual, true);
    let swap_chain = small_swap_chain(&mut t, TextureFormat::Rgba8Unorm);
    let capture = ScreenCapture::new(&t.device).unwrap();

    let rtv = swap_chain.current_back_buffer_rtv();
    t.ctx.clear_render_target(&rtv, [1.0, 0.0, 0.0, 1.0], TransitionMode::Transition).unwrap();
    capture.capture(&swap_chain, &mut t.ctx, 5).unwrap();
    swap_chain.present(&mut t.ctx, 0).unwrap();

    assert!(!capture.has_capture());
    assert!(capture.get_capture().is_none());

    t.backend.process_all();
    assert!(capture.has_capture());
    let info = capture.get_capture().unwrap();
    assert_eq!(info.frame_id, 5);
    assert!(capture.get_capture().is_none());

    let mapped = t.ctx.map_texture_subresource(&info.texture, 0, 0).unwrap();
    assert_eq!((mapped.width, mapped.height), (4, 4));
    assert_eq!(&mapped.data[..4], &[255, 0, 0, 255]);

    let stats = t.backend.stats();
    assert_eq!(stats.presents, 1);
    assert_eq!(stats.present_state_violations, 0);
    assert_eq!(stats.barrier_mismatches, 0);
}

#[test]
fn test_captures_complete_in_order() {
    let mut t = create_device(GpuExecution::Manual, true);
    let swap_chain = small_swap_chain(&mut t, TextureFormat::Rgba8Unorm);
    let capture = ScreenCapture::new(&t.device).unwrap();

    for frame_id in 1..=3 {
        let rtv = swap_chain.current_back_buffer_rtv();
        t.ctx.clear_render_target(&rtv, [0.0, 1.0, 0.0, 1.0], TransitionMode::Transition).unwrap();
        capture.capture(&swap_chain, &mut t.ctx, frame_id).unwrap();
        swap_chain.present(&mut t.ctx, 1).unwrap();
    }
    assert_eq!(capture.pending_count(), 3);

    // 每帧一个命令批次加一次呈现
    t.backend.process(2);
    assert_eq!(capture.get_capture().map(|c| c.frame_id), Some(1));
    assert!(capture.get_capture().is_none());

    t.backend.process_all();
    let first = capture.get_capture().unwrap();
    assert_eq!(first.frame_id, 2);
    assert_eq!(capture.get_capture().map(|c| c.frame_id), Some(3));

    capture.recycle_staging_texture(first.texture);
    assert_eq!(capture.available_count(), 1);
    capture.capture(&swap_chain, &mut t.ctx, 4).unwrap();
    assert_eq!(capture.available_count(), 0);
}

#[test]
fn test_capture_png_and_golden_compare() {
    let mut t = create_device(GpuExecution::Immediate, true);
    let swap_chain = small_swap_chain(&mut t, TextureFormat::Bgra8Unorm);
    let capture = ScreenCapture::new(&t.device).unwrap();

    let rtv = swap_chain.current_back_buffer_rtv();
    t.ctx.clear_render_target(&rtv, [0.0, 0.0, 1.0, 1.0], TransitionMode::Transition).unwrap();
    capture.capture(&swap_chain, &mut t.ctx, 0).unwrap();
    swap_chain.present(&mut t.ctx, 0).unwrap();
    let info = capture.get_capture().unwrap();

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("frame000.png");
    save_capture_png(&mut t.ctx, &info, &path, false).unwrap();

    let image = image::open(&path).unwrap().to_rgba8();
    assert_eq!(image.dimensions(), (4, 4));
    assert_eq!(image.get_pixel(0, 0).0, [0, 0, 255, 255]);
    assert_eq!(compare_with_golden(&mut t.ctx, &info, &path, 0).unwrap(), 0);

    let small = dir.path().join("small.png");
    image::save_buffer(&small, &[0u8; 16], 2, 2, image::ColorType::Rgba8).unwrap();
    let err = compare_with_golden(&mut t.ctx, &info, &small, 0).unwrap_err();
    assert!(matches!(err, DistRhiError::Capture(CaptureError::SizeMismatch { .. })));
}

#[test]
fn test_deferred_replay_derives_barriers_from_actual_state() {
    let mut t = create_device(GpuExecution::Immediate, true);
    let source = render_target(&t.device, 16);
    let copy = render_target(&t.device, 16);
    let rtv = source.default_view(TextureViewType::RenderTarget).unwrap();

    let mut recorder = t.deferred.remove(0);
    recorder.clear_render_target(&rtv, [0.5; 4], TransitionMode::Transition).unwrap();
    recorder
        .copy_texture(&CopyTextureAttribs::new(&source, &copy))
        .unwrap();
    // 记录不会改变资源状态
    assert_eq!(source.state(), ResourceState::Undefined);
    let list = recorder.finish_command_list().unwrap();
    assert_eq!(list.len(), 2);

    // 回放前立即上下文先把源纹理转换到别的状态
    t.ctx
        .transition_resource_states(&[StateTransitionDesc::new(&source, ResourceState::ShaderResource)
            .with_old_state(ResourceState::Undefined)])
        .unwrap();
    t.ctx.execute_command_list(list).unwrap();
    t.ctx.flush().unwrap();

    assert_eq!(source.state(), ResourceState::CopySource);
    assert_eq!(copy.state(), ResourceState::CopyDest);
    let stats = t.backend.stats();
    assert_eq!(stats.barrier_mismatches, 0);
    assert_eq!(stats.barriers, 4);
    assert_eq!(t.ctx.stats().command_lists_executed, 1);
}

#[test]
fn test_deferred_replay_verifies_at_execution() {
    let mut t = create_device(GpuExecution::Immediate, true);
    let texture = render_target(&t.device, 8);
    let rtv = texture.default_view(TextureViewType::RenderTarget).unwrap();

    let mut recorder = t.deferred.remove(0);
    recorder.clear_render_target(&rtv, [0.0; 4], TransitionMode::Verify).unwrap();
    let list = recorder.finish_command_list().unwrap();

    let err = t.ctx.execute_command_list(list).unwrap_err();
    assert!(err.is_state_violation());
}

#[test]
fn test_stale_queue_prevents_use_after_free() {
    let mut t = create_device(GpuExecution::Manual, true);
    let target = render_target(&t.device, 8);
    let rtv = target.default_view(TextureViewType::RenderTarget).unwrap();
    let vs = t
        .device
        .create_shader(&ShaderDesc::new("VS", ShaderStage::Vertex, vec![1, 2, 3, 4]))
        .unwrap();
    let pso = t
        .device
        .create_pipeline_state(
            &PipelineStateDesc::graphics("PSO", vs, None).with_render_targets(&[TextureFormat::Rgba8Unorm], None),
        )
        .unwrap();
    let vertices = t
        .device
        .create_buffer_from_slice(&BufferDesc::new(36, BindFlags::VERTEX_BUFFER), &[0.0f32; 9])
        .unwrap();
    let handle = vertices.native_handle().unwrap();

    t.ctx.set_render_targets(&[rtv], None, TransitionMode::Transition).unwrap();
    t.ctx.set_pipeline_state(&pso).unwrap();
    t.ctx
        .set_vertex_buffers(0, &[(vertices.clone(), 0)], true, TransitionMode::Transition)
        .unwrap();
    t.ctx.draw(&DrawAttribs::new(3)).unwrap();
    t.ctx.flush().unwrap();

    // GPU 尚未执行绘制，此时释放最后一个引用
    t.ctx.invalidate_state();
    drop(vertices);
    t.device.release_stale_resources(false);
    assert!(t.backend.is_alive(handle));

    t.backend.process_all();
    assert_eq!(t.backend.stats().use_after_free, 0);
    assert_eq!(t.backend.stats().draws, 1);

    t.ctx.flush().unwrap();
    t.device.idle_gpu().unwrap();
    assert!(!t.backend.is_alive(handle));
    assert_eq!(t.backend.stats().use_after_free, 0);
}

#[test]
fn test_verify_mode() {
    let mut t = create_device(GpuExecution::Immediate, true);
    let texture = render_target(&t.device, 8);
    let rtv = texture.default_view(TextureViewType::RenderTarget).unwrap();

    let err = t.ctx.clear_render_target(&rtv, [0.0; 4], TransitionMode::Verify).unwrap_err();
    assert!(err.is_state_violation());
    assert_eq!(texture.state(), ResourceState::Undefined);

    t.ctx.clear_render_target(&rtv, [0.0; 4], TransitionMode::Transition).unwrap();
    t.ctx.clear_render_target(&rtv, [0.0; 4], TransitionMode::Verify).unwrap();

    // 关闭校验后 Verify 不再报错
    let mut t = create_device(GpuExecution::Immediate, false);
    let texture = render_target(&t.device, 8);
    let rtv = texture.default_view(TextureViewType::RenderTarget).unwrap();
    t.ctx.clear_render_target(&rtv, [0.0; 4], TransitionMode::Verify).unwrap();
}

#[test]
fn test_staging_resources_keep_fixed_state() {
    let mut t = create_device(GpuExecution::Immediate, true);
    let source = t
        .device
        .create_buffer(&BufferDesc::new(64, BindFlags::VERTEX_BUFFER), Some(&[9u8; 64]))
        .unwrap();
    let readback = t.device.create_buffer(&BufferDesc::readback(64), None).unwrap();
    assert_eq!(readback.state(), ResourceState::CopyDest);

    t.ctx
        .copy_buffer(&source, 0, TransitionMode::Transition, &readback, 0, 64, TransitionMode::Transition)
        .unwrap();
    // 只有源缓冲区需要转换
    assert_eq!(t.ctx.stats().barriers, 1);
    t.ctx.flush().unwrap();
    assert_eq!(t.ctx.map_buffer_read(&readback).unwrap(), vec![9u8; 64]);

    let err = t
        .ctx
        .copy_buffer(&readback, 0, TransitionMode::Transition, &source, 0, 64, TransitionMode::Transition)
        .unwrap_err();
    assert!(err.is_invalid_argument());
    assert_eq!(readback.state(), ResourceState::CopyDest);
}

#[test]
fn test_device_loss() {
    let mut t = create_device(GpuExecution::Immediate, true);
    t.backend.simulate_device_loss();

    let err = t
        .device
        .create_buffer(&BufferDesc::new(64, BindFlags::VERTEX_BUFFER), None)
        .unwrap_err();
    assert!(err.is_device_lost());
    assert!(t.device.is_lost());
    assert!(t.ctx.flush().unwrap_err().is_device_lost());
    assert!(t.device.create_fence(&FenceDesc::default()).unwrap_err().is_device_lost());
}

#[test]
fn test_resize_retires_old_buffers() {
    let mut t = create_device(GpuExecution::Immediate, true);
    let swap_chain = small_swap_chain(&mut t, TextureFormat::Rgba8Unorm);
    let old = swap_chain.current_back_buffer_rtv();
    t.ctx.bind_swap_chain_targets(TransitionMode::Transition).unwrap();

    assert!(swap_chain.resize(&mut t.ctx, 16, 16).unwrap());
    assert!(!swap_chain.resize(&mut t.ctx, 16, 16).unwrap());
    assert!(swap_chain.resize(&mut t.ctx, 0, 16).unwrap_err().is_invalid_argument());

    assert!(old.texture().is_retired());
    assert_eq!(swap_chain.current_back_buffer().desc().width, 16);
    assert_eq!(swap_chain.current_back_buffer_index(), 0);
    let err = t.ctx.set_render_targets(&[old], None, TransitionMode::Transition).unwrap_err();
    assert!(err.is_invalid_argument());

    t.ctx.bind_swap_chain_targets(TransitionMode::Transition).unwrap();
    swap_chain.present(&mut t.ctx, 1).unwrap();
    assert_eq!(t.backend.stats().present_state_violations, 0);
}

#[test]
fn test_wrong_context_operations() {
    let mut t = create_device(GpuExecution::Immediate, true);
    let swap_chain = small_swap_chain(&mut t, TextureFormat::Rgba8Unorm);
    let readback = t.device.create_buffer(&BufferDesc::readback(16), None).unwrap();
    let mut deferred = t.deferred.remove(0);

    assert!(is_wrong_context(&deferred.flush().unwrap_err()));
    assert!(is_wrong_context(&deferred.map_buffer_read(&readback).unwrap_err()));
    assert!(is_wrong_context(&swap_chain.present(&mut deferred, 1).unwrap_err()));
    assert!(is_wrong_context(&t.ctx.finish_command_list().unwrap_err()));

    let list = deferred.finish_command_list().unwrap();
    assert!(list.is_empty());
    assert!(is_wrong_context(&deferred.execute_command_list(list).unwrap_err()));
}

#[test]
fn test_oversized_resources_are_rejected_before_allocation() {
    let backend = Arc::new(NullBackend::with_memory_budget(GpuExecution::Immediate, 1 << 20));
    let config = DeviceConfig {
        num_deferred_contexts: 0,
        ..DeviceConfig::default()
    };
    let (device, _ctx, _) = RenderDevice::create(backend.clone(), &config).unwrap();

    let err = device
        .create_buffer(&BufferDesc::new(1 << 46, BindFlags::VERTEX_BUFFER), None)
        .unwrap_err();
    assert!(err.is_resource_exhausted());
    let err = device
        .create_texture(
            &TextureDesc::tex2d(16384, 16384, TextureFormat::Rgba32Float, BindFlags::SHADER_RESOURCE),
            &[],
        )
        .unwrap_err();
    assert!(err.is_resource_exhausted());
    assert_eq!(backend.memory_used(), 0);

    // 预算之内的资源不受影响
    device
        .create_buffer(&BufferDesc::new(1024, BindFlags::VERTEX_BUFFER), None)
        .unwrap();
}

#[test]
fn test_texture_array_limits() {
    let t = create_device(GpuExecution::Immediate, true);
    let bytes = [0u8; 16 * 16 * 4];

    let huge = TextureDesc::tex2d(16, 16, TextureFormat::Rgba8Unorm, BindFlags::SHADER_RESOURCE)
        .with_dimension(ResourceDimension::Tex2DArray, 1 << 30)
        .with_mip_levels(0);
    let err = t.device.create_texture(&huge, &[SubresourceData::Cpu(&bytes)]).unwrap_err();
    assert!(err.is_unsupported());

    let max_slices = t.device.caps().max_texture_array_slices;
    let too_many = TextureDesc::tex2d(4, 4, TextureFormat::Rgba8Unorm, BindFlags::SHADER_RESOURCE)
        .with_dimension(ResourceDimension::Tex2DArray, max_slices + 1);
    assert!(t.device.create_texture(&too_many, &[]).unwrap_err().is_unsupported());

    let too_deep = TextureDesc::tex2d(4, 4, TextureFormat::Rgba8Unorm, BindFlags::SHADER_RESOURCE)
        .with_dimension(ResourceDimension::Tex3D, t.device.caps().max_texture_dimension + 1);
    assert!(t.device.create_texture(&too_deep, &[]).unwrap_err().is_unsupported());

    let array = TextureDesc::tex2d(4, 4, TextureFormat::Rgba8Unorm, BindFlags::SHADER_RESOURCE)
        .with_dimension(ResourceDimension::Tex2DArray, 8);
    let texture = t.device.create_texture(&array, &[]).unwrap();
    assert_eq!(texture.desc().subresource_count(), 8);
}

#[test]
fn test_dynamic_buffer_write() {
    let mut t = create_device(GpuExecution::Immediate, true);
    let desc = BufferDesc::new(64, BindFlags::UNIFORM_BUFFER)
        .with_usage(Usage::Dynamic)
        .with_cpu_access(CpuAccessFlags::WRITE)
        .with_name("Dynamic constants");
    let constants = t.device.create_buffer(&desc, None).unwrap();
    assert_eq!(constants.state(), ResourceState::GenericRead);

    // 动态缓冲区只能通过映射写入
    let err = t
        .ctx
        .update_buffer(&constants, 0, &[1u8; 64], TransitionMode::Transition)
        .unwrap_err();
    assert!(err.is_invalid_argument());
    let err = t.ctx.map_buffer_write(&constants, MapFlags::empty(), |_| ()).unwrap_err();
    assert!(err.is_invalid_argument());

    let written = t
        .ctx
        .map_buffer_write(&constants, MapFlags::DISCARD, |data| {
            assert_eq!(data.len(), 64);
            assert!(data.iter().all(|&b| b == 0));
            for (i, b) in data.iter_mut().enumerate() {
                *b = i as u8;
            }
            data.len()
        })
        .unwrap();
    assert_eq!(written, 64);

    let readback = t.device.create_buffer(&BufferDesc::readback(64), None).unwrap();
    t.ctx
        .copy_buffer(&constants, 0, TransitionMode::Transition, &readback, 0, 64, TransitionMode::Transition)
        .unwrap();
    t.ctx.flush().unwrap();

    let expected: Vec<u8> = (0..64).collect();
    assert_eq!(t.ctx.map_buffer_read(&readback).unwrap(), expected);
    // GenericRead 已经包含复制源
    assert_eq!(constants.state(), ResourceState::GenericRead);
    assert_eq!(t.ctx.stats().barriers, 0);

    let mut deferred = t.deferred.remove(0);
    let err = deferred.map_buffer_write(&constants, MapFlags::DISCARD, |_| ()).unwrap_err();
    assert!(is_wrong_context(&err));
}

#[test]
fn test_upload_staging_buffer_write() {
    let mut t = create_device(GpuExecution::Manual, true);
    let upload_desc = BufferDesc::new(64, BindFlags::empty())
        .with_usage(Usage::Staging)
        .with_cpu_access(CpuAccessFlags::WRITE)
        .with_name("Upload buffer");
    let upload = t.device.create_buffer(&upload_desc, None).unwrap();
    let readback = t.device.create_buffer(&BufferDesc::readback(64), None).unwrap();
    let target = t
        .device
        .create_buffer(&BufferDesc::new(64, BindFlags::VERTEX_BUFFER), None)
        .unwrap();

    t.ctx
        .map_buffer_write(&upload, MapFlags::empty(), |data| data[..32].fill(0xAB))
        .unwrap();
    // 不带 DISCARD 时保留原有内容
    t.ctx
        .map_buffer_write(&upload, MapFlags::empty(), |data| {
            assert_eq!(data[0], 0xAB);
            data[32..].fill(0xCD);
        })
        .unwrap();

    t.ctx
        .copy_buffer(&upload, 0, TransitionMode::Transition, &target, 0, 64, TransitionMode::Transition)
        .unwrap();
    t.ctx
        .copy_buffer(&target, 0, TransitionMode::Transition, &readback, 0, 64, TransitionMode::Transition)
        .unwrap();
    t.ctx.wait_for_idle().unwrap();

    let data = t.ctx.map_buffer_read(&readback).unwrap();
    assert_eq!(&data[..32], &[0xAB; 32]);
    assert_eq!(&data[32..], &[0xCD; 32]);
    assert_eq!(upload.state(), ResourceState::CopySource);
    assert_eq!(t.backend.stats().barrier_mismatches, 0);

    // 回读缓冲区不可写，默认缓冲区不可映射
    assert!(t
        .ctx
        .map_buffer_write(&readback, MapFlags::DISCARD, |_| ())
        .unwrap_err()
        .is_invalid_argument());
    assert!(t
        .ctx
        .map_buffer_write(&target, MapFlags::DISCARD, |_| ())
        .unwrap_err()
        .is_invalid_argument());
}

#[test]
fn test_texture_subresource_write() {
    let mut t = create_device(GpuExecution::Immediate, true);
    let upload_desc = TextureDesc::tex2d(4, 4, TextureFormat::Rgba8Unorm, BindFlags::empty())
        .with_usage(Usage::Staging)
        .with_cpu_access(CpuAccessFlags::WRITE);
    let upload = t.device.create_texture(&upload_desc, &[]).unwrap();
    let readback = t
        .device
        .create_texture(&TextureDesc::readback_2d(4, 4, TextureFormat::Rgba8Unorm), &[])
        .unwrap();

    let texels: Vec<u8> = (0..64).collect();
    t.ctx
        .map_texture_subresource_write(&upload, 0, 0, MapFlags::DISCARD, |data| data.copy_from_slice(&texels))
        .unwrap();
    t.ctx.copy_texture(&CopyTextureAttribs::new(&upload, &readback)).unwrap();
    t.ctx.flush().unwrap();
    assert_eq!(t.ctx.map_texture_subresource(&readback, 0, 0).unwrap().data, texels);

    let dynamic_desc = TextureDesc::tex2d(4, 4, TextureFormat::Rgba8Unorm, BindFlags::SHADER_RESOURCE)
        .with_usage(Usage::Dynamic)
        .with_cpu_access(CpuAccessFlags::WRITE);
    let dynamic = t.device.create_texture(&dynamic_desc, &[]).unwrap();
    t.ctx
        .map_texture_subresource_write(&dynamic, 0, 0, MapFlags::DISCARD, |data| data.fill(7))
        .unwrap();
    t.ctx.copy_texture(&CopyTextureAttribs::new(&dynamic, &readback)).unwrap();
    t.ctx.flush().unwrap();
    assert_eq!(t.ctx.map_texture_subresource(&readback, 0, 0).unwrap().data, vec![7u8; 64]);

    let err = t
        .ctx
        .map_texture_subresource_write(&upload, 1, 0, MapFlags::DISCARD, |_| ())
        .unwrap_err();
    assert!(err.is_invalid_argument());
    let err = t
        .ctx
        .map_texture_subresource_write(&readback, 0, 0, MapFlags::DISCARD, |_| ())
        .unwrap_err();
    assert!(err.is_invalid_argument());
}

#[test]
fn test_commit_shader_resources_transitions_by_role() {
    let mut t = create_device(GpuExecution::Immediate, true);
    let pso = compute_pipeline(
        &t.device,
        &[
            ("Constants", VariableRole::ConstantBuffer),
            ("Input", VariableRole::TextureSrv),
            ("Output", VariableRole::BufferUav),
        ],
    );
    let constants = t
        .device
        .create_buffer(&BufferDesc::new(64, BindFlags::UNIFORM_BUFFER), None)
        .unwrap();
    let input = render_target(&t.device, 8);
    let output = uav_buffer(&t.device);

    let srb = pso.create_shader_resource_binding();
    srb.set("Constants", constants.clone()).unwrap();
    srb.set("Input", input.default_view(TextureViewType::ShaderResource).unwrap())
        .unwrap();
    srb.set("Output", output.default_view(BufferViewType::UnorderedAccess).unwrap())
        .unwrap();
    // 资源类型与变量角色不一致
    assert!(srb.set("Constants", output.clone()).unwrap_err().is_invalid_argument());

    t.ctx.commit_shader_resources(&srb, TransitionMode::Transition).unwrap();
    assert_eq!(constants.state(), ResourceState::ConstantBuffer);
    assert_eq!(input.state(), ResourceState::ShaderResource);
    assert_eq!(output.state(), ResourceState::UnorderedAccess);
    assert_eq!(t.ctx.stats().barriers, 3);

    // 状态已满足时不再产生屏障
    t.ctx.commit_shader_resources(&srb, TransitionMode::Transition).unwrap();
    assert_eq!(t.ctx.stats().barriers, 3);

    t.ctx.set_pipeline_state(&pso).unwrap();
    t.ctx.dispatch_compute(&DispatchComputeAttribs::new(4, 4, 1)).unwrap();
    t.ctx.flush().unwrap();

    let stats = t.backend.stats();
    assert_eq!(stats.barriers, 3);
    assert_eq!(stats.dispatches, 1);
    assert_eq!(stats.barrier_mismatches, 0);
    assert_eq!(stats.use_after_free, 0);
    assert_eq!(t.backend.gpu_state(output.native_handle().unwrap()), Some(ResourceState::UnorderedAccess));
}

#[test]
fn test_indexed_draw() {
    let mut t = create_device(GpuExecution::Immediate, true);
    let pso = graphics_pipeline(&t.device);
    let indices = t
        .device
        .create_buffer_from_slice(&BufferDesc::new(12, BindFlags::INDEX_BUFFER), &[0u32, 1, 2])
        .unwrap();
    let vertices = t
        .device
        .create_buffer(&BufferDesc::new(36, BindFlags::VERTEX_BUFFER), None)
        .unwrap();
    assert_eq!(indices.state(), ResourceState::CopyDest);

    t.ctx.set_pipeline_state(&pso).unwrap();
    let attribs = DrawIndexedAttribs::new(3, IndexType::U32);
    assert!(t.ctx.draw_indexed(&attribs).unwrap_err().is_invalid_argument());
    assert!(t
        .ctx
        .set_index_buffer(&vertices, 0, TransitionMode::Transition)
        .unwrap_err()
        .is_invalid_argument());
    assert!(t
        .ctx
        .set_index_buffer(&indices, 12, TransitionMode::Transition)
        .unwrap_err()
        .is_invalid_argument());

    t.ctx.set_index_buffer(&indices, 0, TransitionMode::Transition).unwrap();
    t.ctx.set_index_buffer(&indices, 0, TransitionMode::Transition).unwrap();
    assert_eq!(indices.state(), ResourceState::IndexBuffer);
    assert_eq!(t.ctx.stats().barriers, 1);

    t.ctx.draw_indexed(&attribs).unwrap();
    // 零索引的绘制被忽略
    t.ctx.draw_indexed(&DrawIndexedAttribs::new(0, IndexType::U16)).unwrap();
    assert_eq!(t.ctx.stats().draws, 1);

    // 绑定后索引缓冲区被改变状态，绘制时校验失败
    t.ctx
        .transition_resource_states(&[StateTransitionDesc::new(&indices, ResourceState::CopyDest)])
        .unwrap();
    assert!(t.ctx.draw_indexed(&attribs).unwrap_err().is_state_violation());

    t.ctx.flush().unwrap();
    let stats = t.backend.stats();
    assert_eq!(stats.draws, 1);
    assert_eq!(stats.barriers, 2);
    assert_eq!(stats.barrier_mismatches, 0);
}

#[test]
fn test_dispatch_verifies_unordered_access() {
    let mut t = create_device(GpuExecution::Immediate, true);
    let pso = compute_pipeline(&t.device, &[("Output", VariableRole::BufferUav)]);
    let output = uav_buffer(&t.device);
    let srb = pso.create_shader_resource_binding();
    srb.set("Output", output.default_view(BufferViewType::UnorderedAccess).unwrap())
        .unwrap();

    let groups = DispatchComputeAttribs::new(8, 1, 1);
    assert!(t.ctx.dispatch_compute(&groups).unwrap_err().is_invalid_argument());

    t.ctx.set_pipeline_state(&pso).unwrap();
    t.ctx.commit_shader_resources(&srb, TransitionMode::None).unwrap();
    assert_eq!(output.state(), ResourceState::Undefined);
    assert!(t.ctx.dispatch_compute(&groups).unwrap_err().is_state_violation());

    t.ctx
        .transition_resource_states(&[StateTransitionDesc::new(&output, ResourceState::UnorderedAccess)])
        .unwrap();
    t.ctx.dispatch_compute(&groups).unwrap();
    t.ctx.dispatch_compute(&DispatchComputeAttribs::new(0, 1, 1)).unwrap();
    t.ctx.flush().unwrap();

    let stats = t.backend.stats();
    assert_eq!(stats.dispatches, 1);
    assert_eq!(stats.barriers, 1);
    assert_eq!(stats.barrier_mismatches, 0);
    assert_eq!(t.ctx.stats().dispatches, 1);
}

#[test]
fn test_update_texture_from_cpu_and_buffer() {
    let mut t = create_device(GpuExecution::Immediate, true);
    let desc = TextureDesc::tex2d(4, 4, TextureFormat::Rgba8Unorm, BindFlags::SHADER_RESOURCE);
    let texture = t.device.create_texture(&desc, &[]).unwrap();
    let readback = t
        .device
        .create_texture(&TextureDesc::readback_2d(4, 4, TextureFormat::Rgba8Unorm), &[])
        .unwrap();

    let err = t
        .ctx
        .update_texture(&texture, 0, 0, SubresourceData::Cpu(&[0u8; 8]), TransitionMode::Transition, TransitionMode::Transition)
        .unwrap_err();
    assert!(err.is_invalid_argument());

    t.ctx
        .update_texture(&texture, 0, 0, SubresourceData::Cpu(&[0x11; 64]), TransitionMode::Transition, TransitionMode::Transition)
        .unwrap();
    assert_eq!(texture.state(), ResourceState::CopyDest);
    t.ctx.copy_texture(&CopyTextureAttribs::new(&texture, &readback)).unwrap();
    t.ctx.flush().unwrap();
    assert_eq!(t.ctx.map_texture_subresource(&readback, 0, 0).unwrap().data, vec![0x11u8; 64]);

    let source = t
        .device
        .create_buffer(&BufferDesc::new(80, BindFlags::VERTEX_BUFFER), Some(&[0x22; 80]))
        .unwrap();
    let err = t
        .ctx
        .update_texture(
            &texture,
            0,
            0,
            SubresourceData::GpuBuffer {
                buffer: source.clone(),
                offset: 32,
            },
            TransitionMode::Transition,
            TransitionMode::Transition,
        )
        .unwrap_err();
    assert!(err.is_invalid_argument());

    t.ctx
        .update_texture(
            &texture,
            0,
            0,
            SubresourceData::GpuBuffer {
                buffer: source.clone(),
                offset: 16,
            },
            TransitionMode::Transition,
            TransitionMode::Transition,
        )
        .unwrap();
    assert_eq!(source.state(), ResourceState::CopySource);
    assert_eq!(texture.state(), ResourceState::CopyDest);
    t.ctx.copy_texture(&CopyTextureAttribs::new(&texture, &readback)).unwrap();
    t.ctx.flush().unwrap();
    assert_eq!(t.ctx.map_texture_subresource(&readback, 0, 0).unwrap().data, vec![0x22u8; 64]);

    // Undefined→CopyDest、CopyDest→CopySource、源缓冲区、再回到 CopyDest、再到 CopySource
    assert_eq!(t.ctx.stats().barriers, 5);
    let stats = t.backend.stats();
    assert_eq!(stats.barriers, 5);
    assert_eq!(stats.barrier_mismatches, 0);
}

#[test]
fn test_resolve_multisampled_texture() {
    let mut t = create_device(GpuExecution::Immediate, true);
    let ms_desc = TextureDesc::tex2d(4, 4, TextureFormat::Rgba8Unorm, BindFlags::RENDER_TARGET).with_sample_count(4);
    let ms = t.device.create_texture(&ms_desc, &[]).unwrap();
    let resolved = render_target(&t.device, 4);
    let readback = t
        .device
        .create_texture(&TextureDesc::readback_2d(4, 4, TextureFormat::Rgba8Unorm), &[])
        .unwrap();

    let attribs = ResolveTextureSubresourceAttribs::default();
    let err = t.ctx.resolve_texture_subresource(&resolved, &ms, &attribs).unwrap_err();
    assert!(err.is_invalid_argument());

    let rtv = ms.default_view(TextureViewType::RenderTarget).unwrap();
    t.ctx.clear_render_target(&rtv, [1.0, 0.0, 0.0, 1.0], TransitionMode::Transition).unwrap();
    t.ctx.resolve_texture_subresource(&ms, &resolved, &attribs).unwrap();
    assert_eq!(ms.state(), ResourceState::ResolveSource);
    assert_eq!(resolved.state(), ResourceState::ResolveDest);
    assert_eq!(t.ctx.stats().barriers, 3);

    t.ctx.copy_texture(&CopyTextureAttribs::new(&resolved, &readback)).unwrap();
    t.ctx.flush().unwrap();
    let pixels = t.ctx.map_texture_subresource(&readback, 0, 0).unwrap().data;
    assert_eq!(&pixels[..4], &[255, 0, 0, 255]);
    assert_eq!(&pixels[60..], &[255, 0, 0, 255]);

    let stats = t.backend.stats();
    assert_eq!(stats.barriers, 4);
    assert_eq!(stats.barrier_mismatches, 0);
}

#[test]
fn test_forced_release_drains_both_queues() {
    let mut t = create_device(GpuExecution::Manual, true);
    let first = t
        .device
        .create_buffer(&BufferDesc::new(16, BindFlags::VERTEX_BUFFER), None)
        .unwrap();
    let second = t
        .device
        .create_buffer(&BufferDesc::new(16, BindFlags::VERTEX_BUFFER), None)
        .unwrap();
    let (first_handle, second_handle) = (first.native_handle().unwrap(), second.native_handle().unwrap());

    drop(first);
    t.ctx.flush().unwrap();
    drop(second);
    assert_eq!(t.device.stale_resource_count(), 1);
    assert_eq!(t.device.pending_release_count(), 1);

    // 提交尚未执行，普通释放什么也不做
    t.device.release_stale_resources(false);
    assert!(t.backend.is_alive(first_handle));
    assert!(t.backend.is_alive(second_handle));

    t.backend.process_all();
    t.device.release_stale_resources(true);
    assert_eq!(t.device.stale_resource_count(), 0);
    assert_eq!(t.device.pending_release_count(), 0);
    assert!(!t.backend.is_alive(first_handle));
    assert!(!t.backend.is_alive(second_handle));
    assert_eq!(t.backend.stats().destroyed, 2);
    assert_eq!(t.backend.stats().use_after_free, 0);
}
