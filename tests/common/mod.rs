#![allow(dead_code)]

use tessel::gpu::null::{FenceMode, NullBackend, NullBarrier, NullCommand};
use tessel::*;

pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

pub fn context() -> Context<NullBackend> {
    context_with(NullBackend::new(), &ContextInfo::default())
}

/// Context whose fences only complete when the test says so.
pub fn manual_context() -> Context<NullBackend> {
    context_with(NullBackend::with_fence_mode(FenceMode::Manual), &ContextInfo::default())
}

pub fn context_with(backend: NullBackend, info: &ContextInfo) -> Context<NullBackend> {
    init_logging();
    Context::new(backend, info).expect("create context")
}

pub fn render_target(ctx: &Context<NullBackend>, name: &str, width: u32, height: u32) -> ResourceId {
    ctx.create_texture(&TextureDesc {
        debug_name: name.to_string(),
        width,
        height,
        format: Format::RGBA8Unorm,
        usage: ResourceUsage::RENDER_TARGET | ResourceUsage::SHADER_RESOURCE,
        ..Default::default()
    })
    .expect("create render target")
}

pub fn storage_buffer(ctx: &Context<NullBackend>, name: &str, byte_size: u64) -> ResourceId {
    ctx.create_buffer(&BufferDesc {
        debug_name: name.to_string(),
        byte_size,
        stride: 4,
        usage: ResourceUsage::SHADER_RESOURCE | ResourceUsage::UNORDERED_ACCESS,
        heap: HeapType::Default,
    })
    .expect("create buffer")
}

/// Vertex shader without inputs plus a pixel shader sampling `source`.
pub fn blit_shaders(ctx: &Context<NullBackend>) -> (ShaderHandle, ShaderHandle) {
    let vs = ctx.create_shader(ShaderStage::Vertex, "fullscreen_vs", b"fullscreen-vs", ShaderReflection::new());
    let ps = ctx.create_shader(
        ShaderStage::Pixel,
        "blit_ps",
        b"blit-ps",
        ShaderReflection::new().texture("source", 0),
    );
    (vs, ps)
}

/// Compute shader reading `input` and writing `output`.
pub fn copy_kernel(ctx: &Context<NullBackend>) -> ShaderHandle {
    ctx.create_shader(
        ShaderStage::Compute,
        "copy_cs",
        b"copy-cs",
        ShaderReflection::new().texture("input", 0).rw_buffer("output", 0),
    )
}

pub fn native_id(ctx: &Context<NullBackend>, id: ResourceId) -> u64 {
    ctx.with_native(id, |resource| resource.id())
}

/// Every transition in `commands` as (native resource, before, after).
pub fn transitions(commands: &[NullCommand]) -> Vec<(u64, ResourceState, ResourceState)> {
    commands
        .iter()
        .flat_map(|command| command.barriers())
        .filter_map(|barrier| match *barrier {
            NullBarrier::Transition {
                resource,
                before,
                after,
                ..
            } => Some((resource, before, after)),
            NullBarrier::Uav { .. } => None,
        })
        .collect()
}

pub fn count_draws(commands: &[NullCommand]) -> usize {
    commands
        .iter()
        .filter(|c| matches!(c, NullCommand::Draw(_) | NullCommand::DrawIndexed(_)))
        .count()
}
