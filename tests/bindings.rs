mod common;

use common::*;
use tessel::gpu::null::{NullBackend, NullCommand, NullDescriptor};
use tessel::*;

fn tables(commands: &[NullCommand]) -> Vec<DescriptorSlot> {
    commands
        .iter()
        .filter_map(|c| match c {
            NullCommand::SetGraphicsTable { base, .. } | NullCommand::SetComputeTable { base, .. } => Some(*base),
            _ => None,
        })
        .collect()
}

fn last_list(ctx: &Context<NullBackend>, queue: QueueType) -> Vec<NullCommand> {
    ctx.backend()
        .executed(queue)
        .pop()
        .expect("a list was executed")
}

#[test]
fn unknown_input_name_is_ignored() -> anyhow::Result<()> {
    let ctx = context();
    let (vs, ps) = blit_shaders(&ctx);
    let target = render_target(&ctx, "target", 16, 16);
    let texture = render_target(&ctx, "texture", 16, 16);
    let sampler = ctx.create_sampler(&SamplerDesc::default())?;

    let mut list = ctx.get_command_list(QueueType::Graphics, "main")?;
    list.set_shader_state(vs, Some(ps))?;
    list.set_render_target(0, Some(target));
    list.set_texture_2d("does_not_exist", texture);
    // Wrong kind for the input: ignored as well.
    list.set_sampler("source", sampler);
    list.draw(3, 0)?;
    assert_eq!(list.current_state(texture, Subresource::All), None);
    ctx.execute(list)?;

    let main = last_list(&ctx, QueueType::Graphics);
    assert_eq!(count_draws(&main), 1);
    let table = tables(&main)[0];
    assert_eq!(
        ctx.backend().descriptor(table),
        Some(NullDescriptor::Null(RangeKind::ShaderResource))
    );
    Ok(())
}

fn ambiguous_pair(ctx: &Context<NullBackend>) -> (ShaderHandle, ShaderHandle) {
    let vs = ctx.create_shader(
        ShaderStage::Vertex,
        "vs",
        b"vs",
        ShaderReflection::new().texture("albedo", 0),
    );
    let ps = ctx.create_shader(
        ShaderStage::Pixel,
        "ps",
        b"ps",
        ShaderReflection::new().texture("albedo", 1),
    );
    (vs, ps)
}

#[test]
fn ambiguous_shader_pair_skips_draws() -> anyhow::Result<()> {
    let ctx = context();
    let target = render_target(&ctx, "target", 16, 16);
    let (vs, ps) = ambiguous_pair(&ctx);

    let mut list = ctx.get_command_list(QueueType::Graphics, "main")?;
    list.set_shader_state(vs, Some(ps))?;
    list.set_render_target(0, Some(target));
    list.draw(3, 0)?;
    ctx.execute(list)?;

    assert_eq!(count_draws(&last_list(&ctx, QueueType::Graphics)), 0);
    assert_eq!(ctx.pipeline_count(), 0);
    Ok(())
}

#[test]
fn ambiguous_pair_replaces_earlier_valid_shaders() -> anyhow::Result<()> {
    let ctx = context();
    let (blit_vs, blit_ps) = blit_shaders(&ctx);
    let (vs, ps) = ambiguous_pair(&ctx);
    let target = render_target(&ctx, "target", 16, 16);
    let source = render_target(&ctx, "source", 16, 16);

    let mut list = ctx.get_command_list(QueueType::Graphics, "main")?;
    list.set_shader_state(blit_vs, Some(blit_ps))?;
    list.set_render_target(0, Some(target));
    list.set_texture_2d("source", source);
    list.draw(3, 0)?;

    list.set_shader_state(vs, Some(ps))?;
    list.draw(3, 0)?;

    // A valid pair brings drawing back, with the earlier inputs still bound.
    list.set_shader_state(blit_vs, Some(blit_ps))?;
    list.draw(3, 0)?;
    ctx.execute(list)?;

    let main = last_list(&ctx, QueueType::Graphics);
    assert_eq!(count_draws(&main), 2);
    let table = *tables(&main).last().expect("table set");
    assert_eq!(
        ctx.backend().descriptor(table),
        Some(NullDescriptor::View {
            resource: native_id(&ctx, source),
            kind: ViewKind::ShaderResource,
        })
    );
    Ok(())
}

#[test]
fn constants_upload_only_when_changed() -> anyhow::Result<()> {
    let ctx = context();
    let target = render_target(&ctx, "target", 16, 16);
    let vs = ctx.create_shader(ShaderStage::Vertex, "vs", b"vs", ShaderReflection::new());
    let ps = ctx.create_shader(
        ShaderStage::Pixel,
        "tint_ps",
        b"tint",
        ShaderReflection::new().constant_buffer(ConstantBufferDesc {
            name: "Tint".into(),
            register: 0,
            space: 0,
            size: 32,
            variables: vec![
                ConstantVariable {
                    name: "color".into(),
                    offset: 0,
                    size: 16,
                },
                ConstantVariable {
                    name: "strength".into(),
                    offset: 16,
                    size: 4,
                },
            ],
        }),
    );

    let mut list = ctx.get_command_list(QueueType::Graphics, "main")?;
    list.set_shader_state(vs, Some(ps))?;
    list.set_render_target(0, Some(target));
    list.set_constant("color", &[1.0f32, 0.5, 0.25, 1.0]);
    list.set_constant("strength", &0.5f32);
    list.draw(3, 0)?;
    list.set_constant("strength", &0.5f32);
    list.draw(3, 0)?;
    list.set_constant("strength", &0.75f32);
    list.draw(3, 0)?;
    // Too large for the variable: warned about and dropped.
    list.set_constant("strength", &[0u32; 2]);
    list.draw(3, 0)?;
    ctx.execute(list)?;

    let main = last_list(&ctx, QueueType::Graphics);
    let tables = tables(&main);
    assert_eq!(tables.len(), 2);
    assert!(matches!(
        ctx.backend().descriptor(tables[1]),
        Some(NullDescriptor::Constant { size: 32, .. })
    ));
    assert_eq!(ctx.end_commands_frame()?.constant_bytes, 64);
    Ok(())
}

#[test]
fn constant_declared_in_two_buffers_is_ambiguous() -> anyhow::Result<()> {
    let ctx = context();
    let target = render_target(&ctx, "target", 16, 16);
    let tint_buffer = |name: &str, register| ConstantBufferDesc {
        name: name.into(),
        register,
        space: 0,
        size: 16,
        variables: vec![ConstantVariable {
            name: "tint".into(),
            offset: 0,
            size: 16,
        }],
    };
    let vs = ctx.create_shader(
        ShaderStage::Vertex,
        "vs",
        b"vs",
        ShaderReflection::new().constant_buffer(tint_buffer("VertexTint", 0)),
    );
    let ps = ctx.create_shader(
        ShaderStage::Pixel,
        "ps",
        b"ps",
        ShaderReflection::new().constant_buffer(tint_buffer("PixelTint", 1)),
    );
    assert!(matches!(
        ctx.get_bindings(&[vs, ps]),
        Err(GPUError::AmbiguousBinding { name }) if name == "tint"
    ));

    let mut list = ctx.get_command_list(QueueType::Graphics, "main")?;
    list.set_shader_state(vs, Some(ps))?;
    list.set_render_target(0, Some(target));
    list.set_constant("tint", &[1.0f32; 4]);
    list.draw(3, 0)?;
    ctx.execute(list)?;

    assert_eq!(count_draws(&last_list(&ctx, QueueType::Graphics)), 0);
    assert_eq!(ctx.end_commands_frame()?.constant_bytes, 0);
    Ok(())
}

#[test]
fn samplers_fill_their_own_table() -> anyhow::Result<()> {
    let ctx = context();
    let target = render_target(&ctx, "target", 16, 16);
    let texture = render_target(&ctx, "texture", 16, 16);
    let vs = ctx.create_shader(ShaderStage::Vertex, "vs", b"vs", ShaderReflection::new());
    let ps = ctx.create_shader(
        ShaderStage::Pixel,
        "sampled_ps",
        b"sampled",
        ShaderReflection::new().texture("albedo", 0).sampler("linear", 0),
    );
    let desc = SamplerDesc {
        address_mode: SamplerAddressMode::ClampToEdge,
        ..Default::default()
    };
    let sampler = ctx.create_sampler(&desc)?;

    let mut list = ctx.get_command_list(QueueType::Graphics, "main")?;
    list.set_shader_state(vs, Some(ps))?;
    list.set_render_target(0, Some(target));
    list.set_texture_2d("albedo", texture);
    list.set_sampler("linear", sampler);
    list.draw(3, 0)?;
    ctx.execute(list)?;

    let main = last_list(&ctx, QueueType::Graphics);
    let sampler_table = tables(&main)
        .into_iter()
        .find(|slot| slot.heap == DescriptorHeapKind::Sampler)
        .expect("sampler table set");
    assert_eq!(ctx.backend().descriptor(sampler_table), Some(NullDescriptor::Sampler(desc)));
    ctx.destroy_sampler(sampler);
    Ok(())
}

#[test]
fn compute_and_graphics_keep_separate_bindings() -> anyhow::Result<()> {
    let ctx = context();
    let (vs, ps) = blit_shaders(&ctx);
    let kernel = copy_kernel(&ctx);
    let target = render_target(&ctx, "target", 16, 16);
    let texture = render_target(&ctx, "texture", 16, 16);
    let output = storage_buffer(&ctx, "output", 256);

    let mut list = ctx.get_command_list(QueueType::Graphics, "main")?;
    list.set_shader_state(vs, Some(ps))?;
    list.set_render_target(0, Some(target));
    list.set_texture_2d("source", texture);
    list.draw(3, 0)?;

    list.set_compute_shader_state(kernel)?;
    list.set_texture_2d("input", texture);
    list.set_rw_buffer("output", output);
    list.dispatch(1, 1, 1)?;
    list.uav_barrier(output);
    list.dispatch(1, 1, 1)?;

    // Graphics bindings survive the dispatches.
    list.set_shader_state(vs, Some(ps))?;
    list.draw(3, 0)?;
    assert_eq!(
        list.current_state(texture, Subresource::All),
        Some(ResourceState::PIXEL_SHADER_RESOURCE | ResourceState::NON_PIXEL_SHADER_RESOURCE)
    );
    ctx.execute(list)?;

    let main = last_list(&ctx, QueueType::Graphics);
    let pipelines: Vec<_> = main
        .iter()
        .filter(|c| {
            matches!(
                c,
                NullCommand::SetGraphicsPipeline(_) | NullCommand::SetComputePipeline(_)
            )
        })
        .collect();
    assert_eq!(pipelines.len(), 3);
    assert!(main
        .iter()
        .flat_map(|c| c.barriers())
        .any(|b| matches!(b, tessel::gpu::null::NullBarrier::Uav { .. })));
    let stats = ctx.end_commands_frame()?;
    assert_eq!((stats.draws, stats.dispatches), (2, 2));
    Ok(())
}
