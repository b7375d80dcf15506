mod common;

use common::*;
use tessel::gpu::null::{NullCommand, NullDescriptor};
use tessel::*;

#[test]
fn render_target_sampled_by_next_pass() -> anyhow::Result<()> {
    let ctx = context();
    let scene = render_target(&ctx, "scene", 256, 256);
    let output = render_target(&ctx, "output", 256, 256);
    let (vs, ps) = blit_shaders(&ctx);

    let mut list = ctx.get_command_list(QueueType::Graphics, "main")?;
    list.clear_render_target(scene, [0.0, 0.0, 0.0, 1.0]);
    // First use of a resource is settled at submission, not in the list.
    assert_eq!(list.barriers_emitted(), 0);

    list.set_shader_state(vs, Some(ps))?;
    list.set_render_target(0, Some(output));
    list.set_viewport(&Viewport::from_size(256, 256));
    list.set_texture_2d("source", scene);
    list.draw(3, 0)?;
    assert_eq!(
        list.current_state(scene, Subresource::All),
        Some(ResourceState::PIXEL_SHADER_RESOURCE)
    );
    assert_eq!(list.barriers_emitted(), 1);
    ctx.execute(list)?;

    let backend = ctx.backend();
    let (scene_id, output_id) = (native_id(&ctx, scene), native_id(&ctx, output));
    let executed = backend.executed(QueueType::Graphics);
    assert_eq!(executed.len(), 2, "patchup list runs ahead of the recorded list");

    let mut patchup = transitions(&executed[0]);
    patchup.sort_by_key(|t| t.0);
    let mut expected = vec![
        (scene_id, ResourceState::COMMON, ResourceState::RENDER_TARGET),
        (output_id, ResourceState::COMMON, ResourceState::RENDER_TARGET),
    ];
    expected.sort_by_key(|t| t.0);
    assert_eq!(patchup, expected);

    let main = &executed[1];
    assert_eq!(
        transitions(main),
        vec![(
            scene_id,
            ResourceState::RENDER_TARGET,
            ResourceState::PIXEL_SHADER_RESOURCE
        )]
    );
    assert_eq!(count_draws(main), 1);
    assert!(matches!(main[0], NullCommand::ClearRenderTarget { .. }));

    let table = main
        .iter()
        .find_map(|c| match c {
            NullCommand::SetGraphicsTable { index: 0, base } => Some(*base),
            _ => None,
        })
        .expect("binding table set before the draw");
    assert_eq!(
        backend.descriptor(table),
        Some(NullDescriptor::View {
            resource: scene_id,
            kind: ViewKind::ShaderResource,
        })
    );

    assert_eq!(
        ctx.resource_state(scene, Subresource::All),
        Some(ResourceState::PIXEL_SHADER_RESOURCE)
    );
    assert_eq!(
        ctx.resource_state(output, Subresource::All),
        Some(ResourceState::RENDER_TARGET)
    );

    let stats = ctx.end_commands_frame()?;
    assert_eq!(stats.draws, 1);
    assert_eq!(stats.patchup_lists, 1);
    assert_eq!(stats.command_lists, 1);
    assert_eq!(stats.barriers, 3);
    Ok(())
}

#[test]
fn compute_read_after_pixel_read_needs_one_patchup_barrier() -> anyhow::Result<()> {
    let ctx = context();
    let scene = render_target(&ctx, "scene", 256, 256);
    let output = render_target(&ctx, "output", 256, 256);
    let histogram = storage_buffer(&ctx, "histogram", 1024);
    let (vs, ps) = blit_shaders(&ctx);
    let kernel = copy_kernel(&ctx);

    let mut list = ctx.get_command_list(QueueType::Graphics, "main")?;
    list.set_shader_state(vs, Some(ps))?;
    list.set_render_target(0, Some(output));
    list.set_texture_2d("source", scene);
    list.draw(3, 0)?;
    ctx.execute(list)?;
    ctx.backend().clear_events();

    let mut list = ctx.get_command_list(QueueType::Compute, "histogram")?;
    list.set_compute_shader_state(kernel)?;
    list.set_texture_2d("input", scene);
    list.set_rw_buffer("output", histogram);
    list.dispatch(16, 16, 1)?;
    assert_eq!(list.barriers_emitted(), 0);
    ctx.execute(list)?;

    let executed = ctx.backend().executed(QueueType::Compute);
    assert_eq!(executed.len(), 2);
    let patchup = transitions(&executed[0]);
    let scene_barriers: Vec<_> = patchup
        .iter()
        .filter(|t| t.0 == native_id(&ctx, scene))
        .collect();
    assert_eq!(
        scene_barriers,
        vec![&(
            native_id(&ctx, scene),
            ResourceState::PIXEL_SHADER_RESOURCE,
            ResourceState::NON_PIXEL_SHADER_RESOURCE
        )]
    );
    assert!(patchup.contains(&(
        native_id(&ctx, histogram),
        ResourceState::COMMON,
        ResourceState::UNORDERED_ACCESS
    )));
    assert_eq!(
        ctx.resource_state(histogram, Subresource::All),
        Some(ResourceState::UNORDERED_ACCESS)
    );
    Ok(())
}

#[test]
fn matching_global_state_skips_patchup() -> anyhow::Result<()> {
    let ctx = context();
    let scene = render_target(&ctx, "scene", 64, 64);
    let output = render_target(&ctx, "output", 64, 64);
    let (vs, ps) = blit_shaders(&ctx);

    for _ in 0..2 {
        let mut list = ctx.get_command_list(QueueType::Graphics, "main")?;
        list.set_shader_state(vs, Some(ps))?;
        list.set_render_target(0, Some(output));
        list.set_texture_2d("source", scene);
        list.draw(3, 0)?;
        ctx.execute(list)?;
    }

    let executed = ctx.backend().executed(QueueType::Graphics);
    // Patchup plus list for the first frame, the list alone for the second.
    assert_eq!(executed.len(), 3);
    assert!(transitions(&executed[2]).is_empty());
    assert_eq!(ctx.end_commands_frame()?.patchup_lists, 1);
    Ok(())
}

#[test]
fn subresource_transitions_split_and_rejoin() -> anyhow::Result<()> {
    let ctx = context();
    let mips = ctx.create_texture(&TextureDesc {
        debug_name: "mip_chain".into(),
        width: 128,
        height: 128,
        mip_levels: 4,
        usage: ResourceUsage::SHADER_RESOURCE | ResourceUsage::UNORDERED_ACCESS,
        ..Default::default()
    })?;

    let mut list = ctx.get_command_list(QueueType::Graphics, "mips")?;
    list.transition_barrier(mips, Subresource::All, ResourceState::UNORDERED_ACCESS);
    list.transition_barrier(mips, Subresource::Index(0), ResourceState::NON_PIXEL_SHADER_RESOURCE);
    assert_eq!(
        list.current_state(mips, Subresource::Index(1)),
        Some(ResourceState::UNORDERED_ACCESS)
    );
    assert_eq!(list.current_state(mips, Subresource::All), None);
    list.flush_barriers();
    assert_eq!(list.barriers_emitted(), 1);

    for index in 1..4 {
        list.transition_barrier(
            mips,
            Subresource::Index(index),
            ResourceState::NON_PIXEL_SHADER_RESOURCE,
        );
    }
    assert_eq!(
        list.current_state(mips, Subresource::All),
        Some(ResourceState::NON_PIXEL_SHADER_RESOURCE)
    );
    ctx.execute(list)?;
    assert_eq!(
        ctx.resource_state(mips, Subresource::Index(3)),
        Some(ResourceState::NON_PIXEL_SHADER_RESOURCE)
    );
    Ok(())
}
