mod common;

use common::*;
use tessel::gpu::driver::DrawIndexedArgs;
use tessel::gpu::null::{NullBackend, NullCommand};
use tessel::*;

struct Scene {
    target: ResourceId,
    depth: ResourceId,
    vertices: ResourceId,
    indices: ResourceId,
}

fn scene(ctx: &Context<NullBackend>) -> anyhow::Result<Scene> {
    let target = render_target(ctx, "color", 64, 64);
    let depth = ctx.create_texture(&TextureDesc {
        debug_name: "shadow_depth".into(),
        width: 64,
        height: 64,
        format: Format::D32Float,
        usage: ResourceUsage::DEPTH_STENCIL | ResourceUsage::SHADER_RESOURCE,
        ..Default::default()
    })?;
    let vertices = ctx.create_buffer(&BufferDesc {
        debug_name: "vertices".into(),
        byte_size: 1024,
        usage: ResourceUsage::VERTEX,
        ..Default::default()
    })?;
    let indices = ctx.create_buffer(&BufferDesc {
        debug_name: "indices".into(),
        byte_size: 256,
        usage: ResourceUsage::INDEX,
        ..Default::default()
    })?;
    Ok(Scene {
        target,
        depth,
        vertices,
        indices,
    })
}

fn sorted(mut list: Vec<(u64, ResourceState, ResourceState)>) -> Vec<(u64, ResourceState, ResourceState)> {
    list.sort_by_key(|(id, ..)| *id);
    list
}

#[test]
fn indexed_depth_pass_moves_geometry_and_depth() -> anyhow::Result<()> {
    let ctx = context();
    let scene = scene(&ctx)?;
    let vs = ctx.create_shader(ShaderStage::Vertex, "mesh_vs", b"mesh-vs", ShaderReflection::new());
    let ps = ctx.create_shader(ShaderStage::Pixel, "mesh_ps", b"mesh-ps", ShaderReflection::new());
    let scissor = Rect2D {
        x: 8,
        y: 8,
        w: 32,
        h: 32,
    };

    let mut list = ctx.get_command_list(QueueType::Graphics, "main")?;
    list.begin_debug_marker("shadow pass");
    list.clear_depth_stencil(scene.depth, 1.0, 0);
    list.set_shader_state(vs, Some(ps))?;
    list.set_render_target(0, Some(scene.target));
    list.set_depth_stencil(Some(scene.depth), false);
    list.set_scissor(scissor);
    list.set_vertex_stream(0, scene.vertices, 64, 16);
    list.set_index_buffer(scene.indices, 0, IndexType::U16);
    list.draw_indexed(36, 1, 0, 0)?;
    list.end_debug_marker();
    ctx.execute(list)?;

    let executed = ctx.backend().executed(QueueType::Graphics);
    let [patchup, main] = executed.as_slice() else {
        panic!("expected a patchup list and the main list, got {}", executed.len());
    };
    assert_eq!(
        sorted(transitions(patchup)),
        sorted(vec![
            (native_id(&ctx, scene.target), ResourceState::COMMON, ResourceState::RENDER_TARGET),
            (native_id(&ctx, scene.depth), ResourceState::COMMON, ResourceState::DEPTH_WRITE),
            (
                native_id(&ctx, scene.vertices),
                ResourceState::COMMON,
                ResourceState::VERTEX_AND_CONSTANT_BUFFER
            ),
            (native_id(&ctx, scene.indices), ResourceState::COMMON, ResourceState::INDEX_BUFFER),
        ])
    );
    assert!(transitions(main).is_empty());

    assert!(main.contains(&NullCommand::SetScissor(scissor)));
    assert!(main.contains(&NullCommand::SetVertexBuffer {
        slot: 0,
        resource: native_id(&ctx, scene.vertices),
        offset: 64,
        stride: 16,
    }));
    assert!(main.contains(&NullCommand::SetIndexBuffer {
        resource: native_id(&ctx, scene.indices),
        offset: 0,
        format: IndexType::U16,
    }));
    assert!(main
        .iter()
        .any(|c| matches!(c, NullCommand::ClearDepthStencil { depth, stencil: 0, .. } if *depth == 1.0)));
    assert!(main.contains(&NullCommand::DrawIndexed(DrawIndexedArgs {
        index_count: 36,
        instance_count: 1,
        first_index: 0,
        base_vertex: 0,
        first_instance: 0,
    })));

    // Markers enclose everything recorded in between.
    let begin = main
        .iter()
        .position(|c| *c == NullCommand::BeginMarker("shadow pass".into()))
        .expect("marker opened");
    let end = main
        .iter()
        .position(|c| *c == NullCommand::EndMarker)
        .expect("marker closed");
    let draw = main
        .iter()
        .position(|c| matches!(c, NullCommand::DrawIndexed(_)))
        .expect("indexed draw");
    assert_eq!(begin, 0);
    assert!(begin < draw && draw < end);
    assert_eq!(end, main.len() - 1);

    assert_eq!(
        ctx.resource_state(scene.depth, Subresource::All),
        Some(ResourceState::DEPTH_WRITE)
    );
    Ok(())
}

#[test]
fn sampling_read_only_depth_patches_up_from_depth_write() -> anyhow::Result<()> {
    let ctx = context();
    let scene = scene(&ctx)?;
    let vs = ctx.create_shader(ShaderStage::Vertex, "mesh_vs", b"mesh-vs", ShaderReflection::new());
    let depth_ps = ctx.create_shader(ShaderStage::Pixel, "depth_ps", b"depth-ps", ShaderReflection::new());
    let lit_ps = ctx.create_shader(
        ShaderStage::Pixel,
        "lit_ps",
        b"lit-ps",
        ShaderReflection::new().texture("shadow_map", 0),
    );

    let mut list = ctx.get_command_list(QueueType::Graphics, "shadows")?;
    list.set_shader_state(vs, Some(depth_ps))?;
    list.set_depth_stencil(Some(scene.depth), false);
    list.draw(3, 0)?;
    ctx.execute(list)?;
    ctx.backend().clear_events();

    let mut list = ctx.get_command_list(QueueType::Graphics, "lighting")?;
    list.set_shader_state(vs, Some(lit_ps))?;
    list.set_render_target(0, Some(scene.target));
    list.set_depth_stencil(Some(scene.depth), true);
    list.set_texture_2d("shadow_map", scene.depth);
    list.draw(3, 0)?;
    ctx.execute(list)?;

    let executed = ctx.backend().executed(QueueType::Graphics);
    let [patchup, main] = executed.as_slice() else {
        panic!("expected a patchup list and the main list, got {}", executed.len());
    };
    let depth = native_id(&ctx, scene.depth);
    assert_eq!(
        sorted(transitions(patchup)),
        sorted(vec![
            (native_id(&ctx, scene.target), ResourceState::COMMON, ResourceState::RENDER_TARGET),
            (depth, ResourceState::DEPTH_WRITE, ResourceState::DEPTH_READ),
        ])
    );
    assert_eq!(
        transitions(main),
        vec![(
            depth,
            ResourceState::DEPTH_READ,
            ResourceState::DEPTH_READ | ResourceState::PIXEL_SHADER_RESOURCE
        )]
    );
    assert_eq!(
        ctx.resource_state(scene.depth, Subresource::All),
        Some(ResourceState::DEPTH_READ | ResourceState::PIXEL_SHADER_RESOURCE)
    );
    Ok(())
}

#[test]
fn vertex_stream_is_rebound_only_when_changed() -> anyhow::Result<()> {
    let ctx = context();
    let scene = scene(&ctx)?;
    let vs = ctx.create_shader(ShaderStage::Vertex, "mesh_vs", b"mesh-vs", ShaderReflection::new());

    let mut list = ctx.get_command_list(QueueType::Graphics, "main")?;
    list.set_shader_state(vs, None)?;
    list.set_render_target(0, Some(scene.target));
    list.set_vertex_stream(0, scene.vertices, 0, 32);
    list.draw(3, 0)?;
    list.draw(3, 3)?;
    list.set_vertex_stream(0, scene.vertices, 512, 32);
    list.draw(3, 0)?;
    ctx.execute(list)?;

    let executed = ctx.backend().executed(QueueType::Graphics);
    let main = executed.last().expect("list executed");
    let offsets: Vec<u64> = main
        .iter()
        .filter_map(|c| match c {
            NullCommand::SetVertexBuffer { offset, .. } => Some(*offset),
            _ => None,
        })
        .collect();
    assert_eq!(offsets, vec![0, 512]);
    assert_eq!(count_draws(main), 3);
    Ok(())
}

#[test]
#[should_panic(expected = "past the end")]
fn vertex_stream_offset_past_the_buffer_panics() {
    let ctx = context();
    let vertices = ctx
        .create_buffer(&BufferDesc {
            debug_name: "vertices".into(),
            byte_size: 128,
            usage: ResourceUsage::VERTEX,
            ..Default::default()
        })
        .unwrap();
    let mut list = ctx.get_command_list(QueueType::Graphics, "main").unwrap();
    list.set_vertex_stream(0, vertices, 256, 16);
}

#[test]
#[should_panic(expected = "past the end")]
fn index_offset_past_the_buffer_panics() {
    let ctx = context();
    let indices = ctx
        .create_buffer(&BufferDesc {
            debug_name: "indices".into(),
            byte_size: 64,
            usage: ResourceUsage::INDEX,
            ..Default::default()
        })
        .unwrap();
    let mut list = ctx.get_command_list(QueueType::Graphics, "main").unwrap();
    list.set_index_buffer(indices, 65, IndexType::U32);
}
