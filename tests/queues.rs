mod common;

use common::*;
use tessel::gpu::null::QueueEvent;
use tessel::*;

#[test]
fn copy_queue_decays_resources_to_common() -> anyhow::Result<()> {
    let ctx = context();
    let src = storage_buffer(&ctx, "src", 1024);
    let dst = storage_buffer(&ctx, "dst", 1024);

    let mut list = ctx.get_command_list(QueueType::Graphics, "main")?;
    list.clear_unordered_access(src, [7; 4]);
    ctx.execute(list)?;
    assert_eq!(
        ctx.resource_state(src, Subresource::All),
        Some(ResourceState::UNORDERED_ACCESS)
    );

    let mut list = ctx.get_command_list(QueueType::Copy, "upload")?;
    list.copy_buffer_region(dst, 0, src, 0, 256);
    assert_eq!(list.barriers_emitted(), 0);
    ctx.execute(list)?;

    let executed = ctx.backend().executed(QueueType::Copy);
    assert_eq!(executed.len(), 1, "copy queues never need a patchup list");
    assert!(transitions(&executed[0]).is_empty());
    for id in [src, dst] {
        assert_eq!(
            ctx.resource_state(id, Subresource::All),
            Some(ResourceState::COMMON)
        );
    }
    Ok(())
}

#[test]
fn upload_heap_buffers_are_never_transitioned() -> anyhow::Result<()> {
    let ctx = context();
    let staging = ctx.create_buffer(&BufferDesc {
        debug_name: "staging".into(),
        byte_size: 4096,
        heap: HeapType::Upload,
        ..Default::default()
    })?;
    let texture_data = storage_buffer(&ctx, "texture_data", 4096);

    let mut list = ctx.get_command_list(QueueType::Graphics, "main")?;
    list.copy_resource(texture_data, staging);
    ctx.execute(list)?;

    let executed = ctx.backend().executed(QueueType::Graphics);
    let all: Vec<_> = executed.iter().flat_map(|c| transitions(c)).collect();
    assert_eq!(
        all,
        vec![(
            native_id(&ctx, texture_data),
            ResourceState::COMMON,
            ResourceState::COPY_DEST
        )]
    );
    Ok(())
}

#[test]
fn manual_fences_complete_on_wait() -> anyhow::Result<()> {
    let ctx = manual_context();
    let first = ctx.execute(ctx.get_command_list(QueueType::Graphics, "main")?)?;
    let second = ctx.execute(ctx.get_command_list(QueueType::Graphics, "main")?)?;
    assert!(!ctx.is_complete(first));

    ctx.wait_for_completion(first)?;
    assert!(ctx.is_complete(first));
    assert!(!ctx.is_complete(second));

    ctx.wait_for_queue(QueueType::Graphics)?;
    assert!(ctx.is_complete(second));
    Ok(())
}

#[test]
fn queue_wait_is_recorded_on_the_waiting_queue() -> anyhow::Result<()> {
    let ctx = context();
    let fence = ctx.execute(ctx.get_command_list(QueueType::Graphics, "main")?)?;
    ctx.create_queue(QueueType::Compute)?;
    ctx.queue_wait(QueueType::Compute, fence)?;
    // Waiting on the queue's own timeline is a no-op.
    ctx.queue_wait(QueueType::Graphics, fence)?;

    assert_eq!(
        ctx.backend().events(QueueType::Compute),
        vec![QueueEvent::Wait {
            queue: QueueType::Graphics,
            value: 1,
        }]
    );
    assert!(!ctx
        .backend()
        .events(QueueType::Graphics)
        .iter()
        .any(|e| matches!(e, QueueEvent::Wait { .. })));
    Ok(())
}

#[test]
fn old_fence_handles_read_as_complete() -> anyhow::Result<()> {
    let info = ContextInfo {
        fence_ring_size: 2,
        ..Default::default()
    };
    let ctx = context_with(
        tessel::gpu::null::NullBackend::with_fence_mode(tessel::gpu::null::FenceMode::Manual),
        &info,
    );
    let oldest = ctx.execute(ctx.get_command_list(QueueType::Graphics, "main")?)?;
    assert!(!ctx.is_complete(oldest));
    for _ in 0..2 {
        ctx.execute(ctx.get_command_list(QueueType::Graphics, "main")?)?;
    }
    assert!(ctx.is_complete(oldest));
    Ok(())
}

#[test]
fn deleted_resource_releases_native_object() -> anyhow::Result<()> {
    let ctx = context();
    let target = render_target(&ctx, "target", 4, 4);
    assert_eq!(ctx.backend().live_resources(), 1);
    ctx.delete_resource(target);
    assert_eq!(ctx.backend().live_resources(), 0);
    assert!(matches!(ctx.resource_info(target), Err(GPUError::InvalidResource)));
    Ok(())
}
