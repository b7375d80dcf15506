use crate::gpu::descriptors::DescriptorSlot;
use crate::gpu::error::Result;
use crate::gpu::structs::{Rect2D, Topology, Viewport};
use crate::gpu::Backend;
use crate::sync::{ResourceState, Subresource};

use super::types::{
    DispatchArgs, DrawArgs, DrawIndexedArgs, GpuAddress, IndexBufferView, VertexBufferView,
};

/// A tracked barrier with its resource resolved to the native object.
pub enum ResolvedBarrier<'a, B: Backend> {
    Transition {
        resource: &'a B::Resource,
        subresource: Subresource,
        before: ResourceState,
        after: ResourceState,
    },
    Uav {
        resource: &'a B::Resource,
    },
}

/// Native command recording.
///
/// Implemented by each backend's command list. Calls map one-to-one onto
/// the explicit API; every bit of state tracking happens above this trait.
pub trait CommandSink<B: Backend> {
    fn resource_barriers(&mut self, barriers: &[ResolvedBarrier<'_, B>]);

    fn set_graphics_pipeline(&mut self, pipeline: &B::Pipeline);
    fn set_compute_pipeline(&mut self, pipeline: &B::Pipeline);
    fn set_graphics_bind_layout(&mut self, layout: &B::BindLayout);
    fn set_compute_bind_layout(&mut self, layout: &B::BindLayout);
    /// Points table `index` of the bound layout at `base`.
    fn set_graphics_table(&mut self, index: u32, base: DescriptorSlot);
    fn set_compute_table(&mut self, index: u32, base: DescriptorSlot);

    fn set_render_targets(&mut self, colors: &[DescriptorSlot], depth: Option<DescriptorSlot>);
    fn set_viewport(&mut self, viewport: &Viewport);
    fn set_scissor(&mut self, rect: &Rect2D);
    fn set_topology(&mut self, topology: Topology);
    fn set_vertex_buffer(&mut self, slot: u32, view: &VertexBufferView<'_, B>);
    fn set_index_buffer(&mut self, view: &IndexBufferView<'_, B>);

    /// Copies `data` into upload memory owned by the list's allocator. The
    /// memory stays valid until the allocator is reset.
    fn upload_constants(&mut self, data: &[u8]) -> Result<GpuAddress>;

    fn draw(&mut self, args: &DrawArgs);
    fn draw_indexed(&mut self, args: &DrawIndexedArgs);
    fn dispatch(&mut self, args: &DispatchArgs);

    fn clear_render_target(&mut self, view: DescriptorSlot, color: [f32; 4]);
    fn clear_depth_stencil(&mut self, view: DescriptorSlot, depth: f32, stencil: u8);
    fn clear_unordered_access(&mut self, view: DescriptorSlot, resource: &B::Resource, values: [u32; 4]);
    fn copy_resource(&mut self, dst: &B::Resource, src: &B::Resource);
    fn copy_buffer_region(
        &mut self,
        dst: &B::Resource,
        dst_offset: u64,
        src: &B::Resource,
        src_offset: u64,
        size: u64,
    );

    fn begin_debug_marker(&mut self, name: &str);
    fn end_debug_marker(&mut self);
}
