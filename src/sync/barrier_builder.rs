use ash::vk;
use smallvec::SmallVec;

use crate::gpu::resources::ResourceId;
use crate::sync::state::ResourceState;
use crate::sync::tracker::{Barrier, Subresource};

/// Native object behind a tracked resource.
#[derive(Clone, Copy, Debug)]
pub enum VkTarget {
    Image {
        image: vk::Image,
        aspect: vk::ImageAspectFlags,
        mip_levels: u32,
    },
    Buffer(vk::Buffer),
}

pub trait ResourceLookup {
    fn target(&self, resource: ResourceId) -> VkTarget;
}

pub fn image_layout(state: ResourceState) -> vk::ImageLayout {
    if state.is_empty() {
        return vk::ImageLayout::GENERAL;
    }
    if state == ResourceState::PRESENT {
        return vk::ImageLayout::PRESENT_SRC_KHR;
    }
    if state == ResourceState::RENDER_TARGET {
        return vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL;
    }
    if state.contains(ResourceState::DEPTH_WRITE) {
        return vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL;
    }
    if state == ResourceState::COPY_DEST {
        return vk::ImageLayout::TRANSFER_DST_OPTIMAL;
    }
    if state == ResourceState::COPY_SOURCE {
        return vk::ImageLayout::TRANSFER_SRC_OPTIMAL;
    }
    if state.contains(ResourceState::DEPTH_READ)
        && (ResourceState::DEPTH_READ | ResourceState::SHADER_RESOURCE).contains(state)
    {
        return vk::ImageLayout::DEPTH_STENCIL_READ_ONLY_OPTIMAL;
    }
    if ResourceState::SHADER_RESOURCE.contains(state) {
        return vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL;
    }
    vk::ImageLayout::GENERAL
}

pub fn access_mask(state: ResourceState) -> vk::AccessFlags2 {
    const TABLE: &[(ResourceState, vk::AccessFlags2)] = &[
        (
            ResourceState::VERTEX_AND_CONSTANT_BUFFER,
            vk::AccessFlags2::from_raw(
                vk::AccessFlags2::VERTEX_ATTRIBUTE_READ.as_raw() | vk::AccessFlags2::UNIFORM_READ.as_raw(),
            ),
        ),
        (ResourceState::INDEX_BUFFER, vk::AccessFlags2::INDEX_READ),
        (
            ResourceState::RENDER_TARGET,
            vk::AccessFlags2::from_raw(
                vk::AccessFlags2::COLOR_ATTACHMENT_READ.as_raw()
                    | vk::AccessFlags2::COLOR_ATTACHMENT_WRITE.as_raw(),
            ),
        ),
        (
            ResourceState::UNORDERED_ACCESS,
            vk::AccessFlags2::from_raw(
                vk::AccessFlags2::SHADER_STORAGE_READ.as_raw() | vk::AccessFlags2::SHADER_STORAGE_WRITE.as_raw(),
            ),
        ),
        (
            ResourceState::DEPTH_WRITE,
            vk::AccessFlags2::from_raw(
                vk::AccessFlags2::DEPTH_STENCIL_ATTACHMENT_READ.as_raw()
                    | vk::AccessFlags2::DEPTH_STENCIL_ATTACHMENT_WRITE.as_raw(),
            ),
        ),
        (ResourceState::DEPTH_READ, vk::AccessFlags2::DEPTH_STENCIL_ATTACHMENT_READ),
        (ResourceState::NON_PIXEL_SHADER_RESOURCE, vk::AccessFlags2::SHADER_SAMPLED_READ),
        (ResourceState::PIXEL_SHADER_RESOURCE, vk::AccessFlags2::SHADER_SAMPLED_READ),
        (ResourceState::INDIRECT_ARGUMENT, vk::AccessFlags2::INDIRECT_COMMAND_READ),
        (ResourceState::COPY_DEST, vk::AccessFlags2::TRANSFER_WRITE),
        (ResourceState::COPY_SOURCE, vk::AccessFlags2::TRANSFER_READ),
        (ResourceState::RESOLVE_DEST, vk::AccessFlags2::TRANSFER_WRITE),
        (ResourceState::RESOLVE_SOURCE, vk::AccessFlags2::TRANSFER_READ),
    ];
    if state.is_empty() {
        return vk::AccessFlags2::MEMORY_READ | vk::AccessFlags2::MEMORY_WRITE;
    }
    TABLE
        .iter()
        .filter(|(bit, _)| state.contains(*bit))
        .fold(vk::AccessFlags2::NONE, |acc, (_, access)| acc | *access)
}

pub fn stage_mask(state: ResourceState) -> vk::PipelineStageFlags2 {
    const TABLE: &[(ResourceState, vk::PipelineStageFlags2)] = &[
        (ResourceState::VERTEX_AND_CONSTANT_BUFFER, vk::PipelineStageFlags2::VERTEX_INPUT),
        (ResourceState::INDEX_BUFFER, vk::PipelineStageFlags2::INDEX_INPUT),
        (ResourceState::RENDER_TARGET, vk::PipelineStageFlags2::COLOR_ATTACHMENT_OUTPUT),
        (ResourceState::UNORDERED_ACCESS, vk::PipelineStageFlags2::ALL_COMMANDS),
        (
            ResourceState::DEPTH_WRITE,
            vk::PipelineStageFlags2::from_raw(
                vk::PipelineStageFlags2::EARLY_FRAGMENT_TESTS.as_raw()
                    | vk::PipelineStageFlags2::LATE_FRAGMENT_TESTS.as_raw(),
            ),
        ),
        (ResourceState::DEPTH_READ, vk::PipelineStageFlags2::EARLY_FRAGMENT_TESTS),
        (
            ResourceState::NON_PIXEL_SHADER_RESOURCE,
            vk::PipelineStageFlags2::from_raw(
                vk::PipelineStageFlags2::VERTEX_SHADER.as_raw() | vk::PipelineStageFlags2::COMPUTE_SHADER.as_raw(),
            ),
        ),
        (ResourceState::PIXEL_SHADER_RESOURCE, vk::PipelineStageFlags2::FRAGMENT_SHADER),
        (ResourceState::INDIRECT_ARGUMENT, vk::PipelineStageFlags2::DRAW_INDIRECT),
        (ResourceState::COPY_DEST, vk::PipelineStageFlags2::TRANSFER),
        (ResourceState::COPY_SOURCE, vk::PipelineStageFlags2::TRANSFER),
        (ResourceState::RESOLVE_DEST, vk::PipelineStageFlags2::TRANSFER),
        (ResourceState::RESOLVE_SOURCE, vk::PipelineStageFlags2::TRANSFER),
        (ResourceState::PRESENT, vk::PipelineStageFlags2::BOTTOM_OF_PIPE),
    ];
    if state.is_empty() {
        return vk::PipelineStageFlags2::ALL_COMMANDS;
    }
    TABLE
        .iter()
        .filter(|(bit, _)| state.contains(*bit))
        .fold(vk::PipelineStageFlags2::NONE, |acc, (_, stage)| acc | *stage)
}

fn subresource_range(
    aspect: vk::ImageAspectFlags,
    mip_levels: u32,
    subresource: Subresource,
) -> vk::ImageSubresourceRange {
    match subresource {
        Subresource::All => vk::ImageSubresourceRange {
            aspect_mask: aspect,
            base_mip_level: 0,
            level_count: vk::REMAINING_MIP_LEVELS,
            base_array_layer: 0,
            layer_count: vk::REMAINING_ARRAY_LAYERS,
        },
        Subresource::Index(index) => {
            let mip_levels = mip_levels.max(1);
            vk::ImageSubresourceRange {
                aspect_mask: aspect,
                base_mip_level: index % mip_levels,
                level_count: 1,
                base_array_layer: index / mip_levels,
                layer_count: 1,
            }
        }
    }
}

/// Collects tracked barriers into one `vkCmdPipelineBarrier2` call.
pub struct BarrierBuilder<'a, R: ResourceLookup> {
    lookup: &'a R,
    images: SmallVec<[vk::ImageMemoryBarrier2; 4]>,
    buffers: SmallVec<[vk::BufferMemoryBarrier2; 4]>,
    memory: SmallVec<[vk::MemoryBarrier2; 1]>,
}

impl<'a, R: ResourceLookup> BarrierBuilder<'a, R> {
    pub fn new(lookup: &'a R) -> Self {
        Self {
            lookup,
            images: SmallVec::new(),
            buffers: SmallVec::new(),
            memory: SmallVec::new(),
        }
    }

    pub fn push(&mut self, barrier: &Barrier) {
        match *barrier {
            Barrier::Transition {
                resource,
                subresource,
                before,
                after,
            } => self.transition(resource, subresource, before, after),
            Barrier::Uav { resource } => self.uav(resource),
        }
    }

    pub fn extend(&mut self, barriers: &[Barrier]) {
        barriers.iter().for_each(|b| self.push(b));
    }

    fn transition(&mut self, resource: ResourceId, subresource: Subresource, before: ResourceState, after: ResourceState) {
        match self.lookup.target(resource) {
            VkTarget::Image {
                image,
                aspect,
                mip_levels,
            } => self.images.push(vk::ImageMemoryBarrier2 {
                src_stage_mask: stage_mask(before),
                src_access_mask: access_mask(before),
                dst_stage_mask: stage_mask(after),
                dst_access_mask: access_mask(after),
                old_layout: image_layout(before),
                new_layout: image_layout(after),
                src_queue_family_index: vk::QUEUE_FAMILY_IGNORED,
                dst_queue_family_index: vk::QUEUE_FAMILY_IGNORED,
                image,
                subresource_range: subresource_range(aspect, mip_levels, subresource),
                ..Default::default()
            }),
            VkTarget::Buffer(buffer) => self.buffers.push(vk::BufferMemoryBarrier2 {
                src_stage_mask: stage_mask(before),
                src_access_mask: access_mask(before),
                dst_stage_mask: stage_mask(after),
                dst_access_mask: access_mask(after),
                src_queue_family_index: vk::QUEUE_FAMILY_IGNORED,
                dst_queue_family_index: vk::QUEUE_FAMILY_IGNORED,
                buffer,
                offset: 0,
                size: vk::WHOLE_SIZE,
                ..Default::default()
            }),
        }
    }

    fn uav(&mut self, _resource: ResourceId) {
        // Storage writes are ordered globally; one memory barrier covers
        // every UAV barrier in the batch.
        if !self.memory.is_empty() {
            return;
        }
        let storage = vk::AccessFlags2::SHADER_STORAGE_READ | vk::AccessFlags2::SHADER_STORAGE_WRITE;
        self.memory.push(vk::MemoryBarrier2 {
            src_stage_mask: vk::PipelineStageFlags2::ALL_COMMANDS,
            src_access_mask: storage,
            dst_stage_mask: vk::PipelineStageFlags2::ALL_COMMANDS,
            dst_access_mask: storage,
            ..Default::default()
        });
    }

    pub fn is_empty(&self) -> bool {
        self.images.is_empty() && self.buffers.is_empty() && self.memory.is_empty()
    }

    /// Records the batch into `cmd` and clears it.
    ///
    /// # Safety
    /// `cmd` must be a command buffer of `device` in the recording state.
    pub unsafe fn emit(&mut self, device: &ash::Device, cmd: vk::CommandBuffer) {
        if self.is_empty() {
            return;
        }
        let deps = vk::DependencyInfo::builder()
            .memory_barriers(&self.memory)
            .image_memory_barriers(&self.images)
            .buffer_memory_barriers(&self.buffers)
            .build();
        device.cmd_pipeline_barrier2(cmd, &deps);
        self.images.clear();
        self.buffers.clear();
        self.memory.clear();
    }
}
