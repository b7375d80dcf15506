use bytemuck::{Pod, Zeroable};
use smallvec::SmallVec;

use crate::gpu::structs::{
    BlendState, DepthState, Format, RasterizerState, Topology, VertexLayout,
};
use crate::gpu::Backend;

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum IndexType {
    U16,
    U32,
}

impl IndexType {
    pub fn size(self) -> u32 {
        match self {
            IndexType::U16 => 2,
            IndexType::U32 => 4,
        }
    }
}

/// GPU virtual address of upload memory.
#[repr(transparent)]
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq, Hash, Pod, Zeroable)]
pub struct GpuAddress(pub u64);

pub struct VertexBufferView<'a, B: Backend> {
    pub resource: &'a B::Resource,
    pub offset: u64,
    pub size: u64,
    pub stride: u32,
}

pub struct IndexBufferView<'a, B: Backend> {
    pub resource: &'a B::Resource,
    pub offset: u64,
    pub size: u64,
    pub format: IndexType,
}

#[repr(C)]
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq, Pod, Zeroable)]
pub struct DrawArgs {
    pub vertex_count: u32,
    pub instance_count: u32,
    pub first_vertex: u32,
    pub first_instance: u32,
}

#[repr(C)]
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq, Pod, Zeroable)]
pub struct DrawIndexedArgs {
    pub index_count: u32,
    pub instance_count: u32,
    pub first_index: u32,
    pub base_vertex: i32,
    pub first_instance: u32,
}

#[repr(C)]
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq, Pod, Zeroable)]
pub struct DispatchArgs {
    pub x: u32,
    pub y: u32,
    pub z: u32,
}

/// Everything a backend needs to build a graphics pipeline object.
pub struct GraphicsPipelineDesc<'a, B: Backend> {
    pub debug_name: &'a str,
    pub layout: &'a B::BindLayout,
    pub vertex: &'a [u8],
    pub pixel: Option<&'a [u8]>,
    pub rasterizer: RasterizerState,
    pub depth: DepthState,
    pub blend: BlendState,
    pub topology: Topology,
    pub vertex_layout: &'a VertexLayout,
    pub color_formats: SmallVec<[Format; 8]>,
    pub depth_format: Option<Format>,
}

pub struct ComputePipelineDesc<'a, B: Backend> {
    pub debug_name: &'a str,
    pub layout: &'a B::BindLayout,
    pub compute: &'a [u8],
}
