/// Defines the interface that rendering backends must implement.
///
/// A backend wraps the explicit graphics API: it creates native queues,
/// command allocators and lists, resources, bind layouts and pipelines,
/// and writes descriptors into the slots the [`Context`] allocates. All
/// tracking, caching and pooling lives above this trait.
///
/// # Examples
/// ```
/// use tessel::gpu::{null::NullBackend, Context};
/// let ctx = Context::new(NullBackend::new(), &Default::default()).unwrap();
/// # drop(ctx);
/// ```
pub trait Backend: Send + Sync + Sized + 'static {
    type Queue: Send + Sync;
    type Resource: Send + Sync;
    type CommandAllocator: Send;
    type CommandList: CommandSink<Self> + Send;
    type BindLayout: Send + Sync;
    type Pipeline: Send + Sync;

    fn create_queue(&self, kind: QueueType) -> Result<Self::Queue>;

    fn create_resource(&self, desc: &ResourceDesc, initial: ResourceState) -> Result<Self::Resource>;
    fn destroy_resource(&self, resource: Self::Resource);

    fn write_view(&self, resource: &Self::Resource, desc: &ResourceDesc, kind: ViewKind, slot: DescriptorSlot);
    /// Fills `slot` with a descriptor that reads zeros, for inputs nothing
    /// was bound to.
    fn write_null_view(&self, kind: RangeKind, slot: DescriptorSlot);
    fn write_constant_view(&self, address: GpuAddress, size: u32, slot: DescriptorSlot);
    fn write_sampler(&self, desc: &SamplerDesc, slot: DescriptorSlot);
    fn copy_descriptors(&self, dst: DescriptorSlot, src: DescriptorSlot, count: u32);

    fn create_command_allocator(&self, queue: QueueType) -> Result<Self::CommandAllocator>;
    fn reset_command_allocator(&self, allocator: &mut Self::CommandAllocator) -> Result<()>;
    fn create_command_list(
        &self,
        queue: QueueType,
        allocator: &mut Self::CommandAllocator,
    ) -> Result<Self::CommandList>;
    fn reset_command_list(
        &self,
        list: &mut Self::CommandList,
        allocator: &mut Self::CommandAllocator,
    ) -> Result<()>;
    fn close_command_list(&self, list: &mut Self::CommandList) -> Result<()>;

    fn create_bind_layout(&self, tables: &[BindingTable]) -> Result<Self::BindLayout>;
    fn create_graphics_pipeline(&self, desc: &GraphicsPipelineDesc<'_, Self>) -> Result<Self::Pipeline>;
    fn create_compute_pipeline(&self, desc: &ComputePipelineDesc<'_, Self>) -> Result<Self::Pipeline>;

    /// Submits closed lists in order.
    fn execute(&self, queue: &Self::Queue, lists: &[&Self::CommandList]) -> Result<()>;
    fn signal(&self, queue: &Self::Queue, value: u64) -> Result<()>;
    fn completed_value(&self, queue: &Self::Queue) -> u64;
    /// Blocks until `queue` reached `value`.
    fn wait_for_value(&self, queue: &Self::Queue, value: u64) -> Result<()>;
    /// Makes `queue` wait on the GPU until `other` reached `value`.
    fn queue_wait(&self, queue: &Self::Queue, other: &Self::Queue, value: u64) -> Result<()>;
}

pub mod cmd;
pub mod context;
pub mod descriptors;
pub mod driver;
pub mod error;
pub mod execution;
pub mod fence;
pub mod null;
pub mod resources;
pub mod shader;
pub mod stats;
pub mod structs;

pub use cmd::CommandList;
pub use context::{Context, SamplerId};
pub use descriptors::{DescriptorAllocation, DescriptorHeapKind, DescriptorSlot};
pub use driver::{
    CommandSink, ComputePipelineDesc, GpuAddress, GraphicsPipelineDesc, IndexType, ResolvedBarrier,
};
pub use error::{GPUError, Result};
pub use execution::{BindingTable, Bindings, ListState, PoolCounts, UsageTag, PATCHUP_USAGE};
pub use fence::FenceHandle;
pub use resources::ResourceId;
pub use shader::{
    BindingKind, ConstantBufferDesc, ConstantVariable, RangeKind, ShaderHandle, ShaderInput, ShaderReflection,
    ShaderStage, ShaderStages,
};
pub use stats::FrameStats;
pub use structs::*;

use crate::sync::ResourceState;
