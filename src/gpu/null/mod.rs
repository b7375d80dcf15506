//! Headless backend.
//!
//! Records every native call into plain data so tests can inspect exactly
//! what reached the "GPU": barriers, bindings, draws, submissions, fence
//! signals and descriptor writes. No work is ever executed; fences either
//! complete as soon as they are signaled or when the test says so.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use parking_lot::Mutex;
use rustc_hash::FxHashMap;

use super::descriptors::DescriptorSlot;
use super::driver::{
    CommandSink, ComputePipelineDesc, DispatchArgs, DrawArgs, DrawIndexedArgs, GpuAddress,
    GraphicsPipelineDesc, IndexBufferView, IndexType, ResolvedBarrier, VertexBufferView,
};
use super::error::{GPUError, Result};
use super::execution::BindingTable;
use super::shader::RangeKind;
use super::structs::{QueueType, Rect2D, ResourceDesc, SamplerDesc, Topology, ViewKind, Viewport};
use super::Backend;
use crate::sync::{ResourceState, Subresource};
use crate::utils::content_hash;

const CONSTANT_ALIGNMENT: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FenceMode {
    /// Signaled values complete immediately.
    #[default]
    Immediate,
    /// Values complete only through [`NullBackend::complete`] or a wait.
    Manual,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NullBarrier {
    Transition {
        resource: u64,
        subresource: Subresource,
        before: ResourceState,
        after: ResourceState,
    },
    Uav {
        resource: u64,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub enum NullCommand {
    Barriers(Vec<NullBarrier>),
    SetGraphicsPipeline(u64),
    SetComputePipeline(u64),
    SetGraphicsBindLayout(u64),
    SetComputeBindLayout(u64),
    SetGraphicsTable { index: u32, base: DescriptorSlot },
    SetComputeTable { index: u32, base: DescriptorSlot },
    SetRenderTargets { colors: Vec<DescriptorSlot>, depth: Option<DescriptorSlot> },
    SetViewport(Viewport),
    SetScissor(Rect2D),
    SetTopology(Topology),
    SetVertexBuffer { slot: u32, resource: u64, offset: u64, stride: u32 },
    SetIndexBuffer { resource: u64, offset: u64, format: IndexType },
    Draw(DrawArgs),
    DrawIndexed(DrawIndexedArgs),
    Dispatch(DispatchArgs),
    ClearRenderTarget { view: DescriptorSlot, color: [f32; 4] },
    ClearDepthStencil { view: DescriptorSlot, depth: f32, stencil: u8 },
    ClearUnorderedAccess { view: DescriptorSlot, resource: u64, values: [u32; 4] },
    CopyResource { dst: u64, src: u64 },
    CopyBufferRegion { dst: u64, dst_offset: u64, src: u64, src_offset: u64, size: u64 },
    BeginMarker(String),
    EndMarker,
}

impl NullCommand {
    pub fn barriers(&self) -> &[NullBarrier] {
        match self {
            NullCommand::Barriers(barriers) => barriers,
            _ => &[],
        }
    }
}

/// What a descriptor slot currently holds.
#[derive(Debug, Clone, PartialEq)]
pub enum NullDescriptor {
    View { resource: u64, kind: ViewKind },
    Null(RangeKind),
    Constant { address: GpuAddress, size: u32 },
    Sampler(SamplerDesc),
}

#[derive(Debug, Clone, PartialEq)]
pub enum QueueEvent {
    Execute { list: u64, commands: Vec<NullCommand> },
    Signal(u64),
    Wait { queue: QueueType, value: u64 },
}

pub struct NullQueue {
    index: usize,
    kind: QueueType,
}

pub struct NullResource {
    id: u64,
    desc: ResourceDesc,
    initial: ResourceState,
}

impl NullResource {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn desc(&self) -> &ResourceDesc {
        &self.desc
    }

    pub fn initial_state(&self) -> ResourceState {
        self.initial
    }
}

pub struct NullCommandAllocator {
    id: u64,
    queue: QueueType,
    resets: u64,
}

impl NullCommandAllocator {
    pub fn resets(&self) -> u64 {
        self.resets
    }
}

pub struct NullCommandList {
    id: u64,
    queue: QueueType,
    allocator: u64,
    closed: bool,
    commands: Vec<NullCommand>,
    upload: Vec<u8>,
}

impl NullCommandList {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn commands(&self) -> &[NullCommand] {
        &self.commands
    }

    fn record(&mut self, command: NullCommand) {
        assert!(!self.closed, "recording into closed null command list {}", self.id);
        self.commands.push(command);
    }
}

pub struct NullBindLayout {
    id: u64,
    tables: Vec<BindingTable>,
}

impl NullBindLayout {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn tables(&self) -> &[BindingTable] {
        &self.tables
    }
}

pub struct NullPipeline {
    id: u64,
    layout: u64,
    bytecode_hash: u64,
}

impl NullPipeline {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn layout(&self) -> u64 {
        self.layout
    }

    pub fn bytecode_hash(&self) -> u64 {
        self.bytecode_hash
    }
}

struct QueueLog {
    kind: QueueType,
    signaled: AtomicU64,
    completed: AtomicU64,
    events: Mutex<Vec<QueueEvent>>,
}

/// Backend that records instead of rendering.
#[derive(Default)]
pub struct NullBackend {
    fence_mode: FenceMode,
    next_id: AtomicU64,
    queues: Mutex<Vec<std::sync::Arc<QueueLog>>>,
    descriptors: Mutex<FxHashMap<DescriptorSlot, NullDescriptor>>,
    pipelines_created: AtomicU64,
    bind_layouts_created: AtomicU64,
    allocator_resets: AtomicU64,
    live_resources: AtomicU64,
    fail_pipelines: AtomicBool,
}

impl NullBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_fence_mode(fence_mode: FenceMode) -> Self {
        Self {
            fence_mode,
            ..Self::default()
        }
    }

    fn next_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed) + 1
    }

    fn queue_log(&self, queue: &NullQueue) -> std::sync::Arc<QueueLog> {
        std::sync::Arc::clone(&self.queues.lock()[queue.index])
    }

    fn log_for(&self, kind: QueueType) -> Option<std::sync::Arc<QueueLog>> {
        self.queues.lock().iter().find(|q| q.kind == kind).cloned()
    }

    /// Everything submitted to the first queue of `kind`, in order.
    pub fn events(&self, kind: QueueType) -> Vec<QueueEvent> {
        self.log_for(kind)
            .map(|log| log.events.lock().clone())
            .unwrap_or_default()
    }

    /// Command streams of every executed list on `kind`, in submission order.
    pub fn executed(&self, kind: QueueType) -> Vec<Vec<NullCommand>> {
        self.events(kind)
            .into_iter()
            .filter_map(|event| match event {
                QueueEvent::Execute { commands, .. } => Some(commands),
                _ => None,
            })
            .collect()
    }

    pub fn clear_events(&self) {
        for log in self.queues.lock().iter() {
            log.events.lock().clear();
        }
    }

    /// Marks work on `kind` as finished up to `value`.
    pub fn complete(&self, kind: QueueType, value: u64) {
        if let Some(log) = self.log_for(kind) {
            log.completed.fetch_max(value, Ordering::AcqRel);
        }
    }

    /// Marks everything signaled on `kind` as finished.
    pub fn complete_all(&self, kind: QueueType) {
        if let Some(log) = self.log_for(kind) {
            let signaled = log.signaled.load(Ordering::Acquire);
            log.completed.fetch_max(signaled, Ordering::AcqRel);
        }
    }

    pub fn descriptor(&self, slot: DescriptorSlot) -> Option<NullDescriptor> {
        self.descriptors.lock().get(&slot).cloned()
    }

    pub fn pipelines_created(&self) -> u64 {
        self.pipelines_created.load(Ordering::Relaxed)
    }

    pub fn bind_layouts_created(&self) -> u64 {
        self.bind_layouts_created.load(Ordering::Relaxed)
    }

    pub fn allocator_resets(&self) -> u64 {
        self.allocator_resets.load(Ordering::Relaxed)
    }

    pub fn live_resources(&self) -> u64 {
        self.live_resources.load(Ordering::Relaxed)
    }

    /// Makes pipeline creation fail, as a lost device would.
    pub fn fail_pipelines(&self, fail: bool) {
        self.fail_pipelines.store(fail, Ordering::Relaxed);
    }
}

impl Backend for NullBackend {
    type Queue = NullQueue;
    type Resource = NullResource;
    type CommandAllocator = NullCommandAllocator;
    type CommandList = NullCommandList;
    type BindLayout = NullBindLayout;
    type Pipeline = NullPipeline;

    fn create_queue(&self, kind: QueueType) -> Result<NullQueue> {
        let mut queues = self.queues.lock();
        queues.push(std::sync::Arc::new(QueueLog {
            kind,
            signaled: AtomicU64::new(0),
            completed: AtomicU64::new(0),
            events: Mutex::new(Vec::new()),
        }));
        Ok(NullQueue {
            index: queues.len() - 1,
            kind,
        })
    }

    fn create_resource(&self, desc: &ResourceDesc, initial: ResourceState) -> Result<NullResource> {
        self.live_resources.fetch_add(1, Ordering::Relaxed);
        Ok(NullResource {
            id: self.next_id(),
            desc: desc.clone(),
            initial,
        })
    }

    fn destroy_resource(&self, _resource: NullResource) {
        self.live_resources.fetch_sub(1, Ordering::Relaxed);
    }

    fn write_view(&self, resource: &NullResource, _desc: &ResourceDesc, kind: ViewKind, slot: DescriptorSlot) {
        self.descriptors.lock().insert(
            slot,
            NullDescriptor::View {
                resource: resource.id,
                kind,
            },
        );
    }

    fn write_null_view(&self, kind: RangeKind, slot: DescriptorSlot) {
        self.descriptors.lock().insert(slot, NullDescriptor::Null(kind));
    }

    fn write_constant_view(&self, address: GpuAddress, size: u32, slot: DescriptorSlot) {
        self.descriptors
            .lock()
            .insert(slot, NullDescriptor::Constant { address, size });
    }

    fn write_sampler(&self, desc: &SamplerDesc, slot: DescriptorSlot) {
        self.descriptors.lock().insert(slot, NullDescriptor::Sampler(*desc));
    }

    fn copy_descriptors(&self, dst: DescriptorSlot, src: DescriptorSlot, count: u32) {
        let mut descriptors = self.descriptors.lock();
        for i in 0..count {
            let from = DescriptorSlot {
                heap: src.heap,
                index: src.index + i,
            };
            let to = DescriptorSlot {
                heap: dst.heap,
                index: dst.index + i,
            };
            match descriptors.get(&from).cloned() {
                Some(descriptor) => {
                    descriptors.insert(to, descriptor);
                }
                None => {
                    descriptors.remove(&to);
                }
            }
        }
    }

    fn create_command_allocator(&self, queue: QueueType) -> Result<NullCommandAllocator> {
        Ok(NullCommandAllocator {
            id: self.next_id(),
            queue,
            resets: 0,
        })
    }

    fn reset_command_allocator(&self, allocator: &mut NullCommandAllocator) -> Result<()> {
        allocator.resets += 1;
        self.allocator_resets.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    fn create_command_list(
        &self,
        queue: QueueType,
        allocator: &mut NullCommandAllocator,
    ) -> Result<NullCommandList> {
        assert_eq!(queue, allocator.queue, "allocator belongs to another queue type");
        Ok(NullCommandList {
            id: self.next_id(),
            queue,
            allocator: allocator.id,
            closed: false,
            commands: Vec::new(),
            upload: Vec::new(),
        })
    }

    fn reset_command_list(
        &self,
        list: &mut NullCommandList,
        allocator: &mut NullCommandAllocator,
    ) -> Result<()> {
        assert_eq!(list.queue, allocator.queue, "allocator belongs to another queue type");
        list.allocator = allocator.id;
        list.closed = false;
        list.commands.clear();
        list.upload.clear();
        Ok(())
    }

    fn close_command_list(&self, list: &mut NullCommandList) -> Result<()> {
        assert!(!list.closed, "null command list {} closed twice", list.id);
        list.closed = true;
        Ok(())
    }

    fn create_bind_layout(&self, tables: &[BindingTable]) -> Result<NullBindLayout> {
        self.bind_layouts_created.fetch_add(1, Ordering::Relaxed);
        Ok(NullBindLayout {
            id: self.next_id(),
            tables: tables.to_vec(),
        })
    }

    fn create_graphics_pipeline(&self, desc: &GraphicsPipelineDesc<'_, Self>) -> Result<NullPipeline> {
        if self.fail_pipelines.load(Ordering::Relaxed) {
            return Err(GPUError::Backend(format!(
                "graphics pipeline '{}' creation failed",
                desc.debug_name
            )));
        }
        self.pipelines_created.fetch_add(1, Ordering::Relaxed);
        Ok(NullPipeline {
            id: self.next_id(),
            layout: desc.layout.id,
            bytecode_hash: content_hash(&(desc.vertex, desc.pixel)),
        })
    }

    fn create_compute_pipeline(&self, desc: &ComputePipelineDesc<'_, Self>) -> Result<NullPipeline> {
        if self.fail_pipelines.load(Ordering::Relaxed) {
            return Err(GPUError::Backend(format!(
                "compute pipeline '{}' creation failed",
                desc.debug_name
            )));
        }
        self.pipelines_created.fetch_add(1, Ordering::Relaxed);
        Ok(NullPipeline {
            id: self.next_id(),
            layout: desc.layout.id,
            bytecode_hash: content_hash(desc.compute),
        })
    }

    fn execute(&self, queue: &NullQueue, lists: &[&NullCommandList]) -> Result<()> {
        let log = self.queue_log(queue);
        let mut events = log.events.lock();
        for list in lists {
            assert!(list.closed, "executing open null command list {}", list.id);
            assert_eq!(list.queue, queue.kind, "list recorded for another queue type");
            events.push(QueueEvent::Execute {
                list: list.id,
                commands: list.commands.clone(),
            });
        }
        Ok(())
    }

    fn signal(&self, queue: &NullQueue, value: u64) -> Result<()> {
        let log = self.queue_log(queue);
        log.events.lock().push(QueueEvent::Signal(value));
        log.signaled.fetch_max(value, Ordering::AcqRel);
        if self.fence_mode == FenceMode::Immediate {
            log.completed.fetch_max(value, Ordering::AcqRel);
        }
        Ok(())
    }

    fn completed_value(&self, queue: &NullQueue) -> u64 {
        self.queue_log(queue).completed.load(Ordering::Acquire)
    }

    fn wait_for_value(&self, queue: &NullQueue, value: u64) -> Result<()> {
        let log = self.queue_log(queue);
        if value > log.signaled.load(Ordering::Acquire) {
            return Err(GPUError::Backend(format!(
                "waiting for value {value} that was never signaled on {:?}",
                queue.kind
            )));
        }
        // Nothing runs on the null device, so any signaled work is done by
        // the time someone waits for it.
        log.completed.fetch_max(value, Ordering::AcqRel);
        Ok(())
    }

    fn queue_wait(&self, queue: &NullQueue, other: &NullQueue, value: u64) -> Result<()> {
        self.queue_log(queue).events.lock().push(QueueEvent::Wait {
            queue: other.kind,
            value,
        });
        Ok(())
    }
}

impl CommandSink<NullBackend> for NullCommandList {
    fn resource_barriers(&mut self, barriers: &[ResolvedBarrier<'_, NullBackend>]) {
        let barriers = barriers
            .iter()
            .map(|b| match b {
                ResolvedBarrier::Transition {
                    resource,
                    subresource,
                    before,
                    after,
                } => NullBarrier::Transition {
                    resource: resource.id,
                    subresource: *subresource,
                    before: *before,
                    after: *after,
                },
                ResolvedBarrier::Uav { resource } => NullBarrier::Uav {
                    resource: resource.id,
                },
            })
            .collect();
        self.record(NullCommand::Barriers(barriers));
    }

    fn set_graphics_pipeline(&mut self, pipeline: &NullPipeline) {
        self.record(NullCommand::SetGraphicsPipeline(pipeline.id));
    }

    fn set_compute_pipeline(&mut self, pipeline: &NullPipeline) {
        self.record(NullCommand::SetComputePipeline(pipeline.id));
    }

    fn set_graphics_bind_layout(&mut self, layout: &NullBindLayout) {
        self.record(NullCommand::SetGraphicsBindLayout(layout.id));
    }

    fn set_compute_bind_layout(&mut self, layout: &NullBindLayout) {
        self.record(NullCommand::SetComputeBindLayout(layout.id));
    }

    fn set_graphics_table(&mut self, index: u32, base: DescriptorSlot) {
        self.record(NullCommand::SetGraphicsTable { index, base });
    }

    fn set_compute_table(&mut self, index: u32, base: DescriptorSlot) {
        self.record(NullCommand::SetComputeTable { index, base });
    }

    fn set_render_targets(&mut self, colors: &[DescriptorSlot], depth: Option<DescriptorSlot>) {
        self.record(NullCommand::SetRenderTargets {
            colors: colors.to_vec(),
            depth,
        });
    }

    fn set_viewport(&mut self, viewport: &Viewport) {
        self.record(NullCommand::SetViewport(*viewport));
    }

    fn set_scissor(&mut self, rect: &Rect2D) {
        self.record(NullCommand::SetScissor(*rect));
    }

    fn set_topology(&mut self, topology: Topology) {
        self.record(NullCommand::SetTopology(topology));
    }

    fn set_vertex_buffer(&mut self, slot: u32, view: &VertexBufferView<'_, NullBackend>) {
        self.record(NullCommand::SetVertexBuffer {
            slot,
            resource: view.resource.id,
            offset: view.offset,
            stride: view.stride,
        });
    }

    fn set_index_buffer(&mut self, view: &IndexBufferView<'_, NullBackend>) {
        self.record(NullCommand::SetIndexBuffer {
            resource: view.resource.id,
            offset: view.offset,
            format: view.format,
        });
    }

    fn upload_constants(&mut self, data: &[u8]) -> Result<GpuAddress> {
        let offset = self.upload.len().next_multiple_of(CONSTANT_ALIGNMENT);
        self.upload.resize(offset, 0);
        self.upload.extend_from_slice(data);
        Ok(GpuAddress((self.allocator << 32) | offset as u64))
    }

    fn draw(&mut self, args: &DrawArgs) {
        self.record(NullCommand::Draw(*args));
    }

    fn draw_indexed(&mut self, args: &DrawIndexedArgs) {
        self.record(NullCommand::DrawIndexed(*args));
    }

    fn dispatch(&mut self, args: &DispatchArgs) {
        self.record(NullCommand::Dispatch(*args));
    }

    fn clear_render_target(&mut self, view: DescriptorSlot, color: [f32; 4]) {
        self.record(NullCommand::ClearRenderTarget { view, color });
    }

    fn clear_depth_stencil(&mut self, view: DescriptorSlot, depth: f32, stencil: u8) {
        self.record(NullCommand::ClearDepthStencil {
            view,
            depth,
            stencil,
        });
    }

    fn clear_unordered_access(&mut self, view: DescriptorSlot, resource: &NullResource, values: [u32; 4]) {
        self.record(NullCommand::ClearUnorderedAccess {
            view,
            resource: resource.id,
            values,
        });
    }

    fn copy_resource(&mut self, dst: &NullResource, src: &NullResource) {
        self.record(NullCommand::CopyResource {
            dst: dst.id,
            src: src.id,
        });
    }

    fn copy_buffer_region(
        &mut self,
        dst: &NullResource,
        dst_offset: u64,
        src: &NullResource,
        src_offset: u64,
        size: u64,
    ) {
        self.record(NullCommand::CopyBufferRegion {
            dst: dst.id,
            dst_offset,
            src: src.id,
            src_offset,
            size,
        });
    }

    fn begin_debug_marker(&mut self, name: &str) {
        self.record(NullCommand::BeginMarker(name.to_string()));
    }

    fn end_debug_marker(&mut self) {
        self.record(NullCommand::EndMarker);
    }
}
