//! Command encoding.
//!
//! [`CommandList`] turns declarative calls ("this shader, this texture under
//! this name, draw") into native commands. Resource transitions are derived
//! from how resources are bound, binding tables are filled from temporary
//! descriptors right before the draw that needs them, and pipelines come
//! from the context's cache.

use std::sync::Arc;

use bitflags::bitflags;
use bytemuck::Pod;
use rustc_hash::FxHashMap;
use smallvec::{smallvec, SmallVec};

use super::context::{Context, SamplerId};
use super::descriptors::DescriptorSlot;
use super::driver::{
    CommandSink, DispatchArgs, DrawArgs, DrawIndexedArgs, GpuAddress, IndexBufferView, IndexType,
    VertexBufferView,
};
use super::error::{GPUError, Result};
use super::execution::{
    Bindings, BindingSlot, ComputePipelineQuery, GraphicsPipelineQuery, ListState, Recording,
    UsageTag,
};
use super::resources::{ResourceId, ResourceRegistry};
use super::shader::{BindingKind, ShaderHandle, ShaderStages};
use super::stats::ListStats;
use super::structs::{
    BlendState, DepthState, Format, QueueType, RasterizerState, Rect2D, Topology, VertexLayout,
    ViewKind, Viewport,
};
use super::Backend;
use crate::sync::{ResourceState, ResourceStateTracker, Subresource};

const MAX_RENDER_TARGETS: usize = 8;

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    struct Dirty: u32 {
        const PIPELINE       = 1 << 0;
        const RENDER_TARGETS = 1 << 1;
        const VIEWPORT       = 1 << 2;
        const SCISSOR        = 1 << 3;
        const TOPOLOGY       = 1 << 4;
        const VERTEX_STREAMS = 1 << 5;
        const INDEX_BUFFER   = 1 << 6;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PipelineKind {
    Graphics,
    Compute,
}

/// What a named shader input is currently bound to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BoundInput {
    View { resource: ResourceId, kind: ViewKind },
    Sampler(SamplerId),
    Constant { hash: u64, address: GpuAddress, size: u32 },
}

struct ConstantShadow {
    data: Vec<u8>,
    dirty: bool,
}

/// Bound inputs of one pipeline kind.
struct BindingState<B: Backend> {
    bindings: Option<Arc<Bindings<B>>>,
    inputs: FxHashMap<String, BoundInput>,
    /// CPU copies of constant buffers, keyed by buffer layout hash.
    constants: FxHashMap<u64, ConstantShadow>,
    dirty_tables: SmallVec<[bool; 4]>,
    layout_dirty: bool,
}

impl<B: Backend> Default for BindingState<B> {
    fn default() -> Self {
        Self {
            bindings: None,
            inputs: FxHashMap::default(),
            constants: FxHashMap::default(),
            dirty_tables: SmallVec::new(),
            layout_dirty: false,
        }
    }
}

impl<B: Backend> BindingState<B> {
    fn set_bindings(&mut self, bindings: Arc<Bindings<B>>) {
        if let Some(current) = &self.bindings {
            if Arc::ptr_eq(current, &bindings) {
                return;
            }
            self.layout_dirty |= !Arc::ptr_eq(&current.layout, &bindings.layout);
        } else {
            self.layout_dirty = true;
        }
        for buffer in bindings.constant_buffers() {
            self.constants
                .entry(buffer.hash)
                .or_insert_with(|| ConstantShadow {
                    data: vec![0; buffer.size as usize],
                    dirty: true,
                });
        }
        self.dirty_tables = smallvec![true; bindings.tables.len()];
        self.bindings = Some(bindings);
    }

    /// Forgets the layout so draws are skipped until shaders are set again.
    /// Bound inputs and constants are kept.
    fn clear(&mut self) {
        self.bindings = None;
        self.dirty_tables.clear();
        self.layout_dirty = false;
    }

    fn invalidate(&mut self) {
        self.layout_dirty = self.bindings.is_some();
        self.dirty_tables.iter_mut().for_each(|d| *d = true);
    }
}

#[derive(Debug, Clone, Copy)]
struct VertexStream {
    buffer: ResourceId,
    offset: u64,
    stride: u32,
}

#[derive(Debug, Clone, Copy)]
struct IndexStream {
    buffer: ResourceId,
    offset: u64,
    format: IndexType,
}

/// Fixed-function and output state of the graphics pipeline.
#[derive(Default)]
struct GraphicsState {
    vertex: Option<ShaderHandle>,
    pixel: Option<ShaderHandle>,
    rasterizer: RasterizerState,
    depth: DepthState,
    blend: BlendState,
    topology: Topology,
    vertex_layout: VertexLayout,
    render_targets: [Option<ResourceId>; MAX_RENDER_TARGETS],
    depth_target: Option<(ResourceId, bool)>,
    viewport: Option<Viewport>,
    scissor: Option<Rect2D>,
    vertex_streams: SmallVec<[Option<VertexStream>; 4]>,
    index_buffer: Option<IndexStream>,
}

/// A command list being recorded.
///
/// Obtained from [`Context::get_command_list`] and handed back through
/// [`Context::execute`]. Dropping a list without executing it returns its
/// native objects to the pool; nothing it recorded reaches the GPU.
pub struct CommandList<'a, B: Backend> {
    ctx: &'a Context<B>,
    recording: Option<Recording<B>>,
    tracker: ResourceStateTracker,
    stats: ListStats,
    dirty: Dirty,
    active: PipelineKind,
    graphics: GraphicsState,
    compute_shader: Option<ShaderHandle>,
    graphics_bindings: BindingState<B>,
    compute_bindings: BindingState<B>,
    graphics_pipeline: Option<Arc<B::Pipeline>>,
    compute_pipeline: Option<Arc<B::Pipeline>>,
    /// Pipeline kind whose pipeline and layout are set on the native list.
    bound: Option<PipelineKind>,
}

impl<'a, B: Backend> CommandList<'a, B> {
    pub(crate) fn new(ctx: &'a Context<B>, recording: Recording<B>) -> Self {
        let queue = recording.queue();
        Self {
            ctx,
            recording: Some(recording),
            tracker: ResourceStateTracker::new(queue),
            stats: ListStats::default(),
            dirty: Dirty::all(),
            active: PipelineKind::Graphics,
            graphics: GraphicsState::default(),
            compute_shader: None,
            graphics_bindings: BindingState::default(),
            compute_bindings: BindingState::default(),
            graphics_pipeline: None,
            compute_pipeline: None,
            bound: None,
        }
    }

    pub fn queue(&self) -> QueueType {
        self.tracker.queue()
    }

    pub fn usage(&self) -> UsageTag {
        self.recording().usage()
    }

    pub fn state(&self) -> ListState {
        self.recording().state()
    }

    /// Barriers this list recorded so far, patchup excluded.
    pub fn barriers_emitted(&self) -> u64 {
        self.tracker.emitted()
    }

    /// State `resource` is in at this point of the list, if it was used.
    pub fn current_state(&self, resource: ResourceId, subresource: Subresource) -> Option<ResourceState> {
        self.tracker.current_state(resource, subresource)
    }

    fn recording(&self) -> &Recording<B> {
        match &self.recording {
            Some(recording) => recording,
            None => panic!("command list was already submitted"),
        }
    }

    pub(crate) fn into_submission(mut self) -> (Recording<B>, ResourceStateTracker, ListStats) {
        let Some(recording) = self.recording.take() else {
            panic!("command list was already submitted");
        };
        assert_eq!(
            recording.state(),
            ListState::Closed,
            "only closed command lists can be executed"
        );
        let tracker = std::mem::replace(&mut self.tracker, ResourceStateTracker::new(recording.queue()));
        (recording, tracker, self.stats)
    }

    fn warn(&self, message: String) {
        self.ctx.warnings.warn(&message);
    }

    ////////////////////////////////////////////////////////////////////////
    // Shader and fixed-function state
    ////////////////////////////////////////////////////////////////////////

    /// Selects the shaders for following draws. Binding calls after this
    /// resolve names against these shaders. A pair that declares the same
    /// input differently is rejected with a warning, and draws are skipped
    /// until a valid pair is set.
    pub fn set_shader_state(&mut self, vertex: ShaderHandle, pixel: Option<ShaderHandle>) -> Result<()> {
        self.active = PipelineKind::Graphics;
        let mut shaders: SmallVec<[ShaderHandle; 2]> = smallvec![vertex];
        shaders.extend(pixel);
        let Some(bindings) = self.resolve_bindings(&shaders)? else {
            self.graphics.vertex = None;
            self.graphics.pixel = None;
            self.graphics_bindings.clear();
            return Ok(());
        };
        if self.graphics.vertex != Some(vertex) || self.graphics.pixel != pixel {
            self.graphics.vertex = Some(vertex);
            self.graphics.pixel = pixel;
            self.dirty |= Dirty::PIPELINE;
        }
        self.graphics_bindings.set_bindings(bindings);
        Ok(())
    }

    pub fn set_compute_shader_state(&mut self, compute: ShaderHandle) -> Result<()> {
        self.active = PipelineKind::Compute;
        let Some(bindings) = self.resolve_bindings(&[compute])? else {
            self.compute_shader = None;
            self.compute_bindings.clear();
            return Ok(());
        };
        if self.compute_shader != Some(compute) {
            self.compute_shader = Some(compute);
            self.compute_pipeline = None;
        }
        self.compute_bindings.set_bindings(bindings);
        Ok(())
    }

    fn resolve_bindings(&self, shaders: &[ShaderHandle]) -> Result<Option<Arc<Bindings<B>>>> {
        match self.ctx.get_bindings(shaders) {
            Ok(bindings) => Ok(Some(bindings)),
            Err(GPUError::AmbiguousBinding { name }) => {
                self.warn(format!(
                    "shader input '{name}' is declared differently across stages; draws skipped until new shader state is set"
                ));
                Ok(None)
            }
            Err(err) => Err(err),
        }
    }

    /// Binds `target` as color output `index`, or unbinds it with `None`.
    pub fn set_render_target(&mut self, index: usize, target: Option<ResourceId>) {
        assert!(index < MAX_RENDER_TARGETS, "render target slot {index} out of range");
        if let Some(target) = target {
            assert!(
                self.view_of(target, ViewKind::RenderTarget).is_some(),
                "{target:?} was not created with render target usage"
            );
        }
        if self.graphics.render_targets[index] != target {
            self.graphics.render_targets[index] = target;
            self.dirty |= Dirty::RENDER_TARGETS | Dirty::PIPELINE;
        }
    }

    pub fn set_depth_stencil(&mut self, target: Option<ResourceId>, read_only: bool) {
        let target = target.map(|t| (t, read_only));
        if let Some((target, read_only)) = target {
            assert!(
                self.view_of(target, ViewKind::DepthStencil { read_only }).is_some(),
                "{target:?} was not created with depth stencil usage"
            );
        }
        if self.graphics.depth_target != target {
            self.graphics.depth_target = target;
            self.dirty |= Dirty::RENDER_TARGETS | Dirty::PIPELINE;
        }
    }

    pub fn set_viewport(&mut self, viewport: &Viewport) {
        if self.graphics.viewport != Some(*viewport) {
            self.graphics.viewport = Some(*viewport);
            self.dirty |= Dirty::VIEWPORT;
        }
    }

    pub fn set_scissor(&mut self, rect: Rect2D) {
        if self.graphics.scissor != Some(rect) {
            self.graphics.scissor = Some(rect);
            self.dirty |= Dirty::SCISSOR;
        }
    }

    pub fn set_topology(&mut self, topology: Topology) {
        if self.graphics.topology != topology {
            self.graphics.topology = topology;
            self.dirty |= Dirty::TOPOLOGY | Dirty::PIPELINE;
        }
    }

    pub fn set_rasterizer_state(&mut self, state: RasterizerState) {
        if self.graphics.rasterizer != state {
            self.graphics.rasterizer = state;
            self.dirty |= Dirty::PIPELINE;
        }
    }

    pub fn set_depth_state(&mut self, state: DepthState) {
        if self.graphics.depth != state {
            self.graphics.depth = state;
            self.dirty |= Dirty::PIPELINE;
        }
    }

    pub fn set_blend_state(&mut self, state: BlendState) {
        if self.graphics.blend != state {
            self.graphics.blend = state;
            self.dirty |= Dirty::PIPELINE;
        }
    }

    pub fn set_vertex_layout(&mut self, layout: &VertexLayout) {
        if self.graphics.vertex_layout != *layout {
            self.graphics.vertex_layout = layout.clone();
            self.dirty |= Dirty::PIPELINE;
        }
    }

    ////////////////////////////////////////////////////////////////////////
    // Resource binding
    ////////////////////////////////////////////////////////////////////////

    pub fn set_texture_2d(&mut self, name: &str, texture: ResourceId) {
        self.bind_view(name, texture, ViewKind::ShaderResource, &[BindingKind::Texture]);
    }

    pub fn set_rw_texture_2d(&mut self, name: &str, texture: ResourceId) {
        self.bind_view(name, texture, ViewKind::UnorderedAccess, &[BindingKind::RwTexture]);
    }

    pub fn set_buffer(&mut self, name: &str, buffer: ResourceId) {
        self.bind_view(name, buffer, ViewKind::ShaderResource, &[BindingKind::Buffer]);
    }

    pub fn set_rw_buffer(&mut self, name: &str, buffer: ResourceId) {
        self.bind_view(name, buffer, ViewKind::UnorderedAccess, &[BindingKind::RwBuffer]);
    }

    pub fn set_sampler(&mut self, name: &str, sampler: SamplerId) {
        self.bind(name, BoundInput::Sampler(sampler), &[BindingKind::Sampler]);
    }

    fn bind_view(&mut self, name: &str, resource: ResourceId, kind: ViewKind, accepts: &[BindingKind]) {
        assert!(
            self.view_of(resource, kind).is_some(),
            "{resource:?} has no {kind:?} view"
        );
        self.bind(name, BoundInput::View { resource, kind }, accepts);
    }

    fn bind(&mut self, name: &str, value: BoundInput, accepts: &[BindingKind]) {
        let Some(slot) = self.lookup_slot(name) else {
            return;
        };
        if !accepts.contains(&slot.kind) {
            self.warn(format!(
                "shader input '{name}' is a {:?}, cannot bind {value:?}",
                slot.kind
            ));
            return;
        }
        let state = self.binding_state_mut();
        if state.inputs.get(name) != Some(&value) {
            state.inputs.insert(name.to_string(), value);
            state.dirty_tables[slot.table as usize] = true;
        }
    }

    fn lookup_slot(&self, name: &str) -> Option<BindingSlot> {
        let Some(bindings) = &self.binding_state().bindings else {
            self.warn(format!("'{name}' bound before any shader state was set"));
            return None;
        };
        let slot = bindings.slot(name);
        if slot.is_none() {
            self.warn(format!("shader input '{name}' not found in bound shaders"));
        }
        slot
    }

    /// Writes `value` into the constant variable `name` of the bound
    /// shaders. Uploaded with the next draw or dispatch.
    pub fn set_constant<T: Pod>(&mut self, name: &str, value: &T) {
        let bytes = bytemuck::bytes_of(value);
        let location = {
            let Some(bindings) = &self.binding_state().bindings else {
                self.warn(format!("constant '{name}' set before any shader state was set"));
                return;
            };
            bindings.constant(name)
        };
        let Some(location) = location else {
            self.warn(format!("constant '{name}' not found in bound shaders"));
            return;
        };
        if bytes.len() > location.size as usize {
            self.warn(format!(
                "constant '{name}' holds {} bytes, got {}",
                location.size,
                bytes.len()
            ));
            return;
        }

        let Some(shadow) = self.binding_state_mut().constants.get_mut(&location.buffer) else {
            panic!("constant '{name}' belongs to an unknown buffer");
        };
        let start = location.offset as usize;
        let target = &mut shadow.data[start..start + bytes.len()];
        if *target != *bytes {
            target.copy_from_slice(bytes);
            shadow.dirty = true;
        }
    }

    /// Binds `buffer` from `offset` as vertex stream `slot`. Panics when
    /// `offset` lies past the end of the buffer.
    pub fn set_vertex_stream(&mut self, slot: u32, buffer: ResourceId, offset: u64, stride: u32) {
        self.check_stream_offset(buffer, offset);
        let slot = slot as usize;
        if self.graphics.vertex_streams.len() <= slot {
            self.graphics.vertex_streams.resize(slot + 1, None);
        }
        self.graphics.vertex_streams[slot] = Some(VertexStream {
            buffer,
            offset,
            stride,
        });
        self.dirty |= Dirty::VERTEX_STREAMS;
    }

    pub fn set_index_buffer(&mut self, buffer: ResourceId, offset: u64, format: IndexType) {
        self.check_stream_offset(buffer, offset);
        self.graphics.index_buffer = Some(IndexStream {
            buffer,
            offset,
            format,
        });
        self.dirty |= Dirty::INDEX_BUFFER;
    }

    fn check_stream_offset(&self, buffer: ResourceId, offset: u64) {
        let resources = self.ctx.resources.read();
        remaining_size(&resources.entry(buffer).desc, buffer, offset);
    }

    fn binding_state(&self) -> &BindingState<B> {
        match self.active {
            PipelineKind::Graphics => &self.graphics_bindings,
            PipelineKind::Compute => &self.compute_bindings,
        }
    }

    fn binding_state_mut(&mut self) -> &mut BindingState<B> {
        match self.active {
            PipelineKind::Graphics => &mut self.graphics_bindings,
            PipelineKind::Compute => &mut self.compute_bindings,
        }
    }

    fn view_of(&self, resource: ResourceId, kind: ViewKind) -> Option<DescriptorSlot> {
        self.ctx.resources.read().entry(resource).views.slot(kind)
    }

    ////////////////////////////////////////////////////////////////////////
    // Draws and dispatches
    ////////////////////////////////////////////////////////////////////////

    pub fn draw(&mut self, vertex_count: u32, first_vertex: u32) -> Result<()> {
        self.draw_instanced(vertex_count, 1, first_vertex, 0)
    }

    pub fn draw_instanced(
        &mut self,
        vertex_count: u32,
        instance_count: u32,
        first_vertex: u32,
        first_instance: u32,
    ) -> Result<()> {
        if !self.prepare_draw(false)? {
            return Ok(());
        }
        self.sink().draw(&DrawArgs {
            vertex_count,
            instance_count,
            first_vertex,
            first_instance,
        });
        self.stats.draws += 1;
        Ok(())
    }

    pub fn draw_indexed(
        &mut self,
        index_count: u32,
        instance_count: u32,
        first_index: u32,
        base_vertex: i32,
    ) -> Result<()> {
        assert!(self.graphics.index_buffer.is_some(), "indexed draw without an index buffer");
        if !self.prepare_draw(true)? {
            return Ok(());
        }
        self.sink().draw_indexed(&DrawIndexedArgs {
            index_count,
            instance_count,
            first_index,
            base_vertex,
            first_instance: 0,
        });
        self.stats.draws += 1;
        Ok(())
    }

    pub fn dispatch(&mut self, x: u32, y: u32, z: u32) -> Result<()> {
        if !self.prepare_dispatch()? {
            return Ok(());
        }
        self.sink().dispatch(&DispatchArgs { x, y, z });
        self.stats.dispatches += 1;
        Ok(())
    }

    fn sink(&mut self) -> &mut B::CommandList {
        match &mut self.recording {
            Some(recording) => recording.native_mut(),
            None => panic!("command list was already submitted"),
        }
    }

    /// Brings the native list up to date for a draw. Returns `false` when
    /// the draw has to be skipped.
    fn prepare_draw(&mut self, indexed: bool) -> Result<bool> {
        let (Some(vertex), Some(bindings)) = (self.graphics.vertex, self.graphics_bindings.bindings.clone())
        else {
            self.warn("draw without shader state".to_string());
            return Ok(false);
        };

        let ctx = self.ctx;
        if self.bound != Some(PipelineKind::Graphics) {
            self.dirty |= Dirty::PIPELINE;
            self.graphics_bindings.invalidate();
        }

        let resources = ctx.resources.read();
        // Pipeline first: building it is the only step that can fail after
        // commands were already recorded.
        let rebuilt = if self.dirty.contains(Dirty::PIPELINE) || self.graphics_pipeline.is_none() {
            let query = self.graphics_query(&resources, vertex);
            let library = ctx.shaders.read();
            Some(
                ctx.pipelines
                    .graphics_pipeline(ctx.backend(), &library, &bindings, &query, &ctx.stats)?,
            )
        } else {
            None
        };

        let Some(recording) = self.recording.as_mut() else {
            panic!("command list was already submitted");
        };
        let sink = recording.native_mut();
        if let Some(pipeline) = rebuilt {
            let changed = self
                .graphics_pipeline
                .as_ref()
                .map_or(true, |current| !Arc::ptr_eq(current, &pipeline));
            if changed || self.bound != Some(PipelineKind::Graphics) {
                sink.set_graphics_pipeline(&pipeline);
            }
            self.graphics_pipeline = Some(pipeline);
            self.dirty.remove(Dirty::PIPELINE);
        }
        self.bound = Some(PipelineKind::Graphics);

        // Transitions for everything the draw touches.
        let targets = self.graphics.render_targets;
        for target in targets.iter().flatten() {
            self.tracker.transition(
                &resources.tracked(*target),
                Subresource::All,
                ResourceState::RENDER_TARGET,
            );
        }
        if let Some((depth, read_only)) = self.graphics.depth_target {
            let state = if read_only {
                ResourceState::DEPTH_READ
            } else {
                ResourceState::DEPTH_WRITE
            };
            self.tracker
                .transition(&resources.tracked(depth), Subresource::All, state);
        }
        for stream in self.graphics.vertex_streams.iter().flatten() {
            self.tracker.transition(
                &resources.tracked(stream.buffer),
                Subresource::All,
                ResourceState::VERTEX_AND_CONSTANT_BUFFER,
            );
        }
        if indexed {
            if let Some(index) = self.graphics.index_buffer {
                self.tracker.transition(
                    &resources.tracked(index.buffer),
                    Subresource::All,
                    ResourceState::INDEX_BUFFER,
                );
            }
        }
        transition_inputs(&mut self.tracker, &resources, &self.graphics_bindings, &bindings);
        fire_barriers(&mut self.tracker, sink, &resources, &mut self.stats);

        flush_bindings(
            ctx,
            PipelineKind::Graphics,
            &mut self.graphics_bindings,
            &bindings,
            &resources,
            sink,
            &mut self.stats,
        )?;

        if self.dirty.contains(Dirty::RENDER_TARGETS) {
            let colors: SmallVec<[DescriptorSlot; MAX_RENDER_TARGETS]> = targets
                .iter()
                .flatten()
                .filter_map(|t| resources.entry(*t).views.slot(ViewKind::RenderTarget))
                .collect();
            let depth = self.graphics.depth_target.and_then(|(t, read_only)| {
                resources
                    .entry(t)
                    .views
                    .slot(ViewKind::DepthStencil { read_only })
            });
            sink.set_render_targets(&colors, depth);
        }
        if self.dirty.contains(Dirty::VIEWPORT) {
            if let Some(viewport) = &self.graphics.viewport {
                sink.set_viewport(viewport);
            }
        }
        if self.dirty.contains(Dirty::SCISSOR) {
            if let Some(rect) = &self.graphics.scissor {
                sink.set_scissor(rect);
            }
        }
        if self.dirty.contains(Dirty::TOPOLOGY) {
            sink.set_topology(self.graphics.topology);
        }
        if self.dirty.contains(Dirty::VERTEX_STREAMS) {
            for (slot, stream) in self.graphics.vertex_streams.iter().enumerate() {
                let Some(stream) = stream else {
                    continue;
                };
                let entry = resources.entry(stream.buffer);
                let size = remaining_size(&entry.desc, stream.buffer, stream.offset);
                sink.set_vertex_buffer(
                    slot as u32,
                    &VertexBufferView {
                        resource: &entry.native,
                        offset: stream.offset,
                        size,
                        stride: stream.stride,
                    },
                );
            }
        }
        if indexed && self.dirty.contains(Dirty::INDEX_BUFFER) {
            if let Some(index) = self.graphics.index_buffer {
                let entry = resources.entry(index.buffer);
                let size = remaining_size(&entry.desc, index.buffer, index.offset);
                sink.set_index_buffer(&IndexBufferView {
                    resource: &entry.native,
                    offset: index.offset,
                    size,
                    format: index.format,
                });
                self.dirty.remove(Dirty::INDEX_BUFFER);
            }
        }
        self.dirty.remove(
            Dirty::RENDER_TARGETS | Dirty::VIEWPORT | Dirty::SCISSOR | Dirty::TOPOLOGY | Dirty::VERTEX_STREAMS,
        );
        Ok(true)
    }

    fn graphics_query(&self, resources: &ResourceRegistry<B>, vertex: ShaderHandle) -> GraphicsPipelineQuery {
        let format_of = |id: ResourceId| {
            resources
                .entry(id)
                .desc
                .as_texture()
                .map_or(Format::Unknown, |t| t.format)
        };
        GraphicsPipelineQuery {
            vertex,
            pixel: self.graphics.pixel,
            rasterizer: self.graphics.rasterizer,
            depth: self.graphics.depth,
            blend: self.graphics.blend,
            topology: self.graphics.topology,
            vertex_layout: self.graphics.vertex_layout.clone(),
            color_formats: self
                .graphics
                .render_targets
                .iter()
                .flatten()
                .map(|t| format_of(*t))
                .collect(),
            depth_format: self.graphics.depth_target.map(|(t, _)| format_of(t)),
        }
    }

    fn prepare_dispatch(&mut self) -> Result<bool> {
        let (Some(shader), Some(bindings)) = (self.compute_shader, self.compute_bindings.bindings.clone()) else {
            self.warn("dispatch without compute shader state".to_string());
            return Ok(false);
        };

        let ctx = self.ctx;
        if self.bound != Some(PipelineKind::Compute) {
            self.compute_bindings.invalidate();
        }

        let resources = ctx.resources.read();
        let Some(recording) = self.recording.as_mut() else {
            panic!("command list was already submitted");
        };
        let sink = recording.native_mut();

        let library = ctx.shaders.read();
        let pipeline = ctx.pipelines.compute_pipeline(
            ctx.backend(),
            &library,
            &bindings,
            &ComputePipelineQuery { shader },
            &ctx.stats,
        )?;
        drop(library);
        let changed = self
            .compute_pipeline
            .as_ref()
            .map_or(true, |current| !Arc::ptr_eq(current, &pipeline));
        if changed || self.bound != Some(PipelineKind::Compute) {
            sink.set_compute_pipeline(&pipeline);
        }
        self.compute_pipeline = Some(pipeline);
        self.bound = Some(PipelineKind::Compute);

        transition_inputs(&mut self.tracker, &resources, &self.compute_bindings, &bindings);
        fire_barriers(&mut self.tracker, sink, &resources, &mut self.stats);
        flush_bindings(
            ctx,
            PipelineKind::Compute,
            &mut self.compute_bindings,
            &bindings,
            &resources,
            sink,
            &mut self.stats,
        )?;
        Ok(true)
    }

    ////////////////////////////////////////////////////////////////////////
    // Barriers and direct commands
    ////////////////////////////////////////////////////////////////////////

    /// Requests `state` for a slice of `resource`. The barrier, if one is
    /// needed, is recorded with the next command or [`Self::flush_barriers`].
    pub fn transition_barrier(&mut self, resource: ResourceId, subresource: Subresource, state: ResourceState) {
        let tracked = self.ctx.resources.read().tracked(resource);
        self.tracker.transition(&tracked, subresource, state);
    }

    pub fn uav_barrier(&mut self, resource: ResourceId) {
        let tracked = self.ctx.resources.read().tracked(resource);
        self.tracker.uav_barrier(&tracked);
    }

    /// Records every pending barrier now.
    pub fn flush_barriers(&mut self) {
        if !self.tracker.has_pending() {
            return;
        }
        let resources = self.ctx.resources.read();
        let Some(recording) = self.recording.as_mut() else {
            panic!("command list was already submitted");
        };
        fire_barriers(&mut self.tracker, recording.native_mut(), &resources, &mut self.stats);
    }

    /// Moves every resource in `uses` to its state, then records the
    /// command behind the resulting barriers.
    fn direct(
        &mut self,
        uses: &[(ResourceId, ResourceState)],
        record: impl FnOnce(&mut B::CommandList, &ResourceRegistry<B>),
    ) {
        let resources = self.ctx.resources.read();
        for (resource, state) in uses {
            self.tracker
                .transition(&resources.tracked(*resource), Subresource::All, *state);
        }
        let Some(recording) = self.recording.as_mut() else {
            panic!("command list was already submitted");
        };
        let sink = recording.native_mut();
        fire_barriers(&mut self.tracker, sink, &resources, &mut self.stats);
        record(sink, &resources);
    }

    pub fn clear_render_target(&mut self, target: ResourceId, color: [f32; 4]) {
        let Some(view) = self.view_of(target, ViewKind::RenderTarget) else {
            panic!("{target:?} was not created with render target usage");
        };
        self.direct(&[(target, ResourceState::RENDER_TARGET)], |sink, _| {
            sink.clear_render_target(view, color)
        });
    }

    pub fn clear_depth_stencil(&mut self, target: ResourceId, depth: f32, stencil: u8) {
        let Some(view) = self.view_of(target, ViewKind::DepthStencil { read_only: false }) else {
            panic!("{target:?} was not created with depth stencil usage");
        };
        self.direct(&[(target, ResourceState::DEPTH_WRITE)], |sink, _| {
            sink.clear_depth_stencil(view, depth, stencil)
        });
    }

    pub fn clear_unordered_access(&mut self, target: ResourceId, values: [u32; 4]) {
        let Some(view) = self.view_of(target, ViewKind::UnorderedAccess) else {
            panic!("{target:?} was not created with unordered access usage");
        };
        self.direct(&[(target, ResourceState::UNORDERED_ACCESS)], |sink, resources| {
            sink.clear_unordered_access(view, resources.native(target), values)
        });
    }

    pub fn copy_resource(&mut self, dst: ResourceId, src: ResourceId) {
        self.direct(
            &[(dst, ResourceState::COPY_DEST), (src, ResourceState::COPY_SOURCE)],
            |sink, resources| sink.copy_resource(resources.native(dst), resources.native(src)),
        );
    }

    pub fn copy_buffer_region(&mut self, dst: ResourceId, dst_offset: u64, src: ResourceId, src_offset: u64, size: u64) {
        self.direct(
            &[(dst, ResourceState::COPY_DEST), (src, ResourceState::COPY_SOURCE)],
            |sink, resources| {
                sink.copy_buffer_region(
                    resources.native(dst),
                    dst_offset,
                    resources.native(src),
                    src_offset,
                    size,
                )
            },
        );
    }

    pub fn begin_debug_marker(&mut self, name: &str) {
        self.sink().begin_debug_marker(name);
    }

    pub fn end_debug_marker(&mut self) {
        self.sink().end_debug_marker();
    }

    /// Flushes pending barriers and closes the native list. Closing twice
    /// is a no-op.
    pub fn close(&mut self) -> Result<()> {
        match self.recording().state() {
            ListState::Closed => return Ok(()),
            ListState::Recording => {}
            state => panic!("closing a command list in state {state:?}"),
        }
        self.flush_barriers();
        let ctx = self.ctx;
        let Some(recording) = self.recording.as_mut() else {
            panic!("command list was already submitted");
        };
        recording.close(ctx.backend())
    }
}

impl<B: Backend> Drop for CommandList<'_, B> {
    fn drop(&mut self) {
        if let Some(recording) = self.recording.take() {
            log::debug!("command list dropped without execution");
            self.ctx.pools.release(recording, None);
        }
    }
}

/// Bytes of buffer `id` from `offset` to its end.
fn remaining_size(desc: &super::structs::ResourceDesc, id: ResourceId, offset: u64) -> u64 {
    let Some(buffer) = desc.as_buffer() else {
        panic!("{id:?} is bound as a buffer but is not one");
    };
    match buffer.byte_size.checked_sub(offset) {
        Some(size) => size,
        None => panic!(
            "offset {offset} is past the end of {id:?} ({} bytes)",
            buffer.byte_size
        ),
    }
}

/// State a resource needs to be read through `slot`.
fn input_state(slot: &BindingSlot) -> ResourceState {
    match slot.kind {
        BindingKind::RwTexture | BindingKind::RwBuffer => ResourceState::UNORDERED_ACCESS,
        BindingKind::Texture | BindingKind::Buffer => {
            let mut state = ResourceState::empty();
            if slot.stages.contains(ShaderStages::PIXEL) {
                state |= ResourceState::PIXEL_SHADER_RESOURCE;
            }
            if slot.stages.intersects(ShaderStages::VERTEX | ShaderStages::COMPUTE) {
                state |= ResourceState::NON_PIXEL_SHADER_RESOURCE;
            }
            state
        }
        BindingKind::ConstantBuffer => ResourceState::VERTEX_AND_CONSTANT_BUFFER,
        BindingKind::Sampler => ResourceState::COMMON,
    }
}

fn transition_inputs<B: Backend>(
    tracker: &mut ResourceStateTracker,
    resources: &ResourceRegistry<B>,
    state: &BindingState<B>,
    bindings: &Bindings<B>,
) {
    for (name, slot) in bindings.slots() {
        if let Some(BoundInput::View { resource, .. }) = state.inputs.get(name) {
            tracker.transition(&resources.tracked(*resource), Subresource::All, input_state(&slot));
        }
    }
}

fn fire_barriers<B: Backend>(
    tracker: &mut ResourceStateTracker,
    sink: &mut B::CommandList,
    resources: &ResourceRegistry<B>,
    stats: &mut ListStats,
) {
    if !tracker.has_pending() {
        return;
    }
    let barriers = tracker.flush();
    for barrier in &barriers {
        log::trace!("{barrier:?}");
    }
    sink.resource_barriers(&resources.resolve(&barriers));
    stats.barriers += barriers.len() as u64;
}

/// Uploads dirty constant buffers and refills dirty binding tables from
/// temporary descriptors.
fn flush_bindings<B: Backend>(
    ctx: &Context<B>,
    kind: PipelineKind,
    state: &mut BindingState<B>,
    bindings: &Bindings<B>,
    resources: &ResourceRegistry<B>,
    sink: &mut B::CommandList,
    stats: &mut ListStats,
) -> Result<()> {
    if state.layout_dirty {
        match kind {
            PipelineKind::Graphics => sink.set_graphics_bind_layout(&bindings.layout),
            PipelineKind::Compute => sink.set_compute_bind_layout(&bindings.layout),
        }
        state.layout_dirty = false;
    }

    for buffer in bindings.constant_buffers() {
        let Some(shadow) = state.constants.get_mut(&buffer.hash) else {
            continue;
        };
        let current = matches!(
            state.inputs.get(&buffer.name),
            Some(BoundInput::Constant { hash, .. }) if *hash == buffer.hash
        );
        if current && !shadow.dirty {
            continue;
        }
        let address = sink.upload_constants(&shadow.data)?;
        stats.constant_bytes += shadow.data.len() as u64;
        shadow.dirty = false;
        state.inputs.insert(
            buffer.name.clone(),
            BoundInput::Constant {
                hash: buffer.hash,
                address,
                size: buffer.size,
            },
        );
        state.dirty_tables[buffer.slot.table as usize] = true;
    }

    for (index, table) in bindings.tables.iter().enumerate() {
        if !state.dirty_tables[index] {
            continue;
        }
        let heap = if table.sampler {
            &ctx.descriptors.sampler
        } else {
            &ctx.descriptors.view
        };
        let allocation = heap.allocate_temporary(table.size)?;
        let mut filled: SmallVec<[bool; 16]> = smallvec![false; table.size as usize];

        for (name, slot) in bindings.slots().filter(|(_, s)| s.table as usize == index) {
            let target = allocation.slot(slot.offset);
            match state.inputs.get(name) {
                Some(BoundInput::View { resource, kind }) => {
                    let Some(source) = resources.entry(*resource).views.slot(*kind) else {
                        panic!("{resource:?} lost its {kind:?} view");
                    };
                    ctx.backend().copy_descriptors(target, source, 1);
                }
                Some(BoundInput::Sampler(sampler)) => {
                    ctx.backend().copy_descriptors(target, ctx.sampler_slot(*sampler), 1);
                }
                Some(BoundInput::Constant { address, size, .. }) => {
                    ctx.backend().write_constant_view(*address, *size, target);
                }
                None => continue,
            }
            filled[slot.offset as usize] = true;
        }
        for range in &table.ranges {
            for i in range.offset..range.offset + range.count {
                if !filled[i as usize] {
                    ctx.backend().write_null_view(range.kind, allocation.slot(i));
                }
            }
        }

        match kind {
            PipelineKind::Graphics => sink.set_graphics_table(index as u32, allocation.base()),
            PipelineKind::Compute => sink.set_compute_table(index as u32, allocation.base()),
        }
        state.dirty_tables[index] = false;
    }
    Ok(())
}
