use std::sync::Arc;

use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use smallvec::SmallVec;

use super::binding_cache::{Bindings, LayoutKey};
use crate::gpu::driver::{ComputePipelineDesc, GraphicsPipelineDesc};
use crate::gpu::error::Result;
use crate::gpu::shader::{ShaderHandle, ShaderLibrary};
use crate::gpu::stats::StatsCounters;
use crate::gpu::structs::{BlendState, DepthState, Format, RasterizerState, Topology, VertexLayout};
use crate::gpu::Backend;
use crate::utils::content_hash;

/// Everything that selects a graphics pipeline object.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct GraphicsPipelineQuery {
    pub vertex: ShaderHandle,
    pub pixel: Option<ShaderHandle>,
    pub rasterizer: RasterizerState,
    pub depth: DepthState,
    pub blend: BlendState,
    pub topology: Topology,
    pub vertex_layout: VertexLayout,
    pub color_formats: SmallVec<[Format; 8]>,
    pub depth_format: Option<Format>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ComputePipelineQuery {
    pub shader: ShaderHandle,
}

struct PipelineEntry<B: Backend> {
    /// Hash of the bytecode and bind layout the pipeline was built from.
    content_hash: u64,
    pipeline: Arc<B::Pipeline>,
}

struct PipelineState<B: Backend> {
    graphics: FxHashMap<LayoutKey, PipelineEntry<B>>,
    compute: FxHashMap<LayoutKey, PipelineEntry<B>>,
}

/// Pipeline objects keyed by what selects them, revalidated against the
/// bytes they were built from.
pub struct PipelineCache<B: Backend> {
    state: RwLock<PipelineState<B>>,
}

impl<B: Backend> Default for PipelineCache<B> {
    fn default() -> Self {
        Self {
            state: RwLock::new(PipelineState {
                graphics: FxHashMap::default(),
                compute: FxHashMap::default(),
            }),
        }
    }
}

impl<B: Backend> PipelineCache<B> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn graphics_pipeline(
        &self,
        backend: &B,
        library: &ShaderLibrary,
        bindings: &Bindings<B>,
        query: &GraphicsPipelineQuery,
        stats: &StatsCounters,
    ) -> Result<Arc<B::Pipeline>> {
        let key = LayoutKey(content_hash(query));
        let vertex = library.bytecode(query.vertex)?;
        let pixel = query.pixel.map(|p| library.bytecode(p)).transpose()?;
        let content = content_hash(&(
            vertex.hash,
            pixel.as_ref().map(|p| p.hash),
            bindings.layout_hash,
        ));

        if let Some(entry) = self.state.read().graphics.get(&key) {
            if entry.content_hash == content {
                return Ok(Arc::clone(&entry.pipeline));
            }
        }

        let mut state = self.state.write();
        let rebuild = match state.graphics.get(&key) {
            Some(entry) if entry.content_hash == content => return Ok(Arc::clone(&entry.pipeline)),
            Some(_) => true,
            None => false,
        };

        let name = &library.get(query.vertex)?.debug_name;
        let desc = GraphicsPipelineDesc::<B> {
            debug_name: name,
            layout: &bindings.layout,
            vertex: &vertex.bytes,
            pixel: pixel.as_ref().map(|p| &*p.bytes),
            rasterizer: query.rasterizer,
            depth: query.depth,
            blend: query.blend,
            topology: query.topology,
            vertex_layout: &query.vertex_layout,
            color_formats: query.color_formats.clone(),
            depth_format: query.depth_format,
        };
        let pipeline = Arc::new(backend.create_graphics_pipeline(&desc)?);
        stats.pipeline_built(rebuild);
        log::debug!(
            "{} graphics pipeline '{}' ({:016x})",
            if rebuild { "rebuilt" } else { "built" },
            name,
            key.0
        );
        state.graphics.insert(
            key,
            PipelineEntry {
                content_hash: content,
                pipeline: Arc::clone(&pipeline),
            },
        );
        Ok(pipeline)
    }

    pub fn compute_pipeline(
        &self,
        backend: &B,
        library: &ShaderLibrary,
        bindings: &Bindings<B>,
        query: &ComputePipelineQuery,
        stats: &StatsCounters,
    ) -> Result<Arc<B::Pipeline>> {
        let key = LayoutKey(content_hash(query));
        let compute = library.bytecode(query.shader)?;
        let content = content_hash(&(compute.hash, bindings.layout_hash));

        if let Some(entry) = self.state.read().compute.get(&key) {
            if entry.content_hash == content {
                return Ok(Arc::clone(&entry.pipeline));
            }
        }

        let mut state = self.state.write();
        let rebuild = match state.compute.get(&key) {
            Some(entry) if entry.content_hash == content => return Ok(Arc::clone(&entry.pipeline)),
            Some(_) => true,
            None => false,
        };

        let name = &library.get(query.shader)?.debug_name;
        let pipeline = Arc::new(backend.create_compute_pipeline(&ComputePipelineDesc::<B> {
            debug_name: name,
            layout: &bindings.layout,
            compute: &compute.bytes,
        })?);
        stats.pipeline_built(rebuild);
        log::debug!(
            "{} compute pipeline '{}' ({:016x})",
            if rebuild { "rebuilt" } else { "built" },
            name,
            key.0
        );
        state.compute.insert(
            key,
            PipelineEntry {
                content_hash: content,
                pipeline: Arc::clone(&pipeline),
            },
        );
        Ok(pipeline)
    }

    pub fn len(&self) -> usize {
        let state = self.state.read();
        state.graphics.len() + state.compute.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
