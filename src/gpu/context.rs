use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use rustc_hash::FxHashMap;
use smallvec::SmallVec;

use super::cmd::CommandList;
use super::descriptors::{DescriptorAllocation, DescriptorHeaps, DescriptorSlot};
use super::driver::CommandSink;
use super::error::{GPUError, Result};
use super::execution::{
    BindingCache, Bindings, CommandPools, PipelineCache, PoolCounts, Recording, UsageTag, PATCHUP_USAGE,
};
use super::fence::{FenceHandle, FenceRing, Queue};
use super::resources::{ResourceId, ResourceRegistry};
use super::shader::{ShaderBytecode, ShaderHandle, ShaderLibrary, ShaderReflection, ShaderStage};
use super::stats::{FrameStats, StatsCounters};
use super::structs::{BufferDesc, ContextInfo, QueueType, ResourceDesc, SamplerDesc, TextureDesc};
use super::Backend;
use crate::sync::{GlobalStateTable, ResourceState, ResourceStateTracker, Subresource};
use crate::utils::{Handle, Pool, WarnOnce};

pub enum Sampler {}

/// Steady sampler descriptor created through [`Context::create_sampler`].
pub type SamplerId = Handle<Sampler>;

/// Owns everything shared between recording threads: queues, fences,
/// descriptor heaps, the global resource-state table, the binding and
/// pipeline caches and the command pools.
///
/// Recording goes through [`CommandList`]s obtained from
/// [`Context::get_command_list`]; any number of them can be recorded on
/// different threads at once.
pub struct Context<B: Backend> {
    backend: B,
    info: ContextInfo,
    queues: RwLock<FxHashMap<QueueType, Arc<Queue<B>>>>,
    /// Serializes submissions; the table is only touched while holding it.
    submission: Mutex<GlobalStateTable>,
    fences: Mutex<FenceRing>,
    pub(crate) descriptors: DescriptorHeaps,
    pub(crate) resources: RwLock<ResourceRegistry<B>>,
    samplers: RwLock<Pool<DescriptorAllocation>>,
    pub(crate) shaders: RwLock<ShaderLibrary>,
    pub(crate) bindings: BindingCache<B>,
    pub(crate) pipelines: PipelineCache<B>,
    pub(crate) pools: CommandPools<B>,
    pub(crate) stats: StatsCounters,
    last_frame: Mutex<FrameStats>,
    pub(crate) warnings: WarnOnce,
}

impl<B: Backend> Context<B> {
    /// Creates a context with a graphics queue. Other queues are created on
    /// first use or through [`Context::create_queue`].
    pub fn new(backend: B, info: &ContextInfo) -> Result<Self> {
        info.validate()?;
        let ctx = Self {
            backend,
            info: info.clone(),
            queues: RwLock::new(FxHashMap::default()),
            submission: Mutex::new(GlobalStateTable::new()),
            fences: Mutex::new(FenceRing::new(info.fence_ring_size)),
            descriptors: DescriptorHeaps::new(info),
            resources: RwLock::new(ResourceRegistry::new()),
            samplers: RwLock::new(Pool::new(16)),
            shaders: RwLock::new(ShaderLibrary::new()),
            bindings: BindingCache::new(),
            pipelines: PipelineCache::new(),
            pools: CommandPools::new(),
            stats: StatsCounters::default(),
            last_frame: Mutex::new(FrameStats::default()),
            warnings: WarnOnce::new(),
        };
        ctx.create_queue(QueueType::Graphics)?;
        Ok(ctx)
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn info(&self) -> &ContextInfo {
        &self.info
    }

    ////////////////////////////////////////////////////////////////////////
    // Queues and fences
    ////////////////////////////////////////////////////////////////////////

    /// Creates the queue of `kind` unless it already exists.
    pub fn create_queue(&self, kind: QueueType) -> Result<()> {
        self.queue(kind).map(|_| ())
    }

    fn queue(&self, kind: QueueType) -> Result<Arc<Queue<B>>> {
        if let Some(queue) = self.queues.read().get(&kind) {
            return Ok(Arc::clone(queue));
        }
        let mut queues = self.queues.write();
        if let Some(queue) = queues.get(&kind) {
            return Ok(Arc::clone(queue));
        }
        let queue = Arc::new(Queue::new(kind, self.backend.create_queue(kind)?));
        log::debug!("created {kind:?} queue");
        queues.insert(kind, Arc::clone(&queue));
        Ok(queue)
    }

    /// Whether the GPU finished the work `fence` marks. Handles whose ring
    /// slot was reused read as complete.
    pub fn is_complete(&self, fence: FenceHandle) -> bool {
        let Some((kind, value)) = self.fences.lock().target(fence) else {
            return true;
        };
        match self.queues.read().get(&kind) {
            Some(queue) => self.backend.completed_value(queue.native()) >= value,
            None => true,
        }
    }

    /// Blocks until the work `fence` marks finished.
    pub fn wait_for_completion(&self, fence: FenceHandle) -> Result<()> {
        let Some((kind, value)) = self.fences.lock().target(fence) else {
            return Ok(());
        };
        let queue = self.queue(kind)?;
        if self.backend.completed_value(queue.native()) >= value {
            return Ok(());
        }
        self.backend.wait_for_value(queue.native(), value)
    }

    /// Blocks until everything submitted to `kind` so far finished.
    pub fn wait_for_queue(&self, kind: QueueType) -> Result<()> {
        let queue = self.queue(kind)?;
        let value = queue.last_signaled();
        if value == 0 || self.backend.completed_value(queue.native()) >= value {
            return Ok(());
        }
        self.backend.wait_for_value(queue.native(), value)
    }

    /// Makes later submissions to `kind` wait on the GPU for `fence`.
    pub fn queue_wait(&self, kind: QueueType, fence: FenceHandle) -> Result<()> {
        let Some((other_kind, value)) = self.fences.lock().target(fence) else {
            return Ok(());
        };
        if other_kind == kind {
            return Ok(());
        }
        let queue = self.queue(kind)?;
        let other = self.queue(other_kind)?;
        self.backend.queue_wait(queue.native(), other.native(), value)
    }

    ////////////////////////////////////////////////////////////////////////
    // Resources
    ////////////////////////////////////////////////////////////////////////

    /// Creates a texture in `COMMON`. Its first use in a list is resolved
    /// by a patchup barrier at submission.
    pub fn create_texture(&self, desc: &TextureDesc) -> Result<ResourceId> {
        self.create_resource(ResourceDesc::Texture(desc.clone()))
    }

    pub fn create_buffer(&self, desc: &BufferDesc) -> Result<ResourceId> {
        self.create_resource(ResourceDesc::Buffer(desc.clone()))
    }

    fn create_resource(&self, desc: ResourceDesc) -> Result<ResourceId> {
        let subresources = desc.subresources();
        let initial = ResourceState::COMMON;
        let mut global = self.submission.lock();
        let id = self
            .resources
            .write()
            .create(&self.backend, &self.descriptors, desc, initial)?;
        global.register(id, subresources, initial);
        Ok(id)
    }

    pub fn resource_info(&self, id: ResourceId) -> Result<ResourceDesc> {
        self.resources
            .read()
            .get(id)
            .map(|entry| entry.desc.clone())
            .ok_or(GPUError::InvalidResource)
    }

    /// Destroys `id` and releases its views. Panics on a stale handle.
    pub fn delete_resource(&self, id: ResourceId) {
        let mut global = self.submission.lock();
        self.resources
            .write()
            .destroy(&self.backend, &self.descriptors, id);
        global.unregister(id);
    }

    /// State the GPU will see `id` in once all submitted work ran.
    pub fn resource_state(&self, id: ResourceId, subresource: Subresource) -> Option<ResourceState> {
        self.submission.lock().state_of(id, subresource)
    }

    /// Runs `f` on the native object behind `id`.
    pub fn with_native<R>(&self, id: ResourceId, f: impl FnOnce(&B::Resource) -> R) -> R {
        f(self.resources.read().native(id))
    }

    pub fn create_sampler(&self, desc: &SamplerDesc) -> Result<SamplerId> {
        let allocation = self.descriptors.sampler.allocate(1)?;
        self.backend.write_sampler(desc, allocation.base());
        Ok(self.samplers.write().insert(allocation).cast())
    }

    pub fn destroy_sampler(&self, sampler: SamplerId) {
        let Some(allocation) = self.samplers.write().release(sampler.cast()) else {
            panic!("destroying stale sampler {sampler:?}");
        };
        self.descriptors.free(allocation);
    }

    pub(crate) fn sampler_slot(&self, sampler: SamplerId) -> DescriptorSlot {
        match self.samplers.read().get_ref(sampler.cast()) {
            Some(allocation) => allocation.base(),
            None => panic!("sampler {sampler:?} is stale or was never created"),
        }
    }

    ////////////////////////////////////////////////////////////////////////
    // Shaders
    ////////////////////////////////////////////////////////////////////////

    pub fn create_shader(
        &self,
        stage: ShaderStage,
        debug_name: &str,
        bytecode: &[u8],
        reflection: ShaderReflection,
    ) -> ShaderHandle {
        self.shaders.write().create(stage, debug_name, bytecode, reflection)
    }

    pub fn shader_bytecode(&self, shader: ShaderHandle) -> Result<ShaderBytecode> {
        self.shaders.read().bytecode(shader)
    }

    /// Installs recompiled bytecode. Binding layouts of every shader set
    /// containing `shader` are dropped; pipelines built from the old
    /// bytecode are rebuilt on their next use. Returns whether anything
    /// changed.
    pub fn reload_shader(
        &self,
        shader: ShaderHandle,
        bytecode: &[u8],
        reflection: ShaderReflection,
    ) -> Result<bool> {
        let mut shaders = self.shaders.write();
        if !shaders.reload(shader, bytecode, reflection)? {
            log::debug!("shader {shader:?} reloaded with identical bytecode");
            return Ok(false);
        }
        let dropped = self.bindings.invalidate_shader(shader);
        log::info!(
            "reloaded shader '{}', {dropped} binding sets invalidated",
            shaders.get(shader)?.debug_name
        );
        Ok(true)
    }

    /// Records that recompiling `shader` failed. The previous bytecode,
    /// bindings and pipelines stay in use.
    pub fn report_shader_failure(&self, shader: ShaderHandle, message: &str) {
        let shaders = self.shaders.read();
        let name = shaders
            .get(shader)
            .map(|s| s.debug_name.as_str())
            .unwrap_or("<unknown>");
        log::warn!("shader '{name}' failed to recompile, keeping previous version: {message}");
    }

    /// Binding layout of a shader set, as the encoder would see it.
    pub fn get_bindings(&self, shaders: &[ShaderHandle]) -> Result<Arc<Bindings<B>>> {
        let library = self.shaders.read();
        self.bindings
            .get_bindings(&self.backend, &library, shaders, &self.stats)
    }

    pub fn bind_layout_count(&self) -> usize {
        self.bindings.bind_layout_count()
    }

    pub fn pipeline_count(&self) -> usize {
        self.pipelines.len()
    }

    ////////////////////////////////////////////////////////////////////////
    // Recording and submission
    ////////////////////////////////////////////////////////////////////////

    /// Returns a list in the recording state, drawn from the pool for
    /// (`queue`, `usage`).
    pub fn get_command_list(&self, queue: QueueType, usage: UsageTag) -> Result<CommandList<'_, B>> {
        self.queue(queue)?;
        let recording = self
            .pools
            .acquire(&self.backend, queue, usage, |f| self.is_complete(f))?;
        Ok(CommandList::new(self, recording))
    }

    /// Submits `list`, preceded by a patchup list when its first uses of
    /// resources disagree with the global state table. Returns the fence
    /// that completes with the list.
    pub fn execute(&self, mut list: CommandList<'_, B>) -> Result<FenceHandle> {
        list.close()?;
        let (recording, mut tracker, list_stats) = list.into_submission();
        let kind = recording.queue();
        let queue = self.queue(kind)?;

        let mut global = self.submission.lock();
        let patchup = match self.record_patchup(kind, &tracker, &global) {
            Ok(patchup) => patchup,
            Err(err) => {
                self.pools.release(recording, None);
                return Err(err);
            }
        };

        let submitted = {
            let mut natives: SmallVec<[&B::CommandList; 2]> = SmallVec::new();
            natives.extend(patchup.as_ref().map(|p| p.native()));
            natives.push(recording.native());
            self.backend
                .execute(queue.native(), &natives)
                .and_then(|()| {
                    let value = queue.next_value();
                    self.backend.signal(queue.native(), value).map(|()| value)
                })
        };
        let value = match submitted {
            Ok(value) => value,
            Err(err) => {
                drop(global);
                if let Some(patchup) = patchup {
                    self.pools.release(patchup, None);
                }
                self.pools.release(recording, None);
                return Err(err);
            }
        };

        let fence = self.fences.lock().issue(kind, value);
        tracker.commit(&mut global);
        queue.mark_submitted(value, fence);
        drop(global);

        if let Some(patchup) = patchup {
            self.pools.release(patchup, Some(fence));
        }
        self.pools.release(recording, Some(fence));
        self.stats.list_executed(&list_stats);
        log::trace!("executed {kind:?} list, fence value {value}");
        Ok(fence)
    }

    fn record_patchup(
        &self,
        kind: QueueType,
        tracker: &ResourceStateTracker,
        global: &GlobalStateTable,
    ) -> Result<Option<Recording<B>>> {
        let barriers = tracker.resolve_patchup(global);
        if barriers.is_empty() {
            return Ok(None);
        }

        let mut patchup = self
            .pools
            .acquire(&self.backend, kind, PATCHUP_USAGE, |f| self.is_complete(f))?;
        {
            let resources = self.resources.read();
            patchup
                .native_mut()
                .resource_barriers(&resources.resolve(&barriers));
        }
        if let Err(err) = patchup.close(&self.backend) {
            self.pools.release(patchup, None);
            return Err(err);
        }
        log::debug!("patchup list with {} barriers on {kind:?}", barriers.len());
        self.stats.patchup_list();
        self.stats.barriers(barriers.len() as u64);
        Ok(Some(patchup))
    }

    /// Closes the frame: stamps temporary descriptors with the frame's
    /// fences, reclaims whatever the GPU finished with and snapshots the
    /// frame statistics. Never blocks.
    pub fn end_commands_frame(&self) -> Result<FrameStats> {
        let fences: SmallVec<[FenceHandle; 3]> = self
            .queues
            .read()
            .values()
            .filter_map(|queue| queue.take_frame_fence())
            .collect();
        self.descriptors.fence_temporary_allocations(&fences);

        let is_complete = |fence: FenceHandle| self.is_complete(fence);
        let blocks = self.descriptors.free_temporary_allocations(is_complete);
        let allocators = self.pools.recycle(&self.backend, is_complete)?;
        log::trace!("frame end: {blocks} descriptor blocks and {allocators} allocators recycled");

        let stats = self.stats.take();
        *self.last_frame.lock() = stats;
        Ok(stats)
    }

    /// Statistics of the last frame closed by [`Context::end_commands_frame`].
    pub fn frame_stats(&self) -> FrameStats {
        *self.last_frame.lock()
    }

    pub fn pool_counts(&self, queue: QueueType, usage: UsageTag) -> PoolCounts {
        self.pools.counts(queue, usage)
    }

    pub fn descriptor_heaps(&self) -> &DescriptorHeaps {
        &self.descriptors
    }
}
