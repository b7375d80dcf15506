use super::descriptors::{DescriptorAllocation, DescriptorHeaps, DescriptorSlot};
use super::driver::ResolvedBarrier;
use super::error::Result;
use super::structs::{ResourceDesc, ResourceUsage, ViewKind};
use super::Backend;
use crate::sync::{Barrier, ResourceState, TrackedResource};
use crate::utils::{Handle, Pool};

pub enum Resource {}

/// Generation-checked id of a buffer or texture.
pub type ResourceId = Handle<Resource>;

/// Steady descriptors created together with a resource.
#[derive(Debug, Default, Clone, Copy)]
pub struct ResourceViews {
    pub shader_resource: Option<DescriptorAllocation>,
    pub unordered_access: Option<DescriptorAllocation>,
    pub render_target: Option<DescriptorAllocation>,
    pub depth_stencil: Option<DescriptorAllocation>,
    pub depth_read_only: Option<DescriptorAllocation>,
}

impl ResourceViews {
    pub fn slot(&self, kind: ViewKind) -> Option<DescriptorSlot> {
        let allocation = match kind {
            ViewKind::ShaderResource => self.shader_resource,
            ViewKind::UnorderedAccess => self.unordered_access,
            ViewKind::RenderTarget => self.render_target,
            ViewKind::DepthStencil { read_only: false } => self.depth_stencil,
            ViewKind::DepthStencil { read_only: true } => self.depth_read_only,
        };
        allocation.map(|a| a.base())
    }

    fn iter(&self) -> impl Iterator<Item = DescriptorAllocation> {
        [
            self.shader_resource,
            self.unordered_access,
            self.render_target,
            self.depth_stencil,
            self.depth_read_only,
        ]
        .into_iter()
        .flatten()
    }
}

pub struct ResourceEntry<B: Backend> {
    pub native: B::Resource,
    pub desc: ResourceDesc,
    pub views: ResourceViews,
}

/// Every live resource of a context.
pub struct ResourceRegistry<B: Backend> {
    pool: Pool<ResourceEntry<B>>,
}

impl<B: Backend> Default for ResourceRegistry<B> {
    fn default() -> Self {
        Self { pool: Pool::new(64) }
    }
}

impl<B: Backend> ResourceRegistry<B> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates the native resource and its steady views.
    pub fn create(
        &mut self,
        backend: &B,
        heaps: &DescriptorHeaps,
        desc: ResourceDesc,
        initial: ResourceState,
    ) -> Result<ResourceId> {
        let native = backend.create_resource(&desc, initial)?;
        let views = match create_views(backend, heaps, &native, &desc) {
            Ok(views) => views,
            Err(err) => {
                backend.destroy_resource(native);
                return Err(err);
            }
        };
        let handle = self.pool.insert(ResourceEntry { native, desc, views });
        Ok(handle.cast())
    }

    /// Removes `id`, returning its descriptors to their heaps.
    pub fn destroy(&mut self, backend: &B, heaps: &DescriptorHeaps, id: ResourceId) {
        let Some(entry) = self.pool.release(id.cast()) else {
            panic!("destroying stale resource {id:?}");
        };
        for view in entry.views.iter() {
            heaps.free(view);
        }
        backend.destroy_resource(entry.native);
    }

    pub fn get(&self, id: ResourceId) -> Option<&ResourceEntry<B>> {
        self.pool.get_ref(id.cast())
    }

    /// Like [`Self::get`], for callers holding a handle that must be live.
    pub fn entry(&self, id: ResourceId) -> &ResourceEntry<B> {
        match self.get(id) {
            Some(entry) => entry,
            None => panic!("resource {id:?} is stale or was never created"),
        }
    }

    pub fn native(&self, id: ResourceId) -> &B::Resource {
        &self.entry(id).native
    }

    pub fn tracked(&self, id: ResourceId) -> TrackedResource {
        let entry = self.entry(id);
        TrackedResource {
            id,
            subresources: entry.desc.subresources(),
            heap: entry.desc.heap(),
        }
    }

    /// Swaps resource ids in `barriers` for native resources.
    pub fn resolve<'r>(&'r self, barriers: &[Barrier]) -> Vec<ResolvedBarrier<'r, B>> {
        barriers
            .iter()
            .map(|barrier| match *barrier {
                Barrier::Transition {
                    resource,
                    subresource,
                    before,
                    after,
                } => ResolvedBarrier::Transition {
                    resource: self.native(resource),
                    subresource,
                    before,
                    after,
                },
                Barrier::Uav { resource } => ResolvedBarrier::Uav {
                    resource: self.native(resource),
                },
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.pool.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pool.is_empty()
    }
}

fn create_views<B: Backend>(
    backend: &B,
    heaps: &DescriptorHeaps,
    native: &B::Resource,
    desc: &ResourceDesc,
) -> Result<ResourceViews> {
    let usage = desc.usage();
    let mut views = ResourceViews::default();
    let mut wanted = Vec::with_capacity(4);
    if usage.contains(ResourceUsage::SHADER_RESOURCE) {
        wanted.push(ViewKind::ShaderResource);
    }
    if usage.contains(ResourceUsage::UNORDERED_ACCESS) {
        wanted.push(ViewKind::UnorderedAccess);
    }
    if usage.contains(ResourceUsage::RENDER_TARGET) && desc.as_texture().is_some() {
        wanted.push(ViewKind::RenderTarget);
    }
    if usage.contains(ResourceUsage::DEPTH_STENCIL) && desc.as_texture().is_some() {
        wanted.push(ViewKind::DepthStencil { read_only: false });
        wanted.push(ViewKind::DepthStencil { read_only: true });
    }

    for kind in wanted {
        let heap = match kind {
            ViewKind::ShaderResource | ViewKind::UnorderedAccess => &heaps.view,
            ViewKind::RenderTarget => &heaps.render_target,
            ViewKind::DepthStencil { .. } => &heaps.depth_stencil,
        };
        let allocation = match heap.allocate(1) {
            Ok(allocation) => allocation,
            Err(err) => {
                views.iter().for_each(|v| heaps.free(v));
                return Err(err);
            }
        };
        backend.write_view(native, desc, kind, allocation.base());
        let target = match kind {
            ViewKind::ShaderResource => &mut views.shader_resource,
            ViewKind::UnorderedAccess => &mut views.unordered_access,
            ViewKind::RenderTarget => &mut views.render_target,
            ViewKind::DepthStencil { read_only: false } => &mut views.depth_stencil,
            ViewKind::DepthStencil { read_only: true } => &mut views.depth_read_only,
        };
        *target = Some(allocation);
    }
    Ok(views)
}
