use bitflags::bitflags;
use bytemuck::{Pod, Zeroable};

bitflags! {
    /// GPU usage mode of a resource or subresource.
    ///
    /// The empty set is `COMMON`: the state a freshly created resource is in
    /// and the state resources decay to after copy-queue work.
    #[repr(transparent)]
    #[derive(Default, Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct ResourceState: u32 {
        const COMMON                     = 0;
        const VERTEX_AND_CONSTANT_BUFFER = 0x1;
        const INDEX_BUFFER               = 0x2;
        const RENDER_TARGET              = 0x4;
        const UNORDERED_ACCESS           = 0x8;
        const DEPTH_WRITE                = 0x10;
        const DEPTH_READ                 = 0x20;
        const NON_PIXEL_SHADER_RESOURCE  = 0x40;
        const PIXEL_SHADER_RESOURCE      = 0x80;
        const STREAM_OUT                 = 0x100;
        const INDIRECT_ARGUMENT          = 0x200;
        const COPY_DEST                  = 0x400;
        const COPY_SOURCE                = 0x800;
        const RESOLVE_DEST               = 0x1000;
        const RESOLVE_SOURCE             = 0x2000;
        const PRESENT                    = 0x4000;

        const SHADER_RESOURCE = Self::NON_PIXEL_SHADER_RESOURCE.bits()
            | Self::PIXEL_SHADER_RESOURCE.bits();
        const GENERIC_READ = Self::VERTEX_AND_CONSTANT_BUFFER.bits()
            | Self::INDEX_BUFFER.bits()
            | Self::NON_PIXEL_SHADER_RESOURCE.bits()
            | Self::PIXEL_SHADER_RESOURCE.bits()
            | Self::INDIRECT_ARGUMENT.bits()
            | Self::COPY_SOURCE.bits();

        /// Every state granting write permission.
        const WRITE = Self::RENDER_TARGET.bits()
            | Self::UNORDERED_ACCESS.bits()
            | Self::DEPTH_WRITE.bits()
            | Self::STREAM_OUT.bits()
            | Self::COPY_DEST.bits()
            | Self::RESOLVE_DEST.bits();
    }
}

unsafe impl Zeroable for ResourceState {}
unsafe impl Pod for ResourceState {}

impl ResourceState {
    pub fn is_write(self) -> bool {
        self.intersects(Self::WRITE)
    }

    /// Exclusive states cannot be OR-merged with anything else: `COMMON`,
    /// `PRESENT`, and any state carrying a write bit.
    pub fn is_exclusive(self) -> bool {
        self.is_empty() || self.is_write() || self.contains(Self::PRESENT)
    }

    /// Whether moving from `self` to `desired` needs a transition barrier.
    pub fn needs_transition_to(self, desired: ResourceState) -> bool {
        if self == desired {
            return false;
        }
        if self.is_exclusive() || desired.is_exclusive() {
            return true;
        }
        !self.contains(desired)
    }

    /// State after satisfying `desired` starting from `self`.
    ///
    /// Read-only states accumulate; anything exclusive replaces.
    pub fn merged_with(self, desired: ResourceState) -> ResourceState {
        if self.is_exclusive() || desired.is_exclusive() {
            desired
        } else {
            self | desired
        }
    }
}
