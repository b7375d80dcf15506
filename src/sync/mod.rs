pub mod global;
pub mod state;
pub mod tracker;
#[cfg(feature = "tessel-vulkan")]
pub mod barrier_builder;

pub use global::{GlobalStateTable, TrackedState};
pub use state::ResourceState;
pub use tracker::{Barrier, ResourceSlice, ResourceStateTracker, Subresource, TrackedResource};
#[cfg(feature = "tessel-vulkan")]
pub use barrier_builder::{BarrierBuilder, ResourceLookup, VkTarget};
