//! GPU command encoding over explicit graphics APIs.
//!
//! Callers describe work declaratively through [`gpu::CommandList`]; the
//! crate derives resource-state barriers, fills binding tables from
//! shader reflection, caches pipelines and recycles command allocators
//! behind fences.

pub mod gpu;
pub mod sync;
pub mod utils;

pub use gpu::*;
pub use sync::{ResourceState, Subresource};
pub use utils::Handle;
