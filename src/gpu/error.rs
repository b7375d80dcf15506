use thiserror::Error;

use super::descriptors::DescriptorHeapKind;

#[derive(Debug, Error)]
pub enum GPUError {
    /// A native call failed (device removed, out of memory, ...).
    #[error("backend error: {0}")]
    Backend(String),
    #[error("{heap:?} descriptor heap exhausted while allocating {requested} descriptors")]
    OutOfDescriptors {
        heap: DescriptorHeapKind,
        requested: u32,
    },
    #[error("temporary allocation of {requested} descriptors exceeds the block size of {block_size}")]
    TemporaryAllocationTooLarge { requested: u32, block_size: u32 },
    #[error("shader input '{name}' is declared with different shapes across stages")]
    AmbiguousBinding { name: String },
    #[error("shader handle is stale or was never created")]
    UnknownShader,
    #[error("resource handle is stale or was never created")]
    InvalidResource,
    #[error("failed to parse configuration: {0}")]
    Config(String),
}

/// Convenient crate-wide result type.
pub type Result<T, E = GPUError> = std::result::Result<T, E>;
