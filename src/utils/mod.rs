pub mod handle;
pub mod hash;
pub mod warn;

pub use handle::{Handle, Pool};
pub use hash::{content_hash, ContentHasher};
pub use warn::WarnOnce;
