pub mod binding_cache;
pub mod command_pool;
pub mod pipeline_cache;

pub use binding_cache::*;
pub use command_pool::*;
pub use pipeline_cache::*;
