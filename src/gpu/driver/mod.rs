pub mod command;
pub mod types;

pub use command::{CommandSink, ResolvedBarrier};
pub use types::*;
