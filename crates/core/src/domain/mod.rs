mod memory;
mod phase;
mod project;
mod tool;

pub use memory::*;
pub use phase::*;
pub use project::*;
pub use tool::*;
