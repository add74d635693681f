//! Tool abstraction and built-in capabilities.

pub mod builtin;
pub mod registry;
pub mod tool;

pub use registry::ToolRegistry;
pub use tool::{Outcome, Tool};
