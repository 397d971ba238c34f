//! Tools the model can call, and the registry that holds them.

pub mod builtin;
pub mod registry;
pub mod schema;
pub mod tool;

pub use builtin::{BuiltinServices, SPEAK_TEXT, register_builtin_tools};
pub use registry::ToolRegistry;
pub use schema::validate_schema;
pub use tool::*;
