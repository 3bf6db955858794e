pub mod backend;
pub mod context;
pub mod engine;
pub mod image;
pub mod output;

mod bindings;
mod conversions;


pub use backend::{Backend, BoaBackend};
pub use bindings::is_valid_function_name;
pub use context::EngineContext;
pub use engine::Engine;
pub use image::{Binding, FunctionEntry, ProgramImage};
pub use output::{CallOutcome, OutputBuffer, OverflowPolicy};
