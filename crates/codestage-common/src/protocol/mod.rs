pub mod commands;
pub mod error;
pub mod responses;


pub use commands::{CallRequest, Command, CommandLine, FunctionName};
pub use error::{CodestageError, ErrorKind, Result};
pub use responses::{Response, Status};
