//! Codestage Server
//!
//! This crate implements the server side of Codestage: clients stage a
//! JavaScript program with PARSE, activate it with COMMIT and invoke its
//! functions with CALL. Programs run in the Boa JavaScript engine, in a fresh
//! context per call, with per-connection program storage.

pub mod config;
pub mod resource_limits;
pub mod runtime;
pub mod server;
pub mod session;
pub mod store;

pub use config::ServerConfig;
pub use resource_limits::ResourceLimits;
pub use runtime::{Backend, BoaBackend, CallOutcome, Engine, OverflowPolicy, ProgramImage};
pub use server::Server;
pub use session::Session;
pub use store::{ProgramStore, StoreState};
