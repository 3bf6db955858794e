//! Codestage Client
//!
//! Async client for the Codestage wire protocol. One [`CodestageClient`]
//! wraps one server session.

pub mod client;

pub use client::CodestageClient;
