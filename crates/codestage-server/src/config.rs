//! Server configuration.
//!
//! Configuration is plain data: defaults, optionally overlaid with a JSON
//! file, then with command-line flags. Every field has a default, so a
//! config file only needs the keys it changes:
//!
//! ```json
//! {
//!   "bind": "0.0.0.0:4000",
//!   "max_capacity": 1048576,
//!   "overflow_policy": "reject",
//!   "limits": { "execution_timeout_ms": 2000 }
//! }
//! ```

use std::path::Path;

use codestage_common::protocol::error::{CodestageError, Result};
use codestage_common::transport::{
    FrameLimits, DEFAULT_MAX_CONNECTIONS, DEFAULT_MAX_LINE_BYTES, DEFAULT_MAX_PAYLOAD_BYTES,
};
use serde::{Deserialize, Serialize};

use crate::resource_limits::ResourceLimits;
use crate::runtime::OverflowPolicy;

/// Default listen address.
pub const DEFAULT_BIND: &str = "127.0.0.1:4000";

/// Default upper bound on the capacity a CALL may request (16 MiB).
pub const DEFAULT_MAX_CAPACITY: usize = 16 * 1024 * 1024;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Address to listen on
    pub bind: String,
    /// Longest accepted command line, terminator excluded
    pub max_line_bytes: usize,
    /// Largest accepted PARSE payload
    pub max_payload_bytes: usize,
    /// Largest capacity a CALL may request
    pub max_capacity: usize,
    /// Connections served at the same time
    pub max_connections: usize,
    pub overflow_policy: OverflowPolicy,
    pub limits: ResourceLimits,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: DEFAULT_BIND.to_string(),
            max_line_bytes: DEFAULT_MAX_LINE_BYTES,
            max_payload_bytes: DEFAULT_MAX_PAYLOAD_BYTES,
            max_capacity: DEFAULT_MAX_CAPACITY,
            max_connections: DEFAULT_MAX_CONNECTIONS,
            overflow_policy: OverflowPolicy::default(),
            limits: ResourceLimits::default(),
        }
    }
}

impl ServerConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reads a JSON config file. Missing keys keep their defaults.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| {
            CodestageError::Config(format!("Failed to read {}: {}", path.display(), e))
        })?;
        serde_json::from_str(&text).map_err(|e| {
            CodestageError::Config(format!("Failed to parse {}: {}", path.display(), e))
        })
    }

    pub fn with_bind(mut self, bind: impl Into<String>) -> Self {
        self.bind = bind.into();
        self
    }

    pub fn with_max_line_bytes(mut self, max: usize) -> Self {
        self.max_line_bytes = max;
        self
    }

    pub fn with_max_payload_bytes(mut self, max: usize) -> Self {
        self.max_payload_bytes = max;
        self
    }

    pub fn with_max_capacity(mut self, max: usize) -> Self {
        self.max_capacity = max;
        self
    }

    pub fn with_max_connections(mut self, max: usize) -> Self {
        self.max_connections = max;
        self
    }

    pub fn with_overflow_policy(mut self, policy: OverflowPolicy) -> Self {
        self.overflow_policy = policy;
        self
    }

    pub fn with_limits(mut self, limits: ResourceLimits) -> Self {
        self.limits = limits;
        self
    }

    /// Framing bounds for the command codec.
    pub fn frame_limits(&self) -> FrameLimits {
        FrameLimits {
            max_line_bytes: self.max_line_bytes,
            max_payload_bytes: self.max_payload_bytes,
        }
    }

    /// Validates the configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the bind address is empty, any size bound or the
    /// connection limit is zero, or the resource limits are invalid.
    pub fn validate(&self) -> std::result::Result<(), String> {
        if self.bind.trim().is_empty() {
            return Err("bind address must not be empty".to_string());
        }

        if self.max_line_bytes == 0 {
            return Err("max_line_bytes must be greater than zero".to_string());
        }

        if self.max_payload_bytes == 0 {
            return Err("max_payload_bytes must be greater than zero".to_string());
        }

        if self.max_capacity == 0 {
            return Err("max_capacity must be greater than zero".to_string());
        }

        if self.max_connections == 0 {
            return Err("max_connections must be greater than zero".to_string());
        }

        self.limits.validate()
    }
}
