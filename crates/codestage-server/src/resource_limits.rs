//! Resource limits for program execution.
//!
//! Two layers bound every compile and call:
//!
//! - a wall-clock `execution_timeout`, enforced by the engine around each
//!   blocking job
//! - interpreter budgets (loop iterations, recursion depth, stack size),
//!   enforced by Boa inside the job so runaway code stops on its own

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Resource limits for JavaScript execution.
///
/// # Memory Limiting
///
/// Boa has no heap cap. Memory is bounded indirectly through the stack and
/// loop budgets and through the output capacity of each call.
///
/// # Example
///
/// ```
/// use codestage_server::ResourceLimits;
/// use std::time::Duration;
///
/// let limits = ResourceLimits::new()
///     .with_execution_timeout(Duration::from_secs(5))
///     .with_loop_iteration_limit(1_000_000);
/// assert!(limits.validate().is_ok());
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResourceLimits {
    /// Maximum wall-clock time for a single compile or call
    #[serde(rename = "execution_timeout_ms", with = "duration_ms")]
    pub execution_timeout: Duration,
    /// Maximum iterations of any single loop
    pub loop_iteration_limit: u64,
    /// Maximum depth of nested function calls
    pub recursion_limit: usize,
    /// Maximum number of values on the VM stack
    pub stack_size_limit: usize,
}

impl Default for ResourceLimits {
    fn default() -> Self {
        Self {
            execution_timeout: Duration::from_secs(30),
            loop_iteration_limit: 100_000_000,
            recursion_limit: 512,
            stack_size_limit: 10 * 1024,
        }
    }
}

impl ResourceLimits {
    /// Creates a new ResourceLimits with default values.
    ///
    /// ```
    /// use codestage_server::ResourceLimits;
    ///
    /// let limits = ResourceLimits::new();
    /// assert_eq!(limits.execution_timeout.as_secs(), 30);
    /// ```
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the maximum execution timeout.
    pub fn with_execution_timeout(mut self, timeout: Duration) -> Self {
        self.execution_timeout = timeout;
        self
    }

    pub fn with_loop_iteration_limit(mut self, limit: u64) -> Self {
        self.loop_iteration_limit = limit;
        self
    }

    pub fn with_recursion_limit(mut self, limit: usize) -> Self {
        self.recursion_limit = limit;
        self
    }

    pub fn with_stack_size_limit(mut self, limit: usize) -> Self {
        self.stack_size_limit = limit;
        self
    }

    /// Execution timeout in whole milliseconds, as reported in timeout errors.
    pub fn execution_timeout_ms(&self) -> u64 {
        u64::try_from(self.execution_timeout.as_millis()).unwrap_or(u64::MAX)
    }

    /// Validates the resource limits configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - Execution timeout is zero
    /// - Execution timeout is excessively long (> 1 hour)
    /// - Any interpreter budget is zero
    pub fn validate(&self) -> Result<(), String> {
        if self.execution_timeout.is_zero() {
            return Err("execution timeout must be greater than zero".to_string());
        }

        if self.execution_timeout.as_secs() > 3600 {
            return Err(format!(
                "execution timeout must be <= 1 hour (got {} seconds)",
                self.execution_timeout.as_secs()
            ));
        }

        if self.loop_iteration_limit == 0 {
            return Err("loop iteration limit must be greater than zero".to_string());
        }

        if self.recursion_limit == 0 {
            return Err("recursion limit must be greater than zero".to_string());
        }

        if self.stack_size_limit == 0 {
            return Err("stack size limit must be greater than zero".to_string());
        }

        Ok(())
    }
}

/// Serializes a [`Duration`] as integer milliseconds.
pub(crate) mod duration_ms {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(u64::try_from(duration.as_millis()).unwrap_or(u64::MAX))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}
