use std::sync::Arc;

use codestage_common::protocol::{
    error::{CodestageError, Result},
    CallRequest,
};

use crate::resource_limits::ResourceLimits;
use crate::runtime::{
    backend::{Backend, BoaBackend},
    image::ProgramImage,
    output::{CallOutcome, OutputBuffer, OverflowPolicy},
};

/// Async front of a [`Backend`].
///
/// Every compile and call runs on tokio's blocking pool under the configured
/// wall-clock limit, so a slow program never stalls other connections. One
/// engine is shared by all sessions of a server; it holds no per-connection
/// state.
pub struct Engine {
    backend: Arc<dyn Backend>,
    limits: ResourceLimits,
    overflow_policy: OverflowPolicy,
}

impl Engine {
    /// Creates an engine backed by Boa.
    pub fn new(limits: ResourceLimits) -> Self {
        Self::with_backend(Arc::new(BoaBackend), limits)
    }

    pub fn with_backend(backend: Arc<dyn Backend>, limits: ResourceLimits) -> Self {
        Self {
            backend,
            limits,
            overflow_policy: OverflowPolicy::default(),
        }
    }

    pub fn with_overflow_policy(mut self, policy: OverflowPolicy) -> Self {
        self.overflow_policy = policy;
        self
    }

    /// Compiles program text into an image.
    pub async fn compile(&self, source: Vec<u8>) -> Result<ProgramImage> {
        let backend = self.backend.clone();
        let limits = self.limits.clone();
        self.run_blocking(move || backend.compile(&source, &limits)).await
    }

    /// Runs one function of `image`, bounded by the call's capacity.
    ///
    /// The output buffer lives inside the blocking job, so a return value
    /// larger than the capacity is never fully encoded.
    ///
    /// # Errors
    ///
    /// - `UnknownFunction` if the image has no such function (checked
    ///   before any program code runs)
    /// - `Execution` / `BudgetExceeded` if the function fails
    /// - `Timeout` if it outlives the execution timeout
    /// - `OutputOverflow` under [`OverflowPolicy::Reject`]
    pub async fn call(&self, image: Arc<ProgramImage>, call: CallRequest) -> Result<CallOutcome> {
        if !image.contains(&call.function) {
            return Err(CodestageError::UnknownFunction(call.function));
        }

        let backend = self.backend.clone();
        let limits = self.limits.clone();
        let policy = self.overflow_policy;
        let buffer = self
            .run_blocking(move || {
                let mut out = OutputBuffer::new(call.capacity, policy);
                backend.invoke(&image, &call, &limits, &mut out)?;
                Ok(out)
            })
            .await?;

        buffer.finish()
    }

    async fn run_blocking<T, F>(&self, job: F) -> Result<T>
    where
        F: FnOnce() -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        // On timeout the blocking task is detached. The interpreter budgets
        // and the output capacity bound how long it keeps running.
        match tokio::time::timeout(self.limits.execution_timeout, tokio::task::spawn_blocking(job)).await {
            Ok(Ok(result)) => result,
            Ok(Err(join_error)) => Err(CodestageError::Execution(format!(
                "Engine task failed: {}",
                join_error
            ))),
            Err(_) => {
                tracing::warn!(
                    "Engine job exceeded {}ms execution timeout",
                    self.limits.execution_timeout_ms()
                );
                Err(CodestageError::Timeout(self.limits.execution_timeout_ms()))
            }
        }
    }
}
