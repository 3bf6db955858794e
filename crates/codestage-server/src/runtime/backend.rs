use codestage_common::protocol::{
    error::{CodestageError, Result},
    CallRequest,
};

use crate::resource_limits::ResourceLimits;
use crate::runtime::{context::EngineContext, image::ProgramImage, output::OutputBuffer};

/// Compiles program text into images and runs their functions.
///
/// Both methods block and are run on tokio's blocking pool by
/// [`Engine`](crate::runtime::Engine), which also enforces the wall-clock
/// limit. Implementations only need to honor the interpreter budgets.
pub trait Backend: Send + Sync + 'static {
    fn compile(&self, source: &[u8], limits: &ResourceLimits) -> Result<ProgramImage>;

    /// Writes the call's output into `out`, which holds `call.capacity`
    /// bytes. Implementations stop producing output once
    /// [`OutputBuffer::is_full`] returns true and propagate its write errors.
    fn invoke(
        &self,
        image: &ProgramImage,
        call: &CallRequest,
        limits: &ResourceLimits,
        out: &mut OutputBuffer,
    ) -> Result<()>;
}

/// JavaScript backend built on Boa.
#[derive(Debug, Default, Clone, Copy)]
pub struct BoaBackend;

impl Backend for BoaBackend {
    fn compile(&self, source: &[u8], limits: &ResourceLimits) -> Result<ProgramImage> {
        let source = std::str::from_utf8(source)
            .map_err(|e| CodestageError::Compile(format!("Program text is not valid UTF-8: {}", e)))?;

        let mut ctx = EngineContext::load(source, limits)?;
        let functions = ctx.functions()?;

        Ok(ProgramImage::new(source, functions))
    }

    fn invoke(
        &self,
        image: &ProgramImage,
        call: &CallRequest,
        limits: &ResourceLimits,
        out: &mut OutputBuffer,
    ) -> Result<()> {
        // The image compiled once already; a failure now comes from a
        // top level that behaves differently on re-evaluation.
        let mut ctx = EngineContext::load(image.source(), limits).map_err(|e| match e {
            CodestageError::Compile(msg) => {
                CodestageError::Execution(format!("Image initialization failed: {}", msg))
            }
            other => other,
        })?;

        ctx.invoke(&call.function, call.args.clone(), out)
    }
}
