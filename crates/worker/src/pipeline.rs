//! Pipeline-wide setup hook, run around every command.

use engine_core::Result;

pub trait PipelineSetup: Send + Sync {
    fn setup(&mut self) -> Result<()> {
        Ok(())
    }

    fn teardown(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Used when no setup hook is configured.
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultSetup;

impl PipelineSetup for DefaultSetup {}
