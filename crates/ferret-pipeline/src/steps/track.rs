use crate::{RunContext, StepError};

/// Records a telemetry event. Never fails.
#[derive(Debug, Clone)]
pub struct Track {
    event: String,
}

impl Track {
    pub fn new(event: impl Into<String>) -> Self {
        Self {
            event: event.into(),
        }
    }

    pub async fn execute(&self, ctx: &mut RunContext) -> Result<(), StepError> {
        ctx.capabilities.telemetry.track_event(&self.event);
        Ok(())
    }
}
