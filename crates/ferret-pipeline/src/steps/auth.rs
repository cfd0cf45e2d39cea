use tracing::debug;

use crate::{RunContext, StepError};

pub const DEFAULT_TOKEN_FIELD: &str = "auth_token";

/// Gates the run on a valid caller token carried in the payload.
#[derive(Debug, Clone)]
pub struct AuthGate {
    token_field: String,
}

impl Default for AuthGate {
    fn default() -> Self {
        Self::new(DEFAULT_TOKEN_FIELD)
    }
}

impl AuthGate {
    pub fn new(token_field: impl Into<String>) -> Self {
        Self {
            token_field: token_field.into(),
        }
    }

    pub async fn execute(&self, ctx: &mut RunContext) -> Result<(), StepError> {
        let token = ctx.payload_str(&self.token_field).unwrap_or_default();
        let identity = ctx.capabilities.auth.verify(token).await?;
        debug!(run_id = %ctx.run_id, subject = %identity.subject, "caller verified");
        ctx.identity = Some(identity);
        Ok(())
    }
}
