//! Function runner RPC boundary.

use async_trait::async_trait;
use rudder_types::FunctionRun;
use thiserror::Error;
use tracing::debug;

/// Remote client of the function manager.
#[async_trait]
pub trait FunctionRunner: Send + Sync {
    /// Submits a run and returns it with the output populated.
    async fn run_function(
        &self,
        organization_id: &str,
        run: FunctionRun,
    ) -> Result<FunctionRun, RunnerError>;
}

#[derive(Debug, Clone, Error)]
#[error("function runner: {0}")]
pub struct RunnerError(pub String);

/// Runner that logs the invocation and echoes the run back, for development
/// profiles without a function manager.
pub struct NoopFunctionRunner;

#[async_trait]
impl FunctionRunner for NoopFunctionRunner {
    async fn run_function(
        &self,
        organization_id: &str,
        run: FunctionRun,
    ) -> Result<FunctionRun, RunnerError> {
        debug!(
            organization = %organization_id,
            function = %run.function_name,
            "no-op runner invoked"
        );
        Ok(run)
    }
}
