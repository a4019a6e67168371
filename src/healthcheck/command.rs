use super::HealthChecker;
use crate::error::{Error, Result};
use crate::platform::{Clock, CommandSpec, ProcessRunner};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

/// Command-based health checker: passes on exit code 0 within the timeout.
/// A check that overruns its timeout is killed.
pub struct CommandChecker {
    spec: CommandSpec,
    runner: Arc<dyn ProcessRunner>,
    clock: Arc<dyn Clock>,
    timeout: Duration,
}

impl CommandChecker {
    pub fn new(
        spec: CommandSpec,
        runner: Arc<dyn ProcessRunner>,
        clock: Arc<dyn Clock>,
        timeout: Duration,
    ) -> Self {
        Self {
            spec,
            runner,
            clock,
            timeout,
        }
    }
}

#[async_trait]
impl HealthChecker for CommandChecker {
    async fn check(&self) -> Result<bool> {
        let mut child = self.runner.spawn(&self.spec).await?;

        let outcome = tokio::select! {
            outcome = child.wait() => Some(outcome?),
            _ = self.clock.sleep(self.timeout) => None,
        };

        match outcome {
            Some(outcome) => Ok(outcome.success()),
            None => {
                if let Err(e) = child.kill() {
                    tracing::debug!("Failed to kill timed out health check: {}", e);
                }
                let _ = child.wait().await;
                Err(Error::Process(format!(
                    "'{}' did not finish within {:?}",
                    self.spec.display_command(),
                    self.timeout
                )))
            }
        }
    }

    fn name(&self) -> &'static str {
        "command"
    }

    fn timeout(&self) -> Duration {
        self.timeout
    }
}
