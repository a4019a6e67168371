use crate::error::{Error, Result};
use crate::platform::Clock;
use async_trait::async_trait;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Health checker trait for services
#[async_trait]
pub trait HealthChecker: Send + Sync {
    /// Run one check. `Ok(false)` is an unhealthy answer, `Err` a failure to
    /// get one; both count as a failed attempt.
    async fn check(&self) -> Result<bool>;

    /// Check type, used in error messages
    fn name(&self) -> &'static str;

    /// Get the timeout duration
    fn timeout(&self) -> Duration;
}

/// Sleep for `duration` unless `cancel` fires first.
pub async fn sleep_or_cancel(
    clock: &dyn Clock,
    cancel: &CancellationToken,
    service: &str,
    duration: Duration,
) -> Result<()> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(Error::Cancelled(service.to_string())),
        _ = clock.sleep(duration) => Ok(()),
    }
}

/// Run `checker` up to `retries` times, `interval` apart, until it passes.
///
/// Returns the attempt number that passed.
pub async fn check_with_retry<C: HealthChecker + ?Sized>(
    checker: &C,
    service: &str,
    retries: u32,
    interval: Duration,
    clock: &dyn Clock,
    cancel: &CancellationToken,
) -> Result<u32> {
    let retries = retries.max(1);
    let mut last_cause = "check did not pass".to_string();

    for attempt in 1..=retries {
        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(Error::Cancelled(service.to_string())),
            result = checker.check() => result,
        };

        match result {
            Ok(true) => return Ok(attempt),
            Ok(false) => last_cause = "check did not pass".to_string(),
            Err(e) => last_cause = e.to_string(),
        }
        tracing::debug!(
            "Health check '{}' for '{}' failed (attempt {}/{}): {}",
            checker.name(),
            service,
            attempt,
            retries,
            last_cause
        );

        // Don't sleep after the last attempt
        if attempt < retries {
            sleep_or_cancel(clock, cancel, service, interval).await?;
        }
    }

    Err(Error::HealthCheck {
        service: service.to_string(),
        check: checker.name().to_string(),
        attempts: retries,
        cause: last_cause,
    })
}
