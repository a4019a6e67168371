//! Per-service watchers.
//!
//! Every started service gets two tracked tasks:
//! - [`spawn_exit_watcher`]: reaps the process and records how it ended
//! - [`spawn_readiness_watcher`]: waits for the readiness policy and flips
//!   the status to ready
//!
//! Exit wins over readiness: a service that exits is never marked ready
//! afterwards.

use super::core::Inner;
use crate::config::{ReadinessPolicy, Service};
use crate::healthcheck::ProbeContext;
use crate::platform::ExitOutcome;
use crate::service::{ProcessDriver, ServiceProcess, ServiceStatus};
use serde_json::json;
use std::sync::Arc;

/// Readiness policy in effect: the declared one, `health_success` when only
/// a health policy exists, or none at all.
pub(super) fn effective_readiness(service: &Service) -> Option<ReadinessPolicy> {
    match (&service.readiness, &service.health) {
        (Some(readiness), _) => Some(readiness.clone()),
        (None, Some(_)) => Some(ReadinessPolicy::health_success()),
        (None, None) => None,
    }
}

pub(super) fn spawn_exit_watcher(inner: Arc<Inner>, process: ServiceProcess, driver: ProcessDriver) {
    let tasks = inner.tasks.clone();
    tasks.spawn(async move {
        let outcome = driver.run().await;
        record_exit(&inner, &process, outcome);
    });
}

fn record_exit(inner: &Inner, process: &ServiceProcess, outcome: Option<ExitOutcome>) {
    let id = process.service_id();
    let code = outcome.and_then(|o| o.code);
    let description = outcome
        .map(|o| o.to_string())
        .unwrap_or_else(|| "unknown exit status".to_string());

    let message = if process.stop_requested() {
        tracing::debug!("'{}' stopped ({})", id, description);
        format!("stopped ({})", description)
    } else {
        tracing::warn!("Service '{}' exited unexpectedly: {}", id, description);
        format!("exited: {}", description)
    };
    inner.set_status(id, ServiceStatus::failed(message, code));
    inner.telemetry.service_event(
        "service_exited",
        id,
        json!({
            "exit_code": code,
            "signal": outcome.and_then(|o| o.signal),
            "requested": process.stop_requested(),
        }),
    );
}

pub(super) fn spawn_readiness_watcher(
    inner: Arc<Inner>,
    service: Service,
    ctx: ProbeContext,
    process: ServiceProcess,
) {
    let tasks = inner.tasks.clone();
    tasks.spawn(async move {
        let id = service.id.as_str();
        let result = match effective_readiness(&service) {
            None => Ok(()),
            Some(policy) => {
                tokio::select! {
                    result = inner.monitor.wait_ready(
                        &policy,
                        service.health.as_ref(),
                        &ctx,
                        &*inner,
                        process.cancel_token(),
                    ) => result,
                    _ = process.wait_exit() => return,
                }
            }
        };

        match result {
            Ok(()) => {
                if inner.mark_ready(&process) {
                    tracing::info!("Service '{}' is ready", id);
                    inner.telemetry.service_event("service_ready", id, json!({}));
                }
            }
            Err(e) if e.is_cancelled() => {
                tracing::debug!("Readiness wait for '{}' cancelled", id);
            }
            Err(e) => {
                tracing::warn!("Service '{}' did not become ready: {}", id, e);
                inner.mark_not_ready(&process, e.to_string());
                inner
                    .telemetry
                    .service_event("readiness_failed", id, json!({ "error": e.to_string() }));
            }
        }
    });
}
