//! Append-only JSONL event log.
//!
//! Recording never fails the caller: write errors are logged and dropped.

use crate::platform::{Clock, FileSystem};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// One line of the telemetry file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TelemetryEvent {
    pub ts: String,
    pub event: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
}

pub struct TelemetryRecorder {
    path: PathBuf,
    upload_url: Option<String>,
    fs: Arc<dyn FileSystem>,
    clock: Arc<dyn Clock>,
    // serializes appends so lines never interleave
    write_lock: Mutex<()>,
}

impl TelemetryRecorder {
    pub fn new(
        path: PathBuf,
        upload_url: Option<String>,
        fs: Arc<dyn FileSystem>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            path,
            upload_url,
            fs,
            clock,
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn upload_url(&self) -> Option<&str> {
        self.upload_url.as_deref()
    }

    /// Append one event.
    pub fn record(&self, event: &str, service_id: Option<&str>, details: Option<Value>) {
        tracing::debug!(
            event,
            service_id = service_id.unwrap_or("-"),
            "telemetry: {}",
            details.as_ref().map(|d| d.to_string()).unwrap_or_default()
        );

        let entry = TelemetryEvent {
            ts: self.clock.wall_time().to_rfc3339(),
            event: event.to_string(),
            service_id: service_id.map(str::to_string),
            details,
        };

        let mut line = match serde_json::to_vec(&entry) {
            Ok(line) => line,
            Err(e) => {
                tracing::warn!("Failed to encode telemetry event '{}': {}", event, e);
                return;
            }
        };
        line.push(b'\n');

        let _guard = self.write_lock.lock();
        if let Err(e) = self.fs.append(&self.path, &line) {
            tracing::warn!(
                "Failed to write telemetry event '{}' to {}: {}",
                event,
                self.path.display(),
                e
            );
        }
    }

    /// Convenience for service-scoped events.
    pub fn service_event(&self, event: &str, service_id: &str, details: Value) {
        self.record(event, Some(service_id), Some(details));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::{LocalFs, SystemClock};
    use serde_json::json;

    fn recorder(path: PathBuf) -> TelemetryRecorder {
        TelemetryRecorder::new(path, None, Arc::new(LocalFs), Arc::new(SystemClock))
    }

    #[test]
    fn test_record_appends_json_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("telemetry.jsonl");
        let telemetry = recorder(path.clone());

        telemetry.record("supervisor_started", None, None);
        telemetry.service_event("service_ready", "api", json!({"elapsed_ms": 12}));

        let content = std::fs::read_to_string(&path).unwrap();
        let events: Vec<TelemetryEvent> = content
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].event, "supervisor_started");
        assert!(events[0].service_id.is_none());
        assert!(!content.lines().next().unwrap().contains("service_id"));
        assert_eq!(events[1].service_id.as_deref(), Some("api"));
        assert_eq!(events[1].details, Some(json!({"elapsed_ms": 12})));
    }

    #[test]
    fn test_write_failure_is_swallowed() {
        let dir = tempfile::tempdir().unwrap();
        // a directory where the file should be makes every append fail
        let path = dir.path().join("blocked");
        std::fs::create_dir_all(&path).unwrap();
        let telemetry = recorder(path);

        telemetry.record("anything", Some("svc"), None);
    }
}
