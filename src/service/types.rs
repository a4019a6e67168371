use serde::{Deserialize, Serialize};

/// Message shown while the launch waits for required secrets.
pub const WAITING_FOR_SECRETS: &str = "waiting for secrets";

/// Externally visible state of one service.
///
/// ```
/// use bundle_runtime::service::ServiceStatus;
///
/// let status = ServiceStatus::pending("starting");
/// assert!(!status.ready);
/// assert_eq!(ServiceStatus::ready().message, "ready");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ServiceStatus {
    pub ready: bool,
    pub message: String,
    pub exit_code: Option<i32>,
}

impl ServiceStatus {
    /// Not ready yet, with a reason.
    pub fn pending(message: impl Into<String>) -> Self {
        Self {
            ready: false,
            message: message.into(),
            exit_code: None,
        }
    }

    pub fn ready() -> Self {
        Self {
            ready: true,
            message: "ready".to_string(),
            exit_code: None,
        }
    }

    /// Not ready because something failed or the process is gone.
    pub fn failed(message: impl Into<String>, exit_code: Option<i32>) -> Self {
        Self {
            ready: false,
            message: message.into(),
            exit_code,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_json_shape() {
        let json = serde_json::to_value(ServiceStatus::failed("exited: exit code 2", Some(2))).unwrap();
        assert_eq!(
            json,
            serde_json::json!({"ready": false, "message": "exited: exit code 2", "exit_code": 2})
        );

        let json = serde_json::to_value(ServiceStatus::pending(WAITING_FOR_SECRETS)).unwrap();
        assert_eq!(json["exit_code"], serde_json::Value::Null);
    }
}
