//! Secret declarations.
//!
//! The manifest only declares secrets; values live in the secret store.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Secret {
    pub id: String,

    /// Free-form classification shown to the host (`api_key`, `password`, ...).
    #[serde(default = "default_class")]
    pub class: String,

    #[serde(default = "default_required")]
    pub required: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    #[serde(default)]
    pub target: SecretTarget,
}

fn default_class() -> String {
    "generic".to_string()
}

fn default_required() -> bool {
    true
}

/// Where a secret value is delivered to a service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SecretTarget {
    /// Environment variable; name defaults to the upper-cased secret ID.
    Env {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        name: Option<String>,
    },
    /// File relative to the bundle root, written with owner-only permissions.
    File { path: String },
}

impl Default for SecretTarget {
    fn default() -> Self {
        SecretTarget::Env { name: None }
    }
}

impl Secret {
    /// Upper-cased ID with anything outside `[A-Z0-9_]` replaced by `_`.
    pub fn env_key(&self) -> String {
        self.id
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() {
                    c.to_ascii_uppercase()
                } else {
                    '_'
                }
            })
            .collect()
    }

    /// Variable name for an `env` target.
    pub fn env_name(&self) -> String {
        match &self.target {
            SecretTarget::Env { name: Some(name) } => name.clone(),
            _ => self.env_key(),
        }
    }
}
