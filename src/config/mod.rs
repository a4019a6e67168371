//! Manifest parsing and types.
//!
//! - `types` - Root manifest structure (`Manifest`, `PortRange`, ...)
//! - `service` - Service configuration (`Service`, `Binary`, `Migration`, ...)
//! - `health` - Health and readiness policies
//! - `secret` - Secret declarations
//! - `duration` - Duration strings
//! - `parser` - JSON/YAML manifest loading
//! - `validation` - Reference and uniqueness checks

mod duration;
mod health;
mod parser;
mod secret;
mod service;
mod types;
mod validation;

pub use duration::*;
pub use health::*;
pub use parser::*;
pub use secret::*;
pub use service::*;
pub use types::*;
