//! Running services: process handles, log files and externally visible
//! status.

mod log_capture;
mod process;
mod types;

pub use log_capture::*;
pub use process::*;
pub use types::*;
