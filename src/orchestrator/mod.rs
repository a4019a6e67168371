mod builder;
mod core;
mod lifecycle;
mod migrations;
mod monitoring;

pub use builder::SupervisorBuilder;
pub use core::*;
pub use migrations::MigrationExecutor;
