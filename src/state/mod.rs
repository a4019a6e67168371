//! Persistent runtime state.
//!
//! The migration ledger (`migrations.json`) records which migration versions
//! have been applied per service and which app version was last fully
//! migrated. It is rewritten atomically after every successful migration.

mod ledger;
mod types;

pub use ledger::MigrationLedger;
pub use types::{InstallPhase, MigrationsState};
