//! Per-service parameters: ports, rendered environment and secrets.

mod port;
mod resolver;
mod secret;

pub use port::*;
pub use resolver::*;
pub use secret::*;
