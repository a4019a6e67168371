mod checker;
mod command;
mod http;
mod log_match;
mod monitor;
mod tcp;

pub use checker::*;
pub use command::*;
pub use http::*;
pub use log_match::*;
pub use monitor::*;
pub use tcp::*;
