//! CLI command handlers, one file per command.

mod config;
mod get;
mod info;

pub use config::run_config;
pub use get::{run_get, GetArgs};
pub use info::run_info;
