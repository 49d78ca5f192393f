pub mod config;
pub mod logging;

mod control;
pub mod event;
pub mod fetch;
pub mod job;
pub mod progress;
pub mod sanitize;
pub mod scheduler;
