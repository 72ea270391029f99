#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]

pub mod core;

pub use crate::core::config::Settings;
pub use crate::core::error::CoreError;
pub use crate::core::monitor::{Monitor, MonitorHandle};
