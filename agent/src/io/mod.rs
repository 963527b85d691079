//! I/O helpers: settings, the model endpoint, and subprocess execution.

pub mod config;
pub mod model;
pub mod process;
pub mod shell;
