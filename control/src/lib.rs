//! The Control: a supervisor for background apps plus the `wallch` wallpaper
//! daemon, both driven from the `control` CLI.

pub mod applog;
pub mod channel;
pub mod config;
pub mod error;
pub mod event;
pub mod guard;
pub mod logging;
pub mod model;
pub mod paths;
pub mod process;
pub mod profile;
#[cfg(windows)]
mod registry;
pub mod runtime;
pub mod startup;
pub mod status;
pub mod store;
pub mod supervisor;
pub mod wallpaper;
