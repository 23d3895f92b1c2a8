//! The `wallch` wallpaper rotation daemon.

pub mod daemon;
pub mod desktop;
pub mod scan;
pub mod session;
pub mod settings;

pub use session::{Mode, WallpaperStatus};
pub use settings::{WallpaperSettings, WallpaperStyle};
