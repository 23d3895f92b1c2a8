// No console window when launched by the supervisor.
#![cfg_attr(windows, windows_subsystem = "windows")]

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;

use the_control::config;
use the_control::logging;
use the_control::paths::DataPaths;
use the_control::wallpaper::daemon;
use the_control::wallpaper::{WallpaperSettings, WallpaperStyle};

/// Rotates the desktop wallpaper through the images in a folder.
///
/// Options override `wallch_settings.json` for this run only; a `reload`
/// command re-reads the file.
#[derive(Debug, Parser)]
#[command(name = "wallch", version)]
struct Args {
    /// Folder to take images from.
    #[arg(long)]
    folder: Option<PathBuf>,
    /// Seconds between changes.
    #[arg(long)]
    interval: Option<u64>,
    #[arg(long, value_enum)]
    style: Option<WallpaperStyle>,
    /// Shuffle the images (true/false).
    #[arg(long)]
    shuffle: Option<bool>,
    /// Include subfolders.
    #[arg(long)]
    recursive: bool,
    /// Set one wallpaper and exit.
    #[arg(long)]
    once: bool,
    /// Settings file to use instead of the one in the data directory.
    #[arg(long)]
    settings: Option<PathBuf>,
}

impl Args {
    fn overlay(&self, settings: &mut WallpaperSettings) {
        if let Some(folder) = &self.folder {
            settings.folder = folder.clone();
        }
        if let Some(interval) = self.interval {
            settings.interval = interval;
        }
        if let Some(style) = self.style {
            settings.style = style;
        }
        if let Some(shuffle) = self.shuffle {
            settings.shuffle = shuffle;
        }
        settings.recursive |= self.recursive;
        settings.once |= self.once;
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let paths = DataPaths::discover();
    paths
        .ensure()
        .with_context(|| format!("Failed to create data directory {}", paths.root().display()))?;

    let config = config::load_or_default(&paths.config()).unwrap_or_else(|e| {
        eprintln!("[config] Error (using defaults): {e:#}");
        config::Config::default()
    });
    logging::init(&config.logging.level, &paths.wallpaper_log());

    let settings_path = args.settings.clone().unwrap_or_else(|| paths.wallpaper_settings());
    let mut settings = WallpaperSettings::load(&settings_path).unwrap_or_else(|e| {
        tracing::warn!("{e}; using defaults");
        WallpaperSettings::default()
    });
    args.overlay(&mut settings);

    daemon::run(&paths, settings_path, settings, &config.wallpaper).await?;
    Ok(())
}
