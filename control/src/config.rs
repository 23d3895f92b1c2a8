use anyhow::{Context, Result};
use notify::{Config as NotifyConfig, RecommendedWatcher, RecursiveMode, Watcher};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::sync::mpsc;

use crate::event::ControlEvent;

pub const DEFAULT_WATCH_INTERVAL_MS: u64 = 2500;
pub const MIN_WATCH_INTERVAL_MS: u64 = 500;
pub const MAX_WATCH_INTERVAL_MS: u64 = 60_000;

pub const DEFAULT_TERMINATION_GRACE_MS: u64 = 2500;
pub const MIN_TERMINATION_GRACE_MS: u64 = 100;
pub const MAX_TERMINATION_GRACE_MS: u64 = 30_000;

pub const DEFAULT_POLL_INTERVAL_MS: u64 = 250;
pub const MIN_POLL_INTERVAL_MS: u64 = 50;
pub const MAX_POLL_INTERVAL_MS: u64 = 5000;

pub const DEFAULT_STATUS_INTERVAL_MS: u64 = 1000;
pub const MIN_STATUS_INTERVAL_MS: u64 = 100;
pub const MAX_STATUS_INTERVAL_MS: u64 = 60_000;

pub const DEFAULT_LOG_LEVEL: &str = "info";

/// Tuning knobs, deserialized from `control.toml` in the data directory.
/// Every field is optional.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub supervisor: SupervisorConfig,
    #[serde(default)]
    pub wallpaper: WallpaperConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct SupervisorConfig {
    /// Period of the watch cycle. Clamped to [500, 60000].
    #[serde(default = "default_watch_interval")]
    pub watch_interval_ms: u64,
    /// How long a tree gets after the graceful signal, and again after the
    /// forced kill. Clamped to [100, 30000].
    #[serde(default = "default_termination_grace")]
    pub termination_grace_ms: u64,
    /// Stop an older supervisor instead of exiting when one is running.
    #[serde(default = "default_true")]
    pub clean_previous_instance: bool,
    /// Send `Quit` to the wallpaper daemon when the supervisor exits.
    #[serde(default = "default_true")]
    pub quit_wallpaper_on_exit: bool,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            watch_interval_ms: DEFAULT_WATCH_INTERVAL_MS,
            termination_grace_ms: DEFAULT_TERMINATION_GRACE_MS,
            clean_previous_instance: true,
            quit_wallpaper_on_exit: true,
        }
    }
}

impl SupervisorConfig {
    pub fn effective_watch_interval(&self) -> Duration {
        Duration::from_millis(
            self.watch_interval_ms
                .clamp(MIN_WATCH_INTERVAL_MS, MAX_WATCH_INTERVAL_MS),
        )
    }

    pub fn effective_grace(&self) -> Duration {
        Duration::from_millis(
            self.termination_grace_ms
                .clamp(MIN_TERMINATION_GRACE_MS, MAX_TERMINATION_GRACE_MS),
        )
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct WallpaperConfig {
    /// How often the daemon checks its command file. Clamped to [50, 5000].
    #[serde(default = "default_poll_interval")]
    pub poll_interval_ms: u64,
    /// How often the daemon rewrites its status file. Clamped to [100, 60000].
    #[serde(default = "default_status_interval")]
    pub status_interval_ms: u64,
}

impl Default for WallpaperConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: DEFAULT_POLL_INTERVAL_MS,
            status_interval_ms: DEFAULT_STATUS_INTERVAL_MS,
        }
    }
}

impl WallpaperConfig {
    pub fn effective_poll_interval(&self) -> Duration {
        Duration::from_millis(
            self.poll_interval_ms
                .clamp(MIN_POLL_INTERVAL_MS, MAX_POLL_INTERVAL_MS),
        )
    }

    pub fn effective_status_interval(&self) -> Duration {
        Duration::from_millis(
            self.status_interval_ms
                .clamp(MIN_STATUS_INTERVAL_MS, MAX_STATUS_INTERVAL_MS),
        )
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct LoggingConfig {
    /// `tracing` filter directive; `THE_CONTROL_LOG` takes precedence.
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self { level: DEFAULT_LOG_LEVEL.to_string() }
    }
}

/// Loads the config file at `path`, returning `Config::default()` if the file does not exist.
/// Returns an error if the file exists but cannot be read or parsed.
pub fn load_or_default(path: &Path) -> Result<Config> {
    if !path.exists() {
        return Ok(Config::default());
    }
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;
    toml::from_str(&content)
        .with_context(|| format!("Failed to parse config file: {}", path.display()))
}

/// Watches the data directory and turns writes to the files the supervisor
/// cares about into events: `control.toml` is re-parsed and sent as
/// [`ControlEvent::ConfigReloaded`]; `apps.json` / `profiles.json` edits become
/// [`ControlEvent::RegistryChanged`]; a new `control.cmd` becomes
/// [`ControlEvent::IntentPosted`].
pub async fn watch_data_dir(
    config_path: PathBuf,
    registry_paths: Vec<PathBuf>,
    mailbox_path: PathBuf,
    tx: mpsc::Sender<ControlEvent>,
) {
    let (watch_tx, mut watch_rx) = mpsc::channel::<notify::Event>(16);

    let mut watcher = match RecommendedWatcher::new(
        move |res: notify::Result<notify::Event>| {
            if let Ok(event) = res {
                let _ = watch_tx.blocking_send(event);
            }
        },
        NotifyConfig::default(),
    ) {
        Ok(w) => w,
        Err(e) => {
            tracing::warn!("failed to create file watcher: {e}");
            return;
        }
    };

    // Watch the directory rather than the files so editor-style atomic saves
    // (write-new + rename) are seen.
    let watch_dir = match config_path.parent() {
        Some(d) => d.to_path_buf(),
        None => {
            tracing::warn!("config path has no parent directory");
            return;
        }
    };

    if let Err(e) = watcher.watch(&watch_dir, RecursiveMode::NonRecursive) {
        tracing::warn!(dir = %watch_dir.display(), "failed to watch data directory: {e}");
        return;
    }

    while let Some(event) = watch_rx.recv().await {
        let is_write = matches!(
            event.kind,
            notify::EventKind::Create(_) | notify::EventKind::Modify(_)
        );
        if !is_write {
            continue;
        }
        let touches = |target: &Path| event.paths.iter().any(|p| p == target);

        let outgoing = if touches(&config_path) {
            match load_or_default(&config_path) {
                Ok(config) => Some(ControlEvent::ConfigReloaded(config)),
                Err(e) => {
                    tracing::warn!("failed to reload config: {e:#}");
                    None
                }
            }
        } else if registry_paths.iter().any(|p| touches(p)) {
            Some(ControlEvent::RegistryChanged)
        } else if touches(&mailbox_path) {
            Some(ControlEvent::IntentPosted)
        } else {
            None
        };

        if let Some(outgoing) = outgoing {
            if tx.send(outgoing).await.is_err() {
                break;
            }
        }
    }
}

fn default_watch_interval() -> u64 {
    DEFAULT_WATCH_INTERVAL_MS
}

fn default_termination_grace() -> u64 {
    DEFAULT_TERMINATION_GRACE_MS
}

fn default_poll_interval() -> u64 {
    DEFAULT_POLL_INTERVAL_MS
}

fn default_status_interval() -> u64 {
    DEFAULT_STATUS_INTERVAL_MS
}

fn default_log_level() -> String {
    DEFAULT_LOG_LEVEL.to_string()
}

fn default_true() -> bool {
    true
}
