/// Canonical file paths for The Control data files.
///
/// Everything lives under one data directory (`%APPDATA%\TheControl\` on
/// Windows, the platform config dir elsewhere, or `$THE_CONTROL_HOME`):
///   - apps.json             Managed app registry.
///   - profiles.json         Named bulk on/off profiles.
///   - control.state.json    Remembered desired states, autostart, last profile.
///   - control.toml          Supervisor / daemon tuning.
///   - control.status.json   Written by the supervisor, read by the CLI.
///   - control.cmd           Intent mailbox read by the supervisor.
///   - wallch_settings.json  Wallpaper daemon settings.
///   - wallch.cmd            Command mailbox read by the wallpaper daemon.
///   - wallch.status         Written by the wallpaper daemon.
///   - logs\<app>.log        Per-app event log.
use std::path::{Path, PathBuf};

const APP_DIR_NAME: &str = "TheControl";
pub const HOME_ENV: &str = "THE_CONTROL_HOME";

pub const APPS_FILE_NAME: &str = "apps.json";
pub const PROFILES_FILE_NAME: &str = "profiles.json";
pub const STATE_FILE_NAME: &str = "control.state.json";
pub const CONFIG_FILE_NAME: &str = "control.toml";
pub const SUPERVISOR_STATUS_FILE_NAME: &str = "control.status.json";
pub const SUPERVISOR_MAILBOX_FILE_NAME: &str = "control.cmd";
pub const WALLPAPER_SETTINGS_FILE_NAME: &str = "wallch_settings.json";
pub const WALLPAPER_MAILBOX_FILE_NAME: &str = "wallch.cmd";
pub const WALLPAPER_STATUS_FILE_NAME: &str = "wallch.status";
pub const SUPERVISOR_LOG_FILE_NAME: &str = "control.log";
pub const WALLPAPER_LOG_FILE_NAME: &str = "wallch.log";
const APP_LOG_DIR_NAME: &str = "logs";

/// Returns the data directory without creating it.
///
/// `$THE_CONTROL_HOME` wins; otherwise the platform config directory is used,
/// falling back to the directory of the running executable.
pub fn app_data_dir() -> PathBuf {
    if let Some(home) = std::env::var_os(HOME_ENV).filter(|v| !v.is_empty()) {
        return PathBuf::from(home);
    }
    if let Some(config) = dirs::config_dir() {
        return config.join(APP_DIR_NAME);
    }
    std::env::current_exe()
        .ok()
        .and_then(|exe| exe.parent().map(Path::to_path_buf))
        .unwrap_or_else(|| PathBuf::from("."))
        .join(APP_DIR_NAME)
}

/// All file locations derived from one data directory.
#[derive(Debug, Clone)]
pub struct DataPaths {
    root: PathBuf,
}

impl DataPaths {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Resolves [`app_data_dir`].
    pub fn discover() -> Self {
        Self::new(app_data_dir())
    }

    /// Creates the data directory and the per-app log directory.
    pub fn ensure(&self) -> std::io::Result<()> {
        std::fs::create_dir_all(self.app_log_dir())
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn apps(&self) -> PathBuf {
        self.root.join(APPS_FILE_NAME)
    }

    pub fn profiles(&self) -> PathBuf {
        self.root.join(PROFILES_FILE_NAME)
    }

    pub fn state(&self) -> PathBuf {
        self.root.join(STATE_FILE_NAME)
    }

    pub fn config(&self) -> PathBuf {
        self.root.join(CONFIG_FILE_NAME)
    }

    pub fn supervisor_status(&self) -> PathBuf {
        self.root.join(SUPERVISOR_STATUS_FILE_NAME)
    }

    pub fn supervisor_mailbox(&self) -> PathBuf {
        self.root.join(SUPERVISOR_MAILBOX_FILE_NAME)
    }

    pub fn wallpaper_settings(&self) -> PathBuf {
        self.root.join(WALLPAPER_SETTINGS_FILE_NAME)
    }

    pub fn wallpaper_mailbox(&self) -> PathBuf {
        self.root.join(WALLPAPER_MAILBOX_FILE_NAME)
    }

    pub fn wallpaper_status(&self) -> PathBuf {
        self.root.join(WALLPAPER_STATUS_FILE_NAME)
    }

    pub fn supervisor_log(&self) -> PathBuf {
        self.root.join(SUPERVISOR_LOG_FILE_NAME)
    }

    pub fn wallpaper_log(&self) -> PathBuf {
        self.root.join(WALLPAPER_LOG_FILE_NAME)
    }

    pub fn app_log_dir(&self) -> PathBuf {
        self.root.join(APP_LOG_DIR_NAME)
    }
}
