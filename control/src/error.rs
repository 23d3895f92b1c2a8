use std::path::PathBuf;

use thiserror::Error;

/// The OS refused to start an app, or its launch target does not exist.
#[derive(Debug, Error)]
pub enum LaunchError {
    #[error("launch target not found: {}", .0.display())]
    NotFound(PathBuf),
    #[error("working directory not found: {}", .0.display())]
    MissingCwd(PathBuf),
    #[error("empty command")]
    EmptyCommand,
    #[error("spawn refused: {0}")]
    Spawn(#[source] std::io::Error),
}

#[derive(Debug, Error)]
pub enum SupervisorError {
    #[error("unknown app '{0}'")]
    UnknownApp(String),
    #[error("failed to launch '{app}': {source}")]
    Launch {
        app: String,
        #[source]
        source: LaunchError,
    },
    /// Some process of the app's tree survived graceful stop and forced kill.
    /// The app is left flagged for manual intervention.
    #[error("'{app}' survived forced termination (pids {survivors:?})")]
    Termination { app: String, survivors: Vec<u32> },
}

impl SupervisorError {
    pub fn app(&self) -> &str {
        match self {
            Self::UnknownApp(app) | Self::Launch { app, .. } | Self::Termination { app, .. } => app,
        }
    }
}

/// Missing or invalid wallpaper settings. The daemon reports these and
/// enters `Stopped`; it never crashes on them.
#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("no wallpaper folder configured")]
    NoFolder,
    #[error("wallpaper folder not found: {}", .0.display())]
    FolderMissing(PathBuf),
    #[error("no images found in {}", .0.display())]
    NoImages(PathBuf),
    #[error("cannot scan {}: {source}", path.display())]
    Scan {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("cannot read settings {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid settings {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// A profile application finished with some per-app failures. The apps that
/// could be switched were switched.
#[derive(Debug, Error)]
pub enum ProfileError {
    #[error("unknown profile '{0}'")]
    UnknownProfile(String),
    #[error("profile '{profile}' applied with {} failure(s)", .failures.len())]
    Partial {
        profile: String,
        report: crate::profile::ProfileReport,
        failures: Vec<SupervisorError>,
    },
}

#[derive(Debug, Error)]
pub enum GuardError {
    /// Another live process holds the named guard.
    #[error("another instance of '{0}' is already running")]
    Conflict(String),
    #[error("cannot create single-instance guard: {0}")]
    Os(#[from] std::io::Error),
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("cannot read {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("cannot parse {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("cannot write {}: {source}", path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid registry: {0}")]
    Invalid(String),
}
