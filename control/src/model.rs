//! Managed app registry records, profiles, and the remembered control state.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::StoreError;

/// Whether the user wants an app running.
///
/// Persisted as a plain JSON boolean so `profiles.json` and
/// `control.state.json` stay hand-editable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(from = "bool", into = "bool")]
pub enum DesiredState {
    On,
    #[default]
    Off,
}

impl DesiredState {
    pub fn is_on(self) -> bool {
        self == Self::On
    }

    pub fn flipped(self) -> Self {
        match self {
            Self::On => Self::Off,
            Self::Off => Self::On,
        }
    }
}

impl From<bool> for DesiredState {
    fn from(on: bool) -> Self {
        if on {
            Self::On
        } else {
            Self::Off
        }
    }
}

impl From<DesiredState> for bool {
    fn from(state: DesiredState) -> Self {
        state.is_on()
    }
}

impl std::fmt::Display for DesiredState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(if self.is_on() { "on" } else { "off" })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppKind {
    Executable,
    Command,
    Script,
}

/// How an app is launched.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum LaunchSpec {
    /// A program started directly, without a shell.
    Executable {
        path: PathBuf,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        args: Vec<String>,
    },
    /// A shell command line (`cmd /C` on Windows, `sh -c` elsewhere).
    Command { command: String },
    /// A script run by an interpreter shared with unrelated scripts.
    Script {
        interpreter: String,
        script: PathBuf,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        args: Vec<String>,
    },
}

impl LaunchSpec {
    pub fn kind(&self) -> AppKind {
        match self {
            Self::Executable { .. } => AppKind::Executable,
            Self::Command { .. } => AppKind::Command,
            Self::Script { .. } => AppKind::Script,
        }
    }
}

/// How a running OS process is recognised as a given app.
///
/// Every populated criterion must hold. An empty spec matches nothing.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct MatchSpec {
    /// Process image name, compared case-insensitively without `.exe`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub process_name: Option<String>,
    /// Executable path after normalisation. A bare name matches by image name
    /// and a relative path is taken from the app's `cwd`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub executable: Option<PathBuf>,
    /// Substring of the joined, normalised command line.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cmdline_contains: Option<String>,
    /// Exact argument vector, program first.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub argv: Option<Vec<String>>,
}

impl MatchSpec {
    pub fn is_empty(&self) -> bool {
        self.process_name.is_none()
            && self.executable.is_none()
            && self.cmdline_contains.is_none()
            && self.argv.is_none()
    }

    /// Identity implied by a launch spec when the registry gives none.
    pub fn derive(launch: &LaunchSpec) -> Self {
        match launch {
            LaunchSpec::Executable { path, .. } => Self {
                executable: Some(path.clone()),
                ..Self::default()
            },
            LaunchSpec::Command { command } => Self {
                cmdline_contains: Some(command.trim().to_string()),
                ..Self::default()
            },
            LaunchSpec::Script { interpreter, script, args } => {
                let mut argv = vec![interpreter.clone(), script.to_string_lossy().into_owned()];
                argv.extend(args.iter().cloned());
                Self {
                    argv: Some(argv),
                    ..Self::default()
                }
            }
        }
    }
}

fn default_restart_on_crash() -> bool {
    true
}

/// A user-registered program under supervision.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ManagedApp {
    /// Unique, user-assigned key.
    pub name: String,
    #[serde(flatten)]
    pub launch: LaunchSpec,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cwd: Option<PathBuf>,
    #[serde(default, rename = "match", skip_serializing_if = "Option::is_none")]
    pub match_spec: Option<MatchSpec>,
    #[serde(default = "default_restart_on_crash")]
    pub restart_on_crash: bool,
    /// Lives in `control.state.json`, merged in at load.
    #[serde(skip)]
    pub desired_state: DesiredState,
    /// Observation only. Never used to decide liveness.
    #[serde(skip)]
    pub last_known_pid: Option<u32>,
}

impl ManagedApp {
    pub fn new(name: impl Into<String>, launch: LaunchSpec) -> Self {
        Self {
            name: name.into(),
            launch,
            cwd: None,
            match_spec: None,
            restart_on_crash: true,
            desired_state: DesiredState::Off,
            last_known_pid: None,
        }
    }

    pub fn kind(&self) -> AppKind {
        self.launch.kind()
    }

    /// The registry's explicit match spec, or one derived from the launch spec.
    pub fn effective_match(&self) -> MatchSpec {
        match &self.match_spec {
            Some(spec) if !spec.is_empty() => spec.clone(),
            _ => MatchSpec::derive(&self.launch),
        }
    }

    /// Registry entry for the wallpaper daemon binary shipped next to `exe`.
    pub fn wallpaper_daemon(control_exe: &Path) -> Self {
        let file_name = if cfg!(windows) { "wallch.exe" } else { "wallch" };
        let path = control_exe
            .parent()
            .map(|dir| dir.join(file_name))
            .unwrap_or_else(|| PathBuf::from(file_name));
        Self::new("Wallpaper", LaunchSpec::Executable { path, args: Vec::new() })
    }

    /// Whether this entry runs the `wallch` binary.
    pub fn launches_wallpaper_daemon(&self) -> bool {
        match &self.launch {
            LaunchSpec::Executable { path, .. } => path
                .file_stem()
                .is_some_and(|stem| stem.to_string_lossy().eq_ignore_ascii_case("wallch")),
            _ => false,
        }
    }
}

/// Rejects registries that would make identification unreliable.
pub fn validate_registry(apps: &[ManagedApp]) -> Result<(), StoreError> {
    let mut seen = std::collections::HashSet::new();
    for app in apps {
        if app.name.trim().is_empty() {
            return Err(StoreError::Invalid("app with an empty name".into()));
        }
        if !seen.insert(app.name.as_str()) {
            return Err(StoreError::Invalid(format!("duplicate app name '{}'", app.name)));
        }
        // An interpreter name alone would match every script it runs.
        if app.kind() == AppKind::Script {
            let spec = app.effective_match();
            if spec.argv.is_none() && spec.cmdline_contains.is_none() {
                return Err(StoreError::Invalid(format!(
                    "script app '{}' needs an argv or cmdline_contains match",
                    app.name
                )));
            }
        }
    }
    Ok(())
}

/// Named bulk on/off intent over a subset of apps.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Profile {
    pub name: String,
    pub states: BTreeMap<String, DesiredState>,
}

impl Profile {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            states: BTreeMap::new(),
        }
    }

    pub fn with(mut self, app: impl Into<String>, state: DesiredState) -> Self {
        self.states.insert(app.into(), state);
        self
    }
}

/// Remembered state shared with the autostart collaborator.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ControlState {
    #[serde(default)]
    pub desired: BTreeMap<String, DesiredState>,
    #[serde(default)]
    pub autostart: bool,
    #[serde(default)]
    pub last_profile: Option<String>,
}
