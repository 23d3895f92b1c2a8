//! JSON persistence for the registry, profiles and remembered control state.
//!
//! Writes go through a sibling temp file and a rename so readers (the CLI, the
//! wallpaper daemon, a user's editor) never observe a half-written file.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::StoreError;
use crate::model::{validate_registry, ControlState, DesiredState, ManagedApp, Profile};

/// Reads and parses `path`, or returns `None` when it does not exist.
pub fn read_json<T: DeserializeOwned>(path: &Path) -> Result<Option<T>, StoreError> {
    let content = match std::fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(source) => {
            return Err(StoreError::Read { path: path.to_path_buf(), source });
        }
    };
    serde_json::from_str(&content)
        .map(Some)
        .map_err(|source| StoreError::Parse { path: path.to_path_buf(), source })
}

/// Serialises `value` as pretty JSON and atomically replaces `path`.
pub fn write_json_atomic<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<(), StoreError> {
    let write_err = |source| StoreError::Write { path: path.to_path_buf(), source };
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(write_err)?;
    }
    let body = serde_json::to_string_pretty(value)
        .map_err(|e| write_err(std::io::Error::new(std::io::ErrorKind::InvalidData, e)))?;
    let tmp = temp_sibling(path);
    std::fs::write(&tmp, body).map_err(write_err)?;
    std::fs::rename(&tmp, path).map_err(|e| {
        let _ = std::fs::remove_file(&tmp);
        write_err(e)
    })
}

fn temp_sibling(path: &Path) -> PathBuf {
    let mut name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(format!(".{}.tmp", std::process::id()));
    path.with_file_name(name)
}

// ── Registry ──────────────────────────────────────────────────────────────────

/// Loads `apps.json`. A missing file yields an empty registry.
pub fn load_apps(path: &Path) -> Result<Vec<ManagedApp>, StoreError> {
    let apps: Vec<ManagedApp> = read_json(path)?.unwrap_or_default();
    validate_registry(&apps)?;
    Ok(apps)
}

pub fn save_apps(path: &Path, apps: &[ManagedApp]) -> Result<(), StoreError> {
    validate_registry(apps)?;
    write_json_atomic(path, apps)
}

/// Loads the registry, seeding it with `seed` when the file does not exist yet.
pub fn load_apps_or_seed(
    path: &Path,
    seed: impl FnOnce() -> Vec<ManagedApp>,
) -> Result<Vec<ManagedApp>, StoreError> {
    if path.exists() {
        return load_apps(path);
    }
    let apps = seed();
    save_apps(path, &apps)?;
    Ok(apps)
}

// ── Profiles ──────────────────────────────────────────────────────────────────

type ProfileFile = BTreeMap<String, BTreeMap<String, DesiredState>>;

/// Loads `profiles.json`, ordered by profile name.
pub fn load_profiles(path: &Path) -> Result<Vec<Profile>, StoreError> {
    let raw: ProfileFile = read_json(path)?.unwrap_or_default();
    Ok(raw
        .into_iter()
        .map(|(name, states)| Profile { name, states })
        .collect())
}

pub fn save_profiles(path: &Path, profiles: &[Profile]) -> Result<(), StoreError> {
    let raw: ProfileFile = profiles
        .iter()
        .map(|p| (p.name.clone(), p.states.clone()))
        .collect();
    write_json_atomic(path, &raw)
}

// ── Control state ─────────────────────────────────────────────────────────────

pub fn load_state(path: &Path) -> Result<ControlState, StoreError> {
    Ok(read_json(path)?.unwrap_or_default())
}

pub fn save_state(path: &Path, state: &ControlState) -> Result<(), StoreError> {
    write_json_atomic(path, state)
}

/// Copies remembered desired states onto the registry. Apps without an entry
/// stay `Off`.
pub fn merge_desired(apps: &mut [ManagedApp], state: &ControlState) {
    for app in apps {
        app.desired_state = state.desired.get(&app.name).copied().unwrap_or_default();
    }
}
