use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::store::{read_json, write_json_atomic};
use crate::supervisor::AppStatus;
use crate::wallpaper::WallpaperStatus;

/// Runtime status written by the supervisor to `control.status.json` after
/// every watch cycle. The CLI reads this file (read-only) to display state.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct SupervisorStatus {
    /// Binary version (set from Cargo.toml at compile time).
    pub version: String,
    pub pid: u32,
    pub updated_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_profile: Option<String>,
    /// Per-app rows, in registry order. Kept as raw JSON on the read side so
    /// older and newer writers stay readable.
    pub apps: Vec<serde_json::Value>,
}

impl SupervisorStatus {
    pub fn new(apps: &[AppStatus], last_profile: Option<String>) -> Self {
        Self {
            version: env!("CARGO_PKG_VERSION").to_string(),
            pid: std::process::id(),
            updated_at: Utc::now(),
            last_profile,
            apps: apps
                .iter()
                .filter_map(|a| serde_json::to_value(a).ok())
                .collect(),
        }
    }
}

/// Writes `status` to `path` as JSON.
/// Logs errors rather than returning them: a status write failure should
/// never take a daemon down.
pub fn write_status<S: Serialize>(path: &Path, status: &S) {
    if let Err(e) = write_json_atomic(path, status) {
        tracing::warn!("failed to write status file: {e}");
    }
}

/// Reads a status file. Missing or unreadable files yield `None`.
pub fn read_status<S: DeserializeOwned>(path: &Path) -> Option<S> {
    match read_json(path) {
        Ok(status) => status,
        Err(e) => {
            tracing::debug!("unreadable status file: {e}");
            None
        }
    }
}

// ── Rendering for `control status` ─────────────────────────────────────────────

/// One line per app: name, desired state, observed state and details.
pub fn render_supervisor(status: &SupervisorStatus) -> String {
    let mut out = format!(
        "supervisor v{} (pid {}), updated {}\n",
        status.version,
        status.pid,
        status.updated_at.with_timezone(&chrono::Local).format("%Y-%m-%d %H:%M:%S")
    );
    if let Some(profile) = &status.last_profile {
        out.push_str(&format!("profile: {profile}\n"));
    }
    for app in &status.apps {
        out.push_str(&render_app(app));
        out.push('\n');
    }
    out
}

fn render_app(app: &serde_json::Value) -> String {
    let name = app["name"].as_str().unwrap_or("?");
    let desired = if app["desired"].as_bool().unwrap_or(false) { "on" } else { "off" };
    let state = app["state"].as_str().unwrap_or("unknown");
    let mut line = format!("{name:<20} {desired:<4} {state}");
    if let Some(pid) = app["pid"].as_u64() {
        line.push_str(&format!(" pid={pid}"));
    }
    if let Some(cpu) = app["cpu_percent"].as_f64() {
        line.push_str(&format!(" cpu={cpu:.1}%"));
    }
    if let Some(bytes) = app["memory_bytes"].as_u64() {
        line.push_str(&format!(" mem={:.1}MB", bytes as f64 / (1024.0 * 1024.0)));
    }
    if let Some(orphans) = app["orphans"].as_array() {
        line.push_str(&format!(" orphans={}", orphans.len()));
    }
    if let Some(error) = app["error"].as_str() {
        line.push_str(&format!(" ({error})"));
    }
    if app["needs_attention"].as_bool().unwrap_or(false) {
        line.push_str(" [needs attention]");
    }
    line
}

pub fn render_wallpaper(status: &WallpaperStatus) -> String {
    let mut out = format!("wallpaper: {} (pid {})", status.mode, status.pid);
    if let Some(image) = &status.current_image {
        out.push_str(&format!("\n  image: {}", image.display()));
    }
    if let Some(secs) = status.remaining_seconds {
        out.push_str(&format!("\n  next in: {secs}s"));
    }
    if let Some(condition) = &status.condition {
        out.push_str(&format!("\n  note: {condition}"));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::DesiredState;
    use crate::supervisor::AppState;

    fn row(name: &str, state: AppState) -> AppStatus {
        AppStatus { name: name.into(), desired: DesiredState::On, state, needs_attention: false }
    }

    #[test]
    fn new_version_matches_cargo_pkg() {
        let s = SupervisorStatus::new(&[], None);
        assert_eq!(s.version, env!("CARGO_PKG_VERSION"));
        assert_eq!(s.pid, std::process::id());
    }

    #[test]
    fn write_status_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("control.status.json");
        let status = SupervisorStatus::new(
            &[
                row("sync", AppState::Running { pid: 7, cpu_percent: 1.0, memory_bytes: 10, orphans: vec![] }),
                row("bot", AppState::StoppedUnexpectedly),
            ],
            Some("Work".into()),
        );
        write_status(&path, &status);

        let parsed: SupervisorStatus = read_status(&path).unwrap();
        assert_eq!(parsed.last_profile.as_deref(), Some("Work"));
        assert_eq!(parsed.apps.len(), 2);
        assert_eq!(parsed.apps[0]["pid"], 7);
        assert_eq!(parsed.apps[1]["state"], "stopped_unexpectedly");
    }

    #[test]
    fn write_status_creates_parent_directory() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("dir").join("control.status.json");
        write_status(&path, &SupervisorStatus::new(&[], None));
        assert!(path.exists());
    }

    #[test]
    fn write_status_omits_missing_profile() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("control.status.json");
        write_status(&path, &SupervisorStatus::new(&[], None));
        let content = std::fs::read_to_string(&path).unwrap();
        assert!(!content.contains("last_profile"));
    }

    #[test]
    fn render_lists_apps_with_details() {
        let status = SupervisorStatus::new(
            &[
                row("sync", AppState::Running { pid: 7, cpu_percent: 2.0, memory_bytes: 2 * 1024 * 1024, orphans: vec![] }),
                AppStatus {
                    name: "bot".into(),
                    desired: DesiredState::Off,
                    state: AppState::LaunchFailed { error: "launch target not found: bot.exe".into() },
                    needs_attention: true,
                },
            ],
            Some("Work".into()),
        );
        let text = render_supervisor(&status);
        assert!(text.contains("profile: Work"));
        assert!(text.contains("sync"));
        assert!(text.contains("running pid=7 cpu=2.0% mem=2.0MB"));
        assert!(text.contains("launch_failed (launch target not found: bot.exe) [needs attention]"));
    }

    #[test]
    fn render_wallpaper_status() {
        let status = WallpaperStatus {
            mode: crate::wallpaper::Mode::Paused,
            current_image: Some("/pics/a.jpg".into()),
            remaining_seconds: Some(42),
            condition: None,
            pid: 9,
            updated_at: Utc::now(),
        };
        let text = render_wallpaper(&status);
        assert!(text.starts_with("wallpaper: Paused (pid 9)"));
        assert!(text.contains("next in: 42s"));
    }

    #[test]
    fn read_status_missing_or_garbage_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("control.status.json");
        assert!(read_status::<SupervisorStatus>(&path).is_none());
        std::fs::write(&path, "not json").unwrap();
        assert!(read_status::<SupervisorStatus>(&path).is_none());
    }
}
