//! `wallch_settings.json`: what to show, how, and how often.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{SettingsError, StoreError};
use crate::store::write_json_atomic;

pub const DEFAULT_INTERVAL_SECS: u64 = 300;

/// Desktop placement of the image.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum,
)]
#[serde(rename_all = "lowercase")]
pub enum WallpaperStyle {
    #[default]
    Fill,
    Fit,
    Stretch,
    Tile,
    Center,
    /// Across all monitors.
    Span,
}

impl WallpaperStyle {
    /// `(TileWallpaper, WallpaperStyle)` values under `HKCU\Control Panel\Desktop`.
    pub fn registry_values(self) -> (&'static str, &'static str) {
        match self {
            Self::Fill => ("0", "10"),
            Self::Fit => ("0", "6"),
            Self::Stretch => ("0", "2"),
            Self::Center => ("0", "0"),
            Self::Tile => ("1", "0"),
            Self::Span => ("0", "22"),
        }
    }
}

impl std::fmt::Display for WallpaperStyle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Fill => "fill",
            Self::Fit => "fit",
            Self::Stretch => "stretch",
            Self::Tile => "tile",
            Self::Center => "center",
            Self::Span => "span",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WallpaperSettings {
    /// Empty means "not configured yet".
    pub folder: PathBuf,
    /// Seconds between changes.
    #[serde(alias = "intervalSeconds", alias = "interval_seconds")]
    pub interval: u64,
    pub style: WallpaperStyle,
    pub shuffle: bool,
    pub recursive: bool,
    /// Apply one image, then stop.
    pub once: bool,
}

impl Default for WallpaperSettings {
    fn default() -> Self {
        Self {
            folder: PathBuf::new(),
            interval: DEFAULT_INTERVAL_SECS,
            style: WallpaperStyle::Fill,
            shuffle: true,
            recursive: false,
            once: false,
        }
    }
}

impl WallpaperSettings {
    /// Never shorter than one second.
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval.max(1))
    }

    /// Loads `path`; a missing file yields the defaults.
    pub fn load(path: &Path) -> Result<Self, SettingsError> {
        let content = match std::fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Self::default()),
            Err(source) => return Err(SettingsError::Read { path: path.to_path_buf(), source }),
        };
        serde_json::from_str(&content)
            .map_err(|source| SettingsError::Parse { path: path.to_path_buf(), source })
    }

    pub fn save(&self, path: &Path) -> Result<(), StoreError> {
        write_json_atomic(path, self)
    }

    /// The configured folder, if it names an existing directory.
    pub fn validate(&self) -> Result<&Path, SettingsError> {
        if self.folder.as_os_str().is_empty() {
            return Err(SettingsError::NoFolder);
        }
        if !self.folder.is_dir() {
            return Err(SettingsError::FolderMissing(self.folder.clone()));
        }
        Ok(&self.folder)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_first_run() {
        let s = WallpaperSettings::default();
        assert_eq!(s.interval, 300);
        assert_eq!(s.style, WallpaperStyle::Fill);
        assert!(s.shuffle);
        assert!(!s.recursive);
        assert!(!s.once);
    }

    #[test]
    fn missing_file_is_default() {
        let dir = tempfile::tempdir().unwrap();
        let s = WallpaperSettings::load(&dir.path().join("wallch_settings.json")).unwrap();
        assert_eq!(s, WallpaperSettings::default());
    }

    #[test]
    fn partial_file_fills_defaults_and_accepts_aliases() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("wallch_settings.json");
        std::fs::write(&path, r#"{"folder": "C:\\Wall", "intervalSeconds": 60, "style": "span"}"#).unwrap();
        let s = WallpaperSettings::load(&path).unwrap();
        assert_eq!(s.folder, PathBuf::from(r"C:\Wall"));
        assert_eq!(s.interval, 60);
        assert_eq!(s.style, WallpaperStyle::Span);
        assert!(s.shuffle);
    }

    #[test]
    fn invalid_style_is_a_parse_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("wallch_settings.json");
        std::fs::write(&path, r#"{"style": "mosaic"}"#).unwrap();
        assert!(matches!(WallpaperSettings::load(&path), Err(SettingsError::Parse { .. })));
    }

    #[test]
    fn zero_interval_is_one_second() {
        let s = WallpaperSettings { interval: 0, ..WallpaperSettings::default() };
        assert_eq!(s.interval(), Duration::from_secs(1));
    }

    #[test]
    fn validate_checks_folder() {
        let dir = tempfile::tempdir().unwrap();
        let mut s = WallpaperSettings::default();
        assert!(matches!(s.validate(), Err(SettingsError::NoFolder)));
        s.folder = dir.path().join("absent");
        assert!(matches!(s.validate(), Err(SettingsError::FolderMissing(_))));
        s.folder = dir.path().to_path_buf();
        assert_eq!(s.validate().unwrap(), dir.path());
    }

    #[test]
    fn save_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("wallch_settings.json");
        let s = WallpaperSettings { folder: "/pics".into(), once: true, ..WallpaperSettings::default() };
        s.save(&path).unwrap();
        assert_eq!(WallpaperSettings::load(&path).unwrap(), s);
    }

    #[test]
    fn style_registry_values() {
        assert_eq!(WallpaperStyle::Fill.registry_values(), ("0", "10"));
        assert_eq!(WallpaperStyle::Tile.registry_values(), ("1", "0"));
        assert_eq!(WallpaperStyle::Span.registry_values(), ("0", "22"));
    }
}
