//! Folder scanning for wallpaper candidates.

use std::path::{Path, PathBuf};

use walkdir::WalkDir;

use crate::error::SettingsError;

pub const IMAGE_EXTENSIONS: [&str; 4] = ["jpg", "jpeg", "png", "bmp"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanResult {
    /// Sorted by path.
    pub images: Vec<PathBuf>,
    /// The top level had no images, so subfolders were used.
    pub recursive_fallback: bool,
}

pub fn is_image(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| IMAGE_EXTENSIONS.iter().any(|ext| e.eq_ignore_ascii_case(ext)))
        .unwrap_or(false)
}

/// Lists images in `folder`, descending into subfolders when `recursive`.
pub fn gather(folder: &Path, recursive: bool) -> Result<Vec<PathBuf>, SettingsError> {
    let mut walker = WalkDir::new(folder).follow_links(true).min_depth(1);
    if !recursive {
        walker = walker.max_depth(1);
    }
    let mut images = Vec::new();
    for entry in walker {
        let entry = match entry {
            Ok(entry) => entry,
            // The folder itself is unreadable.
            Err(e) if e.depth() == 0 => {
                return Err(SettingsError::Scan { path: folder.to_path_buf(), source: e.into() });
            }
            Err(e) => {
                tracing::debug!("skipping unreadable entry: {e}");
                continue;
            }
        };
        if entry.file_type().is_file() && is_image(entry.path()) {
            images.push(entry.into_path());
        }
    }
    images.sort();
    Ok(images)
}

/// Scans `folder`, falling back to a recursive scan when a flat scan finds
/// nothing. An empty result is [`SettingsError::NoImages`].
pub fn scan(folder: &Path, recursive: bool) -> Result<ScanResult, SettingsError> {
    if !folder.is_dir() {
        return Err(SettingsError::FolderMissing(folder.to_path_buf()));
    }
    let images = gather(folder, recursive)?;
    if !images.is_empty() {
        return Ok(ScanResult { images, recursive_fallback: false });
    }
    if !recursive {
        let nested = gather(folder, true)?;
        if !nested.is_empty() {
            tracing::info!(
                folder = %folder.display(),
                "no images at the top level; using images found in subfolders"
            );
            return Ok(ScanResult { images: nested, recursive_fallback: true });
        }
    }
    Err(SettingsError::NoImages(folder.to_path_buf()))
}
