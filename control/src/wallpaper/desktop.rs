/// The desktop the wallpaper daemon paints on.
///
/// On Windows the style goes to `HKCU\Control Panel\Desktop` and the image is
/// applied with `SystemParametersInfoW(SPI_SETDESKWALLPAPER)`. On other
/// platforms [`SystemDesktop`] only logs what it would have done.
use std::path::Path;

use anyhow::Result;

use crate::wallpaper::settings::WallpaperStyle;

pub trait Desktop: Send {
    fn set_style(&mut self, style: WallpaperStyle) -> Result<()>;
    fn set_wallpaper(&mut self, image: &Path) -> Result<()>;
}

// ── Windows implementation ─────────────────────────────────────────────────────

#[cfg(windows)]
mod imp {
    use std::os::windows::ffi::OsStrExt;
    use std::path::Path;

    use anyhow::{Context, Result};
    use windows::Win32::UI::WindowsAndMessaging::{
        SystemParametersInfoW, SPIF_SENDCHANGE, SPIF_UPDATEINIFILE, SPI_SETDESKWALLPAPER,
    };

    use crate::registry;
    use crate::wallpaper::settings::WallpaperStyle;

    const DESKTOP_KEY: &str = r"Control Panel\Desktop";

    pub fn set_style(style: WallpaperStyle) -> Result<()> {
        let (tile, wallpaper_style) = style.registry_values();
        registry::set_string(DESKTOP_KEY, "TileWallpaper", tile)?;
        registry::set_string(DESKTOP_KEY, "WallpaperStyle", wallpaper_style)?;
        Ok(())
    }

    pub fn set_wallpaper(image: &Path) -> Result<()> {
        let mut wide: Vec<u16> = image.as_os_str().encode_wide().chain(std::iter::once(0)).collect();
        unsafe {
            SystemParametersInfoW(
                SPI_SETDESKWALLPAPER,
                0,
                Some(wide.as_mut_ptr().cast()),
                SPIF_UPDATEINIFILE | SPIF_SENDCHANGE,
            )
        }
        .with_context(|| format!("Failed to set wallpaper: {}", image.display()))
    }
}

// ── Public API ─────────────────────────────────────────────────────────────────

#[derive(Debug, Default)]
pub struct SystemDesktop;

impl Desktop for SystemDesktop {
    fn set_style(&mut self, style: WallpaperStyle) -> Result<()> {
        #[cfg(windows)]
        {
            imp::set_style(style)
        }
        #[cfg(not(windows))]
        {
            tracing::debug!(%style, "desktop style (not applied on this platform)");
            Ok(())
        }
    }

    fn set_wallpaper(&mut self, image: &Path) -> Result<()> {
        #[cfg(windows)]
        {
            imp::set_wallpaper(image)
        }
        #[cfg(not(windows))]
        {
            tracing::debug!(image = %image.display(), "wallpaper (not applied on this platform)");
            Ok(())
        }
    }
}

/// Records every call, for tests.
#[cfg(test)]
#[derive(Debug, Clone, Default)]
pub(crate) struct RecordingDesktop {
    inner: std::sync::Arc<std::sync::Mutex<Recorded>>,
}

#[cfg(test)]
#[derive(Debug, Default)]
struct Recorded {
    applied: Vec<std::path::PathBuf>,
    styles: Vec<WallpaperStyle>,
    failing: bool,
}

#[cfg(test)]
impl RecordingDesktop {
    pub fn applied(&self) -> Vec<std::path::PathBuf> {
        self.inner.lock().unwrap().applied.clone()
    }

    pub fn styles(&self) -> Vec<WallpaperStyle> {
        self.inner.lock().unwrap().styles.clone()
    }

    pub fn set_failing(&self, failing: bool) {
        self.inner.lock().unwrap().failing = failing;
    }
}

#[cfg(test)]
impl Desktop for RecordingDesktop {
    fn set_style(&mut self, style: WallpaperStyle) -> Result<()> {
        self.inner.lock().unwrap().styles.push(style);
        Ok(())
    }

    fn set_wallpaper(&mut self, image: &Path) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        if inner.failing {
            anyhow::bail!("desktop refused {}", image.display());
        }
        inner.applied.push(image.to_path_buf());
        Ok(())
    }
}
