//! The wallpaper state machine.
//!
//! `Stopped → Playing ⇄ Paused → Stopped`. Time only enters through the
//! `now: Instant` arguments: deadlines are monotonic instants plus the
//! interval, so wall-clock changes cannot skip or stretch an interval, and
//! tests drive the machine with synthetic instants.

use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};

use crate::wallpaper::desktop::Desktop;
use crate::wallpaper::scan;
use crate::wallpaper::settings::WallpaperSettings;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Mode {
    Playing,
    Paused,
    Stopped,
}

impl std::fmt::Display for Mode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Playing => "Playing",
            Self::Paused => "Paused",
            Self::Stopped => "Stopped",
        })
    }
}

/// Published to `wallch.status`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WallpaperStatus {
    pub mode: Mode,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_image: Option<PathBuf>,
    /// Until the next change; absent when stopped.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remaining_seconds: Option<u64>,
    /// Why the daemon is stopped, or a non-fatal scan warning.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub condition: Option<String>,
    pub pid: u32,
    pub updated_at: DateTime<Utc>,
}

pub struct WallpaperSession<D: Desktop> {
    settings: WallpaperSettings,
    desktop: D,
    rng: StdRng,
    images: Vec<PathBuf>,
    /// Index of the next image to show.
    cursor: usize,
    current: Option<PathBuf>,
    mode: Mode,
    /// Set while `Playing`.
    deadline: Option<Instant>,
    /// Time left in the interval, kept while `Paused`.
    remaining: Duration,
    condition: Option<String>,
    /// An image vanished since the last scan; rescan on the next wrap.
    stale: bool,
}

impl<D: Desktop> WallpaperSession<D> {
    /// Scans, applies the first image and starts playing. With `once` the
    /// session stops right after that image. Settings problems leave the
    /// session `Stopped` with a condition.
    pub fn start(settings: WallpaperSettings, desktop: D, rng: StdRng, now: Instant) -> Self {
        let mut session = Self {
            remaining: settings.interval(),
            settings,
            desktop,
            rng,
            images: Vec::new(),
            cursor: 0,
            current: None,
            mode: Mode::Stopped,
            deadline: None,
            condition: None,
            stale: false,
        };
        session.apply_style();
        if session.rebuild() {
            session.apply_next();
            if !session.settings.once {
                session.play_from(now);
            }
        }
        session
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    pub fn current(&self) -> Option<&Path> {
        self.current.as_deref()
    }

    pub fn images(&self) -> &[PathBuf] {
        &self.images
    }

    pub fn settings(&self) -> &WallpaperSettings {
        &self.settings
    }

    pub fn condition(&self) -> Option<&str> {
        self.condition.as_deref()
    }

    /// Time left until the next change.
    pub fn remaining(&self, now: Instant) -> Option<Duration> {
        match self.mode {
            Mode::Playing => self.deadline.map(|d| d.saturating_duration_since(now)),
            Mode::Paused => Some(self.remaining),
            Mode::Stopped => None,
        }
    }

    pub fn is_due(&self, now: Instant) -> bool {
        self.mode == Mode::Playing && self.deadline.is_some_and(|d| now >= d)
    }

    /// How long the loop may sleep: until the deadline, but never longer than
    /// `poll` so commands stay responsive.
    pub fn wait_budget(&self, now: Instant, poll: Duration) -> Duration {
        match (self.mode, self.deadline) {
            (Mode::Playing, Some(deadline)) => poll.min(deadline.saturating_duration_since(now)),
            _ => poll,
        }
    }

    // ── transitions ───────────────────────────────────────────────────────────

    /// Advances when the deadline has passed. Returns whether an image changed.
    pub fn tick(&mut self, now: Instant) -> bool {
        if !self.is_due(now) {
            return false;
        }
        let changed = self.apply_next();
        self.deadline = Some(now + self.settings.interval());
        changed
    }

    pub fn pause(&mut self, now: Instant) {
        if self.mode != Mode::Playing {
            return;
        }
        self.remaining = self
            .deadline
            .map(|d| d.saturating_duration_since(now))
            .unwrap_or_else(|| self.settings.interval());
        self.deadline = None;
        self.mode = Mode::Paused;
        tracing::info!(remaining = ?self.remaining, "paused");
    }

    pub fn resume(&mut self, now: Instant) {
        if self.mode != Mode::Paused {
            return;
        }
        self.deadline = Some(now + self.remaining);
        self.mode = Mode::Playing;
        tracing::info!(remaining = ?self.remaining, "resumed");
    }

    pub fn toggle(&mut self, now: Instant) {
        match self.mode {
            Mode::Playing => self.pause(now),
            Mode::Paused => self.resume(now),
            Mode::Stopped => {}
        }
    }

    /// Shows the next image now. Playing restarts the interval; Paused stays
    /// paused with a full interval ahead.
    pub fn next(&mut self, now: Instant) -> bool {
        let changed = self.apply_next();
        match self.mode {
            Mode::Playing => self.deadline = Some(now + self.settings.interval()),
            Mode::Paused => self.remaining = self.settings.interval(),
            Mode::Stopped => {}
        }
        changed
    }

    /// Adopts new settings. Playback position survives unless the folder (or
    /// recursion) changed or there was nothing to play.
    pub fn reload(&mut self, settings: WallpaperSettings, now: Instant) {
        let old = std::mem::replace(&mut self.settings, settings);
        let rescan = old.folder != self.settings.folder
            || old.recursive != self.settings.recursive
            || self.images.is_empty();

        if old.style != self.settings.style {
            self.apply_style();
            if let Some(current) = self.current.clone() {
                self.show(&current);
            }
        }

        let interval = self.settings.interval();
        match self.mode {
            Mode::Playing => {
                let capped = now + interval;
                self.deadline = self.deadline.map(|d| d.min(capped)).or(Some(capped));
            }
            Mode::Paused => self.remaining = self.remaining.min(interval),
            Mode::Stopped => {}
        }

        if !rescan {
            return;
        }
        let previous = self.mode;
        if !self.rebuild() {
            self.mode = Mode::Stopped;
            self.deadline = None;
            return;
        }
        self.apply_next();
        match previous {
            Mode::Paused => self.remaining = interval,
            Mode::Stopped if self.settings.once => {}
            _ => self.play_from(now),
        }
    }

    /// Ends the session for good.
    pub fn stop(&mut self) {
        self.mode = Mode::Stopped;
        self.deadline = None;
    }

    pub fn status(&self, now: Instant) -> WallpaperStatus {
        WallpaperStatus {
            mode: self.mode,
            current_image: self.current.clone(),
            remaining_seconds: self
                .remaining(now)
                .map(|d| d.as_secs() + u64::from(d.subsec_nanos() > 0)),
            condition: self.condition.clone(),
            pid: std::process::id(),
            updated_at: Utc::now(),
        }
    }

    // ── internals ─────────────────────────────────────────────────────────────

    fn play_from(&mut self, now: Instant) {
        self.mode = Mode::Playing;
        self.deadline = Some(now + self.settings.interval());
    }

    fn apply_style(&mut self) {
        if let Err(e) = self.desktop.set_style(self.settings.style) {
            tracing::warn!("failed to set wallpaper style: {e:#}");
        }
    }

    /// Replaces the candidate list from a fresh scan. On failure the list is
    /// emptied and the reason kept as the condition.
    fn rebuild(&mut self) -> bool {
        let result = self
            .settings
            .validate()
            .and_then(|folder| scan::scan(folder, self.settings.recursive));
        match result {
            Ok(found) => {
                self.images = found.images;
                self.cursor = 0;
                self.stale = false;
                self.condition = None;
                if self.settings.shuffle {
                    self.images.shuffle(&mut self.rng);
                }
                tracing::info!(count = self.images.len(), "wallpaper candidates loaded");
                true
            }
            Err(e) => {
                tracing::warn!("{e}");
                self.images.clear();
                self.cursor = 0;
                self.condition = Some(e.to_string());
                false
            }
        }
    }

    /// Starts a new pass over the list: rescans if an image went missing,
    /// then reshuffles without repeating the image just shown.
    fn wrap(&mut self) {
        self.cursor = 0;
        if self.stale {
            let refreshed = self
                .settings
                .validate()
                .and_then(|folder| scan::scan(folder, self.settings.recursive));
            match refreshed {
                Ok(found) => {
                    self.images = found.images;
                    self.stale = false;
                    self.condition = None;
                }
                Err(e) => {
                    tracing::warn!("rescan failed; keeping the previous list: {e}");
                    self.condition = Some(e.to_string());
                }
            }
        }
        if self.settings.shuffle {
            self.images.shuffle(&mut self.rng);
            if self.images.len() > 1 && self.current.as_ref() == self.images.first() {
                let last = self.images.len() - 1;
                self.images.swap(0, last);
            }
        } else {
            self.images.sort();
        }
    }

    /// Applies the next existing candidate. Missing files are skipped.
    fn apply_next(&mut self) -> bool {
        let attempts = self.images.len() + 1;
        for _ in 0..attempts {
            if self.images.is_empty() {
                return false;
            }
            if self.cursor >= self.images.len() {
                self.wrap();
                if self.images.is_empty() {
                    return false;
                }
            }
            let image = self.images[self.cursor].clone();
            self.cursor += 1;
            if !image.exists() {
                tracing::warn!(image = %image.display(), "missing image skipped");
                self.stale = true;
                continue;
            }
            return self.show(&image);
        }
        self.condition = Some("no wallpaper images available".to_string());
        false
    }

    fn show(&mut self, image: &Path) -> bool {
        match self.desktop.set_wallpaper(image) {
            Ok(()) => {
                tracing::info!(image = %image.display(), mode = %self.mode, "wallpaper set");
                self.current = Some(image.to_path_buf());
                true
            }
            Err(e) => {
                tracing::warn!("{e:#}");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wallpaper::desktop::RecordingDesktop;
    use crate::wallpaper::settings::WallpaperStyle;
    use rand::SeedableRng;

    const I: Duration = Duration::from_secs(300);

    fn secs(n: u64) -> Duration {
        Duration::from_secs(n)
    }

    fn folder_with(names: &[&str]) -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        for name in names {
            std::fs::write(dir.path().join(name), b"img").unwrap();
        }
        dir
    }

    fn settings(folder: &Path) -> WallpaperSettings {
        WallpaperSettings {
            folder: folder.to_path_buf(),
            interval: I.as_secs(),
            shuffle: false,
            ..WallpaperSettings::default()
        }
    }

    fn start(settings: WallpaperSettings, t0: Instant) -> (WallpaperSession<RecordingDesktop>, RecordingDesktop) {
        let desktop = RecordingDesktop::default();
        let session = WallpaperSession::start(settings, desktop.clone(), StdRng::seed_from_u64(11), t0);
        (session, desktop)
    }

    fn names(paths: &[PathBuf]) -> Vec<String> {
        paths
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect()
    }

    // ── start-up ──────────────────────────────────────────────────────────────

    #[test]
    fn start_applies_first_image_and_plays() {
        let dir = folder_with(&["1.jpg", "2.jpg"]);
        let t0 = Instant::now();
        let (session, desktop) = start(settings(dir.path()), t0);
        assert_eq!(session.mode(), Mode::Playing);
        assert_eq!(names(&desktop.applied()), vec!["1.jpg"]);
        assert_eq!(desktop.styles(), vec![WallpaperStyle::Fill]);
        assert_eq!(session.remaining(t0), Some(I));
    }

    #[test]
    fn empty_folder_stops_with_condition() {
        let dir = folder_with(&[]);
        let (session, desktop) = start(settings(dir.path()), Instant::now());
        assert_eq!(session.mode(), Mode::Stopped);
        assert!(session.condition().unwrap().contains("no images"));
        assert!(desktop.applied().is_empty());
    }

    #[test]
    fn unconfigured_folder_stops_with_condition() {
        let (session, _) = start(WallpaperSettings::default(), Instant::now());
        assert_eq!(session.mode(), Mode::Stopped);
        assert!(session.condition().is_some());
    }

    #[test]
    fn once_applies_exactly_one_image() {
        let dir = folder_with(&["1.jpg", "2.jpg"]);
        let t0 = Instant::now();
        let (mut session, desktop) = start(WallpaperSettings { once: true, ..settings(dir.path()) }, t0);
        assert_eq!(session.mode(), Mode::Stopped);
        for n in 1..10 {
            assert!(!session.tick(t0 + I * n));
        }
        assert_eq!(desktop.applied().len(), 1);
        assert!(session.status(t0).remaining_seconds.is_none());
    }

    // ── ticking ───────────────────────────────────────────────────────────────

    #[test]
    fn tick_fires_only_at_deadline() {
        let dir = folder_with(&["1.jpg", "2.jpg"]);
        let t0 = Instant::now();
        let (mut session, desktop) = start(settings(dir.path()), t0);
        assert!(!session.tick(t0 + I - secs(1)));
        assert!(session.tick(t0 + I));
        assert_eq!(names(&desktop.applied()), vec!["1.jpg", "2.jpg"]);
        // The next deadline is measured from the tick.
        assert!(!session.is_due(t0 + I + I - secs(1)));
        assert!(session.is_due(t0 + I + I));
    }

    #[test]
    fn next_cycles_deterministically() {
        let dir = folder_with(&["1.jpg", "2.jpg", "3.jpg"]);
        let t0 = Instant::now();
        let (mut session, desktop) = start(settings(dir.path()), t0);
        for n in 1..=5 {
            assert!(session.next(t0 + secs(n)));
        }
        assert_eq!(
            names(&desktop.applied()),
            vec!["1.jpg", "2.jpg", "3.jpg", "1.jpg", "2.jpg", "3.jpg"]
        );
    }

    #[test]
    fn next_restarts_the_interval() {
        let dir = folder_with(&["1.jpg", "2.jpg"]);
        let t0 = Instant::now();
        let (mut session, _) = start(settings(dir.path()), t0);
        session.next(t0 + secs(200));
        assert!(!session.is_due(t0 + I));
        assert!(session.is_due(t0 + secs(200) + I));
    }

    #[test]
    fn wait_budget_never_oversleeps_the_deadline() {
        let dir = folder_with(&["1.jpg"]);
        let t0 = Instant::now();
        let (session, _) = start(settings(dir.path()), t0);
        let poll = Duration::from_millis(250);
        assert_eq!(session.wait_budget(t0, poll), poll);
        assert_eq!(session.wait_budget(t0 + I - Duration::from_millis(100), poll), Duration::from_millis(100));
        assert_eq!(session.wait_budget(t0 + I + secs(5), poll), Duration::ZERO);
    }

    // ── pause / resume ────────────────────────────────────────────────────────

    #[test]
    fn pause_preserves_remaining_time() {
        let dir = folder_with(&["1.jpg", "2.jpg"]);
        let t0 = Instant::now();
        let (mut session, desktop) = start(settings(dir.path()), t0);

        let elapsed = secs(100);
        let paused_for = secs(1000);
        session.pause(t0 + elapsed);
        assert_eq!(session.mode(), Mode::Paused);
        assert!(!session.tick(t0 + I + secs(500)));

        let resumed_at = t0 + elapsed + paused_for;
        session.resume(resumed_at);
        assert_eq!(session.remaining(resumed_at), Some(I - elapsed));
        assert!(!session.is_due(resumed_at + I - elapsed - secs(1)));
        assert!(session.tick(resumed_at + I - elapsed));
        assert_eq!(desktop.applied().len(), 2);
    }

    #[test]
    fn toggle_flips_between_playing_and_paused() {
        let dir = folder_with(&["1.jpg"]);
        let t0 = Instant::now();
        let (mut session, _) = start(settings(dir.path()), t0);
        session.toggle(t0 + secs(1));
        assert_eq!(session.mode(), Mode::Paused);
        session.toggle(t0 + secs(2));
        assert_eq!(session.mode(), Mode::Playing);
    }

    #[test]
    fn next_while_paused_stays_paused_with_full_interval() {
        let dir = folder_with(&["1.jpg", "2.jpg"]);
        let t0 = Instant::now();
        let (mut session, desktop) = start(settings(dir.path()), t0);
        session.pause(t0 + secs(250));
        assert!(session.next(t0 + secs(260)));
        assert_eq!(session.mode(), Mode::Paused);
        assert_eq!(names(&desktop.applied()), vec!["1.jpg", "2.jpg"]);
        assert_eq!(session.remaining(t0 + secs(900)), Some(I));
    }

    // ── missing images / shuffle ──────────────────────────────────────────────

    #[test]
    fn missing_image_is_skipped_and_rescanned_on_wrap() {
        let dir = folder_with(&["1.jpg", "2.jpg", "3.jpg"]);
        let t0 = Instant::now();
        let (mut session, desktop) = start(settings(dir.path()), t0);
        std::fs::remove_file(dir.path().join("2.jpg")).unwrap();

        session.next(t0);
        assert_eq!(session.current().unwrap().file_name().unwrap(), "3.jpg");
        session.next(t0);
        assert_eq!(session.images().len(), 2);
        assert_eq!(names(&desktop.applied()), vec!["1.jpg", "3.jpg", "1.jpg"]);
    }

    #[test]
    fn reshuffle_never_repeats_the_last_image() {
        let dir = folder_with(&["a.jpg", "b.jpg", "c.jpg", "d.jpg"]);
        let t0 = Instant::now();
        let (mut session, desktop) = start(WallpaperSettings { shuffle: true, ..settings(dir.path()) }, t0);
        for n in 0..39 {
            session.next(t0 + secs(n));
        }
        let applied = desktop.applied();
        assert!(applied.windows(2).all(|w| w[0] != w[1]));
        // Every pass shows every image once.
        for pass in applied.chunks(4) {
            let mut sorted = names(pass);
            sorted.sort();
            assert_eq!(sorted, vec!["a.jpg", "b.jpg", "c.jpg", "d.jpg"]);
        }
    }

    // ── reload ────────────────────────────────────────────────────────────────

    #[test]
    fn reload_keeps_position_when_folder_is_unchanged() {
        let dir = folder_with(&["1.jpg", "2.jpg", "3.jpg"]);
        let t0 = Instant::now();
        let (mut session, desktop) = start(settings(dir.path()), t0);
        session.next(t0);

        let changed = WallpaperSettings { style: WallpaperStyle::Span, interval: 60, ..settings(dir.path()) };
        session.reload(changed, t0 + secs(10));
        assert_eq!(desktop.styles(), vec![WallpaperStyle::Fill, WallpaperStyle::Span]);
        // Style change reapplies the current image.
        assert_eq!(names(&desktop.applied()), vec!["1.jpg", "2.jpg", "2.jpg"]);
        // The shorter interval caps the pending deadline.
        assert!(session.is_due(t0 + secs(70)));

        session.next(t0 + secs(70));
        assert_eq!(session.current().unwrap().file_name().unwrap(), "3.jpg");
    }

    #[test]
    fn reload_with_new_folder_restarts_the_list() {
        let first = folder_with(&["1.jpg", "2.jpg"]);
        let second = folder_with(&["x.jpg", "y.jpg"]);
        let t0 = Instant::now();
        let (mut session, desktop) = start(settings(first.path()), t0);
        session.reload(settings(second.path()), t0 + secs(5));
        assert_eq!(names(&desktop.applied()), vec!["1.jpg", "x.jpg"]);
        assert_eq!(session.mode(), Mode::Playing);
        assert_eq!(session.remaining(t0 + secs(5)), Some(I));
    }

    #[test]
    fn reload_recovers_from_empty_folder() {
        let dir = folder_with(&[]);
        let t0 = Instant::now();
        let (mut session, desktop) = start(settings(dir.path()), t0);
        assert_eq!(session.mode(), Mode::Stopped);

        std::fs::write(dir.path().join("new.png"), b"img").unwrap();
        session.reload(settings(dir.path()), t0 + secs(1));
        assert_eq!(session.mode(), Mode::Playing);
        assert!(session.condition().is_none());
        assert_eq!(names(&desktop.applied()), vec!["new.png"]);
    }

    #[test]
    fn reload_to_missing_folder_stops() {
        let dir = folder_with(&["1.jpg"]);
        let t0 = Instant::now();
        let (mut session, _) = start(settings(dir.path()), t0);
        session.reload(settings(&dir.path().join("gone")), t0);
        assert_eq!(session.mode(), Mode::Stopped);
        assert!(session.condition().unwrap().contains("not found"));
    }

    #[test]
    fn desktop_failure_does_not_stop_playback() {
        let dir = folder_with(&["1.jpg", "2.jpg"]);
        let t0 = Instant::now();
        let (mut session, desktop) = start(settings(dir.path()), t0);
        desktop.set_failing(true);
        assert!(!session.tick(t0 + I));
        assert_eq!(session.mode(), Mode::Playing);
        assert!(session.is_due(t0 + I + I));
    }

    #[test]
    fn status_reports_mode_and_rounded_remaining() {
        let dir = folder_with(&["1.jpg"]);
        let t0 = Instant::now();
        let (session, _) = start(settings(dir.path()), t0);
        let status = session.status(t0 + Duration::from_millis(500));
        assert_eq!(status.mode, Mode::Playing);
        assert_eq!(status.remaining_seconds, Some(300));
        let json = serde_json::to_value(&status).unwrap();
        assert_eq!(json["mode"], "Playing");
    }
}
