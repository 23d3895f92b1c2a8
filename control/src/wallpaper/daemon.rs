//! The `wallch` loop: one task owns the session, sleeps until the earlier of
//! the next deadline or the poll interval, handles at most one command per
//! wake-up and publishes status.

use std::future::Future;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use rand::rngs::StdRng;
use rand::SeedableRng;

use crate::channel::{Mailbox, WallpaperCommand};
use crate::config::WallpaperConfig;
use crate::error::GuardError;
use crate::event::shutdown_signal;
use crate::guard::SingleInstanceGuard;
use crate::paths::DataPaths;
use crate::status::write_status;
use crate::wallpaper::desktop::{Desktop, SystemDesktop};
use crate::wallpaper::session::{Mode, WallpaperSession};
use crate::wallpaper::settings::WallpaperSettings;

pub const GUARD_NAME: &str = "wallch";

/// Why the daemon returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Exit {
    /// Another daemon holds the guard; nothing was started.
    AlreadyRunning,
    Quit,
    /// `once` applied its image.
    Finished,
    Interrupted,
}

/// Runs the daemon against the real desktop until quit, Ctrl+C or SIGTERM.
pub async fn run(
    paths: &DataPaths,
    settings_path: PathBuf,
    settings: WallpaperSettings,
    config: &WallpaperConfig,
) -> Result<Exit> {
    run_with(paths, settings_path, settings, config, SystemDesktop, shutdown_signal()).await
}

pub async fn run_with<D, F>(
    paths: &DataPaths,
    settings_path: PathBuf,
    settings: WallpaperSettings,
    config: &WallpaperConfig,
    desktop: D,
    shutdown: F,
) -> Result<Exit>
where
    D: Desktop,
    F: Future<Output = ()>,
{
    let _guard = match SingleInstanceGuard::acquire(GUARD_NAME, paths.root()) {
        Ok(guard) => guard,
        Err(GuardError::Conflict(_)) => {
            tracing::info!("wallpaper daemon already running; exiting");
            return Ok(Exit::AlreadyRunning);
        }
        Err(e) => return Err(e).context("Failed to acquire the wallpaper daemon guard"),
    };

    let mailbox = Mailbox::<WallpaperCommand>::new(paths.wallpaper_mailbox());
    // A command left over from a previous run is not meant for this one.
    mailbox.clear();

    let rng = StdRng::from_rng(&mut rand::rng());
    let session = WallpaperSession::start(settings, desktop, rng, Instant::now());
    tracing::info!(
        pid = std::process::id(),
        mode = %session.mode(),
        "wallch v{} started",
        env!("CARGO_PKG_VERSION")
    );

    let mut daemon = Daemon {
        session,
        mailbox,
        settings_path,
        status_path: paths.wallpaper_status(),
        poll: config.effective_poll_interval(),
        status_every: config.effective_status_interval(),
    };
    let exit = daemon.serve(shutdown).await;

    daemon.session.stop();
    daemon.publish(Instant::now());
    tracing::info!(?exit, "wallch stopped");
    Ok(exit)
}

struct Daemon<D: Desktop> {
    session: WallpaperSession<D>,
    mailbox: Mailbox<WallpaperCommand>,
    settings_path: PathBuf,
    status_path: PathBuf,
    poll: Duration,
    status_every: Duration,
}

impl<D: Desktop> Daemon<D> {
    async fn serve<F: Future<Output = ()>>(&mut self, shutdown: F) -> Exit {
        tokio::pin!(shutdown);
        let mut last_publish: Option<Instant> = None;

        loop {
            let now = Instant::now();
            if self.session.settings().once && self.session.mode() == Mode::Stopped {
                return Exit::Finished;
            }

            let mut changed = false;
            if let Some(envelope) = self.mailbox.take() {
                tracing::info!(command = ?envelope.command, "command received");
                if envelope.command == WallpaperCommand::Quit {
                    return Exit::Quit;
                }
                self.handle(envelope.command, now);
                changed = true;
            }
            changed |= self.session.tick(now);

            if changed || last_publish.map_or(true, |at| now.duration_since(at) >= self.status_every) {
                self.publish(now);
                last_publish = Some(now);
            }

            let budget = self.session.wait_budget(Instant::now(), self.poll);
            tokio::select! {
                _ = tokio::time::sleep(budget) => {}
                _ = &mut shutdown => return Exit::Interrupted,
            }
        }
    }

    fn handle(&mut self, command: WallpaperCommand, now: Instant) {
        match command {
            WallpaperCommand::Pause => self.session.pause(now),
            WallpaperCommand::Resume => self.session.resume(now),
            WallpaperCommand::Toggle => self.session.toggle(now),
            WallpaperCommand::Next => {
                self.session.next(now);
            }
            WallpaperCommand::Reload => match WallpaperSettings::load(&self.settings_path) {
                Ok(settings) => self.session.reload(settings, now),
                Err(e) => tracing::warn!("keeping current settings: {e}"),
            },
            WallpaperCommand::Quit => {}
        }
    }

    fn publish(&self, now: Instant) {
        write_status(&self.status_path, &self.session.status(now));
    }
}

/// Reads the daemon's last published status.
pub fn read_status(path: &Path) -> Option<crate::wallpaper::session::WallpaperStatus> {
    crate::status::read_status(path)
}
