//! The supervisor process.
//!
//! [`Controller`] ties one [`Supervisor`] to the data directory: registry,
//! remembered state, profiles and the status file. [`run`] owns a controller
//! inside a single event loop (watch ticks, CLI intents, file changes,
//! shutdown signals), so every mutation of the app set happens on that one task.
//! [`deliver`] is the CLI side: apply an intent in-process when no
//! supervisor runs, or post it to the one that does.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::sync::{mpsc, watch};

use crate::applog::{AppLog, FileAppLog};
use crate::channel::{Intent, Mailbox, WallpaperCommand};
use crate::config::{self, Config};
use crate::error::GuardError;
use crate::event::{shutdown_signal, ControlEvent};
use crate::guard::{self, SingleInstanceGuard};
use crate::model::{ControlState, DesiredState, ManagedApp, Profile};
use crate::paths::DataPaths;
use crate::process::system::SystemTable;
use crate::process::{ProcessInfo, ProcessTable};
use crate::profile;
use crate::startup;
use crate::status::{write_status, SupervisorStatus};
use crate::store;
use crate::supervisor::Supervisor;
use crate::wallpaper::{daemon, Mode};

pub const GUARD_NAME: &str = "control";

/// How long a replacing supervisor waits for the old one to let go.
const REPLACE_WAIT: Duration = Duration::from_secs(10);
/// How long the CLI waits for a running supervisor to drain its mailbox.
const POST_WAIT: Duration = Duration::from_secs(3);

// ── Controller ────────────────────────────────────────────────────────────────

pub struct Controller<T: ProcessTable> {
    paths: DataPaths,
    supervisor: Supervisor<T>,
    state: ControlState,
}

impl<T: ProcessTable> Controller<T> {
    /// Loads the registry (seeding it on first run) and the remembered state.
    pub fn open(
        paths: DataPaths,
        table: T,
        log: Box<dyn AppLog>,
        seed: impl FnOnce() -> Vec<ManagedApp>,
    ) -> Result<Self> {
        let mut apps = store::load_apps_or_seed(&paths.apps(), seed)
            .with_context(|| format!("Failed to load app registry {}", paths.apps().display()))?;
        let state = store::load_state(&paths.state()).unwrap_or_else(|e| {
            tracing::warn!("{e}; starting with everything off");
            ControlState::default()
        });
        store::merge_desired(&mut apps, &state);
        tracing::debug!(apps = apps.len(), "registry loaded");
        Ok(Self { supervisor: Supervisor::new(table, apps, log), paths, state })
    }

    pub fn with_grace(mut self, grace: Duration) -> Self {
        self.supervisor.set_grace(grace);
        self
    }

    pub fn supervisor(&self) -> &Supervisor<T> {
        &self.supervisor
    }

    pub fn supervisor_mut(&mut self) -> &mut Supervisor<T> {
        &mut self.supervisor
    }

    pub fn state(&self) -> &ControlState {
        &self.state
    }

    pub fn start_desired(&mut self) {
        for err in self.supervisor.start_desired() {
            tracing::warn!("{err}");
        }
    }

    pub fn watch(&mut self) {
        if self.settle_wallpaper_exit() {
            self.save_state();
        }
        for err in self.supervisor.watch_cycle() {
            tracing::warn!("{err}");
        }
    }

    /// A wallpaper daemon that published a final `Stopped` under the pid we
    /// launched quit on purpose (`quit`, or `once` done). It is turned off
    /// rather than treated as a crash.
    fn settle_wallpaper_exit(&mut self) -> bool {
        let Some(status) = daemon::read_status(&self.paths.wallpaper_status()) else {
            return false;
        };
        if status.mode != Mode::Stopped {
            return false;
        }
        let Some(name) = self
            .supervisor
            .apps()
            .iter()
            .find(|a| {
                a.launches_wallpaper_daemon()
                    && a.desired_state.is_on()
                    && a.last_known_pid == Some(status.pid)
            })
            .map(|a| a.name.clone())
        else {
            return false;
        };
        match self.supervisor.settle_exit(&name) {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!("{e}");
                false
            }
        }
    }

    /// Writes `control.state.json` from the current desired states. The
    /// autostart flag belongs to `control autostart` and is kept as found on disk.
    pub fn save_state(&mut self) {
        if let Ok(on_disk) = store::load_state(&self.paths.state()) {
            self.state.autostart = on_disk.autostart;
        }
        self.state.desired = self.supervisor.desired_states();
        if let Err(e) = store::save_state(&self.paths.state(), &self.state) {
            tracing::warn!("failed to save state: {e}");
        }
    }

    pub fn publish_status(&self) {
        let status = SupervisorStatus::new(&self.supervisor.status(), self.state.last_profile.clone());
        write_status(&self.paths.supervisor_status(), &status);
    }

    pub fn profiles(&self) -> Result<Vec<Profile>> {
        Ok(store::load_profiles(&self.paths.profiles())?)
    }

    /// Re-reads `apps.json`. Apps that disappeared are stopped; new apps take
    /// their remembered desired state.
    pub async fn reload_registry(&mut self) -> Result<String> {
        let mut apps = store::load_apps(&self.paths.apps())?;
        self.state.desired = self.supervisor.desired_states();
        store::merge_desired(&mut apps, &self.state);
        let count = apps.len();
        for err in self.supervisor.replace_registry(apps).await {
            tracing::warn!("{err}");
        }
        Ok(format!("registry reloaded ({count} apps)"))
    }

    /// Carries out one intent and persists the resulting state, whether or not
    /// the intent fully succeeded.
    pub async fn apply(&mut self, intent: Intent) -> Result<String> {
        let result = self.dispatch(intent).await;
        self.save_state();
        result
    }

    async fn dispatch(&mut self, intent: Intent) -> Result<String> {
        match intent {
            Intent::Start { app } => {
                self.supervisor.switch(&app, DesiredState::On).await?;
                Ok(format!("{app}: on"))
            }
            Intent::Stop { app } => {
                self.supervisor.switch(&app, DesiredState::Off).await?;
                Ok(format!("{app}: off"))
            }
            Intent::Toggle { app } => {
                let desired = self.supervisor.toggle(&app).await?;
                Ok(format!("{app}: {desired}"))
            }
            Intent::ApplyProfile { profile: name } => {
                let profiles = self.profiles()?;
                let chosen = profile::find(&profiles, &name)?.clone();
                // The latest profile wins, even when some apps failed to switch.
                self.state.last_profile = Some(name.clone());
                let report = profile::apply(&mut self.supervisor, &chosen).await?;
                Ok(format!(
                    "profile '{name}': {} started, {} stopped, {} unchanged",
                    report.started.len(),
                    report.stopped.len(),
                    report.unchanged.len()
                ))
            }
            Intent::ClearProfile => {
                self.state.last_profile = None;
                Ok("profile cleared".to_string())
            }
            Intent::Reload => self.reload_registry().await,
        }
    }
}

/// Registry used on first run: just the wallpaper daemon next to this binary.
pub fn default_registry() -> Vec<ManagedApp> {
    let exe = std::env::current_exe().unwrap_or_else(|_| PathBuf::from("control"));
    vec![ManagedApp::wallpaper_daemon(&exe)]
}

/// Whether `process` is a supervisor started from an executable called
/// `exe_name`: `control` or `control run`, not a one-shot CLI call.
pub fn is_supervisor_process(process: &ProcessInfo, exe_name: &str) -> bool {
    let name_matches = process.name.eq_ignore_ascii_case(exe_name)
        || process
            .exe
            .as_deref()
            .and_then(Path::file_name)
            .is_some_and(|n| n.to_string_lossy().eq_ignore_ascii_case(exe_name));
    name_matches && process.argv.get(1).map_or(true, |arg| arg == "run")
}

// ── Supervisor event loop ─────────────────────────────────────────────────────

/// Runs the supervisor until Ctrl+C or SIGTERM.
pub async fn run(paths: DataPaths, config: Config) -> Result<()> {
    let mut table = SystemTable::new();
    let grace = config.supervisor.effective_grace();

    let acquired = if config.supervisor.clean_previous_instance {
        let exe_name = std::env::current_exe()
            .ok()
            .and_then(|exe| exe.file_name().map(|n| n.to_string_lossy().into_owned()))
            .unwrap_or_else(|| "control".to_string());
        SingleInstanceGuard::acquire_replacing(
            GUARD_NAME,
            paths.root(),
            &mut table,
            |p| is_supervisor_process(p, &exe_name),
            grace,
            REPLACE_WAIT,
        )
        .await
    } else {
        SingleInstanceGuard::acquire(GUARD_NAME, paths.root())
    };
    let _guard = match acquired {
        Ok(guard) => guard,
        Err(GuardError::Conflict(_)) => {
            tracing::info!("supervisor already running; exiting");
            return Ok(());
        }
        Err(e) => return Err(e).context("Failed to acquire the supervisor guard"),
    };

    let log = Box::new(FileAppLog::new(paths.app_log_dir()));
    let mut controller = Controller::open(paths.clone(), table, log, default_registry)?.with_grace(grace);
    controller.start_desired();
    if let Err(e) = startup::sync(controller.state().autostart) {
        tracing::warn!("failed to sync startup registration: {e:#}");
    }
    controller.save_state();
    controller.publish_status();

    let intents = Mailbox::<Intent>::new(paths.supervisor_mailbox());
    let (event_tx, mut event_rx) = mpsc::channel::<ControlEvent>(32);
    let (interval_tx, interval_rx) = watch::channel(config.supervisor.effective_watch_interval());

    // ── Background tasks ──────────────────────────────────────────────────────
    tokio::spawn(config::watch_data_dir(
        paths.config(),
        vec![paths.apps(), paths.profiles()],
        paths.supervisor_mailbox(),
        event_tx.clone(),
    ));
    tokio::spawn(tick(interval_rx, event_tx.clone()));
    {
        let tx = event_tx.clone();
        let shutdown = shutdown_signal();
        tokio::spawn(async move {
            shutdown.await;
            let _ = tx.send(ControlEvent::Shutdown).await;
        });
    }

    tracing::info!(pid = std::process::id(), "control v{} started", env!("CARGO_PKG_VERSION"));

    // ── Event loop ────────────────────────────────────────────────────────────
    let mut config = config;
    while let Some(event) = event_rx.recv().await {
        match event {
            ControlEvent::WatchTick => {
                controller.watch();
                // Also catches intents whose file event was missed.
                handle_intent(&mut controller, &intents).await;
                controller.publish_status();
            }
            ControlEvent::IntentPosted => {
                handle_intent(&mut controller, &intents).await;
                controller.publish_status();
            }
            ControlEvent::RegistryChanged => {
                match controller.reload_registry().await {
                    Ok(summary) => tracing::info!("{summary}"),
                    Err(e) => tracing::warn!("keeping the current registry: {e:#}"),
                }
                controller.save_state();
                controller.publish_status();
            }
            ControlEvent::ConfigReloaded(new_config) => {
                tracing::info!("config reloaded");
                controller.supervisor_mut().set_grace(new_config.supervisor.effective_grace());
                let _ = interval_tx.send(new_config.supervisor.effective_watch_interval());
                config = new_config;
            }
            ControlEvent::Shutdown => {
                tracing::info!("shutting down");
                break;
            }
        }
    }

    if config.supervisor.quit_wallpaper_on_exit && guard::is_running(daemon::GUARD_NAME, paths.root()) {
        let wallpaper = Mailbox::<WallpaperCommand>::new(paths.wallpaper_mailbox());
        if let Err(e) = wallpaper.post(WallpaperCommand::Quit) {
            tracing::warn!("failed to ask the wallpaper daemon to quit: {e}");
        }
    }
    controller.save_state();
    controller.publish_status();
    Ok(())
}

async fn handle_intent<T: ProcessTable>(controller: &mut Controller<T>, intents: &Mailbox<Intent>) {
    let Some(intent) = intents.take().map(|envelope| envelope.command) else {
        return;
    };
    tracing::info!(?intent, "intent received");
    match controller.apply(intent).await {
        Ok(summary) => tracing::info!("{summary}"),
        Err(e) => tracing::warn!("{e:#}"),
    }
}

/// Sends a [`ControlEvent::WatchTick`] every period; the period follows
/// config reloads.
async fn tick(mut period: watch::Receiver<Duration>, tx: mpsc::Sender<ControlEvent>) {
    loop {
        let current = *period.borrow_and_update();
        tokio::select! {
            _ = tokio::time::sleep(current) => {
                if tx.send(ControlEvent::WatchTick).await.is_err() {
                    break;
                }
            }
            changed = period.changed() => {
                if changed.is_err() {
                    break;
                }
            }
        }
    }
}

// ── CLI delivery ──────────────────────────────────────────────────────────────

/// How a CLI intent reached its target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Delivery {
    /// No supervisor was running; applied here.
    Applied(String),
    /// Posted to the running supervisor. `replaced` means an earlier command
    /// was still pending and got overwritten.
    Posted { pid: Option<u32>, replaced: bool },
}

/// Applies `intent` in-process while holding the supervisor guard, or posts
/// it to the supervisor that holds it.
pub async fn deliver<T: ProcessTable>(
    paths: &DataPaths,
    table: T,
    log: Box<dyn AppLog>,
    grace: Duration,
    intent: Intent,
) -> Result<Delivery> {
    match SingleInstanceGuard::acquire(GUARD_NAME, paths.root()) {
        Ok(_guard) => {
            let mut controller = Controller::open(paths.clone(), table, log, default_registry)?.with_grace(grace);
            let summary = controller.apply(intent).await;
            controller.publish_status();
            Ok(Delivery::Applied(summary?))
        }
        Err(GuardError::Conflict(_)) => {
            let mailbox = Mailbox::<Intent>::new(paths.supervisor_mailbox());
            let free = mailbox.post_when_free(intent, POST_WAIT).await?;
            Ok(Delivery::Posted { pid: guard::holder_pid(GUARD_NAME, paths.root()), replaced: !free })
        }
        Err(e) => Err(e).context("Failed to check for a running supervisor"),
    }
}

/// Asks a running wallpaper daemon to quit and turns off the registry entry
/// that launches it, so the supervisor does not bring it back.
pub async fn quit_wallpaper<T: ProcessTable>(
    paths: &DataPaths,
    table: T,
    log: Box<dyn AppLog>,
    grace: Duration,
    post_wait: Duration,
) -> Result<Option<Delivery>> {
    if guard::is_running(daemon::GUARD_NAME, paths.root()) {
        let mailbox = Mailbox::<WallpaperCommand>::new(paths.wallpaper_mailbox());
        if !mailbox.post_when_free(WallpaperCommand::Quit, post_wait).await? {
            tracing::warn!("an earlier wallpaper command was replaced by quit");
        }
    }
    let apps = if paths.apps().exists() {
        store::load_apps(&paths.apps())?
    } else {
        default_registry()
    };
    let Some(app) = apps.into_iter().find(ManagedApp::launches_wallpaper_daemon) else {
        return Ok(None);
    };
    deliver(paths, table, log, grace, Intent::Stop { app: app.name }).await.map(Some)
}
