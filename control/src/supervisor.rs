//! The supervisor: owns the managed app set and reconciles it with the OS.
//!
//! Every operation takes `&mut self`. The runtime owns the single
//! `Supervisor` inside its event loop, so watch cycles, CLI intents, profile
//! applications and registry reloads are serialised and can never race to
//! double-start or double-kill the same app.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::time::Duration;

use serde::Serialize;

use crate::applog::AppLog;
use crate::error::SupervisorError;
use crate::model::{DesiredState, ManagedApp};
use crate::process::identity::{resolve, MatchResult};
use crate::process::tree::{terminate_tree, ProcessHandle};
use crate::process::{ProcessInfo, ProcessTable};

pub const DEFAULT_GRACE: Duration = Duration::from_millis(2500);

/// Observed state of one app, as published in the status file.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum AppState {
    Running {
        pid: u32,
        cpu_percent: f32,
        memory_bytes: u64,
        #[serde(skip_serializing_if = "Vec::is_empty")]
        orphans: Vec<u32>,
    },
    Stopped,
    /// Desired on, not running, and not allowed to restart.
    StoppedUnexpectedly,
    /// Relaunched by the watch cycle; confirmed as `Running` next cycle.
    Restarted { pid: u32 },
    LaunchFailed { error: String },
    /// Part of the tree survived a forced kill.
    Unknown { error: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartOutcome {
    AlreadyRunning(u32),
    Launched(u32),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StopOutcome {
    NotRunning,
    Stopped { pids: Vec<u32> },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AppStatus {
    pub name: String,
    pub desired: DesiredState,
    #[serde(flatten)]
    pub state: AppState,
    pub needs_attention: bool,
}

pub struct Supervisor<T: ProcessTable> {
    table: T,
    apps: Vec<ManagedApp>,
    states: HashMap<String, AppState>,
    attention: HashSet<String>,
    grace: Duration,
    log: Box<dyn AppLog>,
}

impl<T: ProcessTable> Supervisor<T> {
    pub fn new(table: T, apps: Vec<ManagedApp>, log: Box<dyn AppLog>) -> Self {
        Self {
            table,
            apps,
            states: HashMap::new(),
            attention: HashSet::new(),
            grace: DEFAULT_GRACE,
            log,
        }
    }

    pub fn with_grace(mut self, grace: Duration) -> Self {
        self.grace = grace;
        self
    }

    pub fn set_grace(&mut self, grace: Duration) {
        self.grace = grace;
    }

    pub fn apps(&self) -> &[ManagedApp] {
        &self.apps
    }

    pub fn app(&self, name: &str) -> Option<&ManagedApp> {
        self.apps.iter().find(|a| a.name == name)
    }

    pub fn table_mut(&mut self) -> &mut T {
        &mut self.table
    }

    /// Desired state of every app, for `control.state.json`.
    pub fn desired_states(&self) -> BTreeMap<String, DesiredState> {
        self.apps
            .iter()
            .map(|a| (a.name.clone(), a.desired_state))
            .collect()
    }

    /// Records a line in the app's event log.
    pub fn record(&mut self, app: &str, line: &str) {
        self.log.record(app, line);
    }

    fn index_of(&self, name: &str) -> Result<usize, SupervisorError> {
        self.apps
            .iter()
            .position(|a| a.name == name)
            .ok_or_else(|| SupervisorError::UnknownApp(name.to_string()))
    }

    fn resolve_in(&self, index: usize, snapshot: &[ProcessInfo]) -> MatchResult {
        let app = &self.apps[index];
        resolve(
            &app.effective_match(),
            app.cwd.as_deref(),
            snapshot,
            self.table.own_pid(),
        )
    }

    // ── start / stop ──────────────────────────────────────────────────────────

    /// Launches `name` unless a matching process is already running.
    ///
    /// A launch failure leaves the app's desired state `Off`.
    pub fn start(&mut self, name: &str) -> Result<StartOutcome, SupervisorError> {
        let index = self.index_of(name)?;
        let snapshot = self.table.snapshot();
        let matched = self.resolve_in(index, &snapshot);
        if let Some(canonical) = &matched.canonical {
            let pid = canonical.pid;
            self.apps[index].last_known_pid = Some(pid);
            self.observe_running(index, &matched, &snapshot);
            return Ok(StartOutcome::AlreadyRunning(pid));
        }
        let pid = self.launch(index)?;
        self.record(name, &format!("Started (pid {pid})"));
        self.states.insert(
            name.to_string(),
            AppState::Running { pid, cpu_percent: 0.0, memory_bytes: 0, orphans: Vec::new() },
        );
        Ok(StartOutcome::Launched(pid))
    }

    fn launch(&mut self, index: usize) -> Result<u32, SupervisorError> {
        let app = &self.apps[index];
        let name = app.name.clone();
        match self.table.spawn(&app.launch, app.cwd.as_deref()) {
            Ok(pid) => {
                self.apps[index].last_known_pid = Some(pid);
                tracing::info!(app = %name, pid, "launched");
                Ok(pid)
            }
            Err(source) => {
                tracing::error!(app = %name, "launch failed: {source}");
                let app = &mut self.apps[index];
                app.desired_state = DesiredState::Off;
                app.last_known_pid = None;
                self.states
                    .insert(name.clone(), AppState::LaunchFailed { error: source.to_string() });
                self.log.record(&name, &format!("Launch failed: {source}"));
                Err(SupervisorError::Launch { app: name, source })
            }
        }
    }

    /// Terminates the whole tree of every process matching `name`, orphans
    /// included.
    pub async fn stop(&mut self, name: &str) -> Result<StopOutcome, SupervisorError> {
        let index = self.index_of(name)?;
        let snapshot = self.table.snapshot();
        let matched = self.resolve_in(index, &snapshot);
        self.apps[index].last_known_pid = None;

        if !matched.is_running() {
            self.record(name, "Stop requested but process not found");
            self.states.insert(name.to_string(), AppState::Stopped);
            self.attention.remove(name);
            return Ok(StopOutcome::NotRunning);
        }

        let mut pids = Vec::new();
        let mut survivors = Vec::new();
        for root in matched.all() {
            let handle = ProcessHandle::capture(root, &snapshot);
            tracing::info!(app = name, pid = root.pid, members = handle.len(), "terminating tree");
            pids.push(root.pid);
            survivors.extend(terminate_tree(&mut self.table, &handle, self.grace).await);
        }

        if survivors.is_empty() {
            self.record(name, &format!("Stopped (pid {})", pids[0]));
            self.states.insert(name.to_string(), AppState::Stopped);
            self.attention.remove(name);
            Ok(StopOutcome::Stopped { pids })
        } else {
            let err = SupervisorError::Termination { app: name.to_string(), survivors };
            tracing::error!("{err}");
            self.record(name, &err.to_string());
            self.states
                .insert(name.to_string(), AppState::Unknown { error: err.to_string() });
            self.attention.insert(name.to_string());
            Err(err)
        }
    }

    /// Sets the desired state and starts or stops accordingly.
    pub async fn switch(
        &mut self,
        name: &str,
        desired: DesiredState,
    ) -> Result<(), SupervisorError> {
        let index = self.index_of(name)?;
        self.apps[index].desired_state = desired;
        match desired {
            DesiredState::On => self.start(name).map(|_| ()),
            DesiredState::Off => self.stop(name).await.map(|_| ()),
        }
    }

    /// Flips the desired state. Returns the new desired state.
    pub async fn toggle(&mut self, name: &str) -> Result<DesiredState, SupervisorError> {
        let index = self.index_of(name)?;
        let desired = self.apps[index].desired_state.flipped();
        self.record(name, &format!("Toggled {}", desired.to_string().to_uppercase()));
        self.switch(name, desired).await?;
        Ok(desired)
    }

    /// Starts every app whose remembered desired state is `On`.
    pub fn start_desired(&mut self) -> Vec<SupervisorError> {
        let wanted: Vec<String> = self
            .apps
            .iter()
            .filter(|a| a.desired_state.is_on())
            .map(|a| a.name.clone())
            .collect();
        wanted
            .iter()
            .filter_map(|name| self.start(name).err())
            .collect()
    }

    /// Records that `name` ended on its own and meant to: desired `Off`, so
    /// the next watch cycle leaves it down instead of restarting it.
    pub fn settle_exit(&mut self, name: &str) -> Result<(), SupervisorError> {
        let index = self.index_of(name)?;
        self.apps[index].desired_state = DesiredState::Off;
        self.apps[index].last_known_pid = None;
        self.attention.remove(name);
        tracing::info!(app = %name, "exited cleanly; now off");
        self.record(name, "Exited cleanly; now OFF");
        Ok(())
    }

    // ── watch cycle ───────────────────────────────────────────────────────────

    /// One reconciliation pass over a single fresh snapshot.
    ///
    /// Per-app failures are collected; one app never blocks another.
    pub fn watch_cycle(&mut self) -> Vec<SupervisorError> {
        let snapshot = self.table.snapshot();
        let mut failures = Vec::new();

        for index in 0..self.apps.len() {
            let matched = self.resolve_in(index, &snapshot);
            let name = self.apps[index].name.clone();

            if let Some(warning) = matched.ambiguity(&name) {
                tracing::warn!("{warning}");
            }
            if matched.is_running() {
                self.apps[index].last_known_pid = matched.canonical.as_ref().map(|p| p.pid);
                self.observe_running(index, &matched, &snapshot);
                continue;
            }

            self.apps[index].last_known_pid = None;
            let previous = self.states.get(&name).cloned();
            if !self.apps[index].desired_state.is_on() {
                self.states.insert(name.clone(), AppState::Stopped);
                self.attention.remove(&name);
                continue;
            }

            if self.apps[index].restart_on_crash {
                tracing::warn!(app = %name, "not running; restarting");
                match self.launch(index) {
                    Ok(pid) => {
                        self.record(&name, &format!("Auto-restarted (pid {pid})"));
                        self.states.insert(name, AppState::Restarted { pid });
                    }
                    Err(err) => failures.push(err),
                }
            } else {
                if previous != Some(AppState::StoppedUnexpectedly) {
                    tracing::warn!(app = %name, "stopped unexpectedly");
                    self.record(&name, "Stopped unexpectedly");
                }
                self.states.insert(name, AppState::StoppedUnexpectedly);
            }
        }
        failures
    }

    fn observe_running(&mut self, index: usize, matched: &MatchResult, snapshot: &[ProcessInfo]) {
        let Some(canonical) = &matched.canonical else {
            return;
        };
        let sample = ProcessHandle::capture(canonical, snapshot).sample();
        self.states.insert(
            self.apps[index].name.clone(),
            AppState::Running {
                pid: canonical.pid,
                cpu_percent: sample.cpu_percent,
                memory_bytes: sample.memory_bytes,
                orphans: matched.orphans.iter().map(|p| p.pid).collect(),
            },
        );
    }

    // ── registry ──────────────────────────────────────────────────────────────

    /// Swaps in an edited registry. Apps no longer listed are stopped first;
    /// surviving apps keep their desired state.
    pub async fn replace_registry(&mut self, mut apps: Vec<ManagedApp>) -> Vec<SupervisorError> {
        let keep: HashSet<&str> = apps.iter().map(|a| a.name.as_str()).collect();
        let removed: Vec<String> = self
            .apps
            .iter()
            .filter(|a| !keep.contains(a.name.as_str()))
            .map(|a| a.name.clone())
            .collect();

        let mut failures = Vec::new();
        for name in &removed {
            tracing::info!(app = %name, "removed from registry; stopping");
            if let Err(err) = self.stop(name).await {
                failures.push(err);
            }
            self.states.remove(name);
            self.attention.remove(name);
        }

        for app in &mut apps {
            if let Some(old) = self.app(&app.name) {
                app.desired_state = old.desired_state;
                app.last_known_pid = old.last_known_pid;
            }
        }
        self.apps = apps;
        failures
    }

    // ── status ────────────────────────────────────────────────────────────────

    pub fn status(&self) -> Vec<AppStatus> {
        self.apps
            .iter()
            .map(|app| AppStatus {
                name: app.name.clone(),
                desired: app.desired_state,
                state: self.states.get(&app.name).cloned().unwrap_or(AppState::Stopped),
                needs_attention: self.attention.contains(&app.name),
            })
            .collect()
    }

    pub fn state_of(&self, name: &str) -> Option<&AppState> {
        self.states.get(name)
    }

    pub fn needs_attention(&self, name: &str) -> bool {
        self.attention.contains(name)
    }
}
