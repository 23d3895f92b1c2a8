//! [`ProcessTable`] backed by `sysinfo`, plus detached spawning.

use std::path::Path;
use std::process::{Command, Stdio};

use sysinfo::{
    Pid, ProcessRefreshKind, ProcessStatus, ProcessesToUpdate, Signal, System, UpdateKind,
};

use crate::error::LaunchError;
use crate::model::LaunchSpec;
use crate::process::{ProcessInfo, ProcessTable, SignalKind};

pub struct SystemTable {
    system: System,
}

impl Default for SystemTable {
    fn default() -> Self {
        Self::new()
    }
}

impl SystemTable {
    pub fn new() -> Self {
        Self { system: System::new() }
    }

    fn refresh_kind() -> ProcessRefreshKind {
        ProcessRefreshKind::new()
            .with_cpu()
            .with_memory()
            .with_exe(UpdateKind::OnlyIfNotSet)
            .with_cmd(UpdateKind::OnlyIfNotSet)
    }

    fn info(pid: Pid, process: &sysinfo::Process) -> ProcessInfo {
        ProcessInfo {
            pid: pid.as_u32(),
            ppid: process.parent().map(|p| p.as_u32()),
            name: process.name().to_string_lossy().into_owned(),
            exe: process.exe().map(Path::to_path_buf),
            argv: process
                .cmd()
                .iter()
                .map(|part| part.to_string_lossy().into_owned())
                .collect(),
            start_time: process.start_time(),
            cpu_percent: process.cpu_usage(),
            memory_bytes: process.memory(),
        }
    }
}

impl ProcessTable for SystemTable {
    fn snapshot(&mut self) -> Vec<ProcessInfo> {
        self.system
            .refresh_processes_specifics(ProcessesToUpdate::All, true, Self::refresh_kind());
        let mut processes: Vec<ProcessInfo> = self
            .system
            .processes()
            .iter()
            // Linux lists each thread as a task whose parent is its process.
            .filter(|(_, p)| p.thread_kind().is_none() && p.status() != ProcessStatus::Zombie)
            .map(|(pid, p)| Self::info(*pid, p))
            .collect();
        processes.sort_by_key(|p| p.pid);
        processes
    }

    fn is_alive(&mut self, process: &ProcessInfo) -> bool {
        let pid = Pid::from_u32(process.pid);
        self.system.refresh_processes_specifics(
            ProcessesToUpdate::Some(&[pid]),
            true,
            ProcessRefreshKind::new(),
        );
        self.system
            .process(pid)
            .map(|p| p.status() != ProcessStatus::Zombie && p.start_time() == process.start_time)
            .unwrap_or(false)
    }

    fn signal(&mut self, pid: u32, kind: SignalKind) -> bool {
        let Some(process) = self.system.process(Pid::from_u32(pid)) else {
            return false;
        };
        match kind {
            // Windows has no SIGTERM; kill_with returns None there.
            SignalKind::Graceful => process.kill_with(Signal::Term).unwrap_or_else(|| process.kill()),
            SignalKind::Forceful => process.kill(),
        }
    }

    fn spawn(&mut self, launch: &LaunchSpec, cwd: Option<&Path>) -> Result<u32, LaunchError> {
        spawn_detached(launch, cwd)
    }
}

// ── Spawning ──────────────────────────────────────────────────────────────────

/// Starts `launch` in its own process group with null stdio. A background
/// thread reaps the child so it never lingers as a zombie.
pub fn spawn_detached(launch: &LaunchSpec, cwd: Option<&Path>) -> Result<u32, LaunchError> {
    if let Some(dir) = cwd {
        if !dir.is_dir() {
            return Err(LaunchError::MissingCwd(dir.to_path_buf()));
        }
    }

    let mut command = build_command(launch, cwd)?;
    command
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null());
    if let Some(dir) = cwd {
        command.current_dir(dir);
    }
    detach(&mut command);

    let mut child = command.spawn().map_err(|e| match e.kind() {
        std::io::ErrorKind::NotFound => LaunchError::NotFound(program_path(launch)),
        _ => LaunchError::Spawn(e),
    })?;
    let pid = child.id();
    std::thread::spawn(move || {
        let _ = child.wait();
    });
    Ok(pid)
}

fn build_command(launch: &LaunchSpec, cwd: Option<&Path>) -> Result<Command, LaunchError> {
    match launch {
        LaunchSpec::Executable { path, args } => {
            let resolved = match cwd {
                Some(dir) if path.is_relative() && path.components().count() > 1 => dir.join(path),
                _ => path.clone(),
            };
            if resolved.components().count() > 1 && !resolved.exists() {
                return Err(LaunchError::NotFound(resolved));
            }
            let mut command = Command::new(resolved);
            command.args(args);
            Ok(command)
        }
        LaunchSpec::Command { command } => {
            let line = command.trim();
            if line.is_empty() {
                return Err(LaunchError::EmptyCommand);
            }
            Ok(shell(line))
        }
        LaunchSpec::Script { interpreter, script, args } => {
            let script_path = match cwd {
                Some(dir) if script.is_relative() => dir.join(script),
                _ => script.clone(),
            };
            if !script_path.exists() {
                return Err(LaunchError::NotFound(script_path));
            }
            let mut command = Command::new(interpreter);
            command.arg(script).args(args);
            Ok(command)
        }
    }
}

fn program_path(launch: &LaunchSpec) -> std::path::PathBuf {
    match launch {
        LaunchSpec::Executable { path, .. } => path.clone(),
        LaunchSpec::Command { command } => command.split_whitespace().next().unwrap_or("").into(),
        LaunchSpec::Script { interpreter, .. } => interpreter.into(),
    }
}

#[cfg(windows)]
fn shell(line: &str) -> Command {
    use std::os::windows::process::CommandExt;
    let mut command = Command::new("cmd");
    command.arg("/C").raw_arg(line);
    command
}

#[cfg(not(windows))]
fn shell(line: &str) -> Command {
    let mut command = Command::new("sh");
    command.arg("-c").arg(line);
    command
}

#[cfg(windows)]
fn detach(command: &mut Command) {
    use std::os::windows::process::CommandExt;
    const CREATE_NEW_PROCESS_GROUP: u32 = 0x0000_0200;
    const CREATE_NO_WINDOW: u32 = 0x0800_0000;
    command.creation_flags(CREATE_NO_WINDOW | CREATE_NEW_PROCESS_GROUP);
}

#[cfg(unix)]
fn detach(command: &mut Command) {
    use std::os::unix::process::CommandExt;
    command.process_group(0);
}

#[cfg(not(any(windows, unix)))]
fn detach(_command: &mut Command) {}
