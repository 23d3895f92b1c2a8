//! Operating-system process collaborator and the pieces built on it:
//! identification ([`identity`]), tree capture and termination ([`tree`]),
//! and the `sysinfo`-backed table ([`system`]).

pub mod identity;
pub mod system;
pub mod tree;

#[cfg(test)]
pub(crate) mod fake;

use std::path::{Path, PathBuf};

use serde::Serialize;

use crate::error::LaunchError;
use crate::model::LaunchSpec;

/// One process at snapshot time.
#[derive(Debug, Clone, PartialEq)]
pub struct ProcessInfo {
    pub pid: u32,
    pub ppid: Option<u32>,
    pub name: String,
    pub exe: Option<PathBuf>,
    pub argv: Vec<String>,
    /// Seconds since the epoch. Together with `pid` this identifies a process
    /// across pid reuse.
    pub start_time: u64,
    pub cpu_percent: f32,
    pub memory_bytes: u64,
}

impl ProcessInfo {
    /// True when `other` is the very same process, not a reuse of its pid.
    pub fn same_process(&self, other: &ProcessInfo) -> bool {
        self.pid == other.pid && self.start_time == other.start_time
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalKind {
    /// SIGTERM where supported; on Windows this is process termination.
    Graceful,
    /// SIGKILL / TerminateProcess.
    Forceful,
}

/// CPU and resident memory summed over a process tree.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
pub struct ResourceSample {
    pub cpu_percent: f32,
    pub memory_bytes: u64,
}

/// What the supervisor needs from the OS.
pub trait ProcessTable: Send {
    /// Refreshes and returns every live process. Zombies are excluded.
    fn snapshot(&mut self) -> Vec<ProcessInfo>;

    /// Re-checks one previously observed process, guarding against pid reuse.
    fn is_alive(&mut self, process: &ProcessInfo) -> bool;

    /// Returns false when the process was already gone.
    fn signal(&mut self, pid: u32, kind: SignalKind) -> bool;

    /// Starts `launch` detached from the caller's lifetime and returns its pid.
    fn spawn(&mut self, launch: &LaunchSpec, cwd: Option<&Path>) -> Result<u32, LaunchError>;

    fn own_pid(&self) -> u32 {
        std::process::id()
    }
}
