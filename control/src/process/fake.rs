//! In-memory process table for tests.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

use crate::error::LaunchError;
use crate::model::LaunchSpec;
use crate::process::{ProcessInfo, ProcessTable, SignalKind};

const FIRST_PID: u32 = 1000;

struct FakeProc {
    info: ProcessInfo,
    ignores_graceful: bool,
    unkillable: bool,
}

#[derive(Default)]
struct Inner {
    procs: Vec<FakeProc>,
    next_pid: u32,
    clock: u64,
    signals: Vec<(u32, SignalKind)>,
    spawned: Vec<u32>,
    spawn_children: usize,
    fail_spawn: bool,
}

/// Cloneable handle: tests keep one clone while the supervisor owns another.
#[derive(Clone, Default)]
pub(crate) struct FakeTable {
    inner: Arc<Mutex<Inner>>,
}

impl FakeTable {
    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap()
    }

    /// Adds a running process and returns its pid.
    pub fn insert(&self, name: &str, argv: &[&str], parent: Option<u32>) -> u32 {
        let argv = argv.iter().map(|s| s.to_string()).collect();
        self.lock().add(name, argv, parent, None)
    }

    /// Simulates a crash or an external kill.
    pub fn kill_external(&self, pid: u32) {
        self.lock().procs.retain(|p| p.info.pid != pid);
    }

    pub fn ignore_graceful(&self, pid: u32) {
        if let Some(p) = self.lock().procs.iter_mut().find(|p| p.info.pid == pid) {
            p.ignores_graceful = true;
        }
    }

    pub fn make_unkillable(&self, pid: u32) {
        if let Some(p) = self.lock().procs.iter_mut().find(|p| p.info.pid == pid) {
            p.ignores_graceful = true;
            p.unkillable = true;
        }
    }

    /// Every spawn also starts `n` worker children under the new process.
    pub fn set_spawn_children(&self, n: usize) {
        self.lock().spawn_children = n;
    }

    pub fn set_fail_spawn(&self, fail: bool) {
        self.lock().fail_spawn = fail;
    }

    pub fn signals(&self) -> Vec<(u32, SignalKind)> {
        self.lock().signals.clone()
    }

    pub fn spawned(&self) -> Vec<u32> {
        self.lock().spawned.clone()
    }

    pub fn alive_pids(&self) -> Vec<u32> {
        self.lock().procs.iter().map(|p| p.info.pid).collect()
    }

    pub fn argv_of(&self, pid: u32) -> Option<Vec<String>> {
        self.lock()
            .procs
            .iter()
            .find(|p| p.info.pid == pid)
            .map(|p| p.info.argv.clone())
    }
}

impl Inner {
    fn add(&mut self, name: &str, argv: Vec<String>, parent: Option<u32>, exe: Option<&Path>) -> u32 {
        if self.next_pid == 0 {
            self.next_pid = FIRST_PID;
        }
        let pid = self.next_pid;
        self.next_pid += 1;
        self.clock += 1;
        self.procs.push(FakeProc {
            info: ProcessInfo {
                pid,
                ppid: parent,
                name: name.to_string(),
                exe: exe.map(Path::to_path_buf),
                argv,
                start_time: self.clock,
                cpu_percent: 0.5,
                memory_bytes: 4096,
            },
            ignores_graceful: false,
            unkillable: false,
        });
        pid
    }
}

/// The OS reports an absolute image path whatever the launch spec said.
fn resolve_exe(path: &Path, cwd: Option<&Path>) -> PathBuf {
    if path.is_absolute() || path.has_root() {
        return path.to_path_buf();
    }
    if path.components().count() == 1 {
        return Path::new("/usr/bin").join(path);
    }
    cwd.unwrap_or_else(|| Path::new("/home/user")).join(path)
}

impl ProcessTable for FakeTable {
    fn snapshot(&mut self) -> Vec<ProcessInfo> {
        self.lock().procs.iter().map(|p| p.info.clone()).collect()
    }

    fn is_alive(&mut self, process: &ProcessInfo) -> bool {
        self.lock().procs.iter().any(|p| p.info.same_process(process))
    }

    fn signal(&mut self, pid: u32, kind: SignalKind) -> bool {
        let mut inner = self.lock();
        inner.signals.push((pid, kind));
        let Some(index) = inner.procs.iter().position(|p| p.info.pid == pid) else {
            return false;
        };
        let p = &inner.procs[index];
        let dies = match kind {
            SignalKind::Graceful => !p.ignores_graceful,
            SignalKind::Forceful => !p.unkillable,
        };
        if dies {
            inner.procs.remove(index);
        }
        true
    }

    fn spawn(&mut self, launch: &LaunchSpec, cwd: Option<&Path>) -> Result<u32, LaunchError> {
        let mut inner = self.lock();
        if inner.fail_spawn {
            return Err(LaunchError::Spawn(std::io::Error::new(
                std::io::ErrorKind::PermissionDenied,
                "refused",
            )));
        }
        let (name, argv, exe) = match launch {
            LaunchSpec::Executable { path, args } => {
                let name = path
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_default();
                let mut argv = vec![path.to_string_lossy().into_owned()];
                argv.extend(args.iter().cloned());
                (name, argv, Some(resolve_exe(path, cwd)))
            }
            LaunchSpec::Command { command } => {
                let argv: Vec<String> = command.split_whitespace().map(str::to_string).collect();
                let name = argv.first().cloned().unwrap_or_default();
                (name, argv, None)
            }
            LaunchSpec::Script { interpreter, script, args } => {
                let mut argv = vec![interpreter.clone(), script.to_string_lossy().into_owned()];
                argv.extend(args.iter().cloned());
                (interpreter.clone(), argv, None)
            }
        };
        let pid = inner.add(&name, argv, None, exe.as_deref());
        for i in 0..inner.spawn_children {
            inner.add("worker", vec!["worker".into(), i.to_string()], Some(pid), None);
        }
        inner.spawned.push(pid);
        Ok(pid)
    }

    fn own_pid(&self) -> u32 {
        1
    }
}
