/// Single-instance guards for the supervisor and the wallpaper daemon.
///
/// On Windows the guard is a named mutex in the session namespace; elsewhere it
/// is an advisory exclusive lock on `<dir>/<name>.lock`. Either way the holder
/// also records its pid in `<dir>/<name>.pid` so the CLI and a replacing
/// supervisor can find it. Dropping the guard releases it.
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::GuardError;
use crate::process::tree::{terminate_tree, ProcessHandle};
use crate::process::{ProcessInfo, ProcessTable};

const REACQUIRE_POLL: Duration = Duration::from_millis(100);

// ── Windows implementation ─────────────────────────────────────────────────────

#[cfg(windows)]
mod imp {
    use std::path::Path;

    use windows::core::PCWSTR;
    use windows::Win32::Foundation::{CloseHandle, GetLastError, BOOL, ERROR_ALREADY_EXISTS, HANDLE};
    use windows::Win32::System::Threading::CreateMutexW;

    use crate::error::GuardError;

    pub struct Handle(HANDLE);

    fn to_wide(s: &str) -> Vec<u16> {
        s.encode_utf16().chain(std::iter::once(0)).collect()
    }

    pub fn acquire(name: &str, _dir: &Path) -> Result<Handle, GuardError> {
        let key = to_wide(&format!(r"Local\the-control.{name}"));
        let handle = unsafe { CreateMutexW(None, BOOL::from(false), PCWSTR::from_raw(key.as_ptr())) }
            .map_err(|e| GuardError::Os(std::io::Error::other(e.to_string())))?;
        if unsafe { GetLastError() } == ERROR_ALREADY_EXISTS {
            unsafe {
                let _ = CloseHandle(handle);
            }
            return Err(GuardError::Conflict(name.to_string()));
        }
        Ok(Handle(handle))
    }

    impl Drop for Handle {
        fn drop(&mut self) {
            unsafe {
                let _ = CloseHandle(self.0);
            }
        }
    }
}

// ── Advisory file lock elsewhere ───────────────────────────────────────────────

#[cfg(not(windows))]
mod imp {
    use std::fs::{File, OpenOptions};
    use std::path::Path;

    use fs2::FileExt;

    use crate::error::GuardError;

    pub struct Handle(File);

    pub fn acquire(name: &str, dir: &Path) -> Result<Handle, GuardError> {
        std::fs::create_dir_all(dir)?;
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(dir.join(format!("{name}.lock")))?;
        if file.try_lock_exclusive().is_err() {
            return Err(GuardError::Conflict(name.to_string()));
        }
        Ok(Handle(file))
    }

    impl Drop for Handle {
        fn drop(&mut self) {
            let _ = self.0.unlock();
        }
    }
}

// ── Public API ─────────────────────────────────────────────────────────────────

pub struct SingleInstanceGuard {
    name: String,
    pid_file: PathBuf,
    _handle: imp::Handle,
}

impl std::fmt::Debug for SingleInstanceGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SingleInstanceGuard").field("name", &self.name).finish()
    }
}

impl SingleInstanceGuard {
    /// Takes the guard named `name`, or fails with [`GuardError::Conflict`]
    /// while another live process holds it.
    pub fn acquire(name: &str, dir: &Path) -> Result<Self, GuardError> {
        let handle = imp::acquire(name, dir)?;
        let pid_file = pid_file(name, dir);
        std::fs::create_dir_all(dir)?;
        std::fs::write(&pid_file, std::process::id().to_string())?;
        tracing::debug!(name, "single-instance guard acquired");
        Ok(Self { name: name.to_string(), pid_file, _handle: handle })
    }

    /// Like [`acquire`](Self::acquire), but on conflict terminates every
    /// process `is_previous` accepts and waits up to `wait` for the guard to
    /// be released.
    pub async fn acquire_replacing<T, F>(
        name: &str,
        dir: &Path,
        table: &mut T,
        is_previous: F,
        grace: Duration,
        wait: Duration,
    ) -> Result<Self, GuardError>
    where
        T: ProcessTable + ?Sized,
        F: Fn(&ProcessInfo) -> bool,
    {
        match Self::acquire(name, dir) {
            Err(GuardError::Conflict(_)) => {}
            other => return other,
        }

        let own_pid = table.own_pid();
        let snapshot = table.snapshot();
        for previous in snapshot.iter().filter(|p| p.pid != own_pid && is_previous(p)) {
            tracing::info!(name, pid = previous.pid, "stopping previous instance");
            let handle = ProcessHandle::capture(previous, &snapshot);
            let survivors = terminate_tree(table, &handle, grace).await;
            if !survivors.is_empty() {
                tracing::warn!(name, ?survivors, "previous instance survived termination");
            }
        }

        let deadline = tokio::time::Instant::now() + wait;
        loop {
            match Self::acquire(name, dir) {
                Err(GuardError::Conflict(_)) if tokio::time::Instant::now() < deadline => {
                    tokio::time::sleep(REACQUIRE_POLL).await;
                }
                other => return other,
            }
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

impl Drop for SingleInstanceGuard {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.pid_file);
        tracing::debug!(name = %self.name, "single-instance guard released");
    }
}

/// Pid recorded by the current holder of `name`, if any.
pub fn holder_pid(name: &str, dir: &Path) -> Option<u32> {
    std::fs::read_to_string(pid_file(name, dir))
        .ok()?
        .trim()
        .parse()
        .ok()
}

/// Whether some process currently holds `name`. Probes by acquiring, so a
/// guard this process already holds also counts.
pub fn is_running(name: &str, dir: &Path) -> bool {
    matches!(SingleInstanceGuard::acquire(name, dir), Err(GuardError::Conflict(_)))
}

fn pid_file(name: &str, dir: &Path) -> PathBuf {
    dir.join(format!("{name}.pid"))
}
