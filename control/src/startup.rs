/// Windows startup registration via the `HKCU\...\Run` registry key.
///
/// `control autostart on|off` records the choice in `control.state.json` and
/// mirrors it here; the supervisor re-syncs the registry with the recorded
/// choice at startup, so a moved binary gets its path refreshed.
///
/// On non-Windows platforms every function compiles and succeeds as a no-op.
use anyhow::Result;

// ── Windows implementation ─────────────────────────────────────────────────────

#[cfg(windows)]
mod imp {
    use anyhow::Result;

    use crate::registry;

    const RUN_KEY: &str = r"Software\Microsoft\Windows\CurrentVersion\Run";
    const VALUE_NAME: &str = "TheControl";

    /// Registers `command` under `HKCU\...\Run\TheControl`.
    /// Idempotent: overwrites any previous value.
    pub fn register(command: &str) -> Result<()> {
        registry::set_string(RUN_KEY, VALUE_NAME, command)
    }

    pub fn unregister() -> Result<()> {
        registry::delete_value(RUN_KEY, VALUE_NAME)
    }

    pub fn is_registered() -> bool {
        registry::has_value(RUN_KEY, VALUE_NAME)
    }
}

// ── Public API ─────────────────────────────────────────────────────────────────

/// Registers the running binary (`"<exe>" run`) to launch at user login.
pub fn register_startup() -> Result<()> {
    #[cfg(windows)]
    {
        let exe = std::env::current_exe()
            .map_err(|e| anyhow::anyhow!("Failed to locate control executable: {e}"))?;
        let command = format!("\"{}\" run", exe.display());
        imp::register(&command)?;
        tracing::info!(command, "registered in Windows startup");
    }
    #[cfg(not(windows))]
    {
        tracing::debug!("autostart registration is Windows-only; skipped");
    }
    Ok(())
}

/// Removes the startup registration.
pub fn unregister_startup() -> Result<()> {
    #[cfg(windows)]
    {
        imp::unregister()?;
        tracing::info!("removed from Windows startup registry");
    }
    Ok(())
}

/// Whether a startup registration currently exists. Always false off Windows.
pub fn is_registered() -> bool {
    #[cfg(windows)]
    {
        imp::is_registered()
    }
    #[cfg(not(windows))]
    {
        false
    }
}

/// Brings the registry in line with the recorded `enabled` choice.
pub fn sync(enabled: bool) -> Result<()> {
    if enabled {
        register_startup()
    } else if is_registered() {
        unregister_startup()
    } else {
        Ok(())
    }
}
