use std::future::Future;

use crate::config::Config;

pub enum ControlEvent {
    /// Time for a watch cycle.
    WatchTick,
    /// `apps.json` or `profiles.json` changed on disk.
    RegistryChanged,
    /// `control.toml` changed on disk and was successfully re-parsed.
    ConfigReloaded(Config),
    /// A CLI wrote `control.cmd`.
    IntentPosted,
    /// Ctrl+C or SIGTERM received; stop the loop and release the guard.
    Shutdown,
}

/// Resolves on Ctrl+C, or on SIGTERM where there is one.
///
/// The SIGTERM handler is installed before this returns, so a signal sent
/// right afterwards is not lost. Must be called inside a tokio runtime.
pub fn shutdown_signal() -> impl Future<Output = ()> + Send {
    #[cfg(unix)]
    let terminate = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate());

    async move {
        #[cfg(unix)]
        {
            match terminate {
                Ok(mut terminate) => {
                    tokio::select! {
                        _ = tokio::signal::ctrl_c() => {}
                        _ = terminate.recv() => {}
                    }
                    return;
                }
                Err(e) => tracing::warn!("cannot listen for SIGTERM: {e}"),
            }
        }
        let _ = tokio::signal::ctrl_c().await;
    }
}
