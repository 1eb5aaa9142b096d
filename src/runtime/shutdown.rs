//! # OS signal intake for the shutdown coordinator.
//!
//! [`wait_for_shutdown_signal`] completes when the process is asked to stop
//! and reports **which** signal arrived as a [`ShutdownSignal`], so the
//! runtime can tag its `ShutdownRequested` event with the trigger.
//!
//! Unix listens for `SIGINT`, `SIGTERM` (systemd/Kubernetes stop), and
//! `SIGQUIT`; everywhere else only Ctrl-C is available and maps to
//! [`ShutdownSignal::Interrupt`].

/// The termination signal that triggered shutdown.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownSignal {
    /// `SIGINT` / Ctrl-C.
    Interrupt,
    /// `SIGTERM`.
    Terminate,
    /// `SIGQUIT`.
    Quit,
}

impl ShutdownSignal {
    /// Returns a short stable label (snake_case) for use in logs/events.
    pub fn as_label(&self) -> &'static str {
        match self {
            ShutdownSignal::Interrupt => "interrupt",
            ShutdownSignal::Terminate => "terminate",
            ShutdownSignal::Quit => "quit",
        }
    }
}

/// Waits for a termination signal and reports which one arrived.
///
/// Each call registers independent listeners. Fails only if signal
/// registration with the OS fails.
#[cfg(unix)]
pub async fn wait_for_shutdown_signal() -> std::io::Result<ShutdownSignal> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigint = signal(SignalKind::interrupt())?;
    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sigquit = signal(SignalKind::quit())?;

    let sig = tokio::select! {
        _ = sigint.recv()  => ShutdownSignal::Interrupt,
        _ = sigterm.recv() => ShutdownSignal::Terminate,
        _ = sigquit.recv() => ShutdownSignal::Quit,
    };
    Ok(sig)
}

/// Waits for a termination signal and reports which one arrived.
///
/// Each call registers independent listeners. Fails only if signal
/// registration with the OS fails.
#[cfg(not(unix))]
pub async fn wait_for_shutdown_signal() -> std::io::Result<ShutdownSignal> {
    tokio::signal::ctrl_c().await?;
    Ok(ShutdownSignal::Interrupt)
}
