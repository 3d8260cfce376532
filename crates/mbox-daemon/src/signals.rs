//! Signal handling for graceful daemon shutdown.
//!
//! SIGINT and SIGTERM are awaited on a small dedicated runtime and turned
//! into a [`Shutdown`] trigger, which wakes the control loop out of its
//! period wait.

use mbox_core::shutdown::Shutdown;
use std::fmt;
use std::thread;
use tracing::{debug, info, warn};

/// Signal types that the daemon handles.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalKind {
    /// SIGTERM - Graceful termination request.
    Terminate,
    /// SIGINT - Interrupt (Ctrl+C).
    Interrupt,
}

impl fmt::Display for SignalKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SignalKind::Terminate => write!(f, "SIGTERM"),
            SignalKind::Interrupt => write!(f, "SIGINT"),
        }
    }
}

/// Start the signal listener thread.
///
/// The thread is detached; it lives until a signal arrives or the process exits.
pub fn install(shutdown: Shutdown) -> std::io::Result<()> {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;

    thread::Builder::new()
        .name("mbox-signals".into())
        .spawn(move || {
            match runtime.block_on(wait_for_signal()) {
                Ok(kind) => info!(signal = %kind, "Signal received"),
                Err(e) => {
                    warn!(error = %e, "Signal listener failed");
                    return;
                }
            }
            shutdown.trigger();
        })?;

    debug!("Signal handlers registered");
    Ok(())
}

#[cfg(unix)]
async fn wait_for_signal() -> std::io::Result<SignalKind> {
    use tokio::signal::unix::{signal, SignalKind as UnixSignal};

    let mut terminate = signal(UnixSignal::terminate())?;
    tokio::select! {
        res = tokio::signal::ctrl_c() => res.map(|()| SignalKind::Interrupt),
        _ = terminate.recv() => Ok(SignalKind::Terminate),
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() -> std::io::Result<SignalKind> {
    tokio::signal::ctrl_c().await.map(|()| SignalKind::Interrupt)
}
