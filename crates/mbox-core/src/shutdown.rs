//! Shutdown event shared between the control loop, the service thread and
//! the signal handler.

use std::sync::{Arc, Condvar, Mutex, PoisonError};
use std::time::Duration;
use tracing::info;

/// A latching shutdown flag that sleepers can wait on.
#[derive(Debug, Clone, Default)]
pub struct Shutdown {
    state: Arc<(Mutex<bool>, Condvar)>,
}

impl Shutdown {
    /// A fresh, untriggered event.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Request shutdown and wake every waiter.
    pub fn trigger(&self) {
        let (flag, cvar) = &*self.state;
        let mut triggered = flag.lock().unwrap_or_else(PoisonError::into_inner);
        if !*triggered {
            info!("Shutdown requested");
        }
        *triggered = true;
        cvar.notify_all();
    }

    /// Has shutdown been requested?
    #[must_use]
    pub fn is_triggered(&self) -> bool {
        *self.state.0.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Sleep for up to `timeout`.
    ///
    /// Returns `true` as soon as shutdown is requested, `false` if the full
    /// period elapsed without it.
    #[must_use]
    pub fn wait(&self, timeout: Duration) -> bool {
        let (flag, cvar) = &*self.state;
        let guard = flag.lock().unwrap_or_else(PoisonError::into_inner);
        let (guard, _) = cvar
            .wait_timeout_while(guard, timeout, |triggered| !*triggered)
            .unwrap_or_else(PoisonError::into_inner);
        *guard
    }
}
