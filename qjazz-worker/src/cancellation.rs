//! SIGHUP-driven cancellation flag (§4.C3 "Cancellation"). The signal
//! handler only sets an atomic flag; the renderer's feedback callback polls
//! it, the way a genuine signal-safe handler must.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use nix::sys::signal::{self, SigHandler, Signal};

static CANCELLED: AtomicBool = AtomicBool::new(false);

extern "C" fn on_sighup(_: nix::libc::c_int) {
    CANCELLED.store(true, Ordering::SeqCst);
}

/// Handle shared between the signal handler (process-global) and the
/// dispatch loop (polls per-request).
#[derive(Clone)]
pub struct Cancellation {
    installed: Arc<()>,
}

impl Cancellation {
    /// Installs the SIGHUP handler. Must be called once at worker startup,
    /// before entering the receive loop.
    pub fn install() -> Result<Self, nix::Error> {
        unsafe {
            signal::signal(Signal::SIGHUP, SigHandler::Handler(on_sighup))?;
        }
        CANCELLED.store(false, Ordering::SeqCst);
        Ok(Self {
            installed: Arc::new(()),
        })
    }

    pub fn is_cancelled(&self) -> bool {
        CANCELLED.load(Ordering::SeqCst)
    }

    /// Clears the flag before starting a new request's unwind window.
    pub fn reset(&self) {
        CANCELLED.store(false, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reset_clears_a_previously_set_flag() {
        CANCELLED.store(true, Ordering::SeqCst);
        let cancellation = Cancellation {
            installed: Arc::new(()),
        };
        cancellation.reset();
        assert!(!cancellation.is_cancelled());
    }
}
