//! Run-scoped cancellation token.
//!
//! The token is set at most once per run and never cleared while the run is
//! in progress. A fresh token for the next run is obtained with
//! [`InterruptToken::for_run`], which also forgets any earlier signal.

use std::io;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// Written by the signal handler. Only atomics are touched there.
static SIGNALLED: AtomicBool = AtomicBool::new(false);

/// Serializes tests that raise real signals against the shared latch.
#[cfg(all(test, unix))]
pub(crate) static SIGNAL_TEST_LOCK: std::sync::Mutex<()> = std::sync::Mutex::new(());

/// Set-once cancellation flag checked at every step boundary.
#[derive(Debug, Clone, Default)]
pub struct InterruptToken {
    flag: Arc<AtomicBool>,
    follows_signals: bool,
}

impl InterruptToken {
    /// A token that is only set through [`InterruptToken::trigger`].
    pub fn new() -> Self {
        Self::default()
    }

    /// A token for a new top-level run that is also set by SIGINT/SIGTERM
    /// once [`install_signal_handlers`] has been called.
    pub fn for_run() -> Self {
        SIGNALLED.store(false, Ordering::SeqCst);
        Self {
            flag: Arc::new(AtomicBool::new(false)),
            follows_signals: true,
        }
    }

    /// Set the token. Returns `true` only for the call that actually set it.
    pub fn trigger(&self) -> bool {
        !self.flag.swap(true, Ordering::SeqCst)
    }

    pub fn is_set(&self) -> bool {
        if self.follows_signals && SIGNALLED.load(Ordering::SeqCst) {
            self.flag.store(true, Ordering::SeqCst);
        }
        self.flag.load(Ordering::SeqCst)
    }
}

#[cfg(unix)]
extern "C" fn handle_signal(_signum: libc::c_int) {
    SIGNALLED.store(true, Ordering::SeqCst);
}

/// Route SIGINT and SIGTERM to the run token instead of killing the process.
#[cfg(unix)]
#[allow(unsafe_code)]
pub fn install_signal_handlers() -> io::Result<()> {
    let handler = handle_signal as extern "C" fn(libc::c_int) as libc::sighandler_t;
    for signum in [libc::SIGINT, libc::SIGTERM] {
        // SAFETY: the handler only stores to a static atomic.
        let previous = unsafe { libc::signal(signum, handler) };
        if previous == libc::SIG_ERR {
            return Err(io::Error::last_os_error());
        }
    }
    Ok(())
}

#[cfg(not(unix))]
pub fn install_signal_handlers() -> io::Result<()> {
    Ok(())
}
