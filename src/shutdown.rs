//! One-shot cleanup on termination.
//!
//! [`OnceAction`] wraps a closure that runs at most once no matter how many paths
//! (normal completion, a signal, a console control event) try to trigger it.
//! [`install`] wires it to the host's termination notifications:
//!
//! - **Unix**: `SIGINT`, `SIGTERM` and `SIGHUP`. The handler only writes the signal
//!   number to a self-pipe; a watcher thread reads it and runs the action outside
//!   signal context. A second signal after the action ran restores the default
//!   disposition and re-raises, so a stuck process can still be killed from the terminal.
//! - **Windows**: `SetConsoleCtrlHandler`. The action runs synchronously on the
//!   handler thread (Ctrl-C, Ctrl-Break, close, logoff, shutdown). Once it has run, the
//!   handler reports the event as unhandled and the default handler terminates the
//!   process.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};

use tracing::{info, warn};

use crate::error::{Error, Result};

/// A closure that runs at most once.
pub struct OnceAction {
    fired: AtomicBool,
    action: Box<dyn Fn() + Send + Sync>,
}

impl OnceAction {
    pub fn new(action: impl Fn() + Send + Sync + 'static) -> Self {
        Self {
            fired: AtomicBool::new(false),
            action: Box::new(action),
        }
    }

    /// Run the action if nobody has yet. Returns `true` for the call that ran it.
    pub fn run(&self) -> bool {
        if self
            .fired
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return false;
        }
        (self.action)();
        true
    }

    pub fn has_run(&self) -> bool {
        self.fired.load(Ordering::Acquire)
    }
}

impl fmt::Debug for OnceAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OnceAction")
            .field("fired", &self.has_run())
            .finish_non_exhaustive()
    }
}

/// Run `action` for a termination notification. Returns `false` when the cleanup
/// already ran, in which case the host's default handling should apply.
fn consume(action: &OnceAction, notification: u32) -> bool {
    if action.run() {
        info!(notification, "termination requested, cleaned up");
        true
    } else {
        warn!(notification, "termination requested after cleanup");
        false
    }
}

static INSTALLED: OnceLock<Arc<OnceAction>> = OnceLock::new();

/// Install `action` as the process-wide termination cleanup. Only one install per process.
pub fn install(action: Arc<OnceAction>) -> Result<()> {
    INSTALLED
        .set(Arc::clone(&action))
        .map_err(|_| Error::HooksInstalled)?;
    platform::install(action)
}

#[cfg(unix)]
mod platform {
    use std::io;
    use std::sync::atomic::{AtomicI32, Ordering};
    use std::sync::Arc;
    use std::{mem, ptr, thread};

    use libc::{c_int, c_void};

    use super::{consume, OnceAction};
    use crate::error::{Error, Result};

    const SIGNALS: [c_int; 3] = [libc::SIGINT, libc::SIGTERM, libc::SIGHUP];

    static WRITE_FD: AtomicI32 = AtomicI32::new(-1);

    extern "C" fn on_signal(sig: c_int) {
        let fd = WRITE_FD.load(Ordering::Relaxed);
        if fd < 0 {
            return;
        }
        let byte = sig as u8;
        // SAFETY: write(2) is async-signal-safe; the fd is non-blocking.
        unsafe {
            libc::write(fd, &byte as *const u8 as *const c_void, 1);
        }
    }

    fn os_error(what: &str) -> Error {
        Error::Hooks(format!("{what}: {}", io::Error::last_os_error()))
    }

    pub(super) fn install(action: Arc<OnceAction>) -> Result<()> {
        let mut fds = [0 as c_int; 2];
        // SAFETY: fds has room for the two descriptors pipe(2) writes.
        if unsafe { libc::pipe(fds.as_mut_ptr()) } != 0 {
            return Err(os_error("pipe"));
        }
        let [read_fd, write_fd] = fds;
        // SAFETY: plain fcntl calls on descriptors we own.
        unsafe {
            libc::fcntl(read_fd, libc::F_SETFD, libc::FD_CLOEXEC);
            libc::fcntl(write_fd, libc::F_SETFD, libc::FD_CLOEXEC);
            let flags = libc::fcntl(write_fd, libc::F_GETFL);
            libc::fcntl(write_fd, libc::F_SETFL, flags | libc::O_NONBLOCK);
        }
        WRITE_FD.store(write_fd, Ordering::Release);

        thread::Builder::new()
            .name("retrace-signals".into())
            .spawn(move || watch(read_fd, action))?;

        for sig in SIGNALS {
            // SAFETY: a zeroed sigaction is a valid starting point; the handler only
            // performs async-signal-safe work.
            let rc = unsafe {
                let mut sa: libc::sigaction = mem::zeroed();
                sa.sa_sigaction = on_signal as extern "C" fn(c_int) as libc::sighandler_t;
                sa.sa_flags = libc::SA_RESTART;
                libc::sigemptyset(&mut sa.sa_mask);
                libc::sigaction(sig, &sa, ptr::null_mut())
            };
            if rc != 0 {
                return Err(os_error("sigaction"));
            }
        }
        Ok(())
    }

    fn watch(read_fd: c_int, action: Arc<OnceAction>) {
        let mut byte = 0u8;
        loop {
            // SAFETY: reading one byte into a live local.
            let n = unsafe { libc::read(read_fd, &mut byte as *mut u8 as *mut c_void, 1) };
            if n == 1 {
                let sig = c_int::from(byte);
                if !consume(&action, u32::from(byte)) {
                    // SAFETY: restoring the default disposition and re-raising.
                    unsafe {
                        libc::signal(sig, libc::SIG_DFL);
                        libc::raise(sig);
                    }
                }
            } else if n < 0 && io::Error::last_os_error().kind() == io::ErrorKind::Interrupted {
                continue;
            } else {
                break;
            }
        }
    }
}

#[cfg(windows)]
mod platform {
    use std::sync::Arc;

    use windows_sys::Win32::Foundation::BOOL;
    use windows_sys::Win32::System::Console::SetConsoleCtrlHandler;

    use super::{consume, OnceAction, INSTALLED};
    use crate::error::{Error, Result};

    unsafe extern "system" fn on_console_event(ctrl_type: u32) -> BOOL {
        match INSTALLED.get() {
            Some(action) => BOOL::from(consume(action, ctrl_type)),
            None => 0,
        }
    }

    pub(super) fn install(_action: Arc<OnceAction>) -> Result<()> {
        // SAFETY: registers a handler with static lifetime.
        if unsafe { SetConsoleCtrlHandler(Some(on_console_event), 1) } == 0 {
            return Err(Error::Hooks(std::io::Error::last_os_error().to_string()));
        }
        Ok(())
    }
}

#[cfg(not(any(unix, windows)))]
mod platform {
    use std::sync::Arc;

    use super::OnceAction;
    use crate::error::Result;

    pub(super) fn install(_action: Arc<OnceAction>) -> Result<()> {
        tracing::warn!("no termination hooks on this platform");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::thread;

    #[test]
    fn runs_exactly_once_across_threads() {
        let count = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&count);
        let once = Arc::new(OnceAction::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        }));

        let winners: usize = (0..8)
            .map(|_| {
                let once = Arc::clone(&once);
                thread::spawn(move || once.run())
            })
            .collect::<Vec<_>>()
            .into_iter()
            .map(|h| usize::from(h.join().unwrap()))
            .sum();

        assert_eq!(winners, 1);
        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert!(once.has_run());
        assert!(!once.run());
    }

    #[test]
    fn later_notifications_fall_through() {
        let count = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&count);
        let once = OnceAction::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        assert!(consume(&once, 2));
        assert!(!consume(&once, 2));
        assert!(!consume(&once, 15));
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }
}
