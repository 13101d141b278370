use std::io;
#[cfg(test)]
use std::sync::atomic::AtomicUsize;
use std::time::{Duration, Instant};
use tracing::debug;

/// How long a politely terminated runtime gets before SIGKILL.
pub(super) const TERMINATE_GRACE: Duration = Duration::from_millis(500);

pub(super) fn should_send_sigkill(
    sigkill_sent: bool,
    term_requested_at: Option<Instant>,
    now: Instant,
) -> bool {
    if sigkill_sent {
        return false;
    }
    match term_requested_at {
        Some(start) => now.duration_since(start) >= TERMINATE_GRACE,
        None => false,
    }
}

#[derive(Debug, Clone, Copy)]
pub(super) enum Signal {
    Term,
    Kill,
}

#[cfg(test)]
static SEND_SIGNAL_FAILURES: AtomicUsize = AtomicUsize::new(0);

#[cfg(test)]
pub(super) fn send_signal_failures() -> usize {
    SEND_SIGNAL_FAILURES.load(std::sync::atomic::Ordering::SeqCst)
}

pub(super) fn send_signal(pid: u32, signal: Signal) {
    #[cfg(unix)]
    unsafe {
        let signo = match signal {
            Signal::Term => libc::SIGTERM,
            Signal::Kill => libc::SIGKILL,
        };
        if libc::kill(pid as i32, signo) != 0 {
            #[cfg(test)]
            SEND_SIGNAL_FAILURES.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            debug!(
                pid,
                signo,
                error = %io::Error::last_os_error(),
                "failed to signal sandbox runtime"
            );
        }
    }

    #[cfg(not(unix))]
    {
        let _ = pid;
        debug!(?signal, "signals unsupported on this platform");
    }
}

/// True while `pid` still names a process (or zombie) we may signal.
#[cfg(unix)]
pub fn process_exists(pid: u32) -> bool {
    unsafe { libc::kill(pid as i32, 0) == 0 }
}

#[cfg(not(unix))]
pub fn process_exists(_pid: u32) -> bool {
    false
}
