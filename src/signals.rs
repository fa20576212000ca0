//! Process-wide interception of termination and fault signals.
//!
//! The disposition table is built once at startup and only read while
//! registering handlers. The handlers never look at it: they touch only
//! atomics, raw `write(2)` on stderr and `raise(3)`, all of which are
//! async-signal-safe. Every handler is installed with `SA_RESETHAND`, so
//! the kernel puts the default disposition back before the handler body
//! runs and a second identical signal is never intercepted.

use nix::sys::signal::{self, SaFlags, SigAction, SigHandler, SigSet, Signal};

use crate::logging::log;
use crate::shutdown::request_shutdown_with_signal;

/// How a signal is handled
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// Graceful shutdown request
    Normal,
    /// Crash report on stderr, then re-raise under the default action
    Abnormal,
}

/// Fixed mapping from signal to disposition
#[derive(Debug, Clone)]
pub struct SignalTable {
    entries: Vec<(Signal, Disposition)>,
}

impl SignalTable {
    /// SIGINT/SIGTERM are Normal, SIGABRT/SIGSEGV are Abnormal
    pub fn standard() -> Self {
        Self::from_entries(vec![
            (Signal::SIGINT, Disposition::Normal),
            (Signal::SIGTERM, Disposition::Normal),
            (Signal::SIGABRT, Disposition::Abnormal),
            (Signal::SIGSEGV, Disposition::Abnormal),
        ])
    }

    /// Table that installs nothing
    pub fn empty() -> Self {
        Self::from_entries(Vec::new())
    }

    pub fn from_entries(entries: Vec<(Signal, Disposition)>) -> Self {
        Self { entries }
    }

    pub fn disposition(&self, signal: Signal) -> Option<Disposition> {
        self.entries
            .iter()
            .find(|(candidate, _)| *candidate == signal)
            .map(|(_, disposition)| *disposition)
    }

    pub fn entries(&self) -> &[(Signal, Disposition)] {
        &self.entries
    }
}

impl Default for SignalTable {
    fn default() -> Self {
        Self::standard()
    }
}

/// Installs a handler for every entry in `table`
///
/// Must run before the engine's event loop starts.
///
/// # Errors
/// Any `sigaction(2)` failure; entries installed before it stay installed.
pub fn install(table: &SignalTable) -> Result<(), nix::Error> {
    if table.entries().is_empty() {
        return Ok(());
    }

    // First backtrace() call may load libgcc and allocate; do it here, not in a handler.
    stacktrace::prime();

    for (sig, disposition) in table.entries() {
        let handler = match disposition {
            Disposition::Normal => SigHandler::Handler(normal_handler),
            Disposition::Abnormal => SigHandler::Handler(abnormal_handler),
        };
        let action = SigAction::new(handler, SaFlags::SA_RESETHAND, SigSet::empty());
        // SAFETY: both handlers restrict themselves to async-signal-safe calls.
        unsafe { signal::sigaction(*sig, &action) }?;
        let _ = log(&format!("Installed {:?} handler for {}", disposition, sig.as_str()));
    }
    Ok(())
}

const NORMAL_PREFIX: &[u8] = b"Catching signal: ";
const NORMAL_SUFFIX: &[u8] = b"\nExiting cleanly\n";

const ABNORMAL_PREFIX: &[u8] =
    b"\n\n*************************************************************\nCatching signal: ";
const ABNORMAL_SUFFIX: &[u8] = concat!(
    "\nPlease file a bug report and provide the following information:\n\n",
    env!("CARGO_PKG_NAME"),
    " version: ",
    env!("CARGO_PKG_VERSION"),
    "\n"
)
.as_bytes();

extern "C" fn normal_handler(signum: libc::c_int) {
    write_stderr(NORMAL_PREFIX);
    write_stderr(signal_name(signum));
    write_stderr(NORMAL_SUFFIX);
    request_shutdown_with_signal(signum);
}

extern "C" fn abnormal_handler(signum: libc::c_int) {
    write_stderr(ABNORMAL_PREFIX);
    write_stderr(signal_name(signum));
    write_stderr(ABNORMAL_SUFFIX);
    stacktrace::write_to_stderr();

    // SA_RESETHAND already restored the default; this keeps the guarantee
    // even if the handler was installed some other way.
    unsafe {
        let _ = signal::signal(
            Signal::try_from(signum).unwrap_or(Signal::SIGABRT),
            SigHandler::SigDfl,
        );
        libc::raise(signum);
    }
}

fn signal_name(signum: libc::c_int) -> &'static [u8] {
    match Signal::try_from(signum) {
        Ok(sig) => sig.as_str().as_bytes(),
        Err(_) => b"UNKNOWN",
    }
}

fn write_stderr(bytes: &[u8]) {
    // SAFETY: write(2) on a valid buffer; the result is ignored on purpose
    // since nothing can be done about a failed diagnostic write here.
    unsafe {
        libc::write(libc::STDERR_FILENO, bytes.as_ptr().cast(), bytes.len());
    }
}

#[cfg(any(all(target_os = "linux", target_env = "gnu"), target_os = "macos"))]
mod stacktrace {
    use std::ffi::c_void;
    use std::ptr;

    const MAX_FRAMES: usize = 64;

    extern "C" {
        fn backtrace(buffer: *mut *mut c_void, size: libc::c_int) -> libc::c_int;
        fn backtrace_symbols_fd(buffer: *const *mut c_void, size: libc::c_int, fd: libc::c_int);
    }

    pub(super) fn prime() {
        let mut frames = [ptr::null_mut::<c_void>(); 1];
        unsafe {
            backtrace(frames.as_mut_ptr(), 1);
        }
    }

    /// Frame list on fd 2 without touching the heap
    pub(super) fn write_to_stderr() {
        let mut frames = [ptr::null_mut::<c_void>(); MAX_FRAMES];
        unsafe {
            let depth = backtrace(frames.as_mut_ptr(), MAX_FRAMES as libc::c_int);
            super::write_stderr(b"\nStack trace:\n");
            backtrace_symbols_fd(frames.as_ptr(), depth, libc::STDERR_FILENO);
        }
    }
}

#[cfg(not(any(all(target_os = "linux", target_env = "gnu"), target_os = "macos")))]
mod stacktrace {
    pub(super) fn prime() {}

    pub(super) fn write_to_stderr() {
        super::write_stderr(b"\nStack trace unavailable on this platform\n");
    }
}
