use std::sync::atomic::{AtomicBool, AtomicI32, Ordering};

/// Global shutdown flag (atomic bool)
///
/// Set to true when a Normal signal asks the engine to stop.
/// The engine polls this flag and winds down on its own thread.
pub static SHUTDOWN_REQUESTED: AtomicBool = AtomicBool::new(false);

/// Signal number that triggered shutdown, 0 when none
pub static SHUTDOWN_SIGNAL: AtomicI32 = AtomicI32::new(0);

/// Checks if graceful shutdown has been requested
///
/// # Returns
/// `true` once a Normal signal was caught or `request_shutdown()` was called
pub fn is_shutdown_requested() -> bool {
    SHUTDOWN_REQUESTED.load(Ordering::SeqCst)
}

/// Asks the running engine to stop
pub fn request_shutdown() {
    SHUTDOWN_REQUESTED.store(true, Ordering::SeqCst);
}

/// Request shutdown and remember which signal asked for it
///
/// Async-signal-safe: only touches atomics. Called from the Normal handler.
pub fn request_shutdown_with_signal(signum: i32) {
    SHUTDOWN_SIGNAL.store(signum, Ordering::SeqCst);
    SHUTDOWN_REQUESTED.store(true, Ordering::SeqCst);
}

/// Get the signal that triggered shutdown
///
/// # Returns
/// * `None` if shutdown was not requested by a signal
/// * `Some(signum)` otherwise
pub fn shutdown_signal() -> Option<i32> {
    match SHUTDOWN_SIGNAL.load(Ordering::SeqCst) {
        0 => None,
        signum => Some(signum),
    }
}

/// Reset the shutdown flags (for testing purposes only)
#[cfg(test)]
pub fn reset_shutdown_for_tests() {
    SHUTDOWN_REQUESTED.store(false, Ordering::SeqCst);
    SHUTDOWN_SIGNAL.store(0, Ordering::SeqCst);
}
