//! Detaches the process from its controlling terminal.

use thiserror::Error;

use crate::logging::log;

/// Abstraction over daemonisation strategies.
pub trait Daemonizer {
    /// Detaches the process into the background.
    ///
    /// On return the caller is running in the detached child; the original
    /// parent has already exited.
    fn daemonize(&self) -> Result<(), DaemonizeError>;
}

/// Errors surfaced by the daemonisation backend.
#[derive(Debug, Error)]
pub enum DaemonizeError {
    /// `daemon(3)` failed.
    #[error("{0}")]
    System(#[from] nix::Error),
    /// The target has no `daemon(3)`.
    #[error("daemon mode is not supported on this platform")]
    Unsupported,
}

/// Daemoniser backed by `daemon(3)`.
///
/// Keeps the working directory and redirects stdio to `/dev/null`.
#[derive(Debug, Default)]
pub struct SystemDaemonizer;

impl SystemDaemonizer {
    pub fn new() -> Self {
        Self
    }
}

impl Daemonizer for SystemDaemonizer {
    #[cfg(any(
        target_os = "linux",
        target_os = "android",
        target_os = "freebsd",
        target_os = "dragonfly",
        target_os = "netbsd",
        target_os = "openbsd"
    ))]
    fn daemonize(&self) -> Result<(), DaemonizeError> {
        let _ = log(&format!("Daemonizing, PID {} detaching", std::process::id()));
        nix::unistd::daemon(true, false)?;
        let _ = log(&format!("Detached into background, PID {}", std::process::id()));
        Ok(())
    }

    #[cfg(not(any(
        target_os = "linux",
        target_os = "android",
        target_os = "freebsd",
        target_os = "dragonfly",
        target_os = "netbsd",
        target_os = "openbsd"
    )))]
    fn daemonize(&self) -> Result<(), DaemonizeError> {
        let _ = log("Daemon mode requested but not supported on this platform");
        Err(DaemonizeError::Unsupported)
    }
}
