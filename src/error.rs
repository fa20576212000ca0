//! Error surface for the launch sequence.

use std::io;

use thiserror::Error;

use crate::daemon::DaemonizeError;
use crate::upgrade::UpgradeError;

/// Errors that end the launch sequence with a failure exit status.
#[derive(Debug, Error)]
pub enum LifecycleError {
    /// An argument looked like a flag but is not one we know.
    #[error("{parameter} is an unknown command line parameter.")]
    UnknownParameter {
        /// The offending token, verbatim.
        parameter: String,
    },
    /// `-h` or `-v` was combined with other arguments.
    #[error("{flag} must be the single command line parameter.")]
    NotSoleArgument {
        /// Human-readable flag spelling, e.g. `-h (or --help)`.
        flag: &'static str,
    },
    /// `--webui-port` was not a number in 1..=65535.
    #[error("--webui-port must specify the correct port (1 to 65535), got '{value}'.")]
    InvalidPort {
        /// Raw value given after `=`.
        value: String,
    },
    /// Daemon mode was requested while another instance owns the identity.
    #[error("You cannot use -d (or --daemon): {program} is already running for this user.")]
    DaemonAlreadyRunning {
        /// Program name shown to the user.
        program: &'static str,
    },
    /// Reading or writing preferences failed.
    #[error("failed to access preferences: {source}")]
    Preferences {
        /// Underlying IO error.
        #[source]
        source: io::Error,
    },
    /// The legal notice could not be shown or answered.
    #[error("failed to read legal notice answer: {source}")]
    Consent {
        /// Underlying IO error.
        #[source]
        source: io::Error,
    },
    /// Acquiring instance ownership failed for a reason other than contention.
    #[error("failed to check for a running instance: {source}")]
    Instance {
        /// Underlying IO error.
        #[source]
        source: io::Error,
    },
    /// A data migration failed; the engine was not started.
    #[error("upgrade failed: {source}")]
    Migration {
        /// Underlying migration error.
        #[source]
        source: UpgradeError,
    },
    /// Detaching from the terminal failed.
    #[error("something went wrong while daemonizing: {source}")]
    Daemonize {
        /// Underlying daemonisation error.
        #[source]
        source: DaemonizeError,
    },
    /// Another instance took ownership while this process was detaching.
    #[error("another instance started while daemonizing; exiting")]
    DaemonizeRaceLost,
    /// Installing signal handlers failed.
    #[error("failed to install signal handlers: {source}")]
    Signals {
        /// Underlying OS error.
        #[source]
        source: nix::Error,
    },
    /// The engine could not be started or stopped abnormally.
    #[error("engine failed: {source}")]
    Engine {
        /// Underlying IO error.
        #[source]
        source: io::Error,
    },
}

impl LifecycleError {
    /// True for errors caused by the command line itself.
    ///
    /// These are reported with the "Bad command line" banner and a hint to
    /// run with `-h`.
    pub fn is_usage_error(&self) -> bool {
        matches!(
            self,
            Self::UnknownParameter { .. }
                | Self::NotSoleArgument { .. }
                | Self::InvalidPort { .. }
                | Self::DaemonAlreadyRunning { .. }
        )
    }
}

impl From<UpgradeError> for LifecycleError {
    fn from(source: UpgradeError) -> Self {
        Self::Migration { source }
    }
}

impl From<DaemonizeError> for LifecycleError {
    fn from(source: DaemonizeError) -> Self {
        Self::Daemonize { source }
    }
}
