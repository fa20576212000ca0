//! Launch sequencing from argument parsing to the running engine.
//!
//! ```text
//! ParseArgs -> CheckSingleton -> Consent -> RunMigrations
//!           -> [Daemonize -> ReacquireSingleton] -> InstallSignalHandlers -> StartEngine
//! ```
//!
//! Each step starts only after the previous one succeeded. Early exits are
//! reported as an [`Outcome`]; failures as a [`LifecycleError`].

use std::env;
use std::io::{self, IsTerminal};
use std::path::PathBuf;
use std::sync::Arc;

use crate::cli::{self, InvocationRequest, Surface};
use crate::config::Preferences;
use crate::consent::{ConsentGate, ConsentPrompt};
use crate::daemon::Daemonizer;
use crate::engine::Engine;
use crate::error::LifecycleError;
use crate::instance::{InstanceCoordinator, InstanceGuard, Ownership};
use crate::logging::{has_log_file, log, set_log_file};
use crate::signals::{self, SignalTable};
use crate::upgrade::UpgradeSequencer;

/// Environment variable exported so child processes can detect the host
pub const VERSION_ENV_VAR: &str = "PEERLAUNCH";

/// Log file used after detaching when none was configured
pub const DAEMON_LOG_FILE: &str = "peerlaunch.log";

/// How a launch ended without error
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    HelpShown,
    VersionShown,
    /// Sources were handed to the running instance
    Forwarded,
    /// Legal notice was declined; engine never started
    Declined,
    /// Engine ran and returned after shutdown
    Finished,
}

/// Collaborators needed to run the launch sequence
pub struct Lifecycle<P, C, D> {
    pub program: String,
    pub surface: Surface,
    pub preferences: P,
    pub prompt: C,
    pub daemonizer: D,
    pub engine: Arc<dyn Engine>,
    pub coordinator: InstanceCoordinator,
    pub upgrades: UpgradeSequencer,
    pub signals: SignalTable,
    /// Both stdin and stdout are terminals
    pub terminal_attached: bool,
    pub config_dir: PathBuf,
}

/// Whether stdin and stdout are both attached to a terminal
pub fn terminal_attached() -> bool {
    io::stdin().is_terminal() && io::stdout().is_terminal()
}

impl<P, C, D> Lifecycle<P, C, D>
where
    P: Preferences,
    C: ConsentPrompt,
    D: Daemonizer,
{
    /// Runs the whole launch sequence for `args` (program name excluded)
    pub fn run<S: AsRef<str>>(&mut self, args: &[S]) -> Result<Outcome, LifecycleError> {
        let request = cli::parse_args(
            args,
            self.surface,
            self.preferences.is_splash_screen_disabled(),
        );

        if let Some(early) = self.validate(&request)? {
            return Ok(early);
        }

        env::set_var(VERSION_ENV_VAR, crate::PROGRAM_VERSION);

        let mut guard = match self.check_singleton(&request)? {
            Some(guard) => guard,
            None => return Ok(Outcome::Forwarded),
        };

        if !self.consent(&request)? {
            return Ok(Outcome::Declined);
        }

        self.upgrades
            .run_pending(&mut self.preferences, &self.config_dir)?;

        if request.daemonize() {
            guard = self.daemonize(guard)?;
        } else if matches!(self.surface, Surface::Interactive) && !request.suppress_splash() {
            self.engine.show_splash(crate::PROGRAM_VERSION);
        }

        signals::install(&self.signals).map_err(|source| LifecycleError::Signals { source })?;

        guard
            .serve(Arc::clone(&self.engine))
            .map_err(|source| LifecycleError::Instance { source })?;
        let _ = log(&format!(
            "Starting engine with {} torrent source(s)",
            request.torrents.len()
        ));
        self.engine
            .start(&request.torrents)
            .map_err(|source| LifecycleError::Engine { source })?;

        drop(guard);
        Ok(Outcome::Finished)
    }

    /// Handles unknown flags, help, version and the port override
    fn validate(&mut self, request: &InvocationRequest) -> Result<Option<Outcome>, LifecycleError> {
        if let Some(parameter) = &request.unknown_parameter {
            return Err(LifecycleError::UnknownParameter {
                parameter: parameter.clone(),
            });
        }

        if request.show_version {
            if !request.is_sole_argument() {
                return Err(LifecycleError::NotSoleArgument {
                    flag: "-v (or --version)",
                });
            }
            cli::print_version();
            return Ok(Some(Outcome::VersionShown));
        }

        if request.show_help {
            if !request.is_sole_argument() {
                return Err(LifecycleError::NotSoleArgument {
                    flag: "-h (or --help)",
                });
            }
            cli::print_usage(&self.program, self.surface, self.preferences.web_ui_port());
            return Ok(Some(Outcome::HelpShown));
        }

        if let Some(port) = request.web_ui_port()? {
            self.preferences
                .set_web_ui_port(port)
                .map_err(|source| LifecycleError::Preferences { source })?;
        }
        Ok(None)
    }

    /// Becomes the owner, or forwards to the one already running
    ///
    /// Returns `None` when the sources were forwarded and this launch is done.
    fn check_singleton(
        &self,
        request: &InvocationRequest,
    ) -> Result<Option<InstanceGuard>, LifecycleError> {
        match self
            .coordinator
            .try_become_owner()
            .map_err(|source| LifecycleError::Instance { source })?
        {
            Ownership::Owner(guard) => Ok(Some(guard)),
            Ownership::AlreadyRunning if request.daemonize() => {
                Err(LifecycleError::DaemonAlreadyRunning {
                    program: crate::PROGRAM_NAME,
                })
            }
            Ownership::AlreadyRunning => {
                if let Err(e) = self.coordinator.forward(&request.torrents) {
                    let _ = log(&format!(
                        "Failed to forward torrent sources to running instance: {}",
                        e
                    ));
                }
                Ok(None)
            }
        }
    }

    fn consent(&mut self, request: &InvocationRequest) -> Result<bool, LifecycleError> {
        // The prompt reads stdin; without a terminal nobody can answer it.
        let interactive = self.terminal_attached
            && match self.surface {
                Surface::Interactive => true,
                Surface::Headless => !request.daemonize(),
            };
        ConsentGate::new(&mut self.preferences)
            .check(&mut self.prompt, interactive)
            .map_err(|source| LifecycleError::Consent { source })
    }

    /// Detaches and takes ownership again in the detached process
    ///
    /// Ownership is released before detaching; another launch that grabs it
    /// in that window wins and this process fails.
    fn daemonize(&self, guard: InstanceGuard) -> Result<InstanceGuard, LifecycleError> {
        if !has_log_file() {
            set_log_file(self.config_dir.join(DAEMON_LOG_FILE));
        }
        drop(guard);

        self.daemonizer.daemonize()?;

        match self
            .coordinator
            .try_become_owner()
            .map_err(|source| LifecycleError::Instance { source })?
        {
            Ownership::Owner(guard) => Ok(guard),
            Ownership::AlreadyRunning => {
                let _ = log("Another instance had time to start while daemonizing");
                Err(LifecycleError::DaemonizeRaceLost)
            }
        }
    }
}
