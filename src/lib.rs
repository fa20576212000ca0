//! Process Lifecycle Controller Library
//!
//! This library contains the launch logic for the peerlaunch client,
//! including single-instance ownership with argument forwarding,
//! the legal notice gate, versioned upgrades, daemonization,
//! signal handling, and the orchestrator that sequences them.

// Module declarations
pub mod cli;
pub mod config;
pub mod consent;
pub mod daemon;
pub mod engine;
pub mod error;
pub mod instance;
pub mod lifecycle;
pub mod logging;
pub mod shutdown;
pub mod signals;
pub mod upgrade;

// Re-export key items for easy use by the binary (main.rs)
pub use cli::{parse_args, Surface};
pub use config::{config_dir, FilePreferences, Preferences};
pub use consent::{ConsentGate, ConsentPrompt, TerminalPrompt};
pub use daemon::{Daemonizer, SystemDaemonizer};
pub use engine::{Engine, HeadlessEngine};
pub use error::LifecycleError;
pub use instance::{ApplicationIdentity, InstanceCoordinator, Ownership};
pub use lifecycle::{Lifecycle, Outcome};
pub use logging::{log, log_with_tag, set_log_file};
pub use shutdown::{is_shutdown_requested, request_shutdown};
pub use signals::SignalTable;
pub use upgrade::UpgradeSequencer;

/// Name of the program used for:
/// - Instance identity (`{PROGRAM_NAME}-{uid}`)
/// - Lock file and Unix domain socket names in the runtime directory
/// - Configuration directory name
pub const PROGRAM_NAME: &str = "peerlaunch";

/// Current version of the program (from Cargo.toml)
/// Follows semantic versioning (MAJOR.MINOR.PATCH)
pub const PROGRAM_VERSION: &str = env!("CARGO_PKG_VERSION");
