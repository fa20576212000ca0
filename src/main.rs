use std::env;
use std::process::ExitCode;
use std::sync::Arc;

use peerlaunch::config::{config_dir, FilePreferences, PREFERENCES_FILE};
use peerlaunch::lifecycle::terminal_attached;
use peerlaunch::{
    cli, log, set_log_file, ApplicationIdentity, HeadlessEngine, InstanceCoordinator, Lifecycle,
    LifecycleError, SignalTable, Surface, SystemDaemonizer, TerminalPrompt, UpgradeSequencer,
};

fn main() -> ExitCode {
    if let Some(log_file) = env::var_os("PEERLAUNCH_LOG_FILE").filter(|v| !v.is_empty()) {
        set_log_file(log_file);
    }

    let mut args = env::args();
    let program = args
        .next()
        .unwrap_or_else(|| peerlaunch::PROGRAM_NAME.to_string());
    let args: Vec<String> = args.collect();

    let config_dir = config_dir();
    let preferences = match FilePreferences::load(config_dir.join(PREFERENCES_FILE)) {
        Ok(preferences) => preferences,
        Err(e) => {
            eprintln!("{}", e);
            let _ = log(&format!("Failed to load preferences: {}", e));
            return ExitCode::FAILURE;
        }
    };

    let mut lifecycle = Lifecycle {
        program,
        surface: Surface::detect(),
        preferences,
        prompt: TerminalPrompt::stdio(),
        daemonizer: SystemDaemonizer::new(),
        engine: Arc::new(HeadlessEngine::new()),
        coordinator: InstanceCoordinator::new(ApplicationIdentity::for_current_user()),
        upgrades: UpgradeSequencer::builtin(),
        signals: SignalTable::standard(),
        terminal_attached: terminal_attached(),
        config_dir,
    };

    match lifecycle.run(&args) {
        Ok(outcome) => {
            let _ = log(&format!("Exiting: {:?}", outcome));
            ExitCode::SUCCESS
        }
        Err(e) => {
            report(&e);
            ExitCode::FAILURE
        }
    }
}

fn report(error: &LifecycleError) {
    if error.is_usage_error() {
        cli::print_bad_argument(&error.to_string());
    } else {
        eprintln!("{}", error);
    }
    let _ = log(&format!("Startup failed: {}", error));
}
