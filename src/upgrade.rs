//! Versioned one-time migrations applied before the engine starts.
//!
//! Each migration carries a version number. The sequencer applies pending
//! migrations in ascending order and records the version after each one
//! succeeds, so an interrupted upgrade resumes where it stopped and a
//! finished step is never applied twice.

use std::fs;
use std::io::{self, Error, ErrorKind};
use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::config::Preferences;
use crate::logging::log;

/// One on-disk format change
pub trait Migration {
    /// Strictly positive, unique per sequencer
    fn version(&self) -> u32;
    fn name(&self) -> &str;
    fn apply(&self, context: &mut MigrationContext<'_>) -> io::Result<()>;
}

/// What a migration may touch
pub struct MigrationContext<'a> {
    pub config_dir: &'a Path,
    pub preferences: &'a mut dyn Preferences,
}

/// Errors raised while running migrations
#[derive(Debug, Error)]
pub enum UpgradeError {
    /// Two migrations share a version number.
    #[error("duplicate migration version {version}")]
    DuplicateVersion {
        /// Version declared twice.
        version: u32,
    },
    /// A migration step failed.
    #[error("migration {version} ({name}) failed: {source}")]
    Step {
        /// Version of the failing migration.
        version: u32,
        /// Name of the failing migration.
        name: String,
        /// Underlying IO error.
        #[source]
        source: io::Error,
    },
    /// Recording progress failed after a step succeeded.
    #[error("failed to record migration version {version}: {source}")]
    Record {
        /// Version that could not be recorded.
        version: u32,
        /// Underlying IO error.
        #[source]
        source: io::Error,
    },
}

/// Ordered runner for pending migrations
#[derive(Default)]
pub struct UpgradeSequencer {
    migrations: Vec<Box<dyn Migration>>,
}

impl UpgradeSequencer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sequencer with the migrations shipped in this release
    pub fn builtin() -> Self {
        Self::new().with(LegacyPreferencesImport)
    }

    pub fn with<M: Migration + 'static>(mut self, migration: M) -> Self {
        self.migrations.push(Box::new(migration));
        self
    }

    /// Applies every migration newer than the recorded version
    ///
    /// # Returns
    /// Number of migrations applied
    ///
    /// # Errors
    /// Stops at the first failing step; later steps are not attempted.
    pub fn run_pending(
        &self,
        preferences: &mut dyn Preferences,
        config_dir: &Path,
    ) -> Result<usize, UpgradeError> {
        let mut ordered: Vec<&dyn Migration> = self.migrations.iter().map(|m| m.as_ref()).collect();
        ordered.sort_by_key(|m| m.version());
        for pair in ordered.windows(2) {
            if pair[0].version() == pair[1].version() {
                return Err(UpgradeError::DuplicateVersion {
                    version: pair[0].version(),
                });
            }
        }

        let current = preferences.upgrade_version();
        let mut applied = 0;
        for migration in ordered.into_iter().filter(|m| m.version() > current) {
            let version = migration.version();
            let _ = log(&format!(
                "Applying migration {} ({})",
                version,
                migration.name()
            ));
            let mut context = MigrationContext {
                config_dir,
                preferences: &mut *preferences,
            };
            migration
                .apply(&mut context)
                .map_err(|source| UpgradeError::Step {
                    version,
                    name: migration.name().to_string(),
                    source,
                })?;
            preferences
                .set_upgrade_version(version)
                .map_err(|source| UpgradeError::Record { version, source })?;
            applied += 1;
        }

        if applied > 0 {
            let _ = log(&format!("Applied {} migration(s)", applied));
        }
        Ok(applied)
    }
}

/// Legacy `key=value` preferences file imported by migration 1
pub const LEGACY_PREFERENCES_FILE: &str = "preferences.conf";

/// Imports the pre-JSON `preferences.conf` into the preferences store
///
/// # File Format
/// One `key=value` per line; blank lines and `#` comments are skipped.
/// Known keys: `webui_port`, `splash_disabled`.
/// Unknown keys are logged and ignored. `accepted_legal` is among them:
/// migrations run after the legal notice was answered, so an imported
/// acceptance could never spare the prompt.
///
/// The legacy file is renamed to `preferences.conf.bak` afterwards.
pub struct LegacyPreferencesImport;

impl Migration for LegacyPreferencesImport {
    fn version(&self) -> u32 {
        1
    }

    fn name(&self) -> &str {
        "import legacy preferences.conf"
    }

    fn apply(&self, context: &mut MigrationContext<'_>) -> io::Result<()> {
        let legacy_path = context.config_dir.join(LEGACY_PREFERENCES_FILE);
        let content = match fs::read_to_string(&legacy_path) {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(e),
        };

        for (line_num, line) in content.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }

            let (key, value) = line.split_once('=').ok_or_else(|| {
                Error::new(
                    ErrorKind::InvalidData,
                    format!("line {} is not key=value: {}", line_num + 1, line),
                )
            })?;
            let (key, value) = (key.trim(), value.trim());

            match key {
                "webui_port" => {
                    let port = value
                        .parse::<u16>()
                        .ok()
                        .filter(|port| *port != 0)
                        .ok_or_else(|| invalid_value(line_num, key, value))?;
                    context.preferences.set_web_ui_port(port)?;
                }
                "splash_disabled" => {
                    let disabled = parse_bool(value).ok_or_else(|| invalid_value(line_num, key, value))?;
                    context.preferences.set_splash_screen_disabled(disabled)?;
                }
                _ => {
                    let _ = log(&format!(
                        "Ignoring unknown legacy preference '{}' on line {}",
                        key,
                        line_num + 1
                    ));
                }
            }
        }

        let backup = backup_path(&legacy_path);
        fs::rename(&legacy_path, &backup)?;
        let _ = log(&format!(
            "Imported {} (kept as {})",
            legacy_path.display(),
            backup.display()
        ));
        Ok(())
    }
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" => Some(true),
        "false" | "0" | "no" => Some(false),
        _ => None,
    }
}

fn invalid_value(line_num: usize, key: &str, value: &str) -> Error {
    Error::new(
        ErrorKind::InvalidData,
        format!("invalid value '{}' for {} on line {}", value, key, line_num + 1),
    )
}

fn backup_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_os_string();
    name.push(".bak");
    PathBuf::from(name)
}
