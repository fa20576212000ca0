use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::io::{self, Error, ErrorKind, Write};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;

/// Name of the JSON preferences file inside the config directory
pub const PREFERENCES_FILE: &str = "preferences.json";

/// Web UI port used when nothing has been stored yet
pub const DEFAULT_WEB_UI_PORT: u16 = 8080;

/// Preferences collaborator consumed by the launch sequence
///
/// The lifecycle core only reads and writes these values; it never touches
/// the storage format directly.
pub trait Preferences {
    fn web_ui_port(&self) -> u16;
    fn set_web_ui_port(&mut self, port: u16) -> io::Result<()>;
    /// Whether the legal notice was accepted on an earlier launch
    fn accepted_legal(&self) -> bool;
    fn set_accepted_legal(&mut self, accepted: bool) -> io::Result<()>;
    fn is_splash_screen_disabled(&self) -> bool;
    fn set_splash_screen_disabled(&mut self, disabled: bool) -> io::Result<()>;
    /// Highest migration version already applied
    fn upgrade_version(&self) -> u32;
    fn set_upgrade_version(&mut self, version: u32) -> io::Result<()>;
}

/// On-disk shape of the preferences file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoredPreferences {
    pub web_ui_port: u16,
    pub accepted_legal: bool,
    pub splash_disabled: bool,
    pub upgrade_version: u32,
}

impl Default for StoredPreferences {
    fn default() -> Self {
        Self {
            web_ui_port: DEFAULT_WEB_UI_PORT,
            accepted_legal: false,
            splash_disabled: false,
            upgrade_version: 0,
        }
    }
}

/// JSON file-backed preferences store
///
/// Every setter persists immediately with an atomic replace, so a crash
/// between two launches never leaves a half-written file behind.
#[derive(Debug)]
pub struct FilePreferences {
    path: PathBuf,
    values: StoredPreferences,
}

impl FilePreferences {
    /// Loads preferences from `path`
    ///
    /// # Errors
    /// - File exists but is unreadable
    /// - File is not valid JSON
    ///
    /// A missing file yields defaults.
    pub fn load<P: AsRef<Path>>(path: P) -> io::Result<Self> {
        let path = path.as_ref().to_path_buf();
        let values = match fs::read_to_string(&path) {
            Ok(content) if content.trim().is_empty() => StoredPreferences::default(),
            Ok(content) => serde_json::from_str(&content).map_err(|e| {
                Error::new(
                    ErrorKind::InvalidData,
                    format!("invalid preferences file {}: {}", path.display(), e),
                )
            })?,
            Err(e) if e.kind() == ErrorKind::NotFound => StoredPreferences::default(),
            Err(e) => {
                return Err(Error::new(
                    e.kind(),
                    format!("failed to read preferences file {}: {}", path.display(), e),
                ))
            }
        };
        Ok(Self { path, values })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn values(&self) -> &StoredPreferences {
        &self.values
    }

    fn save(&self) -> io::Result<()> {
        let mut body = serde_json::to_vec_pretty(&self.values)
            .map_err(|e| Error::new(ErrorKind::InvalidData, e))?;
        body.push(b'\n');
        atomic_write(&self.path, &body).map_err(|e| {
            Error::new(
                e.kind(),
                format!("failed to write preferences file {}: {}", self.path.display(), e),
            )
        })
    }
}

impl Preferences for FilePreferences {
    fn web_ui_port(&self) -> u16 {
        self.values.web_ui_port
    }

    fn set_web_ui_port(&mut self, port: u16) -> io::Result<()> {
        self.values.web_ui_port = port;
        self.save()
    }

    fn accepted_legal(&self) -> bool {
        self.values.accepted_legal
    }

    fn set_accepted_legal(&mut self, accepted: bool) -> io::Result<()> {
        self.values.accepted_legal = accepted;
        self.save()
    }

    fn is_splash_screen_disabled(&self) -> bool {
        self.values.splash_disabled
    }

    fn set_splash_screen_disabled(&mut self, disabled: bool) -> io::Result<()> {
        self.values.splash_disabled = disabled;
        self.save()
    }

    fn upgrade_version(&self) -> u32 {
        self.values.upgrade_version
    }

    fn set_upgrade_version(&mut self, version: u32) -> io::Result<()> {
        self.values.upgrade_version = version;
        self.save()
    }
}

/// Writes `contents` to `path` via a temp file in the same directory
///
/// Data is fsync'd before the rename so readers never see a partial file.
fn atomic_write(path: &Path, contents: &[u8]) -> io::Result<()> {
    let directory = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    fs::create_dir_all(directory)?;

    let mut file = NamedTempFile::new_in(directory)?;
    file.write_all(contents)?;
    file.as_file().sync_all()?;
    file.persist(path).map_err(|e| e.error)?;
    Ok(())
}

/// Returns the per-user configuration directory
///
/// Priority order:
/// 1. $PEERLAUNCH_CONFIG_DIR
/// 2. $XDG_CONFIG_HOME/peerlaunch
/// 3. $HOME/.config/peerlaunch
/// 4. ./.peerlaunch
pub fn config_dir() -> PathBuf {
    if let Some(dir) = non_empty_var("PEERLAUNCH_CONFIG_DIR") {
        return PathBuf::from(dir);
    }
    if let Some(dir) = non_empty_var("XDG_CONFIG_HOME") {
        return PathBuf::from(dir).join(crate::PROGRAM_NAME);
    }
    if let Some(home) = non_empty_var("HOME") {
        return PathBuf::from(home).join(".config").join(crate::PROGRAM_NAME);
    }
    PathBuf::from(format!(".{}", crate::PROGRAM_NAME))
}

/// Returns the user-specific runtime directory for lock and socket files
///
/// $XDG_RUNTIME_DIR if set (e.g. /run/user/1000/), /tmp otherwise.
pub fn runtime_dir() -> PathBuf {
    non_empty_var("XDG_RUNTIME_DIR")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("/tmp"))
}

fn non_empty_var(name: &str) -> Option<String> {
    env::var(name).ok().filter(|value| !value.is_empty())
}
