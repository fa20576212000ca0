use std::env;
use std::path::Path;

use crate::error::LifecycleError;

/// Extension that marks a token as a torrent file even when it starts with `--`
pub const TORRENT_EXTENSION: &str = ".torrent";

const WEBUI_PORT_PREFIX: &str = "--webui-port=";

/// Runtime surface the process was launched for
///
/// Decides which of the mutually exclusive flag sets is accepted:
/// `--no-splash` on interactive desktops, `-d`/`--daemon` when headless.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Surface {
    Interactive,
    Headless,
}

impl Surface {
    /// Picks the surface from the environment
    ///
    /// `PEERLAUNCH_SURFACE=interactive|headless` wins; otherwise a display
    /// server (`DISPLAY` or `WAYLAND_DISPLAY`) means interactive.
    pub fn detect() -> Self {
        match env::var("PEERLAUNCH_SURFACE").ok().as_deref() {
            Some("interactive") => return Self::Interactive,
            Some("headless") => return Self::Headless,
            _ => {}
        }
        let has_display = ["DISPLAY", "WAYLAND_DISPLAY"]
            .iter()
            .any(|name| env::var_os(name).is_some_and(|value| !value.is_empty()));
        if has_display {
            Self::Interactive
        } else {
            Self::Headless
        }
    }

    /// `-v` is reserved on Windows-class targets
    pub fn supports_version_flag(self) -> bool {
        !cfg!(windows)
    }
}

/// Surface-specific part of a parsed invocation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LaunchMode {
    Interactive { suppress_splash: bool },
    Headless { daemonize: bool },
}

/// Parsed command line; built once and never mutated
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvocationRequest {
    pub show_help: bool,
    pub show_version: bool,
    pub mode: LaunchMode,
    /// Raw value of `--webui-port=`, validated by [`InvocationRequest::web_ui_port`]
    pub web_ui_port: Option<String>,
    /// Files (absolute when they exist) and URLs, in argument order
    pub torrents: Vec<String>,
    /// First unrecognised flag; parsing stopped there
    pub unknown_parameter: Option<String>,
    /// Number of arguments given, program name excluded
    pub argument_count: usize,
}

impl InvocationRequest {
    pub fn daemonize(&self) -> bool {
        matches!(self.mode, LaunchMode::Headless { daemonize: true })
    }

    pub fn suppress_splash(&self) -> bool {
        matches!(
            self.mode,
            LaunchMode::Interactive {
                suppress_splash: true
            }
        )
    }

    /// True when exactly one argument was given
    pub fn is_sole_argument(&self) -> bool {
        self.argument_count == 1
    }

    /// Validated `--webui-port` override
    ///
    /// # Returns
    /// * `Ok(None)` when no override was given
    /// * `Ok(Some(port))` for a value in 1..=65535
    ///
    /// # Errors
    /// `LifecycleError::InvalidPort` for non-numeric or out-of-range values
    pub fn web_ui_port(&self) -> Result<Option<u16>, LifecycleError> {
        let Some(raw) = self.web_ui_port.as_deref() else {
            return Ok(None);
        };
        match raw.trim().parse::<i64>() {
            Ok(port) if (1..=65535).contains(&port) => Ok(u16::try_from(port).ok()),
            _ => Err(LifecycleError::InvalidPort {
                value: raw.to_string(),
            }),
        }
    }
}

/// Returns true if `arg` should be interpreted as a flag
///
/// `--anything` unless it ends in `.torrent`, or any two-character `-x`.
pub fn is_flag(arg: &str) -> bool {
    (arg.starts_with("--") && !arg.ends_with(TORRENT_EXTENSION))
        || (arg.starts_with('-') && arg.chars().count() == 2)
}

/// Parses invocation arguments into an `InvocationRequest`
///
/// # Arguments
/// * `args` - Arguments without the program name
/// * `surface` - Decides whether `--no-splash` or `-d`/`--daemon` is known
/// * `splash_disabled` - Preference default for splash suppression
///
/// Unknown flags are recorded in `unknown_parameter` and stop parsing.
pub fn parse_args<S: AsRef<str>>(
    args: &[S],
    surface: Surface,
    splash_disabled: bool,
) -> InvocationRequest {
    let mut request = InvocationRequest {
        show_help: false,
        show_version: false,
        mode: match surface {
            Surface::Interactive => LaunchMode::Interactive {
                suppress_splash: splash_disabled,
            },
            Surface::Headless => LaunchMode::Headless { daemonize: false },
        },
        web_ui_port: None,
        torrents: Vec::new(),
        unknown_parameter: None,
        argument_count: args.len(),
    };

    for arg in args {
        let arg = arg.as_ref();

        if !is_flag(arg) {
            request.torrents.push(resolve_torrent_source(arg));
            continue;
        }

        match arg {
            "-h" | "--help" => request.show_help = true,
            "-v" | "--version" if surface.supports_version_flag() => {
                request.show_version = true
            }
            "--no-splash" if surface == Surface::Interactive => {
                request.mode = LaunchMode::Interactive {
                    suppress_splash: true,
                }
            }
            "-d" | "--daemon" if surface == Surface::Headless => {
                request.mode = LaunchMode::Headless { daemonize: true }
            }
            _ if arg.starts_with(WEBUI_PORT_PREFIX) => {
                // "--webui-port=1=2" is malformed and keeps the default
                let parts: Vec<&str> = arg.split('=').collect();
                if parts.len() == 2 {
                    request.web_ui_port = Some(parts[1].to_string());
                }
            }
            _ => {
                request.unknown_parameter = Some(arg.to_string());
                break;
            }
        }
    }

    request
}

/// Existing local files become absolute paths; anything else is kept verbatim
fn resolve_torrent_source(arg: &str) -> String {
    let path = Path::new(arg);
    if path.exists() {
        if let Ok(absolute) = std::path::absolute(path) {
            return absolute.to_string_lossy().into_owned();
        }
    }
    arg.to_string()
}

/// Builds the usage text
///
/// # Arguments
/// * `program` - Executable name as invoked
/// * `surface` - Selects the surface-specific flag
/// * `current_port` - Port shown next to `--webui-port`
pub fn usage_text(program: &str, surface: Surface, current_port: u16) -> String {
    let surface_flag = match surface {
        Surface::Interactive => "[--no-splash]",
        Surface::Headless => "[-d | --daemon]",
    };

    let mut text = String::from("Usage:\n");
    if surface.supports_version_flag() {
        text.push_str(&format!("\t{} (-v | --version)\n", program));
    }
    text.push_str(&format!("\t{} (-h | --help)\n", program));
    text.push_str(&format!(
        "\t{} [--webui-port=<port>] {} [(<filename> | <url>)...]\n",
        program, surface_flag
    ));
    text.push_str("Options:\n");
    if surface.supports_version_flag() {
        text.push_str("\t-v | --version\t\tDisplays program version\n");
    }
    text.push_str("\t-h | --help\t\tDisplays this help message\n");
    text.push_str(&format!(
        "\t--webui-port=<port>\tChanges the Web UI port (current: {})\n",
        current_port
    ));
    match surface {
        Surface::Interactive => text.push_str("\t--no-splash\t\tDisable splash screen\n"),
        Surface::Headless => text.push_str("\t-d | --daemon\t\tRun in daemon-mode (background)\n"),
    }
    text.push_str("\tfiles or urls\t\tDownloads the torrents passed by the user");
    text
}

/// Prints usage instructions to stdout
pub fn print_usage(program: &str, surface: Surface, current_port: u16) {
    println!("{}", usage_text(program, surface, current_port));
}

/// Prints `<program> <version>` to stdout
pub fn print_version() {
    println!("{} {}", crate::PROGRAM_NAME, crate::PROGRAM_VERSION);
}

/// Reports a command line problem on stderr with a hint to use `-h`
pub fn print_bad_argument(message: &str) {
    eprintln!("Bad command line: {}", message);
    eprintln!("Run application with -h option to read about command line parameters.");
}
