use chrono::Local;
use once_cell::sync::Lazy;
use std::fs::OpenOptions;
use std::io::{self, Write};
use std::path::Path;
use std::sync::Mutex;

/// Global log file path protected by Mutex
///
/// When None, logs go to stderr. Stdout is kept free for help and
/// version output.
pub static LOG_FILE: Lazy<Mutex<Option<String>>> = Lazy::new(|| Mutex::new(None));

/// Logs a message with timestamp to configured output
///
/// # Arguments
/// * `message` - The message to log
///
/// # Returns
/// * `io::Result<()>` - Ok on success, Err if writing fails
///
/// # Example
/// ```text
/// // log("Acquired instance lock").unwrap();
/// ```
pub fn log(message: &str) -> io::Result<()> {
    log_with_tag(message, None)
}

/// Logs a message with timestamp and optional component tag
///
/// Used by background threads (e.g. the forwarding listener) so their
/// lines can be told apart from the startup sequence.
///
/// # Arguments
/// * `message` - The message to log
/// * `tag` - Optional component tag, rendered as `[tag]`
pub fn log_with_tag(message: &str, tag: Option<&str>) -> io::Result<()> {
    let timestamp = Local::now().format("%Y-%m-%d %H:%M:%S").to_string();
    let log_message = match tag {
        Some(tag) => format!("{} [{}] {}\n", timestamp, tag, message),
        None => format!("{} {}\n", timestamp, message),
    };

    let guard = LOG_FILE
        .lock()
        .map_err(|_| io::Error::new(io::ErrorKind::Other, "log target lock poisoned"))?;
    match &*guard {
        Some(log_file) => {
            let mut file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(log_file)?;
            file.write_all(log_message.as_bytes())?;
        }
        None => {
            io::stderr().write_all(log_message.as_bytes())?;
        }
    }

    Ok(())
}

/// Sets the path for the log file
///
/// Subsequent calls to `log` append to this file.
pub fn set_log_file<P: AsRef<Path>>(path: P) {
    let path_str = path.as_ref().to_string_lossy().into_owned();
    if let Ok(mut guard) = LOG_FILE.lock() {
        *guard = Some(path_str);
    }
}

/// Returns true when logs go to a file rather than stderr
pub fn has_log_file() -> bool {
    LOG_FILE.lock().map(|guard| guard.is_some()).unwrap_or(false)
}

#[cfg(test)]
pub fn reset_log_file_for_tests() {
    if let Ok(mut guard) = LOG_FILE.lock() {
        *guard = None;
    }
}
