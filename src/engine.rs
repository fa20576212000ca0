//! Engine collaborator interface and the headless placeholder engine.
//!
//! The real torrent engine lives outside this crate. The launch sequence
//! only needs to start it with the initial sources and, on the owning
//! instance, hand it sources forwarded by later launches.

use std::io;
use std::sync::Mutex;
use std::thread;
use std::time::Duration;

use crate::logging::{log, log_with_tag};
use crate::shutdown::{is_shutdown_requested, shutdown_signal};

/// Handoff interface to the torrent engine
pub trait Engine: Send + Sync {
    /// Runs the engine with the initial torrent sources.
    ///
    /// Blocks until shutdown is requested (see [`crate::shutdown`]).
    fn start(&self, torrents: &[String]) -> io::Result<()>;

    /// Adds sources forwarded from another launch.
    ///
    /// Called from the forwarding listener thread.
    fn add_torrents(&self, torrents: &[String]);

    /// Shows the splash screen on interactive surfaces.
    fn show_splash(&self, _version: &str) {}
}

/// How often the headless engine checks the shutdown flag
const POLL_INTERVAL: Duration = Duration::from_millis(200);

/// Placeholder engine used by the binary
///
/// Queues every source it is given and idles until a Normal signal asks
/// it to stop.
#[derive(Debug, Default)]
pub struct HeadlessEngine {
    queue: Mutex<Vec<String>>,
}

impl HeadlessEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of every source queued so far
    pub fn queued(&self) -> Vec<String> {
        self.queue
            .lock()
            .map(|queue| queue.clone())
            .unwrap_or_default()
    }

    fn enqueue(&self, torrents: &[String], tag: &str) {
        if let Ok(mut queue) = self.queue.lock() {
            for torrent in torrents {
                let _ = log_with_tag(&format!("Queued torrent source {}", torrent), Some(tag));
                queue.push(torrent.clone());
            }
        }
    }
}

impl Engine for HeadlessEngine {
    fn start(&self, torrents: &[String]) -> io::Result<()> {
        let _ = log(&format!(
            "Engine started with {} initial source(s)",
            torrents.len()
        ));
        self.enqueue(torrents, "engine");

        while !is_shutdown_requested() {
            thread::sleep(POLL_INTERVAL);
        }

        match shutdown_signal() {
            Some(signum) => {
                let _ = log(&format!("Engine stopping after signal {}", signum));
            }
            None => {
                let _ = log("Engine stopping on request");
            }
        }
        Ok(())
    }

    fn add_torrents(&self, torrents: &[String]) {
        self.enqueue(torrents, "forward");
    }

    fn show_splash(&self, version: &str) {
        let _ = log(&format!("{} {}", crate::PROGRAM_NAME, version));
    }
}
