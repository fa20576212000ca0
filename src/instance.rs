use crate::engine::Engine;
use crate::logging::{log, log_with_tag};

use fs2::FileExt;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs::{File, OpenOptions};
use std::io::{self, BufRead, BufReader, Write};
use std::os::unix::net::{UnixListener, UnixStream};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

/// Attempts made to reach an owner that holds the lock but has not bound yet
const CONNECT_ATTEMPTS: u32 = 10;
const CONNECT_RETRY_DELAY: Duration = Duration::from_millis(50);
/// Upper bound on waiting for the owner's acknowledgement
const ACK_TIMEOUT: Duration = Duration::from_secs(5);
/// Upper bound on waiting for a connected launch to send its request
const REQUEST_TIMEOUT: Duration = Duration::from_secs(1);
const ACK: &str = "OK";

/// Stable per-user key naming "the one instance" of the application
///
/// Used both for the lock file and the forwarding socket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApplicationIdentity(String);

impl ApplicationIdentity {
    /// `<program>-<uid>` for the calling user
    pub fn for_current_user() -> Self {
        let uid = unsafe { libc::getuid() };
        Self::new(format!("{}-{}", crate::PROGRAM_NAME, uid))
    }

    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ApplicationIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Lock and socket paths for one identity
#[derive(Debug, Clone)]
pub struct InstancePaths {
    lock_path: PathBuf,
    socket_path: PathBuf,
}

impl InstancePaths {
    /// Paths under `dir`: `<identity>.lock` and `<identity>.sock`
    pub fn in_dir<P: AsRef<Path>>(dir: P, identity: &ApplicationIdentity) -> Self {
        let dir = dir.as_ref();
        Self {
            lock_path: dir.join(format!("{}.lock", identity)),
            socket_path: dir.join(format!("{}.sock", identity)),
        }
    }

    pub fn lock_path(&self) -> &Path {
        &self.lock_path
    }

    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }
}

/// Payload sent from a new launch to the owning instance
#[derive(Debug, Serialize, Deserialize, PartialEq)]
struct ForwardedTorrents {
    torrents: Vec<String>,
}

/// Outcome of an ownership attempt
#[derive(Debug)]
pub enum Ownership {
    /// This process is now the sole live instance
    Owner(InstanceGuard),
    /// Another live process holds the identity
    AlreadyRunning,
}

/// Decides whether this process owns its identity and talks to the owner if not
#[derive(Debug, Clone)]
pub struct InstanceCoordinator {
    identity: ApplicationIdentity,
    paths: InstancePaths,
}

impl InstanceCoordinator {
    /// Coordinator using the per-user runtime directory
    pub fn new(identity: ApplicationIdentity) -> Self {
        let paths = InstancePaths::in_dir(crate::config::runtime_dir(), &identity);
        Self { identity, paths }
    }

    pub fn with_paths(identity: ApplicationIdentity, paths: InstancePaths) -> Self {
        Self { identity, paths }
    }

    pub fn identity(&self) -> &ApplicationIdentity {
        &self.identity
    }

    pub fn paths(&self) -> &InstancePaths {
        &self.paths
    }

    /// Tries to become the owner of the identity
    ///
    /// # Behavior
    /// - Takes an exclusive flock() on the lock file; the kernel drops it
    ///   when the process dies, so a crashed owner never blocks later launches
    /// - Writes our PID into the lock file
    /// - Replaces any stale socket and binds the forwarding socket
    ///
    /// # Race Condition Protection
    /// flock() is atomic: of two processes calling this at the same instant
    /// exactly one gets `Owner`.
    ///
    /// # Errors
    /// Lock file cannot be opened or the socket cannot be bound.
    pub fn try_become_owner(&self) -> io::Result<Ownership> {
        let lock_path = self.paths.lock_path();
        if let Some(parent) = lock_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        // Open WITHOUT truncate; the file is truncated only once we hold the lock.
        let mut lock_file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(lock_path)
            .map_err(|e| {
                io::Error::new(
                    e.kind(),
                    format!("Failed to open lock file {}: {}", lock_path.display(), e),
                )
            })?;

        if let Err(e) = lock_file.try_lock_exclusive() {
            if e.kind() == io::ErrorKind::WouldBlock
                || e.raw_os_error() == fs2::lock_contended_error().raw_os_error()
            {
                let _ = log(&format!(
                    "{} is already running for this user (lock {} is held)",
                    self.identity,
                    lock_path.display()
                ));
                return Ok(Ownership::AlreadyRunning);
            }
            return Err(io::Error::new(
                e.kind(),
                format!("Failed to lock {}: {}", lock_path.display(), e),
            ));
        }

        lock_file.set_len(0).map_err(|e| {
            io::Error::new(
                e.kind(),
                format!("Failed to truncate lock file {}: {}", lock_path.display(), e),
            )
        })?;
        lock_file
            .write_all(std::process::id().to_string().as_bytes())
            .map_err(|e| {
                io::Error::new(
                    e.kind(),
                    format!("Failed to write PID to {}: {}", lock_path.display(), e),
                )
            })?;
        let _ = log(&format!(
            "Acquired exclusive lock on {}, PID {}",
            lock_path.display(),
            std::process::id()
        ));

        // Whoever held the lock before us is gone; its socket is stale.
        let socket_path = self.paths.socket_path().to_path_buf();
        let _ = std::fs::remove_file(&socket_path);
        let listener = UnixListener::bind(&socket_path).map_err(|e| {
            io::Error::new(
                e.kind(),
                format!("Failed to bind socket {}: {}", socket_path.display(), e),
            )
        })?;
        let _ = log(&format!("Created socket file: {}", socket_path.display()));

        Ok(Ownership::Owner(InstanceGuard {
            _lock: lock_file,
            socket_path,
            listener: Some(listener),
            stopping: Arc::new(AtomicBool::new(false)),
        }))
    }

    /// Hands `torrents` to the running owner
    ///
    /// Retries the connection briefly in case the owner holds the lock but
    /// has not bound its socket yet, then waits for the owner's `OK`.
    ///
    /// # Errors
    /// Owner unreachable, or it did not acknowledge. Callers treat this as
    /// non-fatal.
    pub fn forward(&self, torrents: &[String]) -> io::Result<()> {
        let socket_path = self.paths.socket_path();
        let mut stream = connect_with_retry(socket_path)?;

        let message = ForwardedTorrents {
            torrents: torrents.to_vec(),
        };
        let mut payload = serde_json::to_vec(&message)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
        payload.push(b'\n');
        stream.write_all(&payload)?;
        stream.flush()?;

        stream.set_read_timeout(Some(ACK_TIMEOUT))?;
        let mut reply = String::new();
        BufReader::new(&stream).read_line(&mut reply)?;
        if reply.trim() != ACK {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("Running instance did not acknowledge, replied {:?}", reply.trim()),
            ));
        }

        let _ = log(&format!(
            "Forwarded {} torrent source(s) to running instance via {}",
            torrents.len(),
            socket_path.display()
        ));
        Ok(())
    }
}

fn connect_with_retry(socket_path: &Path) -> io::Result<UnixStream> {
    let mut attempt = 1;
    loop {
        match UnixStream::connect(socket_path) {
            Ok(stream) => return Ok(stream),
            Err(e) if attempt < CONNECT_ATTEMPTS => {
                let _ = log(&format!(
                    "Running instance not reachable yet on {} ({}), retrying",
                    socket_path.display(),
                    e
                ));
                attempt += 1;
                thread::sleep(CONNECT_RETRY_DELAY);
            }
            Err(e) => {
                return Err(io::Error::new(
                    e.kind(),
                    format!(
                        "Failed to connect to running instance on {}: {}",
                        socket_path.display(),
                        e
                    ),
                ))
            }
        }
    }
}

/// Held by the owning process; ownership ends when it is dropped
///
/// The lock file itself is never deleted: removing it while another
/// launch has it open would let two processes lock different inodes.
#[derive(Debug)]
pub struct InstanceGuard {
    _lock: File,
    socket_path: PathBuf,
    listener: Option<UnixListener>,
    stopping: Arc<AtomicBool>,
}

impl InstanceGuard {
    /// Starts the forwarding listener thread
    ///
    /// Every forwarded list is passed to `engine.add_torrents` exactly once.
    /// Launches that connected before this call wait in the socket backlog.
    pub fn serve(&mut self, engine: Arc<dyn Engine>) -> io::Result<()> {
        let listener = self.listener.take().ok_or_else(|| {
            io::Error::new(io::ErrorKind::Other, "forwarding listener already started")
        })?;
        let stopping = Arc::clone(&self.stopping);

        thread::Builder::new()
            .name("forward-listener".to_string())
            .spawn(move || {
                for stream in listener.incoming() {
                    if stopping.load(Ordering::SeqCst) {
                        break;
                    }
                    match stream {
                        Ok(stream) => {
                            if let Err(e) = handle_forward(stream, engine.as_ref()) {
                                let _ = log_with_tag(
                                    &format!("Dropped forwarded request: {}", e),
                                    Some("forward"),
                                );
                            }
                        }
                        Err(e) => {
                            let _ = log_with_tag(
                                &format!("Error accepting incoming connection on socket: {}", e),
                                Some("forward"),
                            );
                        }
                    }
                }
                let _ = log_with_tag("Socket listener thread exiting.", Some("forward"));
            })?;
        Ok(())
    }
}

fn handle_forward(stream: UnixStream, engine: &dyn Engine) -> io::Result<()> {
    // A stalled client must not hold up the launches queued behind it.
    stream.set_read_timeout(Some(REQUEST_TIMEOUT))?;
    let mut reader = BufReader::new(&stream);
    let mut line = String::new();
    if reader.read_line(&mut line)? == 0 {
        // wake-up connection from Drop, or a client that gave up
        return Ok(());
    }
    let message: ForwardedTorrents = serde_json::from_str(line.trim_end())
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;

    if message.torrents.is_empty() {
        let _ = log_with_tag("Received activation request from new launch", Some("forward"));
    } else {
        let _ = log_with_tag(
            &format!(
                "Received {} torrent source(s) from new launch",
                message.torrents.len()
            ),
            Some("forward"),
        );
        engine.add_torrents(&message.torrents);
    }

    let mut writer = &stream;
    writer.write_all(format!("{}\n", ACK).as_bytes())?;
    writer.flush()
}

impl Drop for InstanceGuard {
    fn drop(&mut self) {
        self.stopping.store(true, Ordering::SeqCst);
        if self.listener.is_none() {
            // Unblock the listener thread parked in accept()
            let _ = UnixStream::connect(&self.socket_path);
        }
        if let Err(e) = std::fs::remove_file(&self.socket_path) {
            if e.kind() != io::ErrorKind::NotFound {
                let _ = log(&format!(
                    "Failed to remove socket file {}: {}",
                    self.socket_path.display(),
                    e
                ));
            }
        }
        let _ = log("Released instance ownership");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::sync::Mutex;
    use std::time::Instant;
    use tempfile::tempdir;

    #[derive(Default)]
    struct RecordingEngine {
        added: Mutex<Vec<Vec<String>>>,
    }

    impl Engine for RecordingEngine {
        fn start(&self, _torrents: &[String]) -> io::Result<()> {
            Ok(())
        }

        fn add_torrents(&self, torrents: &[String]) {
            self.added.lock().unwrap().push(torrents.to_vec());
        }
    }

    fn coordinator(dir: &Path) -> InstanceCoordinator {
        let identity = ApplicationIdentity::new("peerlaunch-test");
        let paths = InstancePaths::in_dir(dir, &identity);
        InstanceCoordinator::with_paths(identity, paths)
    }

    fn wait_for<F: Fn() -> bool>(condition: F) -> bool {
        let deadline = Instant::now() + Duration::from_secs(2);
        while Instant::now() < deadline {
            if condition() {
                return true;
            }
            thread::sleep(Duration::from_millis(20));
        }
        condition()
    }

    #[test]
    #[serial]
    fn test_paths_with_xdg_runtime_dir() {
        temp_env::with_var("XDG_RUNTIME_DIR", Some("/run/user/1000"), || {
            let coordinator = InstanceCoordinator::new(ApplicationIdentity::new("peerlaunch-1000"));
            assert_eq!(
                coordinator.paths().lock_path(),
                Path::new("/run/user/1000/peerlaunch-1000.lock")
            );
            assert_eq!(
                coordinator.paths().socket_path(),
                Path::new("/run/user/1000/peerlaunch-1000.sock")
            );
        });
    }

    #[test]
    fn test_identity_includes_uid() {
        let uid = unsafe { libc::getuid() };
        let identity = ApplicationIdentity::for_current_user();
        assert_eq!(identity.as_str(), format!("peerlaunch-{}", uid));
    }

    #[test]
    fn test_second_attempt_sees_running_owner() {
        let dir = tempdir().unwrap();
        let first = coordinator(dir.path());
        let second = coordinator(dir.path());

        let guard = match first.try_become_owner().unwrap() {
            Ownership::Owner(guard) => guard,
            Ownership::AlreadyRunning => panic!("first attempt must own"),
        };
        assert!(matches!(
            second.try_become_owner().unwrap(),
            Ownership::AlreadyRunning
        ));

        let pid = std::fs::read_to_string(first.paths().lock_path()).unwrap();
        assert_eq!(pid, std::process::id().to_string());

        drop(guard);
        assert!(matches!(
            second.try_become_owner().unwrap(),
            Ownership::Owner(_)
        ));
    }

    #[test]
    fn test_concurrent_attempts_yield_one_owner() {
        let dir = tempdir().unwrap();
        let path = dir.path().to_path_buf();

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let path = path.clone();
                thread::spawn(move || coordinator(&path).try_become_owner().unwrap())
            })
            .collect();
        let results: Vec<Ownership> = handles.into_iter().map(|h| h.join().unwrap()).collect();

        let owners = results
            .iter()
            .filter(|o| matches!(o, Ownership::Owner(_)))
            .count();
        assert_eq!(owners, 1);
    }

    #[test]
    fn test_forward_delivers_exactly_once() {
        let dir = tempdir().unwrap();
        let owner = coordinator(dir.path());
        let engine = Arc::new(RecordingEngine::default());

        let mut guard = match owner.try_become_owner().unwrap() {
            Ownership::Owner(guard) => guard,
            Ownership::AlreadyRunning => panic!("expected ownership"),
        };
        guard.serve(engine.clone()).unwrap();

        let launcher = coordinator(dir.path());
        assert!(matches!(
            launcher.try_become_owner().unwrap(),
            Ownership::AlreadyRunning
        ));
        launcher.forward(&["magnet:?xt=abc".to_string()]).unwrap();

        assert!(wait_for(|| !engine.added.lock().unwrap().is_empty()));
        thread::sleep(Duration::from_millis(100));
        assert_eq!(
            *engine.added.lock().unwrap(),
            vec![vec!["magnet:?xt=abc".to_string()]]
        );
    }

    #[test]
    fn test_forward_before_serve_is_queued() {
        let dir = tempdir().unwrap();
        let owner = coordinator(dir.path());
        let engine = Arc::new(RecordingEngine::default());
        let mut guard = match owner.try_become_owner().unwrap() {
            Ownership::Owner(guard) => guard,
            Ownership::AlreadyRunning => panic!("expected ownership"),
        };

        let launcher = coordinator(dir.path());
        let sender = thread::spawn(move || launcher.forward(&["late.torrent".to_string()]));
        thread::sleep(Duration::from_millis(100));
        guard.serve(engine.clone()).unwrap();

        sender.join().unwrap().unwrap();
        assert_eq!(
            *engine.added.lock().unwrap(),
            vec![vec!["late.torrent".to_string()]]
        );
    }

    #[test]
    fn test_stalled_client_does_not_block_later_forwards() {
        let dir = tempdir().unwrap();
        let owner = coordinator(dir.path());
        let engine = Arc::new(RecordingEngine::default());
        let mut guard = match owner.try_become_owner().unwrap() {
            Ownership::Owner(guard) => guard,
            Ownership::AlreadyRunning => panic!("expected ownership"),
        };
        guard.serve(engine.clone()).unwrap();

        // Connects and never writes.
        let _stalled = UnixStream::connect(owner.paths().socket_path()).unwrap();
        thread::sleep(Duration::from_millis(50));

        let started = Instant::now();
        coordinator(dir.path())
            .forward(&["after-stall.torrent".to_string()])
            .unwrap();
        assert!(started.elapsed() < ACK_TIMEOUT);
        assert_eq!(
            *engine.added.lock().unwrap(),
            vec![vec!["after-stall.torrent".to_string()]]
        );
    }

    #[test]
    fn test_empty_forward_does_not_add() {
        let dir = tempdir().unwrap();
        let owner = coordinator(dir.path());
        let engine = Arc::new(RecordingEngine::default());
        let mut guard = match owner.try_become_owner().unwrap() {
            Ownership::Owner(guard) => guard,
            Ownership::AlreadyRunning => panic!("expected ownership"),
        };
        guard.serve(engine.clone()).unwrap();

        coordinator(dir.path()).forward(&[]).unwrap();
        assert!(engine.added.lock().unwrap().is_empty());
    }

    #[test]
    fn test_forward_without_owner_fails() {
        let dir = tempdir().unwrap();
        let err = coordinator(dir.path())
            .forward(&["x".to_string()])
            .unwrap_err();
        assert!(err.to_string().contains("Failed to connect"));
    }

    #[test]
    fn test_stale_socket_is_replaced() {
        let dir = tempdir().unwrap();
        let coordinator = coordinator(dir.path());
        std::fs::write(coordinator.paths().socket_path(), b"stale").unwrap();

        let guard = coordinator.try_become_owner().unwrap();
        assert!(matches!(guard, Ownership::Owner(_)));
        drop(guard);
        assert!(!coordinator.paths().socket_path().exists());
        assert!(coordinator.paths().lock_path().exists());
    }
}
