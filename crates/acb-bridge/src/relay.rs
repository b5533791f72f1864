//! Inter-worker pipe relay.
//!
//! Each exec worker owns a FIFO at `<state>/<name>/inbox.pipe`. Any
//! process that can write the pipe can message the worker; a dedicated
//! reader thread forwards each non-empty line into the registry's send
//! path. The open-for-read call blocks until a writer connects — that is
//! the defining behavior of a FIFO and is kept, not polled around.
//!
//! Stop protocol: set the cancel flag, poke the pipe with a non-blocking
//! dummy write to unblock the reader, then join with a bounded wait.

use crate::registry::WorkerRegistry;
use std::collections::HashMap;
use std::io::BufRead;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// How long `stop_reader` waits for the reader thread to exit.
const JOIN_TIMEOUT_MS: u64 = 2000;

/// Create a fresh FIFO at `path`, replacing whatever was there.
///
/// # Errors
///
/// Returns the I/O error if the FIFO cannot be created.
#[cfg(unix)]
pub fn create_pipe(path: &Path) -> std::io::Result<()> {
    use std::os::unix::ffi::OsStrExt;

    if path.exists() {
        std::fs::remove_file(path)?;
    }
    let c_path = std::ffi::CString::new(path.as_os_str().as_bytes())
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidInput, e))?;
    let rc = unsafe { libc::mkfifo(c_path.as_ptr(), 0o600) };
    if rc != 0 {
        return Err(std::io::Error::last_os_error());
    }
    Ok(())
}

#[cfg(not(unix))]
pub fn create_pipe(_path: &Path) -> std::io::Result<()> {
    Err(std::io::Error::new(
        std::io::ErrorKind::Unsupported,
        "named pipes require a unix host",
    ))
}

/// Write a newline into the FIFO without blocking.
///
/// Used only to unblock a reader stuck in open-for-read. Failure is fine:
/// no reader means nothing to unblock.
#[cfg(unix)]
fn poke_pipe(path: &Path) {
    use std::os::unix::ffi::OsStrExt;

    let Ok(c_path) = std::ffi::CString::new(path.as_os_str().as_bytes()) else {
        return;
    };
    unsafe {
        // O_RDWR so the open itself provides the writer end and pairs
        // with a reader still blocked in its open call; O_WRONLY would
        // fail with ENXIO in exactly that state.
        let fd = libc::open(c_path.as_ptr(), libc::O_RDWR | libc::O_NONBLOCK);
        if fd >= 0 {
            let _ = libc::write(fd, b"\n".as_ptr().cast(), 1);
            libc::close(fd);
        }
    }
}

#[cfg(not(unix))]
fn poke_pipe(_path: &Path) {}

struct ReaderHandle {
    stop: Arc<AtomicBool>,
    join: JoinHandle<()>,
    path: PathBuf,
}

/// Manager for the per-worker reader threads.
#[derive(Default)]
pub struct PipeRelay {
    readers: Mutex<HashMap<String, ReaderHandle>>,
}

impl PipeRelay {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start the reader thread for one worker. Idempotent: a live reader
    /// for the same worker makes this a no-op.
    ///
    /// Must be called from within a tokio runtime; the reader thread
    /// forwards lines back through it.
    pub fn start_reader(&self, worker: &str, path: &Path, registry: Weak<WorkerRegistry>) {
        let mut readers = self.readers.lock().unwrap_or_else(|e| e.into_inner());

        if let Some(existing) = readers.get(worker) {
            if !existing.join.is_finished() {
                debug!("pipe reader for {worker} already running");
                return;
            }
            readers.remove(worker);
        }

        let stop = Arc::new(AtomicBool::new(false));
        let handle = tokio::runtime::Handle::current();
        let join = std::thread::Builder::new()
            .name(format!("pipe-{worker}"))
            .spawn({
                let stop = stop.clone();
                let worker = worker.to_string();
                let path = path.to_path_buf();
                move || reader_loop(&worker, &path, &stop, &registry, &handle)
            });

        match join {
            Ok(join) => {
                info!("pipe reader started for {worker}");
                readers.insert(
                    worker.to_string(),
                    ReaderHandle {
                        stop,
                        join,
                        path: path.to_path_buf(),
                    },
                );
            }
            Err(e) => warn!("could not spawn pipe reader for {worker}: {e}"),
        }
    }

    /// Whether a reader thread is currently alive for this worker.
    pub fn is_running(&self, worker: &str) -> bool {
        let readers = self.readers.lock().unwrap_or_else(|e| e.into_inner());
        readers
            .get(worker)
            .is_some_and(|h| !h.join.is_finished())
    }

    /// Stop one worker's reader and wait for it, bounded.
    pub fn stop_reader(&self, worker: &str) {
        let handle = {
            let mut readers = self.readers.lock().unwrap_or_else(|e| e.into_inner());
            readers.remove(worker)
        };
        let Some(handle) = handle else {
            return;
        };

        handle.stop.store(true, Ordering::SeqCst);
        poke_pipe(&handle.path);

        let deadline = Instant::now() + Duration::from_millis(JOIN_TIMEOUT_MS);
        while !handle.join.is_finished() {
            if Instant::now() >= deadline {
                warn!("pipe reader for {worker} did not stop in time; detaching");
                return;
            }
            std::thread::sleep(Duration::from_millis(20));
        }
        let _ = handle.join.join();
        debug!("pipe reader for {worker} stopped");
    }

    /// Stop every reader. Called on shutdown.
    pub fn stop_all(&self) {
        let workers: Vec<String> = {
            let readers = self.readers.lock().unwrap_or_else(|e| e.into_inner());
            readers.keys().cloned().collect()
        };
        for worker in workers {
            self.stop_reader(&worker);
        }
    }
}

fn reader_loop(
    worker: &str,
    path: &Path,
    stop: &AtomicBool,
    registry: &Weak<WorkerRegistry>,
    handle: &tokio::runtime::Handle,
) {
    while !stop.load(Ordering::SeqCst) {
        if registry.strong_count() == 0 {
            return;
        }
        // Blocks here until some writer opens the other end.
        let file = match std::fs::File::open(path) {
            Ok(file) => file,
            Err(e) => {
                if stop.load(Ordering::SeqCst) {
                    break;
                }
                warn!("pipe open for {worker} failed: {e}");
                std::thread::sleep(Duration::from_millis(500));
                continue;
            }
        };

        for line in std::io::BufReader::new(file).lines() {
            if stop.load(Ordering::SeqCst) {
                return;
            }
            let line = match line {
                Ok(line) => line,
                Err(e) => {
                    warn!("pipe read for {worker} failed: {e}");
                    break;
                }
            };
            let text = line.trim();
            if text.is_empty() {
                continue;
            }

            let Some(registry) = registry.upgrade() else {
                return;
            };
            debug!("pipe relay for {worker}: {} chars", text.len());
            if let Err(e) = handle.block_on(registry.send(worker, text, None)) {
                warn!("pipe relay send to {worker} failed: {e}");
            }
        }
        // Writer closed; loop back and re-open for the next one.
    }
}
