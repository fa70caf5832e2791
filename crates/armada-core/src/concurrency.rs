use crate::CoreError;
use fs2::FileExt;
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};

/// Exclusive advisory lock serializing reconciliation of one container.
///
/// The lock file is `<lock_dir>/<ship>.<container>.lock`; it is released
/// when the guard is dropped.
pub struct ContainerLock {
    lock_file: File,
    path: PathBuf,
}

impl ContainerLock {
    pub fn path_for(lock_dir: &Path, ship: &str, container: &str) -> PathBuf {
        lock_dir.join(format!("{ship}.{container}.lock"))
    }

    fn open(lock_path: &Path) -> Result<File, CoreError> {
        if let Some(parent) = lock_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        Ok(OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(false)
            .open(lock_path)?)
    }

    /// Block until the lock is held.
    pub fn acquire(lock_dir: &Path, ship: &str, container: &str) -> Result<Self, CoreError> {
        let path = Self::path_for(lock_dir, ship, container);
        let file = Self::open(&path)?;

        file.lock_exclusive()
            .map_err(|e| CoreError::Io(std::io::Error::new(std::io::ErrorKind::WouldBlock, e)))?;
        tracing::trace!("locked {}", path.display());

        Ok(Self {
            lock_file: file,
            path,
        })
    }

    /// `None` when another process holds the lock.
    pub fn try_acquire(
        lock_dir: &Path,
        ship: &str,
        container: &str,
    ) -> Result<Option<Self>, CoreError> {
        let path = Self::path_for(lock_dir, ship, container);
        let file = Self::open(&path)?;

        match file.try_lock_exclusive() {
            Ok(()) => Ok(Some(Self {
                lock_file: file,
                path,
            })),
            Err(_) => Ok(None),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for ContainerLock {
    fn drop(&mut self) {
        let _ = self.lock_file.unlock();
    }
}

static SHUTDOWN_REQUESTED: AtomicBool = AtomicBool::new(false);

/// First Ctrl-C requests cancellation of streaming reads; a second exits.
pub fn install_signal_handler() {
    let _ = ctrlc::set_handler(move || {
        if SHUTDOWN_REQUESTED.load(Ordering::SeqCst) {
            std::process::exit(1);
        }
        SHUTDOWN_REQUESTED.store(true, Ordering::SeqCst);
        eprintln!("\ninterrupt received, stopping...");
    });
}

pub fn shutdown_requested() -> bool {
    SHUTDOWN_REQUESTED.load(Ordering::SeqCst)
}
