use std::fs::{File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::{Duration, Instant};

use fs2::FileExt;

/// How long a pass or checkout waits for another holder before giving up.
pub const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_secs(5 * 60);

const LOCK_FILE_NAME: &str = "docmirror.lock";

const FIRST_RETRY: Duration = Duration::from_millis(10);
const MAX_RETRY: Duration = Duration::from_millis(500);

/// Lock file path for the mirror checked out at `mirror_path`.
///
/// Lives inside `.git` so it never shows up as an untracked document.
pub fn lock_path_for(mirror_path: &Path) -> PathBuf {
    mirror_path.join(".git").join(LOCK_FILE_NAME)
}

/// Exclusive advisory lock held while HEAD or the working tree of one mirror
/// is being changed. Released on drop.
#[derive(Debug)]
pub struct MirrorLock {
    file: File,
    path: PathBuf,
}

impl MirrorLock {
    /// Wait up to [`DEFAULT_LOCK_TIMEOUT`] for the lock.
    pub fn acquire(lock_path: &Path) -> io::Result<Self> {
        Self::acquire_with_timeout(lock_path, DEFAULT_LOCK_TIMEOUT)
    }

    /// Wait up to `timeout` for the lock, retrying with exponential backoff.
    ///
    /// Fails with `ErrorKind::TimedOut` naming the lock file when another
    /// holder keeps it past the deadline.
    pub fn acquire_with_timeout(lock_path: &Path, timeout: Duration) -> io::Result<Self> {
        let deadline = Instant::now() + timeout;
        let mut file = open_lock_file(lock_path)?;
        let mut retry = FIRST_RETRY;

        loop {
            file = match Self::lock(file, lock_path)? {
                Ok(lock) => return Ok(lock),
                Err(file) => file,
            };

            let now = Instant::now();
            if now >= deadline {
                return Err(io::Error::new(
                    io::ErrorKind::TimedOut,
                    format!(
                        "{} still held after {:?}",
                        lock_path.display(),
                        timeout
                    ),
                ));
            }
            thread::sleep(retry.min(deadline - now));
            retry = (retry * 2).min(MAX_RETRY);
        }
    }

    /// Take the lock only if nobody holds it; `None` means a holder exists.
    pub fn try_acquire(lock_path: &Path) -> io::Result<Option<Self>> {
        let file = open_lock_file(lock_path)?;
        Ok(Self::lock(file, lock_path)?.ok())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// One non-blocking attempt. Hands the file back when the lock is busy.
    fn lock(file: File, lock_path: &Path) -> io::Result<Result<Self, File>> {
        match file.try_lock_exclusive() {
            Ok(()) => Ok(Ok(Self {
                file,
                path: lock_path.to_path_buf(),
            })),
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => Ok(Err(file)),
            Err(e) => Err(e),
        }
    }
}

fn open_lock_file(lock_path: &Path) -> io::Result<File> {
    if let Some(parent) = lock_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(false)
        .open(lock_path)
}

impl Drop for MirrorLock {
    fn drop(&mut self) {
        if let Err(e) = self.file.unlock() {
            log::warn!("failed to release {}: {}", self.path.display(), e);
        }
    }
}
