//! Advisory `flock(2)` locks for the small JSON files we rewrite
//! (`settings.json`, `archive-index.json`, `sessions.json`).
//!
//! The lock lives on a `<file>.lock` sentinel so the data file itself can be
//! replaced by rename while the lock is held. On platforms without `flock`
//! the lock is a no-op and only the in-process mutexes protect writers.

use std::fs::{File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};

/// Exclusive advisory lock, released on drop.
#[derive(Debug)]
pub struct FileLock {
    file: File,
}

impl FileLock {
    /// Block until the lock guarding `target` is ours.
    pub fn acquire(target: &Path) -> io::Result<Self> {
        let file = open_sentinel(target)?;
        sys::lock(&file, true)?;
        Ok(Self { file })
    }

    /// Take the lock if it is free; `Ok(None)` when another holder has it.
    #[cfg(test)]
    pub fn try_acquire(target: &Path) -> io::Result<Option<Self>> {
        let file = open_sentinel(target)?;
        if sys::lock(&file, false)? {
            Ok(Some(Self { file }))
        } else {
            Ok(None)
        }
    }
}

impl Drop for FileLock {
    fn drop(&mut self) {
        sys::unlock(&self.file);
    }
}

fn sentinel_path(target: &Path) -> PathBuf {
    let mut os = target.as_os_str().to_os_string();
    os.push(".lock");
    PathBuf::from(os)
}

fn open_sentinel(target: &Path) -> io::Result<File> {
    OpenOptions::new()
        .create(true)
        .truncate(false)
        .write(true)
        .open(sentinel_path(target))
}

#[cfg(unix)]
mod sys {
    use std::fs::File;
    use std::io;
    use std::os::unix::io::AsRawFd;

    /// Returns `Ok(false)` only for a non-blocking attempt that found the
    /// lock held.
    pub fn lock(file: &File, block: bool) -> io::Result<bool> {
        let op = if block {
            libc::LOCK_EX
        } else {
            libc::LOCK_EX | libc::LOCK_NB
        };
        // SAFETY: the descriptor is owned by `file` and valid for this call.
        let rc = unsafe { libc::flock(file.as_raw_fd(), op) };
        if rc == 0 {
            return Ok(true);
        }
        let err = io::Error::last_os_error();
        if !block && err.kind() == io::ErrorKind::WouldBlock {
            Ok(false)
        } else {
            Err(err)
        }
    }

    pub fn unlock(file: &File) {
        // SAFETY: see `lock`.
        unsafe {
            libc::flock(file.as_raw_fd(), libc::LOCK_UN);
        }
    }
}

#[cfg(not(unix))]
mod sys {
    use std::fs::File;
    use std::io;

    pub fn lock(_file: &File, _block: bool) -> io::Result<bool> {
        Ok(true)
    }

    pub fn unlock(_file: &File) {}
}
