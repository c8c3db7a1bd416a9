use std::fs::{self, File, OpenOptions};
use std::io::{self, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use crate::error::{Result, StackError};

/// An exclusive-create lock file, held via `O_EXCL` rather than advisory
/// `flock`, so contention is visible across processes and even across
/// filesystems that don't support advisory locking (e.g. some network
/// mounts). Acquiring while another writer holds the same path returns
/// [`StackError::LockContention`] immediately; the caller is expected to
/// retry or surface the contention to its own caller.
///
/// Dropping an unconsumed lock removes the lock file, so a panicking or
/// early-returning writer never leaves one behind. `rename_onto` and
/// `release` both consume `self` and mark it as handled.
pub struct FileLock {
    path: PathBuf,
    file: File,
    consumed: bool,
}

impl FileLock {
    pub fn acquire(path: PathBuf) -> Result<Self> {
        match OpenOptions::new().read(true).write(true).create_new(true).open(&path) {
            Ok(file) => Ok(Self { path, file, consumed: false }),
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => Err(StackError::LockContention),
            Err(e) => Err(StackError::Io(e)),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Overwrites the lock file's contents, ready for rename onto its final
    /// destination.
    pub fn write_all(&mut self, content: &[u8]) -> io::Result<()> {
        self.file.set_len(0)?;
        self.file.seek(SeekFrom::Start(0))?;
        self.file.write_all(content)?;
        self.file.sync_all()
    }

    /// Atomically publishes the lock file's contents at `dest`, the
    /// linearization point for a manifest update.
    pub fn rename_onto(mut self, dest: &Path) -> io::Result<()> {
        self.file.sync_all()?;
        fs::rename(&self.path, dest)?;
        self.consumed = true;
        Ok(())
    }

    /// Releases the lock without publishing anything.
    pub fn release(mut self) -> io::Result<()> {
        self.consumed = true;
        fs::remove_file(&self.path)
    }
}

impl Drop for FileLock {
    fn drop(&mut self) {
        if !self.consumed {
            let _ = fs::remove_file(&self.path);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_acquire_sees_contention() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("manifest.lock");
        let first = FileLock::acquire(path.clone()).unwrap();
        let second = FileLock::acquire(path.clone());
        assert!(matches!(second, Err(StackError::LockContention)));
        drop(first);
        assert!(!path.exists());
    }

    #[test]
    fn rename_onto_publishes_and_consumes() {
        let dir = tempfile::tempdir().unwrap();
        let lock_path = dir.path().join("manifest.lock");
        let dest = dir.path().join("manifest");
        let mut lock = FileLock::acquire(lock_path.clone()).unwrap();
        lock.write_all(b"hello").unwrap();
        lock.rename_onto(&dest).unwrap();
        assert!(!lock_path.exists());
        assert_eq!(fs::read_to_string(&dest).unwrap(), "hello");
    }
}
