//! Advisory file locks shared between processes.
//!
//! Locks are taken on a dedicated `.lock` file next to the data they guard,
//! so the guarded file itself can be replaced by rename while locked. The
//! lock is released when the [`LockFile`] is dropped.

use std::fs::{self, File, OpenOptions};
use std::path::Path;

use fs2::FileExt;

use crate::Result;

#[derive(Debug)]
pub(crate) struct LockFile {
    file: File,
}

impl LockFile {
    /// Block until the exclusive lock on `path` is held.
    pub(crate) fn exclusive(path: &Path) -> Result<Self> {
        let file = open(path)?;
        FileExt::lock_exclusive(&file)?;
        Ok(Self { file })
    }

    /// Block until a shared lock on `path` is held.
    pub(crate) fn shared(path: &Path) -> Result<Self> {
        let file = open(path)?;
        FileExt::lock_shared(&file)?;
        Ok(Self { file })
    }

    /// Take the exclusive lock, or `None` if another holder has it.
    pub(crate) fn try_exclusive(path: &Path) -> Result<Option<Self>> {
        let file = open(path)?;
        match FileExt::try_lock_exclusive(&file) {
            Ok(()) => Ok(Some(Self { file })),
            Err(err) if err.kind() == fs2::lock_contended_error().kind() => Ok(None),
            Err(err) => Err(err.into()),
        }
    }
}

impl Drop for LockFile {
    fn drop(&mut self) {
        let _ = FileExt::unlock(&self.file);
    }
}

fn open(path: &Path) -> Result<File> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    Ok(OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .truncate(false)
        .open(path)?)
}
