//! Work-dir lock: one fixer session per working copy.
//!
//! Every probe rewrites the same local sparsebundle, so two sessions on one
//! work_dir would corrupt each other's verdicts. fs2 advisory lock on
//! <work_dir>/.tmfix.lock; the holder's pid is written into the file for
//! diagnostics. Lock is released on Drop.

use anyhow::{Context, Result};
use fs2::FileExt;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

pub const LOCK_FILE: &str = ".tmfix.lock";

pub struct SessionLock {
    file: File,
    path: PathBuf,
}

impl SessionLock {
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for SessionLock {
    fn drop(&mut self) {
        // unlock errors on drop are ignored; the OS drops the lock with the fd anyway
        let _ = self.file.unlock();
    }
}

fn lock_file_path(work_dir: &Path) -> PathBuf {
    work_dir.join(LOCK_FILE)
}

fn open_lock_file(work_dir: &Path) -> Result<File> {
    std::fs::create_dir_all(work_dir)
        .with_context(|| format!("create work dir {}", work_dir.display()))?;
    let path = lock_file_path(work_dir);
    OpenOptions::new()
        .create(true)
        .read(true)
        .write(true)
        .open(&path)
        .with_context(|| format!("open lock file {}", path.display()))
}

/// Take the work-dir lock or fail immediately if another session holds it.
pub fn try_lock_work_dir(work_dir: &Path) -> Result<SessionLock> {
    let mut file = open_lock_file(work_dir)?;
    let path = lock_file_path(work_dir);

    if let Err(e) = file.try_lock_exclusive() {
        let mut holder = String::new();
        let _ = file.read_to_string(&mut holder);
        let holder = holder.trim();
        return Err(e).with_context(|| {
            format!(
                "another fixer session holds {} (pid {})",
                path.display(),
                if holder.is_empty() { "unknown" } else { holder }
            )
        });
    }

    file.set_len(0)?;
    file.seek(SeekFrom::Start(0))?;
    write!(file, "{}", std::process::id())?;
    let _ = file.sync_all();

    Ok(SessionLock { file, path })
}
