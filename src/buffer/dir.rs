//! Per-buffer temporary directory.
//!
//! The directory holding a buffer's spill file and blob tree is created on
//! first use and deleted when the owning handle is cleared or dropped. A
//! buffer restored from an archive starts out with a pending archive that is
//! extracted into the directory the first time anyone needs it.
//!
//! Every live directory is tracked weakly in a process-wide registry so that
//! [`shutdown_cleanup`] can delete leftovers before the process exits.

use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock, Weak};

use parking_lot::Mutex;
use tempfile::TempDir;

use crate::archive;
use crate::error::{Error, Result};

pub(crate) struct BufferDir {
    parent: PathBuf,
    state: Mutex<DirState>,
}

struct DirState {
    temp: Option<TempDir>,
    pending_archive: Option<PathBuf>,
    cleared: bool,
}

impl BufferDir {
    /// A directory that is created on first use under `parent`.
    pub(crate) fn new(parent: &Path) -> Arc<Self> {
        Self::build(parent, None)
    }

    /// A directory that is filled from `archive` on first use.
    pub(crate) fn deferred(parent: &Path, archive: PathBuf) -> Arc<Self> {
        Self::build(parent, Some(archive))
    }

    fn build(parent: &Path, pending_archive: Option<PathBuf>) -> Arc<Self> {
        let dir = Arc::new(Self {
            parent: parent.to_path_buf(),
            state: Mutex::new(DirState { temp: None, pending_archive, cleared: false }),
        });
        register(&dir);
        dir
    }

    /// Returns the directory, creating it and extracting a pending archive
    /// if necessary.
    pub(crate) fn path(&self) -> Result<PathBuf> {
        let mut state = self.state.lock();
        if state.cleared {
            return Err(Error::invalid_state("buffer directory has been cleared"));
        }
        if state.temp.is_none() {
            std::fs::create_dir_all(&self.parent)?;
            let temp = tempfile::Builder::new().prefix("tablebuf-").tempdir_in(&self.parent)?;
            log::debug!("Created buffer directory {:?}", temp.path());
            state.temp = Some(temp);
        }
        let path = match &state.temp {
            Some(temp) => temp.path().to_path_buf(),
            None => return Err(Error::internal("buffer directory vanished")),
        };
        if let Some(source) = state.pending_archive.take() {
            log::info!("Extracting {:?} into {:?}", source, path);
            if let Err(e) = archive::extract_into(&source, &path) {
                state.pending_archive = Some(source);
                return Err(e);
            }
        }
        Ok(path)
    }

    /// Returns the directory if it exists, without creating or extracting.
    pub(crate) fn existing_path(&self) -> Option<PathBuf> {
        let state = self.state.lock();
        state.temp.as_ref().map(|t| t.path().to_path_buf())
    }

    /// Whether the archive this directory is restored from is still
    /// unextracted.
    pub(crate) fn is_deferred(&self) -> bool {
        self.state.lock().pending_archive.is_some()
    }

    pub(crate) fn is_cleared(&self) -> bool {
        self.state.lock().cleared
    }

    /// Deletes the directory. Idempotent; later calls to [`path`](Self::path)
    /// fail.
    pub(crate) fn clear(&self) {
        let mut state = self.state.lock();
        state.cleared = true;
        state.pending_archive = None;
        if let Some(temp) = state.temp.take() {
            let path = temp.path().to_path_buf();
            if let Err(e) = temp.close() {
                log::warn!("Failed to delete buffer directory {:?}: {}", path, e);
            }
        }
    }
}

fn open_dirs() -> &'static Mutex<Vec<Weak<BufferDir>>> {
    static OPEN_DIRS: OnceLock<Mutex<Vec<Weak<BufferDir>>>> = OnceLock::new();
    OPEN_DIRS.get_or_init(|| Mutex::new(Vec::new()))
}

fn register(dir: &Arc<BufferDir>) {
    let mut dirs = open_dirs().lock();
    dirs.retain(|d| d.strong_count() > 0);
    dirs.push(Arc::downgrade(dir));
}

/// Deletes the temporary files of every buffer still alive and returns how
/// many buffers were affected.
///
/// Meant to be called once while the process shuts down. Buffers cleared
/// this way fail on further reads.
pub fn shutdown_cleanup() -> usize {
    let dirs: Vec<Arc<BufferDir>> = {
        let mut dirs = open_dirs().lock();
        let live = dirs.iter().filter_map(Weak::upgrade).collect();
        dirs.clear();
        live
    };
    let mut count = 0;
    for dir in dirs {
        if dir.existing_path().is_some() {
            count += 1;
        }
        dir.clear();
    }
    if count > 0 {
        log::info!("Deleted temporary files of {} buffers at shutdown", count);
    }
    count
}
