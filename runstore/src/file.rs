//! File-backed checkpoint store
//!
//! Layout under the base directory:
//!
//! ```text
//! <base>/.lock                    advisory lock for index rewrites
//! <base>/runs.json                summary index (run_id -> RunSummary)
//! <base>/checkpoints/<key>.json   one snapshot file per (run_id, thread_id)
//! ```
//!
//! Snapshots and the index are written to a temp file and renamed into
//! place, so readers never see a torn write.

use std::collections::BTreeMap;
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use fs2::FileExt;
use tracing::{debug, info};

use crate::backend::{CheckpointBackend, CheckpointKey, RunPage, RunSummary};
use crate::PersistError;

/// JSON-file checkpoint backend
pub struct FileBackend {
    base_dir: PathBuf,
    /// Serializes index rewrites within this process; the fs2 lock guards
    /// against other processes
    index_lock: Mutex<()>,
}

impl FileBackend {
    /// Open or create a file store at the given directory
    pub fn open(base_dir: impl AsRef<Path>) -> Result<Self, PersistError> {
        let base_dir = base_dir.as_ref().to_path_buf();
        debug!(base_dir = %base_dir.display(), "FileBackend::open: called");
        fs::create_dir_all(base_dir.join("checkpoints"))?;
        info!(base_dir = %base_dir.display(), "Opened file checkpoint store");
        Ok(Self {
            base_dir,
            index_lock: Mutex::new(()),
        })
    }

    fn snapshot_path(&self, key: &CheckpointKey) -> PathBuf {
        // thread_id may equal run_id; the pair is still the key
        let name = format!("{}__{}.json", sanitize(&key.run_id), sanitize(&key.thread_id));
        self.base_dir.join("checkpoints").join(name)
    }

    fn index_path(&self) -> PathBuf {
        self.base_dir.join("runs.json")
    }

    fn lock_path(&self) -> PathBuf {
        self.base_dir.join(".lock")
    }

    /// Take the cross-process advisory lock for an index mutation
    fn acquire_lock(&self) -> Result<File, PersistError> {
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(self.lock_path())?;
        file.lock_exclusive()
            .map_err(|e| PersistError::LockFailed(e.to_string()))?;
        Ok(file)
    }

    fn read_index(&self) -> Result<BTreeMap<String, RunSummary>, PersistError> {
        let path = self.index_path();
        if !path.exists() {
            return Ok(BTreeMap::new());
        }
        let content = fs::read_to_string(&path)?;
        if content.trim().is_empty() {
            return Ok(BTreeMap::new());
        }
        serde_json::from_str(&content).map_err(|_| PersistError::Corrupt(path.display().to_string()))
    }

    fn write_index(&self, index: &BTreeMap<String, RunSummary>) -> Result<(), PersistError> {
        let bytes = serde_json::to_vec_pretty(index)?;
        atomic_write(&self.index_path(), &bytes)
    }
}

/// Write via temp file + rename so readers never observe partial content
fn atomic_write(path: &Path, bytes: &[u8]) -> Result<(), PersistError> {
    let parent = path.parent().unwrap_or(Path::new("."));
    let tmp = parent.join(format!(
        ".{}.tmp",
        path.file_name().map(|n| n.to_string_lossy().to_string()).unwrap_or_default()
    ));
    {
        let mut file = File::create(&tmp)?;
        file.write_all(bytes)?;
        file.sync_all()?;
    }
    fs::rename(&tmp, path)?;
    Ok(())
}

fn sanitize(s: &str) -> String {
    s.chars().map(|c| if c.is_alphanumeric() || c == '-' { c } else { '_' }).collect()
}

impl CheckpointBackend for FileBackend {
    fn put(&self, key: &CheckpointKey, snapshot: &[u8], summary: &RunSummary) -> Result<(), PersistError> {
        debug!(%key, bytes = snapshot.len(), "FileBackend::put: called");
        let _guard = self.index_lock.lock().expect("index lock poisoned");
        let _flock = self.acquire_lock()?;

        atomic_write(&self.snapshot_path(key), snapshot)?;

        let mut index = self.read_index()?;
        index.insert(key.run_id.clone(), summary.clone());
        self.write_index(&index)?;

        debug!(%key, "FileBackend::put: snapshot and index written");
        Ok(())
    }

    fn get(&self, key: &CheckpointKey) -> Result<Option<Vec<u8>>, PersistError> {
        debug!(%key, "FileBackend::get: called");
        let path = self.snapshot_path(key);
        if !path.exists() {
            debug!(%key, "FileBackend::get: no snapshot");
            return Ok(None);
        }
        Ok(Some(fs::read(path)?))
    }

    fn delete(&self, key: &CheckpointKey) -> Result<(), PersistError> {
        debug!(%key, "FileBackend::delete: called");
        let _guard = self.index_lock.lock().expect("index lock poisoned");
        let _flock = self.acquire_lock()?;

        let path = self.snapshot_path(key);
        if path.exists() {
            fs::remove_file(path)?;
        }

        let mut index = self.read_index()?;
        index.remove(&key.run_id);
        self.write_index(&index)?;
        Ok(())
    }

    fn list_runs(&self, limit: usize, offset: usize) -> Result<RunPage, PersistError> {
        debug!(limit, offset, "FileBackend::list_runs: called");
        let index = self.read_index()?;
        let mut items: Vec<RunSummary> = index.into_values().collect();
        // Most recently updated first; RFC 3339 strings sort correctly
        items.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));

        let total = items.len();
        let items: Vec<RunSummary> = items.into_iter().skip(offset).take(limit).collect();
        let has_more = offset + items.len() < total;

        Ok(RunPage { items, total, has_more })
    }

    fn get_summary(&self, run_id: &str) -> Result<Option<RunSummary>, PersistError> {
        debug!(%run_id, "FileBackend::get_summary: called");
        Ok(self.read_index()?.remove(run_id))
    }
}
