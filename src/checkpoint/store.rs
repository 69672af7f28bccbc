//! Checkpoint persistence with atomic writes and file locking.
//!
//! A save never leaves a half-written record behind: the new record goes to a
//! temp file in the same directory, is flushed and synced, and then renamed
//! over the previous one. A crash mid-save leaves the prior valid record.

use super::record::CheckpointRecord;
use super::CheckpointError;
use crate::person::PersonId;
use fd_lock::RwLock;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Maximum allowed checkpoint file size to prevent memory exhaustion on load.
pub const MAX_RECORD_FILE_SIZE: u64 = 50 * 1024 * 1024;

/// Filesystem-backed checkpoint store, one JSON record per person.
#[derive(Debug, Clone)]
pub struct CheckpointStore {
    dir: PathBuf,
}

impl CheckpointStore {
    /// Store rooted at `dir`. The directory is created on first save.
    pub fn new<P: Into<PathBuf>>(dir: P) -> Self {
        Self { dir: dir.into() }
    }

    /// Directory holding the records.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, person_id: PersonId) -> PathBuf {
        self.dir.join(format!("person_{person_id:05}.json"))
    }

    /// Load a person's record, verifying it belongs to the active space
    /// configuration. `Ok(None)` means no record exists; a record with a
    /// different `config_hash` is an error, never a silent fresh start.
    pub fn load(
        &self,
        person_id: PersonId,
        expected_config_hash: &str,
    ) -> Result<Option<CheckpointRecord>, CheckpointError> {
        let record = match self.read_record(person_id)? {
            Some(record) => record,
            None => return Ok(None),
        };
        record.validate_schema()?;
        record.validate_config(expected_config_hash)?;
        info!(
            person_id,
            last_completed_index = ?record.last_completed_index(),
            matches = record.matches().len(),
            "checkpoint loaded"
        );
        Ok(Some(record))
    }

    /// Load a person's record without checking the config hash. For
    /// inspection commands only; resuming work from an unchecked record is
    /// never safe.
    pub fn inspect(
        &self,
        person_id: PersonId,
    ) -> Result<Option<CheckpointRecord>, CheckpointError> {
        let record = match self.read_record(person_id)? {
            Some(record) => record,
            None => return Ok(None),
        };
        record.validate_schema()?;
        Ok(Some(record))
    }

    fn read_record(
        &self,
        person_id: PersonId,
    ) -> Result<Option<CheckpointRecord>, CheckpointError> {
        let path = self.path_for(person_id);
        if !path.exists() {
            debug!(person_id, "no checkpoint record found");
            return Ok(None);
        }

        let lock_file = open_lock_file(&path)?;
        let lock = RwLock::new(lock_file);
        let _guard = lock
            .read()
            .map_err(|e| CheckpointError::LockError(format!("failed to acquire read lock: {e}")))?;

        let metadata =
            std::fs::metadata(&path).map_err(|e| CheckpointError::IoError(e.to_string()))?;
        if metadata.len() > MAX_RECORD_FILE_SIZE {
            return Err(CheckpointError::RecordTooLarge {
                size: metadata.len(),
                max: MAX_RECORD_FILE_SIZE,
            });
        }

        let contents =
            std::fs::read_to_string(&path).map_err(|e| CheckpointError::IoError(e.to_string()))?;
        let record: CheckpointRecord = serde_json::from_str(&contents).map_err(|e| {
            warn!(person_id, error = %e, "failed to deserialize checkpoint record");
            CheckpointError::DeserializationError(e.to_string())
        })?;
        Ok(Some(record))
    }

    /// Atomically persist a record: write-temp, fsync, rename, fsync the
    /// parent directory. Saving an unchanged record writes identical bytes
    /// and is observably a no-op.
    pub fn save(&self, record: &CheckpointRecord) -> Result<(), CheckpointError> {
        let path = self.path_for(record.person_id());
        std::fs::create_dir_all(&self.dir).map_err(|e| CheckpointError::IoError(e.to_string()))?;

        let json = serde_json::to_string_pretty(record)
            .map_err(|e| CheckpointError::SerializationError(e.to_string()))?;

        let lock_file = open_lock_file(&path)?;
        let mut lock = RwLock::new(lock_file);
        let _guard = lock.write().map_err(|e| {
            CheckpointError::LockError(format!("failed to acquire write lock: {e}"))
        })?;

        let mut temp_file = tempfile::NamedTempFile::new_in(&self.dir)
            .map_err(|e| CheckpointError::IoError(format!("failed to create temp file: {e}")))?;
        temp_file
            .write_all(json.as_bytes())
            .map_err(|e| CheckpointError::IoError(format!("failed to write temp file: {e}")))?;
        temp_file
            .flush()
            .map_err(|e| CheckpointError::IoError(format!("failed to flush temp file: {e}")))?;
        temp_file
            .as_file()
            .sync_all()
            .map_err(|e| CheckpointError::IoError(format!("failed to sync temp file: {e}")))?;
        temp_file
            .persist(&path)
            .map_err(|e| CheckpointError::IoError(format!("failed to persist temp file: {e}")))?;

        // Make the rename itself durable.
        if let Ok(dir) = std::fs::File::open(&self.dir) {
            let _ = dir.sync_all();
        }

        debug!(
            person_id = record.person_id(),
            last_completed_index = ?record.last_completed_index(),
            matches = record.matches().len(),
            "checkpoint saved"
        );
        Ok(())
    }

    /// Remove a person's record (after the traversal completes). Missing
    /// files are not an error.
    pub fn clear(&self, person_id: PersonId) {
        let path = self.path_for(person_id);
        if path.exists() {
            match std::fs::remove_file(&path) {
                Ok(()) => info!(person_id, "checkpoint record removed"),
                Err(e) => warn!(person_id, error = %e, "failed to remove checkpoint record"),
            }
        }
        let _ = std::fs::remove_file(path.with_extension("lock"));
    }

    /// Person ids with stored records, ascending.
    pub fn list_person_ids(&self) -> Result<Vec<PersonId>, CheckpointError> {
        if !self.dir.exists() {
            return Ok(Vec::new());
        }
        let entries =
            std::fs::read_dir(&self.dir).map_err(|e| CheckpointError::IoError(e.to_string()))?;
        let mut ids = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| CheckpointError::IoError(e.to_string()))?;
            let name = entry.file_name();
            let name = name.to_string_lossy();
            if let Some(id) = name
                .strip_prefix("person_")
                .and_then(|rest| rest.strip_suffix(".json"))
                .and_then(|id| id.parse::<PersonId>().ok())
            {
                ids.push(id);
            }
        }
        ids.sort_unstable();
        Ok(ids)
    }
}

fn open_lock_file(record_path: &Path) -> Result<std::fs::File, CheckpointError> {
    let lock_path = record_path.with_extension("lock");
    if let Some(parent) = lock_path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| CheckpointError::IoError(e.to_string()))?;
    }
    OpenOptions::new()
        .create(true)
        .read(true)
        .write(true)
        .truncate(false)
        .open(&lock_path)
        .map_err(|e| CheckpointError::LockError(format!("failed to open lock file: {e}")))
}
