//! Ticket vault: live files plus cold-storage batches.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};

use crate::{Result, StorageError};

/// Default number of archive batches kept on disk.
pub const DEFAULT_ARCHIVE_RETENTION: usize = 3;

const BATCH_PREFIX: &str = "batch-";

/// On-disk home of ticket files.
#[derive(Clone, Debug)]
pub struct TicketVault {
    live_dir: PathBuf,
    archive_dir: PathBuf,
    retention: usize,
}

impl TicketVault {
    /// Open a vault, creating both directories if needed.
    ///
    /// # Arguments
    ///
    /// * `live_dir` - Directory holding deliverable ticket files.
    /// * `archive_dir` - Root for cold-storage batches.
    /// * `retention` - Number of newest batches to keep (at least 1).
    pub fn open(live_dir: impl Into<PathBuf>, archive_dir: impl Into<PathBuf>, retention: usize) -> Result<Self> {
        let live_dir = live_dir.into();
        let archive_dir = archive_dir.into();
        fs::create_dir_all(&live_dir).map_err(|e| StorageError::io(&live_dir, e))?;
        fs::create_dir_all(&archive_dir).map_err(|e| StorageError::io(&archive_dir, e))?;
        Ok(Self {
            live_dir,
            archive_dir,
            retention: retention.max(1),
        })
    }

    pub fn live_dir(&self) -> &Path {
        &self.live_dir
    }

    pub fn archive_dir(&self) -> &Path {
        &self.archive_dir
    }

    /// Generate an opaque storage name with the given extension.
    pub fn new_storage_name(extension: &str) -> String {
        format!("{}.{}", uuid::Uuid::new_v4(), extension.trim_start_matches('.'))
    }

    /// Absolute path of a live ticket file.
    pub fn path_of(&self, storage_name: &str) -> Result<PathBuf> {
        validate_name(storage_name)?;
        Ok(self.live_dir.join(storage_name))
    }

    /// Write a new ticket file. Never overwrites.
    pub fn write(&self, storage_name: &str, data: &[u8]) -> Result<PathBuf> {
        let path = self.path_of(storage_name)?;
        let mut file = fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .map_err(|e| StorageError::io(&path, e))?;
        file.write_all(data).map_err(|e| StorageError::io(&path, e))?;
        file.sync_all().map_err(|e| StorageError::io(&path, e))?;
        debug!(storage_name, bytes = data.len(), "Ticket file written");
        Ok(path)
    }

    /// Whether the backing file is present as a regular file.
    pub fn exists(&self, storage_name: &str) -> bool {
        self.path_of(storage_name)
            .map(|p| p.is_file())
            .unwrap_or(false)
    }

    pub fn read(&self, storage_name: &str) -> Result<Vec<u8>> {
        let path = self.path_of(storage_name)?;
        match fs::read(&path) {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(StorageError::NotFound(storage_name.to_string()))
            }
            Err(e) => Err(StorageError::io(&path, e)),
        }
    }

    /// Delete a live file. Returns false if it was already gone.
    pub fn remove(&self, storage_name: &str) -> Result<bool> {
        let path = self.path_of(storage_name)?;
        match fs::remove_file(&path) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(StorageError::io(&path, e)),
        }
    }

    /// Start a cold-storage batch stamped with `at` (Unix millis).
    ///
    /// The batch directory is created lazily on the first relocation.
    pub fn begin_archive(&self, at: u64) -> ArchiveBatch<'_> {
        let mut dir = self.archive_dir.join(format!("{BATCH_PREFIX}{at:013}"));
        let mut suffix = 1;
        while dir.exists() {
            dir = self
                .archive_dir
                .join(format!("{BATCH_PREFIX}{at:013}-{suffix}"));
            suffix += 1;
        }
        ArchiveBatch {
            vault: self,
            dir,
            moved: 0,
        }
    }

    /// Existing batch directories, oldest first.
    pub fn archive_batches(&self) -> Result<Vec<PathBuf>> {
        let entries = fs::read_dir(&self.archive_dir).map_err(|e| StorageError::io(&self.archive_dir, e))?;
        let mut batches: Vec<PathBuf> = entries
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.path())
            .filter(|path| {
                path.is_dir()
                    && path
                        .file_name()
                        .and_then(|n| n.to_str())
                        .is_some_and(|n| n.starts_with(BATCH_PREFIX))
            })
            .collect();
        batches.sort();
        Ok(batches)
    }

    /// Delete all but the newest `retention` batches.
    fn enforce_retention(&self) -> Result<usize> {
        let batches = self.archive_batches()?;
        if batches.len() <= self.retention {
            return Ok(0);
        }
        let excess = batches.len() - self.retention;
        for old in &batches[..excess] {
            if let Err(e) = fs::remove_dir_all(old) {
                warn!(batch = %old.display(), error = %e, "Failed to prune archive batch");
            } else {
                info!(batch = %old.display(), "Pruned archive batch");
            }
        }
        Ok(excess)
    }
}

/// A cold-storage batch in progress.
pub struct ArchiveBatch<'a> {
    vault: &'a TicketVault,
    dir: PathBuf,
    moved: usize,
}

impl ArchiveBatch<'_> {
    /// Move a live ticket file into this batch. Returns false if the file was absent.
    pub fn relocate(&mut self, storage_name: &str) -> Result<bool> {
        let src = self.vault.path_of(storage_name)?;
        if !src.is_file() {
            return Ok(false);
        }
        if self.moved == 0 {
            fs::create_dir_all(&self.dir).map_err(|e| StorageError::io(&self.dir, e))?;
        }
        let dst = self.dir.join(storage_name);
        fs::rename(&src, &dst).map_err(|e| StorageError::io(&src, e))?;
        self.moved += 1;
        Ok(true)
    }

    /// Close the batch and prune old ones. Returns the batch path if anything was moved.
    pub fn finish(self) -> Result<Option<PathBuf>> {
        if self.moved == 0 {
            return Ok(None);
        }
        info!(batch = %self.dir.display(), files = self.moved, "Archive batch written");
        self.vault.enforce_retention()?;
        Ok(Some(self.dir))
    }
}

fn validate_name(storage_name: &str) -> Result<()> {
    let bad = storage_name.is_empty()
        || storage_name == "."
        || storage_name == ".."
        || storage_name.contains('/')
        || storage_name.contains('\\')
        || storage_name.contains('\0');
    if bad {
        return Err(StorageError::InvalidName(storage_name.to_string()));
    }
    Ok(())
}
