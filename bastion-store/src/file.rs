//! JSON file state store
//!
//! Crash-safe single-file persistence:
//!
//! - each commit first copies the current file to `<name>.bak.1`, shifting
//!   older backups up to the retention limit
//! - the new document goes to `<name>.tmp`, is fsynced, then renamed over
//!   the live file
//! - an unreadable live file is moved to `<name>.corrupt-<timestamp>` and
//!   the store starts from the empty document

use chrono::Utc;
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use crate::document::StateDocument;
use crate::error::{StoreError, StoreResult};
use crate::repository::StateStore;

/// File-backed state store
#[derive(Debug, Clone)]
pub struct FileStateStore {
    path: PathBuf,
    backup_retention: usize,
}

impl FileStateStore {
    /// Create a store at `path` keeping up to `backup_retention` backups.
    pub fn new(path: impl Into<PathBuf>, backup_retention: usize) -> Self {
        Self {
            path: path.into(),
            backup_retention,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Path of the n-th backup (1 = newest)
    pub fn backup_path(&self, n: usize) -> PathBuf {
        self.sibling(&format!("bak.{}", n))
    }

    fn sibling(&self, suffix: &str) -> PathBuf {
        let mut name = self.path.file_name().unwrap_or_default().to_os_string();
        name.push(".");
        name.push(suffix);
        self.path.with_file_name(name)
    }

    fn read(&self) -> StoreResult<StateDocument> {
        let raw = fs::read_to_string(&self.path)?;
        let document: StateDocument =
            serde_json::from_str(&raw).map_err(|e| StoreError::Corrupt {
                path: self.path.clone(),
                reason: e.to_string(),
            })?;
        document.check_version()?;
        Ok(document)
    }

    /// Move an unreadable file aside so the next commit cannot overwrite it
    fn quarantine(&self) -> StoreResult<PathBuf> {
        let target = self.sibling(&format!("corrupt-{}", Utc::now().format("%Y%m%dT%H%M%S%.3fZ")));
        fs::rename(&self.path, &target)?;
        Ok(target)
    }

    fn rotate_backups(&self) -> StoreResult<()> {
        if self.backup_retention == 0 || !self.path.exists() {
            return Ok(());
        }

        let oldest = self.backup_path(self.backup_retention);
        if oldest.exists() {
            fs::remove_file(&oldest)?;
        }
        for n in (1..self.backup_retention).rev() {
            let from = self.backup_path(n);
            if from.exists() {
                fs::rename(&from, self.backup_path(n + 1))?;
            }
        }
        fs::copy(&self.path, self.backup_path(1))?;
        Ok(())
    }
}

impl StateStore for FileStateStore {
    fn load(&self) -> StoreResult<StateDocument> {
        if !self.path.exists() {
            info!(path = %self.path.display(), "No state file found, starting fresh");
            return Ok(StateDocument::default());
        }

        match self.read() {
            Ok(document) => {
                info!(
                    path = %self.path.display(),
                    positions = document.positions.len(),
                    total_trades = document.statistics.total_trades,
                    "Loaded state"
                );
                Ok(document)
            },
            Err(e @ (StoreError::Corrupt { .. } | StoreError::UnsupportedVersion { .. })) => {
                let moved_to = self.quarantine()?;
                warn!(
                    path = %self.path.display(),
                    moved_to = %moved_to.display(),
                    error = %e,
                    "State file unreadable, starting from empty state"
                );
                Ok(StateDocument::default())
            },
            Err(e) => Err(e),
        }
    }

    fn commit(&self, document: &StateDocument) -> StoreResult<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                fs::create_dir_all(parent)?;
            }
        }

        let mut document = document.clone();
        document.saved_at = Some(Utc::now());
        let bytes = serde_json::to_vec_pretty(&document)?;

        self.rotate_backups()?;

        let tmp = self.sibling("tmp");
        {
            let mut file = File::create(&tmp)?;
            file.write_all(&bytes)?;
            file.sync_all()?;
        }
        fs::rename(&tmp, &self.path)?;

        // Persist the rename itself
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            File::open(parent)?.sync_all()?;
        }

        debug!(
            path = %self.path.display(),
            positions = document.positions.len(),
            "Committed state"
        );
        Ok(())
    }
}
