//! The device's replica and its snapshot file.
//!
//! All tenants share one [`Replica`] behind a synchronous mutex. The lock
//! is only ever taken for in-memory work and never held across an
//! `.await`. Persisting exports the replica and replaces the snapshot file
//! atomically (temp file + rename), so a crash leaves either the old or the
//! new state on disk.

use crate::error::{Result, SyncError};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tillsync_engine::{Clock, MemoryRepository, Replica, ReplicaSnapshot, Schema, Timestamp};

/// Replica snapshot on disk.
#[derive(Debug, Clone)]
pub struct SnapshotFile {
    path: PathBuf,
}

impl SnapshotFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the snapshot, `None` if there is none yet.
    pub async fn load(&self) -> Result<Option<ReplicaSnapshot>> {
        match tokio::fs::read_to_string(&self.path).await {
            Ok(json) => Ok(Some(ReplicaSnapshot::from_json(&json)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Replace the snapshot atomically.
    pub async fn save(&self, snapshot: &ReplicaSnapshot) -> Result<()> {
        let json = snapshot.to_json()?;
        if let Some(dir) = self.path.parent() {
            tokio::fs::create_dir_all(dir).await?;
        }

        let temp_path = self.path.with_extension("json.tmp");
        tokio::fs::write(&temp_path, json.as_bytes()).await?;
        let file = tokio::fs::File::open(&temp_path).await?;
        file.sync_all().await?;
        tokio::fs::rename(&temp_path, &self.path).await?;
        Ok(())
    }
}

/// Shared replica plus its persistence.
pub struct Store {
    replica: Mutex<Replica>,
    file: SnapshotFile,
    /// Serializes export+write so snapshots reach the disk in export order
    write_lock: tokio::sync::Mutex<()>,
    clock: Arc<dyn Clock>,
}

impl Store {
    /// Open the store, restoring the snapshot if one exists.
    pub async fn open(schema: Schema, file: SnapshotFile, clock: Arc<dyn Clock>) -> Result<Self> {
        let replica = match file.load().await? {
            Some(snapshot) => {
                tracing::info!(
                    path = %file.path().display(),
                    records = snapshot.records.record_count(),
                    "restored replica snapshot"
                );
                Replica::from_snapshot(schema, snapshot)?
            }
            None => Replica::new(schema, MemoryRepository::new()),
        };

        Ok(Self {
            replica: Mutex::new(replica),
            file,
            write_lock: tokio::sync::Mutex::new(()),
            clock,
        })
    }

    pub fn now(&self) -> Timestamp {
        self.clock.now()
    }

    /// Run `f` with exclusive access to the replica.
    pub fn with<T>(&self, f: impl FnOnce(&mut Replica) -> T) -> Result<T> {
        let mut replica = self
            .replica
            .lock()
            .map_err(|_| SyncError::LocalStorage("replica lock poisoned".to_string()))?;
        Ok(f(&mut replica))
    }

    /// Like [`Store::with`] for closures that return an engine result.
    pub fn apply<T>(
        &self,
        f: impl FnOnce(&mut Replica) -> tillsync_engine::error::Result<T>,
    ) -> Result<T> {
        Ok(self.with(f)??)
    }

    /// Write the current replica state to disk.
    pub async fn persist(&self) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        let snapshot = self.with(|replica| replica.export_state())?;
        self.file.save(&snapshot).await
    }
}
