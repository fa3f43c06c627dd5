use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use fs2::FileExt;
use oncoflow_schema::Patient;

use crate::StoreError;

/// Fixed key the whole patient collection is stored under.
pub const STORAGE_KEY: &str = "oncoflow_data";

/// Raw load/save of the full patient collection.
///
/// Saves always rewrite the whole collection; nothing is diffed.
#[async_trait]
pub trait PersistenceBackend: Send + Sync {
    async fn load(&self) -> Result<Vec<Patient>, StoreError>;
    async fn save(&self, patients: &[Patient]) -> Result<(), StoreError>;

    /// Exclude every other writer of the same collection, in this process or
    /// another, until the returned lock is dropped.
    async fn lock(&self) -> Result<WriteLock, StoreError> {
        Ok(WriteLock::uncontended())
    }
}

/// Exclusive write access to a stored collection. Released on drop.
pub struct WriteLock {
    file: Option<File>,
}

impl WriteLock {
    /// For backends that no other writer can reach.
    pub fn uncontended() -> Self {
        Self { file: None }
    }
}

impl Drop for WriteLock {
    fn drop(&mut self) {
        if let Some(file) = &self.file {
            let _ = FileExt::unlock(file);
        }
    }
}

/// Collection stored as one JSON document on disk.
///
/// Writers coordinate through an advisory lock on a sibling `.lock` file,
/// so separate processes sharing a data directory never overwrite each
/// other's commits.
pub struct JsonFileBackend {
    path: PathBuf,
    lock_path: PathBuf,
}

impl JsonFileBackend {
    pub fn new(data_dir: &Path) -> Self {
        Self {
            path: data_dir.join(format!("{STORAGE_KEY}.json")),
            lock_path: data_dir.join(format!("{STORAGE_KEY}.lock")),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl PersistenceBackend for JsonFileBackend {
    async fn load(&self) -> Result<Vec<Patient>, StoreError> {
        if !tokio::fs::try_exists(&self.path)
            .await
            .map_err(|e| StoreError::Load(e.to_string()))?
        {
            return Ok(Vec::new());
        }

        let content = tokio::fs::read_to_string(&self.path)
            .await
            .map_err(|e| StoreError::Load(format!("{}: {e}", self.path.display())))?;
        if content.trim().is_empty() {
            return Ok(Vec::new());
        }
        serde_json::from_str(&content)
            .map_err(|e| StoreError::Load(format!("{}: {e}", self.path.display())))
    }

    async fn save(&self, patients: &[Patient]) -> Result<(), StoreError> {
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| StoreError::Save(e.to_string()))?;
        }

        let json =
            serde_json::to_string_pretty(patients).map_err(|e| StoreError::Save(e.to_string()))?;
        // Readers only ever see a complete file: write a sibling, then rename.
        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, json)
            .await
            .map_err(|e| StoreError::Save(format!("{}: {e}", tmp.display())))?;
        tokio::fs::rename(&tmp, &self.path)
            .await
            .map_err(|e| StoreError::Save(format!("{}: {e}", self.path.display())))?;
        Ok(())
    }

    async fn lock(&self) -> Result<WriteLock, StoreError> {
        if let Some(parent) = self.lock_path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| StoreError::Lock(e.to_string()))?;
        }

        let path = self.lock_path.clone();
        let file = tokio::task::spawn_blocking(move || -> std::io::Result<File> {
            let file = OpenOptions::new()
                .create(true)
                .truncate(false)
                .write(true)
                .open(&path)?;
            file.lock_exclusive()?;
            Ok(file)
        })
        .await
        .map_err(|e| StoreError::Lock(e.to_string()))?
        .map_err(|e| StoreError::Lock(format!("{}: {e}", self.lock_path.display())))?;

        tracing::debug!(path = %self.lock_path.display(), "store write lock acquired");
        Ok(WriteLock { file: Some(file) })
    }
}

/// In-process key-value fake. Holds the serialized form so round trips go
/// through the same encoding as the file backend.
#[derive(Default)]
pub struct InMemoryBackend {
    value: Mutex<Option<String>>,
    saves: AtomicUsize,
    fail_saves: AtomicBool,
}

impl InMemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_patients(patients: &[Patient]) -> Result<Self, StoreError> {
        let backend = Self::new();
        let json = serde_json::to_string(patients).map_err(|e| StoreError::Save(e.to_string()))?;
        if let Ok(mut value) = backend.value.lock() {
            *value = Some(json);
        }
        Ok(backend)
    }

    pub fn save_count(&self) -> usize {
        self.saves.load(Ordering::SeqCst)
    }

    /// Make subsequent saves fail, simulating a full disk or revoked storage.
    pub fn set_fail_saves(&self, fail: bool) {
        self.fail_saves.store(fail, Ordering::SeqCst);
    }

    pub fn raw(&self) -> Option<String> {
        self.value.lock().ok().and_then(|v| v.clone())
    }
}

#[async_trait]
impl PersistenceBackend for InMemoryBackend {
    async fn load(&self) -> Result<Vec<Patient>, StoreError> {
        match self.raw() {
            Some(json) => serde_json::from_str(&json).map_err(|e| StoreError::Load(e.to_string())),
            None => Ok(Vec::new()),
        }
    }

    async fn save(&self, patients: &[Patient]) -> Result<(), StoreError> {
        if self.fail_saves.load(Ordering::SeqCst) {
            return Err(StoreError::Save("storage unavailable".into()));
        }
        let json = serde_json::to_string(patients).map_err(|e| StoreError::Save(e.to_string()))?;
        let mut value = self
            .value
            .lock()
            .map_err(|_| StoreError::Save("storage lock poisoned".into()))?;
        *value = Some(json);
        self.saves.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
