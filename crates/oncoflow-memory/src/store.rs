use std::sync::Arc;

use arc_swap::ArcSwap;
use oncoflow_schema::{Patient, PatientId};
use thiserror::Error;
use tokio::sync::Mutex;

use crate::backend::{InMemoryBackend, PersistenceBackend};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("failed to load patient collection: {0}")]
    Load(String),
    #[error("failed to persist patient collection: {0}")]
    Save(String),
    #[error("failed to lock patient collection: {0}")]
    Lock(String),
    #[error("patient not found: {0}")]
    NotFound(PatientId),
    #[error("patient id already in use: {0}")]
    DuplicateId(PatientId),
}

/// The patient collection, newest import first.
///
/// Readers get lock-free snapshots. Writers are serialized, within this
/// process by a mutex and across processes by the backend's write lock.
/// Each mutation reloads the stored collection under that lock, persists
/// the modified copy, and only then publishes it. A failed save leaves the
/// published snapshot untouched.
pub struct PatientStore {
    snapshot: ArcSwap<Vec<Patient>>,
    writer: Mutex<()>,
    backend: Arc<dyn PersistenceBackend>,
}

impl PatientStore {
    pub async fn open(backend: Arc<dyn PersistenceBackend>) -> Result<Self, StoreError> {
        let patients = backend.load().await?;
        tracing::info!(patients = patients.len(), "patient store loaded");
        Ok(Self {
            snapshot: ArcSwap::from_pointee(patients),
            writer: Mutex::new(()),
            backend,
        })
    }

    pub fn in_memory() -> Self {
        Self {
            snapshot: ArcSwap::from_pointee(Vec::new()),
            writer: Mutex::new(()),
            backend: Arc::new(InMemoryBackend::new()),
        }
    }

    pub fn snapshot(&self) -> Arc<Vec<Patient>> {
        self.snapshot.load_full()
    }

    pub fn len(&self) -> usize {
        self.snapshot.load().len()
    }

    pub fn is_empty(&self) -> bool {
        self.snapshot.load().is_empty()
    }

    pub fn get(&self, id: PatientId) -> Option<Patient> {
        self.snapshot.load().iter().find(|p| p.id == id).cloned()
    }

    pub fn contains(&self, id: PatientId) -> bool {
        self.snapshot.load().iter().any(|p| p.id == id)
    }

    /// Records whose name contains `query`, case-insensitively, in store order.
    pub fn search(&self, query: &str) -> Vec<Patient> {
        self.snapshot
            .load()
            .iter()
            .filter(|p| p.matches_name(query))
            .cloned()
            .collect()
    }

    pub fn max_id(&self) -> Option<PatientId> {
        self.snapshot.load().iter().map(|p| p.id).max()
    }

    /// Publish a new record at the front of the collection.
    pub async fn insert_front(&self, patient: Patient) -> Result<(), StoreError> {
        let id = patient.id;
        self.commit(move |patients| {
            if patients.iter().any(|p| p.id == id) {
                return Err(StoreError::DuplicateId(id));
            }
            patients.insert(0, patient);
            Ok(())
        })
        .await?;
        tracing::info!(patient_id = id, "patient committed");
        Ok(())
    }

    /// Apply `mutate` to a copy of one record and publish the result.
    pub async fn update<F>(&self, id: PatientId, mutate: F) -> Result<Patient, StoreError>
    where
        F: FnOnce(&mut Patient) + Send,
    {
        self.commit(move |patients| {
            let patient = patients
                .iter_mut()
                .find(|p| p.id == id)
                .ok_or(StoreError::NotFound(id))?;
            mutate(patient);
            Ok(patient.clone())
        })
        .await
    }

    /// Remove a record. Returns `false` (and writes nothing) for unknown ids.
    pub async fn delete(&self, id: PatientId) -> Result<bool, StoreError> {
        let removed = self
            .commit(move |patients| {
                let before = patients.len();
                patients.retain(|p| p.id != id);
                if patients.len() == before {
                    return Err(StoreError::NotFound(id));
                }
                Ok(())
            })
            .await;

        match removed {
            Ok(()) => {
                tracing::info!(patient_id = id, "patient deleted");
                Ok(true)
            }
            Err(StoreError::NotFound(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Single-writer copy-on-write commit.
    ///
    /// `mutate` runs against a private copy of the collection as currently
    /// stored, which includes commits made by other processes since this
    /// store was opened. An error from `mutate`, or from the backend save,
    /// discards the copy without publishing anything.
    pub async fn commit<T, F>(&self, mutate: F) -> Result<T, StoreError>
    where
        T: Send,
        F: FnOnce(&mut Vec<Patient>) -> Result<T, StoreError> + Send,
    {
        let _guard = self.writer.lock().await;
        let _lock = self.backend.lock().await?;

        let mut next = self.backend.load().await?;
        let out = mutate(&mut next)?;
        self.backend.save(&next).await?;
        self.snapshot.store(Arc::new(next));
        Ok(out)
    }
}
