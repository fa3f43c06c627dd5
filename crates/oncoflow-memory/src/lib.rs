pub mod backend;
pub mod store;

pub use backend::{InMemoryBackend, JsonFileBackend, PersistenceBackend, WriteLock, STORAGE_KEY};
pub use store::{PatientStore, StoreError};
