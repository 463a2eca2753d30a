#![forbid(unsafe_code)]

pub mod legacy;
pub mod repository;
pub mod snapshot;
pub mod sqlite;

pub use legacy::{MigrationAdapter, MigrationError, MigrationReport};
pub use repository::{
    ProgressRepository, SessionStateRepository, Storage, StorageError, SyncQueueRepository,
};
pub use snapshot::{Snapshot, export_snapshot, import_snapshot};
