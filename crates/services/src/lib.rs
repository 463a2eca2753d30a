#![forbid(unsafe_code)]

pub mod error;
pub mod progress_service;
pub mod remote;
pub mod sync;

pub use course_core::Clock;

pub use error::{ProgressServiceError, SyncError};
pub use progress_service::ProgressService;
pub use remote::{ConflictReport, HttpRemote, PushResponse, RemoteError, RemoteProgress, RemoteRecord};
pub use sync::{SyncConfig, SyncEngine, SyncObserver, SyncOptions, SyncReport, periodic_sync};
