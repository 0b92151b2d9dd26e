//! tally-core - Core library for Tally
//!
//! This crate contains the shared models, the offline-first synchronization
//! coordinator, and the local/remote storage adapters used by all Tally
//! clients.

pub mod error;
pub mod models;
pub mod remote;
pub mod store;
pub mod sync;
pub mod util;

pub use error::{Error, Result};
pub use models::{Collection, PendingSync, Record, RecordId};
pub use sync::{DataSource, SyncCoordinator, SyncOptions, SyncReceipt, SyncTarget, SyncVerb};
