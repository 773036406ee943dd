//! Persistence of collections and periodic backups.
//!
//! The store talks to two pluggable adapters through the
//! [`PersistenceController`]:
//!
//! - a [`StorageAdapter`] receives the full current snapshot of a collection
//!   after every change and is free to debounce the writes;
//! - a [`BackupAdapter`] is called on a timer with a snapshot of every
//!   collection.
//!
//! [`FileStorageAdapter`] and [`FileBackupAdapter`] are the file-based
//! implementations wired by [`crate::Store::open`].

pub mod controller;
pub mod file_backup;
pub mod file_storage;
pub mod helpers;

pub use controller::PersistenceController;
pub use file_backup::{FileBackupAdapter, FileBackupOptions};
pub use file_storage::{FileStorageAdapter, FileStorageOptions};

use crate::error::Result;
use serde::Serialize;
use std::collections::BTreeMap;
use std::time::Duration;

/// A full point-in-time copy of one collection, in its stored JSON form.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct CollectionSnapshot {
    pub collection_name: String,
    pub collection_data: Vec<serde_json::Value>,
    /// Documents touched by the change that produced this snapshot.
    pub changes: Vec<serde_json::Value>,
}

/// Every collection's documents, keyed by collection name.
pub type StoreSnapshot = BTreeMap<String, Vec<serde_json::Value>>;

/// Disk write counters for one collection.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct WriteStats {
    /// Completed writes (or deletions of an emptied collection file).
    pub writes: u64,
    /// Notifications folded into a write that was already scheduled.
    pub coalesced: u64,
}

pub trait StorageAdapter: Send + Sync {
    /// Load persisted collections. Called once, before any mutation.
    fn init(&self) -> Result<Vec<CollectionSnapshot>>;

    fn insert(&self, snapshot: CollectionSnapshot) -> Result<()>;

    fn update(&self, snapshot: CollectionSnapshot) -> Result<()>;

    fn delete(&self, snapshot: CollectionSnapshot) -> Result<()>;

    /// Block until every scheduled write has reached the disk.
    fn flush(&self) {}

    fn stats(&self) -> BTreeMap<String, WriteStats> {
        BTreeMap::new()
    }
}

/// Timer settings reported by a backup adapter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackupSettings {
    pub interval: Duration,
}

impl BackupSettings {
    pub fn minutes(minutes: u64) -> Self {
        BackupSettings {
            interval: Duration::from_secs(minutes.saturating_mul(60)),
        }
    }

    pub fn every(interval: Duration) -> Self {
        BackupSettings { interval }
    }
}

pub trait BackupAdapter: Send + Sync {
    fn init(&self) -> Result<BackupSettings>;

    fn backup(&self, collections: &StoreSnapshot) -> Result<()>;
}
