use super::{BackupAdapter, CollectionSnapshot, StorageAdapter, StoreSnapshot, WriteStats};
use crate::error::Result;
use crate::util::verbose;
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::mpsc::{self, RecvTimeoutError, Sender};
use std::sync::Arc;

#[derive(Debug, Clone, Copy)]
enum ChangeKind {
    Insert,
    Update,
    Delete,
}

/// Routes change notifications to the storage adapter and drives the backup
/// timer. Adapter failures are logged here and never reach the caller of the
/// mutation that triggered them.
pub struct PersistenceController {
    storage: Option<Arc<dyn StorageAdapter>>,
    backup: Option<Arc<dyn BackupAdapter>>,
    /// Held for the duration of any backup so only one runs at a time.
    backup_gate: Arc<Mutex<()>>,
    /// Dropping the sender stops the timer thread.
    timer: Mutex<Option<Sender<()>>>,
    verbose: bool,
}

impl PersistenceController {
    pub fn new(
        storage: Option<Arc<dyn StorageAdapter>>,
        backup: Option<Arc<dyn BackupAdapter>>,
        verbose: bool,
    ) -> Self {
        PersistenceController {
            storage,
            backup,
            backup_gate: Arc::new(Mutex::new(())),
            timer: Mutex::new(None),
            verbose,
        }
    }

    pub fn has_storage(&self) -> bool {
        self.storage.is_some()
    }

    pub fn has_backup(&self) -> bool {
        self.backup.is_some()
    }

    /// Initial collections from the storage adapter. Failures yield nothing.
    pub fn load(&self) -> Vec<CollectionSnapshot> {
        let Some(storage) = &self.storage else {
            return Vec::new();
        };
        match storage.init() {
            Ok(collections) => {
                verbose!(self.verbose, "Loaded {} collection(s) from storage", collections.len());
                collections
            }
            Err(e) => {
                log::error!("Failed to load collections from storage: {e}");
                Vec::new()
            }
        }
    }

    pub fn on_insert(&self, name: &str, data: Vec<serde_json::Value>, changes: Vec<serde_json::Value>) {
        self.notify(ChangeKind::Insert, name, data, changes);
    }

    pub fn on_update(&self, name: &str, data: Vec<serde_json::Value>, changes: Vec<serde_json::Value>) {
        self.notify(ChangeKind::Update, name, data, changes);
    }

    pub fn on_delete(&self, name: &str, data: Vec<serde_json::Value>, changes: Vec<serde_json::Value>) {
        self.notify(ChangeKind::Delete, name, data, changes);
    }

    fn notify(
        &self,
        kind: ChangeKind,
        name: &str,
        collection_data: Vec<serde_json::Value>,
        changes: Vec<serde_json::Value>,
    ) {
        let Some(storage) = &self.storage else {
            return;
        };
        let snapshot = CollectionSnapshot {
            collection_name: name.to_string(),
            collection_data,
            changes,
        };
        let result = match kind {
            ChangeKind::Insert => storage.insert(snapshot),
            ChangeKind::Update => storage.update(snapshot),
            ChangeKind::Delete => storage.delete(snapshot),
        };
        if let Err(e) = result {
            log::error!("Storage {kind:?} for {name} failed: {e}");
        }
    }

    /// Arm the repeating backup timer.
    ///
    /// `snapshot` is called on every tick; returning `None` ends the timer
    /// (the owning store is gone). Calling this again replaces the timer.
    pub fn start_backup<F>(&self, snapshot: F)
    where
        F: Fn() -> Option<StoreSnapshot> + Send + 'static,
    {
        let Some(backup) = self.backup.clone() else {
            return;
        };
        let settings = match backup.init() {
            Ok(settings) => settings,
            Err(e) => {
                log::error!("Failed to initialize backup adapter: {e}");
                return;
            }
        };
        if settings.interval.is_zero() {
            log::warn!("Backup interval is zero, backup timer not started");
            return;
        }

        let (tx, rx) = mpsc::channel::<()>();
        let gate = Arc::clone(&self.backup_gate);
        let verbose_on = self.verbose;
        let spawned = std::thread::Builder::new()
            .name("stormdb-backup".into())
            .spawn(move || loop {
                match rx.recv_timeout(settings.interval) {
                    Err(RecvTimeoutError::Timeout) => {
                        let Some(data) = snapshot() else {
                            return;
                        };
                        let _guard = gate.lock();
                        verbose!(verbose_on, "Running scheduled backup");
                        if let Err(e) = backup.backup(&data) {
                            log::error!("Backup error: {e}");
                        }
                    }
                    Ok(()) | Err(RecvTimeoutError::Disconnected) => return,
                }
            });

        match spawned {
            Ok(_) => {
                verbose!(self.verbose, "Backup timer armed every {:?}", settings.interval);
                *self.timer.lock() = Some(tx);
            }
            Err(e) => log::error!("Failed to spawn backup thread: {e}"),
        }
    }

    /// Run one backup now, on the calling thread.
    pub fn backup_now(&self, data: &StoreSnapshot) -> Result<()> {
        let Some(backup) = &self.backup else {
            return Ok(());
        };
        let _guard = self.backup_gate.lock();
        backup.backup(data)
    }

    /// Disarm the timer. A backup already running is left to finish.
    pub fn stop_backup(&self) {
        if self.timer.lock().take().is_some() {
            verbose!(self.verbose, "Backup timer stopped");
        }
    }

    pub fn is_backup_running(&self) -> bool {
        self.timer.lock().is_some()
    }

    pub fn flush(&self) {
        if let Some(storage) = &self.storage {
            storage.flush();
        }
    }

    pub fn stats(&self) -> BTreeMap<String, WriteStats> {
        self.storage
            .as_ref()
            .map(|storage| storage.stats())
            .unwrap_or_default()
    }
}

impl Drop for PersistenceController {
    fn drop(&mut self) {
        self.stop_backup();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StormError;
    use crate::storage::BackupSettings;
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use std::time::Duration;

    #[derive(Default)]
    struct RecordingStorage {
        calls: Mutex<Vec<(String, String, usize)>>,
        fail: bool,
    }

    impl RecordingStorage {
        fn record(&self, kind: &str, snapshot: CollectionSnapshot) -> Result<()> {
            self.calls.lock().push((
                kind.to_string(),
                snapshot.collection_name,
                snapshot.collection_data.len(),
            ));
            if self.fail {
                return Err(StormError::Other("disk full".into()));
            }
            Ok(())
        }
    }

    impl StorageAdapter for RecordingStorage {
        fn init(&self) -> Result<Vec<CollectionSnapshot>> {
            if self.fail {
                return Err(StormError::Other("unreadable".into()));
            }
            Ok(vec![CollectionSnapshot {
                collection_name: "users".into(),
                collection_data: vec![json!({ "_id": "a" })],
                changes: Vec::new(),
            }])
        }

        fn insert(&self, snapshot: CollectionSnapshot) -> Result<()> {
            self.record("insert", snapshot)
        }

        fn update(&self, snapshot: CollectionSnapshot) -> Result<()> {
            self.record("update", snapshot)
        }

        fn delete(&self, snapshot: CollectionSnapshot) -> Result<()> {
            self.record("delete", snapshot)
        }
    }

    #[derive(Default)]
    struct CountingBackup {
        runs: Mutex<usize>,
    }

    impl BackupAdapter for CountingBackup {
        fn init(&self) -> Result<BackupSettings> {
            Ok(BackupSettings::every(Duration::from_millis(20)))
        }

        fn backup(&self, _collections: &StoreSnapshot) -> Result<()> {
            *self.runs.lock() += 1;
            Ok(())
        }
    }

    #[test]
    fn test_routes_full_snapshots() {
        let storage = Arc::new(RecordingStorage::default());
        let controller = PersistenceController::new(Some(storage.clone()), None, false);
        controller.on_insert("users", vec![json!({}), json!({})], vec![json!({})]);
        controller.on_update("users", vec![json!({})], Vec::new());
        controller.on_delete("posts", Vec::new(), Vec::new());

        assert_eq!(
            *storage.calls.lock(),
            vec![
                ("insert".to_string(), "users".to_string(), 2),
                ("update".to_string(), "users".to_string(), 1),
                ("delete".to_string(), "posts".to_string(), 0),
            ]
        );
        assert_eq!(controller.load().len(), 1);
    }

    #[test]
    fn test_adapter_failures_are_swallowed() {
        let storage = Arc::new(RecordingStorage {
            fail: true,
            ..Default::default()
        });
        let controller = PersistenceController::new(Some(storage.clone()), None, false);
        controller.on_insert("users", vec![json!({})], Vec::new());
        assert!(controller.load().is_empty());
        assert_eq!(storage.calls.lock().len(), 1);
    }

    #[test]
    fn test_without_adapters_everything_is_a_no_op() {
        let controller = PersistenceController::new(None, None, false);
        controller.on_insert("users", vec![json!({})], Vec::new());
        controller.flush();
        assert!(controller.load().is_empty());
        assert!(controller.stats().is_empty());
        assert!(controller.backup_now(&StoreSnapshot::new()).is_ok());
    }

    #[test]
    fn test_backup_timer_ticks_until_stopped() {
        let backup = Arc::new(CountingBackup::default());
        let controller = PersistenceController::new(None, Some(backup.clone()), false);
        controller.start_backup(|| Some(StoreSnapshot::new()));
        assert!(controller.is_backup_running());

        std::thread::sleep(Duration::from_millis(150));
        controller.stop_backup();
        assert!(!controller.is_backup_running());
        let after_stop = *backup.runs.lock();
        assert!(after_stop >= 2, "expected several ticks, got {after_stop}");

        std::thread::sleep(Duration::from_millis(80));
        assert!(*backup.runs.lock() <= after_stop + 1);
    }

    #[test]
    fn test_backup_timer_ends_when_snapshot_source_is_gone() {
        let backup = Arc::new(CountingBackup::default());
        let controller = PersistenceController::new(None, Some(backup.clone()), false);
        controller.start_backup(|| None);
        std::thread::sleep(Duration::from_millis(80));
        assert_eq!(*backup.runs.lock(), 0);
    }
}
