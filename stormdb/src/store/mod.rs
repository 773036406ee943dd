use crate::config::{Config, ConfigStore};
use crate::document::Document;
use crate::error::Result;
use crate::middleware::MiddlewareRegistry;
use crate::model::{validate_collection_name, Model};
use crate::query::Documents;
use crate::refs::DocumentLookup;
use crate::schema::Schema;
use crate::storage::{
    BackupAdapter, CollectionSnapshot, FileBackupAdapter, FileBackupOptions, FileStorageAdapter,
    FileStorageOptions, PersistenceController, StorageAdapter, StoreSnapshot, WriteStats,
};
use crate::util::{verbose, IdStrategy};
use parking_lot::{ReentrantMutex, RwLock};
use std::collections::BTreeMap;
use std::sync::{Arc, Weak};
use std::time::Duration;

/// One collection's documents plus the gate that serializes its writers.
#[derive(Default)]
pub(crate) struct CollectionData {
    /// Held by every mutation from target selection to commit. Re-entrant so
    /// middleware running inside a mutation may call back into the same model.
    pub(crate) gate: ReentrantMutex<()>,
    pub(crate) docs: RwLock<Documents>,
}

impl CollectionData {
    pub(crate) fn snapshot(&self) -> Vec<serde_json::Value> {
        self.docs.read().values().map(Document::to_stored).collect()
    }
}

pub(crate) struct StoreInner {
    pub(crate) config: ConfigStore,
    pub(crate) middleware: MiddlewareRegistry,
    pub(crate) persistence: PersistenceController,
    pub(crate) ids: IdStrategy,
    collections: RwLock<BTreeMap<String, Arc<CollectionData>>>,
}

impl StoreInner {
    /// Get or create the backing data of a collection.
    pub(crate) fn collection(&self, name: &str) -> Arc<CollectionData> {
        if let Some(data) = self.collections.read().get(name) {
            return Arc::clone(data);
        }
        Arc::clone(self.collections.write().entry(name.to_string()).or_default())
    }

    fn existing(&self, name: &str) -> Option<Arc<CollectionData>> {
        self.collections.read().get(name).cloned()
    }

    pub(crate) fn snapshot_all(&self) -> StoreSnapshot {
        let collections: Vec<(String, Arc<CollectionData>)> = self
            .collections
            .read()
            .iter()
            .map(|(name, data)| (name.clone(), Arc::clone(data)))
            .collect();
        collections
            .into_iter()
            .map(|(name, data)| (name, data.snapshot()))
            .collect()
    }

    fn restore(&self, snapshots: Vec<CollectionSnapshot>) {
        let verbose_on = self.config.get_config().verbose;
        for snapshot in snapshots {
            let mut docs = Documents::new();
            let mut skipped = 0usize;
            for json in snapshot.collection_data {
                match Document::from_stored(json) {
                    Some(doc) => {
                        if let Some(id) = doc.id().map(str::to_string) {
                            docs.insert(id, doc);
                        }
                    }
                    None => skipped += 1,
                }
            }
            if skipped > 0 {
                log::warn!(
                    "Skipped {skipped} malformed document(s) while loading {}",
                    snapshot.collection_name
                );
            }
            verbose!(
                verbose_on,
                "Loaded {} document(s) into {}",
                docs.len(),
                snapshot.collection_name
            );
            let data = self.collection(&snapshot.collection_name);
            *data.docs.write() = docs;
        }
    }
}

impl DocumentLookup for StoreInner {
    fn lookup(&self, collection: &str, id: &str) -> Option<Document> {
        let data = self.existing(collection)?;
        let doc = data.docs.read().get(id).cloned();
        doc
    }
}

/// An embedded document store.
///
/// Owns the collection registry, the middleware registry, the configuration
/// and the persistence controller. [`Model`] handles share it through an `Arc`.
pub struct Store {
    inner: Arc<StoreInner>,
}

impl Store {
    pub fn builder() -> StoreBuilder {
        StoreBuilder::default()
    }

    /// Open a store with the file adapters wired from `config`
    /// (`<dataDirectory>/*.sfc` and `<dataDirectory>/backup/*.tar`).
    pub fn open(config: Config) -> Result<Self> {
        config.validate()?;
        let mut builder = Store::builder().config(config.clone());
        if config.disk_write {
            builder = builder.storage(FileStorageAdapter::new(FileStorageOptions {
                data_folder: config.data_directory.clone(),
                throttle: Duration::from_millis(config.disk_write_throttle),
                verbose: config.verbose,
            }));
        }
        if config.backup_files {
            builder = builder.backup(FileBackupAdapter::new(FileBackupOptions {
                backup_folder: config.backup_directory(),
                backup_interval: config.backup_interval,
                max_backups: config.max_backups,
                verbose: config.verbose,
            }));
        }
        builder.build()
    }

    /// An in-memory store with default settings and no persistence.
    pub fn in_memory() -> Self {
        Store::from_inner(StoreInner {
            config: ConfigStore::default(),
            middleware: MiddlewareRegistry::new(),
            persistence: PersistenceController::new(None, None, false),
            ids: IdStrategy::default(),
            collections: RwLock::new(BTreeMap::new()),
        })
    }

    fn from_inner(inner: StoreInner) -> Self {
        Store {
            inner: Arc::new(inner),
        }
    }

    /// Compile a declarative schema definition.
    pub fn schema(&self, definition: &serde_json::Value) -> Result<Schema> {
        Schema::from_json(definition)
    }

    /// Per-collection facade. The collection is created on first use.
    pub fn model(&self, name: &str, schema: Option<Schema>) -> Result<Model> {
        validate_collection_name(name)?;
        Ok(Model::new(
            Arc::clone(&self.inner),
            name,
            schema.unwrap_or_default(),
        ))
    }

    pub fn middleware(&self) -> &MiddlewareRegistry {
        &self.inner.middleware
    }

    pub fn config(&self) -> Config {
        self.inner.config.get_config()
    }

    /// Replace the runtime configuration. Strictness, default fields and
    /// verbosity apply immediately; adapter settings are fixed at build time.
    pub fn set_config(&self, options: &serde_json::Value) -> Result<()> {
        self.inner.config.set_config(options)
    }

    pub fn collection_names(&self) -> Vec<String> {
        self.inner.collections.read().keys().cloned().collect()
    }

    /// Full snapshot of every collection in stored form.
    pub fn snapshot(&self) -> StoreSnapshot {
        self.inner.snapshot_all()
    }

    pub fn stats(&self) -> BTreeMap<String, WriteStats> {
        self.inner.persistence.stats()
    }

    /// Wait until every debounced write has reached the storage adapter.
    pub fn flush(&self) {
        self.inner.persistence.flush();
    }

    /// Run one backup synchronously.
    pub fn backup_now(&self) -> Result<()> {
        let snapshot = self.inner.snapshot_all();
        self.inner.persistence.backup_now(&snapshot)
    }

    pub fn stop_backup(&self) {
        self.inner.persistence.stop_backup();
    }

    /// Stop the backup timer and flush pending writes.
    pub fn close(&self) {
        self.inner.persistence.stop_backup();
        self.inner.persistence.flush();
    }
}

impl std::fmt::Debug for Store {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Store")
            .field("collections", &self.collection_names())
            .field("middleware", &self.inner.middleware)
            .finish()
    }
}

#[derive(Default)]
pub struct StoreBuilder {
    config: Config,
    storage: Option<Arc<dyn StorageAdapter>>,
    backup: Option<Arc<dyn BackupAdapter>>,
    ids: IdStrategy,
}

impl StoreBuilder {
    pub fn config(mut self, config: Config) -> Self {
        self.config = config;
        self
    }

    pub fn storage(mut self, adapter: impl StorageAdapter + 'static) -> Self {
        self.storage = Some(Arc::new(adapter));
        self
    }

    pub fn storage_arc(mut self, adapter: Arc<dyn StorageAdapter>) -> Self {
        self.storage = Some(adapter);
        self
    }

    pub fn backup(mut self, adapter: impl BackupAdapter + 'static) -> Self {
        self.backup = Some(Arc::new(adapter));
        self
    }

    pub fn backup_arc(mut self, adapter: Arc<dyn BackupAdapter>) -> Self {
        self.backup = Some(adapter);
        self
    }

    pub fn id_strategy(mut self, ids: IdStrategy) -> Self {
        self.ids = ids;
        self
    }

    /// Load persisted collections and arm the backup timer.
    pub fn build(self) -> Result<Store> {
        let verbose_on = self.config.verbose;
        let config = ConfigStore::new(self.config)?;
        let persistence = PersistenceController::new(self.storage, self.backup, verbose_on);

        let store = Store::from_inner(StoreInner {
            config,
            middleware: MiddlewareRegistry::new(),
            persistence,
            ids: self.ids,
            collections: RwLock::new(BTreeMap::new()),
        });

        let snapshots = store.inner.persistence.load();
        store.inner.restore(snapshots);

        let weak: Weak<StoreInner> = Arc::downgrade(&store.inner);
        store
            .inner
            .persistence
            .start_backup(move || weak.upgrade().map(|inner| inner.snapshot_all()));

        Ok(store)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::BackupSettings;
    use parking_lot::Mutex;
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use tempfile::TempDir;

    fn file_config(dir: &TempDir) -> Config {
        Config {
            data_directory: dir.path().to_path_buf(),
            disk_write_throttle: 50,
            ..Config::default()
        }
    }

    #[test]
    fn test_open_creates_and_reloads() {
        let tmp = TempDir::new().unwrap();
        {
            let store = Store::open(file_config(&tmp)).unwrap();
            let users = store.model("users", None).unwrap();
            users.insert_one(json!({ "name": "Ann" })).unwrap();
            store.close();
        }
        assert!(tmp.path().join("users.sfc").exists());
        assert!(tmp.path().join("backup").is_dir());

        let store = Store::open(file_config(&tmp)).unwrap();
        let users = store.model("users", None).unwrap();
        let found = users.find(json!({ "name": "Ann" })).unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0]["_version"], json!(1));
    }

    #[test]
    fn test_backup_now_writes_archive() {
        let tmp = TempDir::new().unwrap();
        let store = Store::open(file_config(&tmp)).unwrap();
        store.model("users", None).unwrap().insert_one(json!({ "a": 1 })).unwrap();
        store.backup_now().unwrap();
        let archives: Vec<_> = std::fs::read_dir(tmp.path().join("backup"))
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.path().extension().is_some_and(|x| x == "tar"))
            .collect();
        assert_eq!(archives.len(), 1);
        store.close();
    }

    #[test]
    fn test_disk_write_disabled() {
        let tmp = TempDir::new().unwrap();
        let config = Config {
            disk_write: false,
            backup_files: false,
            ..file_config(&tmp)
        };
        let store = Store::open(config).unwrap();
        store.model("users", None).unwrap().insert_one(json!({ "a": 1 })).unwrap();
        store.close();
        assert!(!tmp.path().join("users.sfc").exists());
        assert!(store.stats().is_empty());
    }

    #[test]
    fn test_invalid_config_rejected() {
        let config = Config {
            disk_write_throttle: 5,
            ..Config::default()
        };
        assert!(Store::builder().config(config).build().is_err());
    }

    struct SnapshotProbe {
        seen: Arc<Mutex<Vec<usize>>>,
    }

    impl BackupAdapter for SnapshotProbe {
        fn init(&self) -> Result<BackupSettings> {
            Ok(BackupSettings::every(Duration::from_millis(30)))
        }

        fn backup(&self, collections: &StoreSnapshot) -> Result<()> {
            let total = collections.values().map(Vec::len).sum();
            self.seen.lock().push(total);
            Ok(())
        }
    }

    #[test]
    fn test_backup_timer_sees_current_data() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let store = Store::builder()
            .backup(SnapshotProbe { seen: seen.clone() })
            .build()
            .unwrap();
        let items = store.model("items", None).unwrap();
        items
            .insert_many(json!([{ "n": 1 }, { "n": 2 }, { "n": 3 }]))
            .unwrap();
        std::thread::sleep(Duration::from_millis(120));
        store.stop_backup();
        assert!(seen.lock().iter().any(|total| *total == 3));
    }

    #[test]
    fn test_collections_are_isolated_between_stores() {
        let a = Store::in_memory();
        let b = Store::in_memory();
        a.model("users", None).unwrap().insert_one(json!({ "x": 1 })).unwrap();
        assert_eq!(b.model("users", None).unwrap().count(json!({})).unwrap(), 0);
        assert_eq!(a.collection_names(), vec!["users"]);
    }
}
