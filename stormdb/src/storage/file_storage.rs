use super::helpers::{
    collection_file_name, collection_name, compress_collection, decompress_collection,
    ensure_folder_exists, list_files, migrate_legacy_files, try_delete_file, write_atomic,
    COLLECTION_EXT,
};
use super::{CollectionSnapshot, StorageAdapter, WriteStats};
use crate::error::Result;
use crate::util::verbose;
use parking_lot::{Condvar, Mutex};
use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct FileStorageOptions {
    pub data_folder: PathBuf,
    /// Debounce window between the first change and the write.
    pub throttle: Duration,
    pub verbose: bool,
}

impl Default for FileStorageOptions {
    fn default() -> Self {
        FileStorageOptions {
            data_folder: PathBuf::from("./data"),
            throttle: Duration::from_millis(100),
            verbose: false,
        }
    }
}

#[derive(Default)]
struct Slot {
    /// Latest snapshot not yet written.
    pending: Option<Vec<serde_json::Value>>,
    /// A write cycle is scheduled or running.
    armed: bool,
    stats: WriteStats,
}

struct Shared {
    options: FileStorageOptions,
    slots: Mutex<HashMap<String, Slot>>,
    idle: Condvar,
}

/// Stores each collection as `<data_folder>/<name>.sfc` (gzip JSON array).
///
/// Notifications only replace the pending snapshot of their collection. The
/// first one arms a write cycle that sleeps for the throttle window and then
/// writes whatever snapshot is pending at that moment, so a burst of changes
/// costs a single write reflecting the latest state. A change that lands while
/// a write is in progress re-arms the cycle once it completes.
pub struct FileStorageAdapter {
    shared: Arc<Shared>,
}

impl FileStorageAdapter {
    pub fn new(options: FileStorageOptions) -> Self {
        FileStorageAdapter {
            shared: Arc::new(Shared {
                options,
                slots: Mutex::new(HashMap::new()),
                idle: Condvar::new(),
            }),
        }
    }

    pub fn options(&self) -> &FileStorageOptions {
        &self.shared.options
    }

    fn schedule(&self, snapshot: CollectionSnapshot) -> Result<()> {
        let name = snapshot.collection_name;
        {
            let mut slots = self.shared.slots.lock();
            let slot = slots.entry(name.clone()).or_default();
            slot.pending = Some(snapshot.collection_data);
            if slot.armed {
                slot.stats.coalesced += 1;
                return Ok(());
            }
            slot.armed = true;
        }

        let shared = Arc::clone(&self.shared);
        let thread_name = format!("stormdb-write-{name}");
        let cycle_name = name.clone();
        let spawned = std::thread::Builder::new()
            .name(thread_name)
            .spawn(move || shared.run_cycle(&cycle_name, shared.options.throttle));
        if let Err(e) = spawned {
            log::error!("Failed to spawn write thread for {name}, writing inline: {e}");
            self.shared.run_cycle(&name, Duration::ZERO);
        }
        Ok(())
    }

    fn restore(&self) -> Result<Vec<CollectionSnapshot>> {
        let opts = &self.shared.options;
        ensure_folder_exists(&opts.data_folder)?;
        migrate_legacy_files(&opts.data_folder, opts.verbose)?;

        let files = list_files(&opts.data_folder, COLLECTION_EXT)?;
        if !files.is_empty() {
            verbose!(opts.verbose, "Restoring data from files:");
        }

        let mut collections = Vec::with_capacity(files.len());
        for path in files {
            let Some(name) = collection_name(&path) else {
                continue;
            };
            verbose!(opts.verbose, "  -> {}", path.display());
            match std::fs::read(&path)
                .map_err(Into::into)
                .and_then(|bytes| decompress_collection(&bytes))
            {
                Ok(collection_data) => collections.push(CollectionSnapshot {
                    collection_name: name,
                    collection_data,
                    changes: Vec::new(),
                }),
                Err(e) => log::error!("Failed to restore {}: {e}", path.display()),
            }
        }
        Ok(collections)
    }
}

impl Shared {
    fn run_cycle(&self, name: &str, delay: Duration) {
        loop {
            if !delay.is_zero() {
                std::thread::sleep(delay);
            }

            let data = {
                let mut slots = self.slots.lock();
                match slots.get_mut(name).and_then(|slot| slot.pending.take()) {
                    Some(data) => data,
                    None => {
                        self.disarm(&mut slots, name);
                        return;
                    }
                }
            };

            let result = self.write_collection(name, &data);
            if let Err(e) = &result {
                log::error!("Failed to write {name}: {e}");
            }

            let mut slots = self.slots.lock();
            let Some(slot) = slots.get_mut(name) else {
                return;
            };
            if result.is_ok() {
                slot.stats.writes += 1;
            }
            if slot.pending.is_none() {
                self.disarm(&mut slots, name);
                return;
            }
        }
    }

    fn disarm(&self, slots: &mut HashMap<String, Slot>, name: &str) {
        if let Some(slot) = slots.get_mut(name) {
            slot.armed = false;
        }
        self.idle.notify_all();
    }

    fn write_collection(&self, name: &str, data: &[serde_json::Value]) -> Result<()> {
        let opts = &self.options;
        let target = opts.data_folder.join(collection_file_name(name));

        if data.is_empty() {
            verbose!(opts.verbose, "Removing empty file: {}", target.display());
            return try_delete_file(&target, opts.verbose);
        }

        verbose!(opts.verbose, "Compress data before writing: {name}");
        let bytes = compress_collection(data)?;
        write_atomic(&target, &bytes)?;
        verbose!(opts.verbose, "Wrote {} ({} bytes)", target.display(), bytes.len());
        Ok(())
    }
}

impl StorageAdapter for FileStorageAdapter {
    fn init(&self) -> Result<Vec<CollectionSnapshot>> {
        self.restore()
    }

    fn insert(&self, snapshot: CollectionSnapshot) -> Result<()> {
        self.schedule(snapshot)
    }

    fn update(&self, snapshot: CollectionSnapshot) -> Result<()> {
        self.schedule(snapshot)
    }

    fn delete(&self, snapshot: CollectionSnapshot) -> Result<()> {
        self.schedule(snapshot)
    }

    fn flush(&self) {
        let mut slots = self.shared.slots.lock();
        while slots.values().any(|slot| slot.armed) {
            self.shared.idle.wait(&mut slots);
        }
    }

    fn stats(&self) -> BTreeMap<String, WriteStats> {
        self.shared
            .slots
            .lock()
            .iter()
            .map(|(name, slot)| (name.clone(), slot.stats))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use tempfile::TempDir;

    fn adapter(dir: &TempDir, throttle_ms: u64) -> FileStorageAdapter {
        FileStorageAdapter::new(FileStorageOptions {
            data_folder: dir.path().to_path_buf(),
            throttle: Duration::from_millis(throttle_ms),
            verbose: false,
        })
    }

    fn snapshot(name: &str, data: Vec<serde_json::Value>) -> CollectionSnapshot {
        CollectionSnapshot {
            collection_name: name.into(),
            collection_data: data,
            changes: Vec::new(),
        }
    }

    fn read(dir: &TempDir, name: &str) -> Vec<serde_json::Value> {
        let bytes = std::fs::read(dir.path().join(format!("{name}.sfc"))).unwrap();
        decompress_collection(&bytes).unwrap()
    }

    #[test]
    fn test_burst_is_coalesced_into_one_write() {
        let dir = TempDir::new().unwrap();
        let storage = adapter(&dir, 200);
        for n in 1..=5 {
            let data = (0..n).map(|i| json!({ "_id": i.to_string() })).collect();
            storage.insert(snapshot("items", data)).unwrap();
        }
        storage.flush();

        assert_eq!(read(&dir, "items").len(), 5);
        let stats = storage.stats();
        assert_eq!(stats["items"], WriteStats { writes: 1, coalesced: 4 });
    }

    #[test]
    fn test_empty_snapshot_deletes_file() {
        let dir = TempDir::new().unwrap();
        let storage = adapter(&dir, 50);
        storage.insert(snapshot("items", vec![json!({ "_id": "a" })])).unwrap();
        storage.flush();
        assert!(dir.path().join("items.sfc").exists());

        storage.delete(snapshot("items", Vec::new())).unwrap();
        storage.flush();
        assert!(!dir.path().join("items.sfc").exists());
    }

    #[test]
    fn test_init_restores_and_migrates() {
        let dir = TempDir::new().unwrap();
        let storage = adapter(&dir, 50);
        storage.insert(snapshot("users", vec![json!({ "_id": "u" })])).unwrap();
        storage.flush();
        std::fs::write(dir.path().join("posts.json"), r#"[{"_id":"p"}]"#).unwrap();
        std::fs::write(dir.path().join("broken.sfc"), b"garbage").unwrap();

        let restored = adapter(&dir, 50).init().unwrap();
        let mut names: Vec<&str> = restored.iter().map(|c| c.collection_name.as_str()).collect();
        names.sort();
        assert_eq!(names, vec!["posts", "users"]);
        assert!(!dir.path().join("posts.json").exists());
    }

    #[test]
    fn test_separate_collections_write_independently() {
        let dir = TempDir::new().unwrap();
        let storage = adapter(&dir, 50);
        storage.insert(snapshot("as", vec![json!({ "_id": "1" })])).unwrap();
        storage.insert(snapshot("bs", vec![json!({ "_id": "2" })])).unwrap();
        storage.flush();
        assert_eq!(read(&dir, "as"), vec![json!({ "_id": "1" })]);
        assert_eq!(read(&dir, "bs"), vec![json!({ "_id": "2" })]);
    }
}
