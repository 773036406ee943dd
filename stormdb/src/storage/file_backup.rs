use super::helpers::{
    collection_file_name, compress_collection, ensure_folder_exists, list_files, try_delete_file,
    write_atomic, BACKUP_EXT,
};
use super::{BackupAdapter, BackupSettings, StoreSnapshot};
use crate::error::{Result, StormError};
use crate::util::{unix_now, unix_now_millis, verbose};
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use tar::{Builder, Header};

#[derive(Debug, Clone)]
pub struct FileBackupOptions {
    pub backup_folder: PathBuf,
    /// Minutes between backups.
    pub backup_interval: u64,
    /// Archives kept after each backup (newest first).
    pub max_backups: usize,
    pub verbose: bool,
}

impl Default for FileBackupOptions {
    fn default() -> Self {
        FileBackupOptions {
            backup_folder: PathBuf::from("./data/backup"),
            backup_interval: 60,
            max_backups: 5,
            verbose: false,
        }
    }
}

/// Writes `<backup_folder>/<unix millis>.tar` archives holding one
/// gzip-compressed `<collection>.sfc` member per collection.
pub struct FileBackupAdapter {
    options: FileBackupOptions,
}

impl FileBackupAdapter {
    pub fn new(options: FileBackupOptions) -> Self {
        FileBackupAdapter { options }
    }

    pub fn options(&self) -> &FileBackupOptions {
        &self.options
    }

    /// Build the archive in memory.
    fn build_archive(&self, collections: &StoreSnapshot) -> Result<Vec<u8>> {
        let mut builder = Builder::new(Vec::new());
        let mtime = u64::try_from(unix_now()).unwrap_or(0);
        for (name, documents) in collections {
            let file_name = collection_file_name(name);
            let content = compress_collection(documents)?;

            // append_data writes a GNU long-name entry for names over 100 bytes
            let mut header = Header::new_gnu();
            header.set_size(content.len() as u64);
            header.set_mode(0o644);
            header.set_mtime(mtime);
            builder
                .append_data(&mut header, &file_name, content.as_slice())
                .map_err(|e| StormError::Other(format!("tar append '{file_name}': {e}")))?;
            verbose!(self.options.verbose, "Prepared for backup: {file_name}");
        }
        builder
            .into_inner()
            .map_err(|e| StormError::Other(format!("tar finish: {e}")))
    }

    /// Pick a `<millis>.tar` name not used yet in this folder.
    fn next_archive_path(&self) -> PathBuf {
        let mut millis = unix_now_millis();
        loop {
            let path = self
                .options
                .backup_folder
                .join(format!("{millis}.{BACKUP_EXT}"));
            if !path.exists() {
                return path;
            }
            millis += 1;
        }
    }

    /// Delete all but the newest `max_backups` archives, by modification time.
    pub fn clean_expired(&self) -> Result<usize> {
        let mut archives: Vec<(SystemTime, PathBuf)> = list_files(&self.options.backup_folder, BACKUP_EXT)?
            .into_iter()
            .map(|path| {
                let modified = std::fs::metadata(&path)
                    .and_then(|m| m.modified())
                    .unwrap_or(SystemTime::UNIX_EPOCH);
                (modified, path)
            })
            .collect();
        if archives.len() <= self.options.max_backups {
            return Ok(0);
        }

        // Newest first; names are timestamps so they break mtime ties.
        archives.sort_by(|a, b| b.cmp(a));
        let mut deleted = 0;
        for (_, path) in archives.iter().skip(self.options.max_backups) {
            verbose!(self.options.verbose, "Deleting expired backup: {}", path.display());
            match try_delete_file(path, self.options.verbose) {
                Ok(()) => deleted += 1,
                Err(e) => log::warn!("Failed to delete expired backup {}: {e}", path.display()),
            }
        }
        Ok(deleted)
    }

    pub fn backup_folder(&self) -> &Path {
        &self.options.backup_folder
    }
}

impl BackupAdapter for FileBackupAdapter {
    fn init(&self) -> Result<BackupSettings> {
        ensure_folder_exists(&self.options.backup_folder)?;
        Ok(BackupSettings::minutes(self.options.backup_interval))
    }

    fn backup(&self, collections: &StoreSnapshot) -> Result<()> {
        if collections.is_empty() {
            verbose!(self.options.verbose, "Backup data is empty, skipping backup.");
            return Ok(());
        }

        ensure_folder_exists(&self.options.backup_folder)?;
        let archive = self.build_archive(collections)?;
        let target = self.next_archive_path();
        write_atomic(&target, &archive)?;
        verbose!(self.options.verbose, "Backup file created: {}", target.display());

        if let Err(e) = self.clean_expired() {
            log::error!("Error cleaning expired backups: {e}");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::helpers::decompress_collection;
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use std::io::Read;
    use tempfile::TempDir;

    fn adapter(dir: &TempDir, max_backups: usize) -> FileBackupAdapter {
        FileBackupAdapter::new(FileBackupOptions {
            backup_folder: dir.path().join("backup"),
            max_backups,
            ..Default::default()
        })
    }

    fn sample() -> StoreSnapshot {
        let mut data = StoreSnapshot::new();
        data.insert("users".into(), vec![json!({ "_id": "u1" })]);
        data.insert("posts".into(), vec![json!({ "_id": "p1" }), json!({ "_id": "p2" })]);
        data
    }

    #[test]
    fn test_init_reports_interval_and_creates_folder() {
        let dir = TempDir::new().unwrap();
        let backup = adapter(&dir, 5);
        let settings = backup.init().unwrap();
        assert_eq!(settings, BackupSettings::minutes(60));
        assert!(dir.path().join("backup").is_dir());
    }

    #[test]
    fn test_archive_members_are_gzipped_collections() {
        let dir = TempDir::new().unwrap();
        let backup = adapter(&dir, 5);
        backup.backup(&sample()).unwrap();

        let archives = list_files(backup.backup_folder(), BACKUP_EXT).unwrap();
        assert_eq!(archives.len(), 1);

        let file = std::fs::File::open(&archives[0]).unwrap();
        let mut archive = tar::Archive::new(file);
        let mut members = Vec::new();
        for entry in archive.entries().unwrap() {
            let mut entry = entry.unwrap();
            let name = entry.path().unwrap().to_string_lossy().to_string();
            let mut bytes = Vec::new();
            entry.read_to_end(&mut bytes).unwrap();
            members.push((name, decompress_collection(&bytes).unwrap().len()));
        }
        assert_eq!(
            members,
            vec![("posts.sfc".to_string(), 2), ("users.sfc".to_string(), 1)]
        );
    }

    #[test]
    fn test_long_collection_names_are_archived() {
        let dir = TempDir::new().unwrap();
        let backup = adapter(&dir, 5);
        let long_name = format!("{}s", "a".repeat(120));
        let mut data = StoreSnapshot::new();
        data.insert(long_name.clone(), vec![json!({ "_id": "x1" })]);
        data.insert("users".into(), vec![json!({ "_id": "u1" })]);
        backup.backup(&data).unwrap();

        let archives = list_files(backup.backup_folder(), BACKUP_EXT).unwrap();
        assert_eq!(archives.len(), 1);
        let mut archive = tar::Archive::new(std::fs::File::open(&archives[0]).unwrap());
        let names: Vec<String> = archive
            .entries()
            .unwrap()
            .map(|entry| entry.unwrap().path().unwrap().to_string_lossy().to_string())
            .collect();
        assert_eq!(names, vec![format!("{long_name}.sfc"), "users.sfc".to_string()]);
    }

    #[test]
    fn test_empty_snapshot_is_skipped() {
        let dir = TempDir::new().unwrap();
        let backup = adapter(&dir, 5);
        backup.backup(&StoreSnapshot::new()).unwrap();
        assert!(!dir.path().join("backup").exists());
    }

    #[test]
    fn test_retention_keeps_newest() {
        let dir = TempDir::new().unwrap();
        let backup = adapter(&dir, 5);
        let mut created = Vec::new();
        for _ in 0..8 {
            backup.backup(&sample()).unwrap();
            for path in list_files(backup.backup_folder(), BACKUP_EXT).unwrap() {
                if !created.contains(&path) {
                    created.push(path);
                }
            }
            std::thread::sleep(std::time::Duration::from_millis(5));
        }
        assert_eq!(created.len(), 8);

        let remaining = list_files(backup.backup_folder(), BACKUP_EXT).unwrap();
        assert_eq!(remaining, created[3..].to_vec());
    }
}
