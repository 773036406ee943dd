// File helpers shared by the storage and backup adapters

use crate::error::{Result, StormError};
use crate::util::verbose;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

/// Extension of gzip-compressed collection files.
pub const COLLECTION_EXT: &str = "sfc";
pub const LEGACY_EXT: &str = "json";
pub const BACKUP_EXT: &str = "tar";

pub fn ensure_folder_exists(folder: &Path) -> Result<()> {
    std::fs::create_dir_all(folder)?;
    Ok(())
}

/// Delete a file, treating "not found" as success.
pub fn try_delete_file(path: &Path, verbose_on: bool) -> Result<()> {
    match std::fs::remove_file(path) {
        Ok(()) => {
            verbose!(verbose_on, "Deleted file: {}", path.display());
            Ok(())
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

pub fn collection_file_name(collection: &str) -> String {
    format!("{collection}.{COLLECTION_EXT}")
}

pub fn gzip(bytes: &[u8]) -> Result<Vec<u8>> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(bytes)?;
    Ok(encoder.finish()?)
}

pub fn gunzip(bytes: &[u8]) -> Result<Vec<u8>> {
    let mut decoder = GzDecoder::new(bytes);
    let mut out = Vec::new();
    decoder.read_to_end(&mut out)?;
    Ok(out)
}

/// Serialize a collection snapshot as a gzip-compressed JSON array.
pub fn compress_collection(documents: &[serde_json::Value]) -> Result<Vec<u8>> {
    let json = serde_json::to_vec(documents)?;
    gzip(&json)
}

/// Inverse of [`compress_collection`].
pub fn decompress_collection(bytes: &[u8]) -> Result<Vec<serde_json::Value>> {
    let json = gunzip(bytes)?;
    match serde_json::from_slice(&json)? {
        serde_json::Value::Array(items) => Ok(items),
        other => Err(StormError::Other(format!(
            "Collection file does not hold an array (found {})",
            json_type(&other)
        ))),
    }
}

fn json_type(value: &serde_json::Value) -> &'static str {
    match value {
        serde_json::Value::Null => "null",
        serde_json::Value::Bool(_) => "boolean",
        serde_json::Value::Number(_) => "number",
        serde_json::Value::String(_) => "string",
        serde_json::Value::Array(_) => "array",
        serde_json::Value::Object(_) => "object",
    }
}

/// Write `bytes` to `target` through a temp file in the same folder, then
/// rename it into place.
pub fn write_atomic(target: &Path, bytes: &[u8]) -> Result<()> {
    let folder = target
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    ensure_folder_exists(folder)?;
    let mut tmp = tempfile::NamedTempFile::new_in(folder)?;
    tmp.write_all(bytes)?;
    tmp.as_file().sync_all()?;
    tmp.persist(target).map_err(|e| StormError::Io(e.error))?;
    Ok(())
}

/// List files in `folder` with the given extension, sorted by name.
pub fn list_files(folder: &Path, ext: &str) -> Result<Vec<PathBuf>> {
    let pattern = folder.join(format!("*.{ext}"));
    let pattern = pattern.to_string_lossy();
    let mut files: Vec<PathBuf> = glob::glob(&pattern)
        .map_err(|e| StormError::Other(format!("Glob error: {e}")))?
        .filter_map(|r| r.ok())
        .filter(|p| p.is_file())
        .collect();
    files.sort();
    Ok(files)
}

/// Collection name encoded in a data file path (`users.sfc` -> `users`).
pub fn collection_name(path: &Path) -> Option<String> {
    path.file_stem()
        .and_then(|s| s.to_str())
        .map(str::to_string)
}

/// Convert legacy plain JSON collection files into compressed ones.
/// Each file is converted independently; failures are logged and skipped.
pub fn migrate_legacy_files(folder: &Path, verbose_on: bool) -> Result<usize> {
    ensure_folder_exists(folder)?;
    let mut converted = 0;
    for json_path in list_files(folder, LEGACY_EXT)? {
        let target = json_path.with_extension(COLLECTION_EXT);
        verbose!(verbose_on, "Converting {} to {}", json_path.display(), COLLECTION_EXT);
        let result = std::fs::read(&json_path)
            .map_err(StormError::from)
            .and_then(|content| gzip(&content))
            .and_then(|compressed| write_atomic(&target, &compressed))
            .and_then(|()| try_delete_file(&json_path, verbose_on));
        match result {
            Ok(()) => converted += 1,
            Err(e) => log::error!("Error converting {} to gzip: {e}", json_path.display()),
        }
    }
    Ok(converted)
}
