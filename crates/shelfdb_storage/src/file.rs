//! File-based storage backend for persistent storage.

use crate::backend::StorageBackend;
use crate::error::{StorageError, StorageResult};
use async_trait::async_trait;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

/// A directory-backed storage backend.
///
/// Every key is stored in its own file inside the backend directory. File
/// names are the key with every byte outside `[A-Za-z0-9_-]` written as
/// `%XX`, so arbitrary keys (including the `/` separators ShelfDB uses) map
/// to flat, portable names.
///
/// # Durability
///
/// `set` writes a sibling temporary file and renames it over the target, so
/// a crash never leaves a half-written value behind. Nothing is fsynced;
/// the engine does not rely on durability across power loss.
///
/// # Example
///
/// ```no_run
/// use shelfdb_storage::{FileBackend, StorageBackend};
/// use std::path::Path;
///
/// async fn demo() {
///     let backend = FileBackend::open(Path::new("shelf-data")).unwrap();
///     backend.set("shelfdb/v1/databases/keys", "[]".into()).await.unwrap();
/// }
/// ```
#[derive(Debug, Clone)]
pub struct FileBackend {
    dir: PathBuf,
}

impl FileBackend {
    /// Opens or creates a file backend rooted at `dir`.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be created.
    pub fn open(dir: &Path) -> StorageResult<Self> {
        std::fs::create_dir_all(dir)?;
        Ok(Self {
            dir: dir.to_path_buf(),
        })
    }

    /// Returns the directory holding the stored files.
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Lists every key currently stored, in ascending order.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be read or a file name is
    /// not a valid escaped key.
    pub async fn keys(&self) -> StorageResult<Vec<String>> {
        let mut entries = tokio::fs::read_dir(&self.dir).await?;
        let mut keys = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name();
            let Some(name) = name.to_str() else {
                continue;
            };
            // Temporary files carry a `.tmp` suffix that escaping never produces.
            if name.contains('.') {
                continue;
            }
            keys.push(unescape_key(name)?);
        }
        keys.sort();
        Ok(keys)
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.dir.join(escape_key(key))
    }
}

#[async_trait]
impl StorageBackend for FileBackend {
    async fn get(&self, key: &str) -> StorageResult<Option<String>> {
        match tokio::fs::read(self.path_for(key)).await {
            Ok(bytes) => String::from_utf8(bytes)
                .map(Some)
                .map_err(|_| StorageError::InvalidUtf8 {
                    key: key.to_string(),
                }),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn set(&self, key: &str, value: String) -> StorageResult<()> {
        let target = self.path_for(key);
        let mut tmp = target.clone().into_os_string();
        tmp.push(".tmp");
        let tmp = PathBuf::from(tmp);
        tokio::fs::write(&tmp, value.as_bytes()).await?;
        tokio::fs::rename(&tmp, &target).await?;
        Ok(())
    }

    async fn remove(&self, key: &str) -> StorageResult<()> {
        match tokio::fs::remove_file(self.path_for(key)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

fn escape_key(key: &str) -> String {
    let mut out = String::with_capacity(key.len());
    for byte in key.bytes() {
        if byte.is_ascii_alphanumeric() || byte == b'_' || byte == b'-' {
            out.push(char::from(byte));
        } else {
            out.push_str(&format!("%{byte:02X}"));
        }
    }
    if out.is_empty() {
        // The empty key still needs a file name.
        out.push('%');
    }
    out
}

fn unescape_key(name: &str) -> StorageResult<String> {
    if name == "%" {
        return Ok(String::new());
    }
    let bytes = name.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' {
            let hex = name
                .get(i + 1..i + 3)
                .ok_or_else(|| StorageError::InvalidKey(name.to_string()))?;
            let byte = u8::from_str_radix(hex, 16)
                .map_err(|_| StorageError::InvalidKey(name.to_string()))?;
            out.push(byte);
            i += 3;
        } else {
            out.push(bytes[i]);
            i += 1;
        }
    }
    String::from_utf8(out).map_err(|_| StorageError::InvalidKey(name.to_string()))
}
