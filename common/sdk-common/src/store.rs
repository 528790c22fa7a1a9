//! Durable key-value storage used to persist SDK state across launches.
//!
//! Stores only guarantee atomic single-key reads and writes. Anything that
//! spans several keys is the caller's responsibility.
use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("failed to access the backing store: {0}")]
    Io(#[from] io::Error),
    #[error("store lock was poisoned")]
    Poisoned,
}

/// A simple key-value store wrapper, modeled on the platform defaults store.
pub trait DataStore: Send + Sync {
    fn get(&self, key: &str) -> Option<Vec<u8>>;
    fn set(&self, key: &str, value: Vec<u8>) -> Result<(), StoreError>;
    fn remove(&self, key: &str) -> Result<(), StoreError>;

    fn get_bool(&self, key: &str) -> bool {
        matches!(self.get(key).as_deref(), Some(b"1"))
    }

    fn set_bool(&self, key: &str, value: bool) -> Result<(), StoreError> {
        let encoded = if value { b"1".to_vec() } else { b"0".to_vec() };
        self.set(key, encoded)
    }
}

#[derive(Default)]
pub struct MemoryStore {
    values: RwLock<HashMap<String, Vec<u8>>>,
}

impl MemoryStore {
    pub fn new() -> MemoryStore {
        MemoryStore::default()
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.values
            .read()
            .map(|values| values.contains_key(key))
            .unwrap_or(false)
    }
}

impl DataStore for MemoryStore {
    fn get(&self, key: &str) -> Option<Vec<u8>> {
        self.values.read().ok()?.get(key).cloned()
    }

    fn set(&self, key: &str, value: Vec<u8>) -> Result<(), StoreError> {
        self.values
            .write()
            .map_err(|_| StoreError::Poisoned)?
            .insert(key.to_owned(), value);
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), StoreError> {
        self.values
            .write()
            .map_err(|_| StoreError::Poisoned)?
            .remove(key);
        Ok(())
    }
}

/// Directory-backed store: one file per key, replaced through a rename so a
/// reader never observes a partially written value.
pub struct FileStore {
    root: PathBuf,
}

impl FileStore {
    pub fn open(root: impl AsRef<Path>) -> Result<FileStore, StoreError> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root)?;
        tracing::info!(path = %root.display(), "opened file store");

        Ok(FileStore { root })
    }

    fn path_for(&self, key: &str) -> PathBuf {
        let file_name: String = key
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '-' { c } else { '_' })
            .collect();
        self.root.join(file_name)
    }
}

impl DataStore for FileStore {
    fn get(&self, key: &str) -> Option<Vec<u8>> {
        match fs::read(self.path_for(key)) {
            Ok(bytes) => Some(bytes),
            Err(e) if e.kind() == io::ErrorKind::NotFound => None,
            Err(e) => {
                tracing::warn!(key, "failed to read stored value: {}", e);
                None
            }
        }
    }

    fn set(&self, key: &str, value: Vec<u8>) -> Result<(), StoreError> {
        let path = self.path_for(key);
        let staging = path.with_extension("tmp");
        fs::write(&staging, value)?;
        fs::rename(&staging, &path)?;
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), StoreError> {
        match fs::remove_file(self.path_for(key)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StoreError::Io(e)),
        }
    }
}
