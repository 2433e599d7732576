//! Persisted session token
//!
//! The token is an opaque bearer credential. It is written to a small
//! key-value file so that a restarted client stays logged in, and it is never
//! parsed or checked for expiry here: the server decides when it stops
//! working.

use std::collections::BTreeMap;
use std::fs::{self, File, create_dir_all};
use std::io::{BufReader, BufWriter, ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

/// Storage key of the bearer token
pub const TOKEN_KEY: &str = "access_token";

/// Minimal string key-value storage
pub trait KeyValueStore: Send + Sync {
    fn get_item(&self, key: &str) -> std::io::Result<Option<String>>;

    fn set_item(&self, key: &str, value: &str) -> std::io::Result<()>;

    fn remove_item(&self, key: &str) -> std::io::Result<()>;
}

/// JSON object on disk, rewritten on every change
pub struct FileStore {
    path: PathBuf,
    lock: Mutex<()>,
}

impl FileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn load(&self) -> std::io::Result<BTreeMap<String, String>> {
        let file = match File::open(&self.path) {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(BTreeMap::new()),
            Err(e) => return Err(e),
        };
        serde_json::from_reader(BufReader::new(file))
            .map_err(|e| std::io::Error::new(ErrorKind::InvalidData, e))
    }

    fn save(&self, items: &BTreeMap<String, String>) -> std::io::Result<()> {
        if let Some(dir) = self.path.parent().filter(|d| !d.as_os_str().is_empty()) {
            create_dir_all(dir)?;
        }
        let file = File::create(&self.path)?;
        let mut writer = BufWriter::new(file);
        serde_json::to_writer_pretty(&mut writer, items)
            .map_err(|e| std::io::Error::new(ErrorKind::Other, e))?;
        writer.flush()
    }
}

impl KeyValueStore for FileStore {
    fn get_item(&self, key: &str) -> std::io::Result<Option<String>> {
        let _guard = self.lock.lock().unwrap_or_else(|e| e.into_inner());
        Ok(self.load()?.remove(key))
    }

    fn set_item(&self, key: &str, value: &str) -> std::io::Result<()> {
        let _guard = self.lock.lock().unwrap_or_else(|e| e.into_inner());
        let mut items = self.load().unwrap_or_default();
        items.insert(key.to_string(), value.to_string());
        self.save(&items)
    }

    fn remove_item(&self, key: &str) -> std::io::Result<()> {
        let _guard = self.lock.lock().unwrap_or_else(|e| e.into_inner());
        let mut items = match self.load() {
            Ok(items) => items,
            // An unreadable file holds nothing worth keeping.
            Err(_) => return fs::remove_file(&self.path).or_else(ignore_missing),
        };
        if items.remove(key).is_some() {
            if items.is_empty() {
                fs::remove_file(&self.path).or_else(ignore_missing)?;
            } else {
                self.save(&items)?;
            }
        }
        Ok(())
    }
}

fn ignore_missing(e: std::io::Error) -> std::io::Result<()> {
    if e.kind() == ErrorKind::NotFound {
        Ok(())
    } else {
        Err(e)
    }
}

/// Process-local storage, lost on exit
#[derive(Default)]
pub struct MemoryStore {
    items: Mutex<BTreeMap<String, String>>,
}

impl KeyValueStore for MemoryStore {
    fn get_item(&self, key: &str) -> std::io::Result<Option<String>> {
        let items = self.items.lock().unwrap_or_else(|e| e.into_inner());
        Ok(items.get(key).cloned())
    }

    fn set_item(&self, key: &str, value: &str) -> std::io::Result<()> {
        let mut items = self.items.lock().unwrap_or_else(|e| e.into_inner());
        items.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove_item(&self, key: &str) -> std::io::Result<()> {
        let mut items = self.items.lock().unwrap_or_else(|e| e.into_inner());
        items.remove(key);
        Ok(())
    }
}

/// Shared handle to the stored token
///
/// Cloning is cheap; all clones see the same storage.
#[derive(Clone)]
pub struct SessionStore {
    storage: Arc<dyn KeyValueStore>,
}

impl SessionStore {
    pub fn new(storage: Arc<dyn KeyValueStore>) -> Self {
        Self { storage }
    }

    /// Session persisted in a JSON file.
    pub fn file(path: impl Into<PathBuf>) -> Self {
        Self::new(Arc::new(FileStore::new(path)))
    }

    /// Session that only lives as long as the process.
    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryStore::default()))
    }

    /// Current token, if any.
    ///
    /// An unreadable store is treated as logged out.
    pub fn get(&self) -> Option<String> {
        match self.storage.get_item(TOKEN_KEY) {
            Ok(token) => token.filter(|t| !t.is_empty()),
            Err(e) => {
                log::warn!("Failed to read session: {}", e);
                None
            }
        }
    }

    pub fn set(&self, token: &str) -> std::io::Result<()> {
        self.storage.set_item(TOKEN_KEY, token)
    }

    pub fn clear(&self) -> std::io::Result<()> {
        self.storage.remove_item(TOKEN_KEY)
    }

    /// Route guard: protected surfaces are reachable only with a token.
    pub fn is_authenticated(&self) -> bool {
        self.get().is_some()
    }
}
