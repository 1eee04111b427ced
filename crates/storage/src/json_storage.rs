//! JSON file persistence for the ticket store.
//!
//! The whole job table lives in one `jobs.json` document. Writes go to a
//! sibling temp file first and are renamed into place, so a crash mid-write
//! leaves the previous document intact.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::fs;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use super::{Result, StateBackend, StateDocument, TicketStore};

/// File name of the job table inside the state directory.
pub const STATE_FILE_NAME: &str = "jobs.json";

/// File-based JSON backend.
pub struct JsonFileBackend {
    path: PathBuf,
}

impl JsonFileBackend {
    /// Backend writing exactly to `path`.
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    /// Backend writing `jobs.json` inside `dir`.
    pub fn in_dir(dir: impl AsRef<Path>) -> Self {
        Self::new(dir.as_ref().join(STATE_FILE_NAME))
    }

    /// Location of the document.
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_else(|| STATE_FILE_NAME.into());
        name.push(".tmp");
        self.path.with_file_name(name)
    }
}

#[async_trait]
impl StateBackend for JsonFileBackend {
    async fn read(&self) -> Result<Option<String>> {
        match fs::read_to_string(&self.path).await {
            Ok(json) => Ok(Some(json)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn write(&self, document: &str) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).await?;
            }
        }
        let tmp = self.temp_path();
        fs::write(&tmp, document.as_bytes()).await?;
        fs::rename(&tmp, &self.path).await?;
        Ok(())
    }
}

/// Backend that keeps the document in memory. Useful for tests and for
/// hosts that persist through their own channel.
#[derive(Default)]
pub struct MemoryBackend {
    document: Mutex<Option<String>>,
}

impl MemoryBackend {
    /// Empty backend.
    pub fn new() -> Self {
        Self::default()
    }

    /// Backend preloaded with a document.
    pub fn with_document(document: impl Into<String>) -> Self {
        Self {
            document: Mutex::new(Some(document.into())),
        }
    }

    /// Copy of the last written document.
    pub async fn document(&self) -> Option<String> {
        self.document.lock().await.clone()
    }
}

#[async_trait]
impl StateBackend for MemoryBackend {
    async fn read(&self) -> Result<Option<String>> {
        Ok(self.document.lock().await.clone())
    }

    async fn write(&self, document: &str) -> Result<()> {
        *self.document.lock().await = Some(document.to_string());
        Ok(())
    }
}

/// Load the job table.
///
/// Never fails: a missing document yields an empty store, and an unreadable
/// or corrupt one is logged and replaced by an empty store so startup is
/// never blocked.
pub async fn load_store(backend: &dyn StateBackend) -> TicketStore {
    let json = match backend.read().await {
        Ok(Some(json)) => json,
        Ok(None) => {
            debug!("No saved job table, starting empty");
            return TicketStore::new();
        }
        Err(e) => {
            warn!("Could not read saved job table, starting empty: {}", e);
            return TicketStore::new();
        }
    };

    match TicketStore::from_json(&json) {
        Ok(store) => store,
        Err(e) => {
            warn!("Saved job table is corrupt, starting empty: {}", e);
            TicketStore::new()
        }
    }
}

/// Read the saved document as written, without restart recovery.
///
/// Running jobs stay Running, so a live gateway's state can be inspected.
pub async fn read_document(backend: &dyn StateBackend) -> Result<Option<StateDocument>> {
    match backend.read().await? {
        Some(json) => Ok(Some(serde_json::from_str(&json)?)),
        None => Ok(None),
    }
}

/// Save the job table and clear its dirty marker.
pub async fn save_store(backend: &dyn StateBackend, store: &mut TicketStore) -> Result<()> {
    let json = store.to_json()?;
    backend.write(&json).await?;
    store.mark_clean();
    debug!("Saved {} jobs", store.len());
    Ok(())
}

/// Read a JSON file, `None` when it does not exist.
pub(crate) async fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<Option<T>> {
    match fs::read_to_string(path).await {
        Ok(json) => {
            let value = serde_json::from_str(&json)?;
            Ok(Some(value))
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}
