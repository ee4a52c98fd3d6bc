use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{KeyringSessionStore, PersistedSession};

/// Session file name in cache directory
const SESSION_FILE: &str = "session.json";

/// Durable home of the persisted session.
///
/// Only `SessionManager` writes through this trait.
pub trait SessionStore: Send + Sync {
    /// Load the persisted record; an absent record is an empty session
    fn load(&self) -> Result<PersistedSession>;

    /// Replace the persisted record
    fn save(&self, session: &PersistedSession) -> Result<()>;

    /// Remove the persisted record. Clearing an empty store succeeds.
    fn clear(&self) -> Result<()>;
}

/// Which `SessionStore` to use
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    #[default]
    File,
    Keyring,
    Memory,
}

impl StorageBackend {
    /// Open the selected backend. `dir` is where the file backend keeps
    /// its session file.
    pub fn open(self, dir: &Path) -> Box<dyn SessionStore> {
        match self {
            StorageBackend::File => Box::new(FileSessionStore::new(dir.to_path_buf())),
            StorageBackend::Keyring => Box::new(KeyringSessionStore::new()),
            StorageBackend::Memory => Box::new(MemorySessionStore::default()),
        }
    }
}

/// JSON file in the cache directory
pub struct FileSessionStore {
    cache_dir: PathBuf,
}

impl FileSessionStore {
    pub fn new(cache_dir: PathBuf) -> Self {
        Self { cache_dir }
    }

    fn session_path(&self) -> PathBuf {
        self.cache_dir.join(SESSION_FILE)
    }
}

impl SessionStore for FileSessionStore {
    fn load(&self) -> Result<PersistedSession> {
        let path = self.session_path();
        if !path.exists() {
            return Ok(PersistedSession::default());
        }

        let contents = std::fs::read_to_string(&path).context("Failed to read session file")?;
        let session: PersistedSession =
            serde_json::from_str(&contents).context("Failed to parse session file")?;
        debug!(path = %path.display(), "Session file loaded");
        Ok(session)
    }

    fn save(&self, session: &PersistedSession) -> Result<()> {
        let path = self.session_path();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).context("Failed to create cache directory")?;
        }
        let contents = serde_json::to_string_pretty(session)?;
        std::fs::write(&path, contents).context("Failed to write session file")?;
        Ok(())
    }

    fn clear(&self) -> Result<()> {
        let path = self.session_path();
        if path.exists() {
            std::fs::remove_file(&path).context("Failed to remove session file")?;
        }
        Ok(())
    }
}

/// In-process store; nothing survives the process
#[derive(Default)]
pub struct MemorySessionStore {
    session: Mutex<PersistedSession>,
}

impl MemorySessionStore {
    /// Start from an existing record
    pub fn with_session(session: PersistedSession) -> Self {
        Self {
            session: Mutex::new(session),
        }
    }
}

impl SessionStore for MemorySessionStore {
    fn load(&self) -> Result<PersistedSession> {
        Ok(self
            .session
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone())
    }

    fn save(&self, session: &PersistedSession) -> Result<()> {
        *self.session.lock().unwrap_or_else(PoisonError::into_inner) = session.clone();
        Ok(())
    }

    fn clear(&self) -> Result<()> {
        *self.session.lock().unwrap_or_else(PoisonError::into_inner) = PersistedSession::default();
        Ok(())
    }
}

/// Shared handle so a caller can keep inspecting a store it gave away
impl<S: SessionStore + ?Sized> SessionStore for std::sync::Arc<S> {
    fn load(&self) -> Result<PersistedSession> {
        (**self).load()
    }

    fn save(&self, session: &PersistedSession) -> Result<()> {
        (**self).save(session)
    }

    fn clear(&self) -> Result<()> {
        (**self).clear()
    }
}
