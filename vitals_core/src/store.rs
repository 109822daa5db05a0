//! Persisted session keys with file locking.
//!
//! The four keys (`accessToken`, `refreshToken`, `role`, `profile`) live in
//! a single JSON document so they are written and cleared as one set. A
//! partially cleared store cannot exist.

use crate::{Profile, Result, Role, Session};
use fs2::FileExt;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tempfile::NamedTempFile;

/// The persisted form of a session
#[derive(Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PersistedSession {
    pub access_token: String,
    pub refresh_token: String,
    pub role: Role,
    pub profile: Profile,
}

impl PersistedSession {
    pub fn from_session(session: &Session) -> Self {
        Self {
            access_token: session.tokens.access_token.clone(),
            refresh_token: session.tokens.refresh_token.clone(),
            role: session.role,
            profile: session.profile.clone(),
        }
    }
}

impl std::fmt::Debug for PersistedSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PersistedSession")
            .field("role", &self.role)
            .field("profile", &self.profile)
            .finish_non_exhaustive()
    }
}

/// Key-value session store; written only by the session monitor
pub trait SessionStore: Send {
    fn load(&self) -> Result<Option<PersistedSession>>;
    fn save(&mut self, session: &PersistedSession) -> Result<()>;
    /// Remove all keys at once
    fn clear(&mut self) -> Result<()>;
}

/// JSON file store with atomic replace
#[derive(Clone, Debug)]
pub struct FileSessionStore {
    path: PathBuf,
}

impl FileSessionStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Store at the conventional location under a data directory
    pub fn in_data_dir(data_dir: &Path) -> Self {
        Self::new(data_dir.join("session.json"))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl SessionStore for FileSessionStore {
    /// Returns None if the file doesn't exist.
    /// If the file is corrupted, logs a warning and returns None.
    fn load(&self) -> Result<Option<PersistedSession>> {
        if !self.path.exists() {
            return Ok(None);
        }

        let file = match File::open(&self.path) {
            Ok(f) => f,
            Err(e) => {
                tracing::warn!("Unable to open session store {:?}: {}", self.path, e);
                return Ok(None);
            }
        };

        file.lock_shared()?;
        let mut contents = String::new();
        let read = std::io::BufReader::new(&file).read_to_string(&mut contents);
        file.unlock()?;
        read?;

        match serde_json::from_str::<PersistedSession>(&contents) {
            Ok(session) => {
                tracing::debug!("Loaded session from {:?}", self.path);
                Ok(Some(session))
            }
            Err(e) => {
                tracing::warn!(
                    "Failed to parse session store {:?}: {}. Treating as logged out.",
                    self.path,
                    e
                );
                Ok(None)
            }
        }
    }

    /// Atomically writes the store by:
    /// 1. Writing to a temp file
    /// 2. Syncing to disk
    /// 3. Renaming over the original
    fn save(&mut self, session: &PersistedSession) -> Result<()> {
        let parent = match self.path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
            _ => PathBuf::from("."),
        };
        std::fs::create_dir_all(&parent)?;

        let temp = NamedTempFile::new_in(&parent)?;
        temp.as_file().lock_exclusive()?;

        {
            let mut writer = std::io::BufWriter::new(temp.as_file());
            let contents = serde_json::to_string(session)?;
            writer.write_all(contents.as_bytes())?;
            writer.flush()?;
        }

        temp.as_file().sync_all()?;
        temp.as_file().unlock()?;
        temp.persist(&self.path).map_err(|e| crate::Error::Io(e.error))?;

        tracing::debug!("Saved session to {:?}", self.path);
        Ok(())
    }

    fn clear(&mut self) -> Result<()> {
        match std::fs::remove_file(&self.path) {
            Ok(()) => {
                tracing::debug!("Cleared session store {:?}", self.path);
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

/// In-memory store, shareable with the test that created it
#[derive(Clone, Default)]
pub struct MemorySessionStore {
    inner: std::sync::Arc<Mutex<Option<PersistedSession>>>,
}

impl MemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> Option<PersistedSession> {
        self.inner
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }
}

impl SessionStore for MemorySessionStore {
    fn load(&self) -> Result<Option<PersistedSession>> {
        Ok(self.snapshot())
    }

    fn save(&mut self, session: &PersistedSession) -> Result<()> {
        *self
            .inner
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(session.clone());
        Ok(())
    }

    fn clear(&mut self) -> Result<()> {
        *self
            .inner
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = None;
        Ok(())
    }
}
