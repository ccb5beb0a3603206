// Session Store
// Persists the delegated identity across process starts

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::sync::RwLock;
use tracing::debug;

use super::error::StoreError;
use crate::identity::{DelegatedIdentity, DelegationChain, SessionKey, encoding};

const STORED_SESSION_VERSION: u32 = 1;

/// Persisted form of a delegated identity
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredSession {
    pub version: u32,

    /// Ed25519 seed of the session key
    #[serde(with = "encoding")]
    pub session_key: Vec<u8>,

    pub delegation: DelegationChain,
}

impl StoredSession {
    pub fn from_identity(identity: &DelegatedIdentity) -> Self {
        Self {
            version: STORED_SESSION_VERSION,
            session_key: identity.session_key().seed().to_vec(),
            delegation: identity.chain().clone(),
        }
    }

    pub fn into_identity(self) -> Result<DelegatedIdentity, StoreError> {
        if self.version != STORED_SESSION_VERSION {
            return Err(StoreError::Corrupt(format!(
                "unsupported session version {}",
                self.version
            )));
        }

        let session_key = SessionKey::from_seed_slice(&self.session_key)?;
        Ok(DelegatedIdentity::new(session_key, self.delegation))
    }
}

/// Local credential storage used by the session manager
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Load the stored session, `None` when nothing is stored
    async fn load(&self) -> Result<Option<StoredSession>, StoreError>;

    async fn save(&self, session: StoredSession) -> Result<(), StoreError>;

    /// Remove the stored session; clearing an empty store is not an error
    async fn clear(&self) -> Result<(), StoreError>;
}

/// In-memory store, lives as long as the process
#[derive(Default)]
pub struct MemorySessionStore {
    session: RwLock<Option<StoredSession>>,
}

impl MemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_session(session: StoredSession) -> Self {
        Self {
            session: RwLock::new(Some(session)),
        }
    }
}

#[async_trait]
impl SessionStore for MemorySessionStore {
    async fn load(&self) -> Result<Option<StoredSession>, StoreError> {
        Ok(self.session.read().await.clone())
    }

    async fn save(&self, session: StoredSession) -> Result<(), StoreError> {
        *self.session.write().await = Some(session);
        Ok(())
    }

    async fn clear(&self) -> Result<(), StoreError> {
        self.session.write().await.take();
        Ok(())
    }
}

/// JSON file store
///
/// Writes go to a sibling temporary file that is renamed over the target, so a
/// crash mid-write leaves the previous session intact.
pub struct FileSessionStore {
    path: PathBuf,
}

impl FileSessionStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_default();
        name.push(".tmp");
        self.path.with_file_name(name)
    }
}

#[async_trait]
impl SessionStore for FileSessionStore {
    async fn load(&self) -> Result<Option<StoredSession>, StoreError> {
        let bytes = match tokio::fs::read(&self.path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        let session = serde_json::from_slice(&bytes)?;
        debug!("Loaded stored session from {}", self.path.display());
        Ok(Some(session))
    }

    async fn save(&self, session: StoredSession) -> Result<(), StoreError> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }

        let bytes = serde_json::to_vec_pretty(&session)?;
        let temp = self.temp_path();
        tokio::fs::write(&temp, bytes).await?;
        tokio::fs::rename(&temp, &self.path).await?;

        debug!("Saved session to {}", self.path.display());
        Ok(())
    }

    async fn clear(&self) -> Result<(), StoreError> {
        match tokio::fs::remove_file(&self.path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}
