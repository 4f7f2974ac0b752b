// Session store: the active identity and credential, persisted across runs

use log::{debug, info, warn};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tokio::sync::watch;

use crate::error::Result;
use crate::models::{Credential, Identity};

/// Storage key holding the bearer token
pub const TOKEN_KEY: &str = "token";
/// Storage key holding the JSON encoded identity
pub const USER_KEY: &str = "user";

/// An authenticated session: who we are and the token proving it
#[derive(Debug, Clone, PartialEq)]
pub struct Session {
    pub identity: Identity,
    pub credential: Credential,
}

/// Key/value persistence backing the session store.
pub trait SessionStorage: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>>;
    fn set(&self, key: &str, value: &str) -> Result<()>;
    fn remove(&self, key: &str) -> Result<()>;
}

/// Stores each key as its own file inside a directory
pub struct FileStorage {
    dir: PathBuf,
}

impl FileStorage {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        FileStorage { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.dir.join(key)
    }
}

impl SessionStorage for FileStorage {
    fn get(&self, key: &str) -> Result<Option<String>> {
        let path = self.path_for(key);
        if !path.exists() {
            return Ok(None);
        }
        Ok(Some(fs::read_to_string(path)?))
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        if !self.dir.exists() {
            fs::create_dir_all(&self.dir)?;
        }
        fs::write(self.path_for(key), value)?;
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<()> {
        match fs::remove_file(self.path_for(key)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

/// In-memory storage, nothing survives the process
#[derive(Default)]
pub struct MemoryStorage {
    values: Mutex<HashMap<String, String>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SessionStorage for MemoryStorage {
    fn get(&self, key: &str) -> Result<Option<String>> {
        let values = self.values.lock().unwrap_or_else(|e| e.into_inner());
        Ok(values.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        let mut values = self.values.lock().unwrap_or_else(|e| e.into_inner());
        values.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<()> {
        let mut values = self.values.lock().unwrap_or_else(|e| e.into_inner());
        values.remove(key);
        Ok(())
    }
}

/// Owns the active session and its persisted copy.
///
/// Dependents observe login and logout through [`SessionStore::subscribe`];
/// a transition to `None` tells them to tear down.
pub struct SessionStore {
    storage: Box<dyn SessionStorage>,
    current: watch::Sender<Option<Session>>,
}

impl SessionStore {
    pub fn new(storage: Box<dyn SessionStorage>) -> Self {
        let (current, _) = watch::channel(None);
        SessionStore { storage, current }
    }

    /// Attempt to restore a previously persisted session.
    ///
    /// Missing or malformed entries leave the store unauthenticated.
    /// The credential is not validated here.
    pub fn restore(&self) -> Option<Session> {
        let token = match self.storage.get(TOKEN_KEY) {
            Ok(Some(token)) if !token.trim().is_empty() => token,
            Ok(_) => {
                debug!("No persisted session token");
                return None;
            }
            Err(e) => {
                warn!("Failed to read persisted token: {}", e);
                return None;
            }
        };

        let user = match self.storage.get(USER_KEY) {
            Ok(Some(user)) => user,
            Ok(None) => {
                debug!("Persisted token found without a user entry");
                return None;
            }
            Err(e) => {
                warn!("Failed to read persisted user: {}", e);
                return None;
            }
        };

        let identity: Identity = match serde_json::from_str(&user) {
            Ok(identity) => identity,
            Err(e) => {
                warn!("Ignoring malformed persisted user: {}", e);
                return None;
            }
        };

        info!("Restored session for {} ({})", identity.username, identity.id);
        let session = Session {
            identity,
            credential: Credential::new(token.trim()),
        };
        self.current.send_replace(Some(session.clone()));
        Some(session)
    }

    /// Set the active session and persist it
    pub fn login(&self, identity: Identity, credential: Credential) -> Result<Session> {
        self.storage.set(TOKEN_KEY, credential.as_str())?;
        self.storage.set(USER_KEY, &serde_json::to_string(&identity)?)?;

        info!("Session started for {} ({})", identity.username, identity.id);
        let session = Session { identity, credential };
        self.current.send_replace(Some(session.clone()));
        Ok(session)
    }

    /// Clear the active session and its persisted copy.
    ///
    /// Subscribers are notified even if clearing storage fails.
    pub fn logout(&self) -> Result<()> {
        let previous = self.current.send_replace(None);
        if let Some(session) = previous {
            info!("Session ended for {}", session.identity.username);
        }
        let token_result = self.storage.remove(TOKEN_KEY);
        let user_result = self.storage.remove(USER_KEY);
        token_result?;
        user_result
    }

    pub fn current(&self) -> Option<Session> {
        self.current.borrow().clone()
    }

    pub fn is_authenticated(&self) -> bool {
        self.current.borrow().is_some()
    }

    pub fn subscribe(&self) -> watch::Receiver<Option<Session>> {
        self.current.subscribe()
    }

    /// Token as currently persisted, bypassing the in-memory copy
    pub fn persisted_credential(&self) -> Result<Option<Credential>> {
        Ok(self.storage.get(TOKEN_KEY)?.map(Credential::new))
    }
}
