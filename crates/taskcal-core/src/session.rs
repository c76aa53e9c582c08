use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, anyhow};
use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;
use tracing::{debug, info, warn};

pub const TOKEN_KEY: &str = "token";
pub const USER_KEY: &str = "user";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct UserProfile {
    #[serde(default)]
    pub name: String,
    pub email: String,
}

/// Screens the client can navigate to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    Calendar,
    Login,
}

impl Route {
    pub fn path(self) -> &'static str {
        match self {
            Route::Calendar => "/",
            Route::Login => "/login",
        }
    }
}

/// String key/value persistence behind the session.
pub trait SessionStore {
    fn get(&self, key: &str) -> anyhow::Result<Option<String>>;
    fn set(&mut self, key: &str, value: &str) -> anyhow::Result<()>;
    fn remove(&mut self, key: &str) -> anyhow::Result<()>;
}

#[derive(Debug, Default, Clone)]
pub struct MemorySessionStore {
    entries: BTreeMap<String, String>,
}

impl MemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SessionStore for MemorySessionStore {
    fn get(&self, key: &str) -> anyhow::Result<Option<String>> {
        Ok(self.entries.get(key).cloned())
    }

    fn set(&mut self, key: &str, value: &str) -> anyhow::Result<()> {
        self.entries.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&mut self, key: &str) -> anyhow::Result<()> {
        self.entries.remove(key);
        Ok(())
    }
}

/// Session entries kept as one JSON object on disk.
#[derive(Debug, Clone)]
pub struct FileSessionStore {
    path: PathBuf,
}

impl FileSessionStore {
    #[tracing::instrument(skip(data_dir))]
    pub fn open(data_dir: &Path) -> anyhow::Result<Self> {
        fs::create_dir_all(data_dir)
            .with_context(|| format!("failed to create {}", data_dir.display()))?;
        let path = data_dir.join("session.json");
        info!(session = %path.display(), "opened session store");
        Ok(Self { path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn load(&self) -> anyhow::Result<BTreeMap<String, String>> {
        if !self.path.exists() {
            return Ok(BTreeMap::new());
        }
        let raw = fs::read_to_string(&self.path)
            .with_context(|| format!("failed reading {}", self.path.display()))?;
        if raw.trim().is_empty() {
            return Ok(BTreeMap::new());
        }
        serde_json::from_str(&raw)
            .with_context(|| format!("failed parsing {}", self.path.display()))
    }

    fn load_or_reset(&self) -> BTreeMap<String, String> {
        self.load().unwrap_or_else(|err| {
            warn!(error = %err, "session file unreadable; starting fresh");
            BTreeMap::new()
        })
    }

    #[tracing::instrument(skip(self, entries))]
    fn save(&self, entries: &BTreeMap<String, String>) -> anyhow::Result<()> {
        debug!(file = %self.path.display(), count = entries.len(), "saving session atomically");
        let dir = self.path.parent().unwrap_or_else(|| Path::new("."));
        let mut temp = NamedTempFile::new_in(dir)?;
        serde_json::to_writer_pretty(&mut temp, entries)?;
        writeln!(temp)?;
        temp.flush()?;
        temp.persist(&self.path)
            .map_err(|err| anyhow!("failed to persist {}: {}", self.path.display(), err))?;
        Ok(())
    }
}

impl SessionStore for FileSessionStore {
    fn get(&self, key: &str) -> anyhow::Result<Option<String>> {
        Ok(self.load()?.get(key).cloned())
    }

    fn set(&mut self, key: &str, value: &str) -> anyhow::Result<()> {
        let mut entries = self.load_or_reset();
        entries.insert(key.to_string(), value.to_string());
        self.save(&entries)
    }

    fn remove(&mut self, key: &str) -> anyhow::Result<()> {
        let mut entries = self.load_or_reset();
        if entries.remove(key).is_some() {
            self.save(&entries)?;
        }
        Ok(())
    }
}

/// Authentication token plus cached profile. A detached session has no
/// backing store and always reads as signed out.
pub struct Session {
    store: Option<Box<dyn SessionStore + Send>>,
}

impl Session {
    pub fn interactive<S>(store: S) -> Self
    where
        S: SessionStore + Send + 'static,
    {
        Self {
            store: Some(Box::new(store)),
        }
    }

    pub fn detached() -> Self {
        Self { store: None }
    }

    pub fn is_interactive(&self) -> bool {
        self.store.is_some()
    }

    pub fn get_token(&self) -> Option<String> {
        self.read(TOKEN_KEY)
    }

    pub fn get_user(&self) -> Option<UserProfile> {
        let raw = self.read(USER_KEY)?;
        match serde_json::from_str(&raw) {
            Ok(user) => Some(user),
            Err(err) => {
                debug!(error = %err, "ignoring malformed cached user");
                None
            }
        }
    }

    #[tracing::instrument(skip(self, token, user), fields(email = %user.email))]
    pub fn start(&mut self, token: &str, user: &UserProfile) -> anyhow::Result<()> {
        let Some(store) = self.store.as_mut() else {
            return Err(anyhow!("cannot start a session without a session store"));
        };
        store.set(TOKEN_KEY, token)?;
        store.set(USER_KEY, &serde_json::to_string(user)?)?;
        info!("session started");
        Ok(())
    }

    /// Clears token and user, then routes to the login screen.
    #[tracing::instrument(skip(self))]
    pub fn logout(&mut self) -> anyhow::Result<Option<Route>> {
        let Some(store) = self.store.as_mut() else {
            return Ok(None);
        };
        store.remove(TOKEN_KEY)?;
        store.remove(USER_KEY)?;
        info!("session cleared");
        Ok(Some(Route::Login))
    }

    fn read(&self, key: &str) -> Option<String> {
        let store = self.store.as_ref()?;
        match store.get(key) {
            Ok(value) => value,
            Err(err) => {
                warn!(key, error = %err, "session store read failed");
                None
            }
        }
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("interactive", &self.is_interactive())
            .field("signed_in", &self.get_token().is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use tempfile::tempdir;

    use super::*;

    fn alice() -> UserProfile {
        UserProfile {
            name: "Alice".to_string(),
            email: "alice@example.com".to_string(),
        }
    }

    #[test]
    fn malformed_user_reads_as_absent() {
        let mut store = MemorySessionStore::new();
        store.set(USER_KEY, "{not json").expect("set");
        store.set(TOKEN_KEY, "abc").expect("set");
        let session = Session::interactive(store);
        assert_eq!(session.get_user(), None);
        assert_eq!(session.get_token().as_deref(), Some("abc"));
    }

    #[test]
    fn detached_session_is_always_signed_out() {
        let mut session = Session::detached();
        assert_eq!(session.get_token(), None);
        assert_eq!(session.get_user(), None);
        assert_eq!(session.logout().expect("logout"), None);
        assert!(session.start("t", &alice()).is_err());
    }

    #[test]
    fn logout_clears_both_keys_and_routes_to_login() {
        let mut session = Session::interactive(MemorySessionStore::new());
        session.start("tok", &alice()).expect("start");
        assert_eq!(session.get_user(), Some(alice()));

        let route = session.logout().expect("logout");
        assert_eq!(route, Some(Route::Login));
        assert_eq!(session.get_token(), None);
        assert_eq!(session.get_user(), None);
    }

    #[test]
    fn file_store_persists_across_handles() {
        let temp = tempdir().expect("tempdir");
        let store = FileSessionStore::open(temp.path()).expect("open store");
        let mut session = Session::interactive(store);
        session.start("tok-1", &alice()).expect("start");

        let reopened = Session::interactive(FileSessionStore::open(temp.path()).expect("reopen"));
        assert_eq!(reopened.get_token().as_deref(), Some("tok-1"));
        assert_eq!(reopened.get_user(), Some(alice()));
    }

    #[test]
    fn corrupt_session_file_reads_as_signed_out() {
        let temp = tempdir().expect("tempdir");
        let store = FileSessionStore::open(temp.path()).expect("open store");
        fs::write(store.path(), "garbage").expect("write garbage");
        let mut session = Session::interactive(store);
        assert_eq!(session.get_token(), None);

        session.start("fresh", &alice()).expect("start over corrupt file");
        assert_eq!(session.get_token().as_deref(), Some("fresh"));
    }
}
