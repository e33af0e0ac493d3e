//! Session persistence keyed by proxy
//!
//! Manages a JSON file mapping proxy addresses to sessions. All writes use
//! atomic temp-file + rename to prevent corruption on crash. A tokio Mutex
//! serializes concurrent writes from workers bootstrapping and logging out.
//!
//! The session file is the single source of truth for cached identities: a
//! worker that finds its proxy here adopts the session without a network
//! call, and a mandatory logout deletes the entry.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::api::AccountInfo;
use crate::error::{Error, Result};
use crate::proxy::ProxyAddr;

/// One worker's authenticated identity.
///
/// `browser_id` is generated once at bootstrap and stays with the session
/// for its whole life; `account` is the session endpoint's payload stored
/// verbatim.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub browser_id: String,
    pub account: AccountInfo,
}

impl Session {
    /// Remote account identifier, if the service supplied one.
    pub fn uid(&self) -> Option<&str> {
        self.account.uid.as_deref()
    }
}

/// Thread-safe session file manager.
///
/// The Mutex serializes all access. Reads clone the entry, so a worker
/// holding a session never blocks on another worker's logout write.
pub struct SessionStore {
    path: PathBuf,
    state: Mutex<HashMap<String, Session>>,
}

impl SessionStore {
    /// Load sessions from the given file path.
    ///
    /// If the file doesn't exist, creates it as `{}` — a cold start where
    /// every worker bootstraps over the network.
    pub async fn load(path: PathBuf) -> Result<Self> {
        let state = if path.exists() {
            let contents = tokio::fs::read_to_string(&path)
                .await
                .map_err(|e| Error::Io(format!("reading session file: {e}")))?;
            let sessions: HashMap<String, Session> = serde_json::from_str(&contents)
                .map_err(|e| Error::SessionParse(format!("parsing session file: {e}")))?;
            info!(path = %path.display(), sessions = sessions.len(), "loaded sessions");
            sessions
        } else {
            info!(path = %path.display(), "session file not found, starting with empty store");
            let sessions = HashMap::new();
            write_atomic(&path, &sessions).await?;
            sessions
        };

        Ok(Self {
            path,
            state: Mutex::new(state),
        })
    }

    /// Get a clone of the session cached for a proxy, if any.
    pub async fn get(&self, proxy: &ProxyAddr) -> Option<Session> {
        let state = self.state.lock().await;
        state.get(proxy.as_str()).cloned()
    }

    /// Persist a session for a proxy.
    pub async fn save(&self, proxy: &ProxyAddr, session: Session) -> Result<()> {
        let mut state = self.state.lock().await;
        state.insert(proxy.as_str().to_owned(), session);
        debug!(%proxy, "saved session");
        write_atomic(&self.path, &state).await
    }

    /// Delete a proxy's persisted session (the logout path).
    ///
    /// Returns the removed session if one existed. Clearing an absent entry
    /// is a no-op, so repeated logouts are safe.
    pub async fn clear(&self, proxy: &ProxyAddr) -> Result<Option<Session>> {
        let mut state = self.state.lock().await;
        let removed = state.remove(proxy.as_str());
        if removed.is_some() {
            debug!(%proxy, "cleared session");
            write_atomic(&self.path, &state).await?;
        }
        Ok(removed)
    }

    /// Number of cached sessions.
    pub async fn len(&self) -> usize {
        let state = self.state.lock().await;
        state.len()
    }

    /// Whether the store is empty.
    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

/// Write sessions to a file atomically.
///
/// Writes to a temporary file in the same directory, then renames it over
/// the target. Sets 0600 permissions since sessions are credentials.
async fn write_atomic(path: &Path, data: &HashMap<String, Session>) -> Result<()> {
    let json = serde_json::to_string_pretty(data)
        .map_err(|e| Error::SessionParse(format!("serializing sessions: {e}")))?;

    let dir = path
        .parent()
        .ok_or_else(|| Error::Io("session path has no parent directory".into()))?;

    let tmp_path = dir.join(format!(".sessions.tmp.{}", std::process::id()));

    tokio::fs::write(&tmp_path, json.as_bytes())
        .await
        .map_err(|e| Error::Io(format!("writing temp session file: {e}")))?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let perms = std::fs::Permissions::from_mode(0o600);
        tokio::fs::set_permissions(&tmp_path, perms)
            .await
            .map_err(|e| Error::Io(format!("setting session file permissions: {e}")))?;
    }

    tokio::fs::rename(&tmp_path, path)
        .await
        .map_err(|e| Error::Io(format!("renaming temp session file: {e}")))?;

    debug!(path = %path.display(), "persisted sessions");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn proxy(n: u16) -> ProxyAddr {
        ProxyAddr::parse(&format!("http://10.0.0.{n}:8080")).unwrap()
    }

    fn test_session(uid: &str) -> Session {
        Session {
            browser_id: format!("bid-{uid}"),
            account: AccountInfo {
                uid: Some(uid.into()),
                extra: serde_json::Map::new(),
            },
        }
    }

    #[tokio::test]
    async fn roundtrip_save_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sessions.json");

        let store = SessionStore::load(path.clone()).await.unwrap();
        store.save(&proxy(1), test_session("u1")).await.unwrap();

        // Load into a new store instance
        let store2 = SessionStore::load(path).await.unwrap();
        let session = store2.get(&proxy(1)).await.unwrap();
        assert_eq!(session, test_session("u1"));
        assert_eq!(session.uid(), Some("u1"));
    }

    #[tokio::test]
    async fn cold_start_creates_empty_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sessions.json");

        assert!(!path.exists());
        let store = SessionStore::load(path.clone()).await.unwrap();
        assert!(store.is_empty().await);
        assert!(path.exists());

        let contents = tokio::fs::read_to_string(&path).await.unwrap();
        let parsed: HashMap<String, Session> = serde_json::from_str(&contents).unwrap();
        assert!(parsed.is_empty());
    }

    #[tokio::test]
    async fn clear_removes_and_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sessions.json");

        let store = SessionStore::load(path).await.unwrap();
        store.save(&proxy(1), test_session("u1")).await.unwrap();
        store.save(&proxy(2), test_session("u2")).await.unwrap();
        assert_eq!(store.len().await, 2);

        let removed = store.clear(&proxy(1)).await.unwrap();
        assert!(removed.is_some());
        assert_eq!(store.len().await, 1);
        assert!(store.get(&proxy(1)).await.is_none());

        let removed_again = store.clear(&proxy(1)).await.unwrap();
        assert!(removed_again.is_none());
    }

    #[tokio::test]
    async fn account_extras_survive_persistence() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sessions.json");

        let mut extra = serde_json::Map::new();
        extra.insert("plan".into(), json!("basic"));
        extra.insert("score".into(), json!(99));
        let session = Session {
            browser_id: "bid-x".into(),
            account: AccountInfo {
                uid: Some("u-x".into()),
                extra,
            },
        };

        let store = SessionStore::load(path.clone()).await.unwrap();
        store.save(&proxy(3), session.clone()).await.unwrap();

        let store2 = SessionStore::load(path).await.unwrap();
        let loaded = store2.get(&proxy(3)).await.unwrap();
        assert_eq!(loaded, session);
        assert_eq!(loaded.account.extra["plan"], "basic");
        assert_eq!(loaded.account.extra["score"], 99);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn file_permissions_are_0600() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sessions.json");

        let store = SessionStore::load(path.clone()).await.unwrap();
        store.save(&proxy(1), test_session("u1")).await.unwrap();

        let metadata = tokio::fs::metadata(&path).await.unwrap();
        let mode = metadata.permissions().mode() & 0o777;
        assert_eq!(mode, 0o600, "session file must be 0600, got {mode:o}");
    }

    #[tokio::test]
    async fn concurrent_writes_dont_corrupt() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sessions.json");
        let store = std::sync::Arc::new(SessionStore::load(path.clone()).await.unwrap());

        let mut handles = vec![];
        for i in 0..10u16 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                store
                    .save(&proxy(i + 1), test_session(&format!("u{i}")))
                    .await
                    .unwrap();
            }));
        }

        for h in handles {
            h.await.unwrap();
        }

        assert_eq!(store.len().await, 10);

        let contents = tokio::fs::read_to_string(&path).await.unwrap();
        let parsed: HashMap<String, Session> = serde_json::from_str(&contents).unwrap();
        assert_eq!(parsed.len(), 10);
    }
}
