//! Session ownership and persistence.
//!
//! The store is the exclusive owner of the session list and the
//! current-session pointer. Consumers get cloned snapshots; every
//! mutation funnels through the store so persistence and title
//! derivation stay consistent.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::warn;

use shared::types::{ChatSession, Message};

const SESSIONS_FILE: &str = "sessions.json";

/// Write seam for message replacement, so the streaming presenter can
/// be exercised against a recording sink in tests.
pub trait MessageSink: Send + Sync {
    fn replace_messages(&self, session_id: &str, messages: Vec<Message>);
}

#[derive(Serialize, Deserialize, Default)]
struct PersistedSessions {
    sessions: Vec<ChatSession>,
    current_id: Option<String>,
}

struct StoreState {
    sessions: Vec<ChatSession>,
    current_id: Option<String>,
}

pub struct SessionStore {
    path: PathBuf,
    inner: Mutex<StoreState>,
}

impl SessionStore {
    /// Open the store rooted at `base_dir`, creating it (and one empty
    /// session) when nothing is persisted yet.
    pub fn open(base_dir: impl AsRef<Path>) -> Result<Self> {
        let base = base_dir.as_ref();
        fs::create_dir_all(base)
            .with_context(|| format!("creating session dir {}", base.display()))?;
        let path = base.join(SESSIONS_FILE);

        let mut persisted = if path.is_file() {
            let raw = fs::read_to_string(&path)
                .with_context(|| format!("reading {}", path.display()))?;
            serde_json::from_str::<PersistedSessions>(&raw)
                .with_context(|| format!("parsing {}", path.display()))?
        } else {
            PersistedSessions::default()
        };

        if persisted.sessions.is_empty() {
            persisted.sessions.push(ChatSession::new());
        }
        let current_id = persisted
            .current_id
            .filter(|id| persisted.sessions.iter().any(|s| &s.id == id))
            .unwrap_or_else(|| persisted.sessions[0].id.clone());

        let store = Self {
            path,
            inner: Mutex::new(StoreState {
                sessions: persisted.sessions,
                current_id: Some(current_id),
            }),
        };
        store.persist();
        Ok(store)
    }

    /// Default storage root for the installed app.
    pub fn default_dir() -> PathBuf {
        directories::ProjectDirs::from("com.local", "Rival", "Rival")
            .map(|p| p.config_dir().to_path_buf())
            .unwrap_or_else(|| PathBuf::from("./rival-data"))
    }

    /// Snapshot of all sessions, most recently updated first.
    pub fn sessions(&self) -> Vec<ChatSession> {
        let inner = self.inner.lock();
        let mut list = inner.sessions.clone();
        list.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        list
    }

    pub fn current_id(&self) -> Option<String> {
        self.inner.lock().current_id.clone()
    }

    /// Snapshot of the current session.
    pub fn current(&self) -> Option<ChatSession> {
        let inner = self.inner.lock();
        let id = inner.current_id.as_ref()?;
        inner.sessions.iter().find(|s| &s.id == id).cloned()
    }

    /// Returns false when the id is unknown.
    pub fn set_current(&self, id: &str) -> bool {
        let mut inner = self.inner.lock();
        if inner.sessions.iter().any(|s| s.id == id) {
            inner.current_id = Some(id.to_string());
            drop(inner);
            self.persist();
            true
        } else {
            false
        }
    }

    /// New empty session, made current.
    pub fn create(&self) -> String {
        let session = ChatSession::new();
        let id = session.id.clone();
        {
            let mut inner = self.inner.lock();
            inner.sessions.insert(0, session);
            inner.current_id = Some(id.clone());
        }
        self.persist();
        id
    }

    /// Delete a session. The store always keeps at least one session;
    /// deleting the last one replaces it with a fresh empty session.
    pub fn delete(&self, id: &str) {
        {
            let mut inner = self.inner.lock();
            inner.sessions.retain(|s| s.id != id);
            if inner.sessions.is_empty() {
                inner.sessions.push(ChatSession::new());
            }
            if inner.current_id.as_deref() == Some(id) {
                let most_recent = inner
                    .sessions
                    .iter()
                    .max_by_key(|s| s.updated_at)
                    .map(|s| s.id.clone());
                inner.current_id = most_recent;
            }
        }
        self.persist();
    }

    /// Keyword search over message content, newest sessions first.
    pub fn search(&self, query: &str) -> Vec<SearchMatch> {
        let needle = query.to_lowercase();
        if needle.is_empty() {
            return Vec::new();
        }
        let mut results = Vec::new();
        for session in self.sessions() {
            for (i, msg) in session.messages.iter().enumerate() {
                if msg.content.to_lowercase().contains(&needle) {
                    results.push(SearchMatch {
                        session_id: session.id.clone(),
                        session_title: session.title.clone(),
                        message_index: i,
                        snippet: extract_snippet(&msg.content, &needle),
                        date: session.updated_at,
                    });
                }
            }
        }
        results.truncate(10);
        results
    }

    fn persist(&self) {
        let persisted = {
            let inner = self.inner.lock();
            PersistedSessions {
                sessions: inner.sessions.clone(),
                current_id: inner.current_id.clone(),
            }
        };
        match serde_json::to_string_pretty(&persisted) {
            Ok(json) => {
                if let Err(e) = fs::write(&self.path, json) {
                    warn!(path = %self.path.display(), error = %e, "failed to persist sessions");
                }
            }
            Err(e) => warn!(error = %e, "failed to serialize sessions"),
        }
    }
}

impl MessageSink for SessionStore {
    /// The single mutation entry point for message arrays: replaces
    /// wholesale, refreshes title and `updated_at`, persists.
    fn replace_messages(&self, session_id: &str, messages: Vec<Message>) {
        {
            let mut inner = self.inner.lock();
            let Some(session) = inner.sessions.iter_mut().find(|s| s.id == session_id) else {
                warn!(session_id, "replace_messages on unknown session");
                return;
            };
            session.replace_messages(messages);
        }
        self.persist();
    }
}

#[derive(Debug, Clone)]
pub struct SearchMatch {
    pub session_id: String,
    pub session_title: String,
    pub message_index: usize,
    pub snippet: String,
    pub date: DateTime<Utc>,
}

fn extract_snippet(content: &str, needle: &str) -> String {
    let lower = content.to_lowercase();
    let Some(pos) = lower.find(needle) else {
        return content.chars().take(60).collect();
    };
    // Widen to char boundaries around the hit.
    let start = content
        .char_indices()
        .map(|(i, _)| i)
        .take_while(|&i| i <= pos.saturating_sub(30))
        .last()
        .unwrap_or(0);
    let end_target = (pos + needle.len() + 30).min(content.len());
    let end = content
        .char_indices()
        .map(|(i, _)| i)
        .find(|&i| i >= end_target)
        .unwrap_or(content.len());
    let mut snippet = content[start..end].to_string();
    if start > 0 {
        snippet = format!("...{snippet}");
    }
    if end < content.len() {
        snippet = format!("{snippet}...");
    }
    snippet
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared::types::{Role, NEW_SESSION_TITLE};

    #[test]
    fn empty_store_auto_creates_one_session() {
        let dir = tempfile::tempdir().unwrap();
        let store = SessionStore::open(dir.path()).unwrap();
        assert_eq!(store.sessions().len(), 1);
        let current = store.current().unwrap();
        assert_eq!(current.title, NEW_SESSION_TITLE);
        assert!(current.messages.is_empty());
    }

    #[test]
    fn session_round_trip_preserves_messages_bit_for_bit() {
        let dir = tempfile::tempdir().unwrap();
        let (session_id, written) = {
            let store = SessionStore::open(dir.path()).unwrap();
            let id = store.current_id().unwrap();
            let user = Message::user("bikin komponen tombol");
            let mut assistant = Message::assistant("Ini dia:\n```jsx\n<Button/>\n```");
            assistant.code_snippet = Some("<Button/>".into());
            let messages = vec![user, assistant];
            store.replace_messages(&id, messages.clone());
            (id, messages)
        };

        // Fresh store from the same directory: dates revived, payloads
        // intact.
        let store = SessionStore::open(dir.path()).unwrap();
        let session = store.current().unwrap();
        assert_eq!(session.id, session_id);
        assert_eq!(session.messages.len(), 2);
        assert_eq!(session.messages[0].role, Role::User);
        assert_eq!(session.messages[1].role, Role::Assistant);
        assert_eq!(session.messages, written);
        assert_eq!(
            session.messages[1].code_snippet.as_deref(),
            Some("<Button/>")
        );
    }

    #[test]
    fn replace_messages_refreshes_title() {
        let dir = tempfile::tempdir().unwrap();
        let store = SessionStore::open(dir.path()).unwrap();
        let id = store.current_id().unwrap();
        store.replace_messages(&id, vec![Message::user("hai")]);
        assert_eq!(store.current().unwrap().title, "hai");
    }

    #[test]
    fn create_and_delete_keep_store_nonempty() {
        let dir = tempfile::tempdir().unwrap();
        let store = SessionStore::open(dir.path()).unwrap();
        let first = store.current_id().unwrap();
        let second = store.create();
        assert_eq!(store.current_id().unwrap(), second);
        assert_eq!(store.sessions().len(), 2);

        store.delete(&second);
        assert_eq!(store.current_id().unwrap(), first);

        store.delete(&first);
        // Last deletion leaves a fresh empty session.
        assert_eq!(store.sessions().len(), 1);
        assert!(store.current().is_some());
    }

    #[test]
    fn set_current_rejects_unknown_id() {
        let dir = tempfile::tempdir().unwrap();
        let store = SessionStore::open(dir.path()).unwrap();
        assert!(!store.set_current("nope"));
        let id = store.current_id().unwrap();
        assert!(store.set_current(&id));
    }

    #[test]
    fn search_returns_snippets() {
        let dir = tempfile::tempdir().unwrap();
        let store = SessionStore::open(dir.path()).unwrap();
        let id = store.current_id().unwrap();
        store.replace_messages(
            &id,
            vec![Message::user(
                "tolong jelaskan kenapa borrow checker menolak kode ini",
            )],
        );
        let hits = store.search("borrow");
        assert_eq!(hits.len(), 1);
        assert!(hits[0].snippet.contains("borrow"));
        assert_eq!(hits[0].message_index, 0);
        assert!(store.search("zzz").is_empty());
    }
}
