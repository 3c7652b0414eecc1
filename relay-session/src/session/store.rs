//! Session persistence file.
//!
//! Sessions that produced a resume token are written wholesale to a JSON
//! array on every state-affecting mutation. The in-memory registry stays
//! authoritative; the file only exists so a restart can resume live
//! conversations. Last-writer-wins is acceptable.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info, warn};

use super::key::ConversationKey;
use super::types::{Session, SessionPhase, Workflow};

/// On-disk session record. Field names are part of the file format; do not
/// rename without a migration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PersistedSession {
    key: String,
    owner_id: String,
    owner_name: String,
    channel_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    thread_id: Option<String>,
    resume_token: String,
    is_active: bool,
    last_activity: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    working_directory: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    model: Option<String>,
    state: String,
    workflow: String,
}

impl PersistedSession {
    fn from_session(session: &Session, resume_token: &str) -> Self {
        Self {
            key: session.key.to_string(),
            owner_id: session.owner_id.clone(),
            owner_name: session.owner_name.clone(),
            channel_id: session.key.channel_id().to_owned(),
            thread_id: session.key.thread_id().map(str::to_owned),
            resume_token: resume_token.to_owned(),
            // A restart never resumes an in-flight request.
            is_active: false,
            last_activity: session.last_activity,
            working_directory: session.working_directory.clone(),
            title: session.title.clone(),
            model: session.model.clone(),
            state: match session.phase {
                SessionPhase::Initializing => "initializing".to_owned(),
                SessionPhase::Main { .. } => "main".to_owned(),
            },
            workflow: session
                .phase
                .workflow()
                .unwrap_or_default()
                .as_str()
                .to_owned(),
        }
    }

    fn into_session(self) -> Session {
        let key = ConversationKey::new(self.channel_id, self.thread_id.as_deref());
        Session {
            key,
            // The previous initiator is not worth persisting; ownership is
            // a safe default until the next turn arrives.
            current_initiator_id: self.owner_id.clone(),
            current_initiator_name: self.owner_name.clone(),
            owner_id: self.owner_id,
            owner_name: self.owner_name,
            phase: SessionPhase::Main {
                workflow: Workflow::parse(&self.workflow),
            },
            title: self.title,
            resume_token: Some(self.resume_token),
            working_directory: self.working_directory,
            model: self.model,
            last_activity: self.last_activity,
            warning: None,
        }
    }
}

/// JSON-file store for resumable sessions.
pub struct SessionStore {
    path: PathBuf,
}

impl SessionStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load resumable sessions, dropping entries already past the idle
    /// expiry threshold so downtime cannot resurrect stale conversations.
    /// A missing file is an empty set; a malformed file is logged and
    /// treated as empty.
    pub fn load(&self, max_idle: Duration) -> Vec<Session> {
        let raw = match fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Vec::new(),
            Err(e) => {
                warn!(path = ?self.path, error = %e, "Failed to read session file");
                return Vec::new();
            }
        };

        let records: Vec<PersistedSession> = match serde_json::from_str(&raw) {
            Ok(records) => records,
            Err(e) => {
                warn!(path = ?self.path, error = %e, "Malformed session file, starting fresh");
                return Vec::new();
            }
        };

        let cutoff = Utc::now()
            - chrono::Duration::from_std(max_idle).unwrap_or_else(|_| chrono::Duration::zero());
        let total = records.len();
        let sessions: Vec<Session> = records
            .into_iter()
            .filter(|r| {
                let live = r.last_activity > cutoff;
                if !live {
                    debug!(key = %r.key, last_activity = %r.last_activity, "Dropping expired session on load");
                }
                live
            })
            .map(PersistedSession::into_session)
            .collect();

        info!(
            path = ?self.path,
            loaded = sessions.len(),
            dropped = total - sessions.len(),
            "Loaded session file"
        );
        sessions
    }

    /// Write the resumable subset of `sessions` wholesale. The write is
    /// atomic (temp file + rename) so a crash mid-write cannot corrupt the
    /// previous snapshot.
    pub fn save<'a>(&self, sessions: impl Iterator<Item = &'a Session>) -> Result<()> {
        let records: Vec<PersistedSession> = sessions
            .filter_map(|s| {
                s.resume_token
                    .as_deref()
                    .map(|token| PersistedSession::from_session(s, token))
            })
            .collect();

        let json = serde_json::to_string_pretty(&records).context("serialize session file")?;

        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, json)
            .with_context(|| format!("write temp session file {:?}", tmp))?;
        fs::rename(&tmp, &self.path)
            .with_context(|| format!("replace session file {:?}", self.path))?;

        debug!(path = ?self.path, count = records.len(), "Saved session file");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn resumable(channel: &str, thread: Option<&str>, token: &str) -> Session {
        let mut s = Session::new(ConversationKey::new(channel, thread), "U1", "alice");
        s.phase = SessionPhase::Main {
            workflow: Workflow::Code,
        };
        s.title = Some("Fix the build".to_owned());
        s.resume_token = Some(token.to_owned());
        s
    }

    #[test]
    fn test_missing_file_loads_empty() {
        let dir = tempdir().unwrap();
        let store = SessionStore::new(dir.path().join("sessions.json"));
        assert!(store.load(Duration::from_secs(60)).is_empty());
    }

    #[test]
    fn test_save_load_roundtrip() {
        let dir = tempdir().unwrap();
        let store = SessionStore::new(dir.path().join("sessions.json"));

        let a = resumable("C1", Some("T1"), "tok-a");
        let b = resumable("C2", None, "tok-b");
        store.save([&a, &b].into_iter()).unwrap();

        let mut loaded = store.load(Duration::from_secs(3600));
        loaded.sort_by_key(|s| s.key.to_string());
        assert_eq!(loaded.len(), 2);
        assert_eq!(loaded[0].key, a.key);
        assert_eq!(loaded[0].resume_token.as_deref(), Some("tok-a"));
        assert_eq!(loaded[0].phase.workflow(), Some(Workflow::Code));
        assert_eq!(loaded[0].title.as_deref(), Some("Fix the build"));
        assert_eq!(loaded[1].key, b.key);
    }

    #[test]
    fn test_non_resumable_sessions_are_not_written() {
        let dir = tempdir().unwrap();
        let store = SessionStore::new(dir.path().join("sessions.json"));

        let fresh = Session::new(ConversationKey::new("C1", Some("T1")), "U1", "alice");
        let live = resumable("C2", None, "tok");
        store.save([&fresh, &live].into_iter()).unwrap();

        let loaded = store.load(Duration::from_secs(3600));
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].key, live.key);
    }

    #[test]
    fn test_load_drops_stale_entries() {
        let dir = tempdir().unwrap();
        let store = SessionStore::new(dir.path().join("sessions.json"));

        let mut stale = resumable("C1", Some("T1"), "tok-old");
        stale.last_activity = Utc::now() - chrono::Duration::hours(2);
        let live = resumable("C2", None, "tok-new");
        store.save([&stale, &live].into_iter()).unwrap();

        let loaded = store.load(Duration::from_secs(1800));
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].key, live.key);
    }

    #[test]
    fn test_malformed_file_loads_empty() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("sessions.json");
        fs::write(&path, "not json at all").unwrap();

        let store = SessionStore::new(path);
        assert!(store.load(Duration::from_secs(60)).is_empty());
    }
}
