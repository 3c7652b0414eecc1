//! In-memory session registry with snapshot persistence.
//!
//! The registry owns the set of live sessions. All operations are
//! synchronous and atomic per key (DashMap entry locking); nothing here
//! suspends, so two turns can never both win the same transition.

use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::Mutex;
use std::time::Duration;
use tracing::{debug, info, warn};

use super::key::ConversationKey;
use super::store::SessionStore;
use super::types::{Session, SessionPhase, WarningState, Workflow};
use crate::config::SessionSettings;

/// A warning the sweep decided to send. The caller posts it and may hand
/// the resulting message reference back via [`SessionRegistry::set_warning_message`].
#[derive(Debug, Clone)]
pub struct PendingWarning {
    pub session: Session,
    /// Time left until the session expires.
    pub remaining: Duration,
    /// Warning rung that fired, in seconds before expiry.
    pub interval_secs: u64,
}

/// Outcome of one expiry sweep.
#[derive(Debug, Default)]
pub struct SweepReport {
    /// Sessions removed by this sweep. Each session appears in at most one
    /// sweep's report, ever.
    pub expired: Vec<Session>,
    pub warnings: Vec<PendingWarning>,
}

/// Owns all live sessions, keyed by conversation identity.
pub struct SessionRegistry {
    sessions: DashMap<ConversationKey, Session>,
    store: SessionStore,
    /// Serializes snapshot writes; the in-memory map stays authoritative.
    save_lock: Mutex<()>,
    default_model: Option<String>,
    default_working_directory: Option<String>,
}

impl SessionRegistry {
    /// Create a registry, loading resumable sessions from the persistence
    /// file. Entries idle past the expiry threshold are discarded on load.
    pub fn new(settings: &SessionSettings) -> Self {
        let store = SessionStore::new(settings.persistence_path.clone());
        let sessions = DashMap::new();
        for session in store.load(settings.idle_expiry()) {
            sessions.insert(session.key.clone(), session);
        }

        Self {
            sessions,
            store,
            save_lock: Mutex::new(()),
            default_model: settings.default_model.clone(),
            default_working_directory: settings.default_working_directory.clone(),
        }
    }

    /// Return the existing session for `key`, or create one in
    /// `Initializing` phase owned by the given actor.
    pub fn get_or_create(
        &self,
        key: &ConversationKey,
        actor_id: &str,
        actor_name: &str,
    ) -> (Session, bool) {
        match self.sessions.entry(key.clone()) {
            Entry::Occupied(entry) => (entry.get().clone(), false),
            Entry::Vacant(entry) => {
                let mut session = Session::new(key.clone(), actor_id, actor_name);
                session.model = self.default_model.clone();
                session.working_directory = self.default_working_directory.clone();
                info!(key = %key, owner = %actor_id, "Created session");
                entry.insert(session.clone());
                (session, true)
            }
        }
    }

    pub fn get(&self, key: &ConversationKey) -> Option<Session> {
        self.sessions.get(key).map(|s| s.clone())
    }

    /// Snapshot of every live session.
    pub fn sessions(&self) -> Vec<Session> {
        self.sessions.iter().map(|s| s.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Move a session from `Initializing` to `Main`, assigning its workflow
    /// and (if unset) its title. Returns false without modifying anything
    /// when the session is absent or already in `Main` — this is the
    /// registry's idempotence guarantee, and the only way workflow and
    /// phase are ever set.
    pub fn transition_to_main(
        &self,
        key: &ConversationKey,
        workflow: Workflow,
        title: &str,
    ) -> bool {
        let transitioned = {
            let Some(mut session) = self.sessions.get_mut(key) else {
                return false;
            };
            if !session.phase.is_initializing() {
                return false;
            }
            session.phase = SessionPhase::Main { workflow };
            if session.title.is_none() {
                session.title = Some(title.to_owned());
            }
            true
        };

        if transitioned {
            info!(key = %key, workflow = workflow.as_str(), title, "Session dispatched");
            self.save();
        }
        transitioned
    }

    /// Record inbound activity: bump `last_activity` and clear any expiry
    /// warning so a revived session gets a fresh warning ladder.
    pub fn touch(&self, key: &ConversationKey) {
        let resumable = {
            let Some(mut session) = self.sessions.get_mut(key) else {
                return;
            };
            session.last_activity = Utc::now();
            session.warning = None;
            session.is_resumable()
        };
        if resumable {
            self.save();
        }
    }

    /// Update who triggered the current request.
    pub fn set_initiator(&self, key: &ConversationKey, actor_id: &str, actor_name: &str) {
        if let Some(mut session) = self.sessions.get_mut(key) {
            session.current_initiator_id = actor_id.to_owned();
            session.current_initiator_name = actor_name.to_owned();
        }
    }

    /// Store the agent-runtime resume token after a successful turn.
    pub fn set_resume_token(&self, key: &ConversationKey, token: &str) {
        let updated = {
            let Some(mut session) = self.sessions.get_mut(key) else {
                return;
            };
            session.resume_token = Some(token.to_owned());
            true
        };
        if updated {
            self.save();
        }
    }

    /// Drop the resume token so the next turn starts a fresh agent context.
    /// Used after a failed or aborted turn. Returns whether a token was
    /// present.
    pub fn clear_resume_token(&self, key: &ConversationKey) -> bool {
        let cleared = {
            let Some(mut session) = self.sessions.get_mut(key) else {
                return false;
            };
            session.resume_token.take().is_some()
        };
        if cleared {
            debug!(key = %key, "Cleared resume token");
            self.save();
        }
        cleared
    }

    /// Start fresh in this thread without losing ownership or workflow:
    /// clears the resume token, title, initiator fields, and warning state.
    /// No-op (returns false) when there is no resume token to clear.
    pub fn reset_context(&self, key: &ConversationKey) -> bool {
        let reset = {
            let Some(mut session) = self.sessions.get_mut(key) else {
                return false;
            };
            if session.resume_token.is_none() {
                return false;
            }
            session.resume_token = None;
            session.title = None;
            session.current_initiator_id = session.owner_id.clone();
            session.current_initiator_name = session.owner_name.clone();
            session.warning = None;
            true
        };
        if reset {
            info!(key = %key, "Reset session context");
            self.save();
        }
        reset
    }

    /// Remove a session entirely. Returns whether one existed.
    pub fn terminate(&self, key: &ConversationKey) -> bool {
        let removed = self.sessions.remove(key).is_some();
        if removed {
            info!(key = %key, "Terminated session");
            self.save();
        }
        removed
    }

    /// Attach the transport message reference of the most recent warning.
    pub fn set_warning_message(&self, key: &ConversationKey, message_ref: &str) {
        if let Some(mut session) = self.sessions.get_mut(key) {
            if let Some(warning) = session.warning.as_mut() {
                warning.message_ref = Some(message_ref.to_owned());
            }
        }
    }

    /// One expiry pass over all sessions at time `now`.
    ///
    /// Sessions idle for `threshold` or longer are removed; removal goes
    /// through the map's atomic remove, so concurrent sweeps report each
    /// expiry exactly once. For the rest, the next warning rung is the
    /// largest interval covering the remaining time that is more urgent
    /// than the last one sent; the ladder only descends, so a rung never
    /// re-fires.
    pub fn sweep_expirations(
        &self,
        now: DateTime<Utc>,
        threshold: Duration,
        warning_intervals: &[Duration],
    ) -> SweepReport {
        let mut report = SweepReport::default();
        let keys: Vec<ConversationKey> = self.sessions.iter().map(|s| s.key().clone()).collect();

        for key in keys {
            let idle_for = |s: &Session| {
                (now - s.last_activity)
                    .to_std()
                    .unwrap_or(Duration::ZERO)
            };

            if let Some((_, session)) = self
                .sessions
                .remove_if(&key, |_, s| idle_for(s) >= threshold)
            {
                info!(key = %key, "Session expired");
                report.expired.push(session);
                continue;
            }

            let Some(mut session) = self.sessions.get_mut(&key) else {
                continue;
            };
            let remaining = threshold.saturating_sub(idle_for(&session));
            let last_sent = session.warning.as_ref().map(|w| w.interval_secs);
            let next_rung = warning_intervals
                .iter()
                .map(|d| d.as_secs())
                .filter(|&i| {
                    Duration::from_secs(i) >= remaining && last_sent.map_or(true, |sent| i < sent)
                })
                .max();

            if let Some(interval_secs) = next_rung {
                session.warning = Some(WarningState {
                    interval_secs,
                    message_ref: None,
                });
                debug!(key = %key, interval_secs, remaining_secs = remaining.as_secs(), "Expiry warning due");
                report.warnings.push(PendingWarning {
                    session: session.clone(),
                    remaining,
                    interval_secs,
                });
            }
        }

        if !report.expired.is_empty() {
            self.save();
        }
        report
    }

    /// Write the resumable subset to disk. I/O failures are logged and
    /// swallowed; the in-memory map remains authoritative.
    pub fn save(&self) {
        let snapshot = self.sessions();
        let _guard = self.save_lock.lock().unwrap_or_else(|e| e.into_inner());
        if let Err(e) = self.store.save(snapshot.iter()) {
            warn!(path = ?self.store.path(), error = %e, "Failed to persist sessions");
        }
    }
}
