//! Session entity and workflow types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::key::ConversationKey;

/// Behavioral mode a session runs under, assigned exactly once when the
/// session leaves `Initializing`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Workflow {
    /// Fallback mode when classification fails, times out, or returns an
    /// unknown label.
    Default,
    /// Writing or modifying code
    Code,
    /// Reviewing diffs, pull requests, or designs
    Review,
    /// Open-ended investigation and summarization
    Research,
    /// Operational tasks (deploys, incidents, infra)
    Ops,
}

impl Workflow {
    /// Convert to the wire/persistence label.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Default => "default",
            Self::Code => "code",
            Self::Review => "review",
            Self::Research => "research",
            Self::Ops => "ops",
        }
    }

    /// Parse a classifier label. Unknown labels coerce to the fallback so
    /// a misbehaving classifier can never wedge a session.
    pub fn parse(s: &str) -> Self {
        match s.trim().to_ascii_lowercase().as_str() {
            "code" => Self::Code,
            "review" => Self::Review,
            "research" => Self::Research,
            "ops" => Self::Ops,
            _ => Self::Default,
        }
    }
}

impl Default for Workflow {
    fn default() -> Self {
        Self::Default
    }
}

/// Lifecycle phase of a session. The only transition is
/// `Initializing -> Main`, performed by the registry; a `Main` session
/// always carries its workflow, so "classified but no workflow" cannot be
/// represented.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "lowercase")]
pub enum SessionPhase {
    Initializing,
    Main { workflow: Workflow },
}

impl SessionPhase {
    pub fn is_initializing(&self) -> bool {
        matches!(self, Self::Initializing)
    }

    /// The assigned workflow, if the session has reached `Main`.
    pub fn workflow(&self) -> Option<Workflow> {
        match self {
            Self::Initializing => None,
            Self::Main { workflow } => Some(*workflow),
        }
    }
}

/// Expiry-warning bookkeeping: which warning rung was last sent, and the
/// chat message it produced (so the transport can edit it later).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WarningState {
    /// Warning interval that fired, in seconds before expiry.
    pub interval_secs: u64,
    /// Transport-side reference to the warning message, if one was posted.
    pub message_ref: Option<String>,
}

/// One multi-turn conversation bound to a chat thread.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    /// Conversation identity; never changes after creation.
    pub key: ConversationKey,
    /// Actor who created the session; never changes.
    pub owner_id: String,
    pub owner_name: String,
    /// Actor whose message triggered the current (or most recent) request.
    pub current_initiator_id: String,
    pub current_initiator_name: String,
    /// Lifecycle phase; moves forward only.
    pub phase: SessionPhase,
    /// Human-readable label, set once from classification output or a
    /// fallback derived from the first message.
    pub title: Option<String>,
    /// Agent-runtime session id; present only after a successful turn.
    /// Absent means the next call starts a fresh agent context.
    pub resume_token: Option<String>,
    /// Working directory handed to the agent runtime.
    pub working_directory: Option<String>,
    /// Model override for this session.
    pub model: Option<String>,
    /// Updated on every inbound turn; drives expiry.
    pub last_activity: DateTime<Utc>,
    /// Last expiry warning sent, if any.
    pub warning: Option<WarningState>,
}

impl Session {
    /// Create a fresh session in `Initializing` phase. The creator is both
    /// owner and first initiator.
    pub fn new(key: ConversationKey, owner_id: &str, owner_name: &str) -> Self {
        Self {
            key,
            owner_id: owner_id.to_owned(),
            owner_name: owner_name.to_owned(),
            current_initiator_id: owner_id.to_owned(),
            current_initiator_name: owner_name.to_owned(),
            phase: SessionPhase::Initializing,
            title: None,
            resume_token: None,
            working_directory: None,
            model: None,
            last_activity: Utc::now(),
            warning: None,
        }
    }

    /// Whether this session survives a restart. Only sessions that produced
    /// a resume token are written to disk; half-initialized ones are not
    /// worth resurrecting.
    pub fn is_resumable(&self) -> bool {
        self.resume_token.is_some()
    }
}
