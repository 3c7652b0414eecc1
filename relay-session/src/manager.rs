//! Top-level session lifecycle orchestration.
//!
//! The message-handling layer calls [`SessionLifecycleManager::handle_turn`]
//! for every inbound chat event. The manager resolves or creates the
//! session, runs one-time workflow classification, applies the interrupt
//! policy against any in-flight request, and hands back an execution
//! context. The caller streams the agent runtime with the returned token
//! and reports the outcome through [`SessionLifecycleManager::finish_turn`].

use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::agent::{AgentRequest, WorkflowClassifier};
use crate::config::SessionSettings;
use crate::dispatch::DispatchCoordinator;
use crate::error::{Result, SessionError};
use crate::interrupt::can_interrupt;
use crate::requests::RequestCoordinator;
use crate::session::{ConversationKey, Session, SessionRegistry};

/// One inbound chat event.
#[derive(Debug, Clone)]
pub struct InboundTurn {
    pub actor_id: String,
    pub actor_name: String,
    pub channel_id: String,
    pub thread_id: Option<String>,
    pub text: String,
}

/// What the caller needs to run the agent turn: a session snapshot (resume
/// token, working directory, model) and the cancellation handle registered
/// for this request.
#[derive(Debug, Clone)]
pub struct TurnContext {
    pub session: Session,
    pub cancel: CancellationToken,
}

impl TurnContext {
    /// Build the agent-runtime request for this turn, carrying the
    /// session's resume token, working directory, and model.
    pub fn agent_request(&self, prompt: impl Into<String>) -> AgentRequest {
        AgentRequest {
            prompt: prompt.into(),
            resume_token: self.session.resume_token.clone(),
            working_directory: self.session.working_directory.clone(),
            model: self.session.model.clone(),
        }
    }
}

/// How an agent turn ended.
#[derive(Debug, Clone)]
pub enum TurnOutcome {
    /// The stream completed; a token, when present, resumes this context.
    Completed { resume_token: Option<String> },
    /// The runtime failed. The stored resume token is cleared so the next
    /// turn starts fresh instead of resuming a poisoned context.
    Failed,
    /// The turn was cancelled. Treated like a failure for context purposes,
    /// not as an error.
    Aborted,
}

/// Composes registry, dispatch, request coordination, and interrupt policy
/// behind the per-turn entry point.
pub struct SessionLifecycleManager {
    registry: Arc<SessionRegistry>,
    requests: Arc<RequestCoordinator>,
    dispatch: DispatchCoordinator,
}

impl SessionLifecycleManager {
    pub fn new(settings: &SessionSettings, classifier: Arc<dyn WorkflowClassifier>) -> Self {
        let registry = Arc::new(SessionRegistry::new(settings));
        let requests = Arc::new(RequestCoordinator::new());
        let dispatch = DispatchCoordinator::new(registry.clone(), classifier, settings);
        Self {
            registry,
            requests,
            dispatch,
        }
    }

    /// Derive the conversation key for a chat surface and optional thread.
    pub fn conversation_key(channel_id: &str, thread_id: Option<&str>) -> ConversationKey {
        ConversationKey::new(channel_id, thread_id)
    }

    pub fn registry(&self) -> Arc<SessionRegistry> {
        self.registry.clone()
    }

    pub fn requests(&self) -> Arc<RequestCoordinator> {
        self.requests.clone()
    }

    /// Handle one inbound turn end to end:
    /// validate, resolve or create the session, ensure it is classified,
    /// apply interrupt authority to any in-flight request, register a fresh
    /// cancellation handle, and return the execution context.
    ///
    /// A turn from an actor without interrupt authority proceeds as an
    /// independent turn: the in-flight request keeps running and the
    /// current initiator is not taken over.
    pub async fn handle_turn(&self, turn: InboundTurn) -> Result<TurnContext> {
        if turn.actor_id.trim().is_empty() || turn.channel_id.trim().is_empty() {
            return Err(SessionError::InvalidTurn(
                "actor and channel ids are required".to_owned(),
            ));
        }
        if turn.text.trim().is_empty() {
            return Err(SessionError::InvalidTurn("empty message".to_owned()));
        }

        let key = ConversationKey::new(&turn.channel_id, turn.thread_id.as_deref());
        let (session, created) = self
            .registry
            .get_or_create(&key, &turn.actor_id, &turn.actor_name);
        if created {
            debug!(key = %key, owner = %turn.actor_id, "New session for turn");
        }

        if session.phase.is_initializing() {
            self.dispatch.ensure_dispatched(&key, &turn.text).await;
        }

        let session = self
            .registry
            .get(&key)
            .ok_or_else(|| SessionError::NotFound(key.to_string()))?;

        let takes_over = if self.requests.is_active(&key) {
            if can_interrupt(&session, &turn.actor_id) {
                info!(key = %key, actor = %turn.actor_id, "Interrupting in-flight request");
                self.requests.cancel(&key);
                true
            } else {
                debug!(
                    key = %key,
                    actor = %turn.actor_id,
                    "Actor lacks interrupt authority; turn proceeds without cancelling"
                );
                false
            }
        } else {
            true
        };

        if takes_over {
            self.registry
                .set_initiator(&key, &turn.actor_id, &turn.actor_name);
        }
        self.registry.touch(&key);

        let cancel = CancellationToken::new();
        self.requests.register(&key, cancel.clone());

        let session = self
            .registry
            .get(&key)
            .ok_or_else(|| SessionError::NotFound(key.to_string()))?;
        Ok(TurnContext { session, cancel })
    }

    /// Record the outcome of an agent turn and release its request handle.
    /// Must be called on every exit of the streaming call.
    pub fn finish_turn(&self, key: &ConversationKey, outcome: TurnOutcome) {
        match outcome {
            TurnOutcome::Completed {
                resume_token: Some(token),
            } => self.registry.set_resume_token(key, &token),
            TurnOutcome::Completed { resume_token: None } => {}
            TurnOutcome::Failed | TurnOutcome::Aborted => {
                self.registry.clear_resume_token(key);
            }
        }
        self.requests.release(key);
    }

    /// Remove the request handle without touching session state.
    pub fn release(&self, key: &ConversationKey) {
        self.requests.release(key);
    }

    /// Start fresh in this thread: cancel any in-flight request and clear
    /// the resumable context, keeping ownership and workflow. Returns
    /// whether anything was reset.
    pub fn reset_context(&self, key: &ConversationKey) -> bool {
        if self.requests.cancel(key) {
            self.requests.release(key);
        }
        self.registry.reset_context(key)
    }

    /// Tear the session down entirely. Returns whether one existed.
    pub fn terminate(&self, key: &ConversationKey) -> bool {
        if self.requests.cancel(key) {
            self.requests.release(key);
        }
        self.registry.terminate(key)
    }
}
