//! Session lifecycle coordination for thread-bound AI agent conversations.
//!
//! A session binds one chat thread to a long-lived agent context. This
//! crate owns the hard part of that binding: which request is currently
//! executing, who may interrupt it, how a session is classified into a
//! workflow exactly once under concurrent triggers, and how idle sessions
//! are warned and expired.
//!
//! The chat transport and the agent runtime live elsewhere; they plug in
//! through the [`agent::WorkflowClassifier`], [`agent::AgentRuntime`], and
//! [`expiry::ExpiryNotifier`] traits.
//!
//! Typical wiring:
//!
//! ```no_run
//! use std::sync::Arc;
//! use relay_session::{InboundTurn, SessionLifecycleManager, SessionSettings, TurnOutcome};
//! # async fn run(classifier: Arc<dyn relay_session::WorkflowClassifier>) {
//! let settings = SessionSettings::default();
//! let manager = SessionLifecycleManager::new(&settings, classifier);
//!
//! let ctx = manager
//!     .handle_turn(InboundTurn {
//!         actor_id: "U1".into(),
//!         actor_name: "alice".into(),
//!         channel_id: "C1".into(),
//!         thread_id: Some("T1".into()),
//!         text: "review PR 42".into(),
//!     })
//!     .await
//!     .unwrap();
//!
//! // ... stream the agent runtime with ctx.session / ctx.cancel ...
//! manager.finish_turn(&ctx.session.key, TurnOutcome::Completed { resume_token: None });
//! # }
//! ```

pub mod agent;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod expiry;
pub mod interrupt;
pub mod manager;
pub mod requests;
pub mod session;

pub use agent::{AgentEvent, AgentRequest, AgentRuntime, Classification, WorkflowClassifier};
pub use config::SessionSettings;
pub use dispatch::DispatchCoordinator;
pub use error::{Result, SessionError};
pub use expiry::{ExpiryNotifier, ExpiryScheduler};
pub use interrupt::can_interrupt;
pub use manager::{InboundTurn, SessionLifecycleManager, TurnContext, TurnOutcome};
pub use requests::RequestCoordinator;
pub use session::{
    ConversationKey, PendingWarning, Session, SessionPhase, SessionRegistry, SweepReport,
    WarningState, Workflow,
};
