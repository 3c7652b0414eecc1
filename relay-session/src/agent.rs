//! Collaborator contracts consumed by the lifecycle core.
//!
//! The core never talks to a model or a chat platform directly. It needs
//! exactly two things from the outside world: a classifier that maps a
//! session's first message to a workflow label, and an agent runtime that
//! streams a turn. Both accept a cancellation token and are free to ignore
//! everything else about the core.

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Output of the one-time workflow classification call.
///
/// The label is a raw string; the core validates it against the closed
/// workflow set and coerces unknown labels to the fallback.
#[derive(Debug, Clone)]
pub struct Classification {
    pub workflow_label: String,
    pub title: String,
}

/// Maps a session's first message to a workflow.
///
/// Implementations should observe `cancel` and return promptly once it
/// fires; the core treats any error identically (fallback workflow) and
/// never inspects the failure reason.
#[async_trait]
pub trait WorkflowClassifier: Send + Sync {
    async fn classify(
        &self,
        text: &str,
        cancel: CancellationToken,
    ) -> anyhow::Result<Classification>;
}

/// One turn handed to the agent runtime.
#[derive(Debug, Clone)]
pub struct AgentRequest {
    pub prompt: String,
    /// Resume a prior agent context, when present.
    pub resume_token: Option<String>,
    pub working_directory: Option<String>,
    pub model: Option<String>,
}

/// Incremental output of an agent turn. The core only consumes the
/// terminal events; everything else is passed through to the transport.
#[derive(Debug, Clone)]
pub enum AgentEvent {
    /// Assistant text chunk.
    Text(String),
    /// Tool invocation notice.
    ToolUse { name: String, detail: String },
    /// Turn finished; the token resumes this context on the next call.
    Completed { resume_token: String },
    /// Turn failed; the context is considered poisoned.
    Failed { message: String },
}

/// Streaming agent runtime.
///
/// Implementations must observe `cancel` cooperatively and terminate the
/// stream promptly; the core never forcibly kills underlying work.
#[async_trait]
pub trait AgentRuntime: Send + Sync {
    async fn stream(
        &self,
        request: AgentRequest,
        cancel: CancellationToken,
    ) -> anyhow::Result<mpsc::Receiver<AgentEvent>>;
}
