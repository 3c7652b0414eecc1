//! Per-session tracking of the in-flight agent request.

use dashmap::DashMap;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::session::ConversationKey;

/// Tracks the cancellation handle of the request currently executing for
/// each session. At most one handle is stored per key: `register` replaces,
/// `cancel` signals without removing, `release` removes.
///
/// Callers must `register` before starting the streaming call and `release`
/// in a cleanup path that runs on every exit — success, error, or
/// cancellation.
#[derive(Default)]
pub struct RequestCoordinator {
    active: DashMap<ConversationKey, CancellationToken>,
}

impl RequestCoordinator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether a request is currently registered for `key`.
    pub fn is_active(&self, key: &ConversationKey) -> bool {
        self.active.contains_key(key)
    }

    /// Store the handle for a new request, replacing any prior one.
    pub fn register(&self, key: &ConversationKey, handle: CancellationToken) {
        if self.active.insert(key.clone(), handle).is_some() {
            debug!(key = %key, "Replaced request handle");
        }
    }

    /// Signal cancellation on the stored handle, if any. The entry stays
    /// registered until the request's cleanup path calls `release`;
    /// cancellation is cooperative and the underlying work is never killed
    /// forcibly. Returns whether a handle was signalled.
    pub fn cancel(&self, key: &ConversationKey) -> bool {
        match self.active.get(key) {
            Some(handle) => {
                debug!(key = %key, "Cancelling in-flight request");
                handle.cancel();
                true
            }
            None => false,
        }
    }

    /// Remove the entry once a request completes, errors, or is cancelled.
    /// Returns whether an entry existed.
    pub fn release(&self, key: &ConversationKey) -> bool {
        self.active.remove(key).is_some()
    }
}
