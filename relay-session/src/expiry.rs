//! Periodic expiry sweep.
//!
//! Warns about, then terminates, sessions inactive beyond the configured
//! threshold. Notification is decoupled from the chat transport through an
//! injected async notifier, so this module never formats or posts anything
//! itself.

use async_trait::async_trait;
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::config::SessionSettings;
use crate::session::{Session, SessionRegistry};

/// Receives expiry notifications. Implemented by the message-handling
/// layer, which owns formatting and posting.
#[async_trait]
pub trait ExpiryNotifier: Send + Sync {
    /// An expiry warning is due. May return a transport message reference,
    /// which is recorded on the session so a later warning can update the
    /// same message.
    async fn on_warning(
        &self,
        session: &Session,
        remaining: Duration,
    ) -> anyhow::Result<Option<String>>;

    /// The session has expired and was removed.
    async fn on_expired(&self, session: &Session) -> anyhow::Result<()>;
}

/// Runs the expiry sweep on a fixed interval.
pub struct ExpiryScheduler {
    registry: Arc<SessionRegistry>,
    notifier: Arc<dyn ExpiryNotifier>,
    threshold: Duration,
    warning_intervals: Vec<Duration>,
    sweep_interval: Duration,
}

impl ExpiryScheduler {
    pub fn new(
        registry: Arc<SessionRegistry>,
        notifier: Arc<dyn ExpiryNotifier>,
        settings: &SessionSettings,
    ) -> Self {
        Self {
            registry,
            notifier,
            threshold: settings.idle_expiry(),
            warning_intervals: settings.warning_intervals(),
            sweep_interval: settings.sweep_interval(),
        }
    }

    /// Sweep loop; returns when `shutdown` fires. Intended to be spawned
    /// once at process start.
    pub async fn run(&self, shutdown: CancellationToken) {
        let mut ticker = tokio::time::interval(self.sweep_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    debug!("Expiry scheduler stopping");
                    return;
                }
                _ = ticker.tick() => {
                    self.sweep_once().await;
                }
            }
        }
    }

    /// One sweep pass: mutate registry state synchronously, then notify.
    pub async fn sweep_once(&self) {
        let report =
            self.registry
                .sweep_expirations(Utc::now(), self.threshold, &self.warning_intervals);

        for pending in &report.warnings {
            match self
                .notifier
                .on_warning(&pending.session, pending.remaining)
                .await
            {
                Ok(Some(message_ref)) => {
                    self.registry
                        .set_warning_message(&pending.session.key, &message_ref);
                }
                Ok(None) => {}
                Err(e) => {
                    warn!(key = %pending.session.key, error = %e, "Expiry warning failed");
                }
            }
        }

        for session in &report.expired {
            if let Err(e) = self.notifier.on_expired(session).await {
                warn!(key = %session.key, error = %e, "Expiry notification failed");
            }
        }
    }
}
