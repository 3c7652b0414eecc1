//! One-time workflow classification with concurrent-trigger deduplication.
//!
//! Any number of turns can race to classify a fresh session; exactly one
//! classification call is issued, and every failure mode (error, timeout,
//! a primary caller that never settles) resolves to the fallback workflow
//! rather than an error the user sees.

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use regex::Regex;
use std::sync::{Arc, LazyLock};
use std::time::Duration;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::agent::WorkflowClassifier;
use crate::config::SessionSettings;
use crate::session::{ConversationKey, SessionRegistry, Workflow};

/// Title used when sanitization leaves nothing.
const PLACEHOLDER_TITLE: &str = "New conversation";

static MENTION: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"<[@!][^>]*>").unwrap());
static CHANNEL_REF: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"<#[^|>]*(\|[^>]*)?>").unwrap());
static LINK: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"<(https?://[^|>]+)(?:\|([^>]*))?>").unwrap());

/// Strip chat-platform mention/link syntax, collapse whitespace, and cap
/// the length on a char boundary (with an ellipsis when truncated).
pub fn sanitize_title(raw: &str, max_chars: usize) -> String {
    let text = MENTION.replace_all(raw, " ");
    let text = CHANNEL_REF.replace_all(&text, " ");
    let text = LINK.replace_all(&text, |caps: &regex::Captures<'_>| {
        caps.get(2)
            .map(|label| label.as_str())
            .unwrap_or_else(|| caps.get(1).map_or("", |url| url.as_str()))
            .to_owned()
    });

    let collapsed = text.split_whitespace().collect::<Vec<_>>().join(" ");
    if collapsed.is_empty() {
        return PLACEHOLDER_TITLE.to_owned();
    }
    if collapsed.chars().count() <= max_chars {
        return collapsed;
    }

    let mut truncated: String = collapsed.chars().take(max_chars).collect();
    truncated.push('…');
    truncated
}

/// Removes the in-flight marker and wakes waiters on every exit path,
/// including the primary caller's future being dropped mid-classification.
/// Waiters re-check session state themselves, so a missed wakeup only
/// costs them their bounded wait.
struct InFlightGuard<'a> {
    in_flight: &'a DashMap<ConversationKey, Arc<Notify>>,
    key: ConversationKey,
    marker: Arc<Notify>,
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.in_flight.remove(&self.key);
        self.marker.notify_waiters();
    }
}

/// Classifies a session's first message exactly once.
pub struct DispatchCoordinator {
    registry: Arc<SessionRegistry>,
    classifier: Arc<dyn WorkflowClassifier>,
    /// In-flight markers, keyed by conversation. Registered synchronously
    /// before any await so two concurrent triggers cannot both start a
    /// classification call.
    in_flight: DashMap<ConversationKey, Arc<Notify>>,
    classify_timeout: Duration,
    wait_timeout: Duration,
    title_max_chars: usize,
}

impl DispatchCoordinator {
    pub fn new(
        registry: Arc<SessionRegistry>,
        classifier: Arc<dyn WorkflowClassifier>,
        settings: &SessionSettings,
    ) -> Self {
        Self {
            registry,
            classifier,
            in_flight: DashMap::new(),
            classify_timeout: settings.classify_timeout(),
            wait_timeout: settings.dispatch_wait_timeout(),
            title_max_chars: settings.title_max_chars,
        }
    }

    /// Ensure the session for `key` has a workflow assigned, classifying
    /// its first message if needed. Safe to call from any number of turns
    /// concurrently; returns once the session has left `Initializing`.
    pub async fn ensure_dispatched(&self, key: &ConversationKey, first_message: &str) {
        match self.registry.get(key) {
            Some(session) if session.phase.is_initializing() => {}
            _ => return,
        }

        // Synchronous check-and-insert: this must happen before the first
        // await, or two turns could both observe Initializing and both
        // issue a classification call.
        let _guard = match self.in_flight.entry(key.clone()) {
            Entry::Occupied(entry) => {
                let marker = entry.get().clone();
                drop(entry);
                self.await_in_flight(key, first_message, marker).await;
                return;
            }
            Entry::Vacant(entry) => {
                let marker = Arc::new(Notify::new());
                entry.insert(marker.clone());
                InFlightGuard {
                    in_flight: &self.in_flight,
                    key: key.clone(),
                    marker,
                }
            }
        };

        self.classify_and_transition(key, first_message).await;
    }

    /// Secondary path: another turn already started classification. Wait
    /// for it with an independent budget; if it never settles, force the
    /// fallback so this turn can make progress.
    async fn await_in_flight(
        &self,
        key: &ConversationKey,
        first_message: &str,
        marker: Arc<Notify>,
    ) {
        debug!(key = %key, "Awaiting in-flight dispatch");

        // Register for the wakeup before re-reading state: a primary that
        // settles between the marker read and the await would otherwise
        // cost this turn the full wait budget.
        let mut notified = std::pin::pin!(marker.notified());
        notified.as_mut().enable();
        let settled = !self
            .registry
            .get(key)
            .is_some_and(|s| s.phase.is_initializing());
        if settled {
            return;
        }

        if tokio::time::timeout(self.wait_timeout, notified)
            .await
            .is_err()
        {
            warn!(key = %key, "In-flight dispatch did not settle in time");
        }

        let still_initializing = self
            .registry
            .get(key)
            .is_some_and(|s| s.phase.is_initializing());
        if still_initializing {
            let title = sanitize_title(first_message, self.title_max_chars);
            if self
                .registry
                .transition_to_main(key, Workflow::Default, &title)
            {
                warn!(key = %key, "Forced fallback dispatch after stalled classification");
            }
        }
    }

    /// Primary path: run the classifier under its budget and transition
    /// the session. Every failure resolves to the fallback workflow with a
    /// title derived from the first message.
    async fn classify_and_transition(&self, key: &ConversationKey, first_message: &str) {
        let cancel = CancellationToken::new();
        let outcome = tokio::time::timeout(
            self.classify_timeout,
            self.classifier.classify(first_message, cancel.clone()),
        )
        .await;

        let (workflow, title) = match outcome {
            Ok(Ok(classification)) => {
                let workflow = Workflow::parse(&classification.workflow_label);
                let title = sanitize_title(&classification.title, self.title_max_chars);
                (workflow, title)
            }
            Ok(Err(e)) => {
                warn!(key = %key, error = %e, "Classification failed, using fallback workflow");
                (
                    Workflow::Default,
                    sanitize_title(first_message, self.title_max_chars),
                )
            }
            Err(_) => {
                cancel.cancel();
                warn!(key = %key, "Classification timed out, using fallback workflow");
                (
                    Workflow::Default,
                    sanitize_title(first_message, self.title_max_chars),
                )
            }
        };

        self.registry.transition_to_main(key, workflow, &title);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::Classification;
    use crate::config::SessionSettings;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::tempdir;

    struct FixedClassifier {
        calls: AtomicUsize,
        label: &'static str,
        title: &'static str,
        delay: Duration,
    }

    #[async_trait]
    impl WorkflowClassifier for FixedClassifier {
        async fn classify(
            &self,
            _text: &str,
            _cancel: CancellationToken,
        ) -> anyhow::Result<Classification> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(self.delay).await;
            Ok(Classification {
                workflow_label: self.label.to_owned(),
                title: self.title.to_owned(),
            })
        }
    }

    struct FailingClassifier;

    #[async_trait]
    impl WorkflowClassifier for FailingClassifier {
        async fn classify(
            &self,
            _text: &str,
            _cancel: CancellationToken,
        ) -> anyhow::Result<Classification> {
            anyhow::bail!("model unavailable")
        }
    }

    fn test_settings(dir: &std::path::Path) -> SessionSettings {
        SessionSettings {
            persistence_path: dir.join("sessions.json"),
            classify_timeout_secs: 1,
            dispatch_wait_timeout_secs: 1,
            ..SessionSettings::default()
        }
    }

    fn key() -> ConversationKey {
        ConversationKey::new("C1", Some("T1"))
    }

    #[test]
    fn test_sanitize_strips_mentions_and_links() {
        assert_eq!(
            sanitize_title("<@U123> please review <https://example.com/pr/42|PR 42>", 60),
            "please review PR 42"
        );
        assert_eq!(
            sanitize_title("check <https://example.com/x>", 60),
            "check https://example.com/x"
        );
        assert_eq!(sanitize_title("look in <#C55|general>", 60), "look in");
    }

    #[test]
    fn test_sanitize_collapses_whitespace_and_truncates() {
        assert_eq!(sanitize_title("  a\n\n b\t c  ", 60), "a b c");
        let long = "x".repeat(100);
        let title = sanitize_title(&long, 10);
        assert_eq!(title.chars().count(), 11);
        assert!(title.ends_with('…'));
    }

    #[test]
    fn test_sanitize_empty_falls_back_to_placeholder() {
        assert_eq!(sanitize_title("  <@U1>  ", 60), PLACEHOLDER_TITLE);
        assert_eq!(sanitize_title("", 60), PLACEHOLDER_TITLE);
    }

    #[tokio::test]
    async fn test_concurrent_dispatch_issues_one_classification() {
        let dir = tempdir().unwrap();
        let settings = test_settings(dir.path());
        let registry = Arc::new(SessionRegistry::new(&settings));
        registry.get_or_create(&key(), "U1", "alice");

        let classifier = Arc::new(FixedClassifier {
            calls: AtomicUsize::new(0),
            label: "code",
            title: "Fix the build",
            delay: Duration::from_millis(50),
        });
        let dispatch = Arc::new(DispatchCoordinator::new(
            registry.clone(),
            classifier.clone(),
            &settings,
        ));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let dispatch = dispatch.clone();
            handles.push(tokio::spawn(async move {
                dispatch.ensure_dispatched(&key(), "fix the build").await;
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(classifier.calls.load(Ordering::SeqCst), 1);
        let session = registry.get(&key()).unwrap();
        assert_eq!(session.phase.workflow(), Some(Workflow::Code));
        assert_eq!(session.title.as_deref(), Some("Fix the build"));
    }

    #[tokio::test]
    async fn test_classifier_error_falls_back_to_default() {
        let dir = tempdir().unwrap();
        let settings = test_settings(dir.path());
        let registry = Arc::new(SessionRegistry::new(&settings));
        registry.get_or_create(&key(), "U1", "alice");

        let dispatch =
            DispatchCoordinator::new(registry.clone(), Arc::new(FailingClassifier), &settings);
        dispatch.ensure_dispatched(&key(), "review PR 42").await;

        let session = registry.get(&key()).unwrap();
        assert_eq!(session.phase.workflow(), Some(Workflow::Default));
        assert_eq!(session.title.as_deref(), Some("review PR 42"));
    }

    #[tokio::test]
    async fn test_classifier_timeout_falls_back_to_default() {
        let dir = tempdir().unwrap();
        let mut settings = test_settings(dir.path());
        settings.classify_timeout_secs = 0;
        let registry = Arc::new(SessionRegistry::new(&settings));
        registry.get_or_create(&key(), "U1", "alice");

        let classifier = Arc::new(FixedClassifier {
            calls: AtomicUsize::new(0),
            label: "code",
            title: "never arrives",
            delay: Duration::from_secs(5),
        });
        let dispatch = DispatchCoordinator::new(registry.clone(), classifier, &settings);
        dispatch.ensure_dispatched(&key(), "review PR 42").await;

        let session = registry.get(&key()).unwrap();
        assert_eq!(session.phase.workflow(), Some(Workflow::Default));
        assert_eq!(session.title.as_deref(), Some("review PR 42"));
    }

    #[tokio::test]
    async fn test_unknown_label_coerced_to_default() {
        let dir = tempdir().unwrap();
        let settings = test_settings(dir.path());
        let registry = Arc::new(SessionRegistry::new(&settings));
        registry.get_or_create(&key(), "U1", "alice");

        let classifier = Arc::new(FixedClassifier {
            calls: AtomicUsize::new(0),
            label: "interpretive-dance",
            title: "Untitled",
            delay: Duration::ZERO,
        });
        let dispatch = DispatchCoordinator::new(registry.clone(), classifier, &settings);
        dispatch.ensure_dispatched(&key(), "hello").await;

        let session = registry.get(&key()).unwrap();
        assert_eq!(session.phase.workflow(), Some(Workflow::Default));
    }

    #[tokio::test]
    async fn test_waiters_return_promptly_after_primary_settles() {
        let dir = tempdir().unwrap();
        let mut settings = test_settings(dir.path());
        // A missed wakeup would make a waiter sit out this entire budget.
        settings.dispatch_wait_timeout_secs = 60;
        let registry = Arc::new(SessionRegistry::new(&settings));
        registry.get_or_create(&key(), "U1", "alice");

        let classifier = Arc::new(FixedClassifier {
            calls: AtomicUsize::new(0),
            label: "review",
            title: "Review PR",
            delay: Duration::from_millis(50),
        });
        let dispatch = Arc::new(DispatchCoordinator::new(
            registry.clone(),
            classifier.clone(),
            &settings,
        ));

        let mut handles = Vec::new();
        for _ in 0..4 {
            let dispatch = dispatch.clone();
            handles.push(tokio::spawn(async move {
                dispatch.ensure_dispatched(&key(), "review this").await;
            }));
        }
        let all = async {
            for handle in handles {
                handle.await.unwrap();
            }
        };
        tokio::time::timeout(Duration::from_secs(5), all)
            .await
            .expect("waiters should settle with the primary, not their own budget");

        assert_eq!(classifier.calls.load(Ordering::SeqCst), 1);
        let session = registry.get(&key()).unwrap();
        assert_eq!(session.phase.workflow(), Some(Workflow::Review));
    }

    #[tokio::test]
    async fn test_already_dispatched_session_is_noop() {
        let dir = tempdir().unwrap();
        let settings = test_settings(dir.path());
        let registry = Arc::new(SessionRegistry::new(&settings));
        registry.get_or_create(&key(), "U1", "alice");
        registry.transition_to_main(&key(), Workflow::Ops, "Deploy");

        let classifier = Arc::new(FixedClassifier {
            calls: AtomicUsize::new(0),
            label: "code",
            title: "ignored",
            delay: Duration::ZERO,
        });
        let dispatch = DispatchCoordinator::new(registry.clone(), classifier.clone(), &settings);
        dispatch.ensure_dispatched(&key(), "anything").await;

        assert_eq!(classifier.calls.load(Ordering::SeqCst), 0);
        let session = registry.get(&key()).unwrap();
        assert_eq!(session.phase.workflow(), Some(Workflow::Ops));
        assert_eq!(session.title.as_deref(), Some("Deploy"));
    }
}
