//! Event notification sinks
//!
//! Events that survive a poll cycle are fanned out to every configured
//! notifier. Delivery is best-effort: a sink that fails is logged and
//! skipped so one broken channel never suppresses the others.

use anyhow::Result;
use async_trait::async_trait;
use std::io::Write;
use tracing::{debug, error};

use crate::classify::{ClassifiedEvent, EventKind};

#[async_trait]
pub trait Notifier: Send + Sync {
    /// Short identifier used in logs and rendered output.
    fn name(&self) -> &str;

    async fn deliver(&self, event: &ClassifiedEvent) -> Result<()>;
}

/// Render the human-readable line for an event: what happened, to which
/// branch, by whom.
pub fn render_event(event: &ClassifiedEvent) -> String {
    let content = match event.kind {
        EventKind::BranchCreated => {
            format!(
                "Branch '{}' was created with {} new commit(s)",
                event.branch,
                event.shas.len()
            )
        }
        EventKind::BranchCreatedFromKnownCommit => {
            format!(
                "Branch '{}' was created from known commit {}",
                event.branch,
                short_sha(&event.shas)
            )
        }
        EventKind::BranchUpdated => {
            format!(
                "Branch '{}' advanced by {} commit(s) to {}",
                event.branch,
                event.shas.len(),
                short_sha(&event.shas)
            )
        }
        EventKind::BranchForceUpdated => {
            format!(
                "Branch '{}' was force-pushed to {}",
                event.branch,
                short_sha(&event.shas)
            )
        }
        EventKind::BranchResetToKnownCommit => {
            format!(
                "Branch '{}' was reset to known commit {}",
                event.branch,
                short_sha(&event.shas)
            )
        }
        EventKind::BranchDeleted => format!("Branch '{}' was deleted", event.branch),
    };

    format!(
        "{}: {} <{}>: {}",
        event.repository, event.identity.name, event.identity.email, content
    )
}

fn short_sha(shas: &[String]) -> &str {
    shas.first().map(|s| &s[..s.len().min(8)]).unwrap_or("?")
}

/// Prints one line per event to stdout or stderr.
pub struct ConsoleNotifier {
    use_stderr: bool,
}

impl ConsoleNotifier {
    /// `stream` is "stdout" or "stderr"; anything else falls back to stdout.
    pub fn new(stream: &str) -> Self {
        Self {
            use_stderr: stream == "stderr",
        }
    }
}

#[async_trait]
impl Notifier for ConsoleNotifier {
    fn name(&self) -> &str {
        "console"
    }

    async fn deliver(&self, event: &ClassifiedEvent) -> Result<()> {
        let line = render_event(event);
        if self.use_stderr {
            writeln!(std::io::stderr().lock(), "{}", line)?;
        } else {
            writeln!(std::io::stdout().lock(), "{}", line)?;
        }
        Ok(())
    }
}

/// Deliver every event to every notifier. Failures are logged per sink.
pub async fn deliver_all(notifiers: &[Box<dyn Notifier>], events: &[ClassifiedEvent]) {
    for event in events {
        for notifier in notifiers {
            if let Err(e) = notifier.deliver(event).await {
                error!(
                    "Notifier '{}' failed for {}/{}: {:#}",
                    notifier.name(),
                    event.repository,
                    event.branch,
                    e
                );
            } else {
                debug!(
                    "Delivered {}/{} via '{}'",
                    event.repository,
                    event.branch,
                    notifier.name()
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classify::Identity;
    use chrono::Utc;
    use std::sync::Mutex;

    fn event(kind: EventKind, shas: &[&str]) -> ClassifiedEvent {
        ClassifiedEvent {
            repository: "origin".to_string(),
            canonical_name: "refs/heads/feature".to_string(),
            branch: "feature".to_string(),
            kind,
            shas: shas.iter().map(|s| s.to_string()).collect(),
            identity: Identity {
                name: "Grace".to_string(),
                email: "grace@acme.dev".to_string(),
            },
            time: Utc::now(),
        }
    }

    #[test]
    fn test_render_prefixes_repository_and_identity() {
        let rendered = render_event(&event(
            EventKind::BranchUpdated,
            &["deadbeefcafe", "0123456789ab"],
        ));
        assert_eq!(
            rendered,
            "origin: Grace <grace@acme.dev>: Branch 'feature' advanced by 2 commit(s) to deadbeef"
        );
    }

    #[test]
    fn test_render_deletion_mentions_no_commit() {
        let rendered = render_event(&event(EventKind::BranchDeleted, &[]));
        assert!(rendered.ends_with("Branch 'feature' was deleted"));
        assert!(!rendered.contains('?'));
    }

    #[test]
    fn test_render_force_push() {
        let rendered = render_event(&event(EventKind::BranchForceUpdated, &["abcdef012345"]));
        assert!(rendered.contains("force-pushed to abcdef01"));
    }

    struct FlakyNotifier {
        delivered: std::sync::Arc<Mutex<Vec<String>>>,
        fail: bool,
    }

    #[async_trait]
    impl Notifier for FlakyNotifier {
        fn name(&self) -> &str {
            "flaky"
        }

        async fn deliver(&self, event: &ClassifiedEvent) -> Result<()> {
            if self.fail {
                anyhow::bail!("sink unavailable");
            }
            self.delivered.lock().unwrap().push(event.branch.clone());
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_failing_sink_does_not_block_others() {
        let delivered = std::sync::Arc::new(Mutex::new(Vec::new()));
        let notifiers: Vec<Box<dyn Notifier>> = vec![
            Box::new(FlakyNotifier {
                delivered: delivered.clone(),
                fail: true,
            }),
            Box::new(FlakyNotifier {
                delivered: delivered.clone(),
                fail: false,
            }),
        ];

        let events = vec![event(EventKind::BranchCreated, &["abc123"])];
        deliver_all(&notifiers, &events).await;

        // Only the working sink recorded the event; the failing one was
        // logged and skipped without aborting delivery.
        assert_eq!(*delivered.lock().unwrap(), vec!["feature"]);
    }
}
