//! Remote tracking engine
//!
//! Resolves the monitored repository set and drives one poll cycle:
//! snapshot → diff → classify → bookmark-sync → resolve, one independent
//! task per repository, all tasks joined before events are handed to the
//! notification layer. A failure in one repository's pipeline never
//! aborts the others.

use anyhow::{Context, Result};
use futures::stream::{FuturesUnordered, StreamExt};
use regex::Regex;
use std::collections::HashSet;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

use crate::bookmarks::{bookmark_glob, synchronize_bookmarks};
use crate::classify::{classify_deltas, resolve_deferred, ClassifiedEvent, EventKind};
use crate::config::Config;
use crate::git::GitBackend;
use crate::snapshot::{filter_tracked_refs, BranchDelta, SnapshotStore};

/// Where a monitored repository came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RepositoryOrigin {
    Remote,
    Fork,
    Unknown,
}

impl RepositoryOrigin {
    pub fn as_str(&self) -> &'static str {
        match self {
            RepositoryOrigin::Remote => "remote",
            RepositoryOrigin::Fork => "fork",
            RepositoryOrigin::Unknown => "unknown",
        }
    }
}

/// A repository under observation. Identity is the canonical URL alone;
/// friendly name and origin are display attributes.
#[derive(Debug, Clone)]
pub struct MonitoredRepository {
    pub url: String,
    pub friendly_name: String,
    pub origin: RepositoryOrigin,
}

impl MonitoredRepository {
    pub fn new(
        url: impl Into<String>,
        friendly_name: impl Into<String>,
        origin: RepositoryOrigin,
    ) -> Self {
        Self {
            url: url.into(),
            friendly_name: friendly_name.into(),
            origin,
        }
    }
}

impl PartialEq for MonitoredRepository {
    fn eq(&self, other: &Self) -> bool {
        self.url == other.url
    }
}

impl Eq for MonitoredRepository {}

impl Hash for MonitoredRepository {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.url.hash(state);
    }
}

/// Snooze entries: literal URLs or regular expressions. A pattern that
/// fails to compile is logged and skipped rather than failing the cycle.
#[derive(Debug, Default)]
pub struct SnoozeList {
    literals: HashSet<String>,
    patterns: Vec<Regex>,
}

impl SnoozeList {
    pub fn from_entries(entries: &[String]) -> Self {
        let mut literals = HashSet::new();
        let mut patterns = Vec::new();

        for entry in entries {
            literals.insert(entry.clone());
            match Regex::new(entry) {
                Ok(re) => patterns.push(re),
                Err(e) => warn!("Ignoring unparsable snooze pattern '{}': {}", entry, e),
            }
        }

        Self { literals, patterns }
    }

    pub fn matches(&self, url: &str) -> bool {
        self.literals.contains(url) || self.patterns.iter().any(|re| re.is_match(url))
    }
}

/// Compute the monitored set: known remotes, plus forks not already
/// known, minus snoozed entries; deduplicated by URL.
pub fn resolve_monitored(
    known: Vec<MonitoredRepository>,
    forks: Vec<MonitoredRepository>,
    snoozed: &SnoozeList,
) -> Vec<MonitoredRepository> {
    let mut seen: HashSet<String> = HashSet::new();
    let mut monitored = Vec::new();

    for repo in known.into_iter().chain(forks) {
        if snoozed.matches(&repo.url) {
            debug!("Snoozed: {}", repo.url);
            continue;
        }
        if seen.insert(repo.url.clone()) {
            monitored.push(repo);
        }
    }

    monitored
}

/// Results of one complete poll cycle.
#[derive(Debug)]
pub struct CycleSummary {
    pub repositories: usize,
    pub failed_repositories: usize,
    pub events: Vec<ClassifiedEvent>,
    pub duration: Duration,
}

/// The tracking engine. One instance owns the snapshot store; poll
/// cycles must not overlap (the daemon loop awaits each cycle before
/// scheduling the next), which is what guarantees the store's
/// single-writer-per-repository contract.
pub struct Tracker {
    config: Arc<Config>,
    git: Arc<dyn GitBackend>,
    store: Arc<SnapshotStore>,
    snoozed: SnoozeList,
}

impl Tracker {
    pub fn new(config: Arc<Config>, git: Arc<dyn GitBackend>) -> Self {
        let snoozed = SnoozeList::from_entries(&config.snoozed);
        Self {
            config,
            git,
            store: Arc::new(SnapshotStore::new()),
            snoozed,
        }
    }

    /// Resolve the monitored repository set. Provider failures are
    /// logged; a failing provider contributes nothing for this cycle.
    pub async fn monitored_repositories(&self) -> Vec<MonitoredRepository> {
        let known = match self.git.known_remotes().await {
            Ok(remotes) => remotes
                .into_iter()
                .map(|(name, url)| MonitoredRepository::new(url, name, RepositoryOrigin::Remote))
                .collect(),
            Err(e) => {
                warn!("Could not list known remotes: {:#}", e);
                Vec::new()
            }
        };

        let forks = self
            .config
            .forks
            .iter()
            .map(|f| MonitoredRepository::new(&f.url, &f.name, RepositoryOrigin::Fork))
            .collect();

        resolve_monitored(known, forks, &self.snoozed)
    }

    /// Run one poll cycle over every monitored repository.
    ///
    /// All per-repository tasks complete before events are concatenated;
    /// the returned event list is what gets handed to the notifiers.
    pub async fn run_cycle(&self) -> Result<CycleSummary> {
        let start = Instant::now();
        let repositories = self.monitored_repositories().await;

        info!("Probing {} monitored repositories", repositories.len());

        let semaphore = Arc::new(tokio::sync::Semaphore::new(self.config.poll.max_parallel));
        let mut futures = FuturesUnordered::new();

        for repo in &repositories {
            let semaphore = semaphore.clone();
            let repo = repo.clone();

            futures.push(async move {
                let _permit = semaphore.acquire().await.expect("Semaphore closed");
                let result = self.probe_repository(&repo).await;
                (repo, result)
            });
        }

        let mut events = Vec::new();
        let mut failed_repositories = 0;

        while let Some((repo, result)) = futures.next().await {
            match result {
                Ok(repo_events) => {
                    debug!(
                        "Probe of '{}' produced {} event(s)",
                        repo.friendly_name,
                        repo_events.len()
                    );
                    events.extend(repo_events);
                }
                Err(e) => {
                    // This repository's events are dropped for the cycle;
                    // the others continue unaffected.
                    error!("Probe of '{}' failed: {:#}", repo.friendly_name, e);
                    failed_repositories += 1;
                }
            }
        }

        events.sort_by(|a, b| {
            (a.repository.as_str(), a.canonical_name.as_str())
                .cmp(&(b.repository.as_str(), b.canonical_name.as_str()))
        });

        let summary = CycleSummary {
            repositories: repositories.len(),
            failed_repositories,
            events,
            duration: start.elapsed(),
        };

        info!(
            "Cycle complete in {:.2}s: {} repositories, {} events, {} failed",
            summary.duration.as_secs_f64(),
            summary.repositories,
            summary.events.len(),
            summary.failed_repositories
        );

        Ok(summary)
    }

    /// Probe one repository: snapshot its remote tips, diff against the
    /// stored baseline, classify, synchronize bookmarks, resolve.
    async fn probe_repository(
        &self,
        repo: &MonitoredRepository,
    ) -> Result<Vec<ClassifiedEvent>> {
        let namespace = &self.config.poll.bookmark_namespace;

        debug!("Retrieving remote tips from '{}'", repo.friendly_name);
        let tips = self
            .git
            .list_remote_refs(&repo.url)
            .await
            .with_context(|| format!("Failed to list refs of {}", repo.url))?;

        let tips = filter_tracked_refs(tips, self.config.poll.include_tags);

        // Kept so a fetch failure can roll the baseline back and the next
        // cycle retries from the same snapshot. Its tips also bound the
        // novelty walks, since the bookmark replace can strand history
        // from earlier cycles without a covering ref.
        let previous = self.store.current(&repo.url);
        let first_observation = previous.is_none();

        let mut observed_tips: Vec<String> = previous
            .as_ref()
            .map(|snapshot| snapshot.values().cloned().collect())
            .unwrap_or_default();
        observed_tips.sort();
        observed_tips.dedup();

        let deltas = self.store.diff(&repo.url, tips);

        if first_observation {
            debug!("Established baseline for '{}'", repo.friendly_name);
            return Ok(Vec::new());
        }

        if deltas.is_empty() {
            return Ok(Vec::new());
        }

        // Any failure past the diff rolls the snapshot back so the next
        // cycle observes the same change again instead of losing it.
        match self
            .classify_and_sync(repo, namespace, deltas, &observed_tips)
            .await
        {
            Ok(events) => Ok(events),
            Err(e) => {
                self.store.restore(&repo.url, previous);
                Err(e)
            }
        }
    }

    async fn classify_and_sync(
        &self,
        repo: &MonitoredRepository,
        namespace: &str,
        deltas: Vec<BranchDelta>,
        observed_tips: &[String],
    ) -> Result<Vec<ClassifiedEvent>> {
        let classification =
            classify_deltas(&repo.friendly_name, deltas, self.git.as_ref()).await?;

        // Every surviving ref gets a bookmark: already-terminal events
        // plus the deferred ones whose commits the fetch must bring in.
        let mut to_bookmark: Vec<String> = classification
            .events
            .iter()
            .filter(|e| e.kind != EventKind::BranchDeleted)
            .map(|e| e.canonical_name.clone())
            .collect();
        to_bookmark.extend(
            classification
                .deferred
                .iter()
                .map(|d| d.canonical_name().to_string()),
        );

        synchronize_bookmarks(
            self.git.as_ref(),
            &repo.url,
            &repo.friendly_name,
            namespace,
            &to_bookmark,
        )
        .await?;

        let glob = bookmark_glob(namespace, &repo.friendly_name);
        let mut events = classification.events;
        events.extend(
            resolve_deferred(
                &repo.friendly_name,
                classification.deferred,
                self.git.as_ref(),
                &glob,
                observed_tips,
            )
            .await?,
        );

        events.sort_by(|a, b| a.canonical_name.cmp(&b.canonical_name));
        Ok(events)
    }

    pub fn config(&self) -> &Config {
        &self.config
    }
}
