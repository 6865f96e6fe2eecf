//! Event Classifier
//!
//! Refines raw branch deltas into terminal, human-meaningful events.
//! Classification runs in two phases around the bookmark fetch: the
//! immediate rules (deletions and tips already resident locally) need no
//! ancestry walk, while everything else is deferred until the new commits
//! have been fetched and can be compared against the previous tip.
//!
//! The classifier is a one-shot machine: deltas are consumed and either a
//! terminal [`ClassifiedEvent`] or a [`DeferredDelta`] comes back, and a
//! deferred delta can only be consumed once by [`resolve_deferred`]. There
//! is no "already analyzed" flag to get wrong.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::snapshot::{short_ref_name, BranchDelta, DeltaKind};

/// Terminal event kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum EventKind {
    BranchCreated,
    BranchCreatedFromKnownCommit,
    BranchUpdated,
    BranchForceUpdated,
    BranchResetToKnownCommit,
    BranchDeleted,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::BranchCreated => "branch_created",
            EventKind::BranchCreatedFromKnownCommit => "branch_created_from_known_commit",
            EventKind::BranchUpdated => "branch_updated",
            EventKind::BranchForceUpdated => "branch_force_updated",
            EventKind::BranchResetToKnownCommit => "branch_reset_to_known_commit",
            EventKind::BranchDeleted => "branch_deleted",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "branch_created" => Some(EventKind::BranchCreated),
            "branch_created_from_known_commit" => Some(EventKind::BranchCreatedFromKnownCommit),
            "branch_updated" => Some(EventKind::BranchUpdated),
            "branch_force_updated" => Some(EventKind::BranchForceUpdated),
            "branch_reset_to_known_commit" => Some(EventKind::BranchResetToKnownCommit),
            "branch_deleted" => Some(EventKind::BranchDeleted),
            _ => None,
        }
    }
}

/// Who an event is attributed to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Identity {
    pub name: String,
    pub email: String,
}

impl Identity {
    /// Sentinel for events with no attributable author (deletions, tips
    /// that moved to commits whose introducer predates discovery).
    pub fn unknown() -> Self {
        Self {
            name: "Unknown".to_string(),
            email: "unknown@invalid".to_string(),
        }
    }

    pub fn is_unknown(&self) -> bool {
        self.name == "Unknown" && self.email == "unknown@invalid"
    }
}

/// Committer metadata for a single commit.
#[derive(Debug, Clone)]
pub struct CommitMeta {
    pub author: Identity,
    pub time: DateTime<Utc>,
}

/// A fully classified, immutable branch event.
#[derive(Debug, Clone, Serialize)]
pub struct ClassifiedEvent {
    /// Friendly name of the monitored repository
    pub repository: String,
    pub canonical_name: String,
    /// Branch short name ("refs/heads/main" → "main")
    pub branch: String,
    pub kind: EventKind,
    /// Introduced commits, newest first; empty only for deletions
    pub shas: Vec<String>,
    pub identity: Identity,
    pub time: DateTime<Utc>,
}

impl ClassifiedEvent {
    fn new(repository: &str, delta: &BranchDelta, kind: EventKind, shas: Vec<String>) -> Self {
        Self {
            repository: repository.to_string(),
            canonical_name: delta.canonical_name.clone(),
            branch: short_ref_name(&delta.canonical_name).to_string(),
            kind,
            shas,
            identity: Identity::unknown(),
            time: Utc::now(),
        }
    }

    /// Tip the event points at, if any.
    pub fn tip(&self) -> Option<&str> {
        self.shas.first().map(String::as_str)
    }
}

/// Ancestry queries needed for classification, kept behind a trait so the
/// classifier can be exercised against an in-memory commit graph.
#[async_trait]
pub trait Ancestry: Send + Sync {
    /// Whether the commit object is resident in the local repository.
    async fn is_known(&self, sha: &str) -> Result<bool>;

    /// Nearest common ancestor of `a` and `b`, if any.
    async fn merge_base(&self, a: &str, b: &str) -> Result<Option<String>>;

    /// Commits reachable from `tip` but not from `base` (`base..tip`),
    /// newest first.
    async fn range_newest_first(&self, base: &str, tip: &str) -> Result<Vec<String>>;

    /// Commits reachable from `tip` but from no ref outside `ignore_glob`
    /// and from no tip in `observed`, newest first. Best-effort base
    /// synthesis for branches that appeared without a prior tip.
    /// `ignore_glob` names the bookmark namespace this cycle just (re)wrote
    /// so its own fetch does not mask novelty; `observed` carries the
    /// previous snapshot's tips so history whose bookmark was dropped by an
    /// earlier replace is not announced a second time.
    async fn novel_commits(
        &self,
        tip: &str,
        ignore_glob: &str,
        observed: &[String],
    ) -> Result<Vec<String>>;

    /// Committer name, email and time of one commit.
    async fn commit_meta(&self, sha: &str) -> Result<CommitMeta>;
}

/// A delta whose classification had to wait for the bookmark fetch.
/// Only [`resolve_deferred`] can consume one.
#[derive(Debug)]
pub struct DeferredDelta {
    delta: BranchDelta,
}

impl DeferredDelta {
    pub fn canonical_name(&self) -> &str {
        &self.delta.canonical_name
    }

    /// Tip that must be made locally resident before resolution.
    pub fn fetch_tip(&self) -> &str {
        self.delta
            .new_sha
            .as_deref()
            .unwrap_or(&self.delta.canonical_name)
    }
}

/// Outcome of the immediate classification phase for one repository.
pub struct Classification {
    pub events: Vec<ClassifiedEvent>,
    pub deferred: Vec<DeferredDelta>,
}

/// Phase one: apply the rules that need no ancestry walk beyond a local
/// object lookup. Consumes the deltas; each one ends up exactly once in
/// either `events` or `deferred`.
pub async fn classify_deltas(
    repository: &str,
    deltas: Vec<BranchDelta>,
    ancestry: &dyn Ancestry,
) -> Result<Classification> {
    let mut events = Vec::new();
    let mut deferred = Vec::new();

    for delta in deltas {
        match delta.kind {
            DeltaKind::Deleted => {
                events.push(ClassifiedEvent::new(
                    repository,
                    &delta,
                    EventKind::BranchDeleted,
                    Vec::new(),
                ));
            }
            DeltaKind::Created | DeltaKind::Updated => {
                let new_sha = delta
                    .new_sha
                    .clone()
                    .context("created/updated delta without a new tip")?;

                if ancestry.is_known(&new_sha).await? {
                    // The tip is already resident: nothing new was
                    // introduced, and the real introducer predates
                    // discovery, so attribution stays unknown.
                    let kind = match delta.kind {
                        DeltaKind::Created => EventKind::BranchCreatedFromKnownCommit,
                        _ => EventKind::BranchResetToKnownCommit,
                    };
                    events.push(ClassifiedEvent::new(repository, &delta, kind, vec![new_sha]));
                } else {
                    deferred.push(DeferredDelta { delta });
                }
            }
        }
    }

    Ok(Classification { events, deferred })
}

/// Phase two: resolve deferred deltas once their tips are locally
/// resident. Batched per repository to amortize the ancestry walks.
///
/// Force-push law: for old tip O and new tip N, the event is ForceUpdated
/// iff `merge_base(O, N)` is absent or differs from O. A branch that never
/// had a tip synthesizes its base from the nearest already-known ancestor;
/// that base is an ancestor of the tip by construction, so root creations
/// always finalize as BranchCreated.
pub async fn resolve_deferred(
    repository: &str,
    deferred: Vec<DeferredDelta>,
    ancestry: &dyn Ancestry,
    bookmark_glob: &str,
    observed_tips: &[String],
) -> Result<Vec<ClassifiedEvent>> {
    let mut events = Vec::new();

    for DeferredDelta { delta } in deferred {
        let new_sha = delta
            .new_sha
            .clone()
            .context("deferred delta without a new tip")?;

        let (kind, shas) = match &delta.old_sha {
            Some(old_sha) => {
                if !ancestry.is_known(old_sha).await? {
                    // The previously observed tip is gone from local
                    // storage (pruned between cycles). Treat the move as
                    // non-fast-forward and fall back to the novelty walk.
                    let shas = ancestry
                        .novel_commits(&new_sha, bookmark_glob, observed_tips)
                        .await?;
                    (EventKind::BranchForceUpdated, shas)
                } else {
                    let merge_base = ancestry.merge_base(old_sha, &new_sha).await?;
                    let fast_forward = merge_base.as_deref() == Some(old_sha.as_str());
                    let shas = ancestry.range_newest_first(old_sha, &new_sha).await?;

                    let kind = if fast_forward {
                        EventKind::BranchUpdated
                    } else {
                        EventKind::BranchForceUpdated
                    };
                    (kind, shas)
                }
            }
            None => {
                let shas = ancestry
                    .novel_commits(&new_sha, bookmark_glob, observed_tips)
                    .await?;
                (EventKind::BranchCreated, shas)
            }
        };

        // An unknown tip must introduce at least itself; an empty walk
        // means knownness shifted mid-cycle, so fall back to the tip.
        let shas = if shas.is_empty() { vec![new_sha] } else { shas };

        let newest = &shas[0];
        let meta = ancestry
            .commit_meta(newest)
            .await
            .with_context(|| format!("ancestry inconsistency: no metadata for commit {}", newest))?;

        let mut event = ClassifiedEvent::new(repository, &delta, kind, shas);
        // Multi-author pushes report only the newest commit's committer.
        event.identity = meta.author;
        event.time = meta.time;
        events.push(event);
    }

    Ok(events)
}
