//! Snapshot Store and Diff Engine
//!
//! Holds the most recently observed ref→SHA mapping per monitored
//! repository and turns two successive observations into raw per-ref
//! deltas. The first observation of a repository only establishes a
//! baseline and never produces deltas.

use std::collections::HashMap;
use std::sync::Mutex;

/// Ref→SHA mapping for one repository, captured atomically per poll.
pub type RefSnapshot = HashMap<String, String>;

/// Raw kind of a per-ref delta, before classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeltaKind {
    Created,
    Updated,
    Deleted,
}

impl DeltaKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeltaKind::Created => "created",
            DeltaKind::Updated => "updated",
            DeltaKind::Deleted => "deleted",
        }
    }
}

/// One ref's observed change between two snapshots.
///
/// `old_sha` is absent exactly for Created deltas, `new_sha` exactly for
/// Deleted ones; the constructors below are the only way to build one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BranchDelta {
    pub canonical_name: String,
    pub old_sha: Option<String>,
    pub new_sha: Option<String>,
    pub kind: DeltaKind,
}

impl BranchDelta {
    pub fn created(canonical_name: impl Into<String>, new_sha: impl Into<String>) -> Self {
        Self {
            canonical_name: canonical_name.into(),
            old_sha: None,
            new_sha: Some(new_sha.into()),
            kind: DeltaKind::Created,
        }
    }

    pub fn updated(
        canonical_name: impl Into<String>,
        old_sha: impl Into<String>,
        new_sha: impl Into<String>,
    ) -> Self {
        Self {
            canonical_name: canonical_name.into(),
            old_sha: Some(old_sha.into()),
            new_sha: Some(new_sha.into()),
            kind: DeltaKind::Updated,
        }
    }

    pub fn deleted(canonical_name: impl Into<String>, old_sha: impl Into<String>) -> Self {
        Self {
            canonical_name: canonical_name.into(),
            old_sha: Some(old_sha.into()),
            new_sha: None,
            kind: DeltaKind::Deleted,
        }
    }

    /// Branch short name ("refs/heads/main" → "main").
    pub fn short_name(&self) -> &str {
        short_ref_name(&self.canonical_name)
    }
}

/// Strip the well-known ref namespaces from a canonical name.
pub fn short_ref_name(canonical: &str) -> &str {
    canonical
        .strip_prefix("refs/heads/")
        .or_else(|| canonical.strip_prefix("refs/tags/"))
        .unwrap_or(canonical)
}

/// Keep only refs that participate in diffing: branch heads, and tags
/// when the policy admits them.
pub fn filter_tracked_refs(tips: RefSnapshot, include_tags: bool) -> RefSnapshot {
    tips.into_iter()
        .filter(|(name, _)| {
            name.starts_with("refs/heads/") || (include_tags && name.starts_with("refs/tags/"))
        })
        .collect()
}

/// Per-repository snapshot store.
///
/// Concurrency contract: diffs for different repositories are independent;
/// the store does not serialize two concurrent diffs for the *same*
/// repository. The tracker guarantees a single writer per repository by
/// never having two cycles in flight for one repository.
pub struct SnapshotStore {
    snapshots: Mutex<HashMap<String, RefSnapshot>>,
}

impl SnapshotStore {
    pub fn new() -> Self {
        Self {
            snapshots: Mutex::new(HashMap::new()),
        }
    }

    /// Diff the stored snapshot for `repo_url` against `new_snapshot`,
    /// storing the new snapshot in the same operation.
    ///
    /// The first observation of a repository stores the baseline and
    /// returns no deltas; pre-existing branches must not be announced.
    pub fn diff(&self, repo_url: &str, new_snapshot: RefSnapshot) -> Vec<BranchDelta> {
        let mut snapshots = self.snapshots.lock().expect("snapshot store poisoned");

        let old_snapshot = match snapshots.insert(repo_url.to_string(), new_snapshot.clone()) {
            Some(old) => old,
            None => return Vec::new(),
        };

        let mut deltas = Vec::new();

        for (name, new_sha) in &new_snapshot {
            match old_snapshot.get(name) {
                None => deltas.push(BranchDelta::created(name, new_sha)),
                Some(old_sha) if old_sha != new_sha => {
                    deltas.push(BranchDelta::updated(name, old_sha, new_sha))
                }
                Some(_) => {}
            }
        }

        for (name, old_sha) in &old_snapshot {
            if !new_snapshot.contains_key(name) {
                deltas.push(BranchDelta::deleted(name, old_sha));
            }
        }

        // Stable ordering for delivery and tests
        deltas.sort_by(|a, b| a.canonical_name.cmp(&b.canonical_name));
        deltas
    }

    /// Whether a baseline exists for `repo_url`.
    pub fn has_baseline(&self, repo_url: &str) -> bool {
        self.snapshots
            .lock()
            .expect("snapshot store poisoned")
            .contains_key(repo_url)
    }

    /// Restore a previous snapshot after a failed cycle so the next poll
    /// retries from the same baseline.
    pub fn restore(&self, repo_url: &str, snapshot: Option<RefSnapshot>) {
        let mut snapshots = self.snapshots.lock().expect("snapshot store poisoned");
        match snapshot {
            Some(s) => {
                snapshots.insert(repo_url.to_string(), s);
            }
            None => {
                snapshots.remove(repo_url);
            }
        }
    }

    /// Current snapshot for `repo_url`, if any.
    pub fn current(&self, repo_url: &str) -> Option<RefSnapshot> {
        self.snapshots
            .lock()
            .expect("snapshot store poisoned")
            .get(repo_url)
            .cloned()
    }
}

impl Default for SnapshotStore {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use quickcheck_macros::quickcheck;

    fn snapshot(pairs: &[(&str, &str)]) -> RefSnapshot {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn first_observation_establishes_baseline_without_deltas() {
        let store = SnapshotStore::new();

        let deltas = store.diff(
            "https://github.com/acme/widget",
            snapshot(&[
                ("refs/heads/main", "aaa111"),
                ("refs/heads/dev", "bbb222"),
                ("refs/heads/feature", "ccc333"),
            ]),
        );

        assert!(deltas.is_empty());
        assert!(store.has_baseline("https://github.com/acme/widget"));
    }

    #[test]
    fn identical_snapshots_yield_no_deltas() {
        let store = SnapshotStore::new();
        let tips = snapshot(&[("refs/heads/main", "aaa111"), ("refs/heads/dev", "bbb222")]);

        store.diff("url", tips.clone());
        let deltas = store.diff("url", tips);

        assert!(deltas.is_empty());
    }

    #[test]
    fn created_updated_deleted_are_detected() {
        let store = SnapshotStore::new();

        store.diff(
            "url",
            snapshot(&[("refs/heads/main", "aaa111"), ("refs/heads/old", "bbb222")]),
        );
        let deltas = store.diff(
            "url",
            snapshot(&[
                ("refs/heads/main", "ddd444"),
                ("refs/heads/feature", "ccc333"),
            ]),
        );

        assert_eq!(deltas.len(), 3);
        assert_eq!(
            deltas[0],
            BranchDelta::created("refs/heads/feature", "ccc333")
        );
        assert_eq!(
            deltas[1],
            BranchDelta::updated("refs/heads/main", "aaa111", "ddd444")
        );
        assert_eq!(deltas[2], BranchDelta::deleted("refs/heads/old", "bbb222"));
    }

    #[test]
    fn a_ref_is_never_both_created_and_updated_in_one_cycle() {
        let store = SnapshotStore::new();

        store.diff("url", snapshot(&[("refs/heads/main", "aaa111")]));
        let deltas = store.diff(
            "url",
            snapshot(&[("refs/heads/main", "aaa111"), ("refs/heads/feature", "bbb222")]),
        );

        assert_eq!(deltas.len(), 1);
        assert_eq!(deltas[0].kind, DeltaKind::Created);
        assert_eq!(deltas[0].old_sha, None);
    }

    #[test]
    fn deleted_branch_produces_exactly_one_delta() {
        let store = SnapshotStore::new();

        store.diff(
            "url",
            snapshot(&[("refs/heads/main", "aaa111"), ("refs/heads/feature", "bbb222")]),
        );
        let deltas = store.diff("url", snapshot(&[("refs/heads/main", "aaa111")]));

        assert_eq!(deltas.len(), 1);
        assert_eq!(deltas[0].kind, DeltaKind::Deleted);
        assert_eq!(deltas[0].new_sha, None);
        assert_eq!(deltas[0].old_sha, Some("bbb222".to_string()));
    }

    #[test]
    fn repositories_are_independent() {
        let store = SnapshotStore::new();

        store.diff("url-a", snapshot(&[("refs/heads/main", "aaa111")]));
        let deltas = store.diff("url-b", snapshot(&[("refs/heads/main", "zzz999")]));

        // url-b's first observation is still a baseline
        assert!(deltas.is_empty());
    }

    #[test]
    fn restore_rolls_the_baseline_back() {
        let store = SnapshotStore::new();

        let baseline = snapshot(&[("refs/heads/main", "aaa111")]);
        store.diff("url", baseline.clone());
        store.diff("url", snapshot(&[("refs/heads/main", "bbb222")]));

        store.restore("url", Some(baseline));

        let deltas = store.diff("url", snapshot(&[("refs/heads/main", "bbb222")]));
        assert_eq!(deltas.len(), 1);
        assert_eq!(
            deltas[0],
            BranchDelta::updated("refs/heads/main", "aaa111", "bbb222")
        );
    }

    #[test]
    fn restore_none_clears_the_baseline() {
        let store = SnapshotStore::new();

        store.diff("url", snapshot(&[("refs/heads/main", "aaa111")]));
        store.restore("url", None);

        assert!(!store.has_baseline("url"));
        let deltas = store.diff("url", snapshot(&[("refs/heads/main", "bbb222")]));
        assert!(deltas.is_empty());
    }

    #[test]
    fn ref_filter_keeps_heads_and_optionally_tags() {
        let tips = snapshot(&[
            ("refs/heads/main", "aaa111"),
            ("refs/tags/v1.0", "bbb222"),
            ("refs/pull/42/head", "ccc333"),
            ("HEAD", "aaa111"),
        ]);

        let heads_only = filter_tracked_refs(tips.clone(), false);
        assert_eq!(heads_only.len(), 1);
        assert!(heads_only.contains_key("refs/heads/main"));

        let with_tags = filter_tracked_refs(tips, true);
        assert_eq!(with_tags.len(), 2);
        assert!(with_tags.contains_key("refs/tags/v1.0"));
    }

    #[test]
    fn short_names() {
        assert_eq!(short_ref_name("refs/heads/feature/x"), "feature/x");
        assert_eq!(short_ref_name("refs/tags/v1.0"), "v1.0");
        assert_eq!(short_ref_name("main"), "main");
    }

    #[quickcheck]
    fn prop_diff_against_self_is_empty(tips: Vec<(String, String)>) -> bool {
        let store = SnapshotStore::new();
        let snapshot: RefSnapshot = tips.into_iter().collect();

        store.diff("url", snapshot.clone());
        store.diff("url", snapshot).is_empty()
    }

    #[quickcheck]
    fn prop_first_probe_is_always_silent(tips: Vec<(String, String)>) -> bool {
        let store = SnapshotStore::new();
        store.diff("url", tips.into_iter().collect()).is_empty()
    }

    #[quickcheck]
    fn prop_delta_invariants_hold(
        old_tips: Vec<(String, String)>,
        new_tips: Vec<(String, String)>,
    ) -> bool {
        let store = SnapshotStore::new();
        store.diff("url", old_tips.into_iter().collect());

        store
            .diff("url", new_tips.into_iter().collect())
            .iter()
            .all(|d| match d.kind {
                DeltaKind::Created => d.old_sha.is_none() && d.new_sha.is_some(),
                DeltaKind::Updated => d.old_sha.is_some() && d.new_sha.is_some(),
                DeltaKind::Deleted => d.old_sha.is_some() && d.new_sha.is_none(),
            })
    }
}
