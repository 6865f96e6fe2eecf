//! Bookmark synchronization
//!
//! Tracking refs under `<namespace>/<friendlyName>/<heads|tags>/<name>`
//! pull the commits behind newly observed tips into local storage, so a
//! commit that is unknown this cycle becomes known in later cycles purely
//! through the fetch. The namespace is fully replaced each cycle rather
//! than pruned incrementally.

use anyhow::{Context, Result};
use tracing::{debug, info};

use crate::git::RemoteTransport;

/// Glob covering one repository's bookmark namespace.
pub fn bookmark_glob(namespace: &str, friendly_name: &str) -> String {
    format!("{}/{}/*", namespace, friendly_name)
}

/// Bookmark path for a canonical ref. The `heads/` or `tags/` segment is
/// kept so a branch and a tag sharing a short name land on distinct
/// bookmarks instead of colliding inside one fetch.
fn bookmark_target(canonical_name: &str) -> &str {
    canonical_name.strip_prefix("refs/").unwrap_or(canonical_name)
}

/// Forced fetch refspec mapping a remote ref onto its bookmark.
/// The force marker is required because the namespace was just cleared
/// and the remote may have rewritten history.
pub fn bookmark_refspec(namespace: &str, friendly_name: &str, canonical_name: &str) -> String {
    format!(
        "+{}:{}/{}/{}",
        canonical_name,
        namespace,
        friendly_name,
        bookmark_target(canonical_name)
    )
}

/// Replace a repository's bookmark namespace and fetch the given refs.
///
/// Deleted branches need only the removal, which happens regardless; the
/// fetch is one batched call covering every surviving ref.
pub async fn synchronize_bookmarks(
    transport: &dyn RemoteTransport,
    url: &str,
    friendly_name: &str,
    namespace: &str,
    canonical_names: &[String],
) -> Result<()> {
    transport
        .remove_refs_glob(&bookmark_glob(namespace, friendly_name))
        .await
        .with_context(|| format!("Failed to clear bookmarks for {}", friendly_name))?;

    if canonical_names.is_empty() {
        debug!("No refs to bookmark for {}", friendly_name);
        return Ok(());
    }

    let refspecs: Vec<String> = canonical_names
        .iter()
        .map(|canonical| bookmark_refspec(namespace, friendly_name, canonical))
        .collect();

    info!(
        "Retrieving commits for {} ref(s) from '{}'",
        refspecs.len(),
        friendly_name
    );

    transport
        .fetch(url, &refspecs)
        .await
        .with_context(|| format!("Failed to fetch bookmarks for {}", friendly_name))
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingTransport {
        removed_globs: Mutex<Vec<String>>,
        fetches: Mutex<Vec<(String, Vec<String>)>>,
    }

    #[async_trait]
    impl RemoteTransport for RecordingTransport {
        async fn known_remotes(&self) -> anyhow::Result<Vec<(String, String)>> {
            Ok(Vec::new())
        }

        async fn list_remote_refs(&self, _url: &str) -> anyhow::Result<HashMap<String, String>> {
            Ok(HashMap::new())
        }

        async fn fetch(&self, url: &str, refspecs: &[String]) -> anyhow::Result<()> {
            self.fetches
                .lock()
                .unwrap()
                .push((url.to_string(), refspecs.to_vec()));
            Ok(())
        }

        async fn remove_refs_glob(&self, glob: &str) -> anyhow::Result<()> {
            self.removed_globs.lock().unwrap().push(glob.to_string());
            Ok(())
        }
    }

    #[test]
    fn test_refspec_and_glob_shapes() {
        assert_eq!(
            bookmark_glob("refs/branchwatch", "acme"),
            "refs/branchwatch/acme/*"
        );
        assert_eq!(
            bookmark_refspec("refs/branchwatch", "acme", "refs/heads/feature/x"),
            "+refs/heads/feature/x:refs/branchwatch/acme/heads/feature/x"
        );
    }

    #[test]
    fn test_branch_and_tag_sharing_a_short_name_get_distinct_bookmarks() {
        let branch = bookmark_refspec("refs/branchwatch", "acme", "refs/heads/v1");
        let tag = bookmark_refspec("refs/branchwatch", "acme", "refs/tags/v1");

        assert_eq!(branch, "+refs/heads/v1:refs/branchwatch/acme/heads/v1");
        assert_eq!(tag, "+refs/tags/v1:refs/branchwatch/acme/tags/v1");
        assert_ne!(branch.split(':').nth(1), tag.split(':').nth(1));
    }

    #[tokio::test]
    async fn test_full_replace_then_single_batched_fetch() {
        let transport = RecordingTransport::default();

        synchronize_bookmarks(
            &transport,
            "https://github.com/acme/widget",
            "acme",
            "refs/branchwatch",
            &[
                "refs/heads/main".to_string(),
                "refs/heads/feature".to_string(),
            ],
        )
        .await
        .unwrap();

        let removed = transport.removed_globs.lock().unwrap();
        assert_eq!(removed.as_slice(), ["refs/branchwatch/acme/*"]);

        let fetches = transport.fetches.lock().unwrap();
        assert_eq!(fetches.len(), 1);
        assert_eq!(fetches[0].0, "https://github.com/acme/widget");
        assert_eq!(
            fetches[0].1,
            vec![
                "+refs/heads/main:refs/branchwatch/acme/heads/main",
                "+refs/heads/feature:refs/branchwatch/acme/heads/feature",
            ]
        );
    }

    #[tokio::test]
    async fn test_deletions_only_clear_the_namespace() {
        let transport = RecordingTransport::default();

        synchronize_bookmarks(
            &transport,
            "https://github.com/acme/widget",
            "acme",
            "refs/branchwatch",
            &[],
        )
        .await
        .unwrap();

        assert_eq!(transport.removed_globs.lock().unwrap().len(), 1);
        assert!(transport.fetches.lock().unwrap().is_empty());
    }
}
