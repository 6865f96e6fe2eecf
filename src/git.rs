//! Git operations against the shared local repository.
//!
//! Everything funnels through one local repository: remote ref listings,
//! fetches into the bookmark namespace, ref removal, and the ancestry
//! walks the classifier needs. Ref mutations and ancestry queries share a
//! single handle, so they are serialized behind one mutex even though the
//! per-repository pipelines above are otherwise independent.

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use chrono::DateTime;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tokio::process::Command as AsyncCommand;
use tokio::sync::Mutex;
use tracing::debug;

use crate::classify::{Ancestry, CommitMeta, Identity};

/// Remote listing, fetching and ref removal against the local repository.
#[async_trait]
pub trait RemoteTransport: Send + Sync {
    /// Remotes configured on the local repository (name, url).
    async fn known_remotes(&self) -> Result<Vec<(String, String)>>;

    /// Canonical ref name → SHA for every ref advertised by `url`.
    async fn list_remote_refs(&self, url: &str) -> Result<HashMap<String, String>>;

    /// Fetch `refspecs` from `url` in a single network call.
    async fn fetch(&self, url: &str, refspecs: &[String]) -> Result<()>;

    /// Remove every local ref matching `glob`.
    async fn remove_refs_glob(&self, glob: &str) -> Result<()>;
}

/// Combined capability surface the tracker needs from the local
/// repository: transport plus ancestry.
pub trait GitBackend: RemoteTransport + Ancestry {}

impl<T: RemoteTransport + Ancestry> GitBackend for T {}

/// Git CLI client bound to one local repository.
pub struct GitClient {
    repo_path: PathBuf,
    // Serializes ref writes and object walks against the one repository
    handle: Mutex<()>,
}

impl GitClient {
    pub fn new(repo_path: impl Into<PathBuf>) -> Self {
        Self {
            repo_path: repo_path.into(),
            handle: Mutex::new(()),
        }
    }

    pub fn repo_path(&self) -> &Path {
        &self.repo_path
    }

    /// Run git with `args`, returning stdout on success.
    async fn git(&self, args: &[&str]) -> Result<String> {
        let output = AsyncCommand::new("git")
            .arg("-C")
            .arg(&self.repo_path)
            .args(args)
            .output()
            .await
            .with_context(|| format!("Failed to execute git {}", args.join(" ")))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(anyhow!(
                "git {} failed: {}",
                args.join(" "),
                stderr.trim()
            ));
        }

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    /// Run git with `args`, reporting only whether it succeeded.
    async fn git_status(&self, args: &[&str]) -> Result<bool> {
        let output = AsyncCommand::new("git")
            .arg("-C")
            .arg(&self.repo_path)
            .args(args)
            .output()
            .await
            .with_context(|| format!("Failed to execute git {}", args.join(" ")))?;

        Ok(output.status.success())
    }
}

#[async_trait]
impl RemoteTransport for GitClient {
    async fn known_remotes(&self) -> Result<Vec<(String, String)>> {
        let _guard = self.handle.lock().await;

        let names = self.git(&["remote"]).await?;
        let mut remotes = Vec::new();

        for name in names.lines().map(str::trim).filter(|l| !l.is_empty()) {
            let url = self.git(&["remote", "get-url", name]).await?;
            remotes.push((name.to_string(), url.trim().to_string()));
        }

        Ok(remotes)
    }

    async fn list_remote_refs(&self, url: &str) -> Result<HashMap<String, String>> {
        // Listing does not touch local refs; no handle guard needed.
        debug!("Listing remote refs for {}", url);
        let stdout = self.git(&["ls-remote", "--quiet", url]).await?;
        Ok(parse_ls_remote(&stdout))
    }

    async fn fetch(&self, url: &str, refspecs: &[String]) -> Result<()> {
        if refspecs.is_empty() {
            return Ok(());
        }

        let _guard = self.handle.lock().await;

        debug!("Fetching {} refspec(s) from {}", refspecs.len(), url);
        let mut args = vec!["fetch", "--no-tags", "--quiet", url];
        args.extend(refspecs.iter().map(String::as_str));
        self.git(&args).await?;

        Ok(())
    }

    async fn remove_refs_glob(&self, glob: &str) -> Result<()> {
        let _guard = self.handle.lock().await;

        let stdout = self
            .git(&["for-each-ref", "--format=%(refname)", glob])
            .await?;

        for refname in stdout.lines().map(str::trim).filter(|l| !l.is_empty()) {
            self.git(&["update-ref", "-d", refname]).await?;
        }

        Ok(())
    }
}

#[async_trait]
impl Ancestry for GitClient {
    async fn is_known(&self, sha: &str) -> Result<bool> {
        let _guard = self.handle.lock().await;
        let spec = format!("{}^{{commit}}", sha);
        self.git_status(&["cat-file", "-e", &spec]).await
    }

    async fn merge_base(&self, a: &str, b: &str) -> Result<Option<String>> {
        let _guard = self.handle.lock().await;

        let output = AsyncCommand::new("git")
            .arg("-C")
            .arg(&self.repo_path)
            .args(["merge-base", a, b])
            .output()
            .await
            .context("Failed to execute git merge-base")?;

        // Exit code 1 means the commits share no history
        match output.status.code() {
            Some(0) => Ok(Some(
                String::from_utf8_lossy(&output.stdout).trim().to_string(),
            )),
            Some(1) => Ok(None),
            _ => Err(anyhow!(
                "git merge-base {} {} failed: {}",
                a,
                b,
                String::from_utf8_lossy(&output.stderr).trim()
            )),
        }
    }

    async fn range_newest_first(&self, base: &str, tip: &str) -> Result<Vec<String>> {
        let _guard = self.handle.lock().await;

        let range = format!("{}..{}", base, tip);
        let stdout = self.git(&["rev-list", &range]).await?;
        Ok(parse_sha_lines(&stdout))
    }

    async fn novel_commits(
        &self,
        tip: &str,
        ignore_glob: &str,
        observed: &[String],
    ) -> Result<Vec<String>> {
        let _guard = self.handle.lock().await;

        // Commits reachable from the tip but from no ref outside the
        // cycle's own bookmark namespace and from no previously observed
        // tip. The exclude keeps this cycle's fresh bookmarks from masking
        // what is actually new; the observed tips bound the walk because
        // the namespace replace leaves earlier fetches unreachable from
        // any ref. Observed tips may never have been fetched at all,
        // hence --ignore-missing.
        let exclude = format!("--exclude={}", ignore_glob);
        let mut args = vec!["rev-list", tip, "--ignore-missing", "--not"];
        args.extend(observed.iter().map(String::as_str));
        args.push(&exclude);
        args.push("--all");
        let stdout = self.git(&args).await?;
        Ok(parse_sha_lines(&stdout))
    }

    async fn commit_meta(&self, sha: &str) -> Result<CommitMeta> {
        let _guard = self.handle.lock().await;

        let stdout = self
            .git(&["show", "-s", "--format=%cn%n%ce%n%ct", sha])
            .await?;
        parse_commit_meta(&stdout).with_context(|| format!("Unparsable metadata for {}", sha))
    }
}

/// Parse `git ls-remote` output into a ref→SHA map, skipping peeled
/// tag entries (`refs/tags/v1^{}`).
fn parse_ls_remote(stdout: &str) -> HashMap<String, String> {
    stdout
        .lines()
        .filter_map(|line| {
            let (sha, name) = line.split_once('\t')?;
            let name = name.trim();
            if name.is_empty() || name.ends_with("^{}") {
                return None;
            }
            Some((name.to_string(), sha.trim().to_string()))
        })
        .collect()
}

fn parse_sha_lines(stdout: &str) -> Vec<String> {
    stdout
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .map(str::to_string)
        .collect()
}

/// Parse `%cn%n%ce%n%ct` formatted commit metadata.
fn parse_commit_meta(stdout: &str) -> Result<CommitMeta> {
    let mut lines = stdout.lines();
    let name = lines.next().context("missing committer name")?.trim();
    let email = lines.next().context("missing committer email")?.trim();
    let epoch: i64 = lines
        .next()
        .context("missing commit time")?
        .trim()
        .parse()
        .context("invalid commit timestamp")?;

    let time = DateTime::from_timestamp(epoch, 0).context("commit timestamp out of range")?;

    Ok(CommitMeta {
        author: Identity {
            name: name.to_string(),
            email: email.to_string(),
        },
        time,
    })
}
