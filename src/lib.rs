//! branchwatch - Remote git repository branch monitor
//!
//! branchwatch watches the branches of remote repositories, detects what
//! changed between polls, and classifies each change into a branch event
//! (created, updated, force-pushed, reset, deleted) with the commits that
//! caused it and the person responsible.
//!
//! ## Core Features
//!
//! - **State Diffing**: Per-repository ref snapshots compared cycle to cycle
//! - **Event Classification**: Ancestry-based analysis separates fast-forwards
//!   from force pushes and fresh branches from resurrected ones
//! - **Bookmark Refs**: Every observed tip is fetched under a private ref
//!   namespace so history survives remote deletion
//! - **Fork Monitoring**: Configured forks are watched alongside the
//!   repository's own remotes
//! - **Configuration Management**: YAML-based configuration with XDG compliance
//!
//! ## Modules
//!
//! - [`config`]: Configuration management and parsing
//! - [`snapshot`]: Ref snapshots and the state diff
//! - [`classify`]: Event classification over commit ancestry
//! - [`git`]: Transport and ancestry backed by the git CLI
//! - [`bookmarks`]: Tracking-ref synchronization
//! - [`tracker`]: Monitored set resolution and the poll cycle
//! - [`notify`]: Event delivery sinks
//! - [`journal`]: Persistent event history
//! - [`daemon`]: Background service infrastructure

pub mod bookmarks;
pub mod classify;
pub mod config;
pub mod daemon;
pub mod git;
pub mod journal;
pub mod notify;
pub mod snapshot;
pub mod tracker;

pub use classify::{ClassifiedEvent, EventKind, Identity};
pub use config::Config;
pub use daemon::Daemon;
pub use git::GitClient;
pub use journal::Journal;
pub use snapshot::{BranchDelta, DeltaKind, SnapshotStore};
pub use tracker::{CycleSummary, MonitoredRepository, Tracker};
