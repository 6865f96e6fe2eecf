//! Event journal - SQLite-backed log of classified branch events
//!
//! Every event that survives a poll cycle is appended here so `events`
//! can show history after the fact. The journal is observational only:
//! classification never reads it, and losing it loses history, not
//! correctness.
//!
//! The database is stored in XDG_DATA_HOME/branchwatch/journal.db

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection};
use std::path::PathBuf;
use tracing::{debug, info};

use crate::classify::{ClassifiedEvent, EventKind, Identity};

/// A journalled event, as read back from storage.
#[derive(Debug, Clone)]
pub struct JournalEntry {
    pub id: i64,
    pub recorded_at: DateTime<Utc>,
    pub event: ClassifiedEvent,
    pub acknowledged: bool,
}

/// Journal database manager
pub struct Journal {
    conn: Connection,
}

impl Journal {
    /// Open or create the journal at its default location
    pub fn open() -> Result<Self> {
        Self::open_at(Self::default_path()?)
    }

    /// Open or create the journal at a specific path
    pub fn open_at(path: PathBuf) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).context("Failed to create journal directory")?;
        }

        let conn = Connection::open(&path)
            .with_context(|| format!("Failed to open journal at {}", path.display()))?;

        let journal = Self { conn };
        journal.initialize()?;

        info!("Event journal opened at {}", path.display());
        Ok(journal)
    }

    /// Open an in-memory journal (for testing)
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().context("Failed to open in-memory journal")?;
        let journal = Self { conn };
        journal.initialize()?;
        Ok(journal)
    }

    fn default_path() -> Result<PathBuf> {
        let data_dir = if let Ok(data_home) = std::env::var("XDG_DATA_HOME") {
            PathBuf::from(data_home)
        } else if let Ok(home) = std::env::var("HOME") {
            PathBuf::from(home).join(".local/share")
        } else {
            PathBuf::from("/tmp")
        };

        Ok(data_dir.join("branchwatch").join("journal.db"))
    }

    fn initialize(&self) -> Result<()> {
        self.conn
            .execute_batch(
                r#"
                CREATE TABLE IF NOT EXISTS events (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    recorded_at TEXT NOT NULL,
                    repository TEXT NOT NULL,
                    canonical_name TEXT NOT NULL,
                    branch TEXT NOT NULL,
                    kind TEXT NOT NULL,
                    shas TEXT NOT NULL,
                    identity_name TEXT NOT NULL,
                    identity_email TEXT NOT NULL,
                    event_time TEXT NOT NULL,
                    acknowledged INTEGER DEFAULT 0
                );

                CREATE INDEX IF NOT EXISTS idx_events_unack ON events(acknowledged, recorded_at);
                CREATE INDEX IF NOT EXISTS idx_events_repo ON events(repository, recorded_at);
                CREATE INDEX IF NOT EXISTS idx_events_kind ON events(kind, recorded_at);
                "#,
            )
            .context("Failed to initialize journal schema")?;

        debug!("Journal schema initialized");
        Ok(())
    }

    /// Append one event to the journal
    pub fn record(&self, event: &ClassifiedEvent) -> Result<i64> {
        let shas = serde_json::to_string(&event.shas).context("Failed to encode sha list")?;

        self.conn
            .execute(
                r#"
                INSERT INTO events (recorded_at, repository, canonical_name, branch, kind,
                                    shas, identity_name, identity_email, event_time)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
                "#,
                params![
                    Utc::now().to_rfc3339(),
                    event.repository,
                    event.canonical_name,
                    event.branch,
                    event.kind.as_str(),
                    shas,
                    event.identity.name,
                    event.identity.email,
                    event.time.to_rfc3339(),
                ],
            )
            .context("Failed to record event")?;

        let id = self.conn.last_insert_rowid();
        debug!(
            "Journalled {} for {}/{}",
            event.kind.as_str(),
            event.repository,
            event.branch
        );
        Ok(id)
    }

    /// Append every event from a completed cycle
    pub fn record_all(&self, events: &[ClassifiedEvent]) -> Result<()> {
        for event in events {
            self.record(event)?;
        }
        Ok(())
    }

    /// Recent entries, newest first, with optional kind filter
    pub fn recent(&self, kind: Option<EventKind>, limit: Option<u32>) -> Result<Vec<JournalEntry>> {
        let where_clause = if kind.is_some() {
            "WHERE kind = ?1"
        } else {
            ""
        };
        let limit_clause = limit.map(|l| format!(" LIMIT {}", l)).unwrap_or_default();

        let sql = format!(
            r#"
            SELECT id, recorded_at, repository, canonical_name, branch, kind,
                   shas, identity_name, identity_email, event_time, acknowledged
            FROM events
            {}
            ORDER BY recorded_at DESC, id DESC
            {}
            "#,
            where_clause, limit_clause
        );

        let mut stmt = self.conn.prepare(&sql)?;

        let map_row = |row: &rusqlite::Row<'_>| -> rusqlite::Result<JournalEntry> {
            // A kind this build cannot name means a corrupt or newer
            // database; surface it instead of relabeling history.
            let kind_str: String = row.get(5)?;
            let kind = EventKind::parse(&kind_str).ok_or_else(|| {
                rusqlite::Error::FromSqlConversionFailure(
                    5,
                    rusqlite::types::Type::Text,
                    format!("unrecognized event kind '{}'", kind_str).into(),
                )
            })?;

            Ok(JournalEntry {
                id: row.get(0)?,
                recorded_at: parse_time(&row.get::<_, String>(1)?),
                event: ClassifiedEvent {
                    repository: row.get(2)?,
                    canonical_name: row.get(3)?,
                    branch: row.get(4)?,
                    kind,
                    shas: serde_json::from_str(&row.get::<_, String>(6)?).unwrap_or_default(),
                    identity: Identity {
                        name: row.get(7)?,
                        email: row.get(8)?,
                    },
                    time: parse_time(&row.get::<_, String>(9)?),
                },
                acknowledged: row.get::<_, i32>(10)? != 0,
            })
        };

        let entries = match kind {
            Some(k) => stmt
                .query_map(params![k.as_str()], map_row)
                .context("Failed to query journal")?
                .collect::<Result<Vec<_>, _>>(),
            None => stmt
                .query_map([], map_row)
                .context("Failed to query journal")?
                .collect::<Result<Vec<_>, _>>(),
        }
        .context("Failed to collect journal entries")?;

        Ok(entries)
    }

    /// Entries for a single repository, newest first
    pub fn for_repository(&self, repository: &str, limit: Option<u32>) -> Result<Vec<JournalEntry>> {
        let mut entries = self.recent(None, None)?;
        entries.retain(|e| e.event.repository == repository);
        if let Some(limit) = limit {
            entries.truncate(limit as usize);
        }
        Ok(entries)
    }

    /// Mark every unacknowledged entry as seen
    pub fn acknowledge_all(&self) -> Result<u64> {
        let count = self
            .conn
            .execute(
                "UPDATE events SET acknowledged = 1 WHERE acknowledged = 0",
                [],
            )
            .context("Failed to acknowledge events")?;
        Ok(count as u64)
    }

    /// Delete acknowledged entries older than the given number of days
    pub fn cleanup(&self, days: u32) -> Result<u64> {
        let cutoff = Utc::now() - chrono::Duration::days(days as i64);
        let count = self
            .conn
            .execute(
                "DELETE FROM events WHERE recorded_at < ?1 AND acknowledged = 1",
                params![cutoff.to_rfc3339()],
            )
            .context("Failed to clean up journal")?;
        Ok(count as u64)
    }
}

fn parse_time(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_event(branch: &str, kind: EventKind) -> ClassifiedEvent {
        ClassifiedEvent {
            repository: "origin".to_string(),
            canonical_name: format!("refs/heads/{}", branch),
            branch: branch.to_string(),
            kind,
            shas: vec!["abc123".to_string(), "def456".to_string()],
            identity: Identity {
                name: "Grace".to_string(),
                email: "grace@acme.dev".to_string(),
            },
            time: Utc::now(),
        }
    }

    #[test]
    fn test_journal_initialization() {
        let journal = Journal::open_in_memory().unwrap();
        let count: i32 = journal
            .conn
            .query_row("SELECT COUNT(*) FROM events", [], |row| row.get(0))
            .unwrap();
        assert_eq!(count, 0);
    }

    #[test]
    fn test_record_and_read_back() {
        let journal = Journal::open_in_memory().unwrap();

        let id = journal
            .record(&sample_event("feature", EventKind::BranchForceUpdated))
            .unwrap();
        assert!(id > 0);

        let entries = journal.recent(None, None).unwrap();
        assert_eq!(entries.len(), 1);

        let entry = &entries[0];
        assert_eq!(entry.event.branch, "feature");
        assert_eq!(entry.event.kind, EventKind::BranchForceUpdated);
        assert_eq!(entry.event.shas, vec!["abc123", "def456"]);
        assert_eq!(entry.event.identity.name, "Grace");
        assert!(!entry.acknowledged);
    }

    #[test]
    fn test_kind_filter_and_limit() {
        let journal = Journal::open_in_memory().unwrap();

        journal
            .record_all(&[
                sample_event("a", EventKind::BranchCreated),
                sample_event("b", EventKind::BranchDeleted),
                sample_event("c", EventKind::BranchCreated),
            ])
            .unwrap();

        let created = journal.recent(Some(EventKind::BranchCreated), None).unwrap();
        assert_eq!(created.len(), 2);

        let limited = journal.recent(None, Some(1)).unwrap();
        assert_eq!(limited.len(), 1);
    }

    #[test]
    fn test_acknowledge_all() {
        let journal = Journal::open_in_memory().unwrap();

        journal
            .record(&sample_event("feature", EventKind::BranchUpdated))
            .unwrap();

        assert_eq!(journal.acknowledge_all().unwrap(), 1);
        assert_eq!(journal.acknowledge_all().unwrap(), 0);

        let entries = journal.recent(None, None).unwrap();
        assert!(entries[0].acknowledged);
    }

    #[test]
    fn test_corrupt_kind_column_is_an_error_not_a_relabel() {
        let journal = Journal::open_in_memory().unwrap();
        journal
            .record(&sample_event("feature", EventKind::BranchCreated))
            .unwrap();

        journal
            .conn
            .execute("UPDATE events SET kind = 'branch_exploded'", [])
            .unwrap();

        assert!(journal.recent(None, None).is_err());
    }

    #[test]
    fn test_repository_filter() {
        let journal = Journal::open_in_memory().unwrap();

        let mut other = sample_event("main", EventKind::BranchUpdated);
        other.repository = "fork".to_string();

        journal.record(&sample_event("main", EventKind::BranchUpdated)).unwrap();
        journal.record(&other).unwrap();

        let entries = journal.for_repository("fork", None).unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].event.repository, "fork");
    }
}
