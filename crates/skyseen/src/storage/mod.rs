//! The seen store.
//!
//! `SQLite`-backed record of simulation runs: the sessions each run found,
//! the posts predicted as seen in each session, and the posts known to have
//! been deleted from the network.

pub mod migrations;
pub mod schema;

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::deleted::Tombstone;
use crate::error::{Error, Result};
use crate::evaluate::Summary;
use crate::simulate::{Session, View};

/// Storage engine for simulation results.
#[derive(Debug)]
pub struct Storage {
    /// Path to the database file.
    path: PathBuf,
    /// Database connection.
    conn: Connection,
}

/// A stored simulation run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunInfo {
    /// Run id.
    pub id: i64,
    /// When the run started.
    pub started_at: DateTime<Utc>,
    /// Batch directory that was replayed.
    pub input: String,
    /// Sessions stored.
    pub sessions: i64,
    /// Sessions that were scored.
    pub interactive: i64,
    /// Mean precision, once finished.
    pub mean_precision: Option<f64>,
    /// Mean recall, once finished.
    pub mean_recall: Option<f64>,
    /// When the run finished. `None` for an interrupted run.
    pub finished_at: Option<DateTime<Utc>>,
}

/// A stored session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionRow {
    /// Run the session belongs to.
    pub run_id: i64,
    /// `<did>-<number>`.
    pub id: String,
    /// The user.
    pub did: String,
    /// Session number for this user.
    pub number: u32,
    /// Time of the first record.
    pub start_ms: i64,
    /// Time of the latest record.
    pub end_ms: i64,
    /// Actions taken.
    pub action_count: i64,
    /// Posts predicted as seen.
    pub impressions: i64,
}

/// A post a user is predicted to have seen.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SeenPost {
    /// Run the impression belongs to.
    pub run_id: i64,
    /// Session it was seen in.
    pub session_id: String,
    /// URI of the post.
    pub uri: String,
    /// Where it was seen.
    pub view: View,
    /// Order within the session.
    pub position: i64,
}

/// Statistics about the store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StorageStats {
    /// Stored runs.
    pub runs: i64,
    /// Stored sessions across all runs.
    pub sessions: i64,
    /// Stored impressions across all runs.
    pub impressions: i64,
    /// Known deleted posts.
    pub tombstones: i64,
    /// Id of the newest run.
    pub latest_run: Option<i64>,
    /// Size of the database file in bytes.
    pub db_size_bytes: u64,
}

fn to_i64(value: usize) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

fn parse_time(text: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(text)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

impl Storage {
    /// Open or create a store at the given path.
    ///
    /// Creates the parent directories and database file if they don't exist.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be opened or schema initialization fails.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent).map_err(|source| Error::DirectoryCreate {
                    path: parent.to_path_buf(),
                    source,
                })?;
            }
        }

        debug!("Opening database at {}", path.display());
        let conn = Connection::open(&path).map_err(|source| Error::DatabaseOpen {
            path: path.clone(),
            source,
        })?;

        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")?;
        migrations::initialize_schema(&conn)?;

        info!("Database opened at {}", path.display());
        Ok(Self { path, conn })
    }

    /// Create an in-memory store.
    ///
    /// # Errors
    ///
    /// Returns an error if the in-memory database cannot be created.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(|source| Error::DatabaseOpen {
            path: PathBuf::from(":memory:"),
            source,
        })?;

        migrations::initialize_schema(&conn)?;

        Ok(Self {
            path: PathBuf::from(":memory:"),
            conn,
        })
    }

    /// Get the path to the database file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Register a new run over `input`. Returns its id.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub fn begin_run(&self, input: &str) -> Result<i64> {
        self.conn.execute(
            "INSERT INTO runs (started_at, input) VALUES (?1, ?2)",
            params![Utc::now().to_rfc3339(), input],
        )?;
        let id = self.conn.last_insert_rowid();
        info!(run = id, input, "Run started");
        Ok(id)
    }

    /// Store a session and its impressions in one transaction.
    ///
    /// Saving the same session again replaces its row and keeps existing impressions.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub fn save_session(&self, run_id: i64, session: &Session) -> Result<()> {
        let tx = self.conn.unchecked_transaction()?;
        tx.execute(
            r"
            INSERT OR REPLACE INTO sessions
                (run_id, id, did, number, start_ms, end_ms, action_count)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            ",
            params![
                run_id,
                session.id,
                session.did,
                session.number,
                session.start_ms,
                session.end_ms,
                to_i64(session.actions.len()),
            ],
        )?;
        {
            let mut stmt = tx.prepare_cached(
                r"
                INSERT OR IGNORE INTO impressions (run_id, session_id, did, uri, view, position)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                ",
            )?;
            for (position, impression) in session.impressions.iter().enumerate() {
                stmt.execute(params![
                    run_id,
                    session.id,
                    session.did,
                    impression.uri,
                    impression.view.to_string(),
                    to_i64(position),
                ])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    /// Mark a run finished with its evaluation.
    ///
    /// # Errors
    ///
    /// Returns an error if the run does not exist or the database operation fails.
    pub fn finish_run(&self, run_id: i64, summary: &Summary) -> Result<()> {
        let affected = self.conn.execute(
            r"
            UPDATE runs
            SET sessions = ?2, interactive = ?3, mean_precision = ?4, mean_recall = ?5,
                finished_at = ?6
            WHERE id = ?1
            ",
            params![
                run_id,
                to_i64(summary.sessions),
                to_i64(summary.interactive),
                summary.precision.mean,
                summary.recall.mean,
                Utc::now().to_rfc3339(),
            ],
        )?;
        if affected == 0 {
            return Err(Error::internal(format!("run {run_id} does not exist")));
        }
        info!(run = run_id, "Run finished");
        Ok(())
    }

    /// The most recent runs, newest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub fn runs(&self, limit: usize) -> Result<Vec<RunInfo>> {
        let mut stmt = self.conn.prepare(
            r"
            SELECT id, started_at, input, sessions, interactive, mean_precision, mean_recall,
                   finished_at
            FROM runs ORDER BY id DESC LIMIT ?1
            ",
        )?;
        let runs = stmt
            .query_map([to_i64(limit)], Self::row_to_run)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(runs)
    }

    /// Id of the newest run.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub fn latest_run(&self) -> Result<Option<i64>> {
        let id = self
            .conn
            .query_row("SELECT MAX(id) FROM runs", [], |row| row.get(0))?;
        Ok(id)
    }

    fn resolve_run(&self, run: Option<i64>) -> Result<Option<i64>> {
        match run {
            Some(id) => Ok(Some(id)),
            None => self.latest_run(),
        }
    }

    /// Sessions of `did` in a run, latest run by default, oldest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub fn sessions_for(
        &self,
        did: &str,
        run: Option<i64>,
        limit: usize,
    ) -> Result<Vec<SessionRow>> {
        let Some(run_id) = self.resolve_run(run)? else {
            return Ok(Vec::new());
        };
        let mut stmt = self.conn.prepare(
            r"
            SELECT s.run_id, s.id, s.did, s.number, s.start_ms, s.end_ms, s.action_count,
                   (SELECT COUNT(*) FROM impressions i
                    WHERE i.run_id = s.run_id AND i.session_id = s.id)
            FROM sessions s
            WHERE s.run_id = ?1 AND s.did = ?2
            ORDER BY s.number ASC LIMIT ?3
            ",
        )?;
        let sessions = stmt
            .query_map(params![run_id, did, to_i64(limit)], |row| {
                Ok(SessionRow {
                    run_id: row.get(0)?,
                    id: row.get(1)?,
                    did: row.get(2)?,
                    number: row.get(3)?,
                    start_ms: row.get(4)?,
                    end_ms: row.get(5)?,
                    action_count: row.get(6)?,
                    impressions: row.get(7)?,
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(sessions)
    }

    /// Posts `did` is predicted to have seen in a run, latest run by default.
    ///
    /// Ordered by session, then by position within the session.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub fn seen_by(&self, did: &str, run: Option<i64>, limit: usize) -> Result<Vec<SeenPost>> {
        let Some(run_id) = self.resolve_run(run)? else {
            return Ok(Vec::new());
        };
        let mut stmt = self.conn.prepare(
            r"
            SELECT i.run_id, i.session_id, i.uri, i.view, i.position
            FROM impressions i
            JOIN sessions s ON s.run_id = i.run_id AND s.id = i.session_id
            WHERE i.run_id = ?1 AND i.did = ?2
            ORDER BY s.number ASC, i.position ASC LIMIT ?3
            ",
        )?;
        let seen = stmt
            .query_map(params![run_id, did, to_i64(limit)], Self::row_to_seen)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(seen)
    }

    /// Whether `did` is predicted to have seen `uri` in a run, latest run by default.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub fn has_seen(&self, did: &str, uri: &str, run: Option<i64>) -> Result<bool> {
        let Some(run_id) = self.resolve_run(run)? else {
            return Ok(false);
        };
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM impressions WHERE run_id = ?1 AND did = ?2 AND uri = ?3",
            params![run_id, did, uri],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    /// Record deleted posts. Returns how many were not already known.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub fn insert_tombstones(&self, tombstones: &[Tombstone]) -> Result<usize> {
        let tx = self.conn.unchecked_transaction()?;
        let mut inserted = 0;
        {
            let mut stmt = tx.prepare_cached(
                "INSERT OR IGNORE INTO tombstones (uri, did, ts) VALUES (?1, ?2, ?3)",
            )?;
            for tombstone in tombstones {
                inserted += stmt.execute(params![tombstone.uri, tombstone.did, tombstone.ts])?;
            }
        }
        tx.commit()?;
        debug!(inserted, total = tombstones.len(), "Stored tombstones");
        Ok(inserted)
    }

    /// Whether `uri` is a known deleted post.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub fn is_tombstoned(&self, uri: &str) -> Result<bool> {
        let found = self
            .conn
            .query_row("SELECT 1 FROM tombstones WHERE uri = ?1", [uri], |_| Ok(()))
            .optional()?;
        Ok(found.is_some())
    }

    /// Keep only the `keep` most recent runs, with their sessions and impressions.
    ///
    /// Returns the number of runs deleted.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub fn prune_runs_keep_recent(&self, keep: usize) -> Result<usize> {
        let keep = to_i64(keep);
        let tx = self.conn.unchecked_transaction()?;
        tx.execute(
            r"
            DELETE FROM impressions WHERE run_id NOT IN (
                SELECT id FROM runs ORDER BY id DESC LIMIT ?1
            )
            ",
            [keep],
        )?;
        tx.execute(
            r"
            DELETE FROM sessions WHERE run_id NOT IN (
                SELECT id FROM runs ORDER BY id DESC LIMIT ?1
            )
            ",
            [keep],
        )?;
        let affected = tx.execute(
            r"
            DELETE FROM runs WHERE id NOT IN (
                SELECT id FROM runs ORDER BY id DESC LIMIT ?1
            )
            ",
            [keep],
        )?;
        tx.commit()?;

        if affected > 0 {
            info!("Pruned {} runs to keep {} recent", affected, keep);
        }
        Ok(affected)
    }

    /// Get store statistics.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub fn stats(&self) -> Result<StorageStats> {
        let count = |table: &str| -> Result<i64> {
            let n = self
                .conn
                .query_row(&format!("SELECT COUNT(*) FROM {table}"), [], |row| row.get(0))?;
            Ok(n)
        };

        let db_size_bytes = if self.path.to_string_lossy() == ":memory:" {
            0
        } else {
            std::fs::metadata(&self.path).map(|m| m.len()).unwrap_or(0)
        };

        Ok(StorageStats {
            runs: count("runs")?,
            sessions: count("sessions")?,
            impressions: count("impressions")?,
            tombstones: count("tombstones")?,
            latest_run: self.latest_run()?,
            db_size_bytes,
        })
    }

    fn row_to_run(row: &rusqlite::Row) -> rusqlite::Result<RunInfo> {
        let started_at: String = row.get(1)?;
        let finished_at: Option<String> = row.get(7)?;

        Ok(RunInfo {
            id: row.get(0)?,
            started_at: parse_time(&started_at).unwrap_or_default(),
            input: row.get(2)?,
            sessions: row.get(3)?,
            interactive: row.get(4)?,
            mean_precision: row.get(5)?,
            mean_recall: row.get(6)?,
            finished_at: finished_at.as_deref().and_then(parse_time),
        })
    }

    fn row_to_seen(row: &rusqlite::Row) -> rusqlite::Result<SeenPost> {
        let view_str: String = row.get(3)?;
        let view = View::from_str_opt(&view_str).unwrap_or_else(|| {
            warn!("Unknown view: {}, defaulting to following", view_str);
            View::Following
        });

        Ok(SeenPost {
            run_id: row.get(0)?,
            session_id: row.get(1)?,
            uri: row.get(2)?,
            view,
            position: row.get(4)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::evaluate::evaluate;
    use crate::simulate::{Action, ActionKind};

    fn create_test_storage() -> Storage {
        Storage::open_in_memory().expect("failed to create test storage")
    }

    fn session(did: &str, number: u32, seen: &[&str]) -> Session {
        let mut session = Session::new(did, number, i64::from(number) * 1000);
        session.end_ms = session.start_ms + 500;
        session.mark_all_seen(seen.iter().copied(), View::Following);
        session.actions.push(Action {
            kind: ActionKind::Like,
            ts: session.start_ms,
            uri: None,
            subject: seen.first().map(|s| (*s).to_string()),
        });
        session
    }

    fn tombstone(uri: &str, ts: i64) -> Tombstone {
        Tombstone {
            uri: uri.to_string(),
            did: "did:plc:gone".to_string(),
            ts,
        }
    }

    #[test]
    fn test_open_in_memory() {
        let storage = Storage::open_in_memory();
        assert!(storage.is_ok());
        assert_eq!(storage.unwrap().path(), Path::new(":memory:"));
    }

    #[test]
    fn test_open_creates_parent_dirs() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("seen.db");

        let storage = Storage::open(&path).unwrap();
        assert_eq!(storage.path(), path);
        assert!(path.exists());
    }

    #[test]
    fn test_save_and_query_session() {
        let storage = create_test_storage();
        let run = storage.begin_run("/data/ordered").unwrap();

        storage
            .save_session(run, &session("did:plc:a", 1, &["at://p/1", "at://p/2"]))
            .unwrap();
        storage
            .save_session(run, &session("did:plc:a", 2, &["at://p/3"]))
            .unwrap();
        storage
            .save_session(run, &session("did:plc:b", 1, &["at://p/1"]))
            .unwrap();

        let sessions = storage.sessions_for("did:plc:a", None, 10).unwrap();
        assert_eq!(sessions.len(), 2);
        assert_eq!(sessions[0].id, "did:plc:a-1");
        assert_eq!(sessions[0].impressions, 2);
        assert_eq!(sessions[0].action_count, 1);
        assert_eq!(sessions[1].number, 2);

        let seen = storage.seen_by("did:plc:a", None, 10).unwrap();
        let uris: Vec<_> = seen.iter().map(|s| s.uri.as_str()).collect();
        assert_eq!(uris, vec!["at://p/1", "at://p/2", "at://p/3"]);
        assert_eq!(seen[1].position, 1);
        assert_eq!(seen[0].view, View::Following);

        assert!(storage.has_seen("did:plc:b", "at://p/1", None).unwrap());
        assert!(!storage.has_seen("did:plc:b", "at://p/2", None).unwrap());
    }

    #[test]
    fn test_save_session_twice_is_idempotent() {
        let storage = create_test_storage();
        let run = storage.begin_run("in").unwrap();
        let s = session("did:plc:a", 1, &["at://p/1"]);

        storage.save_session(run, &s).unwrap();
        storage.save_session(run, &s).unwrap();

        let stats = storage.stats().unwrap();
        assert_eq!(stats.sessions, 1);
        assert_eq!(stats.impressions, 1);
    }

    #[test]
    fn test_queries_default_to_latest_run() {
        let storage = create_test_storage();
        let first = storage.begin_run("in").unwrap();
        storage
            .save_session(first, &session("did:plc:a", 1, &["at://p/old"]))
            .unwrap();
        let second = storage.begin_run("in").unwrap();
        storage
            .save_session(second, &session("did:plc:a", 1, &["at://p/new"]))
            .unwrap();

        assert_eq!(storage.latest_run().unwrap(), Some(second));
        assert!(storage.has_seen("did:plc:a", "at://p/new", None).unwrap());
        assert!(!storage.has_seen("did:plc:a", "at://p/old", None).unwrap());
        assert!(storage
            .has_seen("did:plc:a", "at://p/old", Some(first))
            .unwrap());
    }

    #[test]
    fn test_queries_on_empty_store() {
        let storage = create_test_storage();
        assert_eq!(storage.latest_run().unwrap(), None);
        assert!(storage.sessions_for("did:plc:a", None, 10).unwrap().is_empty());
        assert!(storage.seen_by("did:plc:a", None, 10).unwrap().is_empty());
        assert!(!storage.has_seen("did:plc:a", "at://p/1", None).unwrap());
    }

    #[test]
    fn test_finish_run() {
        let storage = create_test_storage();
        let run = storage.begin_run("/data/ordered").unwrap();
        let sessions = vec![session("did:plc:a", 1, &["at://p/1", "at://p/2"])];
        let summary = evaluate(&sessions, 1, 10, 1);

        storage.finish_run(run, &summary).unwrap();

        let runs = storage.runs(10).unwrap();
        assert_eq!(runs.len(), 1);
        assert_eq!(runs[0].input, "/data/ordered");
        assert_eq!(runs[0].sessions, 1);
        assert_eq!(runs[0].interactive, 1);
        assert!((runs[0].mean_precision.unwrap() - 0.5).abs() < 1e-9);
        assert!(runs[0].finished_at.is_some());

        assert!(storage.finish_run(run + 1, &summary).is_err());
    }

    #[test]
    fn test_unfinished_run_listed() {
        let storage = create_test_storage();
        storage.begin_run("a").unwrap();
        storage.begin_run("b").unwrap();

        let runs = storage.runs(1).unwrap();
        assert_eq!(runs.len(), 1);
        assert_eq!(runs[0].input, "b");
        assert!(runs[0].finished_at.is_none());
        assert!(runs[0].mean_recall.is_none());
    }

    #[test]
    fn test_tombstones() {
        let storage = create_test_storage();
        let batch = [tombstone("at://gone/1", 1), tombstone("at://gone/2", 2)];

        assert_eq!(storage.insert_tombstones(&batch).unwrap(), 2);
        assert_eq!(storage.insert_tombstones(&batch).unwrap(), 0);
        assert!(storage.is_tombstoned("at://gone/1").unwrap());
        assert!(!storage.is_tombstoned("at://here/1").unwrap());
        assert_eq!(storage.stats().unwrap().tombstones, 2);
    }

    #[test]
    fn test_prune_runs_cascades() {
        let storage = create_test_storage();
        for _ in 0..3 {
            let run = storage.begin_run("in").unwrap();
            storage
                .save_session(run, &session("did:plc:a", 1, &["at://p/1"]))
                .unwrap();
        }

        let deleted = storage.prune_runs_keep_recent(1).unwrap();
        assert_eq!(deleted, 2);

        let stats = storage.stats().unwrap();
        assert_eq!(stats.runs, 1);
        assert_eq!(stats.sessions, 1);
        assert_eq!(stats.impressions, 1);
        assert_eq!(stats.latest_run, Some(3));
    }

    #[test]
    fn test_stats_empty() {
        let storage = create_test_storage();
        let stats = storage.stats().unwrap();
        assert_eq!(stats.runs, 0);
        assert_eq!(stats.impressions, 0);
        assert_eq!(stats.latest_run, None);
        assert_eq!(stats.db_size_bytes, 0);
    }
}
