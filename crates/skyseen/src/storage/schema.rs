//! `SQLite` schema of the seen store.

/// One row per simulation run.
pub const CREATE_RUNS_TABLE: &str = r"
CREATE TABLE IF NOT EXISTS runs (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    started_at TEXT NOT NULL,
    input TEXT NOT NULL,
    sessions INTEGER NOT NULL DEFAULT 0,
    interactive INTEGER NOT NULL DEFAULT 0,
    mean_precision REAL,
    mean_recall REAL,
    finished_at TEXT
)
";

/// Sessions of a run.
pub const CREATE_SESSIONS_TABLE: &str = r"
CREATE TABLE IF NOT EXISTS sessions (
    run_id INTEGER NOT NULL,
    id TEXT NOT NULL,
    did TEXT NOT NULL,
    number INTEGER NOT NULL,
    start_ms INTEGER NOT NULL,
    end_ms INTEGER NOT NULL,
    action_count INTEGER NOT NULL,
    PRIMARY KEY (run_id, id)
)
";

/// Lookup of a user's sessions, newest run first.
pub const CREATE_SESSIONS_DID_INDEX: &str = r"
CREATE INDEX IF NOT EXISTS idx_sessions_did ON sessions(did, run_id)
";

/// Posts predicted as seen, in the order they were inferred within a session.
pub const CREATE_IMPRESSIONS_TABLE: &str = r"
CREATE TABLE IF NOT EXISTS impressions (
    run_id INTEGER NOT NULL,
    session_id TEXT NOT NULL,
    did TEXT NOT NULL,
    uri TEXT NOT NULL,
    view TEXT NOT NULL,
    position INTEGER NOT NULL,
    PRIMARY KEY (run_id, session_id, uri)
)
";

/// Serves `seen_by` and `has_seen`.
pub const CREATE_IMPRESSIONS_SEEN_INDEX: &str = r"
CREATE INDEX IF NOT EXISTS idx_impressions_seen ON impressions(run_id, did, uri)
";

/// Posts known to have been deleted from the network.
pub const CREATE_TOMBSTONES_TABLE: &str = r"
CREATE TABLE IF NOT EXISTS tombstones (
    uri TEXT PRIMARY KEY,
    did TEXT NOT NULL,
    ts INTEGER NOT NULL
)
";

/// Key-value pairs, including the schema version.
pub const CREATE_METADATA_TABLE: &str = r"
CREATE TABLE IF NOT EXISTS metadata (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL
)
";

/// All schema creation statements in order.
pub const SCHEMA_STATEMENTS: &[&str] = &[
    CREATE_RUNS_TABLE,
    CREATE_SESSIONS_TABLE,
    CREATE_SESSIONS_DID_INDEX,
    CREATE_IMPRESSIONS_TABLE,
    CREATE_IMPRESSIONS_SEEN_INDEX,
    CREATE_TOMBSTONES_TABLE,
    CREATE_METADATA_TABLE,
];
