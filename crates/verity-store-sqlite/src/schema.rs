//! SQL schema for the Verity SQLite store.
//!
//! Executed once at connection startup. Future migrations will be gated on
//! `PRAGMA user_version`.

/// Full schema DDL; idempotent thanks to `CREATE TABLE IF NOT EXISTS`.
pub const SCHEMA: &str = "
PRAGMA journal_mode = WAL;
PRAGMA foreign_keys = ON;

-- Claims are never deleted. `revision` is bumped by every lifecycle write
-- and used as a compare-and-set token.
CREATE TABLE IF NOT EXISTS claims (
    claim_id          TEXT PRIMARY KEY,
    submitter_id      TEXT NOT NULL,
    text              TEXT NOT NULL,
    status            TEXT NOT NULL,   -- 'pending' | 'ai_processed' | 'approved' | 'rejected'
    ai_verdict_id     TEXT,
    verdict_id        TEXT,
    assigned_reviewer TEXT,
    rejection_reason  TEXT,
    last_error        TEXT,
    revision          INTEGER NOT NULL DEFAULT 0,
    created_at        TEXT NOT NULL,
    updated_at        TEXT NOT NULL
);

-- At most one AI verdict per claim. The CHECK mirrors the authorship rule:
-- a disclaimer is present exactly while the verdict is unedited.
CREATE TABLE IF NOT EXISTS ai_verdicts (
    ai_verdict_id    TEXT PRIMARY KEY,
    claim_id         TEXT NOT NULL REFERENCES claims(claim_id),
    label            TEXT NOT NULL,
    confidence       REAL NOT NULL,
    explanation      TEXT NOT NULL,
    evidence         TEXT NOT NULL DEFAULT '[]',   -- JSON array
    analyzer_version TEXT NOT NULL,
    edited_by_human  INTEGER NOT NULL DEFAULT 0,
    edited_by        TEXT,
    edited_at        TEXT,
    disclaimer       TEXT,
    created_at       TEXT NOT NULL,
    UNIQUE (claim_id),
    CHECK  ((edited_by_human = 0 AND disclaimer IS NOT NULL AND disclaimer != '')
         OR (edited_by_human = 1 AND disclaimer IS NULL))
);

-- Independent reviewer verdicts; at most one per claim.
CREATE TABLE IF NOT EXISTS verdicts (
    verdict_id     TEXT PRIMARY KEY,
    claim_id       TEXT NOT NULL REFERENCES claims(claim_id),
    reviewer_id    TEXT NOT NULL,
    label          TEXT NOT NULL,
    explanation    TEXT NOT NULL,
    evidence       TEXT NOT NULL DEFAULT '[]',
    responsibility TEXT NOT NULL CHECK (responsibility = 'organization'),
    is_final       INTEGER NOT NULL DEFAULT 1,
    created_at     TEXT NOT NULL,
    UNIQUE (claim_id)
);

-- Queue jobs. `seq` preserves insertion order for FIFO tie-breaking.
CREATE TABLE IF NOT EXISTS jobs (
    seq              INTEGER PRIMARY KEY AUTOINCREMENT,
    job_id           TEXT NOT NULL UNIQUE,
    kind             TEXT NOT NULL,
    payload          TEXT NOT NULL,   -- JSON payload (inner data only)
    state            TEXT NOT NULL,   -- 'waiting' | 'active' | 'completed' | 'failed'
    attempts         INTEGER NOT NULL DEFAULT 0,
    max_attempts     INTEGER NOT NULL,
    backoff          TEXT NOT NULL,   -- JSON-encoded BackoffPolicy
    timeout_ms       INTEGER NOT NULL,
    priority         INTEGER NOT NULL DEFAULT 0,
    stalled_count    INTEGER NOT NULL DEFAULT 0,
    created_at       TEXT NOT NULL,
    ready_at         TEXT NOT NULL,
    lease_expires_at TEXT,
    last_error       TEXT,
    finished_at      TEXT
);

CREATE INDEX IF NOT EXISTS claims_status_idx ON claims(status);
CREATE INDEX IF NOT EXISTS jobs_ready_idx    ON jobs(state, kind, priority, ready_at);
CREATE INDEX IF NOT EXISTS jobs_lease_idx    ON jobs(state, lease_expires_at);

PRAGMA user_version = 1;
";
