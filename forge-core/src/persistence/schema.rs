//! Schema DDL for the per-project SQLite store.
//!
//! Applied once on open via `execute_batch`; every statement is `IF NOT
//! EXISTS` so opening an existing project database is a cheap no-op.

pub const SCHEMA: &str = r#"
PRAGMA journal_mode = WAL;
PRAGMA foreign_keys = ON;

CREATE TABLE IF NOT EXISTS sessions (
    session_uuid    TEXT PRIMARY KEY,
    start_time      TEXT NOT NULL,
    end_time        TEXT,
    status          TEXT NOT NULL,
    total_cost      REAL NOT NULL DEFAULT 0.0
);

CREATE TABLE IF NOT EXISTS features (
    idx             INTEGER PRIMARY KEY,
    category        TEXT NOT NULL,
    description     TEXT NOT NULL,
    steps           TEXT NOT NULL,
    passes          INTEGER NOT NULL DEFAULT 0,
    audit_status    TEXT,
    priority        INTEGER NOT NULL DEFAULT 2,
    failure_count   INTEGER NOT NULL DEFAULT 0,
    last_worked     TEXT,
    blocked_by      TEXT NOT NULL DEFAULT '[]',
    metadata        TEXT NOT NULL DEFAULT '{}'
);

CREATE TABLE IF NOT EXISTS checkpoints (
    checkpoint_id         TEXT PRIMARY KEY,
    seq                   INTEGER NOT NULL,
    timestamp             TEXT NOT NULL,
    trigger               TEXT NOT NULL,
    session_id            TEXT NOT NULL,
    git_commit            TEXT NOT NULL,
    git_branch            TEXT NOT NULL,
    git_clean             INTEGER NOT NULL,
    feature_status        TEXT NOT NULL,
    features_passing      INTEGER NOT NULL,
    features_total        INTEGER NOT NULL,
    files_hash            TEXT NOT NULL,
    last_successful_feature INTEGER,
    pending_work          TEXT NOT NULL DEFAULT '[]',
    metadata              TEXT NOT NULL DEFAULT '{}',
    human_note            TEXT
);

CREATE TABLE IF NOT EXISTS decisions (
    decision_id       TEXT PRIMARY KEY,
    seq               INTEGER NOT NULL,
    timestamp         TEXT NOT NULL,
    session_id        TEXT NOT NULL,
    type              TEXT NOT NULL,
    context           TEXT NOT NULL,
    choice            TEXT NOT NULL,
    alternatives      TEXT NOT NULL DEFAULT '[]',
    rationale         TEXT NOT NULL,
    confidence        REAL NOT NULL,
    inputs_consulted  TEXT NOT NULL DEFAULT '[]',
    outcome           TEXT,
    outcome_success   INTEGER,
    outcome_timestamp TEXT,
    related_features  TEXT NOT NULL DEFAULT '[]',
    git_commit        TEXT,
    checkpoint_id     TEXT
);

CREATE TABLE IF NOT EXISTS hypotheses (
    hypothesis_id     TEXT PRIMARY KEY,
    seq               INTEGER NOT NULL,
    created_at        TEXT NOT NULL,
    created_session   TEXT NOT NULL,
    type              TEXT NOT NULL,
    observation       TEXT NOT NULL,
    hypothesis        TEXT NOT NULL,
    confidence        REAL NOT NULL,
    status            TEXT NOT NULL,
    context_keywords  TEXT NOT NULL DEFAULT '[]',
    related_features  TEXT NOT NULL DEFAULT '[]',
    related_errors    TEXT NOT NULL DEFAULT '[]',
    related_files     TEXT NOT NULL DEFAULT '[]',
    evidence_for      TEXT NOT NULL DEFAULT '[]',
    evidence_against  TEXT NOT NULL DEFAULT '[]',
    resolved_at       TEXT,
    resolution        TEXT,
    superseded_by     TEXT,
    review_count      INTEGER NOT NULL DEFAULT 0,
    sessions_seen     TEXT NOT NULL DEFAULT '[]'
);

CREATE TABLE IF NOT EXISTS artifacts (
    artifact_id       TEXT PRIMARY KEY,
    seq               INTEGER NOT NULL,
    type              TEXT NOT NULL,
    session_id        TEXT NOT NULL,
    feature_index     INTEGER,
    stored_path       TEXT NOT NULL,
    checksum          TEXT NOT NULL,
    size_bytes        INTEGER NOT NULL,
    description       TEXT,
    metadata          TEXT NOT NULL DEFAULT '{}',
    parent_artifact_id TEXT,
    created_at        TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS injection_points (
    point_id          TEXT PRIMARY KEY,
    seq               INTEGER NOT NULL,
    type              TEXT NOT NULL,
    context           TEXT NOT NULL DEFAULT '{}',
    options           TEXT NOT NULL DEFAULT '[]',
    recommendation    TEXT,
    timeout_seconds   INTEGER NOT NULL,
    default_on_timeout TEXT,
    message           TEXT,
    severity          INTEGER NOT NULL,
    escalation_rule_id TEXT,
    status            TEXT NOT NULL DEFAULT 'pending',
    response          TEXT,
    responded_by      TEXT,
    created_at        TEXT NOT NULL,
    responded_at      TEXT
);

CREATE TABLE IF NOT EXISTS interventions (
    intervention_id   TEXT PRIMARY KEY,
    seq               INTEGER NOT NULL,
    session_id        TEXT NOT NULL,
    type              TEXT NOT NULL,
    signature_hash    TEXT NOT NULL,
    signature         TEXT NOT NULL,
    original_action   TEXT,
    human_action      TEXT NOT NULL,
    rationale         TEXT,
    outcome           INTEGER,
    created_at        TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS intervention_patterns (
    pattern_id        TEXT PRIMARY KEY,
    seq               INTEGER NOT NULL,
    signature_hash    TEXT NOT NULL,
    signature         TEXT NOT NULL,
    recommended_action TEXT NOT NULL,
    intervention_ids  TEXT NOT NULL DEFAULT '[]',
    success_count     INTEGER NOT NULL DEFAULT 0,
    failure_count     INTEGER NOT NULL DEFAULT 0,
    confidence        REAL NOT NULL DEFAULT 0.0,
    auto_apply        INTEGER NOT NULL DEFAULT 0,
    created_at        TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS warm_summaries (
    summary_id        TEXT PRIMARY KEY,
    seq               INTEGER NOT NULL,
    session_id        TEXT NOT NULL,
    created_at        TEXT NOT NULL,
    body              TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS cold_knowledge (
    knowledge_id      TEXT PRIMARY KEY,
    seq               INTEGER NOT NULL,
    type              TEXT NOT NULL,
    title             TEXT NOT NULL,
    description       TEXT NOT NULL,
    keywords          TEXT NOT NULL DEFAULT '[]',
    source_sessions   TEXT NOT NULL DEFAULT '[]',
    confidence        REAL NOT NULL,
    times_verified    INTEGER NOT NULL DEFAULT 0,
    created_at        TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS cold_archive (
    archive_id        TEXT PRIMARY KEY,
    seq               INTEGER NOT NULL,
    session_id        TEXT NOT NULL,
    body              TEXT NOT NULL,
    created_at        TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS warm_memory_issues (
    issue_id          TEXT PRIMARY KEY,
    seq               INTEGER NOT NULL,
    issue_type        TEXT NOT NULL,
    description       TEXT NOT NULL,
    context           TEXT NOT NULL DEFAULT '{}',
    related_features  TEXT NOT NULL DEFAULT '[]',
    sessions_seen     TEXT NOT NULL DEFAULT '[]',
    priority          INTEGER NOT NULL DEFAULT 3,
    notes             TEXT NOT NULL DEFAULT '[]',
    resolution_attempts TEXT NOT NULL DEFAULT '[]',
    created_at        TEXT NOT NULL,
    last_updated      TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS warm_memory_patterns (
    pattern_id        TEXT PRIMARY KEY,
    seq               INTEGER NOT NULL,
    pattern_type      TEXT NOT NULL,
    problem           TEXT NOT NULL,
    solution          TEXT NOT NULL,
    context_keywords  TEXT NOT NULL DEFAULT '[]',
    success_count     INTEGER NOT NULL DEFAULT 1,
    sessions_used     TEXT NOT NULL DEFAULT '[]',
    confidence        REAL NOT NULL DEFAULT 0.5,
    created_at        TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS stall_records (
    record_id         TEXT PRIMARY KEY,
    seq               INTEGER NOT NULL,
    stall_type        TEXT NOT NULL,
    consecutive_sessions INTEGER NOT NULL DEFAULT 0,
    last_value        TEXT,
    opened_at         TEXT NOT NULL,
    closed_at         TEXT,
    resolved          INTEGER NOT NULL DEFAULT 0
);

CREATE TABLE IF NOT EXISTS events (
    seq               INTEGER PRIMARY KEY,
    session_id        TEXT NOT NULL,
    in_session_seq    INTEGER NOT NULL,
    kind              TEXT NOT NULL,
    payload           TEXT NOT NULL,
    created_at        TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS id_counters (
    prefix            TEXT PRIMARY KEY,
    next_value        INTEGER NOT NULL
);
"#;
