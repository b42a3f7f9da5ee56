pub const CREATE_TABLES: &str = "
CREATE TABLE IF NOT EXISTS scan_jobs (
    id TEXT PRIMARY KEY,
    state TEXT NOT NULL,
    engine TEXT NOT NULL,
    owner TEXT,
    schedule_id TEXT,
    created_at TEXT NOT NULL,
    doc TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS raw_results (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    job_id TEXT NOT NULL REFERENCES scan_jobs(id) ON DELETE CASCADE,
    address TEXT NOT NULL,
    engine TEXT NOT NULL,
    success INTEGER NOT NULL,
    completed_at TEXT NOT NULL,
    doc TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS devices (
    address TEXT PRIMARY KEY,
    device_type TEXT NOT NULL,
    last_seen TEXT NOT NULL,
    doc TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS data_sources (
    id TEXT PRIMARY KEY,
    seq INTEGER NOT NULL,
    source_type TEXT NOT NULL,
    is_active INTEGER NOT NULL,
    doc TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS evaluations (
    id TEXT PRIMARY KEY,
    source_id TEXT NOT NULL REFERENCES data_sources(id) ON DELETE CASCADE,
    evaluation_type TEXT NOT NULL,
    evaluated_at TEXT NOT NULL,
    doc TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS ranking_snapshots (
    id TEXT PRIMARY KEY,
    created_at TEXT NOT NULL,
    doc TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS alerts (
    id TEXT PRIMARY KEY,
    source_id TEXT NOT NULL,
    is_active INTEGER NOT NULL,
    triggered_at TEXT NOT NULL,
    doc TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS schedules (
    id TEXT PRIMARY KEY,
    name TEXT NOT NULL,
    enabled INTEGER NOT NULL,
    next_run TEXT,
    doc TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_scan_jobs_state ON scan_jobs(state);
CREATE INDEX IF NOT EXISTS idx_raw_results_job ON raw_results(job_id);
CREATE INDEX IF NOT EXISTS idx_raw_results_address ON raw_results(address);
CREATE INDEX IF NOT EXISTS idx_evaluations_source ON evaluations(source_id);
CREATE INDEX IF NOT EXISTS idx_evaluations_time ON evaluations(evaluated_at);
CREATE INDEX IF NOT EXISTS idx_alerts_active ON alerts(is_active);
";
