pub(super) const SEQUENCE_SCHEMA: &str = r#"
PRAGMA foreign_keys = ON;

CREATE TABLE IF NOT EXISTS sequences (
    id TEXT PRIMARY KEY,
    name TEXT NOT NULL,
    description TEXT,
    active INTEGER NOT NULL DEFAULT 1,
    timezone TEXT NOT NULL,
    window_start TEXT,
    window_end TEXT,
    send_on_weekends INTEGER NOT NULL DEFAULT 0,
    daily_limit INTEGER,
    hourly_limit INTEGER,
    created_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS sequence_steps (
    id TEXT PRIMARY KEY,
    sequence_id TEXT NOT NULL REFERENCES sequences(id) ON DELETE CASCADE,
    step_order INTEGER NOT NULL,
    kind TEXT NOT NULL,
    subject TEXT,
    body TEXT,
    delay_days INTEGER NOT NULL DEFAULT 0,
    delay_hours INTEGER NOT NULL DEFAULT 0,
    delay_minutes INTEGER NOT NULL DEFAULT 0,
    wait_for_reply_hours INTEGER,
    skip_if_replied INTEGER NOT NULL DEFAULT 0,
    track_opens INTEGER NOT NULL DEFAULT 0,
    track_clicks INTEGER NOT NULL DEFAULT 0,
    UNIQUE (sequence_id, step_order)
);

CREATE TABLE IF NOT EXISTS executions (
    id TEXT PRIMARY KEY,
    sequence_id TEXT NOT NULL REFERENCES sequences(id),
    contact_id TEXT NOT NULL,
    contact_email TEXT NOT NULL,
    status TEXT NOT NULL,
    current_step INTEGER NOT NULL DEFAULT 0,
    next_action_due_at TEXT,
    in_flight INTEGER NOT NULL DEFAULT 0,
    retry_count INTEGER NOT NULL DEFAULT 0,
    started_at TEXT NOT NULL,
    completed_at TEXT,
    last_event_at TEXT
);

CREATE UNIQUE INDEX IF NOT EXISTS idx_executions_open_pair
    ON executions (sequence_id, contact_id)
    WHERE status IN ('active', 'paused');

CREATE INDEX IF NOT EXISTS idx_executions_due
    ON executions (status, next_action_due_at);

CREATE TABLE IF NOT EXISTS scheduled_emails (
    id TEXT PRIMARY KEY,
    execution_id TEXT NOT NULL REFERENCES executions(id) ON DELETE CASCADE,
    step_order INTEGER NOT NULL,
    status TEXT NOT NULL,
    tracking_id TEXT NOT NULL,
    scheduled_at TEXT NOT NULL,
    sent_at TEXT,
    failed_at TEXT,
    error_message TEXT,
    opened INTEGER NOT NULL DEFAULT 0,
    open_count INTEGER NOT NULL DEFAULT 0,
    click_count INTEGER NOT NULL DEFAULT 0
);

CREATE UNIQUE INDEX IF NOT EXISTS idx_scheduled_emails_pending
    ON scheduled_emails (execution_id)
    WHERE status = 'pending';

CREATE INDEX IF NOT EXISTS idx_scheduled_emails_tracking
    ON scheduled_emails (tracking_id);
"#;
