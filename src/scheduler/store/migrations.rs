use rusqlite::Connection;
use std::collections::HashSet;

use super::super::types::SchedulerError;

fn table_columns(conn: &Connection, table: &str) -> Result<HashSet<String>, SchedulerError> {
    let mut stmt = conn.prepare(&format!("PRAGMA table_info({table})"))?;
    let rows = stmt.query_map([], |row| row.get::<_, String>(1))?;
    let mut columns = HashSet::new();
    for row in rows {
        columns.insert(row?);
    }
    Ok(columns)
}

pub(super) fn ensure_execution_columns(conn: &Connection) -> Result<(), SchedulerError> {
    let columns = table_columns(conn, "executions")?;

    if !columns.contains("in_flight") {
        conn.execute(
            "ALTER TABLE executions ADD COLUMN in_flight INTEGER NOT NULL DEFAULT 0",
            [],
        )?;
    }
    if !columns.contains("retry_count") {
        conn.execute(
            "ALTER TABLE executions ADD COLUMN retry_count INTEGER NOT NULL DEFAULT 0",
            [],
        )?;
    }
    if !columns.contains("last_event_at") {
        conn.execute("ALTER TABLE executions ADD COLUMN last_event_at TEXT", [])?;
    }
    Ok(())
}

pub(super) fn ensure_scheduled_email_columns(conn: &Connection) -> Result<(), SchedulerError> {
    let columns = table_columns(conn, "scheduled_emails")?;

    if !columns.contains("error_message") {
        conn.execute(
            "ALTER TABLE scheduled_emails ADD COLUMN error_message TEXT",
            [],
        )?;
    }
    if !columns.contains("failed_at") {
        conn.execute("ALTER TABLE scheduled_emails ADD COLUMN failed_at TEXT", [])?;
    }
    if !columns.contains("click_count") {
        conn.execute(
            "ALTER TABLE scheduled_emails ADD COLUMN click_count INTEGER NOT NULL DEFAULT 0",
            [],
        )?;
    }
    Ok(())
}
