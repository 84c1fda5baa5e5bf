use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use std::fs;
use std::path::PathBuf;
use std::time::Duration;
use uuid::Uuid;

use super::types::{
    EmailStatus, ExecutionStatus, ScheduledEmail, SchedulerError, SendWindow, Sequence,
    SequenceExecution, SequenceStep, StepDelay, StepKind,
};
use super::utils::{
    bool_to_int, format_datetime, format_optional_datetime, format_time, parse_datetime,
    parse_optional_datetime, parse_time,
};

mod migrations;
mod schema;

use migrations::{ensure_execution_columns, ensure_scheduled_email_columns};
use schema::SEQUENCE_SCHEMA;

#[derive(Debug)]
pub(crate) struct SqliteSequenceStore {
    path: PathBuf,
}

impl SqliteSequenceStore {
    pub(crate) fn new(path: PathBuf) -> Result<Self, SchedulerError> {
        let store = Self { path };
        let _ = store.open()?;
        Ok(store)
    }

    fn open(&self) -> Result<Connection, SchedulerError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(&self.path)?;
        conn.busy_timeout(Duration::from_secs(5))?;
        conn.execute_batch(SEQUENCE_SCHEMA)?;
        ensure_execution_columns(&conn)?;
        ensure_scheduled_email_columns(&conn)?;
        Ok(conn)
    }

    pub(crate) fn insert_sequence(
        &self,
        sequence: &Sequence,
        steps: &[SequenceStep],
    ) -> Result<(), SchedulerError> {
        let mut conn = self.open()?;
        let tx = conn.transaction()?;
        tx.execute(
            "INSERT INTO sequences (id, name, description, active, timezone, window_start, window_end, send_on_weekends, daily_limit, hourly_limit, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
            params![
                sequence.id.to_string(),
                sequence.name.as_str(),
                sequence.description.as_deref(),
                bool_to_int(sequence.active),
                sequence.timezone.name(),
                sequence.send_window.map(|window| format_time(window.start)),
                sequence.send_window.map(|window| format_time(window.end)),
                bool_to_int(sequence.send_on_weekends),
                sequence.daily_limit.map(|value| value as i64),
                sequence.hourly_limit.map(|value| value as i64),
                format_datetime(sequence.created_at),
            ],
        )?;
        {
            let mut stmt = tx.prepare(
                "INSERT INTO sequence_steps (id, sequence_id, step_order, kind, subject, body, delay_days, delay_hours, delay_minutes, wait_for_reply_hours, skip_if_replied, track_opens, track_clicks)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
            )?;
            for step in steps {
                let (subject, body, grace_hours) = match &step.kind {
                    StepKind::Email { subject, body } => {
                        (Some(subject.as_str()), Some(body.as_str()), None)
                    }
                    StepKind::WaitForReply { grace_hours } => {
                        (None, None, Some(*grace_hours as i64))
                    }
                    StepKind::Conditional => (None, None, None),
                };
                stmt.execute(params![
                    step.id.to_string(),
                    step.sequence_id.to_string(),
                    step.order as i64,
                    step.kind.label(),
                    subject,
                    body,
                    step.delay.days as i64,
                    step.delay.hours as i64,
                    step.delay.minutes as i64,
                    grace_hours,
                    bool_to_int(step.skip_if_replied),
                    bool_to_int(step.track_opens),
                    bool_to_int(step.track_clicks),
                ])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    pub(crate) fn load_sequence(
        &self,
        sequence_id: &Uuid,
    ) -> Result<Option<(Sequence, Vec<SequenceStep>)>, SchedulerError> {
        let conn = self.open()?;
        let row = conn
            .query_row(
                "SELECT id, name, description, active, timezone, window_start, window_end, send_on_weekends, daily_limit, hourly_limit, created_at
                 FROM sequences WHERE id = ?1",
                params![sequence_id.to_string()],
                sequence_row,
            )
            .optional()?;
        let Some(raw) = row else {
            return Ok(None);
        };
        let sequence = sequence_from_row(raw)?;
        let steps = self.load_steps(&conn, sequence_id)?;
        Ok(Some((sequence, steps)))
    }

    pub(crate) fn sequences(&self) -> Result<Vec<Sequence>, SchedulerError> {
        let conn = self.open()?;
        let mut stmt = conn.prepare(
            "SELECT id, name, description, active, timezone, window_start, window_end, send_on_weekends, daily_limit, hourly_limit, created_at
             FROM sequences ORDER BY created_at",
        )?;
        let rows = stmt.query_map([], sequence_row)?;
        let mut sequences = Vec::new();
        for row in rows {
            sequences.push(sequence_from_row(row?)?);
        }
        Ok(sequences)
    }

    pub(crate) fn set_sequence_active(
        &self,
        sequence_id: &Uuid,
        active: bool,
    ) -> Result<bool, SchedulerError> {
        let conn = self.open()?;
        let changed = conn.execute(
            "UPDATE sequences SET active = ?1 WHERE id = ?2",
            params![bool_to_int(active), sequence_id.to_string()],
        )?;
        Ok(changed > 0)
    }

    pub(crate) fn delete_sequence(&self, sequence_id: &Uuid) -> Result<bool, SchedulerError> {
        let conn = self.open()?;
        let changed = conn.execute(
            "DELETE FROM sequences WHERE id = ?1",
            params![sequence_id.to_string()],
        )?;
        Ok(changed > 0)
    }

    fn load_steps(
        &self,
        conn: &Connection,
        sequence_id: &Uuid,
    ) -> Result<Vec<SequenceStep>, SchedulerError> {
        let mut stmt = conn.prepare(
            "SELECT id, sequence_id, step_order, kind, subject, body, delay_days, delay_hours, delay_minutes, wait_for_reply_hours, skip_if_replied, track_opens, track_clicks
             FROM sequence_steps WHERE sequence_id = ?1 ORDER BY step_order",
        )?;
        let rows = stmt.query_map(params![sequence_id.to_string()], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, i64>(2)?,
                row.get::<_, String>(3)?,
                row.get::<_, Option<String>>(4)?,
                row.get::<_, Option<String>>(5)?,
                row.get::<_, i64>(6)?,
                row.get::<_, i64>(7)?,
                row.get::<_, i64>(8)?,
                row.get::<_, Option<i64>>(9)?,
                row.get::<_, i64>(10)?,
                row.get::<_, i64>(11)?,
                row.get::<_, i64>(12)?,
            ))
        })?;

        let mut steps = Vec::new();
        for row in rows {
            let (
                id_raw,
                sequence_raw,
                order,
                kind_raw,
                subject,
                body,
                delay_days,
                delay_hours,
                delay_minutes,
                grace_hours,
                skip_if_replied,
                track_opens,
                track_clicks,
            ) = row?;
            let kind = match kind_raw.as_str() {
                "email" => StepKind::Email {
                    subject: subject.unwrap_or_default(),
                    body: body.unwrap_or_default(),
                },
                "wait_for_reply" => StepKind::WaitForReply {
                    grace_hours: grace_hours.unwrap_or(0) as u32,
                },
                "conditional" => StepKind::Conditional,
                other => {
                    return Err(SchedulerError::Storage(format!(
                        "unknown step kind {other} for step {id_raw}"
                    )))
                }
            };
            steps.push(SequenceStep {
                id: Uuid::parse_str(&id_raw)?,
                sequence_id: Uuid::parse_str(&sequence_raw)?,
                order: order as u32,
                kind,
                delay: StepDelay {
                    days: delay_days as u32,
                    hours: delay_hours as u32,
                    minutes: delay_minutes as u32,
                },
                skip_if_replied: skip_if_replied != 0,
                track_opens: track_opens != 0,
                track_clicks: track_clicks != 0,
            });
        }
        Ok(steps)
    }

    pub(crate) fn insert_execution(
        &self,
        execution: &SequenceExecution,
    ) -> Result<(), SchedulerError> {
        let conn = self.open()?;
        conn.execute(
            "INSERT INTO executions (id, sequence_id, contact_id, contact_email, status, current_step, next_action_due_at, in_flight, retry_count, started_at, completed_at, last_event_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, 0, ?8, ?9, ?10, ?11)",
            params![
                execution.id.to_string(),
                execution.sequence_id.to_string(),
                execution.contact_id.to_string(),
                execution.contact_email.as_str(),
                execution.status.as_str(),
                execution.current_step as i64,
                format_optional_datetime(execution.next_action_due_at),
                execution.retry_count as i64,
                format_datetime(execution.started_at),
                format_optional_datetime(execution.completed_at),
                format_optional_datetime(execution.last_event_at),
            ],
        )?;
        Ok(())
    }

    pub(crate) fn update_execution(
        &self,
        execution: &SequenceExecution,
    ) -> Result<(), SchedulerError> {
        let conn = self.open()?;
        conn.execute(
            "UPDATE executions
             SET status = ?1,
                 current_step = ?2,
                 next_action_due_at = ?3,
                 retry_count = ?4,
                 completed_at = ?5,
                 last_event_at = ?6
             WHERE id = ?7",
            params![
                execution.status.as_str(),
                execution.current_step as i64,
                format_optional_datetime(execution.next_action_due_at),
                execution.retry_count as i64,
                format_optional_datetime(execution.completed_at),
                format_optional_datetime(execution.last_event_at),
                execution.id.to_string(),
            ],
        )?;
        Ok(())
    }

    pub(crate) fn load_execution(
        &self,
        execution_id: &Uuid,
    ) -> Result<Option<SequenceExecution>, SchedulerError> {
        let conn = self.open()?;
        let row = conn
            .query_row(
                "SELECT id, sequence_id, contact_id, contact_email, status, current_step, next_action_due_at, retry_count, started_at, completed_at, last_event_at
                 FROM executions WHERE id = ?1",
                params![execution_id.to_string()],
                execution_row,
            )
            .optional()?;
        row.map(execution_from_row).transpose()
    }

    pub(crate) fn has_open_execution(
        &self,
        sequence_id: &Uuid,
        contact_id: &Uuid,
    ) -> Result<bool, SchedulerError> {
        let conn = self.open()?;
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM executions
             WHERE sequence_id = ?1 AND contact_id = ?2 AND status IN ('active', 'paused')",
            params![sequence_id.to_string(), contact_id.to_string()],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    /// Active executions whose due time has arrived, earliest first.
    pub(crate) fn due_executions(
        &self,
        now: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<SequenceExecution>, SchedulerError> {
        let conn = self.open()?;
        let mut stmt = conn.prepare(
            "SELECT id, sequence_id, contact_id, contact_email, status, current_step, next_action_due_at, retry_count, started_at, completed_at, last_event_at
             FROM executions
             WHERE status = 'active' AND in_flight = 0
               AND next_action_due_at IS NOT NULL AND next_action_due_at <= ?1
             ORDER BY next_action_due_at ASC
             LIMIT ?2",
        )?;
        let rows = stmt.query_map(params![format_datetime(now), limit as i64], execution_row)?;
        let mut executions = Vec::new();
        for row in rows {
            executions.push(execution_from_row(row?)?);
        }
        Ok(executions)
    }

    pub(crate) fn open_executions_for_contact(
        &self,
        contact_id: &Uuid,
        sequence_id: Option<&Uuid>,
    ) -> Result<Vec<SequenceExecution>, SchedulerError> {
        let conn = self.open()?;
        let mut stmt = conn.prepare(
            "SELECT id, sequence_id, contact_id, contact_email, status, current_step, next_action_due_at, retry_count, started_at, completed_at, last_event_at
             FROM executions
             WHERE contact_id = ?1 AND status IN ('active', 'paused')
               AND (?2 IS NULL OR sequence_id = ?2)
             ORDER BY started_at",
        )?;
        let rows = stmt.query_map(
            params![
                contact_id.to_string(),
                sequence_id.map(|value| value.to_string())
            ],
            execution_row,
        )?;
        let mut executions = Vec::new();
        for row in rows {
            executions.push(execution_from_row(row?)?);
        }
        Ok(executions)
    }

    pub(crate) fn active_executions_for_sequence(
        &self,
        sequence_id: &Uuid,
    ) -> Result<Vec<SequenceExecution>, SchedulerError> {
        let conn = self.open()?;
        let mut stmt = conn.prepare(
            "SELECT id, sequence_id, contact_id, contact_email, status, current_step, next_action_due_at, retry_count, started_at, completed_at, last_event_at
             FROM executions
             WHERE sequence_id = ?1 AND status = 'active'
             ORDER BY started_at",
        )?;
        let rows = stmt.query_map(params![sequence_id.to_string()], execution_row)?;
        let mut executions = Vec::new();
        for row in rows {
            executions.push(execution_from_row(row?)?);
        }
        Ok(executions)
    }

    /// Sets the in-flight marker iff the execution is still active and not
    /// already claimed. Losing this race is a normal scheduling artifact.
    pub(crate) fn claim_execution(&self, execution_id: &Uuid) -> Result<bool, SchedulerError> {
        let conn = self.open()?;
        let changed = conn.execute(
            "UPDATE executions SET in_flight = 1
             WHERE id = ?1 AND in_flight = 0 AND status = 'active'",
            params![execution_id.to_string()],
        )?;
        Ok(changed == 1)
    }

    pub(crate) fn release_execution(&self, execution_id: &Uuid) -> Result<(), SchedulerError> {
        let conn = self.open()?;
        conn.execute(
            "UPDATE executions SET in_flight = 0 WHERE id = ?1",
            params![execution_id.to_string()],
        )?;
        Ok(())
    }

    /// Clears markers left behind by a crash so recovery re-polls everything.
    pub(crate) fn clear_in_flight(&self) -> Result<usize, SchedulerError> {
        let conn = self.open()?;
        let changed = conn.execute("UPDATE executions SET in_flight = 0 WHERE in_flight = 1", [])?;
        Ok(changed)
    }

    /// Pending rows only exist while a dispatch is running, so any present at
    /// startup belong to a dispatch that died mid-flight. Cancelling them
    /// frees the one-pending-per-execution slot and lets the next poll retry.
    pub(crate) fn cancel_orphaned_pending_emails(&self) -> Result<usize, SchedulerError> {
        let conn = self.open()?;
        let changed = conn.execute(
            "UPDATE scheduled_emails SET status = 'cancelled', error_message = 'interrupted by restart'
             WHERE status = 'pending'",
            [],
        )?;
        Ok(changed)
    }

    pub(crate) fn insert_scheduled_email(
        &self,
        email: &ScheduledEmail,
    ) -> Result<(), SchedulerError> {
        let conn = self.open()?;
        conn.execute(
            "INSERT INTO scheduled_emails (id, execution_id, step_order, status, tracking_id, scheduled_at, sent_at, failed_at, error_message, opened, open_count, click_count)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
            params![
                email.id.to_string(),
                email.execution_id.to_string(),
                email.step_order as i64,
                email.status.as_str(),
                email.tracking_id.to_string(),
                format_datetime(email.scheduled_at),
                format_optional_datetime(email.sent_at),
                format_optional_datetime(email.failed_at),
                email.error_message.as_deref(),
                bool_to_int(email.opened),
                email.open_count as i64,
                email.click_count as i64,
            ],
        )?;
        Ok(())
    }

    pub(crate) fn mark_email_sent(
        &self,
        email_id: &Uuid,
        sent_at: DateTime<Utc>,
    ) -> Result<(), SchedulerError> {
        let conn = self.open()?;
        conn.execute(
            "UPDATE scheduled_emails SET status = 'sent', sent_at = ?1 WHERE id = ?2",
            params![format_datetime(sent_at), email_id.to_string()],
        )?;
        Ok(())
    }

    pub(crate) fn mark_email_failed(
        &self,
        email_id: &Uuid,
        failed_at: DateTime<Utc>,
        error_message: &str,
    ) -> Result<(), SchedulerError> {
        let conn = self.open()?;
        conn.execute(
            "UPDATE scheduled_emails
             SET status = 'failed', failed_at = ?1, error_message = ?2
             WHERE id = ?3",
            params![
                format_datetime(failed_at),
                error_message,
                email_id.to_string()
            ],
        )?;
        Ok(())
    }

    pub(crate) fn cancel_pending_emails(
        &self,
        execution_id: &Uuid,
    ) -> Result<usize, SchedulerError> {
        let conn = self.open()?;
        let changed = conn.execute(
            "UPDATE scheduled_emails SET status = 'cancelled'
             WHERE execution_id = ?1 AND status = 'pending'",
            params![execution_id.to_string()],
        )?;
        Ok(changed)
    }

    pub(crate) fn emails_for_execution(
        &self,
        execution_id: &Uuid,
    ) -> Result<Vec<ScheduledEmail>, SchedulerError> {
        let conn = self.open()?;
        let mut stmt = conn.prepare(
            "SELECT id, execution_id, step_order, status, tracking_id, scheduled_at, sent_at, failed_at, error_message, opened, open_count, click_count
             FROM scheduled_emails WHERE execution_id = ?1 ORDER BY scheduled_at",
        )?;
        let rows = stmt.query_map(params![execution_id.to_string()], email_row)?;
        let mut emails = Vec::new();
        for row in rows {
            emails.push(email_from_row(row?)?);
        }
        Ok(emails)
    }

    pub(crate) fn record_open(&self, tracking_id: &Uuid) -> Result<bool, SchedulerError> {
        let conn = self.open()?;
        let changed = conn.execute(
            "UPDATE scheduled_emails SET opened = 1, open_count = open_count + 1
             WHERE tracking_id = ?1",
            params![tracking_id.to_string()],
        )?;
        Ok(changed > 0)
    }

    pub(crate) fn record_click(&self, tracking_id: &Uuid) -> Result<bool, SchedulerError> {
        let conn = self.open()?;
        let changed = conn.execute(
            "UPDATE scheduled_emails SET click_count = click_count + 1 WHERE tracking_id = ?1",
            params![tracking_id.to_string()],
        )?;
        Ok(changed > 0)
    }

    pub(crate) fn sent_count_between(
        &self,
        sequence_id: &Uuid,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<u32, SchedulerError> {
        let conn = self.open()?;
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM scheduled_emails emails
             JOIN executions ON executions.id = emails.execution_id
             WHERE executions.sequence_id = ?1 AND emails.status = 'sent'
               AND emails.sent_at >= ?2 AND emails.sent_at <= ?3",
            params![
                sequence_id.to_string(),
                format_datetime(from),
                format_datetime(to)
            ],
            |row| row.get(0),
        )?;
        Ok(count as u32)
    }

    pub(crate) fn recent_sent_instants(
        &self,
        sequence_id: &Uuid,
        since: DateTime<Utc>,
    ) -> Result<Vec<DateTime<Utc>>, SchedulerError> {
        let conn = self.open()?;
        let mut stmt = conn.prepare(
            "SELECT emails.sent_at FROM scheduled_emails emails
             JOIN executions ON executions.id = emails.execution_id
             WHERE executions.sequence_id = ?1 AND emails.status = 'sent'
               AND emails.sent_at > ?2
             ORDER BY emails.sent_at",
        )?;
        let rows = stmt.query_map(
            params![sequence_id.to_string(), format_datetime(since)],
            |row| row.get::<_, String>(0),
        )?;
        let mut instants = Vec::new();
        for row in rows {
            instants.push(parse_datetime(&row?)?);
        }
        Ok(instants)
    }
}

type SequenceRow = (
    String,
    String,
    Option<String>,
    i64,
    String,
    Option<String>,
    Option<String>,
    i64,
    Option<i64>,
    Option<i64>,
    String,
);

fn sequence_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<SequenceRow> {
    Ok((
        row.get(0)?,
        row.get(1)?,
        row.get(2)?,
        row.get(3)?,
        row.get(4)?,
        row.get(5)?,
        row.get(6)?,
        row.get(7)?,
        row.get(8)?,
        row.get(9)?,
        row.get(10)?,
    ))
}

fn sequence_from_row(raw: SequenceRow) -> Result<Sequence, SchedulerError> {
    let (
        id_raw,
        name,
        description,
        active,
        timezone_raw,
        window_start,
        window_end,
        send_on_weekends,
        daily_limit,
        hourly_limit,
        created_at_raw,
    ) = raw;
    let timezone = timezone_raw
        .parse()
        .map_err(|_| SchedulerError::Timezone(timezone_raw.clone()))?;
    let send_window = match (window_start, window_end) {
        (Some(start), Some(end)) => Some(SendWindow {
            start: parse_time(&start)?,
            end: parse_time(&end)?,
        }),
        _ => None,
    };
    Ok(Sequence {
        id: Uuid::parse_str(&id_raw)?,
        name,
        description,
        active: active != 0,
        timezone,
        send_window,
        send_on_weekends: send_on_weekends != 0,
        daily_limit: daily_limit.map(|value| value as u32),
        hourly_limit: hourly_limit.map(|value| value as u32),
        created_at: parse_datetime(&created_at_raw)?,
    })
}

type ExecutionRow = (
    String,
    String,
    String,
    String,
    String,
    i64,
    Option<String>,
    i64,
    String,
    Option<String>,
    Option<String>,
);

fn execution_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<ExecutionRow> {
    Ok((
        row.get(0)?,
        row.get(1)?,
        row.get(2)?,
        row.get(3)?,
        row.get(4)?,
        row.get(5)?,
        row.get(6)?,
        row.get(7)?,
        row.get(8)?,
        row.get(9)?,
        row.get(10)?,
    ))
}

fn execution_from_row(raw: ExecutionRow) -> Result<SequenceExecution, SchedulerError> {
    let (
        id_raw,
        sequence_raw,
        contact_raw,
        contact_email,
        status_raw,
        current_step,
        due_at_raw,
        retry_count,
        started_at_raw,
        completed_at_raw,
        last_event_at_raw,
    ) = raw;
    Ok(SequenceExecution {
        id: Uuid::parse_str(&id_raw)?,
        sequence_id: Uuid::parse_str(&sequence_raw)?,
        contact_id: Uuid::parse_str(&contact_raw)?,
        contact_email,
        status: ExecutionStatus::parse(&status_raw)?,
        current_step: current_step as u32,
        next_action_due_at: parse_optional_datetime(due_at_raw.as_deref())?,
        retry_count: retry_count as u32,
        started_at: parse_datetime(&started_at_raw)?,
        completed_at: parse_optional_datetime(completed_at_raw.as_deref())?,
        last_event_at: parse_optional_datetime(last_event_at_raw.as_deref())?,
    })
}

type EmailRow = (
    String,
    String,
    i64,
    String,
    String,
    String,
    Option<String>,
    Option<String>,
    Option<String>,
    i64,
    i64,
    i64,
);

fn email_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<EmailRow> {
    Ok((
        row.get(0)?,
        row.get(1)?,
        row.get(2)?,
        row.get(3)?,
        row.get(4)?,
        row.get(5)?,
        row.get(6)?,
        row.get(7)?,
        row.get(8)?,
        row.get(9)?,
        row.get(10)?,
        row.get(11)?,
    ))
}

fn email_from_row(raw: EmailRow) -> Result<ScheduledEmail, SchedulerError> {
    let (
        id_raw,
        execution_raw,
        step_order,
        status_raw,
        tracking_raw,
        scheduled_at_raw,
        sent_at_raw,
        failed_at_raw,
        error_message,
        opened,
        open_count,
        click_count,
    ) = raw;
    Ok(ScheduledEmail {
        id: Uuid::parse_str(&id_raw)?,
        execution_id: Uuid::parse_str(&execution_raw)?,
        step_order: step_order as u32,
        status: EmailStatus::parse(&status_raw)?,
        tracking_id: Uuid::parse_str(&tracking_raw)?,
        scheduled_at: parse_datetime(&scheduled_at_raw)?,
        sent_at: parse_optional_datetime(sent_at_raw.as_deref())?,
        failed_at: parse_optional_datetime(failed_at_raw.as_deref())?,
        error_message,
        opened: opened != 0,
        open_count: open_count as u32,
        click_count: click_count as u32,
    })
}
