use chrono::{DateTime, NaiveTime, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub(crate) const SEND_FAILURE_LIMIT: u32 = 3;
pub(crate) const RETRY_BACKOFF_MINUTES: i64 = 5;
pub(crate) const HOURLY_WINDOW_MINUTES: i64 = 60;

/// Local time-of-day range during which a sequence may send.
///
/// `start <= end`; overnight windows are rejected at the configuration
/// boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SendWindow {
    pub start: NaiveTime,
    pub end: NaiveTime,
}

/// A timezone-scoped automation definition shared read-only by its executions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Sequence {
    pub id: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub active: bool,
    pub timezone: Tz,
    pub send_window: Option<SendWindow>,
    pub send_on_weekends: bool,
    pub daily_limit: Option<u32>,
    pub hourly_limit: Option<u32>,
    pub created_at: DateTime<Utc>,
}

/// Additive offset from the previous step's completion.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepDelay {
    pub days: u32,
    pub hours: u32,
    pub minutes: u32,
}

impl StepDelay {
    pub const fn none() -> Self {
        Self {
            days: 0,
            hours: 0,
            minutes: 0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StepKind {
    Email { subject: String, body: String },
    /// Hold the execution for `grace_hours` after the delay elapses; a reply
    /// satisfies the wait early, a timeout auto-advances without sending.
    WaitForReply { grace_hours: u32 },
    /// No-send checkpoint; advances after its delay.
    Conditional,
}

impl StepKind {
    pub(crate) fn label(&self) -> &'static str {
        match self {
            StepKind::Email { .. } => "email",
            StepKind::WaitForReply { .. } => "wait_for_reply",
            StepKind::Conditional => "conditional",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SequenceStep {
    pub id: Uuid,
    pub sequence_id: Uuid,
    pub order: u32,
    pub kind: StepKind,
    pub delay: StepDelay,
    pub skip_if_replied: bool,
    pub track_opens: bool,
    pub track_clicks: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Contact {
    pub id: Uuid,
    pub email: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    Active,
    Paused,
    Completed,
    Replied,
    Failed,
    Cancelled,
}

impl ExecutionStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            ExecutionStatus::Completed
                | ExecutionStatus::Replied
                | ExecutionStatus::Failed
                | ExecutionStatus::Cancelled
        )
    }

    pub(crate) fn as_str(self) -> &'static str {
        match self {
            ExecutionStatus::Active => "active",
            ExecutionStatus::Paused => "paused",
            ExecutionStatus::Completed => "completed",
            ExecutionStatus::Replied => "replied",
            ExecutionStatus::Failed => "failed",
            ExecutionStatus::Cancelled => "cancelled",
        }
    }

    pub(crate) fn parse(raw: &str) -> Result<Self, SchedulerError> {
        match raw {
            "active" => Ok(ExecutionStatus::Active),
            "paused" => Ok(ExecutionStatus::Paused),
            "completed" => Ok(ExecutionStatus::Completed),
            "replied" => Ok(ExecutionStatus::Replied),
            "failed" => Ok(ExecutionStatus::Failed),
            "cancelled" => Ok(ExecutionStatus::Cancelled),
            other => Err(SchedulerError::Storage(format!(
                "unknown execution status {other}"
            ))),
        }
    }
}

/// The run of one contact through one sequence.
///
/// `current_step` is the order of the last completed step (0 before any step
/// has completed); the pending step is the next order above it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SequenceExecution {
    pub id: Uuid,
    pub sequence_id: Uuid,
    pub contact_id: Uuid,
    pub contact_email: String,
    pub status: ExecutionStatus,
    pub current_step: u32,
    pub next_action_due_at: Option<DateTime<Utc>>,
    pub retry_count: u32,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub last_event_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EmailStatus {
    Pending,
    Sent,
    Failed,
    Cancelled,
}

impl EmailStatus {
    pub(crate) fn as_str(self) -> &'static str {
        match self {
            EmailStatus::Pending => "pending",
            EmailStatus::Sent => "sent",
            EmailStatus::Failed => "failed",
            EmailStatus::Cancelled => "cancelled",
        }
    }

    pub(crate) fn parse(raw: &str) -> Result<Self, SchedulerError> {
        match raw {
            "pending" => Ok(EmailStatus::Pending),
            "sent" => Ok(EmailStatus::Sent),
            "failed" => Ok(EmailStatus::Failed),
            "cancelled" => Ok(EmailStatus::Cancelled),
            other => Err(SchedulerError::Storage(format!(
                "unknown email status {other}"
            ))),
        }
    }
}

/// One materialized send attempt; executions keep these as an append-only log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduledEmail {
    pub id: Uuid,
    pub execution_id: Uuid,
    pub step_order: u32,
    pub status: EmailStatus,
    pub tracking_id: Uuid,
    pub scheduled_at: DateTime<Utc>,
    pub sent_at: Option<DateTime<Utc>>,
    pub failed_at: Option<DateTime<Utc>>,
    pub error_message: Option<String>,
    pub opened: bool,
    pub open_count: u32,
    pub click_count: u32,
}

/// Input for `create_sequence`; validated before anything is persisted.
#[derive(Debug, Clone)]
pub struct NewSequence {
    pub name: String,
    pub description: Option<String>,
    pub timezone: Tz,
    pub send_window: Option<SendWindow>,
    pub send_on_weekends: bool,
    pub daily_limit: Option<u32>,
    pub hourly_limit: Option<u32>,
    pub steps: Vec<NewStep>,
}

#[derive(Debug, Clone)]
pub struct NewStep {
    pub order: u32,
    pub kind: StepKind,
    pub delay: StepDelay,
    pub skip_if_replied: bool,
    pub track_opens: bool,
    pub track_clicks: bool,
}

impl NewSequence {
    pub(crate) fn validate(&self) -> Result<(), ConfigError> {
        if self.steps.is_empty() {
            return Err(ConfigError::EmptySequence);
        }
        if let Some(window) = &self.send_window {
            if window.start > window.end {
                return Err(ConfigError::WindowInverted {
                    start: window.start,
                    end: window.end,
                });
            }
        }
        for (index, step) in self.steps.iter().enumerate() {
            let expected = index as u32 + 1;
            if step.order != expected {
                return Err(ConfigError::NonContiguousStepOrder {
                    expected,
                    found: step.order,
                });
            }
            match &step.kind {
                StepKind::Email { subject, body } => {
                    if subject.trim().is_empty() || body.trim().is_empty() {
                        return Err(ConfigError::MissingEmailContent(step.order));
                    }
                }
                StepKind::WaitForReply { grace_hours } => {
                    if *grace_hours == 0 {
                        return Err(ConfigError::MissingWaitGrace(step.order));
                    }
                }
                StepKind::Conditional => {}
            }
        }
        Ok(())
    }
}

/// Structural violations rejected at the configuration boundary; nothing
/// malformed reaches the scheduler.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("sequence has no steps")]
    EmptySequence,
    #[error("step orders must be contiguous from 1 (expected {expected}, found {found})")]
    NonContiguousStepOrder { expected: u32, found: u32 },
    #[error("send window start {start} is after end {end}")]
    WindowInverted { start: NaiveTime, end: NaiveTime },
    #[error("email step {0} is missing a subject or body")]
    MissingEmailContent(u32),
    #[error("wait_for_reply step {0} has a zero grace period")]
    MissingWaitGrace(u32),
}

#[derive(Debug, thiserror::Error)]
pub enum SchedulerError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("datetime parse error: {0}")]
    DateTimeParse(#[from] chrono::ParseError),
    #[error("uuid parse error: {0}")]
    UuidParse(#[from] uuid::Error),
    #[error("storage error: {0}")]
    Storage(String),
    #[error("unknown timezone: {0}")]
    Timezone(String),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("sequence {0} not found")]
    SequenceNotFound(Uuid),
    #[error("sequence {0} is inactive")]
    SequenceInactive(Uuid),
    #[error("execution {0} not found")]
    ExecutionNotFound(Uuid),
    #[error("execution {0} is in a terminal state")]
    TerminalExecution(Uuid),
    #[error("contact {contact_id} already has an open execution in sequence {sequence_id}")]
    AlreadyEnrolled {
        sequence_id: Uuid,
        contact_id: Uuid,
    },
}
