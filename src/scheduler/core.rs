use chrono::{DateTime, Duration as ChronoDuration, Utc};
use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::thread;
use std::time::Duration;
use tracing::{error, info, warn};
use uuid::Uuid;

use super::events::{apply_event, SequenceEvent};
use super::schedule::{due_for_step, local_day_start, next_step, resolve_next_send_instant};
use super::store::SqliteSequenceStore;
use super::throttle::{Admission, RateLimiter};
use super::transport::{EmailTransport, SendRequest};
use super::types::{
    Contact, EmailStatus, ExecutionStatus, NewSequence, ScheduledEmail, SchedulerError, Sequence,
    SequenceExecution, SequenceStep, StepKind, HOURLY_WINDOW_MINUTES, RETRY_BACKOFF_MINUTES,
    SEND_FAILURE_LIMIT,
};

const POLL_BATCH_LIMIT: usize = 64;
const DISPATCH_WORKERS: usize = 4;

/// Sequence engine over one SQLite file. The transport is the only
/// collaborator that touches the outside world.
pub struct Scheduler<T: EmailTransport> {
    pub(super) store: SqliteSequenceStore,
    transport: T,
    limiter: RateLimiter,
}

impl<T: EmailTransport> Scheduler<T> {
    pub fn load(db_path: PathBuf, transport: T) -> Result<Self, SchedulerError> {
        Self::load_at(db_path, transport, Utc::now())
    }

    /// Opens the database, clears in-flight markers left by a crash, and
    /// rebuilds throttle counters from the persisted send log.
    pub fn load_at(
        db_path: PathBuf,
        transport: T,
        now: DateTime<Utc>,
    ) -> Result<Self, SchedulerError> {
        let store = SqliteSequenceStore::new(db_path)?;
        let recovered = store.clear_in_flight()?;
        if recovered > 0 {
            warn!("cleared {recovered} stale in-flight markers");
        }
        let orphaned = store.cancel_orphaned_pending_emails()?;
        if orphaned > 0 {
            warn!("cancelled {orphaned} scheduled emails interrupted mid-dispatch");
        }

        // Inactive sequences keep their counters too: reactivation mid-day
        // must not grant a fresh daily budget.
        let limiter = RateLimiter::new();
        for sequence in store.sequences()? {
            let day_start = local_day_start(now, sequence.timezone);
            let sent_today = store.sent_count_between(&sequence.id, day_start, now)?;
            let recent = store.recent_sent_instants(
                &sequence.id,
                now - ChronoDuration::minutes(HOURLY_WINDOW_MINUTES),
            )?;
            limiter.preload(
                sequence.id,
                now.with_timezone(&sequence.timezone).date_naive(),
                sent_today,
                recent,
            );
        }

        Ok(Self {
            store,
            transport,
            limiter,
        })
    }

    pub fn create_sequence(&self, new: NewSequence) -> Result<Uuid, SchedulerError> {
        new.validate()?;
        let sequence_id = Uuid::new_v4();
        let sequence = Sequence {
            id: sequence_id,
            name: new.name,
            description: new.description,
            active: true,
            timezone: new.timezone,
            send_window: new.send_window,
            send_on_weekends: new.send_on_weekends,
            daily_limit: new.daily_limit,
            hourly_limit: new.hourly_limit,
            created_at: Utc::now(),
        };
        let steps: Vec<SequenceStep> = new
            .steps
            .into_iter()
            .map(|step| SequenceStep {
                id: Uuid::new_v4(),
                sequence_id,
                order: step.order,
                kind: step.kind,
                delay: step.delay,
                skip_if_replied: step.skip_if_replied,
                track_opens: step.track_opens,
                track_clicks: step.track_clicks,
            })
            .collect();
        self.store.insert_sequence(&sequence, &steps)?;
        info!("created sequence {} ({} steps)", sequence_id, steps.len());
        Ok(sequence_id)
    }

    pub fn sequence(
        &self,
        sequence_id: &Uuid,
    ) -> Result<Option<(Sequence, Vec<SequenceStep>)>, SchedulerError> {
        self.store.load_sequence(sequence_id)
    }

    /// Deactivation also pauses the sequence's active executions so the poll
    /// loop stops picking them up; reactivating does not resume them.
    pub fn set_sequence_active(
        &self,
        sequence_id: &Uuid,
        active: bool,
    ) -> Result<(), SchedulerError> {
        if !self.store.set_sequence_active(sequence_id, active)? {
            return Err(SchedulerError::SequenceNotFound(*sequence_id));
        }
        if !active {
            for mut execution in self.store.active_executions_for_sequence(sequence_id)? {
                execution.status = ExecutionStatus::Paused;
                execution.next_action_due_at = None;
                self.store.update_execution(&execution)?;
            }
        }
        Ok(())
    }

    pub fn delete_sequence(&self, sequence_id: &Uuid) -> Result<(), SchedulerError> {
        if !self.store.delete_sequence(sequence_id)? {
            return Err(SchedulerError::SequenceNotFound(*sequence_id));
        }
        Ok(())
    }

    pub fn enroll(&self, sequence_id: &Uuid, contact: &Contact) -> Result<Uuid, SchedulerError> {
        self.enroll_at(sequence_id, contact, Utc::now())
    }

    pub fn enroll_at(
        &self,
        sequence_id: &Uuid,
        contact: &Contact,
        now: DateTime<Utc>,
    ) -> Result<Uuid, SchedulerError> {
        let (sequence, steps) = self
            .store
            .load_sequence(sequence_id)?
            .ok_or(SchedulerError::SequenceNotFound(*sequence_id))?;
        if !sequence.active {
            return Err(SchedulerError::SequenceInactive(*sequence_id));
        }
        if self.store.has_open_execution(sequence_id, &contact.id)? {
            return Err(SchedulerError::AlreadyEnrolled {
                sequence_id: *sequence_id,
                contact_id: contact.id,
            });
        }
        let first = next_step(&steps, 0).ok_or_else(|| {
            SchedulerError::Storage(format!("sequence {sequence_id} has no steps"))
        })?;
        let execution = SequenceExecution {
            id: Uuid::new_v4(),
            sequence_id: *sequence_id,
            contact_id: contact.id,
            contact_email: contact.email.clone(),
            status: ExecutionStatus::Active,
            current_step: 0,
            next_action_due_at: Some(due_for_step(now, first, &sequence)),
            retry_count: 0,
            started_at: now,
            completed_at: None,
            last_event_at: None,
        };
        self.store.insert_execution(&execution)?;
        info!(
            "enrolled contact {} in sequence {} as execution {}",
            contact.id, sequence_id, execution.id
        );
        Ok(execution.id)
    }

    pub fn execution(
        &self,
        execution_id: &Uuid,
    ) -> Result<Option<SequenceExecution>, SchedulerError> {
        self.store.load_execution(execution_id)
    }

    pub fn emails_for_execution(
        &self,
        execution_id: &Uuid,
    ) -> Result<Vec<ScheduledEmail>, SchedulerError> {
        self.store.emails_for_execution(execution_id)
    }

    pub fn pause_execution(&self, execution_id: &Uuid) -> Result<(), SchedulerError> {
        let mut execution = self.load_open_execution(execution_id)?;
        execution.status = ExecutionStatus::Paused;
        execution.next_action_due_at = None;
        self.store.update_execution(&execution)
    }

    pub fn resume_execution(&self, execution_id: &Uuid) -> Result<(), SchedulerError> {
        self.resume_execution_at(execution_id, Utc::now())
    }

    /// Reschedules the pending step from the resume instant; the original
    /// delay is not applied again.
    pub fn resume_execution_at(
        &self,
        execution_id: &Uuid,
        now: DateTime<Utc>,
    ) -> Result<(), SchedulerError> {
        let mut execution = self.load_open_execution(execution_id)?;
        if execution.status == ExecutionStatus::Active {
            return Ok(());
        }
        let (sequence, steps) = self
            .store
            .load_sequence(&execution.sequence_id)?
            .ok_or(SchedulerError::SequenceNotFound(execution.sequence_id))?;

        execution.status = ExecutionStatus::Active;
        match next_step(&steps, execution.current_step) {
            Some(step) => {
                execution.next_action_due_at = Some(match &step.kind {
                    StepKind::Email { .. } => resolve_next_send_instant(
                        now,
                        sequence.timezone,
                        sequence.send_window.as_ref(),
                        sequence.send_on_weekends,
                    ),
                    StepKind::WaitForReply { grace_hours } => {
                        now + ChronoDuration::hours(*grace_hours as i64)
                    }
                    StepKind::Conditional => now,
                });
            }
            None => {
                execution.status = ExecutionStatus::Completed;
                execution.next_action_due_at = None;
                execution.completed_at = Some(now);
            }
        }
        self.store.update_execution(&execution)
    }

    pub fn cancel_execution(&self, execution_id: &Uuid) -> Result<(), SchedulerError> {
        let mut execution = self.load_open_execution(execution_id)?;
        execution.status = ExecutionStatus::Cancelled;
        execution.next_action_due_at = None;
        execution.completed_at = Some(Utc::now());
        self.store.update_execution(&execution)?;
        self.store.cancel_pending_emails(execution_id)?;
        Ok(())
    }

    fn load_open_execution(
        &self,
        execution_id: &Uuid,
    ) -> Result<SequenceExecution, SchedulerError> {
        let execution = self
            .store
            .load_execution(execution_id)?
            .ok_or(SchedulerError::ExecutionNotFound(*execution_id))?;
        if execution.status.is_terminal() {
            return Err(SchedulerError::TerminalExecution(*execution_id));
        }
        Ok(execution)
    }

    pub fn handle_event(&self, event: &SequenceEvent) -> Result<(), SchedulerError> {
        apply_event(self, event)
    }

    pub fn tick(&self) -> Result<usize, SchedulerError>
    where
        T: Sync,
    {
        self.tick_at(Utc::now())
    }

    /// One poll cycle: claim the due batch, then fan the work out across a
    /// bounded set of workers so a slow transport call cannot stall the rest
    /// of the batch. The in-flight claim keeps each execution on exactly one
    /// worker; admission stays serialized inside the limiter. A failure in
    /// one execution is logged and does not stop the others.
    pub fn tick_at(&self, now: DateTime<Utc>) -> Result<usize, SchedulerError>
    where
        T: Sync,
    {
        let due = self.store.due_executions(now, POLL_BATCH_LIMIT)?;
        let mut claimed = VecDeque::with_capacity(due.len());
        for execution in due {
            if self.store.claim_execution(&execution.id)? {
                claimed.push_back(execution.id);
            }
        }
        if claimed.is_empty() {
            return Ok(0);
        }

        let workers = DISPATCH_WORKERS.min(claimed.len());
        let queue = Mutex::new(claimed);
        let processed = AtomicUsize::new(0);
        thread::scope(|scope| {
            for _ in 0..workers {
                scope.spawn(|| loop {
                    let next = queue
                        .lock()
                        .unwrap_or_else(|poison| poison.into_inner())
                        .pop_front();
                    let Some(execution_id) = next else {
                        break;
                    };
                    let result = self.process_due_execution(&execution_id, now);
                    if let Err(err) = self.store.release_execution(&execution_id) {
                        error!("execution {execution_id} failed to release its claim: {err}");
                    }
                    match result {
                        Ok(()) => {
                            processed.fetch_add(1, Ordering::SeqCst);
                        }
                        Err(err) => error!("execution {execution_id} failed to process: {err}"),
                    }
                });
            }
        });
        Ok(processed.load(Ordering::SeqCst))
    }

    fn process_due_execution(
        &self,
        execution_id: &Uuid,
        now: DateTime<Utc>,
    ) -> Result<(), SchedulerError> {
        // Re-read under the claim; a cancel or event may have landed since
        // the poll query.
        let Some(execution) = self.store.load_execution(execution_id)? else {
            return Ok(());
        };
        if execution.status != ExecutionStatus::Active {
            return Ok(());
        }
        let Some(due) = execution.next_action_due_at else {
            return Ok(());
        };
        if due > now {
            return Ok(());
        }

        let (sequence, steps) = self
            .store
            .load_sequence(&execution.sequence_id)?
            .ok_or(SchedulerError::SequenceNotFound(execution.sequence_id))?;
        let Some(step) = next_step(&steps, execution.current_step) else {
            return self.complete(execution, now);
        };

        match &step.kind {
            StepKind::WaitForReply { .. } => {
                // Grace expired without a reply.
                info!(
                    "execution {} wait step {} timed out, advancing",
                    execution.id, step.order
                );
                self.advance(execution, &sequence, &steps, step.order, now)
            }
            StepKind::Conditional => self.advance(execution, &sequence, &steps, step.order, now),
            StepKind::Email { subject, body } => match self.limiter.try_admit(&sequence, now) {
                Admission::DeferUntil(until) => {
                    let mut execution = execution;
                    execution.next_action_due_at = Some(until);
                    self.store.update_execution(&execution)
                }
                Admission::Admitted => {
                    self.dispatch_email(execution, &sequence, &steps, step, subject, body, now)
                }
            },
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn dispatch_email(
        &self,
        execution: SequenceExecution,
        sequence: &Sequence,
        steps: &[SequenceStep],
        step: &SequenceStep,
        subject: &str,
        body: &str,
        now: DateTime<Utc>,
    ) -> Result<(), SchedulerError> {
        let email = ScheduledEmail {
            id: Uuid::new_v4(),
            execution_id: execution.id,
            step_order: step.order,
            status: EmailStatus::Pending,
            tracking_id: Uuid::new_v4(),
            scheduled_at: now,
            sent_at: None,
            failed_at: None,
            error_message: None,
            opened: false,
            open_count: 0,
            click_count: 0,
        };
        self.store.insert_scheduled_email(&email)?;

        let request = SendRequest {
            scheduled_email_id: email.id,
            recipient: execution.contact_email.clone(),
            subject: subject.to_string(),
            body: body.to_string(),
            tracking_id: email.tracking_id,
            track_opens: step.track_opens,
            track_clicks: step.track_clicks,
        };

        match self.transport.send(&request) {
            Ok(()) => {
                self.store.mark_email_sent(&email.id, now)?;
                // A cancel or reply may have raced the send; the email stays
                // recorded but the execution is left alone.
                let Some(fresh) = self.store.load_execution(&execution.id)? else {
                    return Ok(());
                };
                if fresh.status != ExecutionStatus::Active {
                    return Ok(());
                }
                self.advance(fresh, sequence, steps, step.order, now)
            }
            Err(err) => {
                self.store.mark_email_failed(&email.id, now, &err.to_string())?;
                let Some(mut fresh) = self.store.load_execution(&execution.id)? else {
                    return Ok(());
                };
                if fresh.status != ExecutionStatus::Active {
                    return Ok(());
                }
                if err.is_fatal() {
                    warn!(
                        "execution {} send failed permanently: {err}",
                        execution.id
                    );
                    return self.fail(fresh, now);
                }
                fresh.retry_count += 1;
                if fresh.retry_count >= SEND_FAILURE_LIMIT {
                    warn!(
                        "execution {} exhausted {} send attempts: {err}",
                        execution.id, SEND_FAILURE_LIMIT
                    );
                    return self.fail(fresh, now);
                }
                let backoff =
                    ChronoDuration::minutes(RETRY_BACKOFF_MINUTES * fresh.retry_count as i64);
                fresh.next_action_due_at = Some(now + backoff);
                warn!(
                    "execution {} send attempt {} failed, retrying in {backoff}: {err}",
                    execution.id, fresh.retry_count
                );
                self.store.update_execution(&fresh)
            }
        }
    }

    fn advance(
        &self,
        mut execution: SequenceExecution,
        sequence: &Sequence,
        steps: &[SequenceStep],
        completed_order: u32,
        now: DateTime<Utc>,
    ) -> Result<(), SchedulerError> {
        execution.current_step = completed_order;
        execution.retry_count = 0;
        match next_step(steps, completed_order) {
            Some(next) => {
                execution.next_action_due_at = Some(due_for_step(now, next, sequence));
                self.store.update_execution(&execution)
            }
            None => self.complete(execution, now),
        }
    }

    fn complete(
        &self,
        mut execution: SequenceExecution,
        now: DateTime<Utc>,
    ) -> Result<(), SchedulerError> {
        execution.status = ExecutionStatus::Completed;
        execution.next_action_due_at = None;
        execution.completed_at = Some(now);
        self.store.update_execution(&execution)?;
        info!("execution {} completed", execution.id);
        Ok(())
    }

    fn fail(
        &self,
        mut execution: SequenceExecution,
        now: DateTime<Utc>,
    ) -> Result<(), SchedulerError> {
        execution.status = ExecutionStatus::Failed;
        execution.next_action_due_at = None;
        execution.completed_at = Some(now);
        self.store.update_execution(&execution)?;
        self.store.cancel_pending_emails(&execution.id)?;
        Ok(())
    }

    /// Polls until `running` is cleared. Storage-level errors stop the loop;
    /// per-execution errors are already contained inside `tick`.
    pub fn run_loop(
        &self,
        poll_interval: Duration,
        running: &AtomicBool,
    ) -> Result<(), SchedulerError>
    where
        T: Sync,
    {
        info!("scheduler loop started, polling every {poll_interval:?}");
        while running.load(Ordering::SeqCst) {
            self.tick()?;
            thread::sleep(poll_interval);
        }
        info!("scheduler loop stopped");
        Ok(())
    }
}
