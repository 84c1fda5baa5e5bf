use chrono::{DateTime, Utc};
use tracing::{info, warn};
use uuid::Uuid;

use super::core::Scheduler;
use super::schedule::{due_for_step, next_step};
use super::transport::EmailTransport;
use super::types::{ExecutionStatus, SchedulerError, SequenceStep, StepKind};

/// Inbound signal from the mailbox or tracking pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    Reply,
    Bounce,
    Open,
    Click,
}

#[derive(Debug, Clone)]
pub struct SequenceEvent {
    pub contact_id: Uuid,
    /// Restricts the event to one sequence; a reply without it terminates
    /// every open execution the contact has.
    pub sequence_id: Option<Uuid>,
    pub kind: EventKind,
    pub at: DateTime<Utc>,
    pub tracking_id: Option<Uuid>,
}

pub(super) fn apply_event<T: EmailTransport>(
    scheduler: &Scheduler<T>,
    event: &SequenceEvent,
) -> Result<(), SchedulerError> {
    match event.kind {
        EventKind::Reply => apply_reply(scheduler, event),
        EventKind::Bounce => apply_bounce(scheduler, event),
        EventKind::Open | EventKind::Click => apply_tracking(scheduler, event),
    }
}

fn apply_reply<T: EmailTransport>(
    scheduler: &Scheduler<T>,
    event: &SequenceEvent,
) -> Result<(), SchedulerError> {
    let executions = scheduler
        .store
        .open_executions_for_contact(&event.contact_id, event.sequence_id.as_ref())?;
    if executions.is_empty() {
        info!(
            "reply from contact {} matched no open execution",
            event.contact_id
        );
        return Ok(());
    }

    for mut execution in executions {
        let Some((sequence, steps)) = scheduler.store.load_sequence(&execution.sequence_id)? else {
            warn!(
                "execution {} references missing sequence {}",
                execution.id, execution.sequence_id
            );
            continue;
        };

        if execution.status == ExecutionStatus::Paused {
            // Paused executions only note the reply; pause wins.
            execution.last_event_at = Some(event.at);
            scheduler.store.update_execution(&execution)?;
            continue;
        }

        let pending = next_step(&steps, execution.current_step);
        if reply_terminates(&steps, execution.current_step) {
            execution.status = ExecutionStatus::Replied;
            execution.next_action_due_at = None;
            execution.completed_at = Some(event.at);
            execution.last_event_at = Some(event.at);
            scheduler.store.update_execution(&execution)?;
            scheduler.store.cancel_pending_emails(&execution.id)?;
            info!(
                "execution {} terminated by reply from contact {}",
                execution.id, event.contact_id
            );
            continue;
        }

        if let Some(step) = pending {
            if matches!(step.kind, StepKind::WaitForReply { .. }) {
                // The reply satisfies the wait; the follow-on step is timed
                // from the reply, not from the original grace deadline.
                execution.current_step = step.order;
                execution.retry_count = 0;
                execution.last_event_at = Some(event.at);
                match next_step(&steps, execution.current_step) {
                    Some(next) => {
                        execution.next_action_due_at =
                            Some(due_for_step(event.at, next, &sequence));
                    }
                    None => {
                        execution.status = ExecutionStatus::Completed;
                        execution.next_action_due_at = None;
                        execution.completed_at = Some(event.at);
                    }
                }
                scheduler.store.update_execution(&execution)?;
                continue;
            }
        }

        execution.last_event_at = Some(event.at);
        scheduler.store.update_execution(&execution)?;
    }
    Ok(())
}

/// A reply terminates an execution when the pending step (or any earlier one)
/// opted in to skip-if-replied.
fn reply_terminates(steps: &[SequenceStep], current_step: u32) -> bool {
    steps
        .iter()
        .any(|step| step.order <= current_step + 1 && step.skip_if_replied)
}

fn apply_bounce<T: EmailTransport>(
    scheduler: &Scheduler<T>,
    event: &SequenceEvent,
) -> Result<(), SchedulerError> {
    let executions = scheduler
        .store
        .open_executions_for_contact(&event.contact_id, event.sequence_id.as_ref())?;
    for mut execution in executions {
        execution.status = ExecutionStatus::Failed;
        execution.next_action_due_at = None;
        execution.completed_at = Some(event.at);
        execution.last_event_at = Some(event.at);
        scheduler.store.update_execution(&execution)?;
        scheduler.store.cancel_pending_emails(&execution.id)?;
        warn!(
            "execution {} failed: address for contact {} bounced",
            execution.id, event.contact_id
        );
    }
    Ok(())
}

fn apply_tracking<T: EmailTransport>(
    scheduler: &Scheduler<T>,
    event: &SequenceEvent,
) -> Result<(), SchedulerError> {
    let Some(tracking_id) = event.tracking_id else {
        warn!("tracking event without a tracking id, dropping");
        return Ok(());
    };
    let recorded = match event.kind {
        EventKind::Open => scheduler.store.record_open(&tracking_id)?,
        _ => scheduler.store.record_click(&tracking_id)?,
    };
    if !recorded {
        warn!("tracking id {tracking_id} matched no scheduled email");
    }
    Ok(())
}
