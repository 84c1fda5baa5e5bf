use chrono::{DateTime, Duration, NaiveTime, Utc};
use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tempfile::TempDir;
use uuid::Uuid;

use super::{
    Contact, EmailStatus, EmailTransport, EventKind, ExecutionStatus, NewSequence, NewStep,
    Scheduler, SchedulerError, SendRequest, SendWindow, SequenceEvent, StepDelay, StepKind,
    TransportError,
};

#[derive(Default)]
struct RecordingTransport {
    sent: Mutex<Vec<SendRequest>>,
    failures: Mutex<VecDeque<TransportError>>,
    panic_next: AtomicBool,
}

impl RecordingTransport {
    fn fail_next(&self, err: TransportError) {
        self.failures.lock().expect("failures lock").push_back(err);
    }

    fn panic_once(&self) {
        self.panic_next.store(true, Ordering::SeqCst);
    }

    fn sent(&self) -> Vec<SendRequest> {
        self.sent.lock().expect("sent lock").clone()
    }
}

impl EmailTransport for RecordingTransport {
    fn send(&self, request: &SendRequest) -> Result<(), TransportError> {
        if self.panic_next.swap(false, Ordering::SeqCst) {
            panic!("transport died mid-send");
        }
        if let Some(err) = self.failures.lock().expect("failures lock").pop_front() {
            return Err(err);
        }
        self.sent.lock().expect("sent lock").push(request.clone());
        Ok(())
    }
}

fn instant(raw: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(raw)
        .expect("timestamp")
        .with_timezone(&Utc)
}

// 2026-08-19 is a Wednesday.
fn t0() -> DateTime<Utc> {
    instant("2026-08-19T10:00:00+00:00")
}

fn window(start: &str, end: &str) -> SendWindow {
    SendWindow {
        start: NaiveTime::parse_from_str(start, "%H:%M").expect("start"),
        end: NaiveTime::parse_from_str(end, "%H:%M").expect("end"),
    }
}

fn email_step(order: u32, delay: StepDelay) -> NewStep {
    NewStep {
        order,
        kind: StepKind::Email {
            subject: format!("step {order}"),
            body: "hello".to_string(),
        },
        delay,
        skip_if_replied: false,
        track_opens: true,
        track_clicks: true,
    }
}

fn wait_step(order: u32, grace_hours: u32) -> NewStep {
    NewStep {
        order,
        kind: StepKind::WaitForReply { grace_hours },
        delay: StepDelay::none(),
        skip_if_replied: false,
        track_opens: false,
        track_clicks: false,
    }
}

fn hour_delay(hours: u32) -> StepDelay {
    StepDelay {
        days: 0,
        hours,
        minutes: 0,
    }
}

fn base_sequence(steps: Vec<NewStep>) -> NewSequence {
    NewSequence {
        name: "outreach".to_string(),
        description: None,
        timezone: chrono_tz::UTC,
        send_window: None,
        send_on_weekends: true,
        daily_limit: None,
        hourly_limit: None,
        steps,
    }
}

fn contact(email: &str) -> Contact {
    Contact {
        id: Uuid::new_v4(),
        email: email.to_string(),
    }
}

fn reply(contact_id: Uuid, sequence_id: Uuid, at: DateTime<Utc>) -> SequenceEvent {
    SequenceEvent {
        contact_id,
        sequence_id: Some(sequence_id),
        kind: EventKind::Reply,
        at,
        tracking_id: None,
    }
}

struct Harness {
    _temp: TempDir,
    db_path: PathBuf,
    transport: Arc<RecordingTransport>,
    scheduler: Scheduler<Arc<RecordingTransport>>,
}

fn harness_at(now: DateTime<Utc>) -> Harness {
    let temp = TempDir::new().expect("tempdir");
    let db_path = temp.path().join("sequences.db");
    let transport = Arc::new(RecordingTransport::default());
    let scheduler =
        Scheduler::load_at(db_path.clone(), transport.clone(), now).expect("load scheduler");
    Harness {
        _temp: temp,
        db_path,
        transport,
        scheduler,
    }
}

fn harness() -> Harness {
    harness_at(t0())
}

#[test]
fn enrollment_schedules_the_first_step() {
    let h = harness();
    let sequence_id = h
        .scheduler
        .create_sequence(base_sequence(vec![email_step(1, hour_delay(1))]))
        .expect("create");
    let contact = contact("ada@example.com");
    let execution_id = h
        .scheduler
        .enroll_at(&sequence_id, &contact, t0())
        .expect("enroll");

    let execution = h
        .scheduler
        .execution(&execution_id)
        .expect("load")
        .expect("exists");
    assert_eq!(execution.status, ExecutionStatus::Active);
    assert_eq!(execution.current_step, 0);
    assert_eq!(execution.next_action_due_at, Some(t0() + Duration::hours(1)));
}

#[test]
fn ticks_walk_the_sequence_to_completion() {
    let h = harness();
    let sequence_id = h
        .scheduler
        .create_sequence(base_sequence(vec![
            email_step(1, StepDelay::none()),
            email_step(2, hour_delay(1)),
            email_step(3, hour_delay(1)),
        ]))
        .expect("create");
    let contact = contact("ada@example.com");
    let execution_id = h
        .scheduler
        .enroll_at(&sequence_id, &contact, t0())
        .expect("enroll");

    assert_eq!(h.scheduler.tick_at(t0()).expect("tick 1"), 1);
    assert_eq!(
        h.scheduler.tick_at(t0() + Duration::hours(1)).expect("tick 2"),
        1
    );
    assert_eq!(
        h.scheduler.tick_at(t0() + Duration::hours(2)).expect("tick 3"),
        1
    );

    let sent = h.transport.sent();
    assert_eq!(sent.len(), 3);
    assert_eq!(sent[0].subject, "step 1");
    assert_eq!(sent[2].subject, "step 3");
    assert!(sent.iter().all(|request| request.recipient == contact.email));

    let execution = h
        .scheduler
        .execution(&execution_id)
        .expect("load")
        .expect("exists");
    assert_eq!(execution.status, ExecutionStatus::Completed);
    assert_eq!(execution.next_action_due_at, None);
    assert!(execution.completed_at.is_some());

    let emails = h
        .scheduler
        .emails_for_execution(&execution_id)
        .expect("emails");
    assert_eq!(emails.len(), 3);
    assert!(emails.iter().all(|email| email.status == EmailStatus::Sent));
}

#[test]
fn tick_before_due_sends_nothing() {
    let h = harness();
    let sequence_id = h
        .scheduler
        .create_sequence(base_sequence(vec![email_step(1, hour_delay(1))]))
        .expect("create");
    h.scheduler
        .enroll_at(&sequence_id, &contact("ada@example.com"), t0())
        .expect("enroll");

    assert_eq!(h.scheduler.tick_at(t0()).expect("tick"), 0);
    assert!(h.transport.sent().is_empty());
}

#[test]
fn weekend_enrollment_waits_for_monday_window() {
    let h = harness();
    let mut definition = base_sequence(vec![email_step(1, StepDelay::none())]);
    definition.send_window = Some(window("09:00", "17:00"));
    definition.send_on_weekends = false;
    let sequence_id = h.scheduler.create_sequence(definition).expect("create");

    // 2026-08-22 is a Saturday.
    let saturday = instant("2026-08-22T10:00:00+00:00");
    let execution_id = h
        .scheduler
        .enroll_at(&sequence_id, &contact("ada@example.com"), saturday)
        .expect("enroll");

    let execution = h
        .scheduler
        .execution(&execution_id)
        .expect("load")
        .expect("exists");
    assert_eq!(
        execution.next_action_due_at,
        Some(instant("2026-08-24T09:00:00+00:00"))
    );

    assert_eq!(h.scheduler.tick_at(saturday).expect("tick"), 0);
    assert!(h.transport.sent().is_empty());
}

#[test]
fn reply_terminates_when_pending_step_skips_on_reply() {
    let h = harness();
    let mut second = email_step(2, hour_delay(1));
    second.skip_if_replied = true;
    let third = email_step(3, hour_delay(1));
    let sequence_id = h
        .scheduler
        .create_sequence(base_sequence(vec![
            email_step(1, StepDelay::none()),
            second,
            third,
        ]))
        .expect("create");
    let contact = contact("ada@example.com");
    let execution_id = h
        .scheduler
        .enroll_at(&sequence_id, &contact, t0())
        .expect("enroll");

    h.scheduler.tick_at(t0()).expect("tick");
    assert_eq!(h.transport.sent().len(), 1);

    h.scheduler
        .handle_event(&reply(contact.id, sequence_id, t0() + Duration::minutes(10)))
        .expect("reply");

    let execution = h
        .scheduler
        .execution(&execution_id)
        .expect("load")
        .expect("exists");
    assert_eq!(execution.status, ExecutionStatus::Replied);
    assert_eq!(execution.next_action_due_at, None);
    assert_eq!(
        execution.completed_at,
        Some(t0() + Duration::minutes(10))
    );

    // Later ticks must not send the remaining steps.
    h.scheduler
        .tick_at(t0() + Duration::hours(3))
        .expect("tick after reply");
    assert_eq!(h.transport.sent().len(), 1);
}

#[test]
fn reply_on_paused_execution_only_records_the_event() {
    let h = harness();
    let sequence_id = h
        .scheduler
        .create_sequence(base_sequence(vec![
            email_step(1, StepDelay::none()),
            {
                let mut step = email_step(2, hour_delay(1));
                step.skip_if_replied = true;
                step
            },
        ]))
        .expect("create");
    let contact = contact("ada@example.com");
    let execution_id = h
        .scheduler
        .enroll_at(&sequence_id, &contact, t0())
        .expect("enroll");
    h.scheduler.pause_execution(&execution_id).expect("pause");

    let reply_at = t0() + Duration::minutes(5);
    h.scheduler
        .handle_event(&reply(contact.id, sequence_id, reply_at))
        .expect("reply");

    let execution = h
        .scheduler
        .execution(&execution_id)
        .expect("load")
        .expect("exists");
    assert_eq!(execution.status, ExecutionStatus::Paused);
    assert_eq!(execution.last_event_at, Some(reply_at));
}

#[test]
fn hourly_cap_defers_the_second_send() {
    let h = harness();
    let mut definition = base_sequence(vec![email_step(1, StepDelay::none())]);
    definition.hourly_limit = Some(1);
    let sequence_id = h.scheduler.create_sequence(definition).expect("create");

    let first = h
        .scheduler
        .enroll_at(&sequence_id, &contact("ada@example.com"), t0())
        .expect("enroll first");
    let second = h
        .scheduler
        .enroll_at(&sequence_id, &contact("grace@example.com"), t0())
        .expect("enroll second");

    h.scheduler.tick_at(t0()).expect("tick");
    assert_eq!(h.transport.sent().len(), 1);

    let first = h.scheduler.execution(&first).expect("load").expect("exists");
    let second = h
        .scheduler
        .execution(&second)
        .expect("load")
        .expect("exists");
    let deferred: Vec<_> = [&first, &second]
        .into_iter()
        .filter(|execution| execution.status == ExecutionStatus::Active)
        .collect();
    assert_eq!(deferred.len(), 1);
    assert_eq!(
        deferred[0].next_action_due_at,
        Some(t0() + Duration::minutes(60))
    );

    // The deferred execution goes out once the window slot frees up.
    h.scheduler
        .tick_at(t0() + Duration::minutes(61))
        .expect("tick later");
    assert_eq!(h.transport.sent().len(), 2);
}

#[test]
fn daily_cap_defers_into_the_next_window() {
    let h = harness();
    let mut definition = base_sequence(vec![email_step(1, StepDelay::none())]);
    definition.daily_limit = Some(1);
    definition.send_window = Some(window("09:00", "17:00"));
    definition.send_on_weekends = false;
    let sequence_id = h.scheduler.create_sequence(definition).expect("create");

    h.scheduler
        .enroll_at(&sequence_id, &contact("ada@example.com"), t0())
        .expect("enroll first");
    let second = h
        .scheduler
        .enroll_at(&sequence_id, &contact("grace@example.com"), t0())
        .expect("enroll second");

    h.scheduler.tick_at(t0()).expect("tick");
    assert_eq!(h.transport.sent().len(), 1);

    let second = h
        .scheduler
        .execution(&second)
        .expect("load")
        .expect("exists");
    assert_eq!(second.status, ExecutionStatus::Active);
    assert_eq!(
        second.next_action_due_at,
        Some(instant("2026-08-20T09:00:00+00:00"))
    );
}

#[test]
fn transient_failures_retry_then_fail_the_execution() {
    let h = harness();
    let sequence_id = h
        .scheduler
        .create_sequence(base_sequence(vec![email_step(1, StepDelay::none())]))
        .expect("create");
    let execution_id = h
        .scheduler
        .enroll_at(&sequence_id, &contact("ada@example.com"), t0())
        .expect("enroll");

    for _ in 0..3 {
        h.transport
            .fail_next(TransportError::Transient("mx unavailable".to_string()));
    }

    h.scheduler.tick_at(t0()).expect("attempt 1");
    let execution = h
        .scheduler
        .execution(&execution_id)
        .expect("load")
        .expect("exists");
    assert_eq!(execution.retry_count, 1);
    assert_eq!(
        execution.next_action_due_at,
        Some(t0() + Duration::minutes(5))
    );

    h.scheduler
        .tick_at(t0() + Duration::minutes(5))
        .expect("attempt 2");
    let execution = h
        .scheduler
        .execution(&execution_id)
        .expect("load")
        .expect("exists");
    assert_eq!(execution.retry_count, 2);
    assert_eq!(
        execution.next_action_due_at,
        Some(t0() + Duration::minutes(15))
    );

    h.scheduler
        .tick_at(t0() + Duration::minutes(15))
        .expect("attempt 3");
    let execution = h
        .scheduler
        .execution(&execution_id)
        .expect("load")
        .expect("exists");
    assert_eq!(execution.status, ExecutionStatus::Failed);
    assert!(h.transport.sent().is_empty());

    let emails = h
        .scheduler
        .emails_for_execution(&execution_id)
        .expect("emails");
    assert_eq!(emails.len(), 3);
    assert!(emails.iter().all(|email| email.status == EmailStatus::Failed));
    assert!(emails
        .iter()
        .all(|email| email.error_message.as_deref().is_some_and(|m| m.contains("mx unavailable"))));
    assert!(emails
        .iter()
        .all(|email| email.failed_at.is_some() && email.sent_at.is_none()));
}

#[test]
fn fatal_failure_fails_the_execution_immediately() {
    let h = harness();
    let sequence_id = h
        .scheduler
        .create_sequence(base_sequence(vec![
            email_step(1, StepDelay::none()),
            email_step(2, hour_delay(1)),
        ]))
        .expect("create");
    let execution_id = h
        .scheduler
        .enroll_at(&sequence_id, &contact("bad@example.com"), t0())
        .expect("enroll");

    h.transport
        .fail_next(TransportError::Fatal("invalid recipient".to_string()));
    h.scheduler.tick_at(t0()).expect("tick");

    let execution = h
        .scheduler
        .execution(&execution_id)
        .expect("load")
        .expect("exists");
    assert_eq!(execution.status, ExecutionStatus::Failed);
    assert_eq!(execution.next_action_due_at, None);
    assert!(h.transport.sent().is_empty());
}

#[test]
fn cancelled_execution_is_skipped_by_the_poll() {
    let h = harness();
    let sequence_id = h
        .scheduler
        .create_sequence(base_sequence(vec![email_step(1, StepDelay::none())]))
        .expect("create");
    let execution_id = h
        .scheduler
        .enroll_at(&sequence_id, &contact("ada@example.com"), t0())
        .expect("enroll");

    h.scheduler.cancel_execution(&execution_id).expect("cancel");
    h.scheduler.tick_at(t0()).expect("tick");

    assert!(h.transport.sent().is_empty());
    let execution = h
        .scheduler
        .execution(&execution_id)
        .expect("load")
        .expect("exists");
    assert_eq!(execution.status, ExecutionStatus::Cancelled);

    // Terminal executions reject further lifecycle calls.
    assert!(matches!(
        h.scheduler.pause_execution(&execution_id),
        Err(SchedulerError::TerminalExecution(_))
    ));
}

#[test]
fn resume_reschedules_from_the_resume_instant() {
    let h = harness();
    let mut definition = base_sequence(vec![email_step(1, StepDelay::none())]);
    definition.send_window = Some(window("09:00", "17:00"));
    definition.send_on_weekends = false;
    let sequence_id = h.scheduler.create_sequence(definition).expect("create");
    let execution_id = h
        .scheduler
        .enroll_at(&sequence_id, &contact("ada@example.com"), t0())
        .expect("enroll");

    h.scheduler.pause_execution(&execution_id).expect("pause");
    h.scheduler.tick_at(t0()).expect("tick while paused");
    assert!(h.transport.sent().is_empty());

    // 2026-08-18 is a Tuesday; 18:00 is past the window, so the send lands
    // Wednesday at window start.
    let resume_at = instant("2026-08-18T18:00:00+00:00");
    h.scheduler
        .resume_execution_at(&execution_id, resume_at)
        .expect("resume");

    let execution = h
        .scheduler
        .execution(&execution_id)
        .expect("load")
        .expect("exists");
    assert_eq!(execution.status, ExecutionStatus::Active);
    assert_eq!(
        execution.next_action_due_at,
        Some(instant("2026-08-19T09:00:00+00:00"))
    );
}

#[test]
fn wait_step_times_out_and_advances() {
    let h = harness();
    let sequence_id = h
        .scheduler
        .create_sequence(base_sequence(vec![
            email_step(1, StepDelay::none()),
            wait_step(2, 24),
            email_step(3, StepDelay::none()),
        ]))
        .expect("create");
    let execution_id = h
        .scheduler
        .enroll_at(&sequence_id, &contact("ada@example.com"), t0())
        .expect("enroll");

    h.scheduler.tick_at(t0()).expect("send first");
    let execution = h
        .scheduler
        .execution(&execution_id)
        .expect("load")
        .expect("exists");
    assert_eq!(
        execution.next_action_due_at,
        Some(t0() + Duration::hours(24))
    );

    let timeout = t0() + Duration::hours(24);
    h.scheduler.tick_at(timeout).expect("wait times out");
    h.scheduler.tick_at(timeout).expect("send third");

    let sent = h.transport.sent();
    assert_eq!(sent.len(), 2);
    assert_eq!(sent[1].subject, "step 3");

    let execution = h
        .scheduler
        .execution(&execution_id)
        .expect("load")
        .expect("exists");
    assert_eq!(execution.status, ExecutionStatus::Completed);
}

#[test]
fn reply_satisfies_a_pending_wait_step() {
    let h = harness();
    let sequence_id = h
        .scheduler
        .create_sequence(base_sequence(vec![
            email_step(1, StepDelay::none()),
            wait_step(2, 24),
            email_step(3, hour_delay(1)),
        ]))
        .expect("create");
    let contact = contact("ada@example.com");
    let execution_id = h
        .scheduler
        .enroll_at(&sequence_id, &contact, t0())
        .expect("enroll");

    h.scheduler.tick_at(t0()).expect("send first");

    let reply_at = t0() + Duration::hours(2);
    h.scheduler
        .handle_event(&reply(contact.id, sequence_id, reply_at))
        .expect("reply");

    let execution = h
        .scheduler
        .execution(&execution_id)
        .expect("load")
        .expect("exists");
    assert_eq!(execution.status, ExecutionStatus::Active);
    assert_eq!(execution.current_step, 2);
    // The follow-up is timed from the reply, not the grace deadline.
    assert_eq!(
        execution.next_action_due_at,
        Some(reply_at + Duration::hours(1))
    );

    h.scheduler
        .tick_at(reply_at + Duration::hours(1))
        .expect("send third");
    assert_eq!(h.transport.sent().len(), 2);
}

#[test]
fn bounce_fails_open_executions_for_the_contact() {
    let h = harness();
    let sequence_id = h
        .scheduler
        .create_sequence(base_sequence(vec![
            email_step(1, StepDelay::none()),
            email_step(2, hour_delay(1)),
        ]))
        .expect("create");
    let contact = contact("gone@example.com");
    let execution_id = h
        .scheduler
        .enroll_at(&sequence_id, &contact, t0())
        .expect("enroll");

    h.scheduler.tick_at(t0()).expect("send first");
    h.scheduler
        .handle_event(&SequenceEvent {
            contact_id: contact.id,
            sequence_id: Some(sequence_id),
            kind: EventKind::Bounce,
            at: t0() + Duration::minutes(1),
            tracking_id: None,
        })
        .expect("bounce");

    let execution = h
        .scheduler
        .execution(&execution_id)
        .expect("load")
        .expect("exists");
    assert_eq!(execution.status, ExecutionStatus::Failed);
    assert_eq!(execution.next_action_due_at, None);
}

#[test]
fn open_and_click_events_update_tracking_counts() {
    let h = harness();
    let sequence_id = h
        .scheduler
        .create_sequence(base_sequence(vec![email_step(1, StepDelay::none())]))
        .expect("create");
    let contact = contact("ada@example.com");
    let execution_id = h
        .scheduler
        .enroll_at(&sequence_id, &contact, t0())
        .expect("enroll");
    h.scheduler.tick_at(t0()).expect("send");

    let emails = h
        .scheduler
        .emails_for_execution(&execution_id)
        .expect("emails");
    let tracking_id = emails[0].tracking_id;

    let open = SequenceEvent {
        contact_id: contact.id,
        sequence_id: Some(sequence_id),
        kind: EventKind::Open,
        at: t0() + Duration::minutes(30),
        tracking_id: Some(tracking_id),
    };
    h.scheduler.handle_event(&open).expect("open 1");
    h.scheduler.handle_event(&open).expect("open 2");
    h.scheduler
        .handle_event(&SequenceEvent {
            kind: EventKind::Click,
            ..open.clone()
        })
        .expect("click");

    let emails = h
        .scheduler
        .emails_for_execution(&execution_id)
        .expect("emails");
    assert!(emails[0].opened);
    assert_eq!(emails[0].open_count, 2);
    assert_eq!(emails[0].click_count, 1);
}

#[test]
fn duplicate_enrollment_is_rejected() {
    let h = harness();
    let sequence_id = h
        .scheduler
        .create_sequence(base_sequence(vec![email_step(1, hour_delay(1))]))
        .expect("create");
    let contact = contact("ada@example.com");

    h.scheduler
        .enroll_at(&sequence_id, &contact, t0())
        .expect("first enrollment");
    assert!(matches!(
        h.scheduler.enroll_at(&sequence_id, &contact, t0()),
        Err(SchedulerError::AlreadyEnrolled { .. })
    ));
}

#[test]
fn deactivation_blocks_enrollment_and_pauses_executions() {
    let h = harness();
    let sequence_id = h
        .scheduler
        .create_sequence(base_sequence(vec![email_step(1, hour_delay(1))]))
        .expect("create");
    let execution_id = h
        .scheduler
        .enroll_at(&sequence_id, &contact("ada@example.com"), t0())
        .expect("enroll");

    h.scheduler
        .set_sequence_active(&sequence_id, false)
        .expect("deactivate");

    assert!(matches!(
        h.scheduler
            .enroll_at(&sequence_id, &contact("grace@example.com"), t0()),
        Err(SchedulerError::SequenceInactive(_))
    ));
    let execution = h
        .scheduler
        .execution(&execution_id)
        .expect("load")
        .expect("exists");
    assert_eq!(execution.status, ExecutionStatus::Paused);
}

#[test]
fn invalid_sequence_definitions_are_rejected() {
    let h = harness();

    assert!(matches!(
        h.scheduler.create_sequence(base_sequence(vec![])),
        Err(SchedulerError::Config(_))
    ));

    let mut inverted = base_sequence(vec![email_step(1, StepDelay::none())]);
    inverted.send_window = Some(window("17:00", "09:00"));
    assert!(matches!(
        h.scheduler.create_sequence(inverted),
        Err(SchedulerError::Config(_))
    ));

    let gap = base_sequence(vec![email_step(1, StepDelay::none()), email_step(3, StepDelay::none())]);
    assert!(matches!(
        h.scheduler.create_sequence(gap),
        Err(SchedulerError::Config(_))
    ));
}

#[test]
fn restart_rebuilds_daily_counters_from_the_send_log() {
    let h = harness();
    let mut definition = base_sequence(vec![email_step(1, StepDelay::none())]);
    definition.daily_limit = Some(1);
    let sequence_id = h.scheduler.create_sequence(definition).expect("create");

    h.scheduler
        .enroll_at(&sequence_id, &contact("ada@example.com"), t0())
        .expect("enroll first");
    h.scheduler.tick_at(t0()).expect("tick");
    assert_eq!(h.transport.sent().len(), 1);

    // Reload the same database; the cap must survive the restart.
    let restart_at = t0() + Duration::minutes(10);
    let transport = Arc::new(RecordingTransport::default());
    let reloaded = Scheduler::load_at(h.db_path.clone(), transport.clone(), restart_at)
        .expect("reload scheduler");

    let execution_id = reloaded
        .enroll_at(&sequence_id, &contact("grace@example.com"), restart_at)
        .expect("enroll second");
    reloaded.tick_at(restart_at).expect("tick after reload");

    assert!(transport.sent().is_empty());
    let execution = reloaded
        .execution(&execution_id)
        .expect("load")
        .expect("exists");
    assert_eq!(execution.status, ExecutionStatus::Active);
    assert_eq!(
        execution.next_action_due_at,
        Some(instant("2026-08-20T00:00:00+00:00"))
    );
}

#[test]
fn restart_recovers_an_execution_interrupted_mid_dispatch() {
    let h = harness();
    let sequence_id = h
        .scheduler
        .create_sequence(base_sequence(vec![email_step(1, StepDelay::none())]))
        .expect("create");
    let execution_id = h
        .scheduler
        .enroll_at(&sequence_id, &contact("ada@example.com"), t0())
        .expect("enroll");

    // A process death inside the transport leaves a pending email and a set
    // in-flight claim behind.
    h.transport.panic_once();
    let crashed = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
        h.scheduler.tick_at(t0())
    }));
    assert!(crashed.is_err());
    let emails = h
        .scheduler
        .emails_for_execution(&execution_id)
        .expect("emails");
    assert_eq!(emails.len(), 1);
    assert_eq!(emails[0].status, EmailStatus::Pending);

    let transport = Arc::new(RecordingTransport::default());
    let reloaded = Scheduler::load_at(h.db_path.clone(), transport.clone(), t0())
        .expect("reload scheduler");
    reloaded.tick_at(t0()).expect("tick after reload");

    assert_eq!(transport.sent().len(), 1);
    let execution = reloaded
        .execution(&execution_id)
        .expect("load")
        .expect("exists");
    assert_eq!(execution.status, ExecutionStatus::Completed);

    let emails = reloaded
        .emails_for_execution(&execution_id)
        .expect("emails");
    assert_eq!(emails.len(), 2);
    assert!(emails
        .iter()
        .any(|email| email.status == EmailStatus::Cancelled));
    assert!(emails.iter().any(|email| email.status == EmailStatus::Sent));
}

#[test]
fn reactivated_sequence_keeps_its_daily_counter_after_restart() {
    let h = harness();
    let mut definition = base_sequence(vec![email_step(1, StepDelay::none())]);
    definition.daily_limit = Some(1);
    let sequence_id = h.scheduler.create_sequence(definition).expect("create");

    h.scheduler
        .enroll_at(&sequence_id, &contact("ada@example.com"), t0())
        .expect("enroll first");
    h.scheduler.tick_at(t0()).expect("tick");
    assert_eq!(h.transport.sent().len(), 1);
    h.scheduler
        .set_sequence_active(&sequence_id, false)
        .expect("deactivate");

    // Restart while the sequence is inactive, then bring it back the same
    // local day; the cap must still count the morning's send.
    let restart_at = t0() + Duration::minutes(30);
    let transport = Arc::new(RecordingTransport::default());
    let reloaded = Scheduler::load_at(h.db_path.clone(), transport.clone(), restart_at)
        .expect("reload scheduler");
    reloaded
        .set_sequence_active(&sequence_id, true)
        .expect("reactivate");

    let execution_id = reloaded
        .enroll_at(&sequence_id, &contact("grace@example.com"), restart_at)
        .expect("enroll second");
    reloaded.tick_at(restart_at).expect("tick after reload");

    assert!(transport.sent().is_empty());
    let execution = reloaded
        .execution(&execution_id)
        .expect("load")
        .expect("exists");
    assert_eq!(
        execution.next_action_due_at,
        Some(instant("2026-08-20T00:00:00+00:00"))
    );
}

struct BlockingTransport {
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl BlockingTransport {
    fn new() -> Self {
        Self {
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
        }
    }
}

impl EmailTransport for BlockingTransport {
    fn send(&self, _request: &SendRequest) -> Result<(), TransportError> {
        let depth = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(depth, Ordering::SeqCst);
        std::thread::sleep(std::time::Duration::from_millis(250));
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        Ok(())
    }
}

#[test]
fn slow_transport_calls_overlap_within_a_tick() {
    let temp = TempDir::new().expect("tempdir");
    let transport = Arc::new(BlockingTransport::new());
    let scheduler = Scheduler::load_at(
        temp.path().join("sequences.db"),
        transport.clone(),
        t0(),
    )
    .expect("load scheduler");

    // Two independent sequences so neither send waits on the other's
    // admission.
    for _ in 0..2 {
        let sequence_id = scheduler
            .create_sequence(base_sequence(vec![email_step(1, StepDelay::none())]))
            .expect("create");
        scheduler
            .enroll_at(&sequence_id, &contact("ada@example.com"), t0())
            .expect("enroll");
    }

    assert_eq!(scheduler.tick_at(t0()).expect("tick"), 2);
    assert!(transport.max_in_flight.load(Ordering::SeqCst) >= 2);
}
