use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use chrono::Utc;
use tempfile::TempDir;
use uuid::Uuid;

use sequence_scheduler::{
    Contact, EmailTransport, ExecutionStatus, NewSequence, NewStep, Scheduler, SendRequest,
    StepDelay, StepKind, TransportError,
};

#[derive(Default)]
struct CountingTransport {
    sends: AtomicUsize,
}

impl EmailTransport for CountingTransport {
    fn send(&self, _request: &SendRequest) -> Result<(), TransportError> {
        self.sends.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

fn two_step_sequence() -> NewSequence {
    NewSequence {
        name: "welcome".to_string(),
        description: Some("integration flow".to_string()),
        timezone: chrono_tz::UTC,
        send_window: None,
        send_on_weekends: true,
        daily_limit: None,
        hourly_limit: None,
        steps: vec![
            NewStep {
                order: 1,
                kind: StepKind::Email {
                    subject: "hello".to_string(),
                    body: "first touch".to_string(),
                },
                delay: StepDelay::none(),
                skip_if_replied: false,
                track_opens: false,
                track_clicks: false,
            },
            NewStep {
                order: 2,
                kind: StepKind::Email {
                    subject: "following up".to_string(),
                    body: "second touch".to_string(),
                },
                delay: StepDelay::none(),
                skip_if_replied: false,
                track_opens: false,
                track_clicks: false,
            },
        ],
    }
}

#[test]
fn poll_loop_drives_an_enrollment_to_completion() {
    let temp = TempDir::new().expect("tempdir");
    let transport = Arc::new(CountingTransport::default());
    let scheduler = Arc::new(
        Scheduler::load(temp.path().join("sequences.db"), transport.clone())
            .expect("load scheduler"),
    );

    let sequence_id = scheduler
        .create_sequence(two_step_sequence())
        .expect("create sequence");
    let contact = Contact {
        id: Uuid::new_v4(),
        email: "ada@example.com".to_string(),
    };
    let execution_id = scheduler
        .enroll_at(&sequence_id, &contact, Utc::now())
        .expect("enroll");

    let running = Arc::new(AtomicBool::new(true));
    let loop_scheduler = Arc::clone(&scheduler);
    let loop_running = Arc::clone(&running);
    let handle = thread::spawn(move || {
        loop_scheduler.run_loop(Duration::from_millis(20), &loop_running)
    });

    let deadline = Instant::now() + Duration::from_secs(5);
    loop {
        let execution = scheduler
            .execution(&execution_id)
            .expect("load execution")
            .expect("execution exists");
        if execution.status == ExecutionStatus::Completed {
            break;
        }
        assert!(
            Instant::now() < deadline,
            "execution did not complete in time (status {:?})",
            execution.status
        );
        thread::sleep(Duration::from_millis(20));
    }

    running.store(false, Ordering::SeqCst);
    handle.join().expect("loop thread").expect("loop result");

    assert_eq!(transport.sends.load(Ordering::SeqCst), 2);
    let emails = scheduler
        .emails_for_execution(&execution_id)
        .expect("emails");
    assert_eq!(emails.len(), 2);
}
