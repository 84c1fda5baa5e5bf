pub mod config;
mod scheduler;

pub use scheduler::{
    compute_due_at, next_step, resolve_next_send_instant, Admission, ConfigError, Contact,
    EmailStatus, EmailTransport, EventKind, ExecutionStatus, LogTransport, NewSequence, NewStep,
    RateLimiter, ScheduledEmail, Scheduler, SchedulerError, SendRequest, SendWindow, Sequence,
    SequenceEvent, SequenceExecution, SequenceStep, StepDelay, StepKind, TransportError,
};
