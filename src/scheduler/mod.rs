mod core;
mod events;
mod schedule;
mod store;
mod throttle;
mod transport;
mod types;
mod utils;

#[cfg(test)]
mod tests;

pub use self::core::Scheduler;
pub use events::{EventKind, SequenceEvent};
pub use schedule::{compute_due_at, next_step, resolve_next_send_instant};
pub use throttle::{Admission, RateLimiter};
pub use transport::{EmailTransport, LogTransport, SendRequest, TransportError};
pub use types::{
    ConfigError, Contact, EmailStatus, ExecutionStatus, NewSequence, NewStep, ScheduledEmail,
    SchedulerError, SendWindow, Sequence, SequenceExecution, SequenceStep, StepDelay, StepKind,
};
