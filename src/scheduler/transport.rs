use tracing::info;
use uuid::Uuid;

/// A materialized send handed to the transport collaborator.
#[derive(Debug, Clone)]
pub struct SendRequest {
    pub scheduled_email_id: Uuid,
    pub recipient: String,
    pub subject: String,
    pub body: String,
    pub tracking_id: Uuid,
    pub track_opens: bool,
    pub track_clicks: bool,
}

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// Network hiccup or SMTP rejection; retried with backoff.
    #[error("transient transport failure: {0}")]
    Transient(String),
    /// Invalid recipient or equivalent; fails the execution immediately.
    #[error("permanent transport failure: {0}")]
    Fatal(String),
    /// Bounded-timeout expiry; handled like a transient failure.
    #[error("transport call timed out")]
    Timeout,
}

impl TransportError {
    pub(crate) fn is_fatal(&self) -> bool {
        matches!(self, TransportError::Fatal(_))
    }
}

/// Outbound delivery boundary. SMTP/API mechanics live behind this trait;
/// the scheduler only sees sent-or-failed.
pub trait EmailTransport {
    fn send(&self, request: &SendRequest) -> Result<(), TransportError>;
}

impl<T: EmailTransport + ?Sized> EmailTransport for std::sync::Arc<T> {
    fn send(&self, request: &SendRequest) -> Result<(), TransportError> {
        (**self).send(request)
    }
}

/// Transport that records the send in the log and reports success. The
/// binary runs with this until a real delivery integration is wired in.
#[derive(Debug, Default, Clone)]
pub struct LogTransport;

impl EmailTransport for LogTransport {
    fn send(&self, request: &SendRequest) -> Result<(), TransportError> {
        info!(
            "send scheduled_email_id={} to={} subject={:?} tracking_id={}",
            request.scheduled_email_id, request.recipient, request.subject, request.tracking_id
        );
        Ok(())
    }
}
