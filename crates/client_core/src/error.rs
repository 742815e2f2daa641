use thiserror::Error;

/// Credential failures are never recovered locally; they always surface as
/// a terminated session forcing re-authentication.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("not signed in")]
    NotAuthenticated,
    #[error("credential expired")]
    Expired,
}

#[derive(Debug, Error)]
pub enum StreamError {
    #[error("account stream transport unavailable")]
    Unavailable,
    #[error("failed to open account stream: {0}")]
    Connect(String),
}

#[derive(Debug, Error)]
pub enum ChannelError {
    #[error("no room channel is open")]
    NotJoined,
    #[error("room channel transport unavailable")]
    Unavailable,
    #[error("failed to connect room channel: {0}")]
    Connect(String),
    #[error("room channel closed: {0}")]
    Closed(String),
    #[error("room channel dropped before acknowledgment")]
    AckDropped,
    #[error("unexpected acknowledgment payload: {0}")]
    BadAck(String),
    #[error("message has neither content nor an attached file")]
    EmptyMessage,
    #[error("attached file exceeds {max_bytes} bytes")]
    AttachmentTooLarge { max_bytes: usize },
}
