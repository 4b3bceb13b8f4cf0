use std::fmt;

use thiserror::Error;

/// Absolute byte position within a stream.
pub type Position = u64;

/// Error categories used across the crate.
///
/// OS errors from file descriptors are mapped into the `NotFound`,
/// `PermissionDenied`, `Unavailable`, and `Unknown` kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Error)]
pub enum StatusKind {
    /// Malformed input: a truncated or corrupt compressed stream, or an
    /// invalid option combination.
    #[error("invalid argument")]
    InvalidArgument,
    /// The source changed or shrank underneath a seek back.
    #[error("data loss")]
    DataLoss,
    /// A capability is absent on this stream instance.
    #[error("unimplemented")]
    Unimplemented,
    /// A position counter would overflow.
    #[error("resource exhausted")]
    ResourceExhausted,
    /// An engine-level failure, e.g. context allocation.
    #[error("internal")]
    Internal,
    #[error("not found")]
    NotFound,
    #[error("permission denied")]
    PermissionDenied,
    #[error("unavailable")]
    Unavailable,
    #[error("unknown")]
    Unknown,
}

/// An error latched on a stream: a kind, a root-cause message, and an
/// append-only chain of context notes added by each layer the error
/// crossed ("reading /tmp/f", "at byte 12", "at uncompressed byte 70").
///
/// Annotation never replaces the root cause; `Display` renders the message
/// first and the context notes after it in the order they were added.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Status {
    kind: StatusKind,
    message: String,
    context: Vec<String>,
}

impl Status {
    pub fn new(kind: StatusKind, message: impl Into<String>) -> Self {
        Status {
            kind,
            message: message.into(),
            context: Vec::new(),
        }
    }

    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Status::new(StatusKind::InvalidArgument, message)
    }

    pub fn data_loss(message: impl Into<String>) -> Self {
        Status::new(StatusKind::DataLoss, message)
    }

    pub fn unimplemented(message: impl Into<String>) -> Self {
        Status::new(StatusKind::Unimplemented, message)
    }

    pub fn resource_exhausted(message: impl Into<String>) -> Self {
        Status::new(StatusKind::ResourceExhausted, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Status::new(StatusKind::Internal, message)
    }

    pub fn kind(&self) -> StatusKind {
        self.kind
    }

    /// The root-cause message, without context notes.
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Context notes in the order they were added, innermost layer first.
    pub fn context(&self) -> &[String] {
        &self.context
    }

    /// Returns this status with `note` appended to the context chain.
    pub fn annotate(mut self, note: impl Into<String>) -> Self {
        self.context.push(note.into());
        self
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)?;
        for note in &self.context {
            write!(f, "; {note}")?;
        }
        write!(f, " ({})", self.kind)
    }
}

impl std::error::Error for Status {}

impl From<std::io::ErrorKind> for StatusKind {
    fn from(kind: std::io::ErrorKind) -> Self {
        use std::io::ErrorKind;
        match kind {
            ErrorKind::NotFound => StatusKind::NotFound,
            ErrorKind::PermissionDenied => StatusKind::PermissionDenied,
            ErrorKind::InvalidInput | ErrorKind::InvalidData => StatusKind::InvalidArgument,
            ErrorKind::Unsupported => StatusKind::Unimplemented,
            ErrorKind::WouldBlock | ErrorKind::TimedOut => StatusKind::Unavailable,
            _ => StatusKind::Unknown,
        }
    }
}

impl From<std::io::Error> for Status {
    fn from(error: std::io::Error) -> Self {
        Status::new(StatusKind::from(error.kind()), error.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn annotation_preserves_root_cause() {
        let status = Status::invalid_argument("bad frame")
            .annotate("reading /tmp/f at byte 12")
            .annotate("at uncompressed byte 70");

        assert_eq!(status.kind(), StatusKind::InvalidArgument);
        assert_eq!(status.message(), "bad frame");
        assert_eq!(
            status.to_string(),
            "bad frame; reading /tmp/f at byte 12; at uncompressed byte 70 (invalid argument)"
        );
    }
}
