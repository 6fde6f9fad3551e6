use crate::types::ErrorType;
use std::io;
use std::panic::Location;

/// A protocol failure carrying the RFC 7540 error code that a GOAWAY or
/// RST_STREAM for it would use, plus the location the failure was raised at.
///
/// Handlers return these as values; the connection owner decides whether the
/// answer is a connection close or a stream reset.
#[derive(thiserror::Error, Debug, Clone)]
#[error("{code:?}: {message} ({at})")]
pub struct H2Error {
    pub code: ErrorType,
    pub message: String,
    pub at: &'static Location<'static>,
}

impl H2Error {
    #[track_caller]
    pub fn new(code: ErrorType, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            at: Location::caller(),
        }
    }

    #[track_caller]
    pub fn protocol(message: impl Into<String>) -> Self {
        Self::new(ErrorType::ProtocolError, message)
    }

    #[track_caller]
    pub fn frame_size(message: impl Into<String>) -> Self {
        Self::new(ErrorType::FrameSizeError, message)
    }

    #[track_caller]
    pub fn flow_control(message: impl Into<String>) -> Self {
        Self::new(ErrorType::FlowControlError, message)
    }

    #[track_caller]
    pub fn stream_closed(message: impl Into<String>) -> Self {
        Self::new(ErrorType::StreamClosed, message)
    }
}

pub type H2Result<T> = Result<T, H2Error>;

/// Errors surfaced by the blocking stream operations.
#[derive(thiserror::Error, Debug)]
pub enum StreamError {
    #[error(transparent)]
    Protocol(#[from] H2Error),
    /// The deadline passed before the operation could complete.
    #[error("operation timed out")]
    TimedOut,
    /// The stream is no longer readable or writable and no reset error was
    /// recorded for it.
    #[error("stream is closed")]
    BrokenPipe,
    #[error(transparent)]
    Io(io::Error),
}

impl From<io::Error> for StreamError {
    fn from(err: io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::BrokenPipe | io::ErrorKind::ConnectionReset => Self::BrokenPipe,
            io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock => Self::TimedOut,
            _ => Self::Io(err),
        }
    }
}

pub type StreamResult<T> = Result<T, StreamError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_mentions_code_and_message() {
        let err = H2Error::protocol("bad frame");
        assert_eq!(err.code, ErrorType::ProtocolError);
        assert!(err.to_string().contains("bad frame"));
        assert!(err.to_string().contains("error.rs"));
    }

    #[test]
    fn io_errors_map_to_stream_errors() {
        let pipe = io::Error::new(io::ErrorKind::BrokenPipe, "gone");
        assert!(matches!(StreamError::from(pipe), StreamError::BrokenPipe));
        let timeout = io::Error::new(io::ErrorKind::TimedOut, "late");
        assert!(matches!(StreamError::from(timeout), StreamError::TimedOut));
    }
}
